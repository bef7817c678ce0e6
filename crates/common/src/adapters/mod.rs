//! Bidder adapters and the builder list used to register them from settings.
//!
//! Each adapter module exposes a `register(&Settings)` builder. Adapters
//! without an `[adapters.<code>]` table, or with `enabled = false`, are
//! skipped.

use std::sync::Arc;

use error_stack::{Report, ResultExt};
use serde::de::DeserializeOwned;
use serde::{Deserializer, Serialize};
use serde_json::Value as Json;

use crate::bidder::{BidRequest, BidderRegistry, BidderSpec};
use crate::error::AdapterError;
use crate::settings::Settings;

pub mod glasspane;
pub mod mocktioneer;
pub mod streamline;
pub mod tessellate;

/// Type alias for adapter builder functions.
type AdapterBuilder = fn(&Settings) -> Result<Option<Arc<dyn BidderSpec>>, Report<AdapterError>>;

fn builders() -> &'static [AdapterBuilder] {
    &[
        mocktioneer::register,
        streamline::register,
        glasspane::register,
        tessellate::register,
    ]
}

/// Register every adapter enabled in `settings` into `registry`.
///
/// # Errors
///
/// Returns an error when an adapter config fails to deserialize or validate,
/// or when registration collides with an existing bidder code.
pub fn register_adapters(
    settings: &Settings,
    registry: &mut BidderRegistry,
) -> Result<(), Report<AdapterError>> {
    for builder in builders() {
        if let Some(spec) = builder(settings)? {
            registry.register_bidder(spec)?;
        }
    }
    Ok(())
}

pub(crate) fn default_enabled() -> bool {
    true
}

/// Deserialize bidder params into the adapter's typed shape.
///
/// # Errors
///
/// Returns [`AdapterError::InvalidParams`] when the params do not match `T`.
pub(crate) fn try_parse_params<T: DeserializeOwned>(
    code: &str,
    bid: &BidRequest,
) -> Result<T, Report<AdapterError>> {
    serde_json::from_value(bid.params.clone()).change_context(AdapterError::InvalidParams {
        bidder: code.to_string(),
        message: format!("bid {} has unusable params", bid.bid_id),
    })
}

/// [`try_parse_params`], logging the failure and returning `None`.
pub(crate) fn parse_params<T: DeserializeOwned>(code: &str, bid: &BidRequest) -> Option<T> {
    try_parse_params(code, bid)
        .inspect_err(|report| log::debug!("{report:?}"))
        .ok()
}

/// Serialize an outbound payload.
///
/// # Errors
///
/// Returns [`AdapterError::Request`] when `payload` cannot become JSON.
pub(crate) fn encode_request<T: Serialize>(
    code: &str,
    payload: &T,
) -> Result<Json, Report<AdapterError>> {
    serde_json::to_value(payload).change_context(AdapterError::Request {
        bidder: code.to_string(),
        message: "failed to serialize request body".to_string(),
    })
}

/// Deserialize a vendor response body.
///
/// # Errors
///
/// Returns [`AdapterError::Response`] when the body does not match `T`.
pub(crate) fn decode_response<T: DeserializeOwned>(
    code: &str,
    body: &Json,
) -> Result<T, Report<AdapterError>> {
    serde_json::from_value(body.clone()).change_context(AdapterError::Response {
        bidder: code.to_string(),
        message: "unexpected response shape".to_string(),
    })
}

/// Accept an id given either as a JSON string or an integer.
///
/// Publishers paste ids from vendor dashboards both ways. Empty strings are
/// rejected.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct IdVisitor;

    impl Visitor<'_> for IdVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a non-empty string or integer id")
        }

        fn visit_str<E>(self, value: &str) -> Result<String, E>
        where
            E: de::Error,
        {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(E::custom("id must not be empty"));
            }
            Ok(trimmed.to_string())
        }

        fn visit_i64<E>(self, value: i64) -> Result<String, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_u64<E>(self, value: u64) -> Result<String, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }
    }

    deserializer.deserialize_any(IdVisitor)
}
