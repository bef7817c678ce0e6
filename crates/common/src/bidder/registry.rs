use std::collections::HashMap;
use std::sync::Arc;

use error_stack::Report;

use crate::consent::ConsentData;
use crate::error::AdapterError;
use crate::settings::Settings;

use super::spec::BidderSpec;
use super::types::{
    BidRequest, BidResponse, BidderRequest, MediaType, ServerRequest, ServerResponse, SyncOptions,
    UserSync,
};

/// In-memory registry of bidder adapters, keyed by bidder code and alias.
#[derive(Clone, Default)]
pub struct BidderRegistry {
    specs: HashMap<&'static str, Arc<dyn BidderSpec>>,
    aliases: HashMap<&'static str, &'static str>,
}

impl BidderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry containing every adapter enabled in `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error when an adapter config is invalid or two adapters
    /// claim the same code.
    pub fn from_settings(settings: &Settings) -> Result<Self, Report<AdapterError>> {
        let mut registry = Self::new();
        crate::adapters::register_adapters(settings, &mut registry)?;
        log::info!("Bidder registry built with {} adapters", registry.len());
        Ok(registry)
    }

    /// Register an adapter under its code and aliases.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Registry`] if the code or an alias is taken.
    pub fn register_bidder(&mut self, spec: Arc<dyn BidderSpec>) -> Result<(), Report<AdapterError>> {
        let code = spec.code();
        if self.resolve(code).is_some() {
            return Err(Report::new(AdapterError::Registry {
                message: format!("bidder code '{code}' is already registered"),
            }));
        }
        for alias in spec.aliases() {
            if self.resolve(alias).is_some() {
                return Err(Report::new(AdapterError::Registry {
                    message: format!("alias '{alias}' of '{code}' is already registered"),
                }));
            }
        }

        for alias in spec.aliases() {
            self.aliases.insert(*alias, code);
        }
        log::info!(
            "Registered bidder '{}' (aliases: {:?})",
            code,
            spec.aliases()
        );
        self.specs.insert(code, spec);
        Ok(())
    }

    fn resolve(&self, code: &str) -> Option<&'static str> {
        self.specs
            .get_key_value(code)
            .map(|(k, _)| *k)
            .or_else(|| self.aliases.get(code).copied())
    }

    /// Look up an adapter by code or alias.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<&Arc<dyn BidderSpec>> {
        self.specs.get(self.resolve(code)?)
    }

    /// Registered bidder codes, sorted.
    #[must_use]
    pub fn codes(&self) -> Vec<&'static str> {
        let mut codes: Vec<&'static str> = self.specs.keys().copied().collect();
        codes.sort_unstable();
        codes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Filter `bids` down to valid ones and let the adapter describe its calls.
    #[must_use]
    pub fn build_requests(
        &self,
        code: &str,
        bids: &[BidRequest],
        bidder_request: &BidderRequest,
    ) -> Vec<ServerRequest> {
        let Some(spec) = self.get(code) else {
            log::warn!("build_requests: unknown bidder '{code}'");
            return Vec::new();
        };

        let valid: Vec<BidRequest> = bids
            .iter()
            .filter(|bid| {
                if !supports_any_media_type(spec.as_ref(), bid) {
                    log::debug!(
                        "{}: dropping bid {} with no supported media type",
                        spec.code(),
                        bid.bid_id
                    );
                    return false;
                }
                if !spec.is_bid_request_valid(bid) {
                    log::warn!(
                        "{}: invalid params on bid {} ({}), dropping",
                        spec.code(),
                        bid.bid_id,
                        bid.ad_unit_code
                    );
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        if valid.is_empty() {
            return Vec::new();
        }

        let requests = spec.build_requests(&valid, bidder_request);
        log::debug!(
            "{}: built {} requests for {} bids",
            spec.code(),
            requests.len(),
            valid.len()
        );
        requests
    }

    /// Interpret a response and drop bids that fail basic sanity checks.
    #[must_use]
    pub fn interpret_response(
        &self,
        code: &str,
        response: &ServerResponse,
        request: &ServerRequest,
    ) -> Vec<BidResponse> {
        let Some(spec) = self.get(code) else {
            log::warn!("interpret_response: unknown bidder '{code}'");
            return Vec::new();
        };

        spec.interpret_response(response, request)
            .into_iter()
            .map(|mut bid| {
                if bid.bidder_code.is_empty() {
                    bid.bidder_code = code.to_string();
                }
                bid
            })
            .filter(|bid| {
                let valid = is_valid_bid_response(bid, request);
                if !valid {
                    log::warn!(
                        "{}: discarding malformed bid for request {}",
                        spec.code(),
                        bid.request_id
                    );
                }
                valid
            })
            .collect()
    }

    /// User syncs for `code`, restricted to the kinds the host allows.
    #[must_use]
    pub fn user_syncs(
        &self,
        code: &str,
        options: &SyncOptions,
        responses: &[ServerResponse],
        consent: &ConsentData,
    ) -> Vec<UserSync> {
        let Some(spec) = self.get(code) else {
            return Vec::new();
        };
        spec.get_user_syncs(options, responses, consent)
            .into_iter()
            .filter(|sync| options.allows(sync.kind))
            .collect()
    }
}

fn supports_any_media_type(spec: &dyn BidderSpec, bid: &BidRequest) -> bool {
    let kinds = bid.media_types.kinds();
    let supported = spec.supported_media_types();
    if kinds.is_empty() {
        // Legacy ad units without mediaTypes are banner.
        return supported.contains(&MediaType::Banner);
    }
    kinds.iter().any(|kind| supported.contains(kind))
}

/// Host-side sanity check applied to every bid an adapter returns.
#[must_use]
pub fn is_valid_bid_response(bid: &BidResponse, request: &ServerRequest) -> bool {
    if bid.request_id.is_empty() || bid.currency.is_empty() {
        return false;
    }
    if !request.bids.is_empty() && request.bid(&bid.request_id).is_none() {
        return false;
    }
    if !(bid.cpm.is_finite() && bid.cpm > 0.0) {
        return false;
    }
    if bid.media_type == MediaType::Banner && (bid.width == 0 || bid.height == 0) {
        return false;
    }
    bid.has_markup()
}
