//! Error types shared by adapters, RTD modules and configuration loading.
//!
//! Plugin-facing functions (`is_bid_request_valid`, `interpret_response`, …)
//! never surface these errors to the host; they log and fall back to an
//! empty result. Errors are reserved for construction paths such as settings
//! parsing and registry setup.

use derive_more::{Display, Error};

/// Top-level error for the adapter collection.
#[derive(Debug, Display, Error)]
pub enum AdapterError {
    /// Settings could not be loaded, parsed or validated.
    #[display("Configuration error: {message}")]
    Configuration { message: String },

    /// A bidder or RTD module could not be registered.
    #[display("Registry error: {message}")]
    Registry { message: String },

    /// Bidder params failed to deserialize or validate.
    #[display("Invalid bid params for {bidder}: {message}")]
    InvalidParams { bidder: String, message: String },

    /// An outbound request descriptor could not be built.
    #[display("Request build error for {bidder}: {message}")]
    Request { bidder: String, message: String },

    /// A vendor response could not be interpreted.
    #[display("Response error for {bidder}: {message}")]
    Response { bidder: String, message: String },

    /// Creative markup could not be rewritten.
    #[display("Creative rewrite error: {message}")]
    Creative { message: String },
}
