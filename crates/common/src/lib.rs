//! Bidder adapters and real-time-data modules for a header-bidding auction
//! host.
//!
//! Adapters translate the host's bid requests into vendor HTTP request
//! descriptors and vendor responses back into host bids. They never perform
//! I/O themselves; the host sends the requests and hands the responses back.
//!
//! # Modules
//!
//! - [`adapters`]: Vendor adapters and the builder list that registers them
//! - [`bidder`]: Host data shapes, the [`bidder::BidderSpec`] trait and the registry
//! - [`consent`]: GDPR, US privacy and GPP consent signals
//! - [`constants`]: Application-wide constants
//! - [`error`]: Error types
//! - [`floors`]: Floor-price resolution
//! - [`logging`]: Logger initialization
//! - [`openrtb`]: `OpenRTB` 2.x request/response subset
//! - [`page_view`]: Memoized page-view id
//! - [`rtd`]: Real-time-data submodules, including the creative guard
//! - [`settings`]: Configuration management and validation
//! - [`sizes`]: Ad size parsing
//! - [`test_support`]: Testing utilities

pub mod adapters;
pub mod bidder;
pub mod consent;
pub mod constants;
pub mod error;
pub mod floors;
pub mod logging;
pub mod openrtb;
pub mod page_view;
pub mod rtd;
pub mod settings;
pub mod sizes;
