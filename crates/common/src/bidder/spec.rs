//! Trait definition for bidder adapters.

use crate::consent::ConsentData;

use super::types::{
    BidRequest, BidResponse, BidderRequest, MediaType, ServerRequest, ServerResponse, SyncOptions,
    UserSync,
};

/// Contract every bidder adapter implements.
///
/// The host validates each bid request, asks the adapter to describe the
/// outbound calls, performs them, and hands each response back to
/// [`BidderSpec::interpret_response`]. None of these methods may fail: bad
/// input yields `false` or an empty vector.
pub trait BidderSpec: Send + Sync {
    /// Bidder code publishers use in ad unit configs (e.g. "mocktioneer").
    fn code(&self) -> &'static str;

    /// Alternative codes that resolve to this adapter.
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// IAB Global Vendor List id, when the vendor is registered.
    fn gvlid(&self) -> Option<u16> {
        None
    }

    fn supported_media_types(&self) -> &'static [MediaType] {
        &[MediaType::Banner]
    }

    /// Check that the publisher supplied the params this vendor needs.
    fn is_bid_request_valid(&self, bid: &BidRequest) -> bool;

    /// Describe the HTTP calls needed for `bids`.
    ///
    /// Only bids that passed [`BidderSpec::is_bid_request_valid`] are passed in.
    fn build_requests(
        &self,
        bids: &[BidRequest],
        bidder_request: &BidderRequest,
    ) -> Vec<ServerRequest>;

    /// Translate a vendor response into host bids.
    fn interpret_response(
        &self,
        response: &ServerResponse,
        request: &ServerRequest,
    ) -> Vec<BidResponse>;

    /// Sync pixels/iframes to drop after the auction.
    fn get_user_syncs(
        &self,
        _options: &SyncOptions,
        _responses: &[ServerResponse],
        _consent: &ConsentData,
    ) -> Vec<UserSync> {
        Vec::new()
    }
}
