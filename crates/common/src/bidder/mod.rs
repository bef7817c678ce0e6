//! The host plugin contract: data shapes, the [`BidderSpec`] trait and the
//! registry adapters are registered into.
//!
//! Individual adapters live in [`crate::adapters`].

pub mod registry;
pub mod spec;
pub mod types;

pub use registry::{is_valid_bid_response, BidderRegistry};
pub use spec::BidderSpec;
pub use types::{
    BidMeta, BidRequest, BidResponse, BidderRequest, MediaType, MediaTypes, NativeImage,
    NativeResponse, RefererInfo, Renderer, RequestData, RequestOptions, ServerRequest,
    ServerResponse, SyncKind, SyncOptions, UserSync, VideoContext,
};
