//! Query-string adapter: one `GET` per bid, single-object response.

use std::sync::Arc;

use error_stack::Report;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::form_urlencoded;
use validator::Validate;

use crate::bidder::types::VideoMediaType;
use crate::bidder::{
    BidMeta, BidRequest, BidResponse, BidderRequest, BidderSpec, MediaType, Renderer,
    RequestOptions, ServerRequest, ServerResponse, SyncKind, SyncOptions, UserSync,
    VideoContext,
};
use crate::consent::ConsentData;
use crate::error::AdapterError;
use crate::floors::{resolve_floor, FloorQuery};
use crate::settings::{AdapterConfig, GlobalSettings, Settings};
use crate::sizes::{format_sizes, Size};

const BIDDER_CODE: &str = "streamline";

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct StreamlineConfig {
    #[serde(default = "super::default_enabled")]
    pub enabled: bool,
    #[validate(url)]
    pub endpoint: String,
    #[serde(default)]
    #[validate(url)]
    pub sync_url: Option<String>,
    /// Player script loaded for outstream video bids.
    #[serde(default)]
    #[validate(url)]
    pub renderer_url: Option<String>,
}

impl AdapterConfig for StreamlineConfig {
    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[derive(Debug, Deserialize)]
struct StreamlineParams {
    #[serde(deserialize_with = "positive_zone_id")]
    zone_id: u64,
    #[serde(default)]
    floor: Option<f64>,
}

fn positive_zone_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = super::string_or_number(deserializer)?;
    match raw.parse::<u64>() {
        Ok(zone) if zone > 0 => Ok(zone),
        _ => Err(serde::de::Error::custom(format!(
            "zone_id must be a positive integer, got '{raw}'"
        ))),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StreamlineBid {
    bid_id: Option<String>,
    cpm: f64,
    width: u32,
    height: u32,
    ad: Option<String>,
    vast_url: Option<String>,
    media_type: Option<String>,
    currency: Option<String>,
    ttl: Option<u32>,
    creative_id: Option<String>,
    deal_id: Option<String>,
    adomain: Vec<String>,
}

pub struct StreamlineAdapter {
    config: StreamlineConfig,
    currency: String,
    default_ttl: u32,
}

impl StreamlineAdapter {
    /// Currency and fallback TTL come from `[global]`.
    #[must_use]
    pub fn new(config: StreamlineConfig, global: &GlobalSettings) -> Self {
        Self {
            config,
            currency: global.currency.clone(),
            default_ttl: global.default_ttl_secs,
        }
    }

    /// The video media type, when this bid should be requested as video.
    ///
    /// Mixed banner+video ad units are requested as banner.
    fn video_of(bid: &BidRequest) -> Option<&VideoMediaType> {
        match (&bid.media_types.banner, &bid.media_types.video) {
            (None, Some(video)) => Some(video),
            _ => None,
        }
    }

    /// Media type the bid is requested as, or `None` when streamline cannot
    /// serve any of the ad unit's media types.
    fn requested_media_type(bid: &BidRequest) -> Option<MediaType> {
        let media = &bid.media_types;
        if Self::video_of(bid).is_some() {
            Some(MediaType::Video)
        } else if media.banner.is_some() || media.kinds().is_empty() {
            Some(MediaType::Banner)
        } else {
            None
        }
    }

    fn build_query(
        &self,
        bid: &BidRequest,
        params: &StreamlineParams,
        bidder_request: &BidderRequest,
    ) -> String {
        let video = Self::video_of(bid);
        let (media_type, sizes) = match video {
            Some(video) => (
                MediaType::Video,
                video.player_size().into_iter().collect::<Vec<_>>(),
            ),
            None => (MediaType::Banner, bid.banner_sizes()),
        };

        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("zone", &params.zone_id.to_string());
        query.append_pair("bid_id", &bid.bid_id);
        if !sizes.is_empty() {
            query.append_pair("sizes", &format_sizes(&sizes, ","));
        }
        if let Some(page) = bidder_request.page_url() {
            query.append_pair("referrer", page);
        }

        let floor = resolve_floor(
            bid,
            &FloorQuery {
                media_type: Some(media_type),
                size: match sizes.as_slice() {
                    [only] => Some(*only),
                    _ => None,
                },
                currency: Some(&self.currency),
            },
            params.floor,
        );
        if let Some(floor) = floor {
            query.append_pair("floor", &floor.value.to_string());
            query.append_pair("cur", &floor.currency);
        }

        if let Some(video) = video {
            query.append_pair("video", "1");
            if let Some(player) = video.player_size() {
                query.append_pair("player_w", &player.width.to_string());
                query.append_pair("player_h", &player.height.to_string());
            }
            let context = match video.context {
                Some(VideoContext::Outstream) => "outstream",
                Some(VideoContext::Adpod) => "adpod",
                Some(VideoContext::Instream) | None => "instream",
            };
            query.append_pair("context", context);
            if !video.mimes.is_empty() {
                query.append_pair("mimes", &video.mimes.join(","));
            }
        }

        for (name, value) in bidder_request.consent.query_pairs() {
            query.append_pair(name, &value);
        }
        query.finish()
    }

    fn outstream_renderer(&self, bid: &BidRequest, size: Option<Size>) -> Option<Renderer> {
        let url = self.config.renderer_url.clone()?;
        Some(Renderer {
            id: bid.bid_id.clone(),
            url,
            config: json!({
                "adUnitCode": bid.ad_unit_code,
                "playerSize": size,
            }),
        })
    }
}

impl BidderSpec for StreamlineAdapter {
    fn code(&self) -> &'static str {
        BIDDER_CODE
    }

    fn supported_media_types(&self) -> &'static [MediaType] {
        &[MediaType::Banner, MediaType::Video]
    }

    fn is_bid_request_valid(&self, bid: &BidRequest) -> bool {
        super::parse_params::<StreamlineParams>(BIDDER_CODE, bid).is_some()
    }

    fn build_requests(
        &self,
        bids: &[BidRequest],
        bidder_request: &BidderRequest,
    ) -> Vec<ServerRequest> {
        bids.iter()
            .filter_map(|bid| {
                if Self::requested_media_type(bid).is_none() {
                    log::debug!("{BIDDER_CODE}: bid {} has no banner or video", bid.bid_id);
                    return None;
                }
                let params: StreamlineParams = super::parse_params(BIDDER_CODE, bid)?;
                let query = self.build_query(bid, &params, bidder_request);
                Some(
                    ServerRequest::get(&self.config.endpoint, query, vec![bid.clone()])
                        .with_options(RequestOptions {
                            content_type: None,
                            with_credentials: true,
                        }),
                )
            })
            .collect()
    }

    fn interpret_response(
        &self,
        response: &ServerResponse,
        request: &ServerRequest,
    ) -> Vec<BidResponse> {
        if !response.body.is_object() {
            if !response.body.is_null() {
                log::warn!("{BIDDER_CODE}: expected a JSON object response");
            }
            return Vec::new();
        }
        let bid: StreamlineBid = match super::decode_response(BIDDER_CODE, &response.body) {
            Ok(bid) => bid,
            Err(report) => {
                log::warn!("{report:?}");
                return Vec::new();
            }
        };
        let Some(bid_request) = request.bids.first() else {
            return Vec::new();
        };
        if let Some(id) = &bid.bid_id {
            if *id != bid_request.bid_id {
                log::warn!("{BIDDER_CODE}: response for bid '{id}' does not match request");
                return Vec::new();
            }
        }
        if !(bid.cpm.is_finite() && bid.cpm > 0.0) {
            return Vec::new();
        }

        let media_type = bid
            .media_type
            .as_deref()
            .and_then(MediaType::from_name)
            .or_else(|| Self::requested_media_type(bid_request))
            .unwrap_or(MediaType::Banner);

        let mut result = BidResponse {
            request_id: bid_request.bid_id.clone(),
            bidder_code: BIDDER_CODE.to_string(),
            cpm: bid.cpm,
            currency: bid
                .currency
                .clone()
                .unwrap_or_else(|| self.currency.clone()),
            width: bid.width,
            height: bid.height,
            ttl: bid.ttl.unwrap_or(self.default_ttl),
            creative_id: bid
                .creative_id
                .clone()
                .unwrap_or_else(|| bid_request.bid_id.clone()),
            net_revenue: true,
            media_type,
            deal_id: bid.deal_id.clone(),
            meta: BidMeta {
                advertiser_domains: bid.adomain.clone(),
                media_type: Some(media_type),
                ..BidMeta::default()
            },
            ..BidResponse::default()
        };

        match media_type {
            MediaType::Video => {
                let Some(vast_url) = bid.vast_url.clone().filter(|u| !u.is_empty()) else {
                    log::debug!("{BIDDER_CODE}: video bid without vastUrl, dropping");
                    return Vec::new();
                };
                result.vast_url = Some(vast_url);

                let video = bid_request.media_types.video.as_ref();
                let player = video.and_then(VideoMediaType::player_size);
                if result.width == 0 || result.height == 0 {
                    if let Some(player) = player {
                        result.width = player.width;
                        result.height = player.height;
                    }
                }
                if video.is_some_and(VideoMediaType::is_outstream) {
                    let size = Some(Size::new(result.width, result.height));
                    let Some(renderer) = self.outstream_renderer(bid_request, size) else {
                        log::warn!(
                            "{BIDDER_CODE}: outstream bid {} but no renderer_url configured",
                            bid_request.bid_id
                        );
                        return Vec::new();
                    };
                    result.renderer = Some(renderer);
                }
            }
            MediaType::Banner => {
                result.ad = bid.ad.clone();
                if result.width == 0 || result.height == 0 {
                    if let Some(size) = bid_request.banner_sizes().first() {
                        result.width = size.width;
                        result.height = size.height;
                    }
                }
            }
            MediaType::Native => {
                log::debug!("{BIDDER_CODE}: native bids are not supported");
                return Vec::new();
            }
        }

        vec![result]
    }

    fn get_user_syncs(
        &self,
        options: &SyncOptions,
        _responses: &[ServerResponse],
        consent: &ConsentData,
    ) -> Vec<UserSync> {
        if !options.pixel_enabled {
            return Vec::new();
        }
        self.config
            .sync_url
            .as_deref()
            .and_then(|base| consent.sync_url(base))
            .map(|url| UserSync {
                kind: SyncKind::Image,
                url,
            })
            .into_iter()
            .collect()
    }
}

/// Build the adapter when `[adapters.streamline]` is present and enabled.
///
/// # Errors
///
/// Returns an error when the adapter config is invalid.
pub fn register(settings: &Settings) -> Result<Option<Arc<dyn BidderSpec>>, Report<AdapterError>> {
    let Some(config) = settings.adapter_config::<StreamlineConfig>(BIDDER_CODE)? else {
        log::info!("{BIDDER_CODE} adapter not registered: missing or disabled");
        return Ok(None);
    };
    log::info!("Registering {BIDDER_CODE} adapter at {}", config.endpoint);
    Ok(Some(Arc::new(StreamlineAdapter::new(config, &settings.global))))
}
