//! `OpenRTB` 2.x adapter: one batched `POST` per auction.

use std::sync::Arc;

use error_stack::Report;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use validator::Validate;

use crate::bidder::types::{NativeMediaType, VideoMediaType};
use crate::bidder::{
    BidMeta, BidRequest, BidResponse, BidderRequest, BidderSpec, MediaType, NativeImage,
    NativeResponse, RequestOptions, ServerRequest, ServerResponse, SyncOptions, UserSync,
};
use crate::consent::ConsentData;
use crate::constants::CONTENT_TYPE_TEXT_PLAIN;
use crate::error::AdapterError;
use crate::floors::{resolve_floor, FloorQuery};
use crate::openrtb::{
    Banner, Bid, Device, Format, Imp, Native, OpenRtbRequest, OpenRtbResponse, PrebidExt,
    RequestExt, Site, Source, SourceExt, User, UserExt, Video,
};
use crate::settings::{AdapterConfig, GlobalSettings, Settings};

const BIDDER_CODE: &str = "mocktioneer";

// Asset ids used when translating legacy native assets into an OpenRTB
// native request, and when reading them back from the response.
const ASSET_TITLE: u32 = 1;
const ASSET_IMAGE: u32 = 2;
const ASSET_ICON: u32 = 3;
const ASSET_BODY: u32 = 4;
const ASSET_SPONSORED: u32 = 5;

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct MocktioneerConfig {
    #[serde(default = "super::default_enabled")]
    pub enabled: bool,
    #[validate(url)]
    pub endpoint: String,
    /// Ask the exchange for debug output (`ext.prebid.debug`).
    #[serde(default)]
    pub debug: bool,
}

impl AdapterConfig for MocktioneerConfig {
    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[derive(Debug, Deserialize)]
struct MocktioneerParams {
    #[serde(deserialize_with = "super::string_or_number")]
    placement_id: String,
    #[serde(default)]
    bidfloor: Option<f64>,
}

pub struct MocktioneerAdapter {
    config: MocktioneerConfig,
    currency: String,
    default_ttl: u32,
}

impl MocktioneerAdapter {
    /// Currency and fallback TTL come from `[global]`.
    #[must_use]
    pub fn new(config: MocktioneerConfig, global: &GlobalSettings) -> Self {
        Self {
            config,
            currency: global.currency.clone(),
            default_ttl: global.default_ttl_secs,
        }
    }

    fn to_openrtb(&self, bids: &[BidRequest], bidder_request: &BidderRequest) -> OpenRtbRequest {
        let imps: Vec<Imp> = bids.iter().filter_map(|bid| self.to_imp(bid)).collect();

        let consent = &bidder_request.consent;
        let eids = bids
            .iter()
            .find(|bid| !bid.user_id_as_eids.is_empty())
            .map(|bid| bid.user_id_as_eids.clone())
            .unwrap_or_default();
        let user_ext = UserExt {
            consent: consent.gdpr_consent_string().map(str::to_string),
            eids,
        };
        let user = (user_ext.consent.is_some() || !user_ext.eids.is_empty()).then(|| User {
            ext: Some(user_ext),
        });

        let schain = bids.iter().find_map(|bid| bid.schain.clone());
        let tid = bids.iter().find_map(|bid| bid.transaction_id.clone());

        OpenRtbRequest {
            id: if bidder_request.bidder_request_id.is_empty() {
                bidder_request.auction_id.clone()
            } else {
                bidder_request.bidder_request_id.clone()
            },
            imp: imps,
            site: Some(Site {
                domain: bidder_request.referer_info.domain.clone(),
                page: bidder_request.page_url().map(str::to_string),
                referrer: bidder_request.referer_info.referer.clone(),
                publisher: None,
            }),
            device: bidder_request.user_agent().map(|ua| Device {
                ua: Some(ua.to_string()),
                ..Device::default()
            }),
            user,
            regs: consent.to_openrtb_regs(),
            source: Some(Source {
                tid,
                ext: schain.map(|schain| SourceExt {
                    schain: Some(schain),
                }),
            }),
            tmax: bidder_request.timeout,
            cur: vec![self.currency.clone()],
            ext: self.config.debug.then(|| RequestExt {
                prebid: Some(PrebidExt { debug: Some(true) }),
            }),
            ..OpenRtbRequest::default()
        }
    }

    fn to_imp(&self, bid: &BidRequest) -> Option<Imp> {
        let params: MocktioneerParams = super::parse_params(BIDDER_CODE, bid)?;
        let media = &bid.media_types;

        let banner_sizes = bid.banner_sizes();
        let banner = (media.banner.is_some() || media.kinds().is_empty())
            .then(|| Banner {
                format: banner_sizes
                    .iter()
                    .map(|size| Format {
                        w: size.width,
                        h: size.height,
                    })
                    .collect(),
                pos: media.banner.as_ref().and_then(|b| b.pos),
            })
            .filter(|banner| !banner.format.is_empty());

        let video = media.video.as_ref().map(|video| {
            let player = video.player_size();
            Video {
                mimes: video.mimes.clone(),
                w: player.map(|s| s.width),
                h: player.map(|s| s.height),
                protocols: video.protocols.clone(),
                minduration: video.minduration,
                maxduration: video.maxduration,
                placement: video.placement,
                plcmt: video.plcmt,
                api: video.api.clone(),
                playbackmethod: video.playbackmethod.clone(),
                skip: video.skip,
            }
        });

        let native = media.native.as_ref().and_then(native_request).map(|request| Native {
            request,
            ver: Some("1.2".to_string()),
        });

        if banner.is_none() && video.is_none() && native.is_none() {
            log::debug!("{BIDDER_CODE}: bid {} has nothing to bid on", bid.bid_id);
            return None;
        }

        // A single size and media type allow an exact floor lookup; anything
        // else is resolved against wildcard rules.
        let floor_query = FloorQuery {
            media_type: media.single(),
            size: match (media.single(), banner_sizes.as_slice()) {
                (Some(MediaType::Banner), [only]) => Some(*only),
                (Some(MediaType::Video), _) => {
                    media.video.as_ref().and_then(VideoMediaType::player_size)
                }
                _ => None,
            },
            currency: Some(&self.currency),
        };
        let floor = resolve_floor(bid, &floor_query, params.bidfloor);

        let mut ext = json!({ "bidder": { "placement_id": params.placement_id } });
        if let Some(gpid) = bid.gpid() {
            ext["gpid"] = Json::String(gpid.to_string());
        }

        Some(Imp {
            id: bid.bid_id.clone(),
            tagid: Some(params.placement_id),
            banner,
            video,
            native,
            bidfloor: floor.as_ref().map(|f| f.value),
            bidfloorcur: floor.map(|f| f.currency),
            secure: Some(1),
            ext: Some(ext),
        })
    }

    fn to_bid_response(
        &self,
        bid: &Bid,
        seat: Option<&str>,
        currency: &str,
        request: &BidRequest,
    ) -> Option<BidResponse> {
        let media_type = bid_media_type(bid, request);

        let mut response = BidResponse {
            request_id: bid.impid.clone(),
            bidder_code: BIDDER_CODE.to_string(),
            cpm: bid.price,
            currency: currency.to_string(),
            width: bid.w.unwrap_or_default(),
            height: bid.h.unwrap_or_default(),
            ttl: bid.exp.unwrap_or(self.default_ttl),
            creative_id: bid.crid.clone().unwrap_or_else(|| bid.id.clone()),
            net_revenue: true,
            media_type,
            deal_id: bid.dealid.clone(),
            meta: BidMeta {
                advertiser_domains: bid.adomain.clone(),
                network_id: seat.map(str::to_string),
                brand_id: None,
                media_type: Some(media_type),
            },
            ..BidResponse::default()
        };

        match media_type {
            MediaType::Banner => {
                response.ad = bid.adm.clone();
                if response.width == 0 || response.height == 0 {
                    if let Some(size) = request.banner_sizes().first() {
                        response.width = size.width;
                        response.height = size.height;
                    }
                }
            }
            MediaType::Video => {
                match bid.adm.as_deref().map(str::trim) {
                    Some(adm) if adm.starts_with('<') => response.vast_xml = Some(adm.to_string()),
                    _ => response.vast_url = bid.nurl.clone(),
                }
                if !response.has_markup() {
                    log::debug!("{BIDDER_CODE}: video bid {} has neither adm nor nurl", bid.id);
                    return None;
                }
                if let Some(size) = request
                    .media_types
                    .video
                    .as_ref()
                    .and_then(VideoMediaType::player_size)
                {
                    response.width = size.width;
                    response.height = size.height;
                }
            }
            MediaType::Native => {
                response.native = bid.adm.as_deref().and_then(parse_native_adm);
                if response.native.is_none() {
                    log::debug!("{BIDDER_CODE}: native bid {} has unusable adm", bid.id);
                    return None;
                }
            }
        }

        Some(response)
    }
}

fn bid_media_type(bid: &Bid, request: &BidRequest) -> MediaType {
    let from_mtype = match bid.mtype {
        Some(1) => Some(MediaType::Banner),
        Some(2) => Some(MediaType::Video),
        Some(4) => Some(MediaType::Native),
        _ => None,
    };
    from_mtype
        .or_else(|| {
            bid.ext
                .as_ref()?
                .pointer("/prebid/type")
                .and_then(Json::as_str)
                .and_then(MediaType::from_name)
        })
        .or_else(|| request.media_types.single())
        .unwrap_or_default()
}

/// `OpenRTB` native request string for the ad unit.
///
/// A publisher-supplied `ortb` request is passed through; legacy assets are
/// mapped onto fixed asset ids.
fn native_request(native: &NativeMediaType) -> Option<String> {
    if let Some(ortb) = &native.ortb {
        return serde_json::to_string(ortb).ok();
    }

    let mut assets = Vec::new();
    if let Some(title) = native.asset_params("title") {
        assets.push(json!({
            "id": ASSET_TITLE,
            "required": u8::from(title.required),
            "title": { "len": title.len.unwrap_or(90) }
        }));
    }
    for (name, id, img_type) in [("image", ASSET_IMAGE, 3), ("icon", ASSET_ICON, 1)] {
        if let Some(image) = native.asset_params(name) {
            let mut img = json!({ "type": img_type });
            if let Some(size) = image.sizes.first() {
                img["w"] = json!(size.width);
                img["h"] = json!(size.height);
            }
            assets.push(json!({ "id": id, "required": u8::from(image.required), "img": img }));
        }
    }
    for (name, id, data_type) in [("body", ASSET_BODY, 2), ("sponsoredBy", ASSET_SPONSORED, 1)] {
        if let Some(data) = native.asset_params(name) {
            assets.push(json!({
                "id": id,
                "required": u8::from(data.required),
                "data": { "type": data_type }
            }));
        }
    }

    if assets.is_empty() {
        return None;
    }
    serde_json::to_string(&json!({ "ver": "1.2", "assets": assets })).ok()
}

/// Parse an `OpenRTB` native response (optionally wrapped in `{"native": …}`).
fn parse_native_adm(adm: &str) -> Option<NativeResponse> {
    let parsed: Json = serde_json::from_str(adm).ok()?;
    let native = parsed.get("native").unwrap_or(&parsed);

    let mut response = NativeResponse {
        click_url: native.pointer("/link/url")?.as_str()?.to_string(),
        ..NativeResponse::default()
    };

    for asset in native.get("assets")?.as_array()? {
        let id = asset.get("id").and_then(Json::as_u64).unwrap_or_default();
        let image = || {
            let img = asset.get("img")?;
            Some(NativeImage {
                url: img.get("url")?.as_str()?.to_string(),
                width: json_u32(img.get("w")),
                height: json_u32(img.get("h")),
            })
        };
        let data = || {
            asset
                .pointer("/data/value")
                .and_then(Json::as_str)
                .map(str::to_string)
        };
        match u32::try_from(id).unwrap_or_default() {
            ASSET_TITLE => {
                if let Some(text) = asset.pointer("/title/text").and_then(Json::as_str) {
                    response.title = text.to_string();
                }
            }
            ASSET_IMAGE => response.image = image(),
            ASSET_ICON => response.icon = image(),
            ASSET_BODY => response.body = data(),
            ASSET_SPONSORED => response.sponsored_by = data(),
            _ => {}
        }
    }

    response.impression_trackers = native
        .get("imptrackers")
        .and_then(Json::as_array)
        .map(|trackers| {
            trackers
                .iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if let Some(js) = native.get("jstracker").and_then(Json::as_str) {
        response.javascript_trackers.push(js.to_string());
    }

    (!response.title.is_empty() && !response.click_url.is_empty()).then_some(response)
}

fn json_u32(value: Option<&Json>) -> u32 {
    value
        .and_then(Json::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or_default()
}

impl BidderSpec for MocktioneerAdapter {
    fn code(&self) -> &'static str {
        BIDDER_CODE
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["mockt"]
    }

    fn supported_media_types(&self) -> &'static [MediaType] {
        &[MediaType::Banner, MediaType::Video, MediaType::Native]
    }

    fn is_bid_request_valid(&self, bid: &BidRequest) -> bool {
        let Some(params) = super::parse_params::<MocktioneerParams>(BIDDER_CODE, bid) else {
            return false;
        };
        params.bidfloor.is_none_or(|floor| floor.is_finite() && floor >= 0.0)
    }

    fn build_requests(
        &self,
        bids: &[BidRequest],
        bidder_request: &BidderRequest,
    ) -> Vec<ServerRequest> {
        let openrtb = self.to_openrtb(bids, bidder_request);
        if openrtb.imp.is_empty() {
            return Vec::new();
        }

        let body = match super::encode_request(BIDDER_CODE, &openrtb) {
            Ok(body) => body,
            Err(report) => {
                log::warn!("{report:?}");
                return Vec::new();
            }
        };

        // Only the bids that made it into an imp are correlated.
        let carried: Vec<BidRequest> = bids
            .iter()
            .filter(|bid| openrtb.imp.iter().any(|imp| imp.id == bid.bid_id))
            .cloned()
            .collect();

        vec![ServerRequest::post_json(&self.config.endpoint, body, carried).with_options(
            RequestOptions {
                content_type: Some(CONTENT_TYPE_TEXT_PLAIN.to_string()),
                with_credentials: true,
            },
        )]
    }

    fn interpret_response(
        &self,
        response: &ServerResponse,
        request: &ServerRequest,
    ) -> Vec<BidResponse> {
        if response.body.is_null() {
            return Vec::new();
        }
        let parsed: OpenRtbResponse = match super::decode_response(BIDDER_CODE, &response.body) {
            Ok(parsed) => parsed,
            Err(report) => {
                log::warn!("{report:?}");
                return Vec::new();
            }
        };

        let currency = parsed.cur.clone().unwrap_or_else(|| self.currency.clone());

        let mut bids = Vec::new();
        for seatbid in &parsed.seatbid {
            for bid in &seatbid.bid {
                let Some(bid_request) = request.bid(&bid.impid) else {
                    log::debug!("{BIDDER_CODE}: bid for unknown imp '{}'", bid.impid);
                    continue;
                };
                if let Some(converted) =
                    self.to_bid_response(bid, seatbid.seat.as_deref(), &currency, bid_request)
                {
                    bids.push(converted);
                }
            }
        }

        log::debug!("{BIDDER_CODE}: {} bids from response", bids.len());
        bids
    }

    fn get_user_syncs(
        &self,
        options: &SyncOptions,
        responses: &[ServerResponse],
        consent: &ConsentData,
    ) -> Vec<UserSync> {
        let mut syncs: Vec<UserSync> = Vec::new();
        for response in responses {
            let Some(entries) = response
                .body
                .pointer("/ext/usersyncs")
                .and_then(Json::as_array)
            else {
                continue;
            };
            for entry in entries {
                let Ok(sync) = serde_json::from_value::<UserSync>(entry.clone()) else {
                    continue;
                };
                if !options.allows(sync.kind) {
                    continue;
                }
                let Some(url) = consent.sync_url(&sync.url) else {
                    continue;
                };
                if !syncs.iter().any(|s| s.url == url) {
                    syncs.push(UserSync {
                        kind: sync.kind,
                        url,
                    });
                }
            }
        }
        syncs
    }
}

/// Build the adapter when `[adapters.mocktioneer]` is present and enabled.
///
/// # Errors
///
/// Returns an error when the adapter config is invalid.
pub fn register(settings: &Settings) -> Result<Option<Arc<dyn BidderSpec>>, Report<AdapterError>> {
    let Some(config) = settings.adapter_config::<MocktioneerConfig>(BIDDER_CODE)? else {
        log::info!("{BIDDER_CODE} adapter not registered: missing or disabled");
        return Ok(None);
    };
    log::info!("Registering {BIDDER_CODE} adapter at {}", config.endpoint);
    Ok(Some(Arc::new(MocktioneerAdapter::new(config, &settings.global))))
}
