//! Chunked JSON adapter whose responses are keyed by bid id.

use std::collections::HashMap;
use std::sync::Arc;

use error_stack::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use validator::Validate;

use crate::bidder::{
    BidMeta, BidRequest, BidResponse, BidderRequest, BidderSpec, MediaType, RequestOptions,
    ServerRequest, ServerResponse, SyncKind, SyncOptions, UserSync,
};
use crate::consent::ConsentData;
use crate::constants::CONTENT_TYPE_JSON;
use crate::error::AdapterError;
use crate::floors::min_floor_across_sizes;
use crate::settings::{AdapterConfig, GlobalSettings, Settings};
use crate::sizes::Size;

const BIDDER_CODE: &str = "tessellate";

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TessellateConfig {
    #[serde(default = "super::default_enabled")]
    pub enabled: bool,
    #[validate(url)]
    pub endpoint: String,
    #[serde(default = "default_max_bids_per_request")]
    #[validate(range(min = 1, max = 100))]
    pub max_bids_per_request: usize,
    #[serde(default)]
    #[validate(url)]
    pub pixel_sync_url: Option<String>,
    #[serde(default)]
    #[validate(url)]
    pub iframe_sync_url: Option<String>,
}

impl AdapterConfig for TessellateConfig {
    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

fn default_max_bids_per_request() -> usize {
    10
}

#[derive(Debug, Deserialize)]
struct TessellateParams {
    #[serde(deserialize_with = "super::string_or_number")]
    tag_id: String,
    #[serde(deserialize_with = "super::string_or_number")]
    publisher_id: String,
    #[serde(default)]
    floor: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TessellateSite<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain: Option<&'a str>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    referrer: Option<&'a str>,
    publisher_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TessellateSlot {
    id: String,
    tagid: String,
    sizes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    floor: Option<f64>,
    media_type: MediaType,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TessellateBid {
    price: f64,
    w: u32,
    h: u32,
    adm: Option<String>,
    crid: Option<String>,
    cur: Option<String>,
    ttl: Option<u32>,
    dealid: Option<String>,
    adomain: Vec<String>,
}

pub struct TessellateAdapter {
    config: TessellateConfig,
    currency: String,
    default_ttl: u32,
}

impl TessellateAdapter {
    /// Currency and fallback TTL come from `[global]`.
    #[must_use]
    pub fn new(config: TessellateConfig, global: &GlobalSettings) -> Self {
        Self {
            config,
            currency: global.currency.clone(),
            default_ttl: global.default_ttl_secs,
        }
    }

    fn slot_media(bid: &BidRequest) -> (MediaType, Vec<Size>) {
        match (&bid.media_types.banner, &bid.media_types.video) {
            (None, Some(video)) => (
                MediaType::Video,
                video.player_size().into_iter().collect(),
            ),
            _ => (MediaType::Banner, bid.banner_sizes()),
        }
    }

    fn to_slot(bid: &BidRequest, params: &TessellateParams) -> TessellateSlot {
        let (media_type, sizes) = Self::slot_media(bid);
        let floor = min_floor_across_sizes(bid, media_type, &sizes, params.floor);
        TessellateSlot {
            id: bid.bid_id.clone(),
            tagid: params.tag_id.clone(),
            sizes: sizes.iter().map(ToString::to_string).collect(),
            floor: floor.map(|f| f.value),
            media_type,
        }
    }

    fn build_chunk(
        &self,
        chunk: &[(&BidRequest, TessellateParams)],
        bidder_request: &BidderRequest,
    ) -> Option<ServerRequest> {
        let (_, first_params) = chunk.first()?;
        let consent = &bidder_request.consent;

        let payload = serde_json::json!({
            "site": TessellateSite {
                page: bidder_request.page_url(),
                domain: bidder_request.referer_info.domain.as_deref(),
                referrer: bidder_request.referer_info.referer.as_deref(),
                publisher_id: first_params.publisher_id.clone(),
            },
            "consent": {
                "gdpr": consent.gdpr_applies_flag(),
                "gdprConsent": consent.gdpr_consent_string(),
                "usPrivacy": consent.usp_string(),
                "gpp": consent.gpp_string(),
                "gppSid": consent.gpp_sid_param(),
            },
            "cur": self.currency,
            "slots": chunk
                .iter()
                .map(|(bid, params)| Self::to_slot(bid, params))
                .collect::<Vec<_>>(),
        });

        let bids = chunk.iter().map(|(bid, _)| (*bid).clone()).collect();
        Some(
            ServerRequest::post_json(&self.config.endpoint, payload, bids).with_options(
                RequestOptions {
                    content_type: Some(CONTENT_TYPE_JSON.to_string()),
                    with_credentials: false,
                },
            ),
        )
    }

    fn to_bid_response(&self, bid: TessellateBid, request: &BidRequest) -> Option<BidResponse> {
        let (media_type, sizes) = Self::slot_media(request);
        let mut response = BidResponse {
            request_id: request.bid_id.clone(),
            bidder_code: BIDDER_CODE.to_string(),
            cpm: bid.price,
            currency: bid.cur.unwrap_or_else(|| self.currency.clone()),
            width: bid.w,
            height: bid.h,
            ttl: bid.ttl.unwrap_or(self.default_ttl),
            creative_id: bid.crid.unwrap_or_else(|| request.bid_id.clone()),
            net_revenue: true,
            media_type,
            deal_id: bid.dealid,
            meta: BidMeta {
                advertiser_domains: bid.adomain,
                media_type: Some(media_type),
                ..BidMeta::default()
            },
            ..BidResponse::default()
        };

        if response.width == 0 || response.height == 0 {
            if let Some(size) = sizes.first() {
                response.width = size.width;
                response.height = size.height;
            }
        }

        let adm = bid.adm.filter(|adm| !adm.trim().is_empty())?;
        match media_type {
            MediaType::Video if adm.trim_start().starts_with('<') => response.vast_xml = Some(adm),
            MediaType::Video => response.vast_url = Some(adm),
            _ => response.ad = Some(adm),
        }
        Some(response)
    }
}

impl BidderSpec for TessellateAdapter {
    fn code(&self) -> &'static str {
        BIDDER_CODE
    }

    fn supported_media_types(&self) -> &'static [MediaType] {
        &[MediaType::Banner, MediaType::Video]
    }

    fn is_bid_request_valid(&self, bid: &BidRequest) -> bool {
        super::parse_params::<TessellateParams>(BIDDER_CODE, bid).is_some()
    }

    fn build_requests(
        &self,
        bids: &[BidRequest],
        bidder_request: &BidderRequest,
    ) -> Vec<ServerRequest> {
        let parsed: Vec<(&BidRequest, TessellateParams)> = bids
            .iter()
            .filter_map(|bid| Some((bid, super::parse_params(BIDDER_CODE, bid)?)))
            .collect();

        parsed
            .chunks(self.config.max_bids_per_request.max(1))
            .filter_map(|chunk| self.build_chunk(chunk, bidder_request))
            .collect()
    }

    fn interpret_response(
        &self,
        response: &ServerResponse,
        request: &ServerRequest,
    ) -> Vec<BidResponse> {
        let Json::Object(entries) = &response.body else {
            if !response.body.is_null() {
                log::warn!("{BIDDER_CODE}: expected an object keyed by bid id");
            }
            return Vec::new();
        };

        let mut by_id: HashMap<&str, TessellateBid> = HashMap::new();
        for (bid_id, value) in entries {
            match super::decode_response::<TessellateBid>(BIDDER_CODE, value) {
                Ok(bid) => {
                    by_id.insert(bid_id.as_str(), bid);
                }
                Err(report) => log::warn!("bid '{bid_id}': {report:?}"),
            }
        }

        // Walk the request so results come back in slot order.
        request
            .bids
            .iter()
            .filter_map(|bid_request| {
                let bid = by_id.remove(bid_request.bid_id.as_str())?;
                if !(bid.price.is_finite() && bid.price > 0.0) {
                    return None;
                }
                self.to_bid_response(bid, bid_request)
            })
            .collect()
    }

    fn get_user_syncs(
        &self,
        options: &SyncOptions,
        _responses: &[ServerResponse],
        consent: &ConsentData,
    ) -> Vec<UserSync> {
        let candidates = [
            (SyncKind::Iframe, self.config.iframe_sync_url.as_deref()),
            (SyncKind::Image, self.config.pixel_sync_url.as_deref()),
        ];
        candidates
            .into_iter()
            .filter(|(kind, _)| options.allows(*kind))
            .filter_map(|(kind, base)| {
                Some(UserSync {
                    kind,
                    url: consent.sync_url(base?)?,
                })
            })
            .collect()
    }
}

/// Build the adapter when `[adapters.tessellate]` is present and enabled.
///
/// # Errors
///
/// Returns an error when the adapter config is invalid.
pub fn register(settings: &Settings) -> Result<Option<Arc<dyn BidderSpec>>, Report<AdapterError>> {
    let Some(config) = settings.adapter_config::<TessellateConfig>(BIDDER_CODE)? else {
        log::info!("{BIDDER_CODE} adapter not registered: missing or disabled");
        return Ok(None);
    };
    log::info!(
        "Registering {BIDDER_CODE} adapter at {} ({} bids per request)",
        config.endpoint,
        config.max_bids_per_request
    );
    Ok(Some(Arc::new(TessellateAdapter::new(config, &settings.global))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::floors::FloorData;
    use crate::test_support::tests::{
        banner_bid, bidder_request, create_test_settings, full_consent, video_bid,
    };
    use serde_json::json;

    fn adapter() -> TessellateAdapter {
        let settings = create_test_settings();
        let config = settings
            .adapter_config::<TessellateConfig>(BIDDER_CODE)
            .expect("should parse config")
            .expect("should be enabled");
        TessellateAdapter::new(config, &settings.global)
    }

    fn tess_bid(id: &str) -> BidRequest {
        let mut bid = banner_bid(id, &[[300, 250], [728, 90]]);
        bid.bidder = BIDDER_CODE.to_string();
        bid.params = json!({ "tag_id": format!("tag-{id}"), "publisher_id": 501 });
        bid
    }

    #[test]
    fn requires_tag_and_publisher() {
        let adapter = adapter();
        let mut bid = tess_bid("b1");
        assert!(adapter.is_bid_request_valid(&bid));
        bid.params = json!({ "tag_id": "t" });
        assert!(!adapter.is_bid_request_valid(&bid));
        bid.params = json!({ "publisher_id": "p" });
        assert!(!adapter.is_bid_request_valid(&bid));
    }

    #[test]
    fn max_bids_per_request_defaults_to_ten() {
        let config: TessellateConfig =
            serde_json::from_value(json!({ "endpoint": "https://t.example/hb" }))
                .expect("should parse config");
        assert_eq!(config.max_bids_per_request, 10);

        let invalid: TessellateConfig = serde_json::from_value(json!({
            "endpoint": "https://t.example/hb",
            "max_bids_per_request": 0
        }))
        .expect("should parse config");
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn chunks_bids_by_configured_limit() {
        let adapter = adapter();
        let bids: Vec<BidRequest> = ["a", "b", "c", "d", "e"].iter().map(|id| tess_bid(id)).collect();
        let requests = adapter.build_requests(&bids, &bidder_request(BIDDER_CODE));

        assert_eq!(requests.len(), 3);
        let counts: Vec<usize> = requests.iter().map(|r| r.bids.len()).collect();
        assert_eq!(counts, vec![2, 2, 1]);
        let slots = &requests[2].json_body().expect("should have body")["slots"];
        assert_eq!(slots[0]["id"], "e");
    }

    #[test]
    fn builds_slots_with_min_floor() {
        let adapter = adapter();
        let mut bidder_request = bidder_request(BIDDER_CODE);
        bidder_request.consent = full_consent();
        let mut bid = tess_bid("b1");
        bid.floors = Some(
            serde_json::from_value::<FloorData>(json!({
                "values": { "banner|300x250": 1.5, "banner|728x90": 0.9 }
            }))
            .expect("should parse floors"),
        );

        let requests = adapter.build_requests(&[bid], &bidder_request);
        let body = requests[0].json_body().expect("should have body");
        assert_eq!(
            body["slots"][0],
            json!({
                "id": "b1",
                "tagid": "tag-b1",
                "sizes": ["300x250", "728x90"],
                "floor": 0.9,
                "mediaType": "banner"
            })
        );
        assert_eq!(body["site"]["publisherId"], "501");
        assert_eq!(body["site"]["page"], "https://pub.example/article");
        assert_eq!(body["consent"]["gdprConsent"], "CO-TCF");
        assert_eq!(body["consent"]["usPrivacy"], "1YNN");
        assert_eq!(body["consent"]["gppSid"], "7,8");
        assert_eq!(body["cur"], "USD");
    }

    #[test]
    fn video_slot_uses_player_size() {
        let adapter = adapter();
        let mut bid = video_bid("v1", [640, 480]);
        bid.params = json!({ "tag_id": "vt", "publisher_id": "p", "floor": 2.0 });
        let requests = adapter.build_requests(&[bid], &bidder_request(BIDDER_CODE));
        let slot = &requests[0].json_body().expect("should have body")["slots"][0];
        assert_eq!(slot["mediaType"], "video");
        assert_eq!(slot["sizes"], json!(["640x480"]));
        assert_eq!(slot["floor"], 2.0);
    }

    #[test]
    fn interprets_keyed_response_and_ignores_unknown_ids() {
        let adapter = adapter();
        let mut video = video_bid("v1", [640, 480]);
        video.params = json!({ "tag_id": "vt", "publisher_id": "p" });
        let request = ServerRequest::post_json(
            "https://t.tessellate.example/hb",
            json!({}),
            vec![tess_bid("b1"), video, tess_bid("b2")],
        );
        let response = ServerResponse::new(json!({
            "b1": { "price": 1.25, "w": 728, "h": 90, "adm": "<div>t</div>", "crid": "cr-1", "dealid": "d-1", "adomain": ["t.example"] },
            "v1": { "price": 3.0, "adm": "<VAST version=\"3.0\"></VAST>", "cur": "GBP", "ttl": 900 },
            "b2": { "price": 0, "adm": "<div/>" },
            "ghost": { "price": 9.0, "adm": "<div/>" }
        }));

        let bids = adapter.interpret_response(&response, &request);
        assert_eq!(bids.len(), 2);

        assert_eq!(bids[0].request_id, "b1");
        assert_eq!((bids[0].width, bids[0].height), (728, 90));
        assert_eq!(bids[0].deal_id.as_deref(), Some("d-1"));
        assert_eq!(bids[0].ad.as_deref(), Some("<div>t</div>"));

        assert_eq!(bids[1].request_id, "v1");
        assert_eq!(bids[1].media_type, MediaType::Video);
        assert!(bids[1].vast_xml.is_some());
        assert_eq!(bids[1].currency, "GBP");
        assert_eq!(bids[1].ttl, 900);
        assert_eq!((bids[1].width, bids[1].height), (640, 480));
    }

    #[test]
    fn non_object_response_yields_nothing() {
        let adapter = adapter();
        let request = ServerRequest::post_json("https://t.example", json!({}), vec![tess_bid("b1")]);
        for body in [Json::Null, json!([1, 2]), json!("x")] {
            assert!(adapter
                .interpret_response(&ServerResponse::new(body), &request)
                .is_empty());
        }
    }

    #[test]
    fn syncs_follow_options() {
        let adapter = adapter();
        let both = SyncOptions {
            iframe_enabled: true,
            pixel_enabled: true,
        };
        let syncs = adapter.get_user_syncs(&both, &[], &full_consent());
        assert_eq!(syncs.len(), 2);
        assert_eq!(syncs[0].kind, SyncKind::Iframe);
        assert!(syncs[0].url.starts_with("https://sync.tessellate.example/if?gdpr=1"));
        assert_eq!(syncs[1].kind, SyncKind::Image);

        let pixel = SyncOptions {
            iframe_enabled: false,
            pixel_enabled: true,
        };
        let syncs = adapter.get_user_syncs(&pixel, &[], &ConsentData::default());
        assert_eq!(
            syncs,
            vec![UserSync {
                kind: SyncKind::Image,
                url: "https://sync.tessellate.example/px".to_string(),
            }]
        );
    }
}
