//! Native-first adapter speaking a custom JSON protocol.
//!
//! All bids of an auction travel in one `POST` alongside a page-view id that
//! stays stable for the lifetime of the adapter, so the vendor can frequency
//! cap across auctions on the same page.

use std::sync::Arc;

use error_stack::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use validator::Validate;

use crate::bidder::types::NativeMediaType;
use crate::bidder::{
    BidMeta, BidRequest, BidResponse, BidderRequest, BidderSpec, MediaType, NativeImage,
    NativeResponse, RequestOptions, ServerRequest, ServerResponse, SyncKind, SyncOptions,
    UserSync,
};
use crate::consent::ConsentData;
use crate::constants::CONTENT_TYPE_TEXT_PLAIN;
use crate::error::AdapterError;
use crate::floors::{min_floor_across_sizes, resolve_floor, Floor, FloorQuery};
use crate::page_view::PageViewId;
use crate::settings::{AdapterConfig, GlobalSettings, Settings};
use crate::sizes::Size;

const BIDDER_CODE: &str = "glasspane";

/// Legacy native asset names the vendor understands.
const NATIVE_ASSETS: &[&str] = &["title", "image", "icon", "body", "sponsoredBy"];

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct GlasspaneConfig {
    #[serde(default = "super::default_enabled")]
    pub enabled: bool,
    #[validate(url)]
    pub endpoint: String,
    #[serde(default)]
    #[validate(url)]
    pub sync_url: Option<String>,
}

impl AdapterConfig for GlasspaneConfig {
    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[derive(Debug, Deserialize)]
struct GlasspaneParams {
    #[serde(deserialize_with = "super::string_or_number")]
    unit_id: String,
    #[serde(default)]
    floor: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GlasspaneRequest<'a> {
    page_view_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    referrer: Option<&'a str>,
    consent: GlasspaneConsent<'a>,
    units: Vec<GlasspaneUnit>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GlasspaneConsent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    gdpr_applies: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    consent_string: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usp_string: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gpp_string: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    gpp_sid: Vec<u16>,
}

impl<'a> GlasspaneConsent<'a> {
    fn from_consent(consent: &'a ConsentData) -> Self {
        Self {
            gdpr_applies: consent.gdpr_consent.as_ref().and_then(|g| g.gdpr_applies),
            consent_string: consent.gdpr_consent_string(),
            usp_string: consent.usp_string(),
            gpp_string: consent.gpp_string(),
            gpp_sid: consent
                .gpp_consent
                .as_ref()
                .map(|gpp| gpp.applicable_sections.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GlasspaneUnit {
    bid_id: String,
    unit_id: String,
    ad_unit_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    floor: Option<Floor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    native: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    banner: Option<GlasspaneBanner>,
}

#[derive(Debug, Serialize)]
struct GlasspaneBanner {
    sizes: Vec<Size>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GlasspaneResponse {
    units: Vec<Json>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GlasspaneBid {
    bid_id: String,
    cpm: f64,
    currency: Option<String>,
    ttl: Option<u32>,
    creative_id: Option<String>,
    adomain: Vec<String>,
    banner: Option<GlasspaneBannerBid>,
    native: Option<GlasspaneNativeBid>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GlasspaneBannerBid {
    html: String,
    w: u32,
    h: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GlasspaneNativeBid {
    title: Option<String>,
    image: Option<NativeImage>,
    icon: Option<NativeImage>,
    body: Option<String>,
    sponsored_by: Option<String>,
    click_url: Option<String>,
    impression_trackers: Vec<String>,
    javascript_trackers: Vec<String>,
}

impl GlasspaneNativeBid {
    fn into_native(self) -> Option<NativeResponse> {
        let title = self.title.filter(|t| !t.trim().is_empty())?;
        let click_url = self.click_url.filter(|u| !u.trim().is_empty())?;
        Some(NativeResponse {
            title,
            body: self.body,
            sponsored_by: self.sponsored_by,
            click_url,
            image: self.image,
            icon: self.icon,
            impression_trackers: self.impression_trackers,
            javascript_trackers: self.javascript_trackers,
        })
    }
}

pub struct GlasspaneAdapter {
    config: GlasspaneConfig,
    currency: String,
    default_ttl: u32,
    page_view: PageViewId,
}

impl GlasspaneAdapter {
    #[must_use]
    pub fn new(config: GlasspaneConfig, global: &GlobalSettings) -> Self {
        Self::with_page_view(config, global, PageViewId::new())
    }

    /// Use a page-view id supplied by the host instead of generating one.
    #[must_use]
    pub fn with_page_view_id(
        config: GlasspaneConfig,
        global: &GlobalSettings,
        page_view_id: impl Into<String>,
    ) -> Self {
        Self::with_page_view(config, global, PageViewId::with_value(page_view_id))
    }

    fn with_page_view(
        config: GlasspaneConfig,
        global: &GlobalSettings,
        page_view: PageViewId,
    ) -> Self {
        Self {
            config,
            currency: global.currency.clone(),
            default_ttl: global.default_ttl_secs,
            page_view,
        }
    }

    #[must_use]
    pub fn page_view_id(&self) -> &str {
        self.page_view.get()
    }

    fn to_unit(&self, bid: &BidRequest) -> Option<GlasspaneUnit> {
        let params: GlasspaneParams = super::parse_params(BIDDER_CODE, bid)?;

        let native = bid.media_types.native.as_ref().map(native_assets);
        let banner_sizes = bid.banner_sizes();
        let banner = (!banner_sizes.is_empty()).then(|| GlasspaneBanner {
            sizes: banner_sizes.clone(),
        });

        let floor = if native.is_some() {
            resolve_floor(
                bid,
                &FloorQuery {
                    media_type: Some(MediaType::Native),
                    size: None,
                    currency: Some(&self.currency),
                },
                params.floor,
            )
        } else {
            min_floor_across_sizes(bid, MediaType::Banner, &banner_sizes, params.floor)
        };

        Some(GlasspaneUnit {
            bid_id: bid.bid_id.clone(),
            unit_id: params.unit_id,
            ad_unit_code: bid.ad_unit_code.clone(),
            floor,
            native,
            banner,
        })
    }

    fn to_bid_response(&self, bid: GlasspaneBid, request: &BidRequest) -> Option<BidResponse> {
        let mut response = BidResponse {
            request_id: request.bid_id.clone(),
            bidder_code: BIDDER_CODE.to_string(),
            cpm: bid.cpm,
            currency: bid.currency.unwrap_or_else(|| self.currency.clone()),
            ttl: bid.ttl.unwrap_or(self.default_ttl),
            creative_id: bid.creative_id.unwrap_or_else(|| bid.bid_id.clone()),
            net_revenue: true,
            meta: BidMeta {
                advertiser_domains: bid.adomain,
                ..BidMeta::default()
            },
            ..BidResponse::default()
        };

        if let Some(native) = bid.native {
            let Some(native) = native.into_native() else {
                log::debug!(
                    "{BIDDER_CODE}: native bid {} lacks title or clickUrl, dropping",
                    bid.bid_id
                );
                return None;
            };
            response.media_type = MediaType::Native;
            response.native = Some(native);
        } else if let Some(banner) = bid.banner {
            response.media_type = MediaType::Banner;
            response.ad = Some(banner.html);
            response.width = banner.w;
            response.height = banner.h;
        } else {
            log::debug!("{BIDDER_CODE}: bid {} carries no creative", bid.bid_id);
            return None;
        }

        response.meta.media_type = Some(response.media_type);
        Some(response)
    }
}

/// Asset requests the vendor understands, with required flags and sizes.
fn native_assets(native: &NativeMediaType) -> serde_json::Map<String, serde_json::Value> {
    NATIVE_ASSETS
        .iter()
        .filter_map(|name| {
            let params = native.asset_params(name)?;
            serde_json::to_value(params)
                .ok()
                .map(|value| ((*name).to_string(), value))
        })
        .collect()
}

impl BidderSpec for GlasspaneAdapter {
    fn code(&self) -> &'static str {
        BIDDER_CODE
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["glass"]
    }

    fn supported_media_types(&self) -> &'static [MediaType] {
        &[MediaType::Native, MediaType::Banner]
    }

    fn is_bid_request_valid(&self, bid: &BidRequest) -> bool {
        super::parse_params::<GlasspaneParams>(BIDDER_CODE, bid).is_some()
    }

    fn build_requests(
        &self,
        bids: &[BidRequest],
        bidder_request: &BidderRequest,
    ) -> Vec<ServerRequest> {
        let units: Vec<GlasspaneUnit> = bids.iter().filter_map(|bid| self.to_unit(bid)).collect();
        if units.is_empty() {
            return Vec::new();
        }

        let payload = GlasspaneRequest {
            page_view_id: self.page_view_id(),
            page: bidder_request.page_url(),
            referrer: bidder_request.referer_info.referer.as_deref(),
            consent: GlasspaneConsent::from_consent(&bidder_request.consent),
            units,
        };
        let body = match super::encode_request(BIDDER_CODE, &payload) {
            Ok(body) => body,
            Err(report) => {
                log::warn!("{report:?}");
                return Vec::new();
            }
        };

        let carried: Vec<BidRequest> = bids
            .iter()
            .filter(|bid| payload.units.iter().any(|u| u.bid_id == bid.bid_id))
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
        let parsed: GlasspaneResponse = match super::decode_response(BIDDER_CODE, &response.body) {
            Ok(parsed) => parsed,
            Err(report) => {
                log::warn!("{report:?}");
                return Vec::new();
            }
        };

        // Decode units one at a time; a malformed entry is skipped alone.
        parsed
            .units
            .iter()
            .filter_map(|unit| {
                super::decode_response::<GlasspaneBid>(BIDDER_CODE, unit)
                    .inspect_err(|report| log::warn!("{report:?}"))
                    .ok()
            })
            .filter(|bid| bid.cpm.is_finite() && bid.cpm > 0.0)
            .filter_map(|bid| {
                let Some(bid_request) = request.bid(&bid.bid_id) else {
                    log::debug!("{BIDDER_CODE}: bid for unknown id '{}'", bid.bid_id);
                    return None;
                };
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
        if !options.iframe_enabled {
            return Vec::new();
        }
        let Some(base) = self.config.sync_url.as_deref() else {
            return Vec::new();
        };
        consent
            .sync_url(base)
            .map(|url| UserSync {
                kind: SyncKind::Iframe,
                url,
            })
            .into_iter()
            .collect()
    }
}

/// Build the adapter when `[adapters.glasspane]` is present and enabled.
///
/// # Errors
///
/// Returns an error when the adapter config is invalid.
pub fn register(settings: &Settings) -> Result<Option<Arc<dyn BidderSpec>>, Report<AdapterError>> {
    let Some(config) = settings.adapter_config::<GlasspaneConfig>(BIDDER_CODE)? else {
        log::info!("{BIDDER_CODE} adapter not registered: missing or disabled");
        return Ok(None);
    };
    log::info!("Registering {BIDDER_CODE} adapter at {}", config.endpoint);
    Ok(Some(Arc::new(GlasspaneAdapter::new(config, &settings.global))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tests::{
        banner_bid, bidder_request, create_test_settings, full_consent, native_bid,
    };
    use serde_json::{json, Value as Json};

    fn adapter() -> GlasspaneAdapter {
        let settings = create_test_settings();
        let config = settings
            .adapter_config::<GlasspaneConfig>(BIDDER_CODE)
            .expect("should parse config")
            .expect("should be enabled");
        GlasspaneAdapter::with_page_view_id(config, &settings.global, "pv-1")
    }

    fn with_params(mut bid: BidRequest, params: Json) -> BidRequest {
        bid.bidder = BIDDER_CODE.to_string();
        bid.params = params;
        bid
    }

    #[test]
    fn unit_id_is_required() {
        let adapter = adapter();
        let bid = native_bid("n1");
        assert!(adapter.is_bid_request_valid(&with_params(bid.clone(), json!({ "unit_id": "u-1" }))));
        assert!(!adapter.is_bid_request_valid(&with_params(bid.clone(), json!({ "unit_id": "  " }))));
        assert!(!adapter.is_bid_request_valid(&with_params(bid, json!({ "floor": 1.0 }))));
    }

    #[test]
    fn page_view_id_is_stable_across_requests() {
        let settings = create_test_settings();
        let config = settings
            .adapter_config::<GlasspaneConfig>(BIDDER_CODE)
            .expect("should parse config")
            .expect("should be enabled");
        let adapter = GlasspaneAdapter::new(config, &settings.global);
        let bid = with_params(native_bid("n1"), json!({ "unit_id": "u-1" }));
        let first = adapter.build_requests(&[bid.clone()], &bidder_request(BIDDER_CODE));
        let second = adapter.build_requests(&[bid], &bidder_request(BIDDER_CODE));

        let id = |requests: &[ServerRequest]| {
            requests[0].json_body().expect("should have body")["pageViewId"].clone()
        };
        assert_eq!(id(&first), id(&second));
        assert_eq!(id(&first), json!(adapter.page_view_id()));
    }

    #[test]
    fn builds_native_first_payload() {
        let adapter = adapter();
        let mut bidder_request = bidder_request(BIDDER_CODE);
        bidder_request.consent = full_consent();
        let bids = vec![
            with_params(native_bid("n1"), json!({ "unit_id": "u-1", "floor": 0.4 })),
            with_params(banner_bid("b1", &[[300, 250]]), json!({ "unit_id": 77 })),
        ];

        let requests = adapter.build_requests(&bids, &bidder_request);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://hb.glasspane.example/v2/bid");
        let body = requests[0].json_body().expect("should have body");

        assert_eq!(body["pageViewId"], "pv-1");
        assert_eq!(body["page"], "https://pub.example/article");
        assert_eq!(body["referrer"], "https://search.example/");
        assert_eq!(
            body["consent"],
            json!({
                "gdprApplies": true,
                "consentString": "CO-TCF",
                "uspString": "1YNN",
                "gppString": "DBACNY",
                "gppSid": [7, 8]
            })
        );

        let native_unit = &body["units"][0];
        assert_eq!(native_unit["bidId"], "n1");
        assert_eq!(native_unit["unitId"], "u-1");
        assert_eq!(native_unit["floor"], json!({ "value": 0.4, "currency": "USD" }));
        assert_eq!(
            native_unit["native"]["title"],
            json!({ "required": true, "len": 80, "sizes": [] })
        );
        assert_eq!(native_unit["native"]["image"]["sizes"], json!([[300, 157]]));
        assert!(native_unit["native"].get("sendTargetingKeys").is_none());
        assert!(native_unit.get("banner").is_none());

        let banner_unit = &body["units"][1];
        assert_eq!(banner_unit["unitId"], "77");
        assert_eq!(banner_unit["banner"]["sizes"], json!([[300, 250]]));
        assert!(banner_unit.get("floor").is_none());
    }

    fn request_for(bids: Vec<BidRequest>) -> ServerRequest {
        ServerRequest::post_json("https://hb.glasspane.example/v2/bid", json!({}), bids)
    }

    #[test]
    fn interprets_native_and_banner_units() {
        let adapter = adapter();
        let request = request_for(vec![native_bid("n1"), banner_bid("b1", &[[300, 250]])]);
        let response = ServerResponse::new(json!({
            "units": [
                {
                    "bidId": "n1", "cpm": 1.1, "creativeId": "nat-1", "adomain": ["acme.example"],
                    "native": {
                        "title": "Fresh shoes",
                        "image": { "url": "https://img.example/shoe.jpg", "width": 300, "height": 157 },
                        "sponsoredBy": "Acme",
                        "clickUrl": "https://acme.example/shoes",
                        "impressionTrackers": ["https://imp.glasspane.example/1"]
                    }
                },
                { "bidId": "b1", "cpm": 0.9, "currency": "EUR", "banner": { "html": "<div>b</div>", "w": 300, "h": 250 } }
            ]
        }));

        let bids = adapter.interpret_response(&response, &request);
        assert_eq!(bids.len(), 2);

        let native = &bids[0];
        assert_eq!(native.media_type, MediaType::Native);
        assert_eq!(native.creative_id, "nat-1");
        let assets = native.native.as_ref().expect("should have native");
        assert_eq!(assets.title, "Fresh shoes");
        assert_eq!(assets.click_url, "https://acme.example/shoes");
        assert_eq!(assets.image.as_ref().map(|i| i.width), Some(300));
        assert_eq!(native.meta.advertiser_domains, vec!["acme.example"]);

        let banner = &bids[1];
        assert_eq!(banner.media_type, MediaType::Banner);
        assert_eq!(banner.currency, "EUR");
        assert_eq!(banner.ad.as_deref(), Some("<div>b</div>"));
        assert_eq!(banner.creative_id, "b1");
    }

    #[test]
    fn incomplete_natives_are_dropped() {
        let adapter = adapter();
        let request = request_for(vec![native_bid("n1"), native_bid("n2")]);
        let response = ServerResponse::new(json!({
            "units": [
                { "bidId": "n1", "cpm": 1.0, "native": { "title": "No click" } },
                { "bidId": "n2", "cpm": 1.0, "native": { "clickUrl": "https://x.example/" } },
                { "bidId": "zz", "cpm": 1.0, "native": { "title": "t", "clickUrl": "https://x.example/" } }
            ]
        }));
        assert!(adapter.interpret_response(&response, &request).is_empty());
    }

    #[test]
    fn malformed_response_yields_no_bids() {
        let adapter = adapter();
        let request = request_for(vec![native_bid("n1")]);
        for body in [Json::Null, json!({ "units": {} }), json!(42)] {
            assert!(adapter
                .interpret_response(&ServerResponse::new(body), &request)
                .is_empty());
        }
    }

    #[test]
    fn malformed_unit_does_not_drop_its_neighbours() {
        let adapter = adapter();
        let request = request_for(vec![banner_bid("b1", &[[300, 250]]), banner_bid("b2", &[[300, 250]])]);
        let response = ServerResponse::new(json!({
            "units": [
                { "bidId": "b1", "cpm": 1.5, "banner": { "html": "<div>ok</div>", "w": 300, "h": 250 } },
                { "bidId": "b2", "cpm": "2.0", "banner": { "html": "<div>bad</div>", "w": 300, "h": 250 } }
            ]
        }));

        let bids = adapter.interpret_response(&response, &request);
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].request_id, "b1");
    }

    #[test]
    fn iframe_sync_only_when_enabled() {
        let adapter = adapter();
        let iframe = SyncOptions {
            iframe_enabled: true,
            pixel_enabled: false,
        };
        let syncs = adapter.get_user_syncs(&iframe, &[], &full_consent());
        assert_eq!(syncs.len(), 1);
        assert_eq!(syncs[0].kind, SyncKind::Iframe);
        assert!(syncs[0]
            .url
            .starts_with("https://sync.glasspane.example/iframe.html?gdpr=1&gdpr_consent=CO-TCF"));

        let pixel_only = SyncOptions {
            iframe_enabled: false,
            pixel_enabled: true,
        };
        assert!(adapter
            .get_user_syncs(&pixel_only, &[], &full_consent())
            .is_empty());
    }
}
