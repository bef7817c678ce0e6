//! Host-side data shapes exchanged with bidder adapters.
//!
//! Field names follow the host's camelCase JSON so bid requests can be
//! deserialized directly from what the auction hands over.

use std::collections::{BTreeMap, HashMap};

use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::consent::ConsentData;
use crate::floors::{self, Floor, FloorData, FloorQuery};
use crate::sizes::{deserialize_sizes, Size};

/// Media type enumeration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Banner,
    Video,
    Native,
}

impl MediaType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Banner => "banner",
            Self::Video => "video",
            Self::Native => "native",
        }
    }

    /// Parse a vendor-supplied media type name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "banner" | "display" => Some(Self::Banner),
            "video" => Some(Self::Video),
            "native" => Some(Self::Native),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BannerMediaType {
    #[serde(default, deserialize_with = "deserialize_sizes")]
    pub sizes: Vec<Size>,
    #[serde(default)]
    pub pos: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoContext {
    Instream,
    Outstream,
    Adpod,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMediaType {
    #[serde(default)]
    pub context: Option<VideoContext>,
    #[serde(default, deserialize_with = "deserialize_sizes")]
    pub player_size: Vec<Size>,
    #[serde(default)]
    pub mimes: Vec<String>,
    #[serde(default)]
    pub protocols: Vec<u8>,
    #[serde(default)]
    pub minduration: Option<u32>,
    #[serde(default)]
    pub maxduration: Option<u32>,
    #[serde(default)]
    pub api: Vec<u8>,
    #[serde(default)]
    pub playbackmethod: Vec<u8>,
    #[serde(default)]
    pub skip: Option<u8>,
    #[serde(default)]
    pub placement: Option<u8>,
    #[serde(default)]
    pub plcmt: Option<u8>,
}

impl VideoMediaType {
    /// First player size, which is what vendors size the slot by.
    #[must_use]
    pub fn player_size(&self) -> Option<Size> {
        self.player_size.first().copied()
    }

    #[must_use]
    pub fn is_outstream(&self) -> bool {
        self.context == Some(VideoContext::Outstream)
    }
}

/// Legacy native asset request (`title`, `image`, `icon`, `body`, …).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeAssetParams {
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_sizes")]
    pub sizes: Vec<Size>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeMediaType {
    /// OpenRTB native request, when the publisher configured one directly.
    #[serde(default)]
    pub ortb: Option<Json>,
    /// Legacy asset requests keyed by asset name. Non-asset keys the host
    /// adds (e.g. `sendTargetingKeys`) are kept here too and ignored.
    #[serde(flatten)]
    pub assets: BTreeMap<String, Json>,
}

impl NativeMediaType {
    /// Parsed request for one legacy asset, if present and well formed.
    #[must_use]
    pub fn asset_params(&self, name: &str) -> Option<NativeAssetParams> {
        let raw = self.assets.get(name)?;
        if !raw.is_object() {
            return None;
        }
        serde_json::from_value(raw.clone()).ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaTypes {
    #[serde(default)]
    pub banner: Option<BannerMediaType>,
    #[serde(default)]
    pub video: Option<VideoMediaType>,
    #[serde(default)]
    pub native: Option<NativeMediaType>,
}

impl MediaTypes {
    /// Media types present on the ad unit, in banner/video/native order.
    #[must_use]
    pub fn kinds(&self) -> Vec<MediaType> {
        let mut kinds = Vec::with_capacity(3);
        if self.banner.is_some() {
            kinds.push(MediaType::Banner);
        }
        if self.video.is_some() {
            kinds.push(MediaType::Video);
        }
        if self.native.is_some() {
            kinds.push(MediaType::Native);
        }
        kinds
    }

    /// The media type when exactly one is configured.
    #[must_use]
    pub fn single(&self) -> Option<MediaType> {
        match self.kinds().as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }
}

/// One bid request handed to an adapter (one ad unit × one bidder).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidRequest {
    pub bidder: String,
    pub bid_id: String,
    #[serde(default)]
    pub ad_unit_code: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub auction_id: Option<String>,
    #[serde(default)]
    pub bidder_request_id: Option<String>,
    /// Vendor-specific parameters, validated by each adapter.
    #[serde(default)]
    pub params: Json,
    #[serde(default)]
    pub media_types: MediaTypes,
    /// Legacy top-level sizes, used when `mediaTypes.banner` is absent.
    #[serde(default, deserialize_with = "deserialize_sizes")]
    pub sizes: Vec<Size>,
    #[serde(default)]
    pub floors: Option<FloorData>,
    #[serde(default)]
    pub schain: Option<Json>,
    #[serde(default)]
    pub user_id_as_eids: Vec<Json>,
    #[serde(default)]
    pub ortb2_imp: Option<Json>,
}

impl BidRequest {
    /// Banner sizes from `mediaTypes.banner`, else the legacy `sizes`.
    #[must_use]
    pub fn banner_sizes(&self) -> Vec<Size> {
        match &self.media_types.banner {
            Some(banner) if !banner.sizes.is_empty() => banner.sizes.clone(),
            _ => self.sizes.clone(),
        }
    }

    #[must_use]
    pub fn get_floor(&self, query: &FloorQuery<'_>) -> Option<Floor> {
        floors::get_floor(self, query)
    }

    /// Global placement id from `ortb2Imp.ext.gpid`, when the page sets one.
    #[must_use]
    pub fn gpid(&self) -> Option<&str> {
        self.ortb2_imp
            .as_ref()?
            .pointer("/ext/gpid")
            .and_then(Json::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefererInfo {
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default, rename = "ref")]
    pub referer: Option<String>,
    #[serde(default)]
    pub reached_top: bool,
    #[serde(default)]
    pub canonical_url: Option<String>,
}

/// Auction context shared by every bid request sent to one bidder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidderRequest {
    pub bidder_code: String,
    #[serde(default)]
    pub auction_id: String,
    #[serde(default)]
    pub bidder_request_id: String,
    #[serde(default)]
    pub referer_info: RefererInfo,
    #[serde(flatten)]
    pub consent: ConsentData,
    /// First-party data (`site`, `user`, `device` fragments).
    #[serde(default)]
    pub ortb2: Json,
    #[serde(default)]
    pub timeout: Option<u32>,
}

impl BidderRequest {
    /// Page URL, preferring the canonical URL when the host found one.
    #[must_use]
    pub fn page_url(&self) -> Option<&str> {
        self.referer_info
            .canonical_url
            .as_deref()
            .or(self.referer_info.page.as_deref())
    }

    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.ortb2.pointer("/device/ua").and_then(Json::as_str)
    }
}

/// Body or query carried by an outbound request descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestData {
    Json(Json),
    /// Already-encoded query string, without the leading `?`.
    Query(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub content_type: Option<String>,
    pub with_credentials: bool,
}

/// Outbound HTTP request described by an adapter; the host performs it.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRequest {
    pub method: Method,
    pub url: String,
    pub data: RequestData,
    pub options: RequestOptions,
    /// The bid requests this call carries, for response correlation.
    pub bids: Vec<BidRequest>,
}

impl ServerRequest {
    #[must_use]
    pub fn post_json(url: impl Into<String>, body: Json, bids: Vec<BidRequest>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            data: RequestData::Json(body),
            options: RequestOptions::default(),
            bids,
        }
    }

    #[must_use]
    pub fn get(url: impl Into<String>, query: String, bids: Vec<BidRequest>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            data: RequestData::Query(query),
            options: RequestOptions::default(),
            bids,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// URL including the query string for GET requests.
    #[must_use]
    pub fn full_url(&self) -> String {
        match &self.data {
            RequestData::Query(query) if !query.is_empty() => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}{}", self.url, sep, query)
            }
            _ => self.url.clone(),
        }
    }

    #[must_use]
    pub fn json_body(&self) -> Option<&Json> {
        match &self.data {
            RequestData::Json(body) => Some(body),
            _ => None,
        }
    }

    #[must_use]
    pub fn bid(&self, bid_id: &str) -> Option<&BidRequest> {
        self.bids.iter().find(|b| b.bid_id == bid_id)
    }
}

/// Response handed back by the host after performing a [`ServerRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerResponse {
    pub body: Json,
    pub headers: HashMap<String, String>,
}

impl ServerResponse {
    #[must_use]
    pub fn new(body: Json) -> Self {
        Self {
            body,
            headers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidMeta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advertiser_domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeImage {
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeResponse {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsored_by: Option<String>,
    pub click_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<NativeImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<NativeImage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub impression_trackers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub javascript_trackers: Vec<String>,
}

/// Outstream player the host loads to render a video bid in a display slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Renderer {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub config: Json,
}

/// A bid returned to the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidResponse {
    /// The `bid_id` of the [`BidRequest`] this answers.
    pub request_id: String,
    pub bidder_code: String,
    pub cpm: f64,
    pub currency: String,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vast_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vast_xml: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<NativeResponse>,
    pub ttl: u32,
    pub creative_id: String,
    pub net_revenue: bool,
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_id: Option<String>,
    #[serde(default)]
    pub meta: BidMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renderer: Option<Renderer>,
}

impl BidResponse {
    /// Whether the bid carries the markup its media type needs.
    #[must_use]
    pub fn has_markup(&self) -> bool {
        match self.media_type {
            MediaType::Banner => self.ad.as_deref().is_some_and(|ad| !ad.trim().is_empty()),
            MediaType::Video => self.vast_url.is_some() || self.vast_xml.is_some(),
            MediaType::Native => self.native.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Iframe,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSync {
    #[serde(rename = "type")]
    pub kind: SyncKind,
    pub url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    #[serde(default)]
    pub iframe_enabled: bool,
    #[serde(default)]
    pub pixel_enabled: bool,
}

impl SyncOptions {
    #[must_use]
    pub fn allows(&self, kind: SyncKind) -> bool {
        match kind {
            SyncKind::Iframe => self.iframe_enabled,
            SyncKind::Image => self.pixel_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tests::bidder_request;
    use serde_json::json;

    #[test]
    fn bid_request_deserializes_host_json() {
        let bid: BidRequest = serde_json::from_value(json!({
            "bidder": "mocktioneer",
            "bidId": "2f1a",
            "adUnitCode": "div-top",
            "params": { "placement_id": 42 },
            "mediaTypes": {
                "banner": { "sizes": [[300, 250], [728, 90]] },
                "video": { "context": "outstream", "playerSize": [640, 480], "mimes": ["video/mp4"] },
                "native": { "title": { "required": true, "len": 80 }, "image": { "sizes": [150, 150] } }
            },
            "ortb2Imp": { "ext": { "gpid": "/1234/top" } }
        }))
        .expect("should parse bid request");

        assert_eq!(bid.bid_id, "2f1a");
        assert_eq!(bid.banner_sizes(), vec![Size::new(300, 250), Size::new(728, 90)]);
        let video = bid.media_types.video.as_ref().expect("should have video");
        assert!(video.is_outstream());
        assert_eq!(video.player_size(), Some(Size::new(640, 480)));
        let native = bid.media_types.native.as_ref().expect("should have native");
        let title = native.asset_params("title").expect("should have title asset");
        assert!(title.required);
        assert_eq!(title.len, Some(80));
        let image = native.asset_params("image").expect("should have image asset");
        assert_eq!(image.sizes, vec![Size::new(150, 150)]);
        assert_eq!(
            bid.media_types.kinds(),
            vec![MediaType::Banner, MediaType::Video, MediaType::Native]
        );
        assert!(bid.media_types.single().is_none());
        assert_eq!(bid.gpid(), Some("/1234/top"));
    }

    #[test]
    fn legacy_sizes_used_without_banner_media_type() {
        let bid: BidRequest = serde_json::from_value(json!({
            "bidder": "streamline",
            "bidId": "b1",
            "sizes": [[160, 600]]
        }))
        .expect("should parse bid request");
        assert_eq!(bid.banner_sizes(), vec![Size::new(160, 600)]);
    }

    #[test]
    fn bidder_request_flattens_consent() {
        let request: BidderRequest = serde_json::from_value(json!({
            "bidderCode": "mocktioneer",
            "refererInfo": { "page": "https://pub.example/a", "ref": "https://search.example" },
            "gdprConsent": { "gdprApplies": true, "consentString": "CO-TCF" },
            "uspConsent": "1YNN",
            "ortb2": { "device": { "ua": "Mozilla/5.0" } }
        }))
        .expect("should parse bidder request");

        assert_eq!(request.consent.gdpr_consent_string(), Some("CO-TCF"));
        assert_eq!(request.consent.usp_string(), Some("1YNN"));
        assert_eq!(request.page_url(), Some("https://pub.example/a"));
        assert_eq!(
            request.referer_info.referer.as_deref(),
            Some("https://search.example")
        );
        assert_eq!(request.user_agent(), Some("Mozilla/5.0"));
    }

    #[test]
    fn canonical_url_preferred_for_page() {
        let mut request = bidder_request("mocktioneer");
        request.referer_info.canonical_url = Some("https://pub.example/canonical".to_string());
        assert_eq!(request.page_url(), Some("https://pub.example/canonical"));
    }

    #[test]
    fn full_url_appends_query() {
        let request = ServerRequest::get("https://bid.example/get", "a=1&b=2".to_string(), vec![]);
        assert_eq!(request.full_url(), "https://bid.example/get?a=1&b=2");

        let request =
            ServerRequest::get("https://bid.example/get?v=2", "a=1".to_string(), vec![]);
        assert_eq!(request.full_url(), "https://bid.example/get?v=2&a=1");

        let request = ServerRequest::post_json("https://bid.example/post", json!({}), vec![]);
        assert_eq!(request.full_url(), "https://bid.example/post");
        assert_eq!(request.method, Method::POST);
    }

    #[test]
    fn has_markup_checks_media_type() {
        let mut bid = BidResponse {
            media_type: MediaType::Video,
            ..BidResponse::default()
        };
        assert!(!bid.has_markup());
        bid.vast_url = Some("https://vast.example/tag.xml".to_string());
        assert!(bid.has_markup());

        let banner = BidResponse {
            ad: Some("   ".to_string()),
            ..BidResponse::default()
        };
        assert!(!banner.has_markup());
    }

    #[test]
    fn media_type_names() {
        assert_eq!(MediaType::from_name("Display"), Some(MediaType::Banner));
        assert_eq!(MediaType::from_name("video"), Some(MediaType::Video));
        assert_eq!(MediaType::from_name("audio"), None);
        assert_eq!(MediaType::Native.as_str(), "native");
    }
}
