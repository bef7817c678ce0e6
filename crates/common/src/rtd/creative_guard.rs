//! Malvertising defense: load a vendor protection script ahead of banner
//! creatives.
//!
//! The script tag is prefixed to the creative markup, or, with
//! `placement = "head"` and a full HTML document, inserted as the first child
//! of `<head>`. Markup that already carries the tag is left untouched.

use std::sync::{Arc, RwLock};

use error_stack::{Report, ResultExt};
use lol_html::html_content::ContentType;
use lol_html::{element, HtmlRewriter, Settings as HtmlSettings};
use serde::Deserialize;
use url::Url;
use validator::Validate;

use crate::bidder::{BidResponse, MediaType};
use crate::consent::ConsentData;
use crate::error::AdapterError;
use crate::settings::RtdModuleConfig;

use super::RtdSubmodule;

pub const MODULE_NAME: &str = "creativeGuard";

/// Hosts the protection script may be served from when the config does not
/// list its own.
const DEFAULT_ALLOWED_HOST_SUFFIXES: &[&str] = &["guard.example"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionMode {
    /// Protect every banner bid.
    #[default]
    Full,
    /// Protect only bids from the listed bidders.
    Bidders,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    #[default]
    Prefix,
    Head,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreativeGuardParams {
    #[validate(url)]
    pub script_url: String,
    #[serde(default)]
    pub protection_mode: ProtectionMode,
    #[serde(default, deserialize_with = "crate::settings::vec_from_seq_or_map")]
    pub bidders: Vec<String>,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default, deserialize_with = "crate::settings::vec_from_seq_or_map")]
    pub allowed_host_suffixes: Vec<String>,
}

impl CreativeGuardParams {
    /// Parse and validate params from the provider config.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] when params are missing,
    /// malformed, not `https`, or point at a host outside the allow list.
    pub fn from_config(config: &RtdModuleConfig) -> Result<Self, Report<AdapterError>> {
        let params: Self = serde_json::from_value(config.params.clone()).change_context(
            AdapterError::Configuration {
                message: format!("Invalid params for RTD provider '{}'", config.name),
            },
        )?;
        params.validate().change_context(AdapterError::Configuration {
            message: format!("Validation failed for RTD provider '{}'", config.name),
        })?;

        let url = Url::parse(&params.script_url).change_context(AdapterError::Configuration {
            message: format!("Unparseable script_url '{}'", params.script_url),
        })?;
        if url.scheme() != "https" {
            return Err(Report::new(AdapterError::Configuration {
                message: format!("script_url must use https: {}", params.script_url),
            }));
        }
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if !params.host_allowed(&host) {
            return Err(Report::new(AdapterError::Configuration {
                message: format!("script_url host '{host}' is not on the allow list"),
            }));
        }
        if params.protection_mode == ProtectionMode::Bidders && params.bidders.is_empty() {
            return Err(Report::new(AdapterError::Configuration {
                message: "protection_mode 'bidders' needs a non-empty bidders list".to_string(),
            }));
        }
        Ok(params)
    }

    fn host_allowed(&self, host: &str) -> bool {
        let matches = |suffix: &str| {
            let suffix = suffix.trim_start_matches('.').to_ascii_lowercase();
            host == suffix || host.ends_with(&format!(".{suffix}"))
        };
        if self.allowed_host_suffixes.is_empty() {
            DEFAULT_ALLOWED_HOST_SUFFIXES.iter().any(|s| matches(s))
        } else {
            self.allowed_host_suffixes.iter().any(|s| matches(s))
        }
    }

    fn applies_to(&self, bidder_code: &str) -> bool {
        match self.protection_mode {
            ProtectionMode::Full => true,
            ProtectionMode::Bidders => self
                .bidders
                .iter()
                .any(|b| b.eq_ignore_ascii_case(bidder_code)),
        }
    }

    /// The `<script>` tag that loads the protection script.
    #[must_use]
    pub fn script_tag(&self) -> String {
        format!(
            r#"<script type="text/javascript" src="{}"></script>"#,
            escape_attr(&self.script_url)
        )
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

/// Insert `tag` as the first child of `<head>`.
///
/// Returns `Ok(None)` when the markup has no `<head>` element.
fn inject_into_head(markup: &str, tag: &str) -> Result<Option<String>, Report<AdapterError>> {
    let mut injected = false;
    let mut out = Vec::with_capacity(markup.len() + tag.len());
    let mut rewriter = HtmlRewriter::new(
        HtmlSettings {
            element_content_handlers: vec![element!("head", |el| {
                if !injected {
                    el.prepend(tag, ContentType::Html);
                    injected = true;
                }
                Ok(())
            })],
            ..HtmlSettings::default()
        },
        |c: &[u8]| out.extend_from_slice(c),
    );

    rewriter
        .write(markup.as_bytes())
        .change_context(AdapterError::Creative {
            message: "failed to rewrite creative markup".to_string(),
        })?;
    rewriter.end().change_context(AdapterError::Creative {
        message: "failed to finish rewriting creative markup".to_string(),
    })?;

    if !injected {
        return Ok(None);
    }
    let html = String::from_utf8(out).change_context(AdapterError::Creative {
        message: "rewritten creative is not valid UTF-8".to_string(),
    })?;
    Ok(Some(html))
}

/// Protect `markup` with `params`, returning `None` when nothing changes.
///
/// # Errors
///
/// Returns [`AdapterError::Creative`] when head placement fails to rewrite
/// the markup.
pub fn protect_markup(
    markup: &str,
    params: &CreativeGuardParams,
) -> Result<Option<String>, Report<AdapterError>> {
    let tag = params.script_tag();
    if markup.contains(&tag) {
        return Ok(None);
    }
    if params.placement == Placement::Head {
        if let Some(html) = inject_into_head(markup, &tag)? {
            return Ok(Some(html));
        }
    }
    Ok(Some(format!("{tag}{markup}")))
}

/// RTD submodule that wraps banner creatives with the protection script.
#[derive(Debug, Default)]
pub struct CreativeGuard {
    /// Params from the last validated config, keyed by that config.
    validated: RwLock<Option<(RtdModuleConfig, Arc<CreativeGuardParams>)>>,
}

impl CreativeGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validated params for `config`, parsed once per distinct config.
    fn params_for(
        &self,
        config: &RtdModuleConfig,
    ) -> Result<Arc<CreativeGuardParams>, Report<AdapterError>> {
        if let Ok(cache) = self.validated.read() {
            if let Some((cached, params)) = cache.as_ref() {
                if cached == config {
                    return Ok(Arc::clone(params));
                }
            }
        }

        let params = Arc::new(CreativeGuardParams::from_config(config)?);
        if let Ok(mut cache) = self.validated.write() {
            *cache = Some((config.clone(), Arc::clone(&params)));
        }
        Ok(params)
    }
}

impl RtdSubmodule for CreativeGuard {
    fn name(&self) -> &'static str {
        MODULE_NAME
    }

    fn init(&self, config: &RtdModuleConfig, _consent: &ConsentData) -> bool {
        match self.params_for(config) {
            Ok(params) => {
                log::info!(
                    "{MODULE_NAME}: protecting creatives with {} ({:?} mode)",
                    params.script_url,
                    params.protection_mode
                );
                true
            }
            Err(e) => {
                log::warn!("{MODULE_NAME}: disabled: {e:?}");
                false
            }
        }
    }

    fn on_bid_response(
        &self,
        bid: &mut BidResponse,
        config: &RtdModuleConfig,
        _consent: &ConsentData,
    ) {
        if bid.media_type != MediaType::Banner {
            return;
        }
        let Some(ad) = bid.ad.as_deref().filter(|ad| !ad.trim().is_empty()) else {
            return;
        };
        let params = match self.params_for(config) {
            Ok(params) => params,
            Err(e) => {
                log::warn!("{MODULE_NAME}: skipping bid {}: {e:?}", bid.request_id);
                return;
            }
        };
        if !params.applies_to(&bid.bidder_code) {
            return;
        }

        match protect_markup(ad, &params) {
            Ok(Some(protected)) => {
                log::debug!(
                    "{MODULE_NAME}: protected bid {} from {}",
                    bid.request_id,
                    bid.bidder_code
                );
                bid.ad = Some(protected);
            }
            Ok(None) => {}
            Err(e) => log::warn!(
                "{MODULE_NAME}: leaving bid {} unprotected: {e:?}",
                bid.request_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TAG: &str =
        r#"<script type="text/javascript" src="https://cdn.guard.example/protect.js"></script>"#;

    fn config(params: serde_json::Value) -> RtdModuleConfig {
        RtdModuleConfig {
            name: MODULE_NAME.to_string(),
            wait_for_it: true,
            params,
        }
    }

    fn full_config() -> RtdModuleConfig {
        config(json!({ "script_url": "https://cdn.guard.example/protect.js" }))
    }

    fn banner(bidder: &str, ad: &str) -> BidResponse {
        BidResponse {
            request_id: "b1".to_string(),
            bidder_code: bidder.to_string(),
            cpm: 1.0,
            currency: "USD".to_string(),
            width: 300,
            height: 250,
            ad: Some(ad.to_string()),
            media_type: MediaType::Banner,
            ..BidResponse::default()
        }
    }

    #[test]
    fn init_rejects_bad_script_urls() {
        let guard = CreativeGuard::new();
        let consent = ConsentData::default();
        assert!(guard.init(&full_config(), &consent));
        assert!(!guard.init(&config(json!({})), &consent));
        assert!(!guard.init(
            &config(json!({ "script_url": "http://cdn.guard.example/protect.js" })),
            &consent
        ));
        assert!(!guard.init(
            &config(json!({ "script_url": "https://evil.example/protect.js" })),
            &consent
        ));
        assert!(!guard.init(
            &config(json!({ "script_url": "https://notguard.example/protect.js" })),
            &consent
        ));
        assert!(!guard.init(&config(json!("just a string")), &consent));
    }

    #[test]
    fn init_honors_custom_allow_list() {
        let guard = CreativeGuard::new();
        let params = json!({
            "script_url": "https://js.vendor.example/p.js",
            "allowed_host_suffixes": ["vendor.example"]
        });
        assert!(guard.init(&config(params), &ConsentData::default()));
    }

    #[test]
    fn bidders_mode_requires_bidder_list() {
        let guard = CreativeGuard::new();
        let params = json!({
            "script_url": "https://cdn.guard.example/protect.js",
            "protection_mode": "bidders"
        });
        assert!(!guard.init(&config(params), &ConsentData::default()));
    }

    #[test]
    fn prefixes_banner_markup() {
        let guard = CreativeGuard::new();
        let mut bid = banner("mocktioneer", "<div>ad</div>");
        guard.on_bid_response(&mut bid, &full_config(), &ConsentData::default());
        assert_eq!(bid.ad, Some(format!("{TAG}<div>ad</div>")));
    }

    #[test]
    fn protection_is_idempotent() {
        let guard = CreativeGuard::new();
        let mut bid = banner("mocktioneer", "<div>ad</div>");
        guard.on_bid_response(&mut bid, &full_config(), &ConsentData::default());
        let once = bid.ad.clone();
        guard.on_bid_response(&mut bid, &full_config(), &ConsentData::default());
        assert_eq!(bid.ad, once);
        assert_eq!(bid.ad.as_deref().map(|ad| ad.matches(TAG).count()), Some(1));
    }

    #[test]
    fn bidders_mode_only_touches_listed_bidders() {
        let guard = CreativeGuard::new();
        let cfg = config(json!({
            "script_url": "https://cdn.guard.example/protect.js",
            "protection_mode": "bidders",
            "bidders": ["streamline"]
        }));

        let mut listed = banner("streamline", "<div>a</div>");
        let mut other = banner("tessellate", "<div>b</div>");
        guard.on_bid_response(&mut listed, &cfg, &ConsentData::default());
        guard.on_bid_response(&mut other, &cfg, &ConsentData::default());

        assert!(listed.ad.as_deref().is_some_and(|ad| ad.starts_with(TAG)));
        assert_eq!(other.ad.as_deref(), Some("<div>b</div>"));
    }

    #[test]
    fn skips_non_banner_and_empty_markup() {
        let guard = CreativeGuard::new();
        let mut video = BidResponse {
            media_type: MediaType::Video,
            vast_url: Some("https://vast.example/v.xml".to_string()),
            ..BidResponse::default()
        };
        guard.on_bid_response(&mut video, &full_config(), &ConsentData::default());
        assert!(video.ad.is_none());

        let mut empty = banner("mocktioneer", "   ");
        guard.on_bid_response(&mut empty, &full_config(), &ConsentData::default());
        assert_eq!(empty.ad.as_deref(), Some("   "));
    }

    #[test]
    fn head_placement_injects_into_documents() {
        let guard = CreativeGuard::new();
        let cfg = config(json!({
            "script_url": "https://cdn.guard.example/protect.js",
            "placement": "head"
        }));

        let mut document = banner(
            "glasspane",
            "<html><head><title>t</title></head><body><div>ad</div></body></html>",
        );
        guard.on_bid_response(&mut document, &cfg, &ConsentData::default());
        assert_eq!(
            document.ad.as_deref(),
            Some(&*format!(
                "<html><head>{TAG}<title>t</title></head><body><div>ad</div></body></html>"
            ))
        );

        let mut fragment = banner("glasspane", "<div>ad</div>");
        guard.on_bid_response(&mut fragment, &cfg, &ConsentData::default());
        assert_eq!(fragment.ad, Some(format!("{TAG}<div>ad</div>")));
    }

    #[test]
    fn script_url_is_attribute_escaped() {
        let params = CreativeGuardParams::from_config(&config(json!({
            "script_url": "https://cdn.guard.example/protect.js?a=1&b=2"
        })))
        .expect("should accept params");
        assert_eq!(
            params.script_tag(),
            r#"<script type="text/javascript" src="https://cdn.guard.example/protect.js?a=1&amp;b=2"></script>"#
        );
    }

    #[test]
    fn validated_params_are_reused_for_the_same_config() {
        let guard = CreativeGuard::new();
        let cfg = full_config();
        assert!(guard.init(&cfg, &ConsentData::default()));

        let first = guard.params_for(&cfg).expect("should be cached");
        let second = guard.params_for(&cfg).expect("should be cached");
        assert!(Arc::ptr_eq(&first, &second));

        let mut bid = banner("mocktioneer", "<div>ad</div>");
        guard.on_bid_response(&mut bid, &cfg, &ConsentData::default());
        assert_eq!(bid.ad.as_deref(), Some(format!("{TAG}<div>ad</div>").as_str()));

        let other = config(json!({ "script_url": "https://evil.example/x.js" }));
        let mut untouched = banner("mocktioneer", "<div>ad</div>");
        guard.on_bid_response(&mut untouched, &other, &ConsentData::default());
        assert_eq!(untouched.ad.as_deref(), Some("<div>ad</div>"));
        assert!(Arc::ptr_eq(
            &first,
            &guard.params_for(&cfg).expect("should still validate")
        ));
    }
}
