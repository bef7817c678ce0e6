//! Privacy consent signals (GDPR TCF, US Privacy / CCPA, GPP).
//!
//! Adapters never interpret consent strings; they forward them unchanged to
//! the vendor, either inside an OpenRTB request or as query parameters.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::{PARAM_GDPR, PARAM_GDPR_CONSENT, PARAM_GPP, PARAM_GPP_SID, PARAM_US_PRIVACY};
use crate::openrtb::{Regs, RegsExt};

/// TCF consent as supplied by the host's consent management module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GdprConsent {
    /// `None` when the CMP could not determine applicability.
    #[serde(default)]
    pub gdpr_applies: Option<bool>,
    #[serde(default)]
    pub consent_string: Option<String>,
    #[serde(default)]
    pub api_version: Option<u8>,
    /// Google additional consent string, when present.
    #[serde(default)]
    pub addtl_consent: Option<String>,
}

/// Global Privacy Platform consent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GppConsent {
    pub gpp_string: String,
    #[serde(default)]
    pub applicable_sections: Vec<u16>,
}

/// All consent signals attached to a bidder request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentData {
    #[serde(default)]
    pub gdpr_consent: Option<GdprConsent>,
    /// US Privacy string, e.g. `1YNN`.
    #[serde(default)]
    pub usp_consent: Option<String>,
    #[serde(default)]
    pub gpp_consent: Option<GppConsent>,
    #[serde(default)]
    pub coppa: bool,
}

impl ConsentData {
    /// `Some(1)`/`Some(0)` when GDPR applicability is known.
    #[must_use]
    pub fn gdpr_applies_flag(&self) -> Option<u8> {
        self.gdpr_consent
            .as_ref()
            .and_then(|gdpr| gdpr.gdpr_applies)
            .map(u8::from)
    }

    #[must_use]
    pub fn gdpr_consent_string(&self) -> Option<&str> {
        self.gdpr_consent
            .as_ref()
            .and_then(|gdpr| gdpr.consent_string.as_deref())
            .filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn usp_string(&self) -> Option<&str> {
        self.usp_consent.as_deref().filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn gpp_string(&self) -> Option<&str> {
        self.gpp_consent
            .as_ref()
            .map(|gpp| gpp.gpp_string.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Applicable GPP section ids joined with commas (`"7,8"`).
    #[must_use]
    pub fn gpp_sid_param(&self) -> Option<String> {
        let sections = &self.gpp_consent.as_ref()?.applicable_sections;
        if sections.is_empty() {
            return None;
        }
        Some(
            sections
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    /// Project the consent signals onto an OpenRTB `regs` object.
    ///
    /// Returns `None` when there is nothing to send.
    #[must_use]
    pub fn to_openrtb_regs(&self) -> Option<Regs> {
        let ext = RegsExt {
            gdpr: self.gdpr_applies_flag(),
            us_privacy: self.usp_string().map(str::to_string),
        };
        let regs = Regs {
            coppa: self.coppa.then_some(1),
            gpp: self.gpp_string().map(str::to_string),
            gpp_sid: self
                .gpp_consent
                .as_ref()
                .map(|gpp| gpp.applicable_sections.clone())
                .unwrap_or_default(),
            ext: (ext != RegsExt::default()).then_some(ext),
        };
        (regs != Regs::default()).then_some(regs)
    }

    /// Consent query parameters as `(name, value)` pairs, in a stable order.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(flag) = self.gdpr_applies_flag() {
            pairs.push((PARAM_GDPR, flag.to_string()));
        }
        if let Some(consent) = self.gdpr_consent_string() {
            pairs.push((PARAM_GDPR_CONSENT, consent.to_string()));
        }
        if let Some(usp) = self.usp_string() {
            pairs.push((PARAM_US_PRIVACY, usp.to_string()));
        }
        if let Some(gpp) = self.gpp_string() {
            pairs.push((PARAM_GPP, gpp.to_string()));
        }
        if let Some(sid) = self.gpp_sid_param() {
            pairs.push((PARAM_GPP_SID, sid));
        }
        pairs
    }

    /// Append consent query parameters to `url`.
    pub fn append_to_url(&self, url: &mut Url) {
        let pairs = self.query_pairs();
        if pairs.is_empty() {
            return;
        }
        let mut query = url.query_pairs_mut();
        for (name, value) in &pairs {
            query.append_pair(name, value);
        }
    }

    /// Build a user-sync URL from `base` with consent parameters appended.
    ///
    /// Returns `None` when `base` is not an absolute URL.
    #[must_use]
    pub fn sync_url(&self, base: &str) -> Option<String> {
        let Ok(mut url) = Url::parse(base) else {
            log::warn!("consent: ignoring unparseable sync url '{base}'");
            return None;
        };
        self.append_to_url(&mut url);
        Some(url.to_string())
    }
}
