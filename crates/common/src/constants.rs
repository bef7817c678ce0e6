/// Currency assumed when neither the vendor nor the floor data names one.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Bid time-to-live in seconds used when a vendor response omits `ttl`.
pub const DEFAULT_BID_TTL_SECS: u32 = 300;

/// Content type sent with JSON request bodies.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type vendors expecting "simple" CORS requests accept.
pub const CONTENT_TYPE_TEXT_PLAIN: &str = "text/plain";

/// Prefix for environment variable overrides (`BIDRELAY__ADAPTERS__…`).
pub const ENVIRONMENT_VARIABLE_PREFIX: &str = "BIDRELAY";

/// Separator between nested keys in environment variable overrides.
pub const ENVIRONMENT_VARIABLE_SEPARATOR: &str = "__";

/// Query parameter names shared by sync pixels and GET bid endpoints.
pub const PARAM_GDPR: &str = "gdpr";
pub const PARAM_GDPR_CONSENT: &str = "gdpr_consent";
pub const PARAM_US_PRIVACY: &str = "us_privacy";
pub const PARAM_GPP: &str = "gpp";
pub const PARAM_GPP_SID: &str = "gpp_sid";
