//! Configuration for the adapter collection.
//!
//! Settings are read from TOML (the embedded `bidrelay.toml` by default) and
//! may be overridden with `BIDRELAY__…` environment variables, e.g.
//! `BIDRELAY__ADAPTERS__MOCKTIONEER__ENDPOINT`. Each adapter owns a table
//! under `[adapters.<code>]` that it deserializes into its own typed config.

use std::collections::{BTreeMap, HashMap};

use config::{Config, Environment, File, FileFormat};
use error_stack::{Report, ResultExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as Json;
use validator::Validate;

use crate::constants::{
    DEFAULT_BID_TTL_SECS, DEFAULT_CURRENCY, ENVIRONMENT_VARIABLE_PREFIX,
    ENVIRONMENT_VARIABLE_SEPARATOR,
};
use crate::error::AdapterError;

/// Implemented by typed adapter configs so disabled adapters are skipped.
pub trait AdapterConfig {
    fn is_enabled(&self) -> bool;
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct GlobalSettings {
    /// Currency adapters assume when a vendor omits one.
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Fallback bid TTL in seconds.
    #[serde(default = "default_ttl_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub default_ttl_secs: u32,

    /// Log level applied by [`crate::logging::init_from_settings`].
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            default_ttl_secs: default_ttl_secs(),
            log_level: default_log_level(),
        }
    }
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_ttl_secs() -> u32 {
    DEFAULT_BID_TTL_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Raw per-adapter config tables keyed by bidder code.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct AdapterSettings {
    entries: HashMap<String, Json>,
}

impl AdapterSettings {
    /// Replace (or add) the raw config for one adapter.
    ///
    /// # Errors
    ///
    /// Returns an error when `value` is not a JSON object.
    pub fn insert_config(&mut self, code: &str, value: &Json) -> Result<(), Report<AdapterError>> {
        if !value.is_object() {
            return Err(Report::new(AdapterError::Configuration {
                message: format!("adapters.{code} must be a table"),
            }));
        }
        self.entries.insert(code.to_string(), value.clone());
        Ok(())
    }

    #[must_use]
    pub fn get(&self, code: &str) -> Option<&Json> {
        self.entries.get(code)
    }

    /// Configured adapter codes, sorted for stable registration order.
    #[must_use]
    pub fn codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }
}

/// One entry of `[[rtd.data_providers]]`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RtdModuleConfig {
    pub name: String,
    /// Whether the host should delay the auction for this module.
    #[serde(default)]
    pub wait_for_it: bool,
    #[serde(default)]
    pub params: Json,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RtdSettings {
    #[serde(default, deserialize_with = "vec_from_seq_or_map")]
    pub data_providers: Vec<RtdModuleConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct Settings {
    #[serde(default)]
    #[validate(nested)]
    pub global: GlobalSettings,
    #[serde(default)]
    pub adapters: AdapterSettings,
    #[serde(default)]
    pub rtd: RtdSettings,
}

impl Settings {
    /// Load the embedded `bidrelay.toml` with environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded TOML cannot be parsed or validated.
    pub fn new() -> Result<Self, Report<AdapterError>> {
        Self::from_toml(include_str!("../../../bidrelay.toml"))
    }

    /// Parse settings from a TOML string, applying `BIDRELAY__*` overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed, does not match the settings
    /// shape, or fails validation.
    pub fn from_toml(toml_str: &str) -> Result<Self, Report<AdapterError>> {
        let environment = Environment::default()
            .prefix(ENVIRONMENT_VARIABLE_PREFIX)
            .separator(ENVIRONMENT_VARIABLE_SEPARATOR)
            .try_parsing(true);

        let settings: Self = Config::builder()
            .add_source(File::from_str(toml_str, FileFormat::Toml))
            .add_source(environment)
            .build()
            .change_context(AdapterError::Configuration {
                message: "Failed to build configuration".to_string(),
            })?
            .try_deserialize()
            .change_context(AdapterError::Configuration {
                message: "Failed to deserialize configuration".to_string(),
            })?;

        settings
            .validate()
            .change_context(AdapterError::Configuration {
                message: "Settings validation failed".to_string(),
            })?;

        Ok(settings)
    }

    /// Serialize the effective settings back to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be represented in TOML.
    pub fn to_canonical_toml(&self) -> Result<String, Report<AdapterError>> {
        toml::to_string(self).change_context(AdapterError::Configuration {
            message: "Failed to serialize settings to TOML".to_string(),
        })
    }

    /// Deserialize and validate the typed config of one adapter.
    ///
    /// Returns `Ok(None)` when the adapter has no table or is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error when the table does not match `T` or fails validation.
    pub fn adapter_config<T>(&self, code: &str) -> Result<Option<T>, Report<AdapterError>>
    where
        T: DeserializeOwned + Validate + AdapterConfig,
    {
        let Some(raw) = self.adapters.get(code) else {
            return Ok(None);
        };

        let config: T = serde_json::from_value(raw.clone()).change_context(
            AdapterError::Configuration {
                message: format!("Invalid configuration for adapter '{code}'"),
            },
        )?;

        config
            .validate()
            .change_context(AdapterError::Configuration {
                message: format!("Validation failed for adapter '{code}'"),
            })?;

        Ok(config.is_enabled().then_some(config))
    }

    /// Look up the config of an RTD data provider by module name.
    #[must_use]
    pub fn rtd_config(&self, name: &str) -> Option<&RtdModuleConfig> {
        self.rtd.data_providers.iter().find(|p| p.name == name)
    }
}

/// Deserialize a `Vec<T>` from either a sequence or an index-keyed map.
///
/// Environment overrides such as `BIDRELAY__RTD__DATA_PROVIDERS__0__NAME`
/// arrive as maps keyed by position; TOML arrays arrive as sequences.
///
/// # Errors
///
/// Returns the deserializer's error when the input is neither shape.
pub fn vec_from_seq_or_map<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SeqOrMap<T> {
        Seq(Vec<T>),
        Map(BTreeMap<String, T>),
    }

    match SeqOrMap::<T>::deserialize(deserializer)? {
        SeqOrMap::Seq(items) => Ok(items),
        SeqOrMap::Map(map) => {
            let mut entries: Vec<(String, T)> = map.into_iter().collect();
            entries.sort_by_key(|(key, _)| key.parse::<usize>().unwrap_or(usize::MAX));
            Ok(entries.into_iter().map(|(_, value)| value).collect())
        }
    }
}
