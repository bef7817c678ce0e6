//! Real-time-data submodules and the registry that dispatches auction events
//! to them.
//!
//! Submodules are registered once; [`RtdRegistry::init_all`] then activates
//! the ones listed under `[[rtd.data_providers]]`, in configuration order.

use std::sync::Arc;

use error_stack::Report;

use crate::bidder::BidResponse;
use crate::consent::ConsentData;
use crate::error::AdapterError;
use crate::settings::{RtdModuleConfig, RtdSettings, Settings};

pub mod creative_guard;

/// Contract for a real-time-data submodule.
pub trait RtdSubmodule: Send + Sync {
    /// Name matched against `rtd.data_providers[].name`.
    fn name(&self) -> &'static str;

    /// Validate config and prepare the module. Returning `false` keeps the
    /// module out of the auction.
    fn init(&self, config: &RtdModuleConfig, consent: &ConsentData) -> bool;

    /// Called for every bid before it enters the auction.
    fn on_bid_response(
        &self,
        _bid: &mut BidResponse,
        _config: &RtdModuleConfig,
        _consent: &ConsentData,
    ) {
    }
}

struct ActiveSubmodule {
    module: Arc<dyn RtdSubmodule>,
    config: RtdModuleConfig,
}

#[derive(Default)]
pub struct RtdRegistry {
    submodules: Vec<Arc<dyn RtdSubmodule>>,
    active: Vec<ActiveSubmodule>,
}

impl RtdRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the built-in submodules and initialize those configured in
    /// `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if two built-in submodules share a name.
    pub fn from_settings(
        settings: &Settings,
        consent: &ConsentData,
    ) -> Result<Self, Report<AdapterError>> {
        let mut registry = Self::new();
        registry.submodule(Arc::new(creative_guard::CreativeGuard::new()))?;
        registry.init_all(&settings.rtd, consent);
        Ok(registry)
    }

    /// Register a submodule so configuration can activate it.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Registry`] if the name is already taken.
    pub fn submodule(&mut self, module: Arc<dyn RtdSubmodule>) -> Result<(), Report<AdapterError>> {
        let name = module.name();
        if self.submodules.iter().any(|m| m.name() == name) {
            return Err(Report::new(AdapterError::Registry {
                message: format!("RTD submodule '{name}' is already registered"),
            }));
        }
        log::info!("Registered RTD submodule '{name}'");
        self.submodules.push(module);
        Ok(())
    }

    /// Initialize every configured provider, keeping those whose `init`
    /// succeeds. Returns how many are active.
    pub fn init_all(&mut self, settings: &RtdSettings, consent: &ConsentData) -> usize {
        self.active.clear();
        for config in &settings.data_providers {
            let Some(module) = self.submodules.iter().find(|m| m.name() == config.name) else {
                log::warn!("RTD provider '{}' is configured but not registered", config.name);
                continue;
            };
            if self.active.iter().any(|a| a.config.name == config.name) {
                log::warn!("RTD provider '{}' configured twice, ignoring repeat", config.name);
                continue;
            }
            if module.init(config, consent) {
                log::info!("RTD provider '{}' initialized", config.name);
                self.active.push(ActiveSubmodule {
                    module: Arc::clone(module),
                    config: config.clone(),
                });
            } else {
                log::warn!("RTD provider '{}' failed to initialize", config.name);
            }
        }
        self.active.len()
    }

    /// Run every active submodule over `bid`.
    pub fn on_bid_response(&self, bid: &mut BidResponse, consent: &ConsentData) {
        for active in &self.active {
            active.module.on_bid_response(bid, &active.config, consent);
        }
    }

    #[must_use]
    pub fn is_active(&self, name: &str) -> bool {
        self.active.iter().any(|a| a.config.name == name)
    }

    /// Active providers the host should wait for before starting the auction.
    #[must_use]
    pub fn blocking_providers(&self) -> Vec<&str> {
        self.active
            .iter()
            .filter(|a| a.config.wait_for_it)
            .map(|a| a.config.name.as_str())
            .collect()
    }
}
