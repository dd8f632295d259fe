use derive_ex::Ex;
use serde::{Deserialize, Serialize};

use crate::{Domain, DomainConfig, DomainRunner, DomainThread, Result};


/// Settings of the conventional domain pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Ex)]
#[derive_ex(Default)]
#[default(Self::named("view", "model"))]
#[serde(default)]
pub struct DomainsConfig {
    pub view: DomainConfig,
    pub model: DomainConfig,
}

impl DomainsConfig {
    /// Default configurations with the given domain names.
    pub fn named(view: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            view: DomainConfig::new(view),
            model: DomainConfig::new(model),
        }
    }
}

/// The two domains of an application: `view`, bound to the thread that drives the user
/// interface, and `model`, running on its own thread.
///
/// Both are plain [`Domain`] handles meant to be passed down explicitly.
#[derive(Debug, Clone)]
pub struct Domains {
    pub view: Domain,
    pub model: Domain,
}

impl Domains {
    /// Creates both domains, unbound.
    pub fn new() -> Self {
        Self::with_config(DomainsConfig::default())
    }
    pub fn with_config(config: DomainsConfig) -> Self {
        Self {
            view: Domain::with_config(config.view),
            model: Domain::with_config(config.model),
        }
    }

    /// Binds `view` to the calling thread and starts `model` on a thread of its own.
    ///
    /// Can succeed only once per pair.
    pub fn initialize(&self) -> Result<(DomainRunner, DomainThread)> {
        let view = self.view.bind_current_thread()?;
        let model = self.model.spawn()?;
        Ok((view, model))
    }
}

impl Default for Domains {
    fn default() -> Self {
        Self::new()
    }
}
