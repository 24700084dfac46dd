//! Engine registry: engine name -> version store.
//!
//! The registry is assembled once at startup with a [`RegistryBuilder`] and
//! is immutable afterwards. A process-wide instance can be installed with
//! [`install`] and read anywhere through [`global`].

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use log::{debug, info};

use crate::config::StoreConfig;
use crate::engine::{GraphDbEngine, SqliteFsEngine, StorageEngine};
use crate::error::{VcsError, VcsResult};
use crate::store::VersionStore;

/// builds an engine from the store configuration
pub type EngineFactory = fn(&StoreConfig) -> VcsResult<Arc<dyn StorageEngine>>;

/// every engine this crate ships with
pub const BUILTIN_ENGINES: [(&str, EngineFactory); 2] = [
    (GraphDbEngine::NAME, GraphDbEngine::factory),
    (SqliteFsEngine::NAME, SqliteFsEngine::factory),
];

/// Collects engine factories before the registry is built.
pub struct RegistryBuilder {
    config: StoreConfig,
    factories: BTreeMap<String, EngineFactory>,
}

impl RegistryBuilder {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            factories: BTreeMap::new(),
        }
    }

    /// add an engine (`EngineAlreadyRegistered` if the name is taken)
    pub fn register(mut self, name: impl Into<String>, factory: EngineFactory) -> VcsResult<Self> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(VcsError::EngineAlreadyRegistered(name));
        }
        self.factories.insert(name, factory);
        Ok(self)
    }

    /// add every built-in engine the configuration enables
    pub fn with_builtin_engines(mut self) -> VcsResult<Self> {
        for (name, factory) in BUILTIN_ENGINES {
            if self.config.engine_enabled(name) {
                self = self.register(name, factory)?;
            }
        }
        Ok(self)
    }

    /// open every registered engine
    pub fn build(self) -> VcsResult<Registry> {
        for wanted in &self.config.engines {
            if !self.factories.contains_key(wanted) {
                return Err(VcsError::Config(format!("unknown engine '{}'", wanted)));
            }
        }

        let mut stores = BTreeMap::new();
        for (name, factory) in self.factories {
            let engine = factory(&self.config)?;
            debug!("registered engine {}", name);
            stores.insert(name, VersionStore::new(engine, self.config.retry));
        }

        info!(
            "engines ready: {}",
            stores.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        Ok(Registry { stores })
    }
}

/// Immutable engine name -> store table.
#[derive(Debug)]
pub struct Registry {
    stores: BTreeMap<String, VersionStore>,
}

impl Registry {
    /// a registry with every built-in engine the configuration enables
    pub fn with_defaults(config: StoreConfig) -> VcsResult<Self> {
        RegistryBuilder::new(config).with_builtin_engines()?.build()
    }

    /// the store for `name`
    pub fn get(&self, name: &str) -> VcsResult<&VersionStore> {
        self.stores
            .get(name)
            .ok_or_else(|| VcsError::EngineNotFound(name.to_string()))
    }

    /// registered engine names, sorted
    pub fn list(&self) -> Vec<&str> {
        self.stores.keys().map(String::as_str).collect()
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// install the process-wide registry; only the first call succeeds
pub fn install(registry: Registry) -> VcsResult<&'static Registry> {
    GLOBAL
        .set(registry)
        .map_err(|_| VcsError::RegistryAlreadyInstalled)?;
    global()
}

/// the process-wide registry
pub fn global() -> VcsResult<&'static Registry> {
    GLOBAL.get().ok_or(VcsError::RegistryNotInstalled)
}
