//! Runtime-owned configuration.
//!
//! The bot edits its configuration while running (joined channels, invite
//! behaviour). Edits go through [`SharedConfig::update`], which persists the
//! result through the save callback given at construction.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{Config, ConfigError};

/// Persists a configuration snapshot.
pub type SaveFn = Box<dyn Fn(&Config) -> Result<(), ConfigError> + Send + Sync>;

pub struct SharedConfig {
    config: RwLock<Config>,
    save: SaveFn,
}

impl SharedConfig {
    pub fn new(config: Config, save: SaveFn) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(config),
            save,
        })
    }

    /// A configuration that is never written anywhere.
    pub fn unsaved(config: Config) -> Arc<Self> {
        Self::new(config, Box::new(|_| Ok(())))
    }

    pub fn snapshot(&self) -> Config {
        self.config.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&Config) -> R) -> R {
        f(&self.config.read())
    }

    /// Apply `edit`; if it reports a change, save the result.
    ///
    /// Save failures are logged, the in-memory change is kept.
    pub fn update(&self, edit: impl FnOnce(&mut Config) -> bool) -> bool {
        let mut config = self.config.write();
        if !edit(&mut config) {
            return false;
        }
        // Saved under the lock so snapshots hit the disk in order.
        match (self.save)(&config) {
            Ok(()) => debug!("Saved configuration"),
            Err(e) => warn!(error = %e, "Failed to save configuration"),
        }
        true
    }
}
