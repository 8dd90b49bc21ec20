//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig, NickServConfig)
//! - [`defaults`]: Serde default value functions
//! - [`validation`]: Startup validation
//! - [`legacy`]: Migration from the version 1 JSON configuration
//! - [`shared`]: Runtime-owned configuration with an explicit save callback

mod defaults;
mod legacy;
mod shared;
mod types;
mod validation;

pub use legacy::LegacyConfig;
pub use shared::{SaveFn, SharedConfig};
pub use types::{Config, ConfigError, InviteBehavior, NickServConfig, ServerConfig, TempBanConfig};
pub use validation::{ValidationError, validate};
