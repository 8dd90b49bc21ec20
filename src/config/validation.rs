//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("nick is required")]
    MissingNick,
    #[error("ident is required")]
    MissingIdent,
    #[error("server.address is required")]
    MissingServerAddress,
    #[error("server.address must be host:port, got '{0}'")]
    InvalidServerAddress(String),
    #[error("server.tls is not supported, connect to a plaintext port")]
    TlsUnsupported,
    #[error("channel name must start with '#' or '&', got '{0}'")]
    InvalidChannel(String),
    #[error("admin hostmask must not be empty")]
    EmptyAdminMask,
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // Required fields
    if config.nick.is_empty() {
        errors.push(ValidationError::MissingNick);
    }
    if config.ident.is_empty() {
        errors.push(ValidationError::MissingIdent);
    }

    // Server address
    let address = &config.server.address;
    if address.is_empty() {
        errors.push(ValidationError::MissingServerAddress);
    } else if !address
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
    {
        errors.push(ValidationError::InvalidServerAddress(address.clone()));
    }
    if config.server.tls {
        errors.push(ValidationError::TlsUnsupported);
    }

    for channel in &config.channels {
        if !channel.starts_with(['#', '&']) {
            errors.push(ValidationError::InvalidChannel(channel.clone()));
        }
    }
    if config.admins.iter().any(|mask| mask.trim().is_empty()) {
        errors.push(ValidationError::EmptyAdminMask);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
