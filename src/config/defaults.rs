//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

pub fn default_nick() -> String {
    "vpn".to_string()
}

pub fn default_ident() -> String {
    "vpn".to_string()
}

pub fn default_channels() -> Vec<String> {
    vec!["#vpnbot".to_string()]
}

// =============================================================================
// Temporary Ban Defaults
// =============================================================================

pub fn default_data_dir() -> String {
    ".".to_string()
}
