//! Core configuration types and loading.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use warden_core::nickserv::Credentials;
use warden_core::pattern::Pattern;
use warden_core::tempban::TempBanOptions;

use super::defaults::{default_channels, default_data_dir, default_ident, default_nick};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to parse legacy config: {0}")]
    Legacy(#[from] serde_json::Error),
}

/// How the bot reacts to INVITE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteBehavior {
    /// Accept the next invitation, then fall back to `ignore`.
    #[default]
    Once,
    Ignore,
    Always,
}

/// Bot configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Main nickname.
    #[serde(default = "default_nick")]
    pub nick: String,
    /// Ident (username).
    #[serde(default = "default_ident")]
    pub ident: String,
    /// Real name; empty uses the nick.
    #[serde(default)]
    pub name: String,
    /// Hostmask globs of users allowed to run admin commands.
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub autojoin_on_invite: InviteBehavior,
    /// Channels to join. Updated by the bot as it joins and leaves channels.
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    pub server: ServerConfig,
    #[serde(default)]
    pub nickserv: NickServConfig,
    #[serde(default)]
    pub tempban: TempBanConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nick: default_nick(),
            ident: default_ident(),
            name: String::new(),
            admins: Vec::new(),
            autojoin_on_invite: InviteBehavior::default(),
            channels: default_channels(),
            server: ServerConfig::default(),
            nickserv: NickServConfig::default(),
            tempban: TempBanConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Write configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The real name sent at registration.
    pub fn realname(&self) -> &str {
        if self.name.is_empty() {
            &self.nick
        } else {
            &self.name
        }
    }

    pub fn admin_patterns(&self) -> Vec<Pattern> {
        self.admins.iter().map(Pattern::new).collect()
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.nickserv.username.clone(),
            password: self.nickserv.password.clone(),
        }
    }

    pub fn tempban_options(&self) -> TempBanOptions {
        TempBanOptions {
            data_dir: PathBuf::from(&self.tempban.data_dir),
            old_hostmasks: self.tempban.old_hostmasks.iter().map(Pattern::new).collect(),
        }
    }
}

/// Server connection configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// `host:port` to connect to.
    pub address: String,
    /// TLS is not supported; validation rejects `true`.
    #[serde(default)]
    pub tls: bool,
    /// Server password sent with PASS (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// NickServ authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NickServConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Temporary ban storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempBanConfig {
    /// Directory holding the per-channel ban files.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Hostmask globs the bot used before; server bans they set are adopted.
    #[serde(default)]
    pub old_hostmasks: Vec<String>,
}

impl Default for TempBanConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            old_hostmasks: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            address = "irc.example.net:6667"
            "#,
        )
        .unwrap();
        assert_eq!(config.nick, "vpn");
        assert_eq!(config.ident, "vpn");
        assert_eq!(config.channels, vec!["#vpnbot"]);
        assert_eq!(config.autojoin_on_invite, InviteBehavior::Once);
        assert_eq!(config.tempban.data_dir, ".");
        assert_eq!(config.realname(), "vpn");
    }

    #[test]
    fn test_full_config() {
        let config: Config = toml::from_str(
            r##"
            nick = "warden"
            ident = "guard"
            name = "Channel Warden"
            admins = ["*!*@staff.example"]
            autojoin_on_invite = "always"
            channels = ["#a", "#b"]

            [server]
            address = "irc.example.net:6667"
            password = "letmein"

            [nickserv]
            username = "warden"
            password = "hunter2"

            [tempban]
            data_dir = "/var/lib/warden"
            old_hostmasks = ["vpn!*@*"]
            "##,
        )
        .unwrap();
        assert_eq!(config.autojoin_on_invite, InviteBehavior::Always);
        assert_eq!(config.server.password.as_deref(), Some("letmein"));
        assert_eq!(config.realname(), "Channel Warden");
        assert!(config.admin_patterns()[0].matches("x!y@staff.example"));
        assert_eq!(config.credentials().username, "warden");
        let options = config.tempban_options();
        assert_eq!(options.data_dir, PathBuf::from("/var/lib/warden"));
        assert!(options.old_hostmasks[0].matches("vpn!x@y"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.server.address = "irc.example.net:6667".to_string();
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_unknown_invite_behavior_rejected() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            autojoin_on_invite = "sometimes"
            [server]
            address = "irc.example.net:6667"
            "#,
        );
        assert!(result.is_err());
    }
}
