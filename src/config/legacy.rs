//! Version 1 JSON configuration and its migration.

use serde::Deserialize;
use std::path::Path;

use super::types::{Config, ConfigError, InviteBehavior, NickServConfig, ServerConfig};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyNetwork {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyIrc {
    #[serde(default)]
    pub nick: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default)]
    pub ident: String,
    #[serde(default)]
    pub realname: String,
    #[serde(default)]
    pub channels: Vec<String>,
    /// Single admin hostmask.
    #[serde(default)]
    pub owner: String,
    #[serde(rename = "accept-invites")]
    pub accept_invites: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyNickServ {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
}

/// Version 1 configuration layout. Unknown sections such as the old
/// blacklist settings are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyConfig {
    #[serde(default)]
    pub network: LegacyNetwork,
    #[serde(default)]
    pub irc: LegacyIrc,
    #[serde(default)]
    pub nickserv: LegacyNickServ,
}

impl LegacyConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Convert to the current format. Fields without a version 1
    /// counterpart keep their defaults.
    pub fn migrate(self) -> Config {
        let autojoin_on_invite = match self.irc.accept_invites {
            None => InviteBehavior::Once,
            Some(true) => InviteBehavior::Always,
            Some(false) => InviteBehavior::Ignore,
        };
        let admins = if self.irc.owner.is_empty() {
            Vec::new()
        } else {
            vec![self.irc.owner]
        };

        Config {
            nick: self.irc.nick,
            ident: self.irc.ident,
            name: self.irc.realname,
            admins,
            autojoin_on_invite,
            channels: self.irc.channels,
            server: ServerConfig {
                address: format!("{}:{}", self.network.host, self.network.port),
                tls: false,
                password: Some(self.irc.pass).filter(|p| !p.is_empty()),
            },
            nickserv: NickServConfig {
                username: self.nickserv.user,
                password: self.nickserv.pass,
            },
            ..Config::default()
        }
    }
}
