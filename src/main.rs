//! slirc-warden - IRC channel guard.
//!
//! Watches joins for ban-evading bots and removes them with temporary bans
//! that are lifted again when they expire.

mod config;
mod network;
mod policy;
mod telemetry;

use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, error, info, warn};
use warden_core::nickserv::NickServ;
use warden_core::tempban::{BanError, TempBanManager};
use warden_core::{Connection, ModeTracker, ServerIdentity};

use crate::config::{Config, LegacyConfig, SharedConfig, validate};
use crate::network::{Registration, connect, install_protocol, run};
use crate::policy::Context;
use crate::policy::channels::{ChannelRoster, join_on_welcome};
use crate::policy::detector::Detector;
use crate::telemetry::spans;

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "IRC channel guard")]
struct Args {
    /// Configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Convert a version 1 JSON configuration into the config file and exit.
    #[arg(long, value_name = "LEGACY_JSON")]
    migrate: Option<PathBuf>,

    /// Write a default configuration to the config file and exit.
    #[arg(long)]
    generate: bool,

    /// Adopt the current server bans of every configured channel, save them
    /// and exit. Nothing expires in this mode.
    #[arg(long)]
    dump_bans: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let args = Args::parse();

    if args.generate {
        Config::default().save(&args.config)?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    if let Some(legacy) = &args.migrate {
        let config = LegacyConfig::load(legacy)?.migrate();
        config.save(&args.config)?;
        info!(from = %legacy.display(), to = %args.config.display(), "Migrated configuration");
        if let Err(errors) = validate(&config) {
            for e in &errors {
                warn!(error = %e, "Migrated configuration needs editing");
            }
            std::process::exit(2);
        }
        return Ok(());
    }

    let config = Config::load(&args.config).map_err(|e| {
        error!(path = %args.config.display(), error = %e, "Failed to load config");
        e
    })?;
    if let Err(errors) = validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("configuration has {} error(s)", errors.len());
    }

    info!(
        server = %config.server.address,
        nick = %config.nick,
        dump_bans = args.dump_bans,
        "Starting slirc-warden"
    );

    let (conn, outbound) = Connection::new(
        ServerIdentity::new(&config.server.address, config.server.tls),
        &config.nick,
    );
    let modes = ModeTracker::register(&conn);
    let _protocol = install_protocol(&conn, &format!("warden/{}", env!("CARGO_PKG_VERSION")));

    if args.dump_bans && config.channels.is_empty() {
        anyhow::bail!("no channels configured to dump bans from");
    }
    let dumping = if args.dump_bans {
        Some(install_dump(&conn, &modes, &config))
    } else {
        None
    };
    let shared = if args.dump_bans {
        SharedConfig::unsaved(config.clone())
    } else {
        let path = args.config.clone();
        SharedConfig::new(config.clone(), Box::new(move |c: &Config| c.save(&path)))
    };

    let channels_config = Arc::clone(&shared);
    let _nickserv = NickServ::register(&conn, &modes, config.credentials(), move || {
        channels_config.read(|c| c.channels.clone())
    });
    let _welcome = config
        .nickserv
        .password
        .is_empty()
        .then(|| join_on_welcome(&conn, Arc::clone(&shared)));

    let _policy = if dumping.is_none() {
        Some(install_policy(&conn, &modes, &shared))
    } else {
        None
    };

    let registration = Registration::from_config(&shared.snapshot());
    let address = config.server.address.clone();
    let span = spans::connection(&address, &config.nick);
    let transport_conn = Arc::clone(&conn);
    let transport = async move {
        let stream = connect(&address).await?;
        run(stream, transport_conn, outbound, &registration).await
    }
    .instrument(span);

    match dumping {
        None => transport.await?,
        Some((_manager, mut done)) => {
            tokio::pin!(transport);
            tokio::select! {
                result = &mut transport => result?,
                Some(()) = done.recv() => {
                    info!("All channels dumped");
                    conn.quit("Ban dumping done.");
                    // Let the transport flush the QUIT and see the server close.
                    if let Err(e) = transport.await {
                        warn!(error = %e, "Connection error after dumping");
                    }
                }
            }
        }
    }
    Ok(())
}

/// Handlers kept alive for the life of the process.
struct Policy {
    _roster: Vec<warden_core::HandlerHandle>,
    _autojoin: warden_core::HandlerHandle,
    _detector: (Arc<Detector>, warden_core::HandlerHandle),
    _commands: warden_core::HandlerHandle,
}

fn install_policy(
    conn: &Arc<Connection>,
    modes: &Arc<ModeTracker>,
    shared: &Arc<SharedConfig>,
) -> Policy {
    let options = shared.read(|c| c.tempban_options());
    let roster = ChannelRoster::new();
    let ctx = Context {
        conn: Arc::clone(conn),
        tempban: TempBanManager::register(conn, modes, options),
        roster: Arc::clone(&roster),
        config: Arc::clone(shared),
    };
    Policy {
        _roster: roster.register(conn, Some(Arc::clone(shared))),
        _autojoin: policy::autojoin::register(conn, Arc::clone(shared)),
        _detector: Detector::register(ctx.clone()),
        _commands: policy::commands::register(ctx),
    }
}

/// Install the dumping ban manager. The receiver yields once every configured
/// channel has been reported.
fn install_dump(
    conn: &Arc<Connection>,
    modes: &Arc<ModeTracker>,
    config: &Config,
) -> (Arc<TempBanManager>, mpsc::Receiver<()>) {
    let (done_tx, done_rx) = mpsc::channel(1);
    let remaining: parking_lot::Mutex<HashSet<String>> = parking_lot::Mutex::new(
        config.channels.iter().map(|c| c.to_ascii_lowercase()).collect(),
    );

    let on_dumped = move |channel: &str, count: usize, err: Option<&BanError>| {
        match err {
            None => info!(channel = %channel, count, "Dumped bans"),
            Some(e) => warn!(channel = %channel, error = %e, "Couldn't dump bans"),
        }
        let mut remaining = remaining.lock();
        remaining.remove(&channel.to_ascii_lowercase());
        if remaining.is_empty() {
            let _ = done_tx.try_send(());
        }
    };
    let manager = TempBanManager::register_dump(conn, modes, config.tempban_options(), on_dumped);
    (manager, done_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["warden", "--config", "bot.toml", "--dump-bans"]);
        assert_eq!(args.config, PathBuf::from("bot.toml"));
        assert!(args.dump_bans);
        assert!(args.migrate.is_none());

        let args = Args::parse_from(["warden", "--migrate", "old.json"]);
        assert_eq!(args.config, PathBuf::from("config.toml"));
        assert_eq!(args.migrate, Some(PathBuf::from("old.json")));
    }
}
