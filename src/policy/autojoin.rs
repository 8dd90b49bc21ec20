//! Join channels we are invited to and introduce ourselves.

use std::sync::Arc;
use tracing::{info, warn};
use warden_core::correlator::{JOIN_TIMEOUT, Request};
use warden_core::{Connection, HandlerHandle, Line};

use crate::config::{InviteBehavior, SharedConfig};

fn greeting(nick: &str) -> String {
    format!(
        "Hi, I'm {nick}, I automatically get rid of bad IP-changing ban evading bots! \
         I need half-op (+h/%) to do this properly, thank you!"
    )
}

/// Handle `INVITE <me> <channel>` according to the configured behaviour.
pub fn register(conn: &Arc<Connection>, config: Arc<SharedConfig>) -> HandlerHandle {
    let weak = Arc::downgrade(conn);
    conn.handle("INVITE", move |line: &Line| {
        let Some(conn) = weak.upgrade() else {
            return;
        };
        let Some(channel) = line.arg(1).map(str::to_string) else {
            return;
        };
        let behavior = config.read(|c| c.autojoin_on_invite);
        if behavior == InviteBehavior::Ignore {
            info!(channel = %channel, by = %line.nick, "Ignoring invitation");
            return;
        }

        let mut request = Request::<()>::new();
        {
            let (done, me_conn, channel) = (request.completion(), Arc::clone(&conn), channel.clone());
            request.track(conn.handle("JOIN", move |line: &Line| {
                if me_conn.is_me(&line.nick) && line.target().eq_ignore_ascii_case(&channel) {
                    done.complete(());
                }
            }));
        }

        info!(channel = %channel, by = %line.nick, "Accepting invitation");
        conn.join(&channel);

        let config = Arc::clone(&config);
        tokio::spawn(async move {
            if request.wait(JOIN_TIMEOUT).await.is_err() {
                warn!(channel = %channel, "Timed out while waiting for us to join");
                return;
            }
            conn.privmsg(&channel, &greeting(&conn.me()));
            if behavior == InviteBehavior::Once {
                config.update(|c| {
                    c.autojoin_on_invite = InviteBehavior::Ignore;
                    true
                });
            }
        });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;
    use warden_core::ServerIdentity;

    fn setup(behavior: InviteBehavior) -> (
        Arc<Connection>,
        tokio::sync::mpsc::UnboundedReceiver<Line>,
        Arc<SharedConfig>,
    ) {
        let (conn, rx) = Connection::new(ServerIdentity::new("test:6667", false), "warden");
        let config = SharedConfig::unsaved(Config {
            autojoin_on_invite: behavior,
            ..Config::default()
        });
        register(&conn, Arc::clone(&config));
        (conn, rx, config)
    }

    #[tokio::test]
    async fn test_invite_once_joins_greets_then_ignores() {
        let (conn, mut rx, config) = setup(InviteBehavior::Once);

        conn.process(":bob!b@h INVITE warden #fresh".parse().unwrap())
            .await;
        assert_eq!(rx.recv().await.unwrap().to_string(), "JOIN #fresh");

        conn.process(":warden!w@h JOIN #fresh".parse().unwrap()).await;
        let greeting = rx.recv().await.unwrap().to_string();
        assert!(greeting.starts_with("PRIVMSG #fresh :Hi, I'm warden"), "{greeting}");

        for _ in 0..100 {
            if config.snapshot().autojoin_on_invite == InviteBehavior::Ignore {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(config.snapshot().autojoin_on_invite, InviteBehavior::Ignore);

        conn.process(":bob!b@h INVITE warden #another".parse().unwrap())
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invite_ignored() {
        let (conn, mut rx, _config) = setup(InviteBehavior::Ignore);
        conn.process(":bob!b@h INVITE warden #x".parse().unwrap()).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_timeout_skips_greeting() {
        let (conn, mut rx, config) = setup(InviteBehavior::Always);
        conn.process(":bob!b@h INVITE warden #banned".parse().unwrap())
            .await;
        assert_eq!(rx.recv().await.unwrap().to_string(), "JOIN #banned");

        tokio::time::sleep(JOIN_TIMEOUT + Duration::from_secs(1)).await;
        conn.process(":warden!w@h JOIN #banned".parse().unwrap()).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(config.snapshot().autojoin_on_invite, InviteBehavior::Always);
    }
}
