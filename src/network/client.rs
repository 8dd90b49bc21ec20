//! Client transport: one TCP stream framed into lines.
//!
//! ```text
//!   socket ──LinesCodec──▶ Line::from_str ──▶ Connection::process (awaited)
//!   socket ◀──LinesCodec── Line::to_string ◀── outbound queue
//! ```
//!
//! Inbound lines are processed one at a time; the next line is not read until
//! every foreground handler for the current one has finished.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, trace, warn};
use warden_core::{Connection, Line};

use crate::config::Config;

/// Longest accepted line: 8191 bytes of tags plus a 512 byte message.
pub const MAX_LINE_LENGTH: usize = 8191 + 512;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] LinesCodecError),
}

/// What we send to register with the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub nick: String,
    pub ident: String,
    pub realname: String,
    pub password: Option<String>,
}

impl Registration {
    pub fn from_config(config: &Config) -> Self {
        Self {
            nick: config.nick.clone(),
            ident: config.ident.clone(),
            realname: config.realname().to_string(),
            password: config.server.password.clone().filter(|p| !p.is_empty()),
        }
    }

    fn lines(&self) -> Vec<Line> {
        let mut lines = Vec::with_capacity(3);
        if let Some(password) = &self.password {
            lines.push(Line::new("PASS", [password.as_str()]));
        }
        lines.push(Line::new("NICK", [self.nick.as_str()]));
        lines.push(Line::new(
            "USER",
            [self.ident.as_str(), "0", "*", self.realname.as_str()],
        ));
        lines
    }
}

pub async fn connect(address: &str) -> Result<TcpStream, NetworkError> {
    info!(address = %address, "Connecting");
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Register, then pump lines both ways until the server closes the stream.
pub async fn run<S>(
    stream: S,
    conn: Arc<Connection>,
    mut outbound: mpsc::UnboundedReceiver<Line>,
    registration: &Registration,
) -> Result<(), NetworkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    for line in registration.lines() {
        framed.send(line.to_string()).await?;
    }

    loop {
        tokio::select! {
            inbound = framed.next() => {
                match inbound {
                    Some(Ok(raw)) => {
                        trace!(raw = %raw, "<<");
                        match raw.parse::<Line>() {
                            Ok(line) => conn.process(line).await,
                            Err(e) => debug!(raw = %raw, error = %e, "Ignoring unparsable line"),
                        }
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!("Discarding overlong line");
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        info!("Server closed the connection");
                        return Ok(());
                    }
                }
            }

            Some(line) = outbound.recv() => {
                let raw = line.to_string();
                trace!(raw = %raw, ">>");
                framed.send(raw).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::ServerIdentity;

    #[tokio::test]
    async fn test_registers_and_round_trips_lines() {
        let (client, server) = tokio::io::duplex(4096);
        let (conn, outbound) = Connection::new(ServerIdentity::new("test:6667", false), "warden");
        let registration = Registration {
            nick: "warden".to_string(),
            ident: "guard".to_string(),
            realname: "Channel Warden".to_string(),
            password: Some("letmein".to_string()),
        };

        let task_conn = Arc::clone(&conn);
        let task =
            tokio::spawn(async move { run(client, task_conn, outbound, &registration).await });

        let mut server = Framed::new(server, LinesCodec::new());
        assert_eq!(server.next().await.unwrap().unwrap(), "PASS letmein");
        assert_eq!(server.next().await.unwrap().unwrap(), "NICK warden");
        assert_eq!(
            server.next().await.unwrap().unwrap(),
            "USER guard 0 * :Channel Warden"
        );

        let handler_conn = Arc::clone(&conn);
        conn.handle("001", move |_| handler_conn.join("#chan"));
        server
            .send(":irc.example.net 001 warden_ :Welcome".to_string())
            .await
            .unwrap();
        assert_eq!(server.next().await.unwrap().unwrap(), "JOIN #chan");
        assert_eq!(conn.me(), "warden_");

        drop(server);
        assert!(task.await.unwrap().is_ok());
    }

    #[test]
    fn test_registration_without_password() {
        let mut config = Config::default();
        config.server.password = Some(String::new());
        let lines: Vec<String> = Registration::from_config(&config)
            .lines()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(lines, vec!["NICK vpn", "USER vpn 0 * vpn"]);
    }
}
