//! Outbound mode batching.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::Connection;

#[derive(Debug, Default)]
struct Pending {
    target: String,
    changes: Vec<(String, Vec<String>)>,
}

/// Coalesces mode changes for one target into as few `MODE` lines as the
/// server's `MODES=` limit allows.
///
/// Appending for a different target flushes what is buffered first; reaching
/// the limit flushes automatically. Call [`ModeChangeBuffer::flush`] to send
/// the remainder.
pub struct ModeChangeBuffer {
    conn: Arc<Connection>,
    max_modes: usize,
    pending: Mutex<Pending>,
}

impl ModeChangeBuffer {
    pub fn new(conn: Arc<Connection>, max_modes: u64) -> Self {
        Self {
            conn,
            max_modes: usize::try_from(max_modes).unwrap_or(usize::MAX).max(1),
            pending: Mutex::new(Pending::default()),
        }
    }

    /// A buffer sized from the connection's current capability table.
    pub fn for_connection(conn: &Arc<Connection>) -> Self {
        let max_modes = conn.isupport().modes_or_default();
        Self::new(Arc::clone(conn), max_modes)
    }

    pub fn max_modes(&self) -> usize {
        self.max_modes
    }

    /// Buffer one change, e.g. `append("#chan", "-b", &["*!*@host"])`.
    pub fn append<S: AsRef<str>>(&self, target: &str, mode: &str, args: &[S]) {
        let mut pending = self.pending.lock();

        if pending.target != target {
            self.flush_locked(&mut pending);
            pending.target = target.to_string();
        }

        pending.changes.push((
            mode.to_string(),
            args.iter().map(|a| a.as_ref().to_string()).collect(),
        ));

        if pending.changes.len() >= self.max_modes {
            self.flush_locked(&mut pending);
        }
    }

    /// Send everything buffered as a single `MODE` line.
    pub fn flush(&self) {
        let mut pending = self.pending.lock();
        self.flush_locked(&mut pending);
    }

    fn flush_locked(&self, pending: &mut Pending) {
        if pending.changes.is_empty() {
            return;
        }
        let changes = std::mem::take(&mut pending.changes);

        let mut modes = String::new();
        let mut args = Vec::new();
        for (mode, mode_args) in changes {
            modes.push_str(&mode);
            args.extend(mode_args);
        }
        self.conn.mode(&pending.target, &modes, &args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ServerIdentity;
    use crate::line::Line;
    use tokio::sync::mpsc;

    fn conn() -> (Arc<Connection>, mpsc::UnboundedReceiver<Line>) {
        Connection::new(ServerIdentity::new("irc.test:6667", false), "warden")
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Line>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(line.to_string());
        }
        out
    }

    #[test]
    fn test_batches_up_to_limit() {
        let (conn, mut rx) = conn();
        let buf = ModeChangeBuffer::new(conn, 4);
        for mask in ["*!*@one", "*!*@two", "*!*@three"] {
            buf.append("#chan", "-b", &[mask]);
            buf.append("#chan", "+b", &[mask]);
        }
        buf.flush();

        assert_eq!(
            drain(&mut rx),
            vec![
                "MODE #chan -b+b-b+b *!*@one *!*@one *!*@two *!*@two",
                "MODE #chan -b+b *!*@three *!*@three",
            ]
        );
    }

    #[test]
    fn test_default_limit_sends_each_change() {
        let (conn, mut rx) = conn();
        let buf = ModeChangeBuffer::for_connection(&conn);
        assert_eq!(buf.max_modes(), 1);
        buf.append("#chan", "-b", &["*!*@h"]);
        buf.append("#chan", "+b", &["*!*@h"]);
        buf.flush();
        assert_eq!(drain(&mut rx), vec!["MODE #chan -b *!*@h", "MODE #chan +b *!*@h"]);
    }

    #[test]
    fn test_target_switch_flushes() {
        let (conn, mut rx) = conn();
        let buf = ModeChangeBuffer::new(conn, 6);
        buf.append("#one", "-b", &["a!b@c"]);
        buf.append("#two", "-b", &["a!b@c"]);
        buf.flush();
        buf.flush();
        assert_eq!(drain(&mut rx), vec!["MODE #one -b a!b@c", "MODE #two -b a!b@c"]);
    }
}
