use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::mode::{Hostmask, split_hostmask};

/// A ban with an absolute expiration time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemporaryBan {
    /// Nick of the banned user, empty for hostmask-only bans.
    pub nick: String,
    pub hostmask: String,
    /// Who issued the ban.
    pub source: String,
    pub reason: String,
    pub ban_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
}

impl TemporaryBan {
    /// A ban starting now and lasting `duration`.
    pub fn new(
        nick: impl Into<String>,
        hostmask: impl Into<String>,
        source: impl Into<String>,
        reason: impl Into<String>,
        duration: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            nick: nick.into(),
            hostmask: hostmask.into(),
            source: source.into(),
            reason: reason.into(),
            ban_time: now,
            expiration_time: now + duration,
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.expiration_time - self.ban_time
    }

    /// Time left until expiry; negative once expired.
    pub fn remaining(&self) -> Duration {
        self.expiration_time - Utc::now()
    }

    pub fn is_expired(&self) -> bool {
        self.remaining() <= Duration::zero()
    }

    /// The parts of the banned hostmask.
    pub fn target_user(&self) -> Hostmask {
        split_hostmask(&self.hostmask)
    }
}

/// Relative, human-readable form of `time` as seen from `now`,
/// e.g. `2 days from now` or `5 minutes ago`.
pub fn humanize(time: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = time - now;
    let (span, suffix) = if delta < Duration::zero() {
        (-delta, "ago")
    } else {
        (delta, "from now")
    };

    let secs = span.num_seconds();
    let (amount, unit) = match secs {
        0 => return "now".to_string(),
        1..60 => (secs, "second"),
        60..3_600 => (secs / 60, "minute"),
        3_600..86_400 => (secs / 3_600, "hour"),
        86_400..2_592_000 => (secs / 86_400, "day"),
        2_592_000..31_536_000 => (secs / 2_592_000, "month"),
        _ => (secs / 31_536_000, "year"),
    };

    if amount == 1 {
        format!("1 {unit} {suffix}")
    } else {
        format!("{amount} {unit}s {suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ban_durations() {
        let ban = TemporaryBan::new("bob", "*!*@h", "warden", "spam", Duration::hours(48));
        assert_eq!(ban.total_duration(), Duration::hours(48));
        assert!(!ban.is_expired());
        assert_eq!(ban.target_user().host, "h");
    }

    #[test]
    fn test_humanize() {
        let now = Utc::now();
        assert_eq!(humanize(now, now), "now");
        assert_eq!(humanize(now + Duration::days(2), now), "2 days from now");
        assert_eq!(humanize(now + Duration::hours(1), now), "1 hour from now");
        assert_eq!(humanize(now - Duration::minutes(5), now), "5 minutes ago");
        assert_eq!(humanize(now + Duration::seconds(30), now), "30 seconds from now");
    }
}
