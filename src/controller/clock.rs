//! Source of condition timestamps
//!
//! `lastTransitionTime` on release conditions comes from the `Clock` in the
//! coordinator `Context`; tests pin it with `MockClock`. Condition timestamps
//! have whole-second resolution, so a pinned clock only keeps seconds.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current time as seen by the coordinator
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// RFC 3339 `lastTransitionTime`, e.g. `2024-01-01T00:00:00Z`
pub fn condition_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Clock pinned to a second, moved only by the test
#[cfg(test)]
pub struct MockClock {
    unix_secs: std::sync::atomic::AtomicI64,
}

#[cfg(test)]
impl MockClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            unix_secs: std::sync::atomic::AtomicI64::new(now.timestamp()),
        }
    }

    #[allow(dead_code)]
    pub fn advance(&self, secs: i64) {
        self.unix_secs
            .fetch_add(secs, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.unix_secs.load(std::sync::atomic::Ordering::SeqCst);
        DateTime::from_timestamp(secs, 0).unwrap_or_default()
    }
}
