//! Cached tokens and resolved credentials

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::authenticator::InjectionPlace;

/// A token obtained from an exchange (or a formatted static value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedToken {
    /// Value ready for injection, e.g. `Bearer abc`.
    pub value: String,
    /// Raw token as returned by the exchange endpoint.
    pub raw: String,
    pub cached_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn bearer(raw: impl Into<String>, cached_at: DateTime<Utc>) -> Self {
        let raw = raw.into();
        Self {
            value: format!("Bearer {raw}"),
            raw,
            cached_at,
        }
    }

    /// A cached value is reused iff `life_time == 0` or it is younger than
    /// `life_time` seconds.
    pub fn is_valid(&self, life_time: u64, now: DateTime<Utc>) -> bool {
        if life_time == 0 {
            return true;
        }
        let age = now.signed_duration_since(self.cached_at);
        age < chrono::Duration::seconds(life_time as i64)
    }
}

/// Credential to inject into one outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub place: InjectionPlace,
    /// Header name or query parameter name.
    pub key: String,
    pub value: String,
}

/// Time source, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
#[cfg(test)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: std::sync::Mutex::new(Utc::now()),
        }
    }

    pub fn advance(&self, secs: i64) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::seconds(secs);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
