//! # Configuration
//!
//! pairlink uses the same minimal key/value configuration model as the
//! rest of the stack: string keys, string values, typed reads through a
//! snapshot.
//!
//! ```rust
//! use pairlink_core::config::{ConfigStore, SessionConfig};
//!
//! let mut cfg = ConfigStore::new();
//! cfg.set("session.pairing_timeout_secs", "30");
//!
//! let session = SessionConfig::from_snapshot(&cfg.snapshot());
//! assert_eq!(session.pairing_timeout.as_secs(), 30);
//! ```
//!
//! Environment overrides use a prefix and double underscores:
//! `PAIRLINK__SESSION__PAIRING_TIMEOUT_SECS=30` becomes
//! `session.pairing_timeout_secs`.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Default, Clone)]
pub struct ConfigStore {
    values: HashMap<String, String>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Layer environment variables starting with `prefix` on top of the
    /// current values.
    pub fn load_env(&mut self, prefix: &str) {
        self.load_vars(prefix, std::env::vars());
    }

    fn load_vars<I>(&mut self, prefix: &str, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped
                    .trim_start_matches("__")
                    .to_lowercase()
                    .replace("__", ".");
                if !normalized.is_empty() {
                    self.set(normalized, value);
                }
            }
        }
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            map: self.values.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    map: HashMap<String, String>,
}

impl ConfigSnapshot {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.trim().parse::<usize>().ok())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.trim().parse::<bool>().ok())
    }

    pub fn get_secs(&self, key: &str) -> Option<Duration> {
        self.get_u64(key).map(Duration::from_secs)
    }
}

/// Typed settings of the session lifecycle manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on the time a controller may spend before `ready`.
    pub pairing_timeout: Duration,
    /// Bound on each logout/destroy call to the client.
    pub client_call_timeout: Duration,
    /// How long an explicit stop waits for the tenant's task.
    pub stop_timeout: Duration,
    /// How long the conflict resolver waits for a stale tenant to stop.
    pub takeover_timeout: Duration,
    /// Keep the SessionRecord when the client reports a disconnect.
    pub retain_on_disconnect: bool,
    /// Buffer of each tenant's broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pairing_timeout: Duration::from_secs(120),
            client_call_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(15),
            takeover_timeout: Duration::from_secs(15),
            retain_on_disconnect: false,
            event_channel_capacity: 64,
        }
    }
}

impl SessionConfig {
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        let defaults = Self::default();
        Self {
            pairing_timeout: snapshot
                .get_secs("session.pairing_timeout_secs")
                .unwrap_or(defaults.pairing_timeout),
            client_call_timeout: snapshot
                .get_secs("session.client_call_timeout_secs")
                .unwrap_or(defaults.client_call_timeout),
            stop_timeout: snapshot
                .get_secs("session.stop_timeout_secs")
                .unwrap_or(defaults.stop_timeout),
            takeover_timeout: snapshot
                .get_secs("session.takeover_timeout_secs")
                .unwrap_or(defaults.takeover_timeout),
            retain_on_disconnect: snapshot
                .get_bool("session.retain_on_disconnect")
                .unwrap_or(defaults.retain_on_disconnect),
            event_channel_capacity: snapshot
                .get_usize("events.channel_capacity")
                .filter(|c| *c > 0)
                .unwrap_or(defaults.event_channel_capacity),
        }
    }

    pub fn with_pairing_timeout(mut self, timeout: Duration) -> Self {
        self.pairing_timeout = timeout;
        self
    }

    pub fn with_takeover_timeout(mut self, timeout: Duration) -> Self {
        self.takeover_timeout = timeout;
        self
    }

    pub fn with_retain_on_disconnect(mut self, retain: bool) -> Self {
        self.retain_on_disconnect = retain;
        self
    }
}
