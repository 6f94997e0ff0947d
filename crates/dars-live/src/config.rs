use std::time::Duration;

use tracing::warn;

/// Client-side knobs shared by every consumer mounted from one context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveConfig {
    /// A snapshot read that has not resolved by then puts the list in `Failed`.
    pub snapshot_timeout: Duration,
    /// Same for opening a subscription or joining a presence channel.
    pub connect_timeout: Duration,
    /// How often time-windowed notifications are re-evaluated.
    pub recheck_interval: Duration,
    /// Change records buffered per subscription before back-pressure.
    pub event_buffer: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            snapshot_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            recheck_interval: Duration::from_secs(30),
            event_buffer: 256,
        }
    }
}

impl LiveConfig {
    /// Defaults overridden by `DARS_SNAPSHOT_TIMEOUT_SECS`,
    /// `DARS_CONNECT_TIMEOUT_SECS` and `DARS_RECHECK_INTERVAL_SECS`.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(secs) = secs_var(&get, "DARS_SNAPSHOT_TIMEOUT_SECS") {
            config.snapshot_timeout = secs;
        }
        if let Some(secs) = secs_var(&get, "DARS_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = secs;
        }
        if let Some(secs) = secs_var(&get, "DARS_RECHECK_INTERVAL_SECS") {
            config.recheck_interval = secs;
        }
        config
    }
}

fn secs_var(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = get(key)?;
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => {
            warn!("ignoring {}={:?}, expected a positive number of seconds", key, raw);
            None
        }
        Ok(secs) => Some(Duration::from_secs(secs)),
    }
}
