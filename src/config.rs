use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, TimeControlError};
use crate::game::clock::TimeControl;

/// Server settings, read from `CHESS_SYNC_*` environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Applied when a `create` message carries no time control
    pub default_time_control: Option<TimeControl>,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    /// A session with nobody connected for this long is torn down
    pub idle_session_timeout: Duration,
    pub clock_tick: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            default_time_control: None,
            heartbeat_interval: Duration::from_secs(20),
            client_timeout: Duration::from_secs(40),
            idle_session_timeout: Duration::from_secs(600),
            clock_tick: Duration::from_millis(250),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(bind) = lookup("CHESS_SYNC_BIND") {
            config.bind_addr = bind;
        }

        let minutes: Option<u64> = parse(&lookup, "CHESS_SYNC_START_MINUTES")?;
        let increment: Option<u64> = parse(&lookup, "CHESS_SYNC_INCREMENT_SECONDS")?;
        config.default_time_control =
            TimeControl::from_minutes(minutes, increment).map_err(|e| match e {
                TimeControlError::StartTooLong(value) => ConfigError::Invalid {
                    key: "CHESS_SYNC_START_MINUTES",
                    value: value.to_string(),
                },
                TimeControlError::IncrementTooLong(value) => ConfigError::Invalid {
                    key: "CHESS_SYNC_INCREMENT_SECONDS",
                    value: value.to_string(),
                },
            })?;

        if let Some(secs) = parse_positive(&lookup, "CHESS_SYNC_HEARTBEAT_SECS")? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "CHESS_SYNC_CLIENT_TIMEOUT_SECS")? {
            config.client_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "CHESS_SYNC_IDLE_SESSION_SECS")? {
            config.idle_session_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_positive(&lookup, "CHESS_SYNC_CLOCK_TICK_MS")? {
            config.clock_tick = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

/// Reconnection policy of a participant.
///
/// Attempt `n` waits `initial_backoff * 2^(n-1)` before the next one, never
/// longer than `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// An attempt fails if no sync arrives within this window
    pub sync_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            sync_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

/// Interval settings; zero would spin the timer
fn parse_positive(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match parse(lookup, key)? {
        Some(0) => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
        }),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn reads_time_control_and_bind() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("CHESS_SYNC_BIND", "0.0.0.0:9000"),
            ("CHESS_SYNC_START_MINUTES", "5"),
            ("CHESS_SYNC_INCREMENT_SECONDS", "3"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        let control = config.default_time_control.unwrap();
        assert_eq!(control.initial, Duration::from_secs(300));
        assert_eq!(control.increment, Duration::from_secs(3));
    }

    #[test]
    fn zero_intervals_are_refused() {
        for key in ["CHESS_SYNC_HEARTBEAT_SECS", "CHESS_SYNC_CLOCK_TICK_MS"] {
            let err = ServerConfig::from_lookup(lookup(&[(key, "0")])).unwrap_err();
            assert_eq!(err, ConfigError::Invalid { key, value: "0".to_string() });
        }
    }

    #[test]
    fn oversized_default_time_control_is_refused() {
        let err = ServerConfig::from_lookup(lookup(&[
            ("CHESS_SYNC_START_MINUTES", "5"),
            ("CHESS_SYNC_INCREMENT_SECONDS", "18446744073709551615"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "CHESS_SYNC_INCREMENT_SECONDS", .. }));
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=6).map(|n| policy.backoff(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 8000]);
        assert_eq!(policy.backoff(40), Duration::from_secs(8));
    }

    #[test]
    fn rejects_garbage_numbers() {
        let err = ServerConfig::from_lookup(lookup(&[("CHESS_SYNC_CLOCK_TICK_MS", "fast")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "CHESS_SYNC_CLOCK_TICK_MS",
                value: "fast".to_string()
            }
        );
    }
}
