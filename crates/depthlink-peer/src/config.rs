//! Session configuration.
//!
//! [`SessionConfig`] is plain data with defaults matching the stock sender:
//! the five default hosts on port 9999, head-of-list retry every 3 s, 5 s
//! connect timeout, 10 s I/O timeout and a 100 ms frame interval. It can be
//! loaded from JSON; durations are written as `"500ms"`, `"3s"` or `"1m"`.

use std::time::Duration;

use depthlink_capture::DEFAULT_MIN_INTERVAL;
use depthlink_transport::{Endpoint, KeepaliveConfig, DEFAULT_HOSTS, DEFAULT_PORT};
use serde::{Deserialize, Serialize};

use crate::connection::{ConnectionConfig, RetryPolicy};
use crate::error::{PeerError, Result};

/// Configuration for a [`StreamingSession`](crate::StreamingSession).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Candidate hosts in priority order, `host` or `host:port`.
    pub hosts: Vec<String>,
    /// Port for hosts that do not name one.
    pub port: u16,
    /// Which candidate to retry after a failed attempt.
    pub retry_policy: RetryPolicy,
    /// Pause between a failure and the next attempt.
    #[serde(with = "duration_str")]
    pub backoff: Duration,
    #[serde(with = "duration_str")]
    pub connect_timeout: Duration,
    /// Per-read/per-write deadline on the live connection.
    #[serde(with = "duration_str")]
    pub io_timeout: Duration,
    /// Minimum spacing between admitted frames.
    #[serde(with = "duration_str")]
    pub min_interval: Duration,
    /// Enable TCP keepalive probes on the live connection.
    pub keepalive: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hosts: DEFAULT_HOSTS.iter().map(|h| (*h).to_string()).collect(),
            port: DEFAULT_PORT,
            retry_policy: RetryPolicy::default(),
            backoff: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(10),
            min_interval: DEFAULT_MIN_INTERVAL,
            keepalive: true,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(PeerError::InvalidConfig("no candidate hosts".into()));
        }
        if self.connect_timeout.is_zero() || self.io_timeout.is_zero() {
            return Err(PeerError::InvalidConfig("timeouts must be non-zero".into()));
        }
        if self.backoff.is_zero() {
            return Err(PeerError::InvalidConfig("backoff must be non-zero".into()));
        }
        self.candidates().map(|_| ())
    }

    /// Parsed candidate endpoints, in priority order.
    pub fn candidates(&self) -> Result<Vec<Endpoint>> {
        self.hosts
            .iter()
            .map(|h| Endpoint::parse_with_default_port(h, self.port).map_err(PeerError::from))
            .collect()
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
            backoff: self.backoff,
            retry_policy: self.retry_policy,
            keepalive: self.keepalive.then(KeepaliveConfig::default),
        }
    }
}

/// Parse a duration such as `250ms`, `3s`, `1.5s` or `2m`. A bare number is
/// taken as milliseconds.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let s = input.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    if let Ok(whole) = number.parse::<u64>() {
        match unit.trim() {
            "" | "ms" => return Ok(Duration::from_millis(whole)),
            "s" => return Ok(Duration::from_secs(whole)),
            "m" => return Ok(Duration::from_secs(whole.saturating_mul(60))),
            _ => {}
        }
    }
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration `{input}`"))?;

    let seconds = match unit.trim() {
        "" | "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        other => return Err(format!("unknown duration unit `{other}` in `{input}`")),
    };
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid duration `{input}`: {e}"))
}

/// Render a duration the way [`parse_duration`] reads it.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{millis}ms")
    }
}

pub(crate) mod duration_str {
    use std::time::Duration;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a duration string like \"3s\" or a number of milliseconds")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
                super::parse_duration(v).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
                Ok(Duration::from_millis(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
                u64::try_from(v)
                    .map(Duration::from_millis)
                    .map_err(|_| E::custom("duration cannot be negative"))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}
