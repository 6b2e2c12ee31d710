//! Transmission configuration.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CAT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cat/config.toml
//!   3. ~/.config/cat/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Transmission parameters shared by client and server connections
/// (`ascon/connection/config.go` upstream), plus the MTU and the
/// server-only inactivity timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransmissionConfig {
    /// Max datagram size the coder will target, §6 default 1472.
    pub mtu: u16,
    /// CoAP congestion-control concurrency bound, §6 default 1.
    pub n_start: u32,
    /// Retransmit interval base, §6 default 2s.
    #[serde(with = "duration_secs")]
    pub ack_timeout: Duration,
    /// Max retransmissions before a confirmable exchange gives up, §6 default 4.
    pub max_retransmit: u32,
    /// Server-side: close a connection after this much silence. §6 default 16s.
    /// `None` on the client (`NilInactivityMonitor` upstream).
    #[serde(with = "option_duration_secs")]
    pub inactivity_timeout: Option<Duration>,
    /// RFC 7252 §4.8.2 Exchange Lifetime — response-cache TTL. §6 default 247s.
    #[serde(with = "duration_secs")]
    pub exchange_lifetime: Duration,
    /// Client dial timeout, §6 default 3s.
    #[serde(with = "duration_secs")]
    pub dial_timeout: Duration,
    /// Handshake round-trip timeout, §6 default 1s.
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,
    /// Bound on the channel that queues decoded requests for the user handler.
    pub received_message_queue_size: usize,
}

impl TransmissionConfig {
    /// Mirrors `DefaultServerConfig`.
    pub fn server_defaults() -> Self {
        TransmissionConfig {
            inactivity_timeout: Some(Duration::from_secs(16)),
            ..Self::shared_defaults()
        }
    }

    /// Mirrors `DefaultClientConfig` (`NilInactivityMonitor`).
    pub fn client_defaults() -> Self {
        TransmissionConfig {
            inactivity_timeout: None,
            ..Self::shared_defaults()
        }
    }

    fn shared_defaults() -> Self {
        TransmissionConfig {
            mtu: 1472,
            n_start: 1,
            ack_timeout: Duration::from_secs(2),
            max_retransmit: 4,
            inactivity_timeout: None,
            exchange_lifetime: Duration::from_secs(247),
            dial_timeout: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(1),
            received_message_queue_size: 16,
        }
    }
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self::server_defaults()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs_f64().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        d.map(|d| d.as_secs_f64()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs: Option<f64> = Option::deserialize(d)?;
        Ok(secs.map(Duration::from_secs_f64))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}

impl TransmissionConfig {
    /// Load server-side config: env vars → file → defaults.
    pub fn load_server() -> Result<Self, ConfigError> {
        Self::load(Self::server_defaults())
    }

    /// Load client-side config: env vars → file → defaults.
    pub fn load_client() -> Result<Self, ConfigError> {
        Self::load(Self::client_defaults())
    }

    fn load(defaults: Self) -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            defaults
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var("CAT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CAT_MTU") {
            if let Ok(p) = v.parse() {
                self.mtu = p;
            }
        }
        if let Ok(v) = std::env::var("CAT_N_START") {
            if let Ok(p) = v.parse() {
                self.n_start = p;
            }
        }
        if let Ok(v) = std::env::var("CAT_ACK_TIMEOUT_SECS") {
            if let Ok(p) = v.parse::<f64>() {
                self.ack_timeout = Duration::from_secs_f64(p);
            }
        }
        if let Ok(v) = std::env::var("CAT_MAX_RETRANSMIT") {
            if let Ok(p) = v.parse() {
                self.max_retransmit = p;
            }
        }
    }
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("cat")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults_match_spec_table() {
        let c = TransmissionConfig::server_defaults();
        assert_eq!(c.mtu, 1472);
        assert_eq!(c.n_start, 1);
        assert_eq!(c.ack_timeout, Duration::from_secs(2));
        assert_eq!(c.max_retransmit, 4);
        assert_eq!(c.inactivity_timeout, Some(Duration::from_secs(16)));
        assert_eq!(c.exchange_lifetime, Duration::from_secs(247));
        assert_eq!(c.dial_timeout, Duration::from_secs(3));
        assert_eq!(c.handshake_timeout, Duration::from_secs(1));
    }

    #[test]
    fn client_defaults_disable_inactivity_monitor() {
        let c = TransmissionConfig::client_defaults();
        assert_eq!(c.inactivity_timeout, None);
    }

    #[test]
    fn toml_round_trips() {
        let c = TransmissionConfig::server_defaults();
        let text = toml::to_string_pretty(&c).unwrap();
        let parsed: TransmissionConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, c);
    }
}
