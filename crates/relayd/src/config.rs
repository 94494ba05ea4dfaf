use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

const KNOWN_KEYS: [&str; 6] = [
    "data_port",
    "downstream_flush_interval",
    "log_level",
    "dns_refresh_interval",
    "downstream_health_check_interval",
    "downstream",
];

const DEFAULT_DNS_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid row: \"{0}\"")]
    InvalidRow(String),
    #[error("Unknown key: \"{0}\"")]
    UnknownKey(String),
    #[error("Missing required key: \"{0}\"")]
    MissingKey(&'static str),
    #[error("Invalid value for {key}: \"{value}\"")]
    InvalidValue { key: &'static str, value: String },
}

/// Runtime configuration, loaded from a newline-separated `key=value` file.
/// `#`-prefixed and blank lines are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// UDP port the ingress socket binds to.
    pub data_port: u16,
    /// How often the slot table is packed and flushed downstream.
    pub flush_interval: Duration,
    /// Events below this level are suppressed.
    pub log_level: Level,
    /// How often the downstream hostname is re-resolved.
    pub dns_refresh_interval: Duration,
    /// How often downstream health probes run.
    pub health_check_interval: Duration,
    pub downstream: DownstreamSpec,
}

/// The `host:dataPort:healthPort` downstream specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamSpec {
    pub host: String,
    pub data_port: u16,
    pub health_port: u16,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        std::fs::read_to_string(path)?.parse()
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut pairs = HashMap::new();

        for line in s.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidRow(line.to_string()))?;
            pairs.insert(key.trim(), value.trim());
        }

        for key in pairs.keys() {
            if !KNOWN_KEYS.contains(key) {
                return Err(ConfigError::UnknownKey(key.to_string()));
            }
        }

        Ok(Self {
            data_port: parse_value(&pairs, "data_port")?.ok_or(ConfigError::MissingKey("data_port"))?,
            flush_interval: parse_interval(&pairs, "downstream_flush_interval")?
                .ok_or(ConfigError::MissingKey("downstream_flush_interval"))?,
            log_level: parse_level(&pairs)?,
            dns_refresh_interval: parse_value::<u64>(&pairs, "dns_refresh_interval")?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_DNS_REFRESH_INTERVAL),
            health_check_interval: parse_interval(&pairs, "downstream_health_check_interval")?
                .unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL),
            downstream: parse_downstream(&pairs)?,
        })
    }
}

fn parse_value<T: FromStr>(
    pairs: &HashMap<&str, &str>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    pairs
        .get(key)
        .map(|value| {
            value.parse().map_err(|_| ConfigError::InvalidValue {
                key,
                value: value.to_string(),
            })
        })
        .transpose()
}

/// Fractional seconds; must be a positive finite number.
fn parse_interval(
    pairs: &HashMap<&str, &str>,
    key: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    match parse_value::<f64>(pairs, key)? {
        None => Ok(None),
        Some(seconds) if seconds.is_finite() && seconds > 0.0 => {
            Ok(Some(Duration::from_secs_f64(seconds)))
        }
        Some(_) => Err(ConfigError::InvalidValue {
            key,
            value: pairs[key].to_string(),
        }),
    }
}

fn parse_level(pairs: &HashMap<&str, &str>) -> Result<Level, ConfigError> {
    match parse_value::<u8>(pairs, "log_level")?.ok_or(ConfigError::MissingKey("log_level"))? {
        0 => Ok(Level::TRACE),
        1 => Ok(Level::DEBUG),
        2 => Ok(Level::INFO),
        3 => Ok(Level::WARN),
        4 => Ok(Level::ERROR),
        _ => Err(ConfigError::InvalidValue {
            key: "log_level",
            value: pairs["log_level"].to_string(),
        }),
    }
}

fn parse_downstream(pairs: &HashMap<&str, &str>) -> Result<DownstreamSpec, ConfigError> {
    let raw = *pairs
        .get("downstream")
        .ok_or(ConfigError::MissingKey("downstream"))?;
    let invalid = || ConfigError::InvalidValue {
        key: "downstream",
        value: raw.to_string(),
    };

    let parts: Vec<&str> = raw.split(':').collect();
    let [host, data_port, health_port] = parts.as_slice() else {
        return Err(invalid());
    };
    if host.is_empty() {
        return Err(invalid());
    }
    Ok(DownstreamSpec {
        host: host.to_string(),
        data_port: data_port.parse().map_err(|_| invalid())?,
        health_port: health_port.parse().map_err(|_| invalid())?,
    })
}
