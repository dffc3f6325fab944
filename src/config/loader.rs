//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::SessionConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "TAGWIRE_";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    /// An environment override could not be parsed.
    Override { key: String, value: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Override { key, value } => {
                write!(f, "Invalid value '{}' for {}", value, key)
            }
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
///
/// `TAGWIRE_*` environment variables are applied on top of the file.
pub fn load_config(path: &Path) -> Result<SessionConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let mut config: SessionConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    apply_overrides(&mut config, std::env::vars())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load configuration from `path` when given, defaults otherwise.
pub fn read_config(path: Option<&Path>) -> Result<SessionConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let mut config = SessionConfig::default();
            apply_overrides(&mut config, std::env::vars())?;
            validate_config(&config).map_err(ConfigError::Validation)?;
            Ok(config)
        }
    }
}

/// Apply `TAGWIRE_*` overrides from `vars`; unrelated keys are ignored.
pub fn apply_overrides<I>(config: &mut SessionConfig, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        match name {
            "FEATURES" => {
                config.context.features = value
                    .split(',')
                    .map(|f| f.trim().to_ascii_lowercase())
                    .filter(|f| !f.is_empty())
                    .collect();
            }
            "MAX_MESSAGE_SIZE" => config.worker.max_message_size = parse_value(&key, &value)?,
            "RX_CHUNK_SIZE" => config.worker.rx_chunk_size = parse_value(&key, &value)?,
            "PROGRESS_BATCH" => config.worker.progress_batch = parse_value(&key, &value)?,
            "MAX_UNEXPECTED" => config.worker.max_unexpected = parse_value(&key, &value)?,
            "CONNECT_TIMEOUT_MS" => config.endpoint.connect_timeout_ms = parse_value(&key, &value)?,
            "TCP_NODELAY" => config.endpoint.tcp_nodelay = parse_bool(&key, &value)?,
            "LOG_LEVEL" => config.observability.log_level = value.to_ascii_lowercase(),
            _ => tracing::debug!(key = %key, "Ignoring unknown configuration override"),
        }
    }
    Ok(())
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Override {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "y" | "yes" | "on" | "true" => Ok(true),
        "0" | "n" | "no" | "off" | "false" => Ok(false),
        _ => Err(ConfigError::Override {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
