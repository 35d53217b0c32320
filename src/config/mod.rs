use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use toml::Value;

pub const DEFAULT_CONFIG_FILE: &str = "signal-queue.toml";
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../signal-queue.toml");

pub const MAX_WORKERS: usize = 64;
pub const MAX_ACCEPT_POLL_INTERVAL_MS: u64 = 1_000;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub queue: QueueConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub human_friendly: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub accept_poll_interval_ms: u64,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct QueueConfig {
    pub capacity: usize,
}

/// Where the base TOML document came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    BuiltIn,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::BuiltIn => write!(f, "<built-in defaults>"),
        }
    }
}

impl AppConfig {
    /// Resolves the config file (`--config <path>`, then `./signal-queue.toml`, then the
    /// built-in defaults) and applies the remaining `--section.key value` overrides.
    pub fn load_with_discovery(
        args: impl IntoIterator<Item = String>,
    ) -> Result<(Self, ConfigSource), ConfigError> {
        let (explicit_path, remaining) = extract_config_path(args)?;

        let source = match explicit_path {
            Some(path) => ConfigSource::File(path),
            None => {
                let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
                if candidate.is_file() {
                    ConfigSource::File(candidate)
                } else {
                    ConfigSource::BuiltIn
                }
            }
        };

        let config = match &source {
            ConfigSource::File(path) => Self::load_from_toml_with_args(path, remaining)?,
            ConfigSource::BuiltIn => Self::from_toml_str_with_args(DEFAULT_CONFIG_TOML, remaining)?,
        };

        Ok((config, source))
    }

    pub fn load_from_toml_with_args(
        path: impl AsRef<Path>,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        let toml_content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source,
        })?;

        let root_value: Value = toml_content
            .parse()
            .map_err(|source| ConfigError::TomlParse {
                path: path.as_ref().to_string_lossy().to_string(),
                source,
            })?;

        Self::from_value_with_args(root_value, args)
    }

    pub fn from_toml_str_with_args(
        content: &str,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        let root_value: Value = content.parse().map_err(|source| ConfigError::TomlParse {
            path: "<inline>".to_owned(),
            source,
        })?;

        Self::from_value_with_args(root_value, args)
    }

    fn from_value_with_args(
        mut root_value: Value,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        let overrides = parse_cli_overrides(args)?;
        for (key_path, raw_value) in overrides {
            apply_override(&mut root_value, &key_path, &raw_value)?;
        }

        let config: Self = root_value.try_into().map_err(ConfigError::Deserialize)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.workers == 0 || self.pool.workers > MAX_WORKERS {
            return Err(ConfigError::OutOfRange {
                key: "pool.workers",
                expected: format!("1..={MAX_WORKERS}"),
                value: self.pool.workers.to_string(),
            });
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::OutOfRange {
                key: "queue.capacity",
                expected: ">= 1".to_owned(),
                value: self.queue.capacity.to_string(),
            });
        }
        if self.server.accept_poll_interval_ms == 0
            || self.server.accept_poll_interval_ms > MAX_ACCEPT_POLL_INTERVAL_MS
        {
            return Err(ConfigError::OutOfRange {
                key: "server.accept_poll_interval_ms",
                expected: format!("1..={MAX_ACCEPT_POLL_INTERVAL_MS}"),
                value: self.server.accept_poll_interval_ms.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_owned(),
                human_friendly: true,
            },
            server: ServerConfig {
                host: "0.0.0.0".to_owned(),
                port: 19100,
                accept_poll_interval_ms: 50,
            },
            pool: PoolConfig { workers: 3 },
            queue: QueueConfig { capacity: 50 },
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
    TomlParse {
        path: String,
        source: toml::de::Error,
    },
    Deserialize(toml::de::Error),
    MissingValueForArg {
        key: String,
    },
    InvalidArgFormat {
        arg: String,
    },
    InvalidPath {
        key: String,
    },
    UnknownPath {
        key: String,
    },
    UnsupportedOverrideType {
        key: String,
    },
    InvalidValueForType {
        key: String,
        expected: &'static str,
        value: String,
    },
    OutOfRange {
        key: &'static str,
        expected: String,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config file '{path}': {source}")
            }
            Self::TomlParse { path, source } => {
                write!(f, "failed to parse TOML config '{path}': {source}")
            }
            Self::Deserialize(source) => write!(f, "failed to deserialize config: {source}"),
            Self::MissingValueForArg { key } => {
                write!(f, "missing value for CLI argument '--{key}'")
            }
            Self::InvalidArgFormat { arg } => write!(
                f,
                "invalid CLI argument format '{arg}', expected '--section.key value'"
            ),
            Self::InvalidPath { key } => write!(f, "invalid override key path '{key}'"),
            Self::UnknownPath { key } => write!(f, "unknown override key path '{key}'"),
            Self::UnsupportedOverrideType { key } => {
                write!(f, "override not supported for complex TOML type at '{key}'")
            }
            Self::InvalidValueForType {
                key,
                expected,
                value,
            } => write!(
                f,
                "invalid value '{value}' for '{key}', expected type {expected}"
            ),
            Self::OutOfRange {
                key,
                expected,
                value,
            } => write!(f, "value {value} for '{key}' is out of range, expected {expected}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn extract_config_path(
    args: impl IntoIterator<Item = String>,
) -> Result<(Option<PathBuf>, Vec<String>), ConfigError> {
    let mut config_path = None;
    let mut remaining = Vec::new();
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let value = iter.next().ok_or_else(|| ConfigError::MissingValueForArg {
                key: "config".to_owned(),
            })?;
            config_path = Some(PathBuf::from(value));
            continue;
        }
        remaining.push(arg);
    }

    Ok((config_path, remaining))
}

fn parse_cli_overrides(
    args: impl IntoIterator<Item = String>,
) -> Result<Vec<(String, String)>, ConfigError> {
    let mut parsed = Vec::new();
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        let Some(stripped) = arg.strip_prefix("--") else {
            return Err(ConfigError::InvalidArgFormat { arg });
        };

        if stripped.is_empty() {
            return Err(ConfigError::InvalidArgFormat { arg });
        }

        let value = iter.next().ok_or_else(|| ConfigError::MissingValueForArg {
            key: stripped.to_owned(),
        })?;

        parsed.push((stripped.to_owned(), value));
    }

    Ok(parsed)
}

fn apply_override(root: &mut Value, key_path: &str, raw_value: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = key_path.split('.').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(ConfigError::InvalidPath {
            key: key_path.to_owned(),
        });
    }

    let unknown = || ConfigError::UnknownPath {
        key: key_path.to_owned(),
    };

    let (final_key, sections) = parts.split_last().ok_or_else(unknown)?;
    let mut current = root;
    for section in sections {
        current = current
            .as_table_mut()
            .ok_or_else(unknown)?
            .get_mut(*section)
            .ok_or_else(unknown)?;
    }

    let current_value = current
        .as_table_mut()
        .ok_or_else(unknown)?
        .get_mut(*final_key)
        .ok_or_else(unknown)?;

    *current_value = parse_value_using_current_type(key_path, raw_value, current_value)?;
    Ok(())
}

fn parse_value_using_current_type(
    key_path: &str,
    raw_value: &str,
    current_value: &Value,
) -> Result<Value, ConfigError> {
    let invalid = |expected: &'static str| ConfigError::InvalidValueForType {
        key: key_path.to_owned(),
        expected,
        value: raw_value.to_owned(),
    };

    match current_value {
        Value::String(_) => Ok(Value::String(raw_value.to_owned())),
        Value::Integer(_) => raw_value
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| invalid("integer")),
        Value::Float(_) => raw_value
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| invalid("float")),
        Value::Boolean(_) => raw_value
            .parse::<bool>()
            .map(Value::Boolean)
            .map_err(|_| invalid("boolean")),
        Value::Datetime(_) | Value::Array(_) | Value::Table(_) => {
            Err(ConfigError::UnsupportedOverrideType {
                key: key_path.to_owned(),
            })
        }
    }
}
