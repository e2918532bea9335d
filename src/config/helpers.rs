//! Environment lookup and three-tier value resolution.
//!
//! Every configurable value is resolved the same way:
//! explicit value > environment variable > default.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::ConfigError;

/// A source of environment variables.
pub trait EnvSource {
    /// Look up a variable. `Ok(None)` when unset.
    fn get(&self, key: &str) -> Result<Option<String>, ConfigError>;
}

/// The process environment, with a `.env` file in the working directory
/// (or any parent) layered underneath.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match dotenvy::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(dotenvy::Error::EnvVar(std::env::VarError::NotPresent)) => Ok(None),
            Err(e) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        Ok(HashMap::get(self, key).cloned())
    }
}

impl<E: EnvSource + ?Sized> EnvSource for &E {
    fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        (**self).get(key)
    }
}

/// Read the first non-empty variable among `keys`.
pub fn optional_env(
    env: &impl EnvSource,
    keys: &[&str],
) -> Result<Option<(String, String)>, ConfigError> {
    for key in keys {
        if let Some(value) = env.get(key)?
            && !value.trim().is_empty()
        {
            return Ok(Some((key.to_string(), value)));
        }
    }
    Ok(None)
}

/// Resolve a value: explicit > first set variable in `keys` > default.
pub fn resolve<T>(
    env: &impl EnvSource,
    keys: &[&str],
    explicit: Option<T>,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    resolve_with(env, keys, explicit, default, |s| {
        s.parse::<T>().map_err(|e| e.to_string())
    })
}

/// Like [`resolve`], with a custom parser for the environment value.
pub fn resolve_with<T>(
    env: &impl EnvSource,
    keys: &[&str],
    explicit: Option<T>,
    default: T,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Result<T, ConfigError> {
    if let Some(value) = explicit {
        return Ok(value);
    }
    match optional_env(env, keys)? {
        Some((key, raw)) => {
            parse(raw.trim()).map_err(|message| ConfigError::InvalidValue { key, message })
        }
        None => Ok(default),
    }
}

/// Resolve a boolean. Accepts `true`/`false`, `1`/`0`, `yes`/`no`, `on`/`off`
/// in any case.
pub fn resolve_bool(
    env: &impl EnvSource,
    keys: &[&str],
    explicit: Option<bool>,
    default: bool,
) -> Result<bool, ConfigError> {
    resolve_with(env, keys, explicit, default, parse_bool)
}

/// Parse a boolean setting.
pub fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(format!("must be 'true' or 'false', got '{s}'")),
    }
}

/// Parse a TCP port in 1..=65535.
pub fn parse_port(s: &str) -> Result<u16, String> {
    match s.parse::<u16>() {
        Ok(0) => Err("port must be between 1 and 65535".to_string()),
        Ok(port) => Ok(port),
        Err(e) => Err(format!("not a valid port: {e}")),
    }
}
