//! Small helpers for reading typed values out of the environment.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Read an env var, treating unset and blank values the same.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("failed to read: {e}"),
        }),
    }
}

/// Parse an env var into `T`, falling back to `default` when unset.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| s.trim().parse::<T>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        })
        .map(|v| v.unwrap_or(default))
}

/// Parse an optional env var into `T` with no default.
pub(crate) fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| s.trim().parse::<T>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        })
}

/// Comma-separated list. Empty items are dropped.
pub(crate) fn parse_list_env(key: &str) -> Result<Option<Vec<String>>, ConfigError> {
    Ok(optional_env(key)?.map(|s| split_list(&s)))
}

/// Whole seconds as a `Duration`.
pub(crate) fn parse_secs_env(key: &str, default_secs: u64) -> Result<Duration, ConfigError> {
    parse_optional_env(key, default_secs).map(Duration::from_secs)
}

/// `KEY=VALUE` pairs separated by commas.
pub(crate) fn parse_pairs_env(key: &str) -> Result<Option<Vec<(String, String)>>, ConfigError> {
    let Some(raw) = optional_env(key)? else {
        return Ok(None);
    };
    split_list(&raw)
        .into_iter()
        .map(|item| {
            item.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("expected KEY=VALUE, got '{item}'"),
                })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(
            split_list(" NVIDIA A40, ,NVIDIA L40S ,"),
            vec!["NVIDIA A40".to_string(), "NVIDIA L40S".to_string()]
        );
        assert!(split_list("").is_empty());
    }
}
