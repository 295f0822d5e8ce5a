//! Error types for podwarden.

use std::time::Duration;

use thiserror::Error;

use crate::pods::PodRole;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse config file {path}: {message}")]
    ParseFile { path: String, message: String },
}

/// What went wrong on the resource provider side.
///
/// Populated once by the provider's response parser so callers match on a
/// value instead of searching message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// The requested GPU class cannot be allocated right now.
    CapacityExhausted,
    /// The pod (or endpoint) does not exist.
    NotFound,
    /// Credentials were rejected.
    Unauthorized,
    /// Provider-side rate limit.
    RateLimited,
    /// Connection or transport failure before a response arrived.
    Network,
    /// A 2xx response whose body could not be understood.
    InvalidResponse,
    /// Any other non-2xx response.
    Api,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CapacityExhausted => "capacity_exhausted",
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::Network => "network",
            Self::InvalidResponse => "invalid_response",
            Self::Api => "api",
        };
        write!(f, "{}", s)
    }
}

/// A failed call against the resource provider API.
#[derive(Debug, Clone, Error)]
#[error("{kind} error from resource provider{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    /// HTTP status, when a response was received.
    pub status: Option<u16>,
    pub message: String,
    /// Parsed error body, when the provider sent JSON.
    pub body: Option<serde_json::Value>,
}

/// Phrases the provider uses when a GPU class has no free capacity.
///
/// Compatibility shim: only consulted when the response carries no
/// structured code that already decided the kind.
const CAPACITY_PHRASES: &[&str] = &[
    "no gpu available",
    "no gpus available",
    "no machines available",
    "insufficient gpu",
    "no instances currently available",
    "there are no longer any instances available",
    "not enough free gpus",
    "no longer any instances",
    "gpu unavailable",
];

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            body: None,
        }
    }

    /// Capacity exhaustion is the only failure that delete+recreate can fix.
    pub fn is_capacity_exhausted(&self) -> bool {
        self.kind == ProviderErrorKind::CapacityExhausted
    }

    /// Build an error from a non-2xx response.
    ///
    /// Structured status codes win; message text is only used to tell
    /// capacity exhaustion apart from other API failures.
    pub fn from_response(status: u16, body_text: &str) -> Self {
        let body: Option<serde_json::Value> = serde_json::from_str(body_text).ok();
        let message = body
            .as_ref()
            .and_then(extract_error_message)
            .unwrap_or_else(|| body_text.trim().to_string());

        let kind = match status {
            401 | 403 => ProviderErrorKind::Unauthorized,
            404 => ProviderErrorKind::NotFound,
            429 => ProviderErrorKind::RateLimited,
            _ if body.as_ref().and_then(extract_error_code).as_deref()
                == Some("capacity_exhausted") =>
            {
                ProviderErrorKind::CapacityExhausted
            }
            _ if is_capacity_message(&message) || is_capacity_message(body_text) => {
                ProviderErrorKind::CapacityExhausted
            }
            _ => ProviderErrorKind::Api,
        };

        Self {
            kind,
            status: Some(status),
            message,
            body,
        }
    }
}

/// Text-matching fallback for capacity exhaustion.
pub fn is_capacity_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    CAPACITY_PHRASES.iter().any(|p| lower.contains(p))
}

fn extract_error_message(body: &serde_json::Value) -> Option<String> {
    match body {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => items.first().and_then(extract_error_message),
        serde_json::Value::Object(map) => ["error", "message", "detail"]
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(extract_error_message),
        _ => None,
    }
}

fn extract_error_code(body: &serde_json::Value) -> Option<String> {
    body.get("code")
        .or_else(|| body.get("errorCode"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_lowercase())
}

/// Errors from the downstream consumer service.
#[derive(Debug, Clone, Error)]
pub enum ConsumerError {
    /// Connection refused or unreachable host.
    #[error("Consumer service not reachable at {url}: {reason}")]
    NotReachable { url: String, reason: String },

    #[error("Consumer returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Consumer request failed: {0}")]
    Request(String),

    #[error("Invalid consumer response: {0}")]
    InvalidResponse(String),
}

/// Failures of a single `ensure` call.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// An unrecoverable provider failure. Never retried.
    #[error("{role} pod: attempt {attempt} failed: {source}")]
    Provider {
        role: PodRole,
        attempt: u32,
        #[source]
        source: ProviderError,
    },

    /// Every recreate attempt hit capacity exhaustion.
    #[error("{role} pod: GPU capacity unavailable after {attempts} attempts")]
    CapacityExhausted {
        role: PodRole,
        attempts: u32,
        warnings: Vec<String>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl LifecycleError {
    pub fn role(&self) -> Option<PodRole> {
        match self {
            Self::Provider { role, .. } | Self::CapacityExhausted { role, .. } => Some(*role),
            Self::Config(_) => None,
        }
    }

    pub fn attempt(&self) -> Option<u32> {
        match self {
            Self::Provider { attempt, .. } => Some(*attempt),
            Self::CapacityExhausted { attempts, .. } => Some(*attempts),
            Self::Config(_) => None,
        }
    }

    /// Structured detail stored alongside the ledger message.
    pub fn detail(&self) -> serde_json::Value {
        match self {
            Self::Provider {
                attempt, source, ..
            } => serde_json::json!({
                "attempt": attempt,
                "kind": source.kind,
                "status": source.status,
                "body": source.body,
            }),
            Self::CapacityExhausted {
                attempts, warnings, ..
            } => serde_json::json!({
                "attempt": attempts,
                "kind": ProviderErrorKind::CapacityExhausted,
                "warnings": warnings,
            }),
            Self::Config(e) => serde_json::json!({ "kind": "config", "message": e.to_string() }),
        }
    }
}

/// Errors that abort a whole pipeline run rather than a single step.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Another pipeline {operation} is in progress (waited {waited:?})")]
    Busy {
        operation: &'static str,
        waited: Duration,
    },

    #[error("Pipeline internal error: {0}")]
    Internal(String),
}
