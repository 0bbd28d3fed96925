//! Shared error taxonomy (§7).
//!
//! Every adapter in the crate classifies its own failures into [`ErrorKind`] and
//! surfaces them through [`MnemoError`]. Nothing in the public interface panics
//! or throws; failures are always `Result`s resolving to this type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed taxonomy tag set from §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    BackendUnavailable,
    BackendFailed,
    Timeout,
    Integrity,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::BackendFailed => "backend_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The backend a [`MnemoError`] originated from, when applicable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Backend {
    Rs,
    Vi,
    Gs,
    Cs,
    /// The universal index layer (C7) — indexed for every storage_type per
    /// the §4.8 storage-routing table, independent of whether `Vi` is also
    /// a target for direct vector retrieval.
    Uil,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Backend::Rs => "RS",
            Backend::Vi => "VI",
            Backend::Gs => "GS",
            Backend::Cs => "CS",
            Backend::Uil => "UIL",
        };
        f.write_str(s)
    }
}

/// The crate-wide error type. Adapters construct one of these via the
/// `*_err` constructors below rather than ad-hoc `String` errors, so that
/// `error_kind` always survives to the public envelope.
#[derive(Debug, thiserror::Error, Clone)]
#[error("{message}")]
pub struct MnemoError {
    pub kind: ErrorKind,
    pub message: String,
    pub backend: Option<Backend>,
}

impl MnemoError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            backend: None,
        }
    }

    #[must_use]
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn backend_unavailable(backend: Backend, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendUnavailable, message).with_backend(backend)
    }

    pub fn backend_failed(backend: Backend, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendFailed, message).with_backend(backend)
    }

    pub fn timeout(backend: Backend, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message).with_backend(backend)
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Integrity, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<serde_json::Error> for MnemoError {
    fn from(err: serde_json::Error) -> Self {
        MnemoError::internal(format!("json error: {err}"))
    }
}

/// `{success: false, error, error_kind, context?}` — the wire-level shape from §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
    pub error_kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl From<&MnemoError> for ErrorEnvelope {
    fn from(err: &MnemoError) -> Self {
        let context = err
            .backend
            .map(|b| serde_json::json!({ "backend": b.to_string() }));
        ErrorEnvelope {
            success: false,
            error: err.message.clone(),
            error_kind: err.kind.as_str().to_string(),
            context,
        }
    }
}

pub type MnemoResult<T> = Result<T, MnemoError>;
