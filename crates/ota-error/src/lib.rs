// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for the OTA server.
//!
//! Every server error carries an [`ErrorKind`] (a machine-readable, stable
//! string tag that also determines the HTTP status), a human-readable
//! message, an optional cause chain, and arbitrary key-value context.  Use
//! the builder returned by [`OtaError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Machine-readable, stable error kind.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases, and maps to exactly one
/// HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Missing or invalid headers, query parameters, or body fields.
    BadRequest,
    /// Missing or invalid publisher credential.
    Unauthorized,
    /// Channel unmapped, asset missing, or unknown update.
    NotFound,
    /// Duplicate upload detected after validation.
    NotAcceptable,
    /// Upload is incomplete or malformed; its prefix has been deleted.
    InvalidUpload,
    /// The channel-mapping provider failed.
    Upstream,
    /// Object-store I/O failed.
    Storage,
    /// Cache I/O failed.
    Cache,
    /// Key material missing or a signature operation failed.
    Crypto,
    /// Configuration value missing or invalid.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorKind {
    /// Stable `&'static str` representation (e.g. `"NOT_ACCEPTABLE"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound => "NOT_FOUND",
            Self::NotAcceptable => "NOT_ACCEPTABLE",
            Self::InvalidUpload => "INVALID_UPLOAD",
            Self::Upstream => "UPSTREAM",
            Self::Storage => "STORAGE",
            Self::Cache => "CACHE",
            Self::Crypto => "CRYPTO",
            Self::Config => "CONFIG",
            Self::Internal => "INTERNAL",
        }
    }

    /// HTTP status code this kind maps to at the handler boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest | Self::InvalidUpload => 400,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::NotAcceptable => 406,
            Self::Upstream
            | Self::Storage
            | Self::Cache
            | Self::Crypto
            | Self::Config
            | Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OtaError
// ---------------------------------------------------------------------------

/// Unified OTA server error.
///
/// Carries a stable [`ErrorKind`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use ota_error::{ErrorKind, OtaError};
///
/// let err = OtaError::new(ErrorKind::InvalidUpload, "bundle file missing")
///     .with_context("branch", "staging")
///     .with_context("updateId", 1700000000000_i64);
/// ```
pub struct OtaError {
    /// Machine-readable error kind.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl OtaError {
    /// Create a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.kind.http_status()`.
    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    // -- Convenience constructors for the common kinds -----------------------

    /// A 400 request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// A 401 credential error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// A 404 lookup error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// A 500 storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    /// A 500 upstream error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    /// A 500 internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Debug for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("OtaError");
        d.field("kind", &self.kind);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for OtaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Convenience alias used across the workspace.
pub type OtaResult<T> = Result<T, OtaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    const ALL_KINDS: &[ErrorKind] = &[
        ErrorKind::BadRequest,
        ErrorKind::Unauthorized,
        ErrorKind::NotFound,
        ErrorKind::NotAcceptable,
        ErrorKind::InvalidUpload,
        ErrorKind::Upstream,
        ErrorKind::Storage,
        ErrorKind::Cache,
        ErrorKind::Crypto,
        ErrorKind::Config,
        ErrorKind::Internal,
    ];

    #[test]
    fn basic_construction() {
        let err = OtaError::new(ErrorKind::Internal, "boom");
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = OtaError::not_found("no branch mapping found");
        assert_eq!(err.to_string(), "[NOT_FOUND] no branch mapping found");
    }

    #[test]
    fn display_with_context() {
        let err = OtaError::bad_request("invalid platform").with_context("platform", "windows");
        let s = err.to_string();
        assert!(s.starts_with("[BAD_REQUEST] invalid platform"));
        assert!(s.contains("windows"));
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(ErrorKind::BadRequest.http_status(), 400);
        assert_eq!(ErrorKind::InvalidUpload.http_status(), 400);
        assert_eq!(ErrorKind::Unauthorized.http_status(), 401);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::NotAcceptable.http_status(), 406);
        assert_eq!(ErrorKind::Upstream.http_status(), 500);
        assert_eq!(ErrorKind::Storage.http_status(), 500);
        assert_eq!(ErrorKind::Crypto.http_status(), 500);
    }

    #[test]
    fn source_chain_preserved() {
        let inner = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err = OtaError::storage("read failed").with_source(inner);
        let src = std::error::Error::source(&err).unwrap();
        assert_eq!(src.to_string(), "file missing");
    }

    #[test]
    fn all_kinds_have_unique_as_str() {
        let mut seen = std::collections::HashSet::new();
        for kind in ALL_KINDS {
            assert!(seen.insert(kind.as_str()), "duplicate: {kind}");
        }
        assert_eq!(seen.len(), ALL_KINDS.len());
    }

    #[test]
    fn kinds_serialize_to_as_str() {
        for kind in ALL_KINDS {
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
