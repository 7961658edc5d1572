// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for the context manager.
//!
//! Every [`CtxError`] carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context. Use the builder returned by
//! [`CtxError::new`] to construct errors fluently.
//!
//! None of the "soft" outcomes in the core's error handling design —
//! `NotFound` reads, the cursor-reset protocol, or harmless duplicate
//! writes — are represented here: those are `Ok` paths by design, not
//! errors. [`ErrorCode`] only enumerates conditions that are genuinely
//! exceptional.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Store I/O and wire-format errors.
    Store,
    /// Filesystem source read/resolve errors.
    Source,
    /// Session-engine precondition and invariant errors.
    Session,
    /// Host message-stream protocol errors.
    Protocol,
    /// Configuration loading/validation errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Store => "store",
            Self::Source => "source",
            Self::Session => "session",
            Self::Protocol => "protocol",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Store --
    /// The store I/O operation failed (transport, timeout, or backend error).
    StoreUnavailable,
    /// A `put` transaction handle could not be resolved by `awaitTx`.
    StoreTxFailed,
    /// The declared document shape did not round-trip through the wire format.
    StoreMalformedDoc,

    // -- Source --
    /// A filesystem read failed while indexing or re-indexing a source.
    SourceUnreadable,
    /// An operation referenced a source binding variant with no registered rules.
    SourceVariantUnknown,

    // -- Session --
    /// Deactivation was attempted on a locked type (`chat`, `system_prompt`).
    LockedDeactivation,
    /// Activation was attempted on an object whose content is null.
    ContentUnavailable,
    /// An id was referenced that does not exist in the relevant set.
    UnknownObject,
    /// `promoteToPool` was attempted on an infrastructure-type object.
    InfrastructureObject,
    /// `createSession` was called with an id already in use.
    SessionIdInUse,
    /// A session id has no corresponding session document.
    SessionNotFound,

    // -- Protocol --
    /// The host-supplied event carried a shape the assembler does not recognise.
    ProtocolMalformedEvent,

    // -- Config --
    /// Configuration file or value is invalid.
    ConfigInvalid,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::StoreUnavailable | Self::StoreTxFailed | Self::StoreMalformedDoc => {
                ErrorCategory::Store
            }
            Self::SourceUnreadable | Self::SourceVariantUnknown => ErrorCategory::Source,
            Self::LockedDeactivation
            | Self::ContentUnavailable
            | Self::UnknownObject
            | Self::InfrastructureObject
            | Self::SessionIdInUse
            | Self::SessionNotFound => ErrorCategory::Session,
            Self::ProtocolMalformedEvent => ErrorCategory::Protocol,
            Self::ConfigInvalid => ErrorCategory::Config,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"STORE_UNAVAILABLE"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::StoreTxFailed => "STORE_TX_FAILED",
            Self::StoreMalformedDoc => "STORE_MALFORMED_DOC",
            Self::SourceUnreadable => "SOURCE_UNREADABLE",
            Self::SourceVariantUnknown => "SOURCE_VARIANT_UNKNOWN",
            Self::LockedDeactivation => "LOCKED_DEACTIVATION",
            Self::ContentUnavailable => "CONTENT_UNAVAILABLE",
            Self::UnknownObject => "UNKNOWN_OBJECT",
            Self::InfrastructureObject => "INFRASTRUCTURE_OBJECT",
            Self::SessionIdInUse => "SESSION_ID_IN_USE",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::ProtocolMalformedEvent => "PROTOCOL_MALFORMED_EVENT",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CtxError
// ---------------------------------------------------------------------------

/// Unified context-manager error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Examples
///
/// ```
/// use ctxmgr_error::{CtxError, ErrorCode};
///
/// let err = CtxError::new(ErrorCode::StoreUnavailable, "put timed out")
///     .with_context("id", "abc123")
///     .with_context("timeout_ms", 5000);
/// ```
pub struct CtxError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl CtxError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
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

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Convenience constructor for [`ErrorCode::UnknownObject`].
    pub fn unknown_object(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(ErrorCode::UnknownObject, format!("unknown object: {id}")).with_context("id", id)
    }

    /// Convenience constructor for [`ErrorCode::LockedDeactivation`].
    pub fn locked_deactivation(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(
            ErrorCode::LockedDeactivation,
            format!("object is locked: {id}"),
        )
        .with_context("id", id)
    }

    /// Convenience constructor for [`ErrorCode::ContentUnavailable`].
    pub fn content_unavailable(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(ErrorCode::ContentUnavailable, "content unavailable").with_context("id", id)
    }
}

impl fmt::Debug for CtxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("CtxError");
        d.field("code", &self.code);
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

impl fmt::Display for CtxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for CtxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`CtxError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CtxErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&CtxError> for CtxErrorDto {
    fn from(err: &CtxError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<CtxErrorDto> for CtxError {
    fn from(dto: CtxErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}
