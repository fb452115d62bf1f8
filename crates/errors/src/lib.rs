//! Typed error classification layered over `anyhow`.
//!
//! Errors flow through the engine as `anyhow::Error` chains. Any error that
//! should surface with a canonical status code carries an [`ErrorMetadata`]
//! attached via `.context(...)`; callers recover the classification with the
//! [`ErrorMetadataAnyhowExt`] helpers rather than matching on strings.

use std::borrow::Cow;

use serde::Serialize;

/// ErrorMetadata can be attached to an anyhow error chain via
/// `.context(e /* ErrorMetadata */)`. It tags the chain with a canonical
/// status code plus a stable short message usable in tests and logs.
///
/// The `msg` is the developer-facing description. The `short_msg` is a
/// ScreamingCamelCase tag resilient to changes in copy, e.g.
/// `DocumentAlreadyExists`.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    /// Short CapitalCamelCase tag, e.g. `InvalidFieldPath`.
    pub short_msg: Cow<'static, str>,
    /// Human readable, developer facing description.
    pub msg: Cow<'static, str>,
}

/// Canonical status codes, mirroring the gRPC taxonomy the wire layer
/// re-serializes.
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Aborted,
    Unimplemented,
    Internal,
    Unknown,
}

impl ErrorCode {
    /// The canonical SCREAMING_SNAKE name for the code, as it appears on the
    /// wire.
    pub fn grpc_name(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorCode::Aborted => "ABORTED",
            ErrorCode::Unimplemented => "UNIMPLEMENTED",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl ErrorMetadata {
    /// Malformed request: empty payloads, bad field paths, invalid cursors.
    ///
    /// The short_msg should be CapitalCamelCase (e.g. `InvalidFieldPath`).
    pub fn invalid_argument(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::InvalidArgument,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// The addressed document (or other resource) does not exist.
    pub fn not_found(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::NotFound,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Create was attempted on a document that already exists.
    pub fn already_exists(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::AlreadyExists,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// A supplied precondition (e.g. `lastUpdateTime`) did not hold.
    pub fn failed_precondition(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::FailedPrecondition,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Transaction conflict. Safe to retry from the top of the transaction.
    pub fn aborted(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Aborted,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Write/write or read/write race between two committing transactions.
    pub fn conflict(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::aborted("TransactionConflict", msg)
    }

    /// The feature is recognized but not supported by this engine.
    pub fn unimplemented(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Unimplemented,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Invariant violation. Should be unreachable; propagated without
    /// recovery.
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Internal,
            short_msg: "InternalError".into(),
            msg: msg.into(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.code == ErrorCode::Aborted
    }
}

/// Downcast helpers on `anyhow::Error` for code-based classification.
pub trait ErrorMetadataAnyhowExt {
    /// The attached code, or `Unknown` if the chain carries no metadata.
    fn code(&self) -> ErrorCode;
    fn is_aborted(&self) -> bool;
    fn is_invalid_argument(&self) -> bool;
    fn is_not_found(&self) -> bool;
    /// The attached short message, or "Unknown".
    fn short_msg(&self) -> &str;
    /// The attached developer-facing message, or the chain's display form is
    /// the caller's fallback.
    fn msg(&self) -> &str;
    fn map_error_metadata<F: FnOnce(ErrorMetadata) -> ErrorMetadata>(self, f: F) -> Self;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn code(&self) -> ErrorCode {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return e.code;
        }
        ErrorCode::Unknown
    }

    fn is_aborted(&self) -> bool {
        self.code() == ErrorCode::Aborted
    }

    fn is_invalid_argument(&self) -> bool {
        self.code() == ErrorCode::InvalidArgument
    }

    fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }

    fn short_msg(&self) -> &str {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return &e.short_msg;
        }
        "Unknown"
    }

    fn msg(&self) -> &str {
        if let Some(e) = self.downcast_ref::<ErrorMetadata>() {
            return &e.msg;
        }
        "Unknown"
    }

    fn map_error_metadata<F: FnOnce(ErrorMetadata) -> ErrorMetadata>(self, f: F) -> Self {
        match self.downcast::<ErrorMetadata>() {
            Ok(e) => f(e).into(),
            Err(other) => other,
        }
    }
}
