//! Stable error domain for `subject-core`.
//!
//! Mirrors the error taxonomy in `spec.md` §7: local failures
//! (`InterceptorFailure`, `ValidationFailure`, `ConfigurationFailure`)
//! surface synchronously to the caller; failures crossing a source boundary
//! (`SourceWriteFailure`, `TransientConnectorFailure`,
//! `PermanentConnectorFailure`) are carried in [`crate::source::WriteResult`]
//! and never propagate as a panic or an `Err` out of the write call that
//! triggered them. `LifecycleFailure` is logged and otherwise swallowed.

use std::borrow::Cow;
use std::fmt;

/// How a caller (retry loop, transaction dispatcher, circuit breaker) should
/// treat a given error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Interceptor threw, a write was vetoed, or another purely local fault.
    Permanent,
    /// Timeout, session expiry, channel-closed: eligible for retry.
    Transient,
    /// Invalid configuration detected at construction; fails fast.
    Configuration,
    /// A write-interceptor vetoed the write on validation grounds.
    Validation,
    /// A hosted-service `start` threw; subject stays attached.
    Lifecycle,
}

/// The crate's single error type.
///
/// Carries a stable `code`, a human-readable `message`, an optional boxed
/// `cause`, and a classification used by retry/circuit-breaker logic.
pub struct SubjectError {
    code: &'static str,
    message: Cow<'static, str>,
    category: ErrorCategory,
    cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl SubjectError {
    pub fn new(
        code: &'static str,
        message: impl Into<Cow<'static, str>>,
        category: ErrorCategory,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            category,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn not_attached(property: &str) -> Self {
        Self::new(
            "subject.not_attached",
            format!("property '{property}' requires services but the subject is not attached to any context"),
            ErrorCategory::Permanent,
        )
    }

    pub fn interceptor_failure(property: &str, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::new(
            "subject.interceptor_failure",
            format!("interceptor chain for '{property}' failed: {}", reason.into()),
            ErrorCategory::Permanent,
        )
    }

    pub fn validation_failure(property: &str, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::new(
            "subject.validation_failure",
            format!("write to '{property}' was vetoed: {}", reason.into()),
            ErrorCategory::Validation,
        )
    }

    pub fn configuration_failure(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::new(
            "subject.configuration_failure",
            reason,
            ErrorCategory::Configuration,
        )
    }

    pub fn type_mismatch(property: &str, expected: &'static str) -> Self {
        Self::new(
            "subject.type_mismatch",
            format!("property '{property}' expected a value convertible to {expected}"),
            ErrorCategory::Permanent,
        )
    }

    pub fn unknown_property(name: &str) -> Self {
        Self::new(
            "subject.unknown_property",
            format!("no property named '{name}' on this subject"),
            ErrorCategory::Permanent,
        )
    }
}

impl fmt::Debug for SubjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectError")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("category", &self.category)
            .finish()
    }
}

impl fmt::Display for SubjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for SubjectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

pub type Result<T> = std::result::Result<T, SubjectError>;
