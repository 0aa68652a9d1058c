//! Orchestrator error taxonomy.
//!
//! Activities wrap transport errors into this taxonomy at the boundary.
//! Retries apply only to `transient`, `platform_unreachable` and
//! `provider_error`; everything else fails fast. An unrecovered error at the
//! workflow level transitions the owning task to `failed` with the mapped
//! code.

use serde::{Deserialize, Serialize};

/// Persisted error codes, exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Input
    ParseError,
    ValidationError,
    ScopeError,
    // Authorization
    PermissionError,
    QuotaExceeded,
    RateLimited,
    // External
    PlatformUnreachable,
    ProviderError,
    LlmError,
    // Operational
    Timeout,
    Cancelled,
    Transient,
    Unknown,
    // Safety
    InvalidTransition,
    PolicyViolation,
    SafetyViolation,
}

impl ErrorCode {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseError => "parse_error",
            Self::ValidationError => "validation_error",
            Self::ScopeError => "scope_error",
            Self::PermissionError => "permission_error",
            Self::QuotaExceeded => "quota_exceeded",
            Self::RateLimited => "rate_limited",
            Self::PlatformUnreachable => "platform_unreachable",
            Self::ProviderError => "provider_error",
            Self::LlmError => "llm_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Transient => "transient",
            Self::Unknown => "unknown",
            Self::InvalidTransition => "invalid_transition",
            Self::PolicyViolation => "policy_violation",
            Self::SafetyViolation => "safety_violation",
        }
    }

    /// Whether retry policies may re-attempt this class.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient | Self::PlatformUnreachable | Self::ProviderError
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Orchestrator error with the taxonomy code attached.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum OrchestratorError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("scope error: {0}")]
    Scope(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("platform unreachable: {0}")]
    PlatformUnreachable(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("llm error: {0}")]
    Llm(String),
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("cancelled")]
    Cancelled,
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("policy violation: {0}")]
    PolicyViolation(String),
    #[error("safety violation: {0}")]
    SafetyViolation(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl OrchestratorError {
    /// The persisted code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Parse(_) => ErrorCode::ParseError,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::Scope(_) => ErrorCode::ScopeError,
            Self::Permission(_) => ErrorCode::PermissionError,
            Self::QuotaExceeded(_) => ErrorCode::QuotaExceeded,
            Self::RateLimited(_) => ErrorCode::RateLimited,
            Self::PlatformUnreachable(_) => ErrorCode::PlatformUnreachable,
            Self::Provider(_) => ErrorCode::ProviderError,
            Self::Llm(_) => ErrorCode::LlmError,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Transient(_) => ErrorCode::Transient,
            Self::InvalidTransition(_) => ErrorCode::InvalidTransition,
            Self::PolicyViolation(_) => ErrorCode::PolicyViolation,
            Self::SafetyViolation(_) => ErrorCode::SafetyViolation,
            Self::Unknown(_) => ErrorCode::Unknown,
        }
    }

    /// Whether retry policies may re-attempt this error.
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Rebuild from a journaled `(code, message)` pair.
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::ParseError => Self::Parse(message),
            ErrorCode::ValidationError => Self::Validation(message),
            ErrorCode::ScopeError => Self::Scope(message),
            ErrorCode::PermissionError => Self::Permission(message),
            ErrorCode::QuotaExceeded => Self::QuotaExceeded(message),
            ErrorCode::RateLimited => Self::RateLimited(message),
            ErrorCode::PlatformUnreachable => Self::PlatformUnreachable(message),
            ErrorCode::ProviderError => Self::Provider(message),
            ErrorCode::LlmError => Self::Llm(message),
            ErrorCode::Timeout => Self::Timeout(message.parse().unwrap_or(0)),
            ErrorCode::Cancelled => Self::Cancelled,
            ErrorCode::Transient => Self::Transient(message),
            ErrorCode::InvalidTransition => Self::InvalidTransition(message),
            ErrorCode::PolicyViolation => Self::PolicyViolation(message),
            ErrorCode::SafetyViolation => Self::SafetyViolation(message),
            ErrorCode::Unknown => Self::Unknown(message),
        }
    }
}

/// User-visible failure surface for a run.
///
/// Raw provider messages never appear here; they stay on tool-invocation
/// records for operators with audit access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFailure {
    /// Taxonomy code
    pub error_code: ErrorCode,
    /// Human-readable message
    pub error: String,
    /// Offending resource, if known
    pub resource: Option<String>,
    /// Suggested remediation, if any
    pub remediation: Option<String>,
}

impl RunFailure {
    /// Build the user-visible surface from an orchestrator error.
    pub fn from_error(err: &OrchestratorError) -> Self {
        let code = err.code();
        let error = match code {
            // Sanitized: upstream detail stays in the audit trail only.
            ErrorCode::ProviderError => "upstream provider returned an error".to_string(),
            ErrorCode::PlatformUnreachable => "platform endpoint unreachable".to_string(),
            _ => err.to_string(),
        };
        Self {
            error_code: code,
            error,
            resource: None,
            remediation: None,
        }
    }

    /// Name the offending resource.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Attach a remediation hint.
    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(OrchestratorError::Transient("x".into()).is_retryable());
        assert!(OrchestratorError::PlatformUnreachable("x".into()).is_retryable());
        assert!(OrchestratorError::Provider("x".into()).is_retryable());

        assert!(!OrchestratorError::Permission("x".into()).is_retryable());
        assert!(!OrchestratorError::Validation("x".into()).is_retryable());
        assert!(!OrchestratorError::SafetyViolation("x".into()).is_retryable());
        assert!(!OrchestratorError::InvalidTransition("x".into()).is_retryable());
    }

    #[test]
    fn test_code_round_trip() {
        let err = OrchestratorError::QuotaExceeded("tokens".into());
        let rebuilt = OrchestratorError::from_code(err.code(), "tokens");
        assert_eq!(rebuilt.code(), ErrorCode::QuotaExceeded);
    }

    #[test]
    fn test_provider_message_sanitized() {
        let err = OrchestratorError::Provider("secret backend stack trace".into());
        let failure = RunFailure::from_error(&err).with_resource("i-123");
        assert_eq!(failure.error_code, ErrorCode::ProviderError);
        assert!(!failure.error.contains("stack trace"));
        assert_eq!(failure.resource.as_deref(), Some("i-123"));
    }

    #[test]
    fn test_wire_strings() {
        assert_eq!(ErrorCode::InvalidTransition.as_str(), "invalid_transition");
        assert_eq!(ErrorCode::QuotaExceeded.as_str(), "quota_exceeded");
    }
}
