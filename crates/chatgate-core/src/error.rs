//! Error taxonomy (spec §7). Stable across every layer: drivers return these,
//! the orchestrator classifies and may fall back, the handler maps them to
//! HTTP status codes.

use serde::Serialize;
use thiserror::Error;

/// The stable wire-visible error code. Kept separate from `GatewayError`
/// itself so the HTTP layer can serialize `{"error": <code>, ...}` without
/// leaking Display text for variants that carry internal detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NoAgentAvailable,
    BreakerOpen,
    BreakerSaturated,
    AgentFailure,
    Timeout,
    Cancelled,
    Internal,
}

impl ErrorCode {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::BadRequest => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::NoAgentAvailable => 503,
            ErrorCode::BreakerOpen => 503,
            ErrorCode::BreakerSaturated => 503,
            ErrorCode::AgentFailure => 500,
            ErrorCode::Timeout => 500,
            ErrorCode::Cancelled => 499,
            ErrorCode::Internal => 500,
        }
    }

    /// Stable snake_case label, matching the `#[serde(rename_all)]` wire
    /// form, for use outside JSON serialization (metric labels, log fields).
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NoAgentAvailable => "no_agent_available",
            ErrorCode::BreakerOpen => "breaker_open",
            ErrorCode::BreakerSaturated => "breaker_saturated",
            ErrorCode::AgentFailure => "agent_failure",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Internal => "internal",
        }
    }

    /// §4.5: cancelled is neutral, bad_request counts as success, the rest
    /// of the agent-sourced outcomes are breaker failures.
    pub fn is_breaker_failure(self) -> bool {
        matches!(self, ErrorCode::AgentFailure | ErrorCode::Timeout)
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("no agent available for model {0}")]
    NoAgentAvailable(String),

    #[error("circuit breaker open for {0}")]
    BreakerOpen(String),

    #[error("circuit breaker saturated for {0}")]
    BreakerSaturated(String),

    #[error("agent failure: {0}")]
    AgentFailure(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Shorthand for `self.code().as_str()`, used wherever the stable label
    /// is needed without the indirection of matching on `code()` first.
    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::BadRequest(_) => ErrorCode::BadRequest,
            GatewayError::Unauthorized(_) => ErrorCode::Unauthorized,
            GatewayError::Forbidden(_) => ErrorCode::Forbidden,
            GatewayError::NoAgentAvailable(_) => ErrorCode::NoAgentAvailable,
            GatewayError::BreakerOpen(_) => ErrorCode::BreakerOpen,
            GatewayError::BreakerSaturated(_) => ErrorCode::BreakerSaturated,
            GatewayError::AgentFailure(_) => ErrorCode::AgentFailure,
            GatewayError::Timeout(_) => ErrorCode::Timeout,
            GatewayError::Cancelled => ErrorCode::Cancelled,
            GatewayError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Short, sanitized detail safe to hand back to a caller. Internal
    /// messages (stderr captures, parse errors) never reach this path —
    /// only the handler's mapped variants do.
    pub fn public_detail(&self) -> String {
        match self {
            GatewayError::Internal(_) | GatewayError::AgentFailure(_) => {
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::BadRequest(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_str_matches_wire_rename() {
        assert_eq!(ErrorCode::BadRequest.as_str(), "bad_request");
        assert_eq!(ErrorCode::NoAgentAvailable.as_str(), "no_agent_available");
        assert_eq!(ErrorCode::BreakerSaturated.as_str(), "breaker_saturated");
    }

    #[test]
    fn code_str_is_shorthand_for_code() {
        let e = GatewayError::AgentFailure("boom".to_string());
        assert_eq!(e.code_str(), e.code().as_str());
        assert_eq!(e.code_str(), "agent_failure");
    }
}
