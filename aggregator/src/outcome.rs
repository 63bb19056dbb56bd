//! Result of a single downstream call.
//!
//! Downstream failures are values rather than errors: the aggregator folds
//! them into defaulted fields instead of propagating them.

use http::StatusCode;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    ConnectionError,
    /// 5xx response
    ServerError(u16),
    /// 429 response
    RateLimited,
    /// Any other non-2xx response
    ClientError(u16),
    /// 2xx response whose body did not match the expected shape
    DecodeError,
}

impl FailureKind {
    /// Transient failures are expected to resolve on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            FailureKind::Timeout
            | FailureKind::ConnectionError
            | FailureKind::ServerError(_)
            | FailureKind::RateLimited => true,
            FailureKind::ClientError(_) | FailureKind::DecodeError => false,
        }
    }

    /// Classifies a response status. Returns `None` for 2xx.
    pub fn from_status(status: StatusCode) -> Option<Self> {
        if status.is_success() {
            None
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Some(FailureKind::RateLimited)
        } else if status.is_server_error() {
            Some(FailureKind::ServerError(status.as_u16()))
        } else {
            Some(FailureKind::ClientError(status.as_u16()))
        }
    }

    /// Short label used for metric tags.
    pub const fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::ConnectionError => "connection_error",
            FailureKind::ServerError(_) => "server_error",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::ClientError(_) => "client_error",
            FailureKind::DecodeError => "decode_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::ServerError(status) | FailureKind::ClientError(status) => {
                write!(f, "{} ({status})", self.as_str())
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    Success(T),
    Failure(CallFailure),
}

impl<T> CallOutcome<T> {
    pub fn failure(kind: FailureKind, detail: impl Into<String>) -> Self {
        CallOutcome::Failure(CallFailure {
            kind,
            detail: detail.into(),
        })
    }

    #[cfg(test)]
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    #[cfg(test)]
    pub fn is_transient_failure(&self) -> bool {
        match self {
            CallOutcome::Success(_) => false,
            CallOutcome::Failure(failure) => failure.kind.is_transient(),
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> CallOutcome<U>) -> CallOutcome<U> {
        match self {
            CallOutcome::Success(value) => f(value),
            CallOutcome::Failure(failure) => CallOutcome::Failure(failure),
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            CallOutcome::Success(value) => Some(value),
            CallOutcome::Failure(_) => None,
        }
    }
}
