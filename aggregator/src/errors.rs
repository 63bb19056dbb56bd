use crate::config::ValidationError;
use http::StatusCode;
use thiserror::Error;

/// Result type alias for aggregator operations
pub type Result<T, E = AggregatorError> = std::result::Result<T, E>;

/// Errors raised by the aggregator itself.
///
/// Downstream failures never show up here; they are carried as
/// [`crate::outcome::CallOutcome`] values and degrade individual fields.
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid subject id: {0:?}")]
    InvalidSubjectId(String),

    #[error("Invalid limit: {0:?}")]
    InvalidLimit(String),

    #[error("No route matched for request")]
    NoRouteMatched,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AggregatorError {
    /// Status returned to the inbound caller for request-level errors.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AggregatorError::MissingToken => StatusCode::UNAUTHORIZED,
            AggregatorError::InvalidSubjectId(_) | AggregatorError::InvalidLimit(_) => {
                StatusCode::BAD_REQUEST
            }
            AggregatorError::NoRouteMatched => StatusCode::NOT_FOUND,
            AggregatorError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AggregatorError::InvalidConfig(_)
            | AggregatorError::HttpClientError(_)
            | AggregatorError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
