use crate::errors::AggregatorError;
use std::fmt;

const MAX_SUBJECT_ID_LEN: usize = 64;

/// Identifier of the user an aggregation is computed for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubjectId(String);

impl SubjectId {
    /// Accepts 1 to 64 characters from `[A-Za-z0-9_-]`.
    pub fn parse(raw: &str) -> Result<Self, AggregatorError> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_SUBJECT_ID_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

        if valid {
            Ok(SubjectId(raw.to_string()))
        } else {
            Err(AggregatorError::InvalidSubjectId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-supplied bearer token, forwarded verbatim to downstream services.
///
/// The token is never inspected or stored alongside aggregated data.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        BearerToken(token.into())
    }

    /// Extracts the token from an `Authorization: Bearer <token>` header value.
    pub fn from_authorization(header: Option<&str>) -> Result<Self, AggregatorError> {
        let value = header.ok_or(AggregatorError::MissingToken)?.trim();
        let (scheme, token) = value
            .split_once(' ')
            .ok_or(AggregatorError::MissingToken)?;

        if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
            return Err(AggregatorError::MissingToken);
        }

        Ok(BearerToken(token.trim().to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}
