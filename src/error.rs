use std::fmt;

use serde::{Deserialize, Serialize};

/// Problem document returned with 4xx/5xx responses.
///
/// See [RFC 7807] and [RFC 8555 §6.7].
///
/// [RFC 7807]: https://datatracker.ietf.org/doc/html/rfc7807
/// [RFC 8555 §6.7]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.7
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub _type: String,

    pub title: String,

    pub description: String,
}

impl Problem {
    pub(crate) fn new(kind: &str, title: &str, description: impl Into<String>) -> Self {
        Problem {
            _type: format!("urn:ietf:params:acme:error:{kind}"),
            title: title.to_owned(),
            description: description.into(),
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self._type, self.description)
    }
}

/// Failure modes surfaced to ACME clients.
///
/// Every variant maps onto an HTTP status and, for the problem-typed ones,
/// a [`Problem`] body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("bad nonce: {0}")]
    BadNonce(String),

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(#[from] eyre::Report),
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Malformed(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::BadNonce(_) => 400,
            ApiError::NotFound => 404,
            ApiError::Internal(_) => 500,
        }
    }

    /// Problem document for this error, if the taxonomy defines one.
    ///
    /// Plain 404s carry no body.
    pub fn problem(&self) -> Option<Problem> {
        match self {
            ApiError::Malformed(desc) => {
                Some(Problem::new("malformed", "Malformed request", desc.clone()))
            }
            ApiError::Unauthorized(desc) => {
                Some(Problem::new("unauthorized", "Unauthorized", desc.clone()))
            }
            ApiError::BadNonce(desc) => {
                Some(Problem::new("bad-nonce", "Bad nonce", desc.clone()))
            }
            ApiError::NotFound => None,
            ApiError::Internal(report) => Some(Problem::new(
                "serverInternal",
                "Internal error",
                report.to_string(),
            )),
        }
    }
}
