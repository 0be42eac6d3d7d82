use std::fmt;

/// Errors returned by the remote-service adapters (Spade, Boost, aria2, Lotus).
///
/// Pattern:
/// - Transport problems (`Http`, 5xx `Status`) are transient; the caller retries on its next tick
///   or attempt.
/// - Everything else means the remote answered and we could not use the answer.
#[derive(Debug)]
pub enum ClientError {
    /// The request never produced a response (connect, TLS, timeout, body read).
    Http { op: String, source: reqwest::Error },

    /// The remote answered with an unexpected HTTP status.
    Status { op: String, status: u16, body: String },

    /// The response body did not match the schema we expect.
    Decode {
        op: String,
        source: serde_json::Error,
        raw: String,
    },

    /// A JSON-RPC error object was returned.
    Rpc { op: String, code: i64, message: String },

    /// The remote understood the request and refused it.
    Rejected { op: String, reason: String },

    /// We were asked to send something the remote cannot accept.
    InvalidInput { op: String, what: String },
}

impl ClientError {
    pub fn http(op: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            op: op.into(),
            source,
        }
    }

    pub fn decode(op: impl Into<String>, source: serde_json::Error, raw: &[u8]) -> Self {
        Self::Decode {
            op: op.into(),
            source,
            raw: crate::logging::shorten_body(raw),
        }
    }

    pub fn rejected(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            op: op.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_input(op: impl Into<String>, what: impl Into<String>) -> Self {
        Self::InvalidInput {
            op: op.into(),
            what: what.into(),
        }
    }

    /// An RPC error naming an object the remote does not have, e.g. aria2's `GID ... is not found`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Rpc { message, .. } if message.contains("not found"))
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { op, source } => write!(f, "{op}: request failed: {source}"),
            Self::Status { op, status, body } => {
                write!(f, "{op}: unexpected HTTP status {status}: {body}")
            }
            Self::Decode { op, source, raw } => {
                write!(f, "{op}: could not decode response ({source}): {raw}")
            }
            Self::Rpc { op, code, message } => write!(f, "{op}: rpc error {code}: {message}"),
            Self::Rejected { op, reason } => write!(f, "{op}: rejected: {reason}"),
            Self::InvalidInput { op, what } => write!(f, "{op}: invalid input: {what}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http { source, .. } => Some(source),
            Self::Decode { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
