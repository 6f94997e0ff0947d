use std::time::Duration;

use dars_types::feed::{ChangeKind, Table};

#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("gateway connection failed: {0}")]
    Gateway(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("subscription rejected: {0}")]
    Rejected(String),
    #[error("gateway closed the connection")]
    Closed,
    #[error("{what} did not complete within {after:?}")]
    Timeout { what: &'static str, after: Duration },
    #[error("no topic selected")]
    NoTopicSelected,
    #[error("message is empty")]
    EmptyMessage,
    #[error("no failed outgoing message with that id")]
    NotRetryable,
}

/// A change record that cannot be applied to a typed list.
#[derive(Debug, thiserror::Error)]
pub enum MalformedChange {
    #[error("change for table '{got}' on a '{expected}' list")]
    WrongTable { expected: Table, got: Table },
    #[error("{0:?} change without a row")]
    MissingRow(ChangeKind),
    #[error("delete without a row id")]
    MissingId,
    #[error("row does not match the table shape: {0}")]
    Decode(#[from] serde_json::Error),
}
