//! Error types for feed loading and record parsing.

use thiserror::Error;

/// Errors raised while loading a region feed or reading its records.
///
/// Only the feed boundary surfaces these to callers. Inside the engine a
/// `MalformedDate` just drops the record from date-based views.
#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("feed not found: {url}")]
    FeedNotFound { url: String },

    #[error("feed request failed with HTTP {status}: {url}")]
    FeedHttp { status: u16, url: String },

    #[error("feed is not valid JSON: {0}")]
    FeedParse(#[from] serde_json::Error),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed date: {raw}")]
    MalformedDate { raw: String },
}

impl CalendarError {
    /// Short machine-readable kind, used in logs and fallback messages.
    pub fn kind(&self) -> &'static str {
        match self {
            CalendarError::FeedNotFound { .. } => "NOT_FOUND",
            CalendarError::FeedHttp { .. } => "HTTP",
            CalendarError::FeedParse(_) => "PARSE",
            CalendarError::Network(_) => "NETWORK",
            CalendarError::InvalidUrl(_) => "URL",
            CalendarError::Io(_) => "IO",
            CalendarError::MalformedDate { .. } => "MALFORMED_DATE",
        }
    }

    /// Whether the caller should treat this like a failed download.
    ///
    /// A document that does not parse is handled exactly like a network
    /// failure: the previous render stays on screen.
    pub fn is_fetch_failure(&self) -> bool {
        !matches!(self, CalendarError::MalformedDate { .. })
    }
}

/// Result alias for calendar operations.
pub type CalendarResult<T> = Result<T, CalendarError>;
