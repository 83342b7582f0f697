use std::fmt;
use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

// ── Page level ──

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered HTTP {status}")]
    Status { url: Url, status: StatusCode },
    #[error("failed to read body of {url}: {source}")]
    Body {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    pub fn locator(&self) -> &Url {
        match self {
            Self::Transport { url, .. } | Self::Status { url, .. } | Self::Body { url, .. } => url,
        }
    }

    /// Timeouts, refused connections, 429 and 5xx are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_timeout() || source.is_connect(),
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::Body { source, .. } => source.is_timeout(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StructuralParseError {
    #[error("{url}: no item blocks and no catalog shell found")]
    UnrecognizedPage { url: Url },
    #[error("{url}: next link {href:?} cannot be resolved: {source}")]
    BadNextLink {
        url: Url,
        href: String,
        #[source]
        source: url::ParseError,
    },
}

/// A failure that loses a whole page. The run cannot follow pagination past it.
#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Structure(#[from] StructuralParseError),
}

// ── Item level ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Price,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Title => "title",
            Self::Price => "price",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ItemExtractionError {
    #[error("item {position}: missing {field}")]
    Missing { position: usize, field: Field },
    #[error("item {position}: unparsable {field} {raw:?}")]
    Unparsable {
        position: usize,
        field: Field,
        raw: String,
    },
}

impl ItemExtractionError {
    pub fn field(&self) -> Field {
        match self {
            Self::Missing { field, .. } | Self::Unparsable { field, .. } => *field,
        }
    }
}

// ── Sinks ──

#[derive(Debug, Error)]
pub enum SinkWriteError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}: {source}", .path.display())]
    Database {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
}

impl SinkWriteError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
