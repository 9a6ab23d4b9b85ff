use std::path::PathBuf;

use thiserror::Error;

use crate::session::AuthState;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the download pipeline.
///
/// Authentication variants are fatal to a run; search and per-file variants are
/// recorded in the run report and the batch carries on.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid area of interest: {0}")]
    InvalidArea(String),

    #[error("area budget must be a positive number of km², got {0}")]
    InvalidBudget(f64),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("network error during authentication ({stage}): {source}")]
    AuthNetwork {
        stage: AuthState,
        #[source]
        source: reqwest::Error,
    },

    #[error(
        "login form not found on {url}.\n- The identity provider may have changed its login page, or the request was redirected to an unexpected page\n- Check the configured authentication endpoint and client id"
    )]
    AuthFormNotFound { url: String },

    #[error(
        "authentication failed - check credentials (HTTP {status}, ended at {url}).\n- Verify the username and password by signing in through a browser\n- Accounts with pending terms acceptance are redirected away from the portal"
    )]
    InvalidCredentials { status: u16, url: String },

    #[error(
        "authentication test failed: {reason}.\n- The portal accepted the login but the catalog API rejected the session\n- Retry later; the service may be refusing new sessions"
    )]
    ProbeFailed { reason: String },

    #[error("catalog search failed for {area}: {source}")]
    SearchTransport {
        area: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("connection error downloading {url}: {source}")]
    DownloadTransport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download interrupted for {url}: {source}")]
    DownloadInterrupted {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("download request failed: HTTP {status} for url ({url})")]
    DownloadStatus { url: String, status: u16 },

    #[error("session invalidated while downloading {url} (server answered with {content_type})")]
    SessionInvalidated { url: String, content_type: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error means the run cannot continue without a session.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::AuthNetwork { .. }
                | Self::InvalidEndpoint { .. }
                | Self::AuthFormNotFound { .. }
                | Self::InvalidCredentials { .. }
                | Self::ProbeFailed { .. }
        )
    }

    /// Transient failures worth another attempt of the same transfer.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::DownloadTransport { .. } | Self::DownloadInterrupted { .. } => true,
            Self::DownloadStatus { status, .. } => crate::util::retriable_status(*status),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_fatal() {
        let err = Error::InvalidCredentials {
            status: 200,
            url: "https://auth.example/login-actions/authenticate".into(),
        };
        assert!(err.is_auth());
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("check credentials"));

        assert!(Error::ProbeFailed { reason: "HTTP 401".into() }.is_auth());
        assert!(!Error::Cancelled.is_auth());
    }

    #[test]
    fn retriable_statuses() {
        let busy = Error::DownloadStatus {
            url: "https://x/a.tif".into(),
            status: 503,
        };
        let missing = Error::DownloadStatus {
            url: "https://x/a.tif".into(),
            status: 404,
        };
        assert!(busy.is_retriable());
        assert!(!missing.is_retriable());
    }
}
