//! Error taxonomy shared by every log source.

use std::io;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use weblogview_types::PodTarget;

/// Matches error text from the API server or the auth plugins that means the
/// credentials are no longer accepted.
static AUTH_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)unauthori[sz]ed|forbidden|authenticat").expect("static pattern compiles")
});

/// Conditions that end a tail
#[derive(Debug, Error)]
pub enum TailError {
    /// The file or pod does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// The file is larger than the configured snapshot scan limit
    #[error("file is {size} bytes, larger than the {limit} byte limit")]
    SizeLimitExceeded { size: u64, limit: u64 },

    /// A single line grew past the configured maximum length
    #[error("line exceeds the maximum length of {limit} bytes")]
    LineTooLong { limit: usize },

    /// The source went away (file removed or renamed, pod stream closed)
    #[error("{0}")]
    SourceEnded(String),

    /// The cluster rejected our credentials
    #[error(
        "authentication expired or insufficient permissions - please re-authenticate with your cluster: {0}"
    )]
    AuthExpired(String),

    /// Stop was requested
    #[error("tail cancelled")]
    Cancelled,

    /// Any other read, stat, watch or connect failure
    #[error("{0}")]
    InternalIo(String),
}

impl TailError {
    /// Whether the client should hear about this condition
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Classify a failure while reading an open pod log stream
    pub(crate) fn from_stream_io(err: io::Error) -> Self {
        let text = err.to_string();
        if is_auth_failure(&text) {
            Self::AuthExpired(text)
        } else {
            Self::InternalIo(format!("error reading log stream: {}", text))
        }
    }

    /// Classify a failure opening a pod log stream
    pub(crate) fn from_kube(err: kube::Error, target: &PodTarget) -> Self {
        if let kube::Error::Api(response) = &err {
            match response.code {
                401 | 403 => return Self::AuthExpired(response.message.clone()),
                404 => return Self::NotFound(format!("pod {}", target)),
                _ => {}
            }
        }

        let text = err.to_string();
        if is_auth_failure(&text) {
            Self::AuthExpired(text)
        } else {
            Self::InternalIo(format!("failed to open log stream: {}", text))
        }
    }

    /// Classify a failure building the cluster client
    pub(crate) fn from_client(err: anyhow::Error) -> Self {
        let text = format!("{:#}", err);
        if is_auth_failure(&text) {
            Self::AuthExpired(text)
        } else {
            Self::InternalIo(format!("Failed to connect to Kubernetes: {}", text))
        }
    }
}

impl From<io::Error> for TailError {
    fn from(err: io::Error) -> Self {
        Self::InternalIo(err.to_string())
    }
}

/// Whether error text indicates an unauthorized, forbidden or failed
/// authentication response
pub fn is_auth_failure(text: &str) -> bool {
    AUTH_FAILURE.is_match(text)
}
