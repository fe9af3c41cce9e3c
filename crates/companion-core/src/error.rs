//! Error types for the chat and download paths.
//!
//! Neither enum escapes to the presentation layer as a fault: the session
//! folds [`ModelError`] into a diagnostic reply and the download manager
//! renders [`DownloadError`] as a status string.

/// Failures of a single chat completion against the model endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The endpoint could not be reached (connection refused, DNS, reset).
    #[error("could not reach model server at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with a non-success status.
    #[error("model server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not the expected JSON shape.
    #[error("invalid response from model server: {0}")]
    Decode(String),

    /// No answer within the configured request timeout.
    #[error("model server did not answer within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The caller cancelled the in-flight request.
    #[error("request cancelled")]
    Cancelled,
}

/// Failures reported by [`crate::download::DownloadManager::start`].
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Error: Another download is already in progress. Please wait or stop it.")]
    AlreadyRunning,

    #[error("Error: Enter a download command, e.g. `ollama pull deepseek-r1:1.5b`.")]
    EmptyCommand,

    /// The shell could not be spawned at all.
    #[error("Error: Could not start download. Details: {0}")]
    Spawn(#[source] std::io::Error),
}
