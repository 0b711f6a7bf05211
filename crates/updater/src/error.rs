/// Convenient result alias for updater operations.
pub type Result<T> = std::result::Result<T, UpdaterError>;

/// Errors that can occur while configuring or running an update.
#[derive(thiserror::Error, Debug)]
pub enum UpdaterError {
    /// A required configuration field was missing or inconsistent.
    #[error("invalid updater configuration: {0}")]
    Configuration(String),
    /// The file-name pattern supplied with `paramRegex` did not compile.
    #[error("invalid file name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    /// The configuration could not be decoded from JSON.
    #[error("configuration decoding failed: {0}")]
    ConfigDecode(#[from] serde_json::Error),
    /// The host has no installed version registered for the package.
    #[error("package `{0}` is not installed or has no version")]
    PackageNotFound(String),
    /// The host reported an HTTP or download failure.
    #[error("request for {url} failed: {message}")]
    Network {
        /// Remote URL that failed.
        url: String,
        /// Error text reported by the host.
        message: String,
    },
    /// A version string was not three dot-separated integers.
    #[error("malformed version `{input}`: {reason}")]
    VersionParse {
        /// The offending input.
        input: String,
        /// Which part of the input was rejected.
        reason: String,
    },
    /// Failed to manage the temporary download directory.
    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),
    /// A host collaborator rejected a request.
    #[error("host operation failed: {0}")]
    Host(String),
    /// Another update for the same package held the running guard for too long.
    #[error("another update of `{0}` is still running")]
    Busy(String),
    /// The update did not complete before the running guard expired.
    #[error("update of `{0}` timed out")]
    Timeout(String),
}

impl UpdaterError {
    /// Helper for wrapping configuration validation failures.
    pub fn configuration(msg: impl Into<String>) -> Self {
        UpdaterError::Configuration(msg.into())
    }

    /// Helper for host implementations reporting a failed request.
    pub fn host(msg: impl Into<String>) -> Self {
        UpdaterError::Host(msg.into())
    }
}
