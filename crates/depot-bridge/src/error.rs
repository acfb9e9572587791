//! Error types for the depot bridge
//!
//! Two layers of errors:
//! - [`BackendError`]: what the depot collaborator reports
//! - [`BridgeError`]: what callers of the bridge see

use crate::server::ServerIdentity;
use std::path::PathBuf;

/// Failure reported by the depot collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Transport or network failure
    #[error("connection failure: {0}")]
    Connection(String),

    /// Principal/secret rejected or permission denied
    #[error("access denied: {0}")]
    Access(String),

    /// Server understood the request and refused it
    #[error("request rejected: {0}")]
    Request(String),
}

impl BackendError {
    /// Message carried by the error, without the classification prefix
    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Connection(m) | Self::Access(m) | Self::Request(m) => m,
        }
    }
}

/// Main bridge error type
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Locator could not be split into scheme/host/port/path
    #[error("malformed locator '{locator}': {reason}")]
    MalformedLocator {
        /// Offending input
        locator: String,
        /// Why it was rejected
        reason: String,
    },

    /// No credential cached for this session and server
    #[error("authentication required for {locator}")]
    AuthenticationRequired {
        /// Locator to authenticate against, handed back to the caller
        locator: String,
        /// Server the credential is missing for
        server: ServerIdentity,
    },

    /// Server rejected principal/secret
    #[error("authentication failed for {principal} on {server}: {message}")]
    AuthenticationFailed {
        /// Server that rejected the login
        server: ServerIdentity,
        /// Principal that attempted the login
        principal: String,
        /// Server message
        message: String,
    },

    /// Transport failure while talking to the server
    #[error("connection to {server} failed: {message}")]
    ConnectionError {
        /// Target server
        server: ServerIdentity,
        /// Transport message
        message: String,
    },

    /// Read target absent or deleted at head
    #[error("{path} not found")]
    NotFound {
        /// Repository path that was requested
        path: String,
    },

    /// Ephemeral workspace could not be registered
    #[error("error creating workspace {workspace}: {source}")]
    WorkspaceCreation {
        /// Name of the workspace that failed
        workspace: String,
        /// Backend cause
        #[source]
        source: BackendError,
    },

    /// Server rejected the changelist submission
    #[error("submit of {path} from workspace {workspace} failed: {source}")]
    Submit {
        /// Repository path being submitted
        path: String,
        /// Workspace the submit ran in
        workspace: String,
        /// Backend cause
        #[source]
        source: BackendError,
    },

    /// Unclassified backend failure
    #[error("backend error: {0}")]
    Backend(String),

    /// Local temp file staging failed
    #[error("io error staging {path}: {source}")]
    LocalIo {
        /// Local path involved
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Configuration is invalid or unreadable
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl BridgeError {
    /// Check if the caller must (re)authenticate before retrying
    #[inline]
    #[must_use]
    pub fn requires_authentication(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationRequired { .. } | Self::AuthenticationFailed { .. }
        )
    }

    /// Create malformed locator error
    pub fn malformed(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedLocator {
            locator: locator.into(),
            reason: reason.into(),
        }
    }

    /// Create local IO error for path
    pub fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// Classify a backend failure seen while connecting to `server`
    pub fn from_connect(server: &ServerIdentity, principal: &str, err: BackendError) -> Self {
        match err {
            BackendError::Access(message) => Self::AuthenticationFailed {
                server: server.clone(),
                principal: principal.to_string(),
                message,
            },
            BackendError::Connection(message) | BackendError::Request(message) => {
                Self::ConnectionError {
                    server: server.clone(),
                    message,
                }
            }
        }
    }

    /// Classify a backend failure seen on an established connection
    pub fn from_backend(server: &ServerIdentity, err: BackendError) -> Self {
        match err {
            BackendError::Connection(message) => Self::ConnectionError {
                server: server.clone(),
                message,
            },
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<BackendError> for BridgeError {
    fn from(err: BackendError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// TOML could not be parsed
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
