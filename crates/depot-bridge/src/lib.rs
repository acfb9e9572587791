//! Depot Bridge
//!
//! Read and write single files of a versioned depot server through
//! URL-style locators such as `perforce://host:1666//depot/dir/file.txt`.
//!
//! # Core Operations
//!
//! - **Login**: cache a principal/secret per (session, server)
//! - **Read**: stream the head revision of a file
//! - **Write**: submit bytes as a new revision through a throw-away workspace
//!
//! # Architecture
//!
//! ```text
//! locator → Locator::parse → CredentialStore → BackendConnector ─┬→ read::read
//!                                                                 └→ SubmitCoordinator
//! ```
//!
//! The depot protocol itself sits behind [`backend::DepotServer`] and
//! [`backend::DepotConnection`].
//!
//! # Example
//!
//! ```rust,ignore
//! use depot_bridge::prelude::*;
//!
//! # async fn example(server: std::sync::Arc<dyn DepotServer>) -> BridgeResult<()> {
//! let bridge = DepotBridge::new(server, &BridgeConfig::new())?;
//! let session = SessionId::new("web-session-1");
//!
//! bridge.login(&session, "perforce://depot:1666", "alice", "secret").await?;
//! bridge.write(&session, "perforce://depot:1666//depot/sample.txt", b"hello").await?;
//! let stream = bridge.read(&session, "perforce://depot:1666//depot/sample.txt").await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod backend;
pub mod bridge;
pub mod config;
pub mod connector;
pub mod credentials;
pub mod error;
pub mod locator;
pub mod progress;
pub mod read;
pub mod server;
pub mod submit;

// Re-exports for convenience
pub use bridge::{DepotBridge, ResourceWriter};
pub use config::BridgeConfig;
pub use credentials::{Credential, CredentialStore, SessionId};
pub use error::{BackendError, BridgeError, BridgeResult, ConfigError};
pub use locator::{Locator, RepositoryPath, Scheme};
pub use server::ServerIdentity;
pub use submit::{SubmitAction, SubmitCoordinator, SubmitOutcome};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for bridge users and backend implementors
    pub use crate::backend::{
        ByteStream, ChangelistId, ChangelistStatus, ChangelistSummary, DepotConnection, DepotServer,
        FileAction, FileSpec, FileStatus, NewChangelist, OpStatus, TrustPolicy, WorkspaceName,
        WorkspaceSpec,
    };
    pub use crate::bridge::{DepotBridge, ResourceWriter};
    pub use crate::config::BridgeConfig;
    pub use crate::credentials::{Credential, CredentialStore, SessionId};
    pub use crate::error::{BackendError, BridgeError, BridgeResult};
    pub use crate::locator::{Locator, RepositoryPath};
    pub use crate::progress::{NoopProgress, ProgressSink, TracingProgress};
    pub use crate::server::ServerIdentity;
    pub use crate::submit::{SubmitAction, SubmitOutcome};
}
