//! Depot collaborator interface
//!
//! The bridge never speaks the depot wire protocol itself. It drives a
//! [`DepotServer`] (opens connections) and the [`DepotConnection`]s it hands
//! out. Every workspace-scoped call names its workspace explicitly; a
//! connection carries no "current workspace" state.

use crate::error::BackendError;
use crate::locator::RepositoryPath;
use crate::progress::ProgressSink;
use crate::server::ServerIdentity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Streamed file content
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Per-spec status reported by the depot for a file operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpStatus {
    /// Operation succeeded for this file
    Valid,
    /// Informational message, no action taken
    Info,
    /// Operation failed for this file
    Error,
}

/// Action recorded for a file revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileAction {
    /// File added
    Add,
    /// File edited
    Edit,
    /// File deleted
    Delete,
    /// File moved away (deleted at source)
    MoveDelete,
}

impl FileAction {
    /// Whether a head revision with this action means "no live file"
    #[inline]
    #[must_use]
    pub fn is_deletion(self) -> bool {
        matches!(self, Self::Delete | Self::MoveDelete)
    }
}

/// One entry of a file listing or a submit result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    /// Outcome for this entry
    pub status: OpStatus,
    /// Depot path the entry refers to, if any
    pub depot_path: Option<String>,
    /// Head revision number
    pub revision: Option<u32>,
    /// Head action
    pub action: Option<FileAction>,
    /// Server message for `Info`/`Error` entries
    pub message: Option<String>,
}

impl FileSpec {
    /// Valid entry for a depot path at a revision
    #[must_use]
    pub fn valid(depot_path: impl Into<String>, revision: u32, action: FileAction) -> Self {
        Self {
            status: OpStatus::Valid,
            depot_path: Some(depot_path.into()),
            revision: Some(revision),
            action: Some(action),
            message: None,
        }
    }

    /// Informational entry
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::with_message(OpStatus::Info, message)
    }

    /// Error entry
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_message(OpStatus::Error, message)
    }

    fn with_message(status: OpStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            depot_path: None,
            revision: None,
            action: None,
            message: Some(message.into()),
        }
    }
}

/// Name of an ephemeral workspace
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkspaceName(String);

impl WorkspaceName {
    /// Wrap a workspace name
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for WorkspaceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Definition of a single-file workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceSpec {
    /// Unique workspace name
    pub name: WorkspaceName,
    /// Local directory the workspace is rooted at
    pub root: PathBuf,
    /// Owning principal
    pub owner: String,
    /// Depot side of the single view mapping
    pub depot_path: RepositoryPath,
    /// Local side of the mapping, relative to `root`
    pub local_name: String,
}

impl WorkspaceSpec {
    /// Workspace-side view target, e.g. `//ws-name/file.txt`
    #[must_use]
    pub fn view_target(&self) -> String {
        format!("//{}/{}", self.name, self.local_name)
    }

    /// Absolute local file the mapping points at
    #[must_use]
    pub fn local_file(&self) -> PathBuf {
        self.root.join(&self.local_name)
    }
}

/// Changelist number assigned by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChangelistId(pub u64);

impl Display for ChangelistId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Changelist lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangelistStatus {
    /// Created on the server, no file opened yet
    New,
    /// Known to the server, holds open files
    Pending,
    /// Committed as a new revision
    Submitted,
}

impl ChangelistStatus {
    /// Whether the changelist is still open on the server (`New` or `Pending`)
    #[inline]
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::New | Self::Pending)
    }
}

/// Changelist to be created on the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChangelist {
    /// Workspace the changelist belongs to
    pub workspace: WorkspaceName,
    /// Owning principal
    pub owner: String,
    /// Description recorded with the revision
    pub description: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Changelist as reported by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelistSummary {
    /// Server-assigned number
    pub id: ChangelistId,
    /// Workspace the changelist belongs to
    pub workspace: WorkspaceName,
    /// Owning principal
    pub owner: String,
    /// Description
    pub description: String,
    /// Current status
    pub status: ChangelistStatus,
    /// Files currently open in the changelist
    pub files: Vec<String>,
}

/// Trust policy for secured transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustPolicy {
    /// Accept and record an unknown server fingerprint on first use
    #[default]
    AcceptOnFirstUse,
    /// Only connect to servers whose fingerprint is already trusted
    Strict,
}

/// Factory for connections to depot servers
#[async_trait]
pub trait DepotServer: Send + Sync {
    /// Open an unauthenticated connection to `server`
    ///
    /// # Errors
    /// `BackendError::Connection` if the server cannot be reached
    async fn open(
        &self,
        server: &ServerIdentity,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Box<dyn DepotConnection>, BackendError>;
}

/// One connection to a depot server
///
/// Obtained from [`DepotServer::open`], authenticated once, then used for a
/// single read or submit.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DepotConnection: Send + Sync {
    /// Server this connection talks to
    fn server(&self) -> &ServerIdentity;

    /// Principal the connection is logged in as (empty before login)
    fn principal(&self) -> &str;

    /// Establish trust in the server's fingerprint (secure transports only)
    async fn establish_trust(&mut self, policy: TrustPolicy) -> Result<(), BackendError>;

    /// Authenticate
    async fn login(&mut self, principal: &str, secret: &str) -> Result<(), BackendError>;

    /// List depot files matching `path` at head revision
    async fn depot_files(&self, path: &RepositoryPath) -> Result<Vec<FileSpec>, BackendError>;

    /// Stream head content of `path`
    async fn contents(&self, path: &RepositoryPath) -> Result<ByteStream, BackendError>;

    /// Register a workspace
    async fn create_workspace(&self, spec: &WorkspaceSpec) -> Result<(), BackendError>;

    /// Remove a workspace
    async fn delete_workspace(&self, workspace: &WorkspaceName) -> Result<(), BackendError>;

    /// Create a changelist and return its server-assigned number
    async fn create_changelist(&self, change: &NewChangelist) -> Result<ChangelistId, BackendError>;

    /// Open `path` for add in `change`
    async fn add_file(
        &self,
        workspace: &WorkspaceName,
        change: ChangelistId,
        path: &RepositoryPath,
    ) -> Result<Vec<FileSpec>, BackendError>;

    /// Record the head revision as had without transferring content (`sync -k`)
    async fn sync_pinned(
        &self,
        workspace: &WorkspaceName,
        path: &RepositoryPath,
    ) -> Result<Vec<FileSpec>, BackendError>;

    /// Open `path` for edit in `change`
    async fn edit_file(
        &self,
        workspace: &WorkspaceName,
        change: ChangelistId,
        path: &RepositoryPath,
    ) -> Result<Vec<FileSpec>, BackendError>;

    /// Re-read a changelist from the server
    async fn refresh_changelist(
        &self,
        workspace: &WorkspaceName,
        change: ChangelistId,
    ) -> Result<ChangelistSummary, BackendError>;

    /// Submit a changelist, returning per-file results
    async fn submit_changelist(
        &self,
        workspace: &WorkspaceName,
        change: ChangelistId,
    ) -> Result<Vec<FileSpec>, BackendError>;

    /// Revert every file open in the workspace
    async fn revert_all(&self, workspace: &WorkspaceName) -> Result<Vec<FileSpec>, BackendError>;

    /// Pending changelists owned by `owner` in `workspace`, newest first
    async fn pending_changelists(
        &self,
        workspace: &WorkspaceName,
        owner: &str,
        limit: usize,
    ) -> Result<Vec<ChangelistSummary>, BackendError>;

    /// Delete a pending changelist
    async fn delete_pending_changelist(&self, change: ChangelistId) -> Result<(), BackendError>;
}

/// Existence of a file at head revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    /// Never submitted
    Absent,
    /// Head revision is live
    PresentLive,
    /// Head revision is a deletion
    PresentDeleted,
}

impl FileStatus {
    /// Classify a depot file listing
    ///
    /// The first valid entry decides. Listings without a valid entry yield
    /// `Absent`; their error messages are returned alongside so callers can
    /// tell "no such file" from a rejected query.
    #[must_use]
    pub fn classify(listing: &[FileSpec]) -> (Self, Option<&str>) {
        if let Some(spec) = listing.iter().find(|s| s.status == OpStatus::Valid) {
            let status = match spec.action {
                None => Self::Absent,
                Some(action) if action.is_deletion() => Self::PresentDeleted,
                Some(_) => Self::PresentLive,
            };
            return (status, None);
        }
        let error = listing
            .iter()
            .find(|s| s.status == OpStatus::Error)
            .and_then(|s| s.message.as_deref());
        (Self::Absent, error)
    }

    /// Whether a live head revision exists
    #[inline]
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::PresentLive)
    }
}
