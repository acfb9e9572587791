//! Record of every backend call

use depot_bridge::backend::{ChangelistId, WorkspaceName};
use depot_bridge::ServerIdentity;

/// Backend operation, used to inject failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `DepotServer::open`
    Open,
    /// `establish_trust`
    EstablishTrust,
    /// `login`
    Login,
    /// `depot_files`
    DepotFiles,
    /// `contents`
    Contents,
    /// `create_workspace`
    CreateWorkspace,
    /// `delete_workspace`
    DeleteWorkspace,
    /// `create_changelist`
    CreateChangelist,
    /// `add_file`
    AddFile,
    /// `sync_pinned`
    SyncPinned,
    /// `edit_file`
    EditFile,
    /// `refresh_changelist`
    RefreshChangelist,
    /// `submit_changelist`
    SubmitChangelist,
    /// `revert_all`
    RevertAll,
    /// `pending_changelists`
    PendingChangelists,
    /// `delete_pending_changelist`
    DeletePendingChangelist,
}

impl Operation {
    /// Whether the operation changes depot state
    #[must_use]
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Self::CreateWorkspace
                | Self::DeleteWorkspace
                | Self::CreateChangelist
                | Self::AddFile
                | Self::SyncPinned
                | Self::EditFile
                | Self::SubmitChangelist
                | Self::RevertAll
                | Self::DeletePendingChangelist
        )
    }
}

/// One journaled call with its arguments
///
/// Calls are recorded before failure injection, so a failed call still
/// shows up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Connection opened
    Open(ServerIdentity),
    /// Trust requested
    EstablishTrust(ServerIdentity),
    /// Login attempt by principal
    Login(String),
    /// File listing
    DepotFiles(String),
    /// Content fetch
    Contents(String),
    /// Workspace registered
    CreateWorkspace(WorkspaceName),
    /// Workspace removed
    DeleteWorkspace(WorkspaceName),
    /// Changelist requested in workspace
    CreateChangelist(WorkspaceName),
    /// File opened for add
    AddFile(WorkspaceName, ChangelistId, String),
    /// Have-revision pinned
    SyncPinned(WorkspaceName, String),
    /// File opened for edit
    EditFile(WorkspaceName, ChangelistId, String),
    /// Changelist re-read
    RefreshChangelist(WorkspaceName, ChangelistId),
    /// Changelist submitted
    SubmitChangelist(WorkspaceName, ChangelistId),
    /// Open files reverted
    RevertAll(WorkspaceName),
    /// Pending changelists listed
    PendingChangelists(WorkspaceName),
    /// Pending changelist deleted
    DeletePendingChangelist(ChangelistId),
}

impl Call {
    /// Operation this call performed
    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            Self::Open(_) => Operation::Open,
            Self::EstablishTrust(_) => Operation::EstablishTrust,
            Self::Login(_) => Operation::Login,
            Self::DepotFiles(_) => Operation::DepotFiles,
            Self::Contents(_) => Operation::Contents,
            Self::CreateWorkspace(_) => Operation::CreateWorkspace,
            Self::DeleteWorkspace(_) => Operation::DeleteWorkspace,
            Self::CreateChangelist(_) => Operation::CreateChangelist,
            Self::AddFile(..) => Operation::AddFile,
            Self::SyncPinned(..) => Operation::SyncPinned,
            Self::EditFile(..) => Operation::EditFile,
            Self::RefreshChangelist(..) => Operation::RefreshChangelist,
            Self::SubmitChangelist(..) => Operation::SubmitChangelist,
            Self::RevertAll(_) => Operation::RevertAll,
            Self::PendingChangelists(_) => Operation::PendingChangelists,
            Self::DeletePendingChangelist(_) => Operation::DeletePendingChangelist,
        }
    }

    /// Workspace the call was scoped to, if any
    #[must_use]
    pub fn workspace(&self) -> Option<&WorkspaceName> {
        match self {
            Self::CreateWorkspace(ws)
            | Self::DeleteWorkspace(ws)
            | Self::CreateChangelist(ws)
            | Self::AddFile(ws, ..)
            | Self::SyncPinned(ws, _)
            | Self::EditFile(ws, ..)
            | Self::RefreshChangelist(ws, _)
            | Self::SubmitChangelist(ws, _)
            | Self::RevertAll(ws)
            | Self::PendingChangelists(ws) => Some(ws),
            _ => None,
        }
    }

    /// Whether the call changes depot state
    #[inline]
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        self.operation().is_mutating()
    }
}
