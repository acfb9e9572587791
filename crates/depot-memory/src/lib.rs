//! In-memory depot server
//!
//! [`MemoryDepot`] keeps users, file revisions, workspaces and changelists in
//! process memory and implements [`DepotServer`]. It behaves like a small
//! depot server for the operations the bridge uses:
//!
//! - `add` of a live file and `edit` without a have-revision are refused
//! - submit reads the staged file from the workspace root
//! - workspaces with open files cannot be deleted
//!
//! Every call is journaled ([`Call`]) and any operation can be made to fail
//! ([`MemoryDepot::fail_on`]), which is what the bridge's integration tests
//! build on.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod connection;
pub mod journal;

pub use connection::MemoryConnection;
pub use journal::{Call, Operation};

use async_trait::async_trait;
use depot_bridge::backend::{
    ChangelistId, ChangelistStatus, ChangelistSummary, DepotConnection, DepotServer, FileAction,
    WorkspaceName, WorkspaceSpec,
};
use depot_bridge::progress::ProgressSink;
use depot_bridge::{BackendError, ServerIdentity};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// One stored revision of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// Revision number, starting at 1
    pub number: u32,
    /// Action that produced the revision
    pub action: FileAction,
    /// File content (empty for deletions)
    pub content: Vec<u8>,
    /// Changelist that submitted it, if any
    pub change: Option<ChangelistId>,
}

#[derive(Debug, Clone)]
pub(crate) struct Changelist {
    pub(crate) id: ChangelistId,
    pub(crate) workspace: WorkspaceName,
    pub(crate) owner: String,
    pub(crate) description: String,
    pub(crate) status: ChangelistStatus,
    pub(crate) opened: Vec<(String, FileAction)>,
}

impl Changelist {
    pub(crate) fn summary(&self) -> ChangelistSummary {
        ChangelistSummary {
            id: self.id,
            workspace: self.workspace.clone(),
            owner: self.owner.clone(),
            description: self.description.clone(),
            status: self.status,
            files: self.opened.iter().map(|(path, _)| path.clone()).collect(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct DepotState {
    pub(crate) users: HashMap<String, String>,
    pub(crate) files: BTreeMap<String, Vec<Revision>>,
    pub(crate) workspaces: HashMap<WorkspaceName, WorkspaceSpec>,
    pub(crate) changelists: BTreeMap<ChangelistId, Changelist>,
    pub(crate) next_change: u64,
    pub(crate) have: HashMap<(WorkspaceName, String), u32>,
    pub(crate) trusted: HashSet<ServerIdentity>,
    pub(crate) failures: HashMap<Operation, BackendError>,
    pub(crate) journal: Vec<Call>,
}

impl DepotState {
    pub(crate) fn head(&self, path: &str) -> Option<&Revision> {
        self.files.get(path).and_then(|revs| revs.last())
    }

    pub(crate) fn head_is_live(&self, path: &str) -> bool {
        self.head(path).is_some_and(|rev| !rev.action.is_deletion())
    }

    /// Journal `call` and return the injected failure for its operation
    pub(crate) fn record(&mut self, call: Call) -> Result<(), BackendError> {
        let operation = call.operation();
        self.journal.push(call);
        match self.failures.get(&operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub(crate) fn commit(&mut self, path: &str, action: FileAction, content: Vec<u8>, change: Option<ChangelistId>) -> u32 {
        let revisions = self.files.entry(path.to_string()).or_default();
        let number = revisions.last().map_or(1, |rev| rev.number + 1);
        revisions.push(Revision {
            number,
            action,
            content,
            change,
        });
        number
    }
}

/// Depot server living in process memory
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryDepot {
    state: Arc<Mutex<DepotState>>,
}

impl MemoryDepot {
    /// Create empty depot without users
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a user that may log in
    #[must_use]
    pub fn with_user(self, principal: impl Into<String>, secret: impl Into<String>) -> Self {
        self.add_user(principal, secret);
        self
    }

    /// Register or replace a user
    pub fn add_user(&self, principal: impl Into<String>, secret: impl Into<String>) {
        self.state.lock().users.insert(principal.into(), secret.into());
    }

    /// Submit `content` as a new revision outside any workspace
    ///
    /// Returns the new revision number.
    pub fn seed_file(&self, path: &str, content: impl Into<Vec<u8>>) -> u32 {
        let mut state = self.state.lock();
        let action = if state.head_is_live(path) {
            FileAction::Edit
        } else {
            FileAction::Add
        };
        state.commit(path, action, content.into(), None)
    }

    /// Mark `path` deleted at head
    pub fn delete_file(&self, path: &str) -> u32 {
        self.state
            .lock()
            .commit(path, FileAction::Delete, Vec::new(), None)
    }

    /// Head revision of `path`
    #[must_use]
    pub fn head(&self, path: &str) -> Option<Revision> {
        self.state.lock().head(path).cloned()
    }

    /// Content of a live head revision
    #[must_use]
    pub fn head_content(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state
            .head(path)
            .filter(|rev| !rev.action.is_deletion())
            .map(|rev| rev.content.clone())
    }

    /// Every revision of `path`, oldest first
    #[must_use]
    pub fn revisions(&self, path: &str) -> Vec<Revision> {
        self.state.lock().files.get(path).cloned().unwrap_or_default()
    }

    /// Currently registered workspaces, sorted
    #[must_use]
    pub fn workspaces(&self) -> Vec<WorkspaceName> {
        let mut names: Vec<_> = self.state.lock().workspaces.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every changelist still open (new or pending)
    #[must_use]
    pub fn pending_changelists(&self) -> Vec<ChangelistSummary> {
        self.state
            .lock()
            .changelists
            .values()
            .filter(|c| c.status.is_open())
            .map(Changelist::summary)
            .collect()
    }

    /// Copy of the call journal
    #[must_use]
    pub fn journal(&self) -> Vec<Call> {
        self.state.lock().journal.clone()
    }

    /// Journal entries scoped to `workspace`
    #[must_use]
    pub fn journal_for(&self, workspace: &WorkspaceName) -> Vec<Call> {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|call| call.workspace() == Some(workspace))
            .cloned()
            .collect()
    }

    /// Empty the call journal
    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }

    /// Make every future `operation` fail with `err`
    pub fn fail_on(&self, operation: Operation, err: BackendError) {
        self.state.lock().failures.insert(operation, err);
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Trust a secure server's fingerprint up front
    pub fn trust(&self, server: &ServerIdentity) {
        self.state.lock().trusted.insert(server.clone());
    }

    /// Whether a secure server's fingerprint is trusted
    #[must_use]
    pub fn is_trusted(&self, server: &ServerIdentity) -> bool {
        self.state.lock().trusted.contains(server)
    }

    pub(crate) fn state(&self) -> &Mutex<DepotState> {
        &self.state
    }
}

/// Fingerprint a secure server presents
#[must_use]
pub fn fingerprint(server: &ServerIdentity) -> String {
    let digest = Sha256::digest(server.address().as_bytes());
    hex::encode_upper(&digest[..20])
        .as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .collect::<Vec<_>>()
        .join(":")
}

#[async_trait]
impl DepotServer for MemoryDepot {
    async fn open(
        &self,
        server: &ServerIdentity,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Box<dyn DepotConnection>, BackendError> {
        self.state.lock().record(Call::Open(server.clone()))?;
        tracing::debug!(%server, "memory depot connection opened");
        Ok(Box::new(MemoryConnection::new(self.clone(), server.clone(), progress)))
    }
}
