//! Connections handed out by [`MemoryDepot`]

use crate::journal::Call;
use crate::{fingerprint, Changelist, DepotState, MemoryDepot};
use async_trait::async_trait;
use depot_bridge::backend::{
    ByteStream, ChangelistId, ChangelistStatus, ChangelistSummary, DepotConnection, FileAction,
    FileSpec, NewChangelist, TrustPolicy, WorkspaceName, WorkspaceSpec,
};
use depot_bridge::progress::ProgressSink;
use depot_bridge::{BackendError, RepositoryPath, ServerIdentity};
use parking_lot::MutexGuard;
use std::fmt::{self, Debug, Formatter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// One logged-in (or not yet logged-in) session with a [`MemoryDepot`]
pub struct MemoryConnection {
    depot: MemoryDepot,
    server: ServerIdentity,
    principal: String,
    trusted: bool,
    progress: Arc<dyn ProgressSink>,
    commands: AtomicU32,
}

impl MemoryConnection {
    pub(crate) fn new(depot: MemoryDepot, server: ServerIdentity, progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            depot,
            server,
            principal: String::new(),
            trusted: false,
            progress,
            commands: AtomicU32::new(0),
        }
    }

    /// Journal `call`, apply injected failures and check the session may
    /// run commands; the returned guard holds the depot state
    fn begin(&self, call: Call) -> Result<(u32, MutexGuard<'_, DepotState>), BackendError> {
        let key = self.commands.fetch_add(1, Ordering::Relaxed) + 1;
        self.progress.start(key);
        let mut state = self.depot.state().lock();
        let checked = state.record(call).and_then(|()| self.check_session());
        match checked {
            Ok(()) => Ok((key, state)),
            Err(e) => {
                self.progress.stop(key);
                Err(e)
            }
        }
    }

    fn finish<T>(&self, key: u32, result: Result<T, BackendError>) -> Result<T, BackendError> {
        self.progress.stop(key);
        result
    }

    fn check_session(&self) -> Result<(), BackendError> {
        if self.server.is_secure() && !self.trusted {
            return Err(BackendError::Connection("server fingerprint not trusted".into()));
        }
        if self.principal.is_empty() {
            return Err(BackendError::Access("perforce password (P4PASSWD) invalid or unset".into()));
        }
        Ok(())
    }
}

impl Debug for MemoryConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("server", &self.server)
            .field("principal", &self.principal)
            .field("trusted", &self.trusted)
            .finish_non_exhaustive()
    }
}

fn workspace<'a>(state: &'a DepotState, name: &WorkspaceName) -> Result<&'a WorkspaceSpec, BackendError> {
    state
        .workspaces
        .get(name)
        .ok_or_else(|| BackendError::Request(format!("client '{name}' unknown")))
}

/// Open `path` in `change`, moving a new changelist to pending
fn open_in(
    state: &mut DepotState,
    name: &WorkspaceName,
    change: ChangelistId,
    path: &RepositoryPath,
    action: FileAction,
) -> Result<(), BackendError> {
    match state.changelists.get_mut(&change) {
        Some(c) if c.workspace == *name && c.status.is_open() => {
            c.opened.push((path.to_string(), action));
            c.status = ChangelistStatus::Pending;
            Ok(())
        }
        Some(_) => Err(BackendError::Request(format!(
            "change {change} is not pending in client '{name}'"
        ))),
        None => Err(BackendError::Request(format!("change {change} unknown"))),
    }
}

fn in_view(state: &DepotState, name: &WorkspaceName, path: &RepositoryPath) -> Result<bool, BackendError> {
    Ok(workspace(state, name)?.depot_path == *path)
}

fn is_open(state: &DepotState, name: &WorkspaceName, path: &str) -> bool {
    state
        .changelists
        .values()
        .filter(|c| c.workspace == *name && c.status.is_open())
        .any(|c| c.opened.iter().any(|(p, _)| p == path))
}

fn staged_submit(
    state: &DepotState,
    name: &WorkspaceName,
    change: ChangelistId,
) -> Result<(PathBuf, Vec<(String, FileAction)>), BackendError> {
    let spec = workspace(state, name)?;
    let opened = match state.changelists.get(&change) {
        Some(c) if c.workspace == *name && c.status.is_open() => c.opened.clone(),
        _ => return Err(BackendError::Request(format!("change {change} is not pending"))),
    };
    if opened.is_empty() {
        return Err(BackendError::Request("No files to submit.".into()));
    }
    Ok((spec.local_file(), opened))
}

#[async_trait]
impl DepotConnection for MemoryConnection {
    fn server(&self) -> &ServerIdentity {
        &self.server
    }

    fn principal(&self) -> &str {
        &self.principal
    }

    async fn establish_trust(&mut self, policy: TrustPolicy) -> Result<(), BackendError> {
        let mut state = self.depot.state().lock();
        state.record(Call::EstablishTrust(self.server.clone()))?;
        if !state.trusted.contains(&self.server) {
            if policy == TrustPolicy::Strict {
                return Err(BackendError::Connection(format!(
                    "the authenticity of '{}' can't be established, fingerprint {}",
                    self.server.address(),
                    fingerprint(&self.server)
                )));
            }
            tracing::info!(server = %self.server, fingerprint = %fingerprint(&self.server), "trusting new server");
            state.trusted.insert(self.server.clone());
        }
        self.trusted = true;
        Ok(())
    }

    async fn login(&mut self, principal: &str, secret: &str) -> Result<(), BackendError> {
        let mut state = self.depot.state().lock();
        state.record(Call::Login(principal.to_string()))?;
        if self.server.is_secure() && !self.trusted {
            return Err(BackendError::Connection("server fingerprint not trusted".into()));
        }
        match state.users.get(principal) {
            Some(stored) if stored == secret => {
                drop(state);
                self.principal = principal.to_string();
                Ok(())
            }
            _ => Err(BackendError::Access("password invalid".into())),
        }
    }

    async fn depot_files(&self, path: &RepositoryPath) -> Result<Vec<FileSpec>, BackendError> {
        let (key, state) = self.begin(Call::DepotFiles(path.to_string()))?;
        let listing = match state.head(path.as_str()) {
            Some(rev) => vec![FileSpec::valid(path.as_str(), rev.number, rev.action)],
            None => vec![FileSpec::info(format!("{path} - no such file(s)."))],
        };
        drop(state);
        self.finish(key, Ok(listing))
    }

    async fn contents(&self, path: &RepositoryPath) -> Result<ByteStream, BackendError> {
        let (key, state) = self.begin(Call::Contents(path.to_string()))?;
        let result = match state.head(path.as_str()) {
            Some(rev) if !rev.action.is_deletion() => {
                Ok(Box::pin(std::io::Cursor::new(rev.content.clone())) as ByteStream)
            }
            _ => Err(BackendError::Request(format!("{path} - no such file(s)."))),
        };
        drop(state);
        self.finish(key, result)
    }

    async fn create_workspace(&self, spec: &WorkspaceSpec) -> Result<(), BackendError> {
        let (key, mut state) = self.begin(Call::CreateWorkspace(spec.name.clone()))?;
        let result = if state.workspaces.contains_key(&spec.name) {
            Err(BackendError::Request(format!("client '{}' already exists", spec.name)))
        } else {
            state.workspaces.insert(spec.name.clone(), spec.clone());
            Ok(())
        };
        drop(state);
        self.finish(key, result)
    }

    async fn delete_workspace(&self, name: &WorkspaceName) -> Result<(), BackendError> {
        let (key, mut state) = self.begin(Call::DeleteWorkspace(name.clone()))?;
        let busy = state
            .changelists
            .values()
            .any(|c| c.workspace == *name && c.status.is_open());
        let result = if !state.workspaces.contains_key(name) {
            Err(BackendError::Request(format!("client '{name}' doesn't exist")))
        } else if busy {
            Err(BackendError::Request(format!(
                "client '{name}' has pending changes, use -f to force delete"
            )))
        } else {
            state.workspaces.remove(name);
            state.have.retain(|(ws, _), _| ws != name);
            Ok(())
        };
        drop(state);
        self.finish(key, result)
    }

    async fn create_changelist(&self, change: &NewChangelist) -> Result<ChangelistId, BackendError> {
        let (key, mut state) = self.begin(Call::CreateChangelist(change.workspace.clone()))?;
        let result = if let Err(e) = workspace(&state, &change.workspace) {
            Err(e)
        } else {
            state.next_change += 1;
            let id = ChangelistId(state.next_change);
            state.changelists.insert(
                id,
                Changelist {
                    id,
                    workspace: change.workspace.clone(),
                    owner: change.owner.clone(),
                    description: change.description.clone(),
                    status: ChangelistStatus::New,
                    opened: Vec::new(),
                },
            );
            Ok(id)
        };
        drop(state);
        self.finish(key, result)
    }

    async fn add_file(
        &self,
        name: &WorkspaceName,
        change: ChangelistId,
        path: &RepositoryPath,
    ) -> Result<Vec<FileSpec>, BackendError> {
        let (key, mut state) = self.begin(Call::AddFile(name.clone(), change, path.to_string()))?;
        let result = (|| -> Result<Vec<FileSpec>, BackendError> {
            if !in_view(&state, name, path)? {
                return Ok(vec![FileSpec::error(format!("{path} - file(s) not in client view."))]);
            }
            if state.head_is_live(path.as_str()) {
                return Ok(vec![FileSpec::error(format!(
                    "{path} - can't add existing file"
                ))]);
            }
            if is_open(&state, name, path.as_str()) {
                return Ok(vec![FileSpec::error(format!("{path} - already opened"))]);
            }
            let next = state.head(path.as_str()).map_or(1, |rev| rev.number + 1);
            open_in(&mut state, name, change, path, FileAction::Add)?;
            Ok(vec![FileSpec::valid(path.as_str(), next, FileAction::Add)])
        })();
        drop(state);
        self.finish(key, result)
    }

    async fn sync_pinned(&self, name: &WorkspaceName, path: &RepositoryPath) -> Result<Vec<FileSpec>, BackendError> {
        let (key, mut state) = self.begin(Call::SyncPinned(name.clone(), path.to_string()))?;
        let result = (|| -> Result<Vec<FileSpec>, BackendError> {
            if !in_view(&state, name, path)? {
                return Ok(vec![FileSpec::error(format!("{path} - file(s) not in client view."))]);
            }
            let Some(head) = state.head(path.as_str()).filter(|rev| !rev.action.is_deletion()) else {
                return Ok(vec![FileSpec::info(format!("{path} - no such file(s)."))]);
            };
            let (number, action) = (head.number, head.action);
            state.have.insert((name.clone(), path.to_string()), number);
            Ok(vec![FileSpec::valid(path.as_str(), number, action)])
        })();
        drop(state);
        self.finish(key, result)
    }

    async fn edit_file(
        &self,
        name: &WorkspaceName,
        change: ChangelistId,
        path: &RepositoryPath,
    ) -> Result<Vec<FileSpec>, BackendError> {
        let (key, mut state) = self.begin(Call::EditFile(name.clone(), change, path.to_string()))?;
        let result = (|| -> Result<Vec<FileSpec>, BackendError> {
            if !in_view(&state, name, path)? {
                return Ok(vec![FileSpec::error(format!("{path} - file(s) not in client view."))]);
            }
            let Some(&have) = state.have.get(&(name.clone(), path.to_string())) else {
                return Ok(vec![FileSpec::error(format!("{path} - file(s) not on client."))]);
            };
            if is_open(&state, name, path.as_str()) {
                return Ok(vec![FileSpec::error(format!("{path} - already opened"))]);
            }
            open_in(&mut state, name, change, path, FileAction::Edit)?;
            Ok(vec![FileSpec::valid(path.as_str(), have, FileAction::Edit)])
        })();
        drop(state);
        self.finish(key, result)
    }

    async fn refresh_changelist(
        &self,
        name: &WorkspaceName,
        change: ChangelistId,
    ) -> Result<ChangelistSummary, BackendError> {
        let (key, state) = self.begin(Call::RefreshChangelist(name.clone(), change))?;
        let result = match state.changelists.get(&change) {
            Some(c) if c.workspace == *name => Ok(c.summary()),
            _ => Err(BackendError::Request(format!("change {change} unknown"))),
        };
        drop(state);
        self.finish(key, result)
    }

    async fn submit_changelist(&self, name: &WorkspaceName, change: ChangelistId) -> Result<Vec<FileSpec>, BackendError> {
        // Collect what to read, then read the staged file without the lock
        let (key, staged) = {
            let (key, state) = self.begin(Call::SubmitChangelist(name.clone(), change))?;
            (key, staged_submit(&state, name, change))
        };
        let (local_file, opened) = match staged {
            Ok(staged) => staged,
            Err(e) => return self.finish(key, Err(e)),
        };

        let content = match tokio::fs::read(&local_file).await {
            Ok(content) => content,
            Err(e) => {
                return self.finish(
                    key,
                    Err(BackendError::Request(format!(
                        "open for read: {}: {e}",
                        local_file.display()
                    ))),
                )
            }
        };

        let mut state = self.depot.state().lock();
        for (path, action) in &opened {
            let head = state.head(path).map(|rev| (rev.number, rev.action));
            let conflict = match action {
                FileAction::Add => head.is_some_and(|(_, a)| !a.is_deletion()),
                _ => state.have.get(&(name.clone(), path.clone())).copied() != head.map(|(n, _)| n),
            };
            if conflict {
                drop(state);
                return self.finish(
                    key,
                    Err(BackendError::Request(format!(
                        "{path} - must resolve before submitting"
                    ))),
                );
            }
        }

        let mut results = Vec::with_capacity(opened.len() + 1);
        for (path, action) in opened {
            let number = state.commit(&path, action, content.clone(), Some(change));
            state.have.insert((name.clone(), path.clone()), number);
            results.push(FileSpec::valid(path, number, action));
        }
        if let Some(c) = state.changelists.get_mut(&change) {
            c.status = ChangelistStatus::Submitted;
            c.opened.clear();
        }
        drop(state);

        results.push(FileSpec::info(format!("Change {change} submitted.")));
        self.finish(key, Ok(results))
    }

    async fn revert_all(&self, name: &WorkspaceName) -> Result<Vec<FileSpec>, BackendError> {
        let (key, mut state) = self.begin(Call::RevertAll(name.clone()))?;
        let mut reverted = Vec::new();
        for c in state.changelists.values_mut() {
            if c.workspace == *name && c.status.is_open() {
                for (path, action) in c.opened.drain(..) {
                    reverted.push(FileSpec {
                        message: Some(format!("{path} - was {action:?}, reverted")),
                        ..FileSpec::valid(path, 0, action)
                    });
                }
            }
        }
        drop(state);
        self.finish(key, Ok(reverted))
    }

    async fn pending_changelists(
        &self,
        name: &WorkspaceName,
        owner: &str,
        limit: usize,
    ) -> Result<Vec<ChangelistSummary>, BackendError> {
        let (key, state) = self.begin(Call::PendingChangelists(name.clone()))?;
        let listed: Vec<_> = state
            .changelists
            .values()
            .rev()
            .filter(|c| c.workspace == *name && c.owner == owner && c.status.is_open())
            .take(limit)
            .map(Changelist::summary)
            .collect();
        drop(state);
        self.finish(key, Ok(listed))
    }

    async fn delete_pending_changelist(&self, change: ChangelistId) -> Result<(), BackendError> {
        let (key, mut state) = self.begin(Call::DeletePendingChangelist(change))?;
        let result = match state.changelists.get(&change) {
            Some(c) if !c.status.is_open() => {
                Err(BackendError::Request(format!("change {change} is not pending")))
            }
            Some(c) if !c.opened.is_empty() => Err(BackendError::Request(format!(
                "change {change} has {} open file(s) associated with it and can't be deleted",
                c.opened.len()
            ))),
            Some(_) => {
                state.changelists.remove(&change);
                Ok(())
            }
            None => Err(BackendError::Request(format!("change {change} unknown"))),
        };
        drop(state);
        self.finish(key, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_bridge::progress::NoopProgress;
    use depot_bridge::backend::{DepotServer, OpStatus};
    use std::path::Path;

    const PATH: &str = "//depot/a.txt";

    fn path() -> RepositoryPath {
        RepositoryPath::new(PATH).unwrap()
    }

    async fn login(depot: &MemoryDepot, secure: bool) -> Box<dyn DepotConnection> {
        let server = ServerIdentity::new(secure, "depot", 1666);
        let mut connection = depot.open(&server, Arc::new(NoopProgress)).await.unwrap();
        if secure {
            connection.establish_trust(TrustPolicy::AcceptOnFirstUse).await.unwrap();
        }
        connection.login("alice", "pw").await.unwrap();
        connection
    }

    fn spec(name: &str, root: &Path) -> WorkspaceSpec {
        WorkspaceSpec {
            name: WorkspaceName::new(name),
            root: root.to_path_buf(),
            owner: "alice".into(),
            depot_path: path(),
            local_name: "a.txt".into(),
        }
    }

    fn changelist(name: &str) -> NewChangelist {
        NewChangelist {
            workspace: WorkspaceName::new(name),
            owner: "alice".into(),
            description: "test".into(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn commands_require_login() {
        let depot = MemoryDepot::new().with_user("alice", "pw");
        let server = ServerIdentity::new(false, "depot", 1666);
        let mut connection = depot.open(&server, Arc::new(NoopProgress)).await.unwrap();

        assert!(matches!(connection.depot_files(&path()).await, Err(BackendError::Access(_))));
        assert!(matches!(connection.login("alice", "nope").await, Err(BackendError::Access(_))));
        connection.login("alice", "pw").await.unwrap();
        assert_eq!(connection.principal(), "alice");
        assert!(connection.depot_files(&path()).await.is_ok());
    }

    #[tokio::test]
    async fn strict_trust_needs_known_fingerprint() {
        let depot = MemoryDepot::new().with_user("alice", "pw");
        let server = ServerIdentity::new(true, "depot", 1666);

        let mut connection = depot.open(&server, Arc::new(NoopProgress)).await.unwrap();
        assert!(connection.establish_trust(TrustPolicy::Strict).await.is_err());
        assert!(matches!(connection.login("alice", "pw").await, Err(BackendError::Connection(_))));

        depot.trust(&server);
        let mut connection = depot.open(&server, Arc::new(NoopProgress)).await.unwrap();
        connection.establish_trust(TrustPolicy::Strict).await.unwrap();
        connection.login("alice", "pw").await.unwrap();
    }

    #[tokio::test]
    async fn accept_on_first_use_records_fingerprint() {
        let depot = MemoryDepot::new().with_user("alice", "pw");
        let _connection = login(&depot, true).await;
        assert!(depot.is_trusted(&ServerIdentity::new(true, "depot", 1666)));
    }

    #[tokio::test]
    async fn edit_requires_have_revision() {
        let depot = MemoryDepot::new().with_user("alice", "pw");
        depot.seed_file(PATH, "v1");
        let root = tempfile::tempdir().unwrap();
        let connection = login(&depot, false).await;
        let ws = WorkspaceName::new("ws");

        connection.create_workspace(&spec("ws", root.path())).await.unwrap();
        let change = connection.create_changelist(&changelist("ws")).await.unwrap();

        let refused = connection.edit_file(&ws, change, &path()).await.unwrap();
        assert_eq!(refused[0].status, OpStatus::Error);

        let pinned = connection.sync_pinned(&ws, &path()).await.unwrap();
        assert_eq!(pinned[0].revision, Some(1));
        assert!(!root.path().join("a.txt").exists());

        let opened = connection.edit_file(&ws, change, &path()).await.unwrap();
        assert_eq!(opened[0].status, OpStatus::Valid);
    }

    #[tokio::test]
    async fn changelist_is_new_until_a_file_opens() {
        let depot = MemoryDepot::new().with_user("alice", "pw");
        let root = tempfile::tempdir().unwrap();
        let connection = login(&depot, false).await;
        let ws = WorkspaceName::new("ws");

        connection.create_workspace(&spec("ws", root.path())).await.unwrap();
        let change = connection.create_changelist(&changelist("ws")).await.unwrap();
        let summary = connection.refresh_changelist(&ws, change).await.unwrap();
        assert_eq!(summary.status, ChangelistStatus::New);

        // an empty new changelist is still listed for cleanup
        let listed = connection.pending_changelists(&ws, "alice", 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(connection.delete_workspace(&ws).await.is_err());

        connection.add_file(&ws, change, &path()).await.unwrap();
        let summary = connection.refresh_changelist(&ws, change).await.unwrap();
        assert_eq!(summary.status, ChangelistStatus::Pending);
        assert_eq!(summary.files, vec![PATH.to_string()]);
    }

    #[tokio::test]
    async fn add_of_live_file_is_refused() {
        let depot = MemoryDepot::new().with_user("alice", "pw");
        depot.seed_file(PATH, "v1");
        let root = tempfile::tempdir().unwrap();
        let connection = login(&depot, false).await;

        connection.create_workspace(&spec("ws", root.path())).await.unwrap();
        let change = connection.create_changelist(&changelist("ws")).await.unwrap();
        let result = connection
            .add_file(&WorkspaceName::new("ws"), change, &path())
            .await
            .unwrap();
        assert_eq!(result[0].status, OpStatus::Error);
    }

    #[tokio::test]
    async fn submit_reads_staged_file() {
        let depot = MemoryDepot::new().with_user("alice", "pw");
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a.txt"), "fresh").unwrap();
        let connection = login(&depot, false).await;
        let ws = WorkspaceName::new("ws");

        connection.create_workspace(&spec("ws", root.path())).await.unwrap();
        let change = connection.create_changelist(&changelist("ws")).await.unwrap();
        connection.add_file(&ws, change, &path()).await.unwrap();
        let results = connection.submit_changelist(&ws, change).await.unwrap();

        assert_eq!(results[0], FileSpec::valid(PATH, 1, FileAction::Add));
        assert_eq!(depot.head_content(PATH).unwrap(), b"fresh");
        assert!(depot.pending_changelists().is_empty());
    }

    #[tokio::test]
    async fn empty_submit_is_rejected() {
        let depot = MemoryDepot::new().with_user("alice", "pw");
        let root = tempfile::tempdir().unwrap();
        let connection = login(&depot, false).await;
        let ws = WorkspaceName::new("ws");

        connection.create_workspace(&spec("ws", root.path())).await.unwrap();
        let change = connection.create_changelist(&changelist("ws")).await.unwrap();
        let err = connection.submit_changelist(&ws, change).await.unwrap_err();
        assert_eq!(err, BackendError::Request("No files to submit.".into()));
    }

    #[tokio::test]
    async fn workspace_with_pending_change_cannot_be_deleted() {
        let depot = MemoryDepot::new().with_user("alice", "pw");
        let root = tempfile::tempdir().unwrap();
        let connection = login(&depot, false).await;
        let ws = WorkspaceName::new("ws");

        connection.create_workspace(&spec("ws", root.path())).await.unwrap();
        let change = connection.create_changelist(&changelist("ws")).await.unwrap();
        connection.add_file(&ws, change, &path()).await.unwrap();

        assert!(connection.delete_workspace(&ws).await.is_err());
        assert!(connection.delete_pending_changelist(change).await.is_err());

        connection.revert_all(&ws).await.unwrap();
        let pending = connection.pending_changelists(&ws, "alice", 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        connection.delete_pending_changelist(change).await.unwrap();
        connection.delete_workspace(&ws).await.unwrap();
        assert!(depot.workspaces().is_empty());
    }

    #[tokio::test]
    async fn injected_failure_is_journaled() {
        let depot = MemoryDepot::new().with_user("alice", "pw");
        let root = tempfile::tempdir().unwrap();
        let connection = login(&depot, false).await;
        depot.fail_on(crate::Operation::CreateWorkspace, BackendError::Request("locked".into()));

        assert!(connection.create_workspace(&spec("ws", root.path())).await.is_err());
        assert!(depot.workspaces().is_empty());
        assert_eq!(
            depot.journal_for(&WorkspaceName::new("ws")),
            vec![Call::CreateWorkspace(WorkspaceName::new("ws"))]
        );
    }
}
