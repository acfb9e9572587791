//! Write path: ephemeral-workspace submission of one file
//!
//! Every submit runs in a workspace of its own:
//! 1. stage the bytes in a private temp directory
//! 2. register a workspace mapping the depot path to the staged file
//! 3. probe the head revision and choose add, edit or nothing
//! 4. open the file in a fresh changelist and submit it
//! 5. tear everything down again, whatever happened above
//!
//! The random part of the workspace name is what keeps concurrent submits
//! apart; no other coordination exists.

use crate::backend::{
    ChangelistId, ChangelistStatus, DepotConnection, FileSpec, FileStatus, NewChangelist, OpStatus,
    WorkspaceName, WorkspaceSpec,
};
use crate::config::{BridgeConfig, DEFAULT_CHANGELIST_DESCRIPTION, DEFAULT_WORKSPACE_PREFIX};
use crate::error::BridgeError;
use crate::locator::RepositoryPath;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// How the file was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmitAction {
    /// New file, or re-added after deletion at head
    Add,
    /// New revision of a live file
    Edit,
}

/// Result of a submit attempt that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new revision was committed
    Submitted {
        /// Submitted changelist
        changelist: ChangelistId,
        /// How the file was opened
        action: SubmitAction,
        /// Workspace the submit ran in (already deleted)
        workspace: WorkspaceName,
        /// Per-file submit results
        files: Vec<FileSpec>,
    },
    /// File is live at head and overwriting was not allowed
    NoOp {
        /// Workspace the probe ran in (already deleted)
        workspace: WorkspaceName,
    },
}

impl SubmitOutcome {
    /// Workspace used by the attempt
    #[must_use]
    pub fn workspace(&self) -> &WorkspaceName {
        match self {
            Self::Submitted { workspace, .. } | Self::NoOp { workspace } => workspace,
        }
    }

    /// Whether a revision was committed
    #[inline]
    #[must_use]
    pub fn is_submitted(&self) -> bool {
        matches!(self, Self::Submitted { .. })
    }
}

/// Private directory holding the staged file
///
/// Dropping it removes the directory; [`Staging::remove`] does the same but
/// reports failures.
#[derive(Debug)]
struct Staging {
    dir: TempDir,
    file_name: String,
}

impl Staging {
    async fn materialize(
        temp_root: Option<&Path>,
        path: &RepositoryPath,
        content: &[u8],
    ) -> Result<Self, BridgeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("depot-stage-");
        let dir = match temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| {
            BridgeError::local_io(temp_root.map_or_else(std::env::temp_dir, Path::to_path_buf), e)
        })?;

        let file_name = path.file_name().to_string();
        let file = dir.path().join(&file_name);
        tokio::fs::write(&file, content)
            .await
            .map_err(|e| BridgeError::local_io(&file, e))?;

        tracing::debug!(dir = %dir.path().display(), bytes = content.len(), "staged content");
        Ok(Self { dir, file_name })
    }

    fn root(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    fn remove(self) {
        let dir = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            tracing::warn!(dir = %dir.display(), error = %e, "could not remove staging directory");
        }
    }
}

/// Runs the single-file submit protocol
#[derive(Debug, Clone)]
pub struct SubmitCoordinator {
    description: String,
    workspace_prefix: String,
    pending_limit: usize,
    temp_root: Option<PathBuf>,
}

impl SubmitCoordinator {
    /// Create coordinator with default description, prefix and limits
    #[must_use]
    pub fn new() -> Self {
        Self {
            description: DEFAULT_CHANGELIST_DESCRIPTION.to_string(),
            workspace_prefix: DEFAULT_WORKSPACE_PREFIX.to_string(),
            pending_limit: 1000,
            temp_root: None,
        }
    }

    /// Create coordinator from bridge configuration
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            description: config.changelist_description.clone(),
            workspace_prefix: config.workspace_prefix.clone(),
            pending_limit: config.pending_changelist_limit,
            temp_root: config.temp_root.clone(),
        }
    }

    /// Submit `content` as the new head revision of `path`
    ///
    /// The principal `connection` is logged in as owns the workspace and
    /// changelist.
    ///
    /// # Errors
    /// - `LocalIo` if the content cannot be staged
    /// - `WorkspaceCreation` if the workspace is refused
    /// - `Submit` if the server rejects the changelist
    /// - `ConnectionError`/`Backend` if any other step fails
    ///
    /// The workspace, any pending changelist and the staging directory are
    /// gone when this returns, in every case.
    pub async fn submit(
        &self,
        connection: &dyn DepotConnection,
        path: &RepositoryPath,
        content: &[u8],
        overwrite_allowed: bool,
    ) -> Result<SubmitOutcome, BridgeError> {
        let principal = connection.principal();
        let staging = Staging::materialize(self.temp_root.as_deref(), path, content).await?;
        let spec = WorkspaceSpec {
            name: self.workspace_name(principal, path),
            root: staging.root(),
            owner: principal.to_string(),
            depot_path: path.clone(),
            local_name: staging.file_name.clone(),
        };

        let result = self.run(connection, &spec, overwrite_allowed).await;

        // a refused create may still have registered the workspace
        self.release(connection, &spec).await;
        staging.remove();

        match &result {
            Ok(outcome) => {
                tracing::info!(%path, workspace = %spec.name, submitted = outcome.is_submitted(), "submit finished");
            }
            Err(e) => {
                tracing::error!(%path, workspace = %spec.name, error = %e, "submit failed");
            }
        }
        result
    }

    /// Unique workspace name: prefix, principal, file name and a UUID
    fn workspace_name(&self, principal: &str, path: &RepositoryPath) -> WorkspaceName {
        let raw = format!(
            "{}{}_{}_{}",
            self.workspace_prefix,
            principal,
            path.file_name(),
            uuid::Uuid::new_v4().simple()
        );
        let sanitized: String = raw
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        WorkspaceName::new(sanitized.replace("...", "_"))
    }

    async fn run(
        &self,
        connection: &dyn DepotConnection,
        spec: &WorkspaceSpec,
        overwrite_allowed: bool,
    ) -> Result<SubmitOutcome, BridgeError> {
        let server = connection.server();
        let path = &spec.depot_path;
        let workspace = &spec.name;

        connection.create_workspace(spec).await.map_err(|source| {
            tracing::error!(%server, %workspace, error = %source, "workspace not created");
            BridgeError::WorkspaceCreation {
                workspace: workspace.to_string(),
                source,
            }
        })?;
        tracing::info!(%server, %workspace, root = %spec.root.display(), "created workspace");

        let listing = connection
            .depot_files(path)
            .await
            .map_err(|e| BridgeError::from_backend(server, e))?;
        let (status, message) = FileStatus::classify(&listing);
        if let Some(message) = message {
            tracing::debug!(%path, message, "existence probe reported an error, treating as absent");
        }

        let action = match (status.is_live(), overwrite_allowed) {
            (true, false) => {
                tracing::info!(%path, %workspace, "file exists and overwrite not allowed");
                return Ok(SubmitOutcome::NoOp {
                    workspace: workspace.clone(),
                });
            }
            (true, true) => SubmitAction::Edit,
            (false, _) => SubmitAction::Add,
        };

        let change = connection
            .create_changelist(&NewChangelist {
                workspace: workspace.clone(),
                owner: spec.owner.clone(),
                description: self.description.clone(),
                created_at: chrono::Utc::now(),
            })
            .await
            .map_err(|e| BridgeError::from_backend(server, e))?;
        tracing::debug!(%workspace, changelist = %change, ?action, "opened changelist");

        let opened = match action {
            SubmitAction::Add => connection.add_file(workspace, change, path).await,
            SubmitAction::Edit => {
                let pinned = connection
                    .sync_pinned(workspace, path)
                    .await
                    .map_err(|e| BridgeError::from_backend(server, e))?;
                log_results("sync", &pinned);
                connection.edit_file(workspace, change, path).await
            }
        }
        .map_err(|e| BridgeError::from_backend(server, e))?;
        log_results("open", &opened);

        let summary = connection
            .refresh_changelist(workspace, change)
            .await
            .map_err(|e| BridgeError::from_backend(server, e))?;
        tracing::debug!(changelist = %change, status = ?summary.status, files = summary.files.len(), "changelist refreshed");

        let files = connection
            .submit_changelist(workspace, change)
            .await
            .map_err(|source| BridgeError::Submit {
                path: path.to_string(),
                workspace: workspace.to_string(),
                source,
            })?;
        log_results("submit", &files);

        Ok(SubmitOutcome::Submitted {
            changelist: change,
            action,
            workspace: workspace.clone(),
            files,
        })
    }

    /// Revert, drop pending changelists and delete the workspace
    ///
    /// Failures are logged and otherwise ignored.
    async fn release(&self, connection: &dyn DepotConnection, spec: &WorkspaceSpec) {
        let workspace = &spec.name;

        match connection.revert_all(workspace).await {
            Ok(reverted) => log_results("revert", &reverted),
            Err(e) => tracing::warn!(%workspace, error = %e, "revert failed, files may remain open"),
        }

        match connection
            .pending_changelists(workspace, &spec.owner, self.pending_limit)
            .await
        {
            Ok(changes) => {
                for change in changes {
                    if !change.status.is_open() {
                        tracing::warn!(%workspace, changelist = %change.id, status = ?change.status, "listed changelist is not open, skipping");
                        continue;
                    }
                    if let Err(e) = connection.delete_pending_changelist(change.id).await {
                        tracing::warn!(%workspace, changelist = %change.id, error = %e, "pending changelist not deleted");
                    }
                }
            }
            Err(e) => tracing::warn!(%workspace, error = %e, "could not list pending changelists"),
        }

        match connection.delete_workspace(workspace).await {
            Ok(()) => tracing::debug!(%workspace, "deleted workspace"),
            Err(e) => tracing::warn!(%workspace, error = %e, "workspace not deleted, remove it manually"),
        }
    }
}

impl Default for SubmitCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn log_results(step: &str, results: &[FileSpec]) {
    for spec in results {
        match spec.status {
            OpStatus::Valid => {
                tracing::info!(step, depot_path = spec.depot_path.as_deref().unwrap_or(""), revision = ?spec.revision);
            }
            OpStatus::Info | OpStatus::Error => {
                tracing::debug!(step, status = ?spec.status, message = spec.message.as_deref().unwrap_or(""));
            }
        }
    }
}
