//! Testing utilities for the depot bridge workspace
//!
//! Shared fixtures: a seeded in-memory depot, a logged-in bridge on top of
//! it, and assertions on what the depot looks like afterwards.

#![allow(missing_docs)]

use depot_bridge::backend::ByteStream;
use depot_bridge::{BridgeConfig, DepotBridge, SessionId};
use depot_memory::MemoryDepot;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

pub const PRINCIPAL: &str = "alice";
pub const SECRET: &str = "correct-horse";
pub const SERVER_LOCATOR: &str = "perforce://depot.test:1666";
pub const SECURE_SERVER_LOCATOR: &str = "perforcessl://depot.test:1667";

/// Live file present in every seeded depot
pub const EXISTING_PATH: &str = "//depot/existing.txt";
pub const EXISTING_CONTENT: &str = "existing-v1";

pub fn locator(path: &str) -> String {
    format!("{SERVER_LOCATOR}{path}")
}

pub fn secure_locator(path: &str) -> String {
    format!("{SECURE_SERVER_LOCATOR}{path}")
}

pub fn seeded_depot() -> MemoryDepot {
    let depot = MemoryDepot::new().with_user(PRINCIPAL, SECRET);
    depot.seed_file(EXISTING_PATH, EXISTING_CONTENT);
    depot
}

/// Bridge, its depot and a session, with staging confined to a temp dir
pub struct TestBridge {
    pub bridge: DepotBridge,
    pub depot: MemoryDepot,
    pub session: SessionId,
    pub staging: TempDir,
}

impl TestBridge {
    /// Bridge over `depot` with `config`; staging goes to a fresh temp dir
    pub fn with_config(depot: MemoryDepot, config: BridgeConfig) -> Self {
        let staging = tempfile::tempdir().unwrap();
        let config = config.with_temp_root(staging.path());
        let bridge = DepotBridge::new(Arc::new(depot.clone()), &config).unwrap();
        Self {
            bridge,
            depot,
            session: SessionId::new("test-session"),
            staging,
        }
    }

    pub fn new(depot: MemoryDepot) -> Self {
        Self::with_config(depot, BridgeConfig::new())
    }

    /// Seeded depot, session already logged in to the plain server
    pub async fn logged_in() -> Self {
        let test = Self::new(seeded_depot());
        test.login().await;
        test
    }

    pub async fn login(&self) {
        self.bridge
            .login(&self.session, SERVER_LOCATOR, PRINCIPAL, SECRET)
            .await
            .unwrap();
    }

    /// Number of entries left in the staging directory
    pub fn staged_entries(&self) -> usize {
        std::fs::read_dir(self.staging.path()).unwrap().count()
    }

    /// No workspace, pending changelist or staging directory survived
    pub fn assert_clean(&self) {
        assert_clean(&self.depot);
        assert_eq!(self.staged_entries(), 0, "staging directory not removed");
    }
}

/// No workspace or pending changelist is left in `depot`
pub fn assert_clean(depot: &MemoryDepot) {
    assert!(depot.workspaces().is_empty(), "workspaces left behind: {:?}", depot.workspaces());
    assert!(
        depot.pending_changelists().is_empty(),
        "pending changelists left behind: {:?}",
        depot.pending_changelists()
    );
}

pub async fn read_to_string(mut stream: ByteStream) -> String {
    let mut text = String::new();
    stream.read_to_string(&mut text).await.unwrap();
    text
}
