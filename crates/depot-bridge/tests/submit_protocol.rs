//! Ephemeral-workspace submit protocol against the in-memory depot
//!
//! Run with: cargo test --package depot-bridge --test submit_protocol

use depot_bridge::prelude::*;
use depot_memory::{Call, Operation};
use depot_test_utils::*;
use std::io::Write;

const SAMPLE: &str = "//depot/sample.txt";

fn operations(calls: &[Call]) -> Vec<Operation> {
    calls.iter().map(Call::operation).collect()
}

#[tokio::test]
async fn round_trip_write_then_read() {
    let test = TestBridge::logged_in().await;

    let outcome = test
        .bridge
        .write(&test.session, &locator(SAMPLE), b"hello-v2")
        .await
        .unwrap();
    assert!(outcome.is_submitted());

    let stream = test.bridge.read(&test.session, &locator(SAMPLE)).await.unwrap();
    assert_eq!(read_to_string(stream).await, "hello-v2");
    test.assert_clean();
}

#[tokio::test]
async fn new_path_is_added() {
    let test = TestBridge::logged_in().await;

    let outcome = test
        .bridge
        .write(&test.session, &locator(SAMPLE), b"first")
        .await
        .unwrap();
    let SubmitOutcome::Submitted { action, files, .. } = &outcome else {
        panic!("expected a submit, got {outcome:?}");
    };
    assert_eq!(*action, SubmitAction::Add);
    assert!(files.contains(&FileSpec::valid(SAMPLE, 1, FileAction::Add)));

    let ops = operations(&test.depot.journal_for(outcome.workspace()));
    assert!(ops.contains(&Operation::AddFile));
    assert!(!ops.contains(&Operation::EditFile));
    assert!(!ops.contains(&Operation::SyncPinned));
    test.assert_clean();
}

#[tokio::test]
async fn overwrite_pins_then_edits() {
    let test = TestBridge::logged_in().await;

    let outcome = test
        .bridge
        .write(&test.session, &locator(EXISTING_PATH), b"existing-v2")
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Submitted { action: SubmitAction::Edit, .. }));

    let ops = operations(&test.depot.journal_for(outcome.workspace()));
    let pin = ops.iter().position(|op| *op == Operation::SyncPinned).unwrap();
    let edit = ops.iter().position(|op| *op == Operation::EditFile).unwrap();
    let submit = ops.iter().position(|op| *op == Operation::SubmitChangelist).unwrap();
    assert!(pin < edit && edit < submit, "expected pin, edit, submit in {ops:?}");

    let head = test.depot.head(EXISTING_PATH).unwrap();
    assert_eq!(head.number, 2);
    assert_eq!(head.action, FileAction::Edit);
    assert_eq!(head.content, b"existing-v2");
    test.assert_clean();
}

#[tokio::test]
async fn no_overwrite_leaves_existing_file_alone() {
    let test = TestBridge::logged_in().await;

    let outcome = test
        .bridge
        .write_with_policy(&test.session, &locator(EXISTING_PATH), b"ignored", false)
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::NoOp { .. }));

    let mutating: Vec<_> = test
        .depot
        .journal_for(outcome.workspace())
        .iter()
        .filter(|call| call.is_mutating())
        .map(Call::operation)
        .collect();
    // revert of an empty workspace is part of the unconditional cleanup
    assert_eq!(
        mutating,
        vec![Operation::CreateWorkspace, Operation::RevertAll, Operation::DeleteWorkspace]
    );
    assert_eq!(test.depot.revisions(EXISTING_PATH).len(), 1);
    test.assert_clean();
}

#[tokio::test]
async fn default_overwrite_comes_from_config() {
    let test = TestBridge::with_config(seeded_depot(), BridgeConfig::new().with_default_overwrite(false));
    test.login().await;

    let outcome = test
        .bridge
        .write(&test.session, &locator(EXISTING_PATH), b"ignored")
        .await
        .unwrap();
    assert!(!outcome.is_submitted());
    assert_eq!(test.depot.head_content(EXISTING_PATH).unwrap(), EXISTING_CONTENT.as_bytes());
}

#[tokio::test]
async fn deleted_head_is_added_even_without_overwrite() {
    let test = TestBridge::logged_in().await;
    test.depot.delete_file(EXISTING_PATH);

    let outcome = test
        .bridge
        .write_with_policy(&test.session, &locator(EXISTING_PATH), b"revived", false)
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Submitted { action: SubmitAction::Add, .. }));
    assert_eq!(test.depot.head(EXISTING_PATH).unwrap().number, 3);
    test.assert_clean();
}

#[tokio::test]
async fn rejected_submit_is_cleaned_up() {
    let test = TestBridge::logged_in().await;
    test.depot.fail_on(
        Operation::SubmitChangelist,
        BackendError::Request("submit trigger rejected change".into()),
    );

    let err = test
        .bridge
        .write(&test.session, &locator(SAMPLE), b"nope")
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Submit { ref path, .. } if path == SAMPLE));

    let journal = test.depot.journal();
    assert!(journal.iter().any(|c| matches!(c, Call::DeletePendingChangelist(_))));
    assert_eq!(test.depot.head(SAMPLE), None);
    test.assert_clean();
}

#[tokio::test]
async fn failed_open_is_cleaned_up() {
    let test = TestBridge::logged_in().await;
    test.depot
        .fail_on(Operation::AddFile, BackendError::Request("file type not allowed".into()));

    let err = test
        .bridge
        .write(&test.session, &locator(SAMPLE), b"nope")
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Backend(_)));
    test.assert_clean();
}

#[tokio::test]
async fn refused_workspace_is_reported() {
    let test = TestBridge::logged_in().await;
    test.depot.fail_on(
        Operation::CreateWorkspace,
        BackendError::Request("client name reserved".into()),
    );

    let err = test
        .bridge
        .write(&test.session, &locator(SAMPLE), b"nope")
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::WorkspaceCreation { ref workspace, .. } if workspace.starts_with("webAuthP4alice_")));
    // cleanup still targets the refused name in case the server kept it
    let deletes = test
        .depot
        .journal()
        .into_iter()
        .filter(|c| matches!(c, Call::DeleteWorkspace(_)))
        .count();
    assert_eq!(deletes, 1);
    test.assert_clean();
}

#[tokio::test]
async fn cleanup_failure_keeps_successful_verdict() {
    let test = TestBridge::logged_in().await;
    test.depot
        .fail_on(Operation::DeleteWorkspace, BackendError::Connection("connection reset".into()));

    let outcome = test
        .bridge
        .write(&test.session, &locator(SAMPLE), b"kept")
        .await
        .unwrap();
    assert!(outcome.is_submitted());
    assert_eq!(test.depot.head_content(SAMPLE).unwrap(), b"kept");

    // the orphan is visible to operators; staging is still removed
    assert_eq!(test.depot.workspaces(), vec![outcome.workspace().clone()]);
    assert_eq!(test.staged_entries(), 0);
}

#[tokio::test]
async fn writer_submits_on_close() {
    let test = TestBridge::logged_in().await;

    let mut writer = test.bridge.writer(&test.session, &locator(SAMPLE)).unwrap();
    write!(writer, "hello-").unwrap();
    writer.write_all(b"v2").unwrap();
    let outcome = writer.close().await.unwrap();

    assert!(outcome.is_submitted());
    assert_eq!(test.depot.head_content(SAMPLE).unwrap(), b"hello-v2");
    test.assert_clean();
}

#[tokio::test]
async fn writer_respects_overwrite_override() {
    let test = TestBridge::logged_in().await;

    let writer = test
        .bridge
        .writer(&test.session, &locator(EXISTING_PATH))
        .unwrap()
        .overwrite_allowed(false);
    let outcome = writer.close().await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::NoOp { .. }));
}

#[tokio::test]
async fn workspace_carries_prefix_and_principal() {
    let test = TestBridge::with_config(seeded_depot(), BridgeConfig::new().with_workspace_prefix("bridge-"));
    test.login().await;

    let outcome = test
        .bridge
        .write(&test.session, &locator(SAMPLE), b"x")
        .await
        .unwrap();
    assert!(outcome
        .workspace()
        .as_str()
        .starts_with(&format!("bridge-{PRINCIPAL}_sample.txt_")));
}

#[tokio::test]
async fn relative_segments_never_reach_staging() {
    let test = TestBridge::logged_in().await;

    for path in ["//depot/..", "//depot/a/../b.txt"] {
        let err = test
            .bridge
            .write(&test.session, &locator(path), b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::MalformedLocator { .. }), "{path}: {err:?}");
    }
    assert!(test.depot.journal().is_empty());
    assert_eq!(test.staged_entries(), 0);
}
