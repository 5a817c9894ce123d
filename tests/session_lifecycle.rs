// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! End-to-end coverage across `loom-store` + `loom-session` without a real
//! ACP agent subprocess: `BackgroundSession::start` never fails
//! synchronously even for a bogus command (the spawn error only surfaces
//! later, on the dedicated worker thread), so the manager/store wiring can
//! be exercised directly.

use std::sync::Arc;

use loom_session::{BackgroundSessionConfig, SessionManager, WorkspaceEntry};
use loom_store::Store;
use uuid::Uuid;

fn workspace(dir: &std::path::Path) -> WorkspaceEntry {
    WorkspaceEntry {
        uuid: Uuid::new_v4(),
        working_dir: dir.display().to_string(),
        acp_server_name: "mock".into(),
        acp_command: "/bin/does-not-exist --acp".into(),
        display_name: "integration workspace".into(),
        color: None,
    }
}

#[tokio::test]
async fn create_then_resume_reuses_running_instance() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::new(dir.path()));
    let manager = SessionManager::new(Arc::clone(&store), BackgroundSessionConfig::default());

    let session = manager.create(&workspace(dir.path())).await.unwrap();
    let session_id = session.session_id();

    // Resuming an already-running session must return the same instance,
    // not start a second agent subprocess for it.
    let resumed = manager.resume(session_id).await.unwrap();
    assert_eq!(resumed.session_id(), session_id);
    assert_eq!(manager.list_running().await, vec![session_id]);
}

#[tokio::test]
async fn prompt_persists_user_prompt_event_before_queueing_a_second() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::new(dir.path()));
    let manager = SessionManager::new(Arc::clone(&store), BackgroundSessionConfig::default());

    let session = manager.create(&workspace(dir.path())).await.unwrap();
    let session_id = session.session_id();

    session.prompt("first".into(), "client-a".into(), None).await.unwrap();
    // A second prompt while the first is still in flight (the worker
    // thread never responds for a bogus command) must be queued, not
    // rejected.
    session.prompt("second".into(), "client-b".into(), None).await.unwrap();

    let sync = manager.store().sync(session_id, 0, true).unwrap();
    assert!(sync.events.iter().any(|e| matches!(&e.payload, loom_core::EventPayload::UserPrompt { message, .. } if message == "first")));
}

#[tokio::test]
async fn close_removes_session_and_marks_it_ended() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::new(dir.path()));
    let manager = SessionManager::new(Arc::clone(&store), BackgroundSessionConfig::default());

    let session = manager.create(&workspace(dir.path())).await.unwrap();
    let session_id = session.session_id();

    manager.close(session_id, "test teardown").await.unwrap();

    assert!(manager.get(session_id).await.is_none());
    let meta = store.get_metadata(session_id).unwrap();
    assert_eq!(meta.status, loom_store::SessionStatus::Ended);
}

#[tokio::test]
async fn sync_after_reconnect_returns_only_events_after_the_given_seq() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::new(dir.path()));
    let manager = SessionManager::new(Arc::clone(&store), BackgroundSessionConfig::default());

    let session = manager.create(&workspace(dir.path())).await.unwrap();
    let session_id = session.session_id();

    session.prompt("hello".into(), "client-a".into(), None).await.unwrap();

    let full = manager.store().sync(session_id, 0, true).unwrap();
    assert!(!full.events.is_empty());

    let last_seq = full.events.last().unwrap().seq;
    let since_last = manager.store().sync(session_id, last_seq, true).unwrap();
    assert!(since_last.events.is_empty());
}
