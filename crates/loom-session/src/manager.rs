// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! `session_id -> BackgroundSession` registry: creation, resumption,
//! lookup, and teardown. One process-wide instance, shared via `Arc`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use loom_store::{SessionMetadata, Store};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::background_session::{BackgroundSession, BackgroundSessionConfig};
use crate::error::{Result, SessionError};

/// A configured agent target a new session can be started against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    pub uuid: Uuid,
    pub working_dir: String,
    pub acp_server_name: String,
    pub acp_command: String,
    pub display_name: String,
    pub color: Option<String>,
}

pub struct SessionManager {
    store: Arc<Store>,
    config: BackgroundSessionConfig,
    // Arc'd independently of `SessionManager` itself so a session's fatal
    // sink (see `bind_fatal_sink`) can hold a clone without needing a back
    // reference to the manager.
    running: Arc<Mutex<HashMap<Uuid, Arc<BackgroundSession>>>>,
}

impl SessionManager {
    pub fn new(store: Arc<Store>, config: BackgroundSessionConfig) -> Self {
        Self { store, config, running: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Allocates a new session id, persists initial metadata, and starts
    /// its `BackgroundSession`.
    pub async fn create(&self, entry: &WorkspaceEntry) -> Result<Arc<BackgroundSession>> {
        let session_id = Uuid::new_v4();
        let meta = SessionMetadata::new(
            session_id,
            entry.display_name.clone(),
            entry.acp_server_name.clone(),
            vec![entry.acp_command.clone()],
            entry.working_dir.clone(),
        );
        self.store.create(meta).await?;

        let session = BackgroundSession::start(
            session_id,
            entry.acp_command.clone(),
            PathBuf::from(&entry.working_dir),
            Arc::clone(&self.store),
            self.config.clone(),
        );
        self.bind_fatal_sink(&session);
        self.running.lock().await.insert(session_id, Arc::clone(&session));
        Ok(session)
    }

    /// Starts a fresh `BackgroundSession` runtime for a session whose
    /// metadata already exists on disk (e.g. after a process restart or
    /// an explicit resume of a suspended session).
    pub async fn resume(&self, session_id: Uuid) -> Result<Arc<BackgroundSession>> {
        if let Some(existing) = self.running.lock().await.get(&session_id) {
            return Ok(Arc::clone(existing));
        }
        let meta = self.store.get_metadata(session_id)?;
        let acp_command = meta.acp_command.join(" ");
        let session = BackgroundSession::start(
            session_id,
            acp_command,
            PathBuf::from(&meta.working_dir),
            Arc::clone(&self.store),
            self.config.clone(),
        );
        self.bind_fatal_sink(&session);
        self.running.lock().await.insert(session_id, Arc::clone(&session));
        Ok(session)
    }

    /// Wires `session` so that a fatal subprocess failure (spawn error,
    /// crash, stdio EOF) removes it from `running` as soon as it ends
    /// itself, instead of leaving a dead entry behind for `get`/`resume`
    /// to hand back.
    fn bind_fatal_sink(&self, session: &Arc<BackgroundSession>) {
        let running = Arc::clone(&self.running);
        session.bind_fatal_sink(Arc::new(move |session_id: Uuid| {
            let running = Arc::clone(&running);
            tokio::spawn(async move {
                running.lock().await.remove(&session_id);
            });
        }));
    }

    /// Renames a session, whether or not it currently has a running
    /// instance.
    pub async fn rename(&self, session_id: Uuid, name: String) -> Result<()> {
        if let Some(session) = self.running.lock().await.get(&session_id).cloned() {
            return session.rename(name).await;
        }
        self.store.update_metadata(session_id, move |m| m.name = name).await?;
        Ok(())
    }

    /// Returns the running instance for `session_id`, if any. Does not
    /// implicitly resume a suspended/ended session.
    pub async fn get(&self, session_id: Uuid) -> Option<Arc<BackgroundSession>> {
        self.running.lock().await.get(&session_id).cloned()
    }

    pub async fn close(&self, session_id: Uuid, reason: impl Into<String>) -> Result<()> {
        let session = self
            .running
            .lock()
            .await
            .remove(&session_id)
            .ok_or(SessionError::NotFound(session_id))?;
        session.end(reason).await
    }

    pub async fn close_all(&self, reason: &str) {
        let sessions: Vec<Arc<BackgroundSession>> = {
            let mut running = self.running.lock().await;
            running.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            let _ = session.end(reason.to_string()).await;
        }
    }

    pub async fn list_running(&self) -> Vec<Uuid> {
        self.running.lock().await.keys().copied().collect()
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(dir: &std::path::Path) -> WorkspaceEntry {
        WorkspaceEntry {
            uuid: Uuid::new_v4(),
            working_dir: dir.display().to_string(),
            acp_server_name: "mock".into(),
            acp_command: "/bin/does-not-exist --acp".into(),
            display_name: "test workspace".into(),
            color: None,
        }
    }

    #[tokio::test]
    async fn list_running_is_empty_for_fresh_manager() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()));
        let manager = SessionManager::new(store, BackgroundSessionConfig::default());
        assert!(manager.list_running().await.is_empty());
    }

    #[tokio::test]
    async fn get_returns_none_for_unknown_session() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()));
        let manager = SessionManager::new(store, BackgroundSessionConfig::default());
        assert!(manager.get(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn close_unknown_session_returns_not_found() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()));
        let manager = SessionManager::new(store, BackgroundSessionConfig::default());
        let err = manager.close(Uuid::new_v4(), "test").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn resume_after_disconnect_syncs_events_since_last_seq() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()));
        let manager = SessionManager::new(Arc::clone(&store), BackgroundSessionConfig::default());

        let session = manager.create(&entry(dir.path())).await.unwrap();
        let session_id = session.session_id();

        for seq in 1..=3 {
            let event = loom_core::Event::new(seq, loom_core::EventPayload::PromptComplete { event_count: seq as u64 });
            store.append_event(session_id, &event).await.unwrap();
        }

        // Client disconnects and reconnects later, asking only for events
        // after the last one it saw (seq 1).
        let resumed = manager.resume(session_id).await.unwrap();
        assert_eq!(resumed.session_id(), session_id);

        let is_running = manager.get(session_id).await.is_some();
        let sync = manager.store().sync(session_id, 1, is_running).unwrap();
        assert_eq!(sync.events.len(), 2);
        assert_eq!(sync.events[0].seq, 2);
        assert_eq!(sync.events[1].seq, 3);
        assert!(sync.is_running);
    }

    #[test]
    fn workspace_entry_is_serializable() {
        let dir = tempdir().unwrap();
        let e = entry(dir.path());
        let json = serde_json::to_string(&e).unwrap();
        let back: WorkspaceEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.display_name, e.display_name);
    }
}
