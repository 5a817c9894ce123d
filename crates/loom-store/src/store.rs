// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Per-session directory layout and the operations the design calls
//! "Store and Sync": metadata edits, append-only event log, and the
//! reconnect sync query.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use loom_core::Event;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::event_log::EventLog;
use crate::metadata::{SessionMetadata, SessionStatus};
use crate::queue::MessageQueue;

/// The result of a sync query: everything a reconnecting client needs to
/// catch up and know whether the session is still alive.
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub session_id: Uuid,
    pub after_seq: i64,
    pub events: Vec<Event>,
    pub event_count: u64,
    pub status: SessionStatus,
    pub is_running: bool,
}

/// Thread-safe, process-wide handle to on-disk session state.
///
/// Per-session metadata uses a read/write mutex (modeled here as one
/// exclusive mutex per session, since writes are rare relative to appends);
/// append uses its own exclusive per-session mutex so concurrent reads are
/// never blocked by a writer taking the metadata lock.
pub struct Store {
    base_dir: PathBuf,
    write_locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl Store {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), write_locks: Mutex::new(HashMap::new()) }
    }

    pub fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.base_dir.join(session_id.to_string())
    }

    pub fn exists(&self, session_id: Uuid) -> bool {
        self.metadata_path(session_id).exists()
    }

    fn metadata_path(&self, session_id: Uuid) -> PathBuf {
        self.session_dir(session_id).join("metadata.json")
    }

    fn events_path(&self, session_id: Uuid) -> PathBuf {
        self.session_dir(session_id).join("events.jsonl")
    }

    fn queue_path(&self, session_id: Uuid) -> PathBuf {
        self.session_dir(session_id).join("queue.json")
    }

    fn event_log(&self, session_id: Uuid) -> EventLog {
        EventLog::at(self.events_path(session_id))
    }

    fn lock_for(&self, session_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.write_locks.lock().unwrap();
        Arc::clone(locks.entry(session_id).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
    }

    pub async fn create(&self, meta: SessionMetadata) -> Result<()> {
        let dir = self.session_dir(meta.session_id);
        let lock = self.lock_for(meta.session_id);
        let _guard = lock.lock().await;
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io { session: meta.session_id, source: e })?;
        self.write_metadata(&meta)?;
        Ok(())
    }

    pub fn get_metadata(&self, session_id: Uuid) -> Result<SessionMetadata> {
        let path = self.metadata_path(session_id);
        let text = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(session_id)
            } else {
                StoreError::Io { session: session_id, source: e }
            }
        })?;
        serde_json::from_str(&text)
            .map_err(|e| StoreError::Corrupt { session: session_id, detail: e.to_string() })
    }

    fn write_metadata(&self, meta: &SessionMetadata) -> Result<()> {
        let json = serde_json::to_string_pretty(meta)
            .map_err(|e| StoreError::Corrupt { session: meta.session_id, detail: e.to_string() })?;
        fs::write(self.metadata_path(meta.session_id), json)
            .map_err(|e| StoreError::Io { session: meta.session_id, source: e })
    }

    pub async fn update_metadata(
        &self,
        session_id: Uuid,
        mutator: impl FnOnce(&mut SessionMetadata),
    ) -> Result<SessionMetadata> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let mut meta = self.get_metadata(session_id)?;
        mutator(&mut meta);
        self.write_metadata(&meta)?;
        Ok(meta)
    }

    /// Appends one pre-sequenced event and bumps `event_count`. The
    /// `Recorder` in `loom-session` is the sole caller.
    pub async fn append_event(&self, session_id: Uuid, event: &Event) -> Result<()> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        self.event_log(session_id).append(session_id, event)?;
        let mut meta = self.get_metadata(session_id)?;
        meta.event_count = meta.event_count.max(event.seq as u64);
        self.write_metadata(&meta)?;
        Ok(())
    }

    pub fn read_events(&self, session_id: Uuid) -> Result<Vec<Event>> {
        self.event_log(session_id).read_all(session_id)
    }

    pub fn read_events_from(&self, session_id: Uuid, after_seq: i64) -> Result<Vec<Event>> {
        self.event_log(session_id).read_from(session_id, after_seq)
    }

    /// Builds the full reconnect-sync response for a client.
    pub fn sync(&self, session_id: Uuid, after_seq: i64, is_running: bool) -> Result<SyncResult> {
        let meta = self.get_metadata(session_id)?;
        let events = self.read_events_from(session_id, after_seq)?;
        Ok(SyncResult {
            session_id,
            after_seq,
            events,
            event_count: meta.event_count,
            status: meta.status,
            is_running,
        })
    }

    pub fn save_queue(&self, session_id: Uuid, queue: &MessageQueue) -> Result<()> {
        let json = serde_json::to_string(queue)
            .map_err(|e| StoreError::Corrupt { session: session_id, detail: e.to_string() })?;
        fs::write(self.queue_path(session_id), json)
            .map_err(|e| StoreError::Io { session: session_id, source: e })
    }

    pub fn load_queue(&self, session_id: Uuid, max_size: usize) -> MessageQueue {
        let path = self.queue_path(session_id);
        match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<MessageQueue>(&text)
                .map(|q| q.with_max_size(max_size))
                .unwrap_or_else(|_| MessageQueue::new(max_size)),
            Err(_) => MessageQueue::new(max_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::EventPayload;
    use tempfile::tempdir;

    fn meta(id: Uuid) -> SessionMetadata {
        SessionMetadata::new(id, "test session", "claude", vec!["claude".into()], "/tmp/work")
    }

    #[tokio::test]
    async fn create_then_get_metadata_round_trips() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        let id = Uuid::new_v4();
        store.create(meta(id)).await.unwrap();
        let got = store.get_metadata(id).unwrap();
        assert_eq!(got.session_id, id);
        assert_eq!(got.event_count, 0);
    }

    #[tokio::test]
    async fn get_metadata_for_unknown_session_is_not_found() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        let err = store.get_metadata(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn append_event_bumps_event_count() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        let id = Uuid::new_v4();
        store.create(meta(id)).await.unwrap();
        let ev = Event::new(1, EventPayload::PromptComplete { event_count: 1 });
        store.append_event(id, &ev).await.unwrap();
        assert_eq!(store.get_metadata(id).unwrap().event_count, 1);
    }

    #[tokio::test]
    async fn sync_returns_only_events_after_given_seq() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        let id = Uuid::new_v4();
        store.create(meta(id)).await.unwrap();
        for s in 1..=7i64 {
            let ev = Event::new(s, EventPayload::PromptComplete { event_count: s as u64 });
            store.append_event(id, &ev).await.unwrap();
        }
        let result = store.sync(id, 3, true).unwrap();
        assert_eq!(result.events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![4, 5, 6, 7]);
        assert_eq!(result.event_count, 7);
        assert!(result.is_running);
    }

    #[tokio::test]
    async fn update_metadata_persists_mutation() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        let id = Uuid::new_v4();
        store.create(meta(id)).await.unwrap();
        store
            .update_metadata(id, |m| m.status = SessionStatus::Suspended)
            .await
            .unwrap();
        assert_eq!(store.get_metadata(id).unwrap().status, SessionStatus::Suspended);
    }

    #[test]
    fn queue_persists_round_trip() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());
        let id = Uuid::new_v4();
        fs::create_dir_all(store.session_dir(id)).unwrap();
        let mut q = MessageQueue::new(10);
        q.push(crate::queue::QueuedMessage {
            id: "m1".into(),
            text: "hi".into(),
            image_refs: vec![],
            client_id: "c1".into(),
            created_at: "now".into(),
            title: None,
        })
        .unwrap();
        store.save_queue(id, &q).unwrap();
        let loaded = store.load_queue(id, 10);
        assert_eq!(loaded.len(), 1);
    }
}
