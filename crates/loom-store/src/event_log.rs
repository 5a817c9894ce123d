// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Append-only, one-JSON-record-per-line event log for a single session.
//!
//! Append is exclusive (serialized through the owning `Store`'s per-session
//! write mutex, per the concurrency design); reads are lock-free and always
//! see a consistent prefix because records are only ever appended, never
//! rewritten.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use loom_core::Event;
use uuid::Uuid;

use crate::error::{Result, StoreError};

pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, session_id: Uuid, event: &Event) -> Result<()> {
        let line = serde_json::to_string(event)
            .map_err(|e| StoreError::Corrupt { session: session_id, detail: e.to_string() })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::Io { session: session_id, source: e })?;
        writeln!(file, "{line}").map_err(|e| StoreError::Io { session: session_id, source: e })?;
        Ok(())
    }

    pub fn read_all(&self, session_id: Uuid) -> Result<Vec<Event>> {
        self.read_from(session_id, 0)
    }

    pub fn read_from(&self, session_id: Uuid, after_seq: i64) -> Result<Vec<Event>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).map_err(|e| StoreError::Io { session: session_id, source: e })?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| StoreError::Io { session: session_id, source: e })?;
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
                session: session_id,
                detail: format!("line {lineno}: {e}"),
            })?;
            if event.seq > after_seq {
                events.push(event);
            }
        }
        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::EventPayload;
    use tempfile::tempdir;

    fn ev(seq: i64) -> Event {
        Event::new(seq, EventPayload::PromptComplete { event_count: seq as u64 })
    }

    #[test]
    fn append_then_read_all_returns_seq_order() {
        let dir = tempdir().unwrap();
        let log = EventLog::at(dir.path().join("events.jsonl"));
        let id = Uuid::new_v4();
        log.append(id, &ev(1)).unwrap();
        log.append(id, &ev(2)).unwrap();
        log.append(id, &ev(3)).unwrap();
        let events = log.read_all(id).unwrap();
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn read_from_excludes_up_to_after_seq() {
        let dir = tempdir().unwrap();
        let log = EventLog::at(dir.path().join("events.jsonl"));
        let id = Uuid::new_v4();
        for s in 1..=7 {
            log.append(id, &ev(s)).unwrap();
        }
        let events = log.read_from(id, 3).unwrap();
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![4, 5, 6, 7]);
    }

    #[test]
    fn read_from_is_idempotent() {
        let dir = tempdir().unwrap();
        let log = EventLog::at(dir.path().join("events.jsonl"));
        let id = Uuid::new_v4();
        log.append(id, &ev(1)).unwrap();
        log.append(id, &ev(2)).unwrap();
        let a = log.read_from(id, 0).unwrap();
        let b = log.read_from(id, 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn reading_a_missing_log_returns_empty() {
        let dir = tempdir().unwrap();
        let log = EventLog::at(dir.path().join("never-written.jsonl"));
        assert!(log.read_all(Uuid::new_v4()).unwrap().is_empty());
    }
}
