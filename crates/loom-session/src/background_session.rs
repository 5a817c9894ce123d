// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Owns one session's agent subprocess and ACP connection, fans streamed
//! events out to attached observers, records them, and manages the
//! single-prompt-in-flight / queued-message lifecycle.
//!
//! The agent connection runs on a dedicated OS thread with its own
//! current-thread runtime and `LocalSet`, since ACP's futures are `!Send`
//! and cannot live on the default multi-threaded executor. Everything
//! else (observer fan-out, the event buffer, the queue) is plain `Send`
//! state reachable from any task.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use loom_acp::{AcpClient, AgentConnection, PermissionPolicy, RunResult};
use loom_core::{
    EmitSink, Event, EventPayload, MarkdownBufferConfig, SeqProvider, StreamBuffer,
    StreamBufferConfig, ThoughtBufferConfig,
};
use loom_store::{MessageQueue, QueuedMessage, SessionStatus, Store};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use uuid::Uuid;

use crate::error::{Result, SessionError};
use crate::event_buffer::EventBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Prompting,
    Ending,
}

#[derive(Debug, Clone)]
pub struct BackgroundSessionConfig {
    pub markdown: MarkdownBufferConfig,
    pub thought: ThoughtBufferConfig,
    pub stream: StreamBufferConfig,
    pub observer_channel_bound: usize,
    pub queue_bound: usize,
    pub allow_write: bool,
}

impl Default for BackgroundSessionConfig {
    fn default() -> Self {
        Self {
            markdown: MarkdownBufferConfig::default(),
            thought: ThoughtBufferConfig::default(),
            stream: StreamBufferConfig::default(),
            observer_channel_bound: 256,
            queue_bound: 32,
            allow_write: true,
        }
    }
}

enum WorkerCommand {
    Prompt { text: String, reply: oneshot::Sender<std::result::Result<RunResult, loom_acp::AcpError>> },
    Cancel,
    Shutdown,
}

/// Invoked once, from within the session itself, when a fatal agent
/// subprocess failure drives the session to `ended`. `SessionManager` binds
/// this at creation time to deregister the session from its running map —
/// `BackgroundSession` has no reference back to the manager, only this
/// narrow callback.
pub type FatalSink = Arc<dyn Fn(Uuid) + Send + Sync>;

pub struct BackgroundSession {
    session_id: Uuid,
    store: Arc<Store>,
    seq: SeqProvider,
    stream: Arc<StreamBuffer>,
    event_buffer: StdMutex<EventBuffer>,
    observers: StdMutex<HashMap<Uuid, mpsc::Sender<Event>>>,
    pending_permissions: Arc<StdMutex<HashMap<String, oneshot::Sender<Option<String>>>>>,
    queue: AsyncMutex<MessageQueue>,
    phase: AsyncMutex<Phase>,
    cmd_tx: mpsc::Sender<WorkerCommand>,
    worker: StdMutex<Option<std::thread::JoinHandle<()>>>,
    fatal: StdMutex<Option<FatalSink>>,
    config: BackgroundSessionConfig,
}

impl BackgroundSession {
    /// Spawns the agent subprocess for `session_id` and returns a runtime
    /// handle. `store` must already contain this session's metadata.
    pub fn start(
        session_id: Uuid,
        acp_command: String,
        working_dir: PathBuf,
        store: Arc<Store>,
        config: BackgroundSessionConfig,
    ) -> Arc<Self> {
        let queue = store.load_queue(session_id, config.queue_bound);
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let pending_permissions = Arc::new(StdMutex::new(HashMap::new()));

        let session = Arc::new_cyclic(|weak: &Weak<BackgroundSession>| {
            let weak_for_emit = weak.clone();
            let emit: EmitSink = Arc::new(move |event: Event| {
                if let Some(this) = weak_for_emit.upgrade() {
                    this.record_and_fanout(event);
                }
            });

            let seq = SeqProvider::new();
            let stream = StreamBuffer::new(
                config.markdown,
                config.thought,
                config.stream,
                seq.clone(),
                Arc::clone(&emit),
            );

            let pending_for_policy = Arc::clone(&pending_permissions);
            let policy = PermissionPolicy::Manual(Arc::new(move |req| {
                let (tx, rx) = oneshot::channel();
                let request_id = req.tool_call.tool_call_id.0.to_string();
                pending_for_policy.lock().unwrap().insert(request_id, tx);
                rx
            }));

            let client = Arc::new(AcpClient::new(
                Arc::clone(&stream),
                seq.clone(),
                emit,
                working_dir.clone(),
                policy,
            ));

            let worker = spawn_worker(session_id, acp_command, working_dir, client, config.allow_write, cmd_rx);

            BackgroundSession {
                session_id,
                store,
                seq,
                stream,
                event_buffer: StdMutex::new(EventBuffer::new()),
                observers: StdMutex::new(HashMap::new()),
                pending_permissions,
                queue: AsyncMutex::new(queue),
                phase: AsyncMutex::new(Phase::Idle),
                cmd_tx,
                worker: StdMutex::new(Some(worker)),
                fatal: StdMutex::new(None),
                config,
            }
        });

        session
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Registers the callback `SessionManager` uses to drop this session
    /// from its running map once a fatal subprocess failure ends it.
    pub fn bind_fatal_sink(&self, sink: FatalSink) {
        *self.fatal.lock().unwrap() = Some(sink);
    }

    /// Attaches a new observer and returns its id (for `detach_client`)
    /// plus the receiving half of its bounded event channel.
    pub fn attach_client(&self) -> (Uuid, mpsc::Receiver<Event>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.config.observer_channel_bound);
        self.observers.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    /// Removes an observer. Safe to call more than once for the same id.
    pub fn detach_client(&self, observer_id: Uuid) {
        self.observers.lock().unwrap().remove(&observer_id);
    }

    /// Starts a prompt if idle, otherwise enqueues it for later.
    pub async fn prompt(self: &Arc<Self>, text: String, client_id: String, title: Option<String>) -> Result<()> {
        let mut phase = self.phase.lock().await;
        if *phase != Phase::Idle {
            drop(phase);
            let msg = QueuedMessage {
                id: Uuid::new_v4().to_string(),
                text,
                image_refs: Vec::new(),
                client_id,
                created_at: chrono::Utc::now().to_rfc3339(),
                title,
            };
            let mut queue = self.queue.lock().await;
            queue.push(msg).map_err(|_| SessionError::AlreadyRunning(self.session_id))?;
            let _ = self.store.save_queue(self.session_id, &queue);
            let queue_len = queue.len();
            drop(queue);
            self.emit_and_persist_now(EventPayload::QueueUpdated { queue_len });
            return Ok(());
        }
        *phase = Phase::Prompting;
        drop(phase);
        self.start_prompt(text, client_id).await
    }

    async fn start_prompt(self: &Arc<Self>, text: String, client_id: String) -> Result<()> {
        self.emit(EventPayload::UserPrompt {
            prompt_id: Uuid::new_v4().to_string(),
            sender_id: client_id,
            message: text.clone(),
            image_ids: Vec::new(),
        });

        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(WorkerCommand::Prompt { text, reply: reply_tx })
            .await
            .map_err(|_| SessionError::NotFound(self.session_id))?;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = reply_rx.await;
            this.flush_and_end_prompt(outcome).await;
        });
        Ok(())
    }

    /// Signals cancellation of the in-flight prompt, if any.
    pub async fn cancel(&self) {
        let _ = self.cmd_tx.send(WorkerCommand::Cancel).await;
    }

    /// Relays a client's chosen permission option back to the agent.
    pub fn answer_permission(&self, request_id: &str, option_id: Option<String>) {
        if let Some(tx) = self.pending_permissions.lock().unwrap().remove(request_id) {
            let _ = tx.send(option_id);
        }
    }

    async fn flush_and_end_prompt(
        self: &Arc<Self>,
        outcome: std::result::Result<std::result::Result<RunResult, loom_acp::AcpError>, oneshot::error::RecvError>,
    ) {
        self.stream.flush();

        // A dropped reply channel means the worker thread is gone without
        // ever answering — treat it the same as the subprocess exiting.
        let result = outcome.unwrap_or(Err(loom_acp::AcpError::ProcessExited));
        let fatal_reason = match &result {
            Err(e) if e.is_fatal() => Some(e.to_string()),
            Err(e) => {
                self.emit(EventPayload::Error { message: e.to_string(), code: None });
                None
            }
            Ok(_) => None,
        };

        let mut entries = {
            let mut buf = self.event_buffer.lock().unwrap();
            std::mem::replace(&mut *buf, EventBuffer::new())
        };
        let _ = entries.persist_to(&self.store, self.session_id).await;

        let event_count = self
            .store
            .get_metadata(self.session_id)
            .map(|m| m.event_count)
            .unwrap_or(0);
        self.emit_and_persist_now(EventPayload::PromptComplete { event_count });

        match fatal_reason {
            Some(reason) => self.end_after_fatal_failure(reason).await,
            None => {
                *self.phase.lock().await = Phase::Idle;
                self.try_process_queued_message().await;
            }
        }
    }

    /// A spawn error, crash, or stdio EOF means the `AgentConnection` this
    /// session was built around is gone for good — unlike a soft/protocol
    /// error, queuing another prompt against it would just fail again.
    /// Tears the session down and, if bound, tells the manager to drop it.
    async fn end_after_fatal_failure(self: &Arc<Self>, reason: String) {
        let _ = self.end(reason).await;
        let sink = self.fatal.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink(self.session_id);
        }
    }

    /// If idle and a message is queued, starts it.
    pub async fn try_process_queued_message(self: &Arc<Self>) {
        if *self.phase.lock().await != Phase::Idle {
            return;
        }
        let next = {
            let mut queue = self.queue.lock().await;
            let next = queue.pop_front();
            let _ = self.store.save_queue(self.session_id, &queue);
            if next.is_some() {
                self.emit_and_persist_now(EventPayload::QueueUpdated { queue_len: queue.len() });
            }
            next
        };
        if let Some(msg) = next {
            self.emit_and_persist_now(EventPayload::QueueMessageSending { message_id: msg.id.clone() });
            self.emit_and_persist_now(EventPayload::QueueMessageSent { message_id: msg.id.clone() });
            *self.phase.lock().await = Phase::Prompting;
            let _ = self.start_prompt(msg.text, msg.client_id).await;
        }
    }

    /// Persists a new display name for this session.
    pub async fn rename(&self, name: String) -> Result<()> {
        self.store.update_metadata(self.session_id, move |m| m.name = name).await?;
        Ok(())
    }

    /// Stops the agent subprocess but keeps the session resumable.
    pub async fn suspend(&self) -> Result<()> {
        let _ = self.cmd_tx.send(WorkerCommand::Shutdown).await;
        self.store
            .update_metadata(self.session_id, |m| m.status = SessionStatus::Suspended)
            .await?;
        Ok(())
    }

    /// Tears the session down permanently (caller removes it from the
    /// manager's map).
    pub async fn end(&self, reason: impl Into<String>) -> Result<()> {
        *self.phase.lock().await = Phase::Ending;
        let _ = self.cmd_tx.send(WorkerCommand::Shutdown).await;
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = tokio::task::spawn_blocking(move || handle.join());
        }
        self.emit(EventPayload::Error { message: reason.into(), code: None });
        self.store
            .update_metadata(self.session_id, |m| m.status = SessionStatus::Ended)
            .await?;
        Ok(())
    }

    /// Events emitted mid-prompt: buffered (with coalescing) and fanned
    /// out live; persisted once the prompt ends.
    fn emit(&self, payload: EventPayload) {
        let event = Event::new(self.seq.next_seq(), payload);
        self.record_and_fanout(event);
    }

    fn record_and_fanout(&self, event: Event) {
        self.event_buffer.lock().unwrap().append(event.clone());
        self.fanout(event);
    }

    /// Events that stand alone outside any prompt's buffer (e.g.
    /// `prompt_complete`): fanned out live and persisted immediately.
    fn emit_and_persist_now(&self, payload: EventPayload) {
        let event = Event::new(self.seq.next_seq(), payload);
        self.fanout(event.clone());
        let store = Arc::clone(&self.store);
        let session_id = self.session_id;
        tokio::spawn(async move {
            let _ = store.append_event(session_id, &event).await;
        });
    }

    fn fanout(&self, event: Event) {
        let mut observers = self.observers.lock().unwrap();
        let dead: Vec<Uuid> = observers
            .iter()
            .filter_map(|(id, tx)| if tx.try_send(event.clone()).is_err() { Some(*id) } else { None })
            .collect();
        for id in dead {
            observers.remove(&id);
        }
    }
}

fn spawn_worker(
    session_id: Uuid,
    acp_command: String,
    working_dir: PathBuf,
    client: Arc<AcpClient>,
    allow_write: bool,
    mut cmd_rx: mpsc::Receiver<WorkerCommand>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let outcome = loom_acp::run_on_local_set(async move {
            let mut conn = AgentConnection::spawn(session_id, &acp_command, &working_dir, client, allow_write).await?;
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    WorkerCommand::Prompt { text, reply } => {
                        let result = conn.prompt(text).await;
                        let _ = reply.send(result);
                    }
                    WorkerCommand::Cancel => conn.cancel(),
                    WorkerCommand::Shutdown => break,
                }
            }
            conn.shutdown().await;
            Ok(())
        });
        if let Err(e) = outcome {
            tracing::error!(session_id = %session_id, error = ?e, "agent worker thread ended with an error");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_has_sane_bounds() {
        let cfg = BackgroundSessionConfig::default();
        assert_eq!(cfg.observer_channel_bound, 256);
        assert!(cfg.queue_bound > 0);
    }

    // The command is deliberately bogus: `BackgroundSession::start` never
    // fails synchronously (the subprocess spawn error surfaces later, on
    // the worker thread), so it's safe to exercise the observer-facing API
    // without a real agent.
    async fn test_session(dir: &std::path::Path) -> Arc<BackgroundSession> {
        test_session_with_bound(dir, 2).await
    }

    async fn test_session_with_bound(dir: &std::path::Path, observer_channel_bound: usize) -> Arc<BackgroundSession> {
        let store = Arc::new(Store::new(dir));
        let session_id = Uuid::new_v4();
        let meta = loom_store::SessionMetadata::new(session_id, "t", "mock", vec!["/bin/does-not-exist".into()], dir.display().to_string());
        store.create(meta).await.unwrap();
        let config = BackgroundSessionConfig { observer_channel_bound, ..BackgroundSessionConfig::default() };
        BackgroundSession::start(session_id, "/bin/does-not-exist".into(), dir.to_path_buf(), store, config)
    }

    #[tokio::test]
    async fn attach_then_detach_removes_observer() {
        let dir = tempdir().unwrap();
        let session = test_session(dir.path()).await;
        let (id, _rx) = session.attach_client();
        assert_eq!(session.observers.lock().unwrap().len(), 1);
        session.detach_client(id);
        assert_eq!(session.observers.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn detach_is_idempotent_for_unknown_observer() {
        let dir = tempdir().unwrap();
        let session = test_session(dir.path()).await;
        session.detach_client(Uuid::new_v4());
    }

    #[tokio::test]
    async fn fanout_drops_full_observer_but_keeps_others() {
        let dir = tempdir().unwrap();
        let session = test_session(dir.path()).await;

        let (a_id, mut a_rx) = session.attach_client();
        let (_b_id, mut b_rx) = session.attach_client();

        // Fill A's channel (bound 2) without draining it, then one more
        // send should make it full and the next fanout should drop it.
        session.fanout(Event::new(1, EventPayload::PromptComplete { event_count: 1 }));
        session.fanout(Event::new(2, EventPayload::PromptComplete { event_count: 2 }));
        assert_eq!(session.observers.lock().unwrap().len(), 2);

        session.fanout(Event::new(3, EventPayload::PromptComplete { event_count: 3 }));
        assert!(!session.observers.lock().unwrap().contains_key(&a_id));
        assert_eq!(session.observers.lock().unwrap().len(), 1);

        // B, never filled, received all three.
        assert_eq!(b_rx.recv().await.unwrap().seq, 1);
        assert_eq!(b_rx.recv().await.unwrap().seq, 2);
        assert_eq!(b_rx.recv().await.unwrap().seq, 3);

        drop(a_rx.recv().await);
    }

    #[tokio::test]
    async fn prompt_while_prompting_enqueues_instead_of_erroring() {
        let dir = tempdir().unwrap();
        let session = test_session(dir.path()).await;
        *session.phase.lock().await = Phase::Prompting;

        session.prompt("second message".into(), "client-1".into(), None).await.unwrap();
        assert_eq!(session.queue.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn enqueuing_while_busy_emits_queue_updated() {
        let dir = tempdir().unwrap();
        let session = test_session(dir.path()).await;
        let (_id, mut rx) = session.attach_client();
        *session.phase.lock().await = Phase::Prompting;

        session.prompt("queued message".into(), "client-1".into(), None).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.payload, EventPayload::QueueUpdated { queue_len: 1 }));
    }

    #[tokio::test]
    async fn dequeuing_a_message_emits_sending_then_sent() {
        let dir = tempdir().unwrap();
        let session = test_session_with_bound(dir.path(), 16).await;
        let (_id, mut rx) = session.attach_client();

        let msg = QueuedMessage {
            id: "q1".into(),
            text: "queued".into(),
            image_refs: Vec::new(),
            client_id: "client-1".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            title: None,
        };
        session.queue.lock().await.push(msg).unwrap();

        session.try_process_queued_message().await;

        let first = rx.recv().await.unwrap();
        assert!(matches!(first.payload, EventPayload::QueueUpdated { queue_len: 0 }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second.payload, EventPayload::QueueMessageSending { ref message_id } if message_id == "q1"));
        let third = rx.recv().await.unwrap();
        assert!(matches!(third.payload, EventPayload::QueueMessageSent { ref message_id } if message_id == "q1"));
    }
}
