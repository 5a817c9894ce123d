// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! The `Client` side of the ACP connection: receives `session/update`
//! notifications from the agent subprocess and serves its file-system and
//! permission requests.
//!
//! Notifications are translated into [`AgentInput`] and handed to the
//! session's [`StreamBuffer`]; everything that bypasses markdown buffering
//! (file reads/writes, permission prompts, errors) is sequenced and emitted
//! directly through the same [`SeqProvider`]/[`EmitSink`] pair so all events
//! for a session still interleave in one dense, monotonic sequence.

use std::path::PathBuf;
use std::sync::Arc;

use agent_client_protocol::{
    Client, ContentBlock, PermissionOptionKind as AcpPermissionOptionKind, ReadTextFileRequest,
    ReadTextFileResponse, RequestPermissionOutcome, RequestPermissionRequest,
    RequestPermissionResponse, Result as AcpResult, SelectedPermissionOutcome, SessionNotification,
    SessionUpdate, WriteTextFileRequest, WriteTextFileResponse,
};
use async_trait::async_trait;
use tokio::fs;

use loom_core::{
    AgentInput, EmitSink, Event, EventPayload, PermissionOption, PermissionOptionKind, PlanEntry,
    SeqProvider, StreamBuffer, ToolCallStatus,
};

/// How permission prompts are resolved when the agent asks for one.
#[derive(Clone)]
pub enum PermissionPolicy {
    /// Pick the first `allow_once`/`allow_always` option automatically,
    /// falling back to the first option offered if none is an allow kind.
    AutoApprove,
    /// Hand the request to the session layer and await a human answer.
    /// The callback registers the pending request (typically keyed by its
    /// `request_id`) and returns a receiver that resolves once the owning
    /// `BackgroundSession` relays the client's chosen option id, or `None`
    /// if the request was abandoned (session ended, client disconnected).
    Manual(
        Arc<dyn Fn(RequestPermissionRequest) -> tokio::sync::oneshot::Receiver<Option<String>> + Send + Sync>,
    ),
}

/// Implements the ACP `Client` role for one session's agent subprocess.
pub struct AcpClient {
    stream: Arc<StreamBuffer>,
    seq: SeqProvider,
    emit: EmitSink,
    working_dir: PathBuf,
    permission_policy: PermissionPolicy,
}

impl AcpClient {
    pub fn new(
        stream: Arc<StreamBuffer>,
        seq: SeqProvider,
        emit: EmitSink,
        working_dir: PathBuf,
        permission_policy: PermissionPolicy,
    ) -> Self {
        Self { stream, seq, emit, working_dir, permission_policy }
    }

    fn resolve_path(&self, path: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }

    fn emit_now(&self, payload: EventPayload) {
        let ev = Event::new(self.seq.next_seq(), payload);
        (self.emit)(ev);
    }
}

#[async_trait(?Send)]
impl Client for AcpClient {
    async fn session_notification(&self, notification: SessionNotification) -> AcpResult<()> {
        match notification.update {
            SessionUpdate::AgentMessageChunk(chunk) => {
                if let ContentBlock::Text(text) = chunk.content {
                    self.stream.handle(AgentInput::MessageChunk(text.text));
                }
            }
            SessionUpdate::AgentThoughtChunk(chunk) => {
                if let ContentBlock::Text(text) = chunk.content {
                    self.stream.handle(AgentInput::ThoughtChunk(text.text));
                }
            }
            SessionUpdate::ToolCall(tool_call) => {
                self.stream.handle(AgentInput::ToolCall {
                    id: tool_call.tool_call_id.0.to_string(),
                    title: tool_call.title.clone(),
                    status: map_tool_call_status(tool_call.status),
                });
            }
            SessionUpdate::ToolCallUpdate(update) => {
                self.stream.handle(AgentInput::ToolCallUpdate {
                    id: update.tool_call_id.0.to_string(),
                    status: update.fields.status.map(map_tool_call_status),
                });
            }
            SessionUpdate::Plan(plan) => {
                let entries = plan
                    .entries
                    .into_iter()
                    .map(|e| PlanEntry {
                        content: e.content,
                        status: map_tool_call_status(e.status),
                    })
                    .collect();
                self.stream.handle(AgentInput::Plan { entries });
            }
            // Available-command and current-mode updates don't have a place
            // in the session's markdown/event timeline; nothing to record.
            _ => {}
        }
        Ok(())
    }

    async fn request_permission(
        &self,
        args: RequestPermissionRequest,
    ) -> AcpResult<RequestPermissionResponse> {
        let options: Vec<PermissionOption> = args
            .options
            .iter()
            .map(|opt| PermissionOption {
                id: opt.option_id.0.to_string(),
                label: opt.name.clone(),
                kind: map_permission_option_kind(opt.kind),
            })
            .collect();
        self.emit_now(EventPayload::Permission {
            request_id: args.tool_call.tool_call_id.0.to_string(),
            title: args.tool_call.title.clone(),
            options,
        });

        let chosen_id = match &self.permission_policy {
            PermissionPolicy::AutoApprove => args
                .options
                .iter()
                .find(|opt| {
                    matches!(
                        opt.kind,
                        AcpPermissionOptionKind::AllowOnce | AcpPermissionOptionKind::AllowAlways
                    )
                })
                .or_else(|| args.options.first())
                .map(|opt| opt.option_id.clone()),
            PermissionPolicy::Manual(resolve) => resolve(args.clone())
                .await
                .ok()
                .flatten()
                .map(agent_client_protocol::PermissionOptionId::new),
        };

        let outcome = match chosen_id {
            Some(id) => RequestPermissionOutcome::Selected(SelectedPermissionOutcome::new(id)),
            None => RequestPermissionOutcome::Cancelled,
        };
        Ok(RequestPermissionResponse::new(outcome))
    }

    async fn read_text_file(&self, args: ReadTextFileRequest) -> AcpResult<ReadTextFileResponse> {
        let path = self.resolve_path(&args.path);
        let content = fs::read_to_string(&path).await.unwrap_or_default();
        self.emit_now(EventPayload::FileRead { path: args.path.display().to_string() });
        let content = if let (Some(line), Some(limit)) = (args.line, args.limit) {
            content
                .lines()
                .skip(line.saturating_sub(1) as usize)
                .take(limit as usize)
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            content
        };
        Ok(ReadTextFileResponse::new(content))
    }

    async fn write_text_file(&self, args: WriteTextFileRequest) -> AcpResult<WriteTextFileResponse> {
        let path = self.resolve_path(&args.path);
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent).await;
        }
        let _ = fs::write(&path, &args.content).await;
        self.emit_now(EventPayload::FileWrite { path: args.path.display().to_string() });
        Ok(WriteTextFileResponse::new())
    }
}

fn map_tool_call_status(status: agent_client_protocol::ToolCallStatus) -> ToolCallStatus {
    match status {
        agent_client_protocol::ToolCallStatus::Pending => ToolCallStatus::Pending,
        agent_client_protocol::ToolCallStatus::InProgress => ToolCallStatus::Running,
        agent_client_protocol::ToolCallStatus::Completed => ToolCallStatus::Completed,
        agent_client_protocol::ToolCallStatus::Failed => ToolCallStatus::Failed,
    }
}

fn map_permission_option_kind(kind: AcpPermissionOptionKind) -> PermissionOptionKind {
    match kind {
        AcpPermissionOptionKind::AllowOnce => PermissionOptionKind::AllowOnce,
        AcpPermissionOptionKind::AllowAlways => PermissionOptionKind::AllowAlways,
        AcpPermissionOptionKind::RejectOnce => PermissionOptionKind::RejectOnce,
        AcpPermissionOptionKind::RejectAlways => PermissionOptionKind::RejectAlways,
    }
}
