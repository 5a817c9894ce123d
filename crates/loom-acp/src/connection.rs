// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Spawns an agent subprocess, drives the ACP handshake on a `LocalSet`
//! (ACP's futures are `!Send`), and exposes `prompt`/`cancel` to the owning
//! `BackgroundSession`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use agent_client_protocol::{
    Agent, AuthenticateRequest, ClientCapabilities, ClientSideConnection, ContentBlock,
    FileSystemCapability, Implementation, InitializeRequest, NewSessionRequest, PromptRequest,
    ProtocolVersion, SessionId, StopReason, TextContent,
};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::LocalSet;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use uuid::Uuid;

use crate::client::AcpClient;
use crate::error::{AcpError, Result};

/// Splits a shell-style agent command string into a program and its
/// arguments, e.g. `"claude-code-acp --flag"` -> `("claude-code-acp", ["--flag"])`.
pub fn parse_agent_command(command: &str) -> Result<(String, Vec<String>)> {
    let mut parts = shlex::split(command)
        .ok_or_else(|| AcpError::InvalidCommand(command.to_string()))?
        .into_iter();
    let program = parts.next().ok_or_else(|| AcpError::InvalidCommand(command.to_string()))?;
    Ok((program, parts.collect()))
}

/// Why a prompt turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    EndTurn,
    Cancelled,
    MaxTokens,
    MaxTurnRequests,
    Refusal,
    Other,
}

fn map_stop_reason(reason: StopReason) -> RunResult {
    match reason {
        StopReason::EndTurn => RunResult::EndTurn,
        StopReason::Cancelled => RunResult::Cancelled,
        StopReason::MaxTokens => RunResult::MaxTokens,
        StopReason::MaxTurnRequests => RunResult::MaxTurnRequests,
        StopReason::Refusal => RunResult::Refusal,
        _ => RunResult::Other,
    }
}

/// A live connection to one agent subprocess, plus the means to cancel an
/// in-flight prompt and to tear the process down.
pub struct AgentConnection {
    child: Child,
    session_id: SessionId,
    conn: ClientSideConnection,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl AgentConnection {
    /// Spawns `command` in `working_dir`, performs the ACP
    /// initialize -> authenticate -> new_session handshake, and returns a
    /// connection ready to accept prompts. Must run inside a `LocalSet`.
    pub async fn spawn(
        session_id: Uuid,
        command: &str,
        working_dir: &Path,
        client: Arc<AcpClient>,
        allow_write: bool,
    ) -> Result<Self> {
        let (program, args) = parse_agent_command(command)?;

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| AcpError::Spawn { program: program.clone(), source: e })?;

        let stdin = child.stdin.take().ok_or(AcpError::MissingPipes(session_id))?;
        let stdout = child.stdout.take().ok_or(AcpError::MissingPipes(session_id))?;

        let (conn, io_future) = ClientSideConnection::new(
            client,
            stdin.compat_write(),
            stdout.compat(),
            |fut| {
                tokio::task::spawn_local(fut);
            },
        );

        tokio::task::spawn_local(async move {
            if let Err(e) = io_future.await {
                tracing::warn!(session_id = %session_id, error = ?e, "ACP IO loop ended with error");
            }
        });

        let client_info = Implementation::new("loom", env!("CARGO_PKG_VERSION"));
        let caps = ClientCapabilities::new()
            .fs(FileSystemCapability::new().read_text_file(true).write_text_file(allow_write))
            .terminal(false);
        let init_request =
            InitializeRequest::new(ProtocolVersion::LATEST).client_capabilities(caps).client_info(client_info);
        let init_response = conn
            .initialize(init_request)
            .await
            .map_err(|e| AcpError::Initialize(format!("{e:?}")))?;

        // Authentication is best-effort: plenty of ACP agents run unauthenticated
        // in local/dev setups, so a failure here doesn't abort the session.
        if let Some(methods) = init_response.auth_methods.as_ref() {
            if let Some(method) = methods.first() {
                if let Err(e) = conn.authenticate(AuthenticateRequest::new(method.id.clone())).await {
                    tracing::warn!(session_id = %session_id, error = ?e, "ACP authenticate failed, continuing unauthenticated");
                }
            }
        }

        let session_response = conn
            .new_session(NewSessionRequest::new(working_dir.to_path_buf()))
            .await
            .map_err(|e| AcpError::NewSession(format!("{e:?}")))?;

        Ok(Self { child, session_id: session_response.session_id, conn, cancel_tx: None })
    }

    pub fn acp_session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Sends `text` as a new prompt turn, racing it against an external
    /// cancel signal. Only one prompt may be in flight at a time; the
    /// caller (`BackgroundSession`) enforces that invariant.
    pub async fn prompt(&mut self, text: String) -> Result<RunResult> {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancel_tx = Some(cancel_tx);

        let content = vec![ContentBlock::Text(TextContent::new(text))];
        let request = PromptRequest::new(self.session_id.clone(), content);

        let result = tokio::select! {
            res = self.conn.prompt(request) => {
                res.map(|r| map_stop_reason(r.stop_reason)).map_err(|e| AcpError::Prompt(format!("{e:?}")))
            }
            _ = cancel_rx => {
                let cancel = agent_client_protocol::CancelNotification::new(self.session_id.clone());
                let _ = self.conn.cancel(cancel).await;
                Ok(RunResult::Cancelled)
            }
        };
        self.cancel_tx = None;
        result
    }

    /// Signals cancellation to an in-flight `prompt` call, if any.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Kills the agent subprocess. Safe to call more than once.
    pub async fn shutdown(mut self) {
        let _ = self.child.kill().await;
    }
}

/// Runs `body` on a fresh current-thread runtime with a `LocalSet`, since
/// ACP connections use `!Send` futures and cannot live on the default
/// multi-threaded executor.
pub fn run_on_local_set<F, T>(body: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| AcpError::Spawn { program: "<runtime>".into(), source: e })?;
    let local = LocalSet::new();
    local.block_on(&rt, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_agent_command_splits_program_and_args() {
        let (program, args) = parse_agent_command("claude-code-acp --flag value").unwrap();
        assert_eq!(program, "claude-code-acp");
        assert_eq!(args, vec!["--flag", "value"]);
    }

    #[test]
    fn parse_agent_command_rejects_unbalanced_quotes() {
        assert!(parse_agent_command("claude \"unterminated").is_err());
    }

    #[test]
    fn parse_agent_command_rejects_empty_string() {
        assert!(parse_agent_command("").is_err());
    }

    #[test]
    fn stop_reason_maps_end_turn() {
        assert_eq!(map_stop_reason(StopReason::EndTurn), RunResult::EndTurn);
        assert_eq!(map_stop_reason(StopReason::Cancelled), RunResult::Cancelled);
    }
}
