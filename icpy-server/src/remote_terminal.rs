//! Remote Terminal Manager (4.I): bridges a terminal session to a PTY
//! spawned over the active SSH hop, instead of a locally forked process.
//!
//! Grounded on
//! `original_source/backend/icpy/services/remote_terminal_manager.py`
//! (`connect_terminal`/`disconnect_terminal`/`_pump_stdout`/`_pump_stdin`/
//! `_watch_process`).

use crate::conn_manager::ConnectionSink;
use crate::hop::HopService;
use icpy_core::{Error, Result};
use russh::{ChannelMsg, Pty};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Shell invocations tried in order when opening a remote interactive
/// session, mirroring the original's bash-login -> interactive-only ->
/// `/bin/sh -i` fallback chain for hops whose configured shell is missing
/// or refuses login-mode flags.
fn shell_fallback_chain(remote_shell: &str) -> Vec<String> {
    let mut chain = Vec::new();
    if remote_shell.ends_with("bash") {
        chain.push(format!("{remote_shell} -il"));
    }
    chain.push(format!("{remote_shell} -i"));
    if remote_shell != "/bin/sh" {
        chain.push("/bin/sh -i".to_string());
    }
    chain
}

enum TermCommand {
    Write(Vec<u8>),
    Resize { cols: u32, rows: u32 },
}

/// Parses a `send_input` payload into either a resize request or raw bytes
/// to write to the PTY. Resize frames are plain JSON objects
/// (`{"type":"resize","cols":80,"rows":24}`) sent in place of terminal
/// input, since the remote terminal has no side-channel RPC for this the
/// way `terminal.resize` is for local sessions.
fn parse_input(data: &[u8]) -> TermCommand {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        if value.get("type").and_then(|t| t.as_str()) == Some("resize") {
            let cols = value.get("cols").and_then(|v| v.as_u64()).unwrap_or(80) as u32;
            let rows = value.get("rows").and_then(|v| v.as_u64()).unwrap_or(24) as u32;
            return TermCommand::Resize { cols, rows };
        }
    }
    TermCommand::Write(data.to_vec())
}

struct RemoteTerminal {
    command_tx: tokio::sync::mpsc::Sender<TermCommand>,
    task: JoinHandle<()>,
}

pub struct RemoteTerminalManager {
    hop: Arc<HopService>,
    sessions: Mutex<HashMap<String, RemoteTerminal>>,
    remote_shell: String,
}

impl RemoteTerminalManager {
    pub fn new(hop: Arc<HopService>, remote_shell: String) -> Self {
        Self {
            hop,
            sessions: Mutex::new(HashMap::new()),
            remote_shell,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Spawn an interactive remote shell over the active hop connection and
    /// pump its output to `sink`. Returns once the pump is wired; the I/O
    /// task keeps running until `disconnect_terminal` is called or the
    /// remote process exits.
    pub async fn connect_terminal(&self, sink: Arc<dyn ConnectionSink>, terminal_id: &str) -> Result<()> {
        let session = self.hop.status().await;
        if session.is_local() {
            return Err(Error::Terminal("no active SSH connection".into()));
        }
        let cwd = session.cwd.clone();
        let context_id = session.context_id.clone();

        let mut last_err = None;
        let mut channel = None;
        for shell_command in shell_fallback_chain(&self.remote_shell) {
            let shell_command = shell_command.clone();
            let result = self
                .hop
                .with_ssh(&context_id, move |handle| {
                    Box::pin(async move {
                        let channel = handle
                            .channel_open_session()
                            .await
                            .map_err(|e| Error::Terminal(e.to_string()))?;
                        channel
                            .request_pty(
                                false,
                                "xterm-256color",
                                120,
                                30,
                                0,
                                0,
                                &[(Pty::TTY_OP_ISPEED, 14400), (Pty::TTY_OP_OSPEED, 14400)],
                            )
                            .await
                            .map_err(|e| Error::Terminal(e.to_string()))?;
                        channel
                            .exec(true, shell_command)
                            .await
                            .map_err(|e| Error::Terminal(e.to_string()))?;
                        Ok(channel)
                    })
                })
                .await;
            match result {
                Ok(ch) => {
                    channel = Some(ch);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let channel = channel.ok_or_else(|| {
            last_err.unwrap_or_else(|| Error::Terminal("no remote shell could be started".into()))
        })?;

        let (command_tx, mut command_rx) = tokio::sync::mpsc::channel::<TermCommand>(64);
        if cwd != "/" && !cwd.is_empty() {
            let _ = command_tx.send(TermCommand::Write(format!("cd {cwd}\n").into_bytes())).await;
        }

        let terminal_id_owned = terminal_id.to_string();
        let task = tokio::spawn(async move {
            let mut channel = channel;
            loop {
                tokio::select! {
                    command = command_rx.recv() => {
                        match command {
                            Some(TermCommand::Write(bytes)) => {
                                if channel.data(bytes.as_slice()).await.is_err() {
                                    break;
                                }
                            }
                            Some(TermCommand::Resize { cols, rows }) => {
                                let _ = channel.window_change(cols, rows, 0, 0).await;
                            }
                            None => break,
                        }
                    }
                    msg = channel.wait() => {
                        match msg {
                            Some(ChannelMsg::Data { data }) => {
                                let payload = serde_json::json!({
                                    "terminal_id": terminal_id_owned,
                                    "data": String::from_utf8_lossy(&data),
                                });
                                if sink.send(payload).await.is_err() {
                                    break;
                                }
                            }
                            Some(ChannelMsg::ExitStatus { .. }) | Some(ChannelMsg::Eof) | None => break,
                            _ => {}
                        }
                    }
                }
            }
        });

        self.sessions.lock().await.insert(terminal_id.to_string(), RemoteTerminal { command_tx, task });
        Ok(())
    }

    pub async fn send_input(&self, terminal_id: &str, data: Vec<u8>) -> Result<()> {
        let state = self.sessions.lock().await;
        let session = state
            .get(terminal_id)
            .ok_or_else(|| Error::NotFound(format!("remote terminal {terminal_id}")))?;
        session
            .command_tx
            .send(parse_input(&data))
            .await
            .map_err(|_| Error::Terminal("remote terminal input channel closed".into()))
    }

    pub async fn disconnect_terminal(&self, terminal_id: &str) {
        if let Some(session) = self.sessions.lock().await.remove(terminal_id) {
            session.task.abort();
        }
    }

    pub async fn shutdown_all(&self) -> usize {
        let mut state = self.sessions.lock().await;
        let count = state.len();
        for (_, session) in state.drain() {
            session.task.abort();
        }
        count
    }
}
