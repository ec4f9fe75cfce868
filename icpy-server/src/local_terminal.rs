//! Local Terminal Service (4.J): local PTY-backed terminal sessions.
//!
//! Grounded on
//! `original_source/backend/icpy/services/terminal_service.py`
//! (`TerminalConfig`/`TerminalSession`/`TerminalService`). PTY I/O goes
//! through `portable-pty`, whose blocking reader/writer handles are wrapped
//! with `tokio::task::spawn_blocking`, the same pattern the teacher uses to
//! bridge the blocking `sled` API in `persistent_storage.rs`.

use crate::broker::{MessageBroker, MessageType};
use crate::conn_manager::ConnectionSink;
use icpy_core::{Error, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalState {
    Created,
    Starting,
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub shell: String,
    pub term: String,
    pub cols: u16,
    pub rows: u16,
    pub env: HashMap<String, String>,
    pub cwd: std::path::PathBuf,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/bash".to_string(),
            term: "xterm-256color".to_string(),
            cols: 80,
            rows: 24,
            env: HashMap::new(),
            cwd: dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from("/")),
        }
    }
}

struct TerminalSession {
    id: String,
    name: String,
    config: TerminalConfig,
    state: TerminalState,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    created_at: Instant,
    last_activity: Instant,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct Stats {
    sessions_created: u64,
    sessions_destroyed: u64,
    total_input_bytes: u64,
    total_output_bytes: u64,
    resize_operations: u64,
}

/// Grace period given to a SIGTERM'd session before escalating to SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Signals the child's process group with SIGTERM, waits up to
/// [`KILL_GRACE`] for it to exit, then escalates to SIGKILL. Targeting the
/// process group (not just the shell's own pid) avoids leaving orphaned
/// subshells or pipelines running after the terminal is torn down.
async fn graceful_kill(child: &mut (dyn Child + Send + Sync)) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.process_id() {
            let pgid = -(pid as libc::pid_t);
            unsafe {
                libc::kill(pgid, libc::SIGTERM);
            }
            let deadline = Instant::now() + KILL_GRACE;
            while Instant::now() < deadline {
                if matches!(child.try_wait(), Ok(Some(_))) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            unsafe {
                libc::kill(pgid, libc::SIGKILL);
            }
            return;
        }
    }
    let _ = child.kill();
}

pub struct LocalTerminalService {
    sessions: Mutex<HashMap<String, TerminalSession>>,
    websocket_sessions: Mutex<HashMap<String, String>>,
    stats: Mutex<Stats>,
    broker: MessageBroker,
    max_sessions: usize,
    session_timeout: Duration,
}

impl LocalTerminalService {
    pub fn new(broker: MessageBroker) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            websocket_sessions: Mutex::new(HashMap::new()),
            stats: Mutex::new(Stats::default()),
            broker,
            max_sessions: 100,
            session_timeout: Duration::from_secs(3600),
        }
    }

    async fn emit(&self, event: &str, payload: serde_json::Value) {
        let _ = self
            .broker
            .publish(format!("terminal.{event}"), payload, MessageType::Notification, None, None, None, None)
            .await;
    }

    pub async fn create_session(&self, name: Option<String>, config: TerminalConfig) -> Result<String> {
        if self.sessions.lock().await.len() >= self.max_sessions {
            return Err(Error::ConnectionLimitExceeded("max terminal sessions reached".into()));
        }
        let id = format!("term-{}", rand::random::<u32>());
        let name = name.unwrap_or_else(|| id.clone());

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Terminal(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&config.shell);
        cmd.cwd(&config.cwd);
        cmd.env("TERM", &config.term);
        for (k, v) in &config.env {
            cmd.env(k, v);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Terminal(e.to_string()))?;
        drop(pair.slave);

        let writer = pair.master.take_writer().map_err(|e| Error::Terminal(e.to_string()))?;

        let session = TerminalSession {
            id: id.clone(),
            name,
            config,
            state: TerminalState::Running,
            master: pair.master,
            writer,
            child,
            created_at: Instant::now(),
            last_activity: Instant::now(),
            tasks: Vec::new(),
        };

        self.sessions.lock().await.insert(id.clone(), session);
        self.stats.lock().await.sessions_created += 1;
        self.emit("created", serde_json::json!({"session_id": id})).await;
        Ok(id)
    }

    /// Attach `sink` to a session's PTY output. Spawns a blocking reader
    /// task since `portable-pty`'s reader is a synchronous `Read`.
    pub async fn connect_sink(&self, session_id: &str, sink: Arc<dyn ConnectionSink>) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("terminal session {session_id}")))?;

        let mut reader = session
            .master
            .try_clone_reader()
            .map_err(|e| Error::Terminal(e.to_string()))?;
        let session_id_owned = session_id.to_string();
        let broker = self.broker.clone();

        let task = tokio::spawn(async move {
            loop {
                let mut buf = vec![0u8; 8192];
                let read_result = tokio::task::spawn_blocking(move || {
                    let n = reader.read(&mut buf).unwrap_or(0);
                    buf.truncate(n);
                    (buf, reader)
                })
                .await;

                let Ok((chunk, returned_reader)) = read_result else { break };
                reader = returned_reader;
                if chunk.is_empty() {
                    break;
                }
                let payload = serde_json::json!({
                    "session_id": session_id_owned,
                    "data": String::from_utf8_lossy(&chunk),
                });
                if sink.send(payload.clone()).await.is_err() {
                    break;
                }
                let _ = broker
                    .publish(
                        "terminal.output",
                        payload,
                        MessageType::Notification,
                        None,
                        None,
                        None,
                        None,
                    )
                    .await;
            }
        });
        session.tasks.push(task);
        Ok(())
    }

    pub async fn disconnect_sink(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().await.get_mut(session_id) {
            for task in session.tasks.drain(..) {
                task.abort();
            }
        }
    }

    pub async fn send_input(&self, session_id: &str, data: &[u8]) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("terminal session {session_id}")))?;
        session.writer.write_all(data).map_err(|e| Error::Terminal(e.to_string()))?;
        session.last_activity = Instant::now();
        self.stats.lock().await.total_input_bytes += data.len() as u64;
        Ok(())
    }

    pub async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("terminal session {session_id}")))?;
        session
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Terminal(e.to_string()))?;
        session.config.cols = cols;
        session.config.rows = rows;
        self.stats.lock().await.resize_operations += 1;
        Ok(())
    }

    pub async fn stop_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("terminal session {session_id}")))?;
        graceful_kill(session.child.as_mut()).await;
        session.state = TerminalState::Stopped;
        for task in session.tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }

    pub async fn destroy_session(&self, session_id: &str) -> Result<()> {
        self.stop_session(session_id).await.ok();
        self.sessions.lock().await.remove(session_id);
        self.stats.lock().await.sessions_destroyed += 1;
        self.emit("destroyed", serde_json::json!({"session_id": session_id})).await;
        Ok(())
    }

    pub async fn list_sessions(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Idle reaper: destroys sessions untouched for longer than
    /// `session_timeout`. Intended to be driven by a periodic background
    /// task the way `_cleanup_sessions_task` drives it in the original.
    pub async fn reap_idle(&self) {
        let stale: Vec<String> = {
            let sessions = self.sessions.lock().await;
            sessions
                .values()
                .filter(|s| s.last_activity.elapsed() > self.session_timeout)
                .map(|s| s.id.clone())
                .collect()
        };
        for id in stale {
            let _ = self.destroy_session(&id).await;
        }
    }

    pub fn start(self: &Arc<Self>) {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            loop {
                ticker.tick().await;
                service.reap_idle().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_shell_paths() {
        let config = TerminalConfig::default();
        assert_eq!(config.shell, "/bin/bash");
        assert_eq!(config.cols, 80);
        assert_eq!(config.rows, 24);
    }

    #[tokio::test]
    async fn create_session_spawns_and_destroy_removes_it() {
        let broker = MessageBroker::new(crate::broker::BrokerConfig::default());
        let service = LocalTerminalService::new(broker);
        let config = TerminalConfig {
            shell: "/bin/sh".to_string(),
            ..TerminalConfig::default()
        };
        let id = service.create_session(Some("t1".into()), config).await.unwrap();
        assert_eq!(service.list_sessions().await, vec![id.clone()]);
        service.destroy_session(&id).await.unwrap();
        assert!(service.list_sessions().await.is_empty());
        assert_eq!(service.stats.lock().await.sessions_destroyed, 1);
    }
}
