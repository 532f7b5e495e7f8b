//! Stdio transport for a single MCP server process.
//!
//! Spawns the child with piped stdio and runs three background tasks: a
//! writer draining an outgoing-line channel (acking each flush), a reader
//! classifying stdout lines and feeding a bounded frame queue, and a
//! stderr drain. Requests are strictly one at a time: the frame-queue
//! receiver sits behind a mutex held for the whole round-trip, so
//! responses correlate by send order with monotonically increasing ids.

use crate::error::McpError;
use crate::jsonrpc::{self, Frame, Notification, Request, Response};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Consecutive undecodable stdout lines tolerated before the transport is
/// declared dead. Startup banners fit comfortably; a server that only ever
/// prints garbage does not.
pub const NOISE_LINE_BUDGET: u32 = 5;

/// Parsed frames buffered between the reader task and the caller.
const FRAME_QUEUE_DEPTH: usize = 32;

/// Grace period for the child to exit after stdin closes.
const GRACEFUL_EXIT: Duration = Duration::from_secs(5);

/// Events surfaced by the reader task.
#[derive(Debug)]
enum ReaderEvent {
    /// A correlatable JSON-RPC response.
    Message(Response),
    /// Child closed stdout (or the pipe broke).
    Eof,
    /// The consecutive-noise budget was exhausted.
    NoiseOverflow,
}

/// An outgoing line plus an ack fired once it has been flushed to the
/// child's stdin.
struct Outgoing {
    line: String,
    flushed: oneshot::Sender<()>,
}

/// Async stdio transport for one MCP server process.
pub struct StdioTransport {
    server: String,
    next_id: AtomicU64,
    write_tx: mpsc::Sender<Outgoing>,
    frames: Mutex<mpsc::Receiver<ReaderEvent>>,
    child: Arc<Mutex<Child>>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    stderr_handle: JoinHandle<()>,
    timeout: Duration,
}

impl StdioTransport {
    /// Spawn the server process and start the background I/O tasks.
    pub fn spawn(
        server: &str,
        argv: &[String],
        env: &HashMap<String, String>,
        workdir: &Path,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(McpError::Protocol(format!(
                "Server '{server}' has an empty command"
            )));
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(env)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: server.to_string(),
            source: e,
        })?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        // Writer task: drains the channel, writes newline-delimited lines,
        // acks each flush. A write error ends the task without acking, so
        // the sender sees the failure.
        let (write_tx, mut write_rx) = mpsc::channel::<Outgoing>(64);
        let writer_server = server.to_string();
        let writer_handle = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(out) = write_rx.recv().await {
                if stdin.write_all(out.line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
                let _ = out.flushed.send(());
            }
            tracing::debug!("Writer for '{writer_server}' stopped");
        });

        // Reader task: classifies each stdout line, skipping banners and
        // other noise up to the consecutive-line budget.
        let (frame_tx, frame_rx) = mpsc::channel::<ReaderEvent>(FRAME_QUEUE_DEPTH);
        let reader_server = server.to_string();
        let reader_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut noise_streak: u32 = 0;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match jsonrpc::decode_line(&line) {
                        Frame::Empty => {}
                        Frame::Noise => {
                            noise_streak += 1;
                            tracing::debug!(
                                "Skipping non-protocol output from '{reader_server}': {line}"
                            );
                            if noise_streak >= NOISE_LINE_BUDGET {
                                tracing::warn!(
                                    "Server '{reader_server}' wrote {noise_streak} consecutive non-protocol lines"
                                );
                                let _ = frame_tx.send(ReaderEvent::NoiseOverflow).await;
                                return;
                            }
                        }
                        Frame::Notice(method) => {
                            noise_streak = 0;
                            tracing::debug!(
                                "Ignoring server-initiated '{method}' from '{reader_server}'"
                            );
                        }
                        Frame::Message(resp) => {
                            noise_streak = 0;
                            if frame_tx.send(ReaderEvent::Message(resp)).await.is_err() {
                                return;
                            }
                        }
                    },
                    Ok(None) => {
                        let _ = frame_tx.send(ReaderEvent::Eof).await;
                        return;
                    }
                    Err(e) => {
                        tracing::debug!("Read from '{reader_server}' failed: {e}");
                        let _ = frame_tx.send(ReaderEvent::Eof).await;
                        return;
                    }
                }
            }
        });

        // Stderr drain: servers log freely here; keep it out of the
        // protocol stream but visible at debug level.
        let stderr_server = server.to_string();
        let stderr_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    tracing::debug!("[{stderr_server} stderr] {line}");
                }
            }
        });

        Ok(Self {
            server: server.to_string(),
            next_id: AtomicU64::new(1),
            write_tx,
            frames: Mutex::new(frame_rx),
            child: Arc::new(Mutex::new(child)),
            reader_handle,
            writer_handle,
            stderr_handle,
            timeout,
        })
    }

    /// Send one request and wait for its correlated response, bounded by
    /// the transport's overall timeout. Holding the frame-queue lock for
    /// the whole round-trip keeps requests strictly serialized.
    pub async fn request(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<Response, McpError> {
        let mut frames = self.frames.lock().await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&Request::new(id, method, params))?;
        self.send_line(line).await?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let event = match tokio::time::timeout_at(deadline, frames.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    return Err(McpError::Timeout {
                        operation: method.to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    });
                }
            };
            match event {
                Some(ReaderEvent::Message(resp)) => match resp.id {
                    Some(rid) if rid == id => return Ok(resp),
                    Some(rid) if rid < id => {
                        // Answer to an earlier request that already timed out.
                        tracing::debug!("Discarding stale response {rid} from '{}'", self.server);
                    }
                    other => {
                        tracing::debug!(
                            "Ignoring uncorrelated response {other:?} from '{}'",
                            self.server
                        );
                    }
                },
                Some(ReaderEvent::Eof) => return Err(self.dead("stdout closed")),
                Some(ReaderEvent::NoiseOverflow) => {
                    return Err(self.dead("too much non-protocol output"));
                }
                None => return Err(self.dead("reader task stopped")),
            }
        }
    }

    /// Send a notification. Resolves once the line is flushed to the
    /// child's stdin; that ack is what gates discovery after
    /// `notifications/initialized`.
    pub async fn notify(
        &self,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let line = serde_json::to_string(&Notification::new(method, params))?;
        self.send_line(line).await
    }

    async fn send_line(&self, line: String) -> Result<(), McpError> {
        let (flushed, ack) = oneshot::channel();
        self.write_tx
            .send(Outgoing { line, flushed })
            .await
            .map_err(|_| self.dead("writer task stopped"))?;
        ack.await.map_err(|_| self.dead("stdin write failed"))
    }

    fn dead(&self, reason: &str) -> McpError {
        McpError::Transport {
            server: self.server.clone(),
            reason: reason.to_string(),
        }
    }

    /// Abruptly terminate the child and the I/O tasks. For transports
    /// already known to be dead.
    pub async fn kill(&self) {
        self.writer_handle.abort();
        self.reader_handle.abort();
        self.stderr_handle.abort();
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }

    /// Close stdin, give the child a grace period to exit, then kill it.
    pub async fn shutdown(&self) {
        // Aborting the writer drops the child's stdin handle, signalling EOF.
        self.writer_handle.abort();

        let graceful = tokio::time::timeout(GRACEFUL_EXIT, async {
            let mut child = self.child.lock().await;
            let _ = child.wait().await;
        })
        .await;

        if graceful.is_err() {
            let mut child = self.child.lock().await;
            let _ = child.kill().await;
        }

        self.reader_handle.abort();
        self.stderr_handle.abort();
    }
}
