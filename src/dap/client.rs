//! DAP client for communicating with a spawned debug adapter
//!
//! A background reader task owns the adapter's stdout. Responses are routed
//! to the waiting request by `request_seq`; events go to the session's
//! [`EventSubscription`]. Requests only need `&self`, so several can be in
//! flight at once.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::common::{Error, Result};

use super::channel::{AdapterConnector, AdapterExecutable, Connection, DebugChannel, EventSubscription};
use super::codec;
use super::types::*;

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<ResponseMessage>>>>;

/// DAP client for a debug adapter speaking over stdio
pub struct DapClient {
    /// Adapter subprocess
    adapter: Mutex<Child>,
    /// Buffered writer for adapter stdin
    writer: tokio::sync::Mutex<BufWriter<ChildStdin>>,
    /// Sequence number for requests
    seq: AtomicI64,
    /// Requests waiting for their response
    pending: PendingMap,
    /// Background task reading adapter stdout
    reader_task: JoinHandle<()>,
    /// Upper bound on a single request round trip
    request_timeout: Duration,
}

impl DapClient {
    /// Spawn a new DAP adapter and create a client
    ///
    /// Returns the client together with the event subscription for this
    /// adapter process.
    pub fn spawn(
        adapter: &AdapterExecutable,
        request_timeout: Duration,
    ) -> Result<(Self, EventSubscription)> {
        let mut cmd = Command::new(&adapter.command);
        cmd.args(&adapter.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::AdapterStartFailed(format!(
                "Failed to start {}: {}",
                adapter.command.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::AdapterStartFailed("Failed to get adapter stdin".to_string()))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            Error::AdapterStartFailed("Failed to get adapter stdout".to_string())
        })?;

        tracing::info!(
            command = %adapter.command.display(),
            args = ?adapter.args,
            pid = ?child.id(),
            "Spawned debug adapter"
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::default();
        let reader_task = tokio::spawn(read_loop(
            BufReader::new(stdout),
            Arc::clone(&pending),
            event_tx,
        ));

        let client = Self {
            adapter: Mutex::new(child),
            writer: tokio::sync::Mutex::new(BufWriter::new(stdin)),
            seq: AtomicI64::new(1),
            pending,
            reader_task,
            request_timeout,
        };

        Ok((client, EventSubscription::new(event_rx)))
    }

    /// Get the next sequence number
    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn forget(&self, seq: i64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&seq);
        }
    }
}

/// Route adapter output until the stream ends
async fn read_loop(
    mut reader: BufReader<ChildStdout>,
    pending: PendingMap,
    events: mpsc::UnboundedSender<Event>,
) {
    loop {
        let json = match codec::read_message(&mut reader).await {
            Ok(json) => json,
            Err(e) => {
                tracing::info!(error = %e, "Adapter stream closed");
                break;
            }
        };
        tracing::debug!("DAP <<< {}", json);

        let msg: Value = match serde_json::from_str(&json) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding non-JSON message from adapter");
                continue;
            }
        };

        match msg.get("type").and_then(|v| v.as_str()).unwrap_or("unknown") {
            "response" => match serde_json::from_value::<ResponseMessage>(msg) {
                Ok(response) => {
                    let waiter = pending
                        .lock()
                        .ok()
                        .and_then(|mut p| p.remove(&response.request_seq));
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(response);
                        }
                        None => tracing::warn!(
                            request_seq = response.request_seq,
                            "Response for unknown request"
                        ),
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Malformed response"),
            },
            "event" => match serde_json::from_value::<EventMessage>(msg) {
                // The subscription may already be closed; that is not an error
                Ok(event_msg) => {
                    let _ = events.send(Event::from_message(&event_msg));
                }
                Err(e) => tracing::warn!(error = %e, "Malformed event"),
            },
            "request" => {
                let command = msg.get("command").and_then(|v| v.as_str()).unwrap_or("?");
                tracing::warn!(command, "Ignoring reverse request from adapter");
            }
            other => tracing::warn!("Unknown message type: {}", other),
        }
    }

    // Fail every outstanding request instead of leaving it hanging
    if let Ok(mut pending) = pending.lock() {
        pending.clear();
    }
}

#[async_trait]
impl DebugChannel for DapClient {
    async fn request(&self, command: &str, arguments: Option<Value>) -> Result<Value> {
        let seq = self.next_seq();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| Error::DapProtocol("pending request table poisoned".to_string()))?
            .insert(seq, tx);

        let json = serde_json::to_string(&RequestMessage::new(seq, command, arguments))?;
        tracing::debug!("DAP >>> {}", json);
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = codec::write_message(&mut *writer, &json).await {
                self.forget(seq);
                return Err(e);
            }
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(Error::AdapterCrashed),
            Err(_) => {
                self.forget(seq);
                return Err(Error::Timeout {
                    command: command.to_string(),
                    secs: self.request_timeout.as_secs(),
                });
            }
        };

        if response.success {
            Ok(response.body.unwrap_or(Value::Null))
        } else {
            Err(Error::dap_request_failed(
                command,
                response.message.as_deref().unwrap_or("Unknown error"),
            ))
        }
    }
}

impl Drop for DapClient {
    fn drop(&mut self) {
        self.reader_task.abort();
        // Best effort since we can't await in drop
        if let Ok(mut child) = self.adapter.lock() {
            let _ = child.start_kill();
        }
    }
}

/// Connector that spawns the adapter as a child process
pub struct SpawnConnector {
    request_timeout: Duration,
}

impl SpawnConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl AdapterConnector for SpawnConnector {
    async fn connect(&self, adapter: &AdapterExecutable) -> Result<Connection> {
        let (client, events) = DapClient::spawn(adapter, self.request_timeout)?;
        Ok(Connection {
            channel: Arc::new(client),
            events,
        })
    }
}
