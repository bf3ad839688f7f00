// SPDX-License-Identifier: MIT

//! The launcher channel: owns the transport, frames messages, dispatches
//! parsed requests, and serializes responses.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lp_wire::{encode, parse_request, ErrorCode, MessageCodec, Request, RequestError, Response};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Installed once by the plugin runtime; invoked for every parsed request.
/// Handlers spawn their own tasks for anything that blocks.
pub type RequestHandler = Arc<dyn Fn(Request) + Send + Sync>;

/// Cloneable handle for sending responses.
///
/// Assigns the process-monotonic `responseId` at enqueue time so ids are
/// strictly increasing in write order. Heartbeats and errors reuse id 0.
#[derive(Clone)]
pub struct ResponseSender {
    tx: mpsc::UnboundedSender<(u64, Response)>,
    next_id: Arc<AtomicU64>,
}

impl ResponseSender {
    pub fn send(&self, response: Response) {
        let response_id = if response.uses_zero_response_id() {
            0
        } else {
            self.next_id.fetch_add(1, Ordering::Relaxed)
        };
        if self.tx.send((response_id, response)).is_err() {
            debug!("response dropped: launcher channel is closed");
        }
    }

    /// A sender whose queue is observable, for tests that assert on
    /// responses without a live transport.
    #[cfg(test)]
    pub(crate) fn capture() -> (Self, mpsc::UnboundedReceiver<(u64, Response)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, next_id: Arc::new(AtomicU64::new(1)) }, rx)
    }
}

/// The channel before it is started.
pub struct LauncherChannel {
    sender: ResponseSender,
    rx: mpsc::UnboundedReceiver<(u64, Response)>,
    max_message_size: usize,
}

/// A running channel. `stop` drains pending writes, then closes.
pub struct ChannelHandle {
    sender: ResponseSender,
    shutdown: CancellationToken,
    writer_stop: CancellationToken,
    closed: CancellationToken,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl LauncherChannel {
    pub fn new(max_message_size: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = ResponseSender { tx, next_id: Arc::new(AtomicU64::new(1)) };
        Self { sender, rx, max_message_size }
    }

    pub fn sender(&self) -> ResponseSender {
        self.sender.clone()
    }

    /// Start the reader and writer tasks over the given transport.
    pub fn start<R, W>(self, reader: R, writer: W, handler: RequestHandler) -> ChannelHandle
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shutdown = CancellationToken::new();
        let writer_stop = CancellationToken::new();
        let closed = CancellationToken::new();

        let reader_task = tokio::spawn(read_loop(
            reader,
            self.max_message_size,
            handler,
            self.sender.clone(),
            shutdown.clone(),
            closed.clone(),
        ));
        let writer_task = tokio::spawn(write_loop(writer, self.rx, writer_stop.clone()));

        ChannelHandle { sender: self.sender, shutdown, writer_stop, closed, reader_task, writer_task }
    }
}

impl ChannelHandle {
    pub fn sender(&self) -> ResponseSender {
        self.sender.clone()
    }

    /// Fires when the transport is gone: launcher EOF, a framing error, or
    /// a write failure.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Stop reading, drain pending writes, and close the transport.
    pub async fn stop(self) {
        self.shutdown.cancel();
        self.writer_stop.cancel();
        let _ = self.reader_task.await;
        let _ = self.writer_task.await;
    }
}

async fn read_loop<R>(
    mut reader: R,
    max_message_size: usize,
    handler: RequestHandler,
    sender: ResponseSender,
    shutdown: CancellationToken,
    closed: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut codec = MessageCodec::new(max_message_size);
    let mut buf = vec![0u8; 8192];

    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                debug!("launcher closed the channel");
                closed.cancel();
                break;
            }
            Ok(n) => match codec.feed(&buf[..n]) {
                Ok(messages) => {
                    for message in messages {
                        handle_message(&message, &handler, &sender);
                    }
                }
                Err(e) => {
                    // Framing errors are fatal for the channel.
                    error!(error = %e, "launcher channel framing error");
                    closed.cancel();
                    break;
                }
            },
            Err(e) => {
                error!(error = %e, "launcher channel read error");
                closed.cancel();
                break;
            }
        }
    }
}

fn handle_message(message: &str, handler: &RequestHandler, sender: &ResponseSender) {
    debug!(message = %redact_payload(message), "received message from launcher");

    match parse_request(message) {
        Ok(request) => handler(request),
        Err(e @ RequestError::Unsupported { .. }) => {
            warn!(error = %e, "unsupported launcher request");
            sender.send(Response::error(
                e.request_id(),
                ErrorCode::RequestNotSupported,
                "Request not supported",
            ));
        }
        Err(e) => {
            // Parse errors answer with an error response carrying the
            // offending payload; they never terminate the channel.
            warn!(error = %e, "invalid launcher request");
            sender.send(Response::error(
                e.request_id(),
                ErrorCode::InvalidRequest,
                format!("{e}; request: {message}"),
            ));
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<(u64, Response)>,
    stop: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            item = rx.recv() => item,
            _ = stop.cancelled() => {
                // Drain whatever is already queued, then close.
                while let Ok(item) = rx.try_recv() {
                    if write_one(&mut writer, item).await.is_err() {
                        break;
                    }
                }
                break;
            }
        };

        match next {
            Some(item) => {
                if write_one(&mut writer, item).await.is_err() {
                    break;
                }
            }
            None => break,
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_one<W>(writer: &mut W, (response_id, response): (u64, Response)) -> Result<(), ()>
where
    W: AsyncWrite + Unpin,
{
    let payload = response.to_json(response_id).to_string();
    debug!(message = %redact_payload(&payload), "sending message to launcher");

    if let Err(e) = writer.write_all(&encode(&payload)).await {
        error!(error = %e, "launcher channel write error");
        return Err(());
    }
    if let Err(e) = writer.flush().await {
        error!(error = %e, "launcher channel flush error");
        return Err(());
    }
    Ok(())
}

const SENSITIVE_FIELDS: [&str; 3] = ["password", "encryptedPassword", "initializationVector"];

/// Redact sensitive fields from a JSON payload before it reaches a log line.
fn redact_payload(payload: &str) -> String {
    match serde_json::from_str::<Value>(payload) {
        Ok(mut value) => {
            redact_value(&mut value);
            value.to_string()
        }
        Err(_) => payload.to_string(),
    }
}

fn redact_value(value: &mut Value) {
    match value {
        Value::Object(obj) => {
            // Name/value config entries hide the secret under "value".
            let named_secret = obj
                .get("name")
                .and_then(Value::as_str)
                .is_some_and(|name| SENSITIVE_FIELDS.contains(&name));
            for (key, entry) in obj.iter_mut() {
                if SENSITIVE_FIELDS.contains(&key.as_str()) || (named_secret && key == "value") {
                    *entry = Value::String("<redacted>".to_string());
                } else {
                    redact_value(entry);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                redact_value(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
