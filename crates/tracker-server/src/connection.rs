//! One viewer socket: its outbound mailbox and the two pumps that move frames
//! between the socket and the hub.
//!
//! The mailbox is the only link between the hub and the writer pump. Closing
//! it (done exactly once, by the hub, under its registry lock) lets the writer
//! flush what is already queued, send a close frame and exit.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use tracker_core::{ConnectionId, Message};

use crate::hub::Hub;

/// How long the writer may keep flushing after the reader has stopped.
pub const WRITER_GRACE: Duration = Duration::from_secs(5);

/// Why a non-blocking delivery was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("mailbox full")]
    Full,
    #[error("mailbox closed")]
    Closed,
}

/// A registered viewer, as the hub sees it.
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<Message>>,
    closed: CancellationToken,
    close_once: AtomicBool,
    connected_at: Instant,
}

/// Reading half of a connection's mailbox, owned by the writer pump.
pub struct MailboxReceiver {
    rx: mpsc::Receiver<Arc<Message>>,
    closed: CancellationToken,
}

impl Connection {
    /// Create a connection with a bounded mailbox of `capacity` messages.
    pub fn new(id: ConnectionId, capacity: usize) -> (Arc<Self>, MailboxReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();
        let conn = Arc::new(Self {
            id,
            tx,
            closed: closed.clone(),
            close_once: AtomicBool::new(false),
            connected_at: Instant::now(),
        });
        (conn, MailboxReceiver { rx, closed })
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Enqueue without waiting.
    pub fn try_deliver(&self, message: Arc<Message>) -> Result<(), DeliveryError> {
        if self.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Close the mailbox. Returns `true` only for the call that closed it.
    pub(crate) fn close(&self) -> bool {
        if self.close_once.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.closed.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Time since the connection was created.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MailboxReceiver {
    /// Next queued message.
    ///
    /// After the mailbox is closed this keeps yielding whatever was queued
    /// before the close, then `None`.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        if self.closed.is_cancelled() {
            return self.rx.try_recv().ok();
        }
        tokio::select! {
            biased;
            msg = self.rx.recv() => msg,
            () = self.closed.cancelled() => self.rx.try_recv().ok(),
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Arc<Message>> {
        self.rx.try_recv().ok()
    }
}

/// How the inbound pump ended.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Peer sent a close frame.
    ClosedByPeer,
    /// Stream finished without a close frame.
    StreamEnded,
    /// Transport error while reading.
    Transport(String),
    /// Frame could not be decoded.
    Malformed(String),
    /// Frame exceeded the inbound size limit.
    Oversized(usize),
    /// A pong could not be queued.
    MailboxUnavailable(DeliveryError),
}

/// How the outbound pump ended.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Mailbox closed and drained; close frame sent.
    Drained,
    /// Writing to the socket failed.
    WriteFailed(String),
}

/// Inbound pump: read frames until the peer goes away or misbehaves.
///
/// Only `ping` frames get an answer (a `pong` queued on this connection's own
/// mailbox). Transport-level ping/pong frames are left to the socket layer.
pub async fn read_pump<S, E>(mut stream: S, conn: &Connection, max_frame_bytes: usize) -> ReadOutcome
where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => return ReadOutcome::Transport(e.to_string()),
        };

        let decoded = match &frame {
            WsMessage::Text(text) => decode_frame(text.as_str(), max_frame_bytes),
            WsMessage::Binary(data) => match std::str::from_utf8(data) {
                Ok(text) => decode_frame(text, max_frame_bytes),
                Err(_) => Err(ReadOutcome::Malformed("binary frame is not UTF-8".into())),
            },
            WsMessage::Close(_) => return ReadOutcome::ClosedByPeer,
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
        };

        match decoded {
            Ok(Some(Message::Ping { event_id })) => {
                let pong = Arc::new(Message::Pong { event_id });
                if let Err(e) = conn.try_deliver(pong) {
                    return ReadOutcome::MailboxUnavailable(e);
                }
            }
            Ok(Some(other)) => {
                debug!(connection_id = %conn.id(), kind = other.kind().as_str(), "ignoring inbound frame");
            }
            Ok(None) => {
                debug!(connection_id = %conn.id(), "ignoring unrecognised inbound frame");
            }
            Err(outcome) => return outcome,
        }
    }
    ReadOutcome::StreamEnded
}

/// `Ok(None)` for a well-formed object the hub does not understand.
fn decode_frame(text: &str, max_frame_bytes: usize) -> Result<Option<Message>, ReadOutcome> {
    if text.len() > max_frame_bytes {
        return Err(ReadOutcome::Oversized(text.len()));
    }
    Message::decode_inbound(text).map_err(|e| ReadOutcome::Malformed(e.to_string()))
}

/// Outbound pump: drain the mailbox onto the socket, one JSON text frame per
/// message, until the mailbox is closed or a write fails.
pub async fn write_pump<S>(mut sink: S, mut mailbox: MailboxReceiver) -> WriteOutcome
where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    while let Some(message) = mailbox.recv().await {
        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(kind = message.kind().as_str(), error = %e, "failed to encode outbound frame");
                continue;
            }
        };
        if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
            return WriteOutcome::WriteFailed(e.to_string());
        }
    }
    let _ = sink.send(WsMessage::Close(None)).await;
    WriteOutcome::Drained
}

/// Run both pumps for an upgraded socket until either one ends, then evict
/// the connection and give the writer a bounded window to flush.
#[instrument(skip_all, fields(connection_id = %conn.id()))]
pub async fn serve_connection(
    socket: WebSocket,
    conn: Arc<Connection>,
    mailbox: MailboxReceiver,
    hub: Arc<Hub>,
    max_frame_bytes: usize,
) {
    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_pump(sink, mailbox));

    let writer_finished = tokio::select! {
        outcome = read_pump(stream, &conn, max_frame_bytes) => {
            match &outcome {
                ReadOutcome::ClosedByPeer | ReadOutcome::StreamEnded => {
                    info!("viewer disconnected");
                }
                other => warn!(outcome = ?other, "closing viewer connection"),
            }
            false
        }
        result = &mut writer => {
            match result {
                Ok(WriteOutcome::Drained) => debug!("mailbox closed, writer done"),
                Ok(WriteOutcome::WriteFailed(e)) => warn!(error = %e, "write to viewer failed"),
                Err(e) => warn!(error = %e, "writer task failed"),
            }
            true
        }
    };

    let _ = hub.evict(conn.id());

    if !writer_finished && tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        warn!(grace_secs = WRITER_GRACE.as_secs(), "writer did not finish, aborting");
        writer.abort();
    }
    debug!(age_ms = conn.age().as_millis() as u64, "connection finished");
}
