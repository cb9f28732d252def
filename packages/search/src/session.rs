//! WebSocket session lifecycle: deadlines, keep-alive, and the per-query
//! state machine.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use searchlight_core::error::{SearchError, SearchResult};

use crate::events::{EventType, InboundFrame, SearchEvent};
use crate::pipeline::{EventSink, SearchPipeline};

/// Idle sessions are dropped when nothing arrives for this long; every
/// received frame (pongs included) restarts the clock.
const READ_DEADLINE: Duration = Duration::from_secs(600);

/// Per-send deadline; a peer that cannot drain frames this long is gone.
const WRITE_DEADLINE: Duration = Duration::from_secs(60);

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// Outer bound on one query's pipeline run.
const QUERY_TIMEOUT: Duration = Duration::from_secs(300);

/// Serialised write half of a duplex connection plus the session flags.
///
/// Generic over the sink so tests can observe sent frames without a socket.
pub struct Session<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: std::fmt::Display,
{
    sender: Mutex<S>,
    closed: AtomicBool,
    processing: AtomicBool,
}

/// The production session over a real WebSocket.
pub type WsSession = Session<SplitSink<WebSocket, Message>>;

impl<S> Session<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: std::fmt::Display,
{
    pub fn new(sender: S) -> Self {
        Self {
            sender: Mutex::new(sender),
            closed: AtomicBool::new(false),
            processing: AtomicBool::new(false),
        }
    }

    pub fn is_session_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn set_processing(&self, value: bool) {
        self.processing.store(value, Ordering::SeqCst);
    }

    /// Send one frame under the write deadline. Any failure marks the
    /// session closed; there is no way back from a broken transport.
    pub async fn send_frame(&self, message: Message) -> SearchResult<()> {
        if self.is_session_closed() {
            return Err(SearchError::Protocol("connection closed".to_string()));
        }

        let mut sender = self.sender.lock().await;
        match tokio::time::timeout(WRITE_DEADLINE, sender.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.closed.store(true, Ordering::SeqCst);
                Err(SearchError::Protocol(format!("write failed: {e}")))
            }
            Err(_) => {
                self.closed.store(true, Ordering::SeqCst);
                Err(SearchError::Timeout("write deadline exceeded".to_string()))
            }
        }
    }

    pub async fn send_event(&self, event: &SearchEvent) -> SearchResult<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| SearchError::Protocol(format!("serialize failed: {e}")))?;
        self.send_frame(Message::Text(payload.into())).await
    }

    /// Close handshake: a normal-closure frame, then mark the session dead.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut sender = self.sender.lock().await;
        let frame = Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        }));
        if let Err(e) = sender.send(frame).await {
            tracing::debug!(error = %e, "close frame not delivered");
        }
        tracing::info!("session closed");
    }
}

#[async_trait]
impl<S> EventSink for Session<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: std::fmt::Display,
{
    async fn send(&self, event: SearchEvent) -> SearchResult<()> {
        self.send_event(&event).await
    }

    fn is_closed(&self) -> bool {
        self.is_session_closed()
    }
}

/// Drive one accepted WebSocket until the peer leaves or goes quiet.
pub async fn handle_socket(socket: WebSocket, pipeline: Arc<SearchPipeline>) {
    let (sender, receiver) = socket.split();
    let session = Arc::new(Session::new(sender));
    let token = CancellationToken::new();

    let keep_alive = tokio::spawn(keep_alive_loop(Arc::clone(&session), token.clone()));

    read_loop(&session, receiver, &pipeline, &token).await;

    token.cancel();
    let _ = keep_alive.await;
    session.close().await;
}

async fn read_loop(
    session: &Arc<WsSession>,
    mut receiver: SplitStream<WebSocket>,
    pipeline: &SearchPipeline,
    token: &CancellationToken,
) {
    loop {
        let frame = match tokio::time::timeout(READ_DEADLINE, receiver.next()).await {
            Err(_) => {
                tracing::info!("read deadline expired, dropping session");
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(e))) => {
                tracing::info!(error = %e, "websocket read ended");
                return;
            }
            Ok(Some(Ok(message))) => message,
        };

        match frame {
            Message::Text(text) => {
                let inbound: InboundFrame = match serde_json::from_str(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed inbound frame");
                        let _ = session
                            .send_event(&SearchEvent::new(
                                EventType::Error,
                                "Invalid message format",
                                0,
                            ))
                            .await;
                        continue;
                    }
                };

                if !handle_frame(session, pipeline, token, inbound).await {
                    return;
                }
            }
            // the transport pongs pings for us; both directions just prove
            // liveness and restart the read deadline
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                tracing::info!("peer closed the session");
                return;
            }
            Message::Binary(_) => continue,
        }
    }
}

/// Returns false when the session should end.
async fn handle_frame<S>(
    session: &Arc<Session<S>>,
    pipeline: &SearchPipeline,
    token: &CancellationToken,
    inbound: InboundFrame,
) -> bool
where
    S: Sink<Message> + Unpin + Send,
    S::Error: std::fmt::Display,
{
    if inbound.is_ping() {
        return session
            .send_event(&SearchEvent::new(EventType::KeepAlive, "pong", 0))
            .await
            .is_ok();
    }

    if inbound.query.is_empty() {
        return session
            .send_event(&SearchEvent::new(EventType::Error, "Query cannot be empty", 0))
            .await
            .is_ok();
    }

    tracing::info!(query = %inbound.query, "search query received");
    session.set_processing(true);
    let outcome =
        tokio::time::timeout(QUERY_TIMEOUT, pipeline.run(session.as_ref(), &inbound.query, token))
            .await;
    session.set_processing(false);

    match outcome {
        Ok(Ok(())) => {
            tracing::info!(query = %inbound.query, "search completed, ready for next query");
        }
        Ok(Err(SearchError::Cancelled)) => {
            tracing::info!("search cancelled");
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "search failed");
            let _ = session
                .send_event(&SearchEvent::new(EventType::Error, format!("Error: {e}"), 0))
                .await;
        }
        Err(_) => {
            tracing::warn!("query exceeded its deadline");
            let _ = session
                .send_event(&SearchEvent::new(EventType::Error, "Search timed out", 0))
                .await;
        }
    }

    !session.is_session_closed()
}

/// Ping every 25 s while the session is idle; a failed ping ends the loop
/// because `send_frame` marks the session closed.
async fn keep_alive_loop<S>(session: Arc<Session<S>>, token: CancellationToken)
where
    S: Sink<Message> + Unpin + Send,
    S::Error: std::fmt::Display,
{
    let mut ticker = tokio::time::interval(KEEP_ALIVE_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                if session.is_session_closed() {
                    return;
                }
                if session.is_processing() {
                    continue;
                }

                let ping = Message::Ping(Bytes::from_static(b"keepalive"));
                if let Err(e) = session.send_frame(ping).await {
                    tracing::info!(error = %e, "keep-alive ping failed");
                    return;
                }
            }
        }
    }
}
