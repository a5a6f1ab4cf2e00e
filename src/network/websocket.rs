//! A ready-made [`NonBlockingTransport`] speaking STOMP 1.2 over WebSocket.
//!
//! Only compiled with the `websocket` feature. The transport owns no thread
//! of its own: each `open()` spawns one task on the tokio runtime handle you
//! supply, and the synchronous trait methods talk to that task through
//! non-blocking channels. Dropping into `close()` (or losing the socket)
//! ends the task and reports the link as down, which is what the connection
//! manager's health check and reconnection path key off.

use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc as tokio_mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::network::codec;
use crate::network::stomp::{StompCommand, StompFrame, HEARTBEAT};
use crate::network::transport::{LinkStatus, NonBlockingTransport, TransportClosed};

/// Outgoing heartbeat interval, also offered to the server in the handshake.
const HEARTBEAT_MS: u64 = 4000;

/// STOMP-over-WebSocket transport backed by a tokio task.
///
/// # Examples
///
/// ```ignore
/// let handle = tokio::runtime::Handle::current();
/// let transport = WebSocketTransport::new("ws://localhost:8080/game", handle);
/// let session = SessionBuilder::new(game_id, me)
///     .with_transport(Box::new(transport))
///     .start_session()?;
/// ```
pub struct WebSocketTransport {
    url: String,
    host: String,
    runtime: tokio::runtime::Handle,
    status: Arc<Mutex<LinkStatus>>,
    /// Encoded frames handed to the link task. `None` while closed.
    outbound: Option<tokio_mpsc::UnboundedSender<String>>,
    /// Messages decoded by the link task, drained by `receive_all_messages`.
    inbound: Option<std_mpsc::Receiver<(String, serde_json::Value)>>,
    subscription_ids: HashMap<String, String>,
    next_subscription: u64,
}

impl WebSocketTransport {
    /// Creates a transport for the given WebSocket endpoint. The runtime
    /// handle is where link tasks are spawned; pass
    /// `tokio::runtime::Handle::current()` from inside your runtime.
    #[must_use]
    pub fn new(url: impl Into<String>, runtime: tokio::runtime::Handle) -> Self {
        let url = url.into();
        let host = host_of(&url);
        Self {
            url,
            host,
            runtime,
            status: Arc::new(Mutex::new(LinkStatus::Down)),
            outbound: None,
            inbound: None,
            subscription_ids: HashMap::new(),
            next_subscription: 0,
        }
    }

    fn send_frame(&self, frame: &StompFrame) -> Result<(), TransportClosed> {
        match &self.outbound {
            Some(sender) => sender.send(frame.encode()).map_err(|_| TransportClosed),
            None => Err(TransportClosed),
        }
    }
}

impl NonBlockingTransport for WebSocketTransport {
    fn open(&mut self) {
        if self.outbound.is_some() {
            // Drop the previous link first so two tasks never share a url.
            self.close();
        }
        debug!("Opening WebSocket link to {}", self.url);
        *self.status.lock() = LinkStatus::Opening;

        let (outbound_tx, outbound_rx) = tokio_mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = std_mpsc::channel();
        self.outbound = Some(outbound_tx);
        self.inbound = Some(inbound_rx);

        let url = self.url.clone();
        let host = self.host.clone();
        let status = Arc::clone(&self.status);
        self.runtime
            .spawn(run_link(url, host, status, outbound_rx, inbound_tx));
    }

    fn close(&mut self) {
        // Dropping the sender ends the link task, which sends DISCONNECT and
        // closes the socket on its way out.
        self.outbound = None;
        *self.status.lock() = LinkStatus::Down;
    }

    fn link_status(&self) -> LinkStatus {
        *self.status.lock()
    }

    fn subscribe(&mut self, destination: &str) {
        let id = format!("sub-{}", self.next_subscription);
        self.next_subscription += 1;
        self.subscription_ids
            .insert(destination.to_owned(), id.clone());
        if self.send_frame(&StompFrame::subscribe(&id, destination)).is_err() {
            trace!("subscribe({destination}) dropped: link closed");
        }
    }

    fn unsubscribe(&mut self, destination: &str) {
        if let Some(id) = self.subscription_ids.remove(destination) {
            if self.send_frame(&StompFrame::unsubscribe(&id)).is_err() {
                trace!("unsubscribe({destination}) dropped: link closed");
            }
        }
    }

    fn publish(
        &mut self,
        destination: &str,
        payload: &serde_json::Value,
    ) -> Result<(), TransportClosed> {
        if self.link_status() != LinkStatus::Up {
            return Err(TransportClosed);
        }
        self.send_frame(&StompFrame::send_json(destination, payload))
    }

    fn receive_all_messages(&mut self) -> Vec<(String, serde_json::Value)> {
        let mut received = Vec::new();
        if let Some(inbound) = &self.inbound {
            while let Ok(message) = inbound.try_recv() {
                received.push(message);
            }
        }
        received
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// The link task: WebSocket connect, STOMP handshake, then pump frames both
/// ways until the socket dies or the transport closes.
async fn run_link(
    url: String,
    host: String,
    status: Arc<Mutex<LinkStatus>>,
    mut outbound: tokio_mpsc::UnboundedReceiver<String>,
    inbound: std_mpsc::Sender<(String, serde_json::Value)>,
) {
    let mut socket = match connect_async(url.as_str()).await {
        Ok((socket, _response)) => socket,
        Err(e) => {
            warn!("WebSocket connect to {url} failed: {e}");
            *status.lock() = LinkStatus::Down;
            return;
        }
    };

    let connect_frame = StompFrame::connect(&host, HEARTBEAT_MS).encode();
    if socket.send(WsMessage::Text(connect_frame.into())).await.is_err() {
        *status.lock() = LinkStatus::Down;
        return;
    }

    let mut heartbeat = tokio::time::interval(Duration::from_millis(HEARTBEAT_MS));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(text) => {
                    if socket.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    // Transport closed: say goodbye and take the link down.
                    let _ = socket
                        .send(WsMessage::Text(StompFrame::disconnect().encode().into()))
                        .await;
                    let _ = socket.close(None).await;
                    break;
                }
            },
            incoming = socket.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_frame(text.as_str(), &status, &inbound);
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Binary(_) | WsMessage::Frame(_))) => {}
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("WebSocket link error: {e}");
                    break;
                }
            },
            _ = heartbeat.tick() => {
                if socket.send(WsMessage::Text(HEARTBEAT.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    *status.lock() = LinkStatus::Down;
    debug!("WebSocket link to {url} ended");
}

fn handle_frame(
    raw: &str,
    status: &Arc<Mutex<LinkStatus>>,
    inbound: &std_mpsc::Sender<(String, serde_json::Value)>,
) {
    let frame = match StompFrame::parse(raw) {
        Ok(Some(frame)) => frame,
        Ok(None) => return, // heartbeat
        Err(e) => {
            warn!("Dropping unparseable STOMP frame: {e}");
            return;
        }
    };
    match frame.command {
        StompCommand::Connected => {
            debug!("STOMP session established");
            *status.lock() = LinkStatus::Up;
        }
        StompCommand::Message => {
            let Some(destination) = frame.header_value("destination") else {
                warn!("Dropping MESSAGE frame without destination");
                return;
            };
            match codec::decode_str(&frame.body) {
                Ok(value) => {
                    let _ = inbound.send((destination.to_owned(), value));
                }
                Err(e) => warn!("Dropping message with malformed body: {e}"),
            }
        }
        StompCommand::Error => {
            warn!(
                "Server ERROR frame: {}",
                frame.header_value("message").unwrap_or("(no message)")
            );
        }
        other => trace!("Ignoring {other} frame"),
    }
}

/// Best-effort host extraction for the STOMP `host` header.
fn host_of(url: &str) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = without_scheme
        .split(['/', '?'])
        .next()
        .unwrap_or(without_scheme);
    authority
        .split(':')
        .next()
        .unwrap_or(authority)
        .to_owned()
}
