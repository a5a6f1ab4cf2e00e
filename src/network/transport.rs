//! The transport abstraction underneath the connection manager.
//!
//! However you wish to reach the server, implement [`NonBlockingTransport`]
//! and hand it to the [`SessionBuilder`]. Messages are JSON values addressed
//! by hierarchical string destinations; delivery is best-effort and the
//! session's own protocol on top handles loss, duplication, and reconnects.
//!
//! [`SessionBuilder`]: crate::SessionBuilder

use std::error::Error;
use std::fmt;

/// The raw link state reported by a transport.
///
/// This is deliberately coarser than [`ConnectionState`]: the transport only
/// knows whether its link is alive, while the connection manager layers
/// retries, health checks, and the terminal failure state on top.
///
/// [`ConnectionState`]: crate::ConnectionState
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    /// No link. Either never opened, or the last open attempt failed, or the
    /// link died.
    Down,
    /// A link is being established (handshake in flight).
    Opening,
    /// The link is established and messages flow.
    Up,
}

/// Error returned by [`NonBlockingTransport::publish`] when the link rejected
/// or dropped the message. The connection manager treats this as a dead link.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct TransportClosed;

impl fmt::Display for TransportClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "the transport link is not open")
    }
}

impl Error for TransportClosed {}

/// A non-blocking publish/subscribe transport.
///
/// All methods must return without blocking on network I/O; connection
/// establishment happens in the background and is observed through
/// [`link_status`]. The connection manager re-issues every subscription after
/// each successful (re)connect, so implementations do not need to remember
/// subscriptions across link losses.
///
/// [`link_status`]: NonBlockingTransport::link_status
pub trait NonBlockingTransport: Send {
    /// Begins establishing the link. Safe to call again after the link died.
    fn open(&mut self);

    /// Tears the link down. Queued inbound messages may still be drained.
    fn close(&mut self);

    /// Reports the current raw link state.
    fn link_status(&self) -> LinkStatus;

    /// Registers interest in a destination. Only meaningful while the link is
    /// up; the connection manager re-subscribes after every reconnect.
    fn subscribe(&mut self, destination: &str);

    /// Withdraws interest in a destination.
    fn unsubscribe(&mut self, destination: &str);

    /// Sends a JSON payload to the given destination.
    fn publish(
        &mut self,
        destination: &str,
        payload: &serde_json::Value,
    ) -> Result<(), TransportClosed>;

    /// Returns all messages received since the last time this method was
    /// called, as `(destination, payload)` pairs, in arrival order.
    fn receive_all_messages(&mut self) -> Vec<(String, serde_json::Value)>;
}
