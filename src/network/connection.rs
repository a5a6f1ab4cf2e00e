//! Connection manager: the lifecycle of one persistent transport link.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──link up──► Connected
//!                                  │                      │
//!                                  │            transport close, publish
//!                                  │            failure, or dead health
//!                                  │            check
//!                                  │                      ▼
//!                                  └──attempts──── Reconnecting ──link up──► Connected
//!                                     exhausted          │
//!                                          ▼             │ attempts exhausted
//!                                        Failed ◄────────┘
//! ```
//!
//! Reconnection is bounded: after `max_attempts` consecutive failed attempts
//! the manager parks in `Failed` and issues no further automatic attempts
//! until the owner re-initializes it. A periodic health check catches silent
//! link deaths where no close event fired. The retry counter resets to zero
//! on every successful transition to `Connected`.

use std::collections::vec_deque::Drain;
use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, trace};
use web_time::Instant;

use crate::error::SyncError;
use crate::network::transport::{LinkStatus, NonBlockingTransport};
use crate::sessions::config::ReconnectConfig;

/// The connection's lifecycle state. Exactly one instance per session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No link and no attempt in progress.
    Disconnected,
    /// The initial connection attempt is in progress.
    Connecting,
    /// The link is up and all subscriptions are live.
    Connected,
    /// The link was lost; bounded automatic reconnection is in progress.
    Reconnecting,
    /// The retry cap was exhausted. Terminal until re-initialized.
    Failed,
}

impl ConnectionState {
    /// Returns the state's name, for diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Failed => "Failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Internal notifications from the manager to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LinkEvent {
    /// The link came up and subscriptions were re-established.
    Up {
        /// `true` when this followed a reconnection.
        resumed: bool,
    },
    /// A connection attempt started.
    Attempting {
        /// The attempt number, starting at 1.
        attempt: u32,
        /// The configured cap.
        max_attempts: u32,
    },
    /// The link was detected dead while Connected.
    Interrupted,
    /// The retry cap was exhausted.
    Exhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// Owns the transport link: connect, disconnect, health check, bounded
/// automatic reconnection, and the standing subscription set that is
/// re-applied after every reconnect.
pub(crate) struct ConnectionManager {
    transport: Box<dyn NonBlockingTransport>,
    state: ConnectionState,
    config: ReconnectConfig,
    /// Destinations re-subscribed on every successful (re)connect.
    subscriptions: Vec<String>,

    /// Consecutive attempts in the current (re)connection cycle.
    attempts: u32,
    /// Deadline for the open() currently in flight.
    attempt_deadline: Option<Instant>,
    /// When the next attempt may start (backoff between attempts).
    next_attempt_at: Option<Instant>,
    last_health_check: Instant,
    ever_connected: bool,

    event_queue: VecDeque<LinkEvent>,
}

impl ConnectionManager {
    pub(crate) fn new(
        transport: Box<dyn NonBlockingTransport>,
        config: ReconnectConfig,
        subscriptions: Vec<String>,
    ) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            config,
            subscriptions,
            attempts: 0,
            attempt_deadline: None,
            next_attempt_at: None,
            last_health_check: Instant::now(),
            ever_connected: false,
            event_queue: VecDeque::new(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub(crate) fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Starts connecting. Only meaningful from `Disconnected` or `Failed`;
    /// re-initializing from `Failed` resets the retry counter.
    pub(crate) fn connect(&mut self) {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Failed => {
                self.state = ConnectionState::Connecting;
                self.attempts = 0;
                self.start_attempt();
            }
            _ => trace!("connect() ignored in state {}", self.state),
        }
    }

    /// Tears the link down and stops all reconnection timers.
    pub(crate) fn disconnect(&mut self) {
        self.transport.close();
        self.state = ConnectionState::Disconnected;
        self.attempt_deadline = None;
        self.next_attempt_at = None;
    }

    /// Drains everything the transport received since the last call.
    pub(crate) fn receive_all_messages(&mut self) -> Vec<(String, serde_json::Value)> {
        self.transport.receive_all_messages()
    }

    /// Publishes a payload, or reports why it could not.
    ///
    /// A transport-level failure marks the connection suspect: the state
    /// drops out of `Connected` and the reconnection path starts, so the
    /// health-check machinery does not have to wait for its next tick.
    pub(crate) fn publish(
        &mut self,
        destination: &str,
        payload: &serde_json::Value,
    ) -> Result<(), SyncError> {
        if self.state != ConnectionState::Connected {
            return Err(SyncError::InvalidState {
                info: format!(
                    "cannot publish to {destination} while {}",
                    self.state
                ),
            });
        }
        trace!("Publishing to {destination}");
        match self.transport.publish(destination, payload) {
            Ok(()) => Ok(()),
            Err(closed) => {
                debug!("Publish to {destination} failed; marking link suspect");
                self.mark_suspect();
                Err(SyncError::InvalidState {
                    info: format!("publish to {destination} failed: {closed}"),
                })
            }
        }
    }

    /// Publishes without surfacing failures to the caller. Failures still
    /// mark the connection suspect.
    pub(crate) fn publish_best_effort(&mut self, destination: &str, payload: &serde_json::Value) {
        if let Err(e) = self.publish(destination, payload) {
            trace!("Best-effort publish dropped: {e}");
        }
    }

    /// Forces the connection out of `Connected` and starts the reconnection
    /// path, as if a health check had just failed.
    pub(crate) fn mark_suspect(&mut self) {
        if self.state == ConnectionState::Connected {
            self.event_queue.push_back(LinkEvent::Interrupted);
            self.begin_reconnect();
        }
    }

    /// Starts the reconnection path if the connection sits idle in
    /// `Disconnected`. Used when an action is invoked while disconnected.
    pub(crate) fn ensure_connecting(&mut self) {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Reconnecting;
            self.attempts = 0;
            self.start_attempt();
        }
    }

    /// Closes the link and drops all timers and queued events. Used by
    /// session teardown.
    pub(crate) fn shutdown(&mut self) {
        self.disconnect();
        self.event_queue.clear();
    }

    /// Advances the state machine: watches the in-flight attempt, schedules
    /// retries, and runs the periodic health check. Returns the events this
    /// produced.
    pub(crate) fn poll(&mut self) -> Drain<'_, LinkEvent> {
        let now = Instant::now();
        match self.state {
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                match self.transport.link_status() {
                    LinkStatus::Up => self.on_link_up(),
                    LinkStatus::Opening => {
                        if let Some(deadline) = self.attempt_deadline {
                            if now >= deadline {
                                debug!("Connection attempt {} timed out", self.attempts);
                                self.transport.close();
                                self.attempt_failed(now);
                            }
                        }
                    }
                    LinkStatus::Down => {
                        if self.attempt_deadline.take().is_some() {
                            debug!("Connection attempt {} failed", self.attempts);
                            self.attempt_failed(now);
                        }
                        if let Some(at) = self.next_attempt_at {
                            if now >= at {
                                self.next_attempt_at = None;
                                self.start_attempt();
                            }
                        }
                    }
                }
            }
            ConnectionState::Connected => {
                if now.duration_since(self.last_health_check) >= self.config.health_check_interval
                {
                    self.last_health_check = now;
                    if self.transport.link_status() != LinkStatus::Up {
                        debug!("Health check found the link dead; reconnecting");
                        self.event_queue.push_back(LinkEvent::Interrupted);
                        self.begin_reconnect();
                    }
                }
            }
            ConnectionState::Disconnected | ConnectionState::Failed => (),
        }
        self.event_queue.drain(..)
    }

    fn begin_reconnect(&mut self) {
        self.transport.close();
        self.state = ConnectionState::Reconnecting;
        self.attempts = 0;
        self.start_attempt();
    }

    fn start_attempt(&mut self) {
        if self.attempts >= self.config.max_attempts {
            self.give_up();
            return;
        }
        self.attempts += 1;
        trace!(
            "Connection attempt {}/{}",
            self.attempts,
            self.config.max_attempts
        );
        self.event_queue.push_back(LinkEvent::Attempting {
            attempt: self.attempts,
            max_attempts: self.config.max_attempts,
        });
        self.transport.open();
        self.attempt_deadline = Some(Instant::now() + self.config.connect_timeout);
        self.next_attempt_at = None;
    }

    fn attempt_failed(&mut self, now: Instant) {
        self.attempt_deadline = None;
        if self.attempts >= self.config.max_attempts {
            self.give_up();
        } else {
            self.next_attempt_at = Some(now + self.config.retry_delay);
        }
    }

    fn give_up(&mut self) {
        debug!(
            "Giving up after {} connection attempts",
            self.attempts
        );
        self.transport.close();
        self.state = ConnectionState::Failed;
        self.attempt_deadline = None;
        self.next_attempt_at = None;
        self.event_queue.push_back(LinkEvent::Exhausted {
            attempts: self.attempts,
        });
    }

    fn on_link_up(&mut self) {
        for destination in &self.subscriptions {
            self.transport.subscribe(destination);
        }
        let resumed = self.ever_connected;
        self.ever_connected = true;
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.attempt_deadline = None;
        self.next_attempt_at = None;
        self.last_health_check = Instant::now();
        debug!("Link up; {} subscriptions re-established", self.subscriptions.len());
        self.event_queue.push_back(LinkEvent::Up { resumed });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// A transport whose link behavior is scripted per open() call.
    struct ScriptedTransport {
        /// Outcome of each open() call, in order; `true` brings the link up.
        script: Vec<bool>,
        opens: usize,
        status: LinkStatus,
        subscribed: Vec<String>,
        published: Vec<(String, serde_json::Value)>,
        reject_publishes: bool,
    }

    impl ScriptedTransport {
        fn new(script: Vec<bool>) -> Self {
            Self {
                script,
                opens: 0,
                status: LinkStatus::Down,
                subscribed: Vec::new(),
                published: Vec::new(),
                reject_publishes: false,
            }
        }
    }

    impl NonBlockingTransport for ScriptedTransport {
        fn open(&mut self) {
            let up = self.script.get(self.opens).copied().unwrap_or(false);
            self.opens += 1;
            self.status = if up { LinkStatus::Up } else { LinkStatus::Down };
        }

        fn close(&mut self) {
            self.status = LinkStatus::Down;
        }

        fn link_status(&self) -> LinkStatus {
            self.status
        }

        fn subscribe(&mut self, destination: &str) {
            self.subscribed.push(destination.to_owned());
        }

        fn unsubscribe(&mut self, _destination: &str) {}

        fn publish(
            &mut self,
            destination: &str,
            payload: &serde_json::Value,
        ) -> Result<(), crate::network::transport::TransportClosed> {
            if self.reject_publishes || self.status != LinkStatus::Up {
                return Err(crate::network::transport::TransportClosed);
            }
            self.published.push((destination.to_owned(), payload.clone()));
            Ok(())
        }

        fn receive_all_messages(&mut self) -> Vec<(String, serde_json::Value)> {
            Vec::new()
        }
    }

    fn fast_config() -> ReconnectConfig {
        ReconnectConfig {
            max_attempts: 5,
            retry_delay: Duration::from_millis(1),
            connect_timeout: Duration::from_millis(5),
            health_check_interval: Duration::from_millis(1),
        }
    }

    fn pump(manager: &mut ConnectionManager, events: &mut Vec<LinkEvent>, rounds: usize) {
        for _ in 0..rounds {
            events.extend(manager.poll());
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn connects_and_subscribes_on_first_attempt() {
        let transport = ScriptedTransport::new(vec![true]);
        let mut manager = ConnectionManager::new(
            Box::new(transport),
            fast_config(),
            vec!["/topic/game/G1".to_owned()],
        );
        manager.connect();
        assert_eq!(manager.state(), ConnectionState::Connecting);

        let events: Vec<_> = manager.poll().collect();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(events.contains(&LinkEvent::Up { resumed: false }));
    }

    #[test]
    fn retries_until_the_script_allows_success() {
        // Two failed opens, third succeeds.
        let transport = ScriptedTransport::new(vec![false, false, true]);
        let mut manager = ConnectionManager::new(Box::new(transport), fast_config(), Vec::new());
        manager.connect();

        let mut events = Vec::new();
        pump(&mut manager, &mut events, 10);

        assert_eq!(manager.state(), ConnectionState::Connected);
        let attempts: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, LinkEvent::Attempting { .. }))
            .collect();
        assert_eq!(attempts.len(), 3);
    }

    #[test]
    fn exhausts_after_the_configured_cap_and_goes_terminal() {
        let transport = ScriptedTransport::new(vec![false; 16]);
        let mut manager = ConnectionManager::new(Box::new(transport), fast_config(), Vec::new());
        manager.connect();

        let mut events = Vec::new();
        pump(&mut manager, &mut events, 30);

        assert_eq!(manager.state(), ConnectionState::Failed);
        assert!(events.contains(&LinkEvent::Exhausted { attempts: 5 }));
        let attempts = events
            .iter()
            .filter(|e| matches!(e, LinkEvent::Attempting { .. }))
            .count();
        assert_eq!(attempts, 5);

        // Terminal: further polling starts nothing new.
        let more: Vec<_> = manager.poll().collect();
        assert!(more.is_empty());
        assert_eq!(manager.state(), ConnectionState::Failed);
    }

    #[test]
    fn publish_failure_marks_the_link_suspect() {
        let mut transport = ScriptedTransport::new(vec![true, true]);
        transport.reject_publishes = true;
        let mut manager = ConnectionManager::new(Box::new(transport), fast_config(), Vec::new());
        manager.connect();
        let _ = manager.poll().count();
        assert!(manager.is_connected());

        let result = manager.publish("/app/game/G1/code", &serde_json::json!({}));
        assert!(result.is_err());
        assert_ne!(manager.state(), ConnectionState::Connected);
    }

    #[test]
    fn publish_while_disconnected_is_a_state_error() {
        let transport = ScriptedTransport::new(vec![]);
        let mut manager = ConnectionManager::new(Box::new(transport), fast_config(), Vec::new());
        let err = manager
            .publish("/app/game/G1/submit", &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidState { .. }));
    }

    #[test]
    fn health_check_catches_silent_link_death() {
        let transport = ScriptedTransport::new(vec![true, true]);
        let mut manager = ConnectionManager::new(Box::new(transport), fast_config(), Vec::new());
        manager.connect();
        let _ = manager.poll().count();
        assert!(manager.is_connected());

        // Kill the link without telling the manager.
        manager.transport.close();

        std::thread::sleep(Duration::from_millis(3));
        let events: Vec<_> = manager.poll().collect();
        assert!(events.contains(&LinkEvent::Interrupted));
        assert_ne!(manager.state(), ConnectionState::Connected);

        // The scripted second open succeeds; the counter resets on success.
        let mut more = Vec::new();
        pump(&mut manager, &mut more, 5);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(more.contains(&LinkEvent::Up { resumed: true }));
        assert_eq!(manager.attempts, 0);
    }
}
