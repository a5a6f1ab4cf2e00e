//! # mirror-sync
//!
//! mirror-sync keeps a client's local view of a shared, multiplayer,
//! round-based puzzle session consistent over an unreliable persistent
//! publish/subscribe connection.
//!
//! The callback-style API common to browser clients has been replaced with a
//! simple poll-driven control flow: you call [`PuzzleSession::poll()`]
//! regularly, drain [`SessionEvent`]s via [`PuzzleSession::events()`], and
//! fire actions whose results arrive later as ticketed events. The session
//! owns a bounded automatic reconnection path, a single classification
//! boundary for inbound messages, and a mirror of the server-authoritative
//! session state that stale or foreign messages can never corrupt.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub use error::SyncError;
pub use mirror::{
    MirrorCell, Player, PlayerList, PlayerStatus, Puzzle, SessionLifecycle, SessionMirror,
};
pub use network::connection::ConnectionState;
pub use network::messages::{InboundEnvelope, PromptReply, ScoreBreakdown};
pub use network::stomp::{StompCommand, StompFrame};
pub use network::transport::{LinkStatus, NonBlockingTransport, TransportClosed};
#[cfg(feature = "websocket")]
pub use network::websocket::WebSocketTransport;
pub use sessions::builder::SessionBuilder;
pub use sessions::config::{ReconnectConfig, RequestConfig};
pub use sessions::event_drain::EventDrain;
pub use sessions::puzzle_session::PuzzleSession;

#[doc(hidden)]
pub mod error;
#[doc(hidden)]
pub mod mirror;
#[doc(hidden)]
pub mod network {
    #[doc(hidden)]
    pub mod codec;
    #[doc(hidden)]
    pub mod connection;
    #[doc(hidden)]
    pub mod messages;
    #[doc(hidden)]
    pub mod router;
    /// Text codec for STOMP 1.2 frames, used by the WebSocket transport.
    pub mod stomp;
    #[doc(hidden)]
    pub mod transport;
    #[cfg(feature = "websocket")]
    #[doc(hidden)]
    pub mod websocket;
}
#[doc(hidden)]
pub mod sessions {
    #[doc(hidden)]
    pub mod builder;
    #[doc(hidden)]
    pub mod config;
    #[doc(hidden)]
    pub mod event_drain;
    #[doc(hidden)]
    pub mod puzzle_session;
    #[doc(hidden)]
    pub mod requests;
}

// #############
// # IDENTIFIERS #
// #############

/// The stable identifier of one multiplayer puzzle session.
///
/// A session keeps exactly one `GameId` for its whole lifetime; inbound
/// messages carrying a different identifier are discarded before they can
/// touch the mirror.
///
/// # Examples
///
/// ```
/// use mirror_sync::GameId;
///
/// let id = GameId::new("G1");
/// assert_eq!(id.as_str(), "G1");
/// ```
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    /// Creates a new `GameId` from anything string-like.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        GameId(id.into())
    }

    /// Returns the underlying string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier is empty (an invalid session id).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GameId {
    #[inline]
    fn from(value: &str) -> Self {
        GameId(value.to_owned())
    }
}

impl From<String> for GameId {
    #[inline]
    fn from(value: String) -> Self {
        GameId(value)
    }
}

/// The identifier of one player within a session.
///
/// Player ids are issued by the server; the local player's id is supplied at
/// session construction and used to address the private per-player queue.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Creates a new `PlayerId` from anything string-like.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        PlayerId(id.into())
    }

    /// Returns the underlying string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlayerId {
    #[inline]
    fn from(value: &str) -> Self {
        PlayerId(value.to_owned())
    }
}

impl From<String> for PlayerId {
    #[inline]
    fn from(value: String) -> Self {
        PlayerId(value)
    }
}

/// A round counter within a session.
///
/// Accepted state updates never move the round backwards: the mirror's round
/// is monotonically non-decreasing, which is the cheapest correctness check
/// available on a transport with no ordering guarantee across reconnects.
///
/// # Examples
///
/// ```
/// use mirror_sync::Round;
///
/// let round = Round::new(3);
/// assert_eq!(round.as_u32(), 3);
/// assert_eq!(round.next(), Round::new(4));
/// assert!(round > Round::new(2));
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct Round(u32);

impl Round {
    /// The first round of a session.
    pub const FIRST: Round = Round(1);

    /// Creates a new `Round` from a `u32` value.
    #[inline]
    #[must_use]
    pub const fn new(round: u32) -> Self {
        Round(round)
    }

    /// Returns the underlying `u32` value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the round following this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Round(self.0.saturating_add(1))
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Round {
    #[inline]
    fn from(value: u32) -> Self {
        Round(value)
    }
}

impl From<Round> for u32 {
    #[inline]
    fn from(round: Round) -> Self {
        round.0
    }
}

impl PartialEq<u32> for Round {
    #[inline]
    fn eq(&self, other: &u32) -> bool {
        self.0 == *other
    }
}

impl PartialOrd<u32> for Round {
    #[inline]
    fn partial_cmp(&self, other: &u32) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(other)
    }
}

/// A handle to one in-flight mutating action.
///
/// Actions are fire-and-forget on the wire; the ticket is how their eventual
/// settlement finds its way back to you. Every ticket settles exactly once,
/// through either [`SessionEvent::RequestCompleted`] or
/// [`SessionEvent::RequestFailed`], even under duplicate inbound
/// confirmations or duplicate publishes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionTicket(u64);

impl ActionTicket {
    pub(crate) const fn new(value: u64) -> Self {
        ActionTicket(value)
    }

    /// Returns the underlying ticket number.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// #############
// #   ENUMS   #
// #############

/// The kind of a mutating action tracked by the session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// A solution submission, confirmed by a personal score update.
    Submit,
    /// Marking the current puzzle as completed.
    Complete,
    /// Forfeiting the session.
    Forfeit,
    /// Requesting the next round.
    NextRound,
    /// An AI prompt, confirmed by the next AI response.
    Prompt,
}

impl ActionKind {
    /// Returns `true` if this action awaits an inbound confirmation before
    /// settling (rather than settling on publish).
    #[inline]
    #[must_use]
    pub const fn awaits_confirmation(self) -> bool {
        matches!(self, ActionKind::Submit | ActionKind::Prompt)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Submit => "submit",
            ActionKind::Complete => "complete",
            ActionKind::Forfeit => "forfeit",
            ActionKind::NextRound => "next-round",
            ActionKind::Prompt => "prompt",
        };
        write!(f, "{name}")
    }
}

/// How a completed action settled.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The action was published and requires no inbound confirmation.
    Acknowledged,
    /// A solution submission was scored by the server.
    Scored(ScoreBreakdown),
    /// An AI prompt was answered.
    PromptAnswered(PromptReply),
}

/// Notifications drained from the session via [`PuzzleSession::events()`].
/// Handling them is up to the user.
///
/// # Forward Compatibility
///
/// This enum is marked `#[non_exhaustive]` because new event types may be
/// added in future versions. Always include a wildcard arm when matching.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SessionEvent {
    /// The connection reached the server and all subscriptions are live.
    Connected {
        /// `true` if this followed a reconnection rather than the initial
        /// connect.
        reconnected: bool,
    },
    /// A reconnection attempt is being made.
    Reconnecting {
        /// The attempt number, starting at 1.
        attempt: u32,
        /// The configured attempt cap.
        max_attempts: u32,
    },
    /// The link was detected dead (transport close, publish failure, or a
    /// failed health check); the reconnection path has started.
    ConnectionInterrupted,
    /// The retry cap was exhausted; the connection is now terminally failed
    /// until the owner re-initializes it.
    ConnectionFailed {
        /// How many attempts were made before giving up.
        attempts: u32,
    },
    /// An accepted state update replaced the mirror.
    StateUpdated {
        /// The mirror's round after the update.
        round: Round,
    },
    /// The session reached its ended state.
    SessionEnded,
    /// The local player's score changed.
    ScoreUpdated {
        /// The player whose status entry changed (always the local player).
        player: PlayerId,
        /// The new score.
        score: u32,
    },
    /// A player finished the current puzzle.
    PlayerCompleted {
        /// The player who completed.
        player: PlayerId,
    },
    /// An AI response arrived with no pending prompt to settle.
    AiResponse {
        /// The normalized response.
        reply: PromptReply,
    },
    /// The server reported an error; also recorded as the session's last
    /// visible error.
    ServerError {
        /// The server-provided message.
        message: String,
    },
    /// A tracked action settled successfully.
    RequestCompleted {
        /// The ticket returned when the action was invoked.
        ticket: ActionTicket,
        /// The kind of action that settled.
        kind: ActionKind,
        /// How it settled.
        outcome: ActionOutcome,
    },
    /// A tracked action settled with a failure.
    RequestFailed {
        /// The ticket returned when the action was invoked.
        ticket: ActionTicket,
        /// The kind of action that settled.
        kind: ActionKind,
        /// Why it failed.
        error: SyncError,
    },
}
