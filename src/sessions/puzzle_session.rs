//! The session actor: one struct owning the connection, the mirror, the
//! request tracker, and a single event queue.
//!
//! There is no ambient shared store and no background thread: you call
//! [`PuzzleSession::poll()`] from your update loop and drain
//! [`PuzzleSession::events()`] afterwards. Every timer in the system is a
//! deadline inside this actor's resource set, and all of them die together
//! in [`PuzzleSession::shutdown()`].

use std::collections::VecDeque;

use tracing::{trace, warn};

use crate::error::SyncError;
use crate::mirror::{MirrorCell, Player, SessionMirror, Synchronizer};
use crate::network::codec;
use crate::network::connection::{ConnectionManager, ConnectionState, LinkEvent};
use crate::network::messages::{
    CodeUpdatePayload, InboundEnvelope, JoinPayload, NextRoundPayload, PlayerOnlyPayload,
    PromptPayload, SubmitPayload,
};
use crate::network::router;
use crate::network::transport::NonBlockingTransport;
use crate::sessions::config::{ReconnectConfig, RequestConfig};
use crate::sessions::event_drain::EventDrain;
use crate::sessions::requests::{RequestTracker, JOIN_DESTINATION};
use crate::{ActionKind, ActionTicket, GameId, SessionEvent};

/// Maximum number of events to queue before oldest are dropped.
///
/// This prevents unbounded memory growth if events aren't being consumed.
const MAX_EVENT_QUEUE_SIZE: usize = 100;

/// A `PuzzleSession` keeps a client synchronized with one shared multiplayer
/// puzzle session: it mirrors broadcast state, recovers from connection loss
/// without losing session identity, and correlates outbound actions with
/// their asynchronous confirmations.
///
/// # Usage
///
/// ```ignore
/// let mut session = SessionBuilder::new(GameId::new("G1"), me)
///     .with_transport(transport)
///     .start_session()?;
///
/// loop {
///     session.poll();
///     for event in session.events() {
///         // react to state updates, settlements, connection changes
///     }
/// }
/// ```
pub struct PuzzleSession {
    game_id: GameId,
    local_player: Player,

    /// Owns the transport link and its reconnection machinery.
    conn: ConnectionManager,
    /// Read handle shared with observers; written only by the synchronizer.
    mirror: MirrorCell,
    synchronizer: Synchronizer,
    tracker: RequestTracker,

    /// Contains all events to be forwarded to the user.
    event_queue: VecDeque<SessionEvent>,
    shut_down: bool,
}

impl PuzzleSession {
    /// Internal constructor; sessions are built via [`SessionBuilder`].
    ///
    /// [`SessionBuilder`]: crate::SessionBuilder
    pub(crate) fn new(
        game_id: GameId,
        local_player: Player,
        transport: Box<dyn NonBlockingTransport>,
        reconnect_config: ReconnectConfig,
        request_config: RequestConfig,
    ) -> Result<Self, SyncError> {
        let subscriptions = vec![
            format!("/topic/game/{game_id}"),
            format!("/user/{}/queue/game", local_player.id),
        ];
        let mut conn = ConnectionManager::new(transport, reconnect_config, subscriptions);

        let join_payload = codec::encode(&JoinPayload {
            game_id: game_id.clone(),
            player_id: local_player.id.clone(),
            username: local_player.username.clone(),
            picture: local_player.picture.clone(),
        })
        .map_err(|e| SyncError::InvalidRequest {
            info: format!("could not encode join payload: {e}"),
        })?;

        let mirror = MirrorCell::new();
        let synchronizer =
            Synchronizer::new(game_id.clone(), local_player.id.clone(), mirror.clone());
        let tracker = RequestTracker::new(request_config, join_payload);

        conn.connect();

        Ok(Self {
            game_id,
            local_player,
            conn,
            mirror,
            synchronizer,
            tracker,
            event_queue: VecDeque::new(),
            shut_down: false,
        })
    }

    /// Advances the whole session: drains and routes inbound messages in
    /// arrival order, runs the connection state machine and health check,
    /// and advances every pending request deadline. Call this regularly; all
    /// work happens here and nothing blocks.
    pub fn poll(&mut self) {
        if self.shut_down {
            return;
        }

        for (destination, value) in self.conn.receive_all_messages() {
            trace!("Inbound message on {destination}");
            self.handle_inbound(&value);
        }

        let link_events: Vec<LinkEvent> = self.conn.poll().collect();
        for event in link_events {
            self.handle_link_event(event);
        }

        let before = self.event_queue.len();
        self.tracker.poll(&mut self.conn, &mut self.event_queue);
        self.record_settlement_failures(before);

        while self.event_queue.len() > MAX_EVENT_QUEUE_SIZE {
            warn!("Event queue overflow; dropping oldest event");
            self.event_queue.pop_front();
        }
    }

    /// Drains all events queued since the last call.
    pub fn events(&mut self) -> EventDrain<'_> {
        EventDrain::from_drain(self.event_queue.drain(..))
    }

    /// The current connection lifecycle state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Returns a cheaply cloneable read handle to the session mirror.
    #[must_use]
    pub fn mirror(&self) -> MirrorCell {
        self.mirror.clone()
    }

    /// Returns a clone of the current mirror, or `None` before the first
    /// accepted state update.
    #[must_use]
    pub fn snapshot(&self) -> Option<SessionMirror> {
        self.mirror.snapshot()
    }

    /// The last error surfaced to observers, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.synchronizer.last_error()
    }

    /// The session identifier this client is bound to.
    #[must_use]
    pub fn game_id(&self) -> &GameId {
        &self.game_id
    }

    /// The local player identity supplied at construction.
    #[must_use]
    pub fn local_player(&self) -> &Player {
        &self.local_player
    }

    /// How many actions are currently in flight.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.tracker.pending_count()
    }

    /// Re-initializes the connection after an explicit disconnect or a
    /// terminal failure. The retry counter starts fresh.
    pub fn connect(&mut self) {
        if !self.shut_down {
            self.conn.connect();
        }
    }

    /// Tears the link down without clearing the mirror. No automatic
    /// reconnection happens until an action or [`connect()`] asks for one.
    ///
    /// [`connect()`]: Self::connect
    pub fn disconnect(&mut self) {
        self.conn.disconnect();
    }

    /// Tears the whole session down: closes the link, cancels every timer,
    /// rejects every pending request, and resets the mirror to empty. The
    /// cancellation events remain drainable via [`events()`].
    ///
    /// [`events()`]: Self::events
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.tracker.cancel_all(&mut self.event_queue);
        self.conn.shutdown();
        self.synchronizer.reset();
        self.shut_down = true;
    }

    /*
     *  ACTIONS
     */

    /// Submits a solution for scoring. Settles with
    /// [`ActionOutcome::Scored`] when the personal score update arrives, or
    /// with a bare acknowledgement, or times out.
    ///
    /// [`ActionOutcome::Scored`]: crate::ActionOutcome::Scored
    pub fn submit_solution(&mut self, code: impl Into<String>) -> Result<ActionTicket, SyncError> {
        self.ensure_ready()?;
        let payload = codec_payload(&SubmitPayload {
            player_id: self.local_player.id.clone(),
            code: code.into(),
        })?;
        self.tracker.begin(
            ActionKind::Submit,
            self.action_destination("submit"),
            Some(self.fallback_destination("submit")),
            payload,
            &mut self.conn,
        )
    }

    /// Marks the current puzzle as completed.
    pub fn mark_completed(&mut self) -> Result<ActionTicket, SyncError> {
        self.ensure_ready()?;
        let payload = codec_payload(&PlayerOnlyPayload {
            player_id: self.local_player.id.clone(),
        })?;
        self.tracker.begin(
            ActionKind::Complete,
            self.action_destination("complete"),
            Some(self.fallback_destination("complete")),
            payload,
            &mut self.conn,
        )
    }

    /// Forfeits the session.
    pub fn forfeit(&mut self) -> Result<ActionTicket, SyncError> {
        self.ensure_ready()?;
        let payload = codec_payload(&PlayerOnlyPayload {
            player_id: self.local_player.id.clone(),
        })?;
        self.tracker.begin(
            ActionKind::Forfeit,
            self.action_destination("forfeit"),
            Some(self.fallback_destination("forfeit")),
            payload,
            &mut self.conn,
        )
    }

    /// Requests the next round, carrying the round the mirror currently
    /// shows so the server can reject stale requests.
    pub fn start_next_round(&mut self) -> Result<ActionTicket, SyncError> {
        self.ensure_ready()?;
        let current = self.mirror.current_round().ok_or_else(|| {
            SyncError::InvalidState {
                info: "no session state received yet".to_owned(),
            }
        })?;
        let payload = codec_payload(&NextRoundPayload {
            player_id: self.local_player.id.clone(),
            game_id: self.game_id.clone(),
            current_round: current,
            expected_next_round: current.next(),
        })?;
        self.tracker.begin(
            ActionKind::NextRound,
            self.action_destination("next-round"),
            Some(self.fallback_destination("next-round")),
            payload,
            &mut self.conn,
        )
    }

    /// Sends an AI prompt. Settles with [`ActionOutcome::PromptAnswered`]
    /// when the next AI response arrives, or times out after the configured
    /// bound.
    ///
    /// [`ActionOutcome::PromptAnswered`]: crate::ActionOutcome::PromptAnswered
    pub fn submit_prompt(&mut self, prompt: impl Into<String>) -> Result<ActionTicket, SyncError> {
        self.ensure_ready()?;
        let payload = codec_payload(&PromptPayload {
            game_id: self.game_id.clone(),
            player_id: self.local_player.id.clone(),
            prompt: prompt.into(),
        })?;
        self.tracker.begin(
            ActionKind::Prompt,
            "/app/game/prompt".to_owned(),
            Some(self.fallback_destination("prompt")),
            payload,
            &mut self.conn,
        )
    }

    /// Broadcasts the local player's live code. Fire-and-forget: no ticket,
    /// no re-join, no retry; this is a high-frequency best-effort broadcast
    /// whose loss is acceptable. A publish failure only marks the link
    /// suspect.
    pub fn update_code(&mut self, code: impl Into<String>) -> Result<(), SyncError> {
        self.ensure_ready()?;
        let payload = codec_payload(&CodeUpdatePayload {
            player_id: self.local_player.id.clone(),
            code: code.into(),
        })?;
        if self.conn.is_connected() {
            self.conn
                .publish_best_effort(&self.action_destination("code"), &payload);
        } else {
            trace!("Dropping code broadcast while {}", self.conn.state());
        }
        Ok(())
    }

    /*
     *  INTERNALS
     */

    fn ensure_ready(&self) -> Result<(), SyncError> {
        if self.shut_down {
            return Err(SyncError::InvalidState {
                info: "session has been shut down".to_owned(),
            });
        }
        if !self.mirror.is_active() {
            return Err(SyncError::InvalidState {
                info: "no session state received yet".to_owned(),
            });
        }
        Ok(())
    }

    fn action_destination(&self, operation: &str) -> String {
        format!("/app/game/{}/{operation}", self.game_id)
    }

    /// The alternate destination spelling used for the best-effort duplicate
    /// publish, when enabled.
    fn fallback_destination(&self, operation: &str) -> String {
        format!("/app/game/{operation}/{}", self.game_id)
    }

    fn handle_inbound(&mut self, value: &serde_json::Value) {
        let Some(envelope) = router::route(value, &self.game_id) else {
            return;
        };
        match envelope {
            InboundEnvelope::GameState(mirror) => {
                for event in self.synchronizer.apply_game_state(*mirror) {
                    self.event_queue.push_back(event);
                }
            }
            InboundEnvelope::PersonalScoreUpdate { breakdown, .. } => {
                if let Some(event) = self.synchronizer.apply_score_update(&breakdown) {
                    self.event_queue.push_back(event);
                }
                self.tracker
                    .confirm_submit_scored(breakdown, &mut self.event_queue);
            }
            InboundEnvelope::AiResponse(reply) => {
                if !self
                    .tracker
                    .confirm_prompt(reply.clone(), &mut self.event_queue)
                {
                    self.event_queue.push_back(SessionEvent::AiResponse { reply });
                }
            }
            InboundEnvelope::PlayerCompletion(player) => {
                if let Some(event) = self.synchronizer.apply_player_completion(player) {
                    self.event_queue.push_back(event);
                }
            }
            InboundEnvelope::SubmitAck => {
                self.tracker.confirm_submit_ack(&mut self.event_queue);
            }
            InboundEnvelope::Error(message) => {
                let event = self.synchronizer.apply_error(message);
                self.event_queue.push_back(event);
            }
            InboundEnvelope::Untyped => (),
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Up { resumed } => {
                // Idempotent re-entry: assert membership on every connect,
                // since the server may have forgotten it across the gap.
                let join = self.tracker.join_payload().clone();
                self.conn.publish_best_effort(JOIN_DESTINATION, &join);
                self.event_queue.push_back(SessionEvent::Connected {
                    reconnected: resumed,
                });
            }
            LinkEvent::Attempting {
                attempt,
                max_attempts,
            } => {
                self.event_queue.push_back(SessionEvent::Reconnecting {
                    attempt,
                    max_attempts,
                });
            }
            LinkEvent::Interrupted => {
                self.event_queue.push_back(SessionEvent::ConnectionInterrupted);
            }
            LinkEvent::Exhausted { attempts } => {
                self.synchronizer
                    .record_error(format!("connection failed after {attempts} attempts"));
                self.event_queue
                    .push_back(SessionEvent::ConnectionFailed { attempts });
            }
        }
    }

    /// Request failures double as the session's last-visible error.
    fn record_settlement_failures(&mut self, from: usize) {
        let messages: Vec<String> = self
            .event_queue
            .iter()
            .skip(from)
            .filter_map(|event| match event {
                SessionEvent::RequestFailed { error, .. } => Some(error.to_string()),
                _ => None,
            })
            .collect();
        for message in messages {
            self.synchronizer.record_error(message);
        }
    }
}

fn codec_payload<T: serde::Serialize>(payload: &T) -> Result<serde_json::Value, SyncError> {
    codec::encode(payload).map_err(|e| SyncError::InvalidRequest {
        info: e.to_string(),
    })
}
