//! The mirrored session state and the synchronizer that maintains it.
//!
//! The mirror is the client's local, eventually-consistent copy of the
//! server-authoritative session state. It is owned exclusively by the
//! synchronizer; everything else reads it through cheap [`MirrorCell`]
//! snapshots. The transport gives no ordering guarantee across reconnect
//! boundaries, so acceptance is guarded by two checks: the session identifier
//! must match, and the round must never regress.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::network::messages::ScoreBreakdown;
use crate::{GameId, PlayerId, Round, SessionEvent};

/// Stack-allocated list of players; sessions typically hold 2-4.
pub type PlayerList = SmallVec<[Player; 4]>;

/// One participant in a session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// The player's server-issued identifier.
    pub id: PlayerId,
    /// Display name.
    #[serde(default)]
    pub username: String,
    /// Optional avatar URL.
    #[serde(default)]
    pub picture: Option<String>,
}

/// The puzzle being played in the current round.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Puzzle {
    /// The puzzle's identifier.
    #[serde(default)]
    pub id: String,
    /// Short display name.
    #[serde(default)]
    pub name: String,
    /// Longer task description.
    #[serde(default)]
    pub description: String,
    /// The puzzle content (starter code, task body).
    #[serde(default)]
    pub content: String,
    /// Whether the puzzle has been completed.
    #[serde(default)]
    pub completed: bool,
}

/// Per-player progress within the session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatus {
    /// The player's accumulated score.
    #[serde(default)]
    pub score: u32,
    /// Whether the player finished the current puzzle.
    #[serde(default)]
    pub has_completed: bool,
    /// The player's last broadcast code, if any.
    #[serde(default)]
    pub code: Option<String>,
}

/// Whether the session is still being played.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionLifecycle {
    /// The session is running.
    #[default]
    InProgress,
    /// The session is over; no further state updates are expected.
    Ended,
}

/// The client's local copy of the server-authoritative session state.
///
/// Replaced wholesale by each accepted state update; never merged. Read it
/// through [`MirrorCell::snapshot()`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMirror {
    /// The session identifier this state belongs to.
    #[serde(rename = "id")]
    pub game_id: GameId,
    /// All participants, in server order.
    #[serde(default)]
    pub players: PlayerList,
    /// The current round. Monotonically non-decreasing across accepted
    /// updates.
    #[serde(default)]
    pub current_round: Round,
    /// How many rounds the session has in total.
    #[serde(default)]
    pub total_rounds: u32,
    /// Whose turn it currently is.
    #[serde(default)]
    pub current_turn: PlayerId,
    /// The puzzle for the current round.
    #[serde(default)]
    pub puzzle: Puzzle,
    /// Per-player progress, keyed by player id.
    #[serde(default)]
    pub player_status: BTreeMap<PlayerId, PlayerStatus>,
    /// Optional aggregate score table, keyed by player id.
    #[serde(default)]
    pub scores: BTreeMap<PlayerId, u32>,
    /// Whether the session is still running.
    #[serde(default, rename = "state")]
    pub lifecycle: SessionLifecycle,
}

/// A cheaply cloneable read handle to the session mirror.
///
/// The synchronizer holds the only write path; observers (UI layers, tests)
/// clone the cell and take snapshots whenever they need a consistent view.
#[derive(Clone, Default)]
pub struct MirrorCell {
    inner: Arc<RwLock<Option<SessionMirror>>>,
}

impl MirrorCell {
    /// Creates an empty cell. The mirror stays empty until the first accepted
    /// state update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the current mirror, or `None` if no state update
    /// has been accepted yet.
    #[must_use]
    pub fn snapshot(&self) -> Option<SessionMirror> {
        self.inner.read().clone()
    }

    /// Returns `true` once a state update has been accepted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Returns the mirror's current round, if any.
    #[must_use]
    pub fn current_round(&self) -> Option<Round> {
        self.inner.read().as_ref().map(|m| m.current_round)
    }

    pub(crate) fn replace(&self, mirror: SessionMirror) {
        *self.inner.write() = Some(mirror);
    }

    pub(crate) fn clear(&self) {
        *self.inner.write() = None;
    }

    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(&mut SessionMirror) -> R) -> Option<R> {
        self.inner.write().as_mut().map(f)
    }
}

impl std::fmt::Debug for MirrorCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorCell")
            .field("active", &self.is_active())
            .field("round", &self.current_round())
            .finish()
    }
}

/// Applies inbound updates to the mirror under the consistency invariants.
pub(crate) struct Synchronizer {
    game_id: GameId,
    local_player: PlayerId,
    cell: MirrorCell,
    last_error: Option<String>,
}

impl Synchronizer {
    pub(crate) fn new(game_id: GameId, local_player: PlayerId, cell: MirrorCell) -> Self {
        Self {
            game_id,
            local_player,
            cell,
            last_error: None,
        }
    }

    /// Replaces the mirror with an accepted state update, or drops the
    /// payload if it is foreign, unidentified, or a round regression.
    pub(crate) fn apply_game_state(
        &mut self,
        incoming: SessionMirror,
    ) -> SmallVec<[SessionEvent; 2]> {
        let mut events = SmallVec::new();

        if incoming.game_id.is_empty() {
            warn!("Dropping state update without a session identifier");
            return events;
        }
        if incoming.game_id != self.game_id {
            warn!(
                "Dropping state update for foreign session {} (ours: {})",
                incoming.game_id, self.game_id
            );
            return events;
        }
        if let Some(current) = self.cell.current_round() {
            if incoming.current_round < current {
                warn!(
                    "Dropping stale state update: round {} regresses below {}",
                    incoming.current_round, current
                );
                return events;
            }
        }

        let was_ended = self
            .cell
            .snapshot()
            .map(|m| m.lifecycle == SessionLifecycle::Ended)
            .unwrap_or(false);
        let round = incoming.current_round;
        let ended = incoming.lifecycle == SessionLifecycle::Ended;

        debug!("Accepting state update for round {round}");
        self.cell.replace(incoming);

        events.push(SessionEvent::StateUpdated { round });
        if ended && !was_ended {
            events.push(SessionEvent::SessionEnded);
        }
        events
    }

    /// Overwrites the local player's score. Never touches other players'
    /// status entries.
    pub(crate) fn apply_score_update(
        &mut self,
        breakdown: &ScoreBreakdown,
    ) -> Option<SessionEvent> {
        let player = self.local_player.clone();
        let score = breakdown.score;
        let applied = self.cell.with_mut(|mirror| {
            mirror
                .player_status
                .entry(player.clone())
                .or_default()
                .score = score;
            if let Some(total) = mirror.scores.get_mut(&player) {
                *total = score;
            }
        });
        if applied.is_none() {
            warn!("Dropping score update: no active mirror");
            return None;
        }
        debug!("Score for {player} is now {score}");
        Some(SessionEvent::ScoreUpdated { player, score })
    }

    /// Marks a player's puzzle as completed in the mirror.
    pub(crate) fn apply_player_completion(&mut self, player: PlayerId) -> Option<SessionEvent> {
        let changed = self.cell.with_mut(|mirror| {
            match mirror.player_status.get_mut(&player) {
                Some(status) if !status.has_completed => {
                    status.has_completed = true;
                    true
                }
                Some(_) => false,
                None => {
                    debug!("Completion for unknown player {player}; ignoring");
                    false
                }
            }
        });
        if changed == Some(true) {
            Some(SessionEvent::PlayerCompleted { player })
        } else {
            None
        }
    }

    /// Records the last server error for observers. The mirror is untouched.
    pub(crate) fn apply_error(&mut self, message: String) -> SessionEvent {
        self.last_error = Some(message.clone());
        SessionEvent::ServerError { message }
    }

    pub(crate) fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn record_error(&mut self, message: String) {
        self.last_error = Some(message);
    }

    /// Tears the mirror down to its empty state.
    pub(crate) fn reset(&mut self) {
        self.cell.clear();
        self.last_error = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn mirror_for(game: &str, round: u32) -> SessionMirror {
        SessionMirror {
            game_id: GameId::new(game),
            players: PlayerList::new(),
            current_round: Round::new(round),
            total_rounds: 5,
            current_turn: PlayerId::default(),
            puzzle: Puzzle::default(),
            player_status: BTreeMap::new(),
            scores: BTreeMap::new(),
            lifecycle: SessionLifecycle::InProgress,
        }
    }

    fn synchronizer(game: &str, player: &str) -> (Synchronizer, MirrorCell) {
        let cell = MirrorCell::new();
        let sync = Synchronizer::new(GameId::new(game), PlayerId::new(player), cell.clone());
        (sync, cell)
    }

    #[test]
    fn accepts_first_state_update() {
        let (mut sync, cell) = synchronizer("G1", "p1");
        let events = sync.apply_game_state(mirror_for("G1", 1));
        assert_eq!(
            events.as_slice(),
            &[SessionEvent::StateUpdated {
                round: Round::new(1)
            }]
        );
        assert!(cell.is_active());
    }

    #[test]
    fn round_never_regresses() {
        let (mut sync, cell) = synchronizer("G1", "p1");
        sync.apply_game_state(mirror_for("G1", 3));
        let events = sync.apply_game_state(mirror_for("G1", 2));
        assert!(events.is_empty());
        assert_eq!(cell.current_round(), Some(Round::new(3)));
    }

    #[test]
    fn equal_round_replaces_mirror() {
        let (mut sync, cell) = synchronizer("G1", "p1");
        sync.apply_game_state(mirror_for("G1", 2));
        let mut update = mirror_for("G1", 2);
        update.total_rounds = 7;
        let events = sync.apply_game_state(update);
        assert_eq!(events.len(), 1);
        assert_eq!(cell.snapshot().unwrap().total_rounds, 7);
    }

    #[test]
    fn foreign_session_is_discarded() {
        let (mut sync, cell) = synchronizer("G1", "p1");
        sync.apply_game_state(mirror_for("G1", 1));
        let before = cell.snapshot();
        let events = sync.apply_game_state(mirror_for("G2", 9));
        assert!(events.is_empty());
        assert_eq!(cell.snapshot(), before);
    }

    #[test]
    fn missing_identifier_is_discarded() {
        let (mut sync, cell) = synchronizer("G1", "p1");
        let events = sync.apply_game_state(mirror_for("", 1));
        assert!(events.is_empty());
        assert!(!cell.is_active());
    }

    #[test]
    fn ended_lifecycle_emits_session_ended_once() {
        let (mut sync, _cell) = synchronizer("G1", "p1");
        sync.apply_game_state(mirror_for("G1", 1));
        let mut ended = mirror_for("G1", 5);
        ended.lifecycle = SessionLifecycle::Ended;
        let events = sync.apply_game_state(ended.clone());
        assert!(events.contains(&SessionEvent::SessionEnded));

        ended.current_round = Round::new(5);
        let again = sync.apply_game_state(ended);
        assert!(!again.contains(&SessionEvent::SessionEnded));
    }

    #[test]
    fn score_update_touches_only_the_local_player() {
        let (mut sync, cell) = synchronizer("G1", "p1");
        let mut state = mirror_for("G1", 1);
        state.player_status.insert(
            PlayerId::new("p1"),
            PlayerStatus {
                score: 10,
                ..PlayerStatus::default()
            },
        );
        state.player_status.insert(
            PlayerId::new("p2"),
            PlayerStatus {
                score: 55,
                ..PlayerStatus::default()
            },
        );
        sync.apply_game_state(state);

        let event = sync.apply_score_update(&ScoreBreakdown {
            score: 42,
            correctness: None,
            quality: None,
            time_bonus: None,
        });
        assert_eq!(
            event,
            Some(SessionEvent::ScoreUpdated {
                player: PlayerId::new("p1"),
                score: 42
            })
        );

        let mirror = cell.snapshot().unwrap();
        assert_eq!(mirror.player_status[&PlayerId::new("p1")].score, 42);
        assert_eq!(mirror.player_status[&PlayerId::new("p2")].score, 55);
    }

    #[test]
    fn score_update_without_mirror_is_dropped() {
        let (mut sync, _cell) = synchronizer("G1", "p1");
        let event = sync.apply_score_update(&ScoreBreakdown {
            score: 42,
            correctness: None,
            quality: None,
            time_bonus: None,
        });
        assert_eq!(event, None);
    }

    #[test]
    fn completion_marks_known_players_once() {
        let (mut sync, cell) = synchronizer("G1", "p1");
        let mut state = mirror_for("G1", 1);
        state
            .player_status
            .insert(PlayerId::new("p2"), PlayerStatus::default());
        sync.apply_game_state(state);

        let first = sync.apply_player_completion(PlayerId::new("p2"));
        assert!(first.is_some());
        let second = sync.apply_player_completion(PlayerId::new("p2"));
        assert!(second.is_none());
        assert!(cell.snapshot().unwrap().player_status[&PlayerId::new("p2")].has_completed);

        let unknown = sync.apply_player_completion(PlayerId::new("ghost"));
        assert!(unknown.is_none());
    }

    #[test]
    fn errors_are_recorded_without_touching_the_mirror() {
        let (mut sync, cell) = synchronizer("G1", "p1");
        sync.apply_game_state(mirror_for("G1", 2));
        let before = cell.snapshot();
        let event = sync.apply_error("game not found".to_owned());
        assert_eq!(
            event,
            SessionEvent::ServerError {
                message: "game not found".to_owned()
            }
        );
        assert_eq!(sync.last_error(), Some("game not found"));
        assert_eq!(cell.snapshot(), before);
    }

    #[test]
    fn reset_clears_mirror_and_error() {
        let (mut sync, cell) = synchronizer("G1", "p1");
        sync.apply_game_state(mirror_for("G1", 1));
        sync.apply_error("boom".to_owned());
        sync.reset();
        assert!(!cell.is_active());
        assert_eq!(sync.last_error(), None);
    }

    #[test]
    fn mirror_deserializes_from_wire_shape() {
        let value = serde_json::json!({
            "id": "G1",
            "players": [
                { "id": "p1", "username": "alice" },
                { "id": "p2", "username": "bob", "picture": "http://x/p.png" }
            ],
            "currentRound": 2,
            "totalRounds": 3,
            "currentTurn": "p1",
            "puzzle": { "id": "z", "name": "Reverse", "description": "d", "content": "c" },
            "playerStatus": {
                "p1": { "score": 10, "hasCompleted": false },
                "p2": { "score": 20, "hasCompleted": true, "code": "x" }
            },
            "state": "IN_PROGRESS"
        });
        let mirror: SessionMirror = serde_json::from_value(value).unwrap();
        assert_eq!(mirror.game_id, GameId::new("G1"));
        assert_eq!(mirror.current_round, Round::new(2));
        assert_eq!(mirror.players.len(), 2);
        assert_eq!(mirror.lifecycle, SessionLifecycle::InProgress);
        assert!(mirror.player_status[&PlayerId::new("p2")].has_completed);
    }
}
