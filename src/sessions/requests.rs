//! Outbound action tracking: turns fire-and-forget publishes into tickets
//! that settle exactly once.
//!
//! Every mutating action follows the same path: make sure the link is up
//! (starting the reconnection path if it is not, and retrying the whole
//! action once after it recovers), re-assert membership with a defensive
//! join publish, wait the settle delay, publish the action, then either
//! settle immediately or wait for the matching inbound confirmation under a
//! deadline. The server is assumed to be able to forget membership across a
//! reconnect, so the re-join happens before every action regardless of prior
//! state.

use std::collections::VecDeque;

use serde_json::Value;
use tracing::{debug, trace};
use web_time::Instant;

use crate::error::SyncError;
use crate::network::connection::{ConnectionManager, ConnectionState};
use crate::network::messages::{PromptReply, ScoreBreakdown};
use crate::sessions::config::RequestConfig;
use crate::{ActionKind, ActionOutcome, ActionTicket, SessionEvent};

/// Membership assertions go here before every action.
pub(crate) const JOIN_DESTINATION: &str = "/app/game/join";

/// Where an in-flight action currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    /// Waiting for the reconnection path to bring the link back.
    AwaitingLink {
        /// Whether the single allowed retry has been consumed.
        retried: bool,
    },
    /// Join published; the action publish is scheduled after the settle
    /// delay.
    Joining {
        publish_at: Instant,
        retried: bool,
    },
    /// Action published; waiting for the inbound confirmation.
    AwaitingConfirm { deadline: Instant },
}

#[derive(Debug)]
struct PendingRequest {
    ticket: ActionTicket,
    kind: ActionKind,
    destination: String,
    /// Alternate destination spelling for the best-effort duplicate publish.
    fallback_destination: Option<String>,
    payload: Value,
    phase: Phase,
}

/// Tracks all in-flight actions for one session. Owned by the session actor;
/// all deadlines live here and die with [`cancel_all`].
///
/// [`cancel_all`]: RequestTracker::cancel_all
pub(crate) struct RequestTracker {
    config: RequestConfig,
    join_payload: Value,
    next_ticket: u64,
    /// In-flight actions, oldest first. Settlement removes the entry, which
    /// is what makes settlement exactly-once.
    pending: Vec<PendingRequest>,
    /// Scheduled best-effort duplicate publishes.
    fallback_queue: Vec<(Instant, String, Value)>,
}

impl RequestTracker {
    pub(crate) fn new(config: RequestConfig, join_payload: Value) -> Self {
        Self {
            config,
            join_payload,
            next_ticket: 1,
            pending: Vec::new(),
            fallback_queue: Vec::new(),
        }
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// The membership assertion payload published before every action and on
    /// every reconnect.
    pub(crate) fn join_payload(&self) -> &Value {
        &self.join_payload
    }

    /// Starts tracking a new action. The connection must not be terminally
    /// failed; every other connectivity problem is handled by the
    /// reconnect-and-retry path.
    pub(crate) fn begin(
        &mut self,
        kind: ActionKind,
        destination: String,
        fallback_destination: Option<String>,
        payload: Value,
        conn: &mut ConnectionManager,
    ) -> Result<ActionTicket, SyncError> {
        if conn.state() == ConnectionState::Failed {
            return Err(SyncError::ConnectionFailed {
                attempts: conn.config().max_attempts,
            });
        }

        let ticket = ActionTicket::new(self.next_ticket);
        self.next_ticket += 1;

        let phase = if conn.is_connected() {
            self.publish_join(conn, false)
        } else {
            debug!("{kind} {ticket} invoked while {}; reconnecting first", conn.state());
            conn.ensure_connecting();
            Phase::AwaitingLink { retried: false }
        };

        trace!("Tracking {kind} {ticket} -> {destination}");
        self.pending.push(PendingRequest {
            ticket,
            kind,
            destination,
            fallback_destination,
            payload,
            phase,
        });
        Ok(ticket)
    }

    /// Publishes the defensive re-join and schedules the action after the
    /// settle delay. A failed join publish consumes the retry.
    fn publish_join(&self, conn: &mut ConnectionManager, retried: bool) -> Phase {
        if conn.publish(JOIN_DESTINATION, &self.join_payload).is_ok() {
            Phase::Joining {
                publish_at: Instant::now() + self.config.settle_delay,
                retried,
            }
        } else {
            Phase::AwaitingLink { retried: true }
        }
    }

    /// Advances every pending action and flushes due duplicate publishes.
    pub(crate) fn poll(
        &mut self,
        conn: &mut ConnectionManager,
        events: &mut VecDeque<SessionEvent>,
    ) {
        let now = Instant::now();

        let mut pending = std::mem::take(&mut self.pending);
        for mut request in pending.drain(..) {
            match self.step(&mut request, now, conn) {
                Some(settlement) => events.push_back(settlement),
                None => self.pending.push(request),
            }
        }

        let mut index = 0;
        while index < self.fallback_queue.len() {
            if now >= self.fallback_queue[index].0 {
                let (_, destination, payload) = self.fallback_queue.remove(index);
                trace!("Duplicate publish to {destination}");
                conn.publish_best_effort(&destination, &payload);
            } else {
                index += 1;
            }
        }
    }

    /// Returns the settlement event if the request settled this step.
    fn step(
        &mut self,
        request: &mut PendingRequest,
        now: Instant,
        conn: &mut ConnectionManager,
    ) -> Option<SessionEvent> {
        match request.phase {
            Phase::AwaitingLink { retried } => match conn.state() {
                ConnectionState::Connected => {
                    let next = self.publish_join(conn, retried);
                    if retried && matches!(next, Phase::AwaitingLink { .. }) {
                        return Some(Self::connection_failure(request, conn));
                    }
                    request.phase = next;
                    None
                }
                ConnectionState::Failed => Some(Self::connection_failure(request, conn)),
                _ => None,
            },
            Phase::Joining { publish_at, retried } => {
                if now < publish_at {
                    return None;
                }
                match conn.publish(&request.destination, &request.payload) {
                    Ok(()) => {
                        if self.config.fallback_publish {
                            if let Some(fallback) = request.fallback_destination.clone() {
                                self.fallback_queue.push((
                                    now + self.config.fallback_delay,
                                    fallback,
                                    request.payload.clone(),
                                ));
                            }
                        }
                        if request.kind.awaits_confirmation() {
                            request.phase = Phase::AwaitingConfirm {
                                deadline: now + self.config.confirm_timeout,
                            };
                            None
                        } else {
                            Some(SessionEvent::RequestCompleted {
                                ticket: request.ticket,
                                kind: request.kind,
                                outcome: ActionOutcome::Acknowledged,
                            })
                        }
                    }
                    Err(_) if retried => Some(Self::connection_failure(request, conn)),
                    Err(_) => {
                        debug!(
                            "{} {} publish failed; will retry once after reconnect",
                            request.kind, request.ticket
                        );
                        request.phase = Phase::AwaitingLink { retried: true };
                        None
                    }
                }
            }
            Phase::AwaitingConfirm { deadline } => {
                if now >= deadline {
                    debug!("{} {} timed out", request.kind, request.ticket);
                    Some(SessionEvent::RequestFailed {
                        ticket: request.ticket,
                        kind: request.kind,
                        error: SyncError::Timeout {
                            waited: self.config.confirm_timeout,
                        },
                    })
                } else {
                    None
                }
            }
        }
    }

    fn connection_failure(request: &PendingRequest, conn: &ConnectionManager) -> SessionEvent {
        SessionEvent::RequestFailed {
            ticket: request.ticket,
            kind: request.kind,
            error: SyncError::ConnectionFailed {
                attempts: conn.config().max_attempts,
            },
        }
    }

    /// Settles the oldest submit awaiting confirmation with its score.
    /// Returns `false` when no submit was waiting (duplicate confirmations
    /// land here and are ignored).
    pub(crate) fn confirm_submit_scored(
        &mut self,
        breakdown: ScoreBreakdown,
        events: &mut VecDeque<SessionEvent>,
    ) -> bool {
        self.settle_oldest(ActionKind::Submit, ActionOutcome::Scored(breakdown), events)
    }

    /// Settles the oldest submit awaiting confirmation with a bare
    /// acknowledgement.
    pub(crate) fn confirm_submit_ack(&mut self, events: &mut VecDeque<SessionEvent>) -> bool {
        self.settle_oldest(ActionKind::Submit, ActionOutcome::Acknowledged, events)
    }

    /// Settles the oldest prompt awaiting confirmation with its reply.
    pub(crate) fn confirm_prompt(
        &mut self,
        reply: PromptReply,
        events: &mut VecDeque<SessionEvent>,
    ) -> bool {
        self.settle_oldest(
            ActionKind::Prompt,
            ActionOutcome::PromptAnswered(reply),
            events,
        )
    }

    fn settle_oldest(
        &mut self,
        kind: ActionKind,
        outcome: ActionOutcome,
        events: &mut VecDeque<SessionEvent>,
    ) -> bool {
        let position = self.pending.iter().position(|request| {
            request.kind == kind && matches!(request.phase, Phase::AwaitingConfirm { .. })
        });
        match position {
            Some(index) => {
                let request = self.pending.remove(index);
                events.push_back(SessionEvent::RequestCompleted {
                    ticket: request.ticket,
                    kind: request.kind,
                    outcome,
                });
                true
            }
            None => false,
        }
    }

    /// Rejects every outstanding action and drops all scheduled publishes.
    /// Used by session teardown so nothing leaks across sessions.
    pub(crate) fn cancel_all(&mut self, events: &mut VecDeque<SessionEvent>) {
        for request in self.pending.drain(..) {
            events.push_back(SessionEvent::RequestFailed {
                ticket: request.ticket,
                kind: request.kind,
                error: SyncError::InvalidState {
                    info: "session shut down".to_owned(),
                },
            });
        }
        self.fallback_queue.clear();
    }
}
