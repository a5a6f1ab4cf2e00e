//! The single classification boundary for inbound messages.
//!
//! Inbound traffic is only partially tagged: broadcast state updates and AI
//! responses carry an explicit `type` tag, while personal score updates are
//! recognizable only by field presence. The router folds every raw payload
//! into the [`InboundEnvelope`] union exactly once; downstream code never
//! inspects raw fields.
//!
//! Before classification, any message whose embedded session identifier
//! differs from ours is discarded, whether the identifier sits at the top
//! level or nested under `payload`. The synchronizer re-checks this on state
//! updates, but dropping foreign traffic here keeps it away from every other
//! component too.

use serde_json::Value;
use tracing::{trace, warn};

use crate::network::messages::{InboundEnvelope, PromptReply, ScoreBreakdown};
use crate::{GameId, PlayerId};

/// Type tags the router understands.
const TAG_GAME_STATE: &str = "GAME_STATE";
const TAG_AI_RESPONSE: &str = "AI_RESPONSE";
const TAG_ERROR: &str = "ERROR";
const TAG_SUBMIT_ACK: &str = "SUBMIT_SOLUTION";
const TAG_PLAYER_COMPLETION: &str = "PLAYER_COMPLETION";

const KNOWN_TAGS: [&str; 5] = [
    TAG_GAME_STATE,
    TAG_AI_RESPONSE,
    TAG_ERROR,
    TAG_SUBMIT_ACK,
    TAG_PLAYER_COMPLETION,
];

/// Classifies one raw inbound message.
///
/// Returns `None` when the message must be dropped before classification:
/// foreign-session traffic and payloads too malformed to classify. Shapes
/// that are well-formed but unrecognized come back as
/// [`InboundEnvelope::Untyped`].
pub(crate) fn route(value: &Value, expected_game: &GameId) -> Option<InboundEnvelope> {
    if let Some(embedded) = embedded_game_id(value) {
        if embedded != expected_game.as_str() {
            trace!(
                "Dropping message for foreign session {embedded} (ours: {})",
                expected_game
            );
            return None;
        }
    }

    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .filter(|t| KNOWN_TAGS.contains(t));

    // Personal score updates arrive on the private queue with no type tag;
    // they are recognized purely by field presence.
    if tag.is_none() && is_score_shape(value) {
        return Some(classify_score_update(value));
    }

    match tag {
        Some(TAG_GAME_STATE) => classify_game_state(value),
        Some(TAG_AI_RESPONSE) => Some(InboundEnvelope::AiResponse(normalize_ai_response(value))),
        Some(TAG_ERROR) => Some(InboundEnvelope::Error(error_message(value))),
        Some(TAG_SUBMIT_ACK) => Some(InboundEnvelope::SubmitAck),
        Some(TAG_PLAYER_COMPLETION) => classify_player_completion(value),
        _ => {
            warn!("Dropping unrecognized message shape: {value}");
            Some(InboundEnvelope::Untyped)
        }
    }
}

/// Extracts the session identifier embedded in a message, if any.
fn embedded_game_id(value: &Value) -> Option<&str> {
    value
        .get("gameId")
        .and_then(Value::as_str)
        .or_else(|| value.pointer("/payload/id").and_then(Value::as_str))
        .or_else(|| value.pointer("/payload/gameId").and_then(Value::as_str))
}

fn is_score_shape(value: &Value) -> bool {
    value.get("success").and_then(Value::as_bool) == Some(true)
        && value.get("score").map(Value::is_number) == Some(true)
}

fn classify_score_update(value: &Value) -> InboundEnvelope {
    let breakdown = serde_json::from_value::<ScoreBreakdown>(value.clone()).unwrap_or_else(|_| {
        // The score was numeric but not a u32 (e.g. fractional); clamp to
        // something representable rather than dropping a confirmation.
        let score = value
            .get("score")
            .and_then(Value::as_f64)
            .map(|s| s.max(0.0) as u32)
            .unwrap_or(0);
        ScoreBreakdown {
            score,
            correctness: None,
            quality: None,
            time_bonus: None,
        }
    });
    let player_id = value
        .get("playerId")
        .and_then(Value::as_str)
        .map(PlayerId::new);
    InboundEnvelope::PersonalScoreUpdate {
        player_id,
        breakdown,
    }
}

fn classify_game_state(value: &Value) -> Option<InboundEnvelope> {
    let payload = value.get("payload")?;
    match serde_json::from_value(payload.clone()) {
        Ok(mirror) => Some(InboundEnvelope::GameState(Box::new(mirror))),
        Err(e) => {
            warn!("Dropping malformed state update: {e}");
            None
        }
    }
}

fn classify_player_completion(value: &Value) -> Option<InboundEnvelope> {
    match value.get("playerId").and_then(Value::as_str) {
        Some(player) => Some(InboundEnvelope::PlayerCompletion(PlayerId::new(player))),
        None => {
            warn!("Dropping completion message without a playerId");
            None
        }
    }
}

/// Normalizes the three legacy AI-response shapes into one reply: the code
/// may be a bare string, an object with its own `code`/`completeCode` field,
/// or a separate top-level `completeCode` field.
fn normalize_ai_response(value: &Value) -> PromptReply {
    let text = value
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    let code = value
        .get("completeCode")
        .and_then(Value::as_str)
        .or_else(|| value.get("code").and_then(Value::as_str))
        .or_else(|| value.pointer("/code/completeCode").and_then(Value::as_str))
        .or_else(|| value.pointer("/code/code").and_then(Value::as_str))
        .unwrap_or_default()
        .to_owned();

    PromptReply { text, code }
}

fn error_message(value: &Value) -> String {
    value
        .pointer("/payload/message")
        .and_then(Value::as_str)
        .or_else(|| value.get("message").and_then(Value::as_str))
        .unwrap_or("Unknown error")
        .to_owned()
}
