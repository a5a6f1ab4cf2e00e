//! Wire payloads for the puzzle-session protocol.
//!
//! Outbound payloads are small serde structs published as JSON to hierarchical
//! destinations. Inbound traffic is only partially tagged on the wire, so it
//! is classified once, at the router boundary, into the [`InboundEnvelope`]
//! union; all downstream logic switches on this union and never on raw field
//! presence.

use serde::{Deserialize, Serialize};

use crate::mirror::SessionMirror;
use crate::{GameId, PlayerId, Round};

/// Membership assertion published before every mutating action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JoinPayload {
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitPayload {
    pub player_id: PlayerId,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlayerOnlyPayload {
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CodeUpdatePayload {
    pub player_id: PlayerId,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NextRoundPayload {
    pub player_id: PlayerId,
    pub game_id: GameId,
    pub current_round: Round,
    pub expected_next_round: Round,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptPayload {
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub prompt: String,
}

/// The score detail carried by a personal score update.
///
/// The component scores are optional because older servers only send the
/// total.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    /// The total score awarded for the submission.
    pub score: u32,
    /// Correctness component, if reported.
    #[serde(default, rename = "correctnessScore")]
    pub correctness: Option<u32>,
    /// Quality component, if reported.
    #[serde(default, rename = "qualityScore")]
    pub quality: Option<u32>,
    /// Time bonus component, if reported.
    #[serde(default)]
    pub time_bonus: Option<u32>,
}

/// A normalized AI response.
///
/// The wire carries three legacy shapes for the code part (a bare string, an
/// object-nested string, and a separate `completeCode` field); the router
/// folds them all into this one struct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptReply {
    /// The assistant's prose answer.
    pub text: String,
    /// The assistant's code suggestion, possibly empty.
    pub code: String,
}

/// Every inbound message, after classification at the router boundary.
///
/// Messages for foreign sessions never make it into an envelope; they are
/// discarded before classification.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEnvelope {
    /// A broadcast session state update.
    GameState(Box<SessionMirror>),
    /// An AI response for the local player.
    AiResponse(PromptReply),
    /// A private score update for the local player. Distinguished from
    /// broadcast state purely by field presence; the wire carries no type
    /// tag for it.
    PersonalScoreUpdate {
        /// The player the server scored, if reported.
        player_id: Option<PlayerId>,
        /// Total score and optional components.
        breakdown: ScoreBreakdown,
    },
    /// A player finished the current puzzle.
    PlayerCompletion(PlayerId),
    /// A bare acknowledgement of a solution submission.
    SubmitAck,
    /// A server-reported error.
    Error(String),
    /// An unrecognized shape; logged and dropped.
    Untyped,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn join_payload_serializes_camel_case() {
        let payload = JoinPayload {
            game_id: GameId::new("G1"),
            player_id: PlayerId::new("p1"),
            username: "alice".to_owned(),
            picture: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["gameId"], "G1");
        assert_eq!(value["playerId"], "p1");
        assert!(value.get("picture").is_none());
    }

    #[test]
    fn next_round_payload_carries_round_expectations() {
        let payload = NextRoundPayload {
            player_id: PlayerId::new("p1"),
            game_id: GameId::new("G1"),
            current_round: Round::new(2),
            expected_next_round: Round::new(3),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["currentRound"], 2);
        assert_eq!(value["expectedNextRound"], 3);
    }

    #[test]
    fn score_breakdown_reads_wire_field_names() {
        let breakdown: ScoreBreakdown = serde_json::from_value(serde_json::json!({
            "score": 42,
            "correctnessScore": 80,
            "qualityScore": 70,
            "timeBonus": 10
        }))
        .unwrap();
        assert_eq!(breakdown.score, 42);
        assert_eq!(breakdown.correctness, Some(80));
        assert_eq!(breakdown.quality, Some(70));
        assert_eq!(breakdown.time_bonus, Some(10));
    }

    #[test]
    fn score_breakdown_components_are_optional() {
        let breakdown: ScoreBreakdown =
            serde_json::from_value(serde_json::json!({ "score": 7 })).unwrap();
        assert_eq!(breakdown.score, 7);
        assert_eq!(breakdown.correctness, None);
    }
}
