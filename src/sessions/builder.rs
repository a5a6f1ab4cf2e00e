//! Builder for [`PuzzleSession`].

use tracing::debug;

use crate::error::SyncError;
use crate::mirror::Player;
use crate::network::transport::NonBlockingTransport;
use crate::sessions::config::{ReconnectConfig, RequestConfig};
use crate::sessions::puzzle_session::PuzzleSession;
use crate::GameId;

/// The `SessionBuilder` collects everything a [`PuzzleSession`] needs before
/// it starts: the session identity, the local player, the transport, and the
/// reconnection and request tunables.
///
/// # Examples
///
/// ```ignore
/// use mirror_sync::{GameId, Player, PlayerId, ReconnectConfig, SessionBuilder};
///
/// let me = Player {
///     id: PlayerId::new("p1"),
///     username: "alice".to_owned(),
///     picture: None,
/// };
/// let mut session = SessionBuilder::new(GameId::new("G1"), me)
///     .with_transport(transport)
///     .with_reconnect_config(ReconnectConfig::lan())
///     .start_session()?;
/// ```
pub struct SessionBuilder {
    game_id: GameId,
    local_player: Player,
    transport: Option<Box<dyn NonBlockingTransport>>,
    reconnect_config: ReconnectConfig,
    request_config: RequestConfig,
}

impl SessionBuilder {
    /// Creates a builder for the given session and local player identity.
    #[must_use]
    pub fn new(game_id: GameId, local_player: Player) -> Self {
        Self {
            game_id,
            local_player,
            transport: None,
            reconnect_config: ReconnectConfig::default(),
            request_config: RequestConfig::default(),
        }
    }

    /// Supplies the transport the session will own. Required.
    #[must_use]
    pub fn with_transport(mut self, transport: Box<dyn NonBlockingTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Overrides the reconnection tunables.
    #[must_use]
    pub fn with_reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect_config = config;
        self
    }

    /// Overrides the request-tracking tunables.
    #[must_use]
    pub fn with_request_config(mut self, config: RequestConfig) -> Self {
        self.request_config = config;
        self
    }

    /// Validates the configuration, consumes the builder, and starts the
    /// session. The session begins connecting immediately; poll it to make
    /// progress.
    ///
    /// # Errors
    /// - Returns [`InvalidRequest`] if no transport was supplied, the session
    ///   id or player id is empty, or a config value cannot work.
    ///
    /// [`InvalidRequest`]: SyncError::InvalidRequest
    pub fn start_session(self) -> Result<PuzzleSession, SyncError> {
        if self.game_id.is_empty() {
            return Err(SyncError::InvalidRequest {
                info: "the session id must not be empty".to_owned(),
            });
        }
        if self.local_player.id.as_str().is_empty() {
            return Err(SyncError::InvalidRequest {
                info: "the local player id must not be empty".to_owned(),
            });
        }
        self.reconnect_config.validate()?;
        self.request_config.validate()?;
        let transport = self.transport.ok_or_else(|| SyncError::InvalidRequest {
            info: "a transport is required; supply one via with_transport()".to_owned(),
        })?;

        debug!(
            "Starting session {} as player {}",
            self.game_id, self.local_player.id
        );
        PuzzleSession::new(
            self.game_id,
            self.local_player,
            transport,
            self.reconnect_config,
            self.request_config,
        )
    }
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("game_id", &self.game_id)
            .field("local_player", &self.local_player.id)
            .field("has_transport", &self.transport.is_some())
            .field("reconnect_config", &self.reconnect_config)
            .field("request_config", &self.request_config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlayerId;

    fn player() -> Player {
        Player {
            id: PlayerId::new("p1"),
            username: "alice".to_owned(),
            picture: None,
        }
    }

    #[test]
    fn missing_transport_is_rejected() {
        let result = SessionBuilder::new(GameId::new("G1"), player()).start_session();
        assert!(matches!(result, Err(SyncError::InvalidRequest { .. })));
    }

    #[test]
    fn empty_game_id_is_rejected() {
        let result = SessionBuilder::new(GameId::new(""), player()).start_session();
        assert!(matches!(result, Err(SyncError::InvalidRequest { .. })));
    }

    #[test]
    fn empty_player_id_is_rejected() {
        let mut anonymous = player();
        anonymous.id = PlayerId::new("");
        let result = SessionBuilder::new(GameId::new("G1"), anonymous).start_session();
        assert!(matches!(result, Err(SyncError::InvalidRequest { .. })));
    }
}
