//! Shared test fixtures: a scriptable in-memory transport and session
//! helpers.

#![allow(dead_code)] // not every test binary uses every helper

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use mirror_sync::{
    GameId, LinkStatus, NonBlockingTransport, Player, PlayerId, PuzzleSession, ReconnectConfig,
    RequestConfig, SessionBuilder, TransportClosed,
};

struct MockState {
    status: LinkStatus,
    /// Scripted outcome per open() call; missing entries mean success.
    open_script: VecDeque<bool>,
    opens: usize,
    subscriptions: Vec<String>,
    published: Vec<(String, Value)>,
    inbound: VecDeque<(String, Value)>,
    fail_publishes: bool,
}

/// Controller half of the mock transport. Clone it freely; the transport
/// half moves into the session.
#[derive(Clone)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    /// Creates a controller plus the transport to hand to the builder.
    pub fn new() -> (Self, Box<dyn NonBlockingTransport>) {
        let state = Arc::new(Mutex::new(MockState {
            status: LinkStatus::Down,
            open_script: VecDeque::new(),
            opens: 0,
            subscriptions: Vec::new(),
            published: Vec::new(),
            inbound: VecDeque::new(),
            fail_publishes: false,
        }));
        let link = Self {
            state: Arc::clone(&state),
        };
        (link, Box::new(MockTransport { state }))
    }

    /// Scripts the outcome of the next open() calls; `false` entries fail.
    pub fn script_opens(&self, outcomes: &[bool]) {
        let mut state = self.state.lock();
        state.open_script = outcomes.iter().copied().collect();
    }

    /// Queues an inbound message as if the server had published it.
    pub fn deliver(&self, destination: &str, payload: Value) {
        self.state
            .lock()
            .inbound
            .push_back((destination.to_owned(), payload));
    }

    /// Silently kills the link: no close event, status just goes down.
    pub fn kill_link(&self) {
        self.state.lock().status = LinkStatus::Down;
    }

    /// Makes every publish fail until cleared.
    pub fn fail_publishes(&self, fail: bool) {
        self.state.lock().fail_publishes = fail;
    }

    pub fn status(&self) -> LinkStatus {
        self.state.lock().status
    }

    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().subscriptions.clone()
    }

    /// Every publish so far, in order.
    pub fn published(&self) -> Vec<(String, Value)> {
        self.state.lock().published.clone()
    }

    /// Destinations published so far, in order.
    pub fn published_destinations(&self) -> Vec<String> {
        self.state
            .lock()
            .published
            .iter()
            .map(|(d, _)| d.clone())
            .collect()
    }

    /// How many publishes went to the given destination.
    pub fn publishes_to(&self, destination: &str) -> usize {
        self.state
            .lock()
            .published
            .iter()
            .filter(|(d, _)| d == destination)
            .count()
    }
}

struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl NonBlockingTransport for MockTransport {
    fn open(&mut self) {
        let mut state = self.state.lock();
        state.opens += 1;
        let up = state.open_script.pop_front().unwrap_or(true);
        state.status = if up { LinkStatus::Up } else { LinkStatus::Down };
    }

    fn close(&mut self) {
        self.state.lock().status = LinkStatus::Down;
    }

    fn link_status(&self) -> LinkStatus {
        self.state.lock().status
    }

    fn subscribe(&mut self, destination: &str) {
        self.state.lock().subscriptions.push(destination.to_owned());
    }

    fn unsubscribe(&mut self, destination: &str) {
        let mut state = self.state.lock();
        state.subscriptions.retain(|d| d != destination);
    }

    fn publish(&mut self, destination: &str, payload: &Value) -> Result<(), TransportClosed> {
        let mut state = self.state.lock();
        if state.fail_publishes || state.status != LinkStatus::Up {
            return Err(TransportClosed);
        }
        state.published.push((destination.to_owned(), payload.clone()));
        Ok(())
    }

    fn receive_all_messages(&mut self) -> Vec<(String, Value)> {
        self.state.lock().inbound.drain(..).collect()
    }
}

/// Reconnect tunables shrunk to test scale.
pub fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        max_attempts: 5,
        retry_delay: Duration::from_millis(2),
        connect_timeout: Duration::from_millis(10),
        health_check_interval: Duration::from_millis(5),
    }
}

/// Request tunables shrunk to test scale.
pub fn fast_requests() -> RequestConfig {
    RequestConfig {
        settle_delay: Duration::from_millis(20),
        confirm_timeout: Duration::from_millis(100),
        fallback_publish: false,
        fallback_delay: Duration::from_millis(5),
    }
}

pub fn local_player() -> Player {
    Player {
        id: PlayerId::new("p1"),
        username: "alice".to_owned(),
        picture: None,
    }
}

/// Builds a session on a fresh mock link with test-scale tunables.
pub fn mock_session() -> (PuzzleSession, MockLink) {
    mock_session_with(fast_reconnect(), fast_requests())
}

/// Routes crate logs into the test harness output. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn mock_session_with(
    reconnect: ReconnectConfig,
    requests: RequestConfig,
) -> (PuzzleSession, MockLink) {
    init_tracing();
    let (link, transport) = MockLink::new();
    let session = SessionBuilder::new(GameId::new("G1"), local_player())
        .with_transport(transport)
        .with_reconnect_config(reconnect)
        .with_request_config(requests)
        .start_session()
        .expect("session must build");
    (session, link)
}

/// Polls the session `rounds` times with a small sleep between rounds.
pub fn pump(session: &mut PuzzleSession, rounds: usize) {
    for _ in 0..rounds {
        session.poll();
        std::thread::sleep(Duration::from_millis(3));
    }
}

/// A broadcast state update for game `game` at `round` with two players.
pub fn state_message(game: &str, round: u32) -> Value {
    json!({
        "type": "GAME_STATE",
        "payload": {
            "id": game,
            "players": [
                { "id": "p1", "username": "alice" },
                { "id": "p2", "username": "bob" }
            ],
            "currentRound": round,
            "totalRounds": 5,
            "currentTurn": "p1",
            "puzzle": { "id": "z1", "name": "Reverse", "description": "d", "content": "c" },
            "playerStatus": {
                "p1": { "score": 10, "hasCompleted": false },
                "p2": { "score": 20, "hasCompleted": false }
            },
            "state": "IN_PROGRESS"
        }
    })
}

/// The broadcast topic for the test game.
pub fn topic() -> String {
    "/topic/game/G1".to_owned()
}

/// The local player's private queue.
pub fn private_queue() -> String {
    "/user/p1/queue/game".to_owned()
}

/// Drives the session until it is connected and has mirrored `round`.
pub fn connect_and_sync(session: &mut PuzzleSession, link: &MockLink, round: u32) {
    pump(session, 3);
    assert!(
        session.snapshot().is_none(),
        "mirror must start empty before the first state update"
    );
    link.deliver(&topic(), state_message("G1", round));
    pump(session, 2);
    assert!(session.snapshot().is_some(), "state update must be accepted");
}
