//! Text codec for STOMP 1.2 frames.
//!
//! The production transport speaks STOMP over WebSocket. A frame is a
//! command line, zero or more `name:value` header lines, a blank line, and a
//! body terminated by a NUL octet:
//!
//! ```text
//! SEND
//! destination:/app/game/G1/submit
//! content-type:application/json
//!
//! {"playerId":"p1","code":"..."}\0
//! ```
//!
//! Header names and values are escaped in every frame except `CONNECT` and
//! `CONNECTED`, per the STOMP 1.2 specification. A frame consisting of a
//! single end-of-line is a heartbeat; [`StompFrame::parse`] reports it as
//! `Ok(None)`.

use std::error::Error;
use std::fmt;

/// A single end-of-line, sent as a heartbeat to keep the link warm.
pub const HEARTBEAT: &str = "\n";

/// The STOMP commands this client uses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StompCommand {
    /// Client handshake.
    Connect,
    /// Server handshake acknowledgement.
    Connected,
    /// Client publish.
    Send,
    /// Client subscription registration.
    Subscribe,
    /// Client subscription withdrawal.
    Unsubscribe,
    /// Server message delivery.
    Message,
    /// Server-reported protocol error; the server closes the link after it.
    Error,
    /// Client teardown.
    Disconnect,
    /// Server receipt acknowledgement.
    Receipt,
}

impl StompCommand {
    /// The wire spelling of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            StompCommand::Connect => "CONNECT",
            StompCommand::Connected => "CONNECTED",
            StompCommand::Send => "SEND",
            StompCommand::Subscribe => "SUBSCRIBE",
            StompCommand::Unsubscribe => "UNSUBSCRIBE",
            StompCommand::Message => "MESSAGE",
            StompCommand::Error => "ERROR",
            StompCommand::Disconnect => "DISCONNECT",
            StompCommand::Receipt => "RECEIPT",
        }
    }

    fn from_line(line: &str) -> Option<Self> {
        match line {
            "CONNECT" => Some(StompCommand::Connect),
            "CONNECTED" => Some(StompCommand::Connected),
            "SEND" => Some(StompCommand::Send),
            "SUBSCRIBE" => Some(StompCommand::Subscribe),
            "UNSUBSCRIBE" => Some(StompCommand::Unsubscribe),
            "MESSAGE" => Some(StompCommand::Message),
            "ERROR" => Some(StompCommand::Error),
            "DISCONNECT" => Some(StompCommand::Disconnect),
            "RECEIPT" => Some(StompCommand::Receipt),
            _ => None,
        }
    }

    /// Whether header escaping applies to this frame. The handshake frames
    /// are exempt per STOMP 1.2.
    const fn escapes_headers(self) -> bool {
        !matches!(self, StompCommand::Connect | StompCommand::Connected)
    }
}

impl fmt::Display for StompCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur while parsing a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StompParseError {
    /// The input was empty (and not a heartbeat).
    MissingCommand,
    /// The command line was not a known STOMP command.
    UnknownCommand(String),
    /// A header line had no colon separator.
    MalformedHeader(String),
    /// A header value used an escape sequence the spec does not define.
    InvalidEscape(String),
}

impl fmt::Display for StompParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StompParseError::MissingCommand => write!(f, "frame has no command line"),
            StompParseError::UnknownCommand(line) => {
                write!(f, "unknown STOMP command: {line:?}")
            }
            StompParseError::MalformedHeader(line) => {
                write!(f, "malformed STOMP header: {line:?}")
            }
            StompParseError::InvalidEscape(value) => {
                write!(f, "invalid escape sequence in header: {value:?}")
            }
        }
    }
}

impl Error for StompParseError {}

/// One STOMP frame: a command, ordered headers, and a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    /// The frame command.
    pub command: StompCommand,
    /// Headers in wire order. Repeated names keep the first occurrence as
    /// authoritative, as the spec requires.
    pub headers: Vec<(String, String)>,
    /// The frame body. Empty for most client frames.
    pub body: String,
}

impl StompFrame {
    /// Creates an empty frame for the given command.
    #[must_use]
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the first value of the named header, if present.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The client handshake frame.
    #[must_use]
    pub fn connect(host: &str, heartbeat_ms: u64) -> Self {
        Self::new(StompCommand::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", format!("{heartbeat_ms},{heartbeat_ms}"))
    }

    /// A subscription registration.
    #[must_use]
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(StompCommand::Subscribe)
            .header("id", id)
            .header("destination", destination)
    }

    /// A subscription withdrawal.
    #[must_use]
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(StompCommand::Unsubscribe).header("id", id)
    }

    /// A JSON publish to the given destination.
    #[must_use]
    pub fn send_json(destination: &str, payload: &serde_json::Value) -> Self {
        Self::new(StompCommand::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .with_body(payload.to_string())
    }

    /// The client teardown frame.
    #[must_use]
    pub fn disconnect() -> Self {
        Self::new(StompCommand::Disconnect)
    }

    /// Encodes the frame for the wire, including the NUL terminator.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parses one frame. `Ok(None)` means the input was a heartbeat.
    pub fn parse(input: &str) -> Result<Option<Self>, StompParseError> {
        let input = input.strip_suffix('\0').unwrap_or(input);
        if input.is_empty() || input == "\n" || input == "\r\n" {
            return Ok(None);
        }

        let (head, body) = match input
            .split_once("\r\n\r\n")
            .or_else(|| input.split_once("\n\n"))
        {
            Some((head, body)) => (head, body),
            None => (input, ""),
        };

        let mut lines = head.lines().map(|line| line.strip_suffix('\r').unwrap_or(line));
        let command_line = lines.next().ok_or(StompParseError::MissingCommand)?;
        let command = StompCommand::from_line(command_line)
            .ok_or_else(|| StompParseError::UnknownCommand(command_line.to_owned()))?;

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| StompParseError::MalformedHeader(line.to_owned()))?;
            if command.escapes_headers() {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_owned(), value.to_owned()));
            }
        }

        Ok(Some(Self {
            command,
            headers,
            body: body.to_owned(),
        }))
    }
}

impl fmt::Display for StompFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} frame ({} headers)", self.command, self.headers.len())
    }
}

fn push_escaped(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str) -> Result<String, StompParseError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            _ => return Err(StompParseError::InvalidEscape(raw.to_owned())),
        }
    }
    Ok(out)
}
