//! What players see and what they send back.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Seat index of a player inside one match, `0..player_count`.
pub type PlayerId = usize;

/// Free-form key/value payload attached to step outcomes, terminations and actions.
pub type Info = Map<String, Value>;

/// Author of an observation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// The game master.
    Game,
    /// Another (or the same) player.
    Player(PlayerId),
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::Game => write!(f, "GAME"),
            Sender::Player(id) => write!(f, "Player {id}"),
        }
    }
}

/// One line of a player's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub text: String,
}

impl Message {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Message {
            sender,
            text: text.into(),
        }
    }
}

/// Ordered `(sender, message)` log visible to one player.
///
/// This is a log, not a snapshot: entries are appended and never rewritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    entries: Vec<Message>,
}

impl Observation {
    pub fn new(entries: Vec<Message>) -> Self {
        Observation { entries }
    }

    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent entry, if any.
    pub fn last(&self) -> Option<&Message> {
        self.entries.last()
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.entries.push(message);
    }

    /// Keep only the `n` most recent entries.
    pub fn tail(mut self, n: usize) -> Self {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.drain(..skip);
        self
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, m) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "[{}] {}", m.sender, m.text)?;
        }
        Ok(())
    }
}

/// Opaque payload submitted by one player for one turn.
///
/// Validity is game-specific and checked inside the environment's `step`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub text: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Info,
}

impl Action {
    pub fn new(text: impl Into<String>) -> Self {
        Action {
            text: text.into(),
            fields: Map::new(),
        }
    }

    /// Attach a structured field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl From<&str> for Action {
    fn from(text: &str) -> Self {
        Action::new(text)
    }
}

impl From<String> for Action {
    fn from(text: String) -> Self {
        Action::new(text)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}
