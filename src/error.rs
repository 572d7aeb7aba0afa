//! Error taxonomy shared by environments, schedulers, agents and the arena.

use thiserror::Error;

use crate::observation::PlayerId;

/// Errors surfaced by the environment contract and the arena.
///
/// `Configuration` is fatal at construction and never retried. `InvalidPlayer`,
/// `TurnViolation`, `NotStarted` and `Terminated` are caller misuse of the contract.
/// `InvalidAction` is a rule violation handled per game, and `AgentUnavailable` is
/// escalated to the arena once an agent exhausted its retries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArenaError {
    /// Bad player count, unknown game id, malformed descriptor, ...
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `player` is not seated in this match.
    #[error("player {player} is not part of this match ({player_count} players)")]
    InvalidPlayer {
        /// Offending player id.
        player: PlayerId,
        /// Number of seats in the match.
        player_count: usize,
    },

    /// `player` tried to act while not active.
    #[error("player {player} acted out of turn (active: {active:?})")]
    TurnViolation {
        /// Offending player id.
        player: PlayerId,
        /// Players allowed to act right now.
        active: Vec<PlayerId>,
    },

    /// The action is malformed or illegal in the current state.
    #[error("invalid action from player {player}: {reason}")]
    InvalidAction {
        /// Offending player id.
        player: PlayerId,
        /// Game-provided explanation.
        reason: String,
    },

    /// The agent failed or timed out more than its retry policy allows.
    #[error("agent {agent} unavailable: {reason}")]
    AgentUnavailable {
        /// Agent name.
        agent: String,
        /// Last failure.
        reason: String,
    },

    /// The environment was used before `reset`.
    #[error("environment has not been reset")]
    NotStarted,

    /// The environment is terminal; only reads and `reset` are allowed.
    #[error("match is already terminated")]
    Terminated,
}

impl ArenaError {
    /// Build a [`ArenaError::Configuration`] from anything printable.
    pub fn config(msg: impl Into<String>) -> Self {
        ArenaError::Configuration(msg.into())
    }
}

/// Failure of a single agent call. Retried according to the agent's call policy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// No answer before the per-call timeout.
    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),

    /// The other end of the connection went away.
    #[error("connection closed")]
    Disconnected,

    /// Any backend-specific failure.
    #[error("{0}")]
    Backend(String),
}
