//! Per-match mutable record: turn, rewards, logs, roles and termination.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ArenaError;
use crate::observation::{Info, Message, Observation, PlayerId, Sender};

/// Lifecycle of a [`State`].
///
/// `reset` is the only way into `InProgress`; nothing leaves `Terminal` except a fresh `reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Uninitialized,
    InProgress,
    Terminal,
}

/// Why a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The game's own rules ended it.
    GameOver,
    /// Nobody could make progress for too many consecutive turns.
    Stalemate,
    /// Maximum number of turns reached.
    TurnLimit,
    /// A player's illegal action ended the match.
    IllegalAction,
    /// An agent stopped answering.
    AgentFailure,
    /// The whole match ran out of time.
    MatchTimeout,
    /// The match loop hit a contract error.
    Error,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::GameOver => "game_over",
            TerminationReason::Stalemate => "stalemate",
            TerminationReason::TurnLimit => "turn_limit",
            TerminationReason::IllegalAction => "illegal_action",
            TerminationReason::AgentFailure => "agent_failure",
            TerminationReason::MatchTimeout => "match_timeout",
            TerminationReason::Error => "error",
        };
        f.write_str(s)
    }
}

/// Termination flag payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Termination {
    pub reason: TerminationReason,
    /// Player responsible, for `illegal_action` and `agent_failure`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub info: Info,
}

impl Termination {
    pub fn new(reason: TerminationReason) -> Self {
        Termination {
            reason,
            player: None,
            detail: None,
            info: Info::new(),
        }
    }

    pub fn with_player(mut self, player: PlayerId) -> Self {
        self.player = Some(player);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_info(mut self, info: Info) -> Self {
        self.info = info;
        self
    }
}

/// Mutable record of one match.
///
/// Once terminated, every mutator fails with [`ArenaError::Terminated`]. Rewards are only
/// ever incremented; [`State::reset`] is the only way to clear them.
#[derive(Debug, Clone, Default)]
pub struct State {
    phase: Phase,
    turn: u64,
    rewards: Vec<f64>,
    logs: Vec<Observation>,
    roles: BTreeMap<PlayerId, String>,
    termination: Option<Termination>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh logical match for `player_count` players: turn 0, zero rewards, empty logs.
    pub fn reset(&mut self, player_count: usize) {
        *self = State {
            phase: Phase::InProgress,
            turn: 0,
            rewards: vec![0.0; player_count],
            logs: vec![Observation::default(); player_count],
            roles: BTreeMap::new(),
            termination: None,
        };
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase == Phase::Terminal
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn player_count(&self) -> usize {
        self.rewards.len()
    }

    pub fn rewards(&self) -> &[f64] {
        &self.rewards
    }

    pub fn reward(&self, player: PlayerId) -> Option<f64> {
        self.rewards.get(player).copied()
    }

    pub fn role(&self, player: PlayerId) -> Option<&str> {
        self.roles.get(&player).map(String::as_str)
    }

    pub fn roles(&self) -> &BTreeMap<PlayerId, String> {
        &self.roles
    }

    pub fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    pub fn log(&self, player: PlayerId) -> Option<&Observation> {
        self.logs.get(player)
    }

    fn ensure_mutable(&self) -> Result<(), ArenaError> {
        match self.phase {
            Phase::Uninitialized => Err(ArenaError::NotStarted),
            Phase::InProgress => Ok(()),
            Phase::Terminal => Err(ArenaError::Terminated),
        }
    }

    pub(crate) fn ensure_player(&self, player: PlayerId) -> Result<(), ArenaError> {
        if player < self.rewards.len() {
            Ok(())
        } else {
            Err(ArenaError::InvalidPlayer {
                player,
                player_count: self.rewards.len(),
            })
        }
    }

    /// Increment `player`'s cumulative reward by a non-negative `amount`.
    pub fn grant(&mut self, player: PlayerId, amount: f64) -> Result<(), ArenaError> {
        self.ensure_mutable()?;
        self.ensure_player(player)?;
        if !amount.is_finite() || amount < 0.0 {
            return Err(ArenaError::config(format!(
                "rewards can only be incremented, got {amount} for player {player}"
            )));
        }
        self.rewards[player] += amount;
        Ok(())
    }

    /// Append `message` to the log of `player`.
    pub fn append(&mut self, player: PlayerId, message: Message) -> Result<(), ArenaError> {
        self.ensure_mutable()?;
        self.ensure_player(player)?;
        self.logs[player].push(message);
        Ok(())
    }

    /// Append `text` from `sender` to every player's log.
    pub fn broadcast(&mut self, sender: Sender, text: &str) -> Result<(), ArenaError> {
        self.ensure_mutable()?;
        for log in &mut self.logs {
            log.push(Message::new(sender, text));
        }
        Ok(())
    }

    /// Roles are only assigned while the match has not advanced past turn 0.
    pub fn set_role(&mut self, player: PlayerId, role: impl Into<String>) -> Result<(), ArenaError> {
        self.ensure_mutable()?;
        self.ensure_player(player)?;
        if self.turn > 0 {
            return Err(ArenaError::config("roles are fixed at reset"));
        }
        self.roles.insert(player, role.into());
        Ok(())
    }

    /// Close the current turn, ending the match with it when `termination` is set.
    ///
    /// The turn whose moves ended the match is counted like any other.
    pub(crate) fn complete_turn(
        &mut self,
        termination: Option<Termination>,
    ) -> Result<(), ArenaError> {
        self.ensure_mutable()?;
        self.turn += 1;
        if let Some(termination) = termination {
            self.termination = Some(termination);
            self.phase = Phase::Terminal;
        }
        Ok(())
    }

    /// Set the termination flag. Happens at most once per logical match.
    pub fn terminate(&mut self, termination: Termination) -> Result<(), ArenaError> {
        self.ensure_mutable()?;
        self.termination = Some(termination);
        self.phase = Phase::Terminal;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_is_uninitialized() {
        let mut state = State::new();
        assert_eq!(state.phase(), Phase::Uninitialized);
        assert_eq!(state.grant(0, 1.0), Err(ArenaError::NotStarted));
    }

    #[test]
    fn reset_clears_everything() {
        let mut state = State::new();
        state.reset(2);
        state.grant(1, 2.5).unwrap();
        state.broadcast(Sender::Game, "hello").unwrap();
        state.complete_turn(None).unwrap();
        state
            .terminate(Termination::new(TerminationReason::GameOver))
            .unwrap();

        state.reset(3);
        assert_eq!(state.phase(), Phase::InProgress);
        assert_eq!(state.turn(), 0);
        assert_eq!(state.rewards(), &[0.0, 0.0, 0.0]);
        assert!(state.log(0).unwrap().is_empty());
        assert!(state.termination().is_none());
    }

    #[test]
    fn rewards_only_increase() {
        let mut state = State::new();
        state.reset(2);
        assert!(state.grant(0, -1.0).is_err());
        assert!(state.grant(0, f64::NAN).is_err());
        state.grant(0, 1.0).unwrap();
        assert_eq!(state.reward(0), Some(1.0));
        assert!(matches!(
            state.grant(5, 1.0),
            Err(ArenaError::InvalidPlayer { player: 5, .. })
        ));
    }

    #[test]
    fn terminal_state_is_frozen() {
        let mut state = State::new();
        state.reset(2);
        state
            .terminate(Termination::new(TerminationReason::Stalemate))
            .unwrap();
        assert_eq!(state.grant(0, 1.0), Err(ArenaError::Terminated));
        assert_eq!(
            state.append(0, Message::new(Sender::Game, "late")),
            Err(ArenaError::Terminated)
        );
        assert_eq!(state.complete_turn(None), Err(ArenaError::Terminated));
        assert_eq!(
            state.terminate(Termination::new(TerminationReason::GameOver)),
            Err(ArenaError::Terminated)
        );
        assert_eq!(
            state.termination().map(|t| t.reason),
            Some(TerminationReason::Stalemate)
        );
    }

    #[test]
    fn closing_turn_is_counted() {
        let mut state = State::new();
        state.reset(2);
        state.complete_turn(None).unwrap();
        state
            .complete_turn(Some(Termination::new(TerminationReason::GameOver)))
            .unwrap();
        assert!(state.is_terminal());
        assert_eq!(state.turn(), 2);
        assert_eq!(state.complete_turn(None), Err(ArenaError::Terminated));
        assert_eq!(state.turn(), 2);
    }

    #[test]
    fn roles_are_fixed_after_first_turn() {
        let mut state = State::new();
        state.reset(2);
        state.set_role(0, "white").unwrap();
        state.complete_turn(None).unwrap();
        assert!(state.set_role(1, "black").is_err());
        assert_eq!(state.role(0), Some("white"));
    }

    #[test]
    fn reason_serializes_snake_case() {
        let json = serde_json::to_string(&TerminationReason::AgentFailure).unwrap();
        assert_eq!(json, "\"agent_failure\"");
        assert_eq!(TerminationReason::TurnLimit.to_string(), "turn_limit");
    }
}
