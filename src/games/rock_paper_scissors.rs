use std::ops::RangeInclusive;

use serde_json::json;

use super::{option_u64, unbracket};
use crate::error::ArenaError;
use crate::game_interface::{Game, GameConfig, GameContext, IllegalActionPolicy};
use crate::observation::{Action, Info, PlayerId};
use crate::scheduler::TurnMode;
use crate::state::State;

const CHOICES: [&str; 3] = ["rock", "paper", "scissors"];

/// Best-of-`rounds` rock-paper-scissors. Both players move simultaneously.
///
/// The match winner gets 1, a drawn match gives 0.5 each. An unknown move ends the match in
/// favor of the opponent.
#[derive(Debug, Clone)]
pub struct RockPaperScissors {
    rounds: u64,
    wins: [u32; 2],
}

impl RockPaperScissors {
    pub const ID: &'static str = "rock_paper_scissors";

    pub fn new(rounds: u64) -> Self {
        RockPaperScissors {
            rounds: rounds.max(1),
            wins: [0; 2],
        }
    }

    pub fn from_config(config: &GameConfig) -> Result<Self, ArenaError> {
        Ok(Self::new(option_u64(config, "rounds", 3)?))
    }

    fn beats(a: &str, b: &str) -> bool {
        matches!(
            (a, b),
            ("rock", "scissors") | ("paper", "rock") | ("scissors", "paper")
        )
    }
}

impl Default for RockPaperScissors {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Game for RockPaperScissors {
    fn name(&self) -> &str {
        Self::ID
    }

    fn players(&self) -> RangeInclusive<usize> {
        2..=2
    }

    fn mode(&self) -> TurnMode {
        TurnMode::Simultaneous
    }

    fn illegal_action_policy(&self) -> IllegalActionPolicy {
        IllegalActionPolicy::Terminate { award: 1.0 }
    }

    fn setup(&mut self, ctx: &mut GameContext<'_>) -> Result<(), ArenaError> {
        self.wins = [0; 2];
        ctx.broadcast(format!(
            "Rock-paper-scissors, best of {}. Submit [rock], [paper] or [scissors].",
            self.rounds
        ))
    }

    fn validate(&self, _player: PlayerId, action: &Action, _state: &State) -> Result<(), String> {
        let choice = unbracket(&action.text);
        if CHOICES.contains(&choice.as_str()) {
            Ok(())
        } else {
            Err(format!("`{}` is not one of {CHOICES:?}", action.text))
        }
    }

    fn apply(
        &mut self,
        moves: &[(PlayerId, Option<Action>)],
        ctx: &mut GameContext<'_>,
    ) -> Result<(), ArenaError> {
        let choice = |p: PlayerId| {
            moves
                .iter()
                .find(|(player, _)| *player == p)
                .and_then(|(_, a)| a.as_ref())
                .map(|a| unbracket(&a.text))
        };
        let (a, b) = (choice(0), choice(1));
        for (player, c) in [(0, &a), (1, &b)] {
            ctx.announce(player, c.as_deref().unwrap_or("<pass>"))?;
        }

        let round_winner = match (&a, &b) {
            (Some(a), Some(b)) if Self::beats(a, b) => Some(0),
            (Some(a), Some(b)) if Self::beats(b, a) => Some(1),
            (Some(_), None) => Some(0),
            (None, Some(_)) => Some(1),
            _ => None,
        };
        let round = ctx.turn() + 1;
        match round_winner {
            Some(w) => {
                self.wins[w] += 1;
                ctx.broadcast(format!("Round {round}: Player {w} wins."))?;
            }
            None => ctx.broadcast(format!("Round {round}: draw."))?,
        }

        let needed = self.rounds / 2 + 1;
        let decided = self.wins.iter().any(|&w| u64::from(w) >= needed);
        if decided || round >= self.rounds {
            let info: Info = [("wins".to_string(), json!(self.wins))].into_iter().collect();
            if self.wins[0] == self.wins[1] {
                ctx.grant(0, 0.5)?;
                ctx.grant(1, 0.5)?;
            } else {
                let winner = if self.wins[0] > self.wins[1] { 0 } else { 1 };
                ctx.grant(winner, 1.0)?;
            }
            ctx.finish(info)?;
        }
        Ok(())
    }

    fn render(&self, state: &State) -> Option<String> {
        Some(format!(
            "round {} score {}-{}",
            state.turn(),
            self.wins[0],
            self.wins[1]
        ))
    }
}
