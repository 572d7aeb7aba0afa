use std::ops::RangeInclusive;

use serde_json::json;

use super::{option_u64, unbracket};
use crate::error::ArenaError;
use crate::game_interface::{Game, GameConfig, GameContext, IllegalActionPolicy};
use crate::observation::{Action, Info, PlayerId};
use crate::state::State;

/// Take-away (single pile Nim): players take 1 to 3 stones in turn, whoever takes the last
/// stone wins 1.
#[derive(Debug, Clone)]
pub struct TakeAway {
    initial: u64,
    stones: u64,
}

impl TakeAway {
    pub const ID: &'static str = "take_away";
    const MAX_TAKE: u64 = 3;

    pub fn new(stones: u64) -> Self {
        TakeAway {
            initial: stones,
            stones,
        }
    }

    pub fn from_config(config: &GameConfig) -> Result<Self, ArenaError> {
        Ok(Self::new(option_u64(config, "stones", 15)?))
    }

    pub fn stones(&self) -> u64 {
        self.stones
    }
}

impl Game for TakeAway {
    fn name(&self) -> &str {
        Self::ID
    }

    fn players(&self) -> RangeInclusive<usize> {
        2..=4
    }

    fn illegal_action_policy(&self) -> IllegalActionPolicy {
        IllegalActionPolicy::Resubmit
    }

    fn setup(&mut self, ctx: &mut GameContext<'_>) -> Result<(), ArenaError> {
        self.stones = self.initial;
        for player in 0..ctx.player_count() {
            ctx.set_role(player, format!("seat {player}"))?;
        }
        ctx.broadcast(format!(
            "{} stones on the table. Take 1 to {} per turn, e.g. [2]. Taking the last stone wins.",
            self.stones,
            Self::MAX_TAKE
        ))
    }

    fn has_legal_action(&self, _player: PlayerId, _state: &State) -> bool {
        self.stones > 0
    }

    fn validate(&self, _player: PlayerId, action: &Action, _state: &State) -> Result<(), String> {
        let n = unbracket(&action.text)
            .parse::<u64>()
            .map_err(|_| format!("`{}` is not a number", action.text))?;
        if n == 0 || n > Self::MAX_TAKE {
            return Err(format!("must take between 1 and {}", Self::MAX_TAKE));
        }
        if n > self.stones {
            return Err(format!("only {} stones left", self.stones));
        }
        Ok(())
    }

    fn apply(
        &mut self,
        moves: &[(PlayerId, Option<Action>)],
        ctx: &mut GameContext<'_>,
    ) -> Result<(), ArenaError> {
        for (player, action) in moves {
            let Some(action) = action else {
                ctx.announce(*player, "<pass>")?;
                continue;
            };
            let n = unbracket(&action.text)
                .parse::<u64>()
                .map_err(|e| ArenaError::InvalidAction {
                    player: *player,
                    reason: e.to_string(),
                })?;
            self.stones -= n.min(self.stones);
            ctx.announce(*player, format!("takes {n}"))?;
            ctx.broadcast(format!("{} stones left.", self.stones))?;
            if self.stones == 0 {
                ctx.grant(*player, 1.0)?;
                let info: Info = [("winner".to_string(), json!(player))].into_iter().collect();
                return ctx.finish(info);
            }
        }
        Ok(())
    }

    fn render(&self, _state: &State) -> Option<String> {
        Some(format!("stones: {}", self.stones))
    }
}
