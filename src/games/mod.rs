//! Reference games exercising the environment contract.
//!
//! They are deliberately tiny: one simultaneous game and one sequential game, used by the
//! command line runner and the test suite.

mod rock_paper_scissors;
mod take_away;

pub use rock_paper_scissors::RockPaperScissors;
pub use take_away::TakeAway;

use crate::environment::{Environment, GameEnvironment};
use crate::error::ArenaError;
use crate::game_interface::GameConfig;
use crate::registry::Registry;

/// Register every reference game under its identifier.
pub fn register(registry: &mut Registry) -> Result<(), ArenaError> {
    registry.register_game(
        RockPaperScissors::ID,
        |player_count: usize, config: &GameConfig| -> Result<Box<dyn Environment>, ArenaError> {
            let game = RockPaperScissors::from_config(config)?;
            Ok(Box::new(GameEnvironment::new(game, player_count, config.clone())))
        },
    )?;
    registry.register_game(
        TakeAway::ID,
        |player_count: usize, config: &GameConfig| -> Result<Box<dyn Environment>, ArenaError> {
            let game = TakeAway::from_config(config)?;
            Ok(Box::new(GameEnvironment::new(game, player_count, config.clone())))
        },
    )?;
    Ok(())
}

/// Accepts `rock`, `[rock]` or ` [Rock] `.
fn unbracket(text: &str) -> String {
    text.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim()
        .to_lowercase()
}

fn option_u64(config: &GameConfig, key: &str, default: u64) -> Result<u64, ArenaError> {
    match config.option(key) {
        None => Ok(default),
        Some(v) => v
            .as_u64()
            .filter(|&n| n > 0)
            .ok_or_else(|| ArenaError::config(format!("option `{key}` must be a positive integer"))),
    }
}
