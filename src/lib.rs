//! # Turn Arena
//!
//! A modular Rust crate for running competitive, turn-based text games between agents: language
//! models behind network APIs, scripted policies or humans.
//!
//! It provides:
//! - The [`Environment`](crate::environment::Environment) contract (`reset`, `step`,
//!   `get_observation`, `close`) and a generic state machine implementing it for any
//!   [`Game`](crate::game_interface::Game)
//! - Sequential and simultaneous turn scheduling with stalemate detection
//! - Composable [`Wrapper`](crate::wrappers::Wrapper)s layering behavior onto any environment
//! - An async [`Agent`](crate::agent::Agent) contract with timeouts and bounded retries
//! - The [`Arena`](crate::arena::Arena), running many matches concurrently and collecting one
//!   result per match
//!
//! # Documentation Overview
//!
//! - For the match lifecycle and its invariants, see the [`environment`] and [`state`] modules.
//! - For plugging a game in, implement [`Game`](crate::game_interface::Game) and register a
//!   [`GameFactory`](crate::game_interface::GameFactory) in a [`Registry`](crate::registry::Registry).
//! - For configuring runs, see [`ArenaConfig`](crate::configuration::ArenaConfig) and the
//!   [`TournamentStrategy`](crate::tournament_strategy::TournamentStrategy) implementations.
//!
//! # Usage Example
//!
//! Driving an environment by hand:
//!
//! ```
//! use turn_arena::prelude::*;
//!
//! let mut env = GameEnvironment::new(TakeAway::new(4), 2, GameConfig::new());
//! env.reset(0)?;
//! assert_eq!(env.active_players(), vec![0]);
//! env.step(0, Action::new("[3]"))?;
//! let outcome = env.step(1, Action::new("[1]"))?;
//! assert!(outcome.done);
//! assert_eq!(outcome.turn, 2);
//! assert_eq!(env.state().rewards(), &[0.0, 1.0]);
//! # Ok::<(), ArenaError>(())
//! ```
//!
//! See the [`arena`] module for running a whole tournament.

pub mod agent;
pub mod arena;
pub mod configuration;
pub mod contestant;
pub mod environment;
pub mod error;
pub mod game_interface;
pub mod games;
pub mod human;
mod logger;
pub mod match_runner;
pub mod observation;
pub mod records;
pub mod registry;
pub mod remote;
pub mod results;
pub mod scheduler;
pub mod state;
mod tournament_scheduler;
pub mod tournament_strategy;
pub mod wrappers;

pub use anyhow;

/// Commonly used types and traits for quick access.
///
/// ```rust
/// use turn_arena::prelude::*;
/// ```
pub mod prelude {
    pub use crate::agent::{decide, Agent, CallPolicy, FnAgent, ScriptedAgent};
    pub use crate::arena::{Arena, RunReport};
    pub use crate::configuration::{ArenaConfig, FailurePolicy};
    pub use crate::contestant::{AgentSpec, Contestant};
    pub use crate::environment::{Environment, GameEnvironment, StepOutcome};
    pub use crate::error::{AgentError, ArenaError};
    pub use crate::game_interface::{Game, GameConfig, GameContext, GameFactory, IllegalActionPolicy};
    pub use crate::games::{RockPaperScissors, TakeAway};
    pub use crate::observation::{Action, Observation, PlayerId};
    pub use crate::registry::Registry;
    pub use crate::results::{MatchResult, Standing};
    pub use crate::scheduler::TurnMode;
    pub use crate::state::{State, Termination, TerminationReason};
    pub use crate::tournament_strategy::*;
    pub use crate::wrappers::{Wrapped, Wrapper};
}
