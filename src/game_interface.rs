//! Module defining traits that need to be implemented to plug a game into the arena

use std::ops::RangeInclusive;

use rand::rngs::SmallRng;

use crate::environment::Environment;
use crate::error::ArenaError;
use crate::observation::{Action, Info, Message, PlayerId, Sender};
use crate::scheduler::TurnMode;
use crate::state::{State, Termination, TerminationReason};

/// What happens when a player submits an action its game rejects.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum IllegalActionPolicy {
    /// `step` fails with [`ArenaError::InvalidAction`]; nothing changes and the player stays
    /// active, so the caller may submit again.
    #[default]
    Resubmit,
    /// Every opponent is granted `penalty` and the offending move counts as a pass.
    Penalize { penalty: f64 },
    /// Every opponent is granted `award` and the match ends with `illegal_action`.
    Terminate { award: f64 },
}

/// Per-match game configuration handed to factories.
#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    pub(crate) max_turns: Option<u64>,
    pub(crate) stalemate_limit: usize,
    pub(crate) options: Info,
}

impl GameConfig {
    /// Default configuration: no turn cap besides the game's own, stalemate after 8
    /// consecutive turns without progress, no options.
    pub fn new() -> Self {
        GameConfig {
            max_turns: None,
            stalemate_limit: 8,
            options: Info::new(),
        }
    }

    /// Cap the number of turns. The tighter of this and [`Game::max_turns`] applies.
    pub fn with_max_turns(mut self, max_turns: u64) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    /// Consecutive stalled turns tolerated before forcing a `stalemate`.
    pub fn with_stalemate_limit(mut self, limit: usize) -> Self {
        self.stalemate_limit = limit;
        self
    }

    /// Game-specific option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn max_turns(&self) -> Option<u64> {
        self.max_turns
    }

    pub fn stalemate_limit(&self) -> usize {
        self.stalemate_limit
    }

    pub fn option(&self, key: &str) -> Option<&serde_json::Value> {
        self.options.get(key)
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The only handle a [`Game`] gets on the match state.
///
/// All mutations go through [`State`]'s checked mutators, so a game can never revoke a reward
/// or write past termination.
pub struct GameContext<'a> {
    state: &'a mut State,
    rng: &'a mut SmallRng,
    config: &'a GameConfig,
    in_turn: bool,
}

impl<'a> GameContext<'a> {
    /// Context for [`Game::setup`].
    pub(crate) fn new(state: &'a mut State, rng: &'a mut SmallRng, config: &'a GameConfig) -> Self {
        GameContext {
            state,
            rng,
            config,
            in_turn: false,
        }
    }

    /// Context for [`Game::apply`]: finishing the match also closes the turn being applied.
    pub(crate) fn for_turn(
        state: &'a mut State,
        rng: &'a mut SmallRng,
        config: &'a GameConfig,
    ) -> Self {
        GameContext {
            in_turn: true,
            ..Self::new(state, rng, config)
        }
    }

    pub fn state(&self) -> &State {
        self.state
    }

    pub fn player_count(&self) -> usize {
        self.state.player_count()
    }

    pub fn turn(&self) -> u64 {
        self.state.turn()
    }

    /// Match-seeded generator; identical seeds replay identically.
    pub fn rng(&mut self) -> &mut SmallRng {
        self.rng
    }

    pub fn config(&self) -> &GameConfig {
        self.config
    }

    pub fn grant(&mut self, player: PlayerId, amount: f64) -> Result<(), ArenaError> {
        self.state.grant(player, amount)
    }

    /// Private message from the game to `player`.
    pub fn tell(&mut self, player: PlayerId, text: impl Into<String>) -> Result<(), ArenaError> {
        self.state.append(player, Message::new(Sender::Game, text))
    }

    /// Public message from the game.
    pub fn broadcast(&mut self, text: impl AsRef<str>) -> Result<(), ArenaError> {
        self.state.broadcast(Sender::Game, text.as_ref())
    }

    /// Public message attributed to `player` (e.g. their move).
    pub fn announce(&mut self, player: PlayerId, text: impl AsRef<str>) -> Result<(), ArenaError> {
        self.state.ensure_player(player)?;
        self.state.broadcast(Sender::Player(player), text.as_ref())
    }

    pub fn set_role(&mut self, player: PlayerId, role: impl Into<String>) -> Result<(), ArenaError> {
        self.state.set_role(player, role)
    }

    /// End the match under the game's own rules.
    pub fn finish(&mut self, info: Info) -> Result<(), ArenaError> {
        let termination = Termination::new(TerminationReason::GameOver).with_info(info);
        if self.in_turn {
            self.state.complete_turn(Some(termination))
        } else {
            self.state.terminate(termination)
        }
    }
}

/// What a game should implement.
///
/// The game is a pure rule book: the arena-side [`GameEnvironment`](crate::environment::GameEnvironment)
/// owns the [`State`], enforces turn order, buffers simultaneous moves and detects stalemates.
pub trait Game: Send {
    /// Identifier used in logs and results.
    fn name(&self) -> &str;

    /// Supported number of players.
    fn players(&self) -> RangeInclusive<usize>;

    fn mode(&self) -> TurnMode {
        TurnMode::Sequential
    }

    fn illegal_action_policy(&self) -> IllegalActionPolicy {
        IllegalActionPolicy::Resubmit
    }

    /// Sequential rotation. Defaults to round-robin.
    fn turn_order(&self, player_count: usize) -> Vec<PlayerId> {
        (0..player_count).collect()
    }

    fn max_turns(&self) -> Option<u64> {
        None
    }

    /// (Re)initialize the rules for a fresh match: roles, opening messages, internal
    /// bookkeeping. The state is already at turn 0 with empty logs.
    fn setup(&mut self, ctx: &mut GameContext<'_>) -> Result<(), ArenaError>;

    /// False when `player` has no legal move; the environment then passes on their behalf.
    fn has_legal_action(&self, _player: PlayerId, _state: &State) -> bool {
        true
    }

    /// Check an action before it is applied.
    ///
    /// # Error
    /// Returns a human readable reason when `action` is malformed or not allowed.
    fn validate(&self, player: PlayerId, action: &Action, state: &State) -> Result<(), String>;

    /// Apply one completed turn.
    ///
    /// Sequential games receive exactly one move, simultaneous games one move per player.
    /// `None` means the player passed (no legal action, skipped, or penalized).
    fn apply(
        &mut self,
        moves: &[(PlayerId, Option<Action>)],
        ctx: &mut GameContext<'_>,
    ) -> Result<(), ArenaError>;

    fn render(&self, _state: &State) -> Option<String> {
        None
    }
}

/// What will be given to the registry to allow it to create environments
pub trait GameFactory: Send + Sync {
    /// Returns a fresh, not yet reset, environment.
    fn create(
        &self,
        player_count: usize,
        config: &GameConfig,
    ) -> Result<Box<dyn Environment>, ArenaError>;
}

impl<F> GameFactory for F
where
    F: Fn(usize, &GameConfig) -> Result<Box<dyn Environment>, ArenaError> + Send + Sync,
{
    fn create(
        &self,
        player_count: usize,
        config: &GameConfig,
    ) -> Result<Box<dyn Environment>, ArenaError> {
        self(player_count, config)
    }
}

#[cfg(test)]
mod interface_tests {
    use rand::SeedableRng;

    use super::*;
    use crate::environment::GameEnvironment;

    struct DummyGame;

    impl Game for DummyGame {
        fn name(&self) -> &str {
            "dummy"
        }

        fn players(&self) -> RangeInclusive<usize> {
            1..=4
        }

        fn setup(&mut self, ctx: &mut GameContext<'_>) -> Result<(), ArenaError> {
            ctx.set_role(0, "first")
        }

        fn validate(&self, _player: PlayerId, _action: &Action, _state: &State) -> Result<(), String> {
            Ok(())
        }

        fn apply(
            &mut self,
            _moves: &[(PlayerId, Option<Action>)],
            _ctx: &mut GameContext<'_>,
        ) -> Result<(), ArenaError> {
            Ok(())
        }
    }

    #[test]
    fn test_context_mutations() {
        let mut state = State::new();
        state.reset(2);
        let mut rng = SmallRng::seed_from_u64(0);
        let config = GameConfig::new();
        let mut ctx = GameContext::new(&mut state, &mut rng, &config);
        DummyGame.setup(&mut ctx).unwrap();
        ctx.tell(1, "secret").unwrap();
        ctx.announce(0, "hi").unwrap();
        ctx.grant(0, 1.0).unwrap();
        assert!(ctx.announce(7, "nobody").is_err());
        ctx.finish(Info::new()).unwrap();
        assert!(ctx.grant(0, 1.0).is_err());

        assert_eq!(state.role(0), Some("first"));
        assert_eq!(state.log(1).unwrap().len(), 2);
        assert_eq!(state.log(0).unwrap().len(), 1);
        assert!(state.is_terminal());
        assert_eq!(state.turn(), 0);
    }

    #[test]
    fn finishing_during_a_turn_counts_it() {
        let mut state = State::new();
        state.reset(2);
        let mut rng = SmallRng::seed_from_u64(0);
        let config = GameConfig::new();
        let mut ctx = GameContext::for_turn(&mut state, &mut rng, &config);
        assert_eq!(ctx.turn(), 0);
        ctx.finish(Info::new()).unwrap();
        assert!(ctx.finish(Info::new()).is_err());
        assert_eq!(state.turn(), 1);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_single_player_match_is_rejected() {
        let mut env = GameEnvironment::new(DummyGame, 1, GameConfig::new());
        let err = env.reset(0).unwrap_err();
        assert!(matches!(err, ArenaError::Configuration(ref m) if m.contains("at least 2")), "{err}");
        assert!(GameEnvironment::new(DummyGame, 2, GameConfig::new()).reset(0).is_ok());
    }

    #[test]
    fn test_dyn_factory() {
        let factory = |n: usize, config: &GameConfig| -> Result<Box<dyn Environment>, ArenaError> {
            Ok(Box::new(GameEnvironment::new(DummyGame, n, config.clone())))
        };
        let factory: &dyn GameFactory = &factory;
        let env = factory.create(3, &GameConfig::new()).unwrap();
        assert_eq!(env.player_count(), 3);
        assert_eq!(env.name(), "dummy");
    }

    #[test]
    fn test_config_builder() {
        let config = GameConfig::new()
            .with_max_turns(10)
            .with_stalemate_limit(2)
            .with_option("rounds", 3);
        assert_eq!(config.max_turns(), Some(10));
        assert_eq!(config.stalemate_limit(), 2);
        assert_eq!(config.option("rounds"), Some(&serde_json::json!(3)));
    }
}
