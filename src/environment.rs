//! The environment contract and the generic turn-based state machine implementing it.
//!
//! An [`Environment`] is one game instance. It owns exactly one [`State`] and moves it through
//! `Uninitialized -> InProgress -> Terminal`:
//!
//! - `reset` is the only transition into `InProgress`, and always starts an unrelated logical
//!   match (rewards and logs are cleared, never carried over).
//! - `step` applies game rules. It reports `done = true` exactly once, on the call that made the
//!   state terminal.
//! - `skip` and `terminate` are administrative transitions used by the arena (agent failure,
//!   timeouts) and by truncating wrappers.
//!
//! [`GameEnvironment`] implements the contract for any [`Game`], so games only describe rules.

use std::collections::BTreeMap;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde_json::json;
use tracing::{debug, trace};

use crate::error::ArenaError;
use crate::game_interface::{Game, GameConfig, GameContext, IllegalActionPolicy};
use crate::observation::{Action, Info, Observation, PlayerId};
use crate::scheduler::{TurnMode, TurnScheduler};
use crate::state::{Phase, State, Termination, TerminationReason};

/// Fewest seats any match can have, whatever the game supports.
pub const MIN_PLAYERS: usize = 2;

/// Result of a successful `step` or `skip`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepOutcome {
    /// True only on the call that terminated the match.
    pub done: bool,
    /// Turn index after the call.
    pub turn: u64,
    pub info: Info,
    /// Set by a wrapper that ends the episode early; the enclosing stack turns it into a
    /// `terminate` on the inner environment.
    pub truncated: Option<TerminationReason>,
}

/// Capability interface every game instance (and every wrapper stack) exposes.
pub trait Environment: Send {
    fn name(&self) -> &str;

    /// Seats in the match, fixed at construction.
    fn player_count(&self) -> usize;

    fn mode(&self) -> TurnMode;

    /// Start a fresh logical match. Deterministic given `seed`.
    ///
    /// # Error
    /// [`ArenaError::Configuration`] if there are fewer than [`MIN_PLAYERS`] players or the
    /// count is outside the game's supported range.
    fn reset(&mut self, seed: u64) -> Result<(), ArenaError>;

    /// Accumulated log visible to `player`. Never mutates the state.
    fn get_observation(&self, player: PlayerId) -> Result<Observation, ArenaError>;

    /// Submit `player`'s action for the current turn.
    fn step(&mut self, player: PlayerId, action: Action) -> Result<StepOutcome, ArenaError>;

    /// Players allowed to act now. Empty unless the match is in progress.
    fn active_players(&self) -> Vec<PlayerId>;

    /// `player` passes this turn without acting.
    fn skip(&mut self, player: PlayerId) -> Result<StepOutcome, ArenaError>;

    /// End the match from outside the rules, granting `awards` first.
    fn terminate(
        &mut self,
        termination: Termination,
        awards: &[(PlayerId, f64)],
    ) -> Result<(), ArenaError>;

    /// Read-only view of the match state.
    fn state(&self) -> &State;

    fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    fn render(&self) -> Option<String> {
        None
    }

    /// Release resources. Idempotent.
    fn close(&mut self);
}

/// Turn-based state machine driving a [`Game`].
pub struct GameEnvironment<G: Game> {
    game: G,
    player_count: usize,
    config: GameConfig,
    state: State,
    scheduler: Option<TurnScheduler>,
    pending: BTreeMap<PlayerId, Option<Action>>,
    rng: SmallRng,
    closed: bool,
}

impl<G: Game> GameEnvironment<G> {
    /// Wrap `game` for `player_count` players. Validation happens at `reset`.
    pub fn new(game: G, player_count: usize, config: GameConfig) -> Self {
        GameEnvironment {
            game,
            player_count,
            config,
            state: State::new(),
            scheduler: None,
            pending: BTreeMap::new(),
            rng: SmallRng::seed_from_u64(0),
            closed: false,
        }
    }

    pub fn game(&self) -> &G {
        &self.game
    }

    fn ensure_in_progress(&self) -> Result<(), ArenaError> {
        match self.state.phase() {
            Phase::Uninitialized => Err(ArenaError::NotStarted),
            Phase::InProgress => Ok(()),
            Phase::Terminal => Err(ArenaError::Terminated),
        }
    }

    fn scheduler(&self) -> Result<&TurnScheduler, ArenaError> {
        self.scheduler.as_ref().ok_or(ArenaError::NotStarted)
    }

    fn scheduler_mut(&mut self) -> Result<&mut TurnScheduler, ArenaError> {
        self.scheduler.as_mut().ok_or(ArenaError::NotStarted)
    }

    fn turn_cap(&self) -> Option<u64> {
        match (self.config.max_turns, self.game.max_turns()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn outcome(&self, was_terminal: bool, info: Info) -> StepOutcome {
        StepOutcome {
            done: !was_terminal && self.state.is_terminal(),
            turn: self.state.turn(),
            info,
            truncated: None,
        }
    }

    fn grant_opponents(&mut self, player: PlayerId, amount: f64) -> Result<(), ArenaError> {
        for other in (0..self.player_count).filter(|&p| p != player) {
            self.state.grant(other, amount)?;
        }
        Ok(())
    }

    /// Record `player`'s move for the open turn, applying it once the turn is complete.
    fn submit(&mut self, player: PlayerId, action: Option<Action>) -> Result<(), ArenaError> {
        let complete = self.scheduler_mut()?.submit(player)?;
        self.pending.insert(player, action);
        if complete {
            self.complete_turn()?;
        }
        Ok(())
    }

    fn complete_turn(&mut self) -> Result<(), ArenaError> {
        let moves = std::mem::take(&mut self.pending).into_iter().collect::<Vec<_>>();
        let progressed = moves.iter().any(|(_, a)| a.is_some());
        trace!(turn = self.state.turn(), ?moves, "applying turn");

        let mut ctx = GameContext::for_turn(&mut self.state, &mut self.rng, &self.config);
        if let Err(e) = self.game.apply(&moves, &mut ctx) {
            // the moves are gone, so everyone in the turn has to submit again
            self.scheduler_mut()?.reopen_turn();
            return Err(e);
        }
        if self.state.is_terminal() {
            return Ok(());
        }

        self.state.complete_turn(None)?;
        let stalemate = self.scheduler_mut()?.complete_turn(progressed);
        if stalemate {
            debug!(turn = self.state.turn(), "stalemate");
            return self
                .state
                .terminate(Termination::new(TerminationReason::Stalemate));
        }
        if let Some(cap) = self.turn_cap() {
            if self.state.turn() >= cap {
                debug!(turn = self.state.turn(), "turn limit reached");
                return self
                    .state
                    .terminate(Termination::new(TerminationReason::TurnLimit));
            }
        }
        Ok(())
    }

    /// Pass automatically for active players without any legal action.
    fn settle(&mut self) -> Result<(), ArenaError> {
        while !self.state.is_terminal() {
            let stuck = self
                .scheduler()?
                .active()
                .into_iter()
                .filter(|&p| !self.game.has_legal_action(p, &self.state))
                .collect::<Vec<_>>();
            if stuck.is_empty() {
                break;
            }
            let turn = self.state.turn();
            for player in stuck {
                trace!(player, turn, "no legal action, passing");
                self.submit(player, None)?;
            }
            if self.state.turn() == turn && !self.state.is_terminal() {
                // simultaneous turn still waiting for the other players
                break;
            }
        }
        Ok(())
    }
}

impl<G: Game> Environment for GameEnvironment<G> {
    fn name(&self) -> &str {
        self.game.name()
    }

    fn player_count(&self) -> usize {
        self.player_count
    }

    fn mode(&self) -> TurnMode {
        self.game.mode()
    }

    fn reset(&mut self, seed: u64) -> Result<(), ArenaError> {
        if self.player_count < MIN_PLAYERS {
            return Err(ArenaError::config(format!(
                "a match needs at least {MIN_PLAYERS} players, got {}",
                self.player_count
            )));
        }
        let supported = self.game.players();
        if !supported.contains(&self.player_count) {
            return Err(ArenaError::config(format!(
                "{} supports {}..={} players, got {}",
                self.game.name(),
                supported.start(),
                supported.end(),
                self.player_count
            )));
        }
        let order = self.game.turn_order(self.player_count);
        self.scheduler = Some(TurnScheduler::new(
            self.game.mode(),
            order,
            self.player_count,
            self.config.stalemate_limit,
        )?);
        self.state.reset(self.player_count);
        self.pending.clear();
        self.rng = SmallRng::seed_from_u64(seed);
        self.closed = false;

        let mut ctx = GameContext::new(&mut self.state, &mut self.rng, &self.config);
        self.game.setup(&mut ctx)?;
        self.settle()
    }

    fn get_observation(&self, player: PlayerId) -> Result<Observation, ArenaError> {
        if self.state.phase() == Phase::Uninitialized {
            return Err(ArenaError::NotStarted);
        }
        self.state.ensure_player(player)?;
        Ok(self.state.log(player).cloned().unwrap_or_default())
    }

    fn step(&mut self, player: PlayerId, action: Action) -> Result<StepOutcome, ArenaError> {
        self.ensure_in_progress()?;
        self.state.ensure_player(player)?;
        self.scheduler()?.check(player)?;

        let mut info = Info::new();
        let mv = match self.game.validate(player, &action, &self.state) {
            Ok(()) => Some(action),
            Err(reason) => match self.game.illegal_action_policy() {
                IllegalActionPolicy::Resubmit => {
                    return Err(ArenaError::InvalidAction { player, reason });
                }
                IllegalActionPolicy::Penalize { penalty } => {
                    debug!(player, %reason, "penalizing invalid action");
                    self.grant_opponents(player, penalty)?;
                    info.insert("invalid_action".into(), json!(reason));
                    None
                }
                IllegalActionPolicy::Terminate { award } => {
                    debug!(player, %reason, "invalid action ends the match");
                    self.grant_opponents(player, award)?;
                    self.state.terminate(
                        Termination::new(TerminationReason::IllegalAction)
                            .with_player(player)
                            .with_detail(reason.clone()),
                    )?;
                    info.insert("invalid_action".into(), json!(reason));
                    return Ok(self.outcome(false, info));
                }
            },
        };

        self.submit(player, mv)?;
        self.settle()?;
        if self.mode() == TurnMode::Simultaneous && !self.state.is_terminal() {
            info.insert("pending".into(), json!(self.pending.len()));
        }
        Ok(self.outcome(false, info))
    }

    fn active_players(&self) -> Vec<PlayerId> {
        match (&self.scheduler, self.state.phase()) {
            (Some(s), Phase::InProgress) => s.active(),
            _ => vec![],
        }
    }

    fn skip(&mut self, player: PlayerId) -> Result<StepOutcome, ArenaError> {
        self.ensure_in_progress()?;
        self.state.ensure_player(player)?;
        debug!(player, turn = self.state.turn(), "skipping turn");
        self.submit(player, None)?;
        self.settle()?;
        Ok(self.outcome(false, Info::new()))
    }

    fn terminate(
        &mut self,
        termination: Termination,
        awards: &[(PlayerId, f64)],
    ) -> Result<(), ArenaError> {
        self.ensure_in_progress()?;
        for &(player, amount) in awards {
            self.state.grant(player, amount)?;
        }
        self.pending.clear();
        self.state.terminate(termination)
    }

    fn state(&self) -> &State {
        &self.state
    }

    fn render(&self) -> Option<String> {
        self.game.render(&self.state)
    }

    fn close(&mut self) {
        if !self.closed {
            trace!(game = self.game.name(), "closing environment");
            self.closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ops::RangeInclusive;

    use super::*;

    /// Sequential counting game: players add the number they say to their reward; the match
    /// ends once someone reaches 3.
    struct Counter {
        legal: bool,
    }

    impl Game for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn players(&self) -> RangeInclusive<usize> {
            2..=3
        }

        fn setup(&mut self, _ctx: &mut GameContext<'_>) -> Result<(), ArenaError> {
            Ok(())
        }

        fn has_legal_action(&self, _player: PlayerId, _state: &State) -> bool {
            self.legal
        }

        fn validate(&self, _player: PlayerId, action: &Action, _state: &State) -> Result<(), String> {
            action
                .text
                .parse::<u32>()
                .map(|_| ())
                .map_err(|e| e.to_string())
        }

        fn apply(
            &mut self,
            moves: &[(PlayerId, Option<Action>)],
            ctx: &mut GameContext<'_>,
        ) -> Result<(), ArenaError> {
            for (player, action) in moves {
                if let Some(action) = action {
                    ctx.announce(*player, &action.text)?;
                    ctx.grant(*player, action.text.parse::<f64>().unwrap_or(0.0))?;
                }
            }
            if ctx.state().rewards().iter().any(|&r| r >= 3.0) {
                ctx.finish(Info::new())?;
            }
            Ok(())
        }
    }

    /// Simultaneous game whose rules fail on the move "boom".
    struct Fragile;

    impl Game for Fragile {
        fn name(&self) -> &str {
            "fragile"
        }

        fn players(&self) -> RangeInclusive<usize> {
            2..=2
        }

        fn mode(&self) -> TurnMode {
            TurnMode::Simultaneous
        }

        fn setup(&mut self, _ctx: &mut GameContext<'_>) -> Result<(), ArenaError> {
            Ok(())
        }

        fn validate(&self, _player: PlayerId, _action: &Action, _state: &State) -> Result<(), String> {
            Ok(())
        }

        fn apply(
            &mut self,
            moves: &[(PlayerId, Option<Action>)],
            _ctx: &mut GameContext<'_>,
        ) -> Result<(), ArenaError> {
            match moves.iter().find(|(_, a)| a.as_ref().is_some_and(|a| a.text == "boom")) {
                Some(&(player, _)) => Err(ArenaError::InvalidAction {
                    player,
                    reason: "boom".into(),
                }),
                None => Ok(()),
            }
        }
    }

    fn env(player_count: usize) -> GameEnvironment<Counter> {
        GameEnvironment::new(Counter { legal: true }, player_count, GameConfig::new())
    }

    #[test]
    fn unstarted_environment_rejects_everything() {
        let mut e = env(2);
        assert_eq!(e.step(0, "1".into()), Err(ArenaError::NotStarted));
        assert_eq!(e.get_observation(0), Err(ArenaError::NotStarted));
        assert!(e.active_players().is_empty());
    }

    #[test]
    fn player_count_is_validated_at_reset() {
        assert!(matches!(env(1).reset(0), Err(ArenaError::Configuration(_))));
        assert!(matches!(env(4).reset(0), Err(ArenaError::Configuration(_))));
        assert!(env(3).reset(0).is_ok());
    }

    #[test]
    fn done_is_reported_exactly_once() {
        let mut e = env(2);
        e.reset(1).unwrap();
        assert!(!e.step(0, "1".into()).unwrap().done);
        assert!(!e.step(1, "2".into()).unwrap().done);
        let last = e.step(0, "3".into()).unwrap();
        assert!(last.done);
        assert_eq!(e.step(1, "1".into()), Err(ArenaError::Terminated));
        assert_eq!(e.state().rewards(), &[4.0, 2.0]);
        assert_eq!(
            e.state().termination().map(|t| t.reason),
            Some(TerminationReason::GameOver)
        );
    }

    #[test]
    fn invalid_player_and_out_of_turn() {
        let mut e = env(2);
        e.reset(0).unwrap();
        assert!(matches!(
            e.get_observation(2),
            Err(ArenaError::InvalidPlayer { player: 2, .. })
        ));
        assert!(matches!(
            e.step(1, "1".into()),
            Err(ArenaError::TurnViolation { player: 1, .. })
        ));
        assert_eq!(e.state().turn(), 0);
    }

    #[test]
    fn resubmit_policy_leaves_state_untouched() {
        let mut e = env(2);
        e.reset(0).unwrap();
        assert!(matches!(
            e.step(0, "abc".into()),
            Err(ArenaError::InvalidAction { player: 0, .. })
        ));
        assert_eq!(e.active_players(), vec![0]);
        assert_eq!(e.state().turn(), 0);
    }

    #[test]
    fn no_legal_action_leads_to_stalemate() {
        let config = GameConfig::new().with_stalemate_limit(2);
        let mut e = GameEnvironment::new(Counter { legal: false }, 2, config);
        e.reset(0).unwrap();
        let t = e.state().termination().unwrap();
        assert_eq!(t.reason, TerminationReason::Stalemate);
        assert_eq!(e.state().turn(), 3);
    }

    #[test]
    fn skip_counts_towards_stalemate() {
        let config = GameConfig::new().with_stalemate_limit(1);
        let mut e = GameEnvironment::new(Counter { legal: true }, 2, config);
        e.reset(0).unwrap();
        assert!(!e.skip(0).unwrap().done);
        assert!(e.skip(1).unwrap().done);
        assert_eq!(
            e.state().termination().map(|t| t.reason),
            Some(TerminationReason::Stalemate)
        );
    }

    #[test]
    fn turn_cap_from_config() {
        let config = GameConfig::new().with_max_turns(1);
        let mut e = GameEnvironment::new(Counter { legal: true }, 2, config);
        e.reset(0).unwrap();
        assert!(e.step(0, "1".into()).unwrap().done);
        assert_eq!(
            e.state().termination().map(|t| t.reason),
            Some(TerminationReason::TurnLimit)
        );
    }

    #[test]
    fn closing_turn_counts_like_any_other() {
        let mut over = env(2);
        over.reset(0).unwrap();
        let outcome = over.step(0, "3".into()).unwrap();
        assert!(outcome.done);
        assert_eq!(outcome.turn, 1);

        let config = GameConfig::new().with_max_turns(1);
        let mut capped = GameEnvironment::new(Counter { legal: true }, 2, config);
        capped.reset(0).unwrap();
        assert!(capped.step(0, "1".into()).unwrap().done);

        assert_eq!(
            over.state().termination().map(|t| t.reason),
            Some(TerminationReason::GameOver)
        );
        assert_eq!(over.state().turn(), capped.state().turn());
    }

    #[test]
    fn failed_apply_reopens_the_turn() {
        let mut e = GameEnvironment::new(Fragile, 2, GameConfig::new());
        e.reset(0).unwrap();
        e.step(0, "boom".into()).unwrap();
        assert!(matches!(
            e.step(1, "fine".into()),
            Err(ArenaError::InvalidAction { player: 0, .. })
        ));
        assert_eq!(e.active_players(), vec![0, 1]);
        assert_eq!(e.state().turn(), 0);

        e.step(0, "fine".into()).unwrap();
        e.step(1, "fine".into()).unwrap();
        assert_eq!(e.state().turn(), 1);
        assert_eq!(e.active_players(), vec![0, 1]);
    }

    #[test]
    fn terminate_grants_awards_then_freezes() {
        let mut e = env(2);
        e.reset(0).unwrap();
        e.terminate(
            Termination::new(TerminationReason::AgentFailure).with_player(1),
            &[(0, 1.0)],
        )
        .unwrap();
        assert_eq!(e.state().rewards(), &[1.0, 0.0]);
        assert!(e.active_players().is_empty());
        assert_eq!(
            e.terminate(Termination::new(TerminationReason::Error), &[]),
            Err(ArenaError::Terminated)
        );
    }

    #[test]
    fn close_is_idempotent() {
        let mut e = env(2);
        e.close();
        e.close();
    }
}
