//! Composable layers over an [`Environment`].
//!
//! A [`Wrapped`] stack owns one base environment and a fixed list of [`Wrapper`] records:
//! record `0` wraps the base, record `i` wraps record `i - 1`. Calls are dispatched along that
//! chain in O(depth):
//!
//! - actions flow outermost to innermost through [`Wrapper::action`],
//! - observations and step outcomes flow innermost to outermost through
//!   [`Wrapper::observation`] and [`Wrapper::outcome`],
//! - [`Wrapper::render`] sees every step without being able to alter it.
//!
//! Wrappers never see the [`State`]. They only transform their own call's input or output,
//! which makes stacking associative: `Wrapped(E).with(W2).with(W1)` behaves exactly like
//! `Wrapped(Wrapped(E).with(W2)).with(W1)`, since a stack is itself an environment.
//!
//! Termination is transparent: once the base reports `done`, every layer sees `done`. A layer
//! whose purpose is to shorten episodes (like [`TurnLimit`]) sets
//! [`StepOutcome::truncated`]; the stack then terminates the base through the contract so the
//! state records the truncation reason.

use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::debug;

use crate::environment::{Environment, StepOutcome};
use crate::error::ArenaError;
use crate::observation::{Action, Observation, PlayerId};
use crate::scheduler::TurnMode;
use crate::state::{State, Termination, TerminationReason};

/// What a layer sees of one step, for side-channel rendering.
pub struct Frame<'a> {
    pub player: PlayerId,
    /// `None` for a skipped turn.
    pub action: Option<&'a Action>,
    pub outcome: &'a StepOutcome,
    /// The base environment's own rendering, if it has one.
    pub rendering: Option<String>,
}

/// One decoration layer. Every hook defaults to the identity.
pub trait Wrapper: Send {
    fn name(&self) -> &str;

    /// Called after the base environment was reset.
    fn on_reset(&mut self, _seed: u64) {}

    fn action(&mut self, _player: PlayerId, action: Action) -> Result<Action, ArenaError> {
        Ok(action)
    }

    fn observation(&self, _player: PlayerId, observation: Observation) -> Observation {
        observation
    }

    fn outcome(&mut self, _player: PlayerId, outcome: StepOutcome) -> StepOutcome {
        outcome
    }

    fn render(&mut self, _frame: &Frame<'_>) {}
}

/// An environment decorated by a fixed chain of wrappers.
pub struct Wrapped {
    base: Box<dyn Environment>,
    layers: Vec<Box<dyn Wrapper>>,
}

impl Wrapped {
    pub fn new(base: impl Environment + 'static) -> Self {
        Self::from_boxed(Box::new(base))
    }

    pub fn from_boxed(base: Box<dyn Environment>) -> Self {
        Wrapped {
            base,
            layers: vec![],
        }
    }

    /// Add `wrapper` as the new outermost layer.
    pub fn with(mut self, wrapper: impl Wrapper + 'static) -> Self {
        self.layers.push(Box::new(wrapper));
        self
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Layer names, innermost first.
    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    pub fn inner(&self) -> &dyn Environment {
        self.base.as_ref()
    }

    fn finish_outcome(
        &mut self,
        player: PlayerId,
        action: Option<&Action>,
        mut outcome: StepOutcome,
    ) -> Result<StepOutcome, ArenaError> {
        let inner_done = outcome.done;
        for layer in &mut self.layers {
            outcome = layer.outcome(player, outcome);
            // wrappers cannot un-finish the inner environment
            outcome.done |= inner_done;
        }

        if let Some(reason) = outcome.truncated {
            if !self.base.is_terminal() {
                debug!(%reason, turn = outcome.turn, "episode truncated by wrapper");
                self.base.terminate(Termination::new(reason), &[])?;
                outcome.info.insert("truncated".into(), json!(reason.to_string()));
            }
            outcome.done = true;
        }

        let rendering = self.base.render();
        let frame = Frame {
            player,
            action,
            outcome: &outcome,
            rendering,
        };
        for layer in &mut self.layers {
            layer.render(&frame);
        }
        Ok(outcome)
    }
}

impl Environment for Wrapped {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn player_count(&self) -> usize {
        self.base.player_count()
    }

    fn mode(&self) -> TurnMode {
        self.base.mode()
    }

    fn reset(&mut self, seed: u64) -> Result<(), ArenaError> {
        self.base.reset(seed)?;
        for layer in &mut self.layers {
            layer.on_reset(seed);
        }
        Ok(())
    }

    fn get_observation(&self, player: PlayerId) -> Result<Observation, ArenaError> {
        let observation = self.base.get_observation(player)?;
        Ok(self
            .layers
            .iter()
            .fold(observation, |obs, layer| layer.observation(player, obs)))
    }

    fn step(&mut self, player: PlayerId, action: Action) -> Result<StepOutcome, ArenaError> {
        let mut action = action;
        for layer in self.layers.iter_mut().rev() {
            action = layer.action(player, action)?;
        }
        let outcome = self.base.step(player, action.clone())?;
        self.finish_outcome(player, Some(&action), outcome)
    }

    fn active_players(&self) -> Vec<PlayerId> {
        self.base.active_players()
    }

    fn skip(&mut self, player: PlayerId) -> Result<StepOutcome, ArenaError> {
        let outcome = self.base.skip(player)?;
        self.finish_outcome(player, None, outcome)
    }

    fn terminate(
        &mut self,
        termination: Termination,
        awards: &[(PlayerId, f64)],
    ) -> Result<(), ArenaError> {
        self.base.terminate(termination, awards)
    }

    fn state(&self) -> &State {
        self.base.state()
    }

    fn render(&self) -> Option<String> {
        self.base.render()
    }

    fn close(&mut self) {
        self.base.close()
    }
}

/// Wraps the action text in `[` `]` when the agent forgot to.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActionFormatting;

impl Wrapper for ActionFormatting {
    fn name(&self) -> &str {
        "action_formatting"
    }

    fn action(&mut self, _player: PlayerId, mut action: Action) -> Result<Action, ArenaError> {
        if !action.text.contains('[') {
            action.text = format!("[{}]", action.text);
        }
        Ok(action)
    }
}

/// Trims and lowercases the action text.
#[derive(Debug, Default, Clone, Copy)]
pub struct NormalizeAction;

impl Wrapper for NormalizeAction {
    fn name(&self) -> &str {
        "normalize_action"
    }

    fn action(&mut self, _player: PlayerId, mut action: Action) -> Result<Action, ArenaError> {
        action.text = action.text.trim().to_lowercase();
        Ok(action)
    }
}

/// Only shows the `n` most recent observation entries.
#[derive(Debug, Clone, Copy)]
pub struct ObservationWindow(pub usize);

impl Wrapper for ObservationWindow {
    fn name(&self) -> &str {
        "observation_window"
    }

    fn observation(&self, _player: PlayerId, observation: Observation) -> Observation {
        observation.tail(self.0)
    }
}

/// Ends the episode once the turn index reaches `max_turns`.
///
/// This layer is the single source of truth for that limit; if the inner game ends first,
/// its own termination stands.
#[derive(Debug, Clone, Copy)]
pub struct TurnLimit {
    max_turns: u64,
}

impl TurnLimit {
    pub fn new(max_turns: u64) -> Self {
        TurnLimit { max_turns }
    }
}

impl Wrapper for TurnLimit {
    fn name(&self) -> &str {
        "turn_limit"
    }

    fn outcome(&mut self, _player: PlayerId, mut outcome: StepOutcome) -> StepOutcome {
        if !outcome.done && outcome.truncated.is_none() && outcome.turn >= self.max_turns {
            outcome.truncated = Some(TerminationReason::TurnLimit);
        }
        outcome
    }
}

/// Records a human readable line per step into a shared buffer.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle reading the same buffer after the stack took ownership of the wrapper.
    pub fn handle(&self) -> Transcript {
        self.clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Wrapper for Transcript {
    fn name(&self) -> &str {
        "transcript"
    }

    fn on_reset(&mut self, seed: u64) {
        let mut lines = self.lines.lock().unwrap_or_else(|p| p.into_inner());
        lines.push(format!("reset seed={seed}"));
    }

    fn render(&mut self, frame: &Frame<'_>) {
        let action = frame
            .action
            .map(|a| a.text.clone())
            .unwrap_or_else(|| "<skip>".to_string());
        let mut line = format!("turn {} player {}: {}", frame.outcome.turn, frame.player, action);
        if frame.outcome.done {
            line.push_str(" (done)");
        }
        if let Some(rendering) = &frame.rendering {
            line.push('\n');
            line.push_str(rendering);
        }
        let mut lines = self.lines.lock().unwrap_or_else(|p| p.into_inner());
        lines.push(line);
    }
}
