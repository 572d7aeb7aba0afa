//! Drives one match from `reset` to a recorded [`MatchResult`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

use crate::agent::{decide, Agent};
use crate::configuration::{ArenaConfig, FailurePolicy};
use crate::contestant::Contestant;
use crate::environment::Environment;
use crate::error::ArenaError;
use crate::observation::{Action, Info, Message, Observation, PlayerId, Sender};
use crate::results::{MatchResult, PlayerRecord};
use crate::state::{Phase, Termination, TerminationReason};

/// One scheduled match: its identity and the contestants in seat order.
#[derive(Clone, Debug)]
pub struct MatchSettings {
    pub match_id: u64,
    pub ordered_player: Vec<Arc<Contestant>>,
}

impl PartialEq for MatchSettings {
    fn eq(&self, other: &Self) -> bool {
        self.match_id == other.match_id
    }
}

impl fmt::Display for MatchSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self
            .ordered_player
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(" vs ");
        write!(f, "#{} {names}", self.match_id)
    }
}

/// Run `env` to completion with agents spawned from `settings`.
///
/// Never fails: contract errors, agent failures and timeouts all end up in the returned
/// result's termination reason. `env` is closed before returning.
#[instrument(skip_all, fields(match_id = settings.match_id))]
pub async fn run_match(
    settings: &MatchSettings,
    env: Box<dyn Environment>,
    config: &ArenaConfig,
) -> MatchResult {
    let start = Instant::now();
    let seed = config.seed.wrapping_add(settings.match_id);
    let mut runner = Runner {
        settings,
        config,
        env,
        agents: vec![],
        fallback: None,
    };

    let played = match config.match_timeout {
        Some(limit) => tokio::time::timeout(limit, runner.play(seed))
            .await
            .unwrap_or_else(|_| {
                warn!(?limit, "match timed out");
                Err(Interrupted::Timeout(limit))
            }),
        None => runner.play(seed).await,
    };
    if let Err(interrupted) = played {
        runner.interrupt(interrupted);
    }
    runner.into_result(start.elapsed())
}

/// Result of a match that could not even be set up.
pub(crate) fn aborted(
    settings: &MatchSettings,
    game: &str,
    error: String,
    duration: Duration,
) -> MatchResult {
    MatchResult {
        match_id: settings.match_id,
        game: game.to_string(),
        players: settings
            .ordered_player
            .iter()
            .enumerate()
            .map(|(seat, c)| PlayerRecord {
                name: c.name.clone(),
                seat,
                role: None,
                reward: 0.0,
            })
            .collect(),
        reason: TerminationReason::Error,
        failed_player: None,
        turns: 0,
        duration,
        error: Some(error),
        info: Info::new(),
    }
}

enum Interrupted {
    Timeout(Duration),
    Failed(ArenaError),
}

impl From<ArenaError> for Interrupted {
    fn from(e: ArenaError) -> Self {
        Interrupted::Failed(e)
    }
}

struct Runner<'a> {
    settings: &'a MatchSettings,
    config: &'a ArenaConfig,
    env: Box<dyn Environment>,
    agents: Vec<Box<dyn Agent>>,
    /// Termination to report when the environment could not record one.
    fallback: Option<Termination>,
}

impl Runner<'_> {
    async fn play(&mut self, seed: u64) -> Result<(), Interrupted> {
        self.env.reset(seed)?;
        for (seat, contestant) in self.settings.ordered_player.iter().enumerate() {
            self.agents.push(contestant.spawn(seed.wrapping_add(seat as u64))?);
        }
        debug!(game = self.env.name(), "match started");

        while !self.env.is_terminal() {
            let active = self.env.active_players();
            if active.is_empty() {
                return Err(ArenaError::config("match in progress without active players").into());
            }
            let mut observations = BTreeMap::new();
            for player in active {
                observations.insert(player, self.env.get_observation(player)?);
            }

            // simultaneous turns ask every active agent at once
            let requests = self
                .agents
                .iter_mut()
                .enumerate()
                .filter_map(|(seat, agent)| {
                    let observation = observations.get(&seat)?;
                    Some(async move { (seat, decide(agent.as_mut(), observation).await) })
                });
            let decisions = join_all(requests).await;

            for (seat, decision) in decisions {
                if self.env.is_terminal() {
                    break;
                }
                match decision {
                    Ok(action) => self.submit(seat, action).await?,
                    Err(e @ ArenaError::AgentUnavailable { .. }) => self.agent_failed(seat, e)?,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Step `action`, re-asking the agent while the game rejects it.
    async fn submit(&mut self, seat: PlayerId, mut action: Action) -> Result<(), ArenaError> {
        let mut attempts = 0;
        loop {
            match self.env.step(seat, action) {
                Ok(outcome) => {
                    trace!(seat, turn = outcome.turn, done = outcome.done, "stepped");
                    return Ok(());
                }
                Err(ArenaError::InvalidAction { reason, .. }) => {
                    attempts += 1;
                    if attempts > self.config.invalid_action_retries {
                        info!(seat, %reason, "out of resubmissions");
                        let awards = self.forfeit_awards(seat);
                        return self.env.terminate(
                            Termination::new(TerminationReason::IllegalAction)
                                .with_player(seat)
                                .with_detail(reason),
                            &awards,
                        );
                    }
                    debug!(seat, attempts, %reason, "invalid action, asking again");
                    let mut observation: Observation = self.env.get_observation(seat)?;
                    observation.push(Message::new(
                        Sender::Game,
                        format!("Invalid action: {reason}. Please try again."),
                    ));
                    action = match decide(self.agents[seat].as_mut(), &observation).await {
                        Ok(action) => action,
                        Err(e @ ArenaError::AgentUnavailable { .. }) => return self.agent_failed(seat, e),
                        Err(e) => return Err(e),
                    };
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn agent_failed(&mut self, seat: PlayerId, error: ArenaError) -> Result<(), ArenaError> {
        warn!(seat, %error, policy = ?self.config.failure_policy, "agent failure");
        let termination = Termination::new(TerminationReason::AgentFailure)
            .with_player(seat)
            .with_detail(error.to_string());
        match self.config.failure_policy {
            FailurePolicy::Forfeit { .. } => {
                let awards = self.forfeit_awards(seat);
                self.env.terminate(termination, &awards)
            }
            FailurePolicy::Abort => self.env.terminate(termination, &[]),
            FailurePolicy::SkipTurn => self.env.skip(seat).map(|_| ()),
        }
    }

    fn forfeit_awards(&self, seat: PlayerId) -> Vec<(PlayerId, f64)> {
        match self.config.failure_policy {
            FailurePolicy::Forfeit { award } => (0..self.env.player_count())
                .filter(|&p| p != seat)
                .map(|p| (p, award))
                .collect(),
            FailurePolicy::SkipTurn | FailurePolicy::Abort => vec![],
        }
    }

    fn interrupt(&mut self, interrupted: Interrupted) {
        let termination = match interrupted {
            Interrupted::Timeout(limit) => Termination::new(TerminationReason::MatchTimeout)
                .with_detail(format!("match exceeded {limit:?}")),
            Interrupted::Failed(e) => {
                warn!(error = %e, "match failed");
                Termination::new(TerminationReason::Error).with_detail(e.to_string())
            }
        };
        if self.env.state().phase() == Phase::InProgress {
            if let Err(e) = self.env.terminate(termination.clone(), &[]) {
                warn!(error = %e, "could not terminate environment");
            }
        }
        if !self.env.is_terminal() {
            // reset failed: nothing to terminate, report it directly
            self.fallback = Some(termination);
        }
    }

    fn into_result(mut self, duration: Duration) -> MatchResult {
        let state = self.env.state();
        let termination = state
            .termination()
            .cloned()
            .or(self.fallback.take())
            .unwrap_or_else(|| {
                Termination::new(TerminationReason::Error).with_detail("match ended without termination")
            });
        let players = self
            .settings
            .ordered_player
            .iter()
            .enumerate()
            .map(|(seat, c)| PlayerRecord {
                name: c.name.clone(),
                seat,
                role: state.role(seat).map(str::to_owned),
                reward: state.reward(seat).unwrap_or(0.0),
            })
            .collect();
        let result = MatchResult {
            match_id: self.settings.match_id,
            game: self.env.name().to_string(),
            players,
            reason: termination.reason,
            failed_player: termination.player,
            turns: state.turn(),
            duration,
            error: termination.detail,
            info: termination.info,
        };
        self.env.close();
        result
    }
}
