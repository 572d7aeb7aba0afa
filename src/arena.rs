//! Core orchestration logic for running many matches concurrently.
//!
//! This module defines the [`Arena`] type. Its responsibilities include:
//!
//! - Resolving the game through the [`Registry`]
//! - Pairing contestants with a user-chosen [`TournamentStrategy`]
//! - Running up to `max_concurrency` matches at once, each on its own task
//! - Collecting exactly one [`MatchResult`] per match, whatever happens to it
//!
//! # Behavior & Configuration
//!
//! Behavior is controlled by an [`ArenaConfig`]:
//!
//! - `failure_policy` decides what an unavailable agent costs (forfeit, skipped turn, abort).
//! - `match_timeout` bounds each match; outstanding agent calls are cancelled on expiry.
//! - `results_path` appends each finished match to a JSON-lines file as it completes.
//! - `verbose` prints running and finished matches on stdout.
//!
//! Only run-wide configuration problems (unknown game, unsupported player count, malformed
//! agent descriptors) fail [`Arena::run`], and they do so before any match starts. Anything
//! going wrong inside a match, including a panic, is recorded in that match's result.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use turn_arena::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Arc::new(Registry::with_builtins()?);
//!     let specs = ["rocky=fixed:rock", "cycler=cycle:rock,paper,scissors"]
//!         .iter()
//!         .map(|s| s.parse())
//!         .collect::<Result<Vec<AgentSpec>, _>>()?;
//!     let contestants = registry.contestants(&specs)?;
//!
//!     let arena = Arena::new(registry, ArenaConfig::new().with_max_concurrency(4))?;
//!     let report = arena
//!         .run("rock_paper_scissors", contestants, RoundRobinTournament::new(false))
//!         .await?;
//!     for standing in &report.standings {
//!         println!("{standing}");
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, instrument, trace, warn};

use crate::configuration::ArenaConfig;
use crate::contestant::Contestant;
use crate::environment::Environment;
use crate::game_interface::GameFactory;
use crate::logger::init_logger;
use crate::match_runner::{aborted, run_match, MatchSettings};
use crate::records::ResultLog;
use crate::registry::Registry;
use crate::results::{standings, MatchResult, ResultCollector, Standing};
use crate::tournament_scheduler::TournamentScheduler;
use crate::tournament_strategy::TournamentStrategy;

/// Decorates every environment the arena creates, e.g. with a wrapper stack.
pub type EnvironmentHook = Arc<dyn Fn(Box<dyn Environment>) -> Box<dyn Environment> + Send + Sync>;

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub game: String,
    /// One result per match, ordered by match id.
    pub results: Vec<MatchResult>,
    /// Best first.
    pub standings: Vec<Standing>,
}

impl RunReport {
    /// Matches that ended with `agent_failure`.
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| r.is_agent_failure()).count()
    }

    /// Fraction of matches that ended with `agent_failure`, 0 for an empty run.
    pub fn failure_rate(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.failures() as f64 / self.results.len() as f64
        }
    }
}

/// The orchestrator of a run.
pub struct Arena {
    registry: Arc<Registry>,
    config: Arc<ArenaConfig>,
    hook: Option<EnvironmentHook>,
}

/// State shared by the tasks of one run.
#[derive(Clone)]
struct RunContext {
    game: String,
    players: usize,
    factory: Arc<dyn GameFactory>,
    config: Arc<ArenaConfig>,
    hook: Option<EnvironmentHook>,
}

/// Supervisor tasks of the matches currently running.
struct InFlight {
    tasks: JoinSet<(MatchSettings, MatchResult)>,
    running: Vec<MatchSettings>,
}

impl Arena {
    /// Create an [`Arena`] resolving games and agents through `registry`.
    ///
    /// # Error
    /// When `config` is invalid, or `config.log` is set and the file logger cannot be installed.
    #[instrument(skip_all)]
    pub fn new(registry: Arc<Registry>, config: ArenaConfig) -> anyhow::Result<Arena> {
        config.validate().context("invalid arena configuration")?;
        if config.log {
            let path = init_logger()?;
            info!(path = %path.display(), "logging to file");
        }
        trace!(?config);
        Ok(Arena {
            registry,
            config: Arc::new(config),
            hook: None,
        })
    }

    /// Decorate every match environment with `hook`.
    pub fn with_wrappers(
        mut self,
        hook: impl Fn(Box<dyn Environment>) -> Box<dyn Environment> + Send + Sync + 'static,
    ) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Play every match `strategy` schedules between `contestants` on game `game_id`.
    ///
    /// # Errors
    /// Configuration problems detected before the first match: unknown game, a player count
    /// the game does not support, agents that cannot be spawned, a strategy that cannot be
    /// filled, an unwritable result log.
    pub async fn run<T: TournamentStrategy>(
        &self,
        game_id: &str,
        contestants: Vec<Arc<Contestant>>,
        mut strategy: T,
    ) -> anyhow::Result<RunReport> {
        // 1. resolve everything that can fail for the whole run
        let factory = self.registry.game(game_id)?;
        strategy
            .add_agents(contestants.clone())
            .context("invalid contestants for this pairing")?;
        let players = strategy.players_per_match();
        self.preflight(factory.as_ref(), players, &contestants)
            .with_context(|| format!("cannot run {game_id} with {players} players"))?;
        let mut result_log = match &self.config.results_path {
            Some(path) => Some(ResultLog::open(path)?),
            None => None,
        };
        info!(game = game_id, players, contestants = contestants.len(), "run started");

        // 2. create scheduler and the set of running matches
        let mut scheduler = TournamentScheduler::new(self.config.max_concurrency, strategy);
        let ctx = RunContext {
            game: game_id.to_string(),
            players,
            factory,
            config: self.config.clone(),
            hook: self.hook.clone(),
        };
        let mut in_flight = InFlight {
            tasks: JoinSet::new(),
            running: vec![],
        };
        let collector = ResultCollector::new();

        if self.config.verbose {
            disable_line_wrap();
        }

        // 3. init matches
        for m in scheduler.advance() {
            in_flight.launch(&ctx, m);
        }

        // 4. main loop: not finished <=> match running <=> result to receive
        while !scheduler.is_finished() {
            let (settings, result) = in_flight.next().await?;
            if self.config.verbose {
                print_runner_result(&settings, &result);
            }
            if !collector.record(result.clone()) {
                continue;
            }
            if let Some(log) = result_log.as_mut() {
                if let Err(e) = log.append(&result) {
                    error!(error = %e, "could not persist match result");
                }
            }
            for new_match in scheduler.on_result(result) {
                in_flight.launch(&ctx, new_match);
            }
            trace!(running = scheduler.running(), recorded = collector.len(), "progress");
        }

        if self.config.verbose {
            enable_line_wrap();
        }
        let results = collector.snapshot();
        info!(matches = results.len(), failures = collector.failures(), "run finished");
        Ok(RunReport {
            game: game_id.to_string(),
            standings: standings(&results),
            results,
        })
    }

    fn preflight(
        &self,
        factory: &dyn GameFactory,
        players: usize,
        contestants: &[Arc<Contestant>],
    ) -> Result<(), crate::error::ArenaError> {
        let mut env = factory.create(players, self.config.game_config())?;
        let checked = env.reset(self.config.seed);
        env.close();
        checked?;
        for contestant in contestants {
            contestant.spawn(self.config.seed)?;
        }
        Ok(())
    }
}

impl InFlight {
    fn launch(&mut self, ctx: &RunContext, settings: MatchSettings) {
        self.running.push(settings.clone());
        if ctx.config.verbose {
            print_running_matches(&self.running);
        }

        let ctx = ctx.clone();
        self.tasks.spawn(async move {
            let start = Instant::now();
            let task = {
                let ctx = ctx.clone();
                let settings = settings.clone();
                tokio::spawn(async move {
                    let env = ctx
                        .factory
                        .create(ctx.players, ctx.config.game_config())
                        .map(|env| match &ctx.hook {
                            Some(hook) => hook(env),
                            None => env,
                        });
                    match env {
                        Ok(env) => run_match(&settings, env, &ctx.config).await,
                        Err(e) => aborted(&settings, &ctx.game, e.to_string(), Duration::ZERO),
                    }
                })
            };
            // a panicking match still produces its single result
            let result = match task.await {
                Ok(result) => result,
                Err(e) => {
                    error!(match_id = settings.match_id, error = %e, "match task failed");
                    aborted(&settings, &ctx.game, format!("match task failed: {e}"), start.elapsed())
                }
            };
            (settings, result)
        });
    }

    /// Wait for the next match to report.
    ///
    /// # Error
    /// When nothing is running or a supervisor died without a result.
    async fn next(&mut self) -> anyhow::Result<(MatchSettings, MatchResult)> {
        let (settings, result) = self
            .tasks
            .join_next()
            .await
            .context("no match running before the tournament finished")?
            .context("match supervisor died before reporting")?;
        match self.running.iter().position(|s| s == &settings) {
            Some(pos) => {
                self.running.remove(pos);
            }
            None => warn!(match_id = settings.match_id, "finished match was not running"),
        }
        Ok((settings, result))
    }
}

fn print_runner_result(match_settings: &MatchSettings, result: &MatchResult) {
    let rewards = result
        .players
        .iter()
        .map(|p| format!("{}", p.reward))
        .collect::<Vec<_>>()
        .join("-");
    let mut reason = result.reason.to_string();
    if let Some(error) = &result.error {
        let _ = write!(reason, ": {error}");
    }

    // clear line, green match, rewards, red reason, start of line
    println!("\x1b[2K\x1b[32m{match_settings}: \x1b[39m{rewards} \x1b[31m{reason}\x1b[39m\x1b[0G");
}

fn print_running_matches(running: &[MatchSettings]) {
    // clear, green, default, start of line
    print!(
        "\x1b[2K\x1b[32mRunning...:\x1b[39m {}\x1b[0G",
        running
            .iter()
            .map(MatchSettings::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    let _ = std::io::Write::flush(&mut std::io::stdout());
}

fn disable_line_wrap() {
    print!("\x1b[?7l");
}

fn enable_line_wrap() {
    print!("\x1b[?7h");
}
