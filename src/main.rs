use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};

use turn_arena::prelude::*;
use turn_arena::wrappers::{ActionFormatting, NormalizeAction, ObservationWindow, TurnLimit};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PairingArg {
    RoundRobin,
    Random,
    Swiss,
    Bracket,
}

/// Run turn-based text game matches between agents.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Registered game identifier.
    #[arg(long)]
    game: String,

    /// Agent descriptor `name=kind[:args]`, e.g. `rocky=fixed:rock`. Repeat for each agent.
    #[arg(long = "agent", required = true)]
    agents: Vec<AgentSpec>,

    /// Seats per match.
    #[arg(long, default_value_t = 2)]
    players: usize,

    /// Matches running at the same time (default: number of CPUs).
    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long, value_enum, default_value_t = PairingArg::RoundRobin)]
    pairing: PairingArg,

    /// Round robin repetitions, or Swiss rounds (default: log2 of the agent count).
    #[arg(long)]
    rounds: Option<usize>,

    /// Number of matches for random pairing.
    #[arg(long, default_value_t = 10)]
    matches: usize,

    /// Bracket match as comma separated agent names in seat order. Repeat for each match.
    #[arg(long = "match")]
    bracket: Vec<String>,

    #[arg(long)]
    seed: Option<u64>,

    /// forfeit, skip or abort.
    #[arg(long)]
    failure_policy: Option<FailurePolicy>,

    #[arg(long)]
    match_timeout_ms: Option<u64>,

    #[arg(long)]
    max_turns: Option<u64>,

    /// Game option `key=value`; the value is parsed as JSON when possible.
    #[arg(long = "option", value_parser = parse_option)]
    options: Vec<(String, serde_json::Value)>,

    /// Append one JSON line per finished match to this file.
    #[arg(long)]
    results: Option<PathBuf>,

    /// Exit with failure when more than this fraction of matches ended in `agent_failure`.
    #[arg(long, default_value_t = 1.0)]
    max_failure_rate: f64,

    /// Normalize actions (trim, lowercase, add brackets) before the game sees them.
    #[arg(long)]
    normalize: bool,

    /// Only show agents the last N observation entries.
    #[arg(long)]
    window: Option<usize>,

    /// Truncate matches at this turn with a wrapper.
    #[arg(long)]
    turn_limit: Option<u64>,

    /// Log to a timestamped file.
    #[arg(long)]
    log: bool,

    /// Do not print match progress.
    #[arg(long)]
    quiet: bool,
}

fn parse_option(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("`{s}` is not key=value"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::from(value));
    Ok((key.trim().to_string(), value))
}

fn config_from(args: &Args) -> anyhow::Result<ArenaConfig> {
    let mut config = ArenaConfig::from_env()?;
    if let Some(n) = args.concurrency {
        config = config.with_max_concurrency(n);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(policy) = args.failure_policy {
        config = config.with_failure_policy(policy);
    }
    if let Some(ms) = args.match_timeout_ms {
        config = config.with_match_timeout(Duration::from_millis(ms));
    }
    if let Some(path) = &args.results {
        config = config.with_results_path(path);
    }
    if args.log {
        config = config.with_log(true);
    }
    if args.quiet {
        config = config.with_verbose(false);
    }

    let mut game = GameConfig::new();
    if let Some(max_turns) = args.max_turns {
        game = game.with_max_turns(max_turns);
    }
    for (key, value) in &args.options {
        game = game.with_option(key.clone(), value.clone());
    }
    Ok(config.with_game_config(game))
}

fn strategy_from(args: &Args, seed: u64) -> anyhow::Result<Box<dyn TournamentStrategy>> {
    Ok(match args.pairing {
        PairingArg::RoundRobin => Box::new(
            RoundRobinTournament::new(false)
                .with_players_per_match(args.players)
                .with_rounds(args.rounds.unwrap_or(1)),
        ),
        PairingArg::Random => Box::new(RandomSampling::new(args.matches, args.players, seed)),
        PairingArg::Swiss => {
            if args.players != 2 {
                bail!("swiss pairing needs 2 players per match");
            }
            Box::new(SwissTournament::new(args.rounds.unwrap_or(0), 2))
        }
        PairingArg::Bracket => {
            if args.bracket.is_empty() {
                bail!("bracket pairing needs at least one --match");
            }
            let matches = args
                .bracket
                .iter()
                .map(|m| m.split(',').map(|n| n.trim().to_string()).collect())
                .collect();
            Box::new(FixedBracket::new(matches))
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let config = config_from(&args)?;
    let strategy = strategy_from(&args, config.seed())?;

    let registry = Registry::with_builtins()?.install()?;
    let contestants = registry.contestants(&args.agents)?;

    let (normalize, window, turn_limit) = (args.normalize, args.window, args.turn_limit);
    let mut arena = Arena::new(registry, config)?;
    if normalize || window.is_some() || turn_limit.is_some() {
        arena = arena.with_wrappers(move |env| {
            let mut stack = Wrapped::from_boxed(env);
            if normalize {
                stack = stack.with(NormalizeAction).with(ActionFormatting);
            }
            if let Some(n) = window {
                stack = stack.with(ObservationWindow(n));
            }
            if let Some(max) = turn_limit {
                stack = stack.with(TurnLimit::new(max));
            }
            Box::new(stack)
        });
    }

    let report = arena
        .run(&args.game, contestants, strategy)
        .await
        .with_context(|| format!("run of {} aborted", args.game))?;

    println!();
    println!("{} matches of {}", report.results.len(), report.game);
    for (rank, standing) in report.standings.iter().enumerate() {
        println!("{:>3}. {standing}", rank + 1);
    }

    let rate = report.failure_rate();
    if rate > args.max_failure_rate {
        eprintln!(
            "{:.0}% of matches ended in agent_failure (allowed: {:.0}%)",
            rate * 100.0,
            args.max_failure_rate * 100.0
        );
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
