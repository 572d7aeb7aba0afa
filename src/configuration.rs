//! Config for the arena behaviors
//!
//! This module provides configuration options for controlling how the arena runs matches.
//!
//! Configuration can be created programmatically using [`ArenaConfig::new()`] or by reading
//! environment variables using [`ArenaConfig::from_env()`].
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override configuration values. All
//! values are optional. Flags are case-insensitive; set them to `"true"` to enable.
//!
//! - `ARENA_MAX_CONCURRENCY`: Matches running at the same time (default: number of CPUs)
//! - `ARENA_FAILURE_POLICY`: `forfeit`, `skip` or `abort` (default: `forfeit`)
//! - `ARENA_FORFEIT_AWARD`: Reward given to each remaining player on forfeit (default: `1.0`)
//! - `ARENA_MATCH_TIMEOUT_MS`: Wall-clock limit per match in milliseconds (default: none)
//! - `ARENA_INVALID_ACTION_RETRIES`: Resubmissions allowed per turn (default: `3`)
//! - `ARENA_SEED`: Base seed, match `i` uses `seed + i` (default: `0`)
//! - `ARENA_VERBOSE`: Print match progress (default: `true`)
//! - `ARENA_LOG`: Enable logging to a file (default: `false`)
//! - `ARENA_RESULTS`: Append one JSON line per finished match to this file (default: none)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ArenaError;
use crate::game_interface::GameConfig;

/// What the arena does when an agent becomes unavailable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailurePolicy {
    /// End the match with `agent_failure`, granting `award` to every other player.
    Forfeit { award: f64 },
    /// The failing player passes this turn; the match goes on.
    SkipTurn,
    /// End the match with `agent_failure`, no rewards granted.
    Abort,
}

impl FailurePolicy {
    /// A forfeit award is granted as a reward, so it must be finite and non-negative.
    pub fn validate(&self) -> Result<(), ArenaError> {
        match self {
            FailurePolicy::Forfeit { award } if !award.is_finite() || *award < 0.0 => Err(
                ArenaError::config(format!("forfeit award must be finite and >= 0, got {award}")),
            ),
            _ => Ok(()),
        }
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Forfeit { award: 1.0 }
    }
}

impl FromStr for FailurePolicy {
    type Err = ArenaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forfeit" => Ok(FailurePolicy::default()),
            "skip" | "skip_turn" => Ok(FailurePolicy::SkipTurn),
            "abort" => Ok(FailurePolicy::Abort),
            other => Err(ArenaError::config(format!(
                "unknown failure policy `{other}` (expected forfeit, skip or abort)"
            ))),
        }
    }
}

/// Configuration for arena behaviors.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    pub(crate) max_concurrency: usize,
    pub(crate) failure_policy: FailurePolicy,
    pub(crate) match_timeout: Option<Duration>,
    pub(crate) invalid_action_retries: u32,
    pub(crate) seed: u64,
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) results_path: Option<PathBuf>,
    pub(crate) game_config: GameConfig,
}

impl ArenaConfig {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - As many matches run at once as there are CPUs.
    /// - A failing agent forfeits, each opponent receives 1.0.
    /// - Matches have no wall-clock limit.
    /// - Players may resubmit an invalid action 3 times per turn.
    /// - The base seed is 0.
    /// - Progress is printed to stdout; logging to file is disabled.
    /// - Results are not written to disk.
    pub fn new() -> Self {
        Self {
            max_concurrency: num_cpus::get().max(1),
            failure_policy: FailurePolicy::default(),
            match_timeout: None,
            invalid_action_retries: 3,
            seed: 0,
            verbose: true,
            log: false,
            results_path: None,
            game_config: GameConfig::new(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Unset or unparsable values fall back to the defaults of [`ArenaConfig::new`], except
    /// for an unknown `ARENA_FAILURE_POLICY` which is reported as a configuration error.
    pub fn from_env() -> Result<Self, ArenaError> {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn parse<T: FromStr>(var: &str) -> Option<T> {
            std::env::var(var).ok()?.trim().parse().ok()
        }

        let mut config = Self::new();
        if let Some(n) = parse::<usize>("ARENA_MAX_CONCURRENCY") {
            config = config.with_max_concurrency(n);
        }
        if let Ok(policy) = std::env::var("ARENA_FAILURE_POLICY") {
            config.failure_policy = policy.parse()?;
        }
        if let (FailurePolicy::Forfeit { .. }, Some(award)) =
            (config.failure_policy, parse::<f64>("ARENA_FORFEIT_AWARD"))
        {
            config.failure_policy = FailurePolicy::Forfeit { award };
        }
        if let Some(ms) = parse::<u64>("ARENA_MATCH_TIMEOUT_MS") {
            config.match_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(n) = parse::<u32>("ARENA_INVALID_ACTION_RETRIES") {
            config.invalid_action_retries = n;
        }
        if let Some(seed) = parse::<u64>("ARENA_SEED") {
            config.seed = seed;
        }
        config.verbose = get_env_flag("ARENA_VERBOSE", true);
        config.log = get_env_flag("ARENA_LOG", false);
        config.results_path = std::env::var("ARENA_RESULTS").ok().map(PathBuf::from);
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no match could honor.
    ///
    /// # Error
    /// [`ArenaError::Configuration`] for a negative or non-finite forfeit award.
    pub fn validate(&self) -> Result<(), ArenaError> {
        self.failure_policy.validate()
    }

    /// Maximum number of matches in flight. Clamped to at least 1.
    pub fn with_max_concurrency(mut self, value: usize) -> Self {
        self.max_concurrency = value.max(1);
        self
    }

    /// Policy applied when an agent exhausts its retries. Checked by [`ArenaConfig::validate`].
    pub fn with_failure_policy(mut self, value: FailurePolicy) -> Self {
        self.failure_policy = value;
        self
    }

    /// Abort outstanding agent calls and end a match after `value`.
    pub fn with_match_timeout(mut self, value: Duration) -> Self {
        self.match_timeout = Some(value);
        self
    }

    /// How many times a player may resubmit after an invalid action in one turn.
    pub fn with_invalid_action_retries(mut self, value: u32) -> Self {
        self.invalid_action_retries = value;
        self
    }

    /// Base seed for match environments and stochastic agents.
    pub fn with_seed(mut self, value: u64) -> Self {
        self.seed = value;
        self
    }

    /// Enable or disable progress printing.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Append finished matches to a JSON-lines file.
    pub fn with_results_path(mut self, value: impl Into<PathBuf>) -> Self {
        self.results_path = Some(value.into());
        self
    }

    /// Game options passed to every environment the arena creates.
    pub fn with_game_config(mut self, value: GameConfig) -> Self {
        self.game_config = value;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn game_config(&self) -> &GameConfig {
        &self.game_config
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ArenaConfig::new();
        assert!(config.max_concurrency >= 1);
        assert_eq!(config.failure_policy, FailurePolicy::Forfeit { award: 1.0 });
        assert_eq!(config.match_timeout, None);
        assert_eq!(config.invalid_action_retries, 3);
    }

    #[test]
    fn builder_clamps_concurrency() {
        let config = ArenaConfig::new()
            .with_max_concurrency(0)
            .with_failure_policy(FailurePolicy::Abort)
            .with_seed(9);
        assert_eq!(config.max_concurrency(), 1);
        assert_eq!(config.failure_policy(), FailurePolicy::Abort);
        assert_eq!(config.seed, 9);
    }

    #[test]
    fn forfeit_award_must_be_a_valid_reward() {
        for award in [-1.0, f64::NAN, f64::INFINITY] {
            let config = ArenaConfig::new().with_failure_policy(FailurePolicy::Forfeit { award });
            assert!(matches!(config.validate(), Err(ArenaError::Configuration(_))), "{award}");
        }
        let config = ArenaConfig::new().with_failure_policy(FailurePolicy::Forfeit { award: 0.0 });
        assert!(config.validate().is_ok());
        assert!(ArenaConfig::new().validate().is_ok());
    }

    #[test]
    fn parse_failure_policy() {
        assert_eq!("Skip".parse::<FailurePolicy>(), Ok(FailurePolicy::SkipTurn));
        assert_eq!("abort".parse::<FailurePolicy>(), Ok(FailurePolicy::Abort));
        assert!("retry".parse::<FailurePolicy>().is_err());
    }
}
