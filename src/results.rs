//! Match outcomes and the run-wide result collection.
//!
//! Every finished match produces one immutable [`MatchResult`]. Concurrent matches hand their
//! results to a single [`ResultCollector`], which is the only object written by more than one
//! match; appends take a write lock, progress reads share a read lock.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::observation::{Info, PlayerId};
use crate::state::TerminationReason;

/// One seat of a finished match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Contestant name.
    pub name: String,
    pub seat: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub reward: f64,
}

/// Immutable record of a finished match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Unique within a run.
    pub match_id: u64,
    pub game: String,
    pub players: Vec<PlayerRecord>,
    pub reason: TerminationReason,
    /// Seat responsible for `agent_failure` or `illegal_action`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_player: Option<PlayerId>,
    pub turns: u64,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub info: Info,
}

impl MatchResult {
    pub fn rewards(&self) -> Vec<f64> {
        self.players.iter().map(|p| p.reward).collect()
    }

    pub fn player(&self, name: &str) -> Option<&PlayerRecord> {
        self.players.iter().find(|p| p.name == name)
    }

    /// The player with the strictly highest reward, if any.
    pub fn winner(&self) -> Option<&PlayerRecord> {
        let best = self
            .players
            .iter()
            .max_by(|a, b| a.reward.total_cmp(&b.reward))?;
        let tied = self
            .players
            .iter()
            .filter(|p| p.reward == best.reward)
            .count();
        (tied == 1).then_some(best)
    }

    pub fn is_agent_failure(&self) -> bool {
        self.reason == TerminationReason::AgentFailure
    }

    /// Outcome of `name` in this match, or `None` if it did not play.
    pub fn outcome_of(&self, name: &str) -> Option<Outcome> {
        let me = self.player(name)?;
        let best = self
            .players
            .iter()
            .map(|p| p.reward)
            .fold(f64::NEG_INFINITY, f64::max);
        if me.reward < best {
            return Some(Outcome::Loss);
        }
        match self.winner() {
            Some(_) => Some(Outcome::Win),
            None => Some(Outcome::Draw),
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self
            .players
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(" vs ");
        let rewards = self
            .players
            .iter()
            .map(|p| format!("{}", p.reward))
            .collect::<Vec<_>>()
            .join("-");
        write!(
            f,
            "#{} {names}: {rewards} ({}, {} turns)",
            self.match_id, self.reason, self.turns
        )
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Outcome of one player in one match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Draw,
    Loss,
}

/// Shared, append-only collection of match results.
#[derive(Debug, Clone, Default)]
pub struct ResultCollector {
    inner: Arc<RwLock<Collected>>,
}

#[derive(Debug, Default)]
struct Collected {
    results: Vec<MatchResult>,
    ids: HashSet<u64>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `result`. Returns `false`, leaving the collection untouched, if a result with the
    /// same match id was already recorded.
    pub fn record(&self, result: MatchResult) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !guard.ids.insert(result.match_id) {
            warn!(match_id = result.match_id, "result recorded twice, ignoring");
            return false;
        }
        guard.results.push(result);
        true
    }

    pub fn len(&self) -> usize {
        self.read(|c| c.results.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, match_id: u64) -> bool {
        self.read(|c| c.ids.contains(&match_id))
    }

    pub fn failures(&self) -> usize {
        self.read(|c| c.results.iter().filter(|r| r.is_agent_failure()).count())
    }

    /// Copy of the results, ordered by match id.
    pub fn snapshot(&self) -> Vec<MatchResult> {
        let mut results = self.read(|c| c.results.clone());
        results.sort_by_key(|r| r.match_id);
        results
    }

    fn read<T>(&self, f: impl FnOnce(&Collected) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }
}

/// Leaderboard line of one contestant.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Standing {
    pub name: String,
    pub matches: u32,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    /// Matches this contestant's agent failed (`agent_failure` attributed to its seat).
    pub failures: u32,
    pub total_reward: f64,
}

impl Standing {
    pub fn mean_reward(&self) -> f64 {
        if self.matches == 0 {
            0.0
        } else {
            self.total_reward / f64::from(self.matches)
        }
    }
}

impl fmt::Display for Standing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: win: {}, draw: {}, loss: {}, failures: {}, reward: {:.2} (mean {:.2} over {} matches)",
            self.name,
            self.wins,
            self.draws,
            self.losses,
            self.failures,
            self.total_reward,
            self.mean_reward(),
            self.matches
        )
    }
}

/// Aggregate `results` per contestant, best first.
///
/// Ranked by wins, then draws, then total reward; names break the remaining ties.
pub fn standings(results: &[MatchResult]) -> Vec<Standing> {
    let mut table: BTreeMap<&str, Standing> = BTreeMap::new();
    for result in results {
        for player in &result.players {
            let entry = table.entry(player.name.as_str()).or_insert_with(|| Standing {
                name: player.name.clone(),
                ..Default::default()
            });
            entry.matches += 1;
            entry.total_reward += player.reward;
            match result.outcome_of(&player.name) {
                Some(Outcome::Win) => entry.wins += 1,
                Some(Outcome::Draw) => entry.draws += 1,
                Some(Outcome::Loss) | None => entry.losses += 1,
            }
            if result.is_agent_failure() && result.failed_player == Some(player.seat) {
                entry.failures += 1;
            }
        }
    }
    let mut table = table.into_values().collect::<Vec<_>>();
    table.sort_by(|a, b| {
        b.wins
            .cmp(&a.wins)
            .then(b.draws.cmp(&a.draws))
            .then(b.total_reward.total_cmp(&a.total_reward))
            .then(a.name.cmp(&b.name))
    });
    table
}
