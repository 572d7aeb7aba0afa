//! Pairing policies used by the arena to schedule matches.
//!
//! This module defines the [`TournamentStrategy`] trait and the built-in strategies. The arena
//! calls `add_agents` once, then repeatedly calls `advance_round` with the results of the
//! previous round until it returns an empty list.
//!
//! # Provided Strategies
//! - [`RoundRobinTournament`]: Every group of contestants plays once. Quite slow.
//! - [`FixedBracket`]: Explicit list of matches, by contestant name.
//! - [`RandomSampling`]: A fixed number of matches between uniformly drawn contestants.
//! - [`SwissTournament`]: Pairings based on score. Much faster than Round Robin.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    sync::Arc,
};

use anyhow::{bail, ensure};
use rand::{
    rngs::SmallRng,
    seq::{IndexedRandom, SliceRandom},
    SeedableRng,
};
use tracing::{debug, info, warn};

use crate::{contestant::Contestant, results::MatchResult};

/// Contestants of one match, in seat order.
pub type Pairing = Vec<Arc<Contestant>>;

/// How contestants are grouped into matches.
pub trait TournamentStrategy: Send {
    /// Adds the contestants of the run. Called once, before the first round.
    ///
    /// # Error
    /// When the contestants cannot fill a single match for this strategy.
    fn add_agents(&mut self, agents: Vec<Arc<Contestant>>) -> anyhow::Result<()>;

    /// Returns the matches of the next round, given the results of the previous one.
    ///
    /// If the returned list is empty, the run is finished.
    fn advance_round(&mut self, results: &[MatchResult]) -> Vec<Pairing>;

    /// Seats per match. Every pairing returned by `advance_round` has this length.
    fn players_per_match(&self) -> usize;
}

impl<T: TournamentStrategy + ?Sized> TournamentStrategy for Box<T> {
    fn add_agents(&mut self, agents: Vec<Arc<Contestant>>) -> anyhow::Result<()> {
        (**self).add_agents(agents)
    }

    fn advance_round(&mut self, results: &[MatchResult]) -> Vec<Pairing> {
        (**self).advance_round(results)
    }

    fn players_per_match(&self) -> usize {
        (**self).players_per_match()
    }
}

fn ensure_enough(agents: &[Arc<Contestant>], players_per_match: usize) -> anyhow::Result<()> {
    ensure!(players_per_match >= 1, "a match needs at least one player");
    ensure!(
        agents.len() >= players_per_match,
        "{} contestants cannot fill a {players_per_match} player match",
        agents.len()
    );
    Ok(())
}

/// Every `k`-subset of `0..n`, in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = vec![];
    if k == 0 || k > n {
        return out;
    }
    let mut idx = (0..k).collect::<Vec<_>>();
    loop {
        out.push(idx.clone());
        let mut i = k;
        loop {
            if i == 0 {
                return out;
            }
            i -= 1;
            if idx[i] != i + n - k {
                break;
            }
        }
        idx[i] += 1;
        for j in i + 1..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}

/// A round-robin tournament where every group of `players_per_match` contestants meets.
///
/// If `symmetric` is false, each group is also played with every rotation of its seats
/// (A vs B and B vs A for two players).
pub struct RoundRobinTournament {
    agents: Vec<Arc<Contestant>>,
    players_per_match: usize,
    symmetric: bool,
    rounds: usize,
    round: usize,
}

impl RoundRobinTournament {
    /// Creates a new two-player Round Robin tournament, played once.
    ///
    /// Set `symmetric = true` if A vs B is equivalent to B vs A.
    pub fn new(symmetric: bool) -> Self {
        Self {
            agents: vec![],
            players_per_match: 2,
            symmetric,
            rounds: 1,
            round: 0,
        }
    }

    pub fn with_players_per_match(mut self, players_per_match: usize) -> Self {
        self.players_per_match = players_per_match;
        self
    }

    /// Play the whole schedule `rounds` times.
    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds;
        self
    }
}

impl TournamentStrategy for RoundRobinTournament {
    fn add_agents(&mut self, agents: Vec<Arc<Contestant>>) -> anyhow::Result<()> {
        ensure_enough(&agents, self.players_per_match)?;
        self.agents = agents;
        Ok(())
    }

    fn advance_round(&mut self, _results: &[MatchResult]) -> Vec<Pairing> {
        if self.round >= self.rounds {
            return vec![];
        }
        self.round += 1;

        let mut pending = vec![];
        for group in combinations(self.agents.len(), self.players_per_match) {
            let seats = if self.symmetric { 1 } else { group.len() };
            for shift in 0..seats {
                let mut group = group.clone();
                group.rotate_left(shift);
                pending.push(group.iter().map(|&i| self.agents[i].clone()).collect());
            }
        }
        debug!(round = self.round, matches = pending.len(), "round robin schedule");
        pending
    }

    fn players_per_match(&self) -> usize {
        self.players_per_match
    }
}

/// An explicit list of matches, each given as contestant names in seat order.
pub struct FixedBracket {
    names: Vec<Vec<String>>,
    pairings: Vec<Pairing>,
    players_per_match: usize,
}

impl FixedBracket {
    pub fn new(matches: Vec<Vec<String>>) -> Self {
        let players_per_match = matches.first().map_or(2, Vec::len);
        Self {
            names: matches,
            pairings: vec![],
            players_per_match,
        }
    }
}

impl TournamentStrategy for FixedBracket {
    fn add_agents(&mut self, agents: Vec<Arc<Contestant>>) -> anyhow::Result<()> {
        let by_name = agents
            .iter()
            .map(|a| (a.name.as_str(), a))
            .collect::<HashMap<_, _>>();
        let mut pairings = Vec::with_capacity(self.names.len());
        for names in &self.names {
            ensure!(
                names.len() == self.players_per_match,
                "bracket mixes {} and {} player matches",
                self.players_per_match,
                names.len()
            );
            let mut seen = HashSet::new();
            let mut pairing = Vec::with_capacity(names.len());
            for name in names {
                let Some(agent) = by_name.get(name.as_str()) else {
                    bail!("bracket names unknown contestant `{name}`");
                };
                ensure!(seen.insert(name), "`{name}` cannot play against itself");
                pairing.push(Arc::clone(agent));
            }
            pairings.push(pairing);
        }
        self.pairings = pairings;
        Ok(())
    }

    fn advance_round(&mut self, _results: &[MatchResult]) -> Vec<Pairing> {
        std::mem::take(&mut self.pairings)
    }

    fn players_per_match(&self) -> usize {
        self.players_per_match
    }
}

/// `matches` matches, each between `players_per_match` distinct contestants drawn uniformly.
///
/// Seats are shuffled too. Reproducible from `seed`.
pub struct RandomSampling {
    agents: Vec<Arc<Contestant>>,
    matches: usize,
    players_per_match: usize,
    rng: SmallRng,
    done: bool,
}

impl RandomSampling {
    pub fn new(matches: usize, players_per_match: usize, seed: u64) -> Self {
        Self {
            agents: vec![],
            matches,
            players_per_match,
            rng: SmallRng::seed_from_u64(seed),
            done: false,
        }
    }
}

impl TournamentStrategy for RandomSampling {
    fn add_agents(&mut self, agents: Vec<Arc<Contestant>>) -> anyhow::Result<()> {
        ensure_enough(&agents, self.players_per_match)?;
        self.agents = agents;
        Ok(())
    }

    fn advance_round(&mut self, _results: &[MatchResult]) -> Vec<Pairing> {
        if self.done {
            return vec![];
        }
        self.done = true;
        (0..self.matches)
            .map(|_| {
                let mut pairing = self
                    .agents
                    .choose_multiple(&mut self.rng, self.players_per_match)
                    .cloned()
                    .collect::<Vec<_>>();
                pairing.shuffle(&mut self.rng);
                pairing
            })
            .collect()
    }

    fn players_per_match(&self) -> usize {
        self.players_per_match
    }
}

/// Score summary of a contestant in a Swiss tournament.
#[derive(PartialEq, Eq, PartialOrd, Ord, Default, Debug, Clone, Copy)]
pub struct SwissScore {
    /// Number of wins.
    pub num_win: u32,
    /// Number of draws.
    pub num_draw: u32,
    /// Number of losses.
    pub num_lose: u32,
    /// Median of opponents' points.
    pub tie_breaker: u32,
}

impl SwissScore {
    /// Two points per win, one per draw.
    pub fn points(&self) -> u32 {
        self.num_win * 2 + self.num_draw
    }
}

impl fmt::Display for SwissScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "win: {}, draw: {}, lose: {}, tie-breaker: {}",
            self.num_win, self.num_draw, self.num_lose, self.tie_breaker
        )
    }
}

/// A Swiss-style tournament for two-player games. Does not follow strictly the Swiss
/// tournament rules.
///
/// Contestants are paired based on their current score. The number of rounds can be fixed,
/// or automatically determined as `ceil(log2(num_players))`.
pub struct SwissTournament {
    agents: Vec<Arc<Contestant>>,
    round: usize,
    max_rounds: usize,
    num_match_per_pair: usize,
    scores: HashMap<Arc<Contestant>, (SwissScore, HashSet<Arc<Contestant>>)>,
    bye_history: HashSet<Arc<Contestant>>,
}

impl SwissTournament {
    /// Swiss tournament with `ceil(log2(n))` rounds.
    pub fn with_auto_rounds(num_match_per_pair: usize) -> Self {
        Self::new(0, num_match_per_pair)
    }

    /// Creates a new Swiss tournament with a specified number of rounds and matches per pair.
    ///
    /// If `max_rounds` is set to `0`, this is equivalent to using
    /// [`with_auto_rounds`](Self::with_auto_rounds).
    ///
    /// Each pair plays `num_match_per_pair` matches per round (at least one), alternating
    /// seats. Their rewards are summed into a single win/draw/loss outcome.
    pub fn new(max_rounds: usize, num_match_per_pair: usize) -> Self {
        Self {
            agents: vec![],
            round: 0,
            max_rounds,
            num_match_per_pair: num_match_per_pair.max(1),
            scores: HashMap::new(),
            bye_history: HashSet::new(),
        }
    }

    /// Current score of every contestant, by name.
    pub fn scores(&self) -> BTreeMap<String, SwissScore> {
        self.scores
            .iter()
            .map(|(agent, (score, _))| (agent.name.clone(), *score))
            .collect()
    }

    fn score_mut(&mut self, agent: &Arc<Contestant>) -> Option<&mut (SwissScore, HashSet<Arc<Contestant>>)> {
        self.scores.get_mut(agent)
    }

    fn update_tie_breakers(&mut self) {
        // Median tie-breaker: sum of the opponents' points, minus extrema
        // https://en.wikipedia.org/wiki/Tie-breaking_in_Swiss-system_tournaments#Median_/_Buchholz_/_Solkoff
        let points = self
            .scores
            .iter()
            .map(|(agent, (score, _))| (agent.clone(), score.points()))
            .collect::<HashMap<_, _>>();
        for (score, opponents) in self.scores.values_mut() {
            let adv = opponents
                .iter()
                .filter_map(|o| points.get(o).copied())
                .collect::<Vec<_>>();
            let min = adv.iter().min().copied().unwrap_or(0);
            let max = adv.iter().max().copied().unwrap_or(0);
            score.tie_breaker = if adv.len() <= 1 {
                0
            } else {
                adv.iter().sum::<u32>() - min - max
            };
        }
    }

    fn update_scores(&mut self, results: &[MatchResult]) {
        let by_name = self
            .agents
            .iter()
            .map(|a| (a.name.clone(), a.clone()))
            .collect::<HashMap<_, _>>();
        let mut pair_results: BTreeMap<(u32, u32), (Arc<Contestant>, Arc<Contestant>, f64, f64)> =
            BTreeMap::new();

        // 1. aggregate rewards per pair
        for result in results {
            let [pa, pb] = result.players.as_slice() else {
                warn!(match_id = result.match_id, "not a two player match, ignored");
                continue;
            };
            let (Some(a), Some(b)) = (by_name.get(&pa.name), by_name.get(&pb.name)) else {
                warn!(match_id = result.match_id, "result for unknown contestants, ignored");
                continue;
            };
            let (first, second, ra, rb) = if a.id < b.id {
                (a, b, pa.reward, pb.reward)
            } else {
                (b, a, pb.reward, pa.reward)
            };
            let entry = pair_results
                .entry((first.id, second.id))
                .or_insert_with(|| (first.clone(), second.clone(), 0.0, 0.0));
            entry.2 += ra;
            entry.3 += rb;
        }

        // 2. update swiss score
        for (a, b, score_a, score_b) in pair_results.into_values() {
            info!("Aggregated results {} VS {}: {score_a}-{score_b}", a.name, b.name);
            let (outcome_a, outcome_b) = if (score_a - score_b).abs() < f64::EPSILON {
                (0, 0)
            } else if score_a > score_b {
                (1, -1)
            } else {
                (-1, 1)
            };
            for (me, other, outcome) in [(&a, &b, outcome_a), (&b, &a, outcome_b)] {
                if let Some((score, opponents)) = self.score_mut(me) {
                    match outcome {
                        1 => score.num_win += 1,
                        0 => score.num_draw += 1,
                        _ => score.num_lose += 1,
                    }
                    opponents.insert(other.clone());
                }
            }
        }
    }

    fn has_played(&self, a: &Arc<Contestant>, b: &Arc<Contestant>) -> bool {
        self.scores.get(a).is_some_and(|(_, opp)| opp.contains(b))
    }

    fn create_next_round_pairings(&mut self) -> Vec<(Arc<Contestant>, Arc<Contestant>)> {
        // 1. Group by points, best tie-breaker first within a group
        let mut score_groups: BTreeMap<u32, Vec<Arc<Contestant>>> = BTreeMap::new();
        for agent in &self.agents {
            let points = self.scores.get(agent).map_or(0, |(s, _)| s.points());
            score_groups.entry(points).or_default().push(agent.clone());
        }
        for group in score_groups.values_mut() {
            group.sort_by_key(|a| {
                std::cmp::Reverse(self.scores.get(a).map_or(0, |(s, _)| s.tie_breaker))
            });
        }

        // 2. Try to pair within each group
        let mut pairings = vec![];
        let mut leftovers = vec![];

        for (_points, group) in score_groups.iter_mut().rev() {
            // leftovers of the better group go last: same-group pairing has priority
            group.append(&mut leftovers);

            let mut i = 0;
            while i + 1 < group.len() {
                let a = &group[i];
                let partner = (i + 1..group.len()).find(|&j| !self.has_played(a, &group[j]));
                match partner {
                    Some(j) => {
                        pairings.push((group[i].clone(), group[j].clone()));
                        // j > i: remove b first
                        group.swap_remove(j);
                        group.swap_remove(i);
                    }
                    None => i += 1,
                }
            }

            // Any unpaired contestant floats to the next group
            leftovers.append(group);
        }

        // 3. Bye for every contestant left without a valid opponent
        for agent in leftovers {
            if self.bye_history.contains(&agent) {
                warn!(
                    "{} already received a bye, assigning another one due to no valid opponents",
                    agent.name
                );
            } else {
                info!("{} receives a bye", agent.name);
            }
            self.bye_history.insert(agent.clone());
            if let Some((score, _)) = self.score_mut(&agent) {
                score.num_win += 1;
            }
        }
        pairings
    }
}

impl TournamentStrategy for SwissTournament {
    fn add_agents(&mut self, agents: Vec<Arc<Contestant>>) -> anyhow::Result<()> {
        ensure_enough(&agents, 2)?;
        self.agents = agents;
        if self.max_rounds == 0 {
            let n = self.agents.len();
            self.max_rounds = (n as f64).log2().ceil() as usize;
            info!("Swiss tournament auto number of rounds: {}", self.max_rounds);
        }
        for agent in &self.agents {
            self.scores
                .insert(agent.clone(), (SwissScore::default(), HashSet::new()));
        }
        Ok(())
    }

    fn advance_round(&mut self, results: &[MatchResult]) -> Vec<Pairing> {
        self.update_scores(results);
        self.update_tie_breakers();

        if self.round >= self.max_rounds {
            return vec![];
        }
        self.round += 1;

        let mut pending = vec![];
        for (a, b) in self.create_next_round_pairings() {
            for k in 0..self.num_match_per_pair {
                if k % 2 == 0 {
                    pending.push(vec![a.clone(), b.clone()]);
                } else {
                    pending.push(vec![b.clone(), a.clone()]);
                }
            }
        }
        pending
    }

    fn players_per_match(&self) -> usize {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, ScriptedAgent};
    use crate::results::tests::result;
    use crate::state::TerminationReason;

    fn contestants(n: u32) -> Vec<Arc<Contestant>> {
        (0..n)
            .map(|i| {
                Arc::new(Contestant::from_fn(i, format!("p{i}"), |_| -> Box<dyn Agent> {
                    Box::new(ScriptedAgent::fixed("x", "x"))
                }))
            })
            .collect()
    }

    fn names(pairing: &Pairing) -> Vec<&str> {
        pairing.iter().map(|a| a.name.as_str()).collect()
    }

    #[test]
    fn combinations_are_lexicographic() {
        assert_eq!(combinations(3, 2), vec![vec![0, 1], vec![0, 2], vec![1, 2]]);
        assert_eq!(combinations(4, 4).len(), 1);
        assert!(combinations(2, 3).is_empty());
    }

    #[test]
    fn round_robin_never_pairs_a_contestant_with_itself() {
        let mut rr = RoundRobinTournament::new(true);
        rr.add_agents(contestants(4)).unwrap();
        let round = rr.advance_round(&[]);
        assert_eq!(round.len(), 6);
        assert!(round.iter().all(|p| p[0] != p[1]));
        assert!(rr.advance_round(&[]).is_empty());

        let mut rr = RoundRobinTournament::new(false).with_rounds(2);
        rr.add_agents(contestants(3)).unwrap();
        let round = rr.advance_round(&[]);
        assert_eq!(round.len(), 6);
        assert_eq!(names(&round[0]), ["p0", "p1"]);
        assert_eq!(names(&round[1]), ["p1", "p0"]);
        assert_eq!(rr.advance_round(&[]).len(), 6);
        assert!(rr.advance_round(&[]).is_empty());
    }

    #[test]
    fn round_robin_needs_enough_contestants() {
        let mut rr = RoundRobinTournament::new(true).with_players_per_match(3);
        assert!(rr.add_agents(contestants(2)).is_err());
    }

    #[test]
    fn fixed_bracket_resolves_names() {
        let mut bracket = FixedBracket::new(vec![
            vec!["p1".into(), "p0".into()],
            vec!["p2".into(), "p1".into()],
        ]);
        bracket.add_agents(contestants(3)).unwrap();
        let round = bracket.advance_round(&[]);
        assert_eq!(names(&round[0]), ["p1", "p0"]);
        assert!(bracket.advance_round(&[]).is_empty());

        let mut bad = FixedBracket::new(vec![vec!["p0".into(), "nobody".into()]]);
        assert!(bad.add_agents(contestants(2)).is_err());
        let mut selfplay = FixedBracket::new(vec![vec!["p0".into(), "p0".into()]]);
        assert!(selfplay.add_agents(contestants(2)).is_err());
    }

    #[test]
    fn random_sampling_is_reproducible() {
        let draw = |seed| {
            let mut s = RandomSampling::new(10, 2, seed);
            s.add_agents(contestants(5)).unwrap();
            s.advance_round(&[])
                .iter()
                .map(|p| names(p).join(","))
                .collect::<Vec<_>>()
        };
        let a = draw(3);
        assert_eq!(a.len(), 10);
        assert_eq!(a, draw(3));
        for pairing in &a {
            let (x, y) = pairing.split_once(',').unwrap();
            assert_ne!(x, y);
        }
    }

    #[test]
    fn swiss_pairs_by_score() {
        let agents = contestants(4);
        let mut swiss = SwissTournament::with_auto_rounds(1);
        swiss.add_agents(agents).unwrap();
        let first = swiss.advance_round(&[]);
        assert_eq!(first.len(), 2);

        // the first seat of every match wins
        let results = first
            .iter()
            .enumerate()
            .map(|(i, p)| {
                result(
                    i as u64,
                    &[(p[0].name.as_str(), 1.0), (p[1].name.as_str(), 0.0)],
                    TerminationReason::GameOver,
                )
            })
            .collect::<Vec<_>>();
        let winners = first.iter().map(|p| p[0].name.clone()).collect::<HashSet<_>>();
        let second = swiss.advance_round(&results);
        assert_eq!(second.len(), 2);
        // winners meet winners
        let meets = second
            .iter()
            .find(|p| winners.contains(&p[0].name))
            .unwrap();
        assert!(winners.contains(&meets[1].name));

        assert!(swiss.advance_round(&[]).is_empty());
        let scores = swiss.scores();
        assert_eq!(scores.values().map(|s| s.num_win).sum::<u32>(), 2);
    }
}
