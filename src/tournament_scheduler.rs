use std::collections::VecDeque;
use std::mem;

use tracing::{trace, warn};

use crate::match_runner::MatchSettings;
use crate::results::MatchResult;
use crate::tournament_strategy::{Pairing, TournamentStrategy};

/// Admits the strategy's matches while fewer than `max_concurrency` are running.
///
/// A new round is requested only once every match of the previous round reported back.
pub struct TournamentScheduler<S: TournamentStrategy> {
    results: Vec<MatchResult>,
    max_concurrency: usize,
    pending_matches: VecDeque<Pairing>,
    strategy: S,
    running_matches: usize,
    next_match_id: u64,
    is_finished: bool,
}

impl<S: TournamentStrategy> TournamentScheduler<S> {
    pub fn new(max_concurrency: usize, strategy: S) -> Self {
        TournamentScheduler {
            results: vec![],
            max_concurrency: max_concurrency.max(1),
            pending_matches: VecDeque::new(),
            running_matches: 0,
            strategy,
            next_match_id: 0,
            is_finished: false,
        }
    }

    pub fn advance(&mut self) -> Vec<MatchSettings> {
        // Generate new round if needed
        if self.running_matches == 0 && self.pending_matches.is_empty() && !self.is_finished {
            trace!("next round");
            let players = self.strategy.players_per_match();
            let round = self.strategy.advance_round(&mem::take(&mut self.results));
            self.pending_matches = round
                .into_iter()
                .filter(|pairing| {
                    let ok = pairing.len() == players;
                    if !ok {
                        warn!(expected = players, got = pairing.len(), "dropping malformed pairing");
                    }
                    ok
                })
                .collect();

            if self.pending_matches.is_empty() {
                // no more matches from `strategy`
                trace!("no more matches");
                self.is_finished = true;
            }
        }

        let mut matches_to_run = vec![];
        while self.running_matches < self.max_concurrency {
            let Some(ordered_player) = self.pending_matches.pop_front() else {
                break;
            };
            matches_to_run.push(MatchSettings {
                match_id: self.next_match_id,
                ordered_player,
            });
            self.next_match_id += 1;
            self.running_matches += 1;
        }
        matches_to_run
    }

    pub fn on_result(&mut self, result: MatchResult) -> Vec<MatchSettings> {
        self.results.push(result);
        self.running_matches = self.running_matches.saturating_sub(1);
        self.advance()
    }

    /// All matches ran and finished
    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    pub fn running(&self) -> usize {
        self.running_matches
    }
}
