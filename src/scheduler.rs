//! Turn ownership: who may act, when a turn is complete, and stalemate detection.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ArenaError;
use crate::observation::PlayerId;

/// How players take turns.
///
/// - `Sequential`: one player after the other (chess)
/// - `Simultaneous`: everyone plays at the same time (rock-paper-scissors)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    #[default]
    Sequential,
    Simultaneous,
}

/// Tracks whose turn(s) are open.
///
/// In `Sequential` mode exactly one player is active and the turn rotates along `order`.
/// In `Simultaneous` mode every player in `order` must submit before the turn completes.
#[derive(Debug, Clone)]
pub struct TurnScheduler {
    mode: TurnMode,
    order: Vec<PlayerId>,
    cursor: usize,
    submitted: BTreeSet<PlayerId>,
    stalled: usize,
    stalemate_limit: usize,
}

impl TurnScheduler {
    /// Scheduler over a game-defined `order` of distinct players `< player_count`.
    pub fn new(
        mode: TurnMode,
        order: Vec<PlayerId>,
        player_count: usize,
        stalemate_limit: usize,
    ) -> Result<Self, ArenaError> {
        if order.is_empty() {
            return Err(ArenaError::config("turn order is empty"));
        }
        let mut seen = BTreeSet::new();
        for &p in &order {
            if p >= player_count {
                return Err(ArenaError::config(format!(
                    "turn order names player {p} but only {player_count} players are seated"
                )));
            }
            if !seen.insert(p) {
                return Err(ArenaError::config(format!(
                    "player {p} appears twice in turn order"
                )));
            }
        }
        Ok(TurnScheduler {
            mode,
            order,
            cursor: 0,
            submitted: BTreeSet::new(),
            stalled: 0,
            stalemate_limit,
        })
    }

    /// Round-robin over `0..player_count`.
    pub fn round_robin(
        mode: TurnMode,
        player_count: usize,
        stalemate_limit: usize,
    ) -> Result<Self, ArenaError> {
        Self::new(mode, (0..player_count).collect(), player_count, stalemate_limit)
    }

    pub fn mode(&self) -> TurnMode {
        self.mode
    }

    /// Players whose turn is currently open.
    pub fn active(&self) -> Vec<PlayerId> {
        match self.mode {
            TurnMode::Sequential => vec![self.order[self.cursor]],
            TurnMode::Simultaneous => self
                .order
                .iter()
                .copied()
                .filter(|p| !self.submitted.contains(p))
                .collect(),
        }
    }

    pub fn is_active(&self, player: PlayerId) -> bool {
        match self.mode {
            TurnMode::Sequential => self.order[self.cursor] == player,
            TurnMode::Simultaneous => {
                self.order.contains(&player) && !self.submitted.contains(&player)
            }
        }
    }

    /// Fails with [`ArenaError::TurnViolation`] if `player` may not act now.
    pub fn check(&self, player: PlayerId) -> Result<(), ArenaError> {
        if self.is_active(player) {
            Ok(())
        } else {
            Err(ArenaError::TurnViolation {
                player,
                active: self.active(),
            })
        }
    }

    /// Mark `player` as having acted. Returns true when the turn is complete.
    pub fn submit(&mut self, player: PlayerId) -> Result<bool, ArenaError> {
        self.check(player)?;
        match self.mode {
            TurnMode::Sequential => Ok(true),
            TurnMode::Simultaneous => {
                self.submitted.insert(player);
                Ok(self.submitted.len() == self.order.len())
            }
        }
    }

    /// Close the current turn and open the next one.
    ///
    /// `progressed` is false when no real action was applied during the turn. Returns true
    /// once the number of consecutive stalled turns exceeds the stalemate limit.
    pub fn complete_turn(&mut self, progressed: bool) -> bool {
        if progressed {
            self.stalled = 0;
        } else {
            self.stalled += 1;
        }
        self.submitted.clear();
        if self.mode == TurnMode::Sequential {
            self.cursor = (self.cursor + 1) % self.order.len();
        }
        self.stalled > self.stalemate_limit
    }

    /// Forget the submissions of the open turn without closing it.
    pub fn reopen_turn(&mut self) {
        self.submitted.clear();
    }

    /// Consecutive turns without progress.
    pub fn stalled(&self) -> usize {
        self.stalled
    }

    pub fn stalemate_limit(&self) -> usize {
        self.stalemate_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_rotates() {
        let mut s = TurnScheduler::round_robin(TurnMode::Sequential, 3, 2).unwrap();
        assert_eq!(s.active(), vec![0]);
        assert!(s.submit(0).unwrap());
        s.complete_turn(true);
        assert_eq!(s.active(), vec![1]);
        assert!(matches!(
            s.check(0),
            Err(ArenaError::TurnViolation { player: 0, .. })
        ));
        s.complete_turn(true);
        s.complete_turn(true);
        assert_eq!(s.active(), vec![0]);
    }

    #[test]
    fn custom_order() {
        let mut s = TurnScheduler::new(TurnMode::Sequential, vec![2, 0, 1], 3, 1).unwrap();
        assert_eq!(s.active(), vec![2]);
        s.complete_turn(true);
        assert_eq!(s.active(), vec![0]);
    }

    #[test]
    fn invalid_orders_are_rejected() {
        assert!(TurnScheduler::new(TurnMode::Sequential, vec![], 2, 1).is_err());
        assert!(TurnScheduler::new(TurnMode::Sequential, vec![0, 0], 2, 1).is_err());
        assert!(TurnScheduler::new(TurnMode::Sequential, vec![0, 3], 2, 1).is_err());
    }

    #[test]
    fn simultaneous_waits_for_everyone() {
        let mut s = TurnScheduler::round_robin(TurnMode::Simultaneous, 2, 1).unwrap();
        assert_eq!(s.active(), vec![0, 1]);
        assert!(!s.submit(1).unwrap());
        assert_eq!(s.active(), vec![0]);
        assert!(s.submit(1).is_err(), "double submission");
        assert!(s.submit(0).unwrap());
        s.complete_turn(true);
        assert_eq!(s.active(), vec![0, 1]);
    }

    #[test]
    fn reopened_turn_waits_for_everyone_again() {
        let mut s = TurnScheduler::round_robin(TurnMode::Simultaneous, 3, 1).unwrap();
        assert!(!s.submit(0).unwrap());
        assert!(!s.submit(2).unwrap());
        s.reopen_turn();
        assert_eq!(s.active(), vec![0, 1, 2]);
        assert_eq!(s.stalled(), 0);
    }

    #[test]
    fn stalemate_after_limit_exceeded() {
        let mut s = TurnScheduler::round_robin(TurnMode::Sequential, 2, 2).unwrap();
        assert!(!s.complete_turn(false));
        assert!(!s.complete_turn(false));
        assert!(s.complete_turn(false));
        assert_eq!(s.stalled(), 3);
        s.complete_turn(true);
        assert_eq!(s.stalled(), 0);
    }
}
