//! Vote tally and the values derived from it

use serde::{Deserialize, Serialize};

use crate::game::Lane;

/// Vote counters for the current round (the `votes` slot)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    #[serde(default)]
    pub left: u64,
    #[serde(default)]
    pub stay: u64,
    #[serde(default)]
    pub right: u64,
}

impl VoteTally {
    #[cfg(test)]
    pub fn new(left: u64, stay: u64, right: u64) -> Self {
        Self { left, stay, right }
    }

    pub fn total(&self) -> u64 {
        self.left + self.stay + self.right
    }

    /// Whole-number share of each counter, all zero when nobody voted
    pub fn percentages(&self) -> Percentages {
        let total = self.total();
        if total == 0 {
            return Percentages::default();
        }
        let share = |votes: u64| (votes as f64 / total as f64 * 100.0).round() as u32;
        Percentages {
            left: share(self.left),
            stay: share(self.stay),
            right: share(self.right),
        }
    }

    /// Winning lane. `left` is checked first, then `right`, and `stay` takes
    /// whatever remains, so a three-way tie goes left. An empty tally keeps
    /// `previous`.
    pub fn winner(&self, previous: Lane) -> Lane {
        if self.total() == 0 {
            return previous;
        }

        let VoteTally { left, stay, right } = *self;
        if left >= stay && left >= right {
            Lane::Left
        } else if right >= stay && right >= left {
            Lane::Right
        } else {
            Lane::Center
        }
    }
}

/// Rounded vote shares in percent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Percentages {
    pub left: u32,
    pub stay: u32,
    pub right: u32,
}

/// Everything the presentation layer needs about the current vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSummary {
    pub votes: VoteTally,
    pub total_votes: u64,
    pub percentages: Percentages,
    pub winner: Lane,
}

impl VoteSummary {
    pub fn derive(votes: VoteTally, previous_winner: Lane) -> Self {
        Self {
            votes,
            total_votes: votes.total(),
            percentages: votes.percentages(),
            winner: votes.winner(previous_winner),
        }
    }
}

impl Default for VoteSummary {
    fn default() -> Self {
        Self::derive(VoteTally::default(), Lane::Center)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_way_tie_goes_left() {
        assert_eq!(VoteTally::new(5, 5, 5).winner(Lane::Center), Lane::Left);
    }

    #[test]
    fn left_right_tie_over_stay_goes_left() {
        assert_eq!(VoteTally::new(5, 3, 5).winner(Lane::Center), Lane::Left);
    }

    #[test]
    fn right_beats_tied_stay_when_left_trails() {
        // left loses to both, right >= stay and right >= left
        assert_eq!(VoteTally::new(3, 5, 5).winner(Lane::Center), Lane::Right);
    }

    #[test]
    fn stay_wins_only_with_a_strict_majority_over_both_sides() {
        assert_eq!(VoteTally::new(1, 4, 2).winner(Lane::Left), Lane::Center);
        assert_eq!(VoteTally::new(0, 1, 0).winner(Lane::Right), Lane::Center);
    }

    #[test]
    fn empty_tally_keeps_the_previous_winner() {
        assert_eq!(VoteTally::default().winner(Lane::Right), Lane::Right);
        assert_eq!(VoteSummary::default().winner, Lane::Center);
    }

    #[test]
    fn percentages_round_each_share() {
        let pct = VoteTally::new(1, 1, 1).percentages();
        assert_eq!(pct, Percentages { left: 33, stay: 33, right: 33 });

        let pct = VoteTally::new(2, 1, 0).percentages();
        assert_eq!(pct, Percentages { left: 67, stay: 33, right: 0 });
    }

    #[test]
    fn single_left_vote_is_one_hundred_percent() {
        let summary = VoteSummary::derive(VoteTally::new(1, 0, 0), Lane::Center);
        assert_eq!(summary.total_votes, 1);
        assert_eq!(summary.percentages, Percentages { left: 100, stay: 0, right: 0 });
        assert_eq!(summary.winner, Lane::Left);
    }

    #[test]
    fn total_is_the_sum_of_counters() {
        let tally = VoteTally::new(4, 7, 9);
        assert_eq!(tally.total(), 20);
    }
}
