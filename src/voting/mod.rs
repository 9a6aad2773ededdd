//! Crowd voting: per-direction counters, derived shares and the winning lane

pub mod aggregator;
pub mod tally;

pub use aggregator::{VoteAggregator, VoteFeed};
pub use tally::VoteSummary;

use serde::{Deserialize, Serialize};

/// A single vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDirection {
    Left,
    Stay,
    Right,
}

impl VoteDirection {
    /// Counter key inside the `votes` slot
    pub fn as_str(self) -> &'static str {
        match self {
            VoteDirection::Left => "left",
            VoteDirection::Stay => "stay",
            VoteDirection::Right => "right",
        }
    }
}
