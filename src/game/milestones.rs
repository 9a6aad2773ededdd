//! Score and market-value milestone progress (read-only)

use serde::Serialize;

/// A fixed milestone and what reaching it unlocks
#[derive(Debug, Clone, Copy)]
pub struct Milestone {
    pub target: u64,
    pub rewards: &'static [&'static str],
}

pub const SCORE_MILESTONES: [Milestone; 4] = [
    Milestone {
        target: 2_000,
        rewards: &["2 holders × 0.008 SOL"],
    },
    Milestone {
        target: 5_000,
        rewards: &["3 holders × 0.01 SOL"],
    },
    Milestone {
        target: 10_000,
        rewards: &["4 holders × 0.012 SOL"],
    },
    Milestone {
        target: 20_000,
        rewards: &["5 holders × 0.015 SOL"],
    },
];

pub const MARKET_MILESTONES: [Milestone; 4] = [
    Milestone {
        target: 30_000,
        rewards: &["DEX Fee Paid", "3 holders x 0.01 SOL"],
    },
    Milestone {
        target: 50_000,
        rewards: &["Face Reveal", "5 holders x 0.01 SOL"],
    },
    Milestone {
        target: 75_000,
        rewards: &["8 holders x 0.015 SOL"],
    },
    Milestone {
        target: 100_000,
        rewards: &["Buyback & Lock", "10 holders x 0.02 SOL"],
    },
];

/// Progress toward one milestone
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneProgress {
    pub target: u64,
    pub label: String,
    pub rewards: Vec<&'static str>,
    /// Percent, capped at 100
    pub progress: f64,
    pub completed: bool,
    /// The next milestone still to reach
    pub current: bool,
}

/// Progress of `value` against every milestone in `table`
pub fn progress(table: &[Milestone], value: f64, label: fn(f64) -> String) -> Vec<MilestoneProgress> {
    table
        .iter()
        .enumerate()
        .map(|(index, milestone)| {
            let target = milestone.target as f64;
            let floor = match index {
                0 => f64::NEG_INFINITY,
                _ => table[index - 1].target as f64,
            };
            MilestoneProgress {
                target: milestone.target,
                label: label(target),
                rewards: milestone.rewards.to_vec(),
                progress: (value / target * 100.0).min(100.0),
                completed: value >= target,
                current: value >= floor && value < target,
            }
        })
        .collect()
}

/// `2.0K` style score label
pub fn format_score(value: f64) -> String {
    if value >= 1_000.0 {
        format!("{:.1}K", value / 1_000.0)
    } else {
        format!("{}", value)
    }
}

/// `$30K` / `$1.25M` style market value label
pub fn format_market_value(value: f64) -> String {
    if value >= 1_000_000.0 {
        format!("${:.2}M", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("${:.0}K", value / 1_000.0)
    } else {
        format!("${:.0}", value)
    }
}

/// Both milestone tracks
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneReport {
    pub score: u32,
    pub market_value: f64,
    pub score_milestones: Vec<MilestoneProgress>,
    pub market_milestones: Vec<MilestoneProgress>,
}

impl MilestoneReport {
    pub fn new(score: u32, market_value: f64) -> Self {
        Self {
            score,
            market_value,
            score_milestones: progress(&SCORE_MILESTONES, score as f64, format_score),
            market_milestones: progress(&MARKET_MILESTONES, market_value, format_market_value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_capped_and_completion_tracked() {
        let report = MilestoneReport::new(3_000, 0.0);
        let score = &report.score_milestones;

        assert_eq!(score[0].progress, 100.0);
        assert!(score[0].completed);
        assert_eq!(score[1].progress, 60.0);
        assert!(!score[1].completed);
        assert!(score[1].current);
        assert!(!score[0].current);
        assert!(!score[2].current);
    }

    #[test]
    fn first_milestone_is_current_from_zero() {
        let report = MilestoneReport::new(0, 0.0);
        assert!(report.score_milestones[0].current);
        assert!(report.market_milestones[0].current);
        assert_eq!(report.market_milestones[0].progress, 0.0);
    }

    #[test]
    fn nothing_is_current_past_the_last_target() {
        let report = MilestoneReport::new(25_000, 150_000.0);
        assert!(report.score_milestones.iter().all(|m| m.completed && !m.current));
        assert!(report.market_milestones.iter().all(|m| m.progress == 100.0));
    }

    #[test]
    fn labels() {
        assert_eq!(format_score(2_000.0), "2.0K");
        assert_eq!(format_score(950.0), "950");
        assert_eq!(format_market_value(75_000.0), "$75K");
        assert_eq!(format_market_value(1_250_000.0), "$1.25M");
        assert_eq!(format_market_value(12.0), "$12");
    }
}
