//! Moderator quorum evaluation.

use serde::{Deserialize, Serialize};

use crate::config::QuorumConfig;
use crate::submission::{ModerationTally, ModeratorVote};

/// Outcome of one quorum evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumDecision {
    Undecided,
    Approve,
    Reject,
}

/// Pure decision function over a full moderator tally.
#[derive(Debug, Clone, Copy)]
pub struct QuorumEngine {
    config: QuorumConfig,
}

impl QuorumEngine {
    pub fn new(config: QuorumConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> QuorumConfig {
        self.config
    }

    /// Decide on a tally. When both thresholds are met, rejection wins.
    pub fn evaluate(&self, tally: ModerationTally) -> QuorumDecision {
        if tally.rejections >= self.config.reject_threshold {
            QuorumDecision::Reject
        } else if tally.approvals >= self.config.approve_threshold {
            QuorumDecision::Approve
        } else {
            QuorumDecision::Undecided
        }
    }

    /// Decide on the latest vote per moderator.
    pub fn evaluate_votes<'a, I>(&self, votes: I) -> (ModerationTally, QuorumDecision)
    where
        I: IntoIterator<Item = &'a ModeratorVote>,
    {
        let tally = ModerationTally::from_votes(votes);
        (tally, self.evaluate(tally))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(approve: u32, reject: u32) -> QuorumEngine {
        QuorumEngine::new(QuorumConfig {
            approve_threshold: approve,
            reject_threshold: reject,
        })
    }

    fn tally(approvals: u32, rejections: u32) -> ModerationTally {
        ModerationTally {
            approvals,
            rejections,
        }
    }

    #[test]
    fn undecided_below_thresholds() {
        let e = engine(3, 2);
        assert_eq!(e.evaluate(tally(0, 0)), QuorumDecision::Undecided);
        assert_eq!(e.evaluate(tally(2, 1)), QuorumDecision::Undecided);
    }

    #[test]
    fn approve_at_threshold() {
        assert_eq!(engine(3, 2).evaluate(tally(3, 1)), QuorumDecision::Approve);
    }

    #[test]
    fn reject_at_threshold() {
        assert_eq!(engine(3, 2).evaluate(tally(2, 2)), QuorumDecision::Reject);
    }

    #[test]
    fn reject_wins_when_both_met() {
        assert_eq!(engine(1, 1).evaluate(tally(1, 1)), QuorumDecision::Reject);
        assert_eq!(engine(2, 2).evaluate(tally(5, 2)), QuorumDecision::Reject);
    }
}
