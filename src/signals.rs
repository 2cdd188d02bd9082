//! Community signal aggregation on published submissions.

use serde::{Deserialize, Serialize};

use crate::config::SignalConfig;
use crate::submission::{PublicSignal, PublicVoteKind, SignalTally, SubmissionState};

/// Why a published submission was pulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetractReason {
    Reports,
    Downvotes,
}

/// Result of evaluating a tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalVerdict {
    Continue,
    Retract(RetractReason),
}

/// Tally after one signal plus what it means for the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalUpdate {
    pub tally: SignalTally,
    pub verdict: SignalVerdict,
}

/// Applies community signals and decides retraction.
#[derive(Debug, Clone, Copy)]
pub struct CommunitySignalAggregator {
    config: SignalConfig,
}

impl CommunitySignalAggregator {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    /// Reports are checked first, so a heavily upvoted post still goes.
    pub fn evaluate(&self, tally: &SignalTally) -> SignalVerdict {
        if tally.reports >= self.config.report_threshold {
            SignalVerdict::Retract(RetractReason::Reports)
        } else if tally.net_downvotes() >= self.config.net_downvote_threshold {
            SignalVerdict::Retract(RetractReason::Downvotes)
        } else {
            SignalVerdict::Continue
        }
    }

    /// Apply one signal to `tally`.
    ///
    /// `previous` is the voter's earlier vote, if any. Only a `Published`
    /// submission can be retracted; on any other state the tally is still
    /// updated (audit) but the verdict is always `Continue`.
    pub fn apply(
        &self,
        state: SubmissionState,
        tally: SignalTally,
        previous: Option<PublicVoteKind>,
        signal: PublicSignal,
    ) -> SignalUpdate {
        let tally = match signal {
            PublicSignal::Vote(kind) => tally.with_vote(previous, kind),
            PublicSignal::Report => tally.with_report(),
        };
        let verdict = if state == SubmissionState::Published {
            self.evaluate(&tally)
        } else {
            SignalVerdict::Continue
        };
        SignalUpdate { tally, verdict }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> CommunitySignalAggregator {
        CommunitySignalAggregator::new(SignalConfig {
            report_threshold: 3,
            net_downvote_threshold: 2,
        })
    }

    #[test]
    fn reports_beat_upvotes() {
        let tally = SignalTally {
            upvotes: 500,
            downvotes: 0,
            reports: 3,
        };
        assert_eq!(
            aggregator().evaluate(&tally),
            SignalVerdict::Retract(RetractReason::Reports)
        );
    }

    #[test]
    fn net_downvotes_retract() {
        let tally = SignalTally {
            upvotes: 1,
            downvotes: 3,
            reports: 0,
        };
        assert_eq!(
            aggregator().evaluate(&tally),
            SignalVerdict::Retract(RetractReason::Downvotes)
        );
    }

    #[test]
    fn below_thresholds_continue() {
        let tally = SignalTally {
            upvotes: 2,
            downvotes: 3,
            reports: 2,
        };
        assert_eq!(aggregator().evaluate(&tally), SignalVerdict::Continue);
    }

    #[test]
    fn flip_counts_once() {
        let agg = aggregator();
        let tally = SignalTally {
            upvotes: 1,
            downvotes: 1,
            reports: 0,
        };
        let update = agg.apply(
            SubmissionState::Published,
            tally,
            Some(PublicVoteKind::Up),
            PublicSignal::Vote(PublicVoteKind::Down),
        );
        assert_eq!(update.tally.upvotes, 0);
        assert_eq!(update.tally.downvotes, 2);
        assert_eq!(
            update.verdict,
            SignalVerdict::Retract(RetractReason::Downvotes)
        );
    }

    #[test]
    fn retracted_only_records() {
        let tally = SignalTally {
            upvotes: 0,
            downvotes: 0,
            reports: 10,
        };
        let update =
            aggregator().apply(SubmissionState::Retracted, tally, None, PublicSignal::Report);
        assert_eq!(update.tally.reports, 11);
        assert_eq!(update.verdict, SignalVerdict::Continue);
    }
}
