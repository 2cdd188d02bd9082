//! Moderator votes, public votes and reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::UserId;

/// A moderator's verdict on a pending submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeratorDecision {
    Approve,
    Reject,
}

impl ModeratorDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

impl std::str::FromStr for ModeratorDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown moderator decision: {other}")),
        }
    }
}

/// Latest vote of one moderator on one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeratorVote {
    pub submission_id: Uuid,
    pub moderator_id: UserId,
    pub decision: ModeratorDecision,
    /// Reason given with a rejection, relayed to the author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub cast_at: DateTime<Utc>,
}

/// Direction of a community vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicVoteKind {
    Up,
    Down,
}

impl PublicVoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl std::str::FromStr for PublicVoteKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(format!("unknown vote kind: {other}")),
        }
    }
}

/// Latest vote of one community member on one published submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicVote {
    pub submission_id: Uuid,
    pub voter_id: UserId,
    pub kind: PublicVoteKind,
    pub cast_at: DateTime<Utc>,
}

/// A community report. At most one per (submission, reporter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub submission_id: Uuid,
    pub reporter_id: UserId,
    pub reported_at: DateTime<Utc>,
}

/// Signal cast on a published submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicSignal {
    Vote(PublicVoteKind),
    Report,
}

/// Moderator tally, always recomputed from the latest vote per moderator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationTally {
    pub approvals: u32,
    pub rejections: u32,
}

impl ModerationTally {
    pub fn from_votes<'a, I>(votes: I) -> Self
    where
        I: IntoIterator<Item = &'a ModeratorVote>,
    {
        votes
            .into_iter()
            .fold(Self::default(), |mut tally, vote| {
                match vote.decision {
                    ModeratorDecision::Approve => tally.approvals += 1,
                    ModeratorDecision::Reject => tally.rejections += 1,
                }
                tally
            })
    }
}

/// Community tally on a published submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalTally {
    pub upvotes: u32,
    pub downvotes: u32,
    pub reports: u32,
}

impl SignalTally {
    /// Tally after `voter` moves from `previous` to `next`.
    ///
    /// Returns a whole new value so a flip never exposes a half-applied
    /// count.
    pub fn with_vote(self, previous: Option<PublicVoteKind>, next: PublicVoteKind) -> Self {
        let mut tally = self;
        match previous {
            Some(PublicVoteKind::Up) => tally.upvotes = tally.upvotes.saturating_sub(1),
            Some(PublicVoteKind::Down) => tally.downvotes = tally.downvotes.saturating_sub(1),
            None => {}
        }
        match next {
            PublicVoteKind::Up => tally.upvotes += 1,
            PublicVoteKind::Down => tally.downvotes += 1,
        }
        tally
    }

    pub fn with_report(self) -> Self {
        Self {
            reports: self.reports + 1,
            ..self
        }
    }

    /// Downvotes minus upvotes.
    pub fn net_downvotes(&self) -> i64 {
        i64::from(self.downvotes) - i64::from(self.upvotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(moderator_id: UserId, decision: ModeratorDecision) -> ModeratorVote {
        ModeratorVote {
            submission_id: Uuid::nil(),
            moderator_id,
            decision,
            reason: None,
            cast_at: Utc::now(),
        }
    }

    #[test]
    fn tally_counts_each_vote() {
        let votes = vec![
            vote(1, ModeratorDecision::Approve),
            vote(2, ModeratorDecision::Reject),
            vote(3, ModeratorDecision::Approve),
        ];
        let tally = ModerationTally::from_votes(&votes);
        assert_eq!(tally.approvals, 2);
        assert_eq!(tally.rejections, 1);
    }

    #[test]
    fn vote_flip_moves_one_count() {
        let tally = SignalTally::default()
            .with_vote(None, PublicVoteKind::Up)
            .with_vote(Some(PublicVoteKind::Up), PublicVoteKind::Down);
        assert_eq!(tally.upvotes, 0);
        assert_eq!(tally.downvotes, 1);
        assert_eq!(tally.net_downvotes(), 1);
    }

    #[test]
    fn repeated_vote_is_a_replace() {
        let tally = SignalTally::default()
            .with_vote(None, PublicVoteKind::Down)
            .with_vote(Some(PublicVoteKind::Down), PublicVoteKind::Down);
        assert_eq!(tally.downvotes, 1);
    }

    #[test]
    fn decision_parse() {
        assert_eq!(
            "approve".parse::<ModeratorDecision>().unwrap(),
            ModeratorDecision::Approve
        );
        assert!("maybe".parse::<ModeratorDecision>().is_err());
        assert_eq!("down".parse::<PublicVoteKind>().unwrap(), PublicVoteKind::Down);
    }
}
