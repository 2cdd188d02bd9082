//! Submissions and the signals cast on them.

pub mod model;
pub mod votes;

pub use model::{
    ChannelRef, Content, MAX_CAPTION_LENGTH, MAX_TEXT_LENGTH, MediaKind, Submission,
    SubmissionState, UserId,
};
pub use votes::{
    ModerationTally, ModeratorDecision, ModeratorVote, PublicSignal, PublicVote, PublicVoteKind,
    Report, SignalTally,
};
