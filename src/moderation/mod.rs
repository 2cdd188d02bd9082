//! Moderation: quorum evaluation and the submission state machine.

pub mod quorum;
pub mod state_machine;

pub use quorum::{QuorumDecision, QuorumEngine};
pub use state_machine::{ModerationStateMachine, SignalOutcome, VoteOutcome};
