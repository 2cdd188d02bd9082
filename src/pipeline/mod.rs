//! Submission pipeline.
//!
//! Inbound submissions flow through:
//! 1. `ModerationStateMachine::submit()`, one in-flight submission per author
//! 2. Moderator votes until `QuorumEngine` decides
//! 3. `PublishScheduler` releases approved submissions one interval apart
//! 4. `CommunitySignalAggregator` may retract what was published
//!
//! `PipelineCoordinator` wires these together behind per-submission
//! critical sections.

pub mod coordinator;
pub mod events;
pub mod locks;
pub mod tasks;

pub use coordinator::{PipelineCoordinator, TickOutcome};
pub use events::PipelineEvent;
pub use locks::KeyedLocks;
pub use tasks::{spawn_publish_ticker, spawn_stability_sweep};
