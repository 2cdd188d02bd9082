//! Rate-limited publish scheduling.
//!
//! - `queue`: pure FIFO bookkeeping (release times, retries, claims)
//! - `publish`: `PublishScheduler`, the queue behind a lock with commit hooks
//! - `window`: optional daily release window

pub mod publish;
pub mod queue;
pub mod window;

pub use publish::PublishScheduler;
pub use queue::{Delivery, FailurePlan, PublishQueue, QueueSlot, backoff};
pub use window::DailyWindow;
