//! Spotted Relay: anonymous community submissions, moderated and
//! released to a public channel at a steady pace.

pub mod channels;
pub mod config;
pub mod error;
pub mod moderation;
pub mod pipeline;
pub mod scheduler;
pub mod signals;
pub mod store;
pub mod submission;
