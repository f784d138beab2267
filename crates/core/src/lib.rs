//! `modelforge-core`: shared building blocks.
//!
//! This crate contains **pure** primitives (no storage, no numerics): tenant and
//! run identifiers, the clock abstraction used for freshness decisions, and the
//! identifier parse error.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CoreError;
pub use id::{TenantId, TrainingRunId};
