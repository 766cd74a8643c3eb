//! Revision retention.
//!
//! Decides which historical revisions of each entity may be deleted and
//! deletes them in bounded batches:
//! 1. Per-bundle rules keep the N most recent non-current revisions, or
//!    delete the ones older than a relative age above a keep floor
//! 2. `RetentionEngine` deletes candidates directly, capped per run
//! 3. `DeletionQueueBridge` defers deletion to a work queue, which
//!    `QueueRunner` drains through a re-validating `DeletionWorker`
//!
//! The current revision of an entity is never a candidate.

pub mod age;
mod bridge;
mod engine;
mod policy;
mod scheduler;
mod selector;
mod settings;
mod worker;

pub use age::{AgeParseError, RelativeAge};
pub use bridge::{DeletionQueueBridge, EnqueueResult, REVISION_DELETE_PRODUCER};
pub use engine::{BundlePreview, CleanupRunResult, RetentionEngine};
pub use policy::{RetentionPolicy, RuleError};
pub use scheduler::{SettingsReloader, start_cleanup_scheduler};
pub use selector::{CandidateSelector, CandidateSet, candidate_count, select_candidates};
pub use settings::{RetentionSettings, SettingsProvider, SharedSettings};
pub use worker::{
    DeletionWorker, ProcessOutcome, QueueRunner, RunnerConfig, RunnerTickResult, SkipReason,
    start_queue_runner,
};
