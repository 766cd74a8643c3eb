//! Retention policy engine for a revisioned content store.
//!
//! Each entity keeps an ordered history of revisions, exactly one of which
//! is current. Per-bundle rules decide which historical revisions may go,
//! and deletion runs either directly in capped cleanup runs or through a
//! work queue drained by a re-validating worker.

pub mod config;
pub mod db;
pub mod models;
pub mod observability;
pub mod queue;
pub mod retention;

#[cfg(test)]
mod tests;
