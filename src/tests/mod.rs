//! End-to-end retention scenarios.
//!
//! These wire the engine, the queue bridge and the queue runner to a real
//! store and queue, and check the observable effect on revision history.

mod retention_scenarios;
