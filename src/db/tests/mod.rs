//! Shared database test infrastructure
//!
//! Repository tests live next to each implementation and use the harness
//! here to get a fast in-memory SQLite database with the real migrations.
