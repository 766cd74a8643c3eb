pub(crate) mod common;
mod revisions;

pub use revisions::SqliteRevisionRepo;
