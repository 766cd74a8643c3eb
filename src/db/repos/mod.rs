mod revisions;

pub use revisions::*;
