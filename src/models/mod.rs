mod revision;

pub use revision::*;
