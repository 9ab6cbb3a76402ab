//! Safe invocation of the git binary.
//!
//! The core never links a git library; every operation shells out to a
//! vetted `git` binary with an argument allow-list and sanitized paths.

mod executor;

pub use executor::{GitExecutor, GitOutput};
