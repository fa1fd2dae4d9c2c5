#![forbid(unsafe_code)]
#![expect(
    clippy::unwrap_used,
    reason = "test-only helpers unwrap freely"
)]

//! Shared test utilities for the pcache workspace.

pub mod fixtures;
pub mod fs;

pub use fixtures::*;
pub use fs::*;
