#![forbid(unsafe_code)]

//! Platform primitives shared by the pcache crates.
//!
//! # Worker pool
//!
//! [`ThreadPool`] runs blocking filesystem work (backend file creation) off the
//! caller's thread.
//!
//! # Sequence affinity
//!
//! The params manager and the cache collection keep their maps without locks.
//! [`SequenceChecker`] turns "all calls on one sequence" into a checked invariant.

mod pool;
mod sequence;

pub use pool::ThreadPool;
pub use sequence::SequenceChecker;
