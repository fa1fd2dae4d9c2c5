#![forbid(unsafe_code)]

//! Backend parameter allocation for pcache.
//!
//! [`BackendParamsManager`] maps a `(backend type, cache id)` pair onto a
//! fixed pair of files under one root directory, vends open handles on them,
//! and trims the directory back under a byte budget by deleting the least
//! recently used files.
//!
//! ## Normative
//! - File naming is deterministic ([`layout`]), so caches survive restarts.
//! - Recency lives on disk as file modification times ([`footprint`]).

pub mod footprint;
pub mod layout;
mod manager;

pub use manager::{
    BackendParamsManager, DEFAULT_PARAMS_CAPACITY, ManagerOptions, ParamsCallback,
};
