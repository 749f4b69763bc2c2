//! Shared primitives for the Velella profile-HMM toolkit.
//!
//! `velella-core` provides the foundation the domain crates build on:
//!
//! - **Error types** — [`VelellaError`] and [`Result`]: malformed profile
//!   text vs contract-violating arguments
//! - **Cost arithmetic** — negative-log costs with an infinite sentinel for
//!   minimum-cost dynamic programming ([`cost`])

pub mod cost;
pub mod error;

pub use error::{Result, VelellaError};
