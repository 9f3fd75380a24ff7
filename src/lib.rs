#![forbid(unsafe_code)]

//! Client-side campaign engine for black-box API fuzzing.
//!
//! A remote orchestrator decides what to test. This crate executes its
//! directives against the system under test, verifies every interaction
//! through built-in and user-defined checks, drives the SUT lifecycle through
//! user shell scripts, and streams progress back until a verdict arrives.

pub mod call;
pub mod caller;
pub mod checks;
pub mod config;
pub mod errors;
pub mod models;
pub mod reset;
pub mod session;
pub mod sink;
pub mod transport;

pub use config::EngineConfig;
pub use errors::{AppError, Result};
pub use session::{SessionDriver, Verdict};
