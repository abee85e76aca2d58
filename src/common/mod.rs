//! Shared Plumbing Module
//!
//! The typed HTTP error that every handler propagates, the uniform
//! `{"error": message}` JSON rendering, and process logging setup.

pub mod http;
pub mod logging;
