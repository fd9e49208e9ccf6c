//! Core types for the Loka gateway
//!
//! This crate defines the fundamental data structures shared by every other
//! crate in the workspace: chat messages, completion results, routing
//! decisions, the error taxonomy, configuration loading, the complexity
//! classifier and the PII scanner.

pub mod classifier;
pub mod config;
pub mod error;
pub mod pii;
pub mod types;
