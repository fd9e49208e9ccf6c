//! Command-line interface for the Loka gateway

pub mod cli;
