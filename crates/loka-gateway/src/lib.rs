//! OpenAI-compatible HTTP gateway for Loka
//!
//! A drop-in for the cloud chat API: clients point their base URL at this
//! server and every request runs through the router's local-first pipeline.

pub mod api;
pub mod server;

pub use server::{app, serve, AppState};
