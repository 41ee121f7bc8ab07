//! Cost optimizer service
//!
//! Wires the optimizer core to the process environment and the dashboard
//! HTTP surface.

pub mod actions;
pub mod api;
pub mod config;
pub mod recovery;
