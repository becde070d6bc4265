//! Shared types, configuration, and error/trace vocabulary used by every
//! SerialAgent crate. This crate is a leaf: it depends on nothing else in
//! the workspace, so anything defined here must not need to reach back
//! into `sa-cron`, `sa-ltm`, `sa-agentops`, or any other downstream crate.

pub mod capability;
pub mod config;
pub mod error;
pub mod stream;
pub mod tool;
pub mod trace;
