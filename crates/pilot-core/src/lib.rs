//! Core pilot library (task loop, decision adapters, device executors).

pub mod config;
pub mod core;
pub mod decision;
pub mod device;
pub mod error;
pub mod protocol;
pub mod provision;
pub mod surface;
