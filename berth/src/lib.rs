//! Berth Library
//!
//! Core modules for the Berth deployment control plane.

pub mod analyzer;
pub mod app;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod exec;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod ports;
pub mod proxy;
pub mod runtime;
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod utils;
