//! Data models

pub mod activity;
pub mod deployment;
pub mod port;
pub mod project;
