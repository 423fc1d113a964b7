//! Persistence: on-disk layout, settings and repositories

pub mod layout;
pub mod repos;
pub mod settings;
pub mod store;
