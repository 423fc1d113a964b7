//! Reverse proxy (Caddy) configuration

pub mod caddyfile;
pub mod manager;
pub mod reload;

pub use manager::ProxyManager;
pub use reload::{ProxyReloader, ReloadTier};
