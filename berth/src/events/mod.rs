//! Events and activity log

pub mod activity;
pub mod bus;

pub use activity::ActivityLogger;
pub use bus::{ControlEvent, EventBus};
