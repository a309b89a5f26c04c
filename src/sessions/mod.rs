//! Session collection and the monitor task that owns it

pub mod collection;
pub mod monitor;

pub use collection::SessionCollection;
pub use monitor::{Monitor, MonitorHandle};
