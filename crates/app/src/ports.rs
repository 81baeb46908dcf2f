//! Port definitions — traits that plugins implement.
//!
//! Ports are the boundaries between the kernel and the outside world.
//! Plugins register concrete instances through the explicit API on
//! [`Hub`](crate::hub::Hub); the kernel never discovers them by itself.

pub mod io;
pub mod lifecycle;
pub mod plugin;

pub use io::{Formatter, InputService, InputSink, OutputService};
pub use lifecycle::LifecycleHook;
pub use plugin::Plugin;
