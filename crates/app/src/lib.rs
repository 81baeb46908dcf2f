//! # homehub-app
//!
//! Orchestration kernel — the event-driven core every integration talks to.
//!
//! ## Responsibilities
//! - Own the single execution context ([`scheduler`]) and the timers built
//!   on it ([`timer`])
//! - Provide **in-process infrastructure** that doesn't need IO:
//!   - [`store`] — reactive key-value entries with subscribers
//!   - [`event_bus`] — hierarchical publish/subscribe with a live feed
//! - Run the device model: runtime [`component`]s grouped into
//!   [`entity`]s, built and called through the [`registry`]
//! - Execute [`flow_engine`] graphs triggered by input services
//! - Define **port traits** plugins implement ([`ports`]) and the
//!   [`io`] registry they are stored in
//! - Compose everything behind one [`hub::Hub`]
//!
//! ## Dependency rule
//! Depends on `homehub-domain` only (plus tokio for the runtime).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod callback;
pub mod component;
pub mod entity;
pub mod event_bus;
pub mod flow_engine;
pub mod hub;
pub mod io;
pub mod load;
pub mod ports;
pub mod registry;
pub mod scheduler;
pub mod store;
mod stream;
pub mod timer;
