//! # homehub-domain
//!
//! Pure domain model for the homehub orchestration kernel.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Principals and execution [contexts](auth::Context) with scoped authorization
//! - [Events](event::Event) and hierarchical topic resolution
//! - [Component behaviors](component): pure state transitions per facet
//! - [Entity types](entity::EntityType) and their cross-component coupling tables
//! - Declarative specs for entities, [scenes](scene) and [flows](flow), and
//!   flow-graph validation
//! - Kernel [lifecycle](lifecycle) states
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod address;
pub mod auth;
pub mod color;
pub mod component;
pub mod entity;
pub mod event;
pub mod flow;
pub mod lifecycle;
pub mod scene;
