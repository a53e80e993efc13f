//! Reconcilers, resource store and zone bootstrap pipeline of zonewall.

pub mod controller;
pub mod error;
pub mod events;
pub mod management;
pub mod manifest;
pub mod queue;
pub mod retry;
pub mod store;
pub mod zone;

pub use error::{Error, Result};
