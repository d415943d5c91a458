// src/core/cache/mod.rs

//! The typed, in-memory mirror of backend-managed objects.

mod object;
mod store;

pub use object::{BackendObject, ObjectType};
pub use store::{Collection, ObjectCache};
