//! Shared types and models for the produce ledger
//!
//! This crate holds everything that does not touch storage: identifiers,
//! entities and read models, fixed-point money helpers, input validation,
//! stock reconciliation and the shipment allocation builder. It is used by
//! the backend and, through the wasm bindings, by browser front ends.

pub mod builder;
pub mod models;
pub mod money;
pub mod types;
pub mod validation;

pub use builder::*;
pub use models::*;
pub use types::*;
pub use validation::*;
