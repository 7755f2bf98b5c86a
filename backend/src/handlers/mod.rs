//! HTTP handlers

pub mod auth;
pub mod catalog;
pub mod health;
pub mod movements;
pub mod reports;
pub mod shipments;

pub use auth::*;
pub use catalog::*;
pub use health::*;
pub use movements::*;
pub use reports::*;
pub use shipments::*;
