//! Domain models for the produce ledger

mod catalog;
mod movement;
mod shipment;
mod stock;
mod user;

pub use catalog::*;
pub use movement::*;
pub use shipment::*;
pub use stock::*;
pub use user::*;
