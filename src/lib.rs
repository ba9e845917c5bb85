pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;

pub use engine::{BookingEngine, BookingError};
pub use model::{Actor, Availability, Ms, Patch, ResourceKind, Role, TimeRange};
