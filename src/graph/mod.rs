//! Graph database subsystem.
//!
//! Element templates, placed instances, reciprocal connections, and the
//! mutation/lookup surface everything else builds on.

pub mod consistency;
pub mod database;
pub mod element;
pub mod instance;

pub use consistency::Violation;
pub use database::{GraphDb, GraphError};
pub use element::{
    DefaultBehavior, Element, ElementBehavior, ElementBuilder, ElementPin, ParamKind,
    ParamTemplate, PinDirection, PinKind,
};
pub use instance::{
    BuildState, ChunkState, Connection, Instance, InstanceHandle, ParamRef, Parameter, PinSlot,
};
