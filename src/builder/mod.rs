//! Builder protocol / orchestrator.
//!
//! Computes a valid construction order for the current graph, then drives
//! every instance through the phase sequence, dispatching to per-element
//! overrides or falling back to the default phase handlers.

pub mod context;
pub mod defaults;
pub mod order;
pub mod phase;
pub mod pipe;

pub use context::PhaseContext;
pub use order::compute_build_order;
pub use phase::{BuildPhase, PhaseOutcome};
pub use pipe::{BuildError, Pipe, STATE_STACK_MAX};
