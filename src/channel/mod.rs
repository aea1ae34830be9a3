//! Event/message channel.
//!
//! Queue-backed, single-consumer dispatcher decoupling graph mutation
//! requests from the construction thread: synchronous `send` with mutual
//! exclusion for reentrant events, bounded FIFO `post` drained by a
//! dedicated dispatch task.

pub mod event;
pub mod hub;

pub use event::{EventSink, PipeEvent};
pub use hub::{
    ChannelError, DispatchTask, Dispatcher, DoneCallback, EventQueue, Housekeeping, MessageHub,
    DEFAULT_POST_CAPACITY, DEFAULT_POST_TIMEOUT, DISPATCH_IDLE_TICK,
};
