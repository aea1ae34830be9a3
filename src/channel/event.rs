//! Event codes crossing the channel boundary.
//!
//! Events are typed messages flowing from the graph database and the
//! orchestrator to external observers (UI, logging, persistence triggers).
//! All types here must be Send + 'static for safe cross-thread delivery.

use crate::graph::ParamRef;

/// Notifications emitted by the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum PipeEvent {
    /// An element template was registered with the catalog.
    ElementRegistered {
        /// Element name.
        name: String,
    },

    /// An instance was placed in the graph.
    InstanceRegistered {
        /// Instance name.
        name: String,
    },

    /// A parameter value changed on an instance or connection.
    ParameterUpdated {
        /// Owning instance name.
        instance: String,
        /// Which parameter changed.
        param: ParamRef,
    },

    /// A pipe start was requested.
    PipeStartRequested,

    /// A pipe start finished.
    PipeStartResult {
        /// Whether the chain is now playing.
        ok: bool,
    },

    /// A pipe stop was requested.
    PipeStopRequested,

    /// A pipe stop finished.
    PipeStopResult {
        /// Whether teardown completed cleanly.
        ok: bool,
    },

    /// The pipe was stopped because of an error, not a user request.
    PipeStopDueToError {
        /// Why the pipe had to stop.
        reason: String,
    },

    /// All build phases completed; the chain is about to start.
    PipeBuilt,

    /// The project was reset to an empty graph.
    ProjectReset,

    /// Free-form diagnostic message.
    Message {
        /// Message text.
        text: String,
    },
}

impl PipeEvent {
    /// Short event name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            PipeEvent::ElementRegistered { .. } => "ElementRegistered",
            PipeEvent::InstanceRegistered { .. } => "InstanceRegistered",
            PipeEvent::ParameterUpdated { .. } => "ParameterUpdated",
            PipeEvent::PipeStartRequested => "PipeStartRequested",
            PipeEvent::PipeStartResult { .. } => "PipeStartResult",
            PipeEvent::PipeStopRequested => "PipeStopRequested",
            PipeEvent::PipeStopResult { .. } => "PipeStopResult",
            PipeEvent::PipeStopDueToError { .. } => "PipeStopDueToError",
            PipeEvent::PipeBuilt => "PipeBuilt",
            PipeEvent::ProjectReset => "ProjectReset",
            PipeEvent::Message { .. } => "Message",
        }
    }

    /// Events whose synchronous dispatch must be mutually exclusive.
    ///
    /// These can re-enter the graph from their handlers (a parameter update
    /// may trigger a rebuild, an error stop may mutate state), so `send`
    /// serializes them behind one lock. A reentrant handler must not `send`
    /// another reentrant event from inside its own dispatch.
    pub fn is_reentrant(&self) -> bool {
        matches!(
            self,
            PipeEvent::ParameterUpdated { .. } | PipeEvent::PipeStopDueToError { .. }
        )
    }
}

/// Receiver of best-effort engine notifications.
///
/// The graph database holds one of these (normally the message hub) and
/// fires it on every mutation worth observing. Implementations must never
/// block: a full queue drops the event.
pub trait EventSink: Send + Sync {
    /// Delivers one event, best-effort.
    fn notify(&self, event: PipeEvent);
}
