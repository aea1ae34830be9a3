//! Build phases and phase outcomes.
//!
//! A build walks every instance (in dependency order) through a fixed
//! sequence of phases. Elements may override any phase; an override that
//! returns [`PhaseOutcome::UseDefault`] falls through to the orchestrator's
//! default handler for that phase.

/// One step of the multi-stage construction/teardown protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuildPhase {
    /// Allocate builder-private state on each instance.
    Constructor,
    /// Reset per-build flags and derive hardware-visible names.
    Start,
    /// Declare chunk variables and propagate signal formats.
    Prolog,
    /// Hook before element initialization (default no-op).
    PreInitGraph,
    /// Hook after prolog, before element initialization (default no-op).
    PostInitGraph,
    /// Create hardware chunks and declare/configure algorithms.
    InitGraphElement,
    /// Wire chunks into the hardware pipe's pin slots.
    InitGraphAttachConnections,
    /// Release builder-private state (teardown only).
    Destructor,
}

impl BuildPhase {
    /// The construction sequence, in run order. `Destructor` runs only on
    /// teardown and is not part of the sequence.
    pub const SEQUENCE: [BuildPhase; 7] = [
        BuildPhase::Constructor,
        BuildPhase::Start,
        BuildPhase::Prolog,
        BuildPhase::PreInitGraph,
        BuildPhase::PostInitGraph,
        BuildPhase::InitGraphElement,
        BuildPhase::InitGraphAttachConnections,
    ];

    /// Human-readable phase name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            BuildPhase::Constructor => "Constructor",
            BuildPhase::Start => "Start",
            BuildPhase::Prolog => "Prolog",
            BuildPhase::PreInitGraph => "PreInitGraph",
            BuildPhase::PostInitGraph => "PostInitGraph",
            BuildPhase::InitGraphElement => "InitGraphElement",
            BuildPhase::InitGraphAttachConnections => "InitGraphAttachConnections",
            BuildPhase::Destructor => "Destructor",
        }
    }
}

/// Result of dispatching one phase to one instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The phase completed.
    Ok,
    /// The phase failed; the whole build will abort after the sequence.
    Error,
    /// The element does not support this phase.
    NotImplemented,
    /// Sentinel: run the orchestrator's default handler for this phase.
    UseDefault,
}

impl PhaseOutcome {
    /// Returns true if this outcome fails the build.
    pub fn is_error(&self) -> bool {
        matches!(self, PhaseOutcome::Error)
    }
}
