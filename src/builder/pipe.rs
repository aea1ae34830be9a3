//! The pipe: build orchestration and transport state.
//!
//! `Pipe` turns the editable graph into a running hardware chain. A start
//! computes the build order, walks every instance through the phase
//! sequence, and (only if every phase on every instance succeeded) asks
//! the adapter to play. Any failure is counted, logged, and drives the
//! chain to its cleanup state instead; a build never leaves the hardware
//! half-playing.
//!
//! Only one build can be in flight at a time. Stop waits (bounded) for an
//! in-flight build rather than mutating the chain mid-construction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::adapter::{HardwareAdapter, PlayCommand};
use crate::channel::{MessageHub, PipeEvent};
use crate::graph::instance::BuildState;
use crate::graph::{GraphDb, InstanceHandle, ParamRef};

use super::context::PhaseContext;
use super::defaults::dispatch_default;
use super::order::compute_build_order;
use super::phase::{BuildPhase, PhaseOutcome};

/// Depth of the pipe's push/pop state stack.
pub const STATE_STACK_MAX: usize = 4;

/// How many times stop re-checks an in-flight build before timing out.
const STOP_RETRIES: u32 = 100;

/// Delay between those re-checks.
const STOP_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Build and teardown failures.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The graph contains a cycle or a dependency on a missing instance.
    #[error("build order cannot resolve: {unresolved:?}")]
    UnresolvedDependencies {
        /// Names of the instances that never resolved.
        unresolved: Vec<String>,
    },
    /// One or more phases (or adapter calls) failed; the chain was driven
    /// to cleanup.
    #[error("build finished with {errors} error(s)")]
    PhaseFailed {
        /// Accumulated error count.
        errors: u32,
    },
    /// Stop gave up waiting for an in-flight build.
    #[error("timed out waiting for the in-flight build to finish")]
    Timeout,
    /// State stack underflow or overflow.
    #[error("pipe state stack exhausted")]
    StateStack,
}

struct PipeState {
    playing: bool,
    state_stack: Vec<bool>,
    order: Vec<InstanceHandle>,
    build_errors: u32,
}

/// Orchestrates construction and teardown of one hardware chain.
pub struct Pipe {
    state: Mutex<PipeState>,
    building: AtomicBool,
}

impl Pipe {
    /// Creates a stopped pipe.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PipeState {
                playing: false,
                state_stack: Vec::new(),
                order: Vec::new(),
                build_errors: 0,
            }),
            building: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PipeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// True while the hardware chain is rendering.
    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    /// The active build order (empty when stopped).
    pub fn build_order(&self) -> Vec<InstanceHandle> {
        self.lock().order.clone()
    }

    /// Error count accumulated by the last build.
    pub fn build_error_count(&self) -> u32 {
        self.lock().build_errors
    }

    /// Builds the graph and starts the hardware chain.
    ///
    /// Starting an already-playing pipe is a no-op returning `Ok`. On any
    /// failure the adapter is driven to `Cleanup` and the pipe stays
    /// stopped.
    pub fn start(
        &self,
        db: &mut GraphDb,
        adapter: &mut dyn HardwareAdapter,
        hub: &MessageHub,
    ) -> Result<(), BuildError> {
        let mut state = self.lock();
        if state.playing {
            return Ok(());
        }
        self.building.store(true, Ordering::Release);
        let _ = hub.post(PipeEvent::PipeStartRequested);

        let order = match compute_build_order(db) {
            Ok(order) => order,
            Err(err) => {
                self.building.store(false, Ordering::Release);
                error!(%err, "build order computation failed");
                let _ = hub.post(PipeEvent::PipeStartResult { ok: false });
                let _ = hub.post(PipeEvent::Message {
                    text: "invalid audio flow, the hardware pipe cannot be initialized".to_string(),
                });
                return Err(err);
            }
        };
        state.order = order;
        state.build_errors = 0;

        let mut errors = 0u32;
        if let Err(err) = adapter.create_pipe() {
            error!(%err, "hardware pipe creation failed");
            errors += 1;
        }
        for phase in BuildPhase::SEQUENCE {
            errors += run_phase(db, adapter, &state.order, phase);
        }
        state.build_errors = errors;

        let result = if errors == 0 {
            let _ = hub.post(PipeEvent::PipeBuilt);
            match adapter.play(PlayCommand::Start) {
                Ok(()) => {
                    state.playing = true;
                    debug!(instances = state.order.len(), "pipe built and started");
                    Ok(())
                }
                Err(err) => {
                    error!(%err, "hardware start failed, cleaning up");
                    if let Err(err) = adapter.play(PlayCommand::Cleanup) {
                        error!(%err, "hardware cleanup failed");
                    }
                    state.build_errors = 1;
                    Err(BuildError::PhaseFailed { errors: 1 })
                }
            }
        } else {
            error!(errors, "build failed, aborting to cleanup");
            if let Err(err) = adapter.play(PlayCommand::Cleanup) {
                error!(%err, "hardware cleanup failed");
            }
            Err(BuildError::PhaseFailed { errors })
        };

        self.building.store(false, Ordering::Release);
        match &result {
            Ok(()) => {
                let _ = hub.post(PipeEvent::PipeStartResult { ok: true });
            }
            Err(_) => {
                let _ = hub.post(PipeEvent::PipeStartResult { ok: false });
                let _ = hub.post(PipeEvent::Message {
                    text: "invalid audio flow, the hardware pipe cannot be initialized".to_string(),
                });
            }
        }
        result
    }

    /// Stops the hardware chain and tears down builder state.
    ///
    /// Waits (bounded) for an in-flight build rather than interrupting it,
    /// returning `Timeout` instead of blocking forever. Stopping an
    /// already-stopped pipe still releases any leftover builder state and
    /// returns `Ok`.
    pub fn stop(
        &self,
        db: &mut GraphDb,
        adapter: &mut dyn HardwareAdapter,
        hub: &MessageHub,
    ) -> Result<(), BuildError> {
        let mut retries = STOP_RETRIES;
        while self.building.load(Ordering::Acquire) {
            if retries == 0 {
                warn!("stop timed out waiting for the in-flight build");
                return Err(BuildError::Timeout);
            }
            retries -= 1;
            thread::sleep(STOP_RETRY_DELAY);
        }

        let mut state = self.lock();
        if state.playing {
            let _ = hub.post(PipeEvent::PipeStopRequested);
            let ok = match adapter.play(PlayCommand::Stop) {
                Ok(()) => true,
                Err(err) => {
                    error!(%err, "hardware stop failed");
                    false
                }
            };
            state.playing = false;
            let _ = hub.post(PipeEvent::PipeStopResult { ok });
        }

        // Destructors run over whatever order list is left, even after a
        // failed build, then the order is invalidated.
        let order = std::mem::take(&mut state.order);
        run_phase(db, adapter, &order, BuildPhase::Destructor);
        for &handle in &order {
            if let Some(instance) = db.instance_mut(handle) {
                instance.build_index = None;
            }
        }
        Ok(())
    }

    /// Stops because something went wrong (not a user request) and posts
    /// `PipeStopDueToError` with the reason.
    pub fn stop_due_to_error(
        &self,
        db: &mut GraphDb,
        adapter: &mut dyn HardwareAdapter,
        hub: &MessageHub,
        reason: &str,
    ) -> Result<(), BuildError> {
        warn!(reason, "stopping pipe due to error");
        let result = self.stop(db, adapter, hub);
        let _ = hub.post(PipeEvent::PipeStopDueToError {
            reason: reason.to_string(),
        });
        result
    }

    /// Saves the current playing state on the pipe's bounded stack.
    ///
    /// Pair with [`pop_state`](Self::pop_state) around graph mutations that
    /// require a stopped pipe.
    pub fn push_state(&self) -> Result<(), BuildError> {
        let mut state = self.lock();
        if state.state_stack.len() >= STATE_STACK_MAX {
            return Err(BuildError::StateStack);
        }
        let playing = state.playing;
        state.state_stack.push(playing);
        Ok(())
    }

    /// Pops the saved state; with `restore`, restarts or stops the pipe to
    /// match it.
    pub fn pop_state(
        &self,
        db: &mut GraphDb,
        adapter: &mut dyn HardwareAdapter,
        hub: &MessageHub,
        restore: bool,
    ) -> Result<(), BuildError> {
        let saved = self.lock().state_stack.pop().ok_or(BuildError::StateStack)?;
        if !restore {
            return Ok(());
        }
        if saved {
            self.start(db, adapter, hub)
        } else {
            self.stop(db, adapter, hub)
        }
    }

    /// Applies a parameter change to a running chain.
    ///
    /// Instance-scoped parameters are forwarded to the live algorithm's
    /// static configuration. A structural (connection-scoped) parameter
    /// invalidates the built topology, so the pipe stops with an error
    /// notification and waits for a rebuild. A stopped pipe ignores the
    /// call.
    pub fn apply_parameter(
        &self,
        db: &mut GraphDb,
        adapter: &mut dyn HardwareAdapter,
        hub: &MessageHub,
        handle: InstanceHandle,
        param: ParamRef,
    ) -> Result<(), BuildError> {
        if !self.is_playing() {
            return Ok(());
        }
        if param.is_structural() {
            return self.stop_due_to_error(
                db,
                adapter,
                hub,
                "structural parameter changed while playing",
            );
        }

        let target = db.instance(handle).and_then(|instance| {
            let build = instance.build.as_ref().filter(|b| b.valid)?;
            let algo = build.algo?;
            let param = instance.param_by_ref(param)?;
            Some((algo, param.name.to_string(), param.value().to_string()))
        });
        if let Some((algo, name, value)) = target {
            if let Err(err) = adapter.set_static_config(algo, &name, &value) {
                error!(param = %name, %err, "live parameter update failed");
            }
        }
        Ok(())
    }
}

impl Default for Pipe {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatches one phase over the build order; returns the error count.
///
/// A failing instance is logged and counted but does not stop dispatch to
/// the remaining instances: the phase completes best-effort, then the
/// accumulated count aborts the build globally.
fn run_phase(
    db: &mut GraphDb,
    adapter: &mut dyn HardwareAdapter,
    order: &[InstanceHandle],
    phase: BuildPhase,
) -> u32 {
    let mut errors = 0u32;
    for &handle in order {
        let outcome = run_instance_phase(db, adapter, handle, phase, &mut errors);
        if outcome.is_error() {
            let name = db
                .instance(handle)
                .map(|i| i.name.clone())
                .unwrap_or_default();
            error!(instance = %name, phase = phase.name(), "builder returned an error");
            errors += 1;
        }
    }
    errors
}

/// Dispatches one phase to one instance: element override first, then the
/// phase default when the override defers.
fn run_instance_phase(
    db: &mut GraphDb,
    adapter: &mut dyn HardwareAdapter,
    handle: InstanceHandle,
    phase: BuildPhase,
    errors: &mut u32,
) -> PhaseOutcome {
    let behavior = match db.instance(handle) {
        Some(instance) => Arc::clone(&instance.element.behavior),
        None => return PhaseOutcome::Ok,
    };

    match phase {
        BuildPhase::Constructor => {
            let outcome = match db.instance_mut(handle) {
                Some(instance) => behavior.construct(instance),
                None => return PhaseOutcome::Ok,
            };
            if outcome == PhaseOutcome::UseDefault {
                if let Some(instance) = db.instance_mut(handle) {
                    instance.build = Some(BuildState::default());
                }
                PhaseOutcome::Ok
            } else {
                outcome
            }
        }
        BuildPhase::Destructor => {
            let outcome = match db.instance_mut(handle) {
                Some(instance) => behavior.destruct(instance),
                None => return PhaseOutcome::Ok,
            };
            if outcome == PhaseOutcome::UseDefault {
                if let Some(instance) = db.instance_mut(handle) {
                    instance.build = None;
                }
                PhaseOutcome::Ok
            } else {
                outcome
            }
        }
        _ => {
            let mut cx = PhaseContext {
                db,
                instance: handle,
                adapter,
                errors,
            };
            let outcome = behavior.build_phase(phase, &mut cx);
            if outcome == PhaseOutcome::UseDefault {
                // Defaults only apply to instances carrying build state.
                if cx.instance().map_or(false, |i| i.build.is_some()) {
                    dispatch_default(phase, &mut cx)
                } else {
                    PhaseOutcome::Ok
                }
            } else {
                outcome
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::RecordingAdapter;
    use crate::channel::{Dispatcher, EventQueue};
    use crate::graph::database::tests::test_db;

    fn quiet_hub() -> (Arc<MessageHub>, EventQueue) {
        let dispatcher: Dispatcher = Arc::new(|_event| {});
        MessageHub::with_capacity(dispatcher, 60, Duration::ZERO)
    }

    fn chain_db() -> GraphDb {
        let mut db = test_db();
        db.create_instance("a", "source.signal").unwrap();
        db.create_instance("g", "fx.gain").unwrap();
        db.create_instance("b", "sink.speaker").unwrap();
        db.connect("a", 0, "g", 0).unwrap();
        db.connect("g", 0, "b", 0).unwrap();
        db
    }

    fn drain(queue: &mut EventQueue) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Some(event) = queue.pop() {
            names.push(event.name());
        }
        names
    }

    #[test]
    fn test_start_builds_chain_in_dependency_order() {
        let mut db = chain_db();
        let mut adapter = RecordingAdapter::new();
        let (hub, mut queue) = quiet_hub();
        let pipe = Pipe::new();

        pipe.start(&mut db, &mut adapter, &hub).unwrap();

        assert!(pipe.is_playing());
        assert_eq!(pipe.build_error_count(), 0);
        assert_eq!(adapter.calls.first().map(String::as_str), Some("create_pipe"));
        assert_eq!(adapter.calls.last().map(String::as_str), Some("play Start"));

        // Algorithms are declared upstream-first.
        let algos = adapter.calls_with("create_algorithm");
        assert_eq!(
            algos,
            vec![
                "create_algorithm source.signal hA",
                "create_algorithm fx.gain hG",
                "create_algorithm sink.speaker hB",
            ]
        );

        // One chunk per out connection: source and gain each have one.
        assert_eq!(adapter.calls_with("create_chunk").len(), 2);
        // Both out connections attach, both downstream inputs attach.
        assert_eq!(adapter.calls_with("connect_pin_out").len(), 2);
        assert_eq!(adapter.calls_with("connect_pin_in").len(), 2);

        let events = drain(&mut queue);
        assert_eq!(
            events,
            vec!["PipeStartRequested", "PipeBuilt", "PipeStartResult"]
        );
    }

    #[test]
    fn test_start_twice_is_noop() {
        let mut db = chain_db();
        let mut adapter = RecordingAdapter::new();
        let (hub, _queue) = quiet_hub();
        let pipe = Pipe::new();

        pipe.start(&mut db, &mut adapter, &hub).unwrap();
        let calls_after_first = adapter.calls.len();
        pipe.start(&mut db, &mut adapter, &hub).unwrap();
        assert_eq!(adapter.calls.len(), calls_after_first);
    }

    #[test]
    fn test_phase_failure_aborts_to_cleanup() {
        let mut db = chain_db();
        let mut adapter = RecordingAdapter::failing(&["create_algorithm"]);
        let (hub, mut queue) = quiet_hub();
        let pipe = Pipe::new();

        let result = pipe.start(&mut db, &mut adapter, &hub);
        assert!(matches!(result, Err(BuildError::PhaseFailed { errors: 3 })));
        assert!(!pipe.is_playing());
        assert!(pipe.build_error_count() > 0);

        // Cleanup ran, Start never did.
        assert!(adapter.calls.iter().any(|c| c == "play Cleanup"));
        assert!(!adapter.calls.iter().any(|c| c == "play Start"));

        let events = drain(&mut queue);
        assert_eq!(
            events,
            vec!["PipeStartRequested", "PipeStartResult", "Message"]
        );
    }

    #[test]
    fn test_unresolvable_graph_fails_start() {
        let mut db = chain_db();
        // Dangling dependency: delete the source but forge the gain's
        // input record to survive.
        let a = db.find_instance("a").unwrap();
        let g = db.find_instance("g").unwrap();
        let ghost_record = {
            let instance = db.instance(g).unwrap();
            instance.pins_in[0].connections[0].name.clone()
        };
        db.delete_instance(a).unwrap();
        db.instance_mut(g)
            .unwrap()
            .pins_in[0]
            .connections
            .push(crate::graph::instance::Connection::new(
                a,
                0,
                ghost_record,
                &[],
            ));

        let mut adapter = RecordingAdapter::new();
        let (hub, _queue) = quiet_hub();
        let pipe = Pipe::new();

        let result = pipe.start(&mut db, &mut adapter, &hub);
        assert!(matches!(
            result,
            Err(BuildError::UnresolvedDependencies { .. })
        ));
        assert!(!pipe.is_playing());
        // The build never reached the hardware.
        assert!(adapter.calls.is_empty());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut db = chain_db();
        let mut adapter = RecordingAdapter::new();
        let (hub, _queue) = quiet_hub();
        let pipe = Pipe::new();

        // Stopping a never-started pipe succeeds.
        pipe.stop(&mut db, &mut adapter, &hub).unwrap();

        pipe.start(&mut db, &mut adapter, &hub).unwrap();
        pipe.stop(&mut db, &mut adapter, &hub).unwrap();
        assert!(!pipe.is_playing());

        // And again.
        pipe.stop(&mut db, &mut adapter, &hub).unwrap();
        assert!(!pipe.is_playing());
    }

    #[test]
    fn test_stop_releases_builder_state() {
        let mut db = chain_db();
        let mut adapter = RecordingAdapter::new();
        let (hub, _queue) = quiet_hub();
        let pipe = Pipe::new();

        pipe.start(&mut db, &mut adapter, &hub).unwrap();
        let g = db.find_instance("g").unwrap();
        assert!(db.instance(g).unwrap().build.is_some());
        assert!(db.instance(g).unwrap().build_index.is_some());

        pipe.stop(&mut db, &mut adapter, &hub).unwrap();
        assert!(db.instance(g).unwrap().build.is_none());
        assert!(db.instance(g).unwrap().build_index.is_none());
        assert!(pipe.build_order().is_empty());
    }

    #[test]
    fn test_push_pop_state_restores_running_pipe() {
        let mut db = chain_db();
        let mut adapter = RecordingAdapter::new();
        let (hub, _queue) = quiet_hub();
        let pipe = Pipe::new();

        pipe.start(&mut db, &mut adapter, &hub).unwrap();
        pipe.push_state().unwrap();
        pipe.stop(&mut db, &mut adapter, &hub).unwrap();

        // Mutate the graph while stopped.
        db.create_instance("g2", "fx.gain").unwrap();

        pipe.pop_state(&mut db, &mut adapter, &hub, true).unwrap();
        assert!(pipe.is_playing());
        // The rebuilt order includes the new instance.
        assert_eq!(pipe.build_order().len(), 4);
    }

    #[test]
    fn test_state_stack_bounds() {
        let pipe = Pipe::new();
        for _ in 0..STATE_STACK_MAX {
            pipe.push_state().unwrap();
        }
        assert!(matches!(pipe.push_state(), Err(BuildError::StateStack)));

        let mut db = chain_db();
        let mut adapter = RecordingAdapter::new();
        let (hub, _queue) = quiet_hub();
        for _ in 0..STATE_STACK_MAX {
            pipe.pop_state(&mut db, &mut adapter, &hub, false).unwrap();
        }
        assert!(matches!(
            pipe.pop_state(&mut db, &mut adapter, &hub, false),
            Err(BuildError::StateStack)
        ));
    }

    #[test]
    fn test_apply_parameter_forwards_to_live_algo() {
        let mut db = chain_db();
        let mut adapter = RecordingAdapter::new();
        let (hub, _queue) = quiet_hub();
        let pipe = Pipe::new();
        pipe.start(&mut db, &mut adapter, &hub).unwrap();

        let g = db.find_instance("g").unwrap();
        db.set_parameter(g, ParamRef::Instance { index: 0 }, "0.25")
            .unwrap();
        pipe.apply_parameter(&mut db, &mut adapter, &hub, g, ParamRef::Instance { index: 0 })
            .unwrap();

        assert!(adapter
            .calls
            .iter()
            .any(|c| c.starts_with("set_static_config") && c.ends_with("gain=0.25")));
        assert!(pipe.is_playing());
    }

    #[test]
    fn test_apply_structural_parameter_stops_pipe() {
        let mut db = chain_db();
        let mut adapter = RecordingAdapter::new();
        let (hub, mut queue) = quiet_hub();
        let pipe = Pipe::new();
        pipe.start(&mut db, &mut adapter, &hub).unwrap();
        drain(&mut queue);

        let a = db.find_instance("a").unwrap();
        let param = ParamRef::PinOut {
            pin: 0,
            cnx: 0,
            index: 0,
        };
        db.set_parameter(a, param, "4").unwrap();
        pipe.apply_parameter(&mut db, &mut adapter, &hub, a, param)
            .unwrap();

        assert!(!pipe.is_playing());
        let events = drain(&mut queue);
        assert!(events.contains(&"PipeStopDueToError"));
    }

    #[test]
    fn test_apply_parameter_on_stopped_pipe_is_noop() {
        let mut db = chain_db();
        let mut adapter = RecordingAdapter::new();
        let (hub, _queue) = quiet_hub();
        let pipe = Pipe::new();

        let g = db.find_instance("g").unwrap();
        pipe.apply_parameter(&mut db, &mut adapter, &hub, g, ParamRef::Instance { index: 0 })
            .unwrap();
        assert!(adapter.calls.is_empty());
    }

    #[test]
    fn test_graph_stays_consistent_through_build_cycle() {
        let mut db = chain_db();
        let mut adapter = RecordingAdapter::new();
        let (hub, _queue) = quiet_hub();
        let pipe = Pipe::new();

        pipe.start(&mut db, &mut adapter, &hub).unwrap();
        assert!(db.check_consistency().is_empty());
        pipe.stop(&mut db, &mut adapter, &hub).unwrap();
        assert!(db.check_consistency().is_empty());
    }
}
