//! Default build-phase handlers.
//!
//! Each phase has a default behavior an element falls back to when its
//! override returns [`PhaseOutcome::UseDefault`]. The defaults cover the
//! common element shape: derive hardware names, propagate the signal format
//! from the single connected input to every output connection, create one
//! chunk per output connection, declare the algorithm, and wire every pin.
//!
//! Defaults run only for instances that carry build state; an element
//! whose `construct` override installs nothing opts out of all of them.

use tracing::error;

use crate::adapter::ChunkFormat;
use crate::graph::{GraphDb, InstanceHandle, PinDirection, PinKind};

use super::context::PhaseContext;
use super::phase::{BuildPhase, PhaseOutcome};

/// Folds a name into a hardware-safe identifier: leading `h`, first letter
/// capitalized, every non-alphanumeric character replaced by `_`.
pub fn make_var_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    out.push('h');
    let mut chars = name.chars();
    if let Some(first) = chars.next() {
        for c in first.to_uppercase() {
            out.push(if c.is_alphanumeric() { c } else { '_' });
        }
    }
    for c in chars {
        out.push(if c.is_alphanumeric() { c } else { '_' });
    }
    out
}

/// Hardware variable name for one connection's chunk.
pub fn chunk_var_name(cnx_name: &str) -> String {
    let sanitized: String = cnx_name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    format!("hChunk_{}", sanitized)
}

/// Runs the default handler for a phase.
///
/// `Constructor`/`Destructor` have no default here; the dispatcher manages
/// build-state lifetime itself.
pub(crate) fn dispatch_default(phase: BuildPhase, cx: &mut PhaseContext<'_>) -> PhaseOutcome {
    match phase {
        BuildPhase::Start => start_default(cx),
        BuildPhase::Prolog => prolog_default(cx),
        BuildPhase::PreInitGraph | BuildPhase::PostInitGraph => PhaseOutcome::Ok,
        BuildPhase::InitGraphElement => init_graph_element_default(cx),
        BuildPhase::InitGraphAttachConnections => attach_connections_default(cx),
        BuildPhase::Constructor | BuildPhase::Destructor => PhaseOutcome::Ok,
    }
}

/// `Start`: reset per-build state, derive hardware-visible names, mark the
/// instance and its stream-pin connections provisionally valid.
pub fn start_default(cx: &mut PhaseContext<'_>) -> PhaseOutcome {
    let element = match cx.element() {
        Some(element) => element,
        None => return PhaseOutcome::Ok,
    };
    let instance = match cx.instance_mut() {
        Some(instance) => instance,
        None => return PhaseOutcome::Ok,
    };

    let var_name = make_var_name(&instance.name);
    if let Some(build) = instance.build.as_mut() {
        build.valid = true;
        build.var_name = var_name;
        build.algo = None;
    }

    for (slot, pin_def) in instance.pins_in.iter_mut().zip(&element.pins_in) {
        for cnx in &mut slot.connections {
            cnx.chunk.reset();
            cnx.chunk.valid = pin_def.kind == PinKind::Stream;
            cnx.chunk.var_name = chunk_var_name(&cnx.name);
        }
    }
    for (slot, pin_def) in instance.pins_out.iter_mut().zip(&element.pins_out) {
        for cnx in &mut slot.connections {
            cnx.chunk.reset();
            cnx.chunk.valid = pin_def.kind == PinKind::Stream;
            cnx.chunk.var_name = chunk_var_name(&cnx.name);
        }
    }
    PhaseOutcome::Ok
}

/// Where a format propagates from.
enum Upstream {
    /// Format taken from the upstream peer's out connection.
    Format(ChunkFormat),
    /// No connected input; the element default applies.
    None,
    /// The input record has no reciprocal: topology corruption.
    Corrupt,
}

/// Looks up the format on the reciprocal of the first input connection.
fn upstream_format(db: &GraphDb, handle: InstanceHandle) -> Upstream {
    let instance = match db.instance(handle) {
        Some(instance) => instance,
        None => return Upstream::None,
    };
    let cnx = match instance.pins_in.first().and_then(|s| s.connections.first()) {
        Some(cnx) => cnx,
        None => return Upstream::None,
    };
    let reciprocal = db.instance(cnx.peer).and_then(|peer| {
        peer.pin(PinDirection::Output, cnx.peer_pin)?
            .connections
            .iter()
            .find(|c| c.peer == handle && c.name == cnx.name)
    });
    match reciprocal {
        Some(reciprocal) => Upstream::Format(reciprocal.chunk.format.clone()),
        None => Upstream::Corrupt,
    }
}

/// `Prolog`: propagate the signal format from the single connected input
/// pin to every connection on every stream output pin. An instance with no
/// connected input seeds the element's default format instead.
pub fn prolog_default(cx: &mut PhaseContext<'_>) -> PhaseOutcome {
    let element = match cx.element() {
        Some(element) => element,
        None => return PhaseOutcome::Ok,
    };

    let format = match upstream_format(cx.db, cx.instance) {
        Upstream::Format(format) => format,
        Upstream::None => element.default_format.clone(),
        Upstream::Corrupt => {
            let name = cx.instance().map(|i| i.name.clone()).unwrap_or_default();
            error!(instance = %name, "topology corruption: input connection has no reciprocal");
            cx.count_error();
            element.default_format.clone()
        }
    };

    let instance = match cx.instance_mut() {
        Some(instance) => instance,
        None => return PhaseOutcome::Ok,
    };
    for (slot, pin_def) in instance.pins_out.iter_mut().zip(&element.pins_out) {
        if pin_def.kind != PinKind::Stream {
            continue;
        }
        for cnx in &mut slot.connections {
            if cnx.chunk.valid {
                cnx.chunk.format = format.clone();
            }
        }
    }
    PhaseOutcome::Ok
}

/// `InitGraphElement`: create the hardware chunk for every connected stream
/// output, declare the algorithm instance, and apply the instance's static
/// parameter configuration.
pub fn init_graph_element_default(cx: &mut PhaseContext<'_>) -> PhaseOutcome {
    let element = match cx.element() {
        Some(element) => element,
        None => return PhaseOutcome::Ok,
    };

    // Chunks for every valid connection on stream output pins.
    let chunk_targets: Vec<(usize, usize, ChunkFormat)> = match cx.instance() {
        Some(instance) => instance
            .pins_out
            .iter()
            .zip(&element.pins_out)
            .enumerate()
            .filter(|(_, (_, pin_def))| pin_def.kind == PinKind::Stream)
            .flat_map(|(pin, (slot, _))| {
                slot.connections
                    .iter()
                    .enumerate()
                    .filter(|(_, cnx)| cnx.chunk.valid)
                    .map(move |(index, cnx)| (pin, index, cnx.chunk.format.clone()))
            })
            .collect(),
        None => return PhaseOutcome::Ok,
    };

    for (pin, index, format) in chunk_targets {
        let result = cx.adapter.create_chunk(&format);
        if let Some(chunk) = cx.check("create_chunk", result) {
            if let Some(cnx) = cx
                .instance_mut()
                .and_then(|i| i.connection_mut(PinDirection::Output, pin, index))
            {
                cnx.chunk.chunk = Some(chunk);
            }
        }
    }

    // Declare and configure the algorithm.
    let algo_info = cx.instance().and_then(|instance| {
        instance.build.as_ref().filter(|b| b.valid).map(|build| {
            (
                build.var_name.clone(),
                instance
                    .params
                    .iter()
                    .map(|p| (p.name.to_string(), p.value().to_string()))
                    .collect::<Vec<_>>(),
            )
        })
    });
    if let Some((var_name, params)) = algo_info {
        let result = cx.adapter.create_algorithm(&element.name, &var_name);
        if let Some(algo) = cx.check("create_algorithm", result) {
            if let Some(build) = cx.instance_mut().and_then(|i| i.build.as_mut()) {
                build.algo = Some(algo);
            }
            for (name, value) in params {
                let result = cx.adapter.set_static_config(algo, &name, &value);
                cx.check("set_static_config", result);
            }
        }
    }

    PhaseOutcome::Ok
}

/// `InitGraphAttachConnections`: wire every output connection's chunk into
/// the pipe's pin-out slot, and every input pin's upstream chunk into the
/// pin-in slot. A missing reciprocal is surfaced as corruption, never
/// repaired.
pub fn attach_connections_default(cx: &mut PhaseContext<'_>) -> PhaseOutcome {
    let element = match cx.element() {
        Some(element) => element,
        None => return PhaseOutcome::Ok,
    };
    let handle = cx.instance;

    let (name, algo) = match cx.instance() {
        Some(instance) => (
            instance.name.clone(),
            instance.build.as_ref().filter(|b| b.valid).and_then(|b| b.algo),
        ),
        None => return PhaseOutcome::Ok,
    };
    let algo = match algo {
        Some(algo) => algo,
        // Not declared to the hardware; nothing to attach.
        None => return PhaseOutcome::Ok,
    };

    // Output side: the chunks created for this instance's own connections.
    let outs: Vec<(usize, crate::adapter::ChunkHandle)> = cx
        .instance()
        .map(|instance| {
            instance
                .pins_out
                .iter()
                .zip(&element.pins_out)
                .enumerate()
                .filter(|(_, (_, pin_def))| pin_def.kind == PinKind::Stream)
                .flat_map(|(pin, (slot, _))| {
                    slot.connections
                        .iter()
                        .filter(|cnx| cnx.chunk.valid)
                        .filter_map(move |cnx| cnx.chunk.chunk.map(|chunk| (pin, chunk)))
                })
                .collect()
        })
        .unwrap_or_default();

    for (pin, chunk) in outs {
        let result = cx.adapter.connect_pin_out(algo, pin, chunk);
        cx.check("connect_pin_out", result);
    }

    // Input side: resolve each upstream peer's reciprocal record and wire
    // its chunk in.
    enum InWire {
        Chunk(usize, crate::adapter::ChunkHandle),
        Corrupt(usize, String),
    }
    let ins: Vec<InWire> = cx
        .instance()
        .map(|instance| {
            let mut wires = Vec::new();
            for (pin, (slot, pin_def)) in
                instance.pins_in.iter().zip(&element.pins_in).enumerate()
            {
                if pin_def.kind != PinKind::Stream {
                    continue;
                }
                for cnx in &slot.connections {
                    if !cnx.chunk.valid {
                        continue;
                    }
                    let upstream = cx.db.instance(cnx.peer).and_then(|peer| {
                        peer.pin(PinDirection::Output, cnx.peer_pin)?
                            .connections
                            .iter()
                            .find(|c| c.peer == handle && c.name == cnx.name)
                    });
                    match upstream {
                        Some(upstream) => {
                            if let Some(chunk) = upstream.chunk.chunk {
                                wires.push(InWire::Chunk(pin, chunk));
                            }
                        }
                        None => wires.push(InWire::Corrupt(pin, cnx.name.clone())),
                    }
                }
            }
            wires
        })
        .unwrap_or_default();

    for wire in ins {
        match wire {
            InWire::Chunk(pin, chunk) => {
                let result = cx.adapter.connect_pin_in(algo, pin, chunk);
                cx.check("connect_pin_in", result);
            }
            InWire::Corrupt(pin, cnx_name) => {
                error!(
                    instance = %name,
                    pin,
                    connection = %cnx_name,
                    "topology corruption: connection has no reciprocal"
                );
                cx.count_error();
            }
        }
    }

    PhaseOutcome::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::RecordingAdapter;
    use crate::graph::database::tests::test_db;
    use crate::graph::instance::BuildState;

    #[test]
    fn test_make_var_name() {
        assert_eq!(make_var_name("gain"), "hGain");
        assert_eq!(make_var_name("my gain 2"), "hMy_gain_2");
        assert_eq!(make_var_name(""), "h");
    }

    #[test]
    fn test_chunk_var_name() {
        assert_eq!(chunk_var_name("a.0-b.0"), "hChunk_a_0_b_0");
    }

    #[test]
    fn test_start_and_prolog_propagate_format() {
        let mut db = test_db();
        let a = db.create_instance("a", "source.signal").unwrap();
        let g = db.create_instance("g", "fx.gain").unwrap();
        let b = db.create_instance("b", "sink.speaker").unwrap();
        db.connect("a", 0, "g", 0).unwrap();
        db.connect("g", 0, "b", 0).unwrap();

        let mut adapter = RecordingAdapter::new();
        let mut errors = 0;
        for handle in [a, g, b] {
            db.instance_mut(handle).unwrap().build = Some(BuildState::default());
            let mut cx = PhaseContext {
                db: &mut db,
                instance: handle,
                adapter: &mut adapter,
                errors: &mut errors,
            };
            assert_eq!(start_default(&mut cx), PhaseOutcome::Ok);
        }
        for handle in [a, g, b] {
            let mut cx = PhaseContext {
                db: &mut db,
                instance: handle,
                adapter: &mut adapter,
                errors: &mut errors,
            };
            assert_eq!(prolog_default(&mut cx), PhaseOutcome::Ok);
        }

        assert_eq!(errors, 0);
        // The source seeds its element default; the gain's out connection
        // carries the same format propagated from its input.
        let source_format = db
            .instance(a)
            .unwrap()
            .connection(PinDirection::Output, 0, 0)
            .unwrap()
            .chunk
            .format
            .clone();
        let gain_format = db
            .instance(g)
            .unwrap()
            .connection(PinDirection::Output, 0, 0)
            .unwrap()
            .chunk
            .format
            .clone();
        assert_eq!(source_format, gain_format);
        assert_eq!(
            db.instance(g).unwrap().build.as_ref().unwrap().var_name,
            "hG"
        );
    }

    #[test]
    fn test_start_marks_stream_connections_valid() {
        let mut db = test_db();
        let a = db.create_instance("a", "source.signal").unwrap();
        db.create_instance("b", "sink.speaker").unwrap();
        db.connect("a", 0, "b", 0).unwrap();

        db.instance_mut(a).unwrap().build = Some(BuildState::default());
        let mut adapter = RecordingAdapter::new();
        let mut errors = 0;
        let mut cx = PhaseContext {
            db: &mut db,
            instance: a,
            adapter: &mut adapter,
            errors: &mut errors,
        };
        start_default(&mut cx);

        let cnx = db
            .instance(a)
            .unwrap()
            .connection(PinDirection::Output, 0, 0)
            .unwrap();
        assert!(cnx.chunk.valid);
        assert_eq!(cnx.chunk.var_name, "hChunk_a_0_b_0");
    }

    #[test]
    fn test_corrupt_upstream_counts_error() {
        let mut db = test_db();
        let a = db.create_instance("a", "source.signal").unwrap();
        let g = db.create_instance("g", "fx.gain").unwrap();
        db.connect("a", 0, "g", 0).unwrap();

        // Strip the reciprocal out-record.
        db.instance_mut(a).unwrap().pins_out[0].connections.clear();

        db.instance_mut(g).unwrap().build = Some(BuildState::default());
        let mut adapter = RecordingAdapter::new();
        let mut errors = 0;
        let mut cx = PhaseContext {
            db: &mut db,
            instance: g,
            adapter: &mut adapter,
            errors: &mut errors,
        };
        start_default(&mut cx);
        prolog_default(&mut cx);

        assert_eq!(errors, 1);
    }
}
