//! Built-in element catalog.
//!
//! The registration pass every firmware build runs at startup: the core
//! set of template elements (signal source, speaker sink, gain, splitter,
//! mixer, passthrough, meter) that external tooling can place and wire.
//! Product ports register additional elements on top of these.

use std::sync::Arc;

use crate::adapter::ChunkFormat;
use crate::builder::{defaults, BuildPhase, PhaseContext, PhaseOutcome};
use crate::graph::{
    Element, ElementBehavior, ElementPin, GraphDb, GraphError, Instance, ParamRef, ParamTemplate,
};

/// Registers every built-in element with the database.
pub fn register_builtin_elements(db: &mut GraphDb) -> Result<(), GraphError> {
    db.register_element(signal_source())?;
    db.register_element(speaker_sink())?;
    db.register_element(gain())?;
    db.register_element(splitter())?;
    db.register_element(mixer())?;
    db.register_element(passthrough())?;
    db.register_element(meter())?;
    Ok(())
}

/// Formats a float without trailing fractional zeros (`1.50` -> `1.5`,
/// `2.0` -> `2`).
fn format_float(value: f64) -> String {
    let mut text = format!("{:.6}", value);
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    text
}

fn signal_source() -> Element {
    Element::builder("source.signal")
        .output(ElementPin::stream("out", 8).with_param(ParamTemplate::int("channels", 2)))
        .param(ParamTemplate::float("frequency", 440.0))
        .param(ParamTemplate::float("amplitude", 0.8))
        .param(ParamTemplate::new(
            "waveform",
            crate::graph::ParamKind::Choice,
            "sine",
        ))
        .default_format(ChunkFormat::new(48_000, 2))
        .build()
}

fn speaker_sink() -> Element {
    Element::builder("sink.speaker")
        .input(ElementPin::stream("in", 1))
        .param(ParamTemplate::float("volume", 0.8))
        .build()
}

/// Gain clamps its level parameter into the supported hardware range on
/// every change.
struct GainBehavior;

impl ElementBehavior for GainBehavior {
    fn parameter_changed(&self, instance: &mut Instance, param: ParamRef) {
        if let ParamRef::Instance { index } = param {
            if let Some(param) = instance.params.get_mut(index) {
                let clamped = param.as_f64().clamp(0.0, 4.0);
                param.set_value(&format_float(clamped));
            }
        }
    }
}

fn gain() -> Element {
    Element::builder("fx.gain")
        .input(ElementPin::stream("in", 1))
        .output(ElementPin::stream("out", 4))
        .param(ParamTemplate::float("gain", 1.0))
        .behavior(Arc::new(GainBehavior))
        .build()
}

fn splitter() -> Element {
    Element::builder("util.split")
        .input(ElementPin::stream("in", 1))
        .output(ElementPin::stream("out a", 4))
        .output(ElementPin::stream("out b", 4))
        .build()
}

fn mixer() -> Element {
    Element::builder("util.mix")
        .input(ElementPin::stream("in a", 1))
        .input(ElementPin::stream("in b", 1))
        .output(ElementPin::stream("out", 4))
        .param(ParamTemplate::new(
            "mode",
            crate::graph::ParamKind::Choice,
            "add",
        ))
        .build()
}

fn passthrough() -> Element {
    Element::builder("util.passthrough")
        .input(ElementPin::stream("in", 1))
        .output(ElementPin::stream("out", 4))
        .build()
}

/// The meter taps levels off its input; its output pin is an event link
/// (no hardware chunk), and the underlying algorithm needs its tap mode in
/// the common configuration on top of the standard element setup.
struct MeterBehavior;

impl ElementBehavior for MeterBehavior {
    fn build_phase(&self, phase: BuildPhase, cx: &mut PhaseContext<'_>) -> PhaseOutcome {
        match phase {
            BuildPhase::InitGraphElement => {
                let outcome = defaults::init_graph_element_default(cx);
                let algo = cx
                    .instance()
                    .and_then(|i| i.build.as_ref())
                    .and_then(|b| b.algo);
                if let Some(algo) = algo {
                    let result = cx.adapter.set_common_config(algo, "tap", "rms");
                    cx.check("set_common_config", result);
                }
                outcome
            }
            _ => PhaseOutcome::UseDefault,
        }
    }
}

fn meter() -> Element {
    Element::builder("util.meter")
        .input(ElementPin::stream("in", 1))
        .output(ElementPin::event("level", 4))
        .param(ParamTemplate::int("window", 128))
        .behavior(Arc::new(MeterBehavior))
        .build()
}
