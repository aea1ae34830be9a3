//! Element templates.
//!
//! An element is the immutable blueprint for a kind of pipeline node: its
//! pin layout, its parameter templates, and its behavior overrides. Elements
//! are registered once (usually during a startup registration pass) and
//! shared by every instance placed from them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::adapter::ChunkFormat;
use crate::builder::{BuildPhase, PhaseContext, PhaseOutcome};

use super::instance::{Instance, ParamRef};

/// Whether a pin carries hardware data chunks or side-band events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinKind {
    /// Carries audio/data chunks; the builder creates and wires hardware
    /// buffers for connections on this pin.
    Stream,
    /// Non-data link (triggers, control taps); no chunk is created.
    Event,
}

/// Logical type of a parameter value.
///
/// Values are always stored text-encoded; the kind tells external tooling
/// how to edit and validate them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    /// Floating-point number, text-encoded.
    Float,
    /// Integer, text-encoded.
    Int,
    /// Free-form text.
    Text,
    /// One of a fixed set of named values.
    Choice,
}

/// Template for one parameter: name, kind, and default value.
///
/// The name is shared (`Arc<str>`) with every instance/connection parameter
/// cloned from this template.
#[derive(Clone, Debug)]
pub struct ParamTemplate {
    /// Stable parameter name.
    pub name: Arc<str>,
    /// Logical value kind.
    pub kind: ParamKind,
    /// Default value, text-encoded.
    pub default: String,
}

impl ParamTemplate {
    /// Creates a parameter template.
    pub fn new(name: &str, kind: ParamKind, default: &str) -> Self {
        Self {
            name: Arc::from(name),
            kind,
            default: default.to_string(),
        }
    }

    /// Float parameter shorthand.
    pub fn float(name: &str, default: f64) -> Self {
        Self::new(name, ParamKind::Float, &default.to_string())
    }

    /// Integer parameter shorthand.
    pub fn int(name: &str, default: i64) -> Self {
        Self::new(name, ParamKind::Int, &default.to_string())
    }

    /// Text parameter shorthand.
    pub fn text(name: &str, default: &str) -> Self {
        Self::new(name, ParamKind::Text, default)
    }
}

/// Declaration of one pin on an element.
#[derive(Clone, Debug)]
pub struct ElementPin {
    /// Pin name, unique within its direction.
    pub name: String,
    /// Data-carrying or event pin.
    pub kind: PinKind,
    /// Maximum number of connections this pin accepts.
    pub max_connections: usize,
    /// Parameter templates seeded onto every connection made on this pin.
    pub params: Vec<ParamTemplate>,
}

impl ElementPin {
    /// Creates a stream pin with a connection limit.
    pub fn stream(name: &str, max_connections: usize) -> Self {
        Self {
            name: name.to_string(),
            kind: PinKind::Stream,
            max_connections,
            params: Vec::new(),
        }
    }

    /// Creates an event pin with a connection limit.
    pub fn event(name: &str, max_connections: usize) -> Self {
        Self {
            name: name.to_string(),
            kind: PinKind::Event,
            max_connections,
            params: Vec::new(),
        }
    }

    /// Adds a connection-scoped parameter template.
    pub fn with_param(mut self, param: ParamTemplate) -> Self {
        self.params.push(param);
        self
    }
}

/// Per-element lifecycle and build-phase overrides.
///
/// Every method has a default body, so an element only implements what it
/// needs. `build_phase` returning [`PhaseOutcome::UseDefault`] hands the
/// phase to the orchestrator's default handler; overriding a single phase
/// and deferring the rest is the normal pattern.
pub trait ElementBehavior: Send + Sync {
    /// Called once per instance at the start of a build; allocates
    /// builder-private state. Default: the orchestrator installs the
    /// standard build state.
    fn construct(&self, _instance: &mut Instance) -> PhaseOutcome {
        PhaseOutcome::UseDefault
    }

    /// Called on teardown and instance deletion; releases whatever
    /// `construct` allocated. Default: the orchestrator drops the standard
    /// build state.
    fn destruct(&self, _instance: &mut Instance) -> PhaseOutcome {
        PhaseOutcome::UseDefault
    }

    /// Called after a parameter value changed on an instance or one of its
    /// connections.
    fn parameter_changed(&self, _instance: &mut Instance, _param: ParamRef) {}

    /// Called for every build phase in dependency order.
    fn build_phase(&self, _phase: BuildPhase, _cx: &mut PhaseContext<'_>) -> PhaseOutcome {
        PhaseOutcome::UseDefault
    }
}

/// Behavior that defers everything to the defaults.
pub struct DefaultBehavior;

impl ElementBehavior for DefaultBehavior {}

/// Immutable blueprint for a kind of pipeline node.
pub struct Element {
    /// Unique element name (e.g. `"fx.gain"`).
    pub name: String,
    /// Optional JSON definition text served back to external tooling.
    pub definition: Option<String>,
    /// Declared input pins, in index order.
    pub pins_in: Vec<ElementPin>,
    /// Declared output pins, in index order.
    pub pins_out: Vec<ElementPin>,
    /// Instance-scoped parameter templates.
    pub params: Vec<ParamTemplate>,
    /// Format seeded on outputs when no input provides one (sources).
    pub default_format: ChunkFormat,
    /// Lifecycle/build overrides.
    pub behavior: Arc<dyn ElementBehavior>,
}

impl Element {
    /// Starts building an element definition.
    pub fn builder(name: &str) -> ElementBuilder {
        ElementBuilder {
            element: Element {
                name: name.to_string(),
                definition: None,
                pins_in: Vec::new(),
                pins_out: Vec::new(),
                params: Vec::new(),
                default_format: ChunkFormat::default(),
                behavior: Arc::new(DefaultBehavior),
            },
        }
    }

    /// Returns the declared pin, if the index is in range.
    pub fn pin(&self, direction: PinDirection, index: usize) -> Option<&ElementPin> {
        match direction {
            PinDirection::Input => self.pins_in.get(index),
            PinDirection::Output => self.pins_out.get(index),
        }
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("name", &self.name)
            .field("pins_in", &self.pins_in.len())
            .field("pins_out", &self.pins_out.len())
            .field("params", &self.params.len())
            .finish()
    }
}

/// Direction of a pin on an element or instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PinDirection {
    /// Receives connections from upstream outputs.
    Input,
    /// Feeds connections into downstream inputs.
    Output,
}

impl PinDirection {
    /// The opposite direction.
    pub fn opposite(&self) -> PinDirection {
        match self {
            PinDirection::Input => PinDirection::Output,
            PinDirection::Output => PinDirection::Input,
        }
    }
}

/// Fluent constructor used by registration passes.
pub struct ElementBuilder {
    element: Element,
}

impl ElementBuilder {
    /// Adds an input pin.
    pub fn input(mut self, pin: ElementPin) -> Self {
        self.element.pins_in.push(pin);
        self
    }

    /// Adds an output pin.
    pub fn output(mut self, pin: ElementPin) -> Self {
        self.element.pins_out.push(pin);
        self
    }

    /// Adds an instance-scoped parameter template.
    pub fn param(mut self, param: ParamTemplate) -> Self {
        self.element.params.push(param);
        self
    }

    /// Sets the JSON definition text served to external tooling.
    pub fn definition(mut self, json: &str) -> Self {
        self.element.definition = Some(json.to_string());
        self
    }

    /// Sets the format seeded on source-like outputs.
    pub fn default_format(mut self, format: ChunkFormat) -> Self {
        self.element.default_format = format;
        self
    }

    /// Installs the behavior overrides.
    pub fn behavior(mut self, behavior: Arc<dyn ElementBehavior>) -> Self {
        self.element.behavior = behavior;
        self
    }

    /// Finishes the definition.
    pub fn build(self) -> Element {
        self.element
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_builder() {
        let element = Element::builder("fx.gain")
            .input(ElementPin::stream("in", 1))
            .output(ElementPin::stream("out", 4))
            .param(ParamTemplate::float("gain", 1.0))
            .build();

        assert_eq!(element.name, "fx.gain");
        assert_eq!(element.pins_in.len(), 1);
        assert_eq!(element.pins_out.len(), 1);
        assert_eq!(element.pins_out[0].max_connections, 4);
        assert_eq!(element.params[0].name.as_ref(), "gain");
    }

    #[test]
    fn test_pin_lookup() {
        let element = Element::builder("util.split")
            .input(ElementPin::stream("in", 1))
            .output(ElementPin::stream("out a", 1))
            .output(ElementPin::stream("out b", 1))
            .build();

        assert_eq!(element.pin(PinDirection::Output, 1).unwrap().name, "out b");
        assert!(element.pin(PinDirection::Input, 1).is_none());
    }

    #[test]
    fn test_pin_direction_opposite() {
        assert_eq!(PinDirection::Input.opposite(), PinDirection::Output);
        assert_eq!(PinDirection::Output.opposite(), PinDirection::Input);
    }

    #[test]
    fn test_param_template_shorthands() {
        let f = ParamTemplate::float("freq", 440.0);
        assert_eq!(f.kind, ParamKind::Float);
        assert_eq!(f.default, "440");

        let i = ParamTemplate::int("channels", 2);
        assert_eq!(i.kind, ParamKind::Int);
        assert_eq!(i.default, "2");

        let t = ParamTemplate::text("label", "main");
        assert_eq!(t.kind, ParamKind::Text);
        assert_eq!(t.default, "main");
    }

    #[test]
    fn test_connection_param_on_pin() {
        let pin = ElementPin::stream("out", 2).with_param(ParamTemplate::int("channels", 2));
        assert_eq!(pin.params.len(), 1);
        assert_eq!(pin.kind, PinKind::Stream);
    }
}
