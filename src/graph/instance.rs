//! Placed instances, their parameters, and their connections.
//!
//! An instance is one live node in the editable graph: a named reference to
//! an element template plus per-instance parameter values, one pin slot per
//! declared pin, and builder-private state while a build is active.
//!
//! One logical edge between two instances is stored as two symmetric
//! [`Connection`] records, one in each endpoint's pin slot, that point at
//! each other and share a logical name. Keeping both sides reciprocal is the
//! core structural invariant of the database; `check_consistency` exists to
//! detect any drift.

use std::any::Any;
use std::sync::Arc;

use crate::adapter::{AlgoHandle, ChunkFormat, ChunkHandle};
use crate::collection::Handle;

use super::element::{Element, ParamKind, ParamTemplate, PinDirection};

/// Handle to an instance in the graph database.
pub type InstanceHandle = Handle;

/// A name/value pair on an instance or connection.
///
/// The name is shared with the element-level template; the value is always
/// an owned, text-encoded string regardless of the logical kind.
#[derive(Clone, Debug)]
pub struct Parameter {
    /// Name, shared with the element's parameter template.
    pub name: Arc<str>,
    /// Logical value kind, from the template.
    pub kind: ParamKind,
    value: String,
}

impl Parameter {
    /// Clones a parameter from its template, seeded with the default value.
    pub fn from_template(template: &ParamTemplate) -> Self {
        Self {
            name: Arc::clone(&template.name),
            kind: template.kind,
            value: template.default.clone(),
        }
    }

    /// The current value, text-encoded.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Replaces the value.
    pub fn set_value(&mut self, value: &str) {
        self.value = value.to_string();
    }

    /// The value as a float; 0.0 when it does not parse.
    pub fn as_f64(&self) -> f64 {
        self.value.trim().parse().unwrap_or(0.0)
    }

    /// The value as an integer; 0 when it does not parse.
    pub fn as_i64(&self) -> i64 {
        self.value.trim().parse().unwrap_or(0)
    }
}

/// Addresses one parameter on an instance or on one of its connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamRef {
    /// Instance-scoped parameter.
    Instance {
        /// Index into the instance parameter list.
        index: usize,
    },
    /// Parameter on a connection attached to an input pin.
    PinIn {
        /// Input pin index.
        pin: usize,
        /// Connection index on that pin.
        cnx: usize,
        /// Index into the connection parameter list.
        index: usize,
    },
    /// Parameter on a connection attached to an output pin.
    PinOut {
        /// Output pin index.
        pin: usize,
        /// Connection index on that pin.
        cnx: usize,
        /// Index into the connection parameter list.
        index: usize,
    },
}

impl ParamRef {
    /// True for connection-scoped parameters, which describe the topology's
    /// signal formats: changing one under a running pipe forces a rebuild.
    pub fn is_structural(&self) -> bool {
        !matches!(self, ParamRef::Instance { .. })
    }
}

/// Per-connection hardware-facing state, valid only during a build.
#[derive(Debug, Default)]
pub struct ChunkState {
    /// Whether this connection takes part in hardware wiring.
    pub valid: bool,
    /// Signal format propagated to (or seeded on) this connection.
    pub format: ChunkFormat,
    /// Hardware buffer created for this connection, if any.
    pub chunk: Option<ChunkHandle>,
    /// Hardware-visible variable name (`hChunk_<connection name>`).
    pub var_name: String,
}

impl ChunkState {
    /// Clears everything back to the not-built state.
    pub fn reset(&mut self) {
        *self = ChunkState::default();
    }
}

/// Builder-private state attached to an instance for the duration of one
/// build. Created by the `Constructor` phase, dropped by `Destructor`.
#[derive(Default)]
pub struct BuildState {
    /// Whether the instance is (provisionally) part of the hardware chain.
    pub valid: bool,
    /// Hardware-visible variable name derived from the instance name.
    pub var_name: String,
    /// Algorithm handle declared to the adapter, once created.
    pub algo: Option<AlgoHandle>,
    /// Element-specific payload installed by a `construct` override.
    pub custom: Option<Box<dyn Any + Send>>,
}

impl std::fmt::Debug for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildState")
            .field("valid", &self.valid)
            .field("var_name", &self.var_name)
            .field("algo", &self.algo)
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

/// One endpoint record of a logical edge.
#[derive(Debug)]
pub struct Connection {
    /// The instance on the other side of the edge.
    pub peer: InstanceHandle,
    /// Pin index on the peer (in the opposite direction).
    pub peer_pin: usize,
    /// Logical edge name, identical on both reciprocal records.
    pub name: String,
    /// Connection-scoped parameters, seeded from the element pin's
    /// templates and mutable per connection.
    pub params: Vec<Parameter>,
    /// Hardware-facing build state.
    pub chunk: ChunkState,
}

impl Connection {
    /// Creates a record pointing at `(peer, peer_pin)`, seeding parameters
    /// from the element pin templates.
    pub fn new(
        peer: InstanceHandle,
        peer_pin: usize,
        name: String,
        templates: &[ParamTemplate],
    ) -> Self {
        Self {
            peer,
            peer_pin,
            name,
            params: templates.iter().map(Parameter::from_template).collect(),
            chunk: ChunkState::default(),
        }
    }
}

/// The connections currently attached to one declared pin of an instance.
///
/// The element's `max_connections` limit is enforced by the database when
/// connecting, not by the slot itself.
#[derive(Debug, Default)]
pub struct PinSlot {
    /// Attached connections, in attach order.
    pub connections: Vec<Connection>,
}

/// A placed node in the live graph.
pub struct Instance {
    /// Unique instance name.
    pub name: String,
    /// Free-form description shown by external tooling.
    pub description: Option<String>,
    /// The element this instance was placed from.
    pub element: Arc<Element>,
    /// Instance-scoped parameter values.
    pub params: Vec<Parameter>,
    /// One slot per declared input pin.
    pub pins_in: Vec<PinSlot>,
    /// One slot per declared output pin.
    pub pins_out: Vec<PinSlot>,
    /// Builder-private state; present only between Constructor and
    /// Destructor of a build (or until instance deletion).
    pub build: Option<BuildState>,
    /// Dependency-resolution flag, meaningful only while a build order is
    /// being computed.
    pub resolved: bool,
    /// Position in the active build order, if any.
    pub build_index: Option<usize>,
}

impl Instance {
    /// Creates an instance of `element`: pin slots sized to the element's
    /// declared pins, parameters cloned from the element defaults.
    pub fn new(name: &str, element: Arc<Element>) -> Self {
        let params = element.params.iter().map(Parameter::from_template).collect();
        let pins_in = (0..element.pins_in.len()).map(|_| PinSlot::default()).collect();
        let pins_out = (0..element.pins_out.len()).map(|_| PinSlot::default()).collect();
        Self {
            name: name.to_string(),
            description: None,
            element,
            params,
            pins_in,
            pins_out,
            build: None,
            resolved: false,
            build_index: None,
        }
    }

    /// Returns the pin slot, if the index is in range.
    pub fn pin(&self, direction: PinDirection, index: usize) -> Option<&PinSlot> {
        match direction {
            PinDirection::Input => self.pins_in.get(index),
            PinDirection::Output => self.pins_out.get(index),
        }
    }

    /// Mutable pin slot access.
    pub fn pin_mut(&mut self, direction: PinDirection, index: usize) -> Option<&mut PinSlot> {
        match direction {
            PinDirection::Input => self.pins_in.get_mut(index),
            PinDirection::Output => self.pins_out.get_mut(index),
        }
    }

    /// Number of connections attached to a pin (0 for out-of-range pins).
    pub fn connection_count(&self, direction: PinDirection, pin: usize) -> usize {
        self.pin(direction, pin).map_or(0, |p| p.connections.len())
    }

    /// Returns a connection record by pin and position.
    pub fn connection(
        &self,
        direction: PinDirection,
        pin: usize,
        cnx: usize,
    ) -> Option<&Connection> {
        self.pin(direction, pin)?.connections.get(cnx)
    }

    /// Mutable connection record access.
    pub fn connection_mut(
        &mut self,
        direction: PinDirection,
        pin: usize,
        cnx: usize,
    ) -> Option<&mut Connection> {
        self.pin_mut(direction, pin)?.connections.get_mut(cnx)
    }

    /// Index of an instance-scoped parameter by name.
    pub fn find_param(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name.as_ref() == name)
    }

    /// Instance-scoped parameter by name.
    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name.as_ref() == name)
    }

    /// Resolves a [`ParamRef`] to the parameter it addresses.
    pub fn param_by_ref(&self, param: ParamRef) -> Option<&Parameter> {
        match param {
            ParamRef::Instance { index } => self.params.get(index),
            ParamRef::PinIn { pin, cnx, index } => self
                .connection(PinDirection::Input, pin, cnx)?
                .params
                .get(index),
            ParamRef::PinOut { pin, cnx, index } => self
                .connection(PinDirection::Output, pin, cnx)?
                .params
                .get(index),
        }
    }

    /// Mutable [`ParamRef`] resolution.
    pub fn param_by_ref_mut(&mut self, param: ParamRef) -> Option<&mut Parameter> {
        match param {
            ParamRef::Instance { index } => self.params.get_mut(index),
            ParamRef::PinIn { pin, cnx, index } => self
                .connection_mut(PinDirection::Input, pin, cnx)?
                .params
                .get_mut(index),
            ParamRef::PinOut { pin, cnx, index } => self
                .connection_mut(PinDirection::Output, pin, cnx)?
                .params
                .get_mut(index),
        }
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.name)
            .field("element", &self.element.name)
            .field("resolved", &self.resolved)
            .field("build_index", &self.build_index)
            .finish()
    }
}
