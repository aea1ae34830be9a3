//! The graph database.
//!
//! `GraphDb` owns the element catalog and the live set of placed instances,
//! and is the single entry point for every structural mutation: placing and
//! deleting instances, wiring and unwiring connections, and editing
//! parameter values. Mutations validate up front and either complete fully
//! or leave the graph untouched.
//!
//! Lookup is by name with a linear scan: graphs are small and mutation is
//! rare, so the construction-time plane stays simple.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::channel::{EventSink, PipeEvent};
use crate::collection::OrderedStore;

use super::element::{Element, PinDirection};
use super::instance::{Connection, Instance, InstanceHandle, ParamRef};

/// Structural errors, rejected before any mutation takes place.
#[derive(Debug, Error)]
pub enum GraphError {
    /// An element with this name is already registered.
    #[error("element '{0}' is already registered")]
    DuplicateElement(String),
    /// An instance with this name already exists.
    #[error("instance name '{0}' is already in use")]
    DuplicateName(String),
    /// No element with this name is registered.
    #[error("unknown element '{0}'")]
    UnknownElement(String),
    /// No instance with this name exists.
    #[error("unknown instance '{0}'")]
    UnknownInstance(String),
    /// The handle does not refer to a live instance.
    #[error("instance not found")]
    InstanceNotFound,
    /// The pin index is outside the element's declared pins.
    #[error("pin {pin} out of range on '{instance}'")]
    PinOutOfRange {
        /// Instance whose pin was addressed.
        instance: String,
        /// Offending pin index.
        pin: usize,
    },
    /// The pin has reached its declared connection limit.
    #[error("pin {pin} on '{instance}' is at its connection limit")]
    ConnectionLimit {
        /// Instance whose pin is full.
        instance: String,
        /// Offending pin index.
        pin: usize,
    },
    /// The two pins are already connected.
    #[error("connection already exists")]
    ConnectionExists,
    /// No such connection between the two pins.
    #[error("connection not found")]
    ConnectionNotFound,
    /// The parameter reference does not resolve.
    #[error("parameter reference out of range")]
    ParamOutOfRange,
}

/// The catalog of element templates plus the live, editable graph.
pub struct GraphDb {
    elements: Vec<Arc<Element>>,
    instances: OrderedStore<Instance>,
    meta: Option<String>,
    sink: Option<Arc<dyn EventSink>>,
}

impl GraphDb {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self {
            elements: Vec::new(),
            instances: OrderedStore::new(),
            meta: None,
            sink: None,
        }
    }

    /// Installs the sink that receives graph notifications (normally the
    /// message hub). Notifications are best-effort and never block.
    pub fn set_event_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sink = Some(sink);
    }

    fn notify(&self, event: PipeEvent) {
        if let Some(sink) = &self.sink {
            sink.notify(event);
        }
    }

    /// Project-level metadata carried alongside the graph.
    pub fn meta(&self) -> Option<&str> {
        self.meta.as_deref()
    }

    /// Replaces the project metadata.
    pub fn set_meta(&mut self, meta: Option<String>) {
        self.meta = meta;
    }

    // ========================================================================
    // Element catalog
    // ========================================================================

    /// Registers an element template. Elements live for the lifetime of the
    /// database and are never mutated after registration.
    pub fn register_element(&mut self, element: Element) -> Result<Arc<Element>, GraphError> {
        if self.find_element(&element.name).is_some() {
            return Err(GraphError::DuplicateElement(element.name));
        }
        let name = element.name.clone();
        let element = Arc::new(element);
        self.elements.push(Arc::clone(&element));
        self.notify(PipeEvent::ElementRegistered { name });
        Ok(element)
    }

    /// Number of registered elements.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Element by catalog index.
    pub fn element(&self, index: usize) -> Option<&Arc<Element>> {
        self.elements.get(index)
    }

    /// Iterates the catalog in registration order.
    pub fn elements(&self) -> impl Iterator<Item = &Arc<Element>> {
        self.elements.iter()
    }

    /// Element by name (linear scan).
    pub fn find_element(&self, name: &str) -> Option<&Arc<Element>> {
        self.elements.iter().find(|e| e.name == name)
    }

    /// JSON definition text of an element, if it registered one.
    pub fn element_definition(&self, index: usize) -> Option<&str> {
        self.elements.get(index)?.definition.as_deref()
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// Places a new instance of a registered element.
    ///
    /// Pin slots are sized to the element's declared pin counts and the
    /// parameter list is cloned from the element defaults. Fails without
    /// touching the graph on a duplicate name or unknown element.
    pub fn create_instance(
        &mut self,
        name: &str,
        element_name: &str,
    ) -> Result<InstanceHandle, GraphError> {
        if self.find_instance(name).is_some() {
            return Err(GraphError::DuplicateName(name.to_string()));
        }
        let element = self
            .find_element(element_name)
            .ok_or_else(|| GraphError::UnknownElement(element_name.to_string()))?;
        let instance = Instance::new(name, Arc::clone(element));
        let handle = self.instances.insert(instance);
        debug!(instance = name, element = element_name, "instance created");
        self.notify(PipeEvent::InstanceRegistered {
            name: name.to_string(),
        });
        Ok(handle)
    }

    /// Deletes an instance: every connection touching it is removed from
    /// both endpoints, the destruct behavior runs if construction had run,
    /// then the instance itself is released.
    ///
    /// A handle that was already deleted yields `InstanceNotFound`.
    pub fn delete_instance(&mut self, handle: InstanceHandle) -> Result<(), GraphError> {
        if !self.instances.contains(handle) {
            return Err(GraphError::InstanceNotFound);
        }
        self.disconnect_all(handle);

        let mut instance = match self.instances.remove(handle) {
            Some(instance) => instance,
            None => return Err(GraphError::InstanceNotFound),
        };
        if instance.build.is_some() {
            let behavior = Arc::clone(&instance.element.behavior);
            behavior.destruct(&mut instance);
            instance.build = None;
        }
        debug!(instance = %instance.name, "instance deleted");
        Ok(())
    }

    /// Deletes an instance addressed by name.
    pub fn delete_instance_by_name(&mut self, name: &str) -> Result<(), GraphError> {
        let handle = self
            .find_instance(name)
            .ok_or_else(|| GraphError::UnknownInstance(name.to_string()))?;
        self.delete_instance(handle)
    }

    /// Removes both reciprocal records of every edge touching `handle`.
    fn disconnect_all(&mut self, handle: InstanceHandle) {
        let mut edges: Vec<(PinDirection, usize, InstanceHandle, usize, String)> = Vec::new();
        if let Some(instance) = self.instances.get(handle) {
            for direction in [PinDirection::Output, PinDirection::Input] {
                let slots = match direction {
                    PinDirection::Output => &instance.pins_out,
                    PinDirection::Input => &instance.pins_in,
                };
                for (pin, slot) in slots.iter().enumerate() {
                    for cnx in &slot.connections {
                        edges.push((direction, pin, cnx.peer, cnx.peer_pin, cnx.name.clone()));
                    }
                }
            }
        }

        for (direction, pin, peer, peer_pin, name) in edges {
            // A self-loop's reciprocal lives on the same instance and is
            // dropped with it.
            if peer != handle {
                if let Some(peer_instance) = self.instances.get_mut(peer) {
                    if let Some(slot) = peer_instance.pin_mut(direction.opposite(), peer_pin) {
                        slot.connections
                            .retain(|c| !(c.peer == handle && c.peer_pin == pin && c.name == name));
                    }
                }
            }
            if let Some(instance) = self.instances.get_mut(handle) {
                if let Some(slot) = instance.pin_mut(direction, pin) {
                    slot.connections.retain(|c| c.name != name);
                }
            }
        }
    }

    /// Instance handle by name (linear scan).
    pub fn find_instance(&self, name: &str) -> Option<InstanceHandle> {
        self.instances
            .iter()
            .find(|(_, i)| i.name == name)
            .map(|(handle, _)| handle)
    }

    /// Instance by handle.
    pub fn instance(&self, handle: InstanceHandle) -> Option<&Instance> {
        self.instances.get(handle)
    }

    /// Mutable instance access.
    pub fn instance_mut(&mut self, handle: InstanceHandle) -> Option<&mut Instance> {
        self.instances.get_mut(handle)
    }

    /// Number of live instances.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Iterates instances in catalog (placement) order.
    pub fn instances(&self) -> impl Iterator<Item = (InstanceHandle, &Instance)> {
        self.instances.iter()
    }

    /// Instance handles in catalog order.
    pub fn handles(&self) -> Vec<InstanceHandle> {
        self.instances.handles()
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Connects an output pin to an input pin.
    ///
    /// Creates the two reciprocal records (one on each endpoint) sharing a
    /// generated logical name, each seeded from the corresponding
    /// element-level pin's parameter templates. All checks (existence, pin
    /// range, connection limits, duplicates) run before the first record is
    /// created, so a failed connect leaves the graph unchanged.
    pub fn connect(
        &mut self,
        out_name: &str,
        out_pin: usize,
        in_name: &str,
        in_pin: usize,
    ) -> Result<(), GraphError> {
        let out_handle = self
            .find_instance(out_name)
            .ok_or_else(|| GraphError::UnknownInstance(out_name.to_string()))?;
        let in_handle = self
            .find_instance(in_name)
            .ok_or_else(|| GraphError::UnknownInstance(in_name.to_string()))?;

        let (out_element, out_count) = match self.instances.get(out_handle) {
            Some(instance) => (
                Arc::clone(&instance.element),
                instance.connection_count(PinDirection::Output, out_pin),
            ),
            None => return Err(GraphError::UnknownInstance(out_name.to_string())),
        };
        let (in_element, in_count) = match self.instances.get(in_handle) {
            Some(instance) => (
                Arc::clone(&instance.element),
                instance.connection_count(PinDirection::Input, in_pin),
            ),
            None => return Err(GraphError::UnknownInstance(in_name.to_string())),
        };

        let out_pin_def =
            out_element
                .pin(PinDirection::Output, out_pin)
                .ok_or(GraphError::PinOutOfRange {
                    instance: out_name.to_string(),
                    pin: out_pin,
                })?;
        let in_pin_def =
            in_element
                .pin(PinDirection::Input, in_pin)
                .ok_or(GraphError::PinOutOfRange {
                    instance: in_name.to_string(),
                    pin: in_pin,
                })?;

        if out_count >= out_pin_def.max_connections {
            return Err(GraphError::ConnectionLimit {
                instance: out_name.to_string(),
                pin: out_pin,
            });
        }
        if in_count >= in_pin_def.max_connections {
            return Err(GraphError::ConnectionLimit {
                instance: in_name.to_string(),
                pin: in_pin,
            });
        }
        if self
            .find_connection(out_handle, PinDirection::Output, out_pin, in_handle, in_pin)
            .is_some()
        {
            return Err(GraphError::ConnectionExists);
        }

        let name = format!("{}.{}-{}.{}", out_name, out_pin, in_name, in_pin);

        let out_record = Connection::new(in_handle, in_pin, name.clone(), &out_pin_def.params);
        let in_record = Connection::new(out_handle, out_pin, name.clone(), &in_pin_def.params);

        let out_created = self
            .instances
            .get_mut(out_handle)
            .and_then(|i| i.pin_mut(PinDirection::Output, out_pin))
            .map(|slot| slot.connections.push(out_record))
            .is_some();
        if !out_created {
            return Err(GraphError::InstanceNotFound);
        }
        let in_created = self
            .instances
            .get_mut(in_handle)
            .and_then(|i| i.pin_mut(PinDirection::Input, in_pin))
            .map(|slot| slot.connections.push(in_record))
            .is_some();
        if !in_created {
            // Roll back the record already created on the out side.
            if let Some(slot) = self
                .instances
                .get_mut(out_handle)
                .and_then(|i| i.pin_mut(PinDirection::Output, out_pin))
            {
                slot.connections.retain(|c| c.name != name);
            }
            return Err(GraphError::InstanceNotFound);
        }

        debug!(connection = %name, "connected");
        Ok(())
    }

    /// Removes both reciprocal records of one edge.
    pub fn disconnect(
        &mut self,
        out_name: &str,
        out_pin: usize,
        in_name: &str,
        in_pin: usize,
    ) -> Result<(), GraphError> {
        let out_handle = self
            .find_instance(out_name)
            .ok_or_else(|| GraphError::UnknownInstance(out_name.to_string()))?;
        let in_handle = self
            .find_instance(in_name)
            .ok_or_else(|| GraphError::UnknownInstance(in_name.to_string()))?;

        // Both records must exist before either side is touched.
        self.find_connection(out_handle, PinDirection::Output, out_pin, in_handle, in_pin)
            .ok_or(GraphError::ConnectionNotFound)?;
        self.find_connection(in_handle, PinDirection::Input, in_pin, out_handle, out_pin)
            .ok_or(GraphError::ConnectionNotFound)?;

        if let Some(slot) = self
            .instances
            .get_mut(out_handle)
            .and_then(|i| i.pin_mut(PinDirection::Output, out_pin))
        {
            slot.connections
                .retain(|c| !(c.peer == in_handle && c.peer_pin == in_pin));
        }
        if let Some(slot) = self
            .instances
            .get_mut(in_handle)
            .and_then(|i| i.pin_mut(PinDirection::Input, in_pin))
        {
            slot.connections
                .retain(|c| !(c.peer == out_handle && c.peer_pin == out_pin));
        }

        Ok(())
    }

    /// Position of the connection record on `(handle, direction, pin)`
    /// pointing at `(peer, peer_pin)`.
    pub fn find_connection(
        &self,
        handle: InstanceHandle,
        direction: PinDirection,
        pin: usize,
        peer: InstanceHandle,
        peer_pin: usize,
    ) -> Option<usize> {
        self.instances
            .get(handle)?
            .pin(direction, pin)?
            .connections
            .iter()
            .position(|c| c.peer == peer && c.peer_pin == peer_pin)
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    /// Sets a parameter value on an instance or one of its connections,
    /// then runs the element's `parameter_changed` behavior and posts a
    /// `ParameterUpdated` notification.
    pub fn set_parameter(
        &mut self,
        handle: InstanceHandle,
        param: ParamRef,
        value: &str,
    ) -> Result<(), GraphError> {
        let instance = self
            .instances
            .get_mut(handle)
            .ok_or(GraphError::InstanceNotFound)?;
        instance
            .param_by_ref_mut(param)
            .ok_or(GraphError::ParamOutOfRange)?
            .set_value(value);

        let behavior = Arc::clone(&instance.element.behavior);
        let name = instance.name.clone();
        behavior.parameter_changed(instance, param);

        self.notify(PipeEvent::ParameterUpdated {
            instance: name,
            param,
        });
        Ok(())
    }

    // ========================================================================
    // Bulk teardown
    // ========================================================================

    /// Deletes every instance. Callers must stop the pipe first; the walk
    /// itself tolerates dangling wiring left by earlier corruption.
    pub fn clear_instances(&mut self) {
        for handle in self.instances.handles() {
            // Best-effort: a handle invalidated by an earlier self-referential
            // cleanup is simply skipped.
            let _ = self.delete_instance(handle);
        }
    }

    /// Resets the database to an empty project (elements stay registered).
    pub fn reset(&mut self) {
        self.clear_instances();
        self.meta = None;
        self.notify(PipeEvent::ProjectReset);
    }
}

impl Default for GraphDb {
    fn default() -> Self {
        Self::new()
    }
}
