//! Per-phase dispatch context.
//!
//! Every phase callback, element override or default handler alike, receives a
//! `PhaseContext` naming the database, the subject instance, and the
//! hardware adapter explicitly. Nothing build-related lives in globals.

use std::sync::Arc;

use tracing::error;

use crate::adapter::{AdapterError, HardwareAdapter};
use crate::graph::{Element, GraphDb, Instance, InstanceHandle};

/// Context handed to every build-phase callback.
pub struct PhaseContext<'a> {
    /// The graph database holding the instance and its peers.
    pub db: &'a mut GraphDb,
    /// The instance this phase dispatch is about.
    pub instance: InstanceHandle,
    /// The hardware chain boundary.
    pub adapter: &'a mut dyn HardwareAdapter,
    /// Build error counter; non-zero after the last phase aborts the build.
    pub errors: &'a mut u32,
}

impl PhaseContext<'_> {
    /// The subject instance. `None` only if the graph was mutated under a
    /// running build, which callers are required to prevent.
    pub fn instance(&self) -> Option<&Instance> {
        self.db.instance(self.instance)
    }

    /// Mutable subject instance access.
    pub fn instance_mut(&mut self) -> Option<&mut Instance> {
        self.db.instance_mut(self.instance)
    }

    /// The subject instance's element template.
    pub fn element(&self) -> Option<Arc<Element>> {
        self.instance().map(|i| Arc::clone(&i.element))
    }

    /// Records one build error.
    pub fn count_error(&mut self) {
        *self.errors += 1;
    }

    /// Unwraps an adapter result, counting and logging a failure.
    pub fn check<T>(&mut self, what: &str, result: Result<T, AdapterError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                let name = self
                    .instance()
                    .map(|i| i.name.clone())
                    .unwrap_or_default();
                error!(instance = %name, call = what, %err, "adapter call failed");
                self.count_error();
                None
            }
        }
    }
}
