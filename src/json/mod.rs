//! Project-file projection of the graph database.
//!
//! Serializes the element catalog and the live graph to the external
//! project-file format and rebuilds a graph from such a document. The
//! projection is a client of the database's public API only: decoding goes
//! through `create_instance`/`connect`/`set_parameter` like any other
//! caller, so a loaded project observes every invariant and fires the same
//! notifications.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::graph::{GraphDb, GraphError, ParamRef, PinDirection, PinKind};

/// Current project format version. Bump on breaking document changes.
pub const PROJECT_VERSION: u32 = 1;

/// Errors raised while encoding, decoding, or transporting a project.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// File I/O failure.
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The document was written by a newer format.
    #[error("incompatible project version: found {found}, expected <= {expected}")]
    IncompatibleVersion {
        /// Version in the document.
        found: u32,
        /// Newest version this build understands.
        expected: u32,
    },
    /// A graph mutation failed while rebuilding the document.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// A complete project document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectDoc {
    /// Format version for compatibility checks.
    pub version: u32,
    /// Project-level metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
    /// Catalog summary, served to external tooling.
    pub elements: Vec<ElementDoc>,
    /// Every placed instance with parameters and out-pin topology.
    pub instances: Vec<InstanceDoc>,
}

impl ProjectDoc {
    /// True when this document's version is readable by this build.
    pub fn is_compatible(&self) -> bool {
        self.version <= PROJECT_VERSION
    }
}

/// Catalog entry for one element template.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementDoc {
    /// Element name.
    pub name: String,
    /// Declared input pins.
    pub pins_in: Vec<ElementPinDoc>,
    /// Declared output pins.
    pub pins_out: Vec<ElementPinDoc>,
    /// Instance-scoped parameter templates with their defaults.
    pub params: Vec<ParamDoc>,
}

/// One declared pin in the catalog summary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementPinDoc {
    /// Pin name.
    pub name: String,
    /// Stream or event pin.
    pub kind: PinKind,
    /// Connection limit.
    pub max_connections: usize,
}

/// One placed instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceDoc {
    /// Instance name.
    pub name: String,
    /// Name of the element it was placed from.
    pub element_ref: String,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Instance parameter values.
    pub params: Vec<ParamDoc>,
    /// Output pins carrying at least one connection.
    pub pins_out: Vec<PinDoc>,
}

/// Connections attached to one output pin.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PinDoc {
    /// Output pin index.
    pub pin_index: usize,
    /// Connections on that pin. The reciprocal input-side records are
    /// implied and recreated on decode.
    pub connections: Vec<ConnectionDoc>,
}

/// One logical edge, recorded from its output side.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionDoc {
    /// Downstream instance name.
    pub peer_instance: String,
    /// Input pin index on the downstream instance.
    pub peer_pin: usize,
    /// Logical edge name.
    pub name: String,
    /// Connection-scoped parameter values (output side).
    pub params: Vec<ParamDoc>,
}

/// A name/value parameter pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParamDoc {
    /// Parameter name.
    pub name: String,
    /// Text-encoded value.
    pub value: String,
}

/// Projects the database into a document.
pub fn encode(db: &GraphDb) -> ProjectDoc {
    let elements = db
        .elements()
        .map(|element| ElementDoc {
            name: element.name.clone(),
            pins_in: element.pins_in.iter().map(pin_doc).collect(),
            pins_out: element.pins_out.iter().map(pin_doc).collect(),
            params: element
                .params
                .iter()
                .map(|p| ParamDoc {
                    name: p.name.to_string(),
                    value: p.default.clone(),
                })
                .collect(),
        })
        .collect();

    let mut instances = Vec::new();
    for (_, instance) in db.instances() {
        let mut pins_out = Vec::new();
        for (pin_index, slot) in instance.pins_out.iter().enumerate() {
            if slot.connections.is_empty() {
                continue;
            }
            let mut connections = Vec::new();
            for cnx in &slot.connections {
                let peer_instance = match db.instance(cnx.peer) {
                    Some(peer) => peer.name.clone(),
                    None => {
                        warn!(
                            instance = %instance.name,
                            pin = pin_index,
                            "skipping connection to a deleted instance"
                        );
                        continue;
                    }
                };
                connections.push(ConnectionDoc {
                    peer_instance,
                    peer_pin: cnx.peer_pin,
                    name: cnx.name.clone(),
                    params: cnx
                        .params
                        .iter()
                        .map(|p| ParamDoc {
                            name: p.name.to_string(),
                            value: p.value().to_string(),
                        })
                        .collect(),
                });
            }
            pins_out.push(PinDoc {
                pin_index,
                connections,
            });
        }

        instances.push(InstanceDoc {
            name: instance.name.clone(),
            element_ref: instance.element.name.clone(),
            description: instance.description.clone(),
            params: instance
                .params
                .iter()
                .map(|p| ParamDoc {
                    name: p.name.to_string(),
                    value: p.value().to_string(),
                })
                .collect(),
            pins_out,
        });
    }

    ProjectDoc {
        version: PROJECT_VERSION,
        meta: db.meta().map(str::to_string),
        elements,
        instances,
    }
}

fn pin_doc(pin: &crate::graph::ElementPin) -> ElementPinDoc {
    ElementPinDoc {
        name: pin.name.clone(),
        kind: pin.kind,
        max_connections: pin.max_connections,
    }
}

/// Rebuilds the live graph from a document.
///
/// Resets the current project first (the element catalog is kept; every
/// `element_ref` must already be registered). Parameter values are restored
/// by name, so documents survive template reordering; unknown parameter
/// names are skipped with a warning.
pub fn decode(doc: &ProjectDoc, db: &mut GraphDb) -> Result<(), ProjectError> {
    if !doc.is_compatible() {
        return Err(ProjectError::IncompatibleVersion {
            found: doc.version,
            expected: PROJECT_VERSION,
        });
    }

    db.reset();
    db.set_meta(doc.meta.clone());

    for instance_doc in &doc.instances {
        let handle = db.create_instance(&instance_doc.name, &instance_doc.element_ref)?;
        if let Some(instance) = db.instance_mut(handle) {
            instance.description = instance_doc.description.clone();
        }
        for param in &instance_doc.params {
            let index = db
                .instance(handle)
                .and_then(|instance| instance.find_param(&param.name));
            match index {
                Some(index) => {
                    db.set_parameter(handle, ParamRef::Instance { index }, &param.value)?;
                }
                None => {
                    warn!(
                        instance = %instance_doc.name,
                        param = %param.name,
                        "unknown parameter in project, skipped"
                    );
                }
            }
        }
    }

    for instance_doc in &doc.instances {
        for pin in &instance_doc.pins_out {
            for cnx_doc in &pin.connections {
                db.connect(
                    &instance_doc.name,
                    pin.pin_index,
                    &cnx_doc.peer_instance,
                    cnx_doc.peer_pin,
                )?;
                restore_connection(db, instance_doc, pin.pin_index, cnx_doc);
            }
        }
    }

    Ok(())
}

/// Overwrites the generated edge name on both records and restores the
/// output side's connection parameters from the document.
fn restore_connection(
    db: &mut GraphDb,
    instance_doc: &InstanceDoc,
    pin_index: usize,
    cnx_doc: &ConnectionDoc,
) {
    let out_handle = match db.find_instance(&instance_doc.name) {
        Some(handle) => handle,
        None => return,
    };
    let in_handle = match db.find_instance(&cnx_doc.peer_instance) {
        Some(handle) => handle,
        None => return,
    };
    let out_index = db.find_connection(
        out_handle,
        PinDirection::Output,
        pin_index,
        in_handle,
        cnx_doc.peer_pin,
    );
    let in_index = db.find_connection(
        in_handle,
        PinDirection::Input,
        cnx_doc.peer_pin,
        out_handle,
        pin_index,
    );

    if let Some(out_index) = out_index {
        if let Some(cnx) = db
            .instance_mut(out_handle)
            .and_then(|i| i.connection_mut(PinDirection::Output, pin_index, out_index))
        {
            cnx.name = cnx_doc.name.clone();
            for param_doc in &cnx_doc.params {
                match cnx
                    .params
                    .iter_mut()
                    .find(|p| p.name.as_ref() == param_doc.name)
                {
                    Some(param) => param.set_value(&param_doc.value),
                    None => warn!(
                        connection = %cnx_doc.name,
                        param = %param_doc.name,
                        "unknown connection parameter in project, skipped"
                    ),
                }
            }
        }
    }
    if let Some(in_index) = in_index {
        if let Some(cnx) = db
            .instance_mut(in_handle)
            .and_then(|i| i.connection_mut(PinDirection::Input, cnx_doc.peer_pin, in_index))
        {
            cnx.name = cnx_doc.name.clone();
        }
    }
}

/// Serializes the database to pretty-printed JSON text.
pub fn to_json_string(db: &GraphDb) -> Result<String, ProjectError> {
    Ok(serde_json::to_string_pretty(&encode(db))?)
}

/// Rebuilds the database from JSON text.
pub fn from_json_str(json: &str, db: &mut GraphDb) -> Result<(), ProjectError> {
    let doc: ProjectDoc = serde_json::from_str(json)?;
    decode(&doc, db)
}

/// Saves the project to a JSON file.
pub fn save_to_file(db: &GraphDb, path: &Path) -> Result<(), ProjectError> {
    std::fs::write(path, to_json_string(db)?)?;
    Ok(())
}

/// Loads a project from a JSON file into the database.
pub fn load_from_file(path: &Path, db: &mut GraphDb) -> Result<(), ProjectError> {
    let json = std::fs::read_to_string(path)?;
    from_json_str(&json, db)
}
