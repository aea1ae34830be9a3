//! Structural-integrity checking.
//!
//! `check_consistency` walks every instance, pin slot, and connection and
//! reports anything that breaks the database invariants. It is a diagnostic
//! facility: violations are collected and returned, never repaired, and the
//! walk is not meant for any hot path.

use thiserror::Error;

use super::database::GraphDb;
use super::element::PinDirection;
use super::instance::InstanceHandle;

/// One detected breach of the database invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Violation {
    /// An instance has an empty name.
    #[error("instance #{index} has an empty name")]
    EmptyInstanceName {
        /// Catalog position of the nameless instance.
        index: usize,
    },
    /// A parameter carries an empty name.
    #[error("'{instance}' has a parameter with an empty name")]
    EmptyParamName {
        /// Owning instance.
        instance: String,
    },
    /// Pin slot count differs from the element's declared pin count.
    #[error("'{instance}' {direction:?} pin slots ({actual}) do not match the element ({declared})")]
    PinSlotMismatch {
        /// Owning instance.
        instance: String,
        /// Which pin list disagrees.
        direction: PinDirection,
        /// Count declared by the element.
        declared: usize,
        /// Count held by the instance.
        actual: usize,
    },
    /// Instance parameter count differs from the element template count.
    #[error("'{instance}' parameter count does not match its element")]
    ParamCountMismatch {
        /// Owning instance.
        instance: String,
    },
    /// A connection points at an instance that no longer exists.
    #[error("'{instance}' {direction:?} pin {pin} cnx {cnx} points at a deleted instance")]
    DanglingPeer {
        /// Owning instance.
        instance: String,
        /// Which pin list holds the record.
        direction: PinDirection,
        /// Pin index.
        pin: usize,
        /// Connection index on the pin.
        cnx: usize,
    },
    /// A connection's peer pin index is outside the peer's pin list.
    #[error("'{instance}' {direction:?} pin {pin} cnx {cnx} addresses pin {peer_pin} beyond '{peer}'")]
    PeerPinOutOfRange {
        /// Owning instance.
        instance: String,
        /// Which pin list holds the record.
        direction: PinDirection,
        /// Pin index.
        pin: usize,
        /// Connection index on the pin.
        cnx: usize,
        /// Peer instance name.
        peer: String,
        /// Offending pin index on the peer.
        peer_pin: usize,
    },
    /// No reciprocal record exists on the peer's corresponding pin.
    #[error("'{instance}' {direction:?} pin {pin} cnx '{name}' has no reciprocal on '{peer}'")]
    MissingReciprocal {
        /// Owning instance.
        instance: String,
        /// Which pin list holds the record.
        direction: PinDirection,
        /// Pin index.
        pin: usize,
        /// Logical edge name.
        name: String,
        /// Peer instance name.
        peer: String,
    },
    /// The reciprocal exists but carries a different logical name.
    #[error("'{instance}' pin {pin} cnx '{name}' and its reciprocal on '{peer}' disagree on the name")]
    NameMismatch {
        /// Owning instance.
        instance: String,
        /// Pin index.
        pin: usize,
        /// Name on this side.
        name: String,
        /// Peer instance name.
        peer: String,
    },
}

impl GraphDb {
    /// Walks the whole graph and returns every invariant violation found.
    ///
    /// A healthy graph reports an empty list, after any sequence of
    /// create/connect/disconnect/delete operations.
    pub fn check_consistency(&self) -> Vec<Violation> {
        let mut violations = Vec::new();

        for (index, (handle, instance)) in self.instances().enumerate() {
            if instance.name.is_empty() {
                violations.push(Violation::EmptyInstanceName { index });
            }
            if instance.params.len() != instance.element.params.len() {
                violations.push(Violation::ParamCountMismatch {
                    instance: instance.name.clone(),
                });
            }
            for param in &instance.params {
                if param.name.is_empty() {
                    violations.push(Violation::EmptyParamName {
                        instance: instance.name.clone(),
                    });
                }
            }
            if instance.pins_in.len() != instance.element.pins_in.len() {
                violations.push(Violation::PinSlotMismatch {
                    instance: instance.name.clone(),
                    direction: PinDirection::Input,
                    declared: instance.element.pins_in.len(),
                    actual: instance.pins_in.len(),
                });
            }
            if instance.pins_out.len() != instance.element.pins_out.len() {
                violations.push(Violation::PinSlotMismatch {
                    instance: instance.name.clone(),
                    direction: PinDirection::Output,
                    declared: instance.element.pins_out.len(),
                    actual: instance.pins_out.len(),
                });
            }

            for direction in [PinDirection::Output, PinDirection::Input] {
                self.check_pin_list(handle, direction, &mut violations);
            }
        }

        violations
    }

    fn check_pin_list(
        &self,
        handle: InstanceHandle,
        direction: PinDirection,
        violations: &mut Vec<Violation>,
    ) {
        let instance = match self.instance(handle) {
            Some(instance) => instance,
            None => return,
        };
        let slots = match direction {
            PinDirection::Output => &instance.pins_out,
            PinDirection::Input => &instance.pins_in,
        };

        for (pin, slot) in slots.iter().enumerate() {
            for (cnx_index, cnx) in slot.connections.iter().enumerate() {
                let peer = match self.instance(cnx.peer) {
                    Some(peer) => peer,
                    None => {
                        violations.push(Violation::DanglingPeer {
                            instance: instance.name.clone(),
                            direction,
                            pin,
                            cnx: cnx_index,
                        });
                        continue;
                    }
                };

                let peer_slot = match peer.pin(direction.opposite(), cnx.peer_pin) {
                    Some(peer_slot) => peer_slot,
                    None => {
                        violations.push(Violation::PeerPinOutOfRange {
                            instance: instance.name.clone(),
                            direction,
                            pin,
                            cnx: cnx_index,
                            peer: peer.name.clone(),
                            peer_pin: cnx.peer_pin,
                        });
                        continue;
                    }
                };

                // Exactly one reciprocal record pointing back at this pin.
                let reciprocal = peer_slot
                    .connections
                    .iter()
                    .find(|c| c.peer == handle && c.peer_pin == pin);
                match reciprocal {
                    None => violations.push(Violation::MissingReciprocal {
                        instance: instance.name.clone(),
                        direction,
                        pin,
                        name: cnx.name.clone(),
                        peer: peer.name.clone(),
                    }),
                    Some(reciprocal) if reciprocal.name != cnx.name => {
                        violations.push(Violation::NameMismatch {
                            instance: instance.name.clone(),
                            pin,
                            name: cnx.name.clone(),
                            peer: peer.name.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::database::tests::test_db;
    use crate::graph::instance::Connection;

    #[test]
    fn test_healthy_graph_reports_nothing() {
        let mut db = test_db();
        db.create_instance("a", "source.signal").unwrap();
        db.create_instance("g", "fx.gain").unwrap();
        db.create_instance("b", "sink.speaker").unwrap();
        db.connect("a", 0, "g", 0).unwrap();
        db.connect("g", 0, "b", 0).unwrap();

        assert!(db.check_consistency().is_empty());
    }

    #[test]
    fn test_consistency_after_mutation_sequence() {
        let mut db = test_db();
        let a = db.create_instance("a", "source.signal").unwrap();
        db.create_instance("g1", "fx.gain").unwrap();
        db.create_instance("g2", "fx.gain").unwrap();
        db.create_instance("b", "sink.speaker").unwrap();

        db.connect("a", 0, "g1", 0).unwrap();
        db.connect("a", 0, "g2", 0).unwrap();
        db.connect("g1", 0, "b", 0).unwrap();
        db.disconnect("a", 0, "g2", 0).unwrap();
        db.delete_instance(a).unwrap();
        db.create_instance("a2", "source.signal").unwrap();
        db.connect("a2", 0, "g2", 0).unwrap();

        assert!(db.check_consistency().is_empty());
    }

    #[test]
    fn test_detects_missing_reciprocal() {
        let mut db = test_db();
        db.create_instance("a", "source.signal").unwrap();
        let b = db.create_instance("b", "sink.speaker").unwrap();
        db.connect("a", 0, "b", 0).unwrap();

        // Corrupt: strip the input-side record only.
        db.instance_mut(b).unwrap().pins_in[0].connections.clear();

        let violations = db.check_consistency();
        assert_eq!(violations.len(), 1);
        assert!(matches!(
            violations[0],
            Violation::MissingReciprocal { .. }
        ));
    }

    #[test]
    fn test_detects_name_mismatch() {
        let mut db = test_db();
        let a = db.create_instance("a", "source.signal").unwrap();
        db.create_instance("b", "sink.speaker").unwrap();
        db.connect("a", 0, "b", 0).unwrap();

        db.instance_mut(a).unwrap().pins_out[0].connections[0].name = "renamed".to_string();

        let violations = db.check_consistency();
        // Both sides report the disagreement.
        assert_eq!(violations.len(), 2);
        assert!(violations
            .iter()
            .all(|v| matches!(v, Violation::NameMismatch { .. })));
    }

    #[test]
    fn test_detects_dangling_peer() {
        let mut db = test_db();
        let a = db.create_instance("a", "source.signal").unwrap();
        db.create_instance("b", "sink.speaker").unwrap();
        let g = db.create_instance("g", "fx.gain").unwrap();
        db.connect("a", 0, "b", 0).unwrap();

        // Forge a record pointing at an instance we then delete.
        db.delete_instance(g).unwrap();
        db.instance_mut(a).unwrap().pins_out[0]
            .connections
            .push(Connection::new(g, 0, "ghost".to_string(), &[]));

        let violations = db.check_consistency();
        assert!(violations
            .iter()
            .any(|v| matches!(v, Violation::DanglingPeer { .. })));
    }

    #[test]
    fn test_detects_peer_pin_out_of_range() {
        let mut db = test_db();
        let a = db.create_instance("a", "source.signal").unwrap();
        let b = db.create_instance("b", "sink.speaker").unwrap();
        db.connect("a", 0, "b", 0).unwrap();

        db.instance_mut(a).unwrap().pins_out[0].connections[0].peer_pin = 9;

        let violations = db.check_consistency();
        assert!(violations
            .iter()
            .any(|v| matches!(v, Violation::PeerPinOutOfRange { .. })));
    }
}
