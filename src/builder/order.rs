//! Build-order computation.
//!
//! Instances must be constructed after everything feeding their input pins.
//! The resolver is a breadth-first relaxation, not a DFS topological sort:
//! it repeatedly scans the catalog, marking an instance resolved once every
//! connection on every input pin points at an already-resolved instance,
//! and appends newly resolved instances in discovery order. Ties among
//! simultaneously resolvable instances fall to catalog order, which callers
//! must treat as stable but unspecified.

use crate::graph::{GraphDb, InstanceHandle};

use super::pipe::BuildError;

/// Computes the construction order for the current graph.
///
/// Resets every instance's resolved flag, then relaxes until all instances
/// resolve or the iteration bound is exhausted. The bound is derived from
/// the instance count (`n + 1`): every productive pass resolves at least
/// one instance, so a pass that resolves nothing can never finish: a cycle
/// or a connection to a deleted peer. That case fails with the unresolved
/// instance names instead of looping forever.
pub fn compute_build_order(db: &mut GraphDb) -> Result<Vec<InstanceHandle>, BuildError> {
    let handles = db.handles();
    for &handle in &handles {
        if let Some(instance) = db.instance_mut(handle) {
            instance.resolved = false;
            instance.build_index = None;
        }
    }

    let mut order = Vec::with_capacity(handles.len());
    let max_passes = handles.len() + 1;
    let mut all_resolved = handles.is_empty();
    let mut pass = 0;

    while pass < max_passes && !all_resolved {
        all_resolved = true;
        for &handle in &handles {
            let ready = {
                let instance = match db.instance(handle) {
                    Some(instance) => instance,
                    None => continue,
                };
                if instance.resolved {
                    continue;
                }
                all_resolved = false;
                instance.pins_in.iter().all(|slot| {
                    slot.connections
                        .iter()
                        .all(|cnx| db.instance(cnx.peer).map_or(false, |peer| peer.resolved))
                })
            };
            if ready {
                let index = order.len();
                if let Some(instance) = db.instance_mut(handle) {
                    instance.resolved = true;
                    instance.build_index = Some(index);
                }
                order.push(handle);
            }
        }
        pass += 1;
    }

    if !all_resolved {
        let unresolved = db
            .instances()
            .filter(|(_, i)| !i.resolved)
            .map(|(_, i)| i.name.clone())
            .collect();
        return Err(BuildError::UnresolvedDependencies { unresolved });
    }
    Ok(order)
}

/// Position of `handle` in the order its input-pin dependencies resolve to,
/// for assertions and diagnostics.
pub fn feeds_before(db: &GraphDb, order: &[InstanceHandle], handle: InstanceHandle) -> bool {
    let position = match order.iter().position(|&h| h == handle) {
        Some(position) => position,
        None => return false,
    };
    let instance = match db.instance(handle) {
        Some(instance) => instance,
        None => return false,
    };
    for slot in &instance.pins_in {
        for cnx in &slot.connections {
            match order.iter().position(|&h| h == cnx.peer) {
                Some(upstream) if upstream < position => {}
                _ => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::database::tests::test_db;

    #[test]
    fn test_chain_orders_upstream_first() {
        let mut db = test_db();
        let a = db.create_instance("a", "source.signal").unwrap();
        let g = db.create_instance("g", "fx.gain").unwrap();
        let b = db.create_instance("b", "sink.speaker").unwrap();
        db.connect("a", 0, "g", 0).unwrap();
        db.connect("g", 0, "b", 0).unwrap();

        let order = compute_build_order(&mut db).unwrap();
        assert_eq!(order, vec![a, g, b]);
        assert_eq!(db.instance(b).unwrap().build_index, Some(2));
        assert!(feeds_before(&db, &order, b));
    }

    #[test]
    fn test_two_element_scenario() {
        // A (0 in / 1 out) feeding B (1 in / 0 out).
        let mut db = test_db();
        let a = db.create_instance("a", "source.signal").unwrap();
        let b = db.create_instance("b", "sink.speaker").unwrap();
        db.connect("a", 0, "b", 0).unwrap();

        let order = compute_build_order(&mut db).unwrap();
        assert_eq!(order, vec![a, b]);
        assert!(db.check_consistency().is_empty());
    }

    #[test]
    fn test_diamond_orders_all_feeders_first() {
        let mut db = test_db();
        db.create_instance("src", "source.signal").unwrap();
        db.create_instance("g1", "fx.gain").unwrap();
        db.create_instance("g2", "fx.gain").unwrap();
        // The sink element accepts one connection per pin, so use a gain as
        // the two-input join.
        db.register_element(
            crate::graph::Element::builder("util.mix2")
                .input(crate::graph::ElementPin::stream("in a", 1))
                .input(crate::graph::ElementPin::stream("in b", 1))
                .output(crate::graph::ElementPin::stream("out", 1))
                .build(),
        )
        .unwrap();
        let join = db.create_instance("join", "util.mix2").unwrap();

        db.connect("src", 0, "g1", 0).unwrap();
        db.connect("src", 0, "g2", 0).unwrap();
        db.connect("g1", 0, "join", 0).unwrap();
        db.connect("g2", 0, "join", 1).unwrap();

        let order = compute_build_order(&mut db).unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order.last(), Some(&join));
        assert!(feeds_before(&db, &order, join));
    }

    #[test]
    fn test_disconnected_instances_resolve() {
        let mut db = test_db();
        let a = db.create_instance("a", "source.signal").unwrap();
        let c = db.create_instance("c", "fx.gain").unwrap();

        let order = compute_build_order(&mut db).unwrap();
        assert_eq!(order, vec![a, c]);
    }

    #[test]
    fn test_dangling_dependency_terminates_with_error() {
        let mut db = test_db();
        db.create_instance("a", "source.signal").unwrap();
        let g = db.create_instance("g", "fx.gain").unwrap();
        db.connect("a", 0, "g", 0).unwrap();

        // Simulate corruption: the upstream peer disappears but the input
        // record survives.
        let ghost = db.create_instance("ghost", "source.signal").unwrap();
        db.delete_instance(ghost).unwrap();
        db.instance_mut(g).unwrap().pins_in[0].connections[0].peer = ghost;

        let result = compute_build_order(&mut db);
        match result {
            Err(BuildError::UnresolvedDependencies { unresolved }) => {
                assert_eq!(unresolved, vec!["g".to_string()]);
            }
            other => panic!("expected unresolved dependencies, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_graph_is_trivially_ordered() {
        let mut db = test_db();
        assert!(compute_build_order(&mut db).unwrap().is_empty());
    }
}
