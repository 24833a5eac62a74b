//! Placement and routing of clustered workloads on 2-D mesh NoCs.
//!
//! # Problem structure
//!
//! The input is a [`graph::ClusterGraph`]: logical tiles grouped into
//! clusters, plus the one-to-many (multicast) communications between them.
//! The target is a [`mesh::Mesh`] of `W x H` physical tiles connected to
//! their 4-neighbors. The optimizer runs in two stages:
//!
//! 1. **Layout.** A [`layout::LayoutDesigner`] searches for a bijection
//!    from logical to physical tiles that minimizes the pairwise
//!    intra-cluster Manhattan distance, encoded as a
//!    [`layout::LayoutPatternCode`] and optimized by simulated annealing.
//!    Whether each cluster landed on a 4-connected patch is reported, not
//!    enforced. A deterministic reverse-S engine provides a patch-valid
//!    alternative without annealing.
//!
//! 2. **Routing.** Given the resulting [`layout::LayoutResult`], a
//!    [`route::RoutingDesigner`] searches for one multicast tree per
//!    communication, minimizing link contention. Candidate trees are
//!    encoded as [`stc::SteinerTreeCode`]s: spanning trees over the
//!    terminal set whose edges carry dimension-order bits, decoded into
//!    true Steiner trees on the mesh by expansion and pruning.
//!
//! # Encoding and search
//!
//! Both stages share the generic [`anneal::Annealer`]: a Metropolis loop
//! over a solution mutated in place and rolled back on rejection, with a
//! logarithmic cooling schedule and a stay-counter termination criterion.
//! All randomness flows through one explicitly seeded source, so runs are
//! reproducible.
#![warn(missing_docs)]

pub mod anneal;
pub mod error;
pub mod graph;
pub mod layout;
pub mod route;
pub mod stc;

pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use crate::anneal::AnnealOptions;
    use crate::graph::{Cluster, ClusterGraph, LogicalTile, Multicast};
    use crate::layout::LayoutDesigner;
    use crate::route::RoutingDesigner;
    use mesh::Mesh;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rustc_hash::FxHashSet;
    use test_log::test;

    fn tiles(ids: &[&str]) -> Vec<LogicalTile> {
        ids.iter().map(|&s| LogicalTile::from(s)).collect()
    }

    /// Full pipeline on a 3x3 mesh: place two clusters, then route three
    /// multicasts over the placement.
    #[test]
    fn place_then_route() {
        let mesh = Mesh::new(3, 3).unwrap();
        let graph = ClusterGraph::new(
            vec![
                Cluster::new("c0", tiles(&["a0", "a1", "a2"])),
                Cluster::new("c1", tiles(&["b0", "b1", "b2"])),
            ],
            vec![
                Multicast::new("m0", "a0".into(), tiles(&["a1", "a2"])),
                Multicast::new("m1", "b0".into(), tiles(&["b1", "b2"])),
                Multicast::new("m2", "a0".into(), tiles(&["b0"])),
            ],
        )
        .unwrap();

        let mut rng = StdRng::seed_from_u64(0);
        let mut layout_designer = LayoutDesigner::new(&graph, &mesh, &mut rng).unwrap();
        let layout = layout_designer
            .run(AnnealOptions::layout().with_seed(0))
            .unwrap();

        // The layout is a bijection into the mesh.
        let placed: FxHashSet<_> = graph
            .tile_nodes()
            .map(|t| layout.get(t).expect("placed tile"))
            .collect();
        assert_eq!(placed.len(), graph.total_tiles());
        assert!(placed.iter().all(|t| mesh.contains(*t)));

        let mut routing_designer =
            RoutingDesigner::new(&graph, &mesh, &layout, &mut rng).unwrap();
        let routing = routing_designer
            .run(AnnealOptions::routing().with_seed(0).with_chain_length(5))
            .unwrap();

        assert_eq!(routing.len(), 3);
        for (comm, sid) in [("m0", 0), ("m1", 1), ("m2", 2)] {
            let route = &routing[comm];
            assert_eq!(route.sid, sid);
            assert!(!route.path.is_empty());
        }
        assert!(routing.max_conflicts() >= 1);
        let objective = routing_designer.objective();
        approx::assert_abs_diff_eq!(
            objective,
            crate::route::conflict_objective(routing_designer.pattern())
        );
    }
}
