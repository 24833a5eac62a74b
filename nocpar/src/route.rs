//! Multicast routing: pattern encoding, link-conflict objective, and
//! designers.
//!
//! The routing stage realizes every multicast of the workload as a directed
//! tree over mesh links, starting from the physical placement produced by
//! the layout stage. Candidate routings are encoded as a
//! [`RoutingPatternCode`] (one Steiner tree code per multicast) and
//! optimized by simulated annealing against the link-conflict objective;
//! dimension-order engines are available as closed-form alternatives.

use std::ops::Index;

use arcstr::ArcStr;
use indexmap::IndexMap;
use mesh::{Mesh, NodeIdx, Tile};
use rand::rngs::StdRng;
use rand::Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::anneal::{AnnealOptions, Annealer, Perturb};
use crate::error::{Error, Result};
use crate::graph::ClusterGraph;
use crate::layout::LayoutResult;
use crate::stc::{add_steiner_route, AxisOrder, MeshEdge, SteinerGraph, SteinerTreeCode};

/// A collection of one Steiner tree code per multicast, with reversible
/// mutation and decode-all.
///
/// The terminal set of each code is the multicast's source and sinks mapped
/// through the layout; the sequence of communication identifiers is fixed at
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPatternCode {
    stcs: IndexMap<ArcStr, SteinerTreeCode>,
    srcs: IndexMap<ArcStr, NodeIdx>,
    sids: IndexMap<ArcStr, usize>,
    paths: IndexMap<ArcStr, Vec<MeshEdge>>,
    #[serde(skip)]
    last: Option<usize>,
}

impl RoutingPatternCode {
    /// Builds a random routing pattern for every multicast of the workload.
    pub fn new(
        graph: &ClusterGraph,
        mesh: &Mesh,
        layout: &LayoutResult,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let mut stcs = IndexMap::new();
        let mut srcs = IndexMap::new();
        let mut sids = IndexMap::new();
        for (sid, cast) in graph.cast_trees().iter().enumerate() {
            let src = layout
                .get(&cast.src)
                .ok_or_else(|| Error::UnknownTile(cast.src.clone()))?;
            let src_idx = mesh.index(src);
            let mut terminals = Vec::with_capacity(cast.dsts.len() + 1);
            for dst in &cast.dsts {
                let tile = layout
                    .get(dst)
                    .ok_or_else(|| Error::UnknownTile(dst.clone()))?;
                terminals.push(mesh.index(tile));
            }
            terminals.push(src_idx);

            stcs.insert(cast.id.clone(), SteinerTreeCode::random(terminals, rng)?);
            srcs.insert(cast.id.clone(), src_idx);
            sids.insert(cast.id.clone(), sid);
        }
        Ok(Self {
            stcs,
            srcs,
            sids,
            paths: IndexMap::new(),
            last: None,
        })
    }

    /// The number of multicasts.
    pub fn len(&self) -> usize {
        self.stcs.len()
    }

    /// Whether the pattern holds no multicasts.
    pub fn is_empty(&self) -> bool {
        self.stcs.is_empty()
    }

    /// The Steiner tree code of the given communication.
    pub fn stc(&self, comm: &str) -> Option<&SteinerTreeCode> {
        self.stcs.get(comm)
    }

    /// The decoded path of the given communication, if [`Self::decode`] has
    /// run.
    pub fn path(&self, comm: &str) -> Option<&[MeshEdge]> {
        self.paths.get(comm).map(Vec::as_slice)
    }

    /// The decoded paths of all communications, in stream order.
    pub fn paths(&self) -> impl Iterator<Item = (&ArcStr, &[MeshEdge])> {
        self.paths.iter().map(|(comm, path)| (comm, path.as_slice()))
    }

    /// Mutates the Steiner tree code of one uniformly drawn communication.
    pub fn mutation(&mut self, rng: &mut StdRng) {
        let i = rng.gen_range(0..self.stcs.len());
        let (_, stc) = self.stcs.get_index_mut(i).expect("index in range");
        stc.mutation(rng);
        self.last = Some(i);
    }

    /// Undoes the last mutation.
    ///
    /// # Panics
    ///
    /// Panics if no mutation is pending.
    pub fn undo_mutation(&mut self) {
        let i = self.last.take().expect("no pending mutation to undo");
        let (_, stc) = self.stcs.get_index_mut(i).expect("index in range");
        stc.undo_mutation();
    }

    /// Decodes every Steiner tree code and refreshes the per-communication
    /// directed paths (breadth-first from each source).
    pub fn decode(&mut self, mesh: &Mesh) {
        for (comm, stc) in &self.stcs {
            let tstg = stc.decode(mesh);
            let path = tstg.directed_paths(mesh, self.srcs[comm]);
            self.paths.insert(comm.clone(), path);
        }
    }

    /// Overwrites every path with the closed-form dimension-order tree for
    /// the given axis order, bypassing the encoded spanning trees.
    pub fn decode_dimension_order(&mut self, mesh: &Mesh, order: AxisOrder) {
        for (comm, stc) in &self.stcs {
            let src = self.srcs[comm];
            let mut g = SteinerGraph::new(mesh.len());
            for &t in stc.terminals() {
                if t != src {
                    add_steiner_route(&mut g, mesh, (src, t), order);
                }
            }
            self.paths.insert(comm.clone(), g.directed_paths(mesh, src));
        }
    }
}

impl Perturb for RoutingPatternCode {
    fn perturb(&mut self, rng: &mut StdRng) {
        self.mutation(rng);
    }

    fn revert(&mut self) {
        self.undo_mutation();
    }
}

/// Per-link usage frequencies over all decoded paths.
fn link_frequencies(rpc: &RoutingPatternCode) -> FxHashMap<MeshEdge, u32> {
    let mut freq = FxHashMap::default();
    for (_, path) in rpc.paths() {
        for &edge in path {
            *freq.entry(edge).or_insert(0) += 1;
        }
    }
    freq
}

/// The routing objective: `mean(f) + max(f) - 1` over per-link usage
/// frequencies. The mean penalizes total congestion, the max worst-case
/// contention; the subtraction zeroes the lower bound when no link is
/// shared.
pub fn conflict_objective(rpc: &RoutingPatternCode) -> f64 {
    let freq = link_frequencies(rpc);
    if freq.is_empty() {
        return 0.0;
    }
    let sum: u64 = freq.values().map(|&f| f as u64).sum();
    let max = freq.values().copied().max().unwrap_or(0);
    sum as f64 / freq.len() as f64 + max as f64 - 1.0
}

/// Closed-form multicast routing engines.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeterministicRouteEngine {
    /// Dimension-ordered X-then-Y trees.
    Xy,
    /// Dimension-ordered Y-then-X trees.
    Yx,
}

impl DeterministicRouteEngine {
    /// The axis order this engine routes with.
    pub fn order(&self) -> AxisOrder {
        match self {
            Self::Xy => AxisOrder::Xy,
            Self::Yx => AxisOrder::Yx,
        }
    }
}

/// A route for one communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommRoute {
    /// The stream serial number.
    pub sid: usize,
    /// The source physical tile.
    pub src: Tile,
    /// The directed mesh links carrying the multicast.
    pub path: Vec<MeshEdge>,
}

/// An immutable routing: the output of a routing designer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingResult {
    routes: IndexMap<ArcStr, CommRoute>,
}

impl RoutingResult {
    /// The route of the given communication.
    pub fn get(&self, comm: &str) -> Option<&CommRoute> {
        self.routes.get(comm)
    }

    /// Iterates over `(communication, route)` pairs in stream order.
    pub fn iter(&self) -> impl Iterator<Item = (&ArcStr, &CommRoute)> {
        self.routes.iter()
    }

    /// The number of routed communications.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no communications were routed.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn frequencies(&self) -> FxHashMap<MeshEdge, u32> {
        let mut freq = FxHashMap::default();
        for route in self.routes.values() {
            for &edge in &route.path {
                *freq.entry(edge).or_insert(0) += 1;
            }
        }
        freq
    }

    /// The maximum number of multicasts sharing one mesh link.
    pub fn max_conflicts(&self) -> u32 {
        self.frequencies().values().copied().max().unwrap_or(0)
    }

    /// The total number of link sharings beyond exclusive use: the sum of
    /// per-link frequencies minus the number of used links.
    pub fn total_conflicts(&self) -> u64 {
        let freq = self.frequencies();
        let sum: u64 = freq.values().map(|&f| f as u64).sum();
        sum - freq.len() as u64
    }
}

impl Index<&str> for RoutingResult {
    type Output = CommRoute;

    fn index(&self, comm: &str) -> &Self::Output {
        self.routes
            .get(comm)
            .unwrap_or_else(|| panic!("unknown communication `{comm}`"))
    }
}

/// Determines a routing tree for every multicast of the workload.
pub struct RoutingDesigner<'a> {
    mesh: &'a Mesh,
    rpc: RoutingPatternCode,
}

impl<'a> RoutingDesigner<'a> {
    /// Creates a designer with a fresh random pattern over the given layout.
    pub fn new(
        graph: &ClusterGraph,
        mesh: &'a Mesh,
        layout: &LayoutResult,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let rpc = RoutingPatternCode::new(graph, mesh, layout, rng)?;
        Ok(Self { mesh, rpc })
    }

    /// The current pattern.
    pub fn pattern(&self) -> &RoutingPatternCode {
        &self.rpc
    }

    /// The link-conflict objective of the current pattern.
    pub fn objective(&mut self) -> f64 {
        self.rpc.decode(self.mesh);
        conflict_objective(&self.rpc)
    }

    /// Optimizes the pattern by simulated annealing and returns the
    /// resulting routing.
    pub fn run(&mut self, options: AnnealOptions) -> Result<RoutingResult> {
        let mesh = self.mesh;
        let annealer = Annealer::new(
            move |x: &mut RoutingPatternCode| {
                x.decode(mesh);
                conflict_objective(x)
            },
            self.rpc.clone(),
            options,
        )?;
        let outcome = annealer.run()?;
        self.rpc = outcome.solution;
        self.rpc.decode(mesh);
        tracing::info!(objective = outcome.objective, "routing optimization finished");
        Ok(self.result())
    }

    /// Replaces annealing with a closed-form dimension-order engine.
    pub fn run_deterministic(&mut self, engine: DeterministicRouteEngine) -> RoutingResult {
        self.rpc.decode_dimension_order(self.mesh, engine.order());
        self.result()
    }

    /// Builds an immutable result from the current decoded pattern.
    pub fn result(&self) -> RoutingResult {
        let mut routes = IndexMap::new();
        for comm in self.rpc.stcs.keys() {
            routes.insert(
                comm.clone(),
                CommRoute {
                    sid: self.rpc.sids[comm],
                    src: self.mesh.tile(self.rpc.srcs[comm]),
                    path: self.rpc.paths.get(comm).cloned().unwrap_or_default(),
                },
            );
        }
        RoutingResult { routes }
    }
}
