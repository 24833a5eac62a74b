//! Tile placement: pattern encoding, objective, patch validity, and
//! designers.
//!
//! The placement stage determines a one-to-one mapping between logical tiles
//! and physical mesh tiles. Candidate mappings are encoded as a
//! [`LayoutPatternCode`] and optimized by simulated annealing against the
//! intra-cluster distance objective; a deterministic space-filling engine is
//! available as a closed-form alternative.

use std::ops::Index;

use indexmap::IndexMap;
use itertools::Itertools;
use mesh::{Mesh, NodeIdx, Tile};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::anneal::{AnnealOptions, Annealer, Perturb};
use crate::error::{Error, Result};
use crate::graph::{ClusterGraph, LogicalTile};

/// A cluster-indexed tile: the `index`-th tile of cluster `cluster`.
#[derive(
    Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct CirTile {
    /// The cluster index.
    pub cluster: usize,
    /// The tile's local index within the cluster.
    pub index: usize,
}

impl CirTile {
    /// Creates a new cluster-indexed tile.
    pub fn new(cluster: usize, index: usize) -> Self {
        Self { cluster, index }
    }
}

/// A mutable bijection from cluster-indexed tiles to physical tile indices,
/// with reversible swap mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutPatternCode {
    /// Slot `offsets[c] + t` holds the node index assigned to tile `(c, t)`.
    slots: Vec<NodeIdx>,
    /// Per-cluster prefix offsets into `slots`; length is `C + 1`.
    offsets: Vec<usize>,
    #[serde(skip)]
    last_swap: Option<(usize, usize)>,
}

impl LayoutPatternCode {
    /// Creates a fresh random pattern: all physical indices are shuffled
    /// uniformly and the first `total` of them assigned to the
    /// cluster-indexed tiles in cluster-major, tile-minor order.
    pub fn new(cluster_sizes: &[usize], mesh: &Mesh, rng: &mut StdRng) -> Result<Self> {
        let total: usize = cluster_sizes.iter().sum();
        if total > mesh.len() {
            return Err(Error::MeshTooSmall {
                mesh_tiles: mesh.len(),
                logical_tiles: total,
            });
        }
        let mut indices: Vec<NodeIdx> = (0..mesh.len()).collect();
        indices.shuffle(rng);
        indices.truncate(total);
        Ok(Self {
            slots: indices,
            offsets: prefix_offsets(cluster_sizes),
            last_swap: None,
        })
    }

    /// Creates a pattern from an explicit slot assignment in cluster-major,
    /// tile-minor order.
    pub fn from_slots(slots: Vec<NodeIdx>, cluster_sizes: &[usize]) -> Result<Self> {
        let total: usize = cluster_sizes.iter().sum();
        assert_eq!(slots.len(), total, "slot count does not match cluster sizes");
        let mut seen = vec![false; slots.iter().max().map_or(0, |&m| m + 1)];
        for &idx in &slots {
            if std::mem::replace(&mut seen[idx], true) {
                return Err(Error::DuplicateAssignment(idx));
            }
        }
        Ok(Self {
            slots,
            offsets: prefix_offsets(cluster_sizes),
            last_swap: None,
        })
    }

    /// The number of clusters.
    pub fn num_clusters(&self) -> usize {
        self.offsets.len() - 1
    }

    /// The number of tiles in the given cluster.
    pub fn cluster_size(&self, cluster: usize) -> usize {
        self.offsets[cluster + 1] - self.offsets[cluster]
    }

    /// The total number of mapped tiles.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the pattern maps no tiles.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, key: CirTile) -> usize {
        debug_assert!(key.index < self.cluster_size(key.cluster));
        self.offsets[key.cluster] + key.index
    }

    fn cir(&self, slot: usize) -> CirTile {
        let cluster = self.offsets.partition_point(|&o| o <= slot) - 1;
        CirTile::new(cluster, slot - self.offsets[cluster])
    }

    /// The physical node index assigned to the given cluster-indexed tile.
    pub fn get(&self, key: CirTile) -> NodeIdx {
        self.slots[self.slot(key)]
    }

    /// Exchanges the assignments of two cluster-indexed tiles and records
    /// the pair for undo. Swapping a key with itself is a no-op but still
    /// recorded, so the undo stays safe.
    pub fn swap(&mut self, k1: CirTile, k2: CirTile) {
        let (a, b) = (self.slot(k1), self.slot(k2));
        self.slots.swap(a, b);
        self.last_swap = Some((a, b));
    }

    /// Exchanges the assignments of two uniformly drawn distinct keys.
    ///
    /// # Panics
    ///
    /// Panics if the pattern maps fewer than two tiles.
    pub fn mutation(&mut self, rng: &mut StdRng) {
        assert!(self.slots.len() >= 2, "need at least two tiles to mutate");
        let a = rng.gen_range(0..self.slots.len());
        let b = loop {
            let b = rng.gen_range(0..self.slots.len());
            if b != a {
                break b;
            }
        };
        self.swap(self.cir(a), self.cir(b));
    }

    /// Swaps the remembered pair back.
    ///
    /// # Panics
    ///
    /// Panics if no mutation is pending.
    pub fn undo_mutation(&mut self) {
        let (a, b) = self.last_swap.take().expect("no pending mutation to undo");
        self.slots.swap(a, b);
    }

    /// Iterates over `(cluster-indexed tile, node index)` pairs in
    /// cluster-major, tile-minor order.
    pub fn iter(&self) -> impl Iterator<Item = (CirTile, NodeIdx)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(slot, &idx)| (self.cir(slot), idx))
    }
}

impl Perturb for LayoutPatternCode {
    fn perturb(&mut self, rng: &mut StdRng) {
        self.mutation(rng);
    }

    fn revert(&mut self) {
        self.undo_mutation();
    }
}

fn prefix_offsets(cluster_sizes: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(cluster_sizes.len() + 1);
    let mut acc = 0;
    for &n in cluster_sizes {
        offsets.push(acc);
        acc += n;
    }
    offsets.push(acc);
    offsets
}

/// The layout objective: the sum over clusters of all pairwise intra-cluster
/// Manhattan distances.
pub fn intra_cluster_distance(lpc: &LayoutPatternCode, mesh: &Mesh) -> f64 {
    let mut total = 0u64;
    for c in 0..lpc.num_clusters() {
        for (s, d) in (0..lpc.cluster_size(c)).tuple_combinations() {
            let a = lpc.get(CirTile::new(c, s));
            let b = lpc.get(CirTile::new(c, d));
            total += mesh.dist(a, b) as u64;
        }
    }
    total as f64
}

/// Whether every cluster occupies a 4-connected patch of the mesh.
///
/// Reported only; annealing does not enforce it.
pub fn is_patches(lpc: &LayoutPatternCode, mesh: &Mesh) -> bool {
    let mut owner: Vec<Option<usize>> = vec![None; mesh.len()];
    for (cir, idx) in lpc.iter() {
        owner[idx] = Some(cir.cluster);
    }
    for c in 0..lpc.num_clusters() {
        let size = lpc.cluster_size(c);
        let marked = search_cluster(mesh, &owner, c, lpc.get(CirTile::new(c, 0)));
        if marked != size {
            tracing::debug!(cluster = c, marked, size, "non-patch cluster");
            return false;
        }
    }
    true
}

/// Flood-fills 4-neighbors from `start`, counting tiles owned by `cluster`.
/// Tiles owned by other clusters and unmapped tiles are not crossed.
fn search_cluster(mesh: &Mesh, owner: &[Option<usize>], cluster: usize, start: NodeIdx) -> usize {
    let mut marked = vec![false; mesh.len()];
    let mut count = 0;
    // Explicit worklist so large meshes cannot exhaust the call stack.
    let mut stack = vec![start];
    while let Some(idx) = stack.pop() {
        if marked[idx] || owner[idx] != Some(cluster) {
            continue;
        }
        marked[idx] = true;
        count += 1;
        for neighbor in mesh.neighbors(mesh.tile(idx)) {
            stack.push(mesh.index(neighbor));
        }
    }
    count
}

/// Closed-form layout engines that need no annealing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeterministicLayoutEngine {
    /// Lays clusters along a reverse-S space-filling path: even rows
    /// left-to-right, odd rows right-to-left.
    ReverseS,
}

impl DeterministicLayoutEngine {
    /// The space-filling node order this engine lays clusters along.
    fn generate_path(&self, mesh: &Mesh) -> Vec<NodeIdx> {
        match self {
            Self::ReverseS => {
                let (w, h) = (mesh.w(), mesh.h());
                let mut path = Vec::with_capacity(w * h);
                for y in 0..h {
                    for x in 0..w {
                        let idx = if y % 2 == 1 {
                            (y + 1) * w - x - 1
                        } else {
                            y * w + x
                        };
                        path.push(idx);
                    }
                }
                path
            }
        }
    }

    /// Lays clusters along the generated path in cluster-major order,
    /// shuffling the local index order within each cluster.
    pub fn map_tiles(
        &self,
        cluster_sizes: &[usize],
        mesh: &Mesh,
        rng: &mut StdRng,
    ) -> Result<LayoutPatternCode> {
        let total: usize = cluster_sizes.iter().sum();
        if total > mesh.len() {
            return Err(Error::MeshTooSmall {
                mesh_tiles: mesh.len(),
                logical_tiles: total,
            });
        }
        let path = self.generate_path(mesh);
        let mut slots = vec![0; total];
        let offsets = prefix_offsets(cluster_sizes);
        for (c, &size) in cluster_sizes.iter().enumerate() {
            let mut local: Vec<usize> = (0..size).collect();
            local.shuffle(rng);
            for (i, &t) in local.iter().enumerate() {
                slots[offsets[c] + t] = path[offsets[c] + i];
            }
        }
        LayoutPatternCode::from_slots(slots, cluster_sizes)
    }
}

/// An immutable layout: the output of a layout designer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutResult {
    w: usize,
    h: usize,
    cir_map: Vec<(CirTile, Tile)>,
    l2p: IndexMap<LogicalTile, Tile>,
}

impl LayoutResult {
    #[cfg(test)]
    pub(crate) fn from_parts(
        w: usize,
        h: usize,
        cir_map: Vec<(CirTile, Tile)>,
        l2p: IndexMap<LogicalTile, Tile>,
    ) -> Self {
        Self { w, h, cir_map, l2p }
    }

    /// The mesh width the layout was designed for.
    pub fn w(&self) -> usize {
        self.w
    }

    /// The mesh height the layout was designed for.
    pub fn h(&self) -> usize {
        self.h
    }

    /// The cluster-indexed view of the placement, for rendering.
    pub fn cir_map(&self) -> &[(CirTile, Tile)] {
        &self.cir_map
    }

    /// The physical tile assigned to the given logical tile.
    pub fn get(&self, tile: &LogicalTile) -> Option<Tile> {
        self.l2p.get(tile).copied()
    }
}

impl Index<&LogicalTile> for LayoutResult {
    type Output = Tile;

    fn index(&self, tile: &LogicalTile) -> &Self::Output {
        self.l2p
            .get(tile)
            .unwrap_or_else(|| panic!("unknown logical tile `{tile}`"))
    }
}

/// Determines the one-to-one mapping between logical tiles and physical
/// tiles.
pub struct LayoutDesigner<'a> {
    graph: &'a ClusterGraph,
    mesh: &'a Mesh,
    lpc: LayoutPatternCode,
}

impl<'a> LayoutDesigner<'a> {
    /// Creates a designer with a fresh random initial pattern.
    pub fn new(graph: &'a ClusterGraph, mesh: &'a Mesh, rng: &mut StdRng) -> Result<Self> {
        let lpc = LayoutPatternCode::new(&graph.cluster_sizes(), mesh, rng)?;
        Ok(Self { graph, mesh, lpc })
    }

    /// Replaces the current pattern with a fresh uniform shuffle. Call
    /// before launching a new round of optimization.
    pub fn init_layout(&mut self, rng: &mut StdRng) -> Result<()> {
        self.lpc = LayoutPatternCode::new(&self.graph.cluster_sizes(), self.mesh, rng)?;
        Ok(())
    }

    /// The current pattern.
    pub fn pattern(&self) -> &LayoutPatternCode {
        &self.lpc
    }

    /// The layout objective of a pattern.
    pub fn objective(&self, lpc: &LayoutPatternCode) -> f64 {
        intra_cluster_distance(lpc, self.mesh)
    }

    /// Whether a pattern maps every cluster to a 4-connected patch.
    pub fn is_patches(&self, lpc: &LayoutPatternCode) -> bool {
        is_patches(lpc, self.mesh)
    }

    /// Optimizes the current pattern by simulated annealing and returns the
    /// resulting layout.
    pub fn run(&mut self, options: AnnealOptions) -> Result<LayoutResult> {
        let mesh = self.mesh;
        let annealer = Annealer::new(
            move |x: &mut LayoutPatternCode| intra_cluster_distance(x, mesh),
            self.lpc.clone(),
            options,
        )?;
        let outcome = annealer.run()?;
        self.lpc = outcome.solution;
        tracing::info!(
            objective = outcome.objective,
            patches = self.is_patches(&self.lpc),
            "layout optimization finished"
        );
        Ok(self.result())
    }

    /// Replaces annealing with a closed-form engine. The produced layout is
    /// patch-valid by construction.
    pub fn run_deterministic(
        &mut self,
        engine: DeterministicLayoutEngine,
        rng: &mut StdRng,
    ) -> Result<LayoutResult> {
        self.lpc = engine.map_tiles(&self.graph.cluster_sizes(), self.mesh, rng)?;
        Ok(self.result())
    }

    /// Builds an immutable result from the current pattern.
    pub fn result(&self) -> LayoutResult {
        let mut cir_map = Vec::with_capacity(self.lpc.len());
        let mut l2p = IndexMap::new();
        for (c, cluster) in self.graph.clusters().iter().enumerate() {
            for (t, logical) in cluster.tiles.iter().enumerate() {
                let cir = CirTile::new(c, t);
                let tile = self.mesh.tile(self.lpc.get(cir));
                cir_map.push((cir, tile));
                l2p.insert(logical.clone(), tile);
            }
        }
        LayoutResult {
            w: self.mesh.w(),
            h: self.mesh.h(),
            cir_map,
            l2p,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Cluster;
    use rand::SeedableRng;
    use rustc_hash::FxHashSet;

    fn cluster(id: &str, tiles: &[&str]) -> Cluster {
        Cluster::new(id, tiles.iter().map(|&s| LogicalTile::from(s)).collect())
    }

    #[test]
    fn new_pattern_is_a_partial_permutation() {
        let mesh = Mesh::new(4, 4).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let lpc = LayoutPatternCode::new(&[3, 2, 4], &mesh, &mut rng).unwrap();
        assert_eq!(lpc.len(), 9);
        let values: FxHashSet<NodeIdx> = lpc.iter().map(|(_, idx)| idx).collect();
        assert_eq!(values.len(), 9);
        assert!(values.iter().all(|&v| v < mesh.len()));
    }

    #[test]
    fn oversized_workload_rejected() {
        let mesh = Mesh::new(2, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let err = LayoutPatternCode::new(&[3, 2], &mesh, &mut rng).unwrap_err();
        assert!(matches!(err, Error::MeshTooSmall { .. }));
    }

    #[test]
    fn mutation_roundtrip_restores_state() {
        let mesh = Mesh::new(4, 4).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let mut lpc = LayoutPatternCode::new(&[4, 3], &mesh, &mut rng).unwrap();
        let before = lpc.clone();
        for _ in 0..50 {
            lpc.mutation(&mut rng);
            lpc.undo_mutation();
        }
        assert_eq!(lpc.slots, before.slots);
    }

    #[test]
    fn self_swap_is_a_recorded_noop() {
        let mesh = Mesh::new(2, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let mut lpc = LayoutPatternCode::new(&[2], &mesh, &mut rng).unwrap();
        let before = lpc.slots.clone();
        let key = CirTile::new(0, 1);
        lpc.swap(key, key);
        assert_eq!(lpc.slots, before);
        lpc.undo_mutation();
        assert_eq!(lpc.slots, before);
    }

    #[test]
    #[should_panic(expected = "no pending mutation")]
    fn undo_without_mutation_panics() {
        let mesh = Mesh::new(2, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let mut lpc = LayoutPatternCode::new(&[2], &mesh, &mut rng).unwrap();
        lpc.undo_mutation();
    }

    /// Any full placement of one 4-tile cluster on a 2x2 mesh has the same
    /// objective: the full pairwise Manhattan sum, 8.
    #[test]
    fn tiny_layout_objective() {
        let mesh = Mesh::new(2, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        for seed in 0..8 {
            let mut rng2 = StdRng::seed_from_u64(seed);
            let lpc = LayoutPatternCode::new(&[4], &mesh, &mut rng2).unwrap();
            assert_eq!(intra_cluster_distance(&lpc, &mesh), 8.0);
        }
        let lpc = LayoutPatternCode::new(&[4], &mesh, &mut rng).unwrap();
        assert!(is_patches(&lpc, &mesh));
    }

    /// The objective is invariant under cluster-internal reordering.
    #[test]
    fn objective_invariant_under_internal_reorder() {
        let mesh = Mesh::new(4, 4).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let mut lpc = LayoutPatternCode::new(&[5, 3], &mesh, &mut rng).unwrap();
        let before = intra_cluster_distance(&lpc, &mesh);
        lpc.swap(CirTile::new(0, 1), CirTile::new(0, 4));
        assert_eq!(intra_cluster_distance(&lpc, &mesh), before);
        lpc.swap(CirTile::new(1, 0), CirTile::new(1, 2));
        assert_eq!(intra_cluster_distance(&lpc, &mesh), before);
    }

    /// Two clusters of two on a 1x4 strip: annealing must separate them
    /// onto contiguous pairs, reaching the optimal objective of 2.
    #[test]
    fn two_cluster_separation() {
        let mesh = Mesh::new(4, 1).unwrap();
        let graph = ClusterGraph::new(
            vec![cluster("c0", &["a0", "a1"]), cluster("c1", &["b0", "b1"])],
            vec![],
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let mut designer = LayoutDesigner::new(&graph, &mesh, &mut rng).unwrap();
        let options = AnnealOptions::layout().with_seed(0).with_chain_length(50);
        let result = designer.run(options).unwrap();
        assert_eq!(designer.objective(designer.pattern()), 2.0);
        assert!(designer.is_patches(designer.pattern()));
        // Every logical tile got a physical home.
        for id in ["a0", "a1", "b0", "b1"] {
            assert!(result.get(&LogicalTile::from(id)).is_some());
        }
    }

    /// A cluster on the main diagonal of a 3x3 mesh is not a patch.
    #[test]
    fn diagonal_cluster_is_not_a_patch() {
        let mesh = Mesh::new(3, 3).unwrap();
        // Cluster 0 on the diagonal; cluster 1 on the remaining tiles.
        let diagonal = vec![0, 4, 8];
        let rest = vec![1, 2, 3, 5, 6, 7];
        let slots: Vec<NodeIdx> = diagonal.into_iter().chain(rest).collect();
        let lpc = LayoutPatternCode::from_slots(slots, &[3, 6]).unwrap();
        assert!(!is_patches(&lpc, &mesh));
    }

    #[test]
    fn reverse_s_layout_is_patch_valid() {
        let mesh = Mesh::new(4, 3).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let sizes = [3, 5, 4];
        let lpc = DeterministicLayoutEngine::ReverseS
            .map_tiles(&sizes, &mesh, &mut rng)
            .unwrap();
        assert!(is_patches(&lpc, &mesh));
        // The reverse-S path itself: row 1 runs right-to-left.
        let path = DeterministicLayoutEngine::ReverseS.generate_path(&mesh);
        assert_eq!(path[..8], [0, 1, 2, 3, 7, 6, 5, 4]);
    }

    #[test]
    fn layout_result_lookup() {
        let mesh = Mesh::new(2, 2).unwrap();
        let graph = ClusterGraph::new(vec![cluster("c0", &["a", "b"])], vec![]).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let designer = LayoutDesigner::new(&graph, &mesh, &mut rng).unwrap();
        let result = designer.result();
        assert_eq!(result.w(), 2);
        assert_eq!(result.h(), 2);
        assert_eq!(result.cir_map().len(), 2);
        let a = result[&LogicalTile::from("a")];
        let b = result[&LogicalTile::from("b")];
        assert_ne!(a, b);
        assert!(result.get(&LogicalTile::from("z")).is_none());
    }
}
