//! Steiner tree codes: encoded spanning trees decodable into multicast
//! routing trees.
//!
//! A [`SteinerTreeCode`] encodes a candidate routing tree for one multicast
//! as a spanning tree of its terminal set, treated as a complete graph: the
//! spanning edges are logical and need not respect mesh adjacency. Each edge
//! carries an [`AxisOrder`] that fixes the dimension order used to realize it
//! on the mesh, and the code carries a root terminal used by the pruning
//! traversal.
//!
//! Decoding happens in three layers:
//!
//! 1. Every spanning edge is expanded into axis-ordered unit steps, and the
//!    steps of all edges are merged into one undirected graph over mesh
//!    nodes (the raw Steiner graph).
//! 2. A traversal from the root prunes branches whose leaves are not
//!    terminals, leaving a true Steiner graph in which every leaf is a
//!    terminal. The breadth-first variant is canonical; the depth-first
//!    variant is kept for diagnostics.
//! 3. A breadth-first tree of the pruned graph rooted at the multicast
//!    source yields the directed mesh links that carry the packets.

use std::collections::VecDeque;

use mesh::{Axis, Mesh, NodeIdx, Tile};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The monotone dimension order used to realize one spanning edge on the
/// mesh.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum AxisOrder {
    /// Route along X until the column matches, then along Y.
    Xy,
    /// Route along Y until the row matches, then along X.
    Yx,
}

impl AxisOrder {
    /// The axis traveled first.
    pub fn first(&self) -> Axis {
        match self {
            Self::Xy => Axis::X,
            Self::Yx => Axis::Y,
        }
    }

    fn random(rng: &mut StdRng) -> Self {
        if rng.gen::<bool>() {
            Self::Xy
        } else {
            Self::Yx
        }
    }
}

/// A logical spanning edge between two terminal nodes.
pub type SpanEdge = (NodeIdx, NodeIdx);

/// A directed mesh link.
pub type MeshEdge = (Tile, Tile);

/// A recorded reversible mutation.
#[derive(Debug, Clone)]
enum Mutation {
    /// `edges[slot]` and `axes[slot]` were overwritten.
    ReplaceEdge {
        slot: usize,
        old_edge: SpanEdge,
        old_axis: AxisOrder,
    },
    /// The root moved.
    Reroot { old_root: NodeIdx },
    /// The drawn mutation could not be applied and was skipped.
    Noop,
}

/// An encoded Steiner tree: spanning edges over the terminal set, per-edge
/// axis orders, and a pruning root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteinerTreeCode {
    terminals: Vec<NodeIdx>,
    root: NodeIdx,
    edges: Vec<SpanEdge>,
    axes: Vec<AxisOrder>,
    #[serde(skip)]
    last: Option<Mutation>,
}

impl SteinerTreeCode {
    /// Creates a Steiner tree code from explicit parts, validating its
    /// invariants: a non-empty edge list matching the axis list in length,
    /// a root drawn from the terminal set, and edges forming a spanning
    /// tree of the terminals.
    pub fn new(
        edges: Vec<SpanEdge>,
        axes: Vec<AxisOrder>,
        root: NodeIdx,
        terminals: Vec<NodeIdx>,
    ) -> Result<Self> {
        if edges.is_empty() {
            return Err(Error::EmptyEdgeList);
        }
        if edges.len() != axes.len() {
            return Err(Error::AxisLengthMismatch {
                edges: edges.len(),
                axes: axes.len(),
            });
        }
        if !terminals.contains(&root) {
            return Err(Error::RootNotTerminal(root));
        }
        let stc = Self {
            terminals,
            root,
            edges,
            axes,
            last: None,
        };
        if !stc.is_spanning_tree() {
            return Err(Error::NotSpanningTree);
        }
        Ok(stc)
    }

    /// Builds a uniformly random spanning tree over the terminal set.
    ///
    /// Starting from a random initial terminal, repeatedly attaches a
    /// uniformly drawn unvisited terminal to a uniformly drawn visited one,
    /// assigning each new edge a random axis order; the root is drawn
    /// uniformly from the terminals.
    pub fn random(terminals: Vec<NodeIdx>, rng: &mut StdRng) -> Result<Self> {
        if terminals.len() < 2 {
            return Err(Error::TooFewTerminals(terminals.len()));
        }
        let mut remaining = terminals.clone();
        let mut visited = Vec::with_capacity(terminals.len());
        let init = remaining.remove(rng.gen_range(0..remaining.len()));
        visited.push(init);

        let mut edges = Vec::with_capacity(terminals.len() - 1);
        let mut axes = Vec::with_capacity(terminals.len() - 1);
        for _ in 0..terminals.len() - 1 {
            let u = visited[rng.gen_range(0..visited.len())];
            let v = remaining.remove(rng.gen_range(0..remaining.len()));
            edges.push((u, v));
            axes.push(AxisOrder::random(rng));
            visited.push(v);
        }

        let root = terminals[rng.gen_range(0..terminals.len())];
        Ok(Self {
            terminals,
            root,
            edges,
            axes,
            last: None,
        })
    }

    /// The terminal nodes (source and sinks).
    pub fn terminals(&self) -> &[NodeIdx] {
        &self.terminals
    }

    /// The pruning root.
    pub fn root(&self) -> NodeIdx {
        self.root
    }

    /// The spanning edges.
    pub fn edges(&self) -> &[SpanEdge] {
        &self.edges
    }

    /// The per-edge axis orders.
    pub fn axes(&self) -> &[AxisOrder] {
        &self.axes
    }

    /// Whether the edge list forms a spanning tree of the terminal set.
    pub fn is_spanning_tree(&self) -> bool {
        if self.edges.len() + 1 != self.terminals.len() {
            return false;
        }
        let term: FxHashSet<NodeIdx> = self.terminals.iter().copied().collect();
        if self
            .edges
            .iter()
            .any(|&(u, v)| !term.contains(&u) || !term.contains(&v))
        {
            return false;
        }
        // |E| = |T| - 1, so connectivity implies acyclicity.
        self.component_of(self.terminals[0], None).len() == self.terminals.len()
    }

    /// The terminals connected to `start` by the spanning edges, optionally
    /// ignoring one edge slot.
    fn component_of(&self, start: NodeIdx, skip_slot: Option<usize>) -> FxHashSet<NodeIdx> {
        let mut seen = FxHashSet::default();
        seen.insert(start);
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for (slot, &(u, v)) in self.edges.iter().enumerate() {
                if Some(slot) == skip_slot {
                    continue;
                }
                let nxt = if u == node {
                    v
                } else if v == node {
                    u
                } else {
                    continue;
                };
                if seen.insert(nxt) {
                    stack.push(nxt);
                }
            }
        }
        seen
    }

    /// Applies one reversible mutation: with equal probability, either
    /// replaces a spanning edge or relocates the root.
    pub fn mutation(&mut self, rng: &mut StdRng) {
        if rng.gen::<bool>() {
            self.replace_edge(rng);
        } else {
            self.relocate_root(rng);
        }
    }

    /// Removes a uniformly chosen spanning edge, splitting the tree into a
    /// root-side and a far-side component, and reconnects the two sides by
    /// a fresh edge between uniformly chosen terminals of each side.
    fn replace_edge(&mut self, rng: &mut StdRng) {
        let slot = rng.gen_range(0..self.edges.len());
        let old_edge = self.edges[slot];
        let old_axis = self.axes[slot];

        let root_side = self.component_of(self.root, Some(slot));
        let near: Vec<NodeIdx> = self
            .terminals
            .iter()
            .copied()
            .filter(|t| root_side.contains(t))
            .collect();
        let far: Vec<NodeIdx> = self
            .terminals
            .iter()
            .copied()
            .filter(|t| !root_side.contains(t))
            .collect();
        // Both sides hold at least the removed edge's endpoints, but a
        // mutation that cannot partition the terminals is skipped rather
        // than applied; the no-op still arms the undo.
        let (Some(&u), Some(&v)) = (near.choose(rng), far.choose(rng)) else {
            self.last = Some(Mutation::Noop);
            return;
        };

        self.edges[slot] = (u, v);
        self.axes[slot] = AxisOrder::random(rng);
        self.last = Some(Mutation::ReplaceEdge {
            slot,
            old_edge,
            old_axis,
        });
    }

    /// Moves the root to a uniformly chosen other terminal.
    fn relocate_root(&mut self, rng: &mut StdRng) {
        let others: Vec<NodeIdx> = self
            .terminals
            .iter()
            .copied()
            .filter(|&t| t != self.root)
            .collect();
        let Some(&new_root) = others.choose(rng) else {
            self.last = Some(Mutation::Noop);
            return;
        };
        self.last = Some(Mutation::Reroot {
            old_root: self.root,
        });
        self.root = new_root;
    }

    /// Restores the state prior to the last [`SteinerTreeCode::mutation`].
    ///
    /// # Panics
    ///
    /// Panics if no mutation is pending.
    pub fn undo_mutation(&mut self) {
        match self.last.take().expect("no pending mutation to undo") {
            Mutation::ReplaceEdge {
                slot,
                old_edge,
                old_axis,
            } => {
                self.edges[slot] = old_edge;
                self.axes[slot] = old_axis;
            }
            Mutation::Reroot { old_root } => self.root = old_root,
            Mutation::Noop => {}
        }
    }

    /// Expands every spanning edge into axis-ordered unit steps and merges
    /// them into one undirected graph over mesh nodes.
    pub fn raw_steiner(&self, mesh: &Mesh) -> SteinerGraph {
        let mut g = SteinerGraph::new(mesh.len());
        for (&edge, &axis) in self.edges.iter().zip(&self.axes) {
            add_steiner_route(&mut g, mesh, edge, axis);
        }
        g
    }

    /// Decodes the canonical true Steiner graph: the raw Steiner graph with
    /// every non-terminal branch pruned by the breadth-first traversal.
    pub fn decode(&self, mesh: &Mesh) -> SteinerGraph {
        let rstg = self.raw_steiner(mesh);
        self.prune_bfs(&rstg)
    }

    /// The depth-first pruned variant, kept for diagnostics.
    pub fn decode_dfs(&self, mesh: &Mesh) -> SteinerGraph {
        let rstg = self.raw_steiner(mesh);
        self.prune_dfs(&rstg)
    }

    /// Breadth-first pruning with a rethink queue.
    ///
    /// The traversal builds a breadth-first tree of the component reachable
    /// from the root. A popped node with no unvisited neighbors that is not
    /// a terminal is a dead end: its parent edge is removed and the parent
    /// queued for rethinking. A rethought node that is left with degree one
    /// and is not a terminal is pruned the same way, cascading toward the
    /// root.
    fn prune_bfs(&self, rstg: &SteinerGraph) -> SteinerGraph {
        let term: FxHashSet<NodeIdx> = self.terminals.iter().copied().collect();
        let mut tg = SteinerGraph::new(rstg.len());
        let mut visited = vec![false; rstg.len()];
        let mut fifo = VecDeque::new();
        let mut rethink = VecDeque::new();
        fifo.push_back(self.root);
        visited[self.root] = true;

        while !fifo.is_empty() || !rethink.is_empty() {
            if let Some(node) = fifo.pop_front() {
                let mut dead_end = true;
                for &nxt in rstg.neighbors(node) {
                    if !visited[nxt] {
                        fifo.push_back(nxt);
                        visited[nxt] = true;
                        tg.add_edge(node, nxt);
                        dead_end = false;
                    }
                }
                if dead_end && !term.contains(&node) {
                    let pred = tg.neighbors(node).first().copied();
                    if let Some(pred) = pred {
                        tg.remove_edge(pred, node);
                        rethink.push_back(pred);
                    }
                }
            }
            if let Some(node) = rethink.pop_front() {
                if tg.degree(node) == 1 && !term.contains(&node) {
                    let pred = tg.neighbors(node)[0];
                    tg.remove_edge(pred, node);
                    rethink.push_back(pred);
                }
            }
        }
        tg
    }

    /// Depth-first pruning with an explicit frame stack.
    ///
    /// An explored edge is kept iff the subtree below it contains a
    /// terminal.
    fn prune_dfs(&self, rstg: &SteinerGraph) -> SteinerGraph {
        struct Frame {
            node: NodeIdx,
            parent: Option<NodeIdx>,
            cursor: usize,
            keep: bool,
        }

        let term: FxHashSet<NodeIdx> = self.terminals.iter().copied().collect();
        let mut tg = SteinerGraph::new(rstg.len());
        let mut visited = vec![false; rstg.len()];
        visited[self.root] = true;
        let mut stack = vec![Frame {
            node: self.root,
            parent: None,
            cursor: 0,
            keep: term.contains(&self.root),
        }];

        while let Some(top) = stack.last_mut() {
            let node = top.node;
            let cursor = top.cursor;
            let neighbors = rstg.neighbors(node);
            if cursor < neighbors.len() {
                top.cursor += 1;
                let nxt = neighbors[cursor];
                if !visited[nxt] {
                    visited[nxt] = true;
                    stack.push(Frame {
                        node: nxt,
                        parent: Some(node),
                        cursor: 0,
                        keep: term.contains(&nxt),
                    });
                }
            } else {
                let frame = stack.pop().expect("frame stack non-empty");
                if let Some(parent) = frame.parent {
                    if frame.keep {
                        tg.add_edge(parent, frame.node);
                        if let Some(pf) = stack.last_mut() {
                            pf.keep = true;
                        }
                    }
                }
            }
        }
        tg
    }
}

/// Expands one spanning edge into unit steps on the mesh and inserts them
/// into `g`, first along the edge's primary axis, then along the other.
pub(crate) fn add_steiner_route(g: &mut SteinerGraph, mesh: &Mesh, edge: SpanEdge, axis: AxisOrder) {
    let dst = mesh.tile(edge.1);
    let mut cur = mesh.tile(edge.0);
    while cur != dst {
        let nxt = step_toward(cur, dst, axis);
        g.add_edge(mesh.index(cur), mesh.index(nxt));
        cur = nxt;
    }
}

fn step_toward(cur: Tile, dst: Tile, order: AxisOrder) -> Tile {
    let first = order.first();
    let axis = if cur.coord(first) != dst.coord(first) {
        first
    } else {
        first.other()
    };
    let mut nxt = cur;
    match axis {
        Axis::X => nxt.x = if dst.x > cur.x { cur.x + 1 } else { cur.x - 1 },
        Axis::Y => nxt.y = if dst.y > cur.y { cur.y + 1 } else { cur.y - 1 },
    }
    nxt
}

/// An undirected graph over dense mesh node indices.
///
/// Backed by adjacency lists plus a normalized edge set, so that unit steps
/// contributed by distinct spanning edges collapse.
#[derive(Debug, Clone)]
pub struct SteinerGraph {
    adj: Vec<Vec<NodeIdx>>,
    edges: FxHashSet<(NodeIdx, NodeIdx)>,
}

impl SteinerGraph {
    /// Creates an empty graph over `n` nodes.
    pub fn new(n: usize) -> Self {
        Self {
            adj: vec![Vec::new(); n],
            edges: FxHashSet::default(),
        }
    }

    /// The number of nodes.
    pub fn len(&self) -> usize {
        self.adj.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.adj.is_empty()
    }

    /// Inserts the undirected edge `(a, b)` if not already present.
    pub fn add_edge(&mut self, a: NodeIdx, b: NodeIdx) {
        if self.edges.insert(normalize(a, b)) {
            self.adj[a].push(b);
            self.adj[b].push(a);
        }
    }

    /// Removes the undirected edge `(a, b)` if present.
    pub fn remove_edge(&mut self, a: NodeIdx, b: NodeIdx) {
        if self.edges.remove(&normalize(a, b)) {
            self.adj[a].retain(|&n| n != b);
            self.adj[b].retain(|&n| n != a);
        }
    }

    /// Whether the undirected edge `(a, b)` is present.
    pub fn has_edge(&self, a: NodeIdx, b: NodeIdx) -> bool {
        self.edges.contains(&normalize(a, b))
    }

    /// The neighbors of `n`, in insertion order.
    pub fn neighbors(&self, n: NodeIdx) -> &[NodeIdx] {
        &self.adj[n]
    }

    /// The degree of `n`.
    pub fn degree(&self, n: NodeIdx) -> usize {
        self.adj[n].len()
    }

    /// The number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// The breadth-first tree rooted at `source`, as directed parent-to-child
    /// mesh links.
    pub fn directed_paths(&self, mesh: &Mesh, source: NodeIdx) -> Vec<MeshEdge> {
        let mut visited = vec![false; self.len()];
        let mut fifo = VecDeque::new();
        let mut out = Vec::new();
        visited[source] = true;
        fifo.push_back(source);
        while let Some(node) = fifo.pop_front() {
            for &nxt in self.neighbors(node) {
                if !visited[nxt] {
                    visited[nxt] = true;
                    fifo.push_back(nxt);
                    out.push((mesh.tile(node), mesh.tile(nxt)));
                }
            }
        }
        out
    }
}

fn normalize(a: NodeIdx, b: NodeIdx) -> (NodeIdx, NodeIdx) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
