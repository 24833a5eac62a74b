//! Placement and routing error types.

use arcstr::ArcStr;
use mesh::NodeIdx;

use crate::graph::LogicalTile;

/// A result type returning placement and routing errors.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for placement and routing operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The mesh has fewer tiles than the workload has logical tiles.
    #[error("mesh of {mesh_tiles} tiles cannot fit {logical_tiles} logical tiles")]
    MeshTooSmall {
        /// The number of physical tiles available.
        mesh_tiles: usize,
        /// The number of logical tiles to place.
        logical_tiles: usize,
    },
    /// A cluster contains no tiles.
    #[error("cluster `{0}` is empty")]
    EmptyCluster(ArcStr),
    /// A logical tile appears in more than one cluster position.
    #[error("logical tile `{0}` appears more than once")]
    DuplicateTile(LogicalTile),
    /// A multicast has no sinks.
    #[error("multicast `{0}` has no sinks")]
    NoSinks(ArcStr),
    /// A multicast lists its source among its sinks.
    #[error("multicast `{0}` lists its source as a sink")]
    SourceIsSink(ArcStr),
    /// A multicast references a logical tile no cluster contains.
    #[error("logical tile `{0}` is not part of any cluster")]
    UnknownTile(LogicalTile),
    /// A layout assignment mapping two tiles to the same physical index.
    #[error("physical tile index {0} assigned more than once")]
    DuplicateAssignment(NodeIdx),
    /// An annealing schedule with out-of-order temperatures.
    #[error("invalid temperature range: need T_max = {t_max} > T_min = {t_min} > 0")]
    Temperature {
        /// The requested initial temperature.
        t_max: f64,
        /// The requested final temperature.
        t_min: f64,
    },
    /// The objective function produced a NaN.
    #[error("objective function returned NaN")]
    NanObjective,
    /// A Steiner tree code with no spanning edges.
    #[error("got empty edge list")]
    EmptyEdgeList,
    /// Mismatched spanning-edge and axis-order list lengths.
    #[error("got {edges} spanning edges but {axes} axis orders")]
    AxisLengthMismatch {
        /// The number of spanning edges.
        edges: usize,
        /// The number of axis orders.
        axes: usize,
    },
    /// A Steiner tree code whose root is not a terminal.
    #[error("root node {0} is not a terminal")]
    RootNotTerminal(NodeIdx),
    /// A terminal set too small to span.
    #[error("need at least two terminals, got {0}")]
    TooFewTerminals(usize),
    /// Spanning edges that do not form a spanning tree of the terminal set.
    #[error("spanning edges do not form a spanning tree of the terminal set")]
    NotSpanningTree,
    /// A mesh construction error.
    #[error(transparent)]
    Mesh(#[from] mesh::MeshError),
}
