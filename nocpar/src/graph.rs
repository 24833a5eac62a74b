//! Clustered communication workloads.
//!
//! A [`ClusterGraph`] is the immutable input to both design stages: logical
//! tiles grouped into clusters that the placement stage must keep physically
//! close, and the multicast communications the routing stage must realize as
//! trees over mesh links.

use std::fmt::Display;

use arcstr::ArcStr;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An opaque identifier of a logical tile, supplied by the upstream
/// task-partitioning stage.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct LogicalTile(ArcStr);

impl LogicalTile {
    /// Creates a new logical tile identifier.
    pub fn new(id: impl Into<ArcStr>) -> Self {
        Self(id.into())
    }

    /// The underlying identifier.
    pub fn id(&self) -> &ArcStr {
        &self.0
    }
}

impl From<&str> for LogicalTile {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Display for LogicalTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cluster of logical tiles that placement should keep physically close,
/// ideally on a 4-connected patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// The cluster identifier.
    pub id: ArcStr,
    /// The tiles of the cluster, in local-index order.
    pub tiles: Vec<LogicalTile>,
}

impl Cluster {
    /// Creates a new cluster.
    pub fn new(id: impl Into<ArcStr>, tiles: Vec<LogicalTile>) -> Self {
        Self {
            id: id.into(),
            tiles,
        }
    }
}

/// A one-to-many communication between logical tiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Multicast {
    /// A stable identifier of the communication.
    pub id: ArcStr,
    /// The sending tile.
    pub src: LogicalTile,
    /// The receiving tiles. Non-empty and disjoint from the source.
    pub dsts: Vec<LogicalTile>,
}

impl Multicast {
    /// Creates a new multicast.
    pub fn new(id: impl Into<ArcStr>, src: LogicalTile, dsts: Vec<LogicalTile>) -> Self {
        Self {
            id: id.into(),
            src,
            dsts,
        }
    }
}

/// An immutable description of clusters and multicast communications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterGraph {
    clusters: Vec<Cluster>,
    casts: Vec<Multicast>,
}

impl ClusterGraph {
    /// Creates a new cluster graph, validating its invariants.
    ///
    /// Rejects empty clusters, logical tiles appearing in more than one
    /// cluster position, multicasts without sinks, multicasts whose source is
    /// also a sink, and multicasts referencing unknown tiles.
    pub fn new(clusters: Vec<Cluster>, casts: Vec<Multicast>) -> Result<Self> {
        let mut seen = FxHashSet::default();
        for cluster in &clusters {
            if cluster.tiles.is_empty() {
                return Err(Error::EmptyCluster(cluster.id.clone()));
            }
            for tile in &cluster.tiles {
                if !seen.insert(tile.clone()) {
                    return Err(Error::DuplicateTile(tile.clone()));
                }
            }
        }
        for cast in &casts {
            if cast.dsts.is_empty() {
                return Err(Error::NoSinks(cast.id.clone()));
            }
            if cast.dsts.contains(&cast.src) {
                return Err(Error::SourceIsSink(cast.id.clone()));
            }
            for tile in std::iter::once(&cast.src).chain(&cast.dsts) {
                if !seen.contains(tile) {
                    return Err(Error::UnknownTile(tile.clone()));
                }
            }
        }
        Ok(Self { clusters, casts })
    }

    /// The clusters, in index order.
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// The number of tiles in each cluster, in cluster order.
    pub fn cluster_sizes(&self) -> Vec<usize> {
        self.clusters.iter().map(|c| c.tiles.len()).collect()
    }

    /// All logical tiles, flattened in cluster-major, tile-minor order.
    pub fn tile_nodes(&self) -> impl Iterator<Item = &LogicalTile> {
        self.clusters.iter().flat_map(|c| c.tiles.iter())
    }

    /// The total number of logical tiles.
    pub fn total_tiles(&self) -> usize {
        self.clusters.iter().map(|c| c.tiles.len()).sum()
    }

    /// The multicast communications, in stream order.
    pub fn cast_trees(&self) -> &[Multicast] {
        &self.casts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiles(ids: &[&str]) -> Vec<LogicalTile> {
        ids.iter().map(|&s| LogicalTile::from(s)).collect()
    }

    #[test]
    fn valid_graph() {
        let graph = ClusterGraph::new(
            vec![
                Cluster::new("c0", tiles(&["a", "b"])),
                Cluster::new("c1", tiles(&["c"])),
            ],
            vec![Multicast::new("m0", "a".into(), tiles(&["b", "c"]))],
        )
        .unwrap();
        assert_eq!(graph.total_tiles(), 3);
        assert_eq!(graph.cluster_sizes(), vec![2, 1]);
        assert_eq!(graph.cast_trees().len(), 1);
        let flat: Vec<_> = graph.tile_nodes().cloned().collect();
        assert_eq!(flat, tiles(&["a", "b", "c"]));
    }

    #[test]
    fn empty_cluster_rejected() {
        let err = ClusterGraph::new(vec![Cluster::new("c0", vec![])], vec![]).unwrap_err();
        assert!(matches!(err, Error::EmptyCluster(_)));
    }

    #[test]
    fn sinkless_multicast_rejected() {
        let err = ClusterGraph::new(
            vec![Cluster::new("c0", tiles(&["a"]))],
            vec![Multicast::new("m0", "a".into(), vec![])],
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoSinks(_)));
    }

    #[test]
    fn source_as_sink_rejected() {
        let err = ClusterGraph::new(
            vec![Cluster::new("c0", tiles(&["a", "b"]))],
            vec![Multicast::new("m0", "a".into(), tiles(&["a", "b"]))],
        )
        .unwrap_err();
        assert!(matches!(err, Error::SourceIsSink(_)));
    }

    #[test]
    fn unknown_tile_rejected() {
        let err = ClusterGraph::new(
            vec![Cluster::new("c0", tiles(&["a"]))],
            vec![Multicast::new("m0", "a".into(), tiles(&["z"]))],
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownTile(_)));
    }
}
