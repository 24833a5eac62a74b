//! 2-D mesh tile universes and distance tables.
//!
//! A [`Mesh`] is a `W x H` grid of [`Tile`]s connected to their 4-neighbors
//! by bidirectional links. Tiles are addressed either by coordinate or by a
//! flat row-major [`NodeIdx`]; the mesh precomputes the pairwise Manhattan
//! distance table so that placement objectives reduce to table lookups.
#![warn(missing_docs)]

mod axis;
mod tile;

pub use axis::Axis;
pub use tile::Tile;

use grid::Grid;
use serde::{Deserialize, Serialize};

/// A flat index of a tile within a mesh.
///
/// Indices are row-major: `idx = y * W + x`.
pub type NodeIdx = usize;

/// The error type for mesh construction.
#[derive(thiserror::Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum MeshError {
    /// A mesh dimension was zero.
    #[error("mesh dimensions must be nonzero, got {w}x{h}")]
    EmptyMesh {
        /// The requested width.
        w: usize,
        /// The requested height.
        h: usize,
    },
}

/// A `W x H` grid of tiles connected to their 4-neighbors.
///
/// The pairwise Manhattan distance table is computed once at construction
/// and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mesh {
    w: usize,
    h: usize,
    dist: Grid<u32>,
}

impl Mesh {
    /// Creates a new mesh with the given width and height.
    pub fn new(w: usize, h: usize) -> Result<Self, MeshError> {
        if w == 0 || h == 0 {
            return Err(MeshError::EmptyMesh { w, h });
        }
        let n = w * h;
        let mut dist = Grid::new(n, n);
        for i in 0..n {
            for j in 0..n {
                dist[(i, j)] = tile_at(w, i).manhattan(tile_at(w, j));
            }
        }
        Ok(Self { w, h, dist })
    }

    /// The mesh width.
    pub fn w(&self) -> usize {
        self.w
    }

    /// The mesh height.
    pub fn h(&self) -> usize {
        self.h
    }

    /// The number of tiles in the mesh.
    pub fn len(&self) -> usize {
        self.w * self.h
    }

    /// Whether the mesh contains no tiles.
    ///
    /// Always false: construction rejects zero dimensions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All tiles in row-major order.
    pub fn nodes(&self) -> Vec<Tile> {
        (0..self.len()).map(|i| self.tile(i)).collect()
    }

    /// The flat index of the given tile.
    pub fn index(&self, tile: Tile) -> NodeIdx {
        debug_assert!(self.contains(tile), "tile {tile} out of bounds");
        tile.y * self.w + tile.x
    }

    /// The tile at the given flat index.
    pub fn tile(&self, idx: NodeIdx) -> Tile {
        debug_assert!(idx < self.len(), "index {idx} out of bounds");
        tile_at(self.w, idx)
    }

    /// Whether the given tile lies within the mesh.
    pub fn contains(&self, tile: Tile) -> bool {
        tile.x < self.w && tile.y < self.h
    }

    /// The Manhattan distance between two tiles, by flat index.
    pub fn dist(&self, a: NodeIdx, b: NodeIdx) -> u32 {
        self.dist[(a, b)]
    }

    /// The 4-neighbors of the given tile, clipped to the mesh boundary.
    pub fn neighbors(&self, tile: Tile) -> impl Iterator<Item = Tile> {
        let mut out = Vec::with_capacity(4);
        if tile.x > 0 {
            out.push(Tile::new(tile.x - 1, tile.y));
        }
        if tile.x + 1 < self.w {
            out.push(Tile::new(tile.x + 1, tile.y));
        }
        if tile.y > 0 {
            out.push(Tile::new(tile.x, tile.y - 1));
        }
        if tile.y + 1 < self.h {
            out.push(Tile::new(tile.x, tile.y + 1));
        }
        out.into_iter()
    }
}

fn tile_at(w: usize, idx: NodeIdx) -> Tile {
    Tile::new(idx % w, idx / w)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_indexing() {
        let mesh = Mesh::new(4, 3).unwrap();
        assert_eq!(mesh.len(), 12);
        assert_eq!(mesh.index(Tile::new(0, 0)), 0);
        assert_eq!(mesh.index(Tile::new(3, 0)), 3);
        assert_eq!(mesh.index(Tile::new(0, 1)), 4);
        assert_eq!(mesh.tile(7), Tile::new(3, 1));
        for (i, node) in mesh.nodes().into_iter().enumerate() {
            assert_eq!(mesh.index(node), i);
        }
    }

    #[test]
    fn distance_table_is_manhattan() {
        let mesh = Mesh::new(3, 3).unwrap();
        let a = mesh.index(Tile::new(0, 0));
        let b = mesh.index(Tile::new(2, 1));
        assert_eq!(mesh.dist(a, b), 3);
        assert_eq!(mesh.dist(b, a), 3);
        assert_eq!(mesh.dist(a, a), 0);
    }

    #[test]
    fn neighbor_counts() {
        let mesh = Mesh::new(3, 3).unwrap();
        assert_eq!(mesh.neighbors(Tile::new(0, 0)).count(), 2);
        assert_eq!(mesh.neighbors(Tile::new(1, 0)).count(), 3);
        assert_eq!(mesh.neighbors(Tile::new(1, 1)).count(), 4);
    }

    #[test]
    fn zero_dimension_rejected() {
        assert_eq!(
            Mesh::new(0, 5).unwrap_err(),
            MeshError::EmptyMesh { w: 0, h: 5 }
        );
    }
}
