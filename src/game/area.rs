//! Area graph and pathfinding.
//!
//! An area is a walkable graph of tile centers. Grid areas connect each tile
//! to its 8 neighbours; a diagonal step is only allowed when both adjacent
//! orthogonal tiles are walkable, so paths never cut corners.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::rng::DeterministicRng;
use crate::core::vec2::Vector;

/// Index of a node in an [`AreaGraph`].
pub type NodeId = usize;

/// Area construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AreaError {
    /// The area has no walkable tile.
    #[error("area \"{0}\" has no walkable tiles")]
    Empty(String),
    /// A blocked tile lies outside the grid.
    #[error("tile ({x}, {y}) is outside the {width}x{height} grid")]
    OutOfBounds {
        /// Tile column.
        x: u32,
        /// Tile row.
        y: u32,
        /// Grid width.
        width: u32,
        /// Grid height.
        height: u32,
    },
}

/// A walkable position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AreaNode {
    /// Node index.
    pub id: NodeId,
    /// Tile coordinates.
    pub vector: Vector,
}

/// Walkable graph.
#[derive(Clone, Debug, Default)]
pub struct AreaGraph {
    nodes: Vec<AreaNode>,
    edges: Vec<Vec<(NodeId, f64)>>,
    by_tile: HashMap<(i64, i64), NodeId>,
}

impl AreaGraph {
    /// Add a node at `vector`.
    pub fn add_node(&mut self, vector: Vector) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(AreaNode { id, vector });
        self.edges.push(Vec::new());
        let tile = vector.round();
        self.by_tile.insert((tile.x as i64, tile.y as i64), id);
        id
    }

    /// Connect two nodes both ways, weighted by distance.
    pub fn connect(&mut self, a: NodeId, b: NodeId) {
        let cost = self.nodes[a].vector.distance(self.nodes[b].vector);
        self.edges[a].push((b, cost));
        self.edges[b].push((a, cost));
    }

    /// Build an 8-connected grid graph of `width` x `height` tiles.
    pub fn grid(width: u32, height: u32, walkable: impl Fn(u32, u32) -> bool) -> Self {
        let mut graph = Self::default();
        let mut ids = HashMap::new();
        for y in 0..height {
            for x in 0..width {
                if walkable(x, y) {
                    ids.insert((x, y), graph.add_node(Vector::new(x as f64, y as f64)));
                }
            }
        }

        for y in 0..height {
            for x in 0..width {
                let Some(&id) = ids.get(&(x, y)) else { continue };
                // Only look right and down; connect() adds the reverse edge
                if let Some(&right) = ids.get(&(x + 1, y)) {
                    graph.connect(id, right);
                }
                if let Some(&down) = ids.get(&(x, y + 1)) {
                    graph.connect(id, down);
                }
                if let Some(&diag) = ids.get(&(x + 1, y + 1)) {
                    if ids.contains_key(&(x + 1, y)) && ids.contains_key(&(x, y + 1)) {
                        graph.connect(id, diag);
                    }
                }
                if x > 0 {
                    if let Some(&diag) = ids.get(&(x - 1, y + 1)) {
                        if ids.contains_key(&(x - 1, y)) && ids.contains_key(&(x, y + 1)) {
                            graph.connect(id, diag);
                        }
                    }
                }
            }
        }
        graph
    }

    /// Look up a node.
    pub fn node(&self, id: NodeId) -> Option<&AreaNode> {
        self.nodes.get(id)
    }

    /// All node ids.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        0..self.nodes.len()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Neighbours of a node with step costs.
    pub fn neighbours(&self, id: NodeId) -> &[(NodeId, f64)] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Uniformly random node id.
    pub fn random_node_id(&self, rng: &mut DeterministicRng) -> Option<NodeId> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(rng.next_int(self.nodes.len()))
        }
    }

    /// Node closest to `vector`: the tile under it when walkable, else the
    /// nearest node overall.
    pub fn nearest_node(&self, vector: Vector) -> Option<&AreaNode> {
        let tile = vector.round();
        if let Some(&id) = self.by_tile.get(&(tile.x as i64, tile.y as i64)) {
            return self.nodes.get(id);
        }
        self.nodes.iter().min_by(|a, b| {
            (a.vector - vector)
                .length_squared()
                .total_cmp(&(b.vector - vector).length_squared())
        })
    }

    /// A* from `from` to `to`. The returned path excludes the start node and
    /// ends at the destination; `None` when unreachable.
    pub fn find_path(&self, from: NodeId, to: NodeId) -> Option<Vec<Vector>> {
        let goal = self.nodes.get(to)?.vector;
        self.nodes.get(from)?;

        let mut open = BinaryHeap::new();
        let mut came_from: HashMap<NodeId, NodeId> = HashMap::new();
        let mut cost: HashMap<NodeId, f64> = HashMap::new();
        cost.insert(from, 0.0);
        open.push(Candidate {
            node: from,
            estimate: self.nodes[from].vector.distance(goal),
        });

        while let Some(Candidate { node, .. }) = open.pop() {
            if node == to {
                let mut path = Vec::new();
                let mut current = to;
                while current != from {
                    path.push(self.nodes[current].vector);
                    current = came_from[&current];
                }
                path.reverse();
                return Some(path);
            }

            let base = cost[&node];
            for &(next, step) in self.neighbours(node) {
                let tentative = base + step;
                if cost.get(&next).map_or(true, |&known| tentative < known) {
                    cost.insert(next, tentative);
                    came_from.insert(next, node);
                    open.push(Candidate {
                        node: next,
                        estimate: tentative + self.nodes[next].vector.distance(goal),
                    });
                }
            }
        }

        None
    }
}

/// Open-set entry ordered so the heap pops the lowest estimate first.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    node: NodeId,
    estimate: f64,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .estimate
            .total_cmp(&self.estimate)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// A playable area.
#[derive(Clone, Debug)]
pub struct Area {
    /// Area name.
    pub id: String,
    /// Where characters appear.
    pub start: Vector,
    /// Grid size in tiles.
    pub size: Vector,
    /// Walkable graph.
    pub graph: AreaGraph,
}

impl Area {
    /// Build a `width` x `height` grid area with the given tiles blocked.
    /// Characters start on the walkable tile nearest the center.
    pub fn grid(id: impl Into<String>, width: u32, height: u32, blocked: &[(u32, u32)]) -> Result<Self, AreaError> {
        let id = id.into();
        if let Some(&(x, y)) = blocked.iter().find(|&&(x, y)| x >= width || y >= height) {
            return Err(AreaError::OutOfBounds { x, y, width, height });
        }

        let graph = AreaGraph::grid(width, height, |x, y| !blocked.contains(&(x, y)));
        let center = Vector::new(f64::from(width / 2), f64::from(height / 2));
        let start = graph
            .nearest_node(center)
            .map(|node| node.vector)
            .ok_or_else(|| AreaError::Empty(id.clone()))?;

        Ok(Self {
            id,
            start,
            size: Vector::new(f64::from(width), f64::from(height)),
            graph,
        })
    }

    /// Path from the node nearest `from` to the node nearest `to`.
    pub fn find_path_between(&self, from: Vector, to: Vector) -> Option<Vec<Vector>> {
        let start = self.graph.nearest_node(from)?;
        let dest = self.graph.nearest_node(to)?;
        self.graph.find_path(start.id, dest.id)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_connectivity() {
        let graph = AreaGraph::grid(3, 3, |_, _| true);
        assert_eq!(graph.len(), 9);
        // center touches all 8 neighbours
        let center = graph.nearest_node(Vector::new(1.0, 1.0)).unwrap().id;
        assert_eq!(graph.neighbours(center).len(), 8);
        // corner touches 3
        let corner = graph.nearest_node(Vector::ZERO).unwrap().id;
        assert_eq!(graph.neighbours(corner).len(), 3);
    }

    #[test]
    fn test_no_corner_cutting() {
        // (1,0) blocked: (0,0) may not step diagonally to (1,1)
        let graph = AreaGraph::grid(2, 2, |x, y| (x, y) != (1, 0));
        let origin = graph.nearest_node(Vector::ZERO).unwrap().id;
        assert_eq!(graph.neighbours(origin).len(), 1);
    }

    #[test]
    fn test_find_path_straight_and_diagonal() {
        let graph = AreaGraph::grid(5, 5, |_, _| true);
        let from = graph.nearest_node(Vector::ZERO).unwrap().id;
        let to = graph.nearest_node(Vector::new(3.0, 3.0)).unwrap().id;
        let path = graph.find_path(from, to).unwrap();
        assert_eq!(
            path,
            vec![Vector::new(1.0, 1.0), Vector::new(2.0, 2.0), Vector::new(3.0, 3.0)]
        );
        assert_eq!(graph.find_path(from, from), Some(vec![]));
    }

    #[test]
    fn test_find_path_around_wall() {
        // wall at x=1 except the bottom row
        let area = Area::grid("walled", 3, 3, &[(1, 0), (1, 1)]).unwrap();
        let path = area.find_path_between(Vector::ZERO, Vector::new(2.0, 0.0)).unwrap();
        assert_eq!(path.last(), Some(&Vector::new(2.0, 0.0)));
        assert!(path.contains(&Vector::new(1.0, 2.0)));
        assert!(!path.contains(&Vector::new(1.0, 1.0)));
    }

    #[test]
    fn test_unreachable() {
        let area = Area::grid("split", 3, 1, &[(1, 0)]).unwrap();
        assert_eq!(area.find_path_between(Vector::ZERO, Vector::new(2.0, 0.0)), None);
    }

    #[test]
    fn test_nearest_node_off_grid() {
        let area = Area::grid("small", 2, 2, &[]).unwrap();
        let node = area.graph.nearest_node(Vector::new(10.0, 10.0)).unwrap();
        assert_eq!(node.vector, Vector::new(1.0, 1.0));
    }

    #[test]
    fn test_area_errors() {
        assert_eq!(
            Area::grid("solid", 1, 1, &[(0, 0)]).unwrap_err(),
            AreaError::Empty("solid".into())
        );
        assert!(matches!(
            Area::grid("oob", 1, 1, &[(5, 0)]),
            Err(AreaError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_start_is_walkable_center() {
        let area = Area::grid("room", 5, 5, &[(2, 2)]).unwrap();
        assert!(area.graph.nearest_node(area.start).is_some());
        assert_ne!(area.start, Vector::new(2.0, 2.0));
    }
}
