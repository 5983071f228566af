//! A bounding-volume tree over the xz-footprints of a [`TriMesh`]'s triangles.
//!
//! Triangles are grouped into leaf chunks of bounded size so that a tile build only
//! has to look at the triangles overlapping its own footprint.

use glam::{Vec2, Vec3Swizzles as _};

use crate::{Aabb2d, TriMesh};

/// A node of a [`ChunkyTriMesh`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ChunkyTriMeshNode {
    /// The xz-bounds of every triangle below this node.
    pub aabb: Aabb2d,
    /// Whether this is a leaf or how many nodes to skip to leave the subtree.
    pub kind: ChunkKind,
}

/// See [`ChunkyTriMeshNode::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum ChunkKind {
    /// A chunk of triangles stored at `triangles[start..start + count]`.
    Leaf {
        /// The first entry in [`ChunkyTriMesh::triangles`]
        start: usize,
        /// The number of triangles in the chunk
        count: usize,
    },
    /// An inner node. The subtree spans `escape` nodes, this one included.
    Internal {
        /// The offset to the next node outside of this subtree
        escape: usize,
    },
}

/// Spatial index of a [`TriMesh`] used for rectangle overlap queries.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ChunkyTriMesh {
    /// The tree in depth-first order.
    pub nodes: Vec<ChunkyTriMeshNode>,
    /// Triangle indices into [`TriMesh::indices`], grouped by leaf.
    pub triangles: Vec<usize>,
    /// The largest number of triangles in any leaf.
    pub max_tris_per_chunk: usize,
}

struct BoundsItem {
    aabb: Aabb2d,
    triangle: usize,
}

impl ChunkyTriMesh {
    /// The default leaf size.
    pub const DEFAULT_TRIS_PER_CHUNK: usize = 256;

    /// Builds the tree with at most `tris_per_chunk` triangles per leaf.
    pub fn new(trimesh: &TriMesh, tris_per_chunk: usize) -> Self {
        let tris_per_chunk = tris_per_chunk.max(1);
        let mut items: Vec<BoundsItem> = trimesh
            .indices
            .iter()
            .enumerate()
            .map(|(triangle, indices)| {
                let a = trimesh.vertices[indices.x as usize].xz();
                let b = trimesh.vertices[indices.y as usize].xz();
                let c = trimesh.vertices[indices.z as usize].xz();
                BoundsItem {
                    aabb: Aabb2d {
                        min: a.min(b).min(c),
                        max: a.max(b).max(c),
                    },
                    triangle,
                }
            })
            .collect();

        let mut chunky = ChunkyTriMesh {
            nodes: Vec::with_capacity(trimesh.indices.len().div_ceil(tris_per_chunk) * 4),
            triangles: Vec::with_capacity(trimesh.indices.len()),
            max_tris_per_chunk: 0,
        };
        if items.is_empty() {
            return chunky;
        }
        chunky.subdivide(&mut items, tris_per_chunk);
        chunky.max_tris_per_chunk = chunky
            .nodes
            .iter()
            .filter_map(|node| match node.kind {
                ChunkKind::Leaf { count, .. } => Some(count),
                ChunkKind::Internal { .. } => None,
            })
            .max()
            .unwrap_or_default();
        chunky
    }

    fn subdivide(&mut self, items: &mut [BoundsItem], tris_per_chunk: usize) {
        let aabb = items
            .iter()
            .skip(1)
            .fold(items[0].aabb, |acc, item| acc.union(&item.aabb));
        let node_index = self.nodes.len();
        if items.len() <= tris_per_chunk {
            self.nodes.push(ChunkyTriMeshNode {
                aabb,
                kind: ChunkKind::Leaf {
                    start: self.triangles.len(),
                    count: items.len(),
                },
            });
            self.triangles.extend(items.iter().map(|item| item.triangle));
            return;
        }

        self.nodes.push(ChunkyTriMeshNode {
            aabb,
            kind: ChunkKind::Internal { escape: 1 },
        });
        let extent = aabb.max - aabb.min;
        if extent.x >= extent.y {
            items.sort_by(|a, b| a.aabb.min.x.total_cmp(&b.aabb.min.x));
        } else {
            items.sort_by(|a, b| a.aabb.min.y.total_cmp(&b.aabb.min.y));
        }
        let split = items.len() / 2;
        let (left, right) = items.split_at_mut(split);
        self.subdivide(left, tris_per_chunk);
        self.subdivide(right, tris_per_chunk);
        let escape = self.nodes.len() - node_index;
        self.nodes[node_index].kind = ChunkKind::Internal { escape };
    }

    /// Returns the indices of the leaf nodes whose bounds overlap the rectangle.
    pub fn chunks_overlapping_rect(&self, min: Vec2, max: Vec2) -> Vec<usize> {
        let rect = Aabb2d { min, max };
        self.collect_leaves(|node| node.aabb.intersects(&rect))
    }

    /// Returns the indices of the leaf nodes whose bounds are crossed by the segment `p..q`.
    pub fn chunks_overlapping_segment(&self, p: Vec2, q: Vec2) -> Vec<usize> {
        self.collect_leaves(|node| segment_intersects_rect(p, q, &node.aabb))
    }

    /// The triangles of a leaf node, as indices into [`TriMesh::indices`].
    pub fn chunk_triangles(&self, node: usize) -> &[usize] {
        match self.nodes.get(node).map(|node| node.kind) {
            Some(ChunkKind::Leaf { start, count }) => &self.triangles[start..start + count],
            _ => &[],
        }
    }

    fn collect_leaves(&self, overlaps: impl Fn(&ChunkyTriMeshNode) -> bool) -> Vec<usize> {
        let mut ids = Vec::new();
        let mut i = 0;
        while i < self.nodes.len() {
            let node = &self.nodes[i];
            let overlap = overlaps(node);
            match node.kind {
                ChunkKind::Leaf { .. } => {
                    if overlap {
                        ids.push(i);
                    }
                    i += 1;
                }
                ChunkKind::Internal { .. } if overlap => i += 1,
                ChunkKind::Internal { escape } => i += escape,
            }
        }
        ids
    }
}

fn segment_intersects_rect(p: Vec2, q: Vec2, rect: &Aabb2d) -> bool {
    const EPSILON: f32 = 1e-6;
    let mut tmin = 0.0_f32;
    let mut tmax = 1.0_f32;
    let d = q - p;
    for axis in 0..2 {
        if d[axis].abs() < EPSILON {
            // Parallel to the slab.
            if p[axis] < rect.min[axis] || p[axis] > rect.max[axis] {
                return false;
            }
        } else {
            let ood = 1.0 / d[axis];
            let mut t1 = (rect.min[axis] - p[axis]) * ood;
            let mut t2 = (rect.max[axis] - p[axis]) * ood;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            tmin = tmin.max(t1);
            tmax = tmax.min(t2);
            if tmin > tmax {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3A};

    use super::*;
    use crate::AreaType;

    /// A row of `n` unit triangles along the x-axis.
    fn strip(n: u32) -> TriMesh {
        let mut trimesh = TriMesh::default();
        for i in 0..n {
            let x = i as f32;
            let base = trimesh.vertices.len() as u32;
            trimesh.vertices.extend([
                Vec3A::new(x, 0.0, 0.0),
                Vec3A::new(x, 0.0, 1.0),
                Vec3A::new(x + 1.0, 0.0, 0.0),
            ]);
            trimesh.indices.push(UVec3::new(base, base + 1, base + 2));
            trimesh.area_types.push(AreaType::DEFAULT_WALKABLE);
        }
        trimesh
    }

    #[test]
    fn every_triangle_lands_in_exactly_one_leaf() {
        let chunky = ChunkyTriMesh::new(&strip(100), 8);
        let mut seen: Vec<_> = chunky.triangles.clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        assert!(chunky.max_tris_per_chunk <= 8);
    }

    #[test]
    fn rect_query_only_returns_nearby_chunks() {
        let chunky = ChunkyTriMesh::new(&strip(100), 8);
        let ids = chunky.chunks_overlapping_rect(Vec2::new(10.2, 0.2), Vec2::new(10.8, 0.8));
        assert!(!ids.is_empty());
        let triangles: Vec<_> = ids
            .iter()
            .flat_map(|id| chunky.chunk_triangles(*id).iter().copied())
            .collect();
        assert!(triangles.contains(&10));
        assert!(triangles.len() < 100);
    }

    #[test]
    fn rect_query_outside_returns_nothing() {
        let chunky = ChunkyTriMesh::new(&strip(20), 4);
        let ids = chunky.chunks_overlapping_rect(Vec2::new(50.0, 50.0), Vec2::new(60.0, 60.0));
        assert!(ids.is_empty());
    }

    #[test]
    fn segment_query_finds_crossed_chunks() {
        let chunky = ChunkyTriMesh::new(&strip(20), 4);
        let ids = chunky.chunks_overlapping_segment(Vec2::new(2.5, -1.0), Vec2::new(2.5, 2.0));
        assert!(!ids.is_empty());
        let ids = chunky.chunks_overlapping_segment(Vec2::new(-5.0, 5.0), Vec2::new(30.0, 5.0));
        assert!(ids.is_empty());
    }
}
