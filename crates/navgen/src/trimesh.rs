//! The triangle soup consumed by the rasterizer.

use glam::{UVec3, Vec3A};

use crate::{
    math::{Aabb3d, TriangleIndices as _},
    span::AreaType,
};

/// Indexed triangles with one [`AreaType`] per triangle.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    /// Vertex positions. `[Units: wu]`
    pub vertices: Vec<Vec3A>,
    /// Vertex indices, one entry per triangle.
    pub indices: Vec<UVec3>,
    /// Area of each triangle, parallel to [`TriMesh::indices`].
    pub area_types: Vec<AreaType>,
}

impl TriMesh {
    /// Reads `x, y, z` triples and index triples. Leftover values at the end are ignored.
    ///
    /// All triangles start as [`AreaType::NOT_WALKABLE`].
    pub fn from_buffers(vertices: &[f32], indices: &[u32]) -> Self {
        let vertices: Vec<_> = vertices.chunks_exact(3).map(Vec3A::from_slice).collect();
        let indices: Vec<_> = indices.chunks_exact(3).map(UVec3::from_slice).collect();
        Self {
            area_types: vec![AreaType::NOT_WALKABLE; indices.len()],
            vertices,
            indices,
        }
    }

    /// Appends `other`, shifting its indices past the vertices already present.
    pub fn extend(&mut self, other: TriMesh) {
        let offset = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.indices.extend(other.indices.into_iter().map(|triangle| triangle + offset));
        self.area_types.extend(other.area_types);
    }

    /// Bounds of all vertices, `None` without vertices.
    pub fn compute_aabb(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices)
    }

    /// Sets triangles flatter than `max_slope` radians to [`AreaType::DEFAULT_WALKABLE`].
    /// Steeper triangles keep their area.
    pub fn mark_walkable_triangles(&mut self, max_slope: f32) {
        self.retag_by_slope(max_slope, |flat| flat.then_some(AreaType::DEFAULT_WALKABLE));
    }

    /// Sets triangles at least as steep as `max_slope` radians to [`AreaType::NOT_WALKABLE`].
    /// Flatter triangles keep their area.
    pub fn clear_unwalkable_triangles(&mut self, max_slope: f32) {
        self.retag_by_slope(max_slope, |flat| (!flat).then_some(AreaType::NOT_WALKABLE));
    }

    fn retag_by_slope(&mut self, max_slope: f32, area_for: impl Fn(bool) -> Option<AreaType>) {
        let min_up = max_slope.cos();
        for (triangle, area) in self.indices.iter().zip(&mut self.area_types) {
            if let Some(new_area) = area_for(triangle.normal(&self.vertices).y > min_up) {
                *area = new_area;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(height: f32) -> TriMesh {
        TriMesh::from_buffers(
            &[0.0, 0.0, 0.0, 1.0, height, 0.0, 0.0, 0.0, 1.0, 1.0, height, 1.0],
            &[0, 2, 1, 1, 2, 3],
        )
    }

    #[test]
    fn from_buffers_drops_partial_triangles() {
        let trimesh = TriMesh::from_buffers(&[0.0; 10], &[0, 1, 2, 0]);
        assert_eq!(trimesh.vertices.len(), 3);
        assert_eq!(trimesh.indices.len(), 1);
        assert_eq!(trimesh.area_types, vec![AreaType::NOT_WALKABLE]);
    }

    #[test]
    fn gentle_slope_is_walkable() {
        let mut trimesh = ramp(0.5);
        trimesh.mark_walkable_triangles(45.0_f32.to_radians());
        assert!(trimesh.area_types.iter().all(AreaType::is_walkable));
    }

    #[test]
    fn steep_slope_is_not_walkable() {
        let mut trimesh = ramp(2.0);
        trimesh.mark_walkable_triangles(45.0_f32.to_radians());
        assert!(trimesh.area_types.iter().all(|a| !a.is_walkable()));
    }

    #[test]
    fn extend_offsets_indices() {
        let mut a = ramp(0.0);
        a.extend(ramp(0.0));
        assert_eq!(a.vertices.len(), 8);
        assert_eq!(a.indices[2], UVec3::new(4, 6, 5));
        assert_eq!(a.area_types.len(), 4);
    }
}
