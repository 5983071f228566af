//! The geometry source consumed by the build pipeline.

use glam::Vec3A;

use crate::{Aabb3d, AreaType, ChunkyTriMesh, ConvexVolume, TriMesh};

/// A link between two points the voxelized surface cannot connect on its own, like a jump or a
/// ladder.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct OffMeshConnection {
    /// The start point `[Units: wu]`
    pub start: Vec3A,
    /// The end point `[Units: wu]`
    pub end: Vec3A,
    /// The radius around the endpoints within which the connection snaps to the navmesh. `[Units:
    /// wu]`
    pub radius: f32,
    /// Whether the connection can be traversed from `end` to `start` as well.
    pub bidirectional: bool,
    /// The area id of the connection
    pub area: AreaType,
    /// The polygon flags of the connection
    pub flags: u16,
    /// An id chosen by the user, stored in the tile.
    pub user_id: u32,
}

/// Triangle soup plus everything that gets stamped onto the navmesh while building it.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct InputGeometry {
    /// The triangles
    pub mesh: TriMesh,
    /// Spatial index over [`Self::mesh`]
    pub chunky_mesh: ChunkyTriMesh,
    /// Volumes marking areas on the navmesh
    pub convex_volumes: Vec<ConvexVolume>,
    /// Links packed into the tile as off-mesh polygons
    pub off_mesh_connections: Vec<OffMeshConnection>,
    aabb: Aabb3d,
}

impl InputGeometry {
    /// Indexes `mesh` for tile builds. Returns `None` if the mesh has no vertices.
    pub fn new(mesh: TriMesh) -> Option<Self> {
        let aabb = mesh.compute_aabb()?;
        let chunky_mesh = ChunkyTriMesh::new(&mesh, ChunkyTriMesh::DEFAULT_TRIS_PER_CHUNK);
        Some(Self {
            mesh,
            chunky_mesh,
            convex_volumes: Vec::new(),
            off_mesh_connections: Vec::new(),
            aabb,
        })
    }

    /// The bounds of the mesh.
    pub fn aabb(&self) -> Aabb3d {
        self.aabb
    }

    /// The lower corner of the mesh bounds.
    pub fn bounds_min(&self) -> Vec3A {
        self.aabb.min
    }

    /// The upper corner of the mesh bounds.
    pub fn bounds_max(&self) -> Vec3A {
        self.aabb.max
    }

    /// Adds a volume that marks its area on the compact heightfield.
    pub fn add_convex_volume(&mut self, volume: ConvexVolume) {
        self.convex_volumes.push(volume);
    }

    /// Removes and returns the volume at `index`, if any.
    pub fn delete_convex_volume(&mut self, index: usize) -> Option<ConvexVolume> {
        (index < self.convex_volumes.len()).then(|| self.convex_volumes.remove(index))
    }

    /// Adds a link that is packed into the tile.
    pub fn add_off_mesh_connection(&mut self, connection: OffMeshConnection) {
        self.off_mesh_connections.push(connection);
    }

    /// Removes and returns the connection at `index`, if any.
    pub fn delete_off_mesh_connection(&mut self, index: usize) -> Option<OffMeshConnection> {
        (index < self.off_mesh_connections.len()).then(|| self.off_mesh_connections.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;

    fn quad() -> TriMesh {
        TriMesh::from_buffers(
            &[0.0, 0.0, 0.0, 0.0, 0.0, 4.0, 4.0, 1.0, 4.0, 4.0, 0.0, 0.0],
            &[0, 1, 2, 0, 2, 3],
        )
    }

    #[test]
    fn bounds_follow_the_mesh() {
        let geometry = InputGeometry::new(quad()).unwrap();
        assert_eq!(geometry.bounds_min(), Vec3A::ZERO);
        assert_eq!(geometry.bounds_max(), Vec3A::new(4.0, 1.0, 4.0));
        assert_eq!(geometry.chunky_mesh.triangles.len(), 2);
    }

    #[test]
    fn empty_mesh_has_no_geometry() {
        assert!(InputGeometry::new(TriMesh::default()).is_none());
    }

    #[test]
    fn volumes_and_connections_can_be_removed() {
        let mut geometry = InputGeometry::new(quad()).unwrap();
        geometry.add_convex_volume(ConvexVolume {
            vertices: vec![Vec2::ZERO, Vec2::X, Vec2::Y],
            min_y: 0.0,
            max_y: 1.0,
            area: AreaType(3),
        });
        geometry.add_off_mesh_connection(OffMeshConnection {
            start: Vec3A::ZERO,
            end: Vec3A::ONE,
            radius: 0.5,
            bidirectional: true,
            area: AreaType(5),
            flags: 0x08,
            user_id: 7,
        });
        assert_eq!(geometry.delete_convex_volume(1), None);
        assert_eq!(geometry.delete_convex_volume(0).map(|v| v.area), Some(AreaType(3)));
        assert_eq!(geometry.delete_off_mesh_connection(0).map(|c| c.user_id), Some(7));
        assert!(geometry.off_mesh_connections.is_empty());
    }
}
