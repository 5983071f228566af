//! The binary tile layout shared by the tile builder and the navmesh.
//!
//! A tile is a header followed by tightly packed little-endian arrays:
//! vertices, polygons, detail sub-meshes, detail vertices, detail triangles, BV nodes and
//! off-mesh connections. Links are not stored, the navmesh rebuilds them when a tile is added.

use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt as _, WriteBytesExt as _};
use glam::Vec3;
use thiserror::Error;

/// Tile data magic, `'D' << 24 | 'N' << 16 | 'A' << 8 | 'V'`.
pub const NAVMESH_MAGIC: u32 = u32::from_be_bytes(*b"DNAV");
/// Tile data version.
pub const NAVMESH_VERSION: u32 = 7;
/// The maximum number of vertices per navmesh polygon.
pub const VERTS_PER_POLYGON: usize = 6;
/// Set on a polygon neighbor slot whose edge may link into a neighboring tile.
/// The low bits hold the side of the tile the edge lies on.
pub const EXT_LINK: u16 = 0x8000;
/// Set in [`OffMeshConnection::flags`] when the connection can be traversed both ways.
pub const OFFMESH_CON_BIDIR: u8 = 1;
/// Set on an edge of a detail triangle that lies on the boundary of its polygon.
pub const DETAIL_EDGE_BOUNDARY: u8 = 0x01;

const HEADER_SIZE: usize = 100;
const POLY_SIZE: usize = 32;
const DETAIL_MESH_SIZE: usize = 12;
const BV_NODE_SIZE: usize = 16;
const OFF_MESH_CON_SIZE: usize = 36;

/// What a [`Poly`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum PolyType {
    /// A convex polygon on the ground
    #[default]
    Ground = 0,
    /// A two-vertex polygon standing in for an [`OffMeshConnection`]
    OffMeshConnection = 1,
}

/// A navmesh polygon.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Poly {
    /// Indices into [`MeshTileData::vertices`]. Only the first [`Self::vertex_count`] are used.
    pub vertices: [u16; VERTS_PER_POLYGON],
    /// For each edge: `0` if it is a wall, `1 + index` of the neighbor polygon inside the tile,
    /// or [`EXT_LINK`] combined with the tile side for edges on the tile border.
    pub neighbors: [u16; VERTS_PER_POLYGON],
    /// User defined flags
    pub flags: u16,
    /// The number of vertices
    pub vertex_count: u8,
    /// The area id. `[Limit: < 64]`
    pub area: u8,
    /// The kind of polygon
    pub poly_type: PolyType,
}

impl Poly {
    /// The used vertex indices.
    #[inline]
    pub fn vertex_indices(&self) -> &[u16] {
        &self.vertices[..usize::from(self.vertex_count)]
    }

    /// Whether this polygon stands in for an off-mesh connection.
    #[inline]
    pub fn is_off_mesh_connection(&self) -> bool {
        self.poly_type == PolyType::OffMeshConnection
    }

    fn area_and_type(&self) -> u8 {
        (self.area & 0x3f) | ((self.poly_type as u8) << 6)
    }
}

/// The slice of the detail arrays that belongs to one polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyDetail {
    /// Offset into [`MeshTileData::detail_vertices`]
    pub vertex_base: u32,
    /// Offset into [`MeshTileData::detail_triangles`]
    pub triangle_base: u32,
    /// Number of extra vertices. The polygon's own vertices are not repeated.
    pub vertex_count: u8,
    /// Number of triangles
    pub triangle_count: u8,
}

/// A node of the bounding volume tree over the tile's polygons.
///
/// Bounds are quantized relative to the tile bounds with [`MeshHeader::bv_quant_factor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct BvNode {
    /// Minimum quantized bounds
    pub bmin: [u16; 3],
    /// Maximum quantized bounds
    pub bmax: [u16; 3],
    /// The polygon index for leaves, the negated escape offset for internal nodes.
    pub index: i32,
}

impl BvNode {
    /// Whether the node holds a polygon.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.index >= 0
    }
}

/// A connection between two points that do not share navmesh, stored in the tile of its start.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct OffMeshConnection {
    /// The start point
    pub start: Vec3,
    /// The end point
    pub end: Vec3,
    /// The snap radius of the endpoints
    pub radius: f32,
    /// The index of the polygon standing in for this connection
    pub poly: u16,
    /// [`OFFMESH_CON_BIDIR`] if the connection goes both ways
    pub flags: u8,
    /// The tile side the end point lies on, `0xff` if it is inside the tile
    pub side: u8,
    /// An id chosen by the user
    pub user_id: u32,
}

impl OffMeshConnection {
    /// Whether the connection can be traversed from end to start.
    #[inline]
    pub fn is_bidirectional(&self) -> bool {
        self.flags & OFFMESH_CON_BIDIR != 0
    }
}

/// Describes a tile.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct MeshHeader {
    /// Tile x coordinate in the tile grid
    pub x: i32,
    /// Tile y coordinate in the tile grid. Runs along the world z-axis.
    pub y: i32,
    /// The layer of the tile at its grid location
    pub layer: i32,
    /// An id chosen by the user
    pub user_id: u32,
    /// The number of links the tile may need
    pub max_link_count: u32,
    /// Index of the first off-mesh connection polygon. All polygons before it are ground polygons.
    pub off_mesh_base: u32,
    /// Agent height `[Units: wu]`
    pub walkable_height: f32,
    /// Agent radius `[Units: wu]`
    pub walkable_radius: f32,
    /// Agent climb `[Units: wu]`
    pub walkable_climb: f32,
    /// Minimum bounds of the tile
    pub bmin: Vec3,
    /// Maximum bounds of the tile
    pub bmax: Vec3,
    /// Converts world units relative to [`Self::bmin`] into BV tree units.
    pub bv_quant_factor: f32,
}

/// The contents of one navmesh tile.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct MeshTileData {
    /// The header
    pub header: MeshHeader,
    /// Polygon vertices, ground polygons first, then two per off-mesh connection.
    pub vertices: Vec<Vec3>,
    /// Ground polygons followed by off-mesh connection polygons
    pub polygons: Vec<Poly>,
    /// One entry per ground polygon
    pub detail_meshes: Vec<PolyDetail>,
    /// Extra detail vertices
    pub detail_vertices: Vec<Vec3>,
    /// Detail triangles: three vertex indices and the edge flags.
    ///
    /// An index below the polygon's vertex count refers to a polygon vertex, the rest refer to
    /// [`Self::detail_vertices`] starting at [`PolyDetail::vertex_base`].
    pub detail_triangles: Vec<[u8; 4]>,
    /// The bounding volume tree, empty if it was not built
    pub bv_tree: Vec<BvNode>,
    /// Off-mesh connections starting in this tile
    pub off_mesh_connections: Vec<OffMeshConnection>,
}

impl MeshTileData {
    /// The positions of the polygon's vertices.
    pub fn poly_vertices(&self, poly: &Poly) -> Vec<Vec3> {
        poly.vertex_indices()
            .iter()
            .map(|i| self.vertices[usize::from(*i)])
            .collect()
    }

    /// The vertices of detail triangle `triangle` of polygon `poly_index`.
    pub fn detail_triangle(&self, poly_index: usize, triangle: usize) -> [Vec3; 3] {
        let poly = &self.polygons[poly_index];
        let detail = &self.detail_meshes[poly_index];
        let tri = self.detail_triangles[detail.triangle_base as usize + triangle];
        std::array::from_fn(|k| {
            let v = tri[k];
            if v < poly.vertex_count {
                self.vertices[usize::from(poly.vertices[usize::from(v)])]
            } else {
                let extra = usize::from(v - poly.vertex_count);
                self.detail_vertices[detail.vertex_base as usize + extra]
            }
        })
    }

    /// The number of bytes [`Self::to_bytes`] produces.
    pub fn byte_len(&self) -> usize {
        HEADER_SIZE
            + self.vertices.len() * 12
            + self.polygons.len() * POLY_SIZE
            + self.detail_meshes.len() * DETAIL_MESH_SIZE
            + self.detail_vertices.len() * 12
            + self.detail_triangles.len() * 4
            + self.bv_tree.len() * BV_NODE_SIZE
            + self.off_mesh_connections.len() * OFF_MESH_CON_SIZE
    }

    /// Serializes the tile.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_len());
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut bytes);
        bytes
    }

    /// Parses and validates a tile produced by [`Self::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TileDataError> {
        let mut reader = Cursor::new(bytes);
        let data = Self::read_from(&mut reader).map_err(|e| match e {
            TileDataError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                TileDataError::Truncated
            }
            e => e,
        })?;
        if reader.position() as usize != bytes.len() {
            return Err(TileDataError::Corrupt("trailing bytes after tile data"));
        }
        data.validate()?;
        Ok(data)
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let h = &self.header;
        w.write_u32::<LittleEndian>(NAVMESH_MAGIC)?;
        w.write_u32::<LittleEndian>(NAVMESH_VERSION)?;
        w.write_i32::<LittleEndian>(h.x)?;
        w.write_i32::<LittleEndian>(h.y)?;
        w.write_i32::<LittleEndian>(h.layer)?;
        w.write_u32::<LittleEndian>(h.user_id)?;
        w.write_u32::<LittleEndian>(self.polygons.len() as u32)?;
        w.write_u32::<LittleEndian>(self.vertices.len() as u32)?;
        w.write_u32::<LittleEndian>(h.max_link_count)?;
        w.write_u32::<LittleEndian>(self.detail_meshes.len() as u32)?;
        w.write_u32::<LittleEndian>(self.detail_vertices.len() as u32)?;
        w.write_u32::<LittleEndian>(self.detail_triangles.len() as u32)?;
        w.write_u32::<LittleEndian>(self.bv_tree.len() as u32)?;
        w.write_u32::<LittleEndian>(self.off_mesh_connections.len() as u32)?;
        w.write_u32::<LittleEndian>(h.off_mesh_base)?;
        w.write_f32::<LittleEndian>(h.walkable_height)?;
        w.write_f32::<LittleEndian>(h.walkable_radius)?;
        w.write_f32::<LittleEndian>(h.walkable_climb)?;
        write_vec3(w, h.bmin)?;
        write_vec3(w, h.bmax)?;
        w.write_f32::<LittleEndian>(h.bv_quant_factor)?;

        for v in &self.vertices {
            write_vec3(w, *v)?;
        }
        for poly in &self.polygons {
            // First link slot, links are rebuilt at runtime.
            w.write_u32::<LittleEndian>(u32::MAX)?;
            for v in poly.vertices {
                w.write_u16::<LittleEndian>(v)?;
            }
            for n in poly.neighbors {
                w.write_u16::<LittleEndian>(n)?;
            }
            w.write_u16::<LittleEndian>(poly.flags)?;
            w.write_u8(poly.vertex_count)?;
            w.write_u8(poly.area_and_type())?;
        }
        for detail in &self.detail_meshes {
            w.write_u32::<LittleEndian>(detail.vertex_base)?;
            w.write_u32::<LittleEndian>(detail.triangle_base)?;
            w.write_u8(detail.vertex_count)?;
            w.write_u8(detail.triangle_count)?;
            w.write_u16::<LittleEndian>(0)?;
        }
        for v in &self.detail_vertices {
            write_vec3(w, *v)?;
        }
        for tri in &self.detail_triangles {
            w.write_all(tri)?;
        }
        for node in &self.bv_tree {
            for v in node.bmin.iter().chain(&node.bmax) {
                w.write_u16::<LittleEndian>(*v)?;
            }
            w.write_i32::<LittleEndian>(node.index)?;
        }
        for con in &self.off_mesh_connections {
            write_vec3(w, con.start)?;
            write_vec3(w, con.end)?;
            w.write_f32::<LittleEndian>(con.radius)?;
            w.write_u16::<LittleEndian>(con.poly)?;
            w.write_u8(con.flags)?;
            w.write_u8(con.side)?;
            w.write_u32::<LittleEndian>(con.user_id)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self, TileDataError> {
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != NAVMESH_MAGIC {
            return Err(TileDataError::WrongMagic(magic));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != NAVMESH_VERSION {
            return Err(TileDataError::WrongVersion(version));
        }
        let x = r.read_i32::<LittleEndian>()?;
        let y = r.read_i32::<LittleEndian>()?;
        let layer = r.read_i32::<LittleEndian>()?;
        let user_id = r.read_u32::<LittleEndian>()?;
        let poly_count = r.read_u32::<LittleEndian>()? as usize;
        let vert_count = r.read_u32::<LittleEndian>()? as usize;
        let max_link_count = r.read_u32::<LittleEndian>()?;
        let detail_mesh_count = r.read_u32::<LittleEndian>()? as usize;
        let detail_vert_count = r.read_u32::<LittleEndian>()? as usize;
        let detail_tri_count = r.read_u32::<LittleEndian>()? as usize;
        let bv_node_count = r.read_u32::<LittleEndian>()? as usize;
        let off_mesh_con_count = r.read_u32::<LittleEndian>()? as usize;
        let off_mesh_base = r.read_u32::<LittleEndian>()?;
        let header = MeshHeader {
            x,
            y,
            layer,
            user_id,
            max_link_count,
            off_mesh_base,
            walkable_height: r.read_f32::<LittleEndian>()?,
            walkable_radius: r.read_f32::<LittleEndian>()?,
            walkable_climb: r.read_f32::<LittleEndian>()?,
            bmin: read_vec3(r)?,
            bmax: read_vec3(r)?,
            bv_quant_factor: r.read_f32::<LittleEndian>()?,
        };

        let vertices = (0..vert_count)
            .map(|_| read_vec3(r))
            .collect::<io::Result<_>>()?;
        let polygons = (0..poly_count)
            .map(|_| read_poly(r))
            .collect::<Result<_, _>>()?;
        let detail_meshes = (0..detail_mesh_count)
            .map(|_| {
                let detail = PolyDetail {
                    vertex_base: r.read_u32::<LittleEndian>()?,
                    triangle_base: r.read_u32::<LittleEndian>()?,
                    vertex_count: r.read_u8()?,
                    triangle_count: r.read_u8()?,
                };
                r.read_u16::<LittleEndian>()?;
                Ok(detail)
            })
            .collect::<io::Result<_>>()?;
        let detail_vertices = (0..detail_vert_count)
            .map(|_| read_vec3(r))
            .collect::<io::Result<_>>()?;
        let detail_triangles = (0..detail_tri_count)
            .map(|_| {
                let mut tri = [0; 4];
                r.read_exact(&mut tri)?;
                Ok(tri)
            })
            .collect::<io::Result<_>>()?;
        let bv_tree = (0..bv_node_count)
            .map(|_| {
                let mut bounds = [0; 6];
                r.read_u16_into::<LittleEndian>(&mut bounds)?;
                Ok(BvNode {
                    bmin: [bounds[0], bounds[1], bounds[2]],
                    bmax: [bounds[3], bounds[4], bounds[5]],
                    index: r.read_i32::<LittleEndian>()?,
                })
            })
            .collect::<io::Result<_>>()?;
        let off_mesh_connections = (0..off_mesh_con_count)
            .map(|_| {
                Ok(OffMeshConnection {
                    start: read_vec3(r)?,
                    end: read_vec3(r)?,
                    radius: r.read_f32::<LittleEndian>()?,
                    poly: r.read_u16::<LittleEndian>()?,
                    flags: r.read_u8()?,
                    side: r.read_u8()?,
                    user_id: r.read_u32::<LittleEndian>()?,
                })
            })
            .collect::<io::Result<_>>()?;

        Ok(Self {
            header,
            vertices,
            polygons,
            detail_meshes,
            detail_vertices,
            detail_triangles,
            bv_tree,
            off_mesh_connections,
        })
    }

    /// Checks that every index stored in the tile points into its arrays.
    pub fn validate(&self) -> Result<(), TileDataError> {
        let off_mesh_base = self.header.off_mesh_base as usize;
        if off_mesh_base > self.polygons.len() {
            return Err(TileDataError::Corrupt("off-mesh base past the polygon count"));
        }
        if self.detail_meshes.len() != off_mesh_base {
            return Err(TileDataError::Corrupt(
                "detail mesh count differs from ground polygon count",
            ));
        }
        for (i, poly) in self.polygons.iter().enumerate() {
            let expected = if i < off_mesh_base {
                PolyType::Ground
            } else {
                PolyType::OffMeshConnection
            };
            if poly.poly_type != expected || usize::from(poly.vertex_count) > VERTS_PER_POLYGON {
                return Err(TileDataError::Corrupt("malformed polygon"));
            }
            if poly.vertex_indices().iter().any(|v| usize::from(*v) >= self.vertices.len()) {
                return Err(TileDataError::Corrupt("polygon vertex out of range"));
            }
            let internal_neighbor_out_of_range = poly.neighbors[..usize::from(poly.vertex_count)]
                .iter()
                .any(|n| *n & EXT_LINK == 0 && usize::from(*n) > self.polygons.len());
            if internal_neighbor_out_of_range {
                return Err(TileDataError::Corrupt("polygon neighbor out of range"));
            }
        }
        for (detail, poly) in self.detail_meshes.iter().zip(&self.polygons) {
            let verts_end = detail.vertex_base as usize + usize::from(detail.vertex_count);
            let tris_end = detail.triangle_base as usize + usize::from(detail.triangle_count);
            if verts_end > self.detail_vertices.len() || tris_end > self.detail_triangles.len() {
                return Err(TileDataError::Corrupt("detail mesh out of range"));
            }
            let vertex_limit = poly.vertex_count + detail.vertex_count;
            let tris = &self.detail_triangles[detail.triangle_base as usize..tris_end];
            if tris.iter().any(|t| t[..3].iter().any(|v| *v >= vertex_limit)) {
                return Err(TileDataError::Corrupt("detail triangle vertex out of range"));
            }
        }
        if self
            .bv_tree
            .iter()
            .any(|n| n.is_leaf() && n.index as usize >= self.polygons.len())
        {
            return Err(TileDataError::Corrupt("BV node polygon out of range"));
        }
        if self
            .off_mesh_connections
            .iter()
            .any(|c| !(off_mesh_base..self.polygons.len()).contains(&usize::from(c.poly)))
        {
            return Err(TileDataError::Corrupt("off-mesh connection polygon out of range"));
        }
        Ok(())
    }
}

fn read_poly<R: Read>(r: &mut R) -> Result<Poly, TileDataError> {
    let _first_link = r.read_u32::<LittleEndian>()?;
    let mut vertices = [0; VERTS_PER_POLYGON];
    r.read_u16_into::<LittleEndian>(&mut vertices)?;
    let mut neighbors = [0; VERTS_PER_POLYGON];
    r.read_u16_into::<LittleEndian>(&mut neighbors)?;
    let flags = r.read_u16::<LittleEndian>()?;
    let vertex_count = r.read_u8()?;
    let area_and_type = r.read_u8()?;
    let poly_type = match area_and_type >> 6 {
        0 => PolyType::Ground,
        1 => PolyType::OffMeshConnection,
        _ => return Err(TileDataError::Corrupt("unknown polygon type")),
    };
    Ok(Poly {
        vertices,
        neighbors,
        flags,
        vertex_count,
        area: area_and_type & 0x3f,
        poly_type,
    })
}

fn write_vec3<W: Write>(w: &mut W, v: Vec3) -> io::Result<()> {
    w.write_f32::<LittleEndian>(v.x)?;
    w.write_f32::<LittleEndian>(v.y)?;
    w.write_f32::<LittleEndian>(v.z)
}

fn read_vec3<R: Read>(r: &mut R) -> io::Result<Vec3> {
    Ok(Vec3::new(
        r.read_f32::<LittleEndian>()?,
        r.read_f32::<LittleEndian>()?,
        r.read_f32::<LittleEndian>()?,
    ))
}

/// Errors that can occur while creating or parsing tile data.
#[derive(Debug, Error)]
pub enum TileDataError {
    /// Navmesh polygons are limited to [`VERTS_PER_POLYGON`] vertices.
    #[error("Polygons have {0} vertices, at most {VERTS_PER_POLYGON} are supported")]
    TooManyVerticesPerPolygon(usize),
    /// Vertex indices are stored in 16 bits.
    #[error("Too many vertices: {0}, a tile can hold at most 65534")]
    TooManyVertices(usize),
    /// The polygon mesh has no vertices or no polygons.
    #[error("The polygon mesh is empty")]
    EmptyMesh,
    /// The arrays passed to the builder disagree on their lengths.
    #[error("Inconsistent parameters: {0}")]
    InconsistentParams(&'static str),
    /// The data does not start with [`NAVMESH_MAGIC`].
    #[error("Wrong tile magic: {0:#010x}")]
    WrongMagic(u32),
    /// The data was written by an incompatible version.
    #[error("Wrong tile version: {0}")]
    WrongVersion(u32),
    /// The data ends before the arrays its header announces.
    #[error("The tile data is truncated")]
    Truncated,
    /// The data is internally inconsistent.
    #[error("Corrupt tile data: {0}")]
    Corrupt(&'static str),
    /// Reading the data failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_tile() -> MeshTileData {
        MeshTileData {
            header: MeshHeader {
                x: 1,
                y: -2,
                max_link_count: 3,
                off_mesh_base: 1,
                walkable_height: 2.0,
                walkable_radius: 0.6,
                walkable_climb: 0.9,
                bmax: Vec3::new(4.0, 1.0, 4.0),
                bv_quant_factor: 1.0 / 0.3,
                ..Default::default()
            },
            vertices: vec![
                Vec3::ZERO,
                Vec3::new(0.0, 0.0, 4.0),
                Vec3::new(4.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(6.0, 0.0, 1.0),
            ],
            polygons: vec![
                Poly {
                    vertices: [0, 1, 2, 0, 0, 0],
                    neighbors: [0, EXT_LINK | 4, 0, 0, 0, 0],
                    flags: 1,
                    vertex_count: 3,
                    area: 5,
                    poly_type: PolyType::Ground,
                },
                Poly {
                    vertices: [3, 4, 0, 0, 0, 0],
                    vertex_count: 2,
                    area: 63,
                    poly_type: PolyType::OffMeshConnection,
                    ..Default::default()
                },
            ],
            detail_meshes: vec![PolyDetail {
                vertex_base: 0,
                triangle_base: 0,
                vertex_count: 0,
                triangle_count: 1,
            }],
            detail_vertices: vec![],
            detail_triangles: vec![[0, 1, 2, 0x15]],
            bv_tree: vec![BvNode {
                bmin: [0, 0, 0],
                bmax: [14, 4, 14],
                index: 0,
            }],
            off_mesh_connections: vec![OffMeshConnection {
                start: Vec3::new(1.0, 0.0, 1.0),
                end: Vec3::new(6.0, 0.0, 1.0),
                radius: 0.5,
                poly: 1,
                flags: OFFMESH_CON_BIDIR,
                side: 0,
                user_id: 42,
            }],
        }
    }

    #[test]
    fn bytes_match_the_announced_layout() {
        let tile = triangle_tile();
        let bytes = tile.to_bytes();
        assert_eq!(bytes.len(), tile.byte_len());
        assert_eq!(&bytes[..4], b"VAND");
        assert_eq!(MeshTileData::from_bytes(&bytes).unwrap(), tile);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut bytes = triangle_tile().to_bytes();
        bytes[0] ^= 0xff;
        assert!(matches!(
            MeshTileData::from_bytes(&bytes),
            Err(TileDataError::WrongMagic(_))
        ));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut bytes = triangle_tile().to_bytes();
        bytes[4] = 6;
        assert!(matches!(
            MeshTileData::from_bytes(&bytes),
            Err(TileDataError::WrongVersion(6))
        ));
    }

    #[test]
    fn truncated_data_is_rejected() {
        let bytes = triangle_tile().to_bytes();
        assert!(matches!(
            MeshTileData::from_bytes(&bytes[..bytes.len() - 1]),
            Err(TileDataError::Truncated)
        ));
    }

    #[test]
    fn dangling_vertex_index_is_corrupt() {
        let mut tile = triangle_tile();
        tile.polygons[0].vertices[2] = 9;
        assert!(matches!(
            MeshTileData::from_bytes(&tile.to_bytes()),
            Err(TileDataError::Corrupt(_))
        ));
    }

    #[test]
    fn detail_triangles_resolve_polygon_vertices() {
        let tile = triangle_tile();
        assert_eq!(
            tile.detail_triangle(0, 0),
            [Vec3::ZERO, Vec3::new(0.0, 0.0, 4.0), Vec3::new(4.0, 0.0, 0.0)]
        );
    }
}
