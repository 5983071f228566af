//! Packs a polygon mesh and its detail mesh into tile data.

use glam::{U16Vec3, Vec3};

use crate::tile_data::{
    BvNode, EXT_LINK, MeshHeader, MeshTileData, OFFMESH_CON_BIDIR, OffMeshConnection, Poly,
    PolyDetail, PolyType, TileDataError, VERTS_PER_POLYGON,
};

const MESH_NULL_IDX: u16 = 0xffff;
const MESH_PORTAL_FLAG: u16 = 0x8000;
/// Returned by [`classify_off_mesh_point`] for points inside the tile.
const INSIDE_TILE: u8 = 0xff;

/// A range of the detail arrays belonging to one polygon.
///
/// The first vertices of the range repeat the polygon's own vertices, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailSubMesh {
    /// Index of the first vertex in [`NavMeshCreateParams::detail_vertices`]
    pub first_vertex: u32,
    /// Number of vertices
    pub vertex_count: u32,
    /// Index of the first triangle in [`NavMeshCreateParams::detail_triangles`]
    pub first_triangle: u32,
    /// Number of triangles
    pub triangle_count: u32,
}

/// An off-mesh connection to pack into a tile.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct OffMeshConnectionParams {
    /// The start point `[Units: wu]`
    pub start: Vec3,
    /// The end point `[Units: wu]`
    pub end: Vec3,
    /// The snap radius of the endpoints `[Units: wu]`
    pub radius: f32,
    /// Whether the connection can be traversed from end to start
    pub bidirectional: bool,
    /// The area id
    pub area: u8,
    /// The polygon flags
    pub flags: u16,
    /// An id chosen by the user
    pub user_id: u32,
}

/// Everything needed to build the data of one tile.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMeshCreateParams {
    /// Polygon mesh vertices. `[Units: vx]` relative to [`Self::bmin`]
    pub vertices: Vec<U16Vec3>,
    /// Polygon mesh polygons, `2 * max_vertices_per_polygon` entries per polygon:
    /// vertex indices padded with `0xffff`, then per edge the neighbor index, `0xffff`
    /// or `0x8000 | side` for edges on the tile border.
    pub polygons: Vec<u16>,
    /// Flags per polygon
    pub poly_flags: Vec<u16>,
    /// Area id per polygon
    pub poly_areas: Vec<u8>,
    /// The vertex slots per polygon in [`Self::polygons`]
    pub max_vertices_per_polygon: usize,
    /// Detail sub-mesh per polygon. Leave empty to triangulate the polygons directly.
    pub detail_meshes: Vec<DetailSubMesh>,
    /// Detail vertices `[Units: wu]`
    pub detail_vertices: Vec<Vec3>,
    /// Detail triangles: three indices local to the sub-mesh and the edge flags
    pub detail_triangles: Vec<[u8; 4]>,
    /// Off-mesh connections. Only those starting inside the tile are stored.
    pub off_mesh_connections: Vec<OffMeshConnectionParams>,
    /// An id chosen by the user
    pub user_id: u32,
    /// Tile x coordinate
    pub tile_x: i32,
    /// Tile y coordinate
    pub tile_y: i32,
    /// Tile layer
    pub tile_layer: i32,
    /// Minimum bounds of the tile `[Units: wu]`
    pub bmin: Vec3,
    /// Maximum bounds of the tile `[Units: wu]`
    pub bmax: Vec3,
    /// Agent height `[Units: wu]`
    pub walkable_height: f32,
    /// Agent radius `[Units: wu]`
    pub walkable_radius: f32,
    /// Agent climb `[Units: wu]`
    pub walkable_climb: f32,
    /// Cell size `[Units: wu]`
    pub cell_size: f32,
    /// Cell height `[Units: wu]`
    pub cell_height: f32,
    /// Whether to build a bounding volume tree over the polygons
    pub build_bv_tree: bool,
}

impl NavMeshCreateParams {
    fn polygon(&self, i: usize) -> &[u16] {
        let nvp = self.max_vertices_per_polygon;
        &self.polygons[i * 2 * nvp..i * 2 * nvp + nvp]
    }

    fn neighbors(&self, i: usize) -> &[u16] {
        let nvp = self.max_vertices_per_polygon;
        &self.polygons[(i * 2 + 1) * nvp..(i * 2 + 2) * nvp]
    }

    fn vertex_count(&self, i: usize) -> usize {
        self.polygon(i)
            .iter()
            .take_while(|v| **v != MESH_NULL_IDX)
            .count()
    }

    fn poly_count(&self) -> usize {
        self.poly_areas.len()
    }

    fn validate(&self) -> Result<(), TileDataError> {
        let nvp = self.max_vertices_per_polygon;
        if nvp > VERTS_PER_POLYGON {
            return Err(TileDataError::TooManyVerticesPerPolygon(nvp));
        }
        if self.vertices.len() >= usize::from(MESH_NULL_IDX) {
            return Err(TileDataError::TooManyVertices(self.vertices.len()));
        }
        if self.vertices.is_empty() || self.poly_count() == 0 || nvp < 3 {
            return Err(TileDataError::EmptyMesh);
        }
        if self.polygons.len() != self.poly_count() * 2 * nvp {
            return Err(TileDataError::InconsistentParams("polygon buffer length"));
        }
        if self.poly_flags.len() != self.poly_count() {
            return Err(TileDataError::InconsistentParams("polygon flag count"));
        }
        for i in 0..self.poly_count() {
            let polygon = &self.polygon(i)[..self.vertex_count(i)];
            if polygon.len() < 3 {
                return Err(TileDataError::InconsistentParams("polygon with fewer than 3 vertices"));
            }
            if polygon.iter().any(|v| usize::from(*v) >= self.vertices.len()) {
                return Err(TileDataError::InconsistentParams("polygon vertex index"));
            }
        }
        if !self.detail_meshes.is_empty() {
            if self.detail_meshes.len() != self.poly_count() {
                return Err(TileDataError::InconsistentParams("detail mesh count"));
            }
            for (i, detail) in self.detail_meshes.iter().enumerate() {
                let verts_end = (detail.first_vertex + detail.vertex_count) as usize;
                let tris_end = (detail.first_triangle + detail.triangle_count) as usize;
                let too_small = (detail.vertex_count as usize) < self.vertex_count(i);
                if too_small
                    || verts_end > self.detail_vertices.len()
                    || tris_end > self.detail_triangles.len()
                    || detail.vertex_count > u32::from(u8::MAX)
                    || detail.triangle_count > u32::from(u8::MAX)
                {
                    return Err(TileDataError::InconsistentParams("detail mesh range"));
                }
            }
        }
        Ok(())
    }
}

/// Builds the data of a single tile.
///
/// Off-mesh connections whose start point lies outside the tile are dropped. Without detail
/// meshes every polygon is triangulated as a fan.
///
/// # Errors
///
/// Fails if polygons have more than [`VERTS_PER_POLYGON`] vertices, if the mesh has
/// `0xffff` or more vertices, if it is empty, or if the arrays disagree on their lengths.
pub fn create_nav_mesh_data(params: &NavMeshCreateParams) -> Result<MeshTileData, TileDataError> {
    params.validate()?;
    let poly_count = params.poly_count();

    // Connections may only start in this tile, so classify both ends against the tile bounds.
    // The height range is padded by the climb height to allow a bit of slack.
    let (hmin, hmax) = if params.detail_meshes.is_empty() {
        params.vertices.iter().fold((f32::MAX, f32::MIN), |(lo, hi), v| {
            let h = params.bmin.y + f32::from(v.y) * params.cell_height;
            (lo.min(h), hi.max(h))
        })
    } else {
        params
            .detail_vertices
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.y), hi.max(v.y)))
    };
    let bmin = params.bmin.with_y(hmin - params.walkable_climb);
    let bmax = params.bmax.with_y(hmax + params.walkable_climb);

    let mut classes = Vec::with_capacity(params.off_mesh_connections.len());
    let mut off_mesh_link_count = 0;
    for con in &params.off_mesh_connections {
        let mut start = classify_off_mesh_point(con.start, bmin, bmax);
        let end = classify_off_mesh_point(con.end, bmin, bmax);
        // Starts inside the tile footprint but outside its height range cannot touch the mesh.
        if start == INSIDE_TILE && (con.start.y < bmin.y || con.start.y > bmax.y) {
            start = 0;
        }
        off_mesh_link_count += usize::from(start == INSIDE_TILE) + usize::from(end == INSIDE_TILE);
        classes.push((start, end));
    }
    let stored_cons: Vec<_> = params
        .off_mesh_connections
        .iter()
        .zip(&classes)
        .filter(|(_, (start, _))| *start == INSIDE_TILE)
        .map(|(con, (_, end))| (con, *end))
        .collect();

    let mut edge_count = 0;
    let mut portal_count = 0;
    for i in 0..poly_count {
        let nv = params.vertex_count(i);
        edge_count += nv;
        portal_count += params.neighbors(i)[..nv]
            .iter()
            .filter(|n| **n & MESH_PORTAL_FLAG != 0 && **n != MESH_NULL_IDX && **n & 0xf != 0xf)
            .count();
    }
    let max_link_count = edge_count + portal_count * 2 + off_mesh_link_count * 2;

    let mut vertices: Vec<Vec3> = params
        .vertices
        .iter()
        .map(|v| {
            params.bmin
                + Vec3::new(
                    f32::from(v.x) * params.cell_size,
                    f32::from(v.y) * params.cell_height,
                    f32::from(v.z) * params.cell_size,
                )
        })
        .collect();
    let off_mesh_vertex_base = vertices.len();
    for (con, _) in &stored_cons {
        vertices.push(con.start);
        vertices.push(con.end);
    }

    let mut polygons = Vec::with_capacity(poly_count + stored_cons.len());
    for i in 0..poly_count {
        let nv = params.vertex_count(i);
        let mut poly = Poly {
            flags: params.poly_flags[i],
            vertex_count: nv as u8,
            area: params.poly_areas[i] & 0x3f,
            poly_type: PolyType::Ground,
            ..Default::default()
        };
        for j in 0..nv {
            poly.vertices[j] = params.polygon(i)[j];
            poly.neighbors[j] = packed_neighbor(params.neighbors(i)[j]);
        }
        polygons.push(poly);
    }
    for (n, (con, _)) in stored_cons.iter().enumerate() {
        let first = (off_mesh_vertex_base + n * 2) as u16;
        polygons.push(Poly {
            vertices: [first, first + 1, 0, 0, 0, 0],
            flags: con.flags,
            vertex_count: 2,
            area: con.area & 0x3f,
            poly_type: PolyType::OffMeshConnection,
            ..Default::default()
        });
    }

    let mut detail_meshes = Vec::with_capacity(poly_count);
    let mut detail_vertices = Vec::new();
    let mut detail_triangles = Vec::new();
    if params.detail_meshes.is_empty() {
        for i in 0..poly_count {
            let nv = params.vertex_count(i);
            detail_meshes.push(PolyDetail {
                vertex_base: 0,
                triangle_base: detail_triangles.len() as u32,
                vertex_count: 0,
                triangle_count: (nv - 2) as u8,
            });
            for j in 2..nv {
                let mut flags = 1 << 2;
                if j == 2 {
                    flags |= 1;
                }
                if j == nv - 1 {
                    flags |= 1 << 4;
                }
                detail_triangles.push([0, (j - 1) as u8, j as u8, flags]);
            }
        }
    } else {
        for (i, detail) in params.detail_meshes.iter().enumerate() {
            let nv = params.vertex_count(i);
            let extra = detail.vertex_count as usize - nv;
            let first = detail.first_vertex as usize + nv;
            detail_meshes.push(PolyDetail {
                vertex_base: detail_vertices.len() as u32,
                triangle_base: detail_triangles.len() as u32,
                vertex_count: extra as u8,
                triangle_count: detail.triangle_count as u8,
            });
            detail_vertices.extend_from_slice(&params.detail_vertices[first..first + extra]);
            let first_tri = detail.first_triangle as usize;
            let tris = first_tri..first_tri + detail.triangle_count as usize;
            detail_triangles.extend_from_slice(&params.detail_triangles[tris]);
        }
    }

    let bv_tree = if params.build_bv_tree {
        build_bv_tree(params)
    } else {
        Vec::new()
    };

    let off_mesh_connections = stored_cons
        .iter()
        .enumerate()
        .map(|(n, (con, end_side))| OffMeshConnection {
            start: con.start,
            end: con.end,
            radius: con.radius,
            poly: (poly_count + n) as u16,
            flags: if con.bidirectional { OFFMESH_CON_BIDIR } else { 0 },
            side: *end_side,
            user_id: con.user_id,
        })
        .collect();

    Ok(MeshTileData {
        header: MeshHeader {
            x: params.tile_x,
            y: params.tile_y,
            layer: params.tile_layer,
            user_id: params.user_id,
            max_link_count: max_link_count as u32,
            off_mesh_base: poly_count as u32,
            walkable_height: params.walkable_height,
            walkable_radius: params.walkable_radius,
            walkable_climb: params.walkable_climb,
            bmin: params.bmin,
            bmax: params.bmax,
            bv_quant_factor: 1.0 / params.cell_size,
        },
        vertices,
        polygons,
        detail_meshes,
        detail_vertices,
        detail_triangles,
        bv_tree,
        off_mesh_connections,
    })
}

/// Converts a polygon mesh neighbor slot into a tile neighbor slot.
fn packed_neighbor(nei: u16) -> u16 {
    if nei == MESH_NULL_IDX {
        0
    } else if nei & MESH_PORTAL_FLAG != 0 {
        // Mesh border directions run -x, +z, +x, -z. Tile sides run counter-clockwise from +x.
        match nei & 0xf {
            0 => EXT_LINK | 4,
            1 => EXT_LINK | 2,
            2 => EXT_LINK,
            3 => EXT_LINK | 6,
            _ => 0,
        }
    } else {
        nei + 1
    }
}

/// The side of the tile bounds the point lies beyond, or [`INSIDE_TILE`].
pub(crate) fn classify_off_mesh_point(pt: Vec3, bmin: Vec3, bmax: Vec3) -> u8 {
    const XP: u8 = 1 << 0;
    const ZP: u8 = 1 << 1;
    const XM: u8 = 1 << 2;
    const ZM: u8 = 1 << 3;

    let mut outcode = 0;
    if pt.x >= bmax.x {
        outcode |= XP;
    }
    if pt.z >= bmax.z {
        outcode |= ZP;
    }
    if pt.x < bmin.x {
        outcode |= XM;
    }
    if pt.z < bmin.z {
        outcode |= ZM;
    }

    match outcode {
        XP => 0,
        o if o == XP | ZP => 1,
        ZP => 2,
        o if o == XM | ZP => 3,
        XM => 4,
        o if o == XM | ZM => 5,
        ZM => 6,
        o if o == XP | ZM => 7,
        _ => INSIDE_TILE,
    }
}

#[derive(Clone, Copy)]
struct BvItem {
    bmin: [u16; 3],
    bmax: [u16; 3],
    index: i32,
}

fn build_bv_tree(params: &NavMeshCreateParams) -> Vec<BvNode> {
    let mut items: Vec<BvItem> = (0..params.poly_count())
        .map(|i| {
            let verts = &params.polygon(i)[..params.vertex_count(i)];
            let first = params.vertices[usize::from(verts[0])];
            let (min, max) = verts[1..].iter().fold((first, first), |(min, max), v| {
                let v = params.vertices[usize::from(*v)];
                (min.min(v), max.max(v))
            });
            // Heights are in cell height units, remap them to cell size units.
            let to_xz_units = params.cell_height / params.cell_size;
            BvItem {
                bmin: [min.x, (f32::from(min.y) * to_xz_units).floor() as u16, min.z],
                bmax: [max.x, (f32::from(max.y) * to_xz_units).ceil() as u16, max.z],
                index: i as i32,
            }
        })
        .collect();

    let mut nodes = Vec::with_capacity(items.len() * 2);
    subdivide(&mut items, &mut nodes);
    nodes
}

fn subdivide(items: &mut [BvItem], nodes: &mut Vec<BvNode>) {
    let icur = nodes.len();
    if let [item] = items {
        nodes.push(BvNode {
            bmin: item.bmin,
            bmax: item.bmax,
            index: item.index,
        });
        return;
    }

    let (bmin, bmax) = items[1..]
        .iter()
        .fold((items[0].bmin, items[0].bmax), |(mut lo, mut hi), it| {
            for k in 0..3 {
                lo[k] = lo[k].min(it.bmin[k]);
                hi[k] = hi[k].max(it.bmax[k]);
            }
            (lo, hi)
        });
    nodes.push(BvNode {
        bmin,
        bmax,
        index: 0,
    });

    let axis = longest_axis(bmax[0] - bmin[0], bmax[1] - bmin[1], bmax[2] - bmin[2]);
    items.sort_by_key(|it| it.bmin[axis]);
    let split = items.len() / 2;
    let (left, right) = items.split_at_mut(split);
    subdivide(left, nodes);
    subdivide(right, nodes);

    let escape = (nodes.len() - icur) as i32;
    nodes[icur].index = -escape;
}

fn longest_axis(x: u16, y: u16, z: u16) -> usize {
    let mut axis = 0;
    let mut max = x;
    if y > max {
        axis = 1;
        max = y;
    }
    if z > max {
        axis = 2;
    }
    axis
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two quads side by side on a 4x2 cell grid, the right one touching the +x tile border.
    fn two_quads() -> NavMeshCreateParams {
        let n = MESH_NULL_IDX;
        NavMeshCreateParams {
            vertices: vec![
                U16Vec3::new(0, 0, 0),
                U16Vec3::new(0, 0, 2),
                U16Vec3::new(2, 0, 2),
                U16Vec3::new(2, 0, 0),
                U16Vec3::new(4, 0, 2),
                U16Vec3::new(4, 0, 0),
            ],
            #[rustfmt::skip]
            polygons: vec![
                0, 1, 2, 3, n, n,   n, n, 1, n, n, n,
                3, 2, 4, 5, n, n,   0, n, MESH_PORTAL_FLAG | 2, n, n, n,
            ],
            poly_flags: vec![1, 1],
            poly_areas: vec![0, 1],
            max_vertices_per_polygon: 6,
            bmin: Vec3::new(10.0, 1.0, 20.0),
            bmax: Vec3::new(12.0, 2.0, 21.0),
            walkable_height: 2.0,
            walkable_radius: 0.5,
            walkable_climb: 0.5,
            cell_size: 0.5,
            cell_height: 0.25,
            build_bv_tree: true,
            ..Default::default()
        }
    }

    #[test]
    fn vertices_are_converted_to_world_space() {
        let data = create_nav_mesh_data(&two_quads()).unwrap();
        assert_eq!(data.vertices[4], Vec3::new(12.0, 1.0, 21.0));
    }

    #[test]
    fn neighbors_are_packed() {
        let data = create_nav_mesh_data(&two_quads()).unwrap();
        assert_eq!(data.polygons[0].neighbors[..4], [0, 0, 2, 0]);
        assert_eq!(data.polygons[1].neighbors[..4], [1, 0, EXT_LINK, 0]);
        // Four edges per quad and one portal.
        assert_eq!(data.header.max_link_count, 8 + 2);
    }

    #[test]
    fn polygons_are_fanned_without_detail() {
        let data = create_nav_mesh_data(&two_quads()).unwrap();
        assert_eq!(data.detail_meshes.len(), 2);
        assert_eq!(data.detail_triangles[..2], [[0, 1, 2, 0x05], [0, 2, 3, 0x14]]);
    }

    #[test]
    fn bv_tree_covers_every_polygon() {
        let data = create_nav_mesh_data(&two_quads()).unwrap();
        assert_eq!(data.bv_tree.len(), 3);
        assert_eq!(data.bv_tree[0].index, -3);
        let mut leaves: Vec<_> = data
            .bv_tree
            .iter()
            .filter(|n| n.is_leaf())
            .map(|n| n.index)
            .collect();
        leaves.sort();
        assert_eq!(leaves, [0, 1]);
    }

    #[test]
    fn off_mesh_connections_must_start_in_the_tile() {
        let mut params = two_quads();
        params.off_mesh_connections = vec![
            OffMeshConnectionParams {
                start: Vec3::new(10.5, 1.0, 20.5),
                end: Vec3::new(13.0, 1.0, 20.5),
                radius: 0.3,
                bidirectional: true,
                area: 5,
                flags: 8,
                user_id: 3,
            },
            OffMeshConnectionParams {
                start: Vec3::new(30.0, 1.0, 20.5),
                end: Vec3::new(10.5, 1.0, 20.5),
                radius: 0.3,
                ..Default::default()
            },
        ];
        let data = create_nav_mesh_data(&params).unwrap();
        assert_eq!(data.off_mesh_connections.len(), 1);
        let con = &data.off_mesh_connections[0];
        assert_eq!(con.poly, 2);
        assert_eq!(con.side, 0);
        assert!(con.is_bidirectional());
        assert_eq!(data.polygons[2].poly_type, PolyType::OffMeshConnection);
        assert_eq!(data.polygons[2].vertices[..2], [6, 7]);
        assert_eq!(data.header.off_mesh_base, 2);
        MeshTileData::from_bytes(&data.to_bytes()).unwrap();
    }

    #[test]
    fn wide_polygons_are_rejected() {
        let mut params = two_quads();
        params.max_vertices_per_polygon = 7;
        assert!(matches!(
            create_nav_mesh_data(&params),
            Err(TileDataError::TooManyVerticesPerPolygon(7))
        ));
    }

    #[test]
    fn vertex_ceiling_is_enforced() {
        let mut params = two_quads();
        params.vertices.resize(0xffff, U16Vec3::ZERO);
        assert!(matches!(
            create_nav_mesh_data(&params),
            Err(TileDataError::TooManyVertices(0xffff))
        ));
    }

    #[test]
    fn polygons_need_three_vertices() {
        let mut params = two_quads();
        params.polygons[..6].fill(MESH_NULL_IDX);
        assert!(matches!(
            create_nav_mesh_data(&params),
            Err(TileDataError::InconsistentParams(_))
        ));

        params.polygons[..2].copy_from_slice(&[0, 1]);
        assert!(matches!(
            create_nav_mesh_data(&params),
            Err(TileDataError::InconsistentParams(_))
        ));
    }

    #[test]
    fn vertex_indices_must_exist() {
        let mut params = two_quads();
        params.polygons[3] = 6;
        assert!(matches!(
            create_nav_mesh_data(&params),
            Err(TileDataError::InconsistentParams("polygon vertex index"))
        ));
    }

    #[test]
    fn off_mesh_points_are_classified_by_side() {
        let (bmin, bmax) = (Vec3::ZERO, Vec3::ONE);
        assert_eq!(classify_off_mesh_point(Vec3::splat(0.5), bmin, bmax), INSIDE_TILE);
        assert_eq!(classify_off_mesh_point(Vec3::new(2.0, 0.5, 0.5), bmin, bmax), 0);
        assert_eq!(classify_off_mesh_point(Vec3::new(0.5, 0.5, 2.0), bmin, bmax), 2);
        assert_eq!(classify_off_mesh_point(Vec3::new(-1.0, 0.5, -1.0), bmin, bmax), 5);
    }
}
