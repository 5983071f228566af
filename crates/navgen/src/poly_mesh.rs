//! Convex polygon meshes built from simplified region contours.

use std::collections::{HashMap, VecDeque};

use glam::U16Vec3;
use thiserror::Error;
use tracing::warn;

use crate::{
    Aabb3d, AreaType, RegionId,
    contours::ContourSet,
    math::{intersect, intersect_prop, left, left_on, next, prev, xz_equal},
};

/// Marks unused vertex and neighbor slots of a polygon.
pub const MESH_NULL_IDX: u16 = 0xffff;

/// Set on a neighbor slot whose edge lies on the tile border. The low bits hold the direction
/// of the border: 0 is -x, 1 is +z, 2 is +x, 3 is -z.
pub const MESH_PORTAL_FLAG: u16 = 0x8000;

const VERTEX_BUCKET_COUNT: usize = 1 << 12;

/// Represents a polygon mesh suitable for use in building a navigation mesh.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolygonMesh {
    /// The mesh vertices. `[Units: vx]`
    pub vertices: Vec<U16Vec3>,
    /// Polygon and neighbor data. [Length: `polygon_count * 2 * max_vertices_per_polygon`]
    ///
    /// Each polygon takes `2 * max_vertices_per_polygon` entries: first the vertex indices,
    /// padded with [`MESH_NULL_IDX`], then for every edge the index of the neighbor polygon,
    /// a [`MESH_PORTAL_FLAG`] portal or [`MESH_NULL_IDX`].
    pub polygons: Vec<u16>,
    /// The region id assigned to each polygon.
    pub regions: Vec<RegionId>,
    /// The flags assigned to each polygon.
    pub flags: Vec<u16>,
    /// The area id assigned to each polygon.
    pub areas: Vec<AreaType>,
    /// The maximum number of vertices per polygon
    pub max_vertices_per_polygon: usize,
    /// The bounding box of the mesh in world space.
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The AABB border size used to generate the source data from which the mesh was derived.
    pub border_size: u16,
    /// The max error of the polygon edges in the mesh.
    pub max_edge_error: f32,
}

impl PolygonMesh {
    /// Number of polygons in the mesh.
    #[inline]
    pub fn polygon_count(&self) -> usize {
        self.areas.len()
    }

    /// The vertex slots of polygon `i`, padded with [`MESH_NULL_IDX`].
    #[inline]
    pub fn polygon(&self, i: usize) -> &[u16] {
        let start = i * 2 * self.max_vertices_per_polygon;
        &self.polygons[start..start + self.max_vertices_per_polygon]
    }

    /// The neighbor slots of polygon `i`, one per edge.
    #[inline]
    pub fn neighbors(&self, i: usize) -> &[u16] {
        let start = (i * 2 + 1) * self.max_vertices_per_polygon;
        &self.polygons[start..start + self.max_vertices_per_polygon]
    }

    /// The vertex indices of polygon `i`.
    pub fn polygon_vertices(&self, i: usize) -> impl Iterator<Item = u16> + '_ {
        self.polygon(i)
            .iter()
            .copied()
            .take_while(|v| *v != MESH_NULL_IDX)
    }
}

impl ContourSet {
    /// Builds a polygon mesh from the provided contours.
    ///
    /// Every contour is triangulated and the triangles are greedily merged into convex polygons
    /// of at most `max_vertices_per_polygon` vertices. Vertices that only exist to match tile
    /// borders are removed again.
    ///
    /// # Errors
    ///
    /// Fails if the mesh would need [`MESH_NULL_IDX`] or more vertices, or if
    /// `max_vertices_per_polygon` is smaller than 3.
    pub fn into_polygon_mesh(
        self,
        max_vertices_per_polygon: usize,
    ) -> Result<PolygonMesh, PolygonMeshError> {
        let nvp = max_vertices_per_polygon;
        if !(3..MESH_PORTAL_FLAG as usize).contains(&nvp) {
            return Err(PolygonMeshError::InvalidVerticesPerPolygon(nvp));
        }

        let mut max_vertices = 0;
        let mut max_triangles = 0;
        for contour in self.contours.iter().filter(|c| c.vertices.len() >= 3) {
            max_vertices += contour.vertices.len();
            max_triangles += contour.vertices.len() - 2;
        }
        if max_vertices >= MESH_NULL_IDX as usize - 1 {
            return Err(PolygonMeshError::TooManyVertices {
                vertices: max_vertices,
            });
        }

        let mut removable = vec![false; max_vertices];
        let mut mesh = MeshBuilder {
            vertices: Vec::with_capacity(max_vertices),
            polygons: Vec::with_capacity(max_triangles),
            max_vertices_per_polygon: nvp,
        };
        let mut vertex_hash = VertexHash::new(max_vertices);
        let mut indices: Vec<u16> = Vec::new();

        for contour in &self.contours {
            // Skip null contours.
            if contour.vertices.len() < 3 {
                continue;
            }

            // Triangulate contour
            let positions: Vec<U16Vec3> = contour.vertices.iter().map(|v| v.position).collect();
            let (triangles, complete) = triangulate(&positions);
            if !complete {
                // Bad triangulation, should not happen.
                warn!(
                    "Bad triangulation of the contour of region {}.",
                    contour.region.bits()
                );
            }

            // Add and merge vertices.
            indices.clear();
            for vertex in &contour.vertices {
                let index = vertex_hash.add(vertex.position, &mut mesh.vertices);
                if vertex.is_border_vertex() {
                    // This vertex should be removed.
                    removable[index] = true;
                }
                indices.push(index as u16);
            }

            // Build initial polygons.
            let mut polygons: Vec<MeshPolygon> = triangles
                .iter()
                .map(|t| t.map(|k| indices[k]))
                .filter(|t| t[0] != t[1] && t[0] != t[2] && t[1] != t[2])
                .map(|t| MeshPolygon {
                    vertices: t.to_vec(),
                    region: contour.region,
                    area: contour.area,
                })
                .collect();
            if polygons.is_empty() {
                continue;
            }

            // Merge polygons.
            merge_polygons(&mut polygons, &mesh.vertices, nvp);

            // Store polygons.
            for polygon in polygons {
                if mesh.polygons.len() >= max_triangles {
                    return Err(PolygonMeshError::TooManyPolygons {
                        max: max_triangles,
                    });
                }
                mesh.polygons.push(polygon);
            }
        }

        // Remove edge vertices.
        let mut i = 0;
        while i < mesh.vertices.len() {
            if removable[i] && mesh.can_remove_vertex(i as u16) {
                mesh.remove_vertex(i as u16, max_triangles);
                // Fixup vertex flags
                removable.remove(i);
                continue;
            }
            i += 1;
        }

        if mesh.vertices.len() >= MESH_NULL_IDX as usize {
            return Err(PolygonMeshError::TooManyVertices {
                vertices: mesh.vertices.len(),
            });
        }
        if mesh.polygons.len() >= MESH_NULL_IDX as usize {
            return Err(PolygonMeshError::TooManyPolygons {
                max: MESH_NULL_IDX as usize - 1,
            });
        }

        let polygon_count = mesh.polygons.len();
        let mut polygons = vec![MESH_NULL_IDX; polygon_count * nvp * 2];
        let mut regions = Vec::with_capacity(polygon_count);
        let mut areas = Vec::with_capacity(polygon_count);
        for (i, polygon) in mesh.polygons.iter().enumerate() {
            let start = i * nvp * 2;
            polygons[start..start + polygon.vertices.len()].copy_from_slice(&polygon.vertices);
            regions.push(polygon.region);
            areas.push(polygon.area);
        }

        // Calculate adjacency.
        build_mesh_adjacency(&mut polygons, polygon_count, nvp);

        // Find portal edges
        if self.border_size > 0 {
            mark_portal_edges(
                &mut polygons,
                &mesh.vertices,
                nvp,
                self.width,
                self.height,
            );
        }

        Ok(PolygonMesh {
            vertices: mesh.vertices,
            polygons,
            regions,
            // The caller is responsible to fill the flags.
            flags: vec![0; polygon_count],
            areas,
            max_vertices_per_polygon: nvp,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            border_size: self.border_size,
            max_edge_error: self.max_error,
        })
    }
}

/// Errors that can occur while building a [`PolygonMesh`].
#[derive(Debug, Error)]
pub enum PolygonMeshError {
    /// The vertex indices of the mesh would not fit into 16 bits.
    #[error("Too many vertices: {vertices}, a polygon mesh can hold at most 65534")]
    TooManyVertices {
        /// The number of vertices the mesh would need.
        vertices: usize,
    },
    /// More polygons were created than the triangulation allows.
    #[error("Too many polygons, the mesh can hold at most {max}")]
    TooManyPolygons {
        /// The polygon budget.
        max: usize,
    },
    /// Polygons need at least three vertices.
    #[error("Invalid number of vertices per polygon: {0}")]
    InvalidVerticesPerPolygon(usize),
}

#[derive(Debug, Clone)]
struct MeshPolygon {
    vertices: Vec<u16>,
    region: RegionId,
    area: AreaType,
}

struct MeshBuilder {
    vertices: Vec<U16Vec3>,
    polygons: Vec<MeshPolygon>,
    max_vertices_per_polygon: usize,
}

impl MeshBuilder {
    fn can_remove_vertex(&self, remove: u16) -> bool {
        // Count number of polygons to remove.
        let mut touched_vertices = 0;
        let mut remaining_edges = 0;
        for polygon in &self.polygons {
            let removed = polygon.vertices.iter().filter(|v| **v == remove).count();
            if removed > 0 {
                touched_vertices += removed;
                remaining_edges += polygon.vertices.len() - (removed + 1);
            }
        }

        // There would be too few edges remaining to create a polygon.
        // This can happen for example when a tip of a triangle is marked
        // as deletion, but there are no other polys that share the vertex.
        // In this case, the vertex should not be removed.
        if remaining_edges <= 2 {
            return false;
        }

        // Find edges which share the removed vertex.
        let mut edges: Vec<(u16, usize)> = Vec::with_capacity(touched_vertices * 2);
        for polygon in &self.polygons {
            let n = polygon.vertices.len();
            // Collect edges which touches the removed vertex.
            for j in 0..n {
                let a = polygon.vertices[j];
                let b = polygon.vertices[prev(j, n)];
                if a != remove && b != remove {
                    continue;
                }
                // Arrange edge so that b is the vertex that stays.
                let other = if b == remove { a } else { b };
                match edges.iter_mut().find(|(vertex, _)| *vertex == other) {
                    Some((_, count)) => *count += 1,
                    None => edges.push((other, 1)),
                }
            }
        }

        // There should be no more than 2 open edges.
        // This catches the case that two non-adjacent polygons
        // share the removed vertex. In that case, do not remove the vertex.
        let open_edges = edges.iter().filter(|(_, count)| *count < 2).count();
        open_edges <= 2
    }

    /// Removes a vertex and re-triangulates the hole left by the polygons that used it.
    fn remove_vertex(&mut self, remove: u16, max_polygons: usize) {
        let mut edges: Vec<HoleEdge> = Vec::new();

        let mut i = 0;
        while i < self.polygons.len() {
            let polygon = &self.polygons[i];
            if !polygon.vertices.contains(&remove) {
                i += 1;
                continue;
            }
            // Collect edges which does not touch the removed vertex.
            let n = polygon.vertices.len();
            for j in 0..n {
                let a = polygon.vertices[prev(j, n)];
                let b = polygon.vertices[j];
                if a != remove && b != remove {
                    edges.push(HoleEdge {
                        a,
                        b,
                        region: polygon.region,
                        area: polygon.area,
                    });
                }
            }
            // Remove the polygon.
            self.polygons.swap_remove(i);
        }

        // Remove vertex.
        self.vertices.remove(remove as usize);

        // Adjust indices to match the removed vertex layout.
        for vertex in self
            .polygons
            .iter_mut()
            .flat_map(|polygon| polygon.vertices.iter_mut())
        {
            if *vertex > remove {
                *vertex -= 1;
            }
        }
        for edge in &mut edges {
            if edge.a > remove {
                edge.a -= 1;
            }
            if edge.b > remove {
                edge.b -= 1;
            }
        }

        let Some(first) = edges.first().copied() else {
            return;
        };

        // Start with one vertex, keep appending connected
        // segments to the start and end of the hole.
        let mut hole: VecDeque<(u16, RegionId, AreaType)> = VecDeque::new();
        hole.push_back((first.a, first.region, first.area));

        while !edges.is_empty() {
            let mut matched = false;
            let mut i = 0;
            while i < edges.len() {
                let edge = edges[i];
                let added = if hole[0].0 == edge.b {
                    // The segment matches the beginning of the hole boundary.
                    hole.push_front((edge.a, edge.region, edge.area));
                    true
                } else if hole[hole.len() - 1].0 == edge.a {
                    // The segment matches the end of the hole boundary.
                    hole.push_back((edge.b, edge.region, edge.area));
                    true
                } else {
                    false
                };
                if added {
                    // The edge segment was added, remove it.
                    edges.swap_remove(i);
                    matched = true;
                } else {
                    i += 1;
                }
            }
            if !matched {
                break;
            }
        }

        if hole.len() < 3 {
            return;
        }

        // Generate temp vertex array for triangulation.
        let positions: Vec<U16Vec3> = hole
            .iter()
            .map(|(vertex, _, _)| self.vertices[*vertex as usize])
            .collect();

        // Triangulate the hole.
        let (triangles, complete) = triangulate(&positions);
        if !complete {
            warn!("Triangulating the hole of a removed vertex returned bad results.");
        }

        // Merge the hole triangles back to polygons.
        let mut polygons: Vec<MeshPolygon> = triangles
            .iter()
            .filter(|t| t[0] != t[1] && t[0] != t[2] && t[1] != t[2])
            .map(|t| {
                let [a, b, c] = t.map(|k| hole[k]);
                // If this polygon covers multiple region types then mark it as such
                let region = if a.1 != b.1 || b.1 != c.1 {
                    RegionId::NONE
                } else {
                    a.1
                };
                MeshPolygon {
                    vertices: vec![a.0, b.0, c.0],
                    region,
                    area: a.2,
                }
            })
            .collect();

        merge_polygons(&mut polygons, &self.vertices, self.max_vertices_per_polygon);

        // Store polygons.
        for polygon in polygons {
            if self.polygons.len() >= max_polygons {
                break;
            }
            self.polygons.push(polygon);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct HoleEdge {
    a: u16,
    b: u16,
    region: RegionId,
    area: AreaType,
}

/// Spatial hash that welds vertices sharing an xz-position and lying within two voxels vertically.
struct VertexHash {
    first: Vec<Option<usize>>,
    next: Vec<Option<usize>>,
}

impl VertexHash {
    fn new(capacity: usize) -> Self {
        Self {
            first: vec![None; VERTEX_BUCKET_COUNT],
            next: Vec::with_capacity(capacity),
        }
    }

    fn bucket(x: u16, z: u16) -> usize {
        // Large multiplicative constants; here arbitrarily chosen primes
        const H1: u32 = 0x8da6b343;
        const H3: u32 = 0xcb1ab31f;
        let n = H1
            .wrapping_mul(x as u32)
            .wrapping_add(H3.wrapping_mul(z as u32));
        n as usize & (VERTEX_BUCKET_COUNT - 1)
    }

    fn add(&mut self, vertex: U16Vec3, vertices: &mut Vec<U16Vec3>) -> usize {
        let bucket = Self::bucket(vertex.x, vertex.z);
        let mut current = self.first[bucket];
        while let Some(i) = current {
            let existing = vertices[i];
            if existing.x == vertex.x
                && existing.z == vertex.z
                && existing.y.abs_diff(vertex.y) <= 2
            {
                return i;
            }
            current = self.next[i];
        }

        // Could not find, create new.
        let i = vertices.len();
        vertices.push(vertex);
        self.next.push(self.first[bucket]);
        self.first[bucket] = Some(i);
        i
    }
}

/// Greedily merges the pair of polygons sharing the longest edge until no pair can merge into
/// a convex polygon of at most `nvp` vertices.
fn merge_polygons(polygons: &mut Vec<MeshPolygon>, vertices: &[U16Vec3], nvp: usize) {
    if nvp <= 3 {
        return;
    }
    loop {
        // Find best polygons to merge.
        let mut best: Option<(i32, usize, usize, usize, usize)> = None;
        for j in 0..polygons.len() {
            for k in j + 1..polygons.len() {
                let Some((value, ea, eb)) = poly_merge_value(
                    &polygons[j].vertices,
                    &polygons[k].vertices,
                    vertices,
                    nvp,
                ) else {
                    continue;
                };
                if value > best.map_or(0, |b| b.0) {
                    best = Some((value, j, k, ea, eb));
                }
            }
        }

        let Some((_, pa, pb, ea, eb)) = best else {
            // Could not merge any polygons, stop.
            break;
        };
        let merged = merge_poly_vertices(&polygons[pa].vertices, &polygons[pb].vertices, ea, eb);
        if polygons[pa].region != polygons[pb].region {
            polygons[pa].region = RegionId::NONE;
        }
        polygons[pa].vertices = merged;
        polygons.swap_remove(pb);
    }
}

/// How desirable merging `pa` and `pb` is, along with the shared edge in each.
/// `None` if they do not share an edge or the result would be too large or concave.
fn poly_merge_value(
    pa: &[u16],
    pb: &[u16],
    vertices: &[U16Vec3],
    nvp: usize,
) -> Option<(i32, usize, usize)> {
    let na = pa.len();
    let nb = pb.len();

    // If the merged polygon would be too big, do not merge.
    if na + nb - 2 > nvp {
        return None;
    }

    // Check if the polygons share an edge.
    let sorted = |a: u16, b: u16| if a > b { (b, a) } else { (a, b) };
    let (ea, eb) = (0..na).find_map(|i| {
        let edge_a = sorted(pa[i], pa[(i + 1) % na]);
        (0..nb)
            .find(|&j| sorted(pb[j], pb[(j + 1) % nb]) == edge_a)
            .map(|j| (i, j))
    })?;

    let v = |i: u16| vertices[i as usize];

    // Check to see if the merged polygon would be convex.
    let (va, vb, vc) = (pa[(ea + na - 1) % na], pa[ea], pb[(eb + 2) % nb]);
    if !left(v(va), v(vb), v(vc)) {
        return None;
    }
    let (va, vb, vc) = (pb[(eb + nb - 1) % nb], pb[eb], pa[(ea + 2) % na]);
    if !left(v(va), v(vb), v(vc)) {
        return None;
    }

    let d = v(pa[ea]).as_ivec3() - v(pa[(ea + 1) % na]).as_ivec3();
    Some((d.x * d.x + d.z * d.z, ea, eb))
}

fn merge_poly_vertices(pa: &[u16], pb: &[u16], ea: usize, eb: usize) -> Vec<u16> {
    let na = pa.len();
    let nb = pb.len();
    let mut merged = Vec::with_capacity(na + nb - 2);
    // Add pa
    merged.extend((0..na - 1).map(|i| pa[(ea + 1 + i) % na]));
    // Add pb
    merged.extend((0..nb - 1).map(|i| pb[(eb + 1 + i) % nb]));
    merged
}

/// Ear-clipping triangulation of a simple polygon on the xz-plane.
///
/// Returns triangles as indices into `vertices`. The flag is `false` if the polygon could not
/// be fully triangulated, in which case the triangles found so far are returned.
pub(crate) fn triangulate(vertices: &[U16Vec3]) -> (Vec<[usize; 3]>, bool) {
    let mut n = vertices.len();
    let mut triangles = Vec::with_capacity(n.saturating_sub(2));
    if n < 3 {
        return (triangles, false);
    }
    let mut indices: Vec<usize> = (0..n).collect();

    // Whether the vertex at each position can be clipped as an ear.
    let mut ears: Vec<bool> = vec![false; n];
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        ears[i1] = diagonal(i, i2, &indices, vertices);
    }

    let at = |indices: &[usize], k: usize| vertices[indices[k]];

    while n > 3 {
        let mut min_len = None;
        let mut min_i = None;
        for i in 0..n {
            let i1 = next(i, n);
            if !ears[i1] {
                continue;
            }
            let p0 = at(&indices, i).as_ivec3();
            let p2 = at(&indices, next(i1, n)).as_ivec3();
            let d = p2 - p0;
            let len = d.x * d.x + d.z * d.z;
            if min_len.is_none_or(|min| len < min) {
                min_len = Some(len);
                min_i = Some(i);
            }
        }

        if min_i.is_none() {
            // We might get here because the contour has overlapping segments.
            // Try to recover by loosing up the in-cone test a bit so that a diagonal
            // can be found and we can continue.
            for i in 0..n {
                let i1 = next(i, n);
                let i2 = next(i1, n);
                if !diagonal_loose(i, i2, &indices, vertices) {
                    continue;
                }
                let p0 = at(&indices, i).as_ivec3();
                let p2 = at(&indices, next(i2, n)).as_ivec3();
                let d = p2 - p0;
                let len = d.x * d.x + d.z * d.z;
                if min_len.is_none_or(|min| len < min) {
                    min_len = Some(len);
                    min_i = Some(i);
                }
            }
        }

        let Some(i) = min_i else {
            // The contour is messed up. This sometimes happens
            // if the contour simplification is too aggressive.
            return (triangles, false);
        };

        let i1 = next(i, n);
        let i2 = next(i1, n);
        triangles.push([indices[i], indices[i1], indices[i2]]);

        // Removes P[i1] by copying P[i+1]...P[n-1] left one index.
        n -= 1;
        indices.remove(i1);
        ears.remove(i1);

        let i1 = if i1 >= n { 0 } else { i1 };
        let i = prev(i1, n);
        // Update diagonal flags.
        ears[i] = diagonal(prev(i, n), i1, &indices, vertices);
        ears[i1] = diagonal(i, next(i1, n), &indices, vertices);
    }

    // Append the remaining triangle.
    triangles.push([indices[0], indices[1], indices[2]]);
    (triangles, true)
}

/// Whether the diagonal from position `i` to position `j` is inside the polygon at `i`.
fn in_cone(i: usize, j: usize, indices: &[usize], vertices: &[U16Vec3], loose: bool) -> bool {
    let n = indices.len();
    let pi = vertices[indices[i]];
    let pj = vertices[indices[j]];
    let pi1 = vertices[indices[next(i, n)]];
    let pin1 = vertices[indices[prev(i, n)]];

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return if loose {
            left_on(pi, pj, pin1) && left_on(pj, pi, pi1)
        } else {
            left(pi, pj, pin1) && left(pj, pi, pi1)
        };
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Whether the diagonal from position `i` to position `j` crosses no polygon edge
/// that is not incident to either end.
fn diagonalie(i: usize, j: usize, indices: &[usize], vertices: &[U16Vec3], loose: bool) -> bool {
    let n = indices.len();
    let d0 = vertices[indices[i]];
    let d1 = vertices[indices[j]];

    // For each edge (k,k+1) of P
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i or j
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = vertices[indices[k]];
        let p1 = vertices[indices[k1]];
        if xz_equal(d0, p0) || xz_equal(d1, p0) || xz_equal(d0, p1) || xz_equal(d1, p1) {
            continue;
        }
        let crosses = if loose {
            intersect_prop(d0, d1, p0, p1)
        } else {
            intersect(d0, d1, p0, p1)
        };
        if crosses {
            return false;
        }
    }
    true
}

/// Whether the segment from position `i` to position `j` is a proper internal diagonal.
fn diagonal(i: usize, j: usize, indices: &[usize], vertices: &[U16Vec3]) -> bool {
    in_cone(i, j, indices, vertices, false) && diagonalie(i, j, indices, vertices, false)
}

fn diagonal_loose(i: usize, j: usize, indices: &[usize], vertices: &[U16Vec3]) -> bool {
    in_cone(i, j, indices, vertices, true) && diagonalie(i, j, indices, vertices, true)
}

#[derive(Debug, Clone, Copy)]
struct AdjacencyEdge {
    polygons: [usize; 2],
    edges: [usize; 2],
}

/// Fills the neighbor slots of every polygon with the polygon across each shared edge.
fn build_mesh_adjacency(polygons: &mut [u16], polygon_count: usize, nvp: usize) {
    let edge_vertices = |polygons: &[u16], i: usize, j: usize| {
        let p = &polygons[i * nvp * 2..i * nvp * 2 + nvp];
        let v0 = p[j];
        let v1 = if j + 1 >= nvp || p[j + 1] == MESH_NULL_IDX {
            p[0]
        } else {
            p[j + 1]
        };
        (v0, v1)
    };
    let vertex_count = |polygons: &[u16], i: usize| {
        polygons[i * nvp * 2..i * nvp * 2 + nvp]
            .iter()
            .take_while(|v| **v != MESH_NULL_IDX)
            .count()
    };

    let mut edges: Vec<AdjacencyEdge> = Vec::with_capacity(polygon_count * nvp);
    let mut lookup: HashMap<(u16, u16), Vec<usize>> = HashMap::new();
    for i in 0..polygon_count {
        for j in 0..vertex_count(polygons, i) {
            let (v0, v1) = edge_vertices(polygons, i, j);
            if v0 < v1 {
                lookup.entry((v0, v1)).or_default().push(edges.len());
                edges.push(AdjacencyEdge {
                    polygons: [i, i],
                    edges: [j, 0],
                });
            }
        }
    }

    for i in 0..polygon_count {
        for j in 0..vertex_count(polygons, i) {
            let (v0, v1) = edge_vertices(polygons, i, j);
            if v0 <= v1 {
                continue;
            }
            let Some(candidates) = lookup.get(&(v1, v0)) else {
                continue;
            };
            if let Some(&e) = candidates
                .iter()
                .find(|&&e| edges[e].polygons[0] == edges[e].polygons[1])
            {
                edges[e].polygons[1] = i;
                edges[e].edges[1] = j;
            }
        }
    }

    // Store adjacency
    for edge in edges.iter().filter(|e| e.polygons[0] != e.polygons[1]) {
        let [p0, p1] = edge.polygons;
        let [e0, e1] = edge.edges;
        polygons[p0 * nvp * 2 + nvp + e0] = p1 as u16;
        polygons[p1 * nvp * 2 + nvp + e1] = p0 as u16;
    }
}

/// Flags open edges that lie on the tile border, so they can later be connected to neighbor tiles.
fn mark_portal_edges(
    polygons: &mut [u16],
    vertices: &[U16Vec3],
    nvp: usize,
    width: u16,
    height: u16,
) {
    for p in polygons.chunks_exact_mut(nvp * 2) {
        let (poly, neighbors) = p.split_at_mut(nvp);
        for j in 0..nvp {
            if poly[j] == MESH_NULL_IDX {
                break;
            }
            // Skip connected edges.
            if neighbors[j] != MESH_NULL_IDX {
                continue;
            }
            let nj = if j + 1 >= nvp || poly[j + 1] == MESH_NULL_IDX {
                0
            } else {
                j + 1
            };
            let va = vertices[poly[j] as usize];
            let vb = vertices[poly[nj] as usize];

            let direction = if va.x == 0 && vb.x == 0 {
                Some(0)
            } else if va.z == height && vb.z == height {
                Some(1)
            } else if va.x == width && vb.x == width {
                Some(2)
            } else if va.z == 0 && vb.z == 0 {
                Some(3)
            } else {
                None
            };
            if let Some(direction) = direction {
                neighbors[j] = MESH_PORTAL_FLAG | direction;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BuildContoursFlags, CompactHeightfield,
        compact_heightfield::tests::{flat, heightfield_from_fn},
        math::collinear,
    };

    fn contours_of(chf: &CompactHeightfield) -> ContourSet {
        chf.build_contours(1.3, 12, BuildContoursFlags::DEFAULT)
            .unwrap()
    }

    /// Twice the area of polygon `i` on the xz-plane.
    fn double_area(mesh: &PolygonMesh, i: usize) -> i32 {
        let vertices: Vec<U16Vec3> = mesh
            .polygon_vertices(i)
            .map(|v| mesh.vertices[v as usize])
            .collect();
        let n = vertices.len();
        (0..n)
            .map(|k| {
                let a = vertices[k].as_ivec3();
                let b = vertices[next(k, n)].as_ivec3();
                a.x * b.z - b.x * a.z
            })
            .sum::<i32>()
            .abs()
    }

    #[test]
    fn square_becomes_a_single_quad() {
        let mut chf = flat(8);
        chf.build_regions_monotone(0, 0, 0).unwrap();
        let mesh = contours_of(&chf).into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.polygon_count(), 1);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.polygon_vertices(0).count(), 4);
        assert!(mesh.neighbors(0).iter().all(|n| *n == MESH_NULL_IDX));
        assert_eq!(double_area(&mesh, 0), 128);
        assert_eq!(mesh.flags, vec![0]);
        assert_eq!(mesh.regions, vec![RegionId::from(1)]);
    }

    #[test]
    fn triangles_only_are_neighbors() {
        let mut chf = flat(8);
        chf.build_regions_monotone(0, 0, 0).unwrap();
        let mesh = contours_of(&chf).into_polygon_mesh(3).unwrap();
        assert_eq!(mesh.polygon_count(), 2);
        assert!(mesh.neighbors(0).contains(&1));
        assert!(mesh.neighbors(1).contains(&0));
        assert_eq!(double_area(&mesh, 0) + double_area(&mesh, 1), 128);
    }

    #[test]
    fn holes_stay_uncovered() {
        let mut chf = heightfield_from_fn(9, |_, _| Some(1))
            .into_compact(2, 1)
            .unwrap();
        for z in 0..9 {
            for x in 0..9 {
                let inside_hole = (3..6).contains(&x) && (3..6).contains(&z);
                for i in chf.cell_at(x, z).index_range() {
                    chf.spans[i].region = RegionId::from(if inside_hole { 0 } else { 1 });
                }
            }
        }
        chf.max_region = RegionId::from(1);
        let mesh = contours_of(&chf).into_polygon_mesh(6).unwrap();
        // The duplicated bridge vertices are welded.
        assert_eq!(mesh.vertices.len(), 8);
        let total: i32 = (0..mesh.polygon_count()).map(|i| double_area(&mesh, i)).sum();
        assert_eq!(total, 2 * (81 - 9));
        for i in 0..mesh.polygon_count() {
            assert!(mesh.polygon_vertices(i).count() <= 6);
        }
    }

    #[test]
    fn tile_border_edges_become_portals() {
        let mut chf = flat(12);
        chf.build_regions_monotone(2, 0, 0).unwrap();
        let mesh = contours_of(&chf).into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.border_size, 2);
        assert_eq!(mesh.polygon_count(), 1);
        let mut directions: Vec<u16> = mesh
            .neighbors(0)
            .iter()
            .filter(|n| **n != MESH_NULL_IDX)
            .map(|n| {
                assert!(n & MESH_PORTAL_FLAG != 0);
                n & 0x3
            })
            .collect();
        directions.sort();
        assert_eq!(directions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn rejects_degenerate_polygon_size() {
        let mut chf = flat(4);
        chf.build_regions_monotone(0, 0, 0).unwrap();
        assert!(matches!(
            contours_of(&chf).into_polygon_mesh(2),
            Err(PolygonMeshError::InvalidVerticesPerPolygon(2))
        ));
    }

    #[test]
    fn triangulates_concave_polygons() {
        // An L-shape.
        let vertices = [
            U16Vec3::new(0, 0, 0),
            U16Vec3::new(0, 0, 4),
            U16Vec3::new(2, 0, 4),
            U16Vec3::new(2, 0, 2),
            U16Vec3::new(4, 0, 2),
            U16Vec3::new(4, 0, 0),
        ];
        let (triangles, complete) = triangulate(&vertices);
        assert!(complete);
        assert_eq!(triangles.len(), 4);
        // Every triangle keeps the winding of the outline.
        for [a, b, c] in triangles {
            assert!(!collinear(vertices[a], vertices[b], vertices[c]));
        }
    }
}
