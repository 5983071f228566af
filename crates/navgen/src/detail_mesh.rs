use std::collections::VecDeque;

use glam::{Vec2, Vec3A, Vec3Swizzles as _};
use thiserror::Error;

use crate::{
    CompactHeightfield, PolygonMesh, RegionId,
    math::{
        dir_for_offset, dir_offset_x, dir_offset_z, distance_squared_point_segment,
        distance_squared_point_segment_2d, next, prev,
    },
};

/// Maximum number of vertices a single detail sub-mesh may hold.
const MAX_VERTS: usize = 127;
/// Max tris for delaunay is 2n-2-k (n=num verts, k=num hull verts).
const MAX_TRIS: usize = 255;
const MAX_VERTS_PER_EDGE: usize = 32;
const UNSET_HEIGHT: u16 = 0xffff;

/// Contains triangle meshes that represent detailed height data associated
/// with the polygons in its associated polygon mesh object.
///
/// Sub-mesh `i` belongs to polygon `i` of the polygon mesh. The first vertices of every
/// sub-mesh are the polygon's own vertices, in the same order.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailNavmesh {
    /// The sub-mesh data
    pub meshes: Vec<SubMesh>,
    /// The mesh vertices in world space. `[Units: wu]`
    pub vertices: Vec<Vec3A>,
    /// The mesh triangles. Indices are local to their sub-mesh.
    pub triangles: Vec<DetailTriangle>,
}

/// The vertex and triangle ranges of a single polygon's detail mesh.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SubMesh {
    /// Index of the first vertex in [`DetailNavmesh::vertices`]
    pub first_vertex_index: usize,
    /// Number of vertices
    pub vertex_count: usize,
    /// Index of the first triangle in [`DetailNavmesh::triangles`]
    pub first_triangle_index: usize,
    /// Number of triangles
    pub triangle_count: usize,
}

impl SubMesh {
    /// Range into [`DetailNavmesh::vertices`]
    pub fn vertex_range(&self) -> std::ops::Range<usize> {
        self.first_vertex_index..self.first_vertex_index + self.vertex_count
    }

    /// Range into [`DetailNavmesh::triangles`]
    pub fn triangle_range(&self) -> std::ops::Range<usize> {
        self.first_triangle_index..self.first_triangle_index + self.triangle_count
    }
}

/// A triangle of a detail sub-mesh.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailTriangle {
    /// Vertex indices, local to the owning sub-mesh
    pub vertices: [u8; 3],
    /// Two bits per edge, edge `k` runs from `vertices[k]` to `vertices[(k + 1) % 3]`.
    pub flags: u8,
}

impl DetailTriangle {
    /// Set on an edge that lies on the boundary of the owning polygon.
    pub const EDGE_BOUNDARY: u8 = 0x1;

    /// Whether edge `k` lies on the boundary of the owning polygon.
    #[inline]
    pub fn is_boundary_edge(&self, k: usize) -> bool {
        (self.flags >> (k * 2)) & 0x3 == Self::EDGE_BOUNDARY
    }
}

impl DetailNavmesh {
    /// Builds a detail mesh from the provided polygon mesh.
    ///
    /// # Arguments
    ///
    /// - `mesh` - A fully built polygon mesh.
    /// - `heightfield` - The compact heightfield used to build the polygon mesh.
    /// - `sample_distance` - Sets the distance to use when sampling the heightfield. `[Limit: >=0]
    ///   [Units: wu]`
    /// - `sample_max_error` - The maximum distance the detail mesh surface should deviate from
    ///   heightfield data. `[Limit: >=0] [Units: wu]`
    pub fn new(
        mesh: &PolygonMesh,
        heightfield: &CompactHeightfield,
        sample_distance: f32,
        sample_max_error: f32,
    ) -> Result<Self, DetailMeshError> {
        let mut dmesh = DetailNavmesh::default();
        if mesh.vertices.is_empty() || mesh.polygon_count() == 0 {
            return Ok(dmesh);
        }
        let chf = heightfield;
        let cs = mesh.cell_size;
        let ch = mesh.cell_height;
        let orig = mesh.aabb.min;
        let border_size = mesh.border_size;
        let height_search_radius = 1.max(mesh.max_edge_error.ceil() as i32);

        let mut hp = HeightPatch::default();
        let mut queue = VecDeque::with_capacity(512);
        let mut samples = Vec::with_capacity(512);
        let mut poly = Vec::with_capacity(mesh.max_vertices_per_polygon);

        dmesh.meshes = Vec::with_capacity(mesh.polygon_count());
        let poly_vert_count = mesh.polygon_count() * mesh.max_vertices_per_polygon;
        dmesh.vertices.reserve(poly_vert_count + poly_vert_count / 2);
        dmesh.triangles.reserve(poly_vert_count * 2);

        for i in 0..mesh.polygon_count() {
            let indices: Vec<u16> = mesh.polygon_vertices(i).collect();
            if indices.len() >= MAX_VERTS {
                return Err(DetailMeshError::PolygonTooLarge {
                    polygon: i,
                    vertices: indices.len(),
                });
            }

            // Store polygon vertices for processing.
            poly.clear();
            poly.extend(indices.iter().map(|v| {
                let v = mesh.vertices[*v as usize].as_vec3a();
                Vec3A::new(v.x * cs, v.y * ch, v.z * cs)
            }));

            // Get the height data from the area of the polygon.
            hp.fit_to_polygon(mesh, &indices, chf);
            hp.get_height_data(
                chf,
                mesh,
                &indices,
                border_size,
                &mut queue,
                mesh.regions[i],
            )
            .ok_or(DetailMeshError::NoSeedSpan { polygon: i })?;

            // Build detail mesh.
            let mut detail = build_poly_detail(
                &poly,
                sample_distance,
                sample_max_error,
                height_search_radius,
                chf,
                &hp,
                &mut samples,
            );

            // Move detail verts to world space.
            for vert in &mut detail.vertices {
                *vert += orig;
                vert.y += chf.cell_height;
            }

            dmesh.meshes.push(SubMesh {
                first_vertex_index: dmesh.vertices.len(),
                vertex_count: detail.vertices.len(),
                first_triangle_index: dmesh.triangles.len(),
                triangle_count: detail.triangles.len(),
            });
            dmesh.vertices.extend(detail.vertices);
            dmesh
                .triangles
                .extend(detail.triangles.iter().map(|(tri, flags)| DetailTriangle {
                    vertices: tri.map(|v| v as u8),
                    flags: *flags,
                }));
        }

        Ok(dmesh)
    }

    /// The world-space vertices of sub-mesh `i`.
    pub fn submesh_vertices(&self, i: usize) -> &[Vec3A] {
        &self.vertices[self.meshes[i].vertex_range()]
    }

    /// The triangles of sub-mesh `i`.
    pub fn submesh_triangles(&self, i: usize) -> &[DetailTriangle] {
        &self.triangles[self.meshes[i].triangle_range()]
    }
}

/// Errors that can occur when building a [`DetailNavmesh`].
#[derive(Error, Debug)]
pub enum DetailMeshError {
    /// A polygon has more vertices than a sub-mesh can hold.
    #[error(
        "Polygon {polygon} has {vertices} vertices, detail meshes support at most {}",
        MAX_VERTS - 1
    )]
    PolygonTooLarge {
        /// Index of the polygon
        polygon: usize,
        /// Its vertex count
        vertices: usize,
    },
    /// No span of the compact heightfield lies under the polygon.
    #[error("Found no heightfield span below polygon {polygon} to sample heights from")]
    NoSeedSpan {
        /// Index of the polygon
        polygon: usize,
    },
}

/// A single polygon's detail triangulation, in polygon-local space.
struct PolyDetail {
    vertices: Vec<Vec3A>,
    triangles: Vec<([usize; 3], u8)>,
}

/// A sample on the interior grid of a polygon.
#[derive(Debug, Clone, Copy)]
struct Sample {
    x: i32,
    y: u16,
    z: i32,
    added: bool,
}

fn build_poly_detail(
    input: &[Vec3A],
    sample_dist: f32,
    sample_max_error: f32,
    height_search_radius: i32,
    chf: &CompactHeightfield,
    hp: &HeightPatch,
    samples: &mut Vec<Sample>,
) -> PolyDetail {
    let nin = input.len();
    let mut verts = input.to_vec();
    let mut tris = Vec::new();
    let mut hull = Vec::with_capacity(MAX_VERTS);
    let mut edge = [Vec3A::ZERO; MAX_VERTS_PER_EDGE + 1];

    let cs = chf.cell_size;
    let ics = 1.0 / cs;

    // Calculate minimum extents of the polygon based on input data.
    let min_extent = poly_min_extent(&verts);

    // Tessellate outlines.
    // This is done in separate pass in order to ensure
    // seamless height values across the poly boundaries.
    let mut j = nin - 1;
    for i in 0..nin {
        hull.push(j);
        if sample_dist > 0.0 {
            let mut vj = input[j];
            let mut vi = input[i];
            let mut swapped = false;
            // Make sure the segments are always handled in same order
            // using lexological sort or else there will be seams.
            if (vj.x - vi.x).abs() < 1.0e-6 {
                if vj.z > vi.z {
                    std::mem::swap(&mut vj, &mut vi);
                    swapped = true;
                }
            } else if vj.x > vi.x {
                std::mem::swap(&mut vj, &mut vi);
                swapped = true;
            }
            // Create samples along the edge.
            let dij = vi - vj;
            let d = dij.xz().length();
            let mut nn = 1 + (d / sample_dist).floor() as usize;
            if nn >= MAX_VERTS_PER_EDGE {
                nn = MAX_VERTS_PER_EDGE - 1;
            }
            if verts.len() + nn >= MAX_VERTS {
                nn = (MAX_VERTS - 1).saturating_sub(verts.len()).max(1);
            }
            for (k, pos) in edge[..=nn].iter_mut().enumerate() {
                let u = k as f32 / nn as f32;
                *pos = vj + dij * u;
                pos.y = get_height(*pos, ics, chf.cell_height, height_search_radius, hp) as f32
                    * chf.cell_height;
            }
            // Simplify samples.
            let mut idx = Vec::with_capacity(MAX_VERTS_PER_EDGE);
            idx.extend([0, nn]);
            let mut k = 0;
            while k < idx.len() - 1 {
                let a = idx[k];
                let b = idx[k + 1];
                let va = edge[a];
                let vb = edge[b];
                // Find maximum deviation along the segment.
                let mut maxd = 0.0;
                let mut maxi = None;
                for (m, point) in edge.iter().enumerate().take(b).skip(a + 1) {
                    let dev = distance_squared_point_segment(*point, (va, vb));
                    if dev > maxd {
                        maxd = dev;
                        maxi = Some(m);
                    }
                }
                // If the max deviation is larger than accepted error,
                // add new point, else continue to next segment.
                match maxi {
                    Some(maxi) if maxd > sample_max_error * sample_max_error => {
                        idx.insert(k + 1, maxi);
                    }
                    _ => k += 1,
                }
            }

            // Add new vertices.
            let inner = &idx[1..idx.len() - 1];
            let mut push = |k: &usize| {
                hull.push(verts.len());
                verts.push(edge[*k]);
            };
            if swapped {
                inner.iter().rev().for_each(&mut push);
            } else {
                inner.iter().for_each(&mut push);
            }
        }
        j = i;
    }

    // Tessellate the base mesh.
    // We're using the triangulate_hull instead of delaunay_hull as it tends to
    // create a bit better triangulation for long thin triangles when there
    // are no internal points.
    triangulate_hull(&verts, &hull, nin, &mut tris);

    // If the polygon minimum extent is small (sliver or small triangle), do not try to add internal
    // points.
    if min_extent < sample_dist * 2.0 {
        return finish_poly_detail(verts, tris, &hull);
    }

    if tris.is_empty() {
        // Could not triangulate the poly, make sure there is some valid data there.
        tracing::warn!("Could not triangulate polygon ({} verts)", verts.len());
        return PolyDetail {
            vertices: verts,
            triangles: Vec::new(),
        };
    }

    if sample_dist > 0.0 {
        // Create sample locations in a grid.
        let (min, max) = input
            .iter()
            .fold((input[0], input[0]), |(min, max), v| (min.min(*v), max.max(*v)));
        let x0 = (min.x / sample_dist).floor() as i32;
        let x1 = (max.x / sample_dist).ceil() as i32;
        let z0 = (min.z / sample_dist).floor() as i32;
        let z1 = (max.z / sample_dist).ceil() as i32;
        samples.clear();
        for z in z0..z1 {
            for x in x0..x1 {
                let pt = Vec3A::new(
                    x as f32 * sample_dist,
                    (max.y + min.y) * 0.5,
                    z as f32 * sample_dist,
                );
                // Make sure the samples are not too close to the edges.
                if dist_to_poly(input, pt) > -sample_dist / 2.0 {
                    continue;
                }
                let y = get_height(pt, ics, chf.cell_height, height_search_radius, hp);
                samples.push(Sample {
                    x,
                    y,
                    z,
                    added: false,
                });
            }
        }

        // Add the samples starting from the one that has the most
        // error. The procedure stops when all samples are added
        // or when the max error is within treshold.
        for _ in 0..samples.len() {
            if verts.len() >= MAX_VERTS {
                break;
            }

            // Find sample with most error.
            let mut best = None;
            let mut bestd = 0.0;
            for (i, sample) in samples.iter().enumerate() {
                if sample.added {
                    continue;
                }
                // The sample location is jittered to get rid of some bad triangulations
                // which are caused by symmetrical data from the grid structure.
                let pt = Vec3A::new(
                    sample.x as f32 * sample_dist + jitter_x(i) * cs * 0.1,
                    sample.y as f32 * chf.cell_height,
                    sample.z as f32 * sample_dist + jitter_z(i) * cs * 0.1,
                );
                let Some(d) = dist_to_tri_mesh(pt, &verts, &tris) else {
                    // did not hit the mesh.
                    continue;
                };
                if d > bestd {
                    bestd = d;
                    best = Some((i, pt));
                }
            }
            // If the max error is within accepted threshold, stop tesselating.
            if bestd <= sample_max_error {
                break;
            }
            let Some((besti, bestpt)) = best else {
                break;
            };
            samples[besti].added = true;
            verts.push(bestpt);

            // Create new triangulation.
            tris.clear();
            delaunay_hull(&verts, &hull, &mut tris);
        }
    }

    if tris.len() > MAX_TRIS {
        tracing::error!(
            "Too many triangles! Shrinking triangle count from {} to {MAX_TRIS}",
            tris.len()
        );
        tris.truncate(MAX_TRIS);
    }
    finish_poly_detail(verts, tris, &hull)
}

fn finish_poly_detail(vertices: Vec<Vec3A>, tris: Vec<[usize; 3]>, hull: &[usize]) -> PolyDetail {
    let triangles = tris
        .into_iter()
        .map(|tri| (tri, tri_flags(tri, hull)))
        .collect();
    PolyDetail {
        vertices,
        triangles,
    }
}

/// Which face lies on one side of a [`DelaunayEdge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Face {
    Undefined,
    Hull,
    Triangle(usize),
}

#[derive(Debug, Clone, Copy)]
struct DelaunayEdge {
    s: usize,
    t: usize,
    left: Face,
    right: Face,
}

impl DelaunayEdge {
    fn connects(&self, s: usize, t: usize) -> bool {
        (self.s == s && self.t == t) || (self.s == t && self.t == s)
    }

    fn update_left_face(&mut self, s: usize, t: usize, face: Face) {
        if self.s == s && self.t == t && self.left == Face::Undefined {
            self.left = face;
        } else if self.t == s && self.s == t && self.right == Face::Undefined {
            self.right = face;
        }
    }
}

struct Triangulation<'a> {
    points: &'a [Vec3A],
    edges: Vec<DelaunayEdge>,
    max_edges: usize,
    faces: usize,
}

impl Triangulation<'_> {
    fn find_edge(&self, s: usize, t: usize) -> Option<usize> {
        self.edges.iter().position(|e| e.connects(s, t))
    }

    fn add_edge(&mut self, s: usize, t: usize, left: Face, right: Face) {
        if self.edges.len() >= self.max_edges {
            tracing::error!("Too many edges ({}/{})", self.edges.len(), self.max_edges);
            return;
        }
        // Add edge if not already in the triangulation.
        if self.find_edge(s, t).is_none() {
            self.edges.push(DelaunayEdge { s, t, left, right });
        }
    }

    /// Whether segment `s1-t1` crosses any edge it does not share a vertex with.
    fn overlaps_edges(&self, s1: usize, t1: usize) -> bool {
        self.edges.iter().any(|e| {
            // Same or connected edges do not overlap.
            if e.s == s1 || e.s == t1 || e.t == s1 || e.t == t1 {
                return false;
            }
            overlap_seg_seg_2d(
                self.points[e.s].xz(),
                self.points[e.t].xz(),
                self.points[s1].xz(),
                self.points[t1].xz(),
            )
        })
    }

    fn complete_facet(&mut self, e: usize) {
        const EPS: f32 = 1.0e-5;
        const TOLERANCE: f32 = 0.001;

        let edge = self.edges[e];
        // Cache s and t.
        let (s, t) = if edge.left == Face::Undefined {
            (edge.s, edge.t)
        } else if edge.right == Face::Undefined {
            (edge.t, edge.s)
        } else {
            // Edge already completed.
            return;
        };

        let ps = self.points[s].xz();
        let pt = self.points[t].xz();
        // Find best point on left of edge.
        let mut best = None;
        let mut circle = Circle::default();
        for u in 0..self.points.len() {
            if u == s || u == t {
                continue;
            }
            let pu = self.points[u].xz();
            if cross_2d(ps, pt, pu) <= EPS {
                continue;
            }
            if best.is_none() {
                // The circle is not updated yet, do it now.
                best = Some(u);
                circle = Circle::through(ps, pt, pu);
                continue;
            }
            let d = circle.center.distance(pu);
            if d > circle.radius * (1.0 + TOLERANCE) {
                // Outside current circumcircle, skip.
                continue;
            }
            if d >= circle.radius * (1.0 - TOLERANCE)
                && (self.overlaps_edges(s, u) || self.overlaps_edges(t, u))
            {
                // On the circle, but s-u or t-u would cross an existing edge.
                continue;
            }
            best = Some(u);
            circle = Circle::through(ps, pt, pu);
        }

        // Add new triangle or update edge info if s-t is on hull.
        let Some(u) = best else {
            self.edges[e].update_left_face(s, t, Face::Hull);
            return;
        };
        let face = Face::Triangle(self.faces);
        // Update face information of edge being completed.
        self.edges[e].update_left_face(s, t, face);
        // Add new edge or update face info of old edge.
        match self.find_edge(u, s) {
            Some(e) => self.edges[e].update_left_face(u, s, face),
            None => self.add_edge(u, s, face, Face::Undefined),
        }
        match self.find_edge(t, u) {
            Some(e) => self.edges[e].update_left_face(t, u, face),
            None => self.add_edge(t, u, face, Face::Undefined),
        }
        self.faces += 1;
    }
}

/// Delaunay triangulation of `points` constrained to the given hull.
fn delaunay_hull(points: &[Vec3A], hull: &[usize], tris: &mut Vec<[usize; 3]>) {
    let mut triangulation = Triangulation {
        points,
        edges: Vec::with_capacity(points.len() * 3),
        max_edges: points.len() * 10,
        faces: 0,
    };

    let mut j = hull.len() - 1;
    for i in 0..hull.len() {
        triangulation.add_edge(hull[j], hull[i], Face::Hull, Face::Undefined);
        j = i;
    }

    let mut current_edge = 0;
    while current_edge < triangulation.edges.len() {
        if triangulation.edges[current_edge].left == Face::Undefined {
            triangulation.complete_facet(current_edge);
        }
        if triangulation.edges[current_edge].right == Face::Undefined {
            triangulation.complete_facet(current_edge);
        }
        current_edge += 1;
    }

    // Create tris
    let mut faces = vec![[None::<usize>; 3]; triangulation.faces];
    for e in &triangulation.edges {
        if let Face::Triangle(f) = e.right {
            let t = &mut faces[f];
            if t[0].is_none() {
                t[0] = Some(e.s);
                t[1] = Some(e.t);
            } else if t[0] == Some(e.t) {
                t[2] = Some(e.s);
            } else if t[1] == Some(e.s) {
                t[2] = Some(e.t);
            }
        }
        if let Face::Triangle(f) = e.left {
            let t = &mut faces[f];
            if t[0].is_none() {
                t[0] = Some(e.t);
                t[1] = Some(e.s);
            } else if t[0] == Some(e.s) {
                t[2] = Some(e.t);
            } else if t[1] == Some(e.t) {
                t[2] = Some(e.s);
            }
        }
    }

    tris.clear();
    for (i, face) in faces.into_iter().enumerate() {
        match face {
            [Some(a), Some(b), Some(c)] => tris.push([a, b, c]),
            _ => tracing::warn!("Removing dangling face {i} {face:?}"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Circle {
    center: Vec2,
    radius: f32,
}

impl Circle {
    /// The circumcircle of a triangle, or a zero-sized circle at `p1` if it is degenerate.
    fn through(p1: Vec2, p2: Vec2, p3: Vec2) -> Self {
        const EPS: f32 = 1.0e-6;
        // Calculate the circle relative to p1, to avoid some precision issues.
        let v2 = p2 - p1;
        let v3 = p3 - p1;
        let cp = v2.perp_dot(v3);
        if cp.abs() <= EPS {
            return Circle {
                center: p1,
                radius: 0.0,
            };
        }
        let v2_sq = v2.length_squared();
        let v3_sq = v3.length_squared();
        let center = Vec2::new(
            (v2_sq * v3.y - v3_sq * v2.y) / (2.0 * cp),
            (v3_sq * v2.x - v2_sq * v3.x) / (2.0 * cp),
        );
        Circle {
            center: center + p1,
            radius: center.length(),
        }
    }
}

/// Twice the signed area of the triangle `a, b, c` on the xz-plane.
#[inline]
fn cross_2d(a: Vec2, b: Vec2, c: Vec2) -> f32 {
    (b - a).perp_dot(c - a)
}

fn overlap_seg_seg_2d(a: Vec2, b: Vec2, c: Vec2, d: Vec2) -> bool {
    let a1 = cross_2d(a, b, d);
    let a2 = cross_2d(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = cross_2d(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

fn dist_to_tri_mesh(p: Vec3A, verts: &[Vec3A], tris: &[[usize; 3]]) -> Option<f32> {
    tris.iter()
        .filter_map(|[a, b, c]| dist_pt_tri(p, verts[*a], verts[*b], verts[*c]))
        .min_by(f32::total_cmp)
}

/// Vertical distance from point p to triangle defined by vertices a, b, and c.
/// Returns None if the point is outside the triangle on the xz-plane.
fn dist_pt_tri(p: Vec3A, a: Vec3A, b: Vec3A, c: Vec3A) -> Option<f32> {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let dot00 = v0.xz().dot(v0.xz());
    let dot01 = v0.xz().dot(v1.xz());
    let dot02 = v0.xz().dot(v2.xz());
    let dot11 = v1.xz().dot(v1.xz());
    let dot12 = v1.xz().dot(v2.xz());

    // Compute barycentric coordinates
    let inv_denom = 1.0 / (dot00 * dot11 - dot01 * dot01);
    let u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_denom;

    // If point lies inside the triangle, return interpolated y-coord.
    const EPS: f32 = 1.0e-4;
    if u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS {
        let y = a.y + v0.y * u + v1.y * v;
        Some((y - p.y).abs())
    } else {
        None
    }
}

fn jitter_x(i: usize) -> f32 {
    ((i as u32).wrapping_mul(0x8da6b343) & 0xffff) as f32 / 65535.0 * 2.0 - 1.0
}

fn jitter_z(i: usize) -> f32 {
    ((i as u32).wrapping_mul(0xd8163841) & 0xffff) as f32 / 65535.0 * 2.0 - 1.0
}

/// Squared distance to the polygon outline on the xz-plane, negative when inside.
fn dist_to_poly(verts: &[Vec3A], p: Vec3A) -> f32 {
    let mut dmin = f32::MAX;
    let mut inside = false;
    let mut j = verts.len() - 1;
    for i in 0..verts.len() {
        let vi = verts[i];
        let vj = verts[j];
        if (vi.z > p.z) != (vj.z > p.z) && p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        dmin = dmin.min(distance_squared_point_segment_2d(
            p.xz(),
            (vj.xz(), vi.xz()),
        ));
        j = i;
    }
    if inside { -dmin } else { dmin }
}

/// Marks the edges of a triangle that lie on the hull.
fn tri_flags([a, b, c]: [usize; 3], hull: &[usize]) -> u8 {
    let edge = |s, t, shift: u8| {
        if on_hull(s, t, hull) {
            DetailTriangle::EDGE_BOUNDARY << shift
        } else {
            0
        }
    };
    edge(a, b, 0) | edge(b, c, 2) | edge(c, a, 4)
}

fn on_hull(a: usize, b: usize, hull: &[usize]) -> bool {
    // All internal sampled points come after the hull so we can early out for those.
    if a >= hull.len() || b >= hull.len() {
        return false;
    }
    let mut j = hull.len() - 1;
    for i in 0..hull.len() {
        if a == hull[j] && b == hull[i] {
            return true;
        }
        j = i;
    }
    false
}

fn triangulate_hull(verts: &[Vec3A], hull: &[usize], nin: usize, tris: &mut Vec<[usize; 3]>) {
    let nhull = hull.len();
    let mut start = 0;
    let mut left = 1;
    let mut right = nhull - 1;

    // Start from an ear with shortest perimeter.
    // This tends to favor well formed triangles as starting point.
    let mut dmin = f32::MAX;
    for i in 0..nhull {
        if hull[i] >= nin {
            // Ears are triangles with original vertices as middle vertex while others are actually
            // line segments on edges
            continue;
        }
        let pi = prev(i, nhull);
        let ni = next(i, nhull);
        let pv = verts[hull[pi]].xz();
        let cv = verts[hull[i]].xz();
        let nv = verts[hull[ni]].xz();
        let d = pv.distance(cv) + cv.distance(nv) + nv.distance(pv);
        if d < dmin {
            start = i;
            left = ni;
            right = pi;
            dmin = d;
        }
    }

    // Add first triangle
    tris.push([hull[start], hull[left], hull[right]]);

    // Triangulate the polygon by moving left or right,
    // depending on which triangle has shorter perimeter.
    // This heuristic was chose empirically, since it seems
    // handle tessellated straight edges well.
    while next(left, nhull) != right {
        // Check to see if se should advance left or right.
        let nleft = next(left, nhull);
        let nright = prev(right, nhull);

        let cvleft = verts[hull[left]].xz();
        let nvleft = verts[hull[nleft]].xz();
        let cvright = verts[hull[right]].xz();
        let nvright = verts[hull[nright]].xz();
        let dleft = cvleft.distance(nvleft) + nvleft.distance(cvright);
        let dright = cvright.distance(nvright) + cvleft.distance(nvright);
        if dleft < dright {
            tris.push([hull[left], hull[nleft], hull[right]]);
            left = nleft;
        } else {
            tris.push([hull[left], hull[nright], hull[right]]);
            right = nright;
        }
    }
}

fn get_height(f: Vec3A, ics: f32, ch: f32, radius: i32, hp: &HeightPatch) -> u16 {
    let ix = (f.x * ics + 0.01).floor() as i32;
    let iz = (f.z * ics + 0.01).floor() as i32;
    let ix = (ix - hp.xmin).clamp(0, hp.width - 1);
    let iz = (iz - hp.zmin).clamp(0, hp.height - 1);
    let mut h = hp.at(ix, iz);
    if h != UNSET_HEIGHT {
        return h;
    }
    // Special case when data might be bad.
    // Walk adjacent cells in a spiral up to 'radius', and look
    // for a pixel which has a valid height.
    let (mut x, mut z, mut dx, mut dz) = (1, 0, 1, 0);
    let max_size = radius * 2 + 1;
    let max_iter = max_size * max_size - 1;

    let mut next_ring_iter_start = 8;
    let mut next_ring_iters = 16;

    let mut dmin = f32::MAX;
    for i in 0..max_iter {
        let nx = ix + x;
        let nz = iz + z;
        if nx >= 0 && nz >= 0 && nx < hp.width && nz < hp.height {
            let nh = hp.at(nx, nz);
            if nh != UNSET_HEIGHT {
                let d = (nh as f32 * ch - f.y).abs();
                if d < dmin {
                    h = nh;
                    dmin = d;
                }
            }
        }
        // Each ring around the center holds 8 more cells than the previous one.
        // Stop at the end of the first ring that produced a height, so the result
        // stays as close to the center as possible.
        if i + 1 == next_ring_iter_start {
            if h != UNSET_HEIGHT {
                break;
            }
            next_ring_iter_start += next_ring_iters;
            next_ring_iters += 8;
        }

        if x == z || (x < 0 && x == -z) || (x > 0 && x == 1 - z) {
            (dx, dz) = (-dz, dx);
        }
        x += dx;
        z += dz;
    }
    h
}

/// The smallest of the polygon's widths, measured from each edge to its farthest vertex.
fn poly_min_extent(verts: &[Vec3A]) -> f32 {
    let nverts = verts.len();
    let mut min_dist = f32::MAX;
    for i in 0..nverts {
        let ni = next(i, nverts);
        let p1 = verts[i].xz();
        let p2 = verts[ni].xz();
        let max_edge_dist = (0..nverts)
            .filter(|j| *j != i && *j != ni)
            .map(|j| distance_squared_point_segment_2d(verts[j].xz(), (p1, p2)))
            .fold(0.0_f32, f32::max);
        min_dist = min_dist.min(max_edge_dist);
    }
    min_dist.sqrt()
}

/// Heightfield samples below a single polygon, in polygon mesh cell coordinates.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct HeightPatch {
    data: Vec<u16>,
    xmin: i32,
    zmin: i32,
    width: i32,
    height: i32,
}

impl HeightPatch {
    /// Resizes the patch to cover the polygon's bounds plus one cell.
    fn fit_to_polygon(&mut self, mesh: &PolygonMesh, poly: &[u16], chf: &CompactHeightfield) {
        let (mut xmin, mut xmax) = (chf.width as i32, 0);
        let (mut zmin, mut zmax) = (chf.height as i32, 0);
        for v in poly.iter().map(|i| mesh.vertices[*i as usize]) {
            xmin = xmin.min(v.x as i32);
            xmax = xmax.max(v.x as i32);
            zmin = zmin.min(v.z as i32);
            zmax = zmax.max(v.z as i32);
        }
        xmin = (xmin - 1).max(0);
        xmax = (xmax + 1).min(chf.width as i32);
        zmin = (zmin - 1).max(0);
        zmax = (zmax + 1).min(chf.height as i32);
        self.xmin = xmin;
        self.zmin = zmin;
        self.width = (xmax - xmin).max(1);
        self.height = (zmax - zmin).max(1);
        self.data.clear();
        self.data
            .resize(self.width as usize * self.height as usize, UNSET_HEIGHT);
    }

    /// Fills the patch with span heights reachable from the polygon's region.
    ///
    /// Reads from the heightfield are offset by `bs`, since the border offset was
    /// already removed from the polygon mesh vertices.
    fn get_height_data(
        &mut self,
        chf: &CompactHeightfield,
        mesh: &PolygonMesh,
        poly: &[u16],
        bs: u16,
        queue: &mut VecDeque<(i32, i32, usize)>,
        region: RegionId,
    ) -> Option<()> {
        let bs = bs as i32;
        queue.clear();
        self.data.fill(UNSET_HEIGHT);

        let mut empty = true;

        // We cannot sample from this poly if it was created from polys
        // of different regions. If it was then it could potentially be overlapping
        // with polys of that region and the heights sampled here could be wrong.
        if region != RegionId::NONE {
            // Copy the height from the same region, and mark region borders
            // as seed points to fill the rest.
            for hz in 0..self.height {
                let z = self.zmin + hz + bs;
                for hx in 0..self.width {
                    let x = self.xmin + hx + bs;
                    let Some(cell) = chf.get_cell_at(x as u16, z as u16) else {
                        continue;
                    };
                    let Some(i) = cell
                        .index_range()
                        .find(|i| chf.spans[*i].region == region)
                    else {
                        continue;
                    };
                    let span = &chf.spans[i];
                    *self.at_mut(hx, hz) = span.y;
                    empty = false;

                    // If any of the neighbours is not in same region,
                    // add the current location as flood fill start
                    let border = (0..4).any(|dir| {
                        span.con(dir).is_some_and(|con| {
                            let (_, _, ai) = chf.con_indices(x, z, dir, con);
                            chf.spans[ai].region != region
                        })
                    });
                    if border {
                        queue.push_back((x, z, i));
                    }
                }
            }
        }

        // if the polygon does not contain any points from the current region (rare, but happens)
        // or if it could potentially be overlapping polygons of the same region,
        // then use the center as the seed point.
        if empty {
            self.seed_with_poly_center(chf, mesh, poly, bs, queue)?;
        }

        // We assume the seed is centered in the polygon, so a BFS to collect
        // height data will ensure we do not move onto overlapping polygons and
        // sample wrong heights.
        while let Some((cx, cz, ci)) = queue.pop_front() {
            let span = &chf.spans[ci];
            for dir in 0..4 {
                let Some(con) = span.con(dir) else {
                    continue;
                };
                let (ax, az, ai) = chf.con_indices(cx, cz, dir, con);
                let hx = ax - self.xmin - bs;
                let hz = az - self.zmin - bs;
                if !self.contains(hx, hz) || self.at(hx, hz) != UNSET_HEIGHT {
                    continue;
                }
                *self.at_mut(hx, hz) = chf.spans[ai].y;
                queue.push_back((ax, az, ai));
            }
        }
        Some(())
    }

    /// Walks from the polygon vertex closest to the heightfield to the polygon center
    /// and seeds `queue` with the span found there.
    fn seed_with_poly_center(
        &mut self,
        chf: &CompactHeightfield,
        mesh: &PolygonMesh,
        poly: &[u16],
        bs: i32,
        queue: &mut VecDeque<(i32, i32, usize)>,
    ) -> Option<()> {
        const OFFSET: [(i32, i32); 9] = [
            (0, 0),
            (-1, -1),
            (0, -1),
            (1, -1),
            (1, 0),
            (1, 1),
            (0, 1),
            (-1, 1),
            (-1, 0),
        ];

        // Find cell closest to a poly vertex
        let mut start = None;
        let mut dmin = UNSET_HEIGHT as i32;
        'search: for v in poly.iter().map(|i| mesh.vertices[*i as usize]) {
            for (ox, oz) in OFFSET {
                let ax = v.x as i32 + ox;
                let az = v.z as i32 + oz;
                if !self.contains(ax - self.xmin, az - self.zmin) {
                    continue;
                }
                let Some(cell) = chf.get_cell_at((ax + bs) as u16, (az + bs) as u16) else {
                    continue;
                };
                for i in cell.index_range() {
                    let d = (v.y as i32 - chf.spans[i].y as i32).abs();
                    if d < dmin {
                        start = Some((ax, az, i));
                        dmin = d;
                    }
                }
                if dmin <= 0 {
                    break 'search;
                }
            }
        }
        let start = start?;

        // Find center of the polygon
        let (sum_x, sum_z) = poly
            .iter()
            .map(|i| mesh.vertices[*i as usize])
            .fold((0, 0), |(x, z), v| (x + v.x as i32, z + v.z as i32));
        let pcx = sum_x / poly.len() as i32;
        let pcz = sum_z / poly.len() as i32;

        // DFS to move to the center. Note that we need a DFS here and can not just move
        // directly towards the center without recording intermediate nodes, even though the
        // polygons
        // are convex. In very rare cases we can get stuck due to contour simplification if we do
        // not
        // record nodes.
        // The patch doubles as the visited set.
        self.data.fill(0);
        let mut stack = vec![start];
        let mut dirs = [0, 1, 2, 3];
        let mut current = start;
        let mut reached = false;
        while let Some(top) = stack.pop() {
            current = top;
            let (cx, cz, ci) = current;
            if cx == pcx && cz == pcz {
                reached = true;
                break;
            }

            // If we are already at the correct X-position, prefer direction
            // directly towards the center in the Z-axis; otherwise prefer
            // direction in the X-axis
            let direct_dir = if cx == pcx {
                dir_for_offset(0, if pcz > cz { 1 } else { -1 })
            } else {
                dir_for_offset(if pcx > cx { 1 } else { -1 }, 0)
            } as usize;

            // Push the direct dir last so we start with this on next iteration
            dirs.swap(direct_dir, 3);

            let span = &chf.spans[ci];
            for dir in dirs {
                let Some(con) = span.con(dir) else {
                    continue;
                };
                let new_x = cx + dir_offset_x(dir) as i32;
                let new_z = cz + dir_offset_z(dir) as i32;
                let hpx = new_x - self.xmin;
                let hpz = new_z - self.zmin;
                if !self.contains(hpx, hpz) || self.at(hpx, hpz) != 0 {
                    continue;
                }
                *self.at_mut(hpx, hpz) = 1;
                let (_, _, new_index) = chf.con_indices(cx + bs, cz + bs, dir, con);
                stack.push((new_x, new_z, new_index));
            }
            dirs.swap(direct_dir, 3);
        }
        if !reached {
            tracing::warn!("Walk towards polygon center failed to reach center");
        }

        // get_height_data seeds are given in coordinates with borders
        let (cx, cz, ci) = current;
        queue.clear();
        queue.push_back((cx + bs, cz + bs, ci));
        self.data.fill(UNSET_HEIGHT);
        *self.at_mut(cx - self.xmin, cz - self.zmin) = chf.spans[ci].y;
        Some(())
    }

    #[inline]
    fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && z >= 0 && x < self.width && z < self.height
    }

    #[inline]
    fn at(&self, x: i32, z: i32) -> u16 {
        self.data[(x + z * self.width) as usize]
    }

    #[inline]
    fn at_mut(&mut self, x: i32, z: i32) -> &mut u16 {
        &mut self.data[(x + z * self.width) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BuildContoursFlags,
        compact_heightfield::tests::{flat, heightfield_from_fn},
    };

    fn polygon_mesh(chf: &mut CompactHeightfield) -> PolygonMesh {
        chf.build_regions_monotone(0, 0, 0).unwrap();
        chf.build_contours(1.3, 0, BuildContoursFlags::DEFAULT)
            .unwrap()
            .into_polygon_mesh(6)
            .unwrap()
    }

    fn triangle_area(a: Vec3A, b: Vec3A, c: Vec3A) -> f32 {
        cross_2d(a.xz(), b.xz(), c.xz()).abs() / 2.0
    }

    fn covered_area(detail: &DetailNavmesh, i: usize) -> f32 {
        let vertices = detail.submesh_vertices(i);
        detail
            .submesh_triangles(i)
            .iter()
            .map(|t| {
                let [a, b, c] = t.vertices.map(|v| vertices[v as usize]);
                triangle_area(a, b, c)
            })
            .sum()
    }

    #[test]
    fn flat_quad_keeps_its_corners() {
        let mut chf = flat(12);
        let mesh = polygon_mesh(&mut chf);
        let detail = DetailNavmesh::new(&mesh, &chf, 2.0, 1.0).unwrap();

        assert_eq!(detail.meshes.len(), mesh.polygon_count());
        for i in 0..mesh.polygon_count() {
            let corners = mesh.polygon_vertices(i).count();
            assert_eq!(detail.meshes[i].vertex_count, corners);
            assert_eq!(detail.meshes[i].triangle_count, corners - 2);
            for v in detail.submesh_vertices(i) {
                // Span top at 1, plus one cell of clearance.
                assert_eq!(v.y, 2.0);
            }
        }
        let total: f32 = (0..mesh.polygon_count()).map(|i| covered_area(&detail, i)).sum();
        approx::assert_relative_eq!(total, 144.0);
    }

    #[test]
    fn polygon_vertices_come_first() {
        let mut chf = flat(8);
        let mesh = polygon_mesh(&mut chf);
        let detail = DetailNavmesh::new(&mesh, &chf, 2.0, 1.0).unwrap();
        for i in 0..mesh.polygon_count() {
            for (v, corner) in detail.submesh_vertices(i).iter().zip(mesh.polygon_vertices(i)) {
                let corner = mesh.vertices[corner as usize];
                assert_eq!(v.x, corner.x as f32 * mesh.cell_size + mesh.aabb.min.x);
                assert_eq!(v.z, corner.z as f32 * mesh.cell_size + mesh.aabb.min.z);
            }
        }
    }

    #[test]
    fn outline_edges_are_flagged() {
        let mut chf = flat(8);
        let mesh = polygon_mesh(&mut chf);
        let detail = DetailNavmesh::new(&mesh, &chf, 2.0, 1.0).unwrap();
        for i in 0..mesh.polygon_count() {
            let boundary_edges = detail
                .submesh_triangles(i)
                .iter()
                .map(|t| (0..3).filter(|k| t.is_boundary_edge(*k)).count())
                .sum::<usize>();
            assert_eq!(boundary_edges, mesh.polygon_vertices(i).count());
        }
    }

    #[test]
    fn ramp_is_resampled() {
        let mut chf = heightfield_from_fn(12, |x, _| Some(x + 1))
            .into_compact(2, 1)
            .unwrap();
        let mesh = polygon_mesh(&mut chf);
        let detail = DetailNavmesh::new(&mesh, &chf, 1.0, 0.1).unwrap();

        let corners: usize = (0..mesh.polygon_count())
            .map(|i| mesh.polygon_vertices(i).count())
            .sum();
        assert!(detail.vertices.len() > corners);
        for v in &detail.vertices {
            // Column x has its top at x + 1, the detail surface sits one cell above it.
            let column = (v.x + 0.01).floor().clamp(0.0, 11.0);
            assert!((v.y - (column + 2.0)).abs() <= 1.01, "{v}");
        }
        let total: f32 = (0..mesh.polygon_count()).map(|i| covered_area(&detail, i)).sum();
        approx::assert_relative_eq!(total, 144.0, epsilon = 1.0e-3);
    }

    #[test]
    fn empty_mesh_builds_empty_detail() {
        let chf = flat(4);
        let mesh = PolygonMesh::default();
        let detail = DetailNavmesh::new(&mesh, &chf, 2.0, 1.0).unwrap();
        assert!(detail.meshes.is_empty());
        assert!(detail.vertices.is_empty());
    }

    #[test]
    fn delaunay_fans_around_an_interior_point() {
        let points = [
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(0.0, 0.0, 4.0),
            Vec3A::new(4.0, 0.0, 4.0),
            Vec3A::new(4.0, 0.0, 0.0),
            Vec3A::new(2.1, 0.0, 1.9),
        ];
        let mut tris = Vec::new();
        delaunay_hull(&points, &[0, 1, 2, 3], &mut tris);
        assert_eq!(tris.len(), 4);
        assert!(tris.iter().all(|t| t.contains(&4)));
        let area: f32 = tris
            .iter()
            .map(|[a, b, c]| triangle_area(points[*a], points[*b], points[*c]))
            .sum();
        approx::assert_relative_eq!(area, 16.0, epsilon = 1.0e-4);
    }

    #[test]
    fn height_lookup_spirals_to_nearest_sample() {
        let mut hp = HeightPatch {
            data: vec![UNSET_HEIGHT; 9],
            xmin: 0,
            zmin: 0,
            width: 3,
            height: 3,
        };
        *hp.at_mut(2, 1) = 7;
        assert_eq!(get_height(Vec3A::new(1.5, 0.0, 1.5), 1.0, 1.0, 1, &hp), 7);
        *hp.at_mut(1, 1) = 3;
        assert_eq!(get_height(Vec3A::new(1.5, 0.0, 1.5), 1.0, 1.0, 1, &hp), 3);
    }
}
