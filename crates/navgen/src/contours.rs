//! Region outlines, traced on the voxel grid and simplified into polygons.

use glam::{U16Vec3, Vec2};
use thiserror::Error;
use tracing::{error, warn};

use crate::{
    Aabb3d, AreaType, CompactHeightfield, RegionId,
    math::{
        distance_squared_point_segment_2d, intersect, left, left_on, next, prev, xz_equal,
    },
};

impl CompactHeightfield {
    /// Builds a contour set from the region outlines in the provided compact heightfield.
    ///
    /// The raw contours will match the region outlines exactly. The `max_error` and `max_edge_len`
    /// parameters control how closely the simplified contours will match the raw contours.
    ///
    /// Simplified contours are generated such that the vertices for portals between areas match up.
    /// (They are considered mandatory vertices.)
    ///
    /// Setting `max_edge_len` to zero will disable the edge length feature.
    ///
    /// # Arguments
    ///
    /// - `max_error` - The maximum distance a simplified contour's border edges should deviate
    ///   the original raw contour. `[Limit: >=0] [Units: wu]`
    /// - `max_edge_len` - The maximum allowed length for contour edges along the border of the
    ///   mesh. `[Limit: >=0] [Units: vx]`
    /// - `build_flags` - Which edges get tessellated when they are longer than `max_edge_len`.
    ///
    /// # Errors
    ///
    /// Returns [`ContourError::NoContours`] if no region produced a contour.
    pub fn build_contours(
        &self,
        max_error: f32,
        max_edge_len: u16,
        build_flags: BuildContoursFlags,
    ) -> Result<ContourSet, ContourError> {
        let border_size = self.border_size;
        let mut aabb = self.aabb;
        if border_size > 0 {
            // If the heightfield was built with border_size, remove the offset
            let pad = border_size as f32 * self.cell_size;
            aabb.min.x += pad;
            aabb.min.z += pad;
            aabb.max.x -= pad;
            aabb.max.z -= pad;
        }

        let mut contours = Vec::with_capacity(self.max_region.bits().max(8) as usize);
        let mut flags = self.boundary_edge_flags();
        let mut verts = Vec::with_capacity(256);

        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    if flags[i] == 0 || flags[i] == 0xf {
                        flags[i] = 0;
                        continue;
                    }
                    let region = self.spans[i].region;
                    if region == RegionId::NONE || region.is_border() {
                        continue;
                    }

                    verts.clear();
                    self.walk_contour(x, z, i, &mut flags, &mut verts);

                    let mut simplified =
                        simplify_contour(&verts, max_error, max_edge_len, build_flags);
                    remove_degenerate_segments(&mut simplified);

                    if simplified.len() < 3 {
                        continue;
                    }
                    let mut contour = Contour {
                        vertices: simplified,
                        raw_vertices: verts.clone(),
                        region,
                        area: self.areas[i],
                    };
                    if border_size > 0 {
                        // If the heightfield was built with border_size, remove the offset.
                        for vertex in contour
                            .vertices
                            .iter_mut()
                            .chain(contour.raw_vertices.iter_mut())
                        {
                            vertex.position.x = vertex.position.x.saturating_sub(border_size);
                            vertex.position.z = vertex.position.z.saturating_sub(border_size);
                        }
                    }
                    contours.push(contour);
                }
            }
        }

        merge_holes(&mut contours, self.max_region);
        contours.retain(|contour| !contour.vertices.is_empty());

        if contours.is_empty() {
            return Err(ContourError::NoContours);
        }

        Ok(ContourSet {
            contours,
            aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            width: self.width.saturating_sub(border_size * 2),
            height: self.height.saturating_sub(border_size * 2),
            border_size,
            max_error,
        })
    }

    /// One bit per direction for every span, set where the neighbor belongs to another region.
    fn boundary_edge_flags(&self) -> Vec<u8> {
        let mut flags = vec![0_u8; self.spans.len()];
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    let region = self.spans[i].region;
                    if region == RegionId::NONE || region.is_border() {
                        continue;
                    }
                    let mut connected = 0;
                    for dir in 0..4 {
                        let neighbor_region = self
                            .neighbor_index(x, z, i, dir)
                            .map_or(RegionId::NONE, |a_i| self.spans[a_i].region);
                        if neighbor_region == region {
                            connected |= 1 << dir;
                        }
                    }
                    // Inverse, mark non connected edges.
                    flags[i] = connected ^ 0xf;
                }
            }
        }
        flags
    }

    fn walk_contour(
        &self,
        mut x: u16,
        mut z: u16,
        mut i: usize,
        flags: &mut [u8],
        points: &mut Vec<ContourVertex>,
    ) {
        // Choose the first non-connected edge
        let mut dir = 0;
        while flags[i] & (1 << dir) == 0 {
            dir += 1;
        }

        let start_dir = dir;
        let start_i = i;
        let area = self.areas[i];

        for _ in 0..40_000 {
            if flags[i] & (1 << dir) != 0 {
                // Choose the edge corner
                let (p_y, is_border_vertex) = self.corner_height(x, z, i, dir);
                let (p_x, p_z) = match dir {
                    0 => (x, z + 1),
                    1 => (x + 1, z + 1),
                    2 => (x + 1, z),
                    _ => (x, z),
                };
                let mut region = RegionVertexId::NONE;
                if let Some(a_i) = self.neighbor_index(x, z, i, dir) {
                    region = RegionVertexId::from(self.spans[a_i].region);
                    if area != self.areas[a_i] {
                        region |= RegionVertexId::AREA_BORDER;
                    }
                }
                if is_border_vertex {
                    region |= RegionVertexId::BORDER_VERTEX;
                }
                points.push(ContourVertex {
                    position: U16Vec3::new(p_x, p_y, p_z),
                    region,
                });

                // Remove visited edges
                flags[i] &= !(1 << dir);
                // Rotate clockwise
                dir = (dir + 1) & 0x3;
            } else {
                let Some(con) = self.spans[i].con(dir) else {
                    // Should not happen.
                    return;
                };
                let (n_x, n_z, n_i) = self.con_indices(x as i32, z as i32, dir, con);
                x = n_x as u16;
                z = n_z as u16;
                i = n_i;
                // Rotate counterclockwise
                dir = (dir + 3) & 0x3;
            }
            if start_i == i && start_dir == dir {
                break;
            }
        }
    }

    /// The height of the corner shared by the edge `dir` of span `i` and the edge after it,
    /// and whether the corner is a tile border vertex that will be removed later.
    fn corner_height(&self, x: u16, z: u16, i: usize, dir: u8) -> (u16, bool) {
        let span = &self.spans[i];
        let mut height = span.y;
        let dir_p = (dir + 1) & 0x3;

        // Combine region and area codes in order to prevent
        // border vertices which are in between two areas to be removed.
        let region_and_area =
            |i: usize| self.spans[i].region.bits() as u32 | ((self.areas[i].0 as u32) << 16);
        let mut regs = [0_u32; 4];
        regs[0] = region_and_area(i);

        if let Some(con) = span.con(dir) {
            let (a_x, a_z, a_i) = self.con_indices(x as i32, z as i32, dir, con);
            let a_span = &self.spans[a_i];
            height = height.max(a_span.y);
            regs[1] = region_and_area(a_i);
            if let Some(con) = a_span.con(dir_p) {
                let (_, _, b_i) = self.con_indices(a_x, a_z, dir_p, con);
                height = height.max(self.spans[b_i].y);
                regs[2] = region_and_area(b_i);
            }
        }
        if let Some(con) = span.con(dir_p) {
            let (a_x, a_z, a_i) = self.con_indices(x as i32, z as i32, dir_p, con);
            let a_span = &self.spans[a_i];
            height = height.max(a_span.y);
            regs[3] = region_and_area(a_i);
            if let Some(con) = a_span.con(dir) {
                let (_, _, b_i) = self.con_indices(a_x, a_z, dir, con);
                height = height.max(self.spans[b_i].y);
                regs[2] = region_and_area(b_i);
            }
        }

        // Check if the vertex is special edge vertex, these vertices will be removed later.
        let border = RegionId::BORDER_REGION.bits() as u32;
        let is_border_vertex = (0..4).any(|j| {
            let a = regs[j];
            let b = regs[(j + 1) & 0x3];
            let c = regs[(j + 2) & 0x3];
            let d = regs[(j + 3) & 0x3];

            // The vertex is a border vertex there are two same exterior cells in a row,
            // followed by two interior cells and none of the regions are out of bounds.
            let two_same_exts = (a & b & border) != 0 && a == b;
            let two_ints = ((c | d) & border) == 0;
            let ints_same_area = (c >> 16) == (d >> 16);
            let no_zeros = a != 0 && b != 0 && c != 0 && d != 0;
            two_same_exts && two_ints && ints_same_area && no_zeros
        });
        (height, is_border_vertex)
    }
}

#[inline]
fn xz(position: U16Vec3) -> Vec2 {
    Vec2::new(position.x as f32, position.z as f32)
}

/// Whether the path from `a` to `b` runs in increasing lexicographic order on the xz-plane.
#[inline]
fn is_lexicographic(a: U16Vec3, b: U16Vec3) -> bool {
    b.x > a.x || (b.x == a.x && b.z > a.z)
}

fn simplify_contour(
    points: &[ContourVertex],
    max_error: f32,
    max_edge_len: u16,
    build_flags: BuildContoursFlags,
) -> Vec<ContourVertex> {
    let pn = points.len();
    if pn == 0 {
        return Vec::new();
    }
    // Simplified position and the index of the raw vertex it came from.
    let mut simplified: Vec<(U16Vec3, usize)> = Vec::with_capacity(64);

    // Add initial points.
    let has_connections = points
        .iter()
        .any(|point| point.region.intersects(RegionVertexId::REGION_MASK));
    if has_connections {
        // The contour has some portals to other regions.
        // Add a new point to every location where the region changes.
        for (i, point) in points.iter().enumerate() {
            let next_point = &points[(i + 1) % pn];
            let different_regions = point.neighbor_region() != next_point.neighbor_region();
            let area_borders = point.is_area_border() != next_point.is_area_border();
            if different_regions || area_borders {
                simplified.push((point.position, i));
            }
        }
    }

    if simplified.is_empty() {
        // If there is no connections at all,
        // create some initial points for the simplification process.
        // Find lower-left and upper-right vertices of the contour.
        let mut lower_left = (points[0].position, 0);
        let mut upper_right = (points[0].position, 0);
        for (i, point) in points.iter().enumerate() {
            let v = point.position;
            if v.x < lower_left.0.x || (v.x == lower_left.0.x && v.z < lower_left.0.z) {
                lower_left = (v, i);
            }
            if v.x > upper_right.0.x || (v.x == upper_right.0.x && v.z > upper_right.0.z) {
                upper_right = (v, i);
            }
        }
        simplified.push(lower_left);
        simplified.push(upper_right);
    }

    // Add points until all raw points are within
    // error tolerance to the simplified shape.
    let max_error_squared = max_error * max_error;
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();
        let (mut a, a_i) = simplified[i];
        let (mut b, b_i) = simplified[ii];

        // Traverse the segment in lexilogical order so that the
        // max deviation is calculated similarly when traversing
        // opposite segments.
        let (c_inc, mut c_i, end_i) = if is_lexicographic(a, b) {
            (1, (a_i + 1) % pn, b_i)
        } else {
            std::mem::swap(&mut a, &mut b);
            (pn - 1, (b_i + pn - 1) % pn, a_i)
        };

        // Find maximum deviation from the segment.
        let mut max_d = 0.0;
        let mut max_i = None;
        // Tessellate only outer edges or edges between areas.
        let raw = points[c_i].region;
        if !raw.intersects(RegionVertexId::REGION_MASK)
            || raw.contains(RegionVertexId::AREA_BORDER)
        {
            while c_i != end_i {
                let d = distance_squared_point_segment_2d(
                    xz(points[c_i].position),
                    (xz(a), xz(b)),
                );
                if d > max_d {
                    max_d = d;
                    max_i = Some(c_i);
                }
                c_i = (c_i + c_inc) % pn;
            }
        }

        // If the max deviation is larger than accepted error,
        // add new point, else continue to next segment.
        match max_i {
            Some(max_i) if max_d > max_error_squared => {
                simplified.insert(i + 1, (points[max_i].position, max_i));
            }
            _ => i += 1,
        }
    }

    // Split too long edges.
    let tessellate_walls = build_flags.contains(BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES);
    let tessellate_areas = build_flags.contains(BuildContoursFlags::TESSELLATE_AREA_EDGES);
    if max_edge_len > 0 && (tessellate_walls || tessellate_areas) {
        let max_edge_len_squared = max_edge_len as i32 * max_edge_len as i32;
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();
            let (a, a_i) = simplified[i];
            let (b, b_i) = simplified[ii];

            // Find maximum deviation from the segment.
            let raw = points[(a_i + 1) % pn].region;
            // Tessellate only outer edges or edges between areas.
            let tessellate = (tessellate_walls && !raw.intersects(RegionVertexId::REGION_MASK))
                || (tessellate_areas && raw.contains(RegionVertexId::AREA_BORDER));

            let mut max_i = None;
            if tessellate {
                let d = b.as_ivec3() - a.as_ivec3();
                if d.x * d.x + d.z * d.z > max_edge_len_squared {
                    // Round based on the segments in lexilogical order so that the
                    // max tesselation is consistent regardless in which direction
                    // segments are traversed.
                    let n = if b_i < a_i { b_i + pn - a_i } else { b_i - a_i };
                    if n > 1 {
                        max_i = Some(if is_lexicographic(a, b) {
                            (a_i + n / 2) % pn
                        } else {
                            (a_i + (n + 1) / 2) % pn
                        });
                    }
                }
            }

            // If the max deviation is larger than accepted error,
            // add new point, else continue to next segment.
            match max_i {
                Some(max_i) => simplified.insert(i + 1, (points[max_i].position, max_i)),
                None => i += 1,
            }
        }
    }

    simplified
        .into_iter()
        .map(|(position, raw_index)| {
            // The edge vertex flag is take from the current raw point,
            // and the neighbour region is take from the next raw point.
            let next_raw = points[(raw_index + 1) % pn].region;
            let current_raw = points[raw_index].region;
            ContourVertex {
                position,
                region: (next_raw
                    & (RegionVertexId::REGION_MASK | RegionVertexId::AREA_BORDER))
                    | (current_raw & RegionVertexId::BORDER_VERTEX),
            }
        })
        .collect()
}

/// Removes adjacent vertices which are equal on the xz-plane, or else the triangulator will get
/// confused.
fn remove_degenerate_segments(simplified: &mut Vec<ContourVertex>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = next(i, simplified.len());
        if xz_equal(simplified[i].position, simplified[ni].position) {
            simplified.remove(i);
        }
        i += 1;
    }
}

/// Twice the signed area of a contour on the xz-plane. Outlines are positive, holes negative.
fn signed_area(vertices: &[ContourVertex]) -> i32 {
    let n = vertices.len();
    let area: i32 = (0..n)
        .map(|i| {
            let vi = vertices[i].position.as_ivec3();
            let vj = vertices[prev(i, n)].position.as_ivec3();
            vi.x * vj.z - vj.x * vi.z
        })
        .sum();
    (area + 1) / 2
}

#[derive(Debug, Clone, Copy)]
struct ContourHole {
    /// Index of the hole in the contour list
    index: usize,
    min_x: u16,
    min_z: u16,
    /// The vertex with the lowest x, ties broken by z
    leftmost: usize,
}

impl ContourHole {
    fn new(index: usize, vertices: &[ContourVertex]) -> Self {
        let mut hole = Self {
            index,
            min_x: vertices[0].position.x,
            min_z: vertices[0].position.z,
            leftmost: 0,
        };
        for (i, vertex) in vertices.iter().enumerate().skip(1) {
            let v = vertex.position;
            if v.x < hole.min_x || (v.x == hole.min_x && v.z < hole.min_z) {
                hole.min_x = v.x;
                hole.min_z = v.z;
                hole.leftmost = i;
            }
        }
        hole
    }
}

/// Splices every hole into the outline of its region, so that each region is described by one
/// simple polygon.
fn merge_holes(contours: &mut [Contour], max_region: RegionId) {
    let windings: Vec<i32> = contours.iter().map(|c| signed_area(&c.vertices)).collect();
    if !windings.iter().any(|winding| *winding < 0) {
        return;
    }

    let region_count = max_region.index() + 1;
    let mut outlines: Vec<Option<usize>> = vec![None; region_count];
    let mut holes: Vec<Vec<usize>> = vec![Vec::new(); region_count];
    for (i, contour) in contours.iter().enumerate() {
        let region = contour.region.index();
        if region >= region_count {
            continue;
        }
        // Positively would contours are outlines, negative holes.
        if windings[i] > 0 {
            if outlines[region].is_some() {
                error!("Multiple outlines for region {region}.");
            }
            outlines[region] = Some(i);
        } else {
            holes[region].push(i);
        }
    }

    for (region, region_holes) in holes.iter().enumerate() {
        if region_holes.is_empty() {
            continue;
        }
        let Some(outline) = outlines[region] else {
            // The region does not have an outline.
            // This can happen if the contour becaomes selfoverlapping because of
            // too aggressive simplification settings.
            error!("Missing outline for region {region}, can't merge its holes.");
            continue;
        };
        merge_region_holes(contours, outline, region_holes);
    }
}

fn merge_region_holes(contours: &mut [Contour], outline: usize, hole_indices: &[usize]) {
    let mut holes: Vec<ContourHole> = hole_indices
        .iter()
        .filter(|&&index| !contours[index].vertices.is_empty())
        .map(|&index| ContourHole::new(index, &contours[index].vertices))
        .collect();
    // Sort holes from left to right.
    holes.sort_by_key(|hole| (hole.min_x, hole.min_z));

    let mut outline_vertices = std::mem::take(&mut contours[outline].vertices);
    let mut diagonals: Vec<(usize, i32)> = Vec::with_capacity(outline_vertices.len());

    // Merge holes into the outline one by one.
    for (i, hole) in holes.iter().enumerate() {
        let hole_vertices = &contours[hole.index].vertices;
        let mut index = None;
        let mut best_vertex = hole.leftmost;
        for _ in 0..hole_vertices.len() {
            // Find potential diagonals.
            // The 'best' vertex must be in the cone described by 3 cosequtive vertices of the
            // outline.
            let corner = hole_vertices[best_vertex].position;
            diagonals.clear();
            for j in 0..outline_vertices.len() {
                if in_cone(j, &outline_vertices, corner) {
                    let d = outline_vertices[j].position.as_ivec3() - corner.as_ivec3();
                    diagonals.push((j, d.x * d.x + d.z * d.z));
                }
            }
            // Sort potential diagonals by distance, we want to make the connection as short as
            // possible.
            diagonals.sort_by_key(|&(_, distance)| distance);

            // Find a diagonal that is not intersecting the outline not the remaining holes.
            index = diagonals.iter().map(|&(vertex, _)| vertex).find(|&vertex| {
                let pt = outline_vertices[vertex].position;
                !intersect_segment_contour(pt, corner, Some(vertex), &outline_vertices)
                    && !holes[i..].iter().any(|other| {
                        intersect_segment_contour(pt, corner, None, &contours[other.index].vertices)
                    })
            });
            // If found non-intersecting diagonal, stop looking.
            if index.is_some() {
                break;
            }
            // All the potential diagonals for the current vertex were intersecting, try next
            // vertex.
            best_vertex = (best_vertex + 1) % hole_vertices.len();
        }

        let Some(index) = index else {
            warn!(
                "Failed to find merge points for a hole in region {}.",
                contours[outline].region.bits()
            );
            continue;
        };
        let hole_vertices = std::mem::take(&mut contours[hole.index].vertices);
        outline_vertices = merge_contours(&outline_vertices, &hole_vertices, index, best_vertex);
    }

    contours[outline].vertices = outline_vertices;
}

/// Joins contour `b` into contour `a` along the diagonal from vertex `ia` of `a` to vertex `ib` of
/// `b`.
fn merge_contours(
    a: &[ContourVertex],
    b: &[ContourVertex],
    ia: usize,
    ib: usize,
) -> Vec<ContourVertex> {
    let mut vertices = Vec::with_capacity(a.len() + b.len() + 2);
    // Copy contour A.
    vertices.extend((0..=a.len()).map(|i| a[(ia + i) % a.len()]));
    // Copy contour B
    vertices.extend((0..=b.len()).map(|i| b[(ib + i) % b.len()]));
    vertices
}

/// Whether the diagonal from vertex `i` to `pj` lies inside the polygon at vertex `i`.
fn in_cone(i: usize, vertices: &[ContourVertex], pj: U16Vec3) -> bool {
    let n = vertices.len();
    let pi = vertices[i].position;
    let pi1 = vertices[next(i, n)].position;
    let pin1 = vertices[prev(i, n)].position;

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Whether the segment `d0 d1` crosses an edge of the contour. Edges incident to vertex `skip` are
/// ignored.
fn intersect_segment_contour(
    d0: U16Vec3,
    d1: U16Vec3,
    skip: Option<usize>,
    vertices: &[ContourVertex],
) -> bool {
    let n = vertices.len();
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i.
        if skip == Some(k) || skip == Some(k1) {
            continue;
        }
        let p0 = vertices[k].position;
        let p1 = vertices[k1].position;
        if xz_equal(d0, p0) || xz_equal(d1, p0) || xz_equal(d0, p1) || xz_equal(d1, p1) {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

/// Represents a group of related contours.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourSet {
    /// An array of the contours in the set.
    pub contours: Vec<Contour>,
    /// The AABB in world space
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The width of the set. (Along the x-axis in cell units.)
    pub width: u16,
    /// The height of the set. (Along the z-axis in cell units.)
    pub height: u16,
    /// The AABB border size used to generate the source data from which the contours were derived.
    pub border_size: u16,
    /// The max edge error that this contour set was simplified with.
    pub max_error: f32,
}

/// Represents a simple, non-overlapping contour in field space.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Contour {
    /// Simplified contour vertex and connection data.
    pub vertices: Vec<ContourVertex>,
    /// Raw contour vertex and connection data.
    pub raw_vertices: Vec<ContourVertex>,
    /// Region ID of the contour.
    pub region: RegionId,
    /// Area type of the contour.
    pub area: AreaType,
}

/// A contour vertex in voxel coordinates, tagged with what lies across the edge that starts at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourVertex {
    /// Position on the grid. `[Units: vx]`
    pub position: U16Vec3,
    /// Neighbor region and edge flags.
    pub region: RegionVertexId,
}

impl ContourVertex {
    /// The region on the other side of the edge, [`RegionId::NONE`] for solid walls.
    #[inline]
    pub fn neighbor_region(&self) -> RegionId {
        RegionId::from(self.region)
    }

    /// Whether the vertex lies on the tile border and will be removed from the polygon mesh.
    #[inline]
    pub fn is_border_vertex(&self) -> bool {
        self.region.contains(RegionVertexId::BORDER_VERTEX)
    }

    /// Whether the edge separates two different area types.
    #[inline]
    pub fn is_area_border(&self) -> bool {
        self.region.contains(RegionVertexId::AREA_BORDER)
    }
}

bitflags::bitflags! {
    /// The region id field of contour vertices, combined with edge flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct RegionVertexId: u32 {
        /// No neighbor region and no flags.
        const NONE = 0;

        /// Applied to the region id field of contour vertices in order to extract the region id.
        /// The region id field of a vertex may have several flags applied to it.  So the
        /// fields value can't be used directly.
        const REGION_MASK = RegionId::MAX.bits() as u32;

        /// Border vertex flag.
        /// If a region ID has this bit set, then the associated element lies on
        /// a tile border. If a contour vertex's region ID has this bit set, the
        /// vertex will later be removed in order to match the segments and vertices
        /// at tile boundaries.
        /// (Used during the build process.)
        const BORDER_VERTEX = 0x10_000;

        /// Area border flag.
        /// If a region ID has this bit set, then the associated element lies on
        /// the border of an area.
        /// (Used during the region and contour build process.)
        const AREA_BORDER = 0x20_000;
    }
}

impl From<RegionId> for RegionVertexId {
    fn from(region_id: RegionId) -> Self {
        RegionVertexId::from_bits_retain(region_id.bits() as u32)
    }
}

impl From<RegionVertexId> for RegionId {
    fn from(region_vertex_id: RegionVertexId) -> Self {
        let bits = region_vertex_id.bits() & RegionVertexId::REGION_MASK.bits();
        RegionId::from_bits_retain(bits as u16)
    }
}

bitflags::bitflags! {
    /// Contour build flags used in [`CompactHeightfield::build_contours`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(transparent)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct BuildContoursFlags: u8 {
        /// Tessellate solid (impassable) edges during contour simplification.
        const TESSELLATE_SOLID_WALL_EDGES = 1;
        /// Tessellate edges between areas during contour simplification.
        const TESSELLATE_AREA_EDGES = 2;

        /// Default flags for building contours.
        const DEFAULT = Self::TESSELLATE_SOLID_WALL_EDGES.bits();
    }
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Errors that can occur while building contours.
#[derive(Debug, Error)]
pub enum ContourError {
    /// No region produced a contour, so there is nothing walkable to build a mesh from.
    #[error("No contours were created, the heightfield has no walkable regions")]
    NoContours,
}
