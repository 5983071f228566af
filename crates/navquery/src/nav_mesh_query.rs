//! Queries against a [`NavMesh`]: nearest polygon, corridor search, string pulling and
//! surface movement.

use std::collections::{BinaryHeap, VecDeque};

use glam::Vec3;
use rand::Rng;
use tracing::debug;

use crate::{
    NavMesh, PolyRef, QueryFilter,
    math::{
        dist_pt_seg_sqr_2d, distance_pt_poly_edges_sqr, point_in_polygon,
        random_point_in_convex_poly, tri_area_2d, vequal,
    },
    nav_mesh::MeshTile,
    node_pool::{HeapNode, NodeFlags, NodePool},
    status::{QueryError, QueryStatus},
    tile_data::{EXT_LINK, Poly},
};

/// The search node budget used unless the caller picks another one.
pub const DEFAULT_MAX_NODES: usize = 2048;

/// Scales the A* heuristic slightly below the true distance so ties favor explored nodes.
const H_SCALE: f32 = 0.999;

bitflags::bitflags! {
    /// Describes a point of a straight path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct StraightPathFlags: u8 {
        /// The first point of the path
        const START = 0x01;
        /// The last point of the path
        const END = 0x02;
        /// The start of an off-mesh connection
        const OFFMESH_CONNECTION = 0x04;
    }
}

/// A corner of a straight path.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct StraightPathPoint {
    /// The corner position
    pub position: Vec3,
    /// What the corner is
    pub flags: StraightPathFlags,
    /// The polygon entered at the corner, [`PolyRef::NULL`] at the end
    pub poly: PolyRef,
}

/// Runs queries against a navmesh.
///
/// The query keeps its own search nodes, so path searches need `&mut self`. Create one query
/// per thread to search a navmesh concurrently.
#[derive(Debug)]
pub struct NavMeshQuery<'a> {
    nav_mesh: &'a NavMesh,
    node_pool: NodePool,
}

impl<'a> NavMeshQuery<'a> {
    /// Creates a query that visits at most `max_nodes` polygons per path search.
    pub fn new(nav_mesh: &'a NavMesh, max_nodes: usize) -> Result<Self, QueryError> {
        if max_nodes == 0 {
            return Err(QueryError::InvalidParam("max_nodes must be positive"));
        }
        Ok(Self {
            nav_mesh,
            node_pool: NodePool::new(max_nodes),
        })
    }

    /// The navmesh being queried.
    #[inline]
    pub fn nav_mesh(&self) -> &'a NavMesh {
        self.nav_mesh
    }

    /// Whether the reference points at a polygon that passes `filter`.
    pub fn is_valid_poly_ref(&self, reference: PolyRef, filter: &QueryFilter) -> bool {
        self.nav_mesh
            .poly_by_ref(reference)
            .is_ok_and(|poly| filter.pass_filter(poly))
    }

    /// The ground polygons passing `filter` whose bounds overlap the box around `center`.
    pub fn query_polygons(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> Result<Vec<PolyRef>, QueryError> {
        check_box(center, half_extents)?;
        let bmin = center - half_extents;
        let bmax = center + half_extents;
        let (minx, miny) = self.nav_mesh.calc_tile_loc(bmin);
        let (maxx, maxy) = self.nav_mesh.calc_tile_loc(bmax);

        let mut polys = Vec::new();
        for y in miny..=maxy {
            for x in minx..=maxx {
                for tile_ref in self.nav_mesh.tile_refs_at(x, y) {
                    polys.extend(
                        self.nav_mesh
                            .query_polygons_in_tile(tile_ref, bmin, bmax)
                            .into_iter()
                            .filter(|r| self.is_valid_poly_ref(*r, filter)),
                    );
                }
            }
        }
        Ok(polys)
    }

    /// Finds the polygon nearest to `center` within the search box, and the closest point on it.
    ///
    /// A point above a polygon within the climb height counts as lying on it.
    pub fn find_nearest_poly(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> Result<(PolyRef, Vec3), QueryError> {
        let mut nearest = None;
        let mut nearest_dist = f32::MAX;
        for reference in self.query_polygons(center, half_extents, filter)? {
            let (tile, _) = self.tile_and_poly(reference)?;
            let (closest, over_poly) = self.closest_point_on_poly(reference, center)?;
            let diff = center - closest;
            let d = if over_poly {
                let d = diff.y.abs() - tile.header().walkable_climb;
                if d > 0.0 { d * d } else { 0.0 }
            } else {
                diff.length_squared()
            };
            if d < nearest_dist {
                nearest_dist = d;
                nearest = Some((reference, closest));
            }
        }
        nearest.ok_or(QueryError::NoNearbyPolygon(center.to_array()))
    }

    /// Finds the cheapest polygon corridor from `start_ref` to `end_ref` with A*.
    ///
    /// Returns at most `max_path` polygons, starting with `start_ref`. If the end cannot be
    /// reached the corridor leads to the polygon closest to it and the status carries
    /// [`QueryStatus::PARTIAL_RESULT`]. A truncated corridor carries
    /// [`QueryStatus::BUFFER_TOO_SMALL`].
    pub fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<(Vec<PolyRef>, QueryStatus), QueryError> {
        self.tile_and_poly(start_ref)?;
        self.tile_and_poly(end_ref)?;
        if !start_pos.is_finite() || !end_pos.is_finite() {
            return Err(QueryError::InvalidParam("path endpoints must be finite"));
        }
        if max_path == 0 {
            return Err(QueryError::InvalidParam("max_path must be positive"));
        }
        if start_ref == end_ref {
            return Ok((vec![start_ref], QueryStatus::empty()));
        }

        let nav_mesh = self.nav_mesh;
        let pool = &mut self.node_pool;
        pool.clear();
        let mut open = BinaryHeap::new();

        let start = pool
            .get_or_insert(start_ref)
            .ok_or(QueryError::InvalidParam("node pool is empty"))?;
        let start_total = start_pos.distance(end_pos) * H_SCALE;
        {
            let node = pool.node_mut(start);
            node.pos = start_pos;
            node.cost = 0.0;
            node.total = start_total;
            node.flags = NodeFlags::OPEN;
        }
        open.push(HeapNode {
            index: start,
            total: start_total,
        });

        let mut last_best = start;
        let mut last_best_cost = start_total;
        let mut status = QueryStatus::empty();

        while let Some(HeapNode { index: best, total }) = open.pop() {
            {
                let node = pool.node_mut(best);
                // Skip entries superseded by a cheaper push of the same node.
                if !node.flags.contains(NodeFlags::OPEN) || total > node.total {
                    continue;
                }
                node.flags.remove(NodeFlags::OPEN);
                node.flags.insert(NodeFlags::CLOSED);
            }
            let best_ref = pool.node(best).poly;
            if best_ref == end_ref {
                last_best = best;
                break;
            }

            let Ok((best_tile, best_poly)) = nav_mesh.tile_and_poly_by_ref(best_ref) else {
                continue;
            };
            let parent_ref = pool.node(best).parent.map(|p| pool.node(p).poly);
            let best_pos = pool.node(best).pos;
            let best_cost = pool.node(best).cost;

            for link in best_tile.links(best_ref.poly() as usize) {
                let neighbor_ref = link.reference;
                if neighbor_ref.is_null() || Some(neighbor_ref) == parent_ref {
                    continue;
                }
                let Ok((_, neighbor_poly)) = nav_mesh.tile_and_poly_by_ref(neighbor_ref) else {
                    continue;
                };
                if !filter.pass_filter(neighbor_poly) {
                    continue;
                }
                let Some(neighbor) = pool.get_or_insert(neighbor_ref) else {
                    status |= QueryStatus::OUT_OF_NODES;
                    continue;
                };

                if pool.node(neighbor).flags.is_empty() {
                    let (left, right, _) = portal_points(nav_mesh, best_ref, neighbor_ref)?;
                    pool.node_mut(neighbor).pos = (left + right) * 0.5;
                }
                let neighbor_pos = pool.node(neighbor).pos;

                let (cost, heuristic) = if neighbor_ref == end_ref {
                    let cur_cost = filter.cost(best_pos, neighbor_pos, best_poly);
                    let end_cost = filter.cost(neighbor_pos, end_pos, neighbor_poly);
                    (best_cost + cur_cost + end_cost, 0.0)
                } else {
                    let cur_cost = filter.cost(best_pos, neighbor_pos, best_poly);
                    (best_cost + cur_cost, neighbor_pos.distance(end_pos) * H_SCALE)
                };
                let total = cost + heuristic;

                let node = pool.node_mut(neighbor);
                if !node.flags.is_empty() && total >= node.total {
                    continue;
                }
                node.parent = Some(best);
                node.cost = cost;
                node.total = total;
                node.flags.remove(NodeFlags::CLOSED);
                node.flags.insert(NodeFlags::OPEN);
                open.push(HeapNode {
                    index: neighbor,
                    total,
                });

                if heuristic < last_best_cost {
                    last_best_cost = heuristic;
                    last_best = neighbor;
                }
            }
        }

        if pool.node(last_best).poly != end_ref {
            status |= QueryStatus::PARTIAL_RESULT;
        }
        let mut path = pool.path_to(last_best);
        if path.len() > max_path {
            debug!("Truncating a corridor of {} polygons to {max_path}", path.len());
            path.truncate(max_path);
            status |= QueryStatus::BUFFER_TOO_SMALL;
        }
        Ok((path, status))
    }

    /// Pulls the corridor `path` taut between `start_pos` and `end_pos` and returns its corners.
    ///
    /// Returns at most `max_points` corners. The first carries [`StraightPathFlags::START`] and,
    /// unless the result was cut short, the last carries [`StraightPathFlags::END`].
    pub fn find_straight_path(
        &self,
        start_pos: Vec3,
        end_pos: Vec3,
        path: &[PolyRef],
        max_points: usize,
    ) -> Result<(Vec<StraightPathPoint>, QueryStatus), QueryError> {
        let (Some(first), Some(last)) = (path.first(), path.last()) else {
            return Err(QueryError::InvalidParam("path is empty"));
        };
        if max_points == 0 {
            return Err(QueryError::InvalidParam("max_points must be positive"));
        }
        let closest_start = self.closest_point_on_poly_boundary(*first, start_pos)?;
        let closest_end = self.closest_point_on_poly_boundary(*last, end_pos)?;

        let mut out = StraightPath {
            points: Vec::new(),
            max_points,
        };
        if out.append(closest_start, StraightPathFlags::START, *first) {
            return Ok(out.finish(QueryStatus::empty()));
        }

        if path.len() > 1 {
            let mut apex = closest_start;
            let mut portal_left = apex;
            let mut portal_right = apex;
            let (mut left_index, mut right_index) = (0, 0);
            let (mut left_off_mesh, mut right_off_mesh) = (false, false);
            let (mut left_ref, mut right_ref) = (Some(*first), Some(*first));

            let mut i = 0;
            while i < path.len() {
                let (left, right, to_off_mesh) = if i + 1 < path.len() {
                    let Ok(portal) = portal_points(self.nav_mesh, path[i], path[i + 1]) else {
                        // The corridor is broken, end at the last reachable polygon.
                        let end = self.closest_point_on_poly_boundary(path[i], end_pos)?;
                        out.append(end, StraightPathFlags::empty(), path[i]);
                        return Ok(out.finish(QueryStatus::PARTIAL_RESULT));
                    };
                    // Skip a first portal the start point already touches.
                    if i == 0 && dist_pt_seg_sqr_2d(apex, portal.0, portal.1).0 < 0.001 * 0.001 {
                        i += 1;
                        continue;
                    }
                    portal
                } else {
                    (closest_end, closest_end, false)
                };

                if tri_area_2d(apex, portal_right, right) <= 0.0 {
                    if vequal(apex, portal_right) || tri_area_2d(apex, portal_left, right) > 0.0 {
                        portal_right = right;
                        right_ref = path.get(i + 1).copied();
                        right_off_mesh = to_off_mesh;
                        right_index = i;
                    } else {
                        // The right side crossed over the left, the left corner is a new apex.
                        apex = portal_left;
                        let apex_index = left_index;
                        let flags = corner_flags(left_ref, left_off_mesh);
                        if out.append(apex, flags, left_ref.unwrap_or_default()) {
                            return Ok(out.finish(QueryStatus::empty()));
                        }
                        portal_left = apex;
                        portal_right = apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                if tri_area_2d(apex, portal_left, left) >= 0.0 {
                    if vequal(apex, portal_left) || tri_area_2d(apex, portal_right, left) < 0.0 {
                        portal_left = left;
                        left_ref = path.get(i + 1).copied();
                        left_off_mesh = to_off_mesh;
                        left_index = i;
                    } else {
                        apex = portal_right;
                        let apex_index = right_index;
                        let flags = corner_flags(right_ref, right_off_mesh);
                        if out.append(apex, flags, right_ref.unwrap_or_default()) {
                            return Ok(out.finish(QueryStatus::empty()));
                        }
                        portal_left = apex;
                        portal_right = apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }
                i += 1;
            }
        }

        out.append(closest_end, StraightPathFlags::END, PolyRef::NULL);
        Ok(out.finish(QueryStatus::empty()))
    }

    /// Moves from `start_pos` towards `end_pos` while staying on the surface, sliding along walls.
    ///
    /// Only polygons near the straight segment are searched, so the move is meant for short
    /// steps. Returns where the move ended and the polygons visited, ending with the polygon
    /// the result lies on. The height of the result is not adjusted to the surface.
    pub fn move_along_surface(
        &self,
        start_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
    ) -> Result<(Vec3, Vec<PolyRef>), QueryError> {
        const MAX_STACK: usize = 48;
        const MAX_NODES: usize = 64;
        const MAX_NEIGHBORS: usize = 8;

        self.tile_and_poly(start_ref)?;
        if !start_pos.is_finite() || !end_pos.is_finite() {
            return Err(QueryError::InvalidParam("move endpoints must be finite"));
        }

        let mut pool = NodePool::new(MAX_NODES);
        let start = pool
            .get_or_insert(start_ref)
            .ok_or(QueryError::InvalidParam("node pool is empty"))?;
        pool.node_mut(start).flags = NodeFlags::CLOSED;
        let mut stack = VecDeque::from([start]);

        let mut best_pos = start_pos;
        let mut best_dist = f32::MAX;
        let mut best_node = start;

        // Polygons outside the circle around the segment cannot lie on the way.
        let search_pos = start_pos.lerp(end_pos, 0.5);
        let search_rad_sqr = (start_pos.distance(end_pos) * 0.5 + 0.001).powi(2);

        while let Some(cur) = stack.pop_front() {
            let cur_ref = pool.node(cur).poly;
            let (tile, poly) = self.tile_and_poly(cur_ref)?;
            let verts = tile.data().poly_vertices(poly);
            if point_in_polygon(end_pos, &verts) {
                best_node = cur;
                best_pos = end_pos;
                break;
            }

            let nv = verts.len();
            let base = cur_ref.tile_ref();
            for i in 0..nv {
                let j = (i + nv - 1) % nv;
                let mut neighbors = Vec::with_capacity(MAX_NEIGHBORS);
                let nei = poly.neighbors[j];
                if nei & EXT_LINK != 0 {
                    for link in tile.links(cur_ref.poly() as usize) {
                        if usize::from(link.edge) == j
                            && !link.reference.is_null()
                            && neighbors.len() < MAX_NEIGHBORS
                            && self.is_valid_poly_ref(link.reference, filter)
                        {
                            neighbors.push(link.reference);
                        }
                    }
                } else if nei != 0 {
                    let index = usize::from(nei - 1);
                    if filter.pass_filter(&tile.data().polygons[index]) {
                        neighbors.push(PolyRef(base.0 | index as u64));
                    }
                }

                let (vj, vi) = (verts[j], verts[i]);
                if neighbors.is_empty() {
                    // Walls bound the move, keep the closest point on them.
                    let (d, t) = dist_pt_seg_sqr_2d(end_pos, vj, vi);
                    if d < best_dist {
                        best_pos = vj.lerp(vi, t);
                        best_dist = d;
                        best_node = cur;
                    }
                    continue;
                }
                for neighbor_ref in neighbors {
                    let Some(neighbor) = pool.get_or_insert(neighbor_ref) else {
                        continue;
                    };
                    if pool.node(neighbor).flags.contains(NodeFlags::CLOSED) {
                        continue;
                    }
                    if dist_pt_seg_sqr_2d(search_pos, vj, vi).0 > search_rad_sqr {
                        continue;
                    }
                    if stack.len() < MAX_STACK {
                        let node = pool.node_mut(neighbor);
                        node.parent = Some(cur);
                        node.flags.insert(NodeFlags::CLOSED);
                        stack.push_back(neighbor);
                    }
                }
            }
        }

        Ok((best_pos, pool.path_to(best_node)))
    }

    /// Picks a random point on the navmesh, uniformly by area over the polygons passing `filter`.
    pub fn find_random_point(
        &self,
        filter: &QueryFilter,
        rng: &mut impl Rng,
    ) -> Result<(PolyRef, Vec3), QueryError> {
        let mut selected = None;
        let mut area_sum = 0.0;
        for (tile_ref, tile) in self.nav_mesh.tiles() {
            for (ip, poly) in tile.data().polygons.iter().enumerate() {
                if poly.is_off_mesh_connection() || !filter.pass_filter(poly) {
                    continue;
                }
                let verts = tile.data().poly_vertices(poly);
                let area: f32 = (2..verts.len())
                    .map(|k| tri_area_2d(verts[0], verts[k - 1], verts[k]).abs() * 0.5)
                    .sum();
                // Reservoir sampling keeps each polygon with probability area / area_sum.
                area_sum += area;
                let u: f32 = rng.random();
                if u * area_sum <= area {
                    selected = Some((PolyRef(tile_ref.0 | ip as u64), verts));
                }
            }
        }
        let (reference, verts) = selected.ok_or(QueryError::NoPolygons)?;
        let pt = random_point_in_convex_poly(&verts, rng.random(), rng.random());
        let height = self
            .nav_mesh
            .get_poly_height(reference, pt)
            .ok()
            .flatten()
            .unwrap_or(pt.y);
        Ok((reference, pt.with_y(height)))
    }

    /// The height of the polygon's detail surface below or above `pos`.
    pub fn get_poly_height(&self, reference: PolyRef, pos: Vec3) -> Result<f32, QueryError> {
        self.nav_mesh
            .get_poly_height(reference, pos)
            .map_err(|_| QueryError::InvalidPolyRef(reference))?
            .ok_or(QueryError::NotOverPolygon(reference))
    }

    /// The closest point on the polygon's detail surface, and whether `pos` lies over the polygon.
    pub fn closest_point_on_poly(
        &self,
        reference: PolyRef,
        pos: Vec3,
    ) -> Result<(Vec3, bool), QueryError> {
        self.nav_mesh
            .closest_point_on_poly(reference, pos)
            .map_err(|_| QueryError::InvalidPolyRef(reference))
    }

    /// `pos` if it lies over the polygon, the closest point on the polygon's outline otherwise.
    /// Ignores the detail surface.
    pub fn closest_point_on_poly_boundary(
        &self,
        reference: PolyRef,
        pos: Vec3,
    ) -> Result<Vec3, QueryError> {
        let (tile, poly) = self.tile_and_poly(reference)?;
        let verts = tile.data().poly_vertices(poly);
        let (inside, edges) = distance_pt_poly_edges_sqr(pos, &verts);
        if inside {
            return Ok(pos);
        }
        let (imin, (_, t)) = edges
            .into_iter()
            .enumerate()
            .min_by(|a, b| a.1.0.total_cmp(&b.1.0))
            .ok_or(QueryError::InvalidPolyRef(reference))?;
        Ok(verts[imin].lerp(verts[(imin + 1) % verts.len()], t))
    }

    /// The left and right end of the portal from one polygon into a linked one.
    pub fn get_portal_points(
        &self,
        from: PolyRef,
        to: PolyRef,
    ) -> Result<(Vec3, Vec3), QueryError> {
        portal_points(self.nav_mesh, from, to).map(|(left, right, _)| (left, right))
    }

    fn tile_and_poly(&self, reference: PolyRef) -> Result<(&'a MeshTile, &'a Poly), QueryError> {
        self.nav_mesh
            .tile_and_poly_by_ref(reference)
            .map_err(|_| QueryError::InvalidPolyRef(reference))
    }
}

/// The portal between two linked polygons, and whether `to` is an off-mesh connection.
///
/// Portals into or out of an off-mesh connection collapse to the connection's endpoint.
fn portal_points(
    nav_mesh: &NavMesh,
    from: PolyRef,
    to: PolyRef,
) -> Result<(Vec3, Vec3, bool), QueryError> {
    let (from_tile, from_poly) = nav_mesh
        .tile_and_poly_by_ref(from)
        .map_err(|_| QueryError::InvalidPolyRef(from))?;
    let (to_tile, to_poly) = nav_mesh
        .tile_and_poly_by_ref(to)
        .map_err(|_| QueryError::InvalidPolyRef(to))?;
    let not_connected = QueryError::NotConnected { from, to };
    let link = from_tile
        .links(from.poly() as usize)
        .find(|l| l.reference == to)
        .ok_or_else(|| not_connected.clone())?;
    let to_off_mesh = to_poly.is_off_mesh_connection();

    if from_poly.is_off_mesh_connection() {
        let v = from_tile.data().vertices[usize::from(from_poly.vertices[usize::from(link.edge)])];
        return Ok((v, v, to_off_mesh));
    }
    if to_off_mesh {
        let back = to_tile
            .links(to.poly() as usize)
            .find(|l| l.reference == from)
            .ok_or(not_connected)?;
        let v = to_tile.data().vertices[usize::from(to_poly.vertices[usize::from(back.edge)])];
        return Ok((v, v, true));
    }

    let nv = usize::from(from_poly.vertex_count);
    let edge = usize::from(link.edge);
    let v0 = from_tile.data().vertices[usize::from(from_poly.vertices[edge])];
    let v1 = from_tile.data().vertices[usize::from(from_poly.vertices[(edge + 1) % nv])];
    // Links across tile borders may only cover part of the edge.
    if link.side != 0xff && (link.bmin != 0 || link.bmax != 255) {
        let tmin = f32::from(link.bmin) / 255.0;
        let tmax = f32::from(link.bmax) / 255.0;
        return Ok((v0.lerp(v1, tmin), v0.lerp(v1, tmax), false));
    }
    Ok((v0, v1, false))
}

fn corner_flags(poly: Option<PolyRef>, off_mesh: bool) -> StraightPathFlags {
    match poly {
        None => StraightPathFlags::END,
        Some(_) if off_mesh => StraightPathFlags::OFFMESH_CONNECTION,
        Some(_) => StraightPathFlags::empty(),
    }
}

fn check_box(center: Vec3, half_extents: Vec3) -> Result<(), QueryError> {
    if !center.is_finite() || !half_extents.is_finite() || half_extents.cmplt(Vec3::ZERO).any() {
        return Err(QueryError::InvalidParam("search box must be finite and non-negative"));
    }
    Ok(())
}

struct StraightPath {
    points: Vec<StraightPathPoint>,
    max_points: usize,
}

impl StraightPath {
    /// Adds a corner, merging it into the previous one if they coincide.
    /// Returns `true` once the path is complete or full.
    fn append(&mut self, position: Vec3, flags: StraightPathFlags, poly: PolyRef) -> bool {
        match self.points.last_mut() {
            Some(last) if vequal(last.position, position) => {
                last.flags = flags;
                last.poly = poly;
                flags.contains(StraightPathFlags::END)
            }
            _ => {
                self.points.push(StraightPathPoint { position, flags, poly });
                flags.contains(StraightPathFlags::END) || self.points.len() >= self.max_points
            }
        }
    }

    fn finish(self, mut status: QueryStatus) -> (Vec<StraightPathPoint>, QueryStatus) {
        let ended = self
            .points
            .last()
            .is_some_and(|p| p.flags.contains(StraightPathFlags::END));
        if !ended && !status.contains(QueryStatus::PARTIAL_RESULT) {
            status |= QueryStatus::BUFFER_TOO_SMALL;
        }
        (self.points, status)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rand::{SeedableRng as _, rngs::StdRng};

    use super::*;
    use crate::{
        OffMeshConnectionParams,
        test_mesh::{cell_ref, grid_nav_mesh, grid_tile},
    };

    /// A 3x3 grid whose middle column is blocked except for the top row, forming a U.
    fn u_turn() -> NavMesh {
        grid_nav_mesh(3, 3, &[(1, 0), (1, 1)])
    }

    #[test]
    fn nearest_poly_prefers_the_one_below() {
        let nav_mesh = grid_nav_mesh(3, 1, &[]);
        let query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        let (reference, point) = query
            .find_nearest_poly(Vec3::new(1.5, 0.3, 0.5), Vec3::ONE, &QueryFilter::default())
            .unwrap();
        assert_eq!(reference, cell_ref(&nav_mesh, 1, 0));
        assert_relative_eq!(point.x, 1.5);
        assert_relative_eq!(point.y, 0.0);
    }

    #[test]
    fn nearest_poly_outside_the_box_fails() {
        let nav_mesh = grid_nav_mesh(3, 1, &[]);
        let query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        assert_eq!(
            query.find_nearest_poly(Vec3::new(10.0, 0.0, 10.0), Vec3::ONE, &QueryFilter::default()),
            Err(QueryError::NoNearbyPolygon([10.0, 0.0, 10.0]))
        );
    }

    #[test]
    fn path_walks_around_the_wall() {
        let nav_mesh = u_turn();
        let mut query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        let start = cell_ref(&nav_mesh, 0, 0);
        let end = cell_ref(&nav_mesh, 2, 0);
        let (path, status) = query
            .find_path(
                start,
                end,
                Vec3::new(0.5, 0.0, 0.5),
                Vec3::new(2.5, 0.0, 0.5),
                &QueryFilter::default(),
                256,
            )
            .unwrap();
        assert!(status.is_complete());
        assert_eq!(
            path,
            vec![
                start,
                cell_ref(&nav_mesh, 0, 1),
                cell_ref(&nav_mesh, 0, 2),
                cell_ref(&nav_mesh, 1, 2),
                cell_ref(&nav_mesh, 2, 2),
                cell_ref(&nav_mesh, 2, 1),
                end,
            ]
        );
    }

    #[test]
    fn path_is_truncated_to_capacity() {
        let nav_mesh = u_turn();
        let mut query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        let start = cell_ref(&nav_mesh, 0, 0);
        let (path, status) = query
            .find_path(
                start,
                cell_ref(&nav_mesh, 2, 0),
                Vec3::new(0.5, 0.0, 0.5),
                Vec3::new(2.5, 0.0, 0.5),
                &QueryFilter::default(),
                3,
            )
            .unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path[0], start);
        assert_eq!(status, QueryStatus::BUFFER_TOO_SMALL);
    }

    #[test]
    fn unreachable_goal_gives_partial_path() {
        let nav_mesh = grid_nav_mesh(3, 3, &[(1, 0), (1, 1), (1, 2)]);
        let mut query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        let start = cell_ref(&nav_mesh, 0, 0);
        let end = cell_ref(&nav_mesh, 2, 0);
        let (path, status) = query
            .find_path(
                start,
                end,
                Vec3::new(0.5, 0.0, 0.5),
                Vec3::new(2.5, 0.0, 0.5),
                &QueryFilter::default(),
                256,
            )
            .unwrap();
        assert!(status.contains(QueryStatus::PARTIAL_RESULT));
        assert_eq!(path[0], start);
        assert!(!path.contains(&end));
    }

    #[test]
    fn path_to_self_is_one_polygon() {
        let nav_mesh = u_turn();
        let mut query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        let start = cell_ref(&nav_mesh, 1, 2);
        let (path, status) = query
            .find_path(start, start, Vec3::ZERO, Vec3::ONE, &QueryFilter::default(), 8)
            .unwrap();
        assert_eq!(path, vec![start]);
        assert!(status.is_complete());
    }

    #[test]
    fn tiny_node_budget_is_reported() {
        let nav_mesh = u_turn();
        let mut query = NavMeshQuery::new(&nav_mesh, 2).unwrap();
        let (_, status) = query
            .find_path(
                cell_ref(&nav_mesh, 0, 0),
                cell_ref(&nav_mesh, 2, 0),
                Vec3::new(0.5, 0.0, 0.5),
                Vec3::new(2.5, 0.0, 0.5),
                &QueryFilter::default(),
                256,
            )
            .unwrap();
        assert!(status.contains(QueryStatus::OUT_OF_NODES | QueryStatus::PARTIAL_RESULT));
    }

    #[test]
    fn straight_path_cuts_the_corners() {
        let nav_mesh = u_turn();
        let mut query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        let start_pos = Vec3::new(0.5, 0.0, 0.5);
        let end_pos = Vec3::new(2.5, 0.0, 0.5);
        let (path, _) = query
            .find_path(
                cell_ref(&nav_mesh, 0, 0),
                cell_ref(&nav_mesh, 2, 0),
                start_pos,
                end_pos,
                &QueryFilter::default(),
                256,
            )
            .unwrap();
        let (points, status) = query.find_straight_path(start_pos, end_pos, &path, 16).unwrap();
        assert!(status.is_complete());
        let corners: Vec<_> = points.iter().map(|p| (p.position.x, p.position.z)).collect();
        assert_eq!(corners, vec![(0.5, 0.5), (1.0, 2.0), (2.0, 2.0), (2.5, 0.5)]);
        assert_eq!(points[0].flags, StraightPathFlags::START);
        assert_eq!(points[3].flags, StraightPathFlags::END);

        let (points, status) = query.find_straight_path(start_pos, end_pos, &path, 2).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(status, QueryStatus::BUFFER_TOO_SMALL);
    }

    #[test]
    fn straight_path_flags_off_mesh_connections() {
        let tile = grid_tile(
            3,
            1,
            &[(1, 0)],
            vec![OffMeshConnectionParams {
                start: Vec3::new(0.5, 0.0, 0.5),
                end: Vec3::new(2.5, 0.0, 0.5),
                radius: 0.4,
                bidirectional: true,
                area: 5,
                flags: 1,
                user_id: 7,
            }],
        );
        let nav_mesh = NavMesh::from_single_tile(&tile.to_bytes()).unwrap();
        let mut query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        let start_pos = Vec3::new(0.2, 0.0, 0.8);
        let end_pos = Vec3::new(2.8, 0.0, 0.2);
        let start = cell_ref(&nav_mesh, 0, 0);
        let end = cell_ref(&nav_mesh, 2, 0);
        let (path, status) = query
            .find_path(start, end, start_pos, end_pos, &QueryFilter::default(), 16)
            .unwrap();
        assert!(status.is_complete());
        assert_eq!(path.len(), 3);
        assert!(nav_mesh.poly_by_ref(path[1]).unwrap().is_off_mesh_connection());

        let (points, _) = query.find_straight_path(start_pos, end_pos, &path, 16).unwrap();
        let flags: Vec<_> = points.iter().map(|p| p.flags).collect();
        assert_eq!(
            flags,
            vec![
                StraightPathFlags::START,
                StraightPathFlags::OFFMESH_CONNECTION,
                StraightPathFlags::empty(),
                StraightPathFlags::END,
            ]
        );
        assert_eq!(points[1].poly, path[1]);
        assert_relative_eq!(points[2].position.x, 2.5);
    }

    #[test]
    fn move_slides_along_walls() {
        let nav_mesh = grid_nav_mesh(2, 1, &[]);
        let query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        let start = cell_ref(&nav_mesh, 0, 0);
        let (pos, visited) = query
            .move_along_surface(
                start,
                Vec3::new(0.5, 0.0, 0.5),
                Vec3::new(5.0, 0.0, 0.5),
                &QueryFilter::default(),
            )
            .unwrap();
        assert_relative_eq!(pos.x, 2.0);
        assert_relative_eq!(pos.z, 0.5);
        assert_eq!(visited, vec![start, cell_ref(&nav_mesh, 1, 0)]);
    }

    #[test]
    fn move_inside_the_start_polygon_is_direct() {
        let nav_mesh = grid_nav_mesh(2, 1, &[]);
        let query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        let start = cell_ref(&nav_mesh, 0, 0);
        let target = Vec3::new(0.8, 0.0, 0.2);
        let (pos, visited) = query
            .move_along_surface(start, Vec3::new(0.5, 0.0, 0.5), target, &QueryFilter::default())
            .unwrap();
        assert_eq!(pos, target);
        assert_eq!(visited, vec![start]);
    }

    #[test]
    fn random_points_land_on_the_mesh() {
        let nav_mesh = u_turn();
        let query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..32 {
            let (reference, point) = query
                .find_random_point(&QueryFilter::default(), &mut rng)
                .unwrap();
            assert!(nav_mesh.is_valid_poly_ref(reference));
            assert!((0.0..=3.0).contains(&point.x) && (0.0..=3.0).contains(&point.z));
            // Blocked cells never receive points.
            assert!(!(point.x > 1.0 && point.x < 2.0 && point.z < 2.0), "{point}");
        }

        let mut filter = QueryFilter::default();
        filter.set_include_flags(0);
        assert_eq!(
            query.find_random_point(&filter, &mut rng),
            Err(QueryError::NoPolygons)
        );
    }

    #[test]
    fn boundary_point_is_clamped_to_the_outline() {
        let nav_mesh = grid_nav_mesh(1, 1, &[]);
        let query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        let cell = cell_ref(&nav_mesh, 0, 0);
        let p = query
            .closest_point_on_poly_boundary(cell, Vec3::new(2.0, 0.0, 0.5))
            .unwrap();
        assert_relative_eq!(p.x, 1.0);
        assert_relative_eq!(p.z, 0.5);
        assert_relative_eq!(query.get_poly_height(cell, Vec3::new(0.5, 3.0, 0.5)).unwrap(), 0.0);
        assert_eq!(
            query.get_poly_height(cell, Vec3::new(4.0, 0.0, 0.5)),
            Err(QueryError::NotOverPolygon(cell))
        );
    }

    #[test]
    fn stale_references_are_rejected() {
        let nav_mesh = grid_nav_mesh(1, 1, &[]);
        let mut query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        let stale = PolyRef::encode(9, 0, 0);
        assert_eq!(
            query.find_path(stale, stale, Vec3::ZERO, Vec3::ZERO, &QueryFilter::default(), 4),
            Err(QueryError::InvalidPolyRef(stale))
        );
    }
}
