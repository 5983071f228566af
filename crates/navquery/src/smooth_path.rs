//! Turns a polygon corridor into a dense sequence of points an agent can follow.
//!
//! The smoother repeatedly steers towards the next corner of the straight path, moves a fixed
//! step along the surface, and trims the corridor behind it.

use glam::{Vec3, Vec3Swizzles as _};
use tracing::debug;

use crate::{NavMeshQuery, PolyRef, QueryError, QueryFilter, QueryStatus, StraightPathFlags};

/// A corridor length that comfortably covers single-tile meshes.
pub const MAX_PATH_LEN: usize = 1024;
/// A smooth path length that comfortably covers single-tile meshes.
pub const MAX_SMOOTH_PATH_LEN: usize = 4096;

/// The distance moved per iteration. `[Units: wu]`
const STEP_SIZE: f32 = 0.5;
/// How close a corner must be to count as reached. `[Units: wu]`
const SLOP: f32 = 0.01;
/// The corridor the smoother works on is capped at this many polygons.
const MAX_POLYS: usize = 256;
/// Corners looked at when picking a steer target.
const MAX_STEER_POINTS: usize = 3;

/// The result of [`get_smooth_path`].
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SmoothPath {
    /// The points from start to end
    pub points: Vec<Vec3>,
    /// [`QueryStatus::BUFFER_TOO_SMALL`] if the points were cut off at the capacity,
    /// [`QueryStatus::PARTIAL_RESULT`] if the smoother got stuck before the end.
    pub status: QueryStatus,
}

/// Follows `corridor` from `start` to `end` and emits at most `capacity` points.
///
/// `corridor` is usually the result of [`NavMeshQuery::find_path`] and must start with
/// `start_ref`. Every point is snapped to the height of the polygon it lies on.
pub fn get_smooth_path(
    query: &NavMeshQuery<'_>,
    start_ref: PolyRef,
    start: Vec3,
    end: Vec3,
    corridor: &[PolyRef],
    filter: &QueryFilter,
    capacity: usize,
) -> Result<SmoothPath, QueryError> {
    let Some(last) = corridor.last() else {
        return Err(QueryError::InvalidParam("corridor is empty"));
    };
    if capacity == 0 {
        return Err(QueryError::InvalidParam("capacity must be positive"));
    }
    let nav_mesh = query.nav_mesh();

    let mut polys: Vec<PolyRef> = corridor.iter().copied().take(MAX_POLYS).collect();
    let (mut iter_pos, _) = query.closest_point_on_poly(start_ref, start)?;
    let (target_pos, _) = query.closest_point_on_poly(*last, end)?;

    let mut smooth = SmoothPath {
        points: vec![iter_pos],
        status: QueryStatus::empty(),
    };
    let mut reached_end = false;

    while !polys.is_empty() && smooth.points.len() < capacity {
        let Some(steer) = steer_target(query, iter_pos, target_pos, SLOP, &polys) else {
            // Every corner is within reach, which only happens at the end.
            reached_end = in_range(iter_pos, target_pos, SLOP, 1.0);
            if !reached_end {
                debug!("No steer target left at {iter_pos}");
            }
            break;
        };
        let end_of_path = steer.flags.contains(StraightPathFlags::END);
        let off_mesh_connection = steer.flags.contains(StraightPathFlags::OFFMESH_CONNECTION);

        // Do not overshoot the end or the start of an off-mesh connection.
        let delta = steer.position - iter_pos;
        let len = delta.length();
        let scale = if (end_of_path || off_mesh_connection) && len < STEP_SIZE {
            1.0
        } else {
            STEP_SIZE / len
        };
        let move_target = iter_pos + delta * scale;

        let (result, visited) = query.move_along_surface(polys[0], iter_pos, move_target, filter)?;
        polys = fixup_corridor(&polys, &visited, MAX_POLYS);
        fixup_shortcuts(query, &mut polys);

        let height = query.get_poly_height(polys[0], result).unwrap_or(result.y);
        iter_pos = result.with_y(height);

        if end_of_path && in_range(iter_pos, steer.position, SLOP, 1.0) {
            iter_pos = target_pos;
            if smooth.points.len() < capacity {
                smooth.points.push(iter_pos);
            }
            reached_end = true;
            break;
        }

        if off_mesh_connection && in_range(iter_pos, steer.position, SLOP, 1.0) {
            // Skip ahead to the connection, everything before it has been walked.
            let mut prev_ref = PolyRef::NULL;
            let mut poly_ref = polys[0];
            let mut npos = 0;
            while npos < polys.len() && poly_ref != steer.poly {
                prev_ref = poly_ref;
                poly_ref = polys[npos];
                npos += 1;
            }
            polys.drain(..npos);

            if let Ok((connection_start, connection_end)) =
                nav_mesh.off_mesh_connection_end_points(prev_ref, poly_ref)
            {
                // Pad to an even count so the connection starts a new pair of points.
                if smooth.points.len() < capacity {
                    smooth.points.push(connection_start);
                    if smooth.points.len() % 2 == 1 && smooth.points.len() < capacity {
                        smooth.points.push(connection_start);
                    }
                }
                iter_pos = connection_end;
                if let Some(first) = polys.first() {
                    let height = query.get_poly_height(*first, iter_pos).unwrap_or(iter_pos.y);
                    iter_pos.y = height;
                }
            }
        }

        if smooth.points.len() < capacity {
            smooth.points.push(iter_pos);
        }
    }

    if !reached_end {
        smooth.status |= if smooth.points.len() >= capacity {
            QueryStatus::BUFFER_TOO_SMALL
        } else {
            QueryStatus::PARTIAL_RESULT
        };
    }
    Ok(smooth)
}

struct SteerTarget {
    position: Vec3,
    flags: StraightPathFlags,
    poly: PolyRef,
}

/// The first corner of the straight path that is not already reached, at the height of `start`.
/// Off-mesh connection starts are returned even when reached.
fn steer_target(
    query: &NavMeshQuery<'_>,
    start: Vec3,
    end: Vec3,
    min_target_dist: f32,
    path: &[PolyRef],
) -> Option<SteerTarget> {
    let (corners, _) = query.find_straight_path(start, end, path, MAX_STEER_POINTS).ok()?;
    let corner = corners.iter().find(|c| {
        c.flags.contains(StraightPathFlags::OFFMESH_CONNECTION)
            || !in_range(c.position, start, min_target_dist, 1000.0)
    })?;
    Some(SteerTarget {
        position: corner.position.with_y(start.y),
        flags: corner.flags,
        poly: corner.poly,
    })
}

fn in_range(a: Vec3, b: Vec3, radius: f32, height: f32) -> bool {
    a.xz().distance_squared(b.xz()) < radius * radius && (b.y - a.y).abs() < height
}

/// Replaces the walked start of `path` with the polygons actually `visited`.
fn fixup_corridor(path: &[PolyRef], visited: &[PolyRef], max_path: usize) -> Vec<PolyRef> {
    // The furthest polygon of the path that was visited, and where it was visited.
    let furthest = path
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, p)| visited.iter().rposition(|v| v == p).map(|j| (i, j)));
    let Some((furthest_path, furthest_visited)) = furthest else {
        return path.to_vec();
    };

    // The visited polygons are stored in reverse, the last one visited leads the corridor.
    let mut fixed: Vec<PolyRef> = visited[furthest_visited..].iter().rev().copied().collect();
    fixed.extend_from_slice(&path[(furthest_path + 1).min(path.len())..]);
    fixed.truncate(max_path);
    fixed
}

/// Cuts off a loop at the start of the corridor when a polygon a few steps ahead is also a
/// direct neighbor of the first one.
fn fixup_shortcuts(query: &NavMeshQuery<'_>, path: &mut Vec<PolyRef>) {
    const MAX_NEIGHBORS: usize = 16;
    const MAX_LOOK_AHEAD: usize = 6;
    if path.len() < 3 {
        return;
    }
    let Ok((tile, _)) = query.nav_mesh().tile_and_poly_by_ref(path[0]) else {
        return;
    };
    let neighbors: Vec<PolyRef> = tile
        .links(path[0].poly() as usize)
        .map(|l| l.reference)
        .filter(|r| !r.is_null())
        .take(MAX_NEIGHBORS)
        .collect();

    let cut = (2..MAX_LOOK_AHEAD.min(path.len()))
        .rev()
        .find(|i| neighbors.contains(&path[*i]));
    if let Some(cut) = cut {
        path.drain(1..cut);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        DEFAULT_MAX_NODES,
        test_mesh::{cell_ref, grid_nav_mesh},
    };

    fn corridor(
        query: &mut NavMeshQuery<'_>,
        start: (PolyRef, Vec3),
        end: (PolyRef, Vec3),
    ) -> Vec<PolyRef> {
        query
            .find_path(start.0, end.0, start.1, end.1, &QueryFilter::default(), MAX_PATH_LEN)
            .unwrap()
            .0
    }

    fn smooth_between(
        query: &NavMeshQuery<'_>,
        start: (PolyRef, Vec3),
        end: (PolyRef, Vec3),
        path: &[PolyRef],
        capacity: usize,
    ) -> SmoothPath {
        let filter = QueryFilter::default();
        get_smooth_path(query, start.0, start.1, end.1, path, &filter, capacity).unwrap()
    }

    #[test]
    fn straight_corridor_is_walked_in_steps() {
        let nav_mesh = grid_nav_mesh(4, 1, &[]);
        let mut query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        let start = (cell_ref(&nav_mesh, 0, 0), Vec3::new(0.5, 0.0, 0.5));
        let end = (cell_ref(&nav_mesh, 3, 0), Vec3::new(3.5, 0.0, 0.5));
        let path = corridor(&mut query, start, end);

        let smooth = smooth_between(&query, start, end, &path, MAX_SMOOTH_PATH_LEN);
        assert!(smooth.status.is_complete());
        // The start, then one point per half unit up to the end.
        assert_eq!(smooth.points.len(), 7);
        assert_eq!(smooth.points[0], start.1);
        let last = smooth.points.last().unwrap();
        assert_relative_eq!(last.x, 3.5);
        assert_relative_eq!(last.z, 0.5);
        for pair in smooth.points.windows(2) {
            assert!(pair[0].distance(pair[1]) <= STEP_SIZE + 1e-4);
        }
    }

    #[test]
    fn smooth_path_goes_around_corners() {
        let nav_mesh = grid_nav_mesh(3, 3, &[(1, 0), (1, 1)]);
        let mut query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        let start = (cell_ref(&nav_mesh, 0, 0), Vec3::new(0.5, 0.0, 0.5));
        let end = (cell_ref(&nav_mesh, 2, 0), Vec3::new(2.5, 0.0, 0.5));
        let path = corridor(&mut query, start, end);

        let smooth = smooth_between(&query, start, end, &path, MAX_SMOOTH_PATH_LEN);
        assert!(smooth.status.is_complete());
        // No point may cut through the blocked cells.
        for p in &smooth.points {
            assert!(!(p.x > 1.0 + 1e-3 && p.x < 2.0 - 1e-3 && p.z < 2.0 - 1e-3), "{p}");
        }
        let last = smooth.points.last().unwrap();
        assert_relative_eq!(last.x, 2.5);
    }

    #[test]
    fn output_is_capped_at_capacity() {
        let nav_mesh = grid_nav_mesh(4, 1, &[]);
        let mut query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        let start = (cell_ref(&nav_mesh, 0, 0), Vec3::new(0.5, 0.0, 0.5));
        let end = (cell_ref(&nav_mesh, 3, 0), Vec3::new(3.5, 0.0, 0.5));
        let path = corridor(&mut query, start, end);

        let smooth = smooth_between(&query, start, end, &path, 3);
        assert_eq!(smooth.points.len(), 3);
        assert_eq!(smooth.status, QueryStatus::BUFFER_TOO_SMALL);
    }

    #[test]
    fn empty_corridor_is_rejected() {
        let nav_mesh = grid_nav_mesh(1, 1, &[]);
        let query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        let start = cell_ref(&nav_mesh, 0, 0);
        assert!(matches!(
            get_smooth_path(&query, start, Vec3::ZERO, Vec3::ONE, &[], &QueryFilter::default(), 8),
            Err(QueryError::InvalidParam(_))
        ));
    }

    #[test]
    fn corridor_fixup_drops_walked_polygons() {
        let [a, b, c, d] = [1, 2, 3, 4].map(PolyRef);
        assert_eq!(fixup_corridor(&[a, b, c, d], &[a, b], 16), vec![b, c, d]);
        // Visiting polygons off the corridor prepends them.
        let x = PolyRef(9);
        assert_eq!(fixup_corridor(&[a, b, c], &[a, x], 16), vec![x, a, b, c]);
        assert_eq!(fixup_corridor(&[a, b], &[x], 16), vec![a, b]);
        assert_eq!(fixup_corridor(&[a, b, c, d], &[a, b], 2), vec![b, c]);
    }
}
