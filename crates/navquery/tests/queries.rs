use approx::assert_relative_eq;
use glam::{U16Vec3, Vec3};
use navquery::{
    DEFAULT_MAX_NODES, MAX_PATH_LEN, NavMesh, NavMeshCreateParams, NavMeshQuery, NavMeshSetError,
    QueryError, QueryFilter, QueryStatus, create_nav_mesh_data, get_smooth_path, load_navmesh_set,
    load_navmesh_set_from_path, save_navmesh_set_to_path,
};
use rand::{SeedableRng as _, rngs::StdRng};

const N: u16 = 0xffff;
const HALF_EXTENTS: Vec3 = Vec3::new(0.5, 1.0, 0.5);

/// A U-shaped walkway: up the left column, across the top row and down the right column
/// of a 3x3 grid of unit cells.
///
/// ```text
/// z=2  4 5 6
/// z=1  3 . 2
/// z=0  0 . 1
/// ```
fn u_turn_tile() -> Vec<u8> {
    let v = |x: u16, z: u16| z * 4 + x;
    let quad = |x: u16, z: u16| [v(x, z), v(x, z + 1), v(x + 1, z + 1), v(x + 1, z)];
    // Neighbors per edge: -x, +z, +x, -z.
    #[rustfmt::skip]
    let cells = [
        (quad(0, 0), [N, 3, N, N]),
        (quad(2, 0), [N, 2, N, N]),
        (quad(2, 1), [N, 6, N, 1]),
        (quad(0, 1), [N, 4, N, 0]),
        (quad(0, 2), [N, N, 5, 3]),
        (quad(1, 2), [4, N, 6, N]),
        (quad(2, 2), [5, N, N, 2]),
    ];
    let params = NavMeshCreateParams {
        vertices: (0..4).flat_map(|z| (0..4).map(move |x| U16Vec3::new(x, 0, z))).collect(),
        polygons: cells
            .iter()
            .flat_map(|(verts, neis)| verts.iter().chain(neis).copied())
            .collect(),
        poly_flags: vec![1; cells.len()],
        poly_areas: vec![0; cells.len()],
        max_vertices_per_polygon: 4,
        bmin: Vec3::ZERO,
        bmax: Vec3::new(3.0, 1.0, 3.0),
        walkable_height: 2.0,
        walkable_radius: 0.3,
        walkable_climb: 0.5,
        cell_size: 1.0,
        cell_height: 0.5,
        build_bv_tree: true,
        ..Default::default()
    };
    create_nav_mesh_data(&params).unwrap().to_bytes()
}

#[test]
fn navmesh_set_file_round_trip_keeps_paths() {
    let nav_mesh = NavMesh::from_single_tile(&u_turn_tile()).unwrap();
    let path = std::env::temp_dir().join(format!("navquery-{}.bin", std::process::id()));
    save_navmesh_set_to_path(&nav_mesh, &path).unwrap();
    let loaded = load_navmesh_set_from_path(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let filter = QueryFilter::default();
    let mut query = NavMeshQuery::new(&loaded, DEFAULT_MAX_NODES).unwrap();
    let start_pos = Vec3::new(0.5, 0.0, 0.5);
    let end_pos = Vec3::new(2.5, 0.0, 0.5);
    let (start, _) = query.find_nearest_poly(start_pos, HALF_EXTENTS, &filter).unwrap();
    let (end, _) = query.find_nearest_poly(end_pos, HALF_EXTENTS, &filter).unwrap();
    let (corridor, status) = query
        .find_path(start, end, start_pos, end_pos, &filter, MAX_PATH_LEN)
        .unwrap();
    assert!(status.is_complete());
    assert_eq!(corridor.len(), 7);

    let smooth =
        get_smooth_path(&query, start, start_pos, end_pos, &corridor, &filter, 4096).unwrap();
    assert!(smooth.status.is_complete());
    assert_relative_eq!(smooth.points[0].x, 0.5);
    let last = smooth.points.last().unwrap();
    assert_relative_eq!(last.x, 2.5);
    assert_relative_eq!(last.z, 0.5);
}

#[test]
fn garbage_is_not_a_navmesh_set() {
    let result = load_navmesh_set(&b"NOPE and then some more bytes than a header"[..]);
    assert!(matches!(result, Err(NavMeshSetError::WrongMagic(_))));
}

#[test]
fn nearest_poly_fails_far_from_the_mesh() {
    let nav_mesh = NavMesh::from_single_tile(&u_turn_tile()).unwrap();
    let query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
    let far_away = Vec3::new(20.0, 0.0, -20.0);
    let result = query.find_nearest_poly(far_away, HALF_EXTENTS, &QueryFilter::default());
    assert!(matches!(result, Err(QueryError::NoNearbyPolygon(_))));
}

#[test]
fn smooth_path_stops_at_capacity() {
    let nav_mesh = NavMesh::from_single_tile(&u_turn_tile()).unwrap();
    let filter = QueryFilter::default();
    let mut query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
    let start_pos = Vec3::new(0.5, 0.0, 0.5);
    let end_pos = Vec3::new(2.5, 0.0, 0.5);
    let (start, _) = query.find_nearest_poly(start_pos, HALF_EXTENTS, &filter).unwrap();
    let (end, _) = query.find_nearest_poly(end_pos, HALF_EXTENTS, &filter).unwrap();
    let (corridor, _) = query
        .find_path(start, end, start_pos, end_pos, &filter, MAX_PATH_LEN)
        .unwrap();

    let smooth = get_smooth_path(&query, start, start_pos, end_pos, &corridor, &filter, 5).unwrap();
    assert_eq!(smooth.points.len(), 5);
    assert_eq!(smooth.status, QueryStatus::BUFFER_TOO_SMALL);
}

#[test]
fn excluded_polygons_are_avoided() {
    let mut nav_mesh = NavMesh::from_single_tile(&u_turn_tile()).unwrap();
    let filter = QueryFilter::default();
    let top_middle = {
        let query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
        query.find_nearest_poly(Vec3::new(1.5, 0.0, 2.5), HALF_EXTENTS, &filter).unwrap().0
    };
    nav_mesh.set_poly_flags(top_middle, 2).unwrap();

    let mut filter = QueryFilter::default();
    filter.set_exclude_flags(2);
    let mut query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
    let start_pos = Vec3::new(0.5, 0.0, 0.5);
    let end_pos = Vec3::new(2.5, 0.0, 0.5);
    let (start, _) = query.find_nearest_poly(start_pos, HALF_EXTENTS, &filter).unwrap();
    let (end, _) = query.find_nearest_poly(end_pos, HALF_EXTENTS, &filter).unwrap();
    let (corridor, status) = query
        .find_path(start, end, start_pos, end_pos, &filter, MAX_PATH_LEN)
        .unwrap();
    assert!(status.contains(QueryStatus::PARTIAL_RESULT));
    assert!(!corridor.contains(&top_middle));
}

#[test]
fn random_points_are_reproducible() {
    let nav_mesh = NavMesh::from_single_tile(&u_turn_tile()).unwrap();
    let query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES).unwrap();
    let filter = QueryFilter::default();
    let a = query.find_random_point(&filter, &mut StdRng::seed_from_u64(3)).unwrap();
    let b = query.find_random_point(&filter, &mut StdRng::seed_from_u64(3)).unwrap();
    assert_eq!(a, b);
    assert!(nav_mesh.is_valid_poly_ref(a.0));
}
