//! Small hand-made tiles for unit tests.

use glam::{U16Vec3, Vec3};

use crate::{
    MeshTileData, NavMesh, NavMeshCreateParams, OffMeshConnectionParams, PolyRef,
    create_nav_mesh_data,
};

const N: u16 = 0xffff;

/// A flat tile of 1x1 quads, `columns` along x and `rows` along z, leaving out the `blocked`
/// cells given as `(x, z)`.
pub(crate) fn grid_tile(
    columns: u16,
    rows: u16,
    blocked: &[(u16, u16)],
    off_mesh_connections: Vec<OffMeshConnectionParams>,
) -> MeshTileData {
    let vertex = |x: u16, z: u16| z * (columns + 1) + x;
    let open = |x: i32, z: i32| {
        (0..i32::from(columns)).contains(&x)
            && (0..i32::from(rows)).contains(&z)
            && !blocked.contains(&(x as u16, z as u16))
    };
    let cells: Vec<(u16, u16)> = (0..rows)
        .flat_map(|z| (0..columns).map(move |x| (x, z)))
        .filter(|(x, z)| open(i32::from(*x), i32::from(*z)))
        .collect();
    let index_of = |x: i32, z: i32| {
        cells
            .iter()
            .position(|c| i32::from(c.0) == x && i32::from(c.1) == z)
            .map_or(N, |i| i as u16)
    };

    let mut polygons = Vec::new();
    for &(x, z) in &cells {
        let (xi, zi) = (i32::from(x), i32::from(z));
        polygons.extend([
            vertex(x, z),
            vertex(x, z + 1),
            vertex(x + 1, z + 1),
            vertex(x + 1, z),
        ]);
        polygons.extend([
            index_of(xi - 1, zi),
            index_of(xi, zi + 1),
            index_of(xi + 1, zi),
            index_of(xi, zi - 1),
        ]);
    }

    let params = NavMeshCreateParams {
        vertices: (0..=rows)
            .flat_map(|z| (0..=columns).map(move |x| U16Vec3::new(x, 0, z)))
            .collect(),
        polygons,
        poly_flags: vec![1; cells.len()],
        poly_areas: vec![0; cells.len()],
        max_vertices_per_polygon: 4,
        off_mesh_connections,
        bmin: Vec3::ZERO,
        bmax: Vec3::new(f32::from(columns), 1.0, f32::from(rows)),
        walkable_height: 2.0,
        walkable_radius: 0.5,
        walkable_climb: 0.5,
        cell_size: 1.0,
        cell_height: 0.5,
        build_bv_tree: true,
        ..Default::default()
    };
    create_nav_mesh_data(&params).unwrap()
}

/// A single tile navmesh made from [`grid_tile`].
pub(crate) fn grid_nav_mesh(columns: u16, rows: u16, blocked: &[(u16, u16)]) -> NavMesh {
    NavMesh::from_single_tile(&grid_tile(columns, rows, blocked, Vec::new()).to_bytes()).unwrap()
}

/// The reference of the open cell at `(x, z)`.
pub(crate) fn cell_ref(nav_mesh: &NavMesh, x: u16, z: u16) -> PolyRef {
    let (tile_ref, tile) = nav_mesh.tiles().next().unwrap();
    let center = Vec3::new(f32::from(x) + 0.5, 0.0, f32::from(z) + 0.5);
    let index = tile
        .data()
        .polygons
        .iter()
        .position(|poly| {
            let verts = tile.data().poly_vertices(poly);
            let (lo, hi) = verts
                .iter()
                .fold((verts[0], verts[0]), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
            let inside = lo.x < center.x && center.x < hi.x && lo.z < center.z && center.z < hi.z;
            poly.vertex_count == 4 && inside
        })
        .unwrap();
    PolyRef(tile_ref.0 | index as u64)
}
