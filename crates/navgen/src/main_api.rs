//! The build pipeline, one entry point per stage.
//!
//! Each stage consumes the output of the previous one:
//!
//! ```text
//! create_compact_heightfield -> create_polygon_mesh -> create_detail_mesh -> create_tile_data
//! ```
//!
//! [`build_single_tile`] runs all four. Every stage reports its failure to the [`LogSink`]
//! before returning it, so a caller that only watches the sink still learns why a tile is missing.

use glam::{Vec3, Vec3Swizzles as _};
use navquery::{
    DetailSubMesh, NavMeshCreateParams, OffMeshConnectionParams, TileDataError,
    create_nav_mesh_data,
};
use thiserror::Error;

use crate::{
    AreaType, CompactHeightfield, CompactHeightfieldError, ContourError, DetailMeshError,
    DetailNavmesh, HeightfieldBuilder, HeightfieldBuilderError, HeightfieldFilters, InputGeometry,
    LogCategory, LogSink, NavmeshConfig, PartitionType, PolygonMesh, PolygonMeshError,
    RasterizationError, RegionError, areas::apply_area_flags, math::TriangleIndices as _,
    poly_mesh::MESH_NULL_IDX,
};

/// Rasterizes the geometry overlapping [`NavmeshConfig::aabb`], filters it and partitions
/// the walkable surface into regions.
///
/// Triangles are looked up through [`InputGeometry::chunky_mesh`]. Triangles flatter than
/// [`NavmeshConfig::walkable_slope_angle`] become walkable, steeper ones keep the area of the mesh.
/// The convex volumes of the geometry are stamped onto the eroded surface.
///
/// # Errors
///
/// Fails with [`BuildError::NoTriangles`] if no chunk of the geometry overlaps the bounds.
pub fn create_compact_heightfield(
    config: &NavmeshConfig,
    geometry: &InputGeometry,
    log: &mut impl LogSink,
) -> Result<CompactHeightfield, BuildError> {
    let aabb = config.padded_aabb();
    let mut heightfield = check(
        log,
        "creating the heightfield",
        HeightfieldBuilder {
            aabb,
            cell_size: config.cell_size,
            cell_height: config.cell_height,
        }
        .build(),
    )?;

    let chunks = geometry
        .chunky_mesh
        .chunks_overlapping_rect(aabb.min.xz(), aabb.max.xz());
    if chunks.is_empty() {
        return check(log, "rasterizing", Err(BuildError::NoTriangles));
    }

    let mesh = &geometry.mesh;
    let threshold_cos = config.walkable_slope_angle.cos();
    let mut triangle_count = 0;
    for chunk in chunks {
        for &i in geometry.chunky_mesh.chunk_triangles(chunk) {
            let indices = mesh.indices[i];
            let area = if indices.normal(&mesh.vertices).y > threshold_cos {
                AreaType::DEFAULT_WALKABLE
            } else {
                mesh.area_types[i]
            };
            let triangle = [
                mesh.vertices[indices.x as usize],
                mesh.vertices[indices.y as usize],
                mesh.vertices[indices.z as usize],
            ];
            check(
                log,
                "rasterizing",
                heightfield.rasterize_triangle(triangle, area, config.walkable_climb),
            )?;
            triangle_count += 1;
        }
    }
    log.log(
        LogCategory::Progress,
        &format!(
            "Rasterized {triangle_count} triangles into {}x{} cells",
            heightfield.width, heightfield.height
        ),
    );

    let filters = config.filters;
    if filters.contains(HeightfieldFilters::LOW_HANGING_OBSTACLES) {
        heightfield.filter_low_hanging_walkable_obstacles(config.walkable_climb);
    }
    if filters.contains(HeightfieldFilters::LEDGE_SPANS) {
        heightfield.filter_ledge_spans(config.walkable_height, config.walkable_climb);
    }
    if filters.contains(HeightfieldFilters::LOW_HEIGHT_SPANS) {
        heightfield.filter_walkable_low_height_spans(config.walkable_height);
    }

    let mut compact = check(
        log,
        "compacting the heightfield",
        heightfield.into_compact(config.walkable_height, config.walkable_climb),
    )?;
    compact.erode_walkable_area(config.walkable_radius);
    for volume in &geometry.convex_volumes {
        compact.mark_convex_poly_area(volume);
    }

    let (border, min_area, merge_area) =
        (config.border_size, config.min_region_area, config.merge_region_area);
    let partitioned = match config.partition_type {
        PartitionType::Watershed => {
            compact.build_distance_field();
            compact.build_regions(border, min_area, merge_area)
        }
        PartitionType::Monotone => compact.build_regions_monotone(border, min_area, merge_area),
        PartitionType::Layers => compact.build_layer_regions(border, min_area),
    };
    check(log, "building regions", partitioned)?;
    log.log(
        LogCategory::Progress,
        &format!(
            "Partitioned {} walkable spans into {} regions",
            compact.walkable_span_count(),
            compact.max_region.bits()
        ),
    );
    Ok(compact)
}

/// Traces the region outlines and turns them into convex polygons of at most
/// [`NavmeshConfig::max_vertices_per_polygon`] vertices.
///
/// # Errors
///
/// Fails if there are no contours, which means nothing walkable was found,
/// or if the mesh would need more vertices than 16 bit indices can address.
pub fn create_polygon_mesh(
    config: &NavmeshConfig,
    compact: &CompactHeightfield,
    log: &mut impl LogSink,
) -> Result<PolygonMesh, BuildError> {
    let contours = check(
        log,
        "tracing contours",
        compact.build_contours(
            config.max_simplification_error,
            config.max_edge_len,
            config.contour_flags,
        ),
    )?;
    let mesh = check(
        log,
        "building the polygon mesh",
        contours.into_polygon_mesh(config.max_vertices_per_polygon as usize),
    )?;
    log.log(
        LogCategory::Progress,
        &format!("Built {} polygons from {} vertices", mesh.polygon_count(), mesh.vertices.len()),
    );
    Ok(mesh)
}

/// Samples the heights lost by the polygon mesh back from the compact heightfield.
pub fn create_detail_mesh(
    config: &NavmeshConfig,
    mesh: &PolygonMesh,
    compact: &CompactHeightfield,
    log: &mut impl LogSink,
) -> Result<DetailNavmesh, BuildError> {
    check(
        log,
        "building the detail mesh",
        DetailNavmesh::new(
            mesh,
            compact,
            config.detail_sample_dist,
            config.detail_sample_max_error,
        ),
    )
}

/// Assigns navigation areas and flags to the polygons and packs everything into tile data
/// that [`navquery::NavMesh::add_tile`] accepts.
///
/// Polygons still marked as generic walkable ground become
/// [`NavArea::GROUND`](crate::NavArea::GROUND).
/// The off-mesh connections of the geometry are packed into the tile as well.
///
/// # Arguments
///
/// - `tile_x`, `tile_y` - The location of the tile in the navmesh grid.
/// - `agent_height` - `[Units: wu]`
/// - `agent_radius` - `[Units: wu]`
/// - `agent_climb` - `[Units: wu]`
pub fn create_tile_data(
    config: &NavmeshConfig,
    detail: &DetailNavmesh,
    mesh: &mut PolygonMesh,
    geometry: &InputGeometry,
    tile_x: i32,
    tile_y: i32,
    agent_height: f32,
    agent_radius: f32,
    agent_climb: f32,
    log: &mut impl LogSink,
) -> Result<Vec<u8>, BuildError> {
    if mesh.vertices.len() >= MESH_NULL_IDX as usize {
        let vertices = mesh.vertices.len();
        return check(log, "packing the tile", Err(BuildError::TooManyVertices { vertices }));
    }
    apply_area_flags(mesh);

    let params = NavMeshCreateParams {
        vertices: mesh.vertices.clone(),
        polygons: mesh.polygons.clone(),
        poly_flags: mesh.flags.clone(),
        poly_areas: mesh.areas.iter().map(|area| area.0).collect(),
        max_vertices_per_polygon: mesh.max_vertices_per_polygon,
        detail_meshes: detail
            .meshes
            .iter()
            .map(|submesh| DetailSubMesh {
                first_vertex: submesh.first_vertex_index as u32,
                vertex_count: submesh.vertex_count as u32,
                first_triangle: submesh.first_triangle_index as u32,
                triangle_count: submesh.triangle_count as u32,
            })
            .collect(),
        detail_vertices: detail.vertices.iter().copied().map(Vec3::from).collect(),
        detail_triangles: detail
            .triangles
            .iter()
            .map(|t| [t.vertices[0], t.vertices[1], t.vertices[2], t.flags])
            .collect(),
        off_mesh_connections: geometry
            .off_mesh_connections
            .iter()
            .map(|connection| OffMeshConnectionParams {
                start: connection.start.into(),
                end: connection.end.into(),
                radius: connection.radius,
                bidirectional: connection.bidirectional,
                area: connection.area.0,
                flags: connection.flags,
                user_id: connection.user_id,
            })
            .collect(),
        user_id: 0,
        tile_x,
        tile_y,
        tile_layer: 0,
        bmin: mesh.aabb.min.into(),
        bmax: mesh.aabb.max.into(),
        walkable_height: agent_height,
        walkable_radius: agent_radius,
        walkable_climb: agent_climb,
        cell_size: config.cell_size,
        cell_height: config.cell_height,
        build_bv_tree: true,
    };
    let data = check(log, "packing the tile", create_nav_mesh_data(&params))?;
    let bytes = data.to_bytes();
    log.log(
        LogCategory::Progress,
        &format!("Packed tile ({tile_x}, {tile_y}) into {} bytes", bytes.len()),
    );
    Ok(bytes)
}

/// Builds the whole geometry within [`NavmeshConfig::aabb`] as tile `(0, 0)`.
///
/// The agent dimensions stored in the tile are derived from the voxel values of the config.
pub fn build_single_tile(
    config: &NavmeshConfig,
    geometry: &InputGeometry,
    log: &mut impl LogSink,
) -> Result<Vec<u8>, BuildError> {
    let compact = create_compact_heightfield(config, geometry, log)?;
    let mut mesh = create_polygon_mesh(config, &compact, log)?;
    let detail = create_detail_mesh(config, &mesh, &compact, log)?;
    drop(compact);
    create_tile_data(
        config,
        &detail,
        &mut mesh,
        geometry,
        0,
        0,
        config.walkable_height as f32 * config.cell_height,
        config.walkable_radius as f32 * config.cell_size,
        config.walkable_climb as f32 * config.cell_height,
        log,
    )
}

/// Logs a failed stage before handing its error on.
fn check<T, E: Into<BuildError>>(
    log: &mut impl LogSink,
    stage: &str,
    result: Result<T, E>,
) -> Result<T, BuildError> {
    result.map_err(|err| {
        let err = err.into();
        log.log(LogCategory::Error, &format!("Failed {stage}: {err}"));
        err
    })
}

/// Errors that can occur while building a tile.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The heightfield could not be allocated for the configured bounds.
    #[error(transparent)]
    Heightfield(#[from] HeightfieldBuilderError),
    /// No triangle of the geometry overlaps the configured bounds.
    #[error("No triangles overlap the build bounds")]
    NoTriangles,
    /// A triangle could not be rasterized.
    #[error(transparent)]
    Rasterization(#[from] RasterizationError),
    /// The heightfield could not be compacted.
    #[error(transparent)]
    CompactHeightfield(#[from] CompactHeightfieldError),
    /// The walkable surface could not be partitioned.
    #[error(transparent)]
    Region(#[from] RegionError),
    /// No contours could be traced.
    #[error(transparent)]
    Contour(#[from] ContourError),
    /// The contours could not be turned into polygons.
    #[error(transparent)]
    PolygonMesh(#[from] PolygonMeshError),
    /// The detail mesh could not be sampled.
    #[error(transparent)]
    DetailMesh(#[from] DetailMeshError),
    /// The polygon mesh has more vertices than a tile can address.
    #[error("Too many vertices for a tile: {vertices}")]
    TooManyVertices {
        /// The vertex count of the polygon mesh
        vertices: usize,
    },
    /// The tile data could not be packed.
    #[error(transparent)]
    TileData(#[from] TileDataError),
}

#[cfg(test)]
mod tests {
    use glam::{Vec2, Vec3A};
    use navquery::MeshTileData;

    use super::*;
    use crate::{
        Aabb3d, BufferedLog, ConvexVolume, NavArea, NavPolyFlags, NavmeshConfigBuilder,
        OffMeshConnection, TriMesh,
    };

    fn plane(size: f32, height: f32) -> TriMesh {
        TriMesh::from_buffers(
            &[0.0, 0.0, 0.0, 0.0, 0.0, size, size, height, size, size, height, 0.0],
            &[0, 1, 2, 0, 2, 3],
        )
    }

    fn config_for(geometry: &InputGeometry, partition_type: PartitionType) -> NavmeshConfig {
        NavmeshConfigBuilder {
            aabb: geometry.aabb(),
            partition_type,
            ..Default::default()
        }
        .build()
    }

    #[test]
    fn flat_ground_becomes_a_tile() {
        let geometry = InputGeometry::new(plane(10.0, 0.0)).unwrap();
        let mut log = BufferedLog::new();
        for partition_type in [
            PartitionType::Watershed,
            PartitionType::Monotone,
            PartitionType::Layers,
        ] {
            let config = config_for(&geometry, partition_type);
            let bytes = build_single_tile(&config, &geometry, &mut log).unwrap();
            let tile = MeshTileData::from_bytes(&bytes).unwrap();
            assert!(!tile.polygons.is_empty(), "{partition_type:?}");
            assert_eq!(tile.detail_meshes.len(), tile.polygons.len());
            assert!(tile.polygons.iter().all(|p| p.flags == NavPolyFlags::WALK.bits()));
            assert!(tile.polygons.iter().all(|p| p.area == NavArea::GROUND.0));
        }
        assert_eq!(log.of(LogCategory::Error).count(), 0);
        assert!(log.of(LogCategory::Progress).count() > 0);
    }

    #[test]
    fn builds_are_deterministic() {
        let geometry = InputGeometry::new(plane(10.0, 0.0)).unwrap();
        let config = config_for(&geometry, PartitionType::Watershed);
        let mut log = BufferedLog::new();
        let build = |log: &mut BufferedLog| {
            let compact = create_compact_heightfield(&config, &geometry, log).unwrap();
            create_polygon_mesh(&config, &compact, log).unwrap()
        };
        let first = build(&mut log);
        let second = build(&mut log);
        assert_eq!(first.polygon_count(), second.polygon_count());
        assert_eq!(first.vertices.len(), second.vertices.len());
    }

    #[test]
    fn geometry_outside_the_bounds_is_reported() {
        let geometry = InputGeometry::new(plane(10.0, 0.0)).unwrap();
        let mut config = config_for(&geometry, PartitionType::Watershed);
        config.calc_grid_size(Aabb3d {
            min: Vec3A::new(100.0, 0.0, 100.0),
            max: Vec3A::new(110.0, 1.0, 110.0),
        });
        let mut log = BufferedLog::new();
        let result = build_single_tile(&config, &geometry, &mut log);
        assert!(matches!(result, Err(BuildError::NoTriangles)));
        assert_eq!(log.of(LogCategory::Error).count(), 1);
    }

    #[test]
    fn steep_slopes_have_no_contours() {
        // Rises 20 over 10, about 63 degrees.
        let geometry = InputGeometry::new(plane(10.0, 20.0)).unwrap();
        let config = config_for(&geometry, PartitionType::Monotone);
        let mut log = BufferedLog::new();
        let compact = create_compact_heightfield(&config, &geometry, &mut log).unwrap();
        assert_eq!(compact.walkable_span_count(), 0);
        let result = create_polygon_mesh(&config, &compact, &mut log);
        assert!(matches!(result, Err(BuildError::Contour(ContourError::NoContours))));
        let errors: Vec<_> = log.of(LogCategory::Error).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("contours"));
    }

    #[test]
    fn volumes_and_connections_reach_the_tile() {
        let mut geometry = InputGeometry::new(plane(10.0, 0.0)).unwrap();
        geometry.add_convex_volume(ConvexVolume {
            vertices: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(0.0, 10.0),
                Vec2::new(5.0, 10.0),
                Vec2::new(5.0, 0.0),
            ],
            min_y: -1.0,
            max_y: 1.0,
            area: NavArea::WATER,
        });
        geometry.add_off_mesh_connection(OffMeshConnection {
            start: Vec3A::new(7.0, 0.0, 5.0),
            end: Vec3A::new(8.0, 0.0, 5.0),
            radius: 0.5,
            bidirectional: true,
            area: NavArea::JUMP,
            flags: NavPolyFlags::JUMP.bits(),
            user_id: 42,
        });
        let config = config_for(&geometry, PartitionType::Watershed);
        let bytes = build_single_tile(&config, &geometry, &mut BufferedLog::new()).unwrap();
        let tile = MeshTileData::from_bytes(&bytes).unwrap();
        assert!(
            tile.polygons
                .iter()
                .any(|p| p.area == NavArea::WATER.0 && p.flags == NavPolyFlags::SWIM.bits())
        );
        assert!(tile.polygons.iter().any(|p| p.area == NavArea::GROUND.0));
        assert_eq!(tile.off_mesh_connections.len(), 1);
        assert_eq!(tile.off_mesh_connections[0].user_id, 42);
    }
}
