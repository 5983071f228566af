//! Builds navmeshes from scenes described in JSON and runs queries on the result.
//!
//! The courtyard scene is a 12x12 floor with a 4x4 hole in the middle.

use std::{env, fs, path::PathBuf};

use anyhow::Context as _;
use glam::{Vec2, Vec3};
use navgen::{
    AreaType, BufferedLog, BuildError, ConvexVolume, InputGeometry, LogCategory, NavPolyFlags,
    NavmeshConfig, NavmeshConfigBuilder, PartitionType, TriMesh, build_single_tile,
};
use navquery::{
    DEFAULT_MAX_NODES, MAX_PATH_LEN, NavMesh, NavMeshQuery, PolyRef, QueryFilter, get_smooth_path,
    load_navmesh_set_from_path, save_navmesh_set_to_path,
};
use serde::Deserialize;

const HALF_EXTENTS: Vec3 = Vec3::new(1.0, 2.0, 1.0);
const WEST: Vec3 = Vec3::new(2.0, 0.0, 6.0);
const EAST: Vec3 = Vec3::new(10.0, 0.0, 6.0);

#[derive(Debug, Deserialize)]
struct Scene {
    agent: Agent,
    vertices: Vec<[f32; 3]>,
    triangles: Vec<[u32; 3]>,
    #[serde(default)]
    volumes: Vec<Volume>,
}

#[derive(Debug, Deserialize)]
struct Agent {
    height: f32,
    radius: f32,
    climb: f32,
    max_slope_degrees: f32,
}

#[derive(Debug, Deserialize)]
struct Volume {
    vertices: Vec<[f32; 2]>,
    min_y: f32,
    max_y: f32,
    area: u8,
}

impl Scene {
    fn load(name: &str) -> anyhow::Result<Self> {
        let path = data_dir().join(format!("{name}.json"));
        let json =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }

    fn geometry(&self) -> InputGeometry {
        let vertices: Vec<f32> = self.vertices.iter().flatten().copied().collect();
        let indices: Vec<u32> = self.triangles.iter().flatten().copied().collect();
        let mut geometry = InputGeometry::new(TriMesh::from_buffers(&vertices, &indices)).unwrap();
        for volume in &self.volumes {
            geometry.add_convex_volume(ConvexVolume {
                vertices: volume.vertices.iter().map(|[x, z]| Vec2::new(*x, *z)).collect(),
                min_y: volume.min_y,
                max_y: volume.max_y,
                area: AreaType(volume.area),
            });
        }
        geometry
    }

    fn config(&self, geometry: &InputGeometry, partition_type: PartitionType) -> NavmeshConfig {
        NavmeshConfigBuilder {
            agent_height: self.agent.height,
            agent_radius: self.agent.radius,
            agent_max_climb: self.agent.climb,
            agent_max_slope: self.agent.max_slope_degrees.to_radians(),
            aabb: geometry.aabb(),
            partition_type,
            ..Default::default()
        }
        .build()
    }

    fn build(&self, partition_type: PartitionType) -> anyhow::Result<NavMesh> {
        let geometry = self.geometry();
        let config = self.config(&geometry, partition_type);
        let mut log = BufferedLog::new();
        let tile = build_single_tile(&config, &geometry, &mut log)?;
        anyhow::ensure!(log.of(LogCategory::Error).count() == 0, "build logged errors: {log:?}");
        Ok(NavMesh::from_single_tile(&tile)?)
    }
}

fn data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("data")
}

fn in_hole(p: Vec3) -> bool {
    (4.5..7.5).contains(&p.x) && (4.5..7.5).contains(&p.z)
}

/// Start polygon, start point, end point and the polygons between them.
type Corridor = (PolyRef, Vec3, Vec3, Vec<PolyRef>);

fn corridor(query: &mut NavMeshQuery, filter: &QueryFilter) -> anyhow::Result<Corridor> {
    let (start_ref, start) = query.find_nearest_poly(WEST, HALF_EXTENTS, filter)?;
    let (end_ref, end) = query.find_nearest_poly(EAST, HALF_EXTENTS, filter)?;
    let (path, status) = query.find_path(start_ref, end_ref, start, end, filter, MAX_PATH_LEN)?;
    anyhow::ensure!(status.is_complete(), "incomplete path: {status:?}");
    Ok((start_ref, start, end, path))
}

#[test]
fn paths_go_around_the_hole() -> anyhow::Result<()> {
    let scene = Scene::load("courtyard")?;
    for partition_type in [
        PartitionType::Watershed,
        PartitionType::Monotone,
        PartitionType::Layers,
    ] {
        let nav_mesh = scene.build(partition_type)?;
        let filter = QueryFilter::default();
        let mut query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES)?;
        let (start_ref, start, end, path) = corridor(&mut query, &filter)?;
        assert!(path.len() > 1, "{partition_type:?}");

        let (straight, _) = query.find_straight_path(start, end, &path, 32)?;
        assert!(straight.len() >= 3, "{partition_type:?}: {straight:?}");
        assert!(straight.first().unwrap().position.distance(start) < 1e-3);
        assert!(straight.last().unwrap().position.distance(end) < 1e-3);

        let smooth = get_smooth_path(&query, start_ref, start, end, &path, &filter, 1024)?;
        assert!(smooth.status.is_complete(), "{partition_type:?}: {:?}", smooth.status);
        assert!(smooth.points.iter().all(|p| !in_hole(*p)));
        assert!(smooth.points.iter().all(|p| p.y.abs() < 0.5));
        assert!(smooth.points.last().unwrap().distance(end) < 1e-3);
    }
    Ok(())
}

#[test]
fn water_is_avoided_by_walkers() -> anyhow::Result<()> {
    let scene = Scene::load("flooded_courtyard")?;
    let nav_mesh = scene.build(PartitionType::Watershed)?;
    let mut filter = QueryFilter::default();
    filter.set_include_flags(NavPolyFlags::WALK.bits());
    let mut query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES)?;
    let (_, start, end, path) = corridor(&mut query, &filter)?;

    let (straight, _) = query.find_straight_path(start, end, &path, 32)?;
    // The southern strip is water, so the only dry way leads north.
    assert!(straight.iter().all(|p| p.position.z > 5.5), "{straight:?}");
    Ok(())
}

#[test]
fn saved_navmeshes_answer_the_same_queries() -> anyhow::Result<()> {
    let scene = Scene::load("courtyard")?;
    let nav_mesh = scene.build(PartitionType::Watershed)?;
    let path = env::temp_dir().join(format!("navgen-courtyard-{}.bin", std::process::id()));
    save_navmesh_set_to_path(&nav_mesh, &path)?;
    let loaded = load_navmesh_set_from_path(&path)?;
    fs::remove_file(&path)?;

    let filter = QueryFilter::default();
    let mut query = NavMeshQuery::new(&nav_mesh, DEFAULT_MAX_NODES)?;
    let mut loaded_query = NavMeshQuery::new(&loaded, DEFAULT_MAX_NODES)?;
    assert_eq!(corridor(&mut query, &filter)?, corridor(&mut loaded_query, &filter)?);
    Ok(())
}

#[test]
fn bounds_without_geometry_fail_loudly() -> anyhow::Result<()> {
    let scene = Scene::load("courtyard")?;
    let geometry = scene.geometry();
    let mut config = scene.config(&geometry, PartitionType::Watershed);
    let mut far_away = geometry.aabb();
    far_away.min.x += 100.0;
    far_away.max.x += 100.0;
    config.calc_grid_size(far_away);

    let mut errors = Vec::new();
    let mut sink = |category: LogCategory, message: &str| {
        if category == LogCategory::Error {
            errors.push(message.to_owned());
        }
    };
    let result = build_single_tile(&config, &geometry, &mut sink);
    assert!(matches!(result, Err(BuildError::NoTriangles)));
    assert_eq!(errors.len(), 1);
    Ok(())
}
