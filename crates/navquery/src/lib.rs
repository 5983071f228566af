#![doc = include_str!("../../../readme.md")]

pub(crate) mod math;
mod nav_mesh;
mod nav_mesh_builder;
mod nav_mesh_query;
mod nav_mesh_set;
mod node_pool;
mod poly_ref;
mod query_filter;
mod smooth_path;
mod status;
#[cfg(test)]
mod test_mesh;
mod tile_data;

pub use nav_mesh::{Link, MeshTile, NULL_LINK, NavMesh, NavMeshError, NavMeshParams};
pub use nav_mesh_builder::{
    DetailSubMesh, NavMeshCreateParams, OffMeshConnectionParams, create_nav_mesh_data,
};
pub use nav_mesh_query::{DEFAULT_MAX_NODES, NavMeshQuery, StraightPathFlags, StraightPathPoint};
pub use nav_mesh_set::{
    NAVMESH_SET_MAGIC, NAVMESH_SET_VERSION, NavMeshSetError, load_navmesh_set,
    load_navmesh_set_from_path, save_navmesh_set, save_navmesh_set_to_path,
};
pub use poly_ref::{POLY_BITS, PolyRef, SALT_BITS, TILE_BITS};
pub use query_filter::{MAX_AREAS, QueryFilter};
pub use smooth_path::{MAX_PATH_LEN, MAX_SMOOTH_PATH_LEN, SmoothPath, get_smooth_path};
pub use status::{QueryError, QueryStatus};
pub use tile_data::{
    BvNode, DETAIL_EDGE_BOUNDARY, EXT_LINK, MeshHeader, MeshTileData, NAVMESH_MAGIC,
    NAVMESH_VERSION, OFFMESH_CON_BIDIR, OffMeshConnection, Poly, PolyDetail, PolyType,
    TileDataError, VERTS_PER_POLYGON,
};
