#![doc = include_str!("../../../readme.md")]

mod areas;
mod chunky_trimesh;
mod compact_cell;
mod compact_heightfield;
mod compact_span;
mod config;
mod context;
mod contours;
mod detail_mesh;
mod erosion;
mod heightfield;
mod input_geometry;
mod layer_regions;
pub mod main_api;
mod mark_convex_poly_area;
pub(crate) mod math;
mod monotone_regions;
mod poly_mesh;
mod pre_filter;
mod rasterize;
mod region;
mod region_merge;
mod span;
mod trimesh;
mod watershed_build_regions;
mod watershed_distance_field;

pub use areas::{NavArea, NavPolyFlags, apply_area_flags};
pub use chunky_trimesh::{ChunkKind, ChunkyTriMesh, ChunkyTriMeshNode};
pub use compact_cell::CompactCell;
pub use compact_heightfield::{CompactHeightfield, CompactHeightfieldError};
pub use compact_span::CompactSpan;
pub use config::{HeightfieldFilters, NavmeshConfig, NavmeshConfigBuilder, PartitionType};
pub use context::{BufferedLog, LogCategory, LogRecord, LogSink, TracingLog};
pub use contours::{BuildContoursFlags, Contour, ContourError, ContourSet, ContourVertex};
pub use detail_mesh::{DetailMeshError, DetailNavmesh, DetailTriangle, SubMesh};
pub use heightfield::{
    ColumnIter, Heightfield, HeightfieldBuilder, HeightfieldBuilderError, SpanInsertionError,
    grid_size,
};
pub use input_geometry::{InputGeometry, OffMeshConnection};
pub use main_api::{
    BuildError, build_single_tile, create_compact_heightfield, create_detail_mesh,
    create_polygon_mesh, create_tile_data,
};
pub use mark_convex_poly_area::ConvexVolume;
pub use math::{Aabb2d, Aabb3d};
pub use poly_mesh::{MESH_NULL_IDX, MESH_PORTAL_FLAG, PolygonMesh, PolygonMeshError};
pub use rasterize::RasterizationError;
pub use region::{RegionError, RegionId};
pub use span::{AreaType, Span, SpanKey, Spans};
pub use trimesh::TriMesh;
