use crate::{Aabb3d, BuildContoursFlags};

/// Every parameter of a tile build, in the units each stage works in.
///
/// Most fields are voxel counts (vx), a few are world units (wu). A voxel is
/// [`NavmeshConfig::cell_size`] wide and [`NavmeshConfig::cell_height`] tall.
/// Filling this in by hand is error prone, prefer deriving it from agent dimensions
/// with [`NavmeshConfigBuilder`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfig {
    /// Grid columns along x, border included. `[Units: vx]`
    pub width: u16,
    /// Grid rows along z, border included. `[Units: vx]`
    pub height: u16,
    /// Side length of one tile when the world is split into tiles. `[Units: vx]`
    pub tile_size: u16,
    /// Ring of cells around the grid that never becomes walkable. `[Units: vx]`
    ///
    /// Tiles need it so that their edges line up with their neighbors.
    pub border_size: u16,
    /// Horizontal voxel size. `[Limit: > 0] [Units: wu]`
    ///
    /// Roughly a half or a third of the agent radius.
    pub cell_size: f32,
    /// Vertical voxel size. `[Limit: > 0] [Units: wu]`
    pub cell_height: f32,
    /// World bounds of the grid, without the border. `[Units: wu]`
    pub aabb: Aabb3d,
    /// Steepest slope still rasterized as walkable. `[Limit: 0 <= value < 0.5*π] [Units: Radians]`
    pub walkable_slope_angle: f32,
    /// Clearance an agent needs above the floor. `[Limit: >= 3] [Units: vx]`
    pub walkable_height: u16,
    /// Tallest step between neighboring floors. `[Units: vx]`
    pub walkable_climb: u16,
    /// How far walkable floor is pulled back from walls. `[Units: vx]`
    pub walkable_radius: u16,
    /// Longest allowed contour edge on the mesh border, 0 for no limit. `[Units: vx]`
    pub max_edge_len: u16,
    /// How far a simplified contour may stray from the raw one. `[Units: vx]`
    pub max_simplification_error: f32,
    /// Regions with fewer spans that touch nothing else are dropped. `[Units: vx]`
    pub min_region_area: u16,
    /// Regions with fewer spans are merged into a neighbor when possible. `[Units: vx]`
    pub merge_region_area: u16,
    /// Polygon size limit of the polygon mesh. `[Limit: 3..=6]`
    pub max_vertices_per_polygon: u16,
    /// Spacing of height samples in the detail mesh, 0 to sample only the outline. `[Units: wu]`
    pub detail_sample_dist: f32,
    /// Height error the detail mesh tolerates before adding a sample. `[Units: wu]`
    pub detail_sample_max_error: f32,
    /// Tessellation options for [`build_contours`](crate::CompactHeightfield::build_contours).
    pub contour_flags: BuildContoursFlags,
    /// Region partitioning algorithm.
    pub partition_type: PartitionType,
    /// Filter passes run on the voxels before compaction.
    pub filters: HeightfieldFilters,
}

impl NavmeshConfig {
    /// Sets [`Self::aabb`] and derives the grid size from it.
    ///
    /// The grid size is padded by the border on both sides.
    pub fn calc_grid_size(&mut self, aabb: Aabb3d) {
        self.aabb = aabb;
        let (width, height) = crate::heightfield::grid_size(&aabb, self.cell_size);
        self.width = width as u16 + self.border_size * 2;
        self.height = height as u16 + self.border_size * 2;
    }

    /// The AABB of the heightfield, which grows by the border on the xz-plane.
    pub fn padded_aabb(&self) -> Aabb3d {
        let pad = self.border_size as f32 * self.cell_size;
        let mut aabb = self.aabb;
        aabb.min.x -= pad;
        aabb.min.z -= pad;
        aabb.max.x += pad;
        aabb.max.z += pad;
        aabb
    }
}

/// The algorithm used to partition a [`CompactHeightfield`](crate::CompactHeightfield) into
/// regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum PartitionType {
    /// Floods regions from a distance field.
    /// Best tessellation, slowest, and can rarely produce overlapping regions in spiral corridors.
    #[default]
    Watershed,
    /// Sweeps the field row by row.
    /// Fastest, produces no holes or overlaps, but long thin polygons.
    Monotone,
    /// Sweeps the field and merges the result into non-overlapping layers.
    Layers,
}

bitflags::bitflags! {
    /// Optional filter passes run on the [`Heightfield`](crate::Heightfield) after rasterization.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct HeightfieldFilters: u8 {
        /// Makes unwalkable spans walkable when they are a step below a walkable span.
        const LOW_HANGING_OBSTACLES = 1;
        /// Marks spans next to a drop taller than the climb height as unwalkable.
        const LEDGE_SPANS = 1 << 1;
        /// Marks spans with less clearance than the agent height as unwalkable.
        const LOW_HEIGHT_SPANS = 1 << 2;
    }
}

/// Agent-centric settings in world units, turned into a [`NavmeshConfig`] by [`Self::build`].
///
/// The defaults fit an agent of roughly human size in a world measured in meters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfigBuilder {
    /// Horizontal voxel size. `[Units: wu]`
    pub cell_size: f32,
    /// Vertical voxel size. `[Units: wu]`
    pub cell_height: f32,
    /// Agent height, ideally with some headroom. `[Units: wu]`
    pub agent_height: f32,
    /// Agent radius. `[Units: wu]`
    pub agent_radius: f32,
    /// Highest step the agent walks up. `[Units: wu]`
    pub agent_max_climb: f32,
    /// Steepest walkable slope. `[Units: Radians]`
    pub agent_max_slope: f32,
    /// Side length of the smallest kept region. `[Units: vx]`
    pub region_min_size: f32,
    /// Side length below which regions get merged. `[Units: vx]`
    pub region_merge_size: f32,
    /// Longest border edge. `[Units: wu]`
    pub edge_max_len: f32,
    /// Contour simplification error. `[Units: vx]`
    pub edge_max_error: f32,
    /// Vertices per polygon.
    pub verts_per_poly: f32,
    /// Detail sample spacing in cells. Below 0.9 sampling is off.
    pub detail_sample_dist: f32,
    /// Detail error in cell heights.
    pub detail_sample_max_error: f32,
    /// Tile side length. `[Units: vx]`
    pub tile_size: u16,
    /// World bounds of the geometry to build. `[Units: wu]`
    pub aabb: Aabb3d,
    /// See [`NavmeshConfig::contour_flags`].
    pub contour_flags: BuildContoursFlags,
    /// See [`NavmeshConfig::partition_type`].
    pub partition_type: PartitionType,
    /// See [`NavmeshConfig::filters`].
    pub filters: HeightfieldFilters,
    /// Build one tile of a tiled mesh. The tile spans `tile_size` cells from `aabb.min` on x
    /// and z, and gets a border of `walkable_radius + 3` cells.
    pub tiling: bool,
}

impl Default for NavmeshConfigBuilder {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0_f32.to_radians(),
            region_min_size: 8.0,
            region_merge_size: 20.0,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            verts_per_poly: 6.0,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            tile_size: 32,
            aabb: Aabb3d::default(),
            contour_flags: BuildContoursFlags::default(),
            partition_type: PartitionType::default(),
            filters: HeightfieldFilters::empty(),
            tiling: false,
        }
    }
}

impl NavmeshConfigBuilder {
    /// Builds a [`NavmeshConfig`] from the current configuration.
    pub fn build(self) -> NavmeshConfig {
        let walkable_radius = (self.agent_radius / self.cell_size).ceil() as u16;
        let border_size = if self.tiling { walkable_radius + 3 } else { 0 };
        let mut config = NavmeshConfig {
            width: 0,
            height: 0,
            tile_size: self.tile_size,
            border_size,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            aabb: self.aabb,
            walkable_slope_angle: self.agent_max_slope,
            walkable_height: (self.agent_height / self.cell_height).ceil() as u16,
            walkable_climb: (self.agent_max_climb / self.cell_height).ceil() as u16,
            walkable_radius,
            max_edge_len: (self.edge_max_len / self.cell_size) as u16,
            max_simplification_error: self.edge_max_error,
            min_region_area: (self.region_min_size * self.region_min_size) as u16,
            merge_region_area: (self.region_merge_size * self.region_merge_size) as u16,
            max_vertices_per_polygon: self.verts_per_poly as u16,
            detail_sample_dist: if self.detail_sample_dist < 0.9 {
                0.0
            } else {
                self.cell_size * self.detail_sample_dist
            },
            detail_sample_max_error: self.cell_height * self.detail_sample_max_error,
            contour_flags: self.contour_flags,
            partition_type: self.partition_type,
            filters: self.filters,
        };
        let mut aabb = self.aabb;
        if self.tiling {
            let side = f32::from(self.tile_size) * self.cell_size;
            aabb.max.x = aabb.min.x + side;
            aabb.max.z = aabb.min.z + side;
        }
        config.calc_grid_size(aabb);
        config
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use super::*;

    #[test]
    fn defaults_describe_a_human_sized_agent() {
        let config = NavmeshConfigBuilder {
            aabb: Aabb3d {
                min: Vec3A::ZERO,
                max: Vec3A::new(30.0, 5.0, 15.0),
            },
            ..Default::default()
        }
        .build();
        assert_eq!(config.width, 100);
        assert_eq!(config.height, 50);
        assert_eq!(config.border_size, 0);
        assert_eq!(config.walkable_height, 10);
        assert_eq!(config.walkable_climb, 5);
        assert_eq!(config.walkable_radius, 2);
        assert_eq!(config.max_edge_len, 40);
        assert_eq!(config.min_region_area, 64);
        assert_eq!(config.merge_region_area, 400);
        assert_eq!(config.max_vertices_per_polygon, 6);
        approx::assert_relative_eq!(config.detail_sample_dist, 1.8);
        approx::assert_relative_eq!(config.detail_sample_max_error, 0.2);
        assert_eq!(config.partition_type, PartitionType::Watershed);
        assert!(config.filters.is_empty());
    }

    #[test]
    fn grid_matches_the_heightfield_it_drives() {
        for tiling in [false, true] {
            let config = NavmeshConfigBuilder {
                aabb: Aabb3d {
                    min: Vec3A::ZERO,
                    max: Vec3A::new(30.0, 5.0, 15.0),
                },
                tiling,
                ..Default::default()
            }
            .build();
            let heightfield = crate::HeightfieldBuilder {
                aabb: config.padded_aabb(),
                cell_size: config.cell_size,
                cell_height: config.cell_height,
            }
            .build()
            .unwrap();
            assert_eq!((config.width, config.height), (heightfield.width, heightfield.height));
        }
    }

    #[test]
    fn tiles_cover_tile_size_cells_plus_a_border() {
        let config = NavmeshConfigBuilder {
            aabb: Aabb3d {
                min: Vec3A::new(-4.0, 0.0, 2.0),
                max: Vec3A::new(30.0, 5.0, 15.0),
            },
            tiling: true,
            ..Default::default()
        }
        .build();
        assert_eq!(config.border_size, 5);
        assert_eq!((config.width, config.height), (42, 42));
        approx::assert_relative_eq!(config.aabb.max.x, 5.6, epsilon = 1e-4);
        approx::assert_relative_eq!(config.aabb.max.z, 11.6, epsilon = 1e-4);
    }

    #[test]
    fn tiny_sample_distance_disables_detail_sampling() {
        let config = NavmeshConfigBuilder {
            detail_sample_dist: 0.5,
            ..Default::default()
        }
        .build();
        assert_eq!(config.detail_sample_dist, 0.0);
    }
}
