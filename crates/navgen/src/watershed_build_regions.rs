//! Watershed partitioning
//!   - the classic Recast partitioning
//!   - creates the nicest tessellation
//!   - usually slowest
//!   - partitions the heightfield into nice regions without holes or overlaps
//!   - there are some corner cases where this method produces holes and overlaps
//!      - holes may appear when a small obstacle is close to a large open area (triangulation can
//!        handle this)
//!      - overlaps may occur if you have narrow spiral corridors (i.e stairs), this makes
//!        triangulation fail
//!   * generally the best choice if you precompute the navmesh, use this if you have large open
//!     areas

use tracing::warn;

use crate::{
    CompactHeightfield, RegionId,
    region::RegionError,
    region_merge::next_region_id,
};

impl CompactHeightfield {
    /// Builds region data for the heightfield using watershed partitioning.
    ///
    /// Non-null regions will consist of connected, non-overlapping walkable spans that form a
    /// single contour.
    /// Contours will form simple polygons.
    ///
    /// If multiple regions form an area that is smaller than `min_region_area`, then all spans will
    /// be
    /// re-assigned to [`RegionId::NONE`].
    ///
    /// Watershed partitioning can result in smaller than necessary regions, especially in diagonal
    /// corridors.
    /// `merge_region_area` helps reduce unnecessarily small regions.
    ///
    /// The region data will be available via the [`CompactHeightfield::max_region`]
    /// and [`CompactSpan::region`](crate::CompactSpan::region) fields.
    ///
    /// The distance field must be created using [`CompactHeightfield::build_distance_field`] before
    /// attempting to build regions.
    ///
    /// # Arguments
    ///
    /// - `border_size` - The size of the non-navigable border around the heightfield. `[Limit: >=0]
    ///   [Units: vx]`
    /// - `min_region_area` - The minimum number of cells allowed to form isolated island areas.
    ///   `[Limit: >=0] [Units: vx]`
    /// - `merge_region_area` - Any regions with a span count smaller than this value will, if
    ///   possible, be merged with larger regions. `[Limit: >=0] [Units: vx]`
    pub fn build_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionError> {
        if self.dist.len() != self.spans.len() {
            return Err(RegionError::MissingDistanceField {
                distances: self.dist.len(),
                spans: self.spans.len(),
            });
        }

        const LOG_NB_STACKS: usize = 3;
        const NB_STACKS: usize = 1 << LOG_NB_STACKS;
        let mut level_stacks: [Vec<LevelStackEntry>; NB_STACKS] =
            std::array::from_fn(|_| Vec::with_capacity(256));
        let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);

        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut src_dist = vec![0_u16; self.spans.len()];

        let mut region_id = 1_u16;
        let mut level = (self.max_distance + 1) & !1;

        // Defines how much the watershed "overflows" and simplifies the regions.
        let expand_iters = 8;

        self.paint_border_regions(border_size, &mut src_reg, &mut region_id);

        let mut s_id = usize::MAX;
        while level > 0 {
            level = level.saturating_sub(2);
            s_id = s_id.wrapping_add(1) & (NB_STACKS - 1);

            if s_id == 0 {
                self.sort_cells_by_level(level, &src_reg, &mut level_stacks, 1);
            } else {
                // Copy left overs from last level.
                let (src, dst) = level_stacks.split_at_mut(s_id);
                append_stacks(&src[s_id - 1], &mut dst[0], &src_reg);
            }

            self.expand_regions(
                expand_iters,
                level,
                &mut src_reg,
                &mut src_dist,
                &mut level_stacks[s_id],
                false,
            );

            // Mark new regions with IDs.
            for j in 0..level_stacks[s_id].len() {
                let entry = level_stacks[s_id][j];
                let Some(i) = entry.index else {
                    continue;
                };
                if src_reg[i] != RegionId::NONE {
                    continue;
                }
                let candidate = RegionId::from(region_id);
                let flooded = self.flood_region(
                    entry,
                    level,
                    candidate,
                    &mut src_reg,
                    &mut src_dist,
                    &mut stack,
                );
                if flooded {
                    next_region_id(&mut region_id)?;
                }
            }
        }

        // Expand current regions until no empty connected cells found.
        self.expand_regions(
            expand_iters * 8,
            0,
            &mut src_reg,
            &mut src_dist,
            &mut stack,
            true,
        );

        // Merge regions and filter out small regions.
        let overlaps = self.merge_and_filter_regions(
            min_region_area as usize,
            merge_region_area as usize,
            &mut region_id,
            &mut src_reg,
        );

        // Overlapping regions are left as they are. Contour building may fail on them later.
        if !overlaps.is_empty() {
            warn!("Watershed partitioning produced {} overlapping regions.", overlaps.len());
        }

        self.store_regions(&src_reg, region_id);
        Ok(())
    }

    fn sort_cells_by_level(
        &self,
        start_level: u16,
        src_reg: &[RegionId],
        stacks: &mut [Vec<LevelStackEntry>],
        log_levels_per_stack: u16,
    ) {
        let start_level = start_level >> log_levels_per_stack;
        for stack in stacks.iter_mut() {
            stack.clear();
        }

        // Put all cells in the level range into the appropriate stacks.
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    if !self.areas[i].is_walkable() || src_reg[i] != RegionId::NONE {
                        continue;
                    }
                    let level = self.dist[i] >> log_levels_per_stack;
                    let s_id = start_level.saturating_sub(level) as usize;
                    if s_id >= stacks.len() {
                        continue;
                    }
                    stacks[s_id].push(LevelStackEntry {
                        x,
                        z,
                        index: Some(i),
                    });
                }
            }
        }
    }

    fn expand_regions(
        &self,
        max_iter: u16,
        level: u16,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
        fill_stack: bool,
    ) {
        if fill_stack {
            // Find cells revealed by the raised level.
            stack.clear();
            for z in 0..self.height {
                for x in 0..self.width {
                    for i in self.cell_at(x, z).index_range() {
                        if self.dist[i] >= level
                            && src_reg[i] == RegionId::NONE
                            && self.areas[i].is_walkable()
                        {
                            stack.push(LevelStackEntry {
                                x,
                                z,
                                index: Some(i),
                            });
                        }
                    }
                }
            }
        } else {
            // Use cells in the input stack, mark all cells which already have a region.
            for entry in stack.iter_mut() {
                if entry.index.is_some_and(|i| src_reg[i] != RegionId::NONE) {
                    entry.index = None;
                }
            }
        }

        let mut dirty_entries: Vec<DirtyEntry> = Vec::new();
        let mut iter = 0;
        while !stack.is_empty() {
            let mut failed = 0;
            dirty_entries.clear();

            for entry in stack.iter_mut() {
                let Some(i) = entry.index else {
                    failed += 1;
                    continue;
                };

                let mut region = src_reg[i];
                let mut distance = u16::MAX;
                let area = self.areas[i];
                for dir in 0..4 {
                    let Some(a_i) = self.neighbor_index(entry.x, entry.z, i, dir) else {
                        continue;
                    };
                    if self.areas[a_i] != area {
                        continue;
                    }
                    let a_region = src_reg[a_i];
                    let a_distance = src_dist[a_i].saturating_add(2);
                    if a_region != RegionId::NONE && !a_region.is_border() && a_distance < distance
                    {
                        region = a_region;
                        distance = a_distance;
                    }
                }
                if region != RegionId::NONE {
                    // Mark as used
                    entry.index = None;
                    dirty_entries.push(DirtyEntry {
                        index: i,
                        region,
                        distance,
                    });
                } else {
                    failed += 1;
                }
            }

            // Copy entries that differ between src and dst to keep them in sync.
            for dirty_entry in &dirty_entries {
                src_reg[dirty_entry.index] = dirty_entry.region;
                src_dist[dirty_entry.index] = dirty_entry.distance;
            }

            if failed == stack.len() {
                break;
            }

            if level > 0 {
                iter += 1;
                if iter >= max_iter {
                    break;
                }
            }
        }
    }

    /// Floods a new region from `start` across spans at or above `level - 2`.
    /// Returns `false` if the seed touched an existing region and was discarded.
    fn flood_region(
        &self,
        start: LevelStackEntry,
        level: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
    ) -> bool {
        let Some(start_index) = start.index else {
            return false;
        };
        let area = self.areas[start_index];

        // Flood fill mark region.
        stack.clear();
        stack.push(start);
        src_reg[start_index] = region;
        src_dist[start_index] = 0;

        let lev = level.saturating_sub(2);
        let mut count = 0;

        while let Some(LevelStackEntry { x, z, index }) = stack.pop() {
            let Some(ci) = index else {
                continue;
            };

            // Check if any of the neighbours already have a valid region set.
            let mut neighbor_region = RegionId::NONE;
            for dir in 0..4 {
                // 8 connected
                let Some(con) = self.spans[ci].con(dir) else {
                    continue;
                };
                let (a_x, a_z, a_i) = self.con_indices(x as i32, z as i32, dir, con);
                if self.areas[a_i] != area {
                    continue;
                }
                let nr = src_reg[a_i];
                // Do not take borders into account.
                if nr.is_border() {
                    continue;
                }
                if nr != RegionId::NONE && nr != region {
                    neighbor_region = nr;
                    break;
                }

                let dir2 = (dir + 1) & 0x3;
                let Some(con2) = self.spans[a_i].con(dir2) else {
                    continue;
                };
                let (_, _, b_i) = self.con_indices(a_x, a_z, dir2, con2);
                if self.areas[b_i] != area {
                    continue;
                }
                let nr2 = src_reg[b_i];
                if nr2 != RegionId::NONE && nr2 != region && !nr2.is_border() {
                    neighbor_region = nr2;
                    break;
                }
            }
            if neighbor_region != RegionId::NONE {
                src_reg[ci] = RegionId::NONE;
                continue;
            }

            count += 1;

            // Expand neighbours.
            for dir in 0..4 {
                let Some(con) = self.spans[ci].con(dir) else {
                    continue;
                };
                let (a_x, a_z, a_i) = self.con_indices(x as i32, z as i32, dir, con);
                if self.areas[a_i] != area {
                    continue;
                }
                if self.dist[a_i] >= lev && src_reg[a_i] == RegionId::NONE {
                    src_reg[a_i] = region;
                    src_dist[a_i] = 0;
                    stack.push(LevelStackEntry {
                        x: a_x as u16,
                        z: a_z as u16,
                        index: Some(a_i),
                    });
                }
            }
        }

        count > 0
    }
}

fn append_stacks(
    src_stack: &[LevelStackEntry],
    dst_stack: &mut Vec<LevelStackEntry>,
    src_reg: &[RegionId],
) {
    dst_stack.extend(
        src_stack
            .iter()
            .filter(|entry| entry.index.is_some_and(|i| src_reg[i] == RegionId::NONE)),
    );
}

#[derive(Clone, Copy, Debug)]
struct LevelStackEntry {
    x: u16,
    z: u16,
    /// `None` once the span has been assigned a region.
    index: Option<usize>,
}

#[derive(Clone, Debug)]
struct DirtyEntry {
    index: usize,
    region: RegionId,
    distance: u16,
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::{
        CompactHeightfield, RegionId, compact_heightfield::tests::flat, region::RegionError,
    };

    /// Every walkable, non-border span has a region.
    pub(crate) fn assert_fully_partitioned(chf: &CompactHeightfield) {
        for z in chf.border_size..chf.height - chf.border_size {
            for x in chf.border_size..chf.width - chf.border_size {
                for i in chf.cell_at(x, z).index_range() {
                    if chf.areas[i].is_walkable() {
                        assert_ne!(chf.spans[i].region, RegionId::NONE, "span at ({x}, {z})");
                    }
                }
            }
        }
    }

    #[test]
    fn requires_distance_field() {
        let mut chf = flat(4);
        assert!(matches!(
            chf.build_regions(0, 0, 0),
            Err(RegionError::MissingDistanceField { .. })
        ));
    }

    #[test]
    fn open_square_becomes_one_region() {
        let mut chf = flat(12);
        chf.build_distance_field();
        chf.build_regions(0, 4, 20).unwrap();
        assert_eq!(chf.max_region, RegionId::from(1));
        assert_fully_partitioned(&chf);
    }

    #[test]
    fn border_spans_get_border_regions() {
        let mut chf = flat(12);
        chf.build_distance_field();
        chf.build_regions(2, 4, 20).unwrap();
        assert_eq!(chf.border_size, 2);
        let corner = chf.cell_at(0, 0).index() as usize;
        assert!(chf.spans[corner].region.is_border());
        let center = chf.cell_at(6, 6).index() as usize;
        assert!(!chf.spans[center].region.is_border());
        assert_fully_partitioned(&chf);
    }

    #[test]
    fn tiny_islands_are_removed() {
        let mut chf = flat(12);
        chf.build_distance_field();
        chf.build_regions(0, 1000, 20).unwrap();
        assert_eq!(chf.max_region, RegionId::NONE);
        assert!(chf.spans.iter().all(|span| span.region == RegionId::NONE));
    }
}
