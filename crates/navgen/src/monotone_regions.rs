//! Monotone partitioning
//!   - fastest
//!   - partitions the heightfield into regions without holes and overlaps (guaranteed)
//!   - creates long thin polygons, which sometimes causes paths with detours
//!   * use this if you want fast navmesh generation

use crate::{CompactHeightfield, RegionId, region::RegionError, region_merge::next_region_id};

/// Marks a sweep span that touches more than one region of the previous row.
const NULL_NEIGHBOR: u16 = 0xffff;

#[derive(Debug, Clone, Copy, Default)]
struct SweepSpan {
    /// Region id assigned once the row is done
    id: u16,
    /// Number of samples shared with `neighbor`
    sample_count: u16,
    /// The region of the previous row this span connects to
    neighbor: u16,
}

impl CompactHeightfield {
    /// Builds region data for the heightfield using simple monotone partitioning.
    ///
    /// Non-null regions will consist of connected, non-overlapping walkable spans that form a
    /// single contour.
    /// Contours will form simple polygons.
    ///
    /// If multiple regions form an area that is smaller than `min_region_area`, then all spans will
    /// be
    /// re-assigned to [`RegionId::NONE`].
    ///
    /// Partitioning can result in smaller than necessary regions. `merge_region_area` helps
    /// reduce unnecessarily small regions.
    ///
    /// # Arguments
    ///
    /// - `border_size` - The size of the non-navigable border around the heightfield. `[Limit: >=0]
    ///   [Units: vx]`
    /// - `min_region_area` - The minimum number of cells allowed to form isolated island areas.
    ///   `[Limit: >=0] [Units: vx]`
    /// - `merge_region_area` - Any regions with a span count smaller than this value will, if
    ///   possible, be merged with larger regions. `[Limit: >=0] [Units: vx]`
    pub fn build_regions_monotone(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionError> {
        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut id = self.sweep_regions(border_size, &mut src_reg)?;

        // Monotone regions never overlap, so there is nothing to report.
        self.merge_and_filter_regions(
            min_region_area as usize,
            merge_region_area as usize,
            &mut id,
            &mut src_reg,
        );

        self.store_regions(&src_reg, id);
        Ok(())
    }

    /// Paints the border and sweeps the field row by row, giving every run of connected spans
    /// a region. A run continues the region of the previous row when it touches exactly that one.
    ///
    /// Returns the next unused region id.
    pub(crate) fn sweep_regions(
        &mut self,
        border_size: u16,
        src_reg: &mut [RegionId],
    ) -> Result<u16, RegionError> {
        let width = self.width;
        let height = self.height;
        let mut id = 1_u16;
        let mut sweeps: Vec<SweepSpan> = vec![SweepSpan::default(); width as usize + 1];
        let mut prev: Vec<u16> = Vec::with_capacity(256);

        self.paint_border_regions(border_size, src_reg, &mut id);
        let border_size = self.border_size.min(width / 2).min(height / 2);

        for z in border_size..height - border_size {
            // Collect spans from this row.
            prev.clear();
            prev.resize(id as usize + 1, 0);
            let mut rid = 1_u16;

            for x in border_size..width - border_size {
                for i in self.cell_at(x, z).index_range() {
                    if !self.areas[i].is_walkable() {
                        continue;
                    }

                    // -x
                    let mut previd = 0_u16;
                    if let Some(a_i) = self.neighbor_index(x, z, i, 0) {
                        if !src_reg[a_i].is_border() && self.areas[i] == self.areas[a_i] {
                            previd = src_reg[a_i].bits();
                        }
                    }

                    if previd == 0 {
                        previd = rid;
                        rid += 1;
                        if sweeps.len() <= previd as usize {
                            sweeps.resize(previd as usize + 1, SweepSpan::default());
                        }
                        sweeps[previd as usize] = SweepSpan::default();
                    }

                    // -z
                    if let Some(a_i) = self.neighbor_index(x, z, i, 3) {
                        let neighbor_region = src_reg[a_i];
                        if neighbor_region != RegionId::NONE
                            && !neighbor_region.is_border()
                            && self.areas[i] == self.areas[a_i]
                        {
                            let nr = neighbor_region.bits();
                            let sweep = &mut sweeps[previd as usize];
                            if sweep.neighbor == 0 || sweep.neighbor == nr {
                                sweep.neighbor = nr;
                                sweep.sample_count += 1;
                                prev[nr as usize] += 1;
                            } else {
                                sweep.neighbor = NULL_NEIGHBOR;
                            }
                        }
                    }

                    src_reg[i] = RegionId::from(previd);
                }
            }

            // Create unique ID.
            for sweep in &mut sweeps[1..rid as usize] {
                // If the neighbour is set and there is only one continuous connection to it,
                // the sweep will be merged with the previous one, else new region is created.
                if sweep.neighbor != NULL_NEIGHBOR
                    && sweep.neighbor != 0
                    && prev[sweep.neighbor as usize] == sweep.sample_count
                {
                    sweep.id = sweep.neighbor;
                } else {
                    sweep.id = next_region_id(&mut id)?.bits();
                }
            }

            // Remap IDs
            for x in border_size..width - border_size {
                for i in self.cell_at(x, z).index_range() {
                    let local = src_reg[i].bits();
                    if local > 0 && local < rid {
                        src_reg[i] = RegionId::from(sweeps[local as usize].id);
                    }
                }
            }
        }
        Ok(id)
    }
}
