//! Layer partitioning
//!   - quite fast
//!   - partitions the heightfield into non-overlapping regions
//!   - relies on the triangulation code to cope with holes (thus slower than monotone partitioning)
//!   - produces better triangles than monotone partitioning
//!   - does not have the corner cases of watershed partitioning
//!   - can be slow and create a bit ugly tessellation (still better than monotone)
//!     if you have large open areas with small obstacles (not a problem if you use tiles)
//!   * good choice to use for tiled navmesh with medium and small sized tiles

use crate::{CompactHeightfield, RegionId, region::RegionError};

impl CompactHeightfield {
    /// Builds region data for the heightfield by partitioning it into non-overlapping layers.
    ///
    /// The field is first swept into monotone regions, which are then flood-merged into layers
    /// that never cover the same column twice.
    ///
    /// # Arguments
    ///
    /// - `border_size` - The size of the non-navigable border around the heightfield. `[Limit: >=0]
    ///   [Units: vx]`
    /// - `min_region_area` - The minimum number of cells allowed to form isolated island areas.
    ///   `[Limit: >=0] [Units: vx]`
    pub fn build_layer_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
    ) -> Result<(), RegionError> {
        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut id = self.sweep_regions(border_size, &mut src_reg)?;

        self.merge_and_filter_layer_regions(min_region_area as usize, &mut id, &mut src_reg);

        self.store_regions(&src_reg, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        AreaType, CompactHeightfield, RegionId,
        compact_heightfield::tests::heightfield_from_fn,
        heightfield::SpanInsertion,
        span::SpanBuilder,
        watershed_build_regions::tests::assert_fully_partitioned,
    };

    /// An 8x8 ground floor with a 4x4 deck floating above its center.
    fn deck() -> CompactHeightfield {
        let mut heightfield = heightfield_from_fn(8, |_, _| Some(1));
        for z in 2..6 {
            for x in 2..6 {
                heightfield
                    .add_span(SpanInsertion {
                        x,
                        z,
                        flag_merge_threshold: 1,
                        span: SpanBuilder {
                            min: 10,
                            max: 11,
                            area: AreaType::DEFAULT_WALKABLE,
                            next: None,
                        }
                        .build(),
                    })
                    .unwrap();
            }
        }
        heightfield.into_compact(2, 1).unwrap()
    }

    #[test]
    fn stacked_floors_become_separate_layers() {
        let mut chf = deck();
        chf.build_layer_regions(0, 0).unwrap();
        assert_eq!(chf.max_region, RegionId::from(2));
        let cell = *chf.cell_at(3, 3);
        assert_eq!(cell.count(), 2);
        let range = cell.index_range();
        assert_ne!(chf.spans[range.start].region, chf.spans[range.start + 1].region);
        assert_fully_partitioned(&chf);
    }

    #[test]
    fn small_layers_are_removed() {
        let mut chf = deck();
        chf.build_layer_regions(0, 20).unwrap();
        assert_eq!(chf.max_region, RegionId::from(1));
        let cell = *chf.cell_at(3, 3);
        let deck = cell.index_range().start + 1;
        assert_eq!(chf.spans[deck].region, RegionId::NONE);
    }
}
