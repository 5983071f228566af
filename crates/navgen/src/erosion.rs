use crate::{AreaType, CompactHeightfield};

impl CompactHeightfield {
    /// Erodes the walkable area by agent radius.
    ///
    /// Every walkable span closer than `walkable_radius` to an obstruction or to the edge of
    /// the field is marked [`AreaType::NOT_WALKABLE`].
    ///
    /// # Arguments
    ///
    /// - `walkable_radius` - The radius of erosion. `[Limits: 0 < value < 255] [Units: vx]`
    pub fn erode_walkable_area(&mut self, walkable_radius: u16) {
        let mut distance_to_boundary = vec![u8::MAX; self.spans.len()];

        // Mark boundary cells.
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    if !self.areas[i].is_walkable() {
                        distance_to_boundary[i] = 0;
                        continue;
                    }
                    // Check that there is a non-null adjacent span in each of the 4 cardinal
                    // directions.
                    let neighbor_count = (0..4)
                        .filter_map(|dir| self.neighbor_index(x, z, i, dir))
                        .filter(|&a_i| self.areas[a_i].is_walkable())
                        .count();
                    // At least one missing neighbour, so this is a boundary cell.
                    if neighbor_count != 4 {
                        distance_to_boundary[i] = 0;
                    }
                }
            }
        }

        // Pass 1
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    // (-1, 0) then (-1, -1)
                    self.relax_distance(x, z, i, 0, 3, &mut distance_to_boundary);
                    // (0, -1) then (1, -1)
                    self.relax_distance(x, z, i, 3, 2, &mut distance_to_boundary);
                }
            }
        }

        // Pass 2
        for z in (0..self.height).rev() {
            for x in (0..self.width).rev() {
                for i in self.cell_at(x, z).index_range() {
                    // (1, 0) then (1, 1)
                    self.relax_distance(x, z, i, 2, 1, &mut distance_to_boundary);
                    // (0, 1) then (-1, 1)
                    self.relax_distance(x, z, i, 1, 0, &mut distance_to_boundary);
                }
            }
        }

        let threshold = (walkable_radius * 2).min(u8::MAX as u16) as u8;
        for (area, distance) in self.areas.iter_mut().zip(distance_to_boundary) {
            if distance < threshold {
                *area = AreaType::NOT_WALKABLE;
            }
        }
    }

    /// One chamfer step: pulls the distance of span `i` down from its axis neighbor in `dir`
    /// (cost 2) and from the diagonal reached by turning to `diagonal_dir` (cost 3).
    fn relax_distance(
        &self,
        x: u16,
        z: u16,
        i: usize,
        dir: u8,
        diagonal_dir: u8,
        distance: &mut [u8],
    ) {
        let Some(con) = self.spans[i].con(dir) else {
            return;
        };
        let (a_x, a_z, a_i) = self.con_indices(x as i32, z as i32, dir, con);
        distance[i] = distance[i].min(distance[a_i].saturating_add(2));

        let Some(con) = self.spans[a_i].con(diagonal_dir) else {
            return;
        };
        let (_, _, b_i) = self.con_indices(a_x, a_z, diagonal_dir, con);
        distance[i] = distance[i].min(distance[b_i].saturating_add(3));
    }

    /// Applies a median filter to walkable area types (based on area id), removing noise.
    ///
    /// This filter is usually applied after applying area id's using functions
    /// such as [`CompactHeightfield::mark_box_area`],
    /// [`CompactHeightfield::mark_convex_poly_area`],
    /// and [`CompactHeightfield::mark_cylinder_area`].
    pub fn median_filter_walkable_area(&mut self) {
        let mut filtered = self.areas.clone();
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    let area = self.areas[i];
                    if !area.is_walkable() {
                        continue;
                    }

                    let mut neighborhood = [area; 9];
                    for dir in 0..4_u8 {
                        let Some(con) = self.spans[i].con(dir) else {
                            continue;
                        };
                        let (a_x, a_z, a_i) = self.con_indices(x as i32, z as i32, dir, con);
                        if self.areas[a_i].is_walkable() {
                            neighborhood[dir as usize * 2] = self.areas[a_i];
                        }
                        let dir2 = (dir + 1) & 0x3;
                        let Some(con) = self.spans[a_i].con(dir2) else {
                            continue;
                        };
                        let (_, _, b_i) = self.con_indices(a_x, a_z, dir2, con);
                        if self.areas[b_i].is_walkable() {
                            neighborhood[dir as usize * 2 + 1] = self.areas[b_i];
                        }
                    }
                    neighborhood.sort_unstable();
                    filtered[i] = neighborhood[4];
                }
            }
        }
        self.areas = filtered;
    }
}
