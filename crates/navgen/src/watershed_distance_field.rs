use crate::CompactHeightfield;

impl CompactHeightfield {
    /// Prepare for region partitioning, by calculating distance field along the walkable surface.
    ///
    /// The distance is measured to the closest span that either borders the edge of the field,
    /// an obstruction, or a span with a different area type. Axis steps count 2, diagonal steps 3.
    /// The result is stored in [`CompactHeightfield::dist`] and its maximum in
    /// [`CompactHeightfield::max_distance`].
    pub fn build_distance_field(&mut self) {
        let distance_field = self.calculate_distance_field();
        self.max_distance = distance_field.iter().max().copied().unwrap_or_default();
        self.dist = self.box_blur(1, &distance_field);
    }

    fn calculate_distance_field(&self) -> Vec<u16> {
        // Init distance and points.
        let mut distance_field = vec![u16::MAX; self.spans.len()];

        // Mark boundary cells.
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    let area = self.areas[i];
                    let connection_count = (0..4)
                        .filter_map(|dir| self.neighbor_index(x, z, i, dir))
                        .filter(|&a_i| self.areas[a_i] == area)
                        .count();
                    if connection_count != 4 {
                        distance_field[i] = 0;
                    }
                }
            }
        }

        // Pass 1
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    // (-1, 0) then (-1, -1)
                    self.chamfer_step(x, z, i, 0, 3, &mut distance_field);
                    // (0, -1) then (1, -1)
                    self.chamfer_step(x, z, i, 3, 2, &mut distance_field);
                }
            }
        }

        // Pass 2
        for z in (0..self.height).rev() {
            for x in (0..self.width).rev() {
                for i in self.cell_at(x, z).index_range() {
                    // (1, 0) then (1, 1)
                    self.chamfer_step(x, z, i, 2, 1, &mut distance_field);
                    // (0, 1) then (-1, 1)
                    self.chamfer_step(x, z, i, 1, 0, &mut distance_field);
                }
            }
        }

        distance_field
    }

    fn chamfer_step(
        &self,
        x: u16,
        z: u16,
        i: usize,
        dir: u8,
        diagonal_dir: u8,
        distance_field: &mut [u16],
    ) {
        let Some(con) = self.spans[i].con(dir) else {
            return;
        };
        let (a_x, a_z, a_i) = self.con_indices(x as i32, z as i32, dir, con);
        distance_field[i] = distance_field[i].min(distance_field[a_i].saturating_add(2));

        let Some(con) = self.spans[a_i].con(diagonal_dir) else {
            return;
        };
        let (_, _, b_i) = self.con_indices(a_x, a_z, diagonal_dir, con);
        distance_field[i] = distance_field[i].min(distance_field[b_i].saturating_add(3));
    }

    /// Smooths the distance field with a 3x3 box filter. Spans at or below `threshold`
    /// (in cells) from the border keep their distance.
    fn box_blur(&self, threshold: u16, distance_field: &[u16]) -> Vec<u16> {
        let threshold = threshold.saturating_mul(2);
        let mut result = vec![0; distance_field.len()];

        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    let cd = distance_field[i];
                    if cd <= threshold {
                        result[i] = cd;
                        continue;
                    }
                    let mut d = cd as u32;
                    for dir in 0..4 {
                        let Some(con) = self.spans[i].con(dir) else {
                            d += cd as u32 * 2;
                            continue;
                        };
                        let (a_x, a_z, a_i) = self.con_indices(x as i32, z as i32, dir, con);
                        d += distance_field[a_i] as u32;

                        let dir2 = (dir + 1) & 0x3;
                        if let Some(con) = self.spans[a_i].con(dir2) {
                            let (_, _, b_i) = self.con_indices(a_x, a_z, dir2, con);
                            d += distance_field[b_i] as u32;
                        } else {
                            d += cd as u32;
                        }
                    }
                    result[i] = ((d + 5) / 9) as u16;
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::compact_heightfield::tests::flat;

    #[test]
    fn distance_grows_towards_the_center() {
        let mut chf = flat(9);
        chf.build_distance_field();
        assert_eq!(chf.dist.len(), chf.spans.len());
        let border = chf.cell_at(0, 4).index() as usize;
        let inner = chf.cell_at(2, 4).index() as usize;
        let center = chf.cell_at(4, 4).index() as usize;
        assert_eq!(chf.dist[border], 0);
        assert!(chf.dist[inner] > chf.dist[border]);
        assert!(chf.dist[center] > chf.dist[inner]);
        assert_eq!(chf.max_distance, 8);
    }
}
