use crate::{
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    span::{AreaType, SpanKey},
};

impl Heightfield {
    const MAX_HEIGHT: i32 = u16::MAX as i32;

    /// Marks non-walkable spans as walkable if their maximum is within `walkable_climb_height` of
    /// the span below them.
    ///
    /// This removes small obstacles and rasterization artifacts that the agent would be able to
    /// walk over
    /// such as curbs. It also allows agents to move up terraced structures like stairs.
    ///
    /// Obstacle spans are marked walkable if: `obstacle_span.max - walkable_span.max <
    /// walkable_climb_height`
    ///
    /// # Arguments
    ///
    /// - `walkable_climb_height` - Maximum ledge height that is considered to still be traversable.
    ///   `[Limit: >=0] [Units: vx]`
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb_height: u16) {
        let mut column_keys: Vec<SpanKey> = Vec::new();
        for z in 0..self.height {
            for x in 0..self.width {
                column_keys.clear();
                column_keys.extend(self.column(x, z).map(|(key, _)| key));

                let mut previous_max: Option<u16> = None;
                let mut previous_was_walkable = false;
                let mut previous_area = AreaType::NOT_WALKABLE;

                for &key in &column_keys {
                    let span = self.span_mut(key);
                    let walkable = span.area().is_walkable();

                    // If the current span is not walkable, but there is a walkable span just below
                    // it and the height
                    // difference is small enough for the agent to walk over, mark the current span
                    // as walkable too.
                    if let Some(previous_max) = previous_max {
                        if !walkable
                            && previous_was_walkable
                            && (span.max() as i32 - previous_max as i32).abs()
                                <= walkable_climb_height as i32
                        {
                            span.set_area(previous_area);
                        }
                    }

                    // Copy the original walkable value regardless of whether we changed it.
                    // This prevents multiple consecutive non-walkable spans from being erroneously
                    // marked as walkable.
                    previous_max = Some(span.max());
                    previous_was_walkable = walkable;
                    previous_area = span.area();
                }
            }
        }
    }

    /// Marks spans that are ledges as not-walkable.
    ///
    /// A ledge is a span with one or more neighbors whose maximum is further away than
    /// `walkable_climb_height`
    /// from the current span's maximum.
    /// This method removes the impact of the overestimation of conservative voxelization
    /// so the resulting mesh will not have regions hanging in the air over ledges.
    ///
    /// # Arguments
    ///
    /// - `walkable_height` - Minimum floor to 'ceiling' height that will still allow the floor area
    ///   to be considered walkable. `[Limit: >= 3] [Units: vx]`
    /// - `walkable_climb_height` - Maximum ledge height that is considered to still be traversable.
    ///   `[Limit: >=0] [Units: vx]`
    pub fn filter_ledge_spans(&mut self, walkable_height: u16, walkable_climb_height: u16) {
        let walkable_height = walkable_height as i32;
        let walkable_climb = walkable_climb_height as i32;
        let mut ledges: Vec<SpanKey> = Vec::new();

        for z in 0..self.height {
            for x in 0..self.width {
                for (key, span) in self.column(x, z) {
                    // Skip non-walkable spans.
                    if !span.area().is_walkable() {
                        continue;
                    }
                    let floor = span.max() as i32;
                    let ceiling = self.ceiling_of(span.next());

                    // The difference between this walkable area and the lowest neighbor walkable
                    // area.
                    // This is the difference between the current span and all neighbor spans that
                    // have
                    // enough space for an agent to move between, but not accounting at all for
                    // surface slope.
                    let mut lowest_neighbor_floor_difference = Self::MAX_HEIGHT;

                    // Min and max height of accessible neighbours.
                    let mut lowest_traversable_neighbor_floor = floor;
                    let mut highest_traversable_neighbor_floor = floor;

                    for dir in 0..4 {
                        let neighbor_x = x as i32 + dir_offset_x(dir) as i32;
                        let neighbor_z = z as i32 + dir_offset_z(dir) as i32;
                        // Skip neighbours which are out of bounds.
                        if !self.contains(neighbor_x, neighbor_z) {
                            lowest_neighbor_floor_difference = -walkable_climb - 1;
                            break;
                        }
                        let mut neighbor_column =
                            self.column(neighbor_x as u16, neighbor_z as u16).peekable();

                        // The most we can step down to the neighbor is the walkable climb distance.
                        let neighbor_ceiling = neighbor_column
                            .peek()
                            .map_or(Self::MAX_HEIGHT, |(_, neighbor)| neighbor.min() as i32);

                        // Skip neighbour if the gap between the spans is too small.
                        if ceiling.min(neighbor_ceiling) - floor >= walkable_height {
                            lowest_neighbor_floor_difference = -walkable_climb - 1;
                            break;
                        }

                        for (_, neighbor) in neighbor_column {
                            let neighbor_floor = neighbor.max() as i32;
                            let neighbor_ceiling = self.ceiling_of(neighbor.next());

                            // Only consider neighboring areas that have enough overlap to be
                            // potentially traversable.
                            if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor)
                                < walkable_height
                            {
                                // No space to traverse between them.
                                continue;
                            }

                            let neighbor_floor_difference = neighbor_floor - floor;
                            lowest_neighbor_floor_difference =
                                lowest_neighbor_floor_difference.min(neighbor_floor_difference);

                            // Find min/max accessible neighbor height.
                            // Only consider neighbors that are at most walkable_climb away.
                            if neighbor_floor_difference.abs() <= walkable_climb {
                                // There is space to move to the neighbor cell and the slope isn't
                                // too much.
                                lowest_traversable_neighbor_floor =
                                    lowest_traversable_neighbor_floor.min(neighbor_floor);
                                highest_traversable_neighbor_floor =
                                    highest_traversable_neighbor_floor.max(neighbor_floor);
                            } else if neighbor_floor_difference < -walkable_climb {
                                // We already know this will be considered a ledge span so we can
                                // early-out
                                break;
                            }
                        }
                    }

                    // The current span is close to a ledge if the magnitude of the drop to any
                    // neighbour span
                    // is greater than the walkable_climb distance.
                    // That is, there is a gap that is large enough to let an agent move between
                    // them,
                    // but the drop (surface slope) is too large to allow it.
                    if lowest_neighbor_floor_difference < -walkable_climb {
                        ledges.push(key);
                    }
                    // If the difference between all neighbor floors is too large, this is a steep
                    // slope.
                    else if highest_traversable_neighbor_floor - lowest_traversable_neighbor_floor
                        > walkable_climb
                    {
                        ledges.push(key);
                    }
                }
            }
        }

        for key in ledges {
            self.span_mut(key).set_area(AreaType::NOT_WALKABLE);
        }
    }

    /// Marks walkable spans as not walkable if the clearance above the span is less than the
    /// specified `walkable_height`.
    ///
    /// For this filter, the clearance above the span is the distance from the span's
    /// maximum to the minimum of the next higher span in the same column.
    /// If there is no higher span in the column, the clearance is computed as the
    /// distance from the top of the span to the maximum heightfield height.
    ///
    /// # Arguments
    ///
    /// - `walkable_height` - Minimum floor to 'ceiling' height that will still allow the floor area
    ///   to be considered walkable. `[Limit: >= 3] [Units: vx]`
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: u16) {
        let too_low: Vec<SpanKey> = self
            .spans
            .iter()
            .filter(|(_, span)| {
                self.ceiling_of(span.next()) - (span.max() as i32) < walkable_height as i32
            })
            .map(|(key, _)| key)
            .collect();
        for key in too_low {
            self.span_mut(key).set_area(AreaType::NOT_WALKABLE);
        }
    }

    #[inline]
    fn ceiling_of(&self, next: Option<SpanKey>) -> i32 {
        next.map_or(Self::MAX_HEIGHT, |next| self.span(next).min() as i32)
    }
}
