use glam::{IVec3, Vec2, Vec3A};

use crate::{Aabb3d, AreaType, CompactHeightfield, math::point_in_poly_2d};

impl CompactHeightfield {
    /// Sets the [`AreaType`] of the spans within the given convex volume.
    ///
    /// The y-value of the polygon vertices is ignored, the volume's height range is
    /// given by [`ConvexVolume::min_y`] and [`ConvexVolume::max_y`] instead.
    /// Spans that are already [`AreaType::NOT_WALKABLE`] are left alone.
    pub fn mark_convex_poly_area(&mut self, volume: &ConvexVolume) {
        let Some(footprint) = volume.aabb() else {
            // The volume is empty
            return;
        };
        let Some((min, max)) = self.grid_footprint(&footprint) else {
            return;
        };

        for z in min.z..=max.z {
            for x in min.x..=max.x {
                let point = self.cell_center(x, z);
                if !point_in_poly_2d(point, &volume.vertices) {
                    continue;
                }
                self.mark_column(x, z, min.y, max.y, volume.area);
            }
        }
    }

    /// Sets the [`AreaType`] of the spans within the given axis-aligned box.
    pub fn mark_box_area(&mut self, aabb: Aabb3d, area: AreaType) {
        let Some((min, max)) = self.grid_footprint(&aabb) else {
            return;
        };
        for z in min.z..=max.z {
            for x in min.x..=max.x {
                self.mark_column(x, z, min.y, max.y, area);
            }
        }
    }

    /// Sets the [`AreaType`] of the spans within the given upright cylinder.
    ///
    /// # Arguments
    ///
    /// - `position` - The center of the base of the cylinder. `[Units: wu]`
    /// - `radius` - The radius of the cylinder. `[Limit: > 0] [Units: wu]`
    /// - `height` - The height of the cylinder. `[Limit: > 0] [Units: wu]`
    pub fn mark_cylinder_area(
        &mut self,
        position: impl Into<Vec3A>,
        radius: f32,
        height: f32,
        area: AreaType,
    ) {
        let position = position.into();
        let aabb = Aabb3d {
            min: Vec3A::new(position.x - radius, position.y, position.z - radius),
            max: Vec3A::new(position.x + radius, position.y + height, position.z + radius),
        };
        let Some((min, max)) = self.grid_footprint(&aabb) else {
            return;
        };
        let radius_squared = radius * radius;
        let center = Vec2::new(position.x, position.z);
        for z in min.z..=max.z {
            for x in min.x..=max.x {
                if self.cell_center(x, z).distance_squared(center) >= radius_squared {
                    continue;
                }
                self.mark_column(x, z, min.y, max.y, area);
            }
        }
    }

    /// Converts a world space box to a clamped cell range. `None` if the box lies outside the grid.
    fn grid_footprint(&self, aabb: &Aabb3d) -> Option<(IVec3, IVec3)> {
        let scale = Vec3A::new(self.cell_size, self.cell_height, self.cell_size);
        let min = ((aabb.min - self.aabb.min) / scale).as_ivec3();
        let max = ((aabb.max - self.aabb.min) / scale).as_ivec3();

        // Early-out if the box lies entirely outside the grid.
        if max.x < 0 || min.x >= self.width as i32 || max.z < 0 || min.z >= self.height as i32 {
            return None;
        }
        let min = IVec3::new(min.x.max(0), min.y, min.z.max(0));
        let max = IVec3::new(
            max.x.min(self.width as i32 - 1),
            max.y,
            max.z.min(self.height as i32 - 1),
        );
        Some((min, max))
    }

    #[inline]
    fn cell_center(&self, x: i32, z: i32) -> Vec2 {
        Vec2::new(
            self.aabb.min.x + (x as f32 + 0.5) * self.cell_size,
            self.aabb.min.z + (z as f32 + 0.5) * self.cell_size,
        )
    }

    fn mark_column(&mut self, x: i32, z: i32, min_y: i32, max_y: i32, area: AreaType) {
        for i in self.cell_at(x as u16, z as u16).index_range() {
            // Skip if span is removed.
            if !self.areas[i].is_walkable() {
                continue;
            }
            let y = self.spans[i].y as i32;
            if y >= min_y && y <= max_y {
                self.areas[i] = area;
            }
        }
    }
}

/// A convex polygon extruded along the y-axis, used to stamp area types onto the navmesh.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvexVolume {
    /// The vertices of the polygon on the xz-plane. `x` is world x, `y` is world z.
    pub vertices: Vec<Vec2>,
    /// The lower height of the volume. `[Units: wu]`
    pub min_y: f32,
    /// The upper height of the volume. `[Units: wu]`
    pub max_y: f32,
    /// The area type applied to spans within the volume.
    pub area: AreaType,
}

impl ConvexVolume {
    /// The bounds of the volume. `None` if it has no vertices.
    pub fn aabb(&self) -> Option<Aabb3d> {
        let mut aabb = Aabb3d::from_verts(
            &self
                .vertices
                .iter()
                .map(|v| Vec3A::new(v.x, 0.0, v.y))
                .collect::<Vec<_>>(),
        )?;
        aabb.min.y = self.min_y;
        aabb.max.y = self.max_y;
        Some(aabb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compact_heightfield::tests::flat;

    fn count(chf: &CompactHeightfield, area: AreaType) -> usize {
        chf.areas.iter().filter(|a| **a == area).count()
    }

    #[test]
    fn convex_volume_marks_covered_cells() {
        let mut chf = flat(8);
        chf.mark_convex_poly_area(&ConvexVolume {
            vertices: vec![
                Vec2::new(2.0, 2.0),
                Vec2::new(2.0, 6.0),
                Vec2::new(6.0, 6.0),
                Vec2::new(6.0, 2.0),
            ],
            min_y: 0.0,
            max_y: 3.0,
            area: AreaType(3),
        });
        assert_eq!(count(&chf, AreaType(3)), 16);
        let inside = chf.cell_at(3, 3).index() as usize;
        assert_eq!(chf.areas[inside], AreaType(3));
    }

    #[test]
    fn volume_out_of_height_range_is_ignored() {
        let mut chf = flat(8);
        chf.mark_convex_poly_area(&ConvexVolume {
            vertices: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(0.0, 8.0),
                Vec2::new(8.0, 8.0),
                Vec2::new(8.0, 0.0),
            ],
            min_y: 10.0,
            max_y: 20.0,
            area: AreaType(3),
        });
        assert_eq!(count(&chf, AreaType(3)), 0);
    }

    #[test]
    fn box_marks_cells_and_skips_unwalkable() {
        let mut chf = flat(4);
        let first = chf.cell_at(0, 0).index() as usize;
        chf.areas[first] = AreaType::NOT_WALKABLE;
        chf.mark_box_area(
            Aabb3d {
                min: Vec3A::new(0.0, 0.0, 0.0),
                max: Vec3A::new(1.5, 2.0, 1.5),
            },
            AreaType(2),
        );
        assert_eq!(count(&chf, AreaType(2)), 3);
        assert_eq!(chf.areas[first], AreaType::NOT_WALKABLE);
    }

    #[test]
    fn cylinder_marks_round_footprint() {
        let mut chf = flat(9);
        chf.mark_cylinder_area(Vec3A::new(4.5, 0.0, 4.5), 1.2, 2.0, AreaType(4));
        // The center cell and its four axis neighbors.
        assert_eq!(count(&chf, AreaType(4)), 5);
    }
}
