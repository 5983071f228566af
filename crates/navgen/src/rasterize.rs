//! Conservative voxelization of triangles into a [`Heightfield`].

use glam::Vec3A;
use thiserror::Error;

use crate::{
    Aabb3d, AreaType, TriMesh,
    heightfield::{Heightfield, SpanInsertion, SpanInsertionError},
    span::SpanBuilder,
};

impl Heightfield {
    /// Rasterizes every triangle of `trimesh` using its per-triangle area.
    ///
    /// # Arguments
    ///
    /// - `trimesh` - The triangles to rasterize. Area ids are taken from [`TriMesh::area_types`].
    /// - `flag_merge_threshold` - The distance where the walkable flag is favored over the
    ///   non-walkable flag. `[Limit: >= 0] [Units: vx]`
    pub fn rasterize_triangles(
        &mut self,
        trimesh: &TriMesh,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        self.rasterize_indexed_triangles(
            trimesh,
            0..trimesh.indices.len(),
            flag_merge_threshold,
        )
    }

    /// Rasterizes the triangles whose indices are yielded by `triangles`.
    pub fn rasterize_indexed_triangles(
        &mut self,
        trimesh: &TriMesh,
        triangles: impl IntoIterator<Item = usize>,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        for i in triangles {
            let indices = trimesh.indices[i];
            let triangle = [
                trimesh.vertices[indices.x as usize],
                trimesh.vertices[indices.y as usize],
                trimesh.vertices[indices.z as usize],
            ];
            self.rasterize_triangle(triangle, trimesh.area_types[i], flag_merge_threshold)?;
        }
        Ok(())
    }

    /// Rasterizes a single triangle into the heightfield.
    pub fn rasterize_triangle(
        &mut self,
        triangle: [Vec3A; 3],
        area: AreaType,
        flag_merge_threshold: u16,
    ) -> Result<(), RasterizationError> {
        // Triangles with no area do not add spans, but still have to be clipped for the bounds
        // check.
        let inverse_cell_size = 1.0 / self.cell_size;
        let inverse_cell_height = 1.0 / self.cell_height;
        let Some(triangle_aabb) = Aabb3d::from_verts(&triangle) else {
            return Ok(());
        };
        if !self.aabb.intersects(&triangle_aabb) {
            return Ok(());
        }
        let by = self.aabb.max.y - self.aabb.min.y;
        let w = self.width as i32;
        let h = self.height as i32;

        // The footprint of the triangle on the z-axis.
        // -1 rather than 0 so that the polygon is cut properly at the start of the grid.
        let z0 = (((triangle_aabb.min.z - self.aabb.min.z) * inverse_cell_size) as i32)
            .clamp(-1, h - 1);
        let z1 = (((triangle_aabb.max.z - self.aabb.min.z) * inverse_cell_size) as i32)
            .clamp(0, h - 1);

        let mut remaining: Vec<Vec3A> = triangle.to_vec();
        let mut row = Vec::with_capacity(7);
        let mut rest = Vec::with_capacity(7);
        let mut cell = Vec::with_capacity(7);
        let mut row_rest = Vec::with_capacity(7);

        for z in z0..=z1 {
            // Clip the polygon to the row, keeping what lies beyond.
            let cell_z = self.aabb.min.z + z as f32 * self.cell_size;
            divide_poly(&remaining, &mut row, &mut rest, cell_z + self.cell_size, Axis::Z);
            std::mem::swap(&mut remaining, &mut rest);
            if row.len() < 3 || z < 0 {
                continue;
            }

            let (min_x, max_x) = row
                .iter()
                .fold((f32::MAX, f32::MIN), |(min, max), v| (min.min(v.x), max.max(v.x)));
            let x0 = ((min_x - self.aabb.min.x) * inverse_cell_size) as i32;
            let x1 = ((max_x - self.aabb.min.x) * inverse_cell_size) as i32;
            if x1 < 0 || x0 >= w {
                continue;
            }
            let x0 = x0.clamp(-1, w - 1);
            let x1 = x1.clamp(0, w - 1);

            for x in x0..=x1 {
                let cell_x = self.aabb.min.x + x as f32 * self.cell_size;
                divide_poly(&row, &mut cell, &mut row_rest, cell_x + self.cell_size, Axis::X);
                std::mem::swap(&mut row, &mut row_rest);
                if cell.len() < 3 || x < 0 {
                    continue;
                }

                let (span_min, span_max) = cell
                    .iter()
                    .fold((f32::MAX, f32::MIN), |(min, max), v| (min.min(v.y), max.max(v.y)));
                let span_min = span_min - self.aabb.min.y;
                let span_max = span_max - self.aabb.min.y;
                // Skip spans that lie completely outside the heightfield.
                if span_max < 0.0 || span_min > by {
                    continue;
                }
                let span_min = span_min.max(0.0);
                let span_max = span_max.min(by);

                let max_height = Heightfield::SPAN_MAX_HEIGHT as i32;
                let min_cell =
                    ((span_min * inverse_cell_height).floor() as i32).clamp(0, max_height);
                let max_cell = ((span_max * inverse_cell_height).ceil() as i32)
                    .clamp(min_cell + 1, max_height);

                self.add_span(SpanInsertion {
                    x: x as u16,
                    z: z as u16,
                    flag_merge_threshold,
                    span: SpanBuilder {
                        min: min_cell as u16,
                        max: max_cell as u16,
                        area,
                        next: None,
                    }
                    .build(),
                })?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Z,
}

impl Axis {
    #[inline]
    fn of(self, v: Vec3A) -> f32 {
        match self {
            Axis::X => v.x,
            Axis::Z => v.z,
        }
    }
}

/// Splits a convex polygon along an axis-aligned line.
/// `below` receives the part with coordinates less than `offset`, `above` the rest.
fn divide_poly(
    polygon: &[Vec3A],
    below: &mut Vec<Vec3A>,
    above: &mut Vec<Vec3A>,
    offset: f32,
    axis: Axis,
) {
    below.clear();
    above.clear();
    let n = polygon.len();
    if n == 0 {
        return;
    }
    // Positive means the vertex lies on the `below` side.
    let delta = |i: usize| offset - axis.of(polygon[i]);

    let mut b = n - 1;
    for a in 0..n {
        let da = delta(a);
        let db = delta(b);
        let same_side = (da >= 0.0) == (db >= 0.0);
        if !same_side {
            let s = db / (db - da);
            let intersection = polygon[b] + (polygon[a] - polygon[b]) * s;
            below.push(intersection);
            above.push(intersection);
            // Points exactly on the line were already added as the intersection.
            if da > 0.0 {
                below.push(polygon[a]);
            } else if da < 0.0 {
                above.push(polygon[a]);
            }
        } else {
            if da >= 0.0 {
                below.push(polygon[a]);
                if da != 0.0 {
                    b = a;
                    continue;
                }
            }
            above.push(polygon[a]);
        }
        b = a;
    }
}

/// Errors that can occur while rasterizing.
#[derive(Error, Debug)]
pub enum RasterizationError {
    /// A span could not be inserted into the heightfield.
    #[error("Failed to insert span: {0}")]
    SpanInsertion(#[from] SpanInsertionError),
}
