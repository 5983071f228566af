//! Voxelized solid space: a grid of columns, each a sorted list of [`Span`]s.

use thiserror::Error;

use crate::{
    Aabb3d,
    span::{Span, SpanKey, Spans},
};

/// Solid space as rasterized from the input triangles, created by [`HeightfieldBuilder`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Heightfield {
    /// Columns along x. `[Units: vx]`
    pub width: u16,
    /// Columns along z. `[Units: vx]`
    pub height: u16,
    /// World bounds covered by the grid.
    pub aabb: Aabb3d,
    /// Column width. `[Units: wu]`
    pub cell_size: f32,
    /// Voxel height. `[Units: wu]`
    pub cell_height: f32,
    /// Bottom span of each column, row-major with x varying fastest.
    pub columns: Vec<Option<SpanKey>>,
    /// Arena backing the column lists.
    pub spans: Spans,
}

impl Heightfield {
    /// Tallest span top a heightfield stores, 13 bits. `[Units: vx]`
    pub const SPAN_MAX_HEIGHT: u16 = (1 << 13) - 1;

    /// Adds solid voxels to a column. Spans touching the new one are folded into it.
    pub(crate) fn add_span(&mut self, insertion: SpanInsertion) -> Result<(), SpanInsertionError> {
        if insertion.x >= self.width || insertion.z >= self.height {
            return Err(SpanInsertionError::ColumnIndexOutOfBounds {
                x: insertion.x,
                z: insertion.z,
            });
        }
        let column_index = self.column_index(insertion.x, insertion.z);

        let mut new_span = insertion.span;
        let mut previous_key: Option<SpanKey> = None;
        let mut cursor = self.columns[column_index];
        while let Some(current_key) = cursor {
            let current = self.span(current_key).clone();
            if current.min() > new_span.max() {
                break;
            }
            if current.max() < new_span.min() {
                previous_key = Some(current_key);
                cursor = current.next();
                continue;
            }

            new_span.set_min(new_span.min().min(current.min()));
            new_span.set_max(new_span.max().max(current.max()));
            if (new_span.max() as i32 - current.max() as i32).unsigned_abs()
                <= insertion.flag_merge_threshold as u32
            {
                // Tops close together keep the larger area id.
                new_span.set_area(new_span.area().max(current.area()));
            }

            let next_key = current.next();
            self.spans.remove(current_key);
            match previous_key {
                Some(previous_key) => self.span_mut(previous_key).set_next(next_key),
                None => self.columns[column_index] = next_key,
            }
            cursor = next_key;
        }

        match previous_key {
            Some(previous_key) => {
                new_span.set_next(self.span(previous_key).next());
                let key = self.spans.insert(new_span);
                self.span_mut(previous_key).set_next(key);
            }
            None => {
                new_span.set_next(self.columns[column_index]);
                let key = self.spans.insert(new_span);
                self.columns[column_index] = Some(key);
            }
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && x < self.width as i32 && z >= 0 && z < self.height as i32
    }

    /// Bottom span of a column. `None` for empty columns and coordinates outside the grid.
    #[inline]
    pub fn span_key_at(&self, x: u16, z: u16) -> Option<SpanKey> {
        if x >= self.width || z >= self.height {
            return None;
        }
        self.columns[self.column_index(x, z)]
    }

    /// Like [`Self::span_key_at`], resolved to the span itself.
    #[inline]
    pub fn span_at(&self, x: u16, z: u16) -> Option<&Span> {
        self.span_key_at(x, z).map(|key| self.span(key))
    }

    /// Iterates the spans of a column from bottom to top.
    pub fn column(&self, x: u16, z: u16) -> ColumnIter<'_> {
        ColumnIter {
            heightfield: self,
            cursor: self.span_key_at(x, z),
        }
    }

    /// # Panics
    /// When `key` was removed or belongs to another heightfield.
    #[inline]
    pub fn span(&self, key: SpanKey) -> &Span {
        &self.spans[key]
    }

    /// # Panics
    /// When `key` was removed or belongs to another heightfield.
    #[inline]
    pub fn span_mut(&mut self, key: SpanKey) -> &mut Span {
        &mut self.spans[key]
    }

    /// Spans whose top is walkable. Zero after rasterization means nothing to build.
    pub fn walkable_span_count(&self) -> usize {
        self.spans
            .values()
            .filter(|span| span.area().is_walkable())
            .count()
    }
}

/// Iterator over the spans of one heightfield column, created by [`Heightfield::column`].
pub struct ColumnIter<'a> {
    heightfield: &'a Heightfield,
    cursor: Option<SpanKey>,
}

impl<'a> Iterator for ColumnIter<'a> {
    type Item = (SpanKey, &'a Span);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.cursor?;
        let span = self.heightfield.span(key);
        self.cursor = span.next();
        Some((key, span))
    }
}

/// Grid parameters of an empty [`Heightfield`].
pub struct HeightfieldBuilder {
    /// Bounds to cover, usually [`NavmeshConfig::padded_aabb`](crate::NavmeshConfig::padded_aabb).
    pub aabb: Aabb3d,
    /// Column width. `[Units: wu]`
    pub cell_size: f32,
    /// Voxel height. `[Units: wu]`
    pub cell_height: f32,
}

impl HeightfieldBuilder {
    /// Allocates the empty grid.
    pub fn build(self) -> Result<Heightfield, HeightfieldBuilderError> {
        if !(self.cell_size > 0.0) || !(self.cell_height > 0.0) {
            return Err(HeightfieldBuilderError::InvalidCellSize {
                cell_size: self.cell_size,
                cell_height: self.cell_height,
            });
        }
        let (width, height) = grid_size(&self.aabb, self.cell_size);
        if width > u16::MAX as f32 || height > u16::MAX as f32 {
            return Err(HeightfieldBuilderError::ColumnCountTooLarge { width, height });
        }
        let column_count = width as usize * height as usize;
        Ok(Heightfield {
            width: width as u16,
            height: height as u16,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            columns: vec![None; column_count],
            spans: Spans::with_min_capacity(column_count),
        })
    }
}

/// Columns needed along x and z to cover `aabb`, rounded to the nearest cell.
pub fn grid_size(aabb: &Aabb3d, cell_size: f32) -> (f32, f32) {
    let width = ((aabb.max.x - aabb.min.x) / cell_size + 0.5).floor().max(0.0);
    let height = ((aabb.max.z - aabb.min.z) / cell_size + 0.5).floor().max(0.0);
    (width, height)
}

/// Why [`HeightfieldBuilder::build`] failed.
#[derive(Error, Debug)]
pub enum HeightfieldBuilderError {
    /// One side needs more columns than fit in a `u16`.
    #[error(
        "Grid of {width}*{height} cells is too large, each side can have at most {max} cells",
        max = u16::MAX
    )]
    ColumnCountTooLarge {
        /// Columns along x.
        width: f32,
        /// Columns along z.
        height: f32,
    },
    /// A voxel dimension is zero, negative or NaN.
    #[error(
        "Cell dimensions must be positive, got cell size {cell_size} and cell height {cell_height}"
    )]
    InvalidCellSize {
        /// Requested column width.
        cell_size: f32,
        /// Requested voxel height.
        cell_height: f32,
    },
}

/// Why a span could not be added to a [`Heightfield`].
#[derive(Error, Debug)]
pub enum SpanInsertionError {
    /// The target column lies outside the grid.
    #[error("no column at x={x}, z={z}")]
    ColumnIndexOutOfBounds {
        /// Column along x.
        x: u16,
        /// Column along z.
        z: u16,
    },
}

pub(crate) struct SpanInsertion {
    pub(crate) x: u16,
    pub(crate) z: u16,
    /// Merged spans whose tops differ by at most this many voxels keep the larger area id.
    pub(crate) flag_merge_threshold: u16,
    pub(crate) span: Span,
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::span::{AreaType, SpanBuilder};

    use super::*;

    fn five_by_five() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::splat(2.5), [2.5, 2.5, 2.5]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn span(min: u16, max: u16, area: u8) -> Span {
        SpanBuilder {
            min,
            max,
            area: AreaType(area),
            next: None,
        }
        .build()
    }

    fn insert(heightfield: &mut Heightfield, x: u16, z: u16, threshold: u16, span: Span) {
        heightfield
            .add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: threshold,
                span,
            })
            .unwrap();
    }

    fn heights(heightfield: &Heightfield, x: u16, z: u16) -> Vec<(u16, u16, u8)> {
        heightfield
            .column(x, z)
            .map(|(_, s)| (s.min(), s.max(), s.area().0))
            .collect()
    }

    #[test]
    fn grid_size_is_derived_from_bounds() {
        let heightfield = HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::new(-1.0, 0.0, 2.0),
                max: Vec3A::new(2.0, 4.0, 3.2),
            },
            cell_size: 0.3,
            cell_height: 0.2,
        }
        .build()
        .unwrap();
        assert_eq!(heightfield.width, 10);
        assert_eq!(heightfield.height, 4);
        assert_eq!(heightfield.columns.len(), 40);
    }

    #[test]
    fn zero_cell_size_is_rejected() {
        let result = HeightfieldBuilder {
            aabb: Aabb3d::default(),
            cell_size: 0.0,
            cell_height: 1.0,
        }
        .build();
        assert!(matches!(
            result,
            Err(HeightfieldBuilderError::InvalidCellSize { .. })
        ));
    }

    #[test]
    fn first_span_starts_the_column() {
        let mut heightfield = five_by_five();
        let expected = span(2, 4, 2);
        insert(&mut heightfield, 1, 3, 0, expected.clone());
        assert_eq!(heightfield.span_at(1, 3), Some(&expected));
        assert_eq!(heightfield.span_at(3, 1), None);
    }

    #[test]
    fn columns_outside_the_grid_are_rejected() {
        let mut heightfield = five_by_five();
        let result = heightfield.add_span(SpanInsertion {
            x: 5,
            z: 0,
            flag_merge_threshold: 0,
            span: span(0, 1, 1),
        });
        assert!(result.is_err());
    }

    #[test]
    fn disjoint_spans_stay_sorted() {
        let mut heightfield = five_by_five();
        insert(&mut heightfield, 1, 3, 0, span(7, 10, 2));
        insert(&mut heightfield, 1, 3, 0, span(2, 4, 2));

        assert_eq!(heights(&heightfield, 1, 3), vec![(2, 4, 2), (7, 10, 2)]);
    }

    #[test]
    fn bridging_span_fuses_the_column() {
        let mut heightfield = five_by_five();
        insert(&mut heightfield, 1, 3, 0, span(2, 4, 2));
        insert(&mut heightfield, 1, 3, 0, span(7, 10, 2));
        // Bridges both existing spans.
        insert(&mut heightfield, 1, 3, 0, span(4, 7, 2));

        assert_eq!(heights(&heightfield, 1, 3), vec![(2, 10, 2)]);
        assert_eq!(heightfield.spans.len(), 1);
    }

    #[test]
    fn close_tops_keep_the_larger_area() {
        let mut heightfield = five_by_five();
        insert(&mut heightfield, 0, 0, 1, span(0, 5, 9));
        insert(&mut heightfield, 0, 0, 1, span(3, 6, 2));
        assert_eq!(heightfield.span_at(0, 0).unwrap().area(), AreaType(9));

        let mut heightfield = five_by_five();
        insert(&mut heightfield, 0, 0, 1, span(0, 5, 9));
        insert(&mut heightfield, 0, 0, 1, span(3, 8, 2));
        assert_eq!(heightfield.span_at(0, 0).unwrap().area(), AreaType(2));
    }
}
