//! The compact heightfield is the connectivity-graph form of a [`Heightfield`].
//!
//! Only the open space above walkable spans is kept. Every such span knows which span of
//! each of its four neighbor columns an agent can step onto.

use thiserror::Error;

use crate::{
    Aabb3d,
    compact_cell::CompactCell,
    compact_span::CompactSpan,
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    region::RegionId,
    span::AreaType,
};

/// Walkable floors of a [`Heightfield`] with the clearance above them and links to the
/// floors an agent can step to in the neighboring columns.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactHeightfield {
    /// Columns along x. `[Units: vx]`
    pub width: u16,
    /// Columns along z. `[Units: vx]`
    pub height: u16,
    /// Clearance required for a link. `[Units: vx]`
    pub walkable_height: u16,
    /// Step height allowed for a link. `[Units: vx]`
    pub walkable_climb: u16,
    /// Cells at the grid edge reserved for tile borders. `[Units: vx]`
    pub border_size: u16,
    /// Largest value in [`Self::dist`].
    pub max_distance: u16,
    /// Largest region id handed out by partitioning.
    pub max_region: RegionId,
    /// World bounds, raised by the agent height so the top floors fit.
    pub aabb: Aabb3d,
    /// Column width. `[Units: wu]`
    pub cell_size: f32,
    /// Voxel height. `[Units: wu]`
    pub cell_height: f32,
    /// Span range of each column, `width * height` entries.
    pub cells: Vec<CompactCell>,
    /// Floors of all columns, column after column.
    pub spans: Vec<CompactSpan>,
    /// Distance of each span to the nearest border. Empty until
    /// [`CompactHeightfield::build_distance_field`] ran.
    pub dist: Vec<u16>,
    /// Area of each span, parallel to [`Self::spans`].
    pub areas: Vec<AreaType>,
}

impl Heightfield {
    /// Keeps the walkable tops of the solid spans and links neighboring floors that are at most
    /// `walkable_climb` apart and share `walkable_height` of clearance.
    ///
    /// # Errors
    ///
    /// When a link would have to address a layer above [`CompactHeightfield::MAX_LAYERS`].
    pub fn into_compact(
        self,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<CompactHeightfield, CompactHeightfieldError> {
        CompactHeightfield::from_heightfield(self, walkable_height, walkable_climb)
    }
}

impl CompactHeightfield {
    /// Floors without anything above get this much clearance. `[Units: vx]`
    const OPEN_SKY: u16 = u16::MAX;
    /// Deepest layer a neighbor link can point at.
    pub const MAX_LAYERS: u8 = CompactSpan::NOT_CONNECTED - 1;

    /// Same as [`Heightfield::into_compact`].
    pub fn from_heightfield(
        heightfield: Heightfield,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<Self, CompactHeightfieldError> {
        let floors = heightfield.walkable_span_count();
        let mut aabb = heightfield.aabb;
        aabb.max.y += f32::from(walkable_height) * heightfield.cell_height;
        let mut compact = Self {
            width: heightfield.width,
            height: heightfield.height,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_distance: 0,
            max_region: RegionId::NONE,
            aabb,
            cell_size: heightfield.cell_size,
            cell_height: heightfield.cell_height,
            cells: vec![CompactCell::default(); heightfield.columns.len()],
            spans: Vec::with_capacity(floors),
            dist: Vec::new(),
            areas: Vec::with_capacity(floors),
        };
        compact.collect_floors(&heightfield);
        compact.link_neighbors()?;
        Ok(compact)
    }

    fn collect_floors(&mut self, heightfield: &Heightfield) {
        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let column = heightfield.column_index(x, z);
                if heightfield.columns[column].is_none() {
                    continue;
                }
                self.cells[column].set_index(self.spans.len() as u32);
                let walkable = heightfield
                    .column(x, z)
                    .filter(|(_, span)| span.area().is_walkable());
                for (_, span) in walkable {
                    let floor = span.max();
                    let ceiling = span
                        .next()
                        .map_or(Self::OPEN_SKY, |above| heightfield.span(above).min());
                    let clearance = ceiling.saturating_sub(floor).min(u16::from(u8::MAX)) as u8;
                    self.spans.push(CompactSpan::new(floor, clearance));
                    self.areas.push(span.area());
                    self.cells[column].inc_count();
                }
            }
        }
    }

    fn link_neighbors(&mut self) -> Result<(), CompactHeightfieldError> {
        let mut deepest_unlinkable = None;
        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    for dir in 0..4_u8 {
                        let nx = i32::from(x) + dir_offset_x(dir) as i32;
                        let nz = i32::from(z) + dir_offset_z(dir) as i32;
                        if !self.contains(nx, nz) {
                            self.spans[i].set_con(dir, None);
                            continue;
                        }
                        let neighbor_cell = *self.cell_at(nx as u16, nz as u16);
                        let reachable = neighbor_cell
                            .index_range()
                            .find(|&k| self.can_step(&self.spans[i], &self.spans[k]));
                        let layer = reachable.map(|k| k - neighbor_cell.index() as usize);
                        match layer {
                            Some(layer) if layer > Self::MAX_LAYERS as usize => {
                                deepest_unlinkable = deepest_unlinkable.max(Some(layer));
                                self.spans[i].set_con(dir, None);
                            }
                            _ => self.spans[i].set_con(dir, layer.map(|layer| layer as u8)),
                        }
                    }
                }
            }
        }
        match deepest_unlinkable {
            Some(layer_index) => Err(CompactHeightfieldError::TooManyLayers {
                max_layer_index: Self::MAX_LAYERS,
                layer_index,
            }),
            None => Ok(()),
        }
    }

    fn can_step(&self, from: &CompactSpan, to: &CompactSpan) -> bool {
        let shared_floor = from.y.max(to.y) as i32;
        let top = |span: &CompactSpan| span.y as i32 + span.height() as i32;
        let shared_ceiling = top(from).min(top(to));
        shared_ceiling - shared_floor >= self.walkable_height as i32
            && (to.y as i32 - from.y as i32).abs() <= self.walkable_climb as i32
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        (0..self.width as i32).contains(&x) && (0..self.height as i32).contains(&z)
    }

    /// The column at `(x, z)`, `None` outside the grid.
    #[inline]
    pub fn get_cell_at(&self, x: u16, z: u16) -> Option<&CompactCell> {
        if x >= self.width || z >= self.height {
            return None;
        }
        self.cells.get(self.column_index(x, z))
    }

    /// The column at `(x, z)`.
    ///
    /// # Panics
    /// Outside the grid.
    #[inline]
    pub fn cell_at(&self, x: u16, z: u16) -> &CompactCell {
        &self.cells[self.column_index(x, z)]
    }

    /// Resolves link `con` of a span in column `(x, z)` towards `dir` into the neighbor's
    /// column and span index.
    #[inline]
    pub(crate) fn con_indices(&self, x: i32, z: i32, dir: u8, con: u8) -> (i32, i32, usize) {
        let nx = x + dir_offset_x(dir) as i32;
        let nz = z + dir_offset_z(dir) as i32;
        let first = self.cells[(nx + nz * self.width as i32) as usize].index() as usize;
        (nx, nz, first + con as usize)
    }

    /// Span index linked from span `i` of column `(x, z)` towards `dir`.
    #[inline]
    pub(crate) fn neighbor_index(&self, x: u16, z: u16, i: usize, dir: u8) -> Option<usize> {
        let con = self.spans[i].con(dir)?;
        Some(self.con_indices(x as i32, z as i32, dir, con).2)
    }

    /// Spans whose area is walkable. Erosion and volumes can bring this down to zero.
    pub fn walkable_span_count(&self) -> usize {
        self.areas.iter().filter(|area| area.is_walkable()).count()
    }
}

/// Why a [`Heightfield`] could not be compacted.
#[derive(Debug, Error)]
pub enum CompactHeightfieldError {
    /// A column stacks more floors than a link can address.
    #[error("neighbor link needs layer {layer_index}, links reach up to layer {max_layer_index}")]
    TooManyLayers {
        /// Deepest addressable layer.
        max_layer_index: u8,
        /// Deepest layer a link needed.
        layer_index: usize,
    },
}

#[cfg(test)]
pub(crate) mod tests {
    use glam::Vec3A;

    use super::*;
    use crate::{
        HeightfieldBuilder,
        heightfield::SpanInsertion,
        span::SpanBuilder,
    };

    /// A `size` by `size` heightfield where every column holds a walkable span with the
    /// given top. The heightfield is one voxel per world unit.
    pub(crate) fn heightfield_from_fn(
        size: u16,
        top: impl Fn(u16, u16) -> Option<u16>,
    ) -> Heightfield {
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::ZERO,
                max: Vec3A::new(size as f32, 64.0, size as f32),
            },
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap();
        for z in 0..size {
            for x in 0..size {
                let Some(top) = top(x, z) else {
                    continue;
                };
                heightfield
                    .add_span(SpanInsertion {
                        x,
                        z,
                        flag_merge_threshold: 1,
                        span: SpanBuilder {
                            min: 0,
                            max: top,
                            area: AreaType::DEFAULT_WALKABLE,
                            next: None,
                        }
                        .build(),
                    })
                    .unwrap();
            }
        }
        heightfield
    }

    pub(crate) fn flat(size: u16) -> CompactHeightfield {
        heightfield_from_fn(size, |_, _| Some(1))
            .into_compact(2, 1)
            .unwrap()
    }

    #[test]
    fn flat_field_is_fully_connected_inside() {
        let chf = flat(4);
        assert_eq!(chf.spans.len(), 16);
        assert_eq!(chf.aabb.max.y, 66.0);
        let center = chf.cell_at(1, 1).index() as usize;
        for dir in 0..4 {
            assert_eq!(chf.spans[center].con(dir), Some(0));
        }
        let corner = chf.cell_at(0, 0).index() as usize;
        assert_eq!(chf.spans[corner].con(0), None);
        assert_eq!(chf.spans[corner].con(3), None);
        assert_eq!(chf.spans[corner].con(1), Some(0));
        assert_eq!(chf.spans[corner].con(2), Some(0));
    }

    #[test]
    fn neighbor_links_are_symmetric() {
        // A step that is too high to climb splits the field in two.
        let chf = heightfield_from_fn(5, |x, _| Some(if x < 2 { 1 } else { 5 }))
            .into_compact(2, 1)
            .unwrap();
        for z in 0..chf.height {
            for x in 0..chf.width {
                for i in chf.cell_at(x, z).index_range() {
                    for dir in 0..4 {
                        let Some(con) = chf.spans[i].con(dir) else {
                            continue;
                        };
                        let (a_x, a_z, a_i) = chf.con_indices(x as i32, z as i32, dir, con);
                        let back = (dir + 2) & 0x3;
                        let back_con = chf.spans[a_i].con(back);
                        assert!(back_con.is_some(), "({x}, {z}) -> ({a_x}, {a_z}) is one-way");
                        assert_eq!(chf.con_indices(a_x, a_z, back, back_con.unwrap()).2, i);
                    }
                }
            }
        }
        let left = chf.cell_at(1, 2).index() as usize;
        assert_eq!(chf.spans[left].con(2), None);
    }

    #[test]
    fn unwalkable_spans_are_dropped() {
        let mut heightfield = heightfield_from_fn(2, |_, _| Some(1));
        let key = heightfield.span_key_at(0, 0).unwrap();
        heightfield.span_mut(key).set_area(AreaType::NOT_WALKABLE);
        let chf = heightfield.into_compact(2, 1).unwrap();
        assert_eq!(chf.spans.len(), 3);
        assert_eq!(chf.cell_at(0, 0).count(), 0);
    }
}
