use std::ops::{Deref, DerefMut};

use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Handle of a span stored in [`Spans`].
    pub struct SpanKey;
}

/// Storage for the spans of every column of a [`Heightfield`](crate::Heightfield).
///
/// Columns are singly linked lists threaded through this arena, ordered bottom to top.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Spans(SlotMap<SpanKey, Span>);

impl Deref for Spans {
    type Target = SlotMap<SpanKey, Span>;

    fn deref(&self) -> &SlotMap<SpanKey, Span> {
        &self.0
    }
}

impl DerefMut for Spans {
    fn deref_mut(&mut self) -> &mut SlotMap<SpanKey, Span> {
        &mut self.0
    }
}

impl Spans {
    const MIN_PREALLOCATED: usize = 1024;

    pub(crate) fn with_min_capacity(columns: usize) -> Self {
        Self(SlotMap::with_capacity_and_key(columns.max(Self::MIN_PREALLOCATED)))
    }
}

/// Plain-data form of a [`Span`], used while rasterizing and in tests.
pub(crate) struct SpanBuilder {
    pub(crate) min: u16,
    pub(crate) max: u16,
    pub(crate) area: AreaType,
    pub(crate) next: Option<SpanKey>,
}

impl SpanBuilder {
    pub(crate) fn build(self) -> Span {
        let SpanBuilder { min, max, area, next } = self;
        Span { min, max, area, next }
    }
}

/// Solid voxels from `min` up to `max` in one heightfield column.
/// The top face of the span is what an agent would stand on.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Span {
    min: u16,
    max: u16,
    area: AreaType,
    next: Option<SpanKey>,
}

impl Span {
    /// Bottom of the solid run. `[Units: vx]`
    #[inline]
    pub fn min(&self) -> u16 {
        self.min
    }

    /// Top of the solid run, i.e. the floor height for anything standing on it. `[Units: vx]`
    #[inline]
    pub fn max(&self) -> u16 {
        self.max
    }

    /// Surface category of the top face.
    #[inline]
    pub fn area(&self) -> AreaType {
        self.area
    }

    /// The span directly above in the same column.
    #[inline]
    pub fn next(&self) -> Option<SpanKey> {
        self.next
    }

    #[inline]
    pub(crate) fn set_min(&mut self, value: u16) {
        self.min = value;
    }

    #[inline]
    pub(crate) fn set_max(&mut self, value: u16) {
        self.max = value;
    }

    #[inline]
    pub(crate) fn set_area(&mut self, value: impl Into<AreaType>) {
        self.area = value.into();
    }

    #[inline]
    pub(crate) fn set_next(&mut self, value: impl Into<Option<SpanKey>>) {
        self.next = value.into();
    }
}

/// Surface category of a span or polygon, stored in 6 bits by the tile format.
///
/// Zero marks ground an agent cannot stand on. The navmesh tile assigns flags per area,
/// see [`apply_area_flags`](crate::apply_area_flags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct AreaType(pub u8);

impl AreaType {
    /// Blocked surface.
    pub const NOT_WALKABLE: Self = Self(0);
    /// What walkable triangles are rasterized as until volumes or area flags say otherwise.
    pub const DEFAULT_WALKABLE: Self = Self(63);

    /// `true` for every area except [`AreaType::NOT_WALKABLE`].
    #[inline]
    pub fn is_walkable(&self) -> bool {
        self.0 != 0
    }
}

impl From<u8> for AreaType {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

impl From<AreaType> for u8 {
    fn from(area: AreaType) -> Self {
        area.0
    }
}
