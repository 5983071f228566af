use std::ops::Range;

/// One column of a [`CompactHeightfield`](crate::CompactHeightfield): a run of consecutive
/// entries in its span list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactCell {
    first: u32,
    len: u8,
}

impl CompactCell {
    /// Position of the column's bottom floor in the span list.
    #[inline]
    pub fn index(&self) -> u32 {
        self.first
    }

    /// Floors stacked in the column.
    #[inline]
    pub fn count(&self) -> u8 {
        self.len
    }

    /// Span list positions of the column, bottom to top.
    #[inline]
    pub fn index_range(&self) -> Range<usize> {
        let first = self.first as usize;
        first..first + usize::from(self.len)
    }

    #[inline]
    pub(crate) fn set_index(&mut self, first: u32) {
        self.first = first;
    }

    #[inline]
    pub(crate) fn inc_count(&mut self) {
        self.len += 1;
    }
}
