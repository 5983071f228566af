bitflags::bitflags! {
    /// The id of a region in a [`CompactHeightfield`](crate::CompactHeightfield).
    ///
    /// Plain ids count up from 1. The high bit marks spans that belong to the
    /// non-navigable border around a tile.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(transparent)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct RegionId: u16 {
        /// Spans that are not in a region, i.e. not walkable.
        const NONE = 0;

        /// Heightfield border flag.
        /// If a heightfield region ID has this bit set, then the region is a border
        /// region and its spans are considered un-walkable.
        /// (Used during the region and contour build process.)
        const BORDER_REGION = 0x8000;

        /// Every bit a region id may carry.
        const MAX = u16::MAX;
    }
}

impl Default for RegionId {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<u16> for RegionId {
    fn from(value: u16) -> Self {
        RegionId::from_bits_retain(value)
    }
}

impl RegionId {
    /// Whether the id belongs to the tile border.
    #[inline]
    pub fn is_border(self) -> bool {
        self.contains(RegionId::BORDER_REGION)
    }

    /// The id without the border flag.
    #[inline]
    pub fn id(self) -> u16 {
        self.bits() & !RegionId::BORDER_REGION.bits()
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.bits() as usize
    }
}

/// Errors that can occur while partitioning a [`CompactHeightfield`](crate::CompactHeightfield)
/// into regions.
#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    /// More regions were created than a [`RegionId`] can address.
    #[error(
        "Region id overflow, a tile can hold at most {max} regions",
        max = RegionId::BORDER_REGION.bits() - 1
    )]
    RegionIdOverflow,
    /// Watershed partitioning was requested before the distance field was built.
    #[error(
        "The distance field has {distances} entries but the heightfield has {spans} spans. \
         Call `build_distance_field` first"
    )]
    MissingDistanceField {
        /// Length of [`CompactHeightfield::dist`](crate::CompactHeightfield::dist)
        distances: usize,
        /// Length of [`CompactHeightfield::spans`](crate::CompactHeightfield::spans)
        spans: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_flag_is_separate_from_id() {
        let region = RegionId::from(3) | RegionId::BORDER_REGION;
        assert!(region.is_border());
        assert_eq!(region.id(), 3);
        assert!(!RegionId::from(3).is_border());
        assert_eq!(RegionId::default(), RegionId::NONE);
    }
}
