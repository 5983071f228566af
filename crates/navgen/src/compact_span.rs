use crate::region::RegionId;

const CON_BITS: u32 = 6;
const CON_MASK: u32 = (1 << CON_BITS) - 1;
const HEIGHT_SHIFT: u32 = 24;

/// The walkable top of a solid span, as stored in a
/// [`CompactHeightfield`](crate::CompactHeightfield).
///
/// Besides the floor height it keeps the free space above the floor and, for each of the four
/// axis directions, which span of the neighboring column it connects to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactSpan {
    /// Floor height above the heightfield's base. `[Units: vx]`
    pub y: u16,
    /// Region the floor was assigned to, [`RegionId::NONE`] before partitioning.
    pub region: RegionId,
    // Bits 0..24 hold four 6 bit neighbor layers, bits 24..32 the clearance.
    packed: u32,
}

impl CompactSpan {
    pub(crate) const NOT_CONNECTED: u8 = CON_MASK as u8;

    pub(crate) fn new(y: u16, height: u8) -> Self {
        Self {
            y,
            region: RegionId::NONE,
            packed: (u32::from(height) << HEIGHT_SHIFT) | 0x00ff_ffff,
        }
    }

    /// Layer of the neighbor in `direction`, counted from the first span of the neighbor's column.
    pub fn con(&self, direction: u8) -> Option<u8> {
        let layer = (self.packed >> (u32::from(direction) * CON_BITS)) & CON_MASK;
        (layer != CON_MASK).then_some(layer as u8)
    }

    /// Connects the span to `neighbor` in `direction`, or disconnects it with `None`.
    pub fn set_con(&mut self, direction: u8, neighbor: impl Into<Option<u8>>) {
        let shift = u32::from(direction) * CON_BITS;
        let layer = neighbor.into().map_or(CON_MASK, |layer| u32::from(layer) & CON_MASK);
        self.packed = self.packed & !(CON_MASK << shift) | layer << shift;
    }

    /// Free space above [`CompactSpan::y`], saturating at 255. `[Units: vx]`
    pub fn height(&self) -> u8 {
        (self.packed >> HEIGHT_SHIFT) as u8
    }

    /// Overwrites the clearance and keeps the neighbor links.
    pub fn set_height(&mut self, height: u8) {
        self.packed = self.packed & !(0xff << HEIGHT_SHIFT) | u32::from(height) << HEIGHT_SHIFT;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_spans_have_no_neighbors() {
        let span = CompactSpan::new(4, 10);
        assert_eq!((span.y, span.height()), (4, 10));
        assert_eq!(span.region, RegionId::NONE);
        assert!((0..4).all(|dir| span.con(dir).is_none()));
    }

    #[test]
    fn neighbor_layers_and_clearance_share_a_word() {
        let mut span = CompactSpan::new(0, 200);
        span.set_con(0, Some(1));
        span.set_con(1, Some(3));
        span.set_con(3, Some(61));
        assert_eq!(
            (0..4).map(|dir| span.con(dir)).collect::<Vec<_>>(),
            vec![Some(1), Some(3), None, Some(61)]
        );
        assert_eq!(span.height(), 200);

        span.set_height(7);
        span.set_con(1, None);
        assert_eq!(span.con(1), None);
        assert_eq!(span.con(3), Some(61));
        assert_eq!(span.height(), 7);
    }
}
