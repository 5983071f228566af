use std::fmt;

/// Number of bits of a [`PolyRef`] holding the salt of its tile.
pub const SALT_BITS: u32 = 16;
/// Number of bits of a [`PolyRef`] holding the tile index.
pub const TILE_BITS: u32 = 28;
/// Number of bits of a [`PolyRef`] holding the polygon index inside its tile.
pub const POLY_BITS: u32 = 20;

/// A reference to a polygon or a tile of a [`NavMesh`](crate::NavMesh).
///
/// The reference packs the tile's salt, the tile index and the polygon index into 64 bits.
/// The salt is bumped whenever a tile slot is reused, so references into a removed tile stop
/// resolving instead of silently pointing at its replacement. A tile reference is a polygon
/// reference with a polygon index of zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct PolyRef(pub u64);

impl PolyRef {
    /// The null reference. No polygon or tile ever has this reference.
    pub const NULL: PolyRef = PolyRef(0);

    /// Packs a reference.
    #[inline]
    pub fn encode(salt: u32, tile: u32, poly: u32) -> Self {
        let salt = u64::from(salt) & mask(SALT_BITS);
        let tile = u64::from(tile) & mask(TILE_BITS);
        let poly = u64::from(poly) & mask(POLY_BITS);
        PolyRef((salt << (POLY_BITS + TILE_BITS)) | (tile << POLY_BITS) | poly)
    }

    /// Unpacks the reference into `(salt, tile, poly)`.
    #[inline]
    pub fn decode(self) -> (u32, u32, u32) {
        (self.salt(), self.tile(), self.poly())
    }

    /// The salt of the tile at the time the reference was created.
    #[inline]
    pub fn salt(self) -> u32 {
        ((self.0 >> (POLY_BITS + TILE_BITS)) & mask(SALT_BITS)) as u32
    }

    /// The index of the tile.
    #[inline]
    pub fn tile(self) -> u32 {
        ((self.0 >> POLY_BITS) & mask(TILE_BITS)) as u32
    }

    /// The index of the polygon inside its tile.
    #[inline]
    pub fn poly(self) -> u32 {
        (self.0 & mask(POLY_BITS)) as u32
    }

    /// The reference of the tile this polygon belongs to.
    #[inline]
    pub fn tile_ref(self) -> PolyRef {
        PolyRef::encode(self.salt(), self.tile(), 0)
    }

    /// Whether this is [`PolyRef::NULL`].
    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PolyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (salt, tile, poly) = self.decode();
        write!(f, "{salt}:{tile}:{poly}")
    }
}

impl From<u64> for PolyRef {
    fn from(value: u64) -> Self {
        PolyRef(value)
    }
}

impl From<PolyRef> for u64 {
    fn from(value: PolyRef) -> Self {
        value.0
    }
}

#[inline]
const fn mask(bits: u32) -> u64 {
    (1 << bits) - 1
}
