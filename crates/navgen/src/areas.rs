//! Semantic navigation areas and the polygon flags derived from them.

use crate::{AreaType, PolygonMesh};

/// Area ids assigned to navmesh polygons before they are packed into a tile.
pub struct NavArea;

impl NavArea {
    /// Plain walkable ground. Polygons still marked [`AreaType::DEFAULT_WALKABLE`] become ground.
    pub const GROUND: AreaType = AreaType(0);
    /// Swimmable water
    pub const WATER: AreaType = AreaType(1);
    /// Road
    pub const ROAD: AreaType = AreaType(2);
    /// Door
    pub const DOOR: AreaType = AreaType(3);
    /// Grass
    pub const GRASS: AreaType = AreaType(4);
    /// Jump link
    pub const JUMP: AreaType = AreaType(5);
}

bitflags::bitflags! {
    /// The abilities an agent needs to traverse a polygon.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct NavPolyFlags: u16 {
        /// Ability to walk (ground, grass, road)
        const WALK = 0x01;
        /// Ability to swim (water)
        const SWIM = 0x02;
        /// Ability to move through doors
        const DOOR = 0x04;
        /// Ability to jump
        const JUMP = 0x08;
        /// Disabled polygon
        const DISABLED = 0x10;
        /// All abilities
        const ALL = 0xffff;
    }
}

impl NavPolyFlags {
    /// The flags polygons of the given area receive. Unknown areas get no flags.
    pub fn for_area(area: AreaType) -> Self {
        match area {
            NavArea::GROUND | NavArea::GRASS | NavArea::ROAD => NavPolyFlags::WALK,
            NavArea::WATER => NavPolyFlags::SWIM,
            NavArea::DOOR => NavPolyFlags::WALK | NavPolyFlags::DOOR,
            _ => NavPolyFlags::empty(),
        }
    }
}

/// Remaps generic walkable polygons to [`NavArea::GROUND`] and derives each polygon's flags from
/// its area.
///
/// Polygons of areas without an entry in the lookup keep their flags.
pub fn apply_area_flags(mesh: &mut PolygonMesh) {
    for (area, flags) in mesh.areas.iter_mut().zip(mesh.flags.iter_mut()) {
        if *area == AreaType::DEFAULT_WALKABLE {
            *area = NavArea::GROUND;
        }
        let derived = NavPolyFlags::for_area(*area);
        if !derived.is_empty() {
            *flags = derived.bits();
        }
    }
}
