use thiserror::Error;

use crate::PolyRef;

bitflags::bitflags! {
    /// Details attached to a successful query.
    ///
    /// An empty status means the query completed fully. Any set flag means the result is usable
    /// but not what was asked for, so callers that care must check it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct QueryStatus: u8 {
        /// The goal could not be reached, the result leads as close to it as possible.
        const PARTIAL_RESULT = 0x01;
        /// The result did not fit the requested capacity and was truncated.
        const BUFFER_TOO_SMALL = 0x02;
        /// The search ran out of nodes before it could explore everything it wanted to.
        const OUT_OF_NODES = 0x04;
    }
}

impl QueryStatus {
    /// Whether none of the detail flags are set.
    #[inline]
    pub fn is_complete(self) -> bool {
        self.is_empty()
    }
}

/// Errors returned by [`NavMeshQuery`](crate::NavMeshQuery).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    /// The reference does not point at a polygon of the navmesh.
    #[error("Invalid polygon reference {0}")]
    InvalidPolyRef(PolyRef),
    /// A position or extent passed to the query was not finite.
    #[error("Invalid query parameter: {0}")]
    InvalidParam(&'static str),
    /// No polygon passing the filter overlaps the search box.
    #[error("No polygon found near {0:?}")]
    NoNearbyPolygon([f32; 3]),
    /// The navmesh has no polygon passing the filter.
    #[error("The navmesh has no polygon passing the filter")]
    NoPolygons,
    /// Two polygons of a path are not connected.
    #[error("Polygons {from} and {to} are not connected")]
    NotConnected {
        /// The polygon the path comes from
        from: PolyRef,
        /// The polygon the path goes to
        to: PolyRef,
    },
    /// The point does not lie over the polygon.
    #[error("The point is not over polygon {0}")]
    NotOverPolygon(PolyRef),
}
