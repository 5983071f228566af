use glam::Vec3;

use crate::tile_data::Poly;

/// The number of distinct area ids.
pub const MAX_AREAS: usize = 64;

/// Decides which polygons a query may visit and what moving across them costs.
///
/// A polygon passes if it has at least one of the include flags and none of the exclude flags.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct QueryFilter {
    area_cost: Vec<f32>,
    include_flags: u16,
    exclude_flags: u16,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            area_cost: vec![1.0; MAX_AREAS],
            include_flags: 0xffff,
            exclude_flags: 0,
        }
    }
}

impl QueryFilter {
    /// Whether the polygon may be visited.
    #[inline]
    pub fn pass_filter(&self, poly: &Poly) -> bool {
        poly.flags & self.include_flags != 0 && poly.flags & self.exclude_flags == 0
    }

    /// The cost of moving from `pa` to `pb`, both on `poly`.
    #[inline]
    pub fn cost(&self, pa: Vec3, pb: Vec3, poly: &Poly) -> f32 {
        pa.distance(pb) * self.area_cost[usize::from(poly.area) % MAX_AREAS]
    }

    /// The cost multiplier of an area.
    pub fn area_cost(&self, area: u8) -> f32 {
        self.area_cost[usize::from(area) % MAX_AREAS]
    }

    /// Sets the cost multiplier of an area. `[Limit: >= 1]` keeps the search heuristic admissible.
    pub fn set_area_cost(&mut self, area: u8, cost: f32) {
        self.area_cost[usize::from(area) % MAX_AREAS] = cost;
    }

    /// Polygons need one of these flags to pass.
    pub fn include_flags(&self) -> u16 {
        self.include_flags
    }

    /// Sets the flags a polygon needs one of to pass.
    pub fn set_include_flags(&mut self, flags: u16) {
        self.include_flags = flags;
    }

    /// Polygons with any of these flags are rejected.
    pub fn exclude_flags(&self) -> u16 {
        self.exclude_flags
    }

    /// Sets the flags that reject a polygon.
    pub fn set_exclude_flags(&mut self, flags: u16) {
        self.exclude_flags = flags;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_decide_passage() {
        let mut filter = QueryFilter::default();
        let poly = Poly {
            flags: 0b0110,
            ..Default::default()
        };
        assert!(filter.pass_filter(&poly));
        filter.set_exclude_flags(0b0100);
        assert!(!filter.pass_filter(&poly));
        filter.set_exclude_flags(0);
        filter.set_include_flags(0b1000);
        assert!(!filter.pass_filter(&poly));
        assert!(!QueryFilter::default().pass_filter(&Poly::default()));
    }

    #[test]
    fn cost_scales_with_area() {
        let mut filter = QueryFilter::default();
        filter.set_area_cost(3, 2.5);
        let poly = Poly {
            area: 3,
            ..Default::default()
        };
        assert_eq!(filter.cost(Vec3::ZERO, Vec3::new(0.0, 0.0, 2.0), &poly), 5.0);
        assert_eq!(filter.area_cost(0), 1.0);
    }
}
