use glam::{U16Vec3, UVec3, Vec2, Vec3A, Vec3Swizzles as _};

/// An axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb3d {
    /// The minimum corner
    pub min: Vec3A,
    /// The maximum corner
    pub max: Vec3A,
}

impl Aabb3d {
    /// Creates a box from its center and half size.
    pub fn new(center: impl Into<Vec3A>, half_size: impl Into<Vec3A>) -> Self {
        let center = center.into();
        let half_size = half_size.into();
        Self {
            min: center - half_size,
            max: center + half_size,
        }
    }

    /// Computes the smallest box containing all `verts`.
    /// Returns `None` if `verts` is empty.
    pub fn from_verts(verts: &[Vec3A]) -> Option<Self> {
        let (first, rest) = verts.split_first()?;
        let (min, max) = rest
            .iter()
            .fold((*first, *first), |(min, max), v| (min.min(*v), max.max(*v)));
        Some(Self { min, max })
    }

    /// Returns `true` if the boxes touch or overlap.
    #[inline]
    pub fn intersects(&self, other: &Aabb3d) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// The projection of the box onto the xz-plane.
    #[inline]
    pub fn xz(&self) -> Aabb2d {
        Aabb2d {
            min: self.min.xz(),
            max: self.max.xz(),
        }
    }
}

/// An axis-aligned rectangle on the xz-plane.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb2d {
    /// The minimum corner
    pub min: Vec2,
    /// The maximum corner
    pub max: Vec2,
}

impl Aabb2d {
    /// Computes the smallest rectangle containing all `verts`.
    /// Returns `None` if `verts` is empty.
    pub fn from_verts(verts: &[Vec2]) -> Option<Self> {
        let (first, rest) = verts.split_first()?;
        let (min, max) = rest
            .iter()
            .fold((*first, *first), |(min, max), v| (min.min(*v), max.max(*v)));
        Some(Self { min, max })
    }

    /// Returns `true` if the rectangles touch or overlap.
    #[inline]
    pub fn intersects(&self, other: &Aabb2d) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Grows the rectangle to include `other`.
    #[inline]
    pub fn union(&self, other: &Aabb2d) -> Aabb2d {
        Aabb2d {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

pub(crate) trait TriangleIndices {
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A;
}

impl TriangleIndices for UVec3 {
    #[inline]
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A {
        let a = vertices[self[0] as usize];
        let b = vertices[self[1] as usize];
        let c = vertices[self[2] as usize];
        (b - a).cross(c - a).normalize_or_zero()
    }
}

/// Gets the standard width (x-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The width offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_x(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [-1, 0, 1, 0];
    OFFSET[direction as usize & 0x03]
}

/// Gets the standard height (z-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The height offset to apply to the current cell position to move in the direction.
#[inline]
pub(crate) fn dir_offset_z(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [0, 1, 0, -1];
    OFFSET[direction as usize & 0x03]
}

/// Gets the direction for the specified offset. One of x and z must be 0.
#[inline]
pub(crate) fn dir_for_offset(x: i32, z: i32) -> u8 {
    const DIRS: [u8; 5] = [3, 0, u8::MAX, 2, 1];
    DIRS[(((z + 1) << 1) + x) as usize]
}

#[inline]
pub(crate) fn next(i: usize, n: usize) -> usize {
    if i + 1 < n { i + 1 } else { 0 }
}

#[inline]
pub(crate) fn prev(i: usize, n: usize) -> usize {
    if i >= 1 { i - 1 } else { n - 1 }
}

/// Squared distance from `pt` to the segment `(p, q)` on the xz-plane.
#[inline]
pub(crate) fn distance_squared_point_segment_2d(pt: Vec2, (p, q): (Vec2, Vec2)) -> f32 {
    let pq = q - p;
    let d = pq.length_squared();
    let mut t = pq.dot(pt - p);
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);
    (p + pq * t).distance_squared(pt)
}

/// Squared distance from `pt` to the segment `(p, q)` in 3D.
#[inline]
pub(crate) fn distance_squared_point_segment(pt: Vec3A, (p, q): (Vec3A, Vec3A)) -> f32 {
    let pq = q - p;
    let d = pq.length_squared();
    let mut t = pq.dot(pt - p);
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);
    (p + pq * t).distance_squared(pt)
}

/// Even-odd test of `point` against a polygon on the xz-plane.
pub(crate) fn point_in_poly_2d(point: Vec2, vertices: &[Vec2]) -> bool {
    let mut inside = false;
    let Some(mut j) = vertices.len().checked_sub(1) else {
        return false;
    };
    for (i, vi) in vertices.iter().enumerate() {
        let vj = vertices[j];
        if ((vi.y > point.y) != (vj.y > point.y))
            && (point.x < (vj.x - vi.x) * (point.y - vi.y) / (vj.y - vi.y) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Twice the signed area of the triangle `(a, b, c)` on the xz-plane of the voxel grid.
#[inline]
pub(crate) fn area2(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> i32 {
    let (a, b, c) = (a.as_ivec3(), b.as_ivec3(), c.as_ivec3());
    (b.x - a.x) * (c.z - a.z) - (c.x - a.x) * (b.z - a.z)
}

/// Whether `c` is strictly left of the directed line from `a` to `b`.
#[inline]
pub(crate) fn left(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    area2(a, b, c) < 0
}

#[inline]
pub(crate) fn left_on(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
pub(crate) fn collinear(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    area2(a, b, c) == 0
}

/// Whether two voxel grid points coincide on the xz-plane.
#[inline]
pub(crate) fn xz_equal(a: U16Vec3, b: U16Vec3) -> bool {
    a.x == b.x && a.z == b.z
}

/// Whether segments `ab` and `cd` properly intersect, sharing a point interior to both.
pub(crate) fn intersect_prop(a: U16Vec3, b: U16Vec3, c: U16Vec3, d: U16Vec3) -> bool {
    // Eliminate improper cases.
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// Whether `c` lies on the closed segment `ab`.
fn between(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    // If ab not vertical, check betweenness on x; else on z.
    if a.x != b.x {
        (a.x <= c.x && c.x <= b.x) || (a.x >= c.x && c.x >= b.x)
    } else {
        (a.z <= c.z && c.z <= b.z) || (a.z >= c.z && c.z >= b.z)
    }
}

/// Whether segments `ab` and `cd` intersect, properly or improperly.
pub(crate) fn intersect(a: U16Vec3, b: U16Vec3, c: U16Vec3, d: U16Vec3) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}
