use glam::{Vec3, Vec3Swizzles as _};

const EQUAL_THRESHOLD: f32 = (1.0 / 16384.0) * (1.0 / 16384.0);

/// Signed area of the triangle on the xz-plane, times two.
/// Positive if `c` lies to the right of `a -> b` when looking down the y-axis.
#[inline]
pub(crate) fn tri_area_2d(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let ab = b.xz() - a.xz();
    let ac = c.xz() - a.xz();
    ac.x * ab.y - ab.x * ac.y
}

/// Whether the points are so close they can be treated as the same.
#[inline]
pub(crate) fn vequal(a: Vec3, b: Vec3) -> bool {
    a.distance_squared(b) < EQUAL_THRESHOLD
}

/// Squared xz distance from `pt` to the segment `p..q`, and the parameter of the closest point.
pub(crate) fn dist_pt_seg_sqr_2d(pt: Vec3, p: Vec3, q: Vec3) -> (f32, f32) {
    let pq = q.xz() - p.xz();
    let d = pq.length_squared();
    let mut t = pq.dot(pt.xz() - p.xz());
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let closest = p.xz() + pq * t;
    (closest.distance_squared(pt.xz()), t)
}

/// Even-odd test on the xz-plane. Points on an edge may go either way.
pub(crate) fn point_in_polygon(pt: Vec3, verts: &[Vec3]) -> bool {
    let mut inside = false;
    let mut j = verts.len() - 1;
    for i in 0..verts.len() {
        let vi = verts[i];
        let vj = verts[j];
        if (vi.z > pt.z) != (vj.z > pt.z)
            && pt.x < (vj.x - vi.x) * (pt.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Like [`point_in_polygon`], but also reports the squared distance to and the closest point
/// parameter on every edge. Edge `j` runs from `verts[j]` to `verts[j + 1]`.
pub(crate) fn distance_pt_poly_edges_sqr(pt: Vec3, verts: &[Vec3]) -> (bool, Vec<(f32, f32)>) {
    let n = verts.len();
    let mut edges = vec![(0.0, 0.0); n];
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let vi = verts[i];
        let vj = verts[j];
        if (vi.z > pt.z) != (vj.z > pt.z)
            && pt.x < (vj.x - vi.x) * (pt.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        edges[j] = dist_pt_seg_sqr_2d(pt, vj, vi);
        j = i;
    }
    (inside, edges)
}

/// The height of the triangle at the xz position of `p`, if `p` lies inside it.
pub(crate) fn closest_height_point_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    const EPS: f32 = 1e-6;
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let mut denom = v0.x * v1.z - v0.z * v1.x;
    if denom.abs() < EPS {
        return None;
    }
    let mut u = v1.z * v2.x - v1.x * v2.z;
    let mut v = v0.x * v2.z - v0.z * v2.x;
    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }
    (u >= 0.0 && v >= 0.0 && u + v <= denom).then(|| a.y + (v0.y * u + v1.y * v) / denom)
}

/// Closest point on the triangle to `p`, in 3D.
pub(crate) fn closest_pt_point_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

#[inline]
pub(crate) fn overlap_bounds(amin: Vec3, amax: Vec3, bmin: Vec3, bmax: Vec3) -> bool {
    amin.cmple(bmax).all() && amax.cmpge(bmin).all()
}

#[inline]
pub(crate) fn overlap_quant_bounds(
    amin: [u16; 3],
    amax: [u16; 3],
    bmin: [u16; 3],
    bmax: [u16; 3],
) -> bool {
    (0..3).all(|i| amin[i] <= bmax[i] && amax[i] >= bmin[i])
}

/// Picks a point inside a convex polygon from two uniform samples in `[0, 1)`.
/// The point is uniformly distributed over the polygon's area.
pub(crate) fn random_point_in_convex_poly(pts: &[Vec3], s: f32, t: f32) -> Vec3 {
    let n = pts.len();
    let areas: Vec<f32> = (2..n)
        .map(|i| tri_area_2d(pts[0], pts[i - 1], pts[i]).abs().max(0.001))
        .collect();
    let area_sum: f32 = areas.iter().sum();

    let threshold = s * area_sum;
    let mut acc = 0.0;
    let mut u = 1.0;
    let mut tri = n - 1;
    for (i, area) in (2..n).zip(&areas) {
        if threshold >= acc && threshold < acc + area {
            u = (threshold - acc) / area;
            tri = i;
            break;
        }
        acc += area;
    }

    let v = t.sqrt();
    let a = 1.0 - v;
    let b = (1.0 - u) * v;
    let c = u * v;
    pts[0] * a + pts[tri - 1] * b + pts[tri] * c
}

/// The direction index pointing the other way. Directions are in `0..8`, counter-clockwise from +x.
#[inline]
pub(crate) fn opposite_tile(side: u8) -> u8 {
    (side + 4) & 0x7
}
