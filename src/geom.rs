//! Planar and 2.5D geometry primitives shared by the scene, the cut
//! profile and the path search.
//!
//! All intersection work is done in the horizontal plane; z is carried
//! along and interpolated by 2D fraction where a construction needs it.

use serde::{Deserialize, Serialize};

/// Tolerance for altitude comparisons.
pub const Z_EPSILON: f64 = 1e-6;
/// Tolerance under which two 2D positions are considered coincident.
pub const COINCIDENCE_EPSILON: f64 = 1e-7;
/// Horizontal nudge applied to reflection points, away from the wall.
pub const REFLECTION_EPSILON: f64 = 1e-4;
/// Altitude lift applied to an over-roof diffraction point sitting
/// exactly on a footprint corner.
pub const ROOF_EPSILON: f64 = 1e-3;
/// Outward translation of wide-angle footprint corners.
pub const CORNER_EPSILON: f64 = 1e-2;

/// A position in the scene; `z` is an absolute altitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Horizontal distance, ignoring altitude.
    pub fn distance_2d(&self, other: &Coordinate) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Full 3D distance.
    pub fn distance_3d(&self, other: &Coordinate) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// 2D coincidence within [`COINCIDENCE_EPSILON`].
    pub fn equals_2d(&self, other: &Coordinate) -> bool {
        self.distance_2d(other) < COINCIDENCE_EPSILON
    }

    /// Component-wise difference as a 3D vector.
    pub fn vector_to(&self, other: &Coordinate) -> [f64; 3] {
        [other.x - self.x, other.y - self.y, other.z - self.z]
    }
}

/// Cross product of (a - o) x (b - o), 2D. Positive when `b` is to the
/// left of the directed line o -> a.
pub fn cross_2d(o: &Coordinate, a: &Coordinate, b: &Coordinate) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Bounded segment-segment intersection in 2D.
///
/// Returns `(intersection, t, u)` where `t` parametrizes `a0 -> a1` and
/// `u` parametrizes `b0 -> b1`, both in `[0, 1]`. The intersection z is
/// interpolated along the `a` segment.
pub fn segment_segment_intersect_2d(
    a0: &Coordinate,
    a1: &Coordinate,
    b0: &Coordinate,
    b1: &Coordinate,
) -> Option<(Coordinate, f64, f64)> {
    let dax = a1.x - a0.x;
    let day = a1.y - a0.y;
    let dbx = b1.x - b0.x;
    let dby = b1.y - b0.y;

    let cross = dax * dby - day * dbx;
    if cross.abs() < COINCIDENCE_EPSILON {
        return None;
    }

    let dx = b0.x - a0.x;
    let dy = b0.y - a0.y;
    let t = (dx * dby - dy * dbx) / cross;
    let u = (dx * day - dy * dax) / cross;

    let eps = COINCIDENCE_EPSILON;
    if t >= -eps && t <= 1.0 + eps && u >= -eps && u <= 1.0 + eps {
        let t = t.clamp(0.0, 1.0);
        let pt = Coordinate::new(
            a0.x + dax * t,
            a0.y + day * t,
            a0.z + (a1.z - a0.z) * t,
        );
        Some((pt, t, u.clamp(0.0, 1.0)))
    } else {
        None
    }
}

/// Projection factor of `p` onto the infinite line through `p0 -> p1`,
/// unclamped (0 at `p0`, 1 at `p1`).
pub fn projection_factor(p: &Coordinate, p0: &Coordinate, p1: &Coordinate) -> f64 {
    let dx = p1.x - p0.x;
    let dy = p1.y - p0.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq < COINCIDENCE_EPSILON * COINCIDENCE_EPSILON {
        return 0.0;
    }
    ((p.x - p0.x) * dx + (p.y - p0.y) * dy) / len_sq
}

/// Fraction of `p` along the segment `p0 -> p1`, clamped to `[0, 1]`.
pub fn segment_fraction(p: &Coordinate, p0: &Coordinate, p1: &Coordinate) -> f64 {
    projection_factor(p, p0, p1).clamp(0.0, 1.0)
}

/// Projection of `p` on the infinite supporting line of `p0 -> p1`,
/// with z interpolated on the line.
pub fn project_on_line_2d(p: &Coordinate, p0: &Coordinate, p1: &Coordinate) -> Coordinate {
    let f = projection_factor(p, p0, p1);
    Coordinate::new(
        p0.x + (p1.x - p0.x) * f,
        p0.y + (p1.y - p0.y) * f,
        p0.z + (p1.z - p0.z) * f,
    )
}

/// Altitude at `p` interpolated along the segment `p0 -> p1` by 2D
/// fraction.
pub fn interpolate_z(p: &Coordinate, p0: &Coordinate, p1: &Coordinate) -> f64 {
    let f = segment_fraction(p, p0, p1);
    p0.z + (p1.z - p0.z) * f
}

/// 2D distance from a point to a segment.
pub fn point_segment_distance_2d(p: &Coordinate, p0: &Coordinate, p1: &Coordinate) -> f64 {
    let f = segment_fraction(p, p0, p1);
    let cx = p0.x + (p1.x - p0.x) * f;
    let cy = p0.y + (p1.y - p0.y) * f;
    (p.x - cx).hypot(p.y - cy)
}

/// 2D distance between two segments; zero when they intersect.
pub fn segment_segment_distance_2d(
    a0: &Coordinate,
    a1: &Coordinate,
    b0: &Coordinate,
    b1: &Coordinate,
) -> f64 {
    if segment_segment_intersect_2d(a0, a1, b0, b1).is_some() {
        return 0.0;
    }
    point_segment_distance_2d(a0, b0, b1)
        .min(point_segment_distance_2d(a1, b0, b1))
        .min(point_segment_distance_2d(b0, a0, a1))
        .min(point_segment_distance_2d(b1, a0, a1))
}

/// Axis-aligned 2D bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Envelope of a point set; `None` for an empty slice.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Coordinate>,
    {
        let mut it = points.into_iter();
        let first = it.next()?;
        let mut env = Envelope::new(first.x, first.y, first.x, first.y);
        for p in it {
            env.expand_to_include(p);
        }
        Some(env)
    }

    /// Envelope of the segment `a -> b`.
    pub fn of_segment(a: &Coordinate, b: &Coordinate) -> Self {
        Envelope::new(
            a.x.min(b.x),
            a.y.min(b.y),
            a.x.max(b.x),
            a.y.max(b.y),
        )
    }

    pub fn expand_to_include(&mut self, p: &Coordinate) {
        self.min_x = self.min_x.min(p.x);
        self.min_y = self.min_y.min(p.y);
        self.max_x = self.max_x.max(p.x);
        self.max_y = self.max_y.max(p.y);
    }

    pub fn expand_by(&mut self, margin: f64) {
        self.min_x -= margin;
        self.min_y -= margin;
        self.max_x += margin;
        self.max_y += margin;
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    pub fn contains_point(&self, p: &Coordinate) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }
}

/// 2D convex hull by monotone chain, counter-clockwise, without the
/// closing repeat. Collinear points are dropped.
pub fn convex_hull_2d(points: &[Coordinate]) -> Vec<Coordinate> {
    let mut pts: Vec<Coordinate> = points.to_vec();
    pts.sort_by(|a, b| {
        a.x.partial_cmp(&b.x)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
    });
    pts.dedup_by(|a, b| a.equals_2d(b));
    if pts.len() < 3 {
        return pts;
    }

    let mut lower: Vec<Coordinate> = Vec::with_capacity(pts.len());
    for p in &pts {
        while lower.len() >= 2
            && cross_2d(&lower[lower.len() - 2], &lower[lower.len() - 1], p)
                <= COINCIDENCE_EPSILON
        {
            lower.pop();
        }
        lower.push(*p);
    }
    let mut upper: Vec<Coordinate> = Vec::with_capacity(pts.len());
    for p in pts.iter().rev() {
        while upper.len() >= 2
            && cross_2d(&upper[upper.len() - 2], &upper[upper.len() - 1], p)
                <= COINCIDENCE_EPSILON
        {
            upper.pop();
        }
        upper.push(*p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Perimeter of a hull ring (closing edge included).
pub fn ring_perimeter(ring: &[Coordinate]) -> f64 {
    if ring.len() < 2 {
        return 0.0;
    }
    let mut len = 0.0;
    for i in 0..ring.len() {
        let j = (i + 1) % ring.len();
        len += ring[i].distance_2d(&ring[j]);
    }
    len
}

/// The tilted plane used to cut building corner polylines for the side
/// hull: it contains the source, the receiver and the point one meter to
/// the right of the source, perpendicular to the sight line. The normal
/// always points upward.
#[derive(Debug, Clone, Copy)]
pub struct CutPlane {
    origin: Coordinate,
    normal: [f64; 3],
}

impl CutPlane {
    /// Builds the cut plane through `src` and `rcv`.
    pub fn new(src: &Coordinate, rcv: &Coordinate) -> Self {
        let angle = (rcv.y - src.y).atan2(rcv.x - src.x);
        // Third point of the plane, at -PI/2 from the sight direction.
        let u = [
            (angle - std::f64::consts::FRAC_PI_2).cos(),
            (angle - std::f64::consts::FRAC_PI_2).sin(),
            0.0,
        ];
        let v = [rcv.x - src.x, rcv.y - src.y, rcv.z - src.z];
        let mut n = [
            v[1] * u[2] - v[2] * u[1],
            v[2] * u[0] - v[0] * u[2],
            v[0] * u[1] - v[1] * u[0],
        ];
        let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        if len > 0.0 {
            n = [n[0] / len, n[1] / len, n[2] / len];
        }
        if n[2] < 0.0 {
            n = [-n[0], -n[1], -n[2]];
        }
        Self {
            origin: *src,
            normal: n,
        }
    }

    /// Signed distance of `p` from the plane, positive above.
    pub fn offset(&self, p: &Coordinate) -> f64 {
        self.normal[0] * (p.x - self.origin.x)
            + self.normal[1] * (p.y - self.origin.y)
            + self.normal[2] * (p.z - self.origin.z)
    }

    /// Point where the segment `p -> q` crosses the plane, if the
    /// offsets straddle it.
    pub fn intersect_edge(&self, p: &Coordinate, q: &Coordinate) -> Option<Coordinate> {
        let op = self.offset(p);
        let oq = self.offset(q);
        if (op - oq).abs() < Z_EPSILON {
            return None;
        }
        let t = op / (op - oq);
        if !(0.0..=1.0).contains(&t) {
            return None;
        }
        Some(Coordinate::new(
            p.x + (q.x - p.x) * t,
            p.y + (q.y - p.y) * t,
            p.z + (q.z - p.z) * t,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_segment_crossing() {
        let a0 = Coordinate::new(0.0, 0.0, 0.0);
        let a1 = Coordinate::new(2.0, 2.0, 2.0);
        let b0 = Coordinate::new(0.0, 2.0, 0.0);
        let b1 = Coordinate::new(2.0, 0.0, 0.0);
        let (pt, t, u) = segment_segment_intersect_2d(&a0, &a1, &b0, &b1).unwrap();
        assert!((pt.x - 1.0).abs() < 1e-12);
        assert!((pt.y - 1.0).abs() < 1e-12);
        assert!((pt.z - 1.0).abs() < 1e-12, "z interpolated on first segment");
        assert!((t - 0.5).abs() < 1e-12);
        assert!((u - 0.5).abs() < 1e-12);
    }

    #[test]
    fn segment_segment_disjoint() {
        let a0 = Coordinate::new(0.0, 0.0, 0.0);
        let a1 = Coordinate::new(1.0, 0.0, 0.0);
        let b0 = Coordinate::new(0.0, 1.0, 0.0);
        let b1 = Coordinate::new(1.0, 1.0, 0.0);
        assert!(segment_segment_intersect_2d(&a0, &a1, &b0, &b1).is_none());
    }

    #[test]
    fn projection_and_fraction() {
        let p0 = Coordinate::new(0.0, 0.0, 0.0);
        let p1 = Coordinate::new(10.0, 0.0, 5.0);
        let p = Coordinate::new(4.0, 3.0, 0.0);
        assert!((projection_factor(&p, &p0, &p1) - 0.4).abs() < 1e-12);
        assert!((interpolate_z(&p, &p0, &p1) - 2.0).abs() < 1e-12);
        let proj = project_on_line_2d(&p, &p0, &p1);
        assert!((proj.x - 4.0).abs() < 1e-12);
        assert!(proj.y.abs() < 1e-12);
    }

    #[test]
    fn segment_distances() {
        let a0 = Coordinate::new(0.0, 0.0, 0.0);
        let a1 = Coordinate::new(10.0, 0.0, 0.0);
        let b0 = Coordinate::new(3.0, 4.0, 0.0);
        let b1 = Coordinate::new(7.0, 4.0, 0.0);
        assert!((segment_segment_distance_2d(&a0, &a1, &b0, &b1) - 4.0).abs() < 1e-12);

        let c0 = Coordinate::new(5.0, -1.0, 0.0);
        let c1 = Coordinate::new(5.0, 1.0, 0.0);
        assert_eq!(segment_segment_distance_2d(&a0, &a1, &c0, &c1), 0.0);
    }

    #[test]
    fn hull_of_square_with_interior_point() {
        let pts = vec![
            Coordinate::new(0.0, 0.0, 0.0),
            Coordinate::new(4.0, 0.0, 0.0),
            Coordinate::new(4.0, 4.0, 0.0),
            Coordinate::new(0.0, 4.0, 0.0),
            Coordinate::new(2.0, 2.0, 0.0),
        ];
        let hull = convex_hull_2d(&pts);
        assert_eq!(hull.len(), 4);
        assert!((ring_perimeter(&hull) - 16.0).abs() < 1e-12);
        // Counter-clockwise orientation.
        let mut area2 = 0.0;
        for i in 0..hull.len() {
            let j = (i + 1) % hull.len();
            area2 += hull[i].x * hull[j].y - hull[j].x * hull[i].y;
        }
        assert!(area2 > 0.0);
    }

    #[test]
    fn cut_plane_flat_sight_line() {
        // Source and receiver at the same altitude: the plane is the
        // horizontal plane through them, normal straight up.
        let src = Coordinate::new(0.0, 0.0, 1.0);
        let rcv = Coordinate::new(30.0, 0.0, 1.0);
        let plane = CutPlane::new(&src, &rcv);
        assert!(plane.offset(&Coordinate::new(15.0, -5.0, 8.0)) > 0.0);
        assert!(plane.offset(&Coordinate::new(15.0, 5.0, 0.0)) < 0.0);
        let hit = plane
            .intersect_edge(
                &Coordinate::new(10.0, 2.0, 0.0),
                &Coordinate::new(10.0, 2.0, 4.0),
            )
            .unwrap();
        assert!((hit.z - 1.0).abs() < 1e-12);
    }

    #[test]
    fn cut_plane_tilted_sight_line() {
        let src = Coordinate::new(0.0, 0.0, 0.0);
        let rcv = Coordinate::new(10.0, 0.0, 10.0);
        let plane = CutPlane::new(&src, &rcv);
        // Both endpoints lie on the plane.
        assert!(plane.offset(&src).abs() < 1e-9);
        assert!(plane.offset(&rcv).abs() < 1e-9);
        // Midpoint of the sight line, raised: above the plane.
        assert!(plane.offset(&Coordinate::new(5.0, 0.0, 9.0)) > 0.0);
    }
}
