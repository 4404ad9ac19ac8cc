//! Upper convex hull over a cut profile, selecting the over-roof
//! diffraction points.
//!
//! The hull is monotone in the parametric distance; each kept point
//! lies on or above the chord between its neighbours in (distance, z)
//! space.

use crate::geom::Z_EPSILON;
use crate::profile::{CutKind, CutPoint, CutProfile};

/// Altitude on the line through `a` and `b` (in (t, z) space) at
/// parameter `t`.
fn line_z(a: &CutPoint, b: &CutPoint, t: f64) -> f64 {
    let span = b.t - a.t;
    if span.abs() < f64::EPSILON {
        return a.coordinate.z.max(b.coordinate.z);
    }
    a.coordinate.z + (b.coordinate.z - a.coordinate.z) * (t - a.t) / span
}

/// Selects the smallest point set forming the upper convex hull of the
/// profile, ground-effect points excluded. The first entry is the
/// source, the last the receiver; a two-point result means the profile
/// is effectively free field.
pub fn upper_hull(profile: &CutProfile) -> Vec<CutPoint> {
    let cut_pts: Vec<&CutPoint> = profile
        .points()
        .iter()
        .filter(|p| p.kind != CutKind::GroundEffect)
        .collect();
    debug_assert!(cut_pts.len() >= 2);

    let mut hull: Vec<CutPoint> = vec![cut_pts[0].clone()];
    let mut anchor = 0usize;
    for i in 1..cut_pts.len() {
        let p = cut_pts[i];
        let below = (i + 1..cut_pts.len()).all(|j| {
            let q = cut_pts[j];
            q.coordinate.z <= line_z(cut_pts[anchor], p, q.t) + Z_EPSILON
        });
        if !below {
            continue;
        }
        hull.push(p.clone());
        anchor = i;

        // Prune interior points that fell on or under a chord.
        let mut k = 1;
        while k + 1 < hull.len() {
            let chord_z = line_z(&hull[k - 1], &hull[k + 1], hull[k].t);
            if hull[k].coordinate.z <= chord_z + Z_EPSILON {
                hull.remove(k);
                if k > 1 {
                    k -= 1;
                }
            } else {
                k += 1;
            }
        }
    }
    hull
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Coordinate;

    fn c(x: f64, z: f64) -> Coordinate {
        Coordinate::new(x, 0.0, z)
    }

    fn profile(points: Vec<CutPoint>) -> CutProfile {
        CutProfile::from_points(points)
    }

    #[test]
    fn flat_profile_reduces_to_endpoints() {
        let p = profile(vec![
            CutPoint::source(c(0.0, 2.0), 0.0),
            CutPoint::topography(c(5.0, 0.0), 0.5),
            CutPoint::receiver(c(10.0, 2.0)),
        ]);
        let hull = upper_hull(&p);
        assert_eq!(hull.len(), 2);
    }

    #[test]
    fn single_building_gives_two_roof_points() {
        let p = profile(vec![
            CutPoint::source(c(0.0, 2.0), 0.0),
            CutPoint::building_wall(c(4.0, 6.0), 0.4, 0, 0),
            CutPoint::topography(c(5.0, 0.0), 0.5),
            CutPoint::building_wall(c(6.0, 6.0), 0.6, 0, 1),
            CutPoint::receiver(c(10.0, 2.0)),
        ]);
        let hull = upper_hull(&p);
        assert_eq!(hull.len(), 4);
        assert_eq!(hull[1].kind, CutKind::BuildingWall);
        assert_eq!(hull[2].kind, CutKind::BuildingWall);
        assert!((hull[1].coordinate.z - 6.0).abs() < 1e-12);
        assert!((hull[2].coordinate.z - 6.0).abs() < 1e-12);
    }

    #[test]
    fn dominated_obstacle_is_pruned() {
        // A low wall in the shadow of a tall one does not diffract.
        let p = profile(vec![
            CutPoint::source(c(0.0, 2.0), 0.0),
            CutPoint::building_wall(c(3.0, 12.0), 0.3, 0, 0),
            CutPoint::building_wall(c(5.0, 4.0), 0.5, 1, 2),
            CutPoint::receiver(c(10.0, 2.0)),
        ]);
        let hull = upper_hull(&p);
        assert_eq!(hull.len(), 3);
        assert!((hull[1].coordinate.z - 12.0).abs() < 1e-12);
    }

    #[test]
    fn ground_effect_points_are_ignored() {
        let p = profile(vec![
            CutPoint::source(c(0.0, 2.0), 0.0),
            CutPoint::ground_effect(c(2.0, 0.0), 0.2, 0.0, 1.0),
            CutPoint::building_wall(c(5.0, 9.0), 0.5, 0, 0),
            CutPoint::ground_effect(c(8.0, 0.0), 0.8, 1.0, 0.0),
            CutPoint::receiver(c(10.0, 2.0)),
        ]);
        let hull = upper_hull(&p);
        assert_eq!(hull.len(), 3);
        assert!(hull.iter().all(|p| p.kind != CutKind::GroundEffect));
    }

    #[test]
    fn rising_terrain_ridge_diffracts() {
        let p = profile(vec![
            CutPoint::source(c(0.0, 1.0), 0.0),
            CutPoint::topography(c(5.0, 6.0), 0.5),
            CutPoint::receiver(c(10.0, 1.0)),
        ]);
        let hull = upper_hull(&p);
        assert_eq!(hull.len(), 3);
        assert_eq!(hull[1].kind, CutKind::Topography);
    }
}
