//! Iterative side hull around the buildings blocking a source-receiver
//! pair, yielding the left and right corner polylines for
//! vertical-edge diffraction.

use std::collections::HashSet;

use crate::error::{CityraysError, Result};
use crate::geom::{convex_hull_2d, ring_perimeter, Coordinate, CutPlane};
use crate::index::Visit;
use crate::scene::Scene;

/// Abort threshold: hull perimeter over direct distance.
pub const MAX_RATIO_HULL_DIRECT_PATH: f64 = 4.0;

/// A vertex of a side polyline; corners carry their building.
#[derive(Debug, Clone)]
pub struct CornerPoint {
    pub coordinate: Coordinate,
    pub building: Option<usize>,
}

/// Both side polylines, source first and receiver last. An empty side
/// was rejected (corner below ground).
#[derive(Debug, Default)]
pub struct SideHulls {
    pub left: Vec<CornerPoint>,
    pub right: Vec<CornerPoint>,
}

/// Cuts a building's corner ring with the plane, keeping the piece on
/// the positive side. A sign change between two consecutive corners is
/// replaced by the plane-edge intersection.
fn cut_corners_with_plane(plane: &CutPlane, corners: &[Coordinate]) -> Vec<Coordinate> {
    let n = corners.len();
    let mut kept = Vec::new();
    for i in 0..n {
        let cur = &corners[i];
        let next = &corners[(i + 1) % n];
        let off_cur = plane.offset(cur);
        let off_next = plane.offset(next);
        if off_cur >= 0.0 {
            kept.push(*cur);
        }
        if (off_cur >= 0.0) != (off_next >= 0.0) {
            if let Some(hit) = plane.intersect_edge(cur, next) {
                kept.push(hit);
            }
        }
    }
    kept
}

/// Grows the convex hull of {src, rcv} with the corners of every
/// building crossed by a hull edge, until a fixpoint.
///
/// Returns `Ok(None)` when no hull exists (coincident endpoints, an
/// endpoint swallowed by the hull, or the hull leaving the propagation
/// domain); [`CityraysError::NonConvergence`] when the perimeter bound
/// is exceeded.
pub fn side_hulls(scene: &Scene, src: &Coordinate, rcv: &Coordinate) -> Result<Option<SideHulls>> {
    if src.equals_2d(rcv) {
        return Ok(None);
    }

    let mut domain = *scene.envelope();
    domain.expand_to_include(src);
    domain.expand_to_include(rcv);
    domain.expand_by(1.0);

    let plane = CutPlane::new(src, rcv);
    let mut input: Vec<(Coordinate, Option<usize>)> = vec![(*src, None), (*rcv, None)];
    let mut processed: HashSet<usize> = HashSet::new();

    let mut add_building = |b_id: usize,
                            processed: &mut HashSet<usize>,
                            input: &mut Vec<(Coordinate, Option<usize>)>|
     -> bool {
        if !processed.insert(b_id) {
            return false;
        }
        let corners = scene
            .building(b_id)
            .wide_angle_corners(0.0, 2.0 * std::f64::consts::PI);
        let cut = cut_corners_with_plane(&plane, &corners);
        if cut.is_empty() {
            return false;
        }
        for c in cut {
            input.push((c, Some(b_id)));
        }
        true
    };

    // Seed with the buildings blocking the direct segment.
    let mut seeds = Vec::new();
    scene.buildings_on_path(src, rcv, &mut |b_id| {
        seeds.push(b_id);
        Visit::Continue
    });
    for b_id in seeds {
        add_building(b_id, &mut processed, &mut input);
    }

    let direct = src.distance_2d(rcv);
    let mut hull;
    loop {
        let coords: Vec<Coordinate> = input.iter().map(|(c, _)| *c).collect();
        hull = convex_hull_2d(&coords);
        if hull.len() < 2 {
            return Ok(None);
        }

        let ratio = ring_perimeter(&hull) / direct;
        if ratio > MAX_RATIO_HULL_DIRECT_PATH {
            return Err(CityraysError::NonConvergence {
                ratio,
                limit: MAX_RATIO_HULL_DIRECT_PATH,
            });
        }

        if hull.iter().any(|p| !domain.contains_point(p)) {
            // The detour leaves the propagation domain.
            return Ok(None);
        }

        let mut grew = false;
        for k in 0..hull.len() {
            let e0 = hull[k];
            let e1 = hull[(k + 1) % hull.len()];
            let mut on_edge = Vec::new();
            scene.buildings_on_path(&e0, &e1, &mut |b_id| {
                on_edge.push(b_id);
                Visit::Continue
            });
            for b_id in on_edge {
                if add_building(b_id, &mut processed, &mut input) {
                    grew = true;
                }
            }
        }
        if !grew {
            break;
        }
    }

    // Re-index so the source sits at index 0.
    let Some(src_idx) = hull.iter().position(|p| p.equals_2d(src)) else {
        return Ok(None);
    };
    hull.rotate_left(src_idx);
    let Some(rcv_idx) = hull.iter().position(|p| p.equals_2d(rcv)) else {
        return Ok(None);
    };

    let owner = |p: &Coordinate| -> Option<usize> {
        input
            .iter()
            .find(|(c, _)| c.equals_2d(p))
            .and_then(|(_, b)| *b)
    };
    let to_corner = |p: &Coordinate| CornerPoint {
        coordinate: *p,
        building: owner(p),
    };

    // Walking the hull one way gives the left polyline, the reverse
    // traversal the right one; both run source -> receiver.
    let left: Vec<CornerPoint> = hull[..=rcv_idx].iter().map(&to_corner).collect();
    let mut right: Vec<CornerPoint> = Vec::with_capacity(hull.len() - rcv_idx + 1);
    right.push(to_corner(&hull[0]));
    right.extend(hull[rcv_idx..].iter().rev().map(&to_corner));

    let accept = |side: &[CornerPoint]| {
        side.len() > 2
            && side[1..side.len() - 1]
                .iter()
                .all(|c| c.coordinate.z >= 0.0)
    };

    Ok(Some(SideHulls {
        left: if accept(&left) { left } else { Vec::new() },
        right: if accept(&right) { right } else { Vec::new() },
    }))
}
