//! Cut profiles: the classified intersection list returned when probing
//! the scene along a 2D source -> receiver segment.
//!
//! Ground-factor accumulation is a pure function over the point
//! sequence; nothing here touches scene state.

use crate::geom::{Coordinate, COINCIDENCE_EPSILON, Z_EPSILON};

/// Classification of a profile point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutKind {
    Source,
    Receiver,
    BuildingWall,
    Topography,
    GroundEffect,
}

/// One classified intersection along the probe segment.
#[derive(Debug, Clone)]
pub struct CutPoint {
    pub coordinate: Coordinate,
    pub kind: CutKind,
    /// Fraction of the 2D distance from source to receiver.
    pub t: f64,
    /// Ground factor applying after this point (source start factor or
    /// the far side of a ground-region boundary).
    pub ground_after: Option<f64>,
    /// Ground factor on the near side of a ground-region boundary.
    pub ground_before: Option<f64>,
    /// Owning building for wall crossings.
    pub building: Option<usize>,
    /// Crossed wall for wall crossings.
    pub wall: Option<usize>,
}

impl CutPoint {
    pub fn source(coordinate: Coordinate, gs: f64) -> Self {
        Self {
            coordinate,
            kind: CutKind::Source,
            t: 0.0,
            ground_after: Some(gs),
            ground_before: None,
            building: None,
            wall: None,
        }
    }

    pub fn receiver(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            kind: CutKind::Receiver,
            t: 1.0,
            ground_after: None,
            ground_before: None,
            building: None,
            wall: None,
        }
    }

    pub fn building_wall(coordinate: Coordinate, t: f64, building: usize, wall: usize) -> Self {
        Self {
            coordinate,
            kind: CutKind::BuildingWall,
            t,
            ground_after: None,
            ground_before: None,
            building: Some(building),
            wall: Some(wall),
        }
    }

    pub fn topography(coordinate: Coordinate, t: f64) -> Self {
        Self {
            coordinate,
            kind: CutKind::Topography,
            t,
            ground_after: None,
            ground_before: None,
            building: None,
            wall: None,
        }
    }

    pub fn ground_effect(coordinate: Coordinate, t: f64, before: f64, after: f64) -> Self {
        Self {
            coordinate,
            kind: CutKind::GroundEffect,
            t,
            ground_after: Some(after),
            ground_before: Some(before),
            building: None,
            wall: None,
        }
    }
}

/// Ordered cut-point sequence from source to receiver.
#[derive(Debug, Clone)]
pub struct CutProfile {
    points: Vec<CutPoint>,
}

impl CutProfile {
    /// Sorts the points by parametric distance and merges same-kind
    /// points that coincide within the 2D tolerance. The slice must
    /// contain exactly one source and one receiver point.
    pub fn from_points(mut points: Vec<CutPoint>) -> Self {
        let kind_rank = |k: CutKind| match k {
            CutKind::Source => 0,
            CutKind::Receiver => 2,
            _ => 1,
        };
        points.sort_by(|a, b| {
            a.t.partial_cmp(&b.t)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(kind_rank(a.kind).cmp(&kind_rank(b.kind)))
        });
        let mut merged: Vec<CutPoint> = Vec::with_capacity(points.len());
        for p in points {
            if let Some(last) = merged.last() {
                if last.kind == p.kind
                    && last.kind != CutKind::GroundEffect
                    && last.coordinate.distance_2d(&p.coordinate) < COINCIDENCE_EPSILON
                {
                    continue;
                }
            }
            merged.push(p);
        }
        debug_assert!(matches!(merged.first().map(|p| p.kind), Some(CutKind::Source)));
        debug_assert!(matches!(merged.last().map(|p| p.kind), Some(CutKind::Receiver)));
        Self { points: merged }
    }

    pub fn points(&self) -> &[CutPoint] {
        &self.points
    }

    pub fn source(&self) -> &CutPoint {
        self.points.first().expect("profile has a source point")
    }

    pub fn receiver(&self) -> &CutPoint {
        self.points.last().expect("profile has a receiver point")
    }

    /// Ground factor attached at the source.
    pub fn gs(&self) -> f64 {
        self.source().ground_after.unwrap_or(0.0)
    }

    fn sight_z_at(&self, t: f64) -> f64 {
        let s = self.source().coordinate;
        let r = self.receiver().coordinate;
        s.z + (r.z - s.z) * t
    }

    /// True when no building wall is crossed and every topography point
    /// stays at or below the sight line.
    pub fn is_free_field(&self) -> bool {
        self.points.iter().all(|p| match p.kind {
            CutKind::BuildingWall => false,
            CutKind::Topography => p.coordinate.z <= self.sight_z_at(p.t) + Z_EPSILON,
            _ => true,
        })
    }

    /// True when a building wall rises above the sight line.
    pub fn intersects_building(&self) -> bool {
        self.points.iter().any(|p| {
            p.kind == CutKind::BuildingWall && p.coordinate.z > self.sight_z_at(p.t) + Z_EPSILON
        })
    }

    /// True when the terrain rises above the sight line.
    pub fn intersects_topography(&self) -> bool {
        self.points.iter().any(|p| {
            p.kind == CutKind::Topography && p.coordinate.z > self.sight_z_at(p.t) + Z_EPSILON
        })
    }

    /// Length-weighted mean ground factor over the parametric range
    /// `[t0, t1]`. The factor starts at the source value and switches at
    /// every ground-effect crossing.
    pub fn ground_mean(&self, t0: f64, t1: f64) -> f64 {
        let (t0, t1) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };
        let mut g = self.gs();
        let mut weighted = 0.0;
        let mut cursor = t0;
        for p in &self.points {
            if p.kind != CutKind::GroundEffect {
                continue;
            }
            let Some(after) = p.ground_after else { continue };
            if p.t <= t0 {
                g = after;
                continue;
            }
            if p.t >= t1 {
                break;
            }
            weighted += g * (p.t - cursor);
            cursor = p.t;
            g = after;
        }
        weighted += g * (t1 - cursor);
        if t1 - t0 < COINCIDENCE_EPSILON {
            g
        } else {
            weighted / (t1 - t0)
        }
    }

    /// Mean ground factor over the whole profile.
    pub fn ground_mean_full(&self) -> f64 {
        self.ground_mean(0.0, 1.0)
    }
}
