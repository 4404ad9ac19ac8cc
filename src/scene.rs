//! Scene model: buildings, walls, ground regions and terrain, indexed
//! for profile queries.
//!
//! The builder ingests raw geometry, skipping malformed elements; after
//! [`SceneBuilder::finish`] the scene is immutable and shared read-only
//! across workers.

use log::warn;
use ndarray::Array1;

use crate::error::{CityraysError, Result};
use crate::geom::{
    cross_2d, segment_segment_distance_2d, segment_segment_intersect_2d, Coordinate, Envelope,
    CORNER_EPSILON,
};
use crate::index::{AabbTree, Visit};
use crate::profile::{CutPoint, CutProfile};
use crate::terrain::Terrain;

/// A building: CCW footprint ring, flat roof altitude and facade
/// absorption spectrum.
#[derive(Debug, Clone)]
pub struct Building {
    footprint: Vec<Coordinate>,
    roof_z: f64,
    alpha: Array1<f64>,
    envelope: Envelope,
}

impl Building {
    fn new(mut footprint: Vec<Coordinate>, roof_z: f64, alpha: Array1<f64>) -> Result<Self> {
        // Drop an explicit closing point.
        if footprint.len() >= 2
            && footprint
                .first()
                .zip(footprint.last())
                .map(|(a, b)| a.equals_2d(b))
                .unwrap_or(false)
        {
            footprint.pop();
        }
        footprint.dedup_by(|a, b| a.equals_2d(b));
        if footprint.len() < 3 {
            return Err(CityraysError::InvalidGeometry {
                message: format!("building footprint with {} points", footprint.len()),
            });
        }
        // Wind the ring counter-clockwise around the building exterior,
        // so that the outside of every wall is on its left.
        let mut area2 = 0.0;
        for i in 0..footprint.len() {
            let j = (i + 1) % footprint.len();
            area2 += footprint[i].x * footprint[j].y - footprint[j].x * footprint[i].y;
        }
        if area2.abs() < f64::EPSILON {
            return Err(CityraysError::InvalidGeometry {
                message: "building footprint with zero area".into(),
            });
        }
        if area2 > 0.0 {
            footprint.reverse();
        }
        let envelope = Envelope::from_points(&footprint).expect("non-empty footprint");
        Ok(Self {
            footprint,
            roof_z,
            alpha,
            envelope,
        })
    }

    pub fn footprint(&self) -> &[Coordinate] {
        &self.footprint
    }

    pub fn roof_z(&self) -> f64 {
        self.roof_z
    }

    pub fn alpha(&self) -> &Array1<f64> {
        &self.alpha
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Even-odd point-in-polygon test in 2D.
    pub fn contains_2d(&self, p: &Coordinate) -> bool {
        let mut inside = false;
        let n = self.footprint.len();
        let mut j = n - 1;
        for i in 0..n {
            let pi = &self.footprint[i];
            let pj = &self.footprint[j];
            if (pi.y > p.y) != (pj.y > p.y)
                && p.x < (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// True when the 2D segment touches the footprint (edge crossing or
    /// either endpoint inside).
    pub fn intersects_segment_2d(&self, a: &Coordinate, b: &Coordinate) -> bool {
        if self.contains_2d(a) || self.contains_2d(b) {
            return true;
        }
        let n = self.footprint.len();
        (0..n).any(|i| {
            let p0 = &self.footprint[i];
            let p1 = &self.footprint[(i + 1) % n];
            segment_segment_intersect_2d(a, b, p0, p1).is_some()
        })
    }

    /// Corners whose angle measured outside the footprint lies in
    /// `(min_angle, max_angle)`, translated outward along the exterior
    /// bisector and lifted to roof altitude. Usable as diffraction
    /// corner candidates.
    pub fn wide_angle_corners(&self, min_angle: f64, max_angle: f64) -> Vec<Coordinate> {
        let n = self.footprint.len();
        let mut corners = Vec::new();
        for i in 0..n {
            let prev = &self.footprint[(i + n - 1) % n];
            let v = &self.footprint[i];
            let next = &self.footprint[(i + 1) % n];
            let a1 = (prev.y - v.y).atan2(prev.x - v.x);
            let a2 = (next.y - v.y).atan2(next.x - v.x);
            let mut interior = a2 - a1;
            while interior < 0.0 {
                interior += 2.0 * std::f64::consts::PI;
            }
            let outside = 2.0 * std::f64::consts::PI - interior;
            if outside <= min_angle || outside >= max_angle {
                continue;
            }
            // Outward bisector: opposite of the interior bisector.
            let d1 = (prev.x - v.x).hypot(prev.y - v.y);
            let d2 = (next.x - v.x).hypot(next.y - v.y);
            let mut bx = (prev.x - v.x) / d1 + (next.x - v.x) / d2;
            let mut by = (prev.y - v.y) / d1 + (next.y - v.y) / d2;
            let blen = bx.hypot(by);
            if blen > f64::EPSILON {
                bx = -bx / blen;
                by = -by / blen;
            } else {
                // Straight corner: push perpendicular to the edge, outside.
                bx = -(next.y - v.y) / d2;
                by = (next.x - v.x) / d2;
            }
            corners.push(Coordinate::new(
                v.x + bx * CORNER_EPSILON,
                v.y + by * CORNER_EPSILON,
                self.roof_z,
            ));
        }
        corners
    }
}

/// Oriented vertical facade segment; the building exterior is on the
/// left of `p0 -> p1`. Endpoint altitudes are the wall top.
#[derive(Debug, Clone)]
pub struct Wall {
    pub p0: Coordinate,
    pub p1: Coordinate,
    pub top_z: f64,
    pub building: usize,
    pub alpha: Array1<f64>,
}

impl Wall {
    /// True when `p` lies strictly on the outside of the wall.
    pub fn is_outside(&self, p: &Coordinate) -> bool {
        cross_2d(&self.p0, &self.p1, p) > 0.0
    }

    /// Unit normal pointing away from the building.
    pub fn outward_normal(&self) -> [f64; 2] {
        let dx = self.p1.x - self.p0.x;
        let dy = self.p1.y - self.p0.y;
        let len = dx.hypot(dy);
        if len < f64::EPSILON {
            return [0.0, 0.0];
        }
        [-dy / len, dx / len]
    }

    pub fn envelope(&self) -> Envelope {
        Envelope::of_segment(&self.p0, &self.p1)
    }
}

/// Polygonal ground region with an absorption class G in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct GroundRegion {
    polygon: Vec<Coordinate>,
    pub g: f64,
    envelope: Envelope,
}

impl GroundRegion {
    fn new(polygon: Vec<Coordinate>, g: f64) -> Result<Self> {
        if polygon.len() < 3 {
            return Err(CityraysError::InvalidGeometry {
                message: format!("ground region with {} points", polygon.len()),
            });
        }
        let envelope = Envelope::from_points(&polygon).expect("non-empty polygon");
        Ok(Self {
            polygon,
            g: g.clamp(0.0, 1.0),
            envelope,
        })
    }

    pub fn contains_2d(&self, p: &Coordinate) -> bool {
        let mut inside = false;
        let n = self.polygon.len();
        let mut j = n - 1;
        for i in 0..n {
            let pi = &self.polygon[i];
            let pj = &self.polygon[j];
            if (pi.y > p.y) != (pj.y > p.y)
                && p.x < (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Accumulates scene elements, then freezes them into a [`Scene`].
#[derive(Debug, Default)]
pub struct SceneBuilder {
    buildings: Vec<Building>,
    ground_regions: Vec<GroundRegion>,
    terrain: Terrain,
}

impl SceneBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a building footprint. Malformed footprints are skipped
    /// with a warning and reported to the caller.
    pub fn add_building(
        &mut self,
        footprint: Vec<Coordinate>,
        roof_z: f64,
        alpha: Array1<f64>,
    ) -> Result<usize> {
        match Building::new(footprint, roof_z, alpha) {
            Ok(b) => {
                self.buildings.push(b);
                Ok(self.buildings.len() - 1)
            }
            Err(e) => {
                warn!("skipping building: {e}");
                Err(e)
            }
        }
    }

    /// Registers a ground absorption region.
    pub fn add_ground_region(&mut self, polygon: Vec<Coordinate>, g: f64) -> Result<usize> {
        match GroundRegion::new(polygon, g) {
            Ok(r) => {
                self.ground_regions.push(r);
                Ok(self.ground_regions.len() - 1)
            }
            Err(e) => {
                warn!("skipping ground region: {e}");
                Err(e)
            }
        }
    }

    pub fn set_terrain(&mut self, terrain: Terrain) {
        self.terrain = terrain;
    }

    /// Freezes the scene: derives the walls, builds the index trees and
    /// fixes the envelope.
    pub fn finish(self, mut envelope: Envelope) -> Scene {
        let mut walls = Vec::new();
        for (b_id, b) in self.buildings.iter().enumerate() {
            let ring = b.footprint();
            for i in 0..ring.len() {
                let p0 = ring[i];
                let p1 = ring[(i + 1) % ring.len()];
                walls.push(Wall {
                    p0: Coordinate::new(p0.x, p0.y, b.roof_z()),
                    p1: Coordinate::new(p1.x, p1.y, b.roof_z()),
                    top_z: b.roof_z(),
                    building: b_id,
                    alpha: b.alpha().clone(),
                });
            }
            envelope.expand_to_include(&Coordinate::new(
                b.envelope().min_x,
                b.envelope().min_y,
                0.0,
            ));
            envelope.expand_to_include(&Coordinate::new(
                b.envelope().max_x,
                b.envelope().max_y,
                0.0,
            ));
        }

        let building_tree = AabbTree::build(
            self.buildings
                .iter()
                .enumerate()
                .map(|(i, b)| (*b.envelope(), i))
                .collect(),
        );
        let wall_tree = AabbTree::build(
            walls
                .iter()
                .enumerate()
                .map(|(i, w)| (w.envelope(), i))
                .collect(),
        );
        let ground_tree = AabbTree::build(
            self.ground_regions
                .iter()
                .enumerate()
                .map(|(i, r)| (r.envelope, i))
                .collect(),
        );

        Scene {
            buildings: self.buildings,
            walls,
            ground_regions: self.ground_regions,
            terrain: self.terrain,
            building_tree,
            wall_tree,
            ground_tree,
            envelope,
        }
    }
}

/// Immutable scene shared by the workers.
#[derive(Debug)]
pub struct Scene {
    buildings: Vec<Building>,
    walls: Vec<Wall>,
    ground_regions: Vec<GroundRegion>,
    terrain: Terrain,
    building_tree: AabbTree,
    wall_tree: AabbTree,
    ground_tree: AabbTree,
    envelope: Envelope,
}

impl Scene {
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn buildings(&self) -> &[Building] {
        &self.buildings
    }

    pub fn building(&self, id: usize) -> &Building {
        &self.buildings[id]
    }

    pub fn building_roof_z(&self, id: usize) -> f64 {
        self.buildings[id].roof_z()
    }

    /// Every facade wall of the scene.
    pub fn processed_walls(&self) -> &[Wall] {
        &self.walls
    }

    pub fn wall(&self, id: usize) -> &Wall {
        &self.walls[id]
    }

    pub fn terrain(&self) -> &Terrain {
        &self.terrain
    }

    /// Terrain altitude under `p`, if the mesh covers it.
    pub fn height_at_position(&self, p: &Coordinate) -> Option<f64> {
        self.terrain.height_at(p)
    }

    /// Wide-angle corner candidates over all buildings.
    pub fn wide_angle_corners(&self, min_angle: f64, max_angle: f64) -> Vec<Coordinate> {
        self.buildings
            .iter()
            .flat_map(|b| b.wide_angle_corners(min_angle, max_angle))
            .collect()
    }

    /// Visits the buildings whose footprint touches the 2D segment
    /// `a -> b`, honoring the visitor's stop verdict.
    pub fn buildings_on_path(
        &self,
        a: &Coordinate,
        b: &Coordinate,
        visitor: &mut dyn FnMut(usize) -> Visit,
    ) -> Visit {
        let env = Envelope::of_segment(a, b);
        self.building_tree.query(&env, &mut |id| {
            if self.buildings[id].intersects_segment_2d(a, b) {
                visitor(id)
            } else {
                Visit::Continue
            }
        })
    }

    /// Walls within `radius` (2D) of a position.
    pub fn walls_in_range(&self, center: &Coordinate, radius: f64) -> Vec<usize> {
        self.walls_near_segment(center, center, radius)
    }

    /// Walls within `max_dist` (2D) of the segment `a -> b`.
    pub fn walls_near_segment(&self, a: &Coordinate, b: &Coordinate, max_dist: f64) -> Vec<usize> {
        let mut env = Envelope::of_segment(a, b);
        env.expand_by(max_dist);
        self.wall_tree
            .query_all(&env)
            .into_iter()
            .filter(|&w| {
                let wall = &self.walls[w];
                segment_segment_distance_2d(a, b, &wall.p0, &wall.p1) < max_dist
            })
            .collect()
    }

    /// Probes the scene along `a -> b` and returns the classified cut
    /// profile. `gs` is the ground factor attached at the source.
    pub fn get_profile(&self, a: &Coordinate, b: &Coordinate, gs: f64) -> CutProfile {
        let mut points = vec![CutPoint::source(*a, gs), CutPoint::receiver(*b)];
        let env = Envelope::of_segment(a, b);

        // Building wall crossings, z at the wall top.
        for w_id in self.wall_tree.query_all(&env) {
            let wall = &self.walls[w_id];
            if let Some((hit, t, u)) = segment_segment_intersect_2d(a, b, &wall.p0, &wall.p1) {
                if t <= 0.0 || t >= 1.0 {
                    continue;
                }
                let z = wall.p0.z + (wall.p1.z - wall.p0.z) * u;
                points.push(CutPoint::building_wall(
                    Coordinate::new(hit.x, hit.y, z),
                    t,
                    wall.building,
                    w_id,
                ));
            }
        }

        // Terrain edge crossings, z on the crossed edge.
        for (t, p) in self.terrain.edge_crossings(a, b) {
            points.push(CutPoint::topography(p, t));
        }

        // Ground-region boundary crossings with the factors of both sides.
        let mut ground_ts: Vec<f64> = Vec::new();
        for r_id in self.ground_tree.query_all(&env) {
            let region = &self.ground_regions[r_id];
            let n = region.polygon.len();
            for i in 0..n {
                let p0 = &region.polygon[i];
                let p1 = &region.polygon[(i + 1) % n];
                if let Some((_, t, _)) = segment_segment_intersect_2d(a, b, p0, p1) {
                    if t > 0.0 && t < 1.0 {
                        ground_ts.push(t);
                    }
                }
            }
        }
        ground_ts.sort_by(|l, r| l.partial_cmp(r).unwrap_or(std::cmp::Ordering::Equal));
        ground_ts.dedup_by(|l, r| (*l - *r).abs() < 1e-9);
        for (i, &t) in ground_ts.iter().enumerate() {
            let before_t = if i == 0 { 0.0 } else { ground_ts[i - 1] };
            let after_t = ground_ts.get(i + 1).copied().unwrap_or(1.0);
            let before = self.ground_factor_at(a, b, (before_t + t) / 2.0, gs);
            let after = self.ground_factor_at(a, b, (t + after_t) / 2.0, gs);
            let p = Coordinate::new(
                a.x + (b.x - a.x) * t,
                a.y + (b.y - a.y) * t,
                a.z + (b.z - a.z) * t,
            );
            points.push(CutPoint::ground_effect(p, t, before, after));
        }

        CutProfile::from_points(points)
    }

    /// Ground factor under the probe segment at fraction `t`: the most
    /// recently registered region containing the point, else the source
    /// default.
    fn ground_factor_at(&self, a: &Coordinate, b: &Coordinate, t: f64, gs: f64) -> f64 {
        let p = Coordinate::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t, 0.0);
        let env = Envelope::new(p.x, p.y, p.x, p.y);
        let mut g = gs;
        let mut best: Option<usize> = None;
        self.ground_tree.query(&env, &mut |id| {
            if self.ground_regions[id].contains_2d(&p) && best.map(|b_id| id > b_id).unwrap_or(true)
            {
                best = Some(id);
            }
            Visit::Continue
        });
        if let Some(id) = best {
            g = self.ground_regions[id].g;
        }
        g
    }

    /// Free-field test between two positions.
    pub fn is_free_field(&self, a: &Coordinate, b: &Coordinate) -> bool {
        self.get_profile(a, b, 0.0).is_free_field()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::CutKind;

    fn spectrum() -> Array1<f64> {
        Array1::from_elem(8, 0.1)
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Coordinate> {
        vec![
            Coordinate::new(x0, y0, 0.0),
            Coordinate::new(x1, y0, 0.0),
            Coordinate::new(x1, y1, 0.0),
            Coordinate::new(x0, y1, 0.0),
        ]
    }

    fn scene_with_building() -> Scene {
        let mut builder = SceneBuilder::new();
        builder
            .add_building(rect(4.0, -2.0, 8.0, 2.0), 10.0, spectrum())
            .unwrap();
        builder.finish(Envelope::new(-10.0, -10.0, 30.0, 10.0))
    }

    #[test]
    fn rejects_degenerate_footprint() {
        let mut builder = SceneBuilder::new();
        let err = builder
            .add_building(
                vec![Coordinate::new(0.0, 0.0, 0.0), Coordinate::new(1.0, 0.0, 0.0)],
                5.0,
                spectrum(),
            )
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn footprints_are_wound_with_exterior_on_the_left() {
        for reversed in [false, true] {
            let mut builder = SceneBuilder::new();
            let mut ring = rect(0.0, 0.0, 4.0, 4.0);
            if reversed {
                ring.reverse();
            }
            builder.add_building(ring, 5.0, spectrum()).unwrap();
            let scene = builder.finish(Envelope::new(-1.0, -1.0, 5.0, 5.0));
            for wall in scene.processed_walls() {
                let exterior = Coordinate::new(
                    (wall.p0.x + wall.p1.x) / 2.0 + wall.outward_normal()[0],
                    (wall.p0.y + wall.p1.y) / 2.0 + wall.outward_normal()[1],
                    0.0,
                );
                assert!(wall.is_outside(&exterior));
                assert!(!scene.building(0).contains_2d(&exterior));
            }
        }
    }

    #[test]
    fn profile_crosses_building_twice() {
        let scene = scene_with_building();
        let a = Coordinate::new(0.0, 0.0, 1.0);
        let b = Coordinate::new(12.0, 0.0, 1.0);
        let profile = scene.get_profile(&a, &b, 0.0);
        let walls: Vec<&CutPoint> = profile
            .points()
            .iter()
            .filter(|p| p.kind == CutKind::BuildingWall)
            .collect();
        assert_eq!(walls.len(), 2);
        for w in &walls {
            assert!((w.coordinate.z - 10.0).abs() < 1e-9);
            assert_eq!(w.building, Some(0));
        }
        assert!(!profile.is_free_field());
        assert!(scene.is_free_field(&a, &Coordinate::new(2.0, 0.0, 1.0)));
    }

    #[test]
    fn profile_orders_points_by_distance() {
        let scene = scene_with_building();
        let a = Coordinate::new(0.0, 0.0, 1.0);
        let b = Coordinate::new(12.0, 0.0, 1.0);
        let profile = scene.get_profile(&a, &b, 0.0);
        let ts: Vec<f64> = profile.points().iter().map(|p| p.t).collect();
        assert!(ts.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(profile.source().kind, CutKind::Source);
        assert_eq!(profile.receiver().kind, CutKind::Receiver);
    }

    #[test]
    fn ground_regions_classify_profile() {
        let mut builder = SceneBuilder::new();
        builder
            .add_ground_region(rect(5.0, -5.0, 10.0, 5.0), 1.0)
            .unwrap();
        let scene = builder.finish(Envelope::new(-1.0, -6.0, 20.0, 6.0));
        let a = Coordinate::new(0.0, 0.0, 0.5);
        let b = Coordinate::new(20.0, 0.0, 0.5);
        let profile = scene.get_profile(&a, &b, 0.0);
        let grounds: Vec<&CutPoint> = profile
            .points()
            .iter()
            .filter(|p| p.kind == CutKind::GroundEffect)
            .collect();
        assert_eq!(grounds.len(), 2);
        assert_eq!(grounds[0].ground_before, Some(0.0));
        assert_eq!(grounds[0].ground_after, Some(1.0));
        assert_eq!(grounds[1].ground_after, Some(0.0));
        // 5 m of G=0, 5 m of G=1, 10 m of G=0.
        assert!((profile.ground_mean_full() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn wide_angle_corners_of_rectangle() {
        let scene = scene_with_building();
        let corners = scene.building(0).wide_angle_corners(
            std::f64::consts::PI * (1.0 + 1.0 / 16.0),
            std::f64::consts::PI * (2.0 - 1.0 / 16.0),
        );
        // Every right-angle corner qualifies (outside angle = 3*PI/2).
        assert_eq!(corners.len(), 4);
        for c in &corners {
            assert!((c.z - 10.0).abs() < 1e-12);
            // Nudged outside the footprint.
            assert!(!scene.building(0).contains_2d(c));
        }
    }

    #[test]
    fn walls_near_segment_filters_by_distance() {
        let scene = scene_with_building();
        let a = Coordinate::new(0.0, 5.0, 1.0);
        let b = Coordinate::new(12.0, 5.0, 1.0);
        // South face at y = -2 is 7 m away, north face at y = 2 is 3 m away.
        let near = scene.walls_near_segment(&a, &b, 4.0);
        assert!(!near.is_empty());
        assert!(near.len() < scene.processed_walls().len());

        // Point query: only the west face sits within 2.5 m of (2, 0).
        let around = scene.walls_in_range(&Coordinate::new(2.0, 0.0, 1.0), 2.5);
        assert_eq!(around.len(), 1);
    }

    #[test]
    fn buildings_on_path_visits_and_stops() {
        let mut builder = SceneBuilder::new();
        builder
            .add_building(rect(2.0, -1.0, 4.0, 1.0), 5.0, spectrum())
            .unwrap();
        builder
            .add_building(rect(6.0, -1.0, 8.0, 1.0), 5.0, spectrum())
            .unwrap();
        let scene = builder.finish(Envelope::new(0.0, -5.0, 10.0, 5.0));
        let a = Coordinate::new(0.0, 0.0, 1.0);
        let b = Coordinate::new(10.0, 0.0, 1.0);
        let mut visited = Vec::new();
        scene.buildings_on_path(&a, &b, &mut |id| {
            visited.push(id);
            Visit::Continue
        });
        assert_eq!(visited.len(), 2);

        let mut first_only = 0;
        let verdict = scene.buildings_on_path(&a, &b, &mut |_| {
            first_only += 1;
            Visit::Stop
        });
        assert_eq!(verdict, Visit::Stop);
        assert_eq!(first_only, 1);
    }
}
