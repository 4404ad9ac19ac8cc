//! Per-pair path assembly: direct, diffracted and reflected paths for
//! one source/receiver couple.

use log::debug;

use crate::data::PropagationData;
use crate::geom::{
    interpolate_z, segment_segment_intersect_2d, Coordinate, REFLECTION_EPSILON, ROOF_EPSILON,
    Z_EPSILON,
};
use crate::mirror::enumerate_images;
use crate::path::{PointKind, PointPath, PropagationPath};
use crate::profile::{CutPoint, CutProfile};
use crate::roof::upper_hull;
use crate::sidehull::side_hulls;

/// Assembles the propagation paths of source/receiver pairs against one
/// immutable data set.
pub struct PathFinder<'a> {
    data: &'a PropagationData,
    favourable: bool,
}

impl<'a> PathFinder<'a> {
    pub fn new(data: &'a PropagationData) -> Self {
        Self {
            data,
            favourable: false,
        }
    }

    /// Labels every emitted path as computed under downward-refracting
    /// conditions. The label is carried, never inferred.
    pub fn with_favourable(mut self, favourable: bool) -> Self {
        self.favourable = favourable;
        self
    }

    /// All acoustically relevant paths for one pair, ids attached.
    pub fn source_receiver_paths(
        &self,
        src: &Coordinate,
        src_id: usize,
        rcv: &Coordinate,
        rcv_id: usize,
    ) -> Vec<PropagationPath> {
        let config = &self.data.config;
        if src.distance_3d(rcv) >= config.max_src_dist {
            return Vec::new();
        }
        let mut paths = self.direct_paths(src, rcv);
        if config.reflexion_order > 0 {
            paths.extend(self.reflection_paths(src, rcv));
        }
        paths.retain(|p| self.passes_z_window(p));
        for p in &mut paths {
            p.source_id = src_id;
            p.receiver_id = rcv_id;
        }
        paths
    }

    /// Direct path dispatch: free field, else over the roofs, else
    /// around the corners.
    fn direct_paths(&self, src: &Coordinate, rcv: &Coordinate) -> Vec<PropagationPath> {
        let config = &self.data.config;
        let profile = self.data.scene.get_profile(src, rcv, config.g_s);
        if profile.is_free_field() {
            let (points, grounds) = endpoint_waypoints(&profile);
            return vec![PropagationPath::from_points(
                self.favourable,
                points,
                &grounds,
            )];
        }
        if config.compute_vertical_diffraction {
            let (points, grounds) = self.hull_waypoints(&profile);
            return vec![PropagationPath::from_points(
                self.favourable,
                points,
                &grounds,
            )];
        }
        if config.compute_horizontal_diffraction && config.diffraction_order > 0 {
            return self.side_diffraction_paths(src, rcv);
        }
        Vec::new()
    }

    /// Waypoints of the upper convex hull of a blocked profile; reduces
    /// to the free-field endpoints when nothing pokes above the sight
    /// line.
    fn hull_waypoints(&self, profile: &CutProfile) -> (Vec<PointPath>, Vec<f64>) {
        let hull = upper_hull(profile);
        if hull.len() == 2 {
            return endpoint_waypoints(profile);
        }
        let mut points = Vec::with_capacity(hull.len());
        let mut grounds = Vec::with_capacity(hull.len() - 1);
        for (i, cut) in hull.iter().enumerate() {
            if i == 0 {
                points.push(PointPath::new(cut.coordinate, PointKind::Source));
            } else if i == hull.len() - 1 {
                points.push(PointPath::new(cut.coordinate, PointKind::Receiver));
            } else {
                points.push(self.roof_point(cut));
            }
            if i > 0 {
                grounds.push(profile.ground_mean(hull[i - 1].t, cut.t));
            }
        }
        (points, grounds)
    }

    /// Over-roof diffraction point, lifted off a footprint corner top.
    fn roof_point(&self, cut: &CutPoint) -> PointPath {
        let mut coordinate = cut.coordinate;
        if let Some(b_id) = cut.building {
            let building = self.data.scene.building(b_id);
            if building.footprint().iter().any(|v| v.equals_2d(&coordinate)) {
                coordinate.z = building.roof_z() + ROOF_EPSILON;
            }
            return PointPath::new(coordinate, PointKind::RoofDiffraction).with_building(b_id);
        }
        PointPath::new(coordinate, PointKind::RoofDiffraction)
    }

    /// Left and right vertical-edge diffraction paths.
    fn side_diffraction_paths(&self, src: &Coordinate, rcv: &Coordinate) -> Vec<PropagationPath> {
        let hulls = match side_hulls(&self.data.scene, src, rcv) {
            Ok(Some(hulls)) => hulls,
            Ok(None) => return Vec::new(),
            Err(e) => {
                debug!("side diffraction abandoned: {e}");
                return Vec::new();
            }
        };
        let mut out = Vec::new();
        for side in [hulls.left, hulls.right] {
            if side.is_empty() {
                continue;
            }
            let mut points = Vec::with_capacity(side.len());
            let mut grounds = Vec::with_capacity(side.len() - 1);
            for (i, corner) in side.iter().enumerate() {
                if i == 0 {
                    points.push(PointPath::new(corner.coordinate, PointKind::Source));
                } else if i == side.len() - 1 {
                    points.push(PointPath::new(corner.coordinate, PointKind::Receiver));
                } else {
                    let mut p = PointPath::new(corner.coordinate, PointKind::SideDiffraction);
                    if let Some(b_id) = corner.building {
                        p = p.with_building(b_id);
                    }
                    points.push(p);
                }
                if i > 0 {
                    let profile = self.data.scene.get_profile(
                        &side[i - 1].coordinate,
                        &corner.coordinate,
                        self.data.config.g_s,
                    );
                    grounds.push(profile.ground_mean_full());
                }
            }
            out.push(PropagationPath::from_points(
                self.favourable,
                points,
                &grounds,
            ));
        }
        out
    }

    /// Specular reflection search through mirror receivers.
    fn reflection_paths(&self, src: &Coordinate, rcv: &Coordinate) -> Vec<PropagationPath> {
        let scene = &self.data.scene;
        let config = &self.data.config;
        let wall_ids = scene.walls_near_segment(src, rcv, config.max_ref_dist);
        if wall_ids.is_empty() {
            return Vec::new();
        }
        let images = enumerate_images(
            scene.processed_walls(),
            &wall_ids,
            src,
            rcv,
            config.reflexion_order,
            config.max_src_dist,
        );

        let mut out = Vec::new();
        'image: for idx in 0..images.len() {
            // Walk the mirror chain back toward the source, collecting
            // one bounce per wall.
            let mut bounces: Vec<(Coordinate, usize)> = Vec::new();
            let mut destination = *src;
            let mut cursor = Some(idx);
            while let Some(i) = cursor {
                let node = images.node(i);
                let wall = scene.wall(node.wall_id);
                let Some((hit, _, u)) =
                    segment_segment_intersect_2d(&node.position, &destination, &wall.p0, &wall.p1)
                else {
                    continue 'image;
                };
                if u <= 1e-9 || u >= 1.0 - 1e-9 {
                    // Reflection point on a wall end: no specular bounce.
                    continue 'image;
                }
                if hit.z > wall.top_z + Z_EPSILON {
                    continue 'image;
                }
                if let Some(h) = scene.height_at_position(&hit) {
                    if hit.z < h - Z_EPSILON {
                        continue 'image;
                    }
                }
                if let Some(h) = scene.height_at_position(&destination) {
                    if destination.z < h - Z_EPSILON {
                        continue 'image;
                    }
                }
                // Nudge off the facade so later visibility probes do not
                // re-hit the generating wall.
                let n_out = wall.outward_normal();
                let bounce = Coordinate::new(
                    hit.x + n_out[0] * REFLECTION_EPSILON,
                    hit.y + n_out[1] * REFLECTION_EPSILON,
                    hit.z,
                );
                bounces.push((bounce, node.building));
                destination = bounce;
                cursor = node.parent;
            }
            if bounces.is_empty() {
                continue;
            }

            if let Some(path) = self.assemble_reflection(src, rcv, &bounces) {
                out.push(path);
            }
        }
        out
    }

    /// Concatenates direct-or-roof sub-paths between the bounces and
    /// re-checks every reflection point against its building.
    fn assemble_reflection(
        &self,
        src: &Coordinate,
        rcv: &Coordinate,
        bounces: &[(Coordinate, usize)],
    ) -> Option<PropagationPath> {
        let scene = &self.data.scene;
        let mut legs: Vec<Coordinate> = Vec::with_capacity(bounces.len() + 2);
        legs.push(*src);
        legs.extend(bounces.iter().map(|(c, _)| *c));
        legs.push(*rcv);

        let mut points: Vec<PointPath> = Vec::new();
        let mut grounds: Vec<f64> = Vec::new();
        for i in 0..legs.len() - 1 {
            let profile = scene.get_profile(&legs[i], &legs[i + 1], self.data.config.g_s);
            let (leg_pts, leg_grounds) = if profile.is_free_field() {
                endpoint_waypoints(&profile)
            } else {
                self.hull_waypoints(&profile)
            };
            let skip = usize::from(i > 0);
            let last = leg_pts.len() - 1;
            for (j, p) in leg_pts.into_iter().enumerate().skip(skip) {
                if j == last && i < legs.len() - 2 {
                    let (pos, b_id) = bounces[i];
                    points.push(
                        PointPath::new(pos, PointKind::Reflection)
                            .with_building(b_id)
                            .with_alpha(scene.building(b_id).alpha().clone()),
                    );
                } else {
                    points.push(p);
                }
            }
            grounds.extend(leg_grounds);
        }

        // A diffraction point may have offset the reflection altitude:
        // re-interpolate and re-check the z window.
        for i in 1..points.len() - 1 {
            if points[i].kind != PointKind::Reflection {
                continue;
            }
            let z = interpolate_z(
                &points[i].coordinate,
                &points[i - 1].coordinate,
                &points[i + 1].coordinate,
            );
            points[i].coordinate.z = z;
            let b_id = points[i].building.expect("reflection carries a building");
            if z > scene.building_roof_z(b_id) + Z_EPSILON {
                return None;
            }
            if let Some(h) = scene.height_at_position(&points[i].coordinate) {
                if z < h - Z_EPSILON {
                    return None;
                }
            }
        }
        if points.len() <= 2 {
            return None;
        }
        Some(PropagationPath::from_points(
            self.favourable,
            points,
            &grounds,
        ))
    }

    /// Final gate: no point above its building roof nor under terrain.
    fn passes_z_window(&self, path: &PropagationPath) -> bool {
        let scene = &self.data.scene;
        path.points.iter().all(|p| {
            let roof_ok = match (p.building, p.kind) {
                (Some(b_id), PointKind::Reflection) => {
                    p.coordinate.z <= scene.building_roof_z(b_id) + Z_EPSILON
                }
                (Some(b_id), _) => {
                    p.coordinate.z <= scene.building_roof_z(b_id) + 2.0 * ROOF_EPSILON
                }
                _ => true,
            };
            let terrain_ok = match scene.height_at_position(&p.coordinate) {
                Some(h) => p.coordinate.z >= h - Z_EPSILON,
                None => true,
            };
            roof_ok && terrain_ok
        })
    }
}

/// Source and receiver endpoints of a profile with the averaged ground
/// factor.
fn endpoint_waypoints(profile: &CutProfile) -> (Vec<PointPath>, Vec<f64>) {
    let points = vec![
        PointPath::new(profile.source().coordinate, PointKind::Source),
        PointPath::new(profile.receiver().coordinate, PointKind::Receiver),
    ];
    (points, vec![profile.ground_mean_full()])
}
