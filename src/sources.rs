//! Noise sources and their per-receiver discretization.
//!
//! Line sources are split into equivalent point sources whose spacing
//! adapts to the receiver distance; every point gets a weight equal to
//! its maximal power scaled by geometric divergence, so the receiver
//! loop can visit sources in descending contribution order and stop
//! early.

use ndarray::Array1;

use crate::config::Config;
use crate::error::{CityraysError, Result};
use crate::geom::{Coordinate, Envelope};

/// Supported source geometries.
#[derive(Debug, Clone)]
pub enum SourceGeometry {
    Point(Coordinate),
    LineString(Vec<Coordinate>),
    MultiLineString(Vec<Vec<Coordinate>>),
}

impl SourceGeometry {
    pub fn validate(&self) -> Result<()> {
        let check_line = |line: &[Coordinate]| -> Result<()> {
            if line.len() < 2 {
                return Err(CityraysError::InvalidGeometry {
                    message: format!("line source with {} points", line.len()),
                });
            }
            Ok(())
        };
        match self {
            SourceGeometry::Point(_) => Ok(()),
            SourceGeometry::LineString(line) => check_line(line),
            SourceGeometry::MultiLineString(lines) => {
                if lines.is_empty() {
                    return Err(CityraysError::InvalidGeometry {
                        message: "empty multi-line source".into(),
                    });
                }
                lines.iter().try_for_each(|l| check_line(l))
            }
        }
    }

    pub fn envelope(&self) -> Option<Envelope> {
        match self {
            SourceGeometry::Point(p) => Some(Envelope::new(p.x, p.y, p.x, p.y)),
            SourceGeometry::LineString(line) => Envelope::from_points(line),
            SourceGeometry::MultiLineString(lines) => {
                Envelope::from_points(lines.iter().flatten())
            }
        }
    }
}

/// A registered noise source with its maximal per-band power (W).
#[derive(Debug, Clone)]
pub struct NoiseSource {
    pub geometry: SourceGeometry,
    pub power: Array1<f64>,
}

/// dB to power ratio.
pub fn dba_to_w(dba: f64) -> f64 {
    10.0_f64.powf(dba / 10.0)
}

/// Power ratio to dB.
pub fn w_to_dba(w: f64) -> f64 {
    10.0 * w.log10()
}

/// Spherical divergence attenuation at distance `d` (dB).
pub fn divergence_attenuation(d: f64) -> f64 {
    20.0 * d.max(1.0).log10() + 11.0
}

/// An equivalent point source to visit for one receiver.
#[derive(Debug, Clone)]
pub struct SourcePointInfo {
    pub position: Coordinate,
    pub source_id: usize,
    /// Sound power scaling per meter of line length (1 for points).
    pub li: f64,
    /// Per-band maximal received power, divergence applied.
    pub received: Array1<f64>,
    /// Sum of `received`, used for ordering and early stopping.
    pub global: f64,
}

impl SourcePointInfo {
    fn new(receiver: &Coordinate, position: Coordinate, power: &Array1<f64>, li: f64, source_id: usize) -> Self {
        let dist = receiver.distance_3d(&position);
        let spread = dba_to_w(-divergence_attenuation(dist)) * dba_to_w(3.0);
        let received = power.mapv(|w| w * li * spread);
        let global = received.sum();
        Self {
            position,
            source_id,
            li,
            received,
            global,
        }
    }
}

/// Nearest point of a polyline to `from`, with interpolated altitude,
/// and its 3D distance.
fn nearest_point_on_line(from: &Coordinate, line: &[Coordinate]) -> Option<(Coordinate, f64)> {
    let mut best: Option<(Coordinate, f64)> = None;
    for seg in line.windows(2) {
        let f = crate::geom::segment_fraction(from, &seg[0], &seg[1]);
        let p = Coordinate::new(
            seg[0].x + (seg[1].x - seg[0].x) * f,
            seg[0].y + (seg[1].y - seg[0].y) * f,
            seg[0].z + (seg[1].z - seg[0].z) * f,
        );
        let d = from.distance_3d(&p);
        if best.map(|(_, bd)| d < bd).unwrap_or(true) {
            best = Some((p, d));
        }
    }
    best
}

/// Point at curvilinear distance `s` along a polyline.
fn point_along_line(line: &[Coordinate], s: f64) -> Coordinate {
    let mut remaining = s;
    for seg in line.windows(2) {
        let len = seg[0].distance_3d(&seg[1]);
        if remaining <= len || len <= 0.0 {
            let f = if len > 0.0 { remaining / len } else { 0.0 };
            return Coordinate::new(
                seg[0].x + (seg[1].x - seg[0].x) * f,
                seg[0].y + (seg[1].y - seg[0].y) * f,
                seg[0].z + (seg[1].z - seg[0].z) * f,
            );
        }
        remaining -= len;
    }
    *line.last().expect("polyline has points")
}

/// Splits a line source into equivalent points for one receiver.
///
/// The spacing adapts to the receiver: `delta = max(1, d_rcv / 2)` with
/// `d_rcv` the 3D distance to the nearest line point, clamped below by
/// `min_rec_dist`. The projected nearest point is emitted first; the
/// returned `li` is the mean inter-point spacing.
fn split_line_source(
    receiver: &Coordinate,
    line: &[Coordinate],
    min_rec_dist: f64,
) -> Option<(f64, Vec<Coordinate>)> {
    let (closest, mut d_rcv) = nearest_point_on_line(receiver, line)?;
    if d_rcv < min_rec_dist {
        d_rcv = min_rec_dist;
    }
    let delta = (d_rcv / 2.0).max(1.0);

    let total: f64 = line.windows(2).map(|s| s[0].distance_3d(&s[1])).sum();
    if total <= 0.0 {
        return Some((1.0, vec![closest]));
    }
    let count = (total / delta).ceil().max(1.0);
    let li = (total / count).min(total);

    let mut points = vec![closest];
    for i in 0..count as usize {
        let p = point_along_line(line, (i as f64 + 0.5) * li);
        if p.distance_3d(&closest) > li {
            points.push(p);
        }
    }
    Some((li, points))
}

/// Collects the equivalent point sources for one receiver, ordered by
/// descending contribution. Returns the list and the total received
/// power bound.
pub fn collect_source_points(
    sources: &[NoiseSource],
    in_range_ids: &[usize],
    receiver: &Coordinate,
    config: &Config,
) -> (Vec<SourcePointInfo>, f64) {
    let mut list: Vec<SourcePointInfo> = Vec::new();
    for &src_id in in_range_ids {
        let source = &sources[src_id];
        match &source.geometry {
            SourceGeometry::Point(p) => {
                if p.distance_3d(receiver) < config.max_src_dist {
                    list.push(SourcePointInfo::new(receiver, *p, &source.power, 1.0, src_id));
                }
            }
            SourceGeometry::LineString(line) => {
                add_line_points(receiver, line, source, src_id, config, &mut list);
            }
            SourceGeometry::MultiLineString(lines) => {
                for line in lines {
                    add_line_points(receiver, line, source, src_id, config, &mut list);
                }
            }
        }
    }
    list.sort_by(|a, b| {
        b.global
            .partial_cmp(&a.global)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.source_id.cmp(&b.source_id))
    });
    let total = list.iter().map(|s| s.global).sum();
    (list, total)
}

fn add_line_points(
    receiver: &Coordinate,
    line: &[Coordinate],
    source: &NoiseSource,
    src_id: usize,
    config: &Config,
    list: &mut Vec<SourcePointInfo>,
) {
    if let Some((li, points)) = split_line_source(receiver, line, config.min_rec_dist) {
        for p in points {
            if p.distance_3d(receiver) < config.max_src_dist {
                list.push(SourcePointInfo::new(receiver, p, &source.power, li, src_id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::default()
    }

    fn flat_power() -> Array1<f64> {
        Array1::from_elem(8, 1.0e-3)
    }

    #[test]
    fn db_power_round_trip() {
        assert!((w_to_dba(dba_to_w(63.2)) - 63.2).abs() < 1e-9);
        assert!((divergence_attenuation(1.0) - 11.0).abs() < 1e-12);
        assert!((divergence_attenuation(10.0) - 31.0).abs() < 1e-12);
    }

    #[test]
    fn point_source_weighting_decays_with_distance() {
        let sources = vec![
            NoiseSource {
                geometry: SourceGeometry::Point(Coordinate::new(10.0, 0.0, 0.05)),
                power: flat_power(),
            },
            NoiseSource {
                geometry: SourceGeometry::Point(Coordinate::new(100.0, 0.0, 0.05)),
                power: flat_power(),
            },
        ];
        let rcv = Coordinate::new(0.0, 0.0, 4.0);
        let (list, total) = collect_source_points(&sources, &[0, 1], &rcv, &config());
        assert_eq!(list.len(), 2);
        // Closest source first.
        assert_eq!(list[0].source_id, 0);
        assert!(list[0].global > list[1].global);
        assert!((total - (list[0].global + list[1].global)).abs() < 1e-18);
    }

    #[test]
    fn line_source_splits_with_nearest_point_first() {
        let line = vec![
            Coordinate::new(-50.0, 10.0, 0.5),
            Coordinate::new(50.0, 10.0, 0.5),
        ];
        let rcv = Coordinate::new(0.0, 0.0, 1.5);
        let (li, points) = split_line_source(&rcv, &line, 1.0).unwrap();
        // First point is the orthogonal projection.
        assert!(points[0].x.abs() < 1e-9);
        assert!((points[0].y - 10.0).abs() < 1e-9);
        // Spacing honors delta <= max(1, d/2).
        let d = rcv.distance_3d(&points[0]);
        assert!(li <= (d / 2.0).max(1.0) + 1e-9);
        assert!(points.len() > 2);
    }

    #[test]
    fn near_line_uses_min_rec_dist_clamp() {
        let line = vec![
            Coordinate::new(-10.0, 0.1, 0.5),
            Coordinate::new(10.0, 0.1, 0.5),
        ];
        let rcv = Coordinate::new(0.0, 0.0, 0.5);
        let (li, _) = split_line_source(&rcv, &line, 2.0).unwrap();
        // d_rcv clamps to 2.0, so the spacing stays at 1 m.
        assert!((li - 1.0).abs() < 0.05);
    }

    #[test]
    fn multi_line_contributes_all_parts() {
        let sources = vec![NoiseSource {
            geometry: SourceGeometry::MultiLineString(vec![
                vec![
                    Coordinate::new(-20.0, 5.0, 0.5),
                    Coordinate::new(20.0, 5.0, 0.5),
                ],
                vec![
                    Coordinate::new(-20.0, -5.0, 0.5),
                    Coordinate::new(20.0, -5.0, 0.5),
                ],
            ]),
            power: flat_power(),
        }];
        let rcv = Coordinate::new(0.0, 0.0, 1.5);
        let (list, _) = collect_source_points(&sources, &[0], &rcv, &config());
        assert!(list.iter().any(|s| s.position.y > 0.0));
        assert!(list.iter().any(|s| s.position.y < 0.0));
    }

    #[test]
    fn geometry_validation() {
        assert!(SourceGeometry::Point(Coordinate::new(0.0, 0.0, 0.0))
            .validate()
            .is_ok());
        assert!(SourceGeometry::LineString(vec![Coordinate::new(0.0, 0.0, 0.0)])
            .validate()
            .is_err());
        assert!(SourceGeometry::MultiLineString(vec![]).validate().is_err());
    }
}
