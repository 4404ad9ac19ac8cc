//! Propagation paths handed to the sink.

use ndarray::Array1;

use crate::geom::Coordinate;

/// Role of a path point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointKind {
    /// Emitting source.
    Source,
    /// Receiving point.
    Receiver,
    /// Specular reflection on a vertical facade.
    Reflection,
    /// Diffraction over a horizontal edge (rooftop or terrain ridge).
    RoofDiffraction,
    /// Diffraction around a vertical building edge.
    SideDiffraction,
}

/// One point of a propagation path.
#[derive(Debug, Clone)]
pub struct PointPath {
    pub coordinate: Coordinate,
    pub kind: PointKind,
    /// Building the point belongs to (reflections and corner
    /// diffractions).
    pub building: Option<usize>,
    /// Facade absorption spectrum for reflection points.
    pub alpha: Option<Array1<f64>>,
}

impl PointPath {
    pub fn new(coordinate: Coordinate, kind: PointKind) -> Self {
        Self {
            coordinate,
            kind,
            building: None,
            alpha: None,
        }
    }

    pub fn with_building(mut self, building: usize) -> Self {
        self.building = Some(building);
        self
    }

    pub fn with_alpha(mut self, alpha: Array1<f64>) -> Self {
        self.alpha = Some(alpha);
        self
    }
}

/// Segment between two consecutive path points.
#[derive(Debug, Clone)]
pub struct SegmentPath {
    /// Equivalent ground factor along the segment.
    pub ground_factor: f64,
    /// 3D direction vector from the segment origin to its end.
    pub vector: [f64; 3],
    /// Segment origin.
    pub origin: Coordinate,
}

impl SegmentPath {
    pub fn new(ground_factor: f64, origin: &Coordinate, end: &Coordinate) -> Self {
        Self {
            ground_factor,
            vector: origin.vector_to(end),
            origin: *origin,
        }
    }

    /// 3D length of the segment.
    pub fn length(&self) -> f64 {
        let [x, y, z] = self.vector;
        (x * x + y * y + z * z).sqrt()
    }
}

/// One acoustic path from a source to a receiver.
#[derive(Debug, Clone)]
pub struct PropagationPath {
    /// Downward-refraction label set by the caller, never inferred.
    pub favourable: bool,
    pub points: Vec<PointPath>,
    pub segments: Vec<SegmentPath>,
    pub source_id: usize,
    pub receiver_id: usize,
}

impl PropagationPath {
    /// Builds a path from its points, deriving one segment per
    /// consecutive pair with the supplied ground factors. `grounds` must
    /// hold `points.len() - 1` entries.
    pub fn from_points(favourable: bool, points: Vec<PointPath>, grounds: &[f64]) -> Self {
        debug_assert_eq!(grounds.len() + 1, points.len());
        let segments = points
            .windows(2)
            .zip(grounds)
            .map(|(pair, &g)| SegmentPath::new(g, &pair[0].coordinate, &pair[1].coordinate))
            .collect();
        Self {
            favourable,
            points,
            segments,
            source_id: 0,
            receiver_id: 0,
        }
    }

    /// Structural invariants: starts at a source point, ends at a
    /// receiver point, one segment per consecutive point pair.
    pub fn is_well_formed(&self) -> bool {
        self.points.len() >= 2
            && self.points.first().map(|p| p.kind) == Some(PointKind::Source)
            && self.points.last().map(|p| p.kind) == Some(PointKind::Receiver)
            && self.segments.len() == self.points.len() - 1
    }

    /// Total 3D length over all segments.
    pub fn length(&self) -> f64 {
        self.segments.iter().map(SegmentPath::length).sum()
    }

    /// Number of reflection points.
    pub fn reflection_count(&self) -> usize {
        self.points
            .iter()
            .filter(|p| p.kind == PointKind::Reflection)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_points_builds_segments() {
        let points = vec![
            PointPath::new(Coordinate::new(0.0, 0.0, 0.0), PointKind::Source),
            PointPath::new(Coordinate::new(3.0, 0.0, 4.0), PointKind::RoofDiffraction),
            PointPath::new(Coordinate::new(6.0, 0.0, 0.0), PointKind::Receiver),
        ];
        let path = PropagationPath::from_points(false, points, &[0.2, 0.8]);
        assert!(path.is_well_formed());
        assert_eq!(path.segments.len(), 2);
        assert!((path.length() - 10.0).abs() < 1e-12);
        assert!((path.segments[0].ground_factor - 0.2).abs() < 1e-12);
        assert_eq!(path.segments[0].vector, [3.0, 0.0, 4.0]);
    }

    #[test]
    fn malformed_without_receiver_end() {
        let points = vec![
            PointPath::new(Coordinate::new(0.0, 0.0, 0.0), PointKind::Source),
            PointPath::new(Coordinate::new(1.0, 0.0, 0.0), PointKind::Reflection),
        ];
        let path = PropagationPath::from_points(false, points, &[1.0]);
        assert!(!path.is_well_formed());
    }

    #[test]
    fn counts_reflections() {
        let points = vec![
            PointPath::new(Coordinate::new(0.0, 0.0, 0.0), PointKind::Source),
            PointPath::new(Coordinate::new(1.0, 1.0, 1.0), PointKind::Reflection).with_building(3),
            PointPath::new(Coordinate::new(2.0, 0.0, 0.0), PointKind::Receiver),
        ];
        let path = PropagationPath::from_points(true, points, &[1.0, 1.0]);
        assert_eq!(path.reflection_count(), 1);
        assert!(path.favourable);
    }
}
