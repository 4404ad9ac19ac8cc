//! Triangulated terrain with per-vertex altitude.
//!
//! The triangulation is supplied by the caller (vertex list, triangle
//! index triples and per-triangle neighbor ids); a convenience
//! constructor derives the neighbor links from shared edges. Altitude
//! queries interpolate barycentrically, and the profile builder walks
//! crossed triangle edges through the neighbor links.

use std::collections::{HashMap, HashSet};

use crate::error::{CityraysError, Result};
use crate::geom::{
    interpolate_z, segment_segment_intersect_2d, Coordinate, Envelope, COINCIDENCE_EPSILON,
    Z_EPSILON,
};
use crate::index::{AabbTree, Visit};

/// Triangulated terrain. Edge `i` of a triangle joins vertices `i` and
/// `(i + 1) % 3`; `neighbors[t][i]` is the triangle sharing that edge.
#[derive(Debug, Default)]
pub struct Terrain {
    vertices: Vec<Coordinate>,
    triangles: Vec<[usize; 3]>,
    neighbors: Vec<[Option<usize>; 3]>,
    tree: AabbTree,
}

impl Terrain {
    /// Builds a terrain from an externally computed triangulation.
    pub fn new(
        vertices: Vec<Coordinate>,
        triangles: Vec<[usize; 3]>,
        neighbors: Vec<[Option<usize>; 3]>,
    ) -> Result<Self> {
        if neighbors.len() != triangles.len() {
            return Err(CityraysError::InvalidGeometry {
                message: format!(
                    "terrain has {} triangles but {} neighbor records",
                    triangles.len(),
                    neighbors.len()
                ),
            });
        }
        for tri in &triangles {
            for &v in tri {
                if v >= vertices.len() {
                    return Err(CityraysError::InvalidGeometry {
                        message: format!("triangle vertex index {} out of bounds", v),
                    });
                }
            }
        }
        let items = triangles
            .iter()
            .enumerate()
            .map(|(i, tri)| {
                let env = Envelope::from_points(tri.iter().map(|&v| &vertices[v]))
                    .expect("triangle has three vertices");
                (env, i)
            })
            .collect();
        Ok(Self {
            vertices,
            triangles,
            neighbors,
            tree: AabbTree::build(items),
        })
    }

    /// Builds a terrain deriving neighbor links from shared edges.
    pub fn from_triangles(vertices: Vec<Coordinate>, triangles: Vec<[usize; 3]>) -> Result<Self> {
        let mut edge_owners: HashMap<(usize, usize), Vec<(usize, usize)>> = HashMap::new();
        for (t, tri) in triangles.iter().enumerate() {
            for e in 0..3 {
                let a = tri[e];
                let b = tri[(e + 1) % 3];
                edge_owners.entry((a.min(b), a.max(b))).or_default().push((t, e));
            }
        }
        let mut neighbors = vec![[None; 3]; triangles.len()];
        for owners in edge_owners.values() {
            if owners.len() == 2 {
                let (t0, e0) = owners[0];
                let (t1, e1) = owners[1];
                neighbors[t0][e0] = Some(t1);
                neighbors[t1][e1] = Some(t0);
            }
        }
        Self::new(vertices, triangles, neighbors)
    }

    /// Terrain with no triangles; altitude queries return `None`.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    fn corners(&self, tri: usize) -> [&Coordinate; 3] {
        let t = &self.triangles[tri];
        [&self.vertices[t[0]], &self.vertices[t[1]], &self.vertices[t[2]]]
    }

    /// Index of the triangle containing `p`, if any.
    pub fn locate(&self, p: &Coordinate) -> Option<usize> {
        let env = Envelope::new(p.x, p.y, p.x, p.y);
        let mut found = None;
        self.tree.query(&env, &mut |tri| {
            if self.triangle_contains(tri, p) {
                found = Some(tri);
                Visit::Stop
            } else {
                Visit::Continue
            }
        });
        found
    }

    fn triangle_contains(&self, tri: usize, p: &Coordinate) -> bool {
        let [a, b, c] = self.corners(tri);
        let sign = |p0: &Coordinate, p1: &Coordinate| {
            (p.x - p1.x) * (p0.y - p1.y) - (p0.x - p1.x) * (p.y - p1.y)
        };
        let d1 = sign(a, b);
        let d2 = sign(b, c);
        let d3 = sign(c, a);
        let has_neg = d1 < -COINCIDENCE_EPSILON || d2 < -COINCIDENCE_EPSILON || d3 < -COINCIDENCE_EPSILON;
        let has_pos = d1 > COINCIDENCE_EPSILON || d2 > COINCIDENCE_EPSILON || d3 > COINCIDENCE_EPSILON;
        !(has_neg && has_pos)
    }

    /// Barycentric altitude at `(p.x, p.y)`, `None` outside the mesh.
    pub fn height_at(&self, p: &Coordinate) -> Option<f64> {
        let tri = self.locate(p)?;
        let [a, b, c] = self.corners(tri);
        let det = (b.y - c.y) * (a.x - c.x) + (c.x - b.x) * (a.y - c.y);
        if det.abs() < COINCIDENCE_EPSILON {
            return Some(a.z);
        }
        let l1 = ((b.y - c.y) * (p.x - c.x) + (c.x - b.x) * (p.y - c.y)) / det;
        let l2 = ((c.y - a.y) * (p.x - c.x) + (a.x - c.x) * (p.y - c.y)) / det;
        let l3 = 1.0 - l1 - l2;
        Some(l1 * a.z + l2 * b.z + l3 * c.z)
    }

    /// Ordered list of `(t, point)` where the 2D segment `a -> b`
    /// crosses triangle edges; `t` is the fraction along `a -> b` and
    /// the point's z is interpolated on the crossed terrain edge.
    /// Crossings closer than [`COINCIDENCE_EPSILON`] are merged.
    pub fn edge_crossings(&self, a: &Coordinate, b: &Coordinate) -> Vec<(f64, Coordinate)> {
        if self.is_empty() || a.equals_2d(b) {
            return Vec::new();
        }
        let crossings = match self.locate(a) {
            Some(start) => self.walk_crossings(a, b, start),
            None => self.scan_crossings(a, b),
        };
        merge_crossings(crossings)
    }

    /// Neighbor-link walk from the triangle containing `a`. Falls back
    /// to a full scan if the walk stalls on a degenerate configuration
    /// before reaching `b`.
    fn walk_crossings(
        &self,
        a: &Coordinate,
        b: &Coordinate,
        start: usize,
    ) -> Vec<(f64, Coordinate)> {
        let mut out: Vec<(f64, Coordinate)> = Vec::new();
        let mut tri = start;
        let mut t_cur = 0.0f64;
        let mut came_from: Option<usize> = None;
        let mut visited: HashSet<usize> = HashSet::new();

        loop {
            if !visited.insert(tri) {
                // Walk revisited a triangle, typically grazing a vertex.
                return self.scan_crossings(a, b);
            }
            let corners = self.corners(tri);
            let mut exit: Option<(f64, Coordinate, usize)> = None;
            for e in 0..3 {
                if came_from.is_some() && self.neighbors[tri][e] == came_from {
                    continue;
                }
                let va = corners[e];
                let vb = corners[(e + 1) % 3];
                if let Some((_, t, u)) = segment_segment_intersect_2d(a, b, va, vb) {
                    if t <= t_cur + 1e-12 {
                        continue;
                    }
                    let point = Coordinate::new(
                        va.x + (vb.x - va.x) * u,
                        va.y + (vb.y - va.y) * u,
                        va.z + (vb.z - va.z) * u,
                    );
                    match exit {
                        Some((bt, _, _)) if bt <= t => {}
                        _ => exit = Some((t, point, e)),
                    }
                }
            }
            let Some((t, point, edge)) = exit else {
                // No forward crossing: b lies in this triangle.
                return out;
            };
            if t < 1.0 - 1e-12 {
                out.push((t, point));
            } else {
                return out;
            }
            match self.neighbors[tri][edge] {
                Some(next) => {
                    came_from = Some(tri);
                    tri = next;
                    t_cur = t;
                }
                None => {
                    // Left the mesh; pick up any remaining crossings by scan.
                    let mut rest: Vec<(f64, Coordinate)> = self
                        .scan_crossings(a, b)
                        .into_iter()
                        .filter(|(ts, _)| *ts > t + 1e-12)
                        .collect();
                    out.append(&mut rest);
                    return out;
                }
            }
        }
    }

    /// Brute scan of edges near the segment, deduplicated by edge key.
    fn scan_crossings(&self, a: &Coordinate, b: &Coordinate) -> Vec<(f64, Coordinate)> {
        let env = Envelope::of_segment(a, b);
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut out: Vec<(f64, Coordinate)> = Vec::new();
        for tri in self.tree.query_all(&env) {
            let t = &self.triangles[tri];
            for e in 0..3 {
                let i = t[e];
                let j = t[(e + 1) % 3];
                if !seen.insert((i.min(j), i.max(j))) {
                    continue;
                }
                let va = &self.vertices[i];
                let vb = &self.vertices[j];
                if let Some((_, tf, u)) = segment_segment_intersect_2d(a, b, va, vb) {
                    if tf > 1e-12 && tf < 1.0 - 1e-12 {
                        let point = Coordinate::new(
                            va.x + (vb.x - va.x) * u,
                            va.y + (vb.y - va.y) * u,
                            va.z + (vb.z - va.z) * u,
                        );
                        out.push((tf, point));
                    }
                }
            }
        }
        out.sort_by(|l, r| l.0.partial_cmp(&r.0).unwrap_or(std::cmp::Ordering::Equal));
        out
    }

    /// True when every terrain crossing between `a` and `b` stays at or
    /// below the straight sight line.
    pub fn clears_sight_line(&self, a: &Coordinate, b: &Coordinate) -> bool {
        self.edge_crossings(a, b)
            .iter()
            .all(|(_, p)| p.z <= interpolate_z(p, a, b) + Z_EPSILON)
    }
}

/// Merges crossings closer than the 2D coincidence tolerance.
fn merge_crossings(mut crossings: Vec<(f64, Coordinate)>) -> Vec<(f64, Coordinate)> {
    crossings.sort_by(|l, r| l.0.partial_cmp(&r.0).unwrap_or(std::cmp::Ordering::Equal));
    let mut out: Vec<(f64, Coordinate)> = Vec::with_capacity(crossings.len());
    for (t, p) in crossings {
        if let Some((_, last)) = out.last() {
            if last.equals_2d(&p) {
                continue;
            }
        }
        out.push((t, p));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat 20x20 quad at z = 0, split on the (0,0)-(20,20) diagonal.
    fn flat_quad() -> Terrain {
        let vertices = vec![
            Coordinate::new(0.0, 0.0, 0.0),
            Coordinate::new(20.0, 0.0, 0.0),
            Coordinate::new(20.0, 20.0, 0.0),
            Coordinate::new(0.0, 20.0, 0.0),
        ];
        let triangles = vec![[0, 1, 2], [0, 2, 3]];
        Terrain::from_triangles(vertices, triangles).unwrap()
    }

    #[test]
    fn derives_neighbors_from_shared_edges() {
        let terrain = flat_quad();
        // The two triangles share the diagonal edge.
        assert_eq!(terrain.neighbors[0].iter().flatten().count(), 1);
        assert_eq!(terrain.neighbors[1].iter().flatten().count(), 1);
    }

    #[test]
    fn height_inside_and_outside() {
        let terrain = flat_quad();
        let h = terrain.height_at(&Coordinate::new(5.0, 5.0, 0.0)).unwrap();
        assert!(h.abs() < 1e-12);
        assert!(terrain.height_at(&Coordinate::new(50.0, 5.0, 0.0)).is_none());
    }

    #[test]
    fn ridge_altitude_is_interpolated() {
        // Tilted quad: east edge raised to 10 m.
        let vertices = vec![
            Coordinate::new(0.0, 0.0, 0.0),
            Coordinate::new(20.0, 0.0, 10.0),
            Coordinate::new(20.0, 20.0, 10.0),
            Coordinate::new(0.0, 20.0, 0.0),
        ];
        let terrain = Terrain::from_triangles(vertices, vec![[0, 1, 2], [0, 2, 3]]).unwrap();
        let h = terrain.height_at(&Coordinate::new(10.0, 10.0, 0.0)).unwrap();
        assert!((h - 5.0).abs() < 1e-9);
    }

    #[test]
    fn walk_crosses_diagonal_once() {
        let terrain = flat_quad();
        let a = Coordinate::new(2.0, 10.0, 1.0);
        let b = Coordinate::new(18.0, 10.0, 1.0);
        let crossings = terrain.edge_crossings(&a, &b);
        assert_eq!(crossings.len(), 1);
        let (t, p) = crossings[0];
        assert!((p.x - 10.0).abs() < 1e-9);
        assert!((p.y - 10.0).abs() < 1e-9);
        assert!((t - 0.5).abs() < 1e-9);
    }

    #[test]
    fn clears_sight_line_over_flat_ground() {
        let terrain = flat_quad();
        let a = Coordinate::new(1.0, 1.0, 0.5);
        let b = Coordinate::new(19.0, 19.0, 0.5);
        assert!(terrain.clears_sight_line(&a, &b));
    }

    #[test]
    fn blocked_by_ridge() {
        // Tent: ridge at y = 10 raised to 5 m.
        let vertices = vec![
            Coordinate::new(0.0, 0.0, 0.0),
            Coordinate::new(20.0, 0.0, 0.0),
            Coordinate::new(20.0, 10.0, 5.0),
            Coordinate::new(0.0, 10.0, 5.0),
            Coordinate::new(20.0, 20.0, 0.0),
            Coordinate::new(0.0, 20.0, 0.0),
        ];
        let triangles = vec![[0, 1, 2], [0, 2, 3], [3, 2, 4], [3, 4, 5]];
        let terrain = Terrain::from_triangles(vertices, triangles).unwrap();
        let a = Coordinate::new(10.0, 1.0, 1.0);
        let b = Coordinate::new(10.0, 19.0, 1.0);
        assert!(!terrain.clears_sight_line(&a, &b));
        let crossings = terrain.edge_crossings(&a, &b);
        assert!(crossings.iter().any(|(_, p)| (p.z - 5.0).abs() < 1e-9));
    }
}
