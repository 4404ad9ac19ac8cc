//! Image-receiver enumeration for the specular reflection search.
//!
//! Successive reflections of the receiver in a wall set form a tree
//! rooted at the true receiver. Nodes are kept in an arena with parent
//! indices; the depth of a node is the reflection order of its image.

use crate::geom::{cross_2d, project_on_line_2d, segment_segment_intersect_2d, Coordinate};
use crate::scene::Wall;

/// One image of the receiver, produced by mirroring its parent image
/// across `wall_id`.
#[derive(Debug, Clone)]
pub struct MirrorReceiver {
    /// Image position (z of the true receiver).
    pub position: Coordinate,
    /// Arena index of the parent image; `None` for first-order images.
    pub parent: Option<usize>,
    /// Wall that produced this image.
    pub wall_id: usize,
    /// Building owning that wall.
    pub building: usize,
    /// Reflection order of this image.
    pub depth: usize,
}

/// Arena of receiver images.
#[derive(Debug, Default)]
pub struct MirrorReceivers {
    nodes: Vec<MirrorReceiver>,
}

impl MirrorReceivers {
    pub fn nodes(&self) -> &[MirrorReceiver] {
        &self.nodes
    }

    pub fn node(&self, idx: usize) -> &MirrorReceiver {
        &self.nodes[idx]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Wall chain of a node, outermost mirror last.
    pub fn wall_chain(&self, idx: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut cursor = Some(idx);
        while let Some(i) = cursor {
            chain.push(self.nodes[i].wall_id);
            cursor = self.nodes[i].parent;
        }
        chain.reverse();
        chain
    }
}

/// True when `p` lies strictly on the outside of the oriented wall
/// segment `p0 -> p1` (building exterior on the left).
pub fn is_outside_segment(p0: &Coordinate, p1: &Coordinate, p: &Coordinate) -> bool {
    cross_2d(p0, p1, p) > 0.0
}

/// Facing test between two oriented wall segments: each must have at
/// least one endpoint in the outward half-plane of the other. Symmetric
/// by construction.
pub fn wall_wall_test(a0: &Coordinate, a1: &Coordinate, b0: &Coordinate, b1: &Coordinate) -> bool {
    (is_outside_segment(a0, a1, b0) || is_outside_segment(a0, a1, b1))
        && (is_outside_segment(b0, b1, a0) || is_outside_segment(b0, b1, a1))
}

/// Facing test on scene walls.
pub fn walls_face_each_other(a: &Wall, b: &Wall) -> bool {
    wall_wall_test(&a.p0, &a.p1, &b.p0, &b.p1)
}

/// Mirror of `p` across the supporting line of the wall, keeping z.
pub fn mirror_point(p: &Coordinate, wall: &Wall) -> Coordinate {
    let proj = project_on_line_2d(p, &wall.p0, &wall.p1);
    Coordinate::new(2.0 * proj.x - p.x, 2.0 * proj.y - p.y, p.z)
}

/// Enumerates receiver images across `wall_ids` up to `order`
/// reflections.
///
/// A wall can only mirror a point lying on its outside; first-order
/// images additionally require the 2D segment from the source to the
/// image to hit the finite wall, and deeper walls must face the wall of
/// the parent image. Images farther than `max_src_dist` from the source
/// prune their whole subtree.
pub fn enumerate_images(
    walls: &[Wall],
    wall_ids: &[usize],
    src: &Coordinate,
    rcv: &Coordinate,
    order: usize,
    max_src_dist: f64,
) -> MirrorReceivers {
    let mut arena = MirrorReceivers::default();
    if order == 0 {
        return arena;
    }

    for &w_id in wall_ids {
        let wall = &walls[w_id];
        if !is_outside_segment(&wall.p0, &wall.p1, rcv) {
            continue;
        }
        let image = mirror_point(rcv, wall);
        if src.distance_2d(&image) > max_src_dist {
            continue;
        }
        // Defensive first-order check: the source must actually see the
        // image through the finite wall segment.
        if segment_segment_intersect_2d(src, &image, &wall.p0, &wall.p1).is_none() {
            continue;
        }
        arena.nodes.push(MirrorReceiver {
            position: image,
            parent: None,
            wall_id: w_id,
            building: wall.building,
            depth: 1,
        });
    }

    let mut frontier: Vec<usize> = (0..arena.nodes.len()).collect();
    for depth in 2..=order {
        let mut next_frontier = Vec::new();
        for &node_idx in &frontier {
            let parent_pos = arena.nodes[node_idx].position;
            let parent_wall_id = arena.nodes[node_idx].wall_id;
            for &w_id in wall_ids {
                if w_id == parent_wall_id {
                    continue;
                }
                let wall = &walls[w_id];
                if !walls_face_each_other(wall, &walls[parent_wall_id]) {
                    continue;
                }
                if !is_outside_segment(&wall.p0, &wall.p1, &parent_pos) {
                    continue;
                }
                let image = mirror_point(&parent_pos, wall);
                if src.distance_2d(&image) > max_src_dist {
                    continue;
                }
                arena.nodes.push(MirrorReceiver {
                    position: image,
                    parent: Some(node_idx),
                    wall_id: w_id,
                    building: wall.building,
                    depth,
                });
                next_frontier.push(arena.nodes.len() - 1);
            }
        }
        frontier = next_frontier;
    }

    arena
}
