use glam::DVec2;

/// A face of the Voronoi diagram.
///
/// `neighbors` holds the mesh point indices of the two cells sharing the edge.
/// `None` marks a reflecting wall; indices beyond the real point count refer to
/// ghost points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub vertices: [DVec2; 2],
    pub neighbors: [Option<usize>; 2],
}

impl Edge {
    pub fn new(vertices: [DVec2; 2], neighbors: [Option<usize>; 2]) -> Self {
        Self {
            vertices,
            neighbors,
        }
    }

    pub fn length(&self) -> f64 {
        self.vertices[0].distance(self.vertices[1])
    }

    pub fn midpoint(&self) -> DVec2 {
        0.5 * (self.vertices[0] + self.vertices[1])
    }

    /// The neighbor on the other side of the edge as seen from `cell`.
    pub fn other(&self, cell: usize) -> Option<usize> {
        if self.neighbors[0] == Some(cell) {
            self.neighbors[1]
        } else {
            self.neighbors[0]
        }
    }

    pub(crate) fn replace_neighbor(&mut self, old: Option<usize>, new: Option<usize>) {
        if let Some(slot) = self.neighbors.iter_mut().find(|n| **n == old) {
            *slot = new;
        }
    }

    pub(crate) fn remap_neighbors(&mut self, mut remap: impl FnMut(usize) -> Option<usize>) {
        for neighbor in self.neighbors.iter_mut() {
            *neighbor = neighbor.and_then(&mut remap);
        }
    }

    /// The vertices ordered counter-clockwise as seen from `center`.
    pub fn ccw_vertices(&self, center: DVec2) -> [DVec2; 2] {
        let [a, b] = self.vertices;
        if (a - center).perp_dot(b - center) >= 0. {
            [a, b]
        } else {
            [b, a]
        }
    }

    /// Whether the edge has the same end points as `vertices` (in either order) up to `tolerance`.
    pub(crate) fn matches(&self, vertices: [DVec2; 2], tolerance: f64) -> bool {
        let [a, b] = self.vertices;
        (a.distance(vertices[0]) <= tolerance && b.distance(vertices[1]) <= tolerance)
            || (a.distance(vertices[1]) <= tolerance && b.distance(vertices[0]) <= tolerance)
    }
}
