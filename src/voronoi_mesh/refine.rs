use glam::DVec2;

use super::VoronoiMesh;
use crate::{
    edge::Edge,
    errors::{TessResult, TessellationError},
    geometry::{clip_segment_convex, clip_segment_half_plane, point_in_convex_polygon},
    ghost::{GhostRecord, GhostTransform},
};

impl VoronoiMesh {
    /// Split cells in place, without rebuilding the tessellation.
    ///
    /// For every cell a new generator is placed at `alpha` cell widths from the
    /// old one (`refine_alpha` of the mesh config when `None`), along
    /// `directions` when given and towards the farthest vertex of the cell
    /// otherwise. The new cells get the indices `n..n + cells.len()` in
    /// the order of `cells`; ghost indices move up accordingly.
    pub fn refine_cells(
        &mut self,
        cells: &[usize],
        directions: Option<&[DVec2]>,
        alpha: Option<f64>,
    ) -> TessResult<()> {
        if cells.is_empty() {
            return Ok(());
        }
        let alpha = alpha.unwrap_or(self.config.refine_alpha);
        let n = self.point_count();
        if let Some(directions) = directions {
            if directions.len() != cells.len() {
                return Err(TessellationError::topology(
                    cells[0],
                    format!(
                        "{} split directions given for {} cells",
                        directions.len(),
                        cells.len()
                    ),
                ));
            }
        }
        let mut sorted = cells.to_vec();
        sorted.sort_unstable();
        if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(TessellationError::topology(w[0], "cell refined twice"));
        }

        let mut new_points = Vec::with_capacity(cells.len());
        for (t, &cell) in cells.iter().enumerate() {
            if cell >= n {
                return Err(TessellationError::topology(cell, "only real cells can be refined"));
            }
            let center = self.mesh_point(cell);
            let slope = match directions {
                Some(directions) => directions[t].normalize_or_zero(),
                None => self
                    .cell_polygon(cell)
                    .into_iter()
                    .max_by(|a, b| a.distance(center).total_cmp(&b.distance(center)))
                    .map_or(DVec2::ZERO, |v| (v - center).normalize_or_zero()),
            };
            if slope == DVec2::ZERO {
                return Err(TessellationError::geometry(
                    "no direction to split the cell along",
                    vec![cell],
                    vec![center],
                ));
            }
            new_points.push(center + alpha * self.width(cell) * slope);
        }

        self.insert_real_points(&new_points);
        for (t, &cell) in cells.iter().enumerate() {
            self.split_cell(cell, n + t)?;
        }
        log::info!("Refined {} cells", cells.len());
        Ok(())
    }

    /// Insert new generators at the end of the real range, shifting the
    /// seeding triangle and the ghosts.
    fn insert_real_points(&mut self, new_points: &[DVec2]) {
        let n = self.point_count();
        let m = new_points.len();
        let mut points = self.tri.points().to_vec();
        points.splice(n..n, new_points.iter().copied());
        self.tri.replace_points(points, n + m);
        for edge in self.edges.iter_mut() {
            edge.remap_neighbors(|i| Some(if i >= n { i + m } else { i }));
        }
        self.ghosts.set_first(self.ghosts.first() + m);
        self.cell_edges.resize(n + m, vec![]);
        self.volumes.resize(n + m, 0.);
        self.centroids.resize(n + m, DVec2::ZERO);
    }

    /// Split cell `p` between its generator and the new generator `q`.
    fn split_cell(&mut self, p: usize, q: usize) -> TessResult<()> {
        let center_p = self.mesh_point(p);
        let center_q = self.mesh_point(q);
        let polygon = self.cell_polygon(p);
        if !point_in_convex_polygon(&polygon, center_q) {
            return Err(TessellationError::geometry(
                "refined point outside of its parent cell",
                vec![p, q],
                vec![center_p, center_q],
            ));
        }
        let width = self.width(p);
        let min_length = self.config.edge_eps * width;
        let normal = center_q - center_p;
        let mid = 0.5 * (center_p + center_q);
        let clip = |segment: [DVec2; 2], normal: DVec2| {
            clip_segment_half_plane(segment, mid, normal)
                .filter(|s| s[0].distance(s[1]) > min_length)
        };

        let mut touched = vec![p, q];
        let mut p_edges = vec![];
        let mut q_edges = vec![];
        for e in self.cell_edges[p].clone() {
            let edge = self.edges[e];
            let neighbor = edge.other(p);
            let part_p = clip(edge.vertices, normal);
            let part_q = clip(edge.vertices, -normal);
            match (part_p, part_q) {
                (_, None) => {
                    if let Some(part_p) = part_p {
                        self.edges[e].vertices = part_p;
                    }
                    p_edges.push(e);
                }
                (None, Some(_)) => {
                    self.edges[e].replace_neighbor(Some(p), Some(q));
                    q_edges.push(e);
                }
                (Some(part_p), Some(part_q)) => {
                    self.edges[e].vertices = part_p;
                    p_edges.push(e);
                    let split = self.edges.len();
                    self.edges.push(Edge::new(part_q, [Some(q), neighbor]));
                    q_edges.push(split);
                    if let Some(k) = neighbor.filter(|k| *k < self.point_count()) {
                        self.cell_edges[k].push(split);
                        touched.push(k);
                    }
                }
            }
            if let Some(k) = neighbor {
                if let Some(origin) = self.patch_periodic_twin(k, edge.vertices, p, q, part_p, part_q)? {
                    touched.push(origin);
                }
            }
        }

        let direction = normal.perp().normalize_or_zero() * 20. * width;
        let bisector = clip_segment_convex([mid - direction, mid + direction], &polygon, 0.)
            .filter(|s| s[0].distance(s[1]) > min_length)
            .ok_or_else(|| {
                TessellationError::geometry(
                    "degenerate splitting edge",
                    vec![p, q],
                    vec![center_p, center_q],
                )
            })?;
        let split = self.edges.len();
        self.edges.push(Edge::new(bisector, [Some(p), Some(q)]));
        p_edges.push(split);
        q_edges.push(split);

        self.cell_edges[p] = p_edges;
        self.cell_edges[q] = q_edges;
        touched.sort_unstable();
        touched.dedup();
        self.measure_cells(&touched);
        Ok(())
    }

    /// Mirror a split of an edge shared with a periodic image onto the copy of
    /// that edge seen from the image's origin. Returns the origin if it changed.
    fn patch_periodic_twin(
        &mut self,
        ghost: usize,
        vertices: [DVec2; 2],
        p: usize,
        q: usize,
        part_p: Option<[DVec2; 2]>,
        part_q: Option<[DVec2; 2]>,
    ) -> TessResult<Option<usize>> {
        if part_q.is_none() && part_p == Some(vertices) {
            return Ok(None);
        }
        let Some(record) = self.ghosts.get(ghost).copied() else {
            return Ok(None);
        };
        let (true, GhostTransform::Translate(period)) = (record.is_local(), record.transform) else {
            return Ok(None);
        };
        let origin = record.origin;
        if origin == p {
            return Ok(None);
        }
        let shift = self.boundary.periodic_shift(period);
        let twin_vertices = vertices.map(|v| v - shift);
        let tolerance = self.config.intersection_eps * self.boundary.width().max_element();
        let twin = self.cell_edges[origin]
            .iter()
            .copied()
            .find(|f| {
                let edge = &self.edges[*f];
                edge.other(origin)
                    .map_or(false, |k| self.is_ghost(k) && self.original_index(k) == p)
                    && edge.matches(twin_vertices, tolerance)
            })
            .ok_or_else(|| {
                TessellationError::topology(origin, format!("no periodic copy of the edge with cell {p}"))
            })?;
        let p_image = self.edges[twin].other(origin);
        let shifted = |segment: [DVec2; 2]| segment.map(|v| v - shift);
        match (part_p, part_q) {
            (Some(part_p), None) => self.edges[twin].vertices = shifted(part_p),
            (None, Some(_)) => {
                let q_image = self.find_or_create_ghost(GhostRecord::local(q, GhostTransform::Translate(-period)));
                self.edges[twin].replace_neighbor(p_image, Some(q_image));
            }
            (Some(part_p), Some(part_q)) => {
                let q_image = self.find_or_create_ghost(GhostRecord::local(q, GhostTransform::Translate(-period)));
                self.edges[twin].vertices = shifted(part_p);
                let split = self.edges.len();
                self.edges
                    .push(Edge::new(shifted(part_q), [Some(origin), Some(q_image)]));
                self.cell_edges[origin].push(split);
            }
            (None, None) => return Ok(None),
        }
        Ok(Some(origin))
    }
}
