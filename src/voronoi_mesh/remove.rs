use glam::{DVec2, IVec2};

use super::{circumcenter, VoronoiMesh};
use crate::{
    delaunay::Delaunay,
    edge::Edge,
    errors::{TessResult, TessellationError},
    geometry::{clip_segment_convex, clip_segment_half_plane, distance_to_segment, line_intersection},
    ghost::{GhostRecord, GhostTransform},
};

/// How the volume of removed cells was handed out to their neighbors.
///
/// Entry `i` belongs to the `i`-th removed cell. Indices refer to the cells as
/// numbered before the removal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemovalReport {
    pub vol_index: Vec<Vec<usize>>,
    pub vol_ratio: Vec<Vec<f64>>,
}

/// A piece of the region of a removed cell, between two of its neighbors or
/// between a neighbor and a wall. Neighbors are positions in the local list.
struct Piece {
    vertices: [DVec2; 2],
    owner: usize,
    other: Option<usize>,
}

/// Merge two segments sharing an end point into one if they are collinear.
fn merge_segments(s1: [DVec2; 2], s2: [DVec2; 2], tolerance: f64) -> Option<[DVec2; 2]> {
    for i in 0..2 {
        for j in 0..2 {
            if s1[i].distance(s2[j]) > tolerance {
                continue;
            }
            let (far1, far2) = (s1[1 - i], s2[1 - j]);
            if distance_to_segment(s1[i], [far1, far2]) <= tolerance {
                return Some([far1, far2]);
            }
        }
    }
    None
}

/// The corner of `polygon` within `snap` of `point`, or `point` itself.
fn snap_to_corner(point: DVec2, polygon: &[DVec2], snap: f64) -> DVec2 {
    polygon
        .iter()
        .filter(|v| v.distance(point) <= snap)
        .min_by(|a, b| a.distance(point).total_cmp(&b.distance(point)))
        .copied()
        .unwrap_or(point)
}

/// Put the ends of a clipped piece back onto the boundary of the removed cell.
///
/// Clipping runs against the slightly grown polygon, so an end that was cut
/// moves along the piece onto the closest side. Inside a removed cell the
/// pieces meet its boundary at its corners or on a wall only.
fn snap_piece(clipped: [DVec2; 2], raw: [DVec2; 2], polygon: &[DVec2], tolerance: f64) -> [DVec2; 2] {
    let snap = 1e-3 * tolerance;
    let direction = raw[1] - raw[0];
    let sides = || polygon.iter().zip(polygon.iter().cycle().skip(1)).map(|(a, b)| [*a, *b]);
    [0, 1].map(|j| {
        let point = clipped[j];
        let point = if point == raw[j] {
            point
        } else {
            sides()
                .min_by(|s1, s2| distance_to_segment(point, *s1).total_cmp(&distance_to_segment(point, *s2)))
                .and_then(|side| line_intersection([point, point + direction], side))
                .filter(|crossing| crossing.distance(point) <= 1e2 * tolerance)
                .unwrap_or(point)
        };
        snap_to_corner(point, polygon, snap)
    })
}

impl VoronoiMesh {
    /// Remove cells and hand their area to the neighboring cells.
    ///
    /// The region of a removed cell is split between its neighbors as the
    /// Voronoi diagram of those neighbors would split it. Cells removed
    /// together may not be neighbors. Afterwards the remaining cells and
    /// ghosts are renumbered consecutively.
    pub fn remove_cells(&mut self, cells: &[usize]) -> TessResult<RemovalReport> {
        let n = self.point_count();
        let mut sorted = cells.to_vec();
        sorted.sort_unstable();
        if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(TessellationError::topology(w[0], "cell removed twice"));
        }
        for &c in sorted.iter() {
            if c >= n {
                return Err(TessellationError::topology(c, "only real cells can be removed"));
            }
            for k in self.literal_neighbors(c) {
                if sorted.binary_search(&self.original_index(k)).is_ok() {
                    return Err(TessellationError::topology(
                        c,
                        format!("neighboring cell {} is removed as well", self.original_index(k)),
                    ));
                }
                if self.ghost(k).map_or(false, |record| !record.is_local()) {
                    return Err(TessellationError::topology(
                        c,
                        "cannot remove a cell bordering another rank",
                    ));
                }
            }
        }

        let mut report = RemovalReport::default();
        for &c in cells {
            let (index, ratio) = self.remove_cell_locally(c)?;
            report.vol_index.push(index);
            report.vol_ratio.push(ratio);
        }
        self.compact_after_removal(&sorted);
        log::info!("Removed {} cells", cells.len());
        Ok(report)
    }

    /// Real cell and periodic offset a neighbor stands for.
    fn frame_of(&self, k: usize) -> TessResult<(usize, IVec2)> {
        if k < self.point_count() {
            return Ok((k, IVec2::ZERO));
        }
        match self.ghost(k) {
            Some(record) if record.is_local() => match record.transform {
                GhostTransform::Translate(period) => Ok((record.origin, period)),
                GhostTransform::Reflect(_) => Err(TessellationError::topology(k, "mirror image used as a neighbor")),
            },
            _ => Err(TessellationError::topology(k, "neighbor is not a mesh cell")),
        }
    }

    /// Index of mesh point `k` as seen from the copy of a cell shifted by `frame`.
    fn index_in_frame(&mut self, k: usize, frame: IVec2) -> TessResult<usize> {
        let (origin, period) = self.frame_of(k)?;
        let net = period - frame;
        Ok(if net == IVec2::ZERO {
            origin
        } else {
            self.find_or_create_ghost(GhostRecord::local(origin, GhostTransform::Translate(net)))
        })
    }

    /// Redistribute the region of cell `c` over its neighbors, leaving `c`
    /// without edges. Returns the receiving cells and their share of the volume.
    fn remove_cell_locally(&mut self, c: usize) -> TessResult<(Vec<usize>, Vec<f64>)> {
        let center = self.mesh_point(c);
        let polygon = self.cell_polygon(c);
        let volume = self.volume(c);
        let width = self.width(c);
        let min_length = self.config.edge_eps * width;
        let tolerance = self.config.intersection_eps * width;
        let snap = 1e-3 * tolerance;

        let mut neighbors = self.literal_neighbors(c);
        neighbors.sort_unstable();
        neighbors.dedup();
        if neighbors.is_empty() {
            return Err(TessellationError::topology(c, "removed cell has no neighbors"));
        }
        let walls: Vec<[DVec2; 2]> = self.cell_edges[c]
            .iter()
            .map(|e| self.edges[*e])
            .filter(|edge| edge.other(c).is_none())
            .map(|edge| edge.vertices)
            .collect();
        let positions: Vec<DVec2> = neighbors.iter().map(|k| self.mesh_point(*k)).collect();
        let frames = neighbors
            .iter()
            .map(|k| self.frame_of(*k))
            .collect::<TessResult<Vec<_>>>()?;

        let mut owners: Vec<usize> = frames.iter().map(|(origin, _)| *origin).collect();
        owners.sort_unstable();
        owners.dedup();
        let old_volumes: Vec<f64> = owners.iter().map(|o| self.volume(*o)).collect();

        let m = neighbors.len();
        let mut pieces = vec![];
        if m > 1 {
            let local = Delaunay::build(&positions, &polygon, &self.config)?;
            let ratio = self.config.circumcenter_ratio;
            let centers: Vec<DVec2> = local
                .facets()
                .iter()
                .map(|facet| circumcenter(local.points(), facet, ratio))
                .collect();
            for (i, facet) in local.facets().iter().enumerate() {
                for j in 0..3 {
                    let Some(friend) = facet.neighbors[j] else {
                        continue;
                    };
                    let (a, b) = (facet.vertices[j], facet.vertices[(j + 1) % 3]);
                    if friend <= i || a >= m || b >= m {
                        continue;
                    }
                    let raw = [centers[i], centers[friend]];
                    if let Some(vertices) = clip_segment_convex(raw, &polygon, tolerance)
                        .map(|clipped| snap_piece(clipped, raw, &polygon, tolerance))
                        .filter(|s| s[0].distance(s[1]) > min_length)
                    {
                        pieces.push(Piece {
                            vertices,
                            owner: a,
                            other: Some(b),
                        });
                    }
                }
            }
        }
        for wall in walls.iter() {
            for a in 0..m {
                let piece = (0..m).filter(|b| *b != a).try_fold(*wall, |piece, b| {
                    clip_segment_half_plane(piece, 0.5 * (positions[a] + positions[b]), positions[b] - positions[a])
                });
                if let Some(vertices) = piece
                    .map(|s| s.map(|v| snap_to_corner(v, &polygon, snap)))
                    .filter(|s| s[0].distance(s[1]) > min_length)
                {
                    pieces.push(Piece {
                        vertices,
                        owner: a,
                        other: None,
                    });
                }
            }
        }

        // Drop every edge with a copy of the removed cell.
        for &o in owners.iter() {
            let mut kept = std::mem::take(&mut self.cell_edges[o]);
            kept.retain(|e| {
                self.edges[*e]
                    .other(o)
                    .map_or(true, |k| self.original_index(k) != c)
            });
            self.cell_edges[o] = kept;
        }
        self.cell_edges[c].clear();

        let n = self.point_count();
        for piece in pieces {
            let a = neighbors[piece.owner];
            match piece.other.map(|b| neighbors[b]) {
                Some(b) if a < n && b < n => {
                    let e = self.edges.len();
                    self.edges.push(Edge::new(piece.vertices, [Some(a), Some(b)]));
                    self.cell_edges[a].push(e);
                    self.cell_edges[b].push(e);
                    continue;
                }
                _ => (),
            }
            // A periodic image is involved: add the piece to every real copy.
            let ends = [Some(piece.owner), piece.other];
            for (x, y) in [(ends[0], ends[1]), (ends[1], ends[0])] {
                let Some(x) = x else {
                    continue;
                };
                let (owner, frame) = frames[x];
                let shift = self.boundary.periodic_shift(frame);
                let other = match y {
                    Some(y) => Some(self.index_in_frame(neighbors[y], frame)?),
                    None => None,
                };
                let e = self.edges.len();
                self.edges
                    .push(Edge::new(piece.vertices.map(|v| v - shift), [Some(owner), other]));
                self.cell_edges[owner].push(e);
            }
        }

        for &o in owners.iter() {
            self.merge_collinear_edges(o, tolerance);
        }
        self.measure_cells(&owners);

        let ratios: Vec<f64> = owners
            .iter()
            .zip(old_volumes.iter())
            .map(|(o, old)| (self.volume(*o) - old) / volume)
            .collect();
        for (o, ratio) in owners.iter().zip(ratios.iter()) {
            if *ratio < self.config.remove_min_ratio {
                return Err(TessellationError::volume(
                    *o,
                    0.,
                    *ratio,
                    format!("cell shrank while absorbing cell {c}"),
                ));
            }
        }
        let total: f64 = ratios.iter().sum();
        if (total - 1.).abs() > self.config.remove_sum_tolerance {
            return Err(TessellationError::volume(
                c,
                1.,
                total,
                "volume of removed cell not fully redistributed",
            ));
        }
        log::debug!("Cell {c} at {center} removed, volume handed to {owners:?}");
        Ok((owners, ratios))
    }

    /// Join edges of `cell` that continue each other with the same neighbor.
    fn merge_collinear_edges(&mut self, cell: usize, tolerance: f64) {
        let n = self.point_count();
        loop {
            let list = &self.cell_edges[cell];
            let mut found = None;
            'search: for (x, &e1) in list.iter().enumerate() {
                for &e2 in list[x + 1..].iter() {
                    let (a, b) = (&self.edges[e1], &self.edges[e2]);
                    if a.other(cell) != b.other(cell) {
                        continue;
                    }
                    if let Some(merged) = merge_segments(a.vertices, b.vertices, tolerance) {
                        found = Some((e1, e2, merged));
                        break 'search;
                    }
                }
            }
            let Some((e1, e2, merged)) = found else {
                return;
            };
            self.edges[e1].vertices = merged;
            self.cell_edges[cell].retain(|e| *e != e2);
            if let Some(k) = self.edges[e2].other(cell).filter(|k| *k < n) {
                self.cell_edges[k].retain(|e| *e != e2);
            }
        }
    }

    /// Renumber cells, ghosts and edges after `removed` (sorted) lost their
    /// regions.
    fn compact_after_removal(&mut self, removed: &[usize]) {
        let n = self.point_count();
        let n_new = n - removed.len();
        let old_first = self.ghosts.first();
        let mut real_map = vec![None; n];
        let mut next = 0;
        for (i, slot) in real_map.iter_mut().enumerate() {
            if removed.binary_search(&i).is_err() {
                *slot = Some(next);
                next += 1;
            }
        }
        let new_first = old_first - removed.len();
        let ghost_map = self.ghosts.retain_map(new_first, |record| {
            if record.is_local() {
                real_map[record.origin].map(|origin| GhostRecord { origin, ..*record })
            } else {
                Some(*record)
            }
        });
        let map = |i: usize| -> Option<usize> {
            if i < n {
                real_map[i]
            } else if i < old_first {
                Some(i - removed.len())
            } else {
                ghost_map.get(i - old_first).copied().flatten()
            }
        };

        let old_points = self.tri.points();
        let mut points = vec![DVec2::ZERO; new_first + self.ghosts.len()];
        for (i, point) in old_points.iter().enumerate() {
            if let Some(j) = map(i) {
                points[j] = *point;
            }
        }

        let mut edge_map = vec![None; self.edges.len()];
        let mut edges = vec![];
        let mut cell_edges = Vec::with_capacity(n_new);
        let mut volumes = Vec::with_capacity(n_new);
        let mut centroids = Vec::with_capacity(n_new);
        for i in (0..n).filter(|i| real_map[*i].is_some()) {
            let list = self.cell_edges[i]
                .iter()
                .map(|e| {
                    *edge_map[*e].get_or_insert_with(|| {
                        let mut edge = self.edges[*e];
                        edge.remap_neighbors(map);
                        edges.push(edge);
                        edges.len() - 1
                    })
                })
                .collect();
            cell_edges.push(list);
            volumes.push(self.volumes[i]);
            centroids.push(self.centroids[i]);
        }
        self.edges = edges;
        self.cell_edges = cell_edges;
        self.volumes = volumes;
        self.centroids = centroids;
        self.tri.replace_points(points, n_new);
    }
}
