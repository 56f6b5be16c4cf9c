//! Decomposition of the domain into one convex cell per rank.

use std::{f64::consts::PI, sync::Arc};

use glam::{DVec2, IVec2};

use crate::{
    boundary::{BoxSide, OuterBoundary},
    cluster::Communicator,
    config::MeshConfig,
    errors::{TessResult, TessellationError},
    geometry::{distance_to_segment, point_in_convex_polygon},
    ghost::GhostTransform,
    voronoi_mesh::VoronoiMesh,
};

/// What lies across a face of a processor cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcNeighbor {
    /// The cell of `rank`, shifted by `period` box widths.
    Rank { rank: usize, period: IVec2 },
    Wall(BoxSide),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcFace {
    pub vertices: [DVec2; 2],
    pub neighbor: ProcNeighbor,
}

/// The Voronoi tessellation of one generator per rank.
///
/// Every rank holds an identical copy, so ownership of a position can be
/// decided locally.
#[derive(Debug, Clone)]
pub struct ProcessorTessellation {
    mesh: VoronoiMesh,
}

impl ProcessorTessellation {
    pub fn new(generators: &[DVec2], boundary: Arc<dyn OuterBoundary>) -> TessResult<Self> {
        let mesh = VoronoiMesh::new(generators, boundary, MeshConfig::default())?;
        log::debug!("Built processor tessellation of {} ranks", generators.len());
        Ok(Self { mesh })
    }

    /// Generators on a regular grid of `nx` by `ny` cells.
    pub fn grid(nx: usize, ny: usize, boundary: Arc<dyn OuterBoundary>) -> TessResult<Self> {
        let (min, max) = boundary.extents();
        let step = (max - min) / DVec2::new(nx as f64, ny as f64);
        let generators: Vec<DVec2> = (0..nx * ny)
            .map(|r| min + step * DVec2::new((r % nx) as f64 + 0.5, (r / nx) as f64 + 0.5))
            .collect();
        Self::new(&generators, boundary)
    }

    /// Number of ranks.
    pub fn len(&self) -> usize {
        self.mesh.point_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn boundary(&self) -> &dyn OuterBoundary {
        self.mesh.boundary()
    }

    pub fn generator(&self, rank: usize) -> DVec2 {
        self.mesh.mesh_point(rank)
    }

    pub fn cell_polygon(&self, rank: usize) -> Vec<DVec2> {
        self.mesh.cell_polygon(rank)
    }

    /// Cell polygon of `rank` shifted by `period` box widths.
    pub fn shifted_polygon(&self, rank: usize, period: IVec2) -> Vec<DVec2> {
        let shift = self.boundary().periodic_shift(period);
        self.mesh.cell_polygon(rank).into_iter().map(|v| v + shift).collect()
    }

    pub fn volume(&self, rank: usize) -> f64 {
        self.mesh.volume(rank)
    }

    pub fn faces(&self, rank: usize) -> Vec<ProcFace> {
        let count = self.len();
        self.mesh
            .cell_edges(rank)
            .iter()
            .map(|e| {
                let edge = self.mesh.edge(*e);
                let neighbor = match edge.other(rank) {
                    Some(k) if k < count => ProcNeighbor::Rank { rank: k, period: IVec2::ZERO },
                    Some(k) => match self.mesh.ghost(k).map(|record| record.transform) {
                        Some(GhostTransform::Translate(period)) => ProcNeighbor::Rank {
                            rank: self.mesh.original_index(k),
                            period,
                        },
                        _ => ProcNeighbor::Wall(self.nearest_side(edge.midpoint())),
                    },
                    None => ProcNeighbor::Wall(self.nearest_side(edge.midpoint())),
                };
                ProcFace {
                    vertices: edge.vertices,
                    neighbor,
                }
            })
            .collect()
    }

    fn nearest_side(&self, point: DVec2) -> BoxSide {
        let boundary = self.boundary();
        BoxSide::ALL
            .into_iter()
            .min_by(|a, b| {
                let da = distance_to_segment(point, boundary.side_segment(*a));
                let db = distance_to_segment(point, boundary.side_segment(*b));
                da.total_cmp(&db)
            })
            .unwrap_or(BoxSide::Right)
    }

    /// Ranks sharing a face with `rank`, with the period of their copy.
    pub fn edge_neighbors(&self, rank: usize) -> Vec<(usize, IVec2)> {
        let mut neighbors: Vec<(usize, IVec2)> = self
            .faces(rank)
            .into_iter()
            .filter_map(|face| match face.neighbor {
                ProcNeighbor::Rank { rank, period } => Some((rank, period)),
                ProcNeighbor::Wall(_) => None,
            })
            .collect();
        neighbors.sort_by_key(|(k, period)| (*k, period.x, period.y));
        neighbors.dedup();
        neighbors
    }

    /// Ranks touching `rank` in a single vertex, found by walking over the
    /// neighbors of the edge neighbors.
    pub fn corner_neighbors(&self, rank: usize) -> Vec<(usize, IVec2)> {
        let polygon = self.cell_polygon(rank);
        let tolerance = 1e-7 * self.boundary().width().max_element();
        let direct = self.edge_neighbors(rank);
        let mut corners: Vec<(usize, IVec2)> = vec![];
        for (k, period) in direct.iter() {
            for (j, period_j) in self.edge_neighbors(*k) {
                let candidate = (j, *period + period_j);
                if candidate == (rank, IVec2::ZERO) || direct.contains(&candidate) || corners.contains(&candidate) {
                    continue;
                }
                let touches = self
                    .shifted_polygon(candidate.0, candidate.1)
                    .iter()
                    .any(|v| polygon.iter().any(|w| w.distance(*v) <= tolerance));
                if touches {
                    corners.push(candidate);
                }
            }
        }
        corners
    }

    /// The rank owning `point`, which must lie inside the domain.
    ///
    /// The cell of `hint` is tried first, then its edge and corner neighbors
    /// and finally every rank.
    pub fn locate(&self, point: DVec2, hint: usize) -> Option<usize> {
        let inside = |rank: usize| point_in_convex_polygon(&self.cell_polygon(rank), point);
        if hint < self.len() {
            if inside(hint) {
                return Some(hint);
            }
            let near = self
                .edge_neighbors(hint)
                .into_iter()
                .chain(self.corner_neighbors(hint))
                .filter(|(_, period)| *period == IVec2::ZERO)
                .map(|(k, _)| k);
            for k in near {
                if inside(k) {
                    return Some(k);
                }
            }
        }
        log::debug!("Falling back to a scan of all ranks for {point}");
        (0..self.len()).find(|k| inside(*k))
    }

    /// The rank owning `point` or a classification error for mesh point `index`.
    pub(crate) fn owner(&self, index: usize, point: DVec2, hint: usize) -> TessResult<usize> {
        self.locate(point, hint)
            .ok_or_else(|| TessellationError::classification(index, point))
    }

    /// Move the generators to even out the number of points per rank.
    ///
    /// Every rank moves its own generator towards the centroid of its cell and
    /// away from neighbors holding fewer points, by at most `speed` cell widths.
    /// The new generators are gathered and the tessellation is rebuilt
    /// identically everywhere.
    pub fn rebalance(
        &mut self,
        comm: &dyn Communicator,
        point_count: usize,
        speed: f64,
        round_speed: f64,
    ) -> TessResult<()> {
        let rank = comm.rank();
        let counts: Vec<f64> = comm
            .all_gather(vec![point_count as f64])?
            .into_iter()
            .map(|c| c.first().copied().unwrap_or(0.))
            .collect();
        let ideal = (counts.iter().sum::<f64>() / counts.len() as f64).max(1.);
        let width = |r: usize| (self.volume(r) / PI).sqrt();
        let radius = width(rank);
        let point = self.generator(rank);
        let centroid = self.mesh.centroid(rank);

        let round = if centroid.distance(point) > 0.1 * radius {
            round_speed * speed * (centroid - point)
        } else {
            DVec2::ZERO
        };
        let mut shift = DVec2::ZERO;
        for (k, period) in self.edge_neighbors(rank) {
            if k == rank {
                continue;
            }
            let other = self.generator(k) + self.boundary().periodic_shift(period);
            let dist = point.distance(other);
            let close = 0.2 * radius.min(width(k));
            if dist < close {
                shift += close * (point - other) / dist;
            } else {
                shift -= (counts[rank] - counts[k]) * (other - point) * radius / (ideal * dist);
            }
        }
        let shift = shift.clamp_length_max(speed * radius) + round;

        let (min, max) = self.boundary().extents();
        let margin = 1e-3 * radius;
        let moved = (point + shift).clamp(min + margin, max - margin);
        let generators: Vec<DVec2> = comm
            .all_gather(vec![moved.x, moved.y])?
            .into_iter()
            .enumerate()
            .map(|(r, g)| match g[..] {
                [x, y] => DVec2::new(x, y),
                _ => self.generator(r),
            })
            .collect();
        log::info!("Rank {rank} moved its processor generator by {}", moved.distance(point));
        *self = Self::new(&generators, self.mesh.boundary_arc())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use float_cmp::assert_approx_eq;
    use glam::{DVec2, IVec2};

    use super::{ProcNeighbor, ProcessorTessellation};
    use crate::{
        boundary::{BoundaryKind, BoxSide, SquareBox},
        cluster::SerialCommunicator,
    };

    fn grid(kind: BoundaryKind) -> ProcessorTessellation {
        let boundary = Arc::new(SquareBox::new(DVec2::ZERO, DVec2::ONE, kind));
        ProcessorTessellation::grid(2, 2, boundary).unwrap()
    }

    #[test]
    fn test_rigid_grid() {
        let procs = grid(BoundaryKind::Rigid);
        assert_eq!(procs.len(), 4);
        assert_approx_eq!(f64, procs.volume(0), 0.25, epsilon = 1e-12);
        let faces = procs.faces(0);
        assert_eq!(faces.len(), 4);
        assert!(faces.iter().any(|f| f.neighbor == ProcNeighbor::Wall(BoxSide::Left)));
        assert!(faces.iter().any(|f| f.neighbor == ProcNeighbor::Wall(BoxSide::Down)));
        assert_eq!(procs.edge_neighbors(0), vec![(1, IVec2::ZERO), (2, IVec2::ZERO)]);
        assert_eq!(procs.corner_neighbors(0), vec![(3, IVec2::ZERO)]);
    }

    #[test]
    fn test_periodic_grid() {
        let procs = grid(BoundaryKind::Periodic);
        let neighbors = procs.edge_neighbors(0);
        assert_eq!(neighbors.len(), 4);
        assert!(neighbors.contains(&(1, IVec2::new(-1, 0))));
        assert!(neighbors.contains(&(2, IVec2::new(0, -1))));
        assert_eq!(procs.corner_neighbors(0).len(), 4);
    }

    #[test]
    fn test_locate() {
        let procs = grid(BoundaryKind::Rigid);
        assert_eq!(procs.locate(DVec2::new(0.1, 0.1), 0), Some(0));
        assert_eq!(procs.locate(DVec2::new(0.6, 0.1), 0), Some(1));
        assert_eq!(procs.locate(DVec2::new(0.9, 0.9), 0), Some(3));
        assert_eq!(procs.locate(DVec2::new(0.9, 0.9), 1), Some(3));
        assert_eq!(procs.locate(DVec2::new(2., 2.), 0), None);
        assert!(procs.owner(7, DVec2::new(2., 2.), 0).is_err());
    }

    #[test]
    fn test_rebalance_single_rank() {
        let boundary = Arc::new(SquareBox::new(DVec2::ZERO, DVec2::ONE, BoundaryKind::Rigid));
        let mut procs = ProcessorTessellation::new(&[DVec2::new(0.3, 0.4)], boundary).unwrap();
        procs.rebalance(&SerialCommunicator, 100, 0.1, 0.5).unwrap();
        // Moves towards the centroid of the whole box.
        assert!(procs.generator(0).distance(DVec2::splat(0.5)) < DVec2::new(0.3, 0.4).distance(DVec2::splat(0.5)));
        assert_approx_eq!(f64, procs.volume(0), 1., epsilon = 1e-12);
    }
}
