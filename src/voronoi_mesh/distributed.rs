use std::sync::Arc;

use glam::{DVec2, IVec2};
use rayon::prelude::*;

use super::{
    boundary_ghosts::{point_tree, polygon_meets_segment},
    LocalDomain, VoronoiMesh,
};
use crate::{
    boundary::{BoxSide, OuterBoundary},
    cluster::Communicator,
    config::MeshConfig,
    delaunay::Delaunay,
    errors::{TessResult, TessellationError},
    geometry::distance_to_convex_polygon,
    ghost::{GhostRecord, GhostTable, GhostTransform},
    processor::{ProcNeighbor, ProcessorTessellation},
};

/// Which points a rank kept and which it handed off during a distributed update.
///
/// After the update the local points are the kept ones, in the order of
/// `self_index`, followed by the points received from rank 0, 1, ...
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Migration {
    /// Previous local indices of the kept points.
    pub self_index: Vec<usize>,
    /// Previous local indices of the points sent to every rank.
    pub sent: Vec<Vec<usize>>,
}

impl Migration {
    pub fn sent_count(&self) -> usize {
        self.sent.iter().map(Vec::len).sum()
    }

    /// Move per-point values along with their points.
    ///
    /// Every value is encoded into `stride` numbers for the transfer.
    pub fn migrate<T: Clone>(
        &self,
        comm: &dyn Communicator,
        values: &[T],
        stride: usize,
        encode: impl Fn(&T) -> Vec<f64>,
        decode: impl Fn(&[f64]) -> T,
    ) -> TessResult<Vec<T>> {
        let outgoing: Vec<Vec<f64>> = self
            .sent
            .iter()
            .map(|indices| indices.iter().flat_map(|i| encode(&values[*i])).collect())
            .collect();
        let incoming = comm.exchange(outgoing)?;
        let mut migrated: Vec<T> = self.self_index.iter().map(|i| values[*i].clone()).collect();
        for data in incoming {
            migrated.extend(data.chunks_exact(stride).map(&decode));
        }
        Ok(migrated)
    }
}

/// Hand every point to the rank owning it and collect the points owned here.
fn distribute_points(
    points: &[DVec2],
    boundary: &dyn OuterBoundary,
    margin: f64,
    procs: &ProcessorTessellation,
    comm: &dyn Communicator,
) -> TessResult<(Vec<DVec2>, Migration)> {
    let rank = comm.rank();
    let size = comm.size();
    if procs.len() != size {
        return Err(TessellationError::topology(
            rank,
            format!("{} processor cells for {} ranks", procs.len(), size),
        ));
    }
    let owners = points
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            let p = boundary.keep_off_walls(boundary.fold_into_domain(*p).0, margin);
            procs.owner(i, p, rank).map(|owner| (owner, p))
        })
        .collect::<TessResult<Vec<_>>>()?;

    let mut migration = Migration {
        self_index: vec![],
        sent: vec![vec![]; size],
    };
    let mut local = vec![];
    let mut outgoing = vec![vec![]; size];
    for (i, (owner, p)) in owners.into_iter().enumerate() {
        if owner == rank {
            local.push(p);
            migration.self_index.push(i);
        } else {
            outgoing[owner].extend([p.x, p.y]);
            migration.sent[owner].push(i);
        }
    }
    for data in comm.exchange(outgoing)? {
        local.extend(data.chunks_exact(2).map(|c| DVec2::new(c[0], c[1])));
    }
    log::debug!(
        "Rank {rank} kept {} points, sent {} and now owns {}",
        migration.self_index.len(),
        migration.sent_count(),
        local.len()
    );
    Ok((local, migration))
}

fn record_from(sender: usize, rank: usize, origin: usize, period: IVec2) -> GhostRecord {
    let transform = GhostTransform::Translate(period);
    if sender == rank {
        GhostRecord::local(origin, transform)
    } else {
        GhostRecord::remote(sender, origin, transform)
    }
}

impl VoronoiMesh {
    /// Build the part of a distributed tessellation owned by this rank.
    ///
    /// `points` are the points currently held by this rank; they are handed to
    /// their owners first. Must be called on every rank.
    pub fn new_distributed(
        points: &[DVec2],
        boundary: Arc<dyn OuterBoundary>,
        config: MeshConfig,
        procs: &ProcessorTessellation,
        comm: &dyn Communicator,
    ) -> TessResult<(Self, Migration)> {
        let rank = comm.rank();
        let cell = procs.cell_polygon(rank);
        let (local, migration) = distribute_points(points, boundary.as_ref(), config.wall_margin, procs, comm)?;
        let tri = Delaunay::build(&local, &cell, &config)?;
        let mut mesh = Self {
            ghosts: GhostTable::new(tri.original_length()),
            tri,
            boundary,
            config,
            edges: vec![],
            cell_edges: vec![],
            volumes: vec![],
            centroids: vec![],
            local_domain: Some(LocalDomain { rank, cell }),
        };
        mesh.rebuild_distributed(procs, comm)?;
        Ok((mesh, migration))
    }

    /// Distributed counterpart of [`update`](Self::update): exchange the moved
    /// points between ranks and rebuild. Must be called on every rank.
    pub fn update_distributed(
        &mut self,
        points: &[DVec2],
        procs: &ProcessorTessellation,
        comm: &dyn Communicator,
    ) -> TessResult<Migration> {
        let rank = comm.rank();
        let cell = procs.cell_polygon(rank);
        let (local, migration) = distribute_points(points, self.boundary.as_ref(), self.config.wall_margin, procs, comm)?;
        self.tri.update(&local, &cell)?;
        self.local_domain = Some(LocalDomain { rank, cell });
        self.rebuild_distributed(procs, comm)?;
        Ok(migration)
    }

    fn rebuild_distributed(&mut self, procs: &ProcessorTessellation, comm: &dyn Communicator) -> TessResult<()> {
        self.ghosts.clear(self.tri.original_length());
        self.build_v();
        let seed = self.seed_distributed_ghosts(procs, comm)?;
        self.insert_ghosts(seed)?;
        let mut passes = 0;
        loop {
            let boundary = self.boundary_arc();
            let mut missing: Vec<(GhostRecord, DVec2)> = self
                .find_missing_local_ghosts(None)
                .into_iter()
                .map(|record| (record, record.transform.apply(self.mesh_point(record.origin), boundary.as_ref())))
                .collect();
            missing.extend(self.pull_remote_ghosts(procs, comm)?);
            // Every rank runs the same number of passes.
            if comm.all_reduce_max(missing.len() as f64)? == 0. {
                break;
            }
            passes += 1;
            if passes > self.config.max_boundary_passes {
                return Err(TessellationError::topology(
                    missing.first().map_or(0, |(record, _)| record.origin),
                    format!("ghosts still incomplete after {} passes", passes - 1),
                ));
            }
            self.insert_ghosts(missing)?;
        }
        log::debug!(
            "Rank {} holds {} points and {} ghosts after {} additional passes",
            comm.rank(),
            self.point_count(),
            self.ghosts.len(),
            passes
        );
        Ok(())
    }

    /// Register ghosts with known positions and triangulate the new ones.
    fn insert_ghosts(&mut self, ghosts: Vec<(GhostRecord, DVec2)>) -> TessResult<()> {
        let positions: Vec<DVec2> = ghosts
            .into_iter()
            .filter_map(|(record, position)| self.ghosts.push(record).map(|_| position))
            .collect();
        self.add_ghost_points(&positions)
    }

    /// Mirror images at the walls and the points crossing the faces of the
    /// processor cell, pushed to the ranks across.
    fn seed_distributed_ghosts(
        &self,
        procs: &ProcessorTessellation,
        comm: &dyn Communicator,
    ) -> TessResult<Vec<(GhostRecord, DVec2)>> {
        let rank = comm.rank();
        let n = self.point_count();
        let eps = self.config.intersection_eps;
        let boundary = self.boundary();
        let polygons: Vec<Vec<DVec2>> = (0..n).map(|i| self.cell_polygon(i)).collect();

        let mut seed = vec![];
        for side in BoxSide::ALL.into_iter().filter(|side| boundary.is_reflective(*side)) {
            let segment = boundary.side_segment(side);
            let transform = GhostTransform::Reflect(side);
            seed.extend(
                (0..n)
                    .filter(|i| polygon_meets_segment(&polygons[*i], segment, eps))
                    .map(|i| (GhostRecord::local(i, transform), transform.apply(self.mesh_point(i), boundary))),
            );
        }

        let mut outgoing = vec![vec![]; comm.size()];
        for face in procs.faces(rank) {
            let ProcNeighbor::Rank { rank: k, period } = face.neighbor else {
                continue;
            };
            for i in (0..n).filter(|i| polygon_meets_segment(&polygons[*i], face.vertices, eps)) {
                let p = self.mesh_point(i);
                outgoing[k].extend([i as f64, p.x, p.y, -period.x as f64, -period.y as f64]);
            }
        }
        for (sender, data) in comm.exchange(outgoing)?.into_iter().enumerate() {
            for chunk in data.chunks_exact(5) {
                let period = IVec2::new(chunk[3] as i32, chunk[4] as i32);
                let record = record_from(sender, rank, chunk[0] as usize, period);
                let position = DVec2::new(chunk[1], chunk[2]) + boundary.periodic_shift(period);
                seed.push((record, position));
            }
        }
        Ok(seed)
    }

    /// Ask the other ranks for their points within the safety radius of the
    /// local cells, including periodic copies.
    fn pull_remote_ghosts(
        &self,
        procs: &ProcessorTessellation,
        comm: &dyn Communicator,
    ) -> TessResult<Vec<(GhostRecord, DVec2)>> {
        let rank = comm.rank();
        let size = comm.size();
        let boundary = self.boundary();
        let offsets = boundary.periodic_offsets();
        let cells: Vec<Vec<DVec2>> = (0..size).map(|k| procs.cell_polygon(k)).collect();

        let mut outgoing = vec![vec![]; size];
        let mut request_periods: Vec<Vec<IVec2>> = vec![vec![]; size];
        for q in 0..self.point_count() {
            let center = self.mesh_point(q);
            let radius = self.config.safety_factor * self.cell_radius(q);
            for k in (0..size).filter(|k| *k != rank) {
                for period in offsets.iter() {
                    let source = center - boundary.periodic_shift(*period);
                    if distance_to_convex_polygon(&cells[k], source) > radius {
                        continue;
                    }
                    outgoing[k].extend([source.x, source.y, radius]);
                    request_periods[k].push(*period);
                }
            }
        }

        let requests = comm.exchange(outgoing)?;
        let tree = point_tree(self.mesh_points());
        let replies: Vec<Vec<f64>> = requests
            .iter()
            .map(|data| {
                let mut reply = vec![];
                for (r, request) in data.chunks_exact(3).enumerate() {
                    let radius = request[2];
                    for point in tree.locate_within_distance([request[0], request[1]], radius * radius) {
                        let [x, y] = *point.geom();
                        reply.extend([r as f64, point.data as f64, x, y]);
                    }
                }
                reply
            })
            .collect();

        let mut found = vec![];
        for (k, data) in comm.exchange(replies)?.into_iter().enumerate() {
            for reply in data.chunks_exact(4) {
                let Some(period) = request_periods[k].get(reply[0] as usize).copied() else {
                    return Err(TessellationError::communication(rank, k));
                };
                let record = record_from(k, rank, reply[1] as usize, period);
                if self.ghosts.find(&record).is_none() {
                    let position = DVec2::new(reply[2], reply[3]) + boundary.periodic_shift(period);
                    found.push((record, position));
                }
            }
        }
        found.sort_by_key(|(record, _)| record.sort_key());
        found.dedup_by_key(|(record, _)| *record);
        Ok(found)
    }
}
