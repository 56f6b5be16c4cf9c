//! Adaptive refinement and coarsening of the mesh.
//!
//! A refine policy names cells to split and a remove policy names cells to
//! merge into their neighbors, with a merit used to pick among neighboring
//! candidates. [`ConservativeAmr`] rebuilds the tessellation once per
//! operation and moves the extensive content of the affected cells by the
//! overlap area of the old and the new cells, so mass, momentum, energy and
//! tracers are conserved up to the overlap tolerance.

use std::{collections::VecDeque, f64::consts::PI};

use glam::DVec2;

use crate::{
    boundary::BoundaryKind,
    cluster::ClusterContext,
    config::AmrConfig,
    errors::{TessResult, TessellationError},
    gas_law::GasLaw,
    geometry::point_in_convex_polygon,
    physical_quantities::{ComputationalCell, Extensive},
    polygon_overlap::area_overlap,
    voronoi_mesh::VoronoiMesh,
};

pub trait CellsToRefine {
    /// Indices of the cells to split.
    fn to_refine(&self, mesh: &VoronoiMesh, cells: &[ComputationalCell], time: f64) -> Vec<usize>;
}

pub trait CellsToRemove {
    /// Indices of the cells to remove with their merit. Among neighboring
    /// candidates only the one with the highest merit is removed.
    fn to_remove(&self, mesh: &VoronoiMesh, cells: &[ComputationalCell], time: f64) -> Vec<(usize, f64)>;
}

pub trait ExtensiveUpdater {
    fn to_extensive(&self, cell: &ComputationalCell, eos: &GasLaw, volume: f64) -> Extensive;
}

pub trait CellUpdater {
    fn to_cell(&self, extensive: &Extensive, eos: &GasLaw, volume: f64, old: &ComputationalCell) -> ComputationalCell;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleExtensiveUpdater;

impl ExtensiveUpdater for SimpleExtensiveUpdater {
    fn to_extensive(&self, cell: &ComputationalCell, eos: &GasLaw, volume: f64) -> Extensive {
        Extensive::from_cell(cell, volume, eos)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleCellUpdater;

impl CellUpdater for SimpleCellUpdater {
    fn to_cell(&self, extensive: &Extensive, eos: &GasLaw, volume: f64, old: &ComputationalCell) -> ComputationalCell {
        ComputationalCell::from_extensive(extensive, volume, eos, old)
    }
}

/// Refine every cell larger than `max_volume`.
#[derive(Debug, Clone, Copy)]
pub struct VolumeThresholdRefine {
    pub max_volume: f64,
    /// Cells with this sticker set are never refined.
    pub skip_sticker: Option<usize>,
}

impl CellsToRefine for VolumeThresholdRefine {
    fn to_refine(&self, mesh: &VoronoiMesh, cells: &[ComputationalCell], _time: f64) -> Vec<usize> {
        (0..mesh.point_count())
            .filter(|i| mesh.volume(*i) > self.max_volume)
            .filter(|i| !skipped(cells, *i, self.skip_sticker))
            .collect()
    }
}

/// Remove every cell smaller than `min_volume`, the smallest first.
#[derive(Debug, Clone, Copy)]
pub struct VolumeThresholdRemove {
    pub min_volume: f64,
    pub skip_sticker: Option<usize>,
}

impl CellsToRemove for VolumeThresholdRemove {
    fn to_remove(&self, mesh: &VoronoiMesh, cells: &[ComputationalCell], _time: f64) -> Vec<(usize, f64)> {
        (0..mesh.point_count())
            .filter(|i| mesh.volume(*i) < self.min_volume)
            .filter(|i| !skipped(cells, *i, self.skip_sticker))
            .map(|i| (i, self.min_volume / mesh.volume(i)))
            .collect()
    }
}

fn skipped(cells: &[ComputationalCell], index: usize, sticker: Option<usize>) -> bool {
    sticker.map_or(false, |s| cells.get(index).map_or(false, |cell| cell.sticker(s)))
}

/// `4πV / P²`, one for a disc.
pub fn aspect_ratio(mesh: &VoronoiMesh, cell: usize) -> f64 {
    let perimeter: f64 = mesh.cell_edges(cell).iter().map(|e| mesh.edge(*e).length()).sum();
    4. * PI * mesh.volume(cell) / (perimeter * perimeter)
}

/// A point to be added by refinement.
#[derive(Debug, Clone, Copy)]
struct NewPoint {
    parent: usize,
    /// Position inside the domain.
    position: DVec2,
    /// Translation from the new cell to the frame of the parent.
    moved: DVec2,
}

/// Centroid of the cell behind mesh point `k`, in the frame of `k`.
fn neighbor_centroid(mesh: &VoronoiMesh, k: usize) -> DVec2 {
    let origin = mesh.original_index(k);
    if origin < mesh.point_count() {
        mesh.centroid(origin) + mesh.mesh_point(k) - mesh.mesh_point(origin)
    } else {
        mesh.mesh_point(k)
    }
}

/// Points splitting the cells of `to_refine` (sorted), one per eligible edge.
fn new_points(mesh: &VoronoiMesh, to_refine: &[usize], config: &AmrConfig) -> Vec<NewPoint> {
    let n = mesh.point_count();
    let boundary = mesh.boundary();
    let local_cell = mesh.local_cell();
    let mut points = vec![];
    for &i in to_refine {
        if aspect_ratio(mesh, i) < config.min_aspect_ratio {
            continue;
        }
        let radius = mesh.width(i);
        let mine = mesh.centroid(i);
        let generator = mesh.mesh_point(i);
        for (e, neighbor) in mesh.cell_edges(i).iter().zip(mesh.neighbors(i)) {
            let Some(k) = neighbor else {
                continue;
            };
            let other = neighbor_centroid(mesh, k);
            if other.distance(mine) < config.min_neighbor_distance * radius
                || mesh.edge(*e).length() < config.min_edge_length * radius
            {
                continue;
            }
            let too_close = |candidate: DVec2| {
                candidate.distance(generator) < config.min_candidate_distance * radius
                    || (k < n
                        && candidate.distance(mesh.mesh_point(k)) < config.min_candidate_distance * mesh.width(k))
            };
            let mut candidate = mine.lerp(other, config.candidate_weight);
            if too_close(candidate) {
                continue;
            }
            // Split a pair of neighboring candidates once, from the lower index.
            let partner = mesh.original_index(k);
            if partner < n && partner != i && to_refine.binary_search(&partner).is_ok() {
                if partner < i {
                    continue;
                }
                candidate = mine.lerp(other, 0.5);
                if too_close(candidate) {
                    candidate = generator.lerp(mesh.mesh_point(k), 0.5);
                    if too_close(candidate) {
                        continue;
                    }
                }
            }
            if local_cell.map_or(false, |cell| !point_in_convex_polygon(cell, candidate)) {
                continue;
            }
            let (position, period) = boundary.fold_into_domain(candidate);
            points.push(NewPoint {
                parent: i,
                position,
                moved: -boundary.periodic_shift(period),
            });
        }
    }
    points
}

/// Drop every candidate that has a neighboring candidate of equal or higher
/// merit. `candidates` must be sorted by index.
fn remove_neighbors(mesh: &VoronoiMesh, candidates: &[(usize, f64)], tolerance: f64) -> Vec<usize> {
    let merit_of = |index: usize| {
        candidates
            .binary_search_by_key(&index, |(i, _)| *i)
            .ok()
            .map(|position| candidates[position].1)
    };
    candidates
        .iter()
        .filter(|(i, merit)| {
            mesh.literal_neighbors(*i).into_iter().all(|k| {
                let k = mesh.original_index(k);
                match merit_of(k) {
                    Some(other) if k != *i => other < merit - tolerance,
                    _ => true,
                }
            })
        })
        .map(|(i, _)| *i)
        .collect()
}

/// Whether `cell` touches a point owned by another rank.
fn borders_other_rank(mesh: &VoronoiMesh, cell: usize) -> bool {
    mesh.literal_neighbors(cell)
        .into_iter()
        .any(|k| mesh.ghost(k).map_or(false, |record| !record.is_local()))
}

/// The real cell behind mesh point `k` and the translation taking it onto `k`,
/// added to `offset`. `None` for points of other ranks.
fn real_copy(mesh: &VoronoiMesh, k: usize, offset: DVec2) -> Option<(usize, DVec2)> {
    let origin = mesh.original_index(k);
    (origin < mesh.point_count()).then(|| (origin, offset + mesh.mesh_point(k) - mesh.mesh_point(origin)))
}

fn push_unique(found: &mut Vec<(usize, DVec2)>, entry: (usize, DVec2), tolerance: f64) -> bool {
    if found
        .iter()
        .any(|(i, shift)| *i == entry.0 && shift.distance(entry.1) <= tolerance)
    {
        return false;
    }
    found.push(entry);
    true
}

fn shift_tolerance(mesh: &VoronoiMesh) -> f64 {
    1e-9 * mesh.boundary().width().max_element()
}

/// A cell, its neighbors and their neighbors, each with its shift into the
/// frame of `cell`.
fn neighborhood(mesh: &VoronoiMesh, cell: usize) -> Vec<(usize, DVec2)> {
    let tolerance = shift_tolerance(mesh);
    let mut found = vec![(cell, DVec2::ZERO)];
    for k in mesh.literal_neighbors(cell) {
        let Some((k, shift)) = real_copy(mesh, k, DVec2::ZERO) else {
            continue;
        };
        push_unique(&mut found, (k, shift), tolerance);
        for j in mesh.literal_neighbors(k) {
            if let Some(entry) = real_copy(mesh, j, shift) {
                push_unique(&mut found, entry, tolerance);
            }
        }
    }
    found
}

fn translated(polygon: Vec<DVec2>, shift: DVec2) -> Vec<DVec2> {
    polygon.into_iter().map(|v| v + shift).collect()
}

/// Extensive content of the old cells covered by `polygon` and the covered
/// area. Starts from `start` and spreads to neighbors while the overlap
/// exceeds `threshold`.
fn accumulate_overlap(
    old: &VoronoiMesh,
    cells: &[ComputationalCell],
    eos: &GasLaw,
    updater: &impl ExtensiveUpdater,
    polygon: &[DVec2],
    start: &[(usize, DVec2)],
    threshold: f64,
) -> (Extensive, f64) {
    let tolerance = shift_tolerance(old);
    let mut checked = start.to_vec();
    let mut queue: VecDeque<(usize, DVec2)> = start.iter().copied().collect();
    let mut extensive = Extensive::zeros(start.first().map_or(0, |(i, _)| cells[*i].tracers.len()));
    let mut total = 0.;
    while let Some((j, shift)) = queue.pop_front() {
        let overlap = area_overlap(polygon, &translated(old.cell_polygon(j), shift));
        if overlap <= threshold {
            continue;
        }
        total += overlap;
        extensive += updater.to_extensive(&cells[j], eos, overlap);
        for k in old.literal_neighbors(j) {
            if let Some(entry) = real_copy(old, k, shift) {
                if push_unique(&mut checked, entry, tolerance) {
                    queue.push_back(entry);
                }
            }
        }
    }
    (extensive, total)
}

fn volume_tolerance(mesh: &VoronoiMesh, config: &AmrConfig) -> f64 {
    match mesh.boundary().kind() {
        BoundaryKind::Rigid => config.volume_tolerance,
        _ => config.periodic_volume_tolerance,
    }
}

/// Rebuild `mesh` from `points`, which must all stay on this rank.
fn rebuild(mesh: &mut VoronoiMesh, points: &[DVec2], cluster: Option<ClusterContext>) -> TessResult<()> {
    let Some(ClusterContext { procs, comm }) = cluster else {
        return mesh.update(points);
    };
    let migration = mesh.update_distributed(points, procs, comm)?;
    let identity = migration.sent_count() == 0
        && mesh.point_count() == points.len()
        && migration.self_index.iter().enumerate().all(|(i, j)| i == *j);
    if !identity {
        return Err(TessellationError::topology(
            migration.sent.iter().flatten().next().copied().unwrap_or(points.len()),
            "a point changed rank during mesh refinement",
        ));
    }
    Ok(())
}

fn check_state_len(mesh: &VoronoiMesh, cells: &[ComputationalCell], extensives: &[Extensive]) -> TessResult<()> {
    let n = mesh.point_count();
    if cells.len() < n || extensives.len() < n {
        return Err(TessellationError::topology(
            cells.len().min(extensives.len()),
            format!("cell state missing for a mesh of {} cells", n),
        ));
    }
    Ok(())
}

fn recompute_extensives(
    mesh: &VoronoiMesh,
    cells: &[ComputationalCell],
    eos: &GasLaw,
    updater: &impl ExtensiveUpdater,
) -> Vec<Extensive> {
    cells
        .iter()
        .enumerate()
        .map(|(i, cell)| updater.to_extensive(cell, eos, mesh.volume(i)))
        .collect()
}

fn sorted_refine_candidates(
    mesh: &VoronoiMesh,
    mut to_refine: Vec<usize>,
    cluster: Option<ClusterContext>,
) -> Vec<usize> {
    to_refine.retain(|i| *i < mesh.point_count());
    to_refine.sort_unstable();
    to_refine.dedup();
    if cluster.is_some() {
        to_refine.retain(|i| !borders_other_rank(mesh, *i));
    }
    to_refine
}

fn sorted_remove_candidates(mesh: &VoronoiMesh, mut to_remove: Vec<(usize, f64)>) -> Vec<(usize, f64)> {
    to_remove.retain(|(i, _)| *i < mesh.point_count());
    to_remove.sort_by_key(|(i, _)| *i);
    to_remove.dedup_by_key(|(i, _)| *i);
    to_remove
}

fn points_without(mesh: &VoronoiMesh, removed: &[usize]) -> Vec<DVec2> {
    mesh.mesh_points()
        .iter()
        .enumerate()
        .filter(|(i, _)| removed.binary_search(i).is_err())
        .map(|(_, p)| *p)
        .collect()
}

fn drop_indices<T>(values: &mut Vec<T>, removed: &[usize]) {
    let mut index = 0;
    values.retain(|_| {
        let keep = removed.binary_search(&index).is_err();
        index += 1;
        keep
    });
}

/// Refinement and removal conserving the extensive state of the cells.
#[derive(Debug, Clone)]
pub struct ConservativeAmr<R, M, E = SimpleExtensiveUpdater, C = SimpleCellUpdater> {
    refine: R,
    remove: M,
    extensive_updater: E,
    cell_updater: C,
    config: AmrConfig,
}

impl<R: CellsToRefine, M: CellsToRemove> ConservativeAmr<R, M> {
    pub fn new(refine: R, remove: M, config: AmrConfig) -> Self {
        Self {
            refine,
            remove,
            extensive_updater: SimpleExtensiveUpdater,
            cell_updater: SimpleCellUpdater,
            config,
        }
    }
}

impl<R, M, E, C> ConservativeAmr<R, M, E, C>
where
    R: CellsToRefine,
    M: CellsToRemove,
    E: ExtensiveUpdater,
    C: CellUpdater,
{
    pub fn with_updaters<E2: ExtensiveUpdater, C2: CellUpdater>(
        self,
        extensive_updater: E2,
        cell_updater: C2,
    ) -> ConservativeAmr<R, M, E2, C2> {
        ConservativeAmr {
            refine: self.refine,
            remove: self.remove,
            extensive_updater,
            cell_updater,
            config: self.config,
        }
    }

    pub fn config(&self) -> &AmrConfig {
        &self.config
    }

    /// Split the cells chosen by the refine policy. New cells are appended to
    /// `cells` and `extensives` is recomputed for the new volumes.
    ///
    /// In a distributed run this must be called on every rank. Returns the
    /// number of new cells.
    pub fn update_cells_refine(
        &self,
        mesh: &mut VoronoiMesh,
        cells: &mut Vec<ComputationalCell>,
        extensives: &mut Vec<Extensive>,
        eos: &GasLaw,
        time: f64,
        cluster: Option<ClusterContext>,
    ) -> TessResult<usize> {
        check_state_len(mesh, cells, extensives)?;
        let n = mesh.point_count();
        cells.truncate(n);
        let to_refine = sorted_refine_candidates(mesh, self.refine.to_refine(mesh, cells, time), cluster);
        let new = new_points(mesh, &to_refine, &self.config);
        if new.is_empty() && cluster.is_none() {
            return Ok(0);
        }

        let old = mesh.clone();
        let mut points = mesh.mesh_points().to_vec();
        points.extend(new.iter().map(|point| point.position));
        rebuild(mesh, &points, cluster)?;

        let tolerance = volume_tolerance(mesh, &self.config);
        let mut start = vec![];
        let mut current = None;
        for (t, point) in new.iter().enumerate() {
            if current != Some(point.parent) {
                start = neighborhood(&old, point.parent);
                current = Some(point.parent);
            }
            let index = n + t;
            let volume = mesh.volume(index);
            let polygon = translated(mesh.cell_polygon(index), point.moved);
            let (extensive, total) = accumulate_overlap(
                &old,
                &cells[..n],
                eos,
                &self.extensive_updater,
                &polygon,
                &start,
                self.config.overlap_threshold * volume,
            );
            if (volume - total).abs() > tolerance * total {
                return Err(TessellationError::volume(
                    index,
                    volume,
                    total,
                    "overlap of a refined cell with the old cells",
                ));
            }
            let cell = self.cell_updater.to_cell(&extensive, eos, total, &cells[point.parent]);
            cells.push(cell);
        }
        *extensives = recompute_extensives(mesh, cells, eos, &self.extensive_updater);
        log::info!("Refined {} cells into {} new cells", to_refine.len(), new.len());
        Ok(new.len())
    }

    /// Remove the cells chosen by the remove policy and hand their content to
    /// the cells that take over their area.
    ///
    /// In a distributed run this must be called on every rank. Returns the
    /// number of removed cells.
    pub fn update_cells_remove(
        &self,
        mesh: &mut VoronoiMesh,
        cells: &mut Vec<ComputationalCell>,
        extensives: &mut Vec<Extensive>,
        eos: &GasLaw,
        time: f64,
        cluster: Option<ClusterContext>,
    ) -> TessResult<usize> {
        check_state_len(mesh, cells, extensives)?;
        let n = mesh.point_count();
        cells.truncate(n);
        extensives.truncate(n);
        let candidates = sorted_remove_candidates(mesh, self.remove.to_remove(mesh, cells, time));
        let mut removed = remove_neighbors(mesh, &candidates, self.config.merit_tolerance);
        if cluster.is_some() {
            removed.retain(|i| !borders_other_rank(mesh, *i));
        }
        if removed.is_empty() && cluster.is_none() {
            return Ok(0);
        }

        let old = mesh.clone();
        rebuild(mesh, &points_without(&old, &removed), cluster)?;

        let tolerance = volume_tolerance(mesh, &self.config);
        let new_index = |o: usize| o - removed.partition_point(|r| *r < o);
        for &r in &removed {
            let footprint = old.cell_polygon(r);
            let volume = old.volume(r);
            let content = extensives[r].clone();
            let mut total = 0.;
            for k in old.literal_neighbors(r) {
                let Some((o, shift)) = real_copy(&old, k, DVec2::ZERO) else {
                    continue;
                };
                if o == r {
                    continue;
                }
                let polygon = translated(mesh.cell_polygon(new_index(o)), shift);
                let overlap = area_overlap(&footprint, &polygon);
                total += overlap;
                extensives[o] += (overlap / volume) * &content;
            }
            if (volume - total).abs() > tolerance * volume {
                return Err(TessellationError::volume(
                    r,
                    volume,
                    total,
                    "overlap of a removed cell with its neighbors",
                ));
            }
        }
        drop_indices(cells, &removed);
        drop_indices(extensives, &removed);
        for (i, (cell, extensive)) in cells.iter_mut().zip(extensives.iter()).enumerate() {
            *cell = self.cell_updater.to_cell(extensive, eos, mesh.volume(i), cell);
        }
        log::info!("Removed {} of {} candidate cells", removed.len(), candidates.len());
        Ok(removed.len())
    }

    /// Refine, then remove. Returns the number of added and removed cells.
    pub fn update_cells(
        &self,
        mesh: &mut VoronoiMesh,
        cells: &mut Vec<ComputationalCell>,
        extensives: &mut Vec<Extensive>,
        eos: &GasLaw,
        time: f64,
        cluster: Option<ClusterContext>,
    ) -> TessResult<(usize, usize)> {
        let added = self.update_cells_refine(mesh, cells, extensives, eos, time, cluster)?;
        let removed = self.update_cells_remove(mesh, cells, extensives, eos, time, cluster)?;
        Ok((added, removed))
    }
}

/// Refinement copying the parent state into the new cells and removal
/// dropping the state of the removed cells.
#[derive(Debug, Clone)]
pub struct NonConservativeAmr<R, M, E = SimpleExtensiveUpdater> {
    refine: R,
    remove: M,
    extensive_updater: E,
    config: AmrConfig,
}

impl<R: CellsToRefine, M: CellsToRemove> NonConservativeAmr<R, M> {
    pub fn new(refine: R, remove: M, config: AmrConfig) -> Self {
        Self {
            refine,
            remove,
            extensive_updater: SimpleExtensiveUpdater,
            config,
        }
    }
}

impl<R, M, E> NonConservativeAmr<R, M, E>
where
    R: CellsToRefine,
    M: CellsToRemove,
    E: ExtensiveUpdater,
{
    pub fn with_extensive_updater<E2: ExtensiveUpdater>(self, extensive_updater: E2) -> NonConservativeAmr<R, M, E2> {
        NonConservativeAmr {
            refine: self.refine,
            remove: self.remove,
            extensive_updater,
            config: self.config,
        }
    }

    pub fn update_cells_refine(
        &self,
        mesh: &mut VoronoiMesh,
        cells: &mut Vec<ComputationalCell>,
        extensives: &mut Vec<Extensive>,
        eos: &GasLaw,
        time: f64,
        cluster: Option<ClusterContext>,
    ) -> TessResult<usize> {
        check_state_len(mesh, cells, extensives)?;
        cells.truncate(mesh.point_count());
        let to_refine = sorted_refine_candidates(mesh, self.refine.to_refine(mesh, cells, time), cluster);
        let new = new_points(mesh, &to_refine, &self.config);
        if new.is_empty() && cluster.is_none() {
            return Ok(0);
        }
        let mut points = mesh.mesh_points().to_vec();
        points.extend(new.iter().map(|point| point.position));
        rebuild(mesh, &points, cluster)?;
        for point in &new {
            let parent = cells[point.parent].clone();
            cells.push(parent);
        }
        *extensives = recompute_extensives(mesh, cells, eos, &self.extensive_updater);
        log::info!("Refined {} cells into {} new cells", to_refine.len(), new.len());
        Ok(new.len())
    }

    pub fn update_cells_remove(
        &self,
        mesh: &mut VoronoiMesh,
        cells: &mut Vec<ComputationalCell>,
        extensives: &mut Vec<Extensive>,
        eos: &GasLaw,
        time: f64,
        cluster: Option<ClusterContext>,
    ) -> TessResult<usize> {
        check_state_len(mesh, cells, extensives)?;
        cells.truncate(mesh.point_count());
        let mut removed: Vec<usize> = sorted_remove_candidates(mesh, self.remove.to_remove(mesh, cells, time))
            .into_iter()
            .map(|(i, _)| i)
            .collect();
        if cluster.is_some() {
            removed.retain(|i| !borders_other_rank(mesh, *i));
        }
        if removed.is_empty() && cluster.is_none() {
            return Ok(0);
        }
        let points = points_without(mesh, &removed);
        rebuild(mesh, &points, cluster)?;
        drop_indices(cells, &removed);
        *extensives = recompute_extensives(mesh, cells, eos, &self.extensive_updater);
        log::info!("Removed {} cells", removed.len());
        Ok(removed.len())
    }
}

#[cfg(test)]
mod test {
    use std::{f64::consts::PI, sync::Arc};

    use float_cmp::assert_approx_eq;
    use glam::DVec2;

    use super::*;
    use crate::{
        boundary::SquareBox,
        config::MeshConfig,
        gas_law::EquationOfState,
    };

    struct RefineList(Vec<usize>);

    impl CellsToRefine for RefineList {
        fn to_refine(&self, _mesh: &VoronoiMesh, _cells: &[ComputationalCell], _time: f64) -> Vec<usize> {
            self.0.clone()
        }
    }

    struct RemoveList(Vec<(usize, f64)>);

    impl CellsToRemove for RemoveList {
        fn to_remove(&self, _mesh: &VoronoiMesh, _cells: &[ComputationalCell], _time: f64) -> Vec<(usize, f64)> {
            self.0.clone()
        }
    }

    /// Removes the cells past the first `self.0`, later ones with higher merit.
    struct RemoveAdded(usize);

    impl CellsToRemove for RemoveAdded {
        fn to_remove(&self, mesh: &VoronoiMesh, _cells: &[ComputationalCell], _time: f64) -> Vec<(usize, f64)> {
            (self.0..mesh.point_count()).map(|i| (i, i as f64)).collect()
        }
    }

    fn lattice(n: usize, kind: BoundaryKind) -> VoronoiMesh {
        let h = 1. / n as f64;
        let points: Vec<DVec2> = (0..n * n)
            .map(|i| DVec2::new(((i % n) as f64 + 0.5) * h, ((i / n) as f64 + 0.5) * h))
            .collect();
        let boundary = Arc::new(SquareBox::new(DVec2::ZERO, DVec2::ONE, kind));
        VoronoiMesh::new(&points, boundary, MeshConfig::default()).unwrap()
    }

    fn state(mesh: &VoronoiMesh, eos: &GasLaw) -> (Vec<ComputationalCell>, Vec<Extensive>) {
        let cells: Vec<ComputationalCell> = mesh
            .mesh_points()
            .iter()
            .map(|p| {
                ComputationalCell::new(1. + p.x + 0.5 * p.y, 1. + p.y, DVec2::new(p.y, -p.x))
                    .with_tracers(vec![p.x])
            })
            .collect();
        let extensives = recompute_extensives(mesh, &cells, eos, &SimpleExtensiveUpdater);
        (cells, extensives)
    }

    fn total(extensives: &[Extensive]) -> Extensive {
        extensives.iter().fold(Extensive::zeros(1), |mut sum, e| {
            sum += e;
            sum
        })
    }

    fn assert_conserved(before: &Extensive, after: &Extensive, epsilon: f64) {
        assert_approx_eq!(f64, before.mass, after.mass, epsilon = epsilon);
        assert_approx_eq!(f64, before.energy, after.energy, epsilon = epsilon);
        assert_approx_eq!(f64, before.momentum.x, after.momentum.x, epsilon = epsilon);
        assert_approx_eq!(f64, before.momentum.y, after.momentum.y, epsilon = epsilon);
        assert_approx_eq!(f64, before.tracers[0], after.tracers[0], epsilon = epsilon);
    }

    fn lattice_config() -> AmrConfig {
        AmrConfig {
            min_neighbor_distance: 1.5,
            min_candidate_distance: 0.2,
            ..AmrConfig::default()
        }
    }

    #[test]
    fn test_aspect_ratio() {
        let mesh = lattice(1, BoundaryKind::Rigid);
        assert_approx_eq!(f64, aspect_ratio(&mesh, 0), PI / 4., epsilon = 1e-12);
    }

    #[test]
    fn test_remove_neighbors() {
        let mesh = lattice(4, BoundaryKind::Rigid);
        // 5 and 6 are neighbors, 6 wins; 9 ties with 5 and 13 ties with 9.
        let candidates = vec![(5, 1.), (6, 2.), (9, 1.), (13, 1.), (15, 0.5)];
        assert_eq!(remove_neighbors(&mesh, &candidates, 1e-9), vec![6, 15]);
    }

    #[test]
    fn test_threshold_policies() {
        let mut mesh = lattice(4, BoundaryKind::Rigid);
        let points: Vec<DVec2> = mesh
            .mesh_points()
            .iter()
            .chain([DVec2::new(0.2, 0.2)].iter())
            .copied()
            .collect();
        mesh.update(&points).unwrap();
        let cells = vec![ComputationalCell::new(1., 1., DVec2::ZERO); 17];
        let remove = VolumeThresholdRemove {
            min_volume: 0.04,
            skip_sticker: None,
        };
        let candidates = remove.to_remove(&mesh, &cells, 0.);
        assert!(candidates.iter().any(|(i, _)| *i == 16));
        for (i, merit) in candidates {
            assert!(mesh.volume(i) < 0.04);
            assert_approx_eq!(f64, merit, 0.04 / mesh.volume(i));
        }

        let refine = VolumeThresholdRefine {
            max_volume: 0.05,
            skip_sticker: Some(0),
        };
        let mut stuck = cells.clone();
        stuck[15] = stuck[15].clone().with_stickers(vec![true]);
        let to_refine = refine.to_refine(&mesh, &stuck, 0.);
        assert!(!to_refine.is_empty());
        assert!(!to_refine.contains(&15));
        assert!(to_refine.iter().all(|i| mesh.volume(*i) > 0.05));
    }

    #[test]
    fn test_conservative_refine() {
        let eos = GasLaw::new(5. / 3., EquationOfState::Ideal);
        let mut mesh = lattice(8, BoundaryKind::Rigid);
        let (mut cells, mut extensives) = state(&mesh, &eos);
        let before = total(&extensives);

        let amr = ConservativeAmr::new(RefineList(vec![45, 18, 21]), RemoveList(vec![]), lattice_config());
        let added = amr
            .update_cells_refine(&mut mesh, &mut cells, &mut extensives, &eos, 0., None)
            .unwrap();

        assert_eq!(added, 12);
        assert_eq!(mesh.point_count(), 76);
        assert_eq!(cells.len(), 76);
        assert_eq!(extensives.len(), 76);
        assert_approx_eq!(f64, mesh.total_volume(), 1., epsilon = 1e-10);
        assert_conserved(&before, &total(&extensives), 1e-8);
    }

    #[test]
    fn test_conservative_remove() {
        let eos = GasLaw::new(5. / 3., EquationOfState::Ideal);
        let mut mesh = lattice(8, BoundaryKind::Rigid);
        let (mut cells, mut extensives) = state(&mesh, &eos);
        let before = total(&extensives);

        let amr = ConservativeAmr::new(
            RefineList(vec![]),
            RemoveList(vec![(45, 1.), (18, 2.), (19, 1.), (0, 1.)]),
            AmrConfig::default(),
        );
        let removed = amr
            .update_cells_remove(&mut mesh, &mut cells, &mut extensives, &eos, 0., None)
            .unwrap();

        // 19 loses against its neighbor 18.
        assert_eq!(removed, 3);
        assert_eq!(mesh.point_count(), 61);
        assert_eq!(cells.len(), 61);
        assert_approx_eq!(f64, mesh.total_volume(), 1., epsilon = 1e-10);
        assert_conserved(&before, &total(&extensives), 1e-8);
        for (i, cell) in cells.iter().enumerate() {
            let back = Extensive::from_cell(cell, mesh.volume(i), &eos);
            assert_approx_eq!(f64, back.mass, extensives[i].mass, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_refine_remove_round_trip() {
        let eos = GasLaw::new(5. / 3., EquationOfState::Ideal);
        let mut mesh = lattice(8, BoundaryKind::Rigid);
        let parent = 18;
        let center = mesh.mesh_point(parent);
        // Uniform around the parent, so the new cells take the state of every
        // cell they take area from.
        let mut cells: Vec<ComputationalCell> = mesh
            .mesh_points()
            .iter()
            .map(|p| {
                let q = if p.distance(center) < 0.3 { center } else { *p };
                ComputationalCell::new(1. + q.x + 0.5 * q.y, 1. + q.y, DVec2::new(q.y, -q.x))
                    .with_tracers(vec![q.x])
            })
            .collect();
        let mut extensives = recompute_extensives(&mesh, &cells, &eos, &SimpleExtensiveUpdater);
        let original = extensives.clone();

        let amr = ConservativeAmr::new(RefineList(vec![parent]), RemoveAdded(64), lattice_config());
        let added = amr
            .update_cells_refine(&mut mesh, &mut cells, &mut extensives, &eos, 0., None)
            .unwrap();
        assert_eq!(added, 4);
        assert!(mesh.volume(parent) < 1. / 64.);

        // Neighboring new cells go in separate rounds.
        let mut rounds = 0;
        while mesh.point_count() > 64 {
            let removed = amr
                .update_cells_remove(&mut mesh, &mut cells, &mut extensives, &eos, 0., None)
                .unwrap();
            assert!(removed > 0);
            rounds += 1;
            assert!(rounds <= 4);
        }

        assert_eq!(extensives.len(), 64);
        for (i, (before, after)) in original.iter().zip(extensives.iter()).enumerate() {
            assert_approx_eq!(f64, mesh.volume(i), 1. / 64., epsilon = 1e-12);
            assert_approx_eq!(f64, before.mass, after.mass, epsilon = 1e-12);
            assert_approx_eq!(f64, before.energy, after.energy, epsilon = 1e-12);
            assert_approx_eq!(f64, before.momentum.x, after.momentum.x, epsilon = 1e-12);
            assert_approx_eq!(f64, before.momentum.y, after.momentum.y, epsilon = 1e-12);
            assert_approx_eq!(f64, before.tracers[0], after.tracers[0], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_conservative_periodic() {
        let eos = GasLaw::new(1.4, EquationOfState::Ideal);
        let mut mesh = lattice(8, BoundaryKind::Periodic);
        let (mut cells, mut extensives) = state(&mesh, &eos);
        let before = total(&extensives);

        let amr = ConservativeAmr::new(RefineList(vec![7]), RemoveList(vec![(56, 1.)]), lattice_config());
        let (added, removed) = amr
            .update_cells(&mut mesh, &mut cells, &mut extensives, &eos, 0., None)
            .unwrap();

        assert_eq!((added, removed), (4, 1));
        assert_eq!(mesh.point_count(), 67);
        assert!(mesh.mesh_points().iter().all(|p| mesh.boundary().contains(*p)));
        assert_approx_eq!(f64, mesh.total_volume(), 1., epsilon = 1e-10);
        assert_conserved(&before, &total(&extensives), 1e-8);
    }

    #[test]
    fn test_non_conservative() {
        let eos = GasLaw::new(5. / 3., EquationOfState::Ideal);
        let mut mesh = lattice(8, BoundaryKind::Rigid);
        let (mut cells, mut extensives) = state(&mesh, &eos);
        let parent = cells[18].clone();

        let amr = NonConservativeAmr::new(RefineList(vec![18]), RemoveList(vec![(40, 1.)]), lattice_config());
        let added = amr
            .update_cells_refine(&mut mesh, &mut cells, &mut extensives, &eos, 0., None)
            .unwrap();
        assert_eq!(added, 4);
        assert!(cells[64..].iter().all(|cell| *cell == parent));

        let removed = amr
            .update_cells_remove(&mut mesh, &mut cells, &mut extensives, &eos, 0., None)
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cells.len(), 67);
        assert_eq!(extensives.len(), 67);
        assert_approx_eq!(f64, extensives[40].mass, cells[40].density * mesh.volume(40), epsilon = 1e-14);
    }

    #[test]
    fn test_no_candidates() {
        let eos = GasLaw::new(5. / 3., EquationOfState::Ideal);
        let mut mesh = lattice(4, BoundaryKind::Rigid);
        let (mut cells, mut extensives) = state(&mesh, &eos);
        // The default distances reject every split of a square lattice.
        let amr = ConservativeAmr::new(RefineList(vec![5]), RemoveList(vec![]), AmrConfig::default());
        assert_eq!(
            amr.update_cells(&mut mesh, &mut cells, &mut extensives, &eos, 0., None)
                .unwrap(),
            (0, 0)
        );
        assert_eq!(mesh.point_count(), 16);
    }
}
