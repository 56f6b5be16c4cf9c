//! The Voronoi diagram dual to a [`Delaunay`] triangulation, with its cells,
//! edges and boundary ghost points.

use std::{f64::consts::PI, sync::Arc};

use glam::DVec2;
use rayon::prelude::*;

use crate::{
    boundary::OuterBoundary,
    config::MeshConfig,
    delaunay::{Delaunay, Facet},
    edge::Edge,
    errors::TessResult,
    ghost::{GhostRecord, GhostTable, GhostTransform},
};

mod boundary_ghosts;
mod distributed;
mod refine;
mod remove;

pub use distributed::Migration;
pub use remove::RemovalReport;

/// Circumcenter of a facet.
///
/// When two vertices are nearly coincident compared to the third one, the
/// computation is carried out relative to a vertex of the close pair that keeps
/// the differences well conditioned.
pub(crate) fn circumcenter(points: &[DVec2], facet: &Facet, ratio: f64) -> DVec2 {
    let [p1, p2, p3] = facet.vertices.map(|v| points[v]);
    let d12 = p1.distance_squared(p2);
    let d23 = p3.distance_squared(p2);
    let d13 = p1.distance_squared(p3);
    let (origin, b, c) = if d12 < ratio * (d23 + d13) {
        (p1, p2, p3)
    } else if d23 < ratio * (d13 + d12) {
        (p2, p3, p1)
    } else if d13 < ratio * (d23 + d12) {
        (p3, p1, p2)
    } else {
        (p1, p2, p3)
    };
    let b = b - origin;
    let c = c - origin;
    let d_inv = 1. / (2. * b.perp_dot(c));
    let b2 = b.length_squared();
    let c2 = c.length_squared();
    origin + DVec2::new(c.y * b2 - b.y * c2, b.x * c2 - c.x * b2) * d_inv
}

/// `points` moved off the reflecting walls of `boundary`.
fn off_walls(points: &[DVec2], boundary: &dyn OuterBoundary, margin: f64) -> Vec<DVec2> {
    points.iter().map(|p| boundary.keep_off_walls(*p, margin)).collect()
}

/// Sort the edges of a cell counter-clockwise around `center` and compute the
/// volume and centroid of the resulting polygon.
fn order_and_measure(center: DVec2, edges: &[Edge], cell: &mut [usize]) -> (f64, DVec2) {
    cell.sort_by(|a, b| {
        let angle = |e: &usize| {
            let d = edges[*e].midpoint() - center;
            d.y.atan2(d.x)
        };
        angle(a).total_cmp(&angle(b))
    });
    let mut volume = 0.;
    let mut moment = DVec2::ZERO;
    for e in cell.iter() {
        let [a, b] = edges[*e].vertices;
        let area = 0.5 * (a - center).perp_dot(b - center).abs();
        volume += area;
        moment += area * (center + a + b) / 3.;
    }
    if volume > 0. {
        (volume, moment / volume)
    } else {
        (0., center)
    }
}

/// A Voronoi tessellation of a set of generators inside a rectangular domain.
///
/// Mesh points are indexed as `0..n` for the generators, `n..n + 3` for the
/// vertices of the seeding triangle and beyond for ghost points.
#[derive(Debug, Clone)]
pub struct VoronoiMesh {
    tri: Delaunay,
    boundary: Arc<dyn OuterBoundary>,
    config: MeshConfig,
    edges: Vec<Edge>,
    cell_edges: Vec<Vec<usize>>,
    volumes: Vec<f64>,
    centroids: Vec<DVec2>,
    ghosts: GhostTable,
    local_domain: Option<LocalDomain>,
}

/// The processor cell a distributed mesh is restricted to.
#[derive(Debug, Clone)]
pub(crate) struct LocalDomain {
    pub(crate) rank: usize,
    pub(crate) cell: Vec<DVec2>,
}

impl VoronoiMesh {
    /// Build the tessellation of `points`, which must lie inside the boundary.
    ///
    /// Points on a reflecting wall are moved `wall_margin` into the domain.
    pub fn new(
        points: &[DVec2],
        boundary: Arc<dyn OuterBoundary>,
        config: MeshConfig,
    ) -> TessResult<Self> {
        let points = off_walls(points, boundary.as_ref(), config.wall_margin);
        let tri = Delaunay::build(&points, &boundary.corners(), &config)?;
        let mut mesh = Self {
            ghosts: GhostTable::new(tri.original_length()),
            tri,
            boundary,
            config,
            edges: vec![],
            cell_edges: vec![],
            volumes: vec![],
            centroids: vec![],
            local_domain: None,
        };
        mesh.rebuild()?;
        Ok(mesh)
    }

    /// Recompute the tessellation for new generator positions.
    pub fn update(&mut self, points: &[DVec2]) -> TessResult<()> {
        self.local_domain = None;
        let points = off_walls(points, self.boundary.as_ref(), self.config.wall_margin);
        self.tri.update(&points, &self.boundary.corners())?;
        self.rebuild()
    }

    fn rebuild(&mut self) -> TessResult<()> {
        self.ghosts.clear(self.tri.original_length());
        self.build_v();
        self.generate_boundary_ghosts()
    }

    /// Derive edges and cells from the current triangulation.
    pub(crate) fn build_v(&mut self) {
        let n = self.tri.real_count();
        let points = self.tri.points();
        let ratio = self.config.circumcenter_ratio;
        let centers: Vec<DVec2> = self
            .tri
            .facets()
            .par_iter()
            .map(|facet| circumcenter(points, facet, ratio))
            .collect();

        self.edges.clear();
        self.cell_edges.iter_mut().for_each(|cell| cell.clear());
        self.cell_edges.resize(n, vec![]);
        let facets = self.tri.facets();
        for (i, facet) in facets.iter().enumerate() {
            for j in 0..3 {
                let Some(friend) = facet.neighbors[j] else {
                    continue;
                };
                if friend <= i {
                    continue;
                }
                let a = facet.vertices[j];
                let b = facet.vertices[(j + 1) % 3];
                if a >= n && b >= n {
                    continue;
                }
                let vertices = [centers[i], centers[friend]];
                let threshold = self.config.edge_eps * (facet.radius * facets[friend].radius).sqrt();
                if !(vertices[0].distance(vertices[1]) > threshold) {
                    continue;
                }
                let neighbors = [a, b].map(|k| self.neighbor_slot(k));
                let e = self.edges.len();
                self.edges.push(Edge::new(vertices, neighbors));
                for k in [a, b] {
                    if k < n {
                        self.cell_edges[k].push(e);
                    }
                }
            }
        }
        self.measure_all();
    }

    /// Edge neighbor entry of mesh point `index`: mirror images become walls.
    fn neighbor_slot(&self, index: usize) -> Option<usize> {
        match self.ghosts.get(index) {
            Some(record) if record.transform.is_reflection() && record.is_local() => None,
            _ => Some(index),
        }
    }

    fn measure_all(&mut self) {
        let points = self.tri.points();
        let edges = &self.edges;
        let (volumes, centroids): (Vec<f64>, Vec<DVec2>) = self
            .cell_edges
            .par_iter_mut()
            .enumerate()
            .map(|(i, cell)| order_and_measure(points[i], edges, cell))
            .unzip();
        self.volumes = volumes;
        self.centroids = centroids;
    }

    /// Reorder and remeasure the given cells after a local edit.
    pub(crate) fn measure_cells(&mut self, cells: &[usize]) {
        let points = self.tri.points();
        for &i in cells {
            let (volume, centroid) = order_and_measure(points[i], &self.edges, &mut self.cell_edges[i]);
            self.volumes[i] = volume;
            self.centroids[i] = centroid;
        }
    }

    pub fn boundary(&self) -> &dyn OuterBoundary {
        self.boundary.as_ref()
    }

    pub(crate) fn boundary_arc(&self) -> Arc<dyn OuterBoundary> {
        Arc::clone(&self.boundary)
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// The triangulation dual to the mesh. `None` after an in-place
    /// [`refine_cells`](Self::refine_cells) or [`remove_cells`](Self::remove_cells)
    /// until the next update rebuilds it.
    pub fn delaunay(&self) -> Option<&Delaunay> {
        (!self.tri.facets().is_empty()).then_some(&self.tri)
    }

    /// Number of generators (real cells).
    pub fn point_count(&self) -> usize {
        self.tri.real_count()
    }

    /// Number of mesh points, including the seeding triangle and the ghosts.
    pub fn total_points(&self) -> usize {
        self.tri.len()
    }

    pub fn mesh_point(&self, index: usize) -> DVec2 {
        self.tri.point(index)
    }

    /// Positions of the generators.
    pub fn mesh_points(&self) -> &[DVec2] {
        &self.tri.points()[..self.point_count()]
    }

    pub fn all_points(&self) -> &[DVec2] {
        self.tri.points()
    }

    pub fn cell_edges(&self, cell: usize) -> &[usize] {
        &self.cell_edges[cell]
    }

    pub fn edge(&self, index: usize) -> &Edge {
        &self.edges[index]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn total_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn volume(&self, cell: usize) -> f64 {
        self.volumes[cell]
    }

    pub fn volumes(&self) -> &[f64] {
        &self.volumes
    }

    pub fn centroid(&self, cell: usize) -> DVec2 {
        self.centroids[cell]
    }

    /// Radius of the circle with the same area as the cell.
    pub fn width(&self, cell: usize) -> f64 {
        (self.volumes[cell] / PI).sqrt()
    }

    pub fn ghosts(&self) -> &GhostTable {
        &self.ghosts
    }

    pub fn is_ghost(&self, index: usize) -> bool {
        self.ghosts.contains(index)
    }

    pub fn ghost(&self, index: usize) -> Option<&GhostRecord> {
        self.ghosts.get(index)
    }

    /// The real cell a mesh point stands for: the origin of a local ghost, the
    /// point itself otherwise (including points received from other ranks).
    pub fn original_index(&self, index: usize) -> usize {
        match self.ghosts.get(index) {
            Some(record) if record.is_local() => record.origin,
            _ => index,
        }
    }

    /// Neighbors aligned with [`cell_edges`](Self::cell_edges); `None` for walls.
    pub fn neighbors(&self, cell: usize) -> Vec<Option<usize>> {
        self.cell_edges[cell]
            .iter()
            .map(|e| self.edges[*e].other(cell))
            .collect()
    }

    /// Neighbors of a cell, walls dropped.
    pub fn literal_neighbors(&self, cell: usize) -> Vec<usize> {
        self.neighbors(cell).into_iter().flatten().collect()
    }

    /// Whether the cell touches a wall or a ghost point.
    pub fn near_boundary(&self, cell: usize) -> bool {
        let n = self.point_count();
        self.neighbors(cell)
            .iter()
            .any(|neighbor| neighbor.map_or(true, |k| k >= n))
    }

    /// Vertices of the cell, counter-clockwise.
    pub fn cell_polygon(&self, cell: usize) -> Vec<DVec2> {
        let center = self.tri.point(cell);
        self.cell_edges[cell]
            .iter()
            .map(|e| self.edges[*e].ccw_vertices(center)[0])
            .collect()
    }

    /// Largest distance from the generator to a vertex of its cell.
    pub fn cell_radius(&self, cell: usize) -> f64 {
        let center = self.tri.point(cell);
        self.cell_edges[cell]
            .iter()
            .flat_map(|e| self.edges[*e].vertices)
            .map(|v| v.distance(center))
            .fold(0., f64::max)
    }

    pub fn total_volume(&self) -> f64 {
        self.volumes.iter().sum()
    }

    /// The processor rank this mesh belongs to, if distributed.
    pub fn rank(&self) -> Option<usize> {
        self.local_domain.as_ref().map(|domain| domain.rank)
    }

    /// Processor cell this mesh is restricted to, if distributed.
    pub fn local_cell(&self) -> Option<&[DVec2]> {
        self.local_domain.as_ref().map(|domain| domain.cell.as_slice())
    }

    /// Velocity of a mesh point given the velocities of the generators.
    ///
    /// Ghost velocities follow from their transform; points received from other
    /// ranks take their velocity from `velocities` when it covers them, zero otherwise.
    fn point_velocity(&self, index: usize, velocities: &[DVec2]) -> DVec2 {
        match self.ghosts.get(index) {
            Some(record) if record.is_local() => match record.transform {
                GhostTransform::Reflect(side) => {
                    let normal = side.outward_normal();
                    let w = velocities[record.origin];
                    w - 2. * w.dot(normal) * normal
                }
                GhostTransform::Translate(_) => velocities[record.origin],
            },
            _ => velocities.get(index).copied().unwrap_or(DVec2::ZERO),
        }
    }

    /// Velocities of all edges for the given generator velocities.
    ///
    /// Edges move with the mean of their neighbors plus the correction keeping
    /// the edge on the perpendicular bisector. Walls slide with the tangential
    /// part of the cell velocity.
    pub fn face_velocities(&self, velocities: &[DVec2]) -> Vec<DVec2> {
        self.edges
            .par_iter()
            .map(|edge| match edge.neighbors {
                [Some(left), Some(right)] => {
                    let (rl, rr) = (self.tri.point(left), self.tri.point(right));
                    let (wl, wr) = (
                        self.point_velocity(left, velocities),
                        self.point_velocity(right, velocities),
                    );
                    let dr = rr - rl;
                    let f = edge.midpoint();
                    0.5 * (wl + wr) + (wl - wr).dot(f - 0.5 * (rl + rr)) * dr / dr.length_squared()
                }
                [Some(cell), None] | [None, Some(cell)] => {
                    let tangent = (edge.vertices[1] - edge.vertices[0]).normalize_or_zero();
                    let w = self.point_velocity(cell, velocities);
                    w.dot(tangent) * tangent
                }
                [None, None] => DVec2::ZERO,
            })
            .collect()
    }

    /// New generator positions after moving with `velocities` for `dt`,
    /// folded back into the domain.
    pub fn drift(&self, velocities: &[DVec2], dt: f64) -> Vec<DVec2> {
        self.mesh_points()
            .iter()
            .zip(velocities.iter())
            .map(|(p, w)| {
                let folded = self.boundary.fold_into_domain(*p + dt * *w).0;
                self.boundary.keep_off_walls(folded, self.config.wall_margin)
            })
            .collect()
    }

    /// Append a ghost point to the point array and ghost table, or return the
    /// index of the identical existing ghost. Does not triangulate the point.
    pub(crate) fn find_or_create_ghost(&mut self, record: GhostRecord) -> usize {
        if let Some(index) = self.ghosts.find(&record) {
            return index;
        }
        let origin = self.tri.point(record.origin);
        let position = record.transform.apply(origin, self.boundary.as_ref());
        let index = self.tri.push_detached(position);
        self.ghosts.push(record).unwrap_or(index)
    }
}
