use glam::{DVec2, IVec2};
use rayon::prelude::*;
use rstar::{primitives::GeomWithData, RTree};

use super::VoronoiMesh;
use crate::{
    boundary::{BoundaryKind, BoxSide, OuterBoundary},
    errors::{TessResult, TessellationError},
    geometry::{bounding_box, point_in_convex_polygon, segment_intersection},
    ghost::{GhostRecord, GhostTransform},
};

pub(crate) type IndexedPoint = GeomWithData<[f64; 2], usize>;

pub(crate) fn point_tree(points: &[DVec2]) -> RTree<IndexedPoint> {
    RTree::bulk_load(
        points
            .iter()
            .enumerate()
            .map(|(i, p)| IndexedPoint::new([p.x, p.y], i))
            .collect(),
    )
}

/// Whether the convex `polygon` crosses or contains the segment.
pub(crate) fn polygon_meets_segment(polygon: &[DVec2], segment: [DVec2; 2], eps: f64) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    polygon
        .iter()
        .zip(polygon.iter().cycle().skip(1))
        .any(|(a, b)| segment_intersection([*a, *b], segment, eps).is_some())
        || point_in_convex_polygon(polygon, segment[0])
        || point_in_convex_polygon(polygon, segment[1])
}

/// Whether the disc around `center` reaches into the box `(min, max)`.
pub(crate) fn disc_meets_box(center: DVec2, radius: f64, (min, max): (DVec2, DVec2)) -> bool {
    center.clamp(min, max).distance_squared(center) <= radius * radius
}

/// Every transform producing images of the domain adjacent to it.
pub(crate) fn boundary_transforms(boundary: &dyn OuterBoundary) -> Vec<GhostTransform> {
    let mut transforms: Vec<GhostTransform> = BoxSide::ALL
        .into_iter()
        .filter(|side| boundary.is_reflective(*side))
        .map(GhostTransform::Reflect)
        .collect();
    transforms.extend(
        boundary
            .periodic_offsets()
            .into_iter()
            .filter(|period| *period != IVec2::ZERO)
            .map(GhostTransform::Translate),
    );
    transforms
}

/// Bounding box of the image of the domain under `transform`.
pub(crate) fn image_box(boundary: &dyn OuterBoundary, transform: &GhostTransform) -> (DVec2, DVec2) {
    let corners = boundary.corners().map(|c| transform.apply(c, boundary));
    bounding_box(&corners)
}

impl VoronoiMesh {
    /// Add the mirror and periodic images needed to close every real cell.
    ///
    /// The images of the cells crossing the sides of the domain are added first.
    /// Additional passes then add every image within the safety radius of a real
    /// cell until a pass finds nothing new.
    pub(super) fn generate_boundary_ghosts(&mut self) -> TessResult<()> {
        let seed = self.seed_boundary_ghosts()?;
        self.add_local_ghosts(seed)?;
        let mut passes = 0;
        loop {
            let missing = self.find_missing_local_ghosts(None);
            if missing.is_empty() {
                break;
            }
            passes += 1;
            if passes > self.config.max_boundary_passes {
                return Err(TessellationError::topology(
                    missing[0].origin,
                    format!("boundary ghosts still incomplete after {} passes", passes - 1),
                ));
            }
            self.add_local_ghosts(missing)?;
        }
        log::debug!(
            "Generated {} boundary ghosts in {} additional passes",
            self.ghosts.len(),
            passes
        );
        Ok(())
    }

    fn ghost_for_side(&self, side: BoxSide) -> GhostTransform {
        if self.boundary.is_reflective(side) {
            GhostTransform::Reflect(side)
        } else {
            GhostTransform::Translate(-side.period())
        }
    }

    /// Real cells crossing each side of the domain (all cells for small meshes).
    pub(crate) fn cells_crossing_sides(&self) -> TessResult<[Vec<usize>; 4]> {
        let n = self.point_count();
        let mut crossing: [Vec<usize>; 4] = Default::default();
        if n < self.config.small_mesh_threshold {
            for list in crossing.iter_mut() {
                list.extend(0..n);
            }
            return Ok(crossing);
        }
        let eps = self.config.intersection_eps;
        let sides = BoxSide::ALL.map(|side| self.boundary.side_segment(side));
        let per_cell: Vec<[bool; 4]> = (0..n)
            .into_par_iter()
            .map(|i| {
                let polygon = self.cell_polygon(i);
                sides.map(|segment| polygon_meets_segment(&polygon, segment, eps))
            })
            .collect();
        for (i, hits) in per_cell.iter().enumerate() {
            if hits.iter().all(|hit| *hit) {
                return Err(TessellationError::geometry(
                    "cell crosses all four sides of the domain",
                    vec![i],
                    vec![self.mesh_point(i)],
                ));
            }
            for (side, hit) in hits.iter().enumerate() {
                if *hit {
                    crossing[side].push(i);
                }
            }
        }
        Ok(crossing)
    }

    fn seed_boundary_ghosts(&self) -> TessResult<Vec<GhostRecord>> {
        let crossing = self.cells_crossing_sides()?;
        let mut records = vec![];
        for side in BoxSide::ALL {
            let transform = self.ghost_for_side(side);
            records.extend(
                crossing[usize::from(side)]
                    .iter()
                    .map(|i| GhostRecord::local(*i, transform)),
            );
        }
        if self.boundary.kind() == BoundaryKind::Periodic {
            for horizontal in [BoxSide::Right, BoxSide::Left] {
                for vertical in [BoxSide::Up, BoxSide::Down] {
                    let period = -(horizontal.period() + vertical.period());
                    records.extend(
                        crossing[usize::from(horizontal)]
                            .iter()
                            .filter(|i| crossing[usize::from(vertical)].contains(*i))
                            .map(|i| GhostRecord::local(*i, GhostTransform::Translate(period))),
                    );
                }
            }
        }
        Ok(records)
    }

    /// Local images lying within the safety radius of a real cell that are not
    /// present yet. With `cells` set only those cells are examined.
    pub(crate) fn find_missing_local_ghosts(&self, cells: Option<&[usize]>) -> Vec<GhostRecord> {
        let n = self.point_count();
        let boundary = self.boundary.as_ref();
        let transforms: Vec<(GhostTransform, (DVec2, DVec2))> = boundary_transforms(boundary)
            .into_iter()
            .map(|t| (t, image_box(boundary, &t)))
            .collect();
        if transforms.is_empty() {
            return vec![];
        }
        let tree = point_tree(self.mesh_points());
        let all: Vec<usize>;
        let cells = match cells {
            Some(cells) => cells,
            None => {
                all = (0..n).collect();
                &all
            }
        };
        let mut missing: Vec<GhostRecord> = cells
            .par_iter()
            .flat_map_iter(|&q| {
                let center = self.mesh_point(q);
                let radius = self.config.safety_factor * self.cell_radius(q);
                let mut found = vec![];
                for (transform, image) in transforms.iter() {
                    if !disc_meets_box(center, radius, *image) {
                        continue;
                    }
                    let source = transform.invert(center, boundary);
                    for point in tree.locate_within_distance([source.x, source.y], radius * radius) {
                        let record = GhostRecord::local(point.data, *transform);
                        if self.ghosts.find(&record).is_none() {
                            found.push(record);
                        }
                    }
                }
                found
            })
            .collect();
        missing.sort_by_key(|record| record.sort_key());
        missing.dedup();
        missing
    }

    /// Insert new ghosts into the triangulation and rebuild the cells.
    pub(crate) fn add_local_ghosts(&mut self, records: Vec<GhostRecord>) -> TessResult<()> {
        let boundary = self.boundary_arc();
        let positions: Vec<DVec2> = records
            .into_iter()
            .filter_map(|record| {
                self.ghosts
                    .push(record)
                    .map(|_| record.transform.apply(self.tri.point(record.origin), boundary.as_ref()))
            })
            .collect();
        self.add_ghost_points(&positions)
    }

    /// Triangulate ghost points whose records were already pushed.
    pub(crate) fn add_ghost_points(&mut self, positions: &[DVec2]) -> TessResult<()> {
        if positions.is_empty() {
            return Ok(());
        }
        self.tri.add_ghosts(positions)?;
        self.build_v();
        Ok(())
    }
}
