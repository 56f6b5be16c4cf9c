//! Velocity policies for the mesh generating points.

use glam::DVec2;

use crate::{physical_quantities::ComputationalCell, voronoi_mesh::VoronoiMesh};

pub trait PointMotion {
    /// Velocity of every generator of `mesh`.
    fn velocities(&self, mesh: &VoronoiMesh, cells: &[ComputationalCell], time: f64) -> Vec<DVec2>;

    /// Generator positions after a step of `dt`, folded back into the domain.
    fn moved_points(&self, mesh: &VoronoiMesh, cells: &[ComputationalCell], time: f64, dt: f64) -> Vec<DVec2> {
        mesh.drift(&self.velocities(mesh, cells, time), dt)
    }
}

/// A static mesh.
#[derive(Debug, Clone, Copy, Default)]
pub struct Eulerian;

impl PointMotion for Eulerian {
    fn velocities(&self, mesh: &VoronoiMesh, _cells: &[ComputationalCell], _time: f64) -> Vec<DVec2> {
        vec![DVec2::ZERO; mesh.point_count()]
    }
}

/// Generators move with the fluid velocity of their cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lagrangian;

impl PointMotion for Lagrangian {
    fn velocities(&self, mesh: &VoronoiMesh, cells: &[ComputationalCell], _time: f64) -> Vec<DVec2> {
        (0..mesh.point_count())
            .map(|i| cells.get(i).map_or(DVec2::ZERO, |cell| cell.velocity))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use float_cmp::assert_approx_eq;
    use glam::DVec2;

    use super::{Eulerian, Lagrangian, PointMotion};
    use crate::{
        boundary::{BoundaryKind, SquareBox},
        config::MeshConfig,
        physical_quantities::ComputationalCell,
        voronoi_mesh::VoronoiMesh,
    };

    #[test]
    fn test_motion() {
        let points = vec![DVec2::new(0.25, 0.5), DVec2::new(0.75, 0.5)];
        let boundary = Arc::new(SquareBox::new(DVec2::ZERO, DVec2::ONE, BoundaryKind::Periodic));
        let mesh = VoronoiMesh::new(&points, boundary, MeshConfig::default()).unwrap();
        let cells = vec![ComputationalCell::new(1., 1., DVec2::new(1., 0.)); 2];

        assert!(Eulerian.velocities(&mesh, &cells, 0.).iter().all(|v| *v == DVec2::ZERO));
        let moved = Lagrangian.moved_points(&mesh, &cells, 0., 0.5);
        // The second point wraps around the periodic boundary.
        assert_approx_eq!(f64, moved[0].x, 0.75);
        assert_approx_eq!(f64, moved[1].x, 0.25);
    }
}
