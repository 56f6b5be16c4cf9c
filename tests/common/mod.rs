use std::sync::Arc;

use float_cmp::assert_approx_eq;
use glam::DVec2;
use mvmm_tess::{
    gas_law::GasLaw, physical_quantities::ComputationalCell, AmrConfig, BoundaryKind, MeshConfig, SquareBox,
    VoronoiMesh,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use yaml_rust::YamlLoader;

pub const BOUNDARY_CONFIG: &'static str = r##"
boundary: "half_periodic"
box: [0., 0., 2., 1.]
"##;

pub const MESH_CONFIG: &'static str = r##"
safety_factor: 2.5
max_boundary_passes: 12
small_mesh_threshold: 10
"##;

pub const AMR_CONFIG: &'static str = r##"
min_aspect_ratio: 0.5
volume_tolerance: 1e-7
"##;

pub const EOS_CONFIG: &'static str = r##"
gamma: 1.4
equation_of_state: "ideal"
"##;

pub fn get_boundary(cfg: &str) -> SquareBox {
    SquareBox::from_yaml(&YamlLoader::load_from_str(cfg).expect("Error loading boundary cfg!")[0])
        .expect("Error creating boundary!")
}

pub fn get_mesh_config(cfg: &str) -> MeshConfig {
    MeshConfig::from_yaml(&YamlLoader::load_from_str(cfg).expect("Error loading mesh cfg!")[0])
        .expect("Error creating mesh config!")
}

pub fn get_amr_config(cfg: &str) -> AmrConfig {
    AmrConfig::from_yaml(&YamlLoader::load_from_str(cfg).expect("Error loading AMR cfg!")[0])
        .expect("Error creating AMR config!")
}

pub fn get_eos(cfg: &str) -> GasLaw {
    GasLaw::from_yaml(&YamlLoader::load_from_str(cfg).expect("Error loading EOS cfg!")[0])
        .expect("Error creating GasLaw!")
}

pub fn unit_box(kind: BoundaryKind) -> Arc<SquareBox> {
    Arc::new(SquareBox::new(DVec2::ZERO, DVec2::ONE, kind))
}

pub fn random_points(count: usize, seed: u64) -> Vec<DVec2> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| DVec2::new(rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)))
        .collect()
}

pub fn lattice(n: usize) -> Vec<DVec2> {
    let h = 1. / n as f64;
    (0..n * n)
        .map(|i| DVec2::new(((i % n) as f64 + 0.5) * h, ((i / n) as f64 + 0.5) * h))
        .collect()
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn get_mesh(points: &[DVec2], kind: BoundaryKind) -> VoronoiMesh {
    init_logging();
    VoronoiMesh::new(points, unit_box(kind), MeshConfig::default()).expect("Error building mesh!")
}

/// A smooth, non uniform state.
pub fn get_cells(points: &[DVec2]) -> Vec<ComputationalCell> {
    points
        .iter()
        .map(|p| {
            ComputationalCell::new(1. + p.x + 0.5 * p.y, 1. + p.y, DVec2::new(p.y, -p.x))
                .with_tracers(vec![p.x * p.y])
        })
        .collect()
}

/// Every Voronoi vertex is equidistant from the generators of its edge, every
/// cell is a closed counter-clockwise polygon and the cells tile the domain.
pub fn assert_valid(mesh: &VoronoiMesh) {
    for edge in mesh.edges() {
        if let [Some(left), Some(right)] = edge.neighbors {
            let (pl, pr) = (mesh.mesh_point(left), mesh.mesh_point(right));
            for vertex in edge.vertices {
                assert_approx_eq!(f64, vertex.distance(pl), vertex.distance(pr), epsilon = 1e-9);
            }
        }
    }
    for cell in 0..mesh.point_count() {
        let center = mesh.mesh_point(cell);
        let edges = mesh.cell_edges(cell);
        assert!(edges.len() >= 3, "cell {cell} has {} edges", edges.len());
        for (i, e) in edges.iter().enumerate() {
            let end = mesh.edge(*e).ccw_vertices(center)[1];
            let next = mesh.edge(edges[(i + 1) % edges.len()]).ccw_vertices(center)[0];
            assert!(end.distance(next) < 1e-9, "cell {cell} is not closed");
        }
        assert!(mesh.volume(cell) > 0.);
    }
    let width = mesh.boundary().width();
    assert_approx_eq!(f64, mesh.total_volume(), width.x * width.y, epsilon = 1e-9);
}
