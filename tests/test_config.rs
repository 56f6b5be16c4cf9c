use common::{
    get_amr_config, get_boundary, get_eos, get_mesh_config, random_points, AMR_CONFIG, BOUNDARY_CONFIG, EOS_CONFIG,
    MESH_CONFIG,
};
use float_cmp::assert_approx_eq;
use glam::DVec2;
use mvmm_tess::{AmrConfig, BoundaryKind, ConfigError, MeshConfig, OuterBoundary, VoronoiMesh};
use std::sync::Arc;
use yaml_rust::YamlLoader;

mod common;

#[test]
fn test_configs() {
    let boundary = get_boundary(BOUNDARY_CONFIG);
    assert_eq!(boundary.kind(), BoundaryKind::HalfPeriodic);
    assert_eq!(boundary.extents(), (DVec2::ZERO, DVec2::new(2., 1.)));

    let mesh_config = get_mesh_config(MESH_CONFIG);
    assert_approx_eq!(f64, mesh_config.safety_factor, 2.5);
    assert_eq!(mesh_config.max_boundary_passes, 12);
    assert_eq!(mesh_config.small_mesh_threshold, 10);
    assert_approx_eq!(f64, mesh_config.edge_eps, MeshConfig::default().edge_eps);

    let amr_config = get_amr_config(AMR_CONFIG);
    assert_approx_eq!(f64, amr_config.min_aspect_ratio, 0.5);
    assert_approx_eq!(f64, amr_config.volume_tolerance, 1e-7);
    assert_approx_eq!(f64, amr_config.min_neighbor_distance, AmrConfig::default().min_neighbor_distance);

    let eos = get_eos(EOS_CONFIG);
    assert_approx_eq!(f64, eos.gamma().gamma(), 1.4);
}

#[test]
fn test_mesh_from_config() {
    let boundary = Arc::new(get_boundary(BOUNDARY_CONFIG));
    let points: Vec<DVec2> = random_points(100, 41)
        .into_iter()
        .map(|p| DVec2::new(2. * p.x, p.y))
        .collect();
    let mesh = VoronoiMesh::new(&points, boundary, get_mesh_config(MESH_CONFIG)).unwrap();
    assert_approx_eq!(f64, mesh.total_volume(), 2., epsilon = 1e-9);
}

#[test]
fn test_invalid_configs() {
    let load = |s: &str| YamlLoader::load_from_str(s).unwrap().remove(0);
    assert!(matches!(
        mvmm_tess::SquareBox::from_yaml(&load("boundary: \"spherical\"\nbox: [0, 0, 1, 1]\n")),
        Err(ConfigError::UnknownBoundary(_))
    ));
    assert!(matches!(
        mvmm_tess::SquareBox::from_yaml(&load("boundary: \"rigid\"\nbox: [1, 1, 0, 0]\n")),
        Err(ConfigError::InvalidValue { .. })
    ));
    assert!(matches!(
        mvmm_tess::SquareBox::from_yaml(&load("boundary: \"periodic\"\n")),
        Err(ConfigError::MissingParameter(_))
    ));
    assert!(MeshConfig::from_yaml(&load("safety_factor: \"large\"\n")).is_err());
    assert!(MeshConfig::from_yaml(&load("max_boundary_passes: -1\n")).is_err());
    assert!(MeshConfig::from_yaml(&load("wall_margin: 0.7\n")).is_err());
    assert!(AmrConfig::from_yaml(&load("merit_tolerance: [1]\n")).is_err());
}
