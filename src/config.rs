use yaml_rust::Yaml;

use crate::errors::ConfigError;

fn read_f64(cfg: &Yaml, name: &str, default: f64) -> Result<f64, ConfigError> {
    match &cfg[name] {
        Yaml::BadValue | Yaml::Null => Ok(default),
        Yaml::Integer(value) => Ok(*value as f64),
        value => value.as_f64().ok_or_else(|| ConfigError::InvalidValue {
            name: name.to_string(),
            value: format!("{value:?}"),
        }),
    }
}

fn read_usize(cfg: &Yaml, name: &str, default: usize) -> Result<usize, ConfigError> {
    match &cfg[name] {
        Yaml::BadValue | Yaml::Null => Ok(default),
        Yaml::Integer(value) if *value >= 0 => Ok(*value as usize),
        value => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: format!("{value:?}"),
        }),
    }
}

/// Numerical constants used while building and editing a [`VoronoiMesh`](crate::VoronoiMesh).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshConfig {
    /// Voronoi edges shorter than this fraction of the adjacent facet radii are dropped.
    pub edge_eps: f64,
    /// Relative tolerance of segment intersection tests.
    pub intersection_eps: f64,
    /// Two facet vertices count as nearly coincident below this squared distance ratio.
    pub circumcenter_ratio: f64,
    /// Below this number of points every point is copied along every boundary.
    pub small_mesh_threshold: usize,
    /// A cell is final once every point within `safety_factor` times its radius is present.
    pub safety_factor: f64,
    pub max_boundary_passes: usize,
    /// Generators closer to a reflecting wall than this fraction of the domain
    /// width are moved to that distance.
    pub wall_margin: f64,
    /// Size of the seeding triangle relative to the bounding polygon.
    pub super_triangle_scale: f64,
    /// Offset of a refined point, in units of the cell width.
    pub refine_alpha: f64,
    /// Most negative volume change ratio tolerated when removing a cell.
    pub remove_min_ratio: f64,
    pub remove_sum_tolerance: f64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            edge_eps: 1e-8,
            intersection_eps: 1e-7,
            circumcenter_ratio: 0.1,
            small_mesh_threshold: 20,
            safety_factor: 2.,
            max_boundary_passes: 8,
            wall_margin: 1e-6,
            super_triangle_scale: 100.,
            refine_alpha: 0.25,
            remove_min_ratio: -1e-5,
            remove_sum_tolerance: 1e-4,
        }
    }
}

impl MeshConfig {
    pub fn from_yaml(cfg: &Yaml) -> Result<Self, ConfigError> {
        let default = Self::default();
        let config = Self {
            edge_eps: read_f64(cfg, "edge_eps", default.edge_eps)?,
            intersection_eps: read_f64(cfg, "intersection_eps", default.intersection_eps)?,
            circumcenter_ratio: read_f64(cfg, "circumcenter_ratio", default.circumcenter_ratio)?,
            small_mesh_threshold: read_usize(
                cfg,
                "small_mesh_threshold",
                default.small_mesh_threshold,
            )?,
            safety_factor: read_f64(cfg, "safety_factor", default.safety_factor)?,
            max_boundary_passes: read_usize(
                cfg,
                "max_boundary_passes",
                default.max_boundary_passes,
            )?,
            wall_margin: read_f64(cfg, "wall_margin", default.wall_margin)?,
            super_triangle_scale: read_f64(
                cfg,
                "super_triangle_scale",
                default.super_triangle_scale,
            )?,
            refine_alpha: read_f64(cfg, "refine_alpha", default.refine_alpha)?,
            remove_min_ratio: read_f64(cfg, "remove_min_ratio", default.remove_min_ratio)?,
            remove_sum_tolerance: read_f64(
                cfg,
                "remove_sum_tolerance",
                default.remove_sum_tolerance,
            )?,
        };
        if !(config.wall_margin >= 0. && config.wall_margin < 0.5) {
            return Err(ConfigError::InvalidValue {
                name: "wall_margin".to_string(),
                value: config.wall_margin.to_string(),
            });
        }
        if config.safety_factor < 2. {
            return Err(ConfigError::InvalidValue {
                name: "safety_factor".to_string(),
                value: config.safety_factor.to_string(),
            });
        }
        Ok(config)
    }
}

/// Thresholds of the adaptive mesh refinement drivers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmrConfig {
    /// Minimal `4 pi V / L^2` of a cell that may be split.
    pub min_aspect_ratio: f64,
    /// Neighbors closer than this many cell widths are never split towards.
    pub min_neighbor_distance: f64,
    /// Shared edges shorter than this many cell widths are never split across.
    pub min_edge_length: f64,
    /// Fraction of the way towards the neighbor centroid where the new point goes.
    pub candidate_weight: f64,
    pub min_candidate_distance: f64,
    /// Overlap contributions below this fraction of the cell volume are ignored.
    pub overlap_threshold: f64,
    pub volume_tolerance: f64,
    pub periodic_volume_tolerance: f64,
    pub merit_tolerance: f64,
}

impl Default for AmrConfig {
    fn default() -> Self {
        Self {
            min_aspect_ratio: 0.65,
            min_neighbor_distance: 1.75,
            min_edge_length: 0.5,
            candidate_weight: 0.25,
            min_candidate_distance: 0.5,
            overlap_threshold: 1e-8,
            volume_tolerance: 1e-6,
            periodic_volume_tolerance: 1e-2,
            merit_tolerance: 1e-9,
        }
    }
}

impl AmrConfig {
    pub fn from_yaml(cfg: &Yaml) -> Result<Self, ConfigError> {
        let default = Self::default();
        Ok(Self {
            min_aspect_ratio: read_f64(cfg, "min_aspect_ratio", default.min_aspect_ratio)?,
            min_neighbor_distance: read_f64(
                cfg,
                "min_neighbor_distance",
                default.min_neighbor_distance,
            )?,
            min_edge_length: read_f64(cfg, "min_edge_length", default.min_edge_length)?,
            candidate_weight: read_f64(cfg, "candidate_weight", default.candidate_weight)?,
            min_candidate_distance: read_f64(
                cfg,
                "min_candidate_distance",
                default.min_candidate_distance,
            )?,
            overlap_threshold: read_f64(cfg, "overlap_threshold", default.overlap_threshold)?,
            volume_tolerance: read_f64(cfg, "volume_tolerance", default.volume_tolerance)?,
            periodic_volume_tolerance: read_f64(
                cfg,
                "periodic_volume_tolerance",
                default.periodic_volume_tolerance,
            )?,
            merit_tolerance: read_f64(cfg, "merit_tolerance", default.merit_tolerance)?,
        })
    }
}

#[cfg(test)]
mod test {
    use yaml_rust::YamlLoader;

    use super::{AmrConfig, MeshConfig};
    use crate::errors::ConfigError;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let cfg = &YamlLoader::load_from_str("{}").unwrap()[0];
        assert_eq!(MeshConfig::from_yaml(cfg).unwrap(), MeshConfig::default());
        assert_eq!(AmrConfig::from_yaml(cfg).unwrap(), AmrConfig::default());
    }

    #[test]
    fn test_overrides() {
        let cfg = &YamlLoader::load_from_str(
            "edge_eps: 1e-10\nmax_boundary_passes: 3\nsuper_triangle_scale: 50",
        )
        .unwrap()[0];
        let config = MeshConfig::from_yaml(cfg).unwrap();
        assert_eq!(config.edge_eps, 1e-10);
        assert_eq!(config.max_boundary_passes, 3);
        assert_eq!(config.super_triangle_scale, 50.);
    }

    #[test]
    fn test_invalid_values() {
        let cfg = &YamlLoader::load_from_str("max_boundary_passes: \"many\"").unwrap()[0];
        assert!(matches!(
            MeshConfig::from_yaml(cfg),
            Err(ConfigError::InvalidValue { .. })
        ));
        let cfg = &YamlLoader::load_from_str("safety_factor: 1.5").unwrap()[0];
        assert!(MeshConfig::from_yaml(cfg).is_err());
    }
}
