use yaml_rust::Yaml;

use crate::errors::ConfigError;

#[derive(Debug, Default, Clone, Copy)]
pub struct AdiabaticIndex {
    gamma: f64,
    odgm1: f64,
}

impl From<f64> for AdiabaticIndex {
    fn from(value: f64) -> Self {
        AdiabaticIndex {
            gamma: value,
            odgm1: 1. / (value - 1.),
        }
    }
}

impl From<AdiabaticIndex> for f64 {
    fn from(value: AdiabaticIndex) -> Self {
        value.gamma
    }
}

impl AdiabaticIndex {
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn odgm1(&self) -> f64 {
        self.odgm1
    }
}

#[derive(Debug, Clone, Copy)]
pub enum EquationOfState {
    Ideal,
    Isothermal { isothermal_internal_energy: f64 },
}

/// The equation of state used to convert between primitive and extensive
/// cell states.
#[derive(Debug, Clone, Copy)]
pub struct GasLaw {
    gamma: AdiabaticIndex,
    eos: EquationOfState,
}

impl GasLaw {
    pub fn new(gamma: f64, eos: EquationOfState) -> Self {
        Self {
            gamma: gamma.into(),
            eos,
        }
    }

    /// Reads `gamma` (default 5/3) and `equation_of_state` ("ideal" or
    /// "isothermal", the latter with `isothermal_internal_energy`).
    pub fn from_yaml(cfg: &Yaml) -> Result<Self, ConfigError> {
        let gamma = match &cfg["gamma"] {
            Yaml::BadValue => 5. / 3.,
            value => value
                .as_f64()
                .or_else(|| value.as_i64().map(|v| v as f64))
                .filter(|g| *g > 1.)
                .ok_or_else(|| ConfigError::InvalidValue {
                    name: "gamma".to_string(),
                    value: format!("{:?}", value),
                })?,
        };
        let eos = match cfg["equation_of_state"].as_str().unwrap_or("ideal") {
            "ideal" => EquationOfState::Ideal,
            "isothermal" => EquationOfState::Isothermal {
                isothermal_internal_energy: cfg["isothermal_internal_energy"].as_f64().ok_or_else(|| {
                    ConfigError::MissingParameter("isothermal_internal_energy".to_string())
                })?,
            },
            other => {
                return Err(ConfigError::InvalidValue {
                    name: "equation_of_state".to_string(),
                    value: other.to_string(),
                })
            }
        };
        Ok(Self::new(gamma, eos))
    }

    pub fn gamma(&self) -> &AdiabaticIndex {
        &self.gamma
    }

    /// Specific internal energy
    pub fn gas_internal_energy_from_pressure(&self, pressure: f64, density_inv: f64) -> f64 {
        match self.eos {
            EquationOfState::Ideal => pressure * density_inv * self.gamma.odgm1(),
            EquationOfState::Isothermal {
                isothermal_internal_energy,
            } => isothermal_internal_energy,
        }
    }

    pub fn gas_pressure_from_internal_energy(&self, internal_energy: f64, density: f64) -> f64 {
        match self.eos {
            EquationOfState::Ideal => (self.gamma.gamma - 1.) * internal_energy * density,
            EquationOfState::Isothermal {
                isothermal_internal_energy,
            } => (self.gamma.gamma - 1.) * isothermal_internal_energy * density,
        }
    }
}
