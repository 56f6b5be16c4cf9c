use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

use glam::DVec2;

use crate::gas_law::GasLaw;

/// Primitive (intensive) state of a cell.
///
/// Tracers are specific quantities (per unit mass), stickers are flags that
/// travel with the cell.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct ComputationalCell {
    pub density: f64,
    pub pressure: f64,
    pub velocity: DVec2,
    pub tracers: Vec<f64>,
    pub stickers: Vec<bool>,
}

/// Conserved (extensive) content of a cell. Tracers are stored as tracer
/// times mass.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Extensive {
    pub mass: f64,
    pub energy: f64,
    pub momentum: DVec2,
    pub tracers: Vec<f64>,
}

impl ComputationalCell {
    pub fn new(density: f64, pressure: f64, velocity: DVec2) -> Self {
        Self {
            density,
            pressure,
            velocity,
            tracers: vec![],
            stickers: vec![],
        }
    }

    pub fn with_tracers(mut self, tracers: Vec<f64>) -> Self {
        self.tracers = tracers;
        self
    }

    pub fn with_stickers(mut self, stickers: Vec<bool>) -> Self {
        self.stickers = stickers;
        self
    }

    pub fn vacuum() -> Self {
        Self::default()
    }

    pub fn sticker(&self, index: usize) -> bool {
        self.stickers.get(index).copied().unwrap_or(false)
    }

    /// Primitive state of the extensive content of a cell of `volume`.
    ///
    /// Stickers are not part of the extensive state and are taken from `old`.
    pub fn from_extensive(extensive: &Extensive, volume: f64, eos: &GasLaw, old: &Self) -> Self {
        if !(extensive.mass > 0.) || !(volume > 0.) {
            log::warn!("Non positive mass or volume in cell conversion, resetting to vacuum");
            return Self::vacuum().with_stickers(old.stickers.clone());
        }
        let m_inv = 1. / extensive.mass;
        let density = extensive.mass / volume;
        let velocity = extensive.momentum * m_inv;
        let pressure = eos.gas_pressure_from_internal_energy(extensive.internal_energy(), density);
        Self {
            density,
            pressure,
            velocity,
            tracers: extensive.tracers.iter().map(|t| t * m_inv).collect(),
            stickers: old.stickers.clone(),
        }
    }
}

impl Extensive {
    pub fn new(mass: f64, energy: f64, momentum: DVec2) -> Self {
        Self {
            mass,
            energy,
            momentum,
            tracers: vec![],
        }
    }

    pub fn zeros(tracers: usize) -> Self {
        Self {
            tracers: vec![0.; tracers],
            ..Default::default()
        }
    }

    /// Specific internal energy: `E = E_kin + m * e`.
    pub fn internal_energy(&self) -> f64 {
        let m_inv = 1. / self.mass;
        (self.energy - 0.5 * self.momentum.length_squared() * m_inv) * m_inv
    }

    pub fn from_cell(cell: &ComputationalCell, volume: f64, eos: &GasLaw) -> Self {
        let mass = cell.density * volume;
        let internal_energy = if cell.density > 0. {
            eos.gas_internal_energy_from_pressure(cell.pressure, 1. / cell.density)
        } else {
            0.
        };
        Self {
            mass,
            energy: mass * internal_energy + 0.5 * mass * cell.velocity.length_squared(),
            momentum: mass * cell.velocity,
            tracers: cell.tracers.iter().map(|t| t * mass).collect(),
        }
    }

    fn combine_tracers(&mut self, rhs: &[f64], sign: f64) {
        if self.tracers.len() < rhs.len() {
            self.tracers.resize(rhs.len(), 0.);
        }
        for (t, r) in self.tracers.iter_mut().zip(rhs.iter()) {
            *t += sign * r;
        }
    }
}

impl AddAssign<&Extensive> for Extensive {
    fn add_assign(&mut self, rhs: &Extensive) {
        self.mass += rhs.mass;
        self.energy += rhs.energy;
        self.momentum += rhs.momentum;
        self.combine_tracers(&rhs.tracers, 1.);
    }
}

impl AddAssign for Extensive {
    fn add_assign(&mut self, rhs: Self) {
        *self += &rhs;
    }
}

impl SubAssign<&Extensive> for Extensive {
    fn sub_assign(&mut self, rhs: &Extensive) {
        self.mass -= rhs.mass;
        self.energy -= rhs.energy;
        self.momentum -= rhs.momentum;
        self.combine_tracers(&rhs.tracers, -1.);
    }
}

impl Add for Extensive {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += &rhs;
        self
    }
}

impl Sub for Extensive {
    type Output = Self;

    fn sub(mut self, rhs: Self) -> Self::Output {
        self -= &rhs;
        self
    }
}

impl Mul<&Extensive> for f64 {
    type Output = Extensive;

    fn mul(self, rhs: &Extensive) -> Self::Output {
        Extensive {
            mass: self * rhs.mass,
            energy: self * rhs.energy,
            momentum: self * rhs.momentum,
            tracers: rhs.tracers.iter().map(|t| self * t).collect(),
        }
    }
}

impl Mul<Extensive> for f64 {
    type Output = Extensive;

    fn mul(self, rhs: Extensive) -> Self::Output {
        self * &rhs
    }
}
