use std::fmt::Debug;

use glam::{DVec2, IVec2};
use yaml_rust::Yaml;

use crate::errors::ConfigError;

/// The four sides of a rectangular domain, counter-clockwise starting from the right.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
)]
#[repr(usize)]
pub enum BoxSide {
    Right = 0,
    Up = 1,
    Left = 2,
    Down = 3,
}

impl BoxSide {
    pub const ALL: [BoxSide; 4] = [BoxSide::Right, BoxSide::Up, BoxSide::Left, BoxSide::Down];

    pub fn outward_normal(self) -> DVec2 {
        match self {
            BoxSide::Right => DVec2::X,
            BoxSide::Up => DVec2::Y,
            BoxSide::Left => DVec2::NEG_X,
            BoxSide::Down => DVec2::NEG_Y,
        }
    }

    /// Periodic offset (in units of the box size) of the images lying beyond this side.
    pub fn period(self) -> IVec2 {
        self.outward_normal().as_ivec2()
    }

    pub fn is_horizontal_axis(self) -> bool {
        matches!(self, BoxSide::Right | BoxSide::Left)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    /// Reflecting walls on all four sides.
    Rigid,
    /// Periodic in both directions.
    Periodic,
    /// Periodic in x, reflecting walls at the bottom and top.
    HalfPeriodic,
}

/// Description of the outer boundary of the simulated domain.
pub trait OuterBoundary: Debug + Send + Sync {
    /// Lower left and upper right corner of the domain.
    fn extents(&self) -> (DVec2, DVec2);

    fn kind(&self) -> BoundaryKind;

    fn is_reflective(&self, side: BoxSide) -> bool {
        match self.kind() {
            BoundaryKind::Rigid => true,
            BoundaryKind::Periodic => false,
            BoundaryKind::HalfPeriodic => !side.is_horizontal_axis(),
        }
    }

    fn width(&self) -> DVec2 {
        let (min, max) = self.extents();
        max - min
    }

    /// Corners in counter-clockwise order, starting at the lower left.
    fn corners(&self) -> [DVec2; 4] {
        let (min, max) = self.extents();
        [min, DVec2::new(max.x, min.y), max, DVec2::new(min.x, max.y)]
    }

    /// The side as a segment, oriented counter-clockwise around the domain.
    fn side_segment(&self, side: BoxSide) -> [DVec2; 2] {
        let [ll, lr, ur, ul] = self.corners();
        match side {
            BoxSide::Right => [lr, ur],
            BoxSide::Up => [ur, ul],
            BoxSide::Left => [ul, ll],
            BoxSide::Down => [ll, lr],
        }
    }

    fn contains(&self, point: DVec2) -> bool {
        let (min, max) = self.extents();
        point.cmpge(min).all() && point.cmple(max).all()
    }

    fn is_periodic_axis(&self, axis: usize) -> bool {
        match self.kind() {
            BoundaryKind::Rigid => false,
            BoundaryKind::Periodic => true,
            BoundaryKind::HalfPeriodic => axis == 0,
        }
    }

    /// Translation corresponding to an integer periodic offset.
    fn periodic_shift(&self, period: IVec2) -> DVec2 {
        period.as_dvec2() * self.width()
    }

    /// Mirror `point` in the line containing `side`.
    fn reflect(&self, point: DVec2, side: BoxSide) -> DVec2 {
        let (min, max) = self.extents();
        match side {
            BoxSide::Right => DVec2::new(2. * max.x - point.x, point.y),
            BoxSide::Left => DVec2::new(2. * min.x - point.x, point.y),
            BoxSide::Up => DVec2::new(point.x, 2. * max.y - point.y),
            BoxSide::Down => DVec2::new(point.x, 2. * min.y - point.y),
        }
    }

    /// Bring `point` back inside the domain: periodic axes wrap around,
    /// reflective sides mirror the point back in.
    ///
    /// Returns the folded point and the periodic offset that was applied.
    fn fold_into_domain(&self, point: DVec2) -> (DVec2, IVec2) {
        let (min, max) = self.extents();
        let width = self.width();
        let mut folded = point;
        let mut period = IVec2::ZERO;
        for axis in 0..2 {
            if self.is_periodic_axis(axis) {
                while folded[axis] >= max[axis] {
                    folded[axis] -= width[axis];
                    period[axis] -= 1;
                }
                while folded[axis] < min[axis] {
                    folded[axis] += width[axis];
                    period[axis] += 1;
                }
            } else {
                if folded[axis] > max[axis] {
                    folded[axis] = 2. * max[axis] - folded[axis];
                }
                if folded[axis] < min[axis] {
                    folded[axis] = 2. * min[axis] - folded[axis];
                }
            }
        }
        (folded, period)
    }

    /// Move `point` at least `margin` domain widths away from the reflective
    /// sides. A generator on a wall would coincide with its mirror image.
    fn keep_off_walls(&self, point: DVec2, margin: f64) -> DVec2 {
        let (min, max) = self.extents();
        let gap = margin * self.width();
        let mut moved = point;
        for axis in 0..2 {
            if !self.is_periodic_axis(axis) {
                moved[axis] = moved[axis].clamp(min[axis] + gap[axis], max[axis] - gap[axis]);
            }
        }
        moved
    }

    /// The periodic offsets under which images of the domain touch it.
    fn periodic_offsets(&self) -> Vec<IVec2> {
        let range = |axis: usize| if self.is_periodic_axis(axis) { -1..=1 } else { 0..=0 };
        let mut offsets = vec![];
        for i in range(0) {
            for j in range(1) {
                offsets.push(IVec2::new(i, j));
            }
        }
        offsets
    }
}

/// A rectangular domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquareBox {
    min: DVec2,
    max: DVec2,
    kind: BoundaryKind,
}

impl SquareBox {
    pub fn new(min: DVec2, max: DVec2, kind: BoundaryKind) -> Self {
        Self { min, max, kind }
    }

    /// Read a boundary description of the form
    ///
    /// ```yaml
    /// boundary: "periodic"
    /// box: [0., 0., 1., 1.]
    /// ```
    pub fn from_yaml(cfg: &Yaml) -> Result<Self, ConfigError> {
        let boundary = cfg["boundary"].as_str().unwrap_or("rigid").to_string();
        let kind = match boundary.as_str() {
            "rigid" | "reflective" => BoundaryKind::Rigid,
            "periodic" => BoundaryKind::Periodic,
            "half_periodic" => BoundaryKind::HalfPeriodic,
            _ => return Err(ConfigError::UnknownBoundary(boundary)),
        };
        let values = cfg["box"]
            .as_vec()
            .ok_or_else(|| ConfigError::MissingParameter("box".to_string()))?;
        let values = values
            .iter()
            .map(|v| match v {
                Yaml::Integer(i) => Some(*i as f64),
                v => v.as_f64(),
            })
            .collect::<Option<Vec<_>>>()
            .filter(|values| values.len() == 4)
            .ok_or_else(|| ConfigError::InvalidValue {
                name: "box".to_string(),
                value: format!("{:?}", cfg["box"]),
            })?;
        let (min, max) = (
            DVec2::new(values[0], values[1]),
            DVec2::new(values[2], values[3]),
        );
        if !(max.x > min.x && max.y > min.y) {
            return Err(ConfigError::InvalidValue {
                name: "box".to_string(),
                value: format!("{values:?}"),
            });
        }
        Ok(Self::new(min, max, kind))
    }
}

impl OuterBoundary for SquareBox {
    fn extents(&self) -> (DVec2, DVec2) {
        (self.min, self.max)
    }

    fn kind(&self) -> BoundaryKind {
        self.kind
    }
}
