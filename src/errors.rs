use std::{
    error::Error,
    fmt::{Debug, Display},
};

use glam::DVec2;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    MissingParameter(String),
    InvalidValue { name: String, value: String },
    UnknownBoundary(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingParameter(name) => {
                write!(f, "Missing required parameter in configuration: {}", name)
            }
            ConfigError::InvalidValue { name, value } => {
                write!(f, "Invalid value for parameter {name}: {value}")
            }
            ConfigError::UnknownBoundary(name) => {
                write!(f, "Unknown type of boundary configured: {}", name)
            }
        }
    }
}

impl Error for ConfigError {}

/// Fatal errors raised while building or editing a tessellation.
///
/// None of these are recoverable for the current step: the mesh they refer to
/// must not be used any further.
#[derive(thiserror::Error, Debug, Clone)]
pub enum TessellationError {
    #[error("Degenerate geometry: {reason} (points: {indices:?}, coordinates: {coordinates:?})")]
    Geometry {
        reason: String,
        indices: Vec<usize>,
        coordinates: Vec<DVec2>,
    },
    #[error("Inconsistent topology around cell {cell}: {reason}")]
    Topology { cell: usize, reason: String },
    #[error("Volume consistency violated for cell {cell}: expected {expected}, got {actual} ({reason})")]
    VolumeConsistency {
        cell: usize,
        expected: f64,
        actual: f64,
        reason: String,
    },
    #[error("Point {index} at {position} is not owned by any rank")]
    BoundaryClassification { index: usize, position: DVec2 },
    #[error("Rank {rank} lost its connection to rank {peer}")]
    Communication { rank: usize, peer: usize },
}

impl TessellationError {
    pub(crate) fn geometry(reason: impl Into<String>, indices: Vec<usize>, coordinates: Vec<DVec2>) -> Self {
        let err = TessellationError::Geometry {
            reason: reason.into(),
            indices,
            coordinates,
        };
        log::error!("{err}");
        err
    }

    pub(crate) fn topology(cell: usize, reason: impl Into<String>) -> Self {
        let err = TessellationError::Topology {
            cell,
            reason: reason.into(),
        };
        log::error!("{err}");
        err
    }

    pub(crate) fn volume(cell: usize, expected: f64, actual: f64, reason: impl Into<String>) -> Self {
        let err = TessellationError::VolumeConsistency {
            cell,
            expected,
            actual,
            reason: reason.into(),
        };
        log::error!("{err}");
        err
    }

    pub(crate) fn communication(rank: usize, peer: usize) -> Self {
        let err = TessellationError::Communication { rank, peer };
        log::error!("{err}");
        err
    }

    pub(crate) fn classification(index: usize, position: DVec2) -> Self {
        let err = TessellationError::BoundaryClassification { index, position };
        log::error!("{err}");
        err
    }
}

pub type TessResult<T> = Result<T, TessellationError>;
