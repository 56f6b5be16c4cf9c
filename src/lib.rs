//! Moving mesh Voronoi tessellation engine.
//!
//! Builds the Voronoi diagram of a set of moving generators inside a rigid,
//! periodic or half-periodic box from an incremental Delaunay triangulation,
//! splits the domain between ranks and exchanges ghost points between them,
//! and refines or coarsens the mesh while conserving the extensive state of
//! the cells.

pub use amr::{
    CellUpdater, CellsToRefine, CellsToRemove, ConservativeAmr, ExtensiveUpdater, NonConservativeAmr,
    SimpleCellUpdater, SimpleExtensiveUpdater, VolumeThresholdRefine, VolumeThresholdRemove,
};
pub use boundary::{BoundaryKind, BoxSide, OuterBoundary, SquareBox};
pub use cluster::{ClusterContext, Communicator, SerialCommunicator, ThreadCluster, ThreadCommunicator};
pub use config::{AmrConfig, MeshConfig};
pub use delaunay::{Delaunay, Facet};
pub use edge::Edge;
pub use errors::{ConfigError, TessResult, TessellationError};
pub use ghost::{GhostRecord, GhostTable, GhostTransform};
pub use point_motion::{Eulerian, Lagrangian, PointMotion};
pub use processor::{ProcFace, ProcNeighbor, ProcessorTessellation};
pub use voronoi_mesh::{Migration, RemovalReport, VoronoiMesh};

pub mod amr;
mod boundary;
mod cluster;
mod config;
mod delaunay;
mod edge;
mod errors;
pub mod gas_law;
pub mod geometry;
mod ghost;
pub mod physical_quantities;
mod point_motion;
pub mod polygon_overlap;
mod processor;
mod voronoi_mesh;
