//! cityrays computes outdoor sound-propagation ray paths between noise
//! sources and receivers over a 2.5D urban scene: building footprints
//! with heights over a triangulated terrain.
//!
//! For each receiver it enumerates the acoustically relevant paths,
//! direct sight lines, specular facade reflections up to a configured
//! order, diffraction over rooftops and around building corners, and
//! hands them to a downstream sink (typically an acoustic evaluator
//! turning geometry into per-band attenuations).

/// Error types for cityrays operations.
pub mod error;
pub use error::{CityraysError, Result};

/// Computation parameters.
pub mod config;
/// Path assembly for one source/receiver pair.
pub mod compose;
/// Input bundle: scene, sources, receivers, configuration.
pub mod data;
/// Planar and 2.5D geometry primitives.
pub mod geom;
/// Bounding-box trees over scene items.
pub mod index;
/// Image-receiver enumeration for the reflection search.
pub mod mirror;
/// Propagation path data model.
pub mod path;
/// Cut profiles along probe segments.
pub mod profile;
/// Upper convex hull for over-roof diffraction.
pub mod roof;
/// Receiver scheduling and the sink interface.
pub mod runner;
/// Scene model and profile queries.
pub mod scene;
/// Iterative side hull for around-corner diffraction.
pub mod sidehull;
/// Noise sources and their discretization.
pub mod sources;
/// Triangulated terrain.
pub mod terrain;

// Re-export the items most callers touch.
pub use compose::PathFinder;
pub use config::Config;
pub use data::PropagationData;
pub use geom::Coordinate;
pub use path::{PointKind, PointPath, PropagationPath, SegmentPath};
pub use profile::{CutKind, CutPoint, CutProfile};
pub use runner::{run, PathSink, ProgressFlag, ProgressVisitor};
pub use scene::{Building, GroundRegion, Scene, SceneBuilder, Wall};
pub use sources::{NoiseSource, SourceGeometry};
pub use terrain::Terrain;
