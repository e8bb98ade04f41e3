//! # Breadcrumb - marker positions from .blend files
//!
//! Reads the objects of a Blender scene, groups them by a substring of their name and writes one position per
//! object into a Lua table that a game can load as "breadcrumb" marker data.
//!
//! ## Example
//!
//! ```ignore
//! use breadcrumb::{export, Blend, ExportConfig, Scene, SelectionMode};
//!
//! fn main() -> anyhow::Result<()> {
//!     let blend = Blend::from_path("cave.blend")?;
//!     let scene = Scene::from_blend(&blend)?;
//!     let config = ExportConfig::bounds_centroid();
//!
//!     let path = export::output_path_from_env(&config.file_name)?;
//!     export::export(scene.select(SelectionMode::Selected), &config, &path, std::io::stdout())?;
//!     Ok(())
//! }
//! ```
//!
//! With the default configuration the written file looks like this:
//!
//! ```text
//! return { mushrooms = { { 1.000000,2.000000,0.500000 }, }, crystals = {  }, drips = {  } }
//! ```
//!
//! ## Positions
//!
//! Two strategies are available and neither is a fallback for the other:
//!
//! * `PositionStrategy::BoundsCentroid` averages the 8 corners of the object's local bounding box and moves the
//!   result to world space with the object's world matrix.
//! * `PositionStrategy::Location` uses the object's `location` as it is stored, relative to its parent.
//!
//! The two layouts (`TableLayout::Nested` and `TableLayout::Flat`) decide whether each point gets its own table.
//!
//! ## The .blend file
//!
//! Blender saves a file by dumping its memory to disk: a header, a list of blocks holding C structs, and a
//! catalogue of every struct definition (the SDNA) at the end. The `parsers` module reads those blocks and the
//! `runtime` module interprets them lazily through the SDNA, so only the fields the exporter needs are decoded.
//!
//! Files saved with and without compression are supported as long as the compression is gzip. Files from 2.7x up
//! to the large block headers introduced in 5.0 are read the same way since the format is self-describing.
//!
//! ### Selection
//!
//! Blender stores whether an object is selected on its base. Files from 2.80 on keep bases per view layer, older
//! files keep them on the scene. Only the scene and view layer that were active when the file was saved count,
//! as recorded in the file's `GLOB` block; without that record the first scene and its first view layer are used.
//!
//! ### Limitations
//!
//! Bounding boxes are computed from the mesh as saved, without modifiers. Only meshes have bounds: curves, text,
//! surfaces, metaballs and other non-mesh objects are placed at their origin, with a warning in the log. Zstd
//! compressed files are rejected.

pub mod config;
pub mod export;
pub mod geometry;
pub mod parsers;
pub mod runtime;
pub mod scene;

pub use config::{Category, ExportConfig, PositionStrategy, TableLayout};
pub use export::{Breadcrumbs, ExportError};
pub use runtime::{AccessError, Blend, Instance};
pub use scene::{BlendObject, Scene, SceneError, SceneObject, SelectionMode};
