//! L13 — Processing Driver: standardizes the extracted package layout,
//! selects a scene-type parameter, drives the two opaque reconstruction
//! binaries in sequence, searches multiple locations for their outputs,
//! and assembles the final processed archive (spec §4.13).

pub mod assemble;
pub mod driver;
pub mod output_search;
pub mod scene;
pub mod standardize;
pub mod subprocess;

pub use assemble::AssembleError;
pub use driver::{ProcessingDriver, ProcessingDriverConfig, SceneHint};
pub use output_search::OutputLocation;
pub use scene::{select_scene_type, DEFAULT_INDOOR_SCALE_THRESHOLD_M};
pub use standardize::StandardizeError;
pub use subprocess::{SubprocessError, SubprocessOutcome};
