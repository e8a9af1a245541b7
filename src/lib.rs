//! Slidekiln Core - Versioned Presentation Asset Compiler
//!
//! # The Five Laws (Non-Negotiable)
//! 1. Schema Is Truth
//! 2. Validation Gates Everything
//! 3. Builds Are Resumable
//! 4. Versions Are Immutable
//! 5. One Asset Failing Never Sinks The Batch

pub mod schema;
pub mod validation;
pub mod generator;
pub mod assets;
pub mod version;
pub mod build;

pub use schema::{PresentationSchema, SlideRecord, IconRecord, RuntimeSlide};
pub use validation::{validate_source, ValidationReport};
pub use generator::{Generator, GeneratorError, OpenAiImageClient};
pub use assets::{AssetSpec, AssetFailure, Materializer, MaterializeReport, RetryPolicy};
pub use version::{FsVersionStore, VersionMetadata, VersionStore};
pub use build::{BuildError, BuildOptions, BuildOrchestrator, BuildReport, BuildState};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Subdirectory inside a build version that owns materialized artifacts.
pub const ASSETS_SUBDIR: &str = "assets_generated";
