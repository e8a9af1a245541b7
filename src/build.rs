//! Build Orchestrator - Validate, Version, Materialize, Finalize
//!
//! Single entry point for a build run. Validation is mandatory and cannot
//! be bypassed; per-asset failures ride along into the report while the
//! run proceeds to completion.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use thiserror::Error;

use crate::assets::{AssetProgress, AssetSpec, Materializer, MaterializeReport, RetryPolicy};
use crate::generator::Generator;
use crate::schema::{PresentationSchema, SchemaLoadError};
use crate::validation::{validate_source, ValidationReport};
use crate::version::{FsVersionStore, VersionError, VersionStore};
use crate::ASSETS_SUBDIR;

pub const SCHEMA_FILENAME: &str = "presentation_schema.json";
pub const RUNTIME_SLIDES_FILENAME: &str = "slides_runtime.json";

/// Pipeline states. `Done`, `Rejected` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Validating,
    AllocatingVersion,
    CarryingForward,
    Materializing,
    Finalizing,
    Done,
    Rejected,
    Failed,
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::AllocatingVersion => "allocating-version",
            Self::CarryingForward => "carrying-forward",
            Self::Materializing => "materializing",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    /// The document failed validation; every fault is in the report.
    #[error("schema rejected with {} error(s)", report.errors.len())]
    Rejected { report: ValidationReport },

    #[error(transparent)]
    Schema(#[from] SchemaLoadError),

    /// Structural fault in the version store; nothing downstream can run.
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("build I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Root under which per-project version directories live.
    pub build_root: PathBuf,
    /// Explicit output directory; bypasses versioning entirely.
    pub output_override: Option<PathBuf>,
    /// When false, write into a plain `build_root/short_name` directory
    /// with no version allocation, metadata, pointer, or carry-forward.
    pub versioned: bool,
    pub generation_retry: RetryPolicy,
    pub download_retry: RetryPolicy,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            build_root: PathBuf::from("build"),
            output_override: None,
            versioned: true,
            generation_retry: RetryPolicy::generation_default(),
            download_retry: RetryPolicy::download_default(),
            cancel: None,
        }
    }
}

/// Outcome of a completed (not rejected, not failed) build run.
#[derive(Debug)]
pub struct BuildReport {
    pub state: BuildState,
    pub build_dir: PathBuf,
    pub version: Option<u32>,
    pub previous_version: Option<u32>,
    pub carried_forward: usize,
    pub slide_count: usize,
    pub materialize: MaterializeReport,
    /// Validation warnings from the accepted document.
    pub validation_warnings: Vec<String>,
    /// Set when the 'current' pointer could not be placed; non-fatal.
    pub pointer_warning: Option<String>,
}

impl BuildReport {
    /// Full success: every asset exists and nothing was degraded.
    pub fn is_clean(&self) -> bool {
        self.materialize.all_succeeded() && self.pointer_warning.is_none()
    }
}

pub struct BuildOrchestrator<'a, S: VersionStore = FsVersionStore> {
    generator: &'a dyn Generator,
    store: S,
    options: BuildOptions,
}

fn transition(state: &mut BuildState, next: BuildState) {
    tracing::info!(from = %state, to = %next, "build state transition");
    *state = next;
}

impl<'a> BuildOrchestrator<'a, FsVersionStore> {
    pub fn new(generator: &'a dyn Generator, options: BuildOptions) -> Self {
        Self::with_store(generator, FsVersionStore, options)
    }
}

impl<'a, S: VersionStore> BuildOrchestrator<'a, S> {
    pub fn with_store(generator: &'a dyn Generator, store: S, options: BuildOptions) -> Self {
        Self {
            generator,
            store,
            options,
        }
    }

    /// Run the whole pipeline for one schema file.
    pub fn run(
        &self,
        schema_path: &Path,
        on_progress: impl FnMut(&AssetProgress),
    ) -> Result<BuildReport, BuildError> {
        let mut state = BuildState::Validating;
        let result = self.run_from(&mut state, schema_path, on_progress);
        if result.is_err() && state != BuildState::Rejected {
            transition(&mut state, BuildState::Failed);
        }
        result
    }

    fn run_from(
        &self,
        state: &mut BuildState,
        schema_path: &Path,
        on_progress: impl FnMut(&AssetProgress),
    ) -> Result<BuildReport, BuildError> {

        let raw = fs::read_to_string(schema_path).map_err(SchemaLoadError::Io)?;
        let validation = validate_source(&raw);
        if !validation.is_valid() {
            transition(state, BuildState::Rejected);
            return Err(BuildError::Rejected { report: validation });
        }
        let schema = PresentationSchema::from_str(&raw).map_err(SchemaLoadError::Parse)?;

        transition(state, BuildState::AllocatingVersion);
        let placement = self.place_build(&schema)?;

        // The version directory owns a verbatim copy of its input.
        fs::write(placement.build_dir.join(SCHEMA_FILENAME), &raw)?;

        transition(state, BuildState::CarryingForward);
        let carried_forward = match &placement.previous_dir {
            Some(previous) => self.store.carry_forward(previous, &placement.build_dir)?,
            None => 0,
        };

        transition(state, BuildState::Materializing);
        let specs = AssetSpec::derive(&schema);
        let mut materializer = Materializer::new(self.generator)
            .with_policies(self.options.generation_retry, self.options.download_retry);
        if let Some(token) = &self.options.cancel {
            materializer = materializer.with_cancel_token(Arc::clone(token));
        }
        let materialize =
            materializer.run(&specs, &placement.build_dir.join(ASSETS_SUBDIR), on_progress)?;

        transition(state, BuildState::Finalizing);
        let runtime_slides = schema.runtime_slides();
        let slide_count = runtime_slides.len();
        fs::write(
            placement.build_dir.join(RUNTIME_SLIDES_FILENAME),
            serde_json::to_string_pretty(&runtime_slides)
                .map_err(|e| BuildError::Io(std::io::Error::other(e)))?,
        )?;

        let mut pointer_warning = None;
        if let Some(version) = placement.version {
            self.store
                .write_metadata(&placement.build_dir, version, placement.previous_version)?;
            if let Err(e) = self
                .store
                .update_current_pointer(&placement.project_dir, version)
            {
                tracing::warn!(%e, "continuing without 'current' pointer");
                pointer_warning = Some(e.to_string());
            }
        }

        transition(state, BuildState::Done);
        Ok(BuildReport {
            state: *state,
            build_dir: placement.build_dir,
            version: placement.version,
            previous_version: placement.previous_version,
            carried_forward,
            slide_count,
            materialize,
            validation_warnings: validation.warnings,
            pointer_warning,
        })
    }

    fn place_build(&self, schema: &PresentationSchema) -> Result<BuildPlacement, BuildError> {
        let project_dir = self.options.build_root.join(&schema.meta.short_name);

        if let Some(output) = &self.options.output_override {
            fs::create_dir_all(output)?;
            return Ok(BuildPlacement::unversioned(project_dir, output.clone()));
        }
        if !self.options.versioned {
            fs::create_dir_all(&project_dir)?;
            return Ok(BuildPlacement::unversioned(project_dir.clone(), project_dir));
        }

        fs::create_dir_all(&project_dir)?;
        if self.store.migrate_legacy(&project_dir)? {
            tracing::info!(project = %project_dir.display(), "legacy layout migrated to v1");
        }

        let previous = self.store.latest_version(&project_dir)?;
        let (version, build_dir) = self.store.allocate_next(&project_dir)?;

        Ok(BuildPlacement {
            project_dir,
            build_dir,
            version: Some(version),
            previous_version: previous.as_ref().map(|(n, _)| *n),
            previous_dir: previous.map(|(_, dir)| dir),
        })
    }
}

struct BuildPlacement {
    project_dir: PathBuf,
    build_dir: PathBuf,
    version: Option<u32>,
    previous_version: Option<u32>,
    previous_dir: Option<PathBuf>,
}

impl BuildPlacement {
    fn unversioned(project_dir: PathBuf, build_dir: PathBuf) -> Self {
        Self {
            project_dir,
            build_dir,
            version: None,
            previous_version: None,
            previous_dir: None,
        }
    }
}
