//! Asset Materializer - Idempotent, Retrying, Batch-Tolerant
//!
//! Ensures every derived asset spec exists on disk. Already-present files
//! are skipped (that is the resume contract), transient generator faults
//! are retried with linear backoff, and a failed asset is recorded without
//! sinking the rest of the batch.

use image::imageops::FilterType;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::generator::{GeneratedRef, Generator, GeneratorError};
use crate::schema::PresentationSchema;

/// One artifact to materialize: derived from the schema per build, consumed
/// here, not persisted anywhere.
#[derive(Debug, Clone)]
pub struct AssetSpec {
    pub filename: String,
    pub prompt: String,
    pub generation_size: String,
    pub final_size: [u32; 2],
}

impl AssetSpec {
    /// Derive the full spec list for a document: slide backgrounds in slide
    /// order, then icons. The style prompt is prepended to every asset
    /// prompt, and dimensions come from the asset class.
    pub fn derive(schema: &PresentationSchema) -> Vec<AssetSpec> {
        let style = &schema.visual_identity.style_prompt;
        let bg = &schema.asset_config.dimensions.background;
        let ic = &schema.asset_config.dimensions.icons;

        let mut specs: Vec<AssetSpec> = schema
            .slides
            .iter()
            .map(|slide| AssetSpec {
                filename: slide.background.filename.clone(),
                prompt: format!("{style} — {}", slide.background.prompt),
                generation_size: bg.generation_size.clone(),
                final_size: bg.final_size,
            })
            .collect();

        specs.extend(schema.icons.iter().map(|icon| AssetSpec {
            filename: icon.filename.clone(),
            prompt: format!("{style} — {}", icon.prompt),
            generation_size: ic.generation_size.clone(),
            final_size: ic.final_size,
        }));

        specs
    }
}

/// Bounded retry with linearly increasing backoff: the wait after the n-th
/// failure is `step * n`. The default constants are tuning values carried
/// over from production use, not invariants.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub step: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, step: Duration) -> Self {
        Self { attempts, step }
    }

    /// Default policy for generation requests: 3 attempts, 5s/10s waits.
    pub const fn generation_default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }

    /// Default policy for image downloads: 3 attempts, 2s/4s waits.
    pub const fn download_default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }

    fn delay_after(&self, failure_number: u32) -> Duration {
        self.step * failure_number
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Generation,
    Download,
    Decode,
    Io,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Generation => "generation",
            Self::Download => "download",
            Self::Decode => "decode",
            Self::Io => "io",
        };
        f.write_str(name)
    }
}

/// One artifact that could not be produced. Recorded, never thrown.
#[derive(Debug, Clone, Error)]
#[error("{filename}: {kind} failure: {detail}")]
pub struct AssetFailure {
    pub filename: String,
    pub kind: FailureKind,
    pub detail: String,
}

/// Explicit per-asset result. Skips count as success: the file is there.
#[derive(Debug, Clone)]
pub enum AssetOutcome {
    Written(PathBuf),
    Skipped(PathBuf),
    Failed(AssetFailure),
}

/// Batch result of one materializer run.
#[derive(Debug, Clone, Default)]
pub struct MaterializeReport {
    /// Filenames that exist on disk after the run (written or skipped).
    pub succeeded: Vec<String>,
    pub failed: Vec<AssetFailure>,
    /// How many files this run actually generated (excludes skips).
    pub written: usize,
    pub skipped: usize,
}

impl MaterializeReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Progress notification, one per processed spec.
#[derive(Debug, Clone)]
pub struct AssetProgress {
    pub index: usize,
    pub total: usize,
    pub filename: String,
    pub succeeded: bool,
}

pub struct Materializer<'a> {
    generator: &'a dyn Generator,
    generation_retry: RetryPolicy,
    download_retry: RetryPolicy,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Materializer<'a> {
    pub fn new(generator: &'a dyn Generator) -> Self {
        Self {
            generator,
            generation_retry: RetryPolicy::generation_default(),
            download_retry: RetryPolicy::download_default(),
            cancel: None,
        }
    }

    pub fn with_policies(mut self, generation: RetryPolicy, download: RetryPolicy) -> Self {
        self.generation_retry = generation;
        self.download_retry = download;
        self
    }

    /// Cooperative cancellation, checked between specs. An interrupted run
    /// leaves only fully written files behind.
    pub fn with_cancel_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Materialize every spec into `out_dir`. Never aborts on a per-asset
    /// failure; the report carries both sides.
    pub fn run(
        &self,
        specs: &[AssetSpec],
        out_dir: &Path,
        mut on_progress: impl FnMut(&AssetProgress),
    ) -> Result<MaterializeReport, std::io::Error> {
        fs::create_dir_all(out_dir)?;

        let mut report = MaterializeReport::default();
        let total = specs.len();

        for (index, spec) in specs.iter().enumerate() {
            if let Some(token) = &self.cancel {
                if token.load(Ordering::SeqCst) {
                    tracing::warn!(processed = index, total, "materialization cancelled");
                    break;
                }
            }

            let outcome = self.process(spec, out_dir);
            let succeeded = match &outcome {
                AssetOutcome::Written(path) => {
                    tracing::info!(path = %path.display(), "asset written");
                    report.written += 1;
                    report.succeeded.push(spec.filename.clone());
                    true
                }
                AssetOutcome::Skipped(_) => {
                    tracing::debug!(filename = %spec.filename, "asset already present, skipping");
                    report.skipped += 1;
                    report.succeeded.push(spec.filename.clone());
                    true
                }
                AssetOutcome::Failed(failure) => {
                    tracing::error!(%failure, "asset failed");
                    report.failed.push(failure.clone());
                    false
                }
            };

            on_progress(&AssetProgress {
                index,
                total,
                filename: spec.filename.clone(),
                succeeded,
            });
        }

        Ok(report)
    }

    fn process(&self, spec: &AssetSpec, out_dir: &Path) -> AssetOutcome {
        let dest = out_dir.join(&spec.filename);
        if dest.exists() {
            return AssetOutcome::Skipped(dest);
        }

        let image_ref = match self.generate_with_retry(spec) {
            Ok(r) => r,
            Err(e) => {
                return AssetOutcome::Failed(AssetFailure {
                    filename: spec.filename.clone(),
                    kind: FailureKind::Generation,
                    detail: e.to_string(),
                })
            }
        };

        let bytes = match self.download_with_retry(&image_ref) {
            Ok(b) => b,
            Err(e) => {
                return AssetOutcome::Failed(AssetFailure {
                    filename: spec.filename.clone(),
                    kind: FailureKind::Download,
                    detail: e.to_string(),
                })
            }
        };

        match normalize_and_persist(&bytes, spec.final_size, &dest) {
            Ok(()) => AssetOutcome::Written(dest),
            Err(e) => AssetOutcome::Failed(AssetFailure {
                filename: spec.filename.clone(),
                kind: e.kind(),
                detail: e.to_string(),
            }),
        }
    }

    fn generate_with_retry(&self, spec: &AssetSpec) -> Result<GeneratedRef, GeneratorError> {
        retry_transient(self.generation_retry, "generation", &spec.filename, || {
            self.generator.generate(&spec.prompt, &spec.generation_size)
        })
    }

    fn download_with_retry(&self, image_ref: &GeneratedRef) -> Result<Vec<u8>, GeneratorError> {
        retry_transient(self.download_retry, "download", &image_ref.0, || {
            self.generator.download(image_ref)
        })
    }
}

fn retry_transient<T>(
    policy: RetryPolicy,
    phase: &str,
    subject: &str,
    mut call: impl FnMut() -> Result<T, GeneratorError>,
) -> Result<T, GeneratorError> {
    let mut failures = 0;
    loop {
        match call() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && failures + 1 < policy.attempts => {
                failures += 1;
                let wait = policy.delay_after(failures);
                tracing::warn!(
                    phase,
                    subject,
                    attempt = failures,
                    wait_secs = wait.as_secs_f64(),
                    "transient failure, backing off"
                );
                std::thread::sleep(wait);
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Error)]
enum PersistError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl PersistError {
    fn kind(&self) -> FailureKind {
        match self {
            Self::Decode(_) => FailureKind::Decode,
            Self::Io(_) => FailureKind::Io,
        }
    }
}

/// Decode, normalize to RGBA at the final size, and persist atomically.
/// The temp-then-rename dance guarantees a crash never leaves a partial
/// file that the skip check would trust on the next run.
fn normalize_and_persist(
    bytes: &[u8],
    final_size: [u32; 2],
    dest: &Path,
) -> Result<(), PersistError> {
    let decoded = image::load_from_memory(bytes)?;
    let resized = image::DynamicImage::ImageRgba8(decoded.to_rgba8()).resize_exact(
        final_size[0],
        final_size[1],
        FilterType::Lanczos3,
    );

    let mut encoded = Vec::new();
    resized.write_to(&mut Cursor::new(&mut encoded), image::ImageFormat::Png)?;

    let tmp = dest.with_extension("png.tmp");
    fs::write(&tmp, &encoded)?;
    fs::rename(&tmp, dest)?;
    Ok(())
}
