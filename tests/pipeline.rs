//! Pipeline Invariant Tests
//!
//! End-to-end guarantees of the build pipeline: validation gating,
//! idempotent resume, partial failure tolerance, versioning and migration.

use std::cell::RefCell;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};

use slidekiln_core::{
    assets::RetryPolicy,
    build::{BuildError, BuildOptions, BuildOrchestrator, BuildState},
    generator::{GeneratedRef, Generator, GeneratorError},
    validation::validate_source,
    version::{VersionMetadata, METADATA_FILENAME},
    ASSETS_SUBDIR,
};

/// Generator double: serves a real decodable PNG, counts calls, and fails
/// permanently for any prompt containing the poison marker.
struct CountingGenerator {
    generate_calls: RefCell<u32>,
    poison_marker: Option<String>,
}

impl CountingGenerator {
    fn new() -> Self {
        Self {
            generate_calls: RefCell::new(0),
            poison_marker: None,
        }
    }

    fn poisoned(marker: &str) -> Self {
        Self {
            generate_calls: RefCell::new(0),
            poison_marker: Some(marker.to_string()),
        }
    }

    fn calls(&self) -> u32 {
        *self.generate_calls.borrow()
    }
}

impl Generator for CountingGenerator {
    fn generate(&self, prompt: &str, _size: &str) -> Result<GeneratedRef, GeneratorError> {
        *self.generate_calls.borrow_mut() += 1;
        if let Some(marker) = &self.poison_marker {
            if prompt.contains(marker) {
                return Err(GeneratorError::Permanent("prompt rejected".to_string()));
            }
        }
        Ok(GeneratedRef("mem://image".to_string()))
    }

    fn download(&self, _image: &GeneratedRef) -> Result<Vec<u8>, GeneratorError> {
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([128, 64, 32, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        Ok(bytes)
    }
}

fn slide(id: &str, concept: &str, prompt: &str) -> Value {
    json!({
        "id": id,
        "layout": "lf",
        "content": {"title": format!("Slide {id}")},
        "background": {
            "filename": format!("SLIDE-{id}-{concept}.png"),
            "concept": concept,
            "prompt": prompt,
            "text_zones": {"primary": {"x": "5%", "y": "10%"}}
        }
    })
}

fn two_slide_schema() -> Value {
    json!({
        "meta": {
            "title": "Test Deck",
            "short_name": "test-deck",
            "version": "1.0.0",
            "created": "2025-03-01",
            "theme": "test"
        },
        "visual_identity": {
            "colors": {
                "primary": "#2D2F92", "secondary": "#6F3EDD", "accent": "#15D4C8",
                "text_primary": "#FFFFFF", "text_secondary": "#CCCCCC",
                "overlay_bg": "rgba(0,0,0,0.6)", "border": "#444444"
            },
            "typography": {
                "font_family": "Inter", "title_size": "3em",
                "subtitle_size": "1.5em", "body_size": "1em", "small_size": "0.8em"
            },
            "style_prompt": "Minimal indigo style",
            "atmosphere": "calm"
        },
        "layout_system": {
            "layouts": {
                "title-slide": {"description": "t", "text_position": "center", "text_zone": "full", "max_width": "80%"},
                "lf": {"description": "l", "text_position": "left", "text_zone": "left-half", "max_width": "45%"},
                "rf": {"description": "r", "text_position": "right", "text_zone": "right-half", "max_width": "45%"},
                "tb": {"description": "b", "text_position": "top", "text_zone": "top-third", "max_width": "90%"}
            }
        },
        "asset_config": {
            "dimensions": {
                "background": {"generation_size": "1792x1024", "final_size": [1920, 1080]},
                "icons": {"generation_size": "1024x1024", "final_size": [350, 350]}
            },
            "naming_convention": "SLIDE-XX-Concept.png",
            "dalle_model": "dall-e-3"
        },
        "slides": [
            slide("01", "Intro", "an opening scene"),
            slide("02", "Body", "a second scene")
        ],
        "runtime_config": {
            "reveal_js": {
                "transition": "fade", "transition_speed": "default",
                "background_transition": "fade", "controls": true,
                "progress": true, "keyboard": true, "touch": true, "hash": true
            },
            "responsive_breakpoints": {"tablet": "1024px", "mobile": "768px"},
            "content_sizing": {}
        }
    })
}

/// Shrink final sizes so resize work stays trivial in tests.
fn small_sizes(mut schema: Value) -> Value {
    schema["asset_config"]["dimensions"]["background"]["final_size"] = json!([16, 9]);
    schema["asset_config"]["dimensions"]["icons"]["final_size"] = json!([8, 8]);
    schema
}

fn write_schema(dir: &Path, schema: &Value) -> PathBuf {
    let path = dir.join("deck.json");
    fs::write(&path, serde_json::to_string_pretty(schema).unwrap()).unwrap();
    path
}

fn fast_options(build_root: PathBuf) -> BuildOptions {
    BuildOptions {
        build_root,
        generation_retry: RetryPolicy::new(3, Duration::ZERO),
        download_retry: RetryPolicy::new(3, Duration::ZERO),
        ..BuildOptions::default()
    }
}

fn read_metadata(version_dir: &Path) -> VersionMetadata {
    serde_json::from_slice(&fs::read(version_dir.join(METADATA_FILENAME)).unwrap()).unwrap()
}

#[test]
fn invariant_invalid_schema_rejected_before_any_work() {
    let tmp = tempfile::tempdir().unwrap();
    let mut schema = two_slide_schema();
    schema["slides"][1]["id"] = json!("01"); // duplicate id
    let schema_path = write_schema(tmp.path(), &schema);

    let generator = CountingGenerator::new();
    let orchestrator =
        BuildOrchestrator::new(&generator, fast_options(tmp.path().join("build")));
    let err = orchestrator.run(&schema_path, |_| {}).unwrap_err();

    match err {
        BuildError::Rejected { report } => {
            assert!(report.errors.iter().any(|e| e.contains("duplicate slide id: 01")));
        }
        other => panic!("expected rejection, got: {other}"),
    }
    // Nothing expensive ran and no build directory appeared.
    assert_eq!(generator.calls(), 0);
    assert!(!tmp.path().join("build").exists());
}

#[test]
fn invariant_missing_field_reported_without_flagging_valid_sections() {
    let mut schema = two_slide_schema();
    schema["slides"][0]["background"]
        .as_object_mut()
        .unwrap()
        .remove("prompt");
    let report = validate_source(&serde_json::to_string_pretty(&schema).unwrap());

    assert!(report
        .errors
        .iter()
        .any(|e| e.contains("slides[0].background.prompt is required")));
    // The untouched sections stay clean.
    assert!(!report.errors.iter().any(|e| e.contains("meta")));
    assert!(!report.errors.iter().any(|e| e.contains("slides[1]")));
}

#[test]
fn invariant_first_build_produces_version_one() {
    let tmp = tempfile::tempdir().unwrap();
    let schema_path = write_schema(tmp.path(), &small_sizes(two_slide_schema()));
    let build_root = tmp.path().join("build");

    let generator = CountingGenerator::new();
    let orchestrator = BuildOrchestrator::new(&generator, fast_options(build_root.clone()));
    let report = orchestrator.run(&schema_path, |_| {}).unwrap();

    assert_eq!(report.state, BuildState::Done);
    assert_eq!(report.version, Some(1));
    assert_eq!(report.previous_version, None);
    assert_eq!(report.materialize.written, 2);
    assert_eq!(report.slide_count, 2);
    assert!(report.is_clean());

    let v1 = build_root.join("test-deck").join("v1");
    assert!(v1.join(ASSETS_SUBDIR).join("SLIDE-01-Intro.png").exists());
    assert!(v1.join(ASSETS_SUBDIR).join("SLIDE-02-Body.png").exists());
    assert!(v1.join("presentation_schema.json").exists());

    let runtime: Vec<Value> =
        serde_json::from_slice(&fs::read(v1.join("slides_runtime.json")).unwrap()).unwrap();
    assert_eq!(runtime.len(), 2);
    assert_eq!(runtime[0]["bg"], "SLIDE-01-Intro.png");
    assert_eq!(runtime[0]["layout"], "lf");
    assert_eq!(runtime[0]["title"], "Slide 01");

    let metadata = read_metadata(&v1);
    assert_eq!(metadata.version, 1);
    assert_eq!(metadata.previous_version, None);
}

#[test]
fn invariant_second_build_carries_forward_and_generates_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let schema_path = write_schema(tmp.path(), &small_sizes(two_slide_schema()));
    let build_root = tmp.path().join("build");

    let generator = CountingGenerator::new();
    let orchestrator = BuildOrchestrator::new(&generator, fast_options(build_root.clone()));
    orchestrator.run(&schema_path, |_| {}).unwrap();
    assert_eq!(generator.calls(), 2);

    let report = orchestrator.run(&schema_path, |_| {}).unwrap();

    // Unchanged schema: everything arrives via carry-forward, the
    // materializer skips it all, the generator is never touched.
    assert_eq!(generator.calls(), 2);
    assert_eq!(report.version, Some(2));
    assert_eq!(report.previous_version, Some(1));
    assert_eq!(report.carried_forward, 2);
    assert_eq!(report.materialize.written, 0);
    assert_eq!(report.materialize.skipped, 2);
    assert_eq!(report.materialize.succeeded.len(), 2);

    let metadata = read_metadata(&build_root.join("test-deck").join("v2"));
    assert_eq!(metadata.version, 2);
    assert_eq!(metadata.previous_version, Some(1));
}

#[cfg(unix)]
#[test]
fn invariant_current_pointer_tracks_latest_version() {
    let tmp = tempfile::tempdir().unwrap();
    let schema_path = write_schema(tmp.path(), &small_sizes(two_slide_schema()));
    let build_root = tmp.path().join("build");

    let generator = CountingGenerator::new();
    let orchestrator = BuildOrchestrator::new(&generator, fast_options(build_root.clone()));
    orchestrator.run(&schema_path, |_| {}).unwrap();
    orchestrator.run(&schema_path, |_| {}).unwrap();

    let link = build_root.join("test-deck").join("current");
    assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("v2"));
    // The pointer resolves to a real directory with the build outputs.
    assert!(link.join("slides_runtime.json").exists());
}

#[test]
fn invariant_output_override_is_idempotent_and_unversioned() {
    let tmp = tempfile::tempdir().unwrap();
    let schema_path = write_schema(tmp.path(), &small_sizes(two_slide_schema()));
    let out = tmp.path().join("site");

    let generator = CountingGenerator::new();
    let mut options = fast_options(tmp.path().join("build"));
    options.output_override = Some(out.clone());
    let orchestrator = BuildOrchestrator::new(&generator, options);

    let first = orchestrator.run(&schema_path, |_| {}).unwrap();
    assert_eq!(first.version, None);
    assert_eq!(first.materialize.written, 2);
    assert!(!out.join(METADATA_FILENAME).exists());

    let second = orchestrator.run(&schema_path, |_| {}).unwrap();
    assert_eq!(generator.calls(), 2);
    assert_eq!(second.materialize.written, 0);
    assert_eq!(second.materialize.succeeded.len(), 2);
}

#[test]
fn invariant_one_permanent_failure_leaves_the_rest_standing() {
    let tmp = tempfile::tempdir().unwrap();
    let mut schema = small_sizes(two_slide_schema());
    schema["slides"]
        .as_array_mut()
        .unwrap()
        .push(slide("03", "Poisoned", "POISON scene"));
    let schema_path = write_schema(tmp.path(), &schema);
    let build_root = tmp.path().join("build");

    let generator = CountingGenerator::poisoned("POISON");
    let orchestrator = BuildOrchestrator::new(&generator, fast_options(build_root.clone()));
    let report = orchestrator.run(&schema_path, |_| {}).unwrap();

    // The run completed; the failure is data, not a crash.
    assert_eq!(report.state, BuildState::Done);
    assert_eq!(report.materialize.succeeded.len(), 2);
    assert_eq!(report.materialize.failed.len(), 1);
    assert_eq!(report.materialize.failed[0].filename, "SLIDE-03-Poisoned.png");
    // Permanent errors are not retried.
    assert_eq!(generator.calls(), 3);

    let assets = build_root.join("test-deck").join("v1").join(ASSETS_SUBDIR);
    for name in ["SLIDE-01-Intro.png", "SLIDE-02-Body.png"] {
        let img = image::open(assets.join(name)).unwrap();
        assert_eq!((img.width(), img.height()), (16, 9));
    }
    assert!(!assets.join("SLIDE-03-Poisoned.png").exists());
}

#[test]
fn invariant_failed_asset_recovered_by_rerun() {
    let tmp = tempfile::tempdir().unwrap();
    let mut schema = small_sizes(two_slide_schema());
    schema["slides"]
        .as_array_mut()
        .unwrap()
        .push(slide("03", "Flaky", "POISON scene"));
    let schema_path = write_schema(tmp.path(), &schema);
    let build_root = tmp.path().join("build");

    let poisoned = CountingGenerator::poisoned("POISON");
    BuildOrchestrator::new(&poisoned, fast_options(build_root.clone()))
        .run(&schema_path, |_| {})
        .unwrap();

    // Same command again, generator healthy now: only the missing asset
    // is produced, the carried-forward two are skipped.
    let healthy = CountingGenerator::new();
    let report = BuildOrchestrator::new(&healthy, fast_options(build_root.clone()))
        .run(&schema_path, |_| {})
        .unwrap();

    assert_eq!(healthy.calls(), 1);
    assert_eq!(report.carried_forward, 2);
    assert_eq!(report.materialize.written, 1);
    assert!(report.materialize.all_succeeded());
    assert!(build_root
        .join("test-deck")
        .join("v2")
        .join(ASSETS_SUBDIR)
        .join("SLIDE-03-Flaky.png")
        .exists());
}

#[test]
fn invariant_legacy_layout_migrated_exactly_once() {
    let tmp = tempfile::tempdir().unwrap();
    let schema_path = write_schema(tmp.path(), &small_sizes(two_slide_schema()));
    let build_root = tmp.path().join("build");

    // A pre-versioning project: assets directly under the project dir.
    let project = build_root.join("test-deck");
    let legacy_assets = project.join(ASSETS_SUBDIR);
    fs::create_dir_all(&legacy_assets).unwrap();
    fs::write(legacy_assets.join("SLIDE-01-Intro.png"), b"legacy bytes").unwrap();
    fs::write(project.join("slides_runtime.json"), b"[]").unwrap();

    let generator = CountingGenerator::new();
    let orchestrator = BuildOrchestrator::new(&generator, fast_options(build_root.clone()));
    let report = orchestrator.run(&schema_path, |_| {}).unwrap();

    // Migration made the legacy layout v1; this build became v2.
    assert_eq!(report.version, Some(2));
    assert_eq!(report.previous_version, Some(1));
    let v1 = project.join("v1");
    assert_eq!(read_metadata(&v1).previous_version, None);
    assert_eq!(
        fs::read(v1.join(ASSETS_SUBDIR).join("SLIDE-01-Intro.png")).unwrap(),
        b"legacy bytes"
    );

    // The legacy slide background was carried forward and trusted as-is;
    // only the second slide needed generation.
    assert_eq!(report.carried_forward, 1);
    assert_eq!(report.materialize.written, 1);
    assert_eq!(generator.calls(), 1);

    // A further run must not re-trigger migration: v1 is untouched and the
    // new build is v3.
    let report = orchestrator.run(&schema_path, |_| {}).unwrap();
    assert_eq!(report.version, Some(3));
    assert_eq!(read_metadata(&v1).version, 1);
    assert_eq!(generator.calls(), 1);
}

#[test]
fn invariant_progress_reported_once_per_spec() {
    let tmp = tempfile::tempdir().unwrap();
    let schema_path = write_schema(tmp.path(), &small_sizes(two_slide_schema()));

    let generator = CountingGenerator::new();
    let orchestrator = BuildOrchestrator::new(&generator, fast_options(tmp.path().join("build")));

    let mut seen = Vec::new();
    orchestrator
        .run(&schema_path, |progress| {
            seen.push((progress.index, progress.total, progress.succeeded));
        })
        .unwrap();

    assert_eq!(seen, vec![(0, 2, true), (1, 2, true)]);
}
