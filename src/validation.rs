//! Schema Validation - Exhaustive, Pure, Non-Aborting
//!
//! `validate_source` walks the whole document and reports every fault it
//! finds. Sections never short-circuit each other: a broken `meta` does not
//! hide problems in `slides`. The only hard stops are the pre-parse comment
//! gate and a JSON parse failure, because nothing structural can be checked
//! without a parsed value.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::schema::LayoutName;

static HEX_COLOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").unwrap());
static RGBA_COLOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^rgba?\(\s*\d+\s*,\s*\d+\s*,\s*\d+\s*(,\s*[\d.]+\s*)?\)$").unwrap()
});
static DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static SHORT_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").unwrap());
static DIMENSIONS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+x\d+$").unwrap());
static SLIDE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}$").unwrap());
static SLIDE_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^SLIDE-\d{2}-[A-Za-z]+\.png$").unwrap());
static ICON_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^IC-[A-Za-z]+\.png$").unwrap());
static CSS_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+)?(px|em|rem|vw|vh|%)?$").unwrap());
static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*[}\]]").unwrap());

const VALID_TRANSITIONS: [&str; 6] = ["none", "fade", "slide", "convex", "concave", "zoom"];
const VALID_SPEEDS: [&str; 3] = ["default", "fast", "slow"];
const VALID_MODELS: [&str; 2] = ["dall-e-3", "dall-e-2"];

/// Outcome of validating one document: every error and warning found,
/// in document order.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

// --- Field predicates ---

/// Hex `#RRGGBB` or `rgb()/rgba()` color string.
pub fn is_color(value: &str) -> bool {
    HEX_COLOR.is_match(value) || RGBA_COLOR.is_match(value)
}

/// Plain `x.y.z` semantic version. Pre-release and build metadata are not
/// part of the schema contract and are rejected.
pub fn is_semver(value: &str) -> bool {
    match semver::Version::parse(value) {
        Ok(v) => v.pre.is_empty() && v.build.is_empty(),
        Err(_) => false,
    }
}

pub fn is_date(value: &str) -> bool {
    DATE.is_match(value)
}

pub fn is_short_name(value: &str) -> bool {
    SHORT_NAME.is_match(value)
}

pub fn is_dimensions(value: &str) -> bool {
    DIMENSIONS.is_match(value)
}

pub fn is_slide_id(value: &str) -> bool {
    SLIDE_ID.is_match(value)
}

pub fn is_slide_filename(value: &str) -> bool {
    SLIDE_FILENAME.is_match(value)
}

pub fn is_icon_filename(value: &str) -> bool {
    ICON_FILENAME.is_match(value)
}

/// CSS-like size token: number with an optional unit from the allow-list.
pub fn is_css_token(value: &str) -> bool {
    CSS_TOKEN.is_match(value)
}

// --- Entry point ---

/// Validate raw schema source. Pure: no I/O, no shared state, safe to call
/// concurrently.
pub fn validate_source(raw: &str) -> ValidationReport {
    let mut report = ValidationReport::default();

    if scan_comments(raw, &mut report) {
        return report;
    }
    scan_trailing_commas(raw, &mut report);

    let document: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            report_parse_error(raw, &e, &mut report);
            return report;
        }
    };

    validate_document(&document, &mut report);
    report
}

/// Returns true when comments were found; they guarantee a parse failure,
/// so structural validation is pointless.
fn scan_comments(raw: &str, report: &mut ValidationReport) -> bool {
    let mut found = false;

    if raw.contains("/*") || raw.contains("*/") {
        report.error("JSON files cannot contain block comments (/* */)");
        for (idx, line) in raw.lines().enumerate() {
            if line.contains("/*") || line.contains("*/") {
                report.error(format!(
                    "  -> comment found on line {}: {}",
                    idx + 1,
                    truncate(line.trim(), 60)
                ));
            }
        }
        found = true;
    }

    for (idx, line) in raw.lines().enumerate() {
        let stripped = line.trim();
        // URLs carry `//` legitimately; only flag bare comment lines.
        if stripped.starts_with("//") && !stripped.contains("http") {
            report.error("JSON files cannot contain line comments (//)");
            report.error(format!(
                "  -> comment found on line {}: {}",
                idx + 1,
                truncate(stripped, 60)
            ));
            found = true;
        }
    }

    found
}

fn scan_trailing_commas(raw: &str, report: &mut ValidationReport) {
    if !TRAILING_COMMA.is_match(raw) {
        return;
    }
    report.error("JSON has trailing commas before closing brackets");
    for (idx, line) in raw.lines().enumerate() {
        if TRAILING_COMMA.is_match(line) {
            report.error(format!(
                "  -> trailing comma on line {}: {}",
                idx + 1,
                line.trim()
            ));
        }
    }
}

fn report_parse_error(raw: &str, err: &serde_json::Error, report: &mut ValidationReport) {
    report.error(format!(
        "JSON parsing error at line {}, column {}: {}",
        err.line(),
        err.column(),
        err
    ));
    if let Some(line) = raw.lines().nth(err.line().saturating_sub(1)) {
        report.error(format!("  -> line {}: {}", err.line(), line.trim()));
        if err.column() > 0 {
            report.error(format!("  -> {}^", " ".repeat(err.column() - 1)));
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}

// --- Structural validation ---

fn validate_document(document: &Value, report: &mut ValidationReport) {
    let required_sections = [
        "meta",
        "visual_identity",
        "layout_system",
        "asset_config",
        "slides",
        "runtime_config",
    ];
    for section in required_sections {
        if document.get(section).is_none() {
            report.error(format!("required section '{section}' is missing"));
        }
    }

    if let Some(meta) = document.get("meta") {
        validate_meta(meta, report);
    }
    if let Some(vi) = document.get("visual_identity") {
        validate_visual_identity(vi, report);
    }
    if let Some(ls) = document.get("layout_system") {
        validate_layout_system(ls, report);
    }
    if let Some(ac) = document.get("asset_config") {
        validate_asset_config(ac, report);
    }
    if let Some(slides) = document.get("slides") {
        validate_slides(slides, report);
    }
    if let Some(icons) = document.get("icons") {
        validate_icons(icons, report);
    }
    if let Some(rc) = document.get("runtime_config") {
        validate_runtime_config(rc, report);
    }
}

fn require_fields(section: &Value, path: &str, fields: &[&str], report: &mut ValidationReport) {
    for field in fields {
        if section.get(field).is_none() {
            report.error(format!("{path}.{field} is required"));
        }
    }
}

fn str_field<'a>(section: &'a Value, field: &str) -> Option<&'a str> {
    section.get(field).and_then(Value::as_str)
}

fn validate_meta(meta: &Value, report: &mut ValidationReport) {
    require_fields(meta, "meta", &["title", "short_name", "version", "created", "theme"], report);

    if let Some(short_name) = str_field(meta, "short_name") {
        if !is_short_name(short_name) {
            report.error(format!(
                "meta.short_name must be lowercase alphanumeric with hyphens only, got: {short_name}"
            ));
        }
    }
    if let Some(version) = str_field(meta, "version") {
        if !is_semver(version) {
            report.error(format!(
                "meta.version must be semantic version (x.y.z), got: {version}"
            ));
        }
    }
    if let Some(created) = str_field(meta, "created") {
        if !is_date(created) {
            report.error(format!(
                "meta.created must be YYYY-MM-DD format, got: {created}"
            ));
        }
    }
}

fn validate_visual_identity(vi: &Value, report: &mut ValidationReport) {
    require_fields(
        vi,
        "visual_identity",
        &["colors", "typography", "style_prompt", "atmosphere"],
        report,
    );

    if let Some(colors) = vi.get("colors") {
        let required = [
            "primary", "secondary", "accent", "text_primary",
            "text_secondary", "overlay_bg", "border",
        ];
        // primary/secondary/accent feed the generator prompt and must be hex;
        // the rest may also be rgba().
        let hex_only = ["primary", "secondary", "accent"];
        for name in required {
            match colors.get(name) {
                None => report.error(format!("visual_identity.colors.{name} is required")),
                Some(value) => {
                    if let Some(color) = value.as_str() {
                        if hex_only.contains(&name) {
                            if !HEX_COLOR.is_match(color) {
                                report.error(format!(
                                    "visual_identity.colors.{name} must be hex (#RRGGBB), got: {color}"
                                ));
                            }
                        } else if !is_color(color) {
                            report.error(format!(
                                "visual_identity.colors.{name} must be valid hex (#RRGGBB) or rgba() format, got: {color}"
                            ));
                        }
                    }
                }
            }
        }
    }

    if let Some(typography) = vi.get("typography") {
        let required = ["font_family", "title_size", "subtitle_size", "body_size", "small_size"];
        for name in required {
            match typography.get(name) {
                None => report.error(format!("visual_identity.typography.{name} is required")),
                Some(value) => {
                    if name != "font_family" {
                        if let Some(token) = value.as_str() {
                            if !is_css_token(token) {
                                report.warning(format!(
                                    "visual_identity.typography.{name} should use valid CSS units, got: {token}"
                                ));
                            }
                        }
                    }
                }
            }
        }
    }
}

fn validate_layout_def(layout: &Value, path: &str, report: &mut ValidationReport) {
    for field in ["description", "text_position", "text_zone", "max_width"] {
        match layout.get(field) {
            None => report.error(format!("{path}.{field} is required")),
            Some(value) => {
                if field == "max_width" {
                    if let Some(token) = value.as_str() {
                        if !is_css_token(token) {
                            report.warning(format!(
                                "{path}.max_width should use valid CSS units, got: {token}"
                            ));
                        }
                    }
                }
            }
        }
    }
}

fn validate_layout_system(ls: &Value, report: &mut ValidationReport) {
    let Some(layouts) = ls.get("layouts") else {
        report.error("layout_system.layouts is required");
        return;
    };

    for name in LayoutName::REQUIRED {
        match layouts.get(name) {
            None => report.error(format!("layout_system.layouts.{name} is required")),
            Some(layout) => {
                validate_layout_def(layout, &format!("layout_system.layouts.{name}"), report)
            }
        }
    }
    for name in LayoutName::OPTIONAL {
        if let Some(layout) = layouts.get(name) {
            validate_layout_def(layout, &format!("layout_system.layouts.{name}"), report);
        }
    }
}

fn validate_asset_config(ac: &Value, report: &mut ValidationReport) {
    require_fields(ac, "asset_config", &["dimensions", "naming_convention", "dalle_model"], report);

    if let Some(dimensions) = ac.get("dimensions") {
        for class in ["background", "icons"] {
            let path = format!("asset_config.dimensions.{class}");
            let Some(dim) = dimensions.get(class) else {
                report.error(format!("{path} is required"));
                continue;
            };

            match dim.get("generation_size") {
                None => report.error(format!("{path}.generation_size is required")),
                Some(value) => {
                    if let Some(size) = value.as_str() {
                        if !is_dimensions(size) {
                            report.error(format!(
                                "{path}.generation_size must be WIDTHxHEIGHT format, got: {size}"
                            ));
                        }
                    }
                }
            }

            match dim.get("final_size") {
                None => report.error(format!("{path}.final_size is required")),
                Some(value) => {
                    let ok = value
                        .as_array()
                        .map_or(false, |arr| arr.len() == 2 && arr.iter().all(Value::is_u64));
                    if !ok {
                        report.error(format!(
                            "{path}.final_size must be [width, height] array"
                        ));
                    }
                }
            }
        }
    }

    if let Some(model) = str_field(ac, "dalle_model") {
        if !VALID_MODELS.contains(&model) {
            report.error(format!(
                "asset_config.dalle_model must be one of: {VALID_MODELS:?}, got: {model}"
            ));
        }
    }
}

fn validate_slides(slides: &Value, report: &mut ValidationReport) {
    let Some(slides) = slides.as_array() else {
        report.error("slides must be an array");
        return;
    };
    if slides.is_empty() {
        report.error("slides array cannot be empty");
        return;
    }

    let mut seen_ids = std::collections::HashSet::new();

    for (i, slide) in slides.iter().enumerate() {
        require_fields(slide, &format!("slides[{i}]"), &["id", "layout", "content", "background"], report);

        if let Some(id) = str_field(slide, "id") {
            if !is_slide_id(id) {
                report.error(format!(
                    "slides[{i}].id must be two-digit zero-padded (e.g. '01'), got: {id}"
                ));
            }
            if !seen_ids.insert(id.to_string()) {
                report.error(format!("duplicate slide id: {id}"));
            }
        }

        if let Some(layout) = str_field(slide, "layout") {
            if !LayoutName::ALL.contains(&layout) {
                report.error(format!(
                    "slides[{i}].layout must be one of: {:?}, got: {layout}",
                    LayoutName::ALL
                ));
            }
        }

        if let Some(background) = slide.get("background") {
            let path = format!("slides[{i}].background");
            require_fields(background, &path, &["filename", "concept", "prompt", "text_zones"], report);

            if let Some(filename) = str_field(background, "filename") {
                if !is_slide_filename(filename) {
                    report.error(format!(
                        "{path}.filename must match 'SLIDE-XX-Concept.png', got: {filename}"
                    ));
                }
            }
            if let Some(text_zones) = background.get("text_zones") {
                if text_zones.get("primary").is_none() {
                    report.error(format!("{path}.text_zones.primary is required"));
                }
            }
        }
    }
}

fn validate_icons(icons: &Value, report: &mut ValidationReport) {
    let Some(icons) = icons.as_array() else {
        report.error("icons must be an array");
        return;
    };

    let mut seen_filenames = std::collections::HashSet::new();

    for (i, icon) in icons.iter().enumerate() {
        require_fields(icon, &format!("icons[{i}]"), &["filename", "prompt", "transparent"], report);

        if let Some(filename) = str_field(icon, "filename") {
            if !is_icon_filename(filename) {
                report.error(format!(
                    "icons[{i}].filename must match 'IC-Name.png', got: {filename}"
                ));
            }
            if !seen_filenames.insert(filename.to_string()) {
                report.error(format!("duplicate icon filename: {filename}"));
            }
        }

        if let Some(transparent) = icon.get("transparent") {
            if !transparent.is_boolean() {
                report.error(format!("icons[{i}].transparent must be boolean"));
            }
        }
    }
}

fn validate_runtime_config(rc: &Value, report: &mut ValidationReport) {
    require_fields(
        rc,
        "runtime_config",
        &["reveal_js", "responsive_breakpoints", "content_sizing"],
        report,
    );

    if let Some(reveal) = rc.get("reveal_js") {
        require_fields(
            reveal,
            "runtime_config.reveal_js",
            &[
                "transition", "transition_speed", "background_transition",
                "controls", "progress", "keyboard", "touch", "hash",
            ],
            report,
        );

        if let Some(transition) = str_field(reveal, "transition") {
            if !VALID_TRANSITIONS.contains(&transition) {
                report.error(format!(
                    "runtime_config.reveal_js.transition must be one of: {VALID_TRANSITIONS:?}, got: {transition}"
                ));
            }
        }
        if let Some(speed) = str_field(reveal, "transition_speed") {
            if !VALID_SPEEDS.contains(&speed) {
                report.error(format!(
                    "runtime_config.reveal_js.transition_speed must be one of: {VALID_SPEEDS:?}, got: {speed}"
                ));
            }
        }
    }

    if let Some(breakpoints) = rc.get("responsive_breakpoints") {
        for name in ["tablet", "mobile"] {
            match breakpoints.get(name) {
                None => report.error(format!(
                    "runtime_config.responsive_breakpoints.{name} is required"
                )),
                Some(value) => {
                    if let Some(bp) = value.as_str() {
                        if !bp.ends_with("px") {
                            report.error(format!(
                                "runtime_config.responsive_breakpoints.{name} must end with 'px', got: {bp}"
                            ));
                        }
                    }
                }
            }
        }
    }
}
