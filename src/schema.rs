//! Schema Document - The Declarative Contract
//!
//! Typed model of a presentation schema. Deserialization is strict: every
//! required field is required here too, so a document only round-trips into
//! this model after `validation::validate_source` has passed it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentationSchema {
    pub meta: Meta,
    pub visual_identity: VisualIdentity,
    pub layout_system: LayoutSystem,
    pub asset_config: AssetConfig,
    pub slides: Vec<SlideRecord>,
    #[serde(default)]
    pub icons: Vec<IconRecord>,
    pub runtime_config: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub title: String,
    pub short_name: String,
    pub version: String,
    pub created: String,
    pub theme: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualIdentity {
    pub colors: Map<String, Value>,
    pub typography: Map<String, Value>,
    pub style_prompt: String,
    pub atmosphere: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutSystem {
    /// Keyed by layout name ("title-slide", "lf", ...). BTreeMap keeps the
    /// serialized form stable.
    pub layouts: BTreeMap<String, LayoutDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutDef {
    pub description: String,
    pub text_position: String,
    pub text_zone: String,
    pub max_width: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    pub dimensions: AssetDimensions,
    pub naming_convention: String,
    pub dalle_model: GeneratorModel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetDimensions {
    pub background: DimensionSpec,
    pub icons: DimensionSpec,
}

/// Generation size is the string the generator accepts ("1792x1024");
/// final size is the [width, height] the artifact is resized to on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionSpec {
    pub generation_size: String,
    pub final_size: [u32; 2],
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GeneratorModel {
    #[serde(rename = "dall-e-3")]
    DallE3,
    #[serde(rename = "dall-e-2")]
    DallE2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideRecord {
    pub id: String,
    pub layout: LayoutName,
    pub content: Map<String, Value>,
    pub background: BackgroundSpec,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LayoutName {
    #[serde(rename = "title-slide")]
    TitleSlide,
    #[serde(rename = "lf")]
    LeftFocus,
    #[serde(rename = "rf")]
    RightFocus,
    #[serde(rename = "tb")]
    TopBottom,
    #[serde(rename = "tl")]
    TopLeft,
    #[serde(rename = "tr")]
    TopRight,
    #[serde(rename = "bl")]
    BottomLeft,
    #[serde(rename = "br")]
    BottomRight,
}

impl LayoutName {
    pub const ALL: [&'static str; 8] =
        ["title-slide", "lf", "rf", "tb", "tl", "tr", "bl", "br"];

    /// Layouts every document must define.
    pub const REQUIRED: [&'static str; 4] = ["title-slide", "lf", "rf", "tb"];

    /// Corner layouts a document may additionally define.
    pub const OPTIONAL: [&'static str; 4] = ["tl", "tr", "bl", "br"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TitleSlide => "title-slide",
            Self::LeftFocus => "lf",
            Self::RightFocus => "rf",
            Self::TopBottom => "tb",
            Self::TopLeft => "tl",
            Self::TopRight => "tr",
            Self::BottomLeft => "bl",
            Self::BottomRight => "br",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundSpec {
    pub filename: String,
    pub concept: String,
    pub prompt: String,
    /// Named text zones; `primary` is always present after validation.
    pub text_zones: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IconRecord {
    pub filename: String,
    pub prompt: String,
    pub transparent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub reveal_js: RevealConfig,
    pub responsive_breakpoints: Map<String, Value>,
    pub content_sizing: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealConfig {
    pub transition: String,
    pub transition_speed: String,
    pub background_transition: String,
    pub controls: bool,
    pub progress: bool,
    pub keyboard: bool,
    pub touch: bool,
    pub hash: bool,
}

/// One entry of the runtime slide list the viewer consumes: layout, the
/// background filename under `bg`, and the slide's content fields flattened
/// alongside them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSlide {
    pub layout: LayoutName,
    pub bg: String,
    #[serde(flatten)]
    pub content: Map<String, Value>,
}

impl PresentationSchema {
    pub fn from_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn load(path: &Path) -> Result<Self, SchemaLoadError> {
        let raw = fs::read_to_string(path)?;
        Ok(Self::from_str(&raw)?)
    }

    /// Project the ordered slide sequence into the runtime list.
    pub fn runtime_slides(&self) -> Vec<RuntimeSlide> {
        self.slides
            .iter()
            .map(|slide| RuntimeSlide {
                layout: slide.layout,
                bg: slide.background.filename.clone(),
                content: slide.content.clone(),
            })
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaLoadError {
    #[error("failed to read schema file: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema does not match the document model: {0}")]
    Parse(#[from] serde_json::Error),
}
