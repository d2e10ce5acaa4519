//! Shared data types for storycast

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One narration + visual-intent unit of the input script
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scene {
    #[serde(default)]
    pub index: usize,
    pub narration: String,
    #[serde(alias = "image_prompt", default)]
    pub visual_intent: String,
    #[serde(default)]
    pub stock_query: Option<String>,
}

/// Where a scene's image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetSource {
    StockSearch,
    WebSearch,
    AIGenerated,
    Reused,
    SolidColor,
}

impl AssetSource {
    /// True when the image came from an external source (not a substitute)
    pub fn is_genuine(&self) -> bool {
        matches!(
            self,
            AssetSource::StockSearch | AssetSource::WebSearch | AssetSource::AIGenerated
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
}

/// Visual asset owned by one scene's pipeline instance
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub scene_index: usize,
    pub kind: MediaKind,
    pub local_path: PathBuf,
    pub source: AssetSource,
    pub cleaned: bool,
}

/// Narration audio with its measured duration
#[derive(Debug, Clone)]
pub struct NarrationAudio {
    pub scene_index: usize,
    pub local_path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    /// Seconds, probed after encoding
    pub duration: f64,
}

/// A subtitle shown during `[start_offset, end_offset)` of a scene clip
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleChunk {
    pub text: String,
    pub start_offset: f64,
    pub end_offset: f64,
}

/// Deterministic camera movement over a still image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionPattern {
    ZoomInCenter,
    ZoomOutCenter,
    PanLeftRight,
    PanRightLeft,
    ZoomUpperThird,
    ZoomLowerThird,
}

impl MotionPattern {
    pub const ALL: [MotionPattern; 6] = [
        MotionPattern::ZoomInCenter,
        MotionPattern::ZoomOutCenter,
        MotionPattern::PanLeftRight,
        MotionPattern::PanRightLeft,
        MotionPattern::ZoomUpperThird,
        MotionPattern::ZoomLowerThird,
    ];

    /// Pattern for a scene: `ALL[scene_index mod ALL.len()]`
    pub fn for_scene(scene_index: usize) -> Self {
        Self::ALL[scene_index % Self::ALL.len()]
    }
}

/// Per-scene encoded clip, temporary until assembly
#[derive(Debug, Clone)]
pub struct SceneClip {
    pub scene_index: usize,
    pub local_path: PathBuf,
    pub duration: f64,
    /// False when the encoder failed and a placeholder file was written
    pub valid: bool,
}

/// The single persisted artifact of a run
#[derive(Debug, Clone, Serialize)]
pub struct FinalVideo {
    pub path: PathBuf,
    pub duration: f64,
}

/// Output frame shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Wide,
    #[serde(rename = "9:16")]
    Tall,
}

impl AspectRatio {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            AspectRatio::Wide => (1920, 1080),
            AspectRatio::Tall => (1080, 1920),
        }
    }

    /// Orientation keyword understood by stock photo APIs
    pub fn orientation(&self) -> &'static str {
        match self {
            AspectRatio::Wide => "landscape",
            AspectRatio::Tall => "portrait",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AspectRatio::Wide => write!(f, "16:9"),
            AspectRatio::Tall => write!(f, "9:16"),
        }
    }
}

/// Narration style tag; unknown tags fall back to `Story`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrationStyle {
    ScienceShort,
    HollywoodHype,
    TradeWave,
    #[default]
    #[serde(other)]
    Story,
}

impl NarrationStyle {
    /// Keywords prepended to visual intents when scenes are parsed from free text
    pub fn visual_prefix(&self) -> &'static str {
        match self {
            NarrationStyle::Story => "",
            NarrationStyle::ScienceShort => "science, technology, ",
            NarrationStyle::HollywoodHype => "news, celebrity, ",
            NarrationStyle::TradeWave => "finance, business, ",
        }
    }
}

/// The JSON document a run is invoked with
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptRequest {
    #[serde(default)]
    pub story_id: Option<serde_json::Value>,
    #[serde(default)]
    pub scenes: Vec<Scene>,
    /// Free text parsed into scenes when `scenes` is empty
    #[serde(default)]
    pub story: Option<String>,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub style: NarrationStyle,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub background_music: Option<PathBuf>,
    #[serde(default)]
    pub logo: Option<PathBuf>,
}

/// The single JSON line written to stdout
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Success { video_path: String },
    Error { message: String },
}

/// Application version constant
pub const APP_VERSION: &str = "0.4.2";

/// Application name constant
pub const APP_NAME: &str = "storycast";
