//! Configuration management for storycast
//! Handles loading settings.json and environment overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// External image source settings
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SourcesConfig {
    /// Pexels API key (stock search is skipped without one)
    #[serde(default)]
    pub pexels_api_key: Option<String>,
    /// OpenAI API key (image generation uses Pollinations only without one)
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_pexels_url")]
    pub pexels_url: String,
    /// Keyword image endpoint, `{w}/{h}/{q}` appended
    #[serde(default = "default_web_search_url")]
    pub web_search_url: String,
    #[serde(default = "default_openai_url")]
    pub openai_url: String,
    #[serde(default = "default_pollinations_url")]
    pub pollinations_url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Downloads larger than this are rejected
    #[serde(default = "default_max_download")]
    pub max_download_bytes: usize,
    /// Hosts whose images are never downloaded (heavily watermarked)
    #[serde(default = "default_denylist")]
    pub forbidden_domains: Vec<String>,
    /// Content words kept by the simplified query
    #[serde(default = "default_simplified_words")]
    pub simplified_word_count: usize,
    #[serde(default = "default_broad_query")]
    pub broad_fallback_query: String,
}

fn default_pexels_url() -> String {
    "https://api.pexels.com/v1/search".to_string()
}

fn default_web_search_url() -> String {
    "https://loremflickr.com".to_string()
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1/images/generations".to_string()
}

fn default_pollinations_url() -> String {
    "https://image.pollinations.ai/prompt".to_string()
}

fn default_request_timeout() -> u64 {
    12
}

fn default_max_download() -> usize {
    20 * 1024 * 1024
}

fn default_denylist() -> Vec<String> {
    [
        "shutterstock.com",
        "gettyimages.com",
        "istockphoto.com",
        "alamy.com",
        "dreamstime.com",
        "123rf.com",
        "depositphotos.com",
        "adobestock.com",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_simplified_words() -> usize {
    5
}

fn default_broad_query() -> String {
    "cinematic background".to_string()
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            pexels_api_key: None,
            openai_api_key: None,
            pexels_url: default_pexels_url(),
            web_search_url: default_web_search_url(),
            openai_url: default_openai_url(),
            pollinations_url: default_pollinations_url(),
            request_timeout_secs: default_request_timeout(),
            max_download_bytes: default_max_download(),
            forbidden_domains: default_denylist(),
            simplified_word_count: default_simplified_words(),
            broad_fallback_query: default_broad_query(),
        }
    }
}

impl SourcesConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Narration synthesis settings
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VoiceConfig {
    /// Path or name of the edge-tts executable
    #[serde(default = "default_edge_tts")]
    pub edge_tts_path: String,
    /// Voice clone service base URL (enables the cloned engine)
    #[serde(default)]
    pub clone_url: Option<String>,
    /// Reference voice sample uploaded to the clone service
    #[serde(default)]
    pub reference_sample: Option<PathBuf>,
    /// Length of the silent fallback track
    #[serde(default = "default_silence_secs")]
    pub silence_secs: f64,
    /// Rate offsets (percent) cycled by scene index
    #[serde(default = "default_rate_modulation")]
    pub rate_modulation: Vec<i32>,
    /// Pitch offsets (Hz) cycled by scene index
    #[serde(default = "default_pitch_modulation")]
    pub pitch_modulation: Vec<i32>,
    #[serde(default = "default_synthesis_timeout")]
    pub synthesis_timeout_secs: u64,
    /// Allow `say`/`espeak` when neural speech fails
    #[serde(default = "default_true")]
    pub platform_speech: bool,
}

fn default_true() -> bool {
    true
}

fn default_edge_tts() -> String {
    "edge-tts".to_string()
}

fn default_silence_secs() -> f64 {
    5.0
}

fn default_rate_modulation() -> Vec<i32> {
    vec![0, 2, -2]
}

fn default_pitch_modulation() -> Vec<i32> {
    vec![0, 1, -1]
}

fn default_synthesis_timeout() -> u64 {
    90
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            edge_tts_path: default_edge_tts(),
            clone_url: None,
            reference_sample: None,
            silence_secs: default_silence_secs(),
            rate_modulation: default_rate_modulation(),
            pitch_modulation: default_pitch_modulation(),
            synthesis_timeout_secs: default_synthesis_timeout(),
            platform_speech: true,
        }
    }
}

/// Camera motion constants
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MotionConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Zoom increment per output frame
    #[serde(default = "default_zoom_step")]
    pub zoom_step: f64,
    /// Maximum zoom factor
    #[serde(default = "default_zoom_cap")]
    pub zoom_cap: f64,
    /// Fixed zoom used while panning, leaves room to travel
    #[serde(default = "default_pan_zoom")]
    pub pan_zoom: f64,
}

fn default_fps() -> u32 {
    30
}

fn default_zoom_step() -> f64 {
    0.001
}

fn default_zoom_cap() -> f64 {
    1.3
}

fn default_pan_zoom() -> f64 {
    1.2
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            zoom_step: default_zoom_step(),
            zoom_cap: default_zoom_cap(),
            pan_zoom: default_pan_zoom(),
        }
    }
}

/// Burned-in subtitle styling
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubtitleConfig {
    #[serde(default = "default_words_per_chunk")]
    pub words_per_chunk: usize,
    #[serde(default = "default_font_size_wide")]
    pub font_size_wide: u32,
    #[serde(default = "default_font_size_tall")]
    pub font_size_tall: u32,
    #[serde(default = "default_font_color")]
    pub font_color: String,
    /// First existing file wins
    #[serde(default = "default_font_candidates")]
    pub font_candidates: Vec<String>,
}

fn default_words_per_chunk() -> usize {
    2
}

fn default_font_size_wide() -> u32 {
    70
}

fn default_font_size_tall() -> u32 {
    90
}

fn default_font_color() -> String {
    "#FFFF00".to_string()
}

fn default_font_candidates() -> Vec<String> {
    [
        "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
        "/System/Library/Fonts/Helvetica.ttc",
        "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
        "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
        "C:/Windows/Fonts/arialbd.ttf",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            words_per_chunk: default_words_per_chunk(),
            font_size_wide: default_font_size_wide(),
            font_size_tall: default_font_size_tall(),
            font_color: default_font_color(),
            font_candidates: default_font_candidates(),
        }
    }
}

impl SubtitleConfig {
    /// First candidate font that exists on this machine
    pub fn resolve_font(&self) -> Option<String> {
        self.font_candidates
            .iter()
            .find(|p| Path::new(p).exists())
            .cloned()
    }
}

/// Watermark detection thresholds
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WatermarkConfig {
    /// Luma at or above this counts as near-white
    #[serde(default = "default_bright_threshold")]
    pub bright_threshold: u8,
    /// Max channel spread for a pixel to count as uniform gray
    #[serde(default = "default_gray_spread")]
    pub gray_spread: u8,
    /// Sobel magnitude that counts as an edge
    #[serde(default = "default_edge_threshold")]
    pub edge_threshold: f32,
    /// Abort when the mask covers more than this share of the image
    #[serde(default = "default_max_mask_fraction")]
    pub max_mask_fraction: f64,
    /// Radius of the morphological closing
    #[serde(default = "default_closing_radius")]
    pub closing_radius: u32,
    /// Minimum width/height ratio for a blob to look like text
    #[serde(default = "default_min_aspect")]
    pub min_aspect_ratio: f64,
}

fn default_bright_threshold() -> u8 {
    225
}

fn default_gray_spread() -> u8 {
    12
}

fn default_edge_threshold() -> f32 {
    120.0
}

fn default_max_mask_fraction() -> f64 {
    0.07
}

fn default_closing_radius() -> u32 {
    3
}

fn default_min_aspect() -> f64 {
    2.0
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            bright_threshold: default_bright_threshold(),
            gray_spread: default_gray_spread(),
            edge_threshold: default_edge_threshold(),
            max_mask_fraction: default_max_mask_fraction(),
            closing_radius: default_closing_radius(),
            min_aspect_ratio: default_min_aspect(),
        }
    }
}

/// Final assembly settings
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AssemblyConfig {
    #[serde(default = "default_crossfade")]
    pub crossfade_secs: f64,
    /// Logo width as a fraction of frame width
    #[serde(default = "default_logo_fraction")]
    pub logo_width_fraction: f64,
    #[serde(default = "default_logo_opacity")]
    pub logo_opacity: f64,
    #[serde(default = "default_logo_padding")]
    pub logo_padding: u32,
    #[serde(default = "default_music_volume")]
    pub music_volume: f64,
    #[serde(default = "default_narration_boost")]
    pub narration_boost: f64,
    #[serde(default = "default_music_fade_in")]
    pub music_fade_in_secs: f64,
    /// Music fades out over the last `music_tail_secs`
    #[serde(default = "default_music_tail")]
    pub music_tail_secs: f64,
    /// Used when the request names no logo
    #[serde(default)]
    pub default_logo: Option<PathBuf>,
    /// Used when the request names no music
    #[serde(default)]
    pub default_music: Option<PathBuf>,
}

fn default_crossfade() -> f64 {
    0.3
}

fn default_logo_fraction() -> f64 {
    0.12
}

fn default_logo_opacity() -> f64 {
    0.8
}

fn default_logo_padding() -> u32 {
    30
}

fn default_music_volume() -> f64 {
    0.10
}

fn default_narration_boost() -> f64 {
    1.5
}

fn default_music_fade_in() -> f64 {
    1.0
}

fn default_music_tail() -> f64 {
    2.0
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            crossfade_secs: default_crossfade(),
            logo_width_fraction: default_logo_fraction(),
            logo_opacity: default_logo_opacity(),
            logo_padding: default_logo_padding(),
            music_volume: default_music_volume(),
            narration_boost: default_narration_boost(),
            music_fade_in_secs: default_music_fade_in(),
            music_tail_secs: default_music_tail(),
            default_logo: None,
            default_music: None,
        }
    }
}

/// Transcoder process settings
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProcessConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: String,
    /// Upper bound for one transcoder invocation
    #[serde(default = "default_transcode_timeout")]
    pub transcode_timeout_secs: u64,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_transcode_timeout() -> u64 {
    600
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg(),
            ffprobe_path: default_ffprobe(),
            transcode_timeout_secs: default_transcode_timeout(),
        }
    }
}

/// Application configuration stored in settings.json
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub subtitles: SubtitleConfig,
    #[serde(default)]
    pub watermark: WatermarkConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
    #[serde(default)]
    pub process: ProcessConfig,
}

impl AppConfig {
    /// Configuration file name
    const CONFIG_FILE: &'static str = "settings.json";

    /// Load configuration from the first settings.json found, then apply
    /// environment overrides. A missing file yields defaults.
    pub fn load() -> Result<Self> {
        let mut config = match Self::locate() {
            Some(path) => Self::load_from(&path)?,
            None => {
                log::debug!("No settings.json found, using defaults");
                AppConfig::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn locate() -> Option<PathBuf> {
        let local = PathBuf::from(Self::CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("storycast").join(Self::CONFIG_FILE))
            .filter(|p| p.exists())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(key) = non_empty_env("PEXELS_API_KEY") {
            self.sources.pexels_api_key = Some(key);
        }
        if let Some(key) = non_empty_env("OPENAI_API_KEY") {
            self.sources.openai_api_key = Some(key);
        }
        if let Some(url) = non_empty_env("STORYCAST_CLONE_URL") {
            self.voice.clone_url = Some(url);
        }
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.process.transcode_timeout_secs)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.assembly.crossfade_secs, 0.3);
        assert_eq!(config.motion.fps, 30);
        assert_eq!(config.subtitles.words_per_chunk, 2);
        assert_eq!(config.sources.broad_fallback_query, "cinematic background");
        assert!(config.sources.pexels_api_key.is_none());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let json = r#"{"motion": {"zoom_cap": 1.5}, "assembly": {"crossfade_secs": 0.5}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.motion.zoom_cap, 1.5);
        assert_eq!(config.motion.zoom_step, 0.001);
        assert_eq!(config.assembly.crossfade_secs, 0.5);
        assert_eq!(config.assembly.logo_width_fraction, 0.12);
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.sources.forbidden_domains,
            config.sources.forbidden_domains
        );
        assert_eq!(parsed.voice.rate_modulation, vec![0, 2, -2]);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join("storycast_test_settings.json");
        fs::write(&path, r#"{"voice": {"silence_secs": 3.0}}"#).unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.voice.silence_secs, 3.0);
        let _ = fs::remove_file(&path);
    }
}
