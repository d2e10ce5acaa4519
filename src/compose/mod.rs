//! Scene composition: one still image plus narration into a video clip

pub mod motion;
pub mod subtitles;

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

use crate::config::{AppConfig, MotionConfig, SubtitleConfig};
use crate::filtergraph::{Chain, Filter, FilterGraph};
use crate::scratch::ScratchFile;
use crate::types::{AspectRatio, MediaAsset, MotionPattern, NarrationAudio, SceneClip};
use crate::video::{self, Transcoder};

/// Clips are never shorter than this
const MIN_SCENE_SECS: f64 = 1.0;
/// Fade in/out length, shortened for very short clips
const FADE_SECS: f64 = 0.5;
const AUDIO_RATE: u32 = 48000;

pub struct SceneComposer {
    transcoder: Transcoder,
    motion: MotionConfig,
    subtitles: SubtitleConfig,
    font: Option<String>,
}

impl SceneComposer {
    pub fn new(config: &AppConfig, transcoder: Transcoder) -> Self {
        let font = config.subtitles.resolve_font();
        if font.is_none() {
            log::warn!("No subtitle font found, using the transcoder default");
        }
        Self {
            transcoder,
            motion: config.motion.clone(),
            subtitles: config.subtitles.clone(),
            font,
        }
    }

    /// Render one scene. Never fails: when both encodes fail the clip is a
    /// placeholder with `valid=false`.
    pub async fn compose(
        &self,
        asset: &MediaAsset,
        audio: &NarrationAudio,
        narration: &str,
        scene_index: usize,
        aspect: AspectRatio,
        work_dir: &Path,
    ) -> SceneClip {
        let duration = audio.duration.max(MIN_SCENE_SECS);
        // a failed encode may leave a partial file behind
        let out = ScratchFile::new(work_dir.join(format!("scene_{}_clip.mp4", scene_index)));

        let full = self
            .encode_full(asset, audio, narration, scene_index, aspect, duration, out.path())
            .await;
        match full {
            Ok(()) => return self.clip(scene_index, out.persist(), duration, true),
            Err(e) => log::warn!("Scene {}: full encode failed: {:#}", scene_index, e),
        }

        let still = self
            .encode_still(asset, audio, aspect, duration, out.path())
            .await;
        match still {
            Ok(()) => {
                log::warn!("Scene {}: using simplified still-image clip", scene_index);
                return self.clip(scene_index, out.persist(), duration, true);
            }
            Err(e) => log::warn!("Scene {}: simplified encode failed: {:#}", scene_index, e),
        }

        log::error!("Scene {}: clip could not be encoded, marking invalid", scene_index);
        drop(out);
        let placeholder = work_dir.join(format!("scene_{}_clip_placeholder.png", scene_index));
        let (w, h) = aspect.dimensions();
        if let Err(e) = video::render_solid_color(&placeholder, w, h, [0, 0, 0]) {
            log::debug!("Scene {}: placeholder frame not written: {:#}", scene_index, e);
        }
        self.clip(scene_index, placeholder, duration, false)
    }

    fn clip(&self, scene_index: usize, local_path: PathBuf, duration: f64, valid: bool) -> SceneClip {
        SceneClip {
            scene_index,
            local_path,
            duration,
            valid,
        }
    }

    /// `[0:v]` image and `[1:a]` narration into `[v]`/`[a]`
    pub fn full_graph(
        &self,
        narration: &str,
        scene_index: usize,
        aspect: AspectRatio,
        duration: f64,
    ) -> Result<String> {
        let (w, h) = aspect.dimensions();
        let frames = (duration * self.motion.fps as f64).ceil().max(1.0) as u32;
        let pattern = MotionPattern::for_scene(scene_index);
        let fade = (duration / 4.0).min(FADE_SECS);

        // oversample before zoompan to keep the motion smooth
        let mut video = Chain::new()
            .input("0:v")
            .then(
                Filter::new("scale")
                    .pos(w * 2)
                    .pos(h * 2)
                    .arg("force_original_aspect_ratio", "increase")
                    .arg("flags", "lanczos"),
            )
            .then(Filter::new("crop").pos(w * 2).pos(h * 2))
            .then(motion::zoompan(pattern, frames, w, h, &self.motion))
            .then(
                Filter::new("eq")
                    .arg("contrast", 1.05)
                    .arg("saturation", 1.1)
                    .arg("brightness", 0.01),
            );

        let chunks = subtitles::chunk_subtitles(narration, duration, self.subtitles.words_per_chunk);
        for text in subtitles::drawtext_filters(&chunks, aspect, self.font.as_deref(), &self.subtitles) {
            video = video.then(text);
        }

        let video = video
            .then(Filter::new("fade").arg("t", "in").arg("st", 0i64).arg("d", fade))
            .then(
                Filter::new("fade")
                    .arg("t", "out")
                    .arg("st", duration - fade)
                    .arg("d", fade),
            )
            .then(Filter::new("format").arg("pix_fmts", "yuv420p"))
            .output("v");

        let mut graph = FilterGraph::new();
        graph.push(video).push(Self::audio_chain());
        graph.build()
    }

    /// Narration padded with silence so it never ends before the picture
    fn audio_chain() -> Chain {
        Chain::new()
            .input("1:a")
            .then(Filter::new("aresample").pos(AUDIO_RATE))
            .then(Filter::new("apad"))
            .output("a")
    }

    #[allow(clippy::too_many_arguments)]
    async fn encode_full(
        &self,
        asset: &MediaAsset,
        audio: &NarrationAudio,
        narration: &str,
        scene_index: usize,
        aspect: AspectRatio,
        duration: f64,
        out: &Path,
    ) -> Result<()> {
        let graph = self.full_graph(narration, scene_index, aspect, duration)?;

        let mut args: Vec<String> = Vec::new();
        args.push("-i".to_string());
        args.push(asset.local_path.to_string_lossy().to_string());
        args.push("-i".to_string());
        args.push(audio.local_path.to_string_lossy().to_string());
        args.push("-filter_complex".to_string());
        args.push(graph);
        args.push("-map".to_string());
        args.push("[v]".to_string());
        args.push("-map".to_string());
        args.push("[a]".to_string());
        args.push("-t".to_string());
        args.push(video::secs(duration));
        args.push("-r".to_string());
        args.push(self.motion.fps.to_string());
        args.push("-c:v".to_string());
        args.push("libx264".to_string());
        args.push("-preset".to_string());
        args.push("slow".to_string());
        args.push("-crf".to_string());
        args.push("18".to_string());
        args.push("-tune".to_string());
        args.push("film".to_string());
        args.extend(Self::audio_codec_args());
        args.push(out.to_string_lossy().to_string());

        self.transcoder.run(&args).await?;
        ensure_clip(out)
    }

    /// Static frame, no motion or subtitles
    async fn encode_still(
        &self,
        asset: &MediaAsset,
        audio: &NarrationAudio,
        aspect: AspectRatio,
        duration: f64,
        out: &Path,
    ) -> Result<()> {
        let (w, h) = aspect.dimensions();
        let mut graph = FilterGraph::new();
        graph
            .push(
                Chain::new()
                    .input("0:v")
                    .then(
                        Filter::new("scale")
                            .pos(w)
                            .pos(h)
                            .arg("force_original_aspect_ratio", "decrease"),
                    )
                    .then(
                        Filter::new("pad")
                            .arg("w", w)
                            .arg("h", h)
                            .arg("x", "(ow-iw)/2")
                            .arg("y", "(oh-ih)/2"),
                    )
                    .then(Filter::new("format").arg("pix_fmts", "yuv420p"))
                    .output("v"),
            )
            .push(Self::audio_chain());

        let mut args: Vec<String> = Vec::new();
        args.push("-loop".to_string());
        args.push("1".to_string());
        args.push("-framerate".to_string());
        args.push(self.motion.fps.to_string());
        args.push("-i".to_string());
        args.push(asset.local_path.to_string_lossy().to_string());
        args.push("-i".to_string());
        args.push(audio.local_path.to_string_lossy().to_string());
        args.push("-filter_complex".to_string());
        args.push(graph.build()?);
        args.push("-map".to_string());
        args.push("[v]".to_string());
        args.push("-map".to_string());
        args.push("[a]".to_string());
        args.push("-t".to_string());
        args.push(video::secs(duration));
        args.push("-c:v".to_string());
        args.push("libx264".to_string());
        args.push("-preset".to_string());
        args.push("veryfast".to_string());
        args.push("-crf".to_string());
        args.push("23".to_string());
        args.extend(Self::audio_codec_args());
        args.push(out.to_string_lossy().to_string());

        self.transcoder.run(&args).await?;
        ensure_clip(out)
    }

    fn audio_codec_args() -> Vec<String> {
        vec![
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
            "-ar".to_string(),
            AUDIO_RATE.to_string(),
            "-ac".to_string(),
            "2".to_string(),
        ]
    }
}

fn ensure_clip(path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(m) if m.len() > 0 => Ok(()),
        _ => Err(anyhow!("encoder produced no clip at {}", path.display())),
    }
}
