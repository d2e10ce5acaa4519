//! Final assembly: scene clips to one video
//!
//! Clips are merged with crossfades (hard cuts as fallback), then the logo
//! and the background music are layered on. Each layer writes a new
//! intermediate and the superseded one is dropped. A failed layer is skipped,
//! a failed merge is a run failure.

use anyhow::{anyhow, Context, Result};
use std::path::Path;

use crate::config::AssemblyConfig;
use crate::filtergraph::{Chain, Filter, FilterGraph};
use crate::scratch::ScratchFile;
use crate::types::{AspectRatio, FinalVideo, SceneClip};
use crate::video::{self, Transcoder};

const FINAL_NAME: &str = "final_video.mp4";

/// Valid clips in order with their crossfade offsets
#[derive(Debug, Clone)]
pub struct AssemblyPlan {
    pub clips: Vec<SceneClip>,
    /// Offset of transition `i` (between clip `i` and `i+1`)
    pub offsets: Vec<f64>,
    pub crossfade: f64,
    /// Expected length after crossfading
    pub total: f64,
}

impl AssemblyPlan {
    /// Drops invalid clips; fails when none are left
    pub fn new(clips: &[SceneClip], crossfade: f64) -> Result<Self> {
        for skipped in clips.iter().filter(|c| !c.valid) {
            log::warn!("Scene {} excluded from assembly", skipped.scene_index);
        }
        let valid: Vec<SceneClip> = clips.iter().filter(|c| c.valid).cloned().collect();
        if valid.is_empty() {
            return Err(anyhow!(
                "no valid scene clips to assemble ({} invalid)",
                clips.len()
            ));
        }

        // a transition may not eat more than half of the shortest clip
        let shortest = valid
            .iter()
            .map(|c| c.duration)
            .fold(f64::INFINITY, f64::min);
        let c = crossfade.clamp(0.0, shortest / 2.0);

        let mut offsets = Vec::with_capacity(valid.len().saturating_sub(1));
        let mut elapsed = 0.0;
        for (i, clip) in valid.iter().enumerate().take(valid.len() - 1) {
            elapsed += clip.duration;
            offsets.push(elapsed - (i + 1) as f64 * c);
        }

        let sum: f64 = valid.iter().map(|c| c.duration).sum();
        let total = sum - (valid.len() - 1) as f64 * c;

        Ok(Self {
            clips: valid,
            offsets,
            crossfade: c,
            total,
        })
    }

    /// xfade chain for video and acrossfade chain for audio
    pub fn crossfade_graph(&self, fps: u32) -> Result<String> {
        let mut graph = FilterGraph::new();
        for i in 0..self.clips.len() {
            graph.push(
                Chain::new()
                    .input(&format!("{}:v", i))
                    .then(Filter::new("fps").pos(fps))
                    .then(Filter::new("settb").arg("expr", "AVTB"))
                    .then(Filter::new("setsar").pos(1i64))
                    .then(Filter::new("format").arg("pix_fmts", "yuv420p"))
                    .output(&format!("n{}", i)),
            );
        }

        let mut video = "n0".to_string();
        let mut audio = "0:a".to_string();
        for (i, offset) in self.offsets.iter().enumerate() {
            let last = i + 1 == self.offsets.len();
            let v_out = if last { "vout".to_string() } else { format!("x{}", i + 1) };
            let a_out = if last { "aout".to_string() } else { format!("y{}", i + 1) };

            graph.push(
                Chain::new()
                    .input(&video)
                    .input(&format!("n{}", i + 1))
                    .then(
                        Filter::new("xfade")
                            .arg("transition", "fade")
                            .arg("duration", self.crossfade)
                            .arg("offset", *offset),
                    )
                    .output(&v_out),
            );
            graph.push(
                Chain::new()
                    .input(&audio)
                    .input(&format!("{}:a", i + 1))
                    .then(Filter::new("acrossfade").arg("d", self.crossfade))
                    .output(&a_out),
            );
            video = v_out;
            audio = a_out;
        }
        graph.build()
    }
}

/// Lines for the concat demuxer
fn concat_list(clips: &[SceneClip]) -> String {
    clips
        .iter()
        .map(|c| {
            let path = c.local_path.to_string_lossy().replace('\'', "'\\''");
            format!("file '{}'\n", path)
        })
        .collect()
}

pub struct Assembler {
    transcoder: Transcoder,
    config: AssemblyConfig,
    aspect: AspectRatio,
    fps: u32,
}

impl Assembler {
    pub fn new(transcoder: Transcoder, config: &AssemblyConfig, aspect: AspectRatio, fps: u32) -> Self {
        Self {
            transcoder,
            config: config.clone(),
            aspect,
            fps,
        }
    }

    /// Merge clips into `output_dir/final_video.mp4`
    pub async fn assemble(
        &self,
        clips: &[SceneClip],
        music: Option<&Path>,
        logo: Option<&Path>,
        output_dir: &Path,
    ) -> Result<FinalVideo> {
        let plan = AssemblyPlan::new(clips, self.config.crossfade_secs)?;
        log::info!(
            "Assembling {} of {} clips (expected {:.2}s)",
            plan.clips.len(),
            clips.len(),
            plan.total
        );

        let mut stage = self.merge(&plan, output_dir).await?;

        if let Some(logo) = logo.filter(|p| p.exists()) {
            let next = ScratchFile::new(output_dir.join("temp_logo.mp4"));
            match self.overlay_logo(stage.path(), logo, next.path()).await {
                Ok(()) => stage = next,
                Err(e) => log::warn!("Logo overlay skipped: {:#}", e),
            }
        }

        if let Some(music) = music.filter(|p| p.exists()) {
            let total = match self.transcoder.probe_duration(stage.path()).await {
                Ok(d) => d,
                Err(_) => plan.total,
            };
            let next = ScratchFile::new(output_dir.join("temp_music.mp4"));
            match self.mix_music(stage.path(), music, total, next.path()).await {
                Ok(()) => stage = next,
                Err(e) => log::warn!("Background music skipped: {:#}", e),
            }
        }

        let final_path = output_dir.join(FINAL_NAME);
        let staged = stage.persist();
        if let Err(e) = std::fs::rename(&staged, &final_path) {
            log::debug!("rename failed ({}), copying instead", e);
            std::fs::copy(&staged, &final_path)
                .with_context(|| format!("Failed to write {}", final_path.display()))?;
            std::fs::remove_file(&staged).ok();
        }

        let duration = match self.transcoder.probe_duration(&final_path).await {
            Ok(d) => d,
            Err(_) => plan.total,
        };
        let path = std::fs::canonicalize(&final_path).unwrap_or(final_path);
        log::info!("Final video: {} ({:.2}s)", path.display(), duration);
        Ok(FinalVideo { path, duration })
    }

    /// Single clip is copied as is; several are crossfaded, or hard-cut if that fails
    async fn merge(&self, plan: &AssemblyPlan, output_dir: &Path) -> Result<ScratchFile> {
        let merged = ScratchFile::new(output_dir.join("temp_merged.mp4"));

        if plan.clips.len() == 1 {
            std::fs::copy(&plan.clips[0].local_path, merged.path())
                .context("Failed to copy the only scene clip")?;
            return Ok(merged);
        }

        match self.crossfade(plan, merged.path()).await {
            Ok(()) => return Ok(merged),
            Err(e) => log::warn!("Crossfade merge failed, falling back to hard cuts: {:#}", e),
        }

        let list = ScratchFile::new(output_dir.join("concat.txt"));
        std::fs::write(list.path(), concat_list(&plan.clips))
            .context("Failed to write concat list")?;

        if let Err(e) = self.concat(list.path(), merged.path(), true).await {
            log::warn!("Stream-copy concat failed, re-encoding: {:#}", e);
            self.concat(list.path(), merged.path(), false)
                .await
                .context("Failed to merge scene clips")?;
        }
        Ok(merged)
    }

    async fn crossfade(&self, plan: &AssemblyPlan, out: &Path) -> Result<()> {
        let mut args: Vec<String> = Vec::new();
        for clip in &plan.clips {
            args.push("-i".to_string());
            args.push(clip.local_path.to_string_lossy().to_string());
        }
        args.push("-filter_complex".to_string());
        args.push(plan.crossfade_graph(self.fps)?);
        args.push("-map".to_string());
        args.push("[vout]".to_string());
        args.push("-map".to_string());
        args.push("[aout]".to_string());
        args.extend(Self::video_codec_args());
        args.extend(Self::audio_codec_args());
        args.push(out.to_string_lossy().to_string());
        self.transcoder.run(&args).await
    }

    async fn concat(&self, list: &Path, out: &Path, stream_copy: bool) -> Result<()> {
        let mut args: Vec<String> = vec![
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list.to_string_lossy().to_string(),
        ];
        if stream_copy {
            args.push("-c".to_string());
            args.push("copy".to_string());
        } else {
            args.extend(Self::video_codec_args());
            args.extend(Self::audio_codec_args());
        }
        args.push(out.to_string_lossy().to_string());
        self.transcoder.run(&args).await
    }

    pub fn logo_graph(&self) -> Result<String> {
        let (w, _) = self.aspect.dimensions();
        let logo_w = ((w as f64 * self.config.logo_width_fraction).round() as i64).max(2);
        let pad = self.config.logo_padding;

        let mut graph = FilterGraph::new();
        graph
            .push(
                Chain::new()
                    .input("1:v")
                    .then(Filter::new("scale").pos(logo_w).pos(-1i64))
                    .then(Filter::new("format").arg("pix_fmts", "rgba"))
                    .then(Filter::new("colorchannelmixer").arg("aa", self.config.logo_opacity))
                    .output("logo"),
            )
            .push(
                Chain::new()
                    .input("0:v")
                    .input("logo")
                    .then(
                        Filter::new("overlay")
                            .arg("x", format!("W-w-{}", pad))
                            .arg("y", format!("H-h-{}", pad)),
                    )
                    .output("v"),
            );
        graph.build()
    }

    async fn overlay_logo(&self, input: &Path, logo: &Path, out: &Path) -> Result<()> {
        let mut args: Vec<String> = Vec::new();
        args.push("-i".to_string());
        args.push(input.to_string_lossy().to_string());
        args.push("-i".to_string());
        args.push(logo.to_string_lossy().to_string());
        args.push("-filter_complex".to_string());
        args.push(self.logo_graph()?);
        args.push("-map".to_string());
        args.push("[v]".to_string());
        args.push("-map".to_string());
        args.push("0:a?".to_string());
        args.extend(Self::video_codec_args());
        args.push("-c:a".to_string());
        args.push("copy".to_string());
        args.push(out.to_string_lossy().to_string());
        self.transcoder.run(&args).await
    }

    /// Narration is `[0:a]`, looped music is `[1:a]`
    pub fn music_graph(&self, total: f64) -> Result<String> {
        let fade_in = self.config.music_fade_in_secs.max(0.0);
        let tail = self.config.music_tail_secs.max(0.0);
        let fade_out_start = (total - tail).max(0.0);

        let mut graph = FilterGraph::new();
        graph
            .push(
                Chain::new()
                    .input("1:a")
                    .then(Filter::new("volume").pos(self.config.music_volume))
                    .then(
                        Filter::new("afade")
                            .arg("t", "in")
                            .arg("st", 0i64)
                            .arg("d", fade_in),
                    )
                    .then(
                        Filter::new("afade")
                            .arg("t", "out")
                            .arg("st", fade_out_start)
                            .arg("d", tail),
                    )
                    .output("bg"),
            )
            .push(
                Chain::new()
                    .input("0:a")
                    .then(Filter::new("volume").pos(self.config.narration_boost))
                    .then(Filter::new("dynaudnorm"))
                    .output("voice"),
            )
            .push(
                Chain::new()
                    .input("voice")
                    .input("bg")
                    .then(
                        Filter::new("amix")
                            .arg("inputs", 2i64)
                            .arg("duration", "first")
                            .arg("dropout_transition", 0i64),
                    )
                    .output("aout"),
            );
        graph.build()
    }

    async fn mix_music(&self, input: &Path, music: &Path, total: f64, out: &Path) -> Result<()> {
        let mut args: Vec<String> = Vec::new();
        args.push("-i".to_string());
        args.push(input.to_string_lossy().to_string());
        args.push("-stream_loop".to_string());
        args.push("-1".to_string());
        args.push("-i".to_string());
        args.push(music.to_string_lossy().to_string());
        args.push("-filter_complex".to_string());
        args.push(self.music_graph(total)?);
        args.push("-map".to_string());
        args.push("0:v".to_string());
        args.push("-map".to_string());
        args.push("[aout]".to_string());
        args.push("-c:v".to_string());
        args.push("copy".to_string());
        args.extend(Self::audio_codec_args());
        args.push("-t".to_string());
        args.push(video::secs(total));
        args.push(out.to_string_lossy().to_string());
        self.transcoder.run(&args).await
    }

    fn video_codec_args() -> Vec<String> {
        vec![
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "medium".to_string(),
            "-crf".to_string(),
            "18".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ]
    }

    fn audio_codec_args() -> Vec<String> {
        vec![
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
            "-ar".to_string(),
            "48000".to_string(),
        ]
    }
}
