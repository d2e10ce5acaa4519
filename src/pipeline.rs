//! Run orchestration
//!
//! Scenes go through asset resolution, cleaning, narration and composition
//! one at a time, in order. Every per-scene stage degrades instead of
//! failing, so the only run-level failure comes from assembly.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use crate::assemble::Assembler;
use crate::assets::{AssetResolver, ReuseSlot};
use crate::cleaner::WatermarkCleaner;
use crate::compose::SceneComposer;
use crate::config::AppConfig;
use crate::scratch::ScratchFile;
use crate::story;
use crate::types::{AspectRatio, FinalVideo, NarrationStyle, Scene, SceneClip, ScriptRequest};
use crate::video::Transcoder;
use crate::voice::{VoiceEngine, VoiceService};

/// Where a scene is in its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneStage {
    Pending,
    AssetResolved,
    Cleaned,
    NarrationReady,
    ClipComposed,
    Done,
}

impl SceneStage {
    pub fn next(self) -> Self {
        match self {
            SceneStage::Pending => SceneStage::AssetResolved,
            SceneStage::AssetResolved => SceneStage::Cleaned,
            SceneStage::Cleaned => SceneStage::NarrationReady,
            SceneStage::NarrationReady => SceneStage::ClipComposed,
            SceneStage::ClipComposed | SceneStage::Done => SceneStage::Done,
        }
    }
}

fn advance(scene_index: usize, stage: &mut SceneStage) {
    let next = stage.next();
    log::debug!("Scene {}: {:?} -> {:?}", scene_index, stage, next);
    *stage = next;
}

/// Scenes from the request, or parsed from its free-text story
pub fn scenes_for(request: &ScriptRequest) -> Result<Vec<Scene>> {
    let scenes: Vec<Scene> = if !request.scenes.is_empty() {
        request
            .scenes
            .iter()
            .enumerate()
            .map(|(i, s)| Scene {
                index: i,
                ..s.clone()
            })
            .collect()
    } else if let Some(text) = &request.story {
        story::parse_story(text, request.style)
    } else {
        Vec::new()
    };

    if scenes.is_empty() {
        return Err(anyhow!("request contains no scenes"));
    }
    Ok(scenes)
}

pub struct Pipeline {
    resolver: AssetResolver,
    cleaner: WatermarkCleaner,
    voice: VoiceService,
    engine: VoiceEngine,
    composer: SceneComposer,
    assembler: Assembler,
    style: NarrationStyle,
    aspect: AspectRatio,
    work_dir: PathBuf,
}

impl Pipeline {
    pub fn build(
        request: &ScriptRequest,
        config: &AppConfig,
        transcoder: Transcoder,
        voice: VoiceService,
    ) -> Result<Self> {
        let work_dir = request.output_dir.clone();
        Ok(Self {
            resolver: AssetResolver::new(&config.sources, request.aspect_ratio, &work_dir)?,
            cleaner: WatermarkCleaner::new(&config.watermark),
            voice,
            engine: VoiceEngine::from_config(&config.voice),
            composer: SceneComposer::new(config, transcoder.clone()),
            assembler: Assembler::new(
                transcoder,
                &config.assembly,
                request.aspect_ratio,
                config.motion.fps,
            ),
            style: request.style,
            aspect: request.aspect_ratio,
            work_dir,
        })
    }

    /// One clip per scene, in scene order
    pub async fn render_scenes(&self, scenes: &[Scene]) -> Vec<SceneClip> {
        log::info!("Narration engine: {}", self.engine.name());
        let mut reuse = ReuseSlot::new(&self.work_dir);
        let mut clips = Vec::with_capacity(scenes.len());
        for scene in scenes {
            log::info!("Scene {}/{}", scene.index + 1, scenes.len());
            clips.push(self.render_scene(scene, &mut reuse).await);
        }
        clips
    }

    async fn render_scene(&self, scene: &Scene, reuse: &mut ReuseSlot) -> SceneClip {
        let mut stage = SceneStage::Pending;

        let mut asset = self.resolver.resolve(scene, reuse).await;
        let _image = ScratchFile::new(&asset.local_path);
        log::debug!(
            "Scene {}: {:?} from {:?} at {}",
            scene.index,
            asset.kind,
            asset.source,
            asset.local_path.display()
        );
        advance(scene.index, &mut stage);

        self.cleaner.clean(&mut asset).await;
        if let Err(e) = reuse.record(&asset) {
            log::warn!("Scene {}: asset not kept for reuse: {:#}", scene.index, e);
        }
        advance(scene.index, &mut stage);

        let audio = self
            .engine
            .synthesize(&self.voice, &scene.narration, self.style, scene.index, &self.work_dir)
            .await;
        let _audio = ScratchFile::new(&audio.local_path);
        log::debug!(
            "Scene {}: narration {:.2}s at {} Hz, {} ch",
            scene.index,
            audio.duration,
            audio.sample_rate,
            audio.channels
        );
        advance(scene.index, &mut stage);

        let clip = self
            .composer
            .compose(&asset, &audio, &scene.narration, scene.index, self.aspect, &self.work_dir)
            .await;
        advance(scene.index, &mut stage);

        if !clip.valid {
            log::warn!("Scene {}: clip is a placeholder", scene.index);
        }
        advance(scene.index, &mut stage);
        clip
    }

    pub async fn assemble(
        &self,
        clips: &[SceneClip],
        music: Option<&Path>,
        logo: Option<&Path>,
    ) -> Result<FinalVideo> {
        self.assembler
            .assemble(clips, music, logo, &self.work_dir)
            .await
    }
}

/// Render a whole request into its final video
pub async fn run(request: &ScriptRequest, config: &AppConfig) -> Result<FinalVideo> {
    let scenes = scenes_for(request)?;
    tokio::fs::create_dir_all(&request.output_dir)
        .await
        .with_context(|| format!("Failed to create {}", request.output_dir.display()))?;

    log::info!(
        "Processing story {} ({:?}, {}) with {} scenes",
        request
            .story_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
        request.style,
        request.aspect_ratio,
        scenes.len()
    );

    let transcoder = Transcoder::from_config(config);
    if let Err(e) = transcoder.check_dependencies() {
        log::warn!("{}", e);
    }
    let voice = VoiceService::new(config).await?;
    let pipeline = Pipeline::build(request, config, transcoder, voice)?;

    let clips = pipeline.render_scenes(&scenes).await;
    let _clip_files: Vec<ScratchFile> = clips
        .iter()
        .map(|c| ScratchFile::new(&c.local_path))
        .collect();

    let music = request
        .background_music
        .as_deref()
        .or(config.assembly.default_music.as_deref());
    let logo = request
        .logo
        .as_deref()
        .or(config.assembly.default_logo.as_deref());

    pipeline.assemble(&clips, music, logo).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourcesConfig;
    use std::time::Duration;

    fn offline_config(silence_secs: f64) -> AppConfig {
        let mut config = AppConfig::default();
        config.sources = SourcesConfig {
            pexels_api_key: None,
            openai_api_key: None,
            web_search_url: "http://127.0.0.1:9".to_string(),
            pollinations_url: "http://127.0.0.1:9/prompt".to_string(),
            request_timeout_secs: 2,
            ..SourcesConfig::default()
        };
        config.voice.edge_tts_path = "storycast-no-edge-tts".to_string();
        config.voice.silence_secs = silence_secs;
        config.voice.platform_speech = false;
        config
    }

    fn request(dir: &Path, scenes: usize) -> ScriptRequest {
        ScriptRequest {
            story_id: None,
            scenes: (0..scenes)
                .map(|i| Scene {
                    index: 0,
                    narration: format!("This is scene number {}.", i),
                    visual_intent: "a quiet harbor at night".to_string(),
                    stock_query: None,
                })
                .collect(),
            story: None,
            output_dir: dir.to_path_buf(),
            style: NarrationStyle::Story,
            aspect_ratio: AspectRatio::Wide,
            background_music: None,
            logo: None,
        }
    }

    #[test]
    fn test_stage_order() {
        let mut stage = SceneStage::Pending;
        let mut seen = vec![stage];
        while stage != SceneStage::Done {
            advance(0, &mut stage);
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                SceneStage::Pending,
                SceneStage::AssetResolved,
                SceneStage::Cleaned,
                SceneStage::NarrationReady,
                SceneStage::ClipComposed,
                SceneStage::Done,
            ]
        );
    }

    #[test]
    fn test_scenes_are_reindexed() {
        let req = request(Path::new("/tmp"), 3);
        let scenes = scenes_for(&req).unwrap();
        let indices: Vec<_> = scenes.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_story_text_becomes_scenes() {
        let mut req = request(Path::new("/tmp"), 0);
        req.story = Some("The ship left the harbor at dawn. Nobody saw it return.".to_string());
        assert_eq!(scenes_for(&req).unwrap().len(), 2);

        req.story = None;
        assert!(scenes_for(&req).is_err());
    }

    #[tokio::test]
    async fn test_every_scene_yields_a_clip() {
        let dir = std::env::temp_dir().join("storycast_pipeline_clips");
        std::fs::create_dir_all(&dir).unwrap();
        let config = offline_config(1.0);
        let transcoder = Transcoder::new(
            "storycast-no-ffmpeg",
            "storycast-no-ffprobe",
            Duration::from_secs(5),
        );
        let voice = VoiceService::with_backends(&config.voice, transcoder.clone(), false, None)
            .unwrap();
        let req = request(&dir, 3);
        let pipeline = Pipeline::build(&req, &config, transcoder, voice).unwrap();

        let scenes = scenes_for(&req).unwrap();
        let clips = pipeline.render_scenes(&scenes).await;
        assert_eq!(clips.len(), 3);
        let order: Vec<_> = clips.iter().map(|c| c.scene_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        // without a transcoder nothing encodes, and that fails the run
        assert!(clips.iter().all(|c| !c.valid));
        assert!(pipeline.assemble(&clips, None, None).await.is_err());

        // per-scene images and narration are gone
        assert!(!dir.join("scene_0_placeholder.png").exists());
        assert!(!dir.join("scene_1_voice.wav").exists());
        for clip in &clips {
            let _ = std::fs::remove_file(&clip.local_path);
        }
    }

    #[tokio::test]
    async fn test_two_scene_run_with_failing_sources() {
        let config = offline_config(2.0);
        if Transcoder::from_config(&config).check_dependencies().is_err() {
            return;
        }
        let dir = std::env::temp_dir().join("storycast_pipeline_e2e");
        let req = request(&dir, 2);

        let video = run(&req, &config).await.unwrap();
        assert!(video.path.exists());
        let expected = 2.0 + 2.0 - config.assembly.crossfade_secs;
        assert!(
            (video.duration - expected).abs() < 0.35,
            "final video lasted {}",
            video.duration
        );
        assert!(!dir.join("scene_0_clip.mp4").exists());
        let _ = std::fs::remove_file(&video.path);
    }
}
