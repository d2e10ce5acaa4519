//! Narration synthesis
//!
//! `VoiceService` holds the speech backends discovered at startup and is
//! shared by reference. `VoiceEngine` picks between plain neural speech and
//! the voice-clone service; both always yield a usable `NarrationAudio`.

pub mod backends;
pub mod profile;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{AppConfig, VoiceConfig};
use crate::filtergraph::{self, Filter};
use crate::scratch::ScratchFile;
use crate::types::{NarrationAudio, NarrationStyle};
use crate::video::{self, Transcoder};
use backends::NativeSpeech;
use profile::{naturalize, Prosody, VoiceProfile};

/// Every narration track is delivered at this format
const OUTPUT_RATE: u32 = 48000;
const OUTPUT_CHANNELS: u16 = 2;

/// Speech backends available to this process
pub struct VoiceService {
    client: Client,
    config: VoiceConfig,
    transcoder: Transcoder,
    edge_tts: bool,
    native: Option<NativeSpeech>,
}

/// One rung of the neural ladder
#[derive(Debug, Clone, Copy)]
enum SpeechTier {
    Neural(Prosody),
    NeuralPlain,
    Native,
}

impl VoiceService {
    /// Probe the installed speech tools once
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let edge_tts = video::is_available(&config.voice.edge_tts_path).await;
        let native = if config.voice.platform_speech {
            NativeSpeech::detect().await
        } else {
            None
        };
        if !edge_tts {
            log::warn!(
                "edge-tts not found at '{}', narration quality will degrade",
                config.voice.edge_tts_path
            );
        }
        if let Some(n) = &native {
            log::debug!("Platform speech available: {}", n.name());
        }
        Self::with_backends(
            &config.voice,
            Transcoder::from_config(config),
            edge_tts,
            native,
        )
    }

    pub fn with_backends(
        config: &VoiceConfig,
        transcoder: Transcoder,
        edge_tts: bool,
        native: Option<NativeSpeech>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.synthesis_timeout_secs))
            .build()
            .context("Failed to build HTTP client for voice service")?;
        Ok(Self {
            client,
            config: config.clone(),
            transcoder,
            edge_tts,
            native,
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.synthesis_timeout_secs)
    }

    fn output_path(work_dir: &Path, scene_index: usize) -> PathBuf {
        work_dir.join(format!("scene_{}_voice.wav", scene_index))
    }

    /// Neural ladder: modulated prosody, default prosody, platform speech, silence
    async fn neural(
        &self,
        text: &str,
        style: NarrationStyle,
        scene_index: usize,
        work_dir: &Path,
    ) -> NarrationAudio {
        let out = Self::output_path(work_dir, scene_index);
        if text.trim().is_empty() {
            log::warn!("Scene {}: empty narration, using silence", scene_index);
            return self.silence(scene_index, &out).await;
        }

        let profile = VoiceProfile::for_style(style);
        let tiers = [
            SpeechTier::Neural(profile.modulated(scene_index, &self.config)),
            SpeechTier::NeuralPlain,
            SpeechTier::Native,
        ];

        for tier in tiers {
            match self
                .speak(tier, text, &profile, scene_index, work_dir, &out)
                .await
            {
                Ok(audio) => {
                    log::info!(
                        "Scene {}: narration via {:?} ({:.2}s)",
                        scene_index,
                        tier,
                        audio.duration
                    );
                    return audio;
                }
                Err(e) => log::warn!("Scene {}: speech tier {:?} failed: {:#}", scene_index, tier, e),
            }
        }

        log::warn!("Scene {}: all speech backends failed, using silence", scene_index);
        self.silence(scene_index, &out).await
    }

    async fn speak(
        &self,
        tier: SpeechTier,
        text: &str,
        profile: &VoiceProfile,
        scene_index: usize,
        work_dir: &Path,
        out: &Path,
    ) -> Result<NarrationAudio> {
        let raw = match tier {
            SpeechTier::Neural(_) | SpeechTier::NeuralPlain => {
                if !self.edge_tts {
                    return Err(anyhow!("edge-tts unavailable"));
                }
                let prosody = match tier {
                    SpeechTier::Neural(p) => Some(p),
                    _ => None,
                };
                let raw = ScratchFile::new(work_dir.join(format!("scene_{}_raw.mp3", scene_index)));
                backends::edge_tts(
                    &self.config.edge_tts_path,
                    &naturalize(text),
                    profile.voice,
                    prosody,
                    raw.path(),
                    self.timeout(),
                )
                .await?;
                raw
            }
            SpeechTier::Native => {
                let native = self
                    .native
                    .as_ref()
                    .ok_or_else(|| anyhow!("no platform speech engine"))?;
                let raw = ScratchFile::new(work_dir.join(format!(
                    "scene_{}_raw.{}",
                    scene_index,
                    native.extension()
                )));
                native.speak(text, raw.path(), self.timeout()).await?;
                raw
            }
        };

        self.finish(raw.path(), out, scene_index).await
    }

    /// Voice-clone service, reading the narration in the reference voice
    async fn cloned(
        &self,
        url: &str,
        reference: &Path,
        text: &str,
        scene_index: usize,
        work_dir: &Path,
    ) -> Result<NarrationAudio> {
        if text.trim().is_empty() {
            return Err(anyhow!("empty narration"));
        }
        let raw = ScratchFile::new(work_dir.join(format!("scene_{}_clone.wav", scene_index)));
        backends::clone_voice(&self.client, url, &naturalize(text), reference, raw.path()).await?;
        let out = Self::output_path(work_dir, scene_index);
        self.finish(raw.path(), &out, scene_index).await
    }

    /// Studio post-processing, falling back to a plain transcode
    async fn finish(&self, raw: &Path, out: &Path, scene_index: usize) -> Result<NarrationAudio> {
        if let Err(e) = self.post_process(raw, out).await {
            log::warn!(
                "Scene {}: audio post-processing failed, transcoding plainly: {:#}",
                scene_index,
                e
            );
            self.transcode_plain(raw, out)
                .await
                .context("Plain audio transcode failed")?;
        }
        self.measure(out, scene_index).await
    }

    async fn post_process(&self, raw: &Path, out: &Path) -> Result<()> {
        let chain = filtergraph::simple(vec![
            Filter::new("dynaudnorm").arg("p", 0.9).arg("s", 5i64),
            Filter::new("aecho").pos(0.8).pos(0.88).pos(6i64).pos(0.4),
            Filter::new("highpass").arg("f", 80i64),
            Filter::new("lowpass").arg("f", 15000i64),
        ])?;

        let mut args = vec!["-i".to_string(), raw.to_string_lossy().to_string()];
        args.extend(["-af".to_string(), chain]);
        args.extend(Self::output_format_args(out));
        self.transcoder.run(&args).await
    }

    async fn transcode_plain(&self, raw: &Path, out: &Path) -> Result<()> {
        let mut args = vec!["-i".to_string(), raw.to_string_lossy().to_string()];
        args.extend(Self::output_format_args(out));
        self.transcoder.run(&args).await
    }

    fn output_format_args(out: &Path) -> Vec<String> {
        vec![
            "-ar".to_string(),
            OUTPUT_RATE.to_string(),
            "-ac".to_string(),
            OUTPUT_CHANNELS.to_string(),
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            out.to_string_lossy().to_string(),
        ]
    }

    /// Duration from ffprobe, or from the WAV header when ffprobe is unusable
    async fn measure(&self, path: &Path, scene_index: usize) -> Result<NarrationAudio> {
        let duration = match self.transcoder.probe_duration(path).await {
            Ok(d) => d,
            Err(e) => {
                log::debug!("ffprobe failed on {}, reading WAV header: {:#}", path.display(), e);
                video::wav_info(path)?.0
            }
        };
        if duration <= 0.0 {
            return Err(anyhow!("narration has zero duration: {}", path.display()));
        }
        let (sample_rate, channels) = match self.transcoder.probe_audio_format(path).await {
            Ok(format) => format,
            Err(_) => {
                let (_, rate, channels) = video::wav_info(path)?;
                (rate, channels)
            }
        };
        Ok(NarrationAudio {
            scene_index,
            local_path: path.to_path_buf(),
            sample_rate,
            channels,
            duration,
        })
    }

    /// Last rung: a locally written silent track
    async fn silence(&self, scene_index: usize, out: &Path) -> NarrationAudio {
        let seconds = self.config.silence_secs.max(1.0);
        if let Err(e) = video::write_silence(out, seconds, OUTPUT_RATE, OUTPUT_CHANNELS) {
            log::error!("Scene {}: could not write silent track: {:#}", scene_index, e);
        }
        match self.measure(out, scene_index).await {
            Ok(audio) => audio,
            Err(_) => NarrationAudio {
                scene_index,
                local_path: out.to_path_buf(),
                sample_rate: OUTPUT_RATE,
                channels: OUTPUT_CHANNELS,
                duration: seconds,
            },
        }
    }
}

/// Which voice reads the narration
#[derive(Debug, Clone)]
pub enum VoiceEngine {
    Neural,
    Cloned { url: String, reference: PathBuf },
}

impl VoiceEngine {
    /// Cloned when a service URL and a reference sample are both configured
    pub fn from_config(config: &VoiceConfig) -> Self {
        match (&config.clone_url, &config.reference_sample) {
            (Some(url), Some(reference)) if !url.trim().is_empty() => VoiceEngine::Cloned {
                url: url.clone(),
                reference: reference.clone(),
            },
            _ => VoiceEngine::Neural,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VoiceEngine::Neural => "neural",
            VoiceEngine::Cloned { .. } => "cloned",
        }
    }

    /// Never fails; the worst case is a silent track
    pub async fn synthesize(
        &self,
        service: &VoiceService,
        text: &str,
        style: NarrationStyle,
        scene_index: usize,
        work_dir: &Path,
    ) -> NarrationAudio {
        match self {
            VoiceEngine::Neural => service.neural(text, style, scene_index, work_dir).await,
            VoiceEngine::Cloned { url, reference } => {
                match service
                    .cloned(url, reference, text, scene_index, work_dir)
                    .await
                {
                    Ok(audio) => {
                        log::info!(
                            "Scene {}: cloned narration ({:.2}s)",
                            scene_index,
                            audio.duration
                        );
                        audio
                    }
                    Err(e) => {
                        log::warn!(
                            "Scene {}: voice clone failed, using neural voice: {:#}",
                            scene_index,
                            e
                        );
                        service
                            .neural(text, NarrationStyle::Story, scene_index, work_dir)
                            .await
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_service() -> VoiceService {
        let config = VoiceConfig {
            synthesis_timeout_secs: 2,
            silence_secs: 3.0,
            ..VoiceConfig::default()
        };
        let transcoder = Transcoder::new(
            "storycast-no-ffmpeg",
            "storycast-no-ffprobe",
            Duration::from_secs(5),
        );
        VoiceService::with_backends(&config, transcoder, false, None).unwrap()
    }

    fn work_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_no_backends_yields_silence() {
        let dir = work_dir("storycast_voice_silence");
        let service = bare_service();
        let audio = VoiceEngine::Neural
            .synthesize(&service, "The tide comes in.", NarrationStyle::Story, 4, &dir)
            .await;
        assert_eq!(audio.scene_index, 4);
        assert!(audio.local_path.exists());
        assert!((audio.duration - 3.0).abs() < 1e-6);
        assert_eq!(audio.sample_rate, 48000);
        assert_eq!(audio.channels, 2);
        let _ = std::fs::remove_file(&audio.local_path);
    }

    #[tokio::test]
    async fn test_failed_clone_falls_back() {
        let dir = work_dir("storycast_voice_clone");
        let reference = dir.join("reference.wav");
        video::write_silence(&reference, 0.2, 16000, 1).unwrap();

        let engine = VoiceEngine::Cloned {
            url: "http://127.0.0.1:9".to_string(),
            reference: reference.clone(),
        };
        let audio = engine
            .synthesize(&bare_service(), "Hello.", NarrationStyle::TradeWave, 0, &dir)
            .await;
        assert!(audio.duration > 0.0);
        assert!(audio.local_path.exists());
        // no raw scratch files remain
        assert!(!dir.join("scene_0_clone.wav").exists());
        let _ = std::fs::remove_file(&audio.local_path);
        let _ = std::fs::remove_file(&reference);
    }

    #[test]
    fn test_engine_selection() {
        assert_eq!(VoiceEngine::from_config(&VoiceConfig::default()).name(), "neural");
        let config = VoiceConfig {
            clone_url: Some("http://localhost:8000".to_string()),
            reference_sample: Some(PathBuf::from("me.wav")),
            ..VoiceConfig::default()
        };
        assert_eq!(VoiceEngine::from_config(&config).name(), "cloned");

        let url_only = VoiceConfig {
            clone_url: Some("http://localhost:8000".to_string()),
            ..VoiceConfig::default()
        };
        assert_eq!(VoiceEngine::from_config(&url_only).name(), "neural");
    }

    #[tokio::test]
    async fn test_real_speech_when_tools_present() {
        let config = AppConfig::default();
        if Transcoder::from_config(&config).check_dependencies().is_err() {
            return;
        }
        let service = VoiceService::new(&config).await.unwrap();
        let dir = work_dir("storycast_voice_real");
        let audio = VoiceEngine::Neural
            .synthesize(&service, "A short test line.", NarrationStyle::Story, 1, &dir)
            .await;
        // with or without speech tools, the track is usable
        assert!(audio.duration > 0.0);
        assert_eq!(audio.sample_rate, 48000);
        let _ = std::fs::remove_file(&audio.local_path);
    }
}
