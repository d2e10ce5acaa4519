//! Speech backends: edge-tts CLI, platform speech, HTTP voice cloning

use anyhow::{anyhow, Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use super::profile::Prosody;
use crate::video;

/// Speech engine bundled with the operating system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeSpeech {
    /// macOS `say`, writes AIFF
    Say,
    /// `espeak-ng` or `espeak`, writes WAV
    Espeak(String),
}

impl NativeSpeech {
    /// Find the first usable engine on this machine
    pub async fn detect() -> Option<Self> {
        if cfg!(target_os = "macos") && video::is_available("say").await {
            return Some(NativeSpeech::Say);
        }
        for program in ["espeak-ng", "espeak"] {
            if video::is_available(program).await {
                return Some(NativeSpeech::Espeak(program.to_string()));
            }
        }
        None
    }

    pub fn extension(&self) -> &'static str {
        match self {
            NativeSpeech::Say => "aiff",
            NativeSpeech::Espeak(_) => "wav",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            NativeSpeech::Say => "say",
            NativeSpeech::Espeak(program) => program,
        }
    }

    pub async fn speak(&self, text: &str, out: &Path, timeout: Duration) -> Result<()> {
        let mut command = match self {
            NativeSpeech::Say => {
                let mut c = Command::new("say");
                c.arg("-o").arg(out).arg(text);
                c
            }
            NativeSpeech::Espeak(program) => {
                let mut c = Command::new(program);
                c.arg("-w").arg(out).arg(text);
                c
            }
        };
        let output = video::run_command(command, timeout)
            .await
            .with_context(|| format!("Failed to run {}", self.name()))?;
        if !output.status.success() {
            return Err(anyhow!(
                "{} failed: {}",
                self.name(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        ensure_written(out)
    }
}

/// Neural speech through the edge-tts CLI; `prosody=None` uses the voice defaults
pub async fn edge_tts(
    program: &str,
    text: &str,
    voice: &str,
    prosody: Option<Prosody>,
    out: &Path,
    timeout: Duration,
) -> Result<()> {
    let mut command = Command::new(program);
    command
        .arg("--voice")
        .arg(voice)
        .arg("--text")
        .arg(text)
        .arg("--write-media")
        .arg(out);
    if let Some(p) = prosody {
        command.arg(p.rate_arg()).arg(p.pitch_arg());
    }

    log::debug!("edge-tts voice {} prosody {:?}", voice, prosody);
    let output = video::run_command(command, timeout)
        .await
        .context("Failed to run edge-tts")?;
    if !output.status.success() {
        return Err(anyhow!(
            "edge-tts failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    ensure_written(out)
}

#[derive(Deserialize)]
struct CloneResponse {
    #[serde(default)]
    success: bool,
    output_path: Option<String>,
    #[serde(default)]
    sample_rate: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

/// Ask the clone service to speak `text` in the reference voice and
/// download the converted audio to `out`
pub async fn clone_voice(
    client: &Client,
    base_url: &str,
    text: &str,
    reference: &Path,
    out: &Path,
) -> Result<()> {
    let base = base_url.trim_end_matches('/');
    let sample = tokio::fs::read(reference)
        .await
        .with_context(|| format!("Failed to read reference sample {}", reference.display()))?;
    let file_name = reference
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("reference.wav")
        .to_string();

    let form = Form::new().text("text", text.to_string()).part(
        "target_voice",
        Part::bytes(sample).file_name(file_name).mime_str("audio/wav")?,
    );

    let resp = client
        .post(format!("{}/generate", base))
        .multipart(form)
        .send()
        .await
        .context("Voice clone request failed")?;

    let status = resp.status();
    let body: CloneResponse = resp
        .json()
        .await
        .with_context(|| format!("Invalid voice clone response (status {})", status))?;
    if !status.is_success() || !body.success {
        return Err(anyhow!(
            "Voice clone failed: {}",
            body.error.unwrap_or_else(|| status.to_string())
        ));
    }

    let remote = body
        .output_path
        .ok_or_else(|| anyhow!("Voice clone response has no output path"))?;
    let remote_name = Path::new(&remote)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Invalid output path from clone service: {}", remote))?;
    log::debug!(
        "Cloned voice ready: {} ({} Hz)",
        remote_name,
        body.sample_rate.unwrap_or(0)
    );

    let resp = client
        .get(format!("{}/outputs/{}", base, remote_name))
        .send()
        .await
        .context("Failed to download cloned audio")?;
    if !resp.status().is_success() {
        return Err(anyhow!("Cloned audio download returned {}", resp.status()));
    }
    let bytes = resp.bytes().await.context("Cloned audio download interrupted")?;
    tokio::fs::write(out, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", out.display()))?;
    ensure_written(out)
}

/// A backend may exit cleanly yet write nothing
fn ensure_written(path: &Path) -> Result<()> {
    let len = std::fs::metadata(path)
        .with_context(|| format!("Speech output missing: {}", path.display()))?
        .len();
    if len == 0 {
        return Err(anyhow!("Speech output is empty: {}", path.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_output_is_rejected() {
        let path = std::env::temp_dir().join("storycast_empty_speech.wav");
        std::fs::write(&path, b"").unwrap();
        assert!(ensure_written(&path).is_err());
        std::fs::write(&path, b"RIFF").unwrap();
        assert!(ensure_written(&path).is_ok());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_missing_edge_tts_fails() {
        let out = std::env::temp_dir().join("storycast_no_edge.mp3");
        let result = edge_tts(
            "storycast-no-such-edge-tts",
            "hello",
            "en-US-AndrewNeural",
            None,
            &out,
            Duration::from_secs(5),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_clone_service_fails() {
        let reference = std::env::temp_dir().join("storycast_clone_ref.wav");
        video::write_silence(&reference, 0.1, 16000, 1).unwrap();
        let out = std::env::temp_dir().join("storycast_clone_out.wav");
        let client = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let result = clone_voice(&client, "http://127.0.0.1:9/", "hi", &reference, &out).await;
        assert!(result.is_err());
        assert!(!out.exists());
        let _ = std::fs::remove_file(&reference);
    }

    #[test]
    fn test_native_speech_extensions() {
        assert_eq!(NativeSpeech::Say.extension(), "aiff");
        let espeak = NativeSpeech::Espeak("espeak-ng".to_string());
        assert_eq!(espeak.extension(), "wav");
        assert_eq!(espeak.name(), "espeak-ng");
    }
}
