//! Transcoder plumbing for storycast
//! Runs ffmpeg/ffprobe with bounded time, and renders the local placeholders
//! (solid frames, silent tracks) that never depend on an external tool.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

use crate::config::AppConfig;

/// Handle on the external media transcoder
#[derive(Debug, Clone)]
pub struct Transcoder {
    ffmpeg: String,
    ffprobe: String,
    timeout: Duration,
}

impl Transcoder {
    pub fn new(ffmpeg: &str, ffprobe: &str, timeout: Duration) -> Self {
        Self {
            ffmpeg: ffmpeg.to_string(),
            ffprobe: ffprobe.to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.process.ffmpeg_path,
            &config.process.ffprobe_path,
            config.transcode_timeout(),
        )
    }

    /// Check that ffmpeg and ffprobe can be executed
    pub fn check_dependencies(&self) -> Result<()> {
        let mut missing = Vec::new();
        for bin in [&self.ffmpeg, &self.ffprobe] {
            let ok = std::process::Command::new(bin)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false);
            if !ok {
                missing.push(bin.as_str());
            }
        }

        if missing.is_empty() {
            return Ok(());
        }

        let mut msg = format!(
            "Missing required dependencies: {}.\nPlease install them first.",
            missing.join(", ")
        );
        match std::env::consts::OS {
            "linux" => msg.push_str("\n\nOn Linux (Ubuntu/Debian), try:\n  sudo apt update && sudo apt install ffmpeg"),
            "macos" => msg.push_str("\n\nOn macOS, try:\n  brew install ffmpeg"),
            "windows" => msg.push_str("\n\nOn Windows, ensure ffmpeg is in your PATH."),
            _ => {}
        }
        Err(anyhow!(msg))
    }

    /// Run ffmpeg with the given arguments; non-zero exit is an error carrying stderr
    pub async fn run(&self, args: &[String]) -> Result<()> {
        let mut full = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
        ];
        full.extend_from_slice(args);

        log::debug!("ffmpeg args: {:?}", full);

        let mut command = Command::new(&self.ffmpeg);
        command.args(&full);
        let output = run_command(command, self.timeout)
            .await
            .context("Failed to execute ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::warn!("ffmpeg failed: {}", stderr.trim());
            return Err(anyhow!("ffmpeg failed: {}", stderr.trim()));
        }

        Ok(())
    }

    /// Media duration in seconds via ffprobe
    pub async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let mut command = Command::new(&self.ffprobe);
        command.args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ]);
        command.arg(path);

        let output = run_command(command, Duration::from_secs(30))
            .await
            .context("Failed to run ffprobe")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let duration: f64 = stdout
            .trim()
            .parse()
            .with_context(|| format!("Failed to parse duration: '{}'", stdout.trim()))?;

        if !duration.is_finite() || duration < 0.0 {
            return Err(anyhow!("Invalid duration {} for {}", duration, path.display()));
        }
        Ok(duration)
    }

    /// Sample rate and channel count of the first audio stream
    pub async fn probe_audio_format(&self, path: &Path) -> Result<(u32, u16)> {
        let mut command = Command::new(&self.ffprobe);
        command.args([
            "-v",
            "error",
            "-select_streams",
            "a:0",
            "-show_entries",
            "stream=sample_rate,channels",
            "-of",
            "csv=p=0",
        ]);
        command.arg(path);

        let output = run_command(command, Duration::from_secs(30))
            .await
            .context("Failed to run ffprobe for audio format")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parts: Vec<&str> = stdout.trim().split(',').collect();
        if parts.len() != 2 {
            return Err(anyhow!("Failed to parse audio format: '{}'", stdout.trim()));
        }

        let sample_rate: u32 = parts[0].trim().parse().context("Invalid sample rate")?;
        let channels: u16 = parts[1].trim().parse().context("Invalid channel count")?;
        Ok((sample_rate, channels))
    }
}

/// Run a prepared command, capturing output, killing it if it outlives `timeout`
pub async fn run_command(mut command: Command, timeout: Duration) -> Result<Output> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, command.output()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(anyhow!("Command timed out after {}s", timeout.as_secs())),
    }
}

/// Whether an executable can be spawned at all
pub async fn is_available(program: &str) -> bool {
    let mut command = Command::new(program);
    command.arg("--version");
    run_command(command, Duration::from_secs(10)).await.is_ok()
}

/// Write a solid-color frame with the image crate (no transcoder involved)
pub fn render_solid_color(path: &Path, width: u32, height: u32, rgb: [u8; 3]) -> Result<()> {
    let frame = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    frame
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("Failed to write placeholder frame {}", path.display()))
}

/// Write a silent 16-bit PCM WAV of the given length
pub fn write_silence(path: &Path, seconds: f64, sample_rate: u32, channels: u16) -> Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let frames = (seconds.max(0.0) * sample_rate as f64).round() as u64;
    for _ in 0..frames * channels as u64 {
        writer.write_sample(0i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Duration, sample rate and channels read from a WAV header
pub fn wav_info(path: &Path) -> Result<(f64, u32, u16)> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(anyhow!("WAV has zero sample rate: {}", path.display()));
    }
    let duration = reader.duration() as f64 / spec.sample_rate as f64;
    Ok((duration, spec.sample_rate, spec.channels))
}

/// Format seconds for filter arguments and `-t`
pub fn secs(value: f64) -> String {
    format!("{:.3}", value.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_round_trips_duration() {
        let path = std::env::temp_dir().join("storycast_test_silence.wav");
        write_silence(&path, 2.5, 48000, 2).unwrap();
        let (duration, rate, channels) = wav_info(&path).unwrap();
        assert!((duration - 2.5).abs() < 1e-6);
        assert_eq!(rate, 48000);
        assert_eq!(channels, 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_solid_color_frame_dimensions() {
        let path = std::env::temp_dir().join("storycast_test_solid.png");
        render_solid_color(&path, 64, 36, [0, 0, 0]).unwrap();
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (64, 36));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_secs_formatting() {
        assert_eq!(secs(1.23456), "1.235");
        assert_eq!(secs(-0.5), "0.000");
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let command = Command::new("storycast-definitely-not-a-binary");
        assert!(run_command(command, Duration::from_secs(5)).await.is_err());
        assert!(!is_available("storycast-definitely-not-a-binary").await);
    }

    #[test]
    fn test_transcoder_reports_missing_binaries() {
        let t = Transcoder::new("no-such-ffmpeg", "no-such-ffprobe", Duration::from_secs(5));
        let err = t.check_dependencies().unwrap_err().to_string();
        assert!(err.contains("no-such-ffmpeg"));
        assert!(err.contains("no-such-ffprobe"));
    }
}
