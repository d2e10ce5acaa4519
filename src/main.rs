//! storycast
//! Turns a scripted story (narration + visual intent per scene) into one
//! narrated, subtitled video with motion, transitions, logo and music.

mod assemble;
mod assets;
mod cleaner;
mod compose;
mod config;
mod filtergraph;
mod pipeline;
mod scratch;
mod story;
mod types;
mod video;
mod voice;

use anyhow::{Context, Result};
use config::AppConfig;
use simplelog::{CombinedLogger, Config, LevelFilter, SharedLogger, WriteLogger};
use std::fs::{self, OpenOptions};
use std::path::Path;

use crate::types::{FinalVideo, RunOutcome, ScriptRequest, APP_NAME, APP_VERSION};

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or(APP_NAME);

    // Check and strip --debug flag
    let debug_mode = args.iter().any(|a| a == "--debug");
    let actual_args: Vec<&str> = args
        .iter()
        .skip(1)
        .map(String::as_str)
        .filter(|a| *a != "--debug")
        .collect();

    let input = match actual_args.first() {
        Some(&("--version" | "-V")) => {
            println!("{} {}", APP_NAME, APP_VERSION);
            return;
        }
        Some(&("--help" | "-h" | "help")) => {
            print_help(program);
            return;
        }
        Some(input) => *input,
        None => {
            print_help(program);
            std::process::exit(1);
        }
    };

    let outcome = match execute(input, debug_mode).await {
        Ok(video) => {
            log::info!("Done in {:.2}s of video", video.duration);
            RunOutcome::Success {
                video_path: video.path.display().to_string(),
            }
        }
        Err(e) => {
            log::error!("Run failed: {:#}", e);
            RunOutcome::Error {
                message: format!("{:#}", e),
            }
        }
    };

    let code = match outcome {
        RunOutcome::Success { .. } => 0,
        RunOutcome::Error { .. } => 1,
    };
    match serde_json::to_string(&outcome) {
        Ok(line) => println!("{}", line),
        Err(_) => println!(r#"{{"status":"error","message":"Assembly failed"}}"#),
    }
    std::process::exit(code);
}

async fn execute(input: &str, debug_mode: bool) -> Result<FinalVideo> {
    let request = load_request(input)?;
    init_logging(debug_mode, &request.output_dir)?;
    log::info!("Starting {} v{}", APP_NAME, APP_VERSION);

    let config = AppConfig::load()?;
    pipeline::run(&request, &config).await
}

/// The request is inline JSON or a path to a JSON file
fn load_request(input: &str) -> Result<ScriptRequest> {
    let content = if input.trim_start().starts_with('{') {
        input.to_string()
    } else {
        fs::read_to_string(input).with_context(|| format!("Failed to read request {}", input))?
    };
    serde_json::from_str(&content).context("Invalid request JSON")
}

/// Logs go to stderr; with --debug also to debug.log in the output directory.
/// stdout carries only the result line.
fn init_logging(debug_mode: bool, output_dir: &Path) -> Result<()> {
    let level = if debug_mode {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut loggers: Vec<Box<dyn SharedLogger>> =
        vec![WriteLogger::new(level, Config::default(), std::io::stderr())];

    if debug_mode {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(output_dir.join("debug.log"))?;
        loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file));
    }

    // a logger may already be installed; keep it
    let _ = CombinedLogger::init(loggers);
    Ok(())
}

/// Print help message
fn print_help(program: &str) {
    println!("{} v{}", APP_NAME, APP_VERSION);
    println!();
    println!("USAGE:");
    println!("  {} [--debug] <request.json | inline JSON>", program);
    println!("  {} --version", program);
    println!();
    println!("REQUEST:");
    println!("  {{");
    println!("    \"scenes\": [{{\"narration\": \"...\", \"visual_intent\": \"...\"}}],");
    println!("    \"story\": \"free text, used when scenes is empty\",");
    println!("    \"output_dir\": \"./out\",");
    println!("    \"style\": \"story | science_short | hollywood_hype | trade_wave\",");
    println!("    \"aspect_ratio\": \"16:9 | 9:16\",");
    println!("    \"background_music\": \"music.mp3\",");
    println!("    \"logo\": \"logo.png\"");
    println!("  }}");
    println!();
    println!("OUTPUT:");
    println!("  One JSON line on stdout: {{\"status\":\"success\",\"video_path\":...}}");
    println!("  or {{\"status\":\"error\",\"message\":...}}. Logs go to stderr.");
    println!();
    println!("ENVIRONMENT:");
    println!("  PEXELS_API_KEY, OPENAI_API_KEY, STORYCAST_CLONE_URL");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_request() {
        let req = load_request(r#"{"scenes": [], "story": "x", "output_dir": "/tmp/o"}"#).unwrap();
        assert_eq!(req.output_dir, Path::new("/tmp/o"));
    }

    #[test]
    fn test_request_from_file() {
        let path = std::env::temp_dir().join("storycast_request.json");
        fs::write(&path, r#"{"scenes": [{"narration": "Hi there"}], "output_dir": "out"}"#).unwrap();
        let req = load_request(path.to_str().unwrap()).unwrap();
        assert_eq!(req.scenes.len(), 1);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_bad_request_is_an_error() {
        assert!(load_request("{not json").is_err());
        assert!(load_request("/no/such/request.json").is_err());
    }
}
