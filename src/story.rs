//! Story parser: turns free text into an ordered scene list

use regex::Regex;

use crate::types::{NarrationStyle, Scene};

/// Sentences shorter than this are dropped
const MIN_SENTENCE_CHARS: usize = 10;

/// Upper bound on scenes produced from one story
pub const MAX_SCENES: usize = 50;

/// Split a story into one scene per sentence
pub fn parse_story(content: &str, style: NarrationStyle) -> Vec<Scene> {
    let flattened = content.replace(['\r', '\n'], " ");

    let boundary = match Regex::new(r"[.!?]+\s+") {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };

    let mut sentences = Vec::new();
    let mut last = 0;
    for m in boundary.find_iter(&flattened) {
        // keep the terminal punctuation with its sentence
        let end = m.start() + m.as_str().trim_end().len();
        sentences.push(&flattened[last..end]);
        last = m.end();
    }
    sentences.push(&flattened[last..]);

    sentences
        .into_iter()
        .map(str::trim)
        .filter(|s| s.chars().count() >= MIN_SENTENCE_CHARS)
        .take(MAX_SCENES)
        .enumerate()
        .map(|(index, sentence)| Scene {
            index,
            narration: sentence.to_string(),
            visual_intent: format!("{}{}", style.visual_prefix(), sentence),
            stock_query: None,
        })
        .collect()
}
