//! Burned-in subtitle timing and drawtext stages

use crate::config::SubtitleConfig;
use crate::filtergraph::Filter;
use crate::types::{AspectRatio, SubtitleChunk};

/// Collapse whitespace and drop control characters
pub fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split narration into chunks of `words_per_chunk` words spread evenly over
/// `duration`. Windows are contiguous and the last one ends at `duration`.
pub fn chunk_subtitles(text: &str, duration: f64, words_per_chunk: usize) -> Vec<SubtitleChunk> {
    let clean = sanitize(text);
    let words: Vec<&str> = clean.split_whitespace().collect();
    if words.is_empty() || duration.is_nan() || duration <= 0.0 {
        return Vec::new();
    }

    let k = words_per_chunk.max(1);
    let per_word = duration / words.len() as f64;
    let mut chunks: Vec<SubtitleChunk> = words
        .chunks(k)
        .enumerate()
        .map(|(n, group)| {
            let i = n * k;
            SubtitleChunk {
                text: group.join(" "),
                start_offset: i as f64 * per_word,
                end_offset: ((i + k) as f64 * per_word).min(duration),
            }
        })
        .collect();

    if let Some(last) = chunks.last_mut() {
        last.end_offset = duration;
    }
    chunks
}

/// One drawtext stage per chunk, shown on `[start, end)`
pub fn drawtext_filters(
    chunks: &[SubtitleChunk],
    aspect: AspectRatio,
    font: Option<&str>,
    config: &SubtitleConfig,
) -> Vec<Filter> {
    let (size, y) = match aspect {
        AspectRatio::Wide => (config.font_size_wide, "h-120"),
        AspectRatio::Tall => (config.font_size_tall, "(h-text_h)/2+200"),
    };

    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let enable = if i + 1 == chunks.len() {
                format!("gte(t,{:.3})", chunk.start_offset)
            } else {
                format!("gte(t,{:.3})*lt(t,{:.3})", chunk.start_offset, chunk.end_offset)
            };
            let mut f = Filter::new("drawtext");
            if let Some(font) = font {
                f = f.arg("fontfile", font);
            }
            f.arg("text", chunk.text.as_str())
                .arg("expansion", "none")
                .arg("fontsize", size)
                .arg("fontcolor", config.font_color.as_str())
                .arg("borderw", 5i64)
                .arg("bordercolor", "black")
                .arg("shadowcolor", "black@0.6")
                .arg("shadowx", 3i64)
                .arg("shadowy", 3i64)
                .arg("x", "(w-text_w)/2")
                .arg("y", y)
                .arg("enable", enable)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filtergraph;

    #[test]
    fn test_chunks_are_contiguous_and_cover_duration() {
        let chunks = chunk_subtitles("one two three four five", 4.7, 2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "one two");
        assert_eq!(chunks[2].text, "five");
        assert_eq!(chunks[0].start_offset, 0.0);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
            assert!(pair[0].start_offset < pair[0].end_offset);
        }
        assert_eq!(chunks[2].end_offset, 4.7);
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let a = chunk_subtitles("the quick brown fox jumps over the lazy dog", 6.25, 2);
        let b = chunk_subtitles("the quick brown fox jumps over the lazy dog", 6.25, 2);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(chunk_subtitles("   \n\t", 3.0, 2).is_empty());
        assert!(chunk_subtitles("words here", 0.0, 2).is_empty());
    }

    #[test]
    fn test_sanitize_strips_controls() {
        assert_eq!(sanitize("  Hello,\n\tworld\u{7}!  "), "Hello, world !");
    }

    #[test]
    fn test_drawtext_escapes_text() {
        let chunks = chunk_subtitles("It's 5:00, [really]", 2.0, 4);
        let filters = drawtext_filters(&chunks, AspectRatio::Wide, None, &SubtitleConfig::default());
        let vf = filtergraph::simple(filters).unwrap();
        assert!(vf.contains("text=It\\\\\\'s 5\\\\:00\\, \\[really\\]"));
        assert!(vf.contains("y=h-120"));
        assert!(vf.contains("enable=gte(t\\,0.000)"));
    }

    #[test]
    fn test_windows_use_half_open_enable() {
        let chunks = chunk_subtitles("a b c d", 2.0, 2);
        let filters = drawtext_filters(&chunks, AspectRatio::Tall, None, &SubtitleConfig::default());
        let vf = filtergraph::simple(filters).unwrap();
        assert!(vf.contains("enable=gte(t\\,0.000)*lt(t\\,1.000)"));
        assert!(vf.contains("fontsize=90"));
    }
}
