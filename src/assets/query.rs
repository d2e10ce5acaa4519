//! Query shaping and payload checks for image sources

use regex::Regex;
use reqwest::Url;

/// Words that carry no search signal, including prompt-engineering fluff
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "with", "of", "by",
    "from", "is", "it", "its", "are", "was", "were", "be", "this", "that", "these", "those",
    "as", "into", "over", "about", "did", "you", "know", "very", "their", "his", "her",
    "8k", "4k", "hd", "uhd", "hyper", "realistic", "hyperrealistic", "photorealistic",
    "cinematic", "lighting", "highly", "detailed", "vibrant", "colors", "composition",
    "visualization", "resolution", "rendering", "render", "unreal", "engine", "octane",
    "masterpiece", "trending", "artstation", "illustrating", "illustration", "style",
];

/// Lowercase, strip punctuation, drop stop words, keep the first `max_words`
pub fn simplify_query(query: &str, max_words: usize) -> String {
    // only the subject after "illustrating:" matters in generated prompts
    let subject = match query.split_once("illustrating:") {
        Some((_, rest)) => rest.split('.').next().unwrap_or(rest),
        None => query,
    };

    let lowered = subject.to_lowercase();
    let cleaned = match Regex::new(r"[^\w\s]") {
        Ok(re) => re.replace_all(&lowered, " ").into_owned(),
        Err(_) => lowered,
    };

    cleaned
        .split_whitespace()
        .filter(|w| !STOP_WORDS.contains(w))
        .filter(|w| w.chars().count() > 1)
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Image container recognized from leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageContainer {
    Jpeg,
    Png,
    Gif,
    WebP,
    Bmp,
}

impl ImageContainer {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageContainer::Jpeg => "jpg",
            ImageContainer::Png => "png",
            ImageContainer::Gif => "gif",
            ImageContainer::WebP => "webp",
            ImageContainer::Bmp => "bmp",
        }
    }
}

/// Recognize an image payload by its signature
pub fn detect_container(bytes: &[u8]) -> Option<ImageContainer> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageContainer::Jpeg)
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some(ImageContainer::Png)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(ImageContainer::Gif)
    } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        Some(ImageContainer::WebP)
    } else if bytes.starts_with(b"BM") && bytes.len() > 14 {
        Some(ImageContainer::Bmp)
    } else {
        None
    }
}

/// True when the URL's host is, or is a subdomain of, a denylisted domain
pub fn is_forbidden(url: &Url, denylist: &[String]) -> bool {
    let host = match url.host_str() {
        Some(h) => h.to_ascii_lowercase(),
        None => return true,
    };
    denylist.iter().any(|domain| {
        let domain = domain.trim().to_ascii_lowercase();
        !domain.is_empty() && (host == domain || host.ends_with(&format!(".{}", domain)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simplify_drops_fluff_and_truncates() {
        let q = simplify_query(
            "A hyper-realistic, cinematic shot of the ancient pyramids at sunset in Egypt, 8k",
            5,
        );
        assert_eq!(q, "shot ancient pyramids sunset egypt");
    }

    #[test]
    fn test_simplify_uses_illustrated_subject() {
        let q = simplify_query(
            "Digital art illustrating: a red fox in snow. Trending on artstation",
            5,
        );
        assert_eq!(q, "red fox snow");
    }

    #[test]
    fn test_simplify_can_be_empty() {
        assert_eq!(simplify_query("the a an 8k", 5), "");
    }

    #[test]
    fn test_detect_container() {
        assert_eq!(
            detect_container(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]),
            Some(ImageContainer::Jpeg)
        );
        assert_eq!(
            detect_container(b"\x89PNG\r\n\x1a\n....."),
            Some(ImageContainer::Png)
        );
        assert_eq!(
            detect_container(b"RIFF\x00\x00\x00\x00WEBPVP8 "),
            Some(ImageContainer::WebP)
        );
        assert_eq!(detect_container(b"<!DOCTYPE html><html>"), None);
        assert_eq!(detect_container(b""), None);
    }

    #[test]
    fn test_forbidden_domains() {
        let deny = vec!["shutterstock.com".to_string()];
        let bad = Url::parse("https://image.shutterstock.com/x.jpg").unwrap();
        let bad_root = Url::parse("https://shutterstock.com/x.jpg").unwrap();
        let good = Url::parse("https://images.pexels.com/x.jpg").unwrap();
        let tricky = Url::parse("https://notshutterstock.com/x.jpg").unwrap();
        assert!(is_forbidden(&bad, &deny));
        assert!(is_forbidden(&bad_root, &deny));
        assert!(!is_forbidden(&good, &deny));
        assert!(!is_forbidden(&tricky, &deny));
    }
}
