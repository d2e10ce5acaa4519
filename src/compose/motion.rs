//! Camera motion over a still image, as zoompan expressions
//!
//! Every expression is written against the output frame number `on`, so a
//! pattern with a given frame count always renders the same trajectory.

use crate::config::MotionConfig;
use crate::filtergraph::Filter;
use crate::types::MotionPattern;

/// zoompan expressions for one clip
#[derive(Debug, Clone, PartialEq)]
pub struct MotionPath {
    pub zoom: String,
    pub x: String,
    pub y: String,
}

const CENTER_X: &str = "(iw-iw/zoom)/2";
const CENTER_Y: &str = "(ih-ih/zoom)/2";

pub fn motion_path(pattern: MotionPattern, frames: u32, config: &MotionConfig) -> MotionPath {
    let step = config.zoom_step;
    let cap = config.zoom_cap.max(1.0);
    let zoom_in = format!("min(1+{}*on,{})", step, cap);
    let zoom_out = format!("max({}-{}*on,1)", cap, step);
    // progress 0..1 across the clip
    let last = frames.saturating_sub(1).max(1);
    let progress = format!("on/{}", last);

    match pattern {
        MotionPattern::ZoomInCenter => MotionPath {
            zoom: zoom_in,
            x: CENTER_X.to_string(),
            y: CENTER_Y.to_string(),
        },
        MotionPattern::ZoomOutCenter => MotionPath {
            zoom: zoom_out,
            x: CENTER_X.to_string(),
            y: CENTER_Y.to_string(),
        },
        MotionPattern::PanLeftRight => MotionPath {
            zoom: config.pan_zoom.max(1.0).to_string(),
            x: format!("(iw-iw/zoom)*{}", progress),
            y: CENTER_Y.to_string(),
        },
        MotionPattern::PanRightLeft => MotionPath {
            zoom: config.pan_zoom.max(1.0).to_string(),
            x: format!("(iw-iw/zoom)*(1-{})", progress),
            y: CENTER_Y.to_string(),
        },
        MotionPattern::ZoomUpperThird => MotionPath {
            zoom: zoom_in,
            x: CENTER_X.to_string(),
            y: "(ih-ih/zoom)/3".to_string(),
        },
        MotionPattern::ZoomLowerThird => MotionPath {
            zoom: zoom_in,
            x: CENTER_X.to_string(),
            y: "(ih-ih/zoom)*2/3".to_string(),
        },
    }
}

/// The zoompan stage producing exactly `frames` frames at `width`x`height`
pub fn zoompan(
    pattern: MotionPattern,
    frames: u32,
    width: u32,
    height: u32,
    config: &MotionConfig,
) -> Filter {
    let path = motion_path(pattern, frames, config);
    Filter::new("zoompan")
        .arg("z", path.zoom)
        .arg("x", path.x)
        .arg("y", path.y)
        .arg("d", frames.max(1))
        .arg("s", format!("{}x{}", width, height))
        .arg("fps", config.fps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filtergraph;

    #[test]
    fn test_each_pattern_is_distinct() {
        let config = MotionConfig::default();
        let paths: Vec<_> = MotionPattern::ALL
            .iter()
            .map(|p| motion_path(*p, 150, &config))
            .collect();
        for (i, a) in paths.iter().enumerate() {
            for b in &paths[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_zoom_uses_configured_constants() {
        let config = MotionConfig {
            zoom_step: 0.002,
            zoom_cap: 1.5,
            ..MotionConfig::default()
        };
        let path = motion_path(MotionPattern::ZoomInCenter, 90, &config);
        assert_eq!(path.zoom, "min(1+0.002*on,1.5)");
        let out = motion_path(MotionPattern::ZoomOutCenter, 90, &config);
        assert_eq!(out.zoom, "max(1.5-0.002*on,1)");
    }

    #[test]
    fn test_pan_spans_clip_length() {
        let path = motion_path(MotionPattern::PanLeftRight, 151, &MotionConfig::default());
        assert_eq!(path.x, "(iw-iw/zoom)*on/150");
        assert_eq!(path.zoom, "1.2");
        // a single-frame clip must not divide by zero
        let one = motion_path(MotionPattern::PanRightLeft, 1, &MotionConfig::default());
        assert_eq!(one.x, "(iw-iw/zoom)*(1-on/1)");
    }

    #[test]
    fn test_zoompan_filter_renders() {
        let f = zoompan(MotionPattern::ZoomInCenter, 60, 1080, 1920, &MotionConfig::default());
        let rendered = filtergraph::simple(vec![f]).unwrap();
        assert!(rendered.starts_with("zoompan=z=min(1+0.001*on\\,1.3):"));
        assert!(rendered.contains(":d=60:s=1080x1920:fps=30"));
    }
}
