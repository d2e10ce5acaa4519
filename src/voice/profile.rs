//! Voice profiles per narration style and text shaping for speech

use crate::config::VoiceConfig;
use crate::types::NarrationStyle;

/// Neural voice and its base prosody
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceProfile {
    pub voice: &'static str,
    /// Percent offset from the engine's default rate
    pub rate: i32,
    /// Hz offset from the voice's default pitch
    pub pitch: i32,
}

impl VoiceProfile {
    pub fn for_style(style: NarrationStyle) -> Self {
        match style {
            NarrationStyle::Story => Self {
                voice: "en-US-AndrewNeural",
                rate: -3,
                pitch: 0,
            },
            NarrationStyle::ScienceShort => Self {
                voice: "en-US-SteffanNeural",
                rate: 2,
                pitch: -1,
            },
            NarrationStyle::HollywoodHype => Self {
                voice: "en-US-AvaNeural",
                rate: 8,
                pitch: 1,
            },
            NarrationStyle::TradeWave => Self {
                voice: "en-GB-RyanNeural",
                rate: 0,
                pitch: -1,
            },
        }
    }

    /// Base prosody perturbed by the scene's slot in the modulation table,
    /// so consecutive scenes do not sound identical
    pub fn modulated(&self, scene_index: usize, config: &VoiceConfig) -> Prosody {
        let pick = |table: &[i32]| {
            if table.is_empty() {
                0
            } else {
                table[scene_index % table.len()]
            }
        };
        Prosody {
            rate: self.rate + pick(&config.rate_modulation),
            pitch: self.pitch + pick(&config.pitch_modulation),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prosody {
    pub rate: i32,
    pub pitch: i32,
}

impl Prosody {
    /// e.g. `--rate=-3%`
    pub fn rate_arg(&self) -> String {
        format!("--rate={:+}%", self.rate)
    }

    /// e.g. `--pitch=+0Hz`
    pub fn pitch_arg(&self) -> String {
        format!("--pitch={:+}Hz", self.pitch)
    }
}

/// Lengthen pauses at sentence and clause breaks
pub fn naturalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(". ", "... ")
        .replace(", ", ", ... ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_profiles() {
        let story = VoiceProfile::for_style(NarrationStyle::Story);
        assert_eq!(story.voice, "en-US-AndrewNeural");
        let base = Prosody {
            rate: story.rate,
            pitch: story.pitch,
        };
        assert_eq!(base.rate_arg(), "--rate=-3%");
        assert_eq!(base.pitch_arg(), "--pitch=+0Hz");

        let hype = VoiceProfile::for_style(NarrationStyle::HollywoodHype);
        assert_eq!((hype.rate, hype.pitch), (8, 1));
    }

    #[test]
    fn test_modulation_cycles_by_scene() {
        let config = VoiceConfig::default();
        let profile = VoiceProfile::for_style(NarrationStyle::TradeWave);
        let p0 = profile.modulated(0, &config);
        let p1 = profile.modulated(1, &config);
        let p2 = profile.modulated(2, &config);
        let p3 = profile.modulated(3, &config);
        assert_eq!((p0.rate, p0.pitch), (0, -1));
        assert_eq!((p1.rate, p1.pitch), (2, 0));
        assert_eq!((p2.rate, p2.pitch), (-2, -2));
        assert_eq!(p3, p0);
    }

    #[test]
    fn test_empty_modulation_table() {
        let config = VoiceConfig {
            rate_modulation: Vec::new(),
            pitch_modulation: Vec::new(),
            ..VoiceConfig::default()
        };
        let profile = VoiceProfile::for_style(NarrationStyle::Story);
        let p = profile.modulated(7, &config);
        assert_eq!((p.rate, p.pitch), (profile.rate, profile.pitch));
    }

    #[test]
    fn test_naturalize_pauses() {
        assert_eq!(
            naturalize("It was late.  The wind, cold and sharp, rose."),
            "It was late... The wind, ... cold and sharp, ... rose."
        );
    }
}
