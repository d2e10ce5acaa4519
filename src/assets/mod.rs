//! Asset resolution: one visual per scene through a finite fallback chain
//!
//! Tiers are tried in order until one yields an asset:
//! full visual intent, simplified query, broad query (each through the whole
//! source chain), a copy of the last genuine asset of this run, and finally a
//! locally rendered solid-color frame.

pub mod query;
pub mod sources;

use anyhow::{Context, Result};
use reqwest::Client;
use std::path::{Path, PathBuf};

use crate::config::SourcesConfig;
use crate::scratch::ScratchFile;
use crate::types::{AspectRatio, AssetSource, MediaAsset, MediaKind, Scene};
use crate::video;
use sources::SourceClient;

/// Color of the last-resort frame
const PLACEHOLDER_RGB: [u8; 3] = [0, 0, 0];

/// The last genuine asset of the run; written only by the orchestrator
#[derive(Debug)]
pub struct ReuseSlot {
    work_dir: PathBuf,
    cached: Option<ScratchFile>,
}

impl ReuseSlot {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            cached: None,
        }
    }

    /// Keep a private copy of a genuine asset so later scenes can reuse it
    /// after the original scratch file is gone
    pub fn record(&mut self, asset: &MediaAsset) -> Result<()> {
        if !asset.source.is_genuine() {
            return Ok(());
        }
        let ext = asset
            .local_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("img");
        let target = self.work_dir.join(format!("reuse_cache.{}", ext));
        // drop the previous copy first, it may share the target name
        self.cached = None;
        std::fs::copy(&asset.local_path, &target).with_context(|| {
            format!("Failed to cache asset {}", asset.local_path.display())
        })?;
        self.cached = Some(ScratchFile::new(target));
        Ok(())
    }

    pub fn last(&self) -> Option<&Path> {
        self.cached.as_ref().map(|f| f.path())
    }
}

/// One step of the fallback chain
#[derive(Debug, Clone, PartialEq)]
enum Tier {
    Query { label: &'static str, text: String },
    ReusePrevious,
    SolidColor,
}

pub struct AssetResolver {
    client: Client,
    sources: Vec<SourceClient>,
    config: SourcesConfig,
    aspect: AspectRatio,
    work_dir: PathBuf,
}

impl AssetResolver {
    pub fn new(config: &SourcesConfig, aspect: AspectRatio, work_dir: &Path) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout())
            .redirect(sources::redirect_policy(&config.forbidden_domains))
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36")
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            sources: SourceClient::default_chain(config),
            config: config.clone(),
            aspect,
            work_dir: work_dir.to_path_buf(),
        })
    }

    fn tiers(&self, scene: &Scene) -> Vec<Tier> {
        let full = scene.visual_intent.trim().to_string();
        let simplified = query::simplify_query(
            if full.is_empty() { &scene.narration } else { &full },
            self.config.simplified_word_count,
        );
        let broad = self.config.broad_fallback_query.trim().to_string();

        let mut tiers: Vec<Tier> = Vec::new();
        for (label, text) in [("full", full), ("simplified", simplified), ("broad", broad)] {
            let duplicate = tiers
                .iter()
                .any(|t| matches!(t, Tier::Query { text: seen, .. } if *seen == text));
            if !text.is_empty() && !duplicate {
                tiers.push(Tier::Query { label, text });
            }
        }
        tiers.push(Tier::ReusePrevious);
        tiers.push(Tier::SolidColor);
        tiers
    }

    /// Always returns an asset; the worst case is a solid-color frame
    pub async fn resolve(&self, scene: &Scene, reuse: &ReuseSlot) -> MediaAsset {
        for tier in self.tiers(scene) {
            match self.attempt(&tier, scene, reuse).await {
                Ok(Some(asset)) => {
                    log::info!(
                        "Scene {}: asset resolved via {:?} ({:?})",
                        scene.index,
                        tier,
                        asset.source
                    );
                    return asset;
                }
                Ok(None) => {}
                Err(e) => log::warn!("Scene {}: tier {:?} failed: {:#}", scene.index, tier, e),
            }
        }

        // only reached if even the placeholder could not be written
        log::error!(
            "Scene {}: no asset could be written, downstream will degrade",
            scene.index
        );
        self.asset(scene.index, self.placeholder_path(scene.index), AssetSource::SolidColor)
    }

    async fn attempt(
        &self,
        tier: &Tier,
        scene: &Scene,
        reuse: &ReuseSlot,
    ) -> Result<Option<MediaAsset>> {
        match tier {
            Tier::Query { label, text } => {
                for source in &self.sources {
                    // the stock API gets the dedicated stock query on the first pass
                    let query = match (source, *label, &scene.stock_query) {
                        (SourceClient::Stock(_), "full", Some(q)) if !q.trim().is_empty() => {
                            q.as_str()
                        }
                        _ => text.as_str(),
                    };
                    log::debug!(
                        "Scene {}: trying {} source ({} query '{}')",
                        scene.index,
                        source.name(),
                        label,
                        query
                    );
                    match source
                        .fetch(&self.client, query, self.aspect, &self.config)
                        .await
                    {
                        Ok(payload) => {
                            let path = self.work_dir.join(format!(
                                "scene_{}_img.{}",
                                scene.index,
                                payload.container.extension()
                            ));
                            tokio::fs::write(&path, &payload.bytes)
                                .await
                                .with_context(|| format!("Failed to write {}", path.display()))?;
                            return Ok(Some(self.asset(scene.index, path, source.asset_source())));
                        }
                        Err(e) => log::debug!(
                            "Scene {}: {} source failed: {:#}",
                            scene.index,
                            source.name(),
                            e
                        ),
                    }
                }
                Ok(None)
            }
            Tier::ReusePrevious => {
                let Some(previous) = reuse.last() else {
                    return Ok(None);
                };
                let ext = previous
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("img");
                let path = self
                    .work_dir
                    .join(format!("scene_{}_img.{}", scene.index, ext));
                tokio::fs::copy(previous, &path)
                    .await
                    .with_context(|| format!("Failed to copy {}", previous.display()))?;
                let mut asset = self.asset(scene.index, path, AssetSource::Reused);
                // the cached copy was recorded after cleaning
                asset.cleaned = true;
                Ok(Some(asset))
            }
            Tier::SolidColor => {
                let path = self.placeholder_path(scene.index);
                let (w, h) = self.aspect.dimensions();
                let target = path.clone();
                tokio::task::spawn_blocking(move || {
                    video::render_solid_color(&target, w, h, PLACEHOLDER_RGB)
                })
                .await
                .context("placeholder task panicked")??;
                Ok(Some(self.asset(scene.index, path, AssetSource::SolidColor)))
            }
        }
    }

    fn placeholder_path(&self, scene_index: usize) -> PathBuf {
        self.work_dir
            .join(format!("scene_{}_placeholder.png", scene_index))
    }

    fn asset(&self, scene_index: usize, local_path: PathBuf, source: AssetSource) -> MediaAsset {
        MediaAsset {
            scene_index,
            kind: MediaKind::Image,
            local_path,
            source,
            cleaned: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> SourcesConfig {
        SourcesConfig {
            pexels_api_key: None,
            openai_api_key: None,
            web_search_url: "http://127.0.0.1:9".to_string(),
            pollinations_url: "http://127.0.0.1:9/prompt".to_string(),
            request_timeout_secs: 2,
            ..SourcesConfig::default()
        }
    }

    fn work_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn scene(index: usize) -> Scene {
        Scene {
            index,
            narration: "Foxes hunt at dawn.".to_string(),
            visual_intent: "A cinematic red fox hunting in the snow at dawn".to_string(),
            stock_query: Some("red fox snow".to_string()),
        }
    }

    #[test]
    fn test_tiers_are_finite_and_ordered() {
        let dir = work_dir("storycast_tiers");
        let resolver = AssetResolver::new(&offline_config(), AspectRatio::Wide, &dir).unwrap();
        let tiers = resolver.tiers(&scene(0));
        assert_eq!(tiers.len(), 5);
        assert!(matches!(&tiers[0], Tier::Query { label: "full", .. }));
        assert_eq!(
            tiers[1],
            Tier::Query {
                label: "simplified",
                text: "red fox hunting snow dawn".to_string()
            }
        );
        assert!(matches!(&tiers[2], Tier::Query { label: "broad", .. }));
        assert_eq!(tiers[3], Tier::ReusePrevious);
        assert_eq!(tiers[4], Tier::SolidColor);
    }

    #[test]
    fn test_duplicate_queries_collapse() {
        let dir = work_dir("storycast_tiers_dup");
        let resolver = AssetResolver::new(&offline_config(), AspectRatio::Wide, &dir).unwrap();
        let s = Scene {
            index: 0,
            narration: String::new(),
            visual_intent: "cinematic background".to_string(),
            stock_query: None,
        };
        // full == broad, simplified is "background"
        let queries: Vec<_> = resolver
            .tiers(&s)
            .into_iter()
            .filter(|t| matches!(t, Tier::Query { .. }))
            .collect();
        assert_eq!(queries.len(), 2);
    }

    #[tokio::test]
    async fn test_all_sources_failing_yields_solid_color() {
        let dir = work_dir("storycast_resolve_solid");
        let resolver = AssetResolver::new(&offline_config(), AspectRatio::Wide, &dir).unwrap();
        let reuse = ReuseSlot::new(&dir);

        let asset = resolver.resolve(&scene(0), &reuse).await;
        assert_eq!(asset.source, AssetSource::SolidColor);
        assert!(asset.local_path.exists());
        let img = image::open(&asset.local_path).unwrap();
        assert_eq!((img.width(), img.height()), (1920, 1080));
        let _ = std::fs::remove_file(&asset.local_path);
    }

    #[tokio::test]
    async fn test_failing_sources_reuse_previous_genuine_asset() {
        let dir = work_dir("storycast_resolve_reuse");
        let resolver = AssetResolver::new(&offline_config(), AspectRatio::Tall, &dir).unwrap();
        let mut reuse = ReuseSlot::new(&dir);

        let earlier = dir.join("scene_0_img.png");
        video::render_solid_color(&earlier, 8, 8, [200, 10, 10]).unwrap();
        reuse
            .record(&MediaAsset {
                scene_index: 0,
                kind: MediaKind::Image,
                local_path: earlier.clone(),
                source: AssetSource::WebSearch,
                cleaned: true,
            })
            .unwrap();
        std::fs::remove_file(&earlier).unwrap();

        let asset = resolver.resolve(&scene(1), &reuse).await;
        assert_eq!(asset.source, AssetSource::Reused);
        assert_ne!(Some(asset.local_path.as_path()), reuse.last());
        assert!(asset.local_path.exists());
        let _ = std::fs::remove_file(&asset.local_path);
    }

    #[test]
    fn test_placeholders_are_not_recorded_for_reuse() {
        let dir = work_dir("storycast_reuse_skip");
        let mut reuse = ReuseSlot::new(&dir);
        reuse
            .record(&MediaAsset {
                scene_index: 0,
                kind: MediaKind::Image,
                local_path: dir.join("missing.png"),
                source: AssetSource::SolidColor,
                cleaned: false,
            })
            .unwrap();
        assert!(reuse.last().is_none());
    }
}
