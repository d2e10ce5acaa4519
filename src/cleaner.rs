//! Watermark cleaner for acquired images
//!
//! Detection looks for bright or flat-gray pixels that sit on strong edges,
//! only inside the corner boxes and the bottom strip where overlays live.
//! Stroke fragments are merged with a morphological closing, blobs are kept
//! when they look like a line of text (wide and short), and the result is
//! inpainted by onion-peel diffusion from the mask boundary.

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use std::path::Path;

use crate::config::WatermarkConfig;
use crate::types::MediaAsset;

/// Share of width/height covered by each corner box
const CORNER_W: f64 = 0.25;
const CORNER_H: f64 = 0.15;
/// Height share of the bottom strip
const BOTTOM_STRIP_H: f64 = 0.12;
/// Blobs taller than this share of the image are not text
const MAX_BLOB_HEIGHT: f64 = 0.25;
/// Extra ring inpainted around accepted blobs to cover anti-aliasing
const HALO_RADIUS: u32 = 2;

pub struct WatermarkCleaner {
    config: WatermarkConfig,
}

/// Result of mask detection on one image
#[derive(Debug)]
pub struct Detection {
    pub mask: Vec<bool>,
    pub pixels: usize,
    pub fraction: f64,
}

impl WatermarkCleaner {
    pub fn new(config: &WatermarkConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Clean the asset in place. Returns true if pixels were changed.
    /// Already-cleaned assets are left alone.
    pub async fn clean(&self, asset: &mut MediaAsset) -> bool {
        if asset.cleaned {
            return false;
        }

        let path = asset.local_path.clone();
        let config = self.config.clone();
        let outcome = tokio::task::spawn_blocking(move || clean_file(&path, &config)).await;

        asset.cleaned = true;
        match outcome {
            Ok(Ok(edited)) => {
                if edited {
                    log::info!("Scene {}: watermark removed", asset.scene_index);
                }
                edited
            }
            Ok(Err(e)) => {
                log::warn!("Scene {}: watermark cleaning skipped: {:#}", asset.scene_index, e);
                false
            }
            Err(e) => {
                log::warn!("Scene {}: watermark task failed: {}", asset.scene_index, e);
                false
            }
        }
    }
}

/// Detect and repair a watermark in the image file at `path`
pub fn clean_file(path: &Path, config: &WatermarkConfig) -> Result<bool> {
    let reader = image::io::Reader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .with_guessed_format()?;
    let format = reader.format();
    let mut img = reader
        .decode()
        .with_context(|| format!("Failed to decode {}", path.display()))?
        .to_rgb8();

    let detection = detect(&img, config);
    if detection.pixels == 0 {
        return Ok(false);
    }
    if detection.fraction > config.max_mask_fraction {
        log::debug!(
            "Watermark mask covers {:.1}% of {}, treating as subject matter",
            detection.fraction * 100.0,
            path.display()
        );
        return Ok(false);
    }

    let (w, h) = img.dimensions();
    let repair = dilate(&detection.mask, w, h, HALO_RADIUS);
    inpaint(&mut img, &repair);

    let format = match format {
        Some(f @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Bmp)) => f,
        _ => ImageFormat::Png,
    };
    img.save_with_format(path, format)
        .with_context(|| format!("Failed to write cleaned image {}", path.display()))?;
    Ok(true)
}

fn luma(p: &Rgb<u8>) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

fn in_overlay_region(x: u32, y: u32, w: u32, h: u32) -> bool {
    let (xf, yf) = (x as f64, y as f64);
    let (wf, hf) = (w as f64, h as f64);
    let left = xf < wf * CORNER_W;
    let right = xf >= wf * (1.0 - CORNER_W);
    let top = yf < hf * CORNER_H;
    let bottom = yf >= hf * (1.0 - CORNER_H);
    let strip = yf >= hf * (1.0 - BOTTOM_STRIP_H);
    strip || ((left || right) && (top || bottom))
}

/// Build the accepted watermark mask for an image
pub fn detect(img: &RgbImage, config: &WatermarkConfig) -> Detection {
    let (w, h) = img.dimensions();
    let total = (w as usize) * (h as usize);
    if total == 0 {
        return Detection {
            mask: Vec::new(),
            pixels: 0,
            fraction: 0.0,
        };
    }

    let lum: Vec<f32> = img.pixels().map(luma).collect();
    let edges = dilate(&sobel_edges(&lum, w, h, config.edge_threshold), w, h, 1);

    let bright = config.bright_threshold as f32;
    let mut candidates = vec![false; total];
    for (x, y, p) in img.enumerate_pixels() {
        let i = (y * w + x) as usize;
        if !edges[i] || !in_overlay_region(x, y, w, h) {
            continue;
        }
        let max = p.0.iter().copied().max().unwrap_or(0);
        let min = p.0.iter().copied().min().unwrap_or(0);
        let flat_gray = max - min <= config.gray_spread && lum[i] >= 110.0;
        candidates[i] = lum[i] >= bright || flat_gray;
    }

    let r = config.closing_radius;
    let closed = erode(&dilate(&candidates, w, h, r), w, h, r);

    let min_area = ((total as f64) * 0.0002).max(12.0) as usize;
    let max_height = (h as f64 * MAX_BLOB_HEIGHT).ceil() as u32;

    let mut mask = vec![false; total];
    let mut pixels = 0usize;
    for blob in components(&closed, w, h) {
        let bw = blob.max_x - blob.min_x + 1;
        let bh = blob.max_y - blob.min_y + 1;
        let aspect = bw as f64 / bh as f64;
        if blob.pixels.len() < min_area || bh > max_height || aspect < config.min_aspect_ratio {
            continue;
        }
        for &i in &blob.pixels {
            mask[i] = true;
        }
        pixels += blob.pixels.len();
    }

    Detection {
        mask,
        pixels,
        fraction: pixels as f64 / total as f64,
    }
}

fn sobel_edges(lum: &[f32], w: u32, h: u32, threshold: f32) -> Vec<bool> {
    let (w, h) = (w as i64, h as i64);
    let at = |x: i64, y: i64| -> f32 {
        let x = x.clamp(0, w - 1);
        let y = y.clamp(0, h - 1);
        lum[(y * w + x) as usize]
    };

    let mut out = vec![false; lum.len()];
    for y in 0..h {
        for x in 0..w {
            let gx = at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1)
                - at(x - 1, y - 1)
                - 2.0 * at(x - 1, y)
                - at(x - 1, y + 1);
            let gy = at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1)
                - at(x - 1, y - 1)
                - 2.0 * at(x, y - 1)
                - at(x + 1, y - 1);
            out[(y * w + x) as usize] = (gx * gx + gy * gy).sqrt() >= threshold;
        }
    }
    out
}

/// Square-kernel binary morphology, separable (rows then columns).
/// `grow=true` dilates, `grow=false` erodes; out-of-bounds pixels are ignored.
fn morph(mask: &[bool], w: u32, h: u32, radius: u32, grow: bool) -> Vec<bool> {
    if radius == 0 {
        return mask.to_vec();
    }
    let (w, h, r) = (w as i64, h as i64, radius as i64);
    let pass = |src: &[bool], horizontal: bool| -> Vec<bool> {
        let mut dst = vec![false; src.len()];
        for y in 0..h {
            for x in 0..w {
                let mut acc = !grow;
                for d in -r..=r {
                    let (nx, ny) = if horizontal { (x + d, y) } else { (x, y + d) };
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    let v = src[(ny * w + nx) as usize];
                    if grow && v {
                        acc = true;
                        break;
                    }
                    if !grow && !v {
                        acc = false;
                        break;
                    }
                }
                dst[(y * w + x) as usize] = acc;
            }
        }
        dst
    };
    let rows = pass(mask, true);
    pass(&rows, false)
}

fn dilate(mask: &[bool], w: u32, h: u32, radius: u32) -> Vec<bool> {
    morph(mask, w, h, radius, true)
}

fn erode(mask: &[bool], w: u32, h: u32, radius: u32) -> Vec<bool> {
    morph(mask, w, h, radius, false)
}

struct Blob {
    pixels: Vec<usize>,
    min_x: u32,
    max_x: u32,
    min_y: u32,
    max_y: u32,
}

/// 4-connected components of a mask
fn components(mask: &[bool], w: u32, h: u32) -> Vec<Blob> {
    let mut seen = vec![false; mask.len()];
    let mut blobs = Vec::new();
    let mut stack = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] || seen[start] {
            continue;
        }
        seen[start] = true;
        stack.push(start);
        let mut blob = Blob {
            pixels: Vec::new(),
            min_x: u32::MAX,
            max_x: 0,
            min_y: u32::MAX,
            max_y: 0,
        };

        while let Some(i) = stack.pop() {
            let x = (i as u32) % w;
            let y = (i as u32) / w;
            blob.pixels.push(i);
            blob.min_x = blob.min_x.min(x);
            blob.max_x = blob.max_x.max(x);
            blob.min_y = blob.min_y.min(y);
            blob.max_y = blob.max_y.max(y);

            let mut visit = |nx: u32, ny: u32| {
                let j = (ny * w + nx) as usize;
                if mask[j] && !seen[j] {
                    seen[j] = true;
                    stack.push(j);
                }
            };
            if x > 0 {
                visit(x - 1, y);
            }
            if x + 1 < w {
                visit(x + 1, y);
            }
            if y > 0 {
                visit(x, y - 1);
            }
            if y + 1 < h {
                visit(x, y + 1);
            }
        }
        blobs.push(blob);
    }
    blobs
}

/// Fill masked pixels from the outside in, averaging known 8-neighbors
fn inpaint(img: &mut RgbImage, mask: &[bool]) {
    let (w, h) = img.dimensions();
    let (wi, hi) = (w as i64, h as i64);
    let mut unknown = mask.to_vec();

    loop {
        let mut filled: Vec<(u32, u32, Rgb<u8>)> = Vec::new();
        for y in 0..hi {
            for x in 0..wi {
                if !unknown[(y * wi + x) as usize] {
                    continue;
                }
                let mut sum = [0u32; 3];
                let mut n = 0u32;
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let (nx, ny) = (x + dx, y + dy);
                        if (dx == 0 && dy == 0) || nx < 0 || ny < 0 || nx >= wi || ny >= hi {
                            continue;
                        }
                        if unknown[(ny * wi + nx) as usize] {
                            continue;
                        }
                        let p = img.get_pixel(nx as u32, ny as u32);
                        for c in 0..3 {
                            sum[c] += p[c] as u32;
                        }
                        n += 1;
                    }
                }
                if n > 0 {
                    let px = Rgb([
                        (sum[0] / n) as u8,
                        (sum[1] / n) as u8,
                        (sum[2] / n) as u8,
                    ]);
                    filled.push((x as u32, y as u32, px));
                }
            }
        }

        if filled.is_empty() {
            break;
        }
        for (x, y, px) in filled {
            img.put_pixel(x, y, px);
            unknown[(y * w + x) as usize] = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetSource, MediaKind};

    const BG: Rgb<u8> = Rgb([40, 60, 80]);

    /// 200x120 dark frame with a white striped "text" bar in the bottom right
    fn watermarked() -> RgbImage {
        let mut img = RgbImage::from_pixel(200, 120, BG);
        for y in 106..114 {
            for x in 150..190 {
                if x % 3 != 0 {
                    img.put_pixel(x, y, Rgb([255, 255, 255]));
                }
            }
        }
        img
    }

    fn asset_at(path: &Path) -> MediaAsset {
        MediaAsset {
            scene_index: 0,
            kind: MediaKind::Image,
            local_path: path.to_path_buf(),
            source: AssetSource::WebSearch,
            cleaned: false,
        }
    }

    #[test]
    fn test_detects_text_bar() {
        let detection = detect(&watermarked(), &WatermarkConfig::default());
        assert!(detection.pixels > 0);
        assert!(detection.fraction < 0.07);
        // the bar is masked, the frame center is not
        assert!(detection.mask[(110 * 200 + 160) as usize]);
        assert!(!detection.mask[(60 * 200 + 100) as usize]);
    }

    #[test]
    fn test_clean_repairs_bar() {
        let path = std::env::temp_dir().join("storycast_wm_bar.png");
        watermarked().save(&path).unwrap();

        assert!(clean_file(&path, &WatermarkConfig::default()).unwrap());

        let img = image::open(&path).unwrap().to_rgb8();
        let p = img.get_pixel(160, 110);
        assert!(luma(p) < 100.0, "bar pixel still bright: {:?}", p);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_large_mask_aborts_without_edit() {
        let mut img = RgbImage::from_pixel(200, 120, BG);
        for y in 90..120 {
            for x in 0..200 {
                if (x / 2 + y / 2) % 2 == 0 {
                    img.put_pixel(x, y, Rgb([255, 255, 255]));
                }
            }
        }
        let config = WatermarkConfig::default();
        assert!(detect(&img, &config).fraction > config.max_mask_fraction);

        let path = std::env::temp_dir().join("storycast_wm_large.png");
        img.save(&path).unwrap();
        let before = std::fs::read(&path).unwrap();
        assert!(!clean_file(&path, &config).unwrap());
        assert_eq!(before, std::fs::read(&path).unwrap());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_clean_image_is_untouched() {
        let path = std::env::temp_dir().join("storycast_wm_clean.png");
        RgbImage::from_pixel(120, 80, BG).save(&path).unwrap();
        assert!(!clean_file(&path, &WatermarkConfig::default()).unwrap());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_repeated_clean_is_noop() {
        let path = std::env::temp_dir().join("storycast_wm_twice.png");
        watermarked().save(&path).unwrap();
        let cleaner = WatermarkCleaner::new(&WatermarkConfig::default());
        let mut asset = asset_at(&path);

        assert!(cleaner.clean(&mut asset).await);
        assert!(asset.cleaned);
        let after_first = std::fs::read(&path).unwrap();
        assert!(!cleaner.clean(&mut asset).await);
        assert_eq!(after_first, std::fs::read(&path).unwrap());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_unreadable_asset_degrades() {
        let path = std::env::temp_dir().join("storycast_wm_garbage.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        let cleaner = WatermarkCleaner::new(&WatermarkConfig::default());
        let mut asset = asset_at(&path);
        assert!(!cleaner.clean(&mut asset).await);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_closing_bridges_gaps() {
        // two fragments separated by a 2px gap merge after closing
        let (w, h) = (20u32, 5u32);
        let mut mask = vec![false; (w * h) as usize];
        for x in (2..6).chain(8..12) {
            mask[(2 * w + x) as usize] = true;
        }
        let closed = erode(&dilate(&mask, w, h, 2), w, h, 2);
        assert_eq!(components(&closed, w, h).len(), 1);
        assert!(closed[(2 * w + 7) as usize]);
    }
}
