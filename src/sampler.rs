//! Frame Sampler (spec §4.1): a perceptual change detector over a cached
//! 16x16 grayscale thumbnail, used to decide whether a freshly captured
//! screenshot is worth running through the rest of the Perception Loop.
//!
//! Grounded in the teacher's `crates/perceiver-visual/src/diff.rs` pixel
//! comparison approach, adapted from a full-resolution RGBA diff down to
//! the spec's fixed-size grayscale thumbnail heartbeat scheme.

use crate::error::{StudioError, StudioResult};
use crate::metrics;
use image::imageops::FilterType;

/// Tunable knobs the spec calls out as hard-coded magic numbers worth
/// exposing (spec §9 Open Questions).
#[derive(Clone, Copy, Debug)]
pub struct FrameSamplerConfig {
    pub thumbnail_size: u32,
    pub diff_threshold: f64,
    pub pixel_delta_threshold: u8,
    pub heartbeat_every: u32,
}

impl Default for FrameSamplerConfig {
    fn default() -> Self {
        Self {
            thumbnail_size: 16,
            diff_threshold: 0.05,
            pixel_delta_threshold: 25,
            heartbeat_every: 5,
        }
    }
}

/// Perceptual change detector over one cached thumbnail.
pub struct FrameSampler {
    config: FrameSamplerConfig,
    thumbnail: Option<Vec<u8>>,
    skip_count: u32,
    force_next: bool,
}

impl FrameSampler {
    pub fn new(config: FrameSamplerConfig) -> Self {
        Self {
            config,
            thumbnail: None,
            skip_count: 0,
            force_next: false,
        }
    }

    /// Decide whether `frame` (JPEG or PNG bytes) differs enough from the
    /// cached thumbnail to warrant processing. See spec §4.1 for the four
    /// disjunctive trigger conditions and their side effects.
    pub fn has_changed(&mut self, frame: &[u8]) -> StudioResult<bool> {
        let forced = self.force_next;
        let new_thumbnail = compute_thumbnail(frame, self.config.thumbnail_size)?;
        let no_cache = self.thumbnail.is_none();
        let ratio = match &self.thumbnail {
            None => 1.0,
            Some(old) => diff_ratio(old, &new_thumbnail, self.config.pixel_delta_threshold),
        };
        let ratio_exceeded = ratio > self.config.diff_threshold;

        let mut changed = forced || no_cache || ratio_exceeded;
        if !changed {
            self.skip_count += 1;
            if self.skip_count >= self.config.heartbeat_every {
                changed = true;
            }
        }

        if changed {
            self.thumbnail = Some(new_thumbnail);
            self.skip_count = 0;
            metrics::sampler_accept();
        } else {
            metrics::sampler_skip();
        }
        self.force_next = false;

        Ok(changed)
    }

    /// Set a one-shot flag that forces the next `has_changed` call to
    /// return true, e.g. after a navigation-recovery re-acquisition.
    pub fn force_capture(&mut self) {
        self.force_next = true;
    }

    pub fn reset(&mut self) {
        self.thumbnail = None;
        self.skip_count = 0;
        self.force_next = false;
    }
}

fn compute_thumbnail(frame: &[u8], size: u32) -> StudioResult<Vec<u8>> {
    let image = image::load_from_memory(frame)
        .map_err(|err| StudioError::internal(format!("failed to decode frame: {err}")))?;
    let resized = image.resize_exact(size, size, FilterType::Triangle);
    Ok(resized.to_luma8().into_raw())
}

fn diff_ratio(a: &[u8], b: &[u8], pixel_delta_threshold: u8) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 1.0;
    }
    let total = a.len().min(b.len());
    if total == 0 {
        return 1.0;
    }
    let changed = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| {
            let delta = (**x as i16 - **y as i16).unsigned_abs();
            delta > pixel_delta_threshold as u16
        })
        .count();
    changed as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn solid_jpeg(size: u32, gray: u8) -> Vec<u8> {
        let img = ImageBuffer::from_pixel(size, size, Rgb([gray, gray, gray]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    #[test]
    fn first_frame_always_accepted() {
        let mut sampler = FrameSampler::new(FrameSamplerConfig::default());
        let frame = solid_jpeg(64, 120);
        assert!(sampler.has_changed(&frame).unwrap());
    }

    #[test]
    fn identity_is_idempotent_until_heartbeat() {
        let mut sampler = FrameSampler::new(FrameSamplerConfig::default());
        let frame = solid_jpeg(64, 120);
        assert_eq!(sampler.has_changed(&frame).unwrap(), true);
        assert_eq!(sampler.has_changed(&frame).unwrap(), false);
    }

    #[test]
    fn heartbeat_fires_on_fifth_consecutive_skip() {
        let mut sampler = FrameSampler::new(FrameSamplerConfig::default());
        let frame = solid_jpeg(64, 120);
        let results: Vec<bool> = (0..6)
            .map(|_| sampler.has_changed(&frame).unwrap())
            .collect();
        assert_eq!(
            results,
            vec![true, false, false, false, false, true]
        );
    }

    #[test]
    fn large_change_is_detected() {
        let mut sampler = FrameSampler::new(FrameSamplerConfig::default());
        let dark = solid_jpeg(64, 0);
        let bright = solid_jpeg(64, 255);
        assert!(sampler.has_changed(&dark).unwrap());
        assert!(sampler.has_changed(&bright).unwrap());
    }

    #[test]
    fn force_capture_overrides_identical_frame() {
        let mut sampler = FrameSampler::new(FrameSamplerConfig::default());
        let frame = solid_jpeg(64, 120);
        assert!(sampler.has_changed(&frame).unwrap());
        sampler.force_capture();
        assert!(sampler.has_changed(&frame).unwrap());
        // the forced flag is one-shot; the next identical frame is a skip again
        assert!(!sampler.has_changed(&frame).unwrap());
    }

    #[test]
    fn reset_clears_cached_state() {
        let mut sampler = FrameSampler::new(FrameSamplerConfig::default());
        let frame = solid_jpeg(64, 120);
        sampler.has_changed(&frame).unwrap();
        sampler.reset();
        assert!(sampler.has_changed(&frame).unwrap());
    }
}
