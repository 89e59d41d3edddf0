//! Frame presenter
//!
//! Runs on the display loop. Converts decoded frames to BGRA, scales them to
//! fit the surface content area (aspect preserved, centered on black) and
//! writes them into the surface.
//!
//! The first frame at a new target size is scaled with Lanczos3 and the
//! resulting placement is cached. Later frames at the same size reuse that
//! placement and a nearest-neighbour resize, which is far cheaper per frame.

use anyhow::{Context, Result};
use fast_image_resize as fr;
use std::time::Duration;

use super::source::{Frame, PixelFormat};
use super::stats::VideoStats;
use crate::surface::ScreenSurface;

const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Where a scaled frame sits inside the content area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Largest aspect-preserving size that fits `target`, centered
pub fn fit_placement(source: (u32, u32), target: (u32, u32)) -> Placement {
    let (src_w, src_h) = (source.0.max(1) as f64, source.1.max(1) as f64);
    let (dst_w, dst_h) = (target.0 as f64, target.1 as f64);
    let scale = (dst_w / src_w).min(dst_h / src_h);

    let width = ((src_w * scale).round() as u32).clamp(1, target.0.max(1));
    let height = ((src_h * scale).round() as u32).clamp(1, target.1.max(1));

    Placement {
        x: target.0.saturating_sub(width) / 2,
        y: target.1.saturating_sub(height) / 2,
        width,
        height,
    }
}

/// Last scale transform, keyed by target and source size
pub struct ScaleCache {
    pub target_size: (u32, u32),
    pub source_size: (u32, u32),
    pub placement: Placement,
    pub last_scaled_frame: Vec<u8>,
}

pub struct FramePresenter {
    label: String,
    cache: Option<ScaleCache>,
    /// Most recent source frame, kept to redraw after a resize
    last_frame: Option<Frame>,
    resizer: fr::Resizer,
    stats: VideoStats,
    recomputes: u64,
}

impl FramePresenter {
    pub fn new(label: impl Into<String>, stats: VideoStats) -> Self {
        Self {
            label: label.into(),
            cache: None,
            last_frame: None,
            resizer: fr::Resizer::new(),
            stats,
            recomputes: 0,
        }
    }

    /// Forget the cached transform when the target size actually changed
    pub fn on_resize(&mut self, new_size: (u32, u32)) {
        if self
            .cache
            .as_ref()
            .is_some_and(|cache| cache.target_size != new_size)
        {
            log::debug!("[{}] Target resized to {}x{}", self.label, new_size.0, new_size.1);
            self.cache = None;
        }
    }

    /// Scale and draw a frame. Returns `false` when nothing was drawn.
    pub fn on_frame(&mut self, frame: Frame, surface: &mut ScreenSurface) -> Result<bool> {
        let drawn = self.draw(&frame, surface)?;
        self.last_frame = Some(frame);
        if drawn {
            self.stats.increment_rendered();
            self.stats.maybe_log_stats(&self.label, STATS_INTERVAL);
        }
        Ok(drawn)
    }

    /// Redraw the most recent frame, e.g. after a fullscreen toggle
    pub fn represent(&mut self, surface: &mut ScreenSurface) -> Result<bool> {
        let target = surface.content_rect().size();
        if surface.is_open()
            && let Some(cache) = self.cache.as_ref().filter(|c| c.target_size == target)
        {
            let p = cache.placement;
            surface.blit_content(&cache.last_scaled_frame, p.width, p.height, p.x, p.y)?;
            return Ok(true);
        }

        match self.last_frame.take() {
            Some(frame) => {
                let drawn = self.draw(&frame, surface);
                self.last_frame = Some(frame);
                drawn
            }
            None => Ok(false),
        }
    }

    /// Number of quality rescales performed so far
    pub fn recompute_count(&self) -> u64 {
        self.recomputes
    }

    pub fn stats(&self) -> &VideoStats {
        &self.stats
    }

    fn draw(&mut self, frame: &Frame, surface: &mut ScreenSurface) -> Result<bool> {
        let target = surface.content_rect().size();
        if target.0 == 0 || target.1 == 0 || !surface.is_open() {
            return Ok(false);
        }

        #[cfg(feature = "profiling")]
        let started = std::time::Instant::now();

        let source_size = (frame.width, frame.height);
        let cached = self
            .cache
            .as_ref()
            .filter(|cache| cache.target_size == target && cache.source_size == source_size)
            .map(|cache| cache.placement);

        let bgra = to_bgra(frame)?;
        let (placement, algorithm) = match cached {
            Some(placement) => (placement, fr::ResizeAlg::Nearest),
            None => (
                fit_placement(source_size, target),
                fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3),
            ),
        };

        let scaled = self.resize(bgra, source_size, (placement.width, placement.height), algorithm)?;

        if cached.is_none() {
            self.recomputes += 1;
            log::debug!(
                "[{}] Scale transform {}x{} -> {}x{} at ({}, {}) in {}x{}",
                self.label,
                source_size.0,
                source_size.1,
                placement.width,
                placement.height,
                placement.x,
                placement.y,
                target.0,
                target.1
            );
            // Letterbox bars may be stale from the previous placement
            surface.clear_content();
        }

        surface.blit_content(&scaled, placement.width, placement.height, placement.x, placement.y)?;

        self.cache = Some(ScaleCache {
            target_size: target,
            source_size,
            placement,
            last_scaled_frame: scaled,
        });

        #[cfg(feature = "profiling")]
        log::trace!("[{}] Frame {} presented in {:?}", self.label, frame.index, started.elapsed());

        Ok(true)
    }

    fn resize(
        &mut self,
        data: Vec<u8>,
        source: (u32, u32),
        target: (u32, u32),
        algorithm: fr::ResizeAlg,
    ) -> Result<Vec<u8>> {
        if source == target {
            return Ok(data);
        }

        let src = fr::images::Image::from_vec_u8(source.0, source.1, data, fr::PixelType::U8x4)
            .context("Failed to create source image")?;
        let mut dst = fr::images::Image::new(target.0, target.1, fr::PixelType::U8x4);

        self.resizer
            .resize(&src, &mut dst, &fr::ResizeOptions::new().resize_alg(algorithm))
            .context("Failed to resize frame")?;

        Ok(dst.into_vec())
    }
}

/// Convert any supported frame layout to BGRA (ARGB8888 in memory)
pub fn to_bgra(frame: &Frame) -> Result<Vec<u8>> {
    let pixels = frame.width as usize * frame.height as usize;
    let expected = pixels * frame.format.bytes_per_pixel();
    if frame.data.len() != expected {
        anyhow::bail!(
            "Frame {} has {} bytes, expected {} for {}x{} {:?}",
            frame.index,
            frame.data.len(),
            expected,
            frame.width,
            frame.height,
            frame.format
        );
    }

    let bgra = match frame.format {
        PixelFormat::Bgra8 => frame.data.clone(),
        PixelFormat::Rgba8 => frame
            .data
            .chunks_exact(4)
            .flat_map(|px| [px[2], px[1], px[0], px[3]])
            .collect(),
        PixelFormat::Bgr8 => frame
            .data
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], 255])
            .collect(),
        PixelFormat::Rgb8 => frame
            .data
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0], 255])
            .collect(),
    };
    Ok(bgra)
}
