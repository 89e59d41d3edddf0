use anyhow::{Context, Result};
use common::ScaleMode;
use image::{DynamicImage, GenericImageView, ImageBuffer, Rgba, RgbaImage};
use std::path::{Path, PathBuf};

/// Image file extensions accepted for image content
pub const IMAGE_EXTENSIONS: [&str; 8] = ["png", "jpg", "jpeg", "gif", "webp", "bmp", "tif", "tiff"];

/// Loads images and lays them out on a content area
pub struct ImageRenderer {
    /// Last decoded image, reused when the same file is redrawn
    cached: Option<(PathBuf, DynamicImage)>,
}

impl ImageRenderer {
    pub fn new() -> Self {
        Self { cached: None }
    }

    /// Resolve `~`, check the file and its extension
    pub fn resolve(raw: &str) -> Result<PathBuf, common::DisplayError> {
        let path = PathBuf::from(shellexpand::tilde(raw.trim()).into_owned());
        if !path.is_file() {
            return Err(common::DisplayError::FileNotFound(path.display().to_string()));
        }
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            return Err(common::DisplayError::UnsupportedFormat(path.display().to_string()));
        }
        Ok(path)
    }

    /// Load an image from a file path
    pub fn load(&mut self, path: &Path) -> Result<&DynamicImage> {
        let hit = self.cached.as_ref().is_some_and(|(cached, _)| cached == path);
        if !hit {
            log::info!("Loading image: {}", path.display());
            let image = image::open(path)
                .with_context(|| format!("Failed to load image: {}", path.display()))?;
            log::info!(
                "Loaded image: {}x{} ({})",
                image.width(),
                image.height(),
                path.display()
            );
            self.cached = Some((path.to_path_buf(), image));
        }

        self.cached
            .as_ref()
            .map(|(_, image)| image)
            .context("Image cache is empty")
    }

    /// Load `path` and produce BGRA pixels of exactly `target` size
    pub fn render(&mut self, path: &Path, target: (u32, u32), mode: ScaleMode) -> Result<Vec<u8>> {
        let image = self.load(path)?.clone();
        let canvas = scale_image(&image, target.0, target.1, mode)?;
        Ok(rgba_to_bgra(&canvas))
    }
}

/// Lay `image` out on a black canvas of the target size
pub fn scale_image(image: &DynamicImage, target_width: u32, target_height: u32, mode: ScaleMode) -> Result<RgbaImage> {
    if target_width == 0 || target_height == 0 {
        anyhow::bail!("Cannot scale into a {}x{} area", target_width, target_height);
    }

    let mut canvas = ImageBuffer::from_pixel(target_width, target_height, Rgba([0, 0, 0, 255]));
    let (img_width, img_height) = image.dimensions();
    let centered = |w: u32, h: u32| {
        (
            (target_width as i64 - w as i64) / 2,
            (target_height as i64 - h as i64) / 2,
        )
    };

    match mode {
        ScaleMode::Center => {
            let (x, y) = centered(img_width, img_height);
            image::imageops::overlay(&mut canvas, &image.to_rgba8(), x, y);
        }
        ScaleMode::Fill | ScaleMode::Fit => {
            let width_scale = target_width as f64 / img_width.max(1) as f64;
            let height_scale = target_height as f64 / img_height.max(1) as f64;
            let scale = if mode == ScaleMode::Fill {
                width_scale.max(height_scale)
            } else {
                width_scale.min(height_scale)
            };
            let width = ((img_width as f64 * scale).round() as u32).max(1);
            let height = ((img_height as f64 * scale).round() as u32).max(1);

            log::debug!(
                "{:?} mode: image {}x{} → {}x{} on {}x{}",
                mode,
                img_width,
                img_height,
                width,
                height,
                target_width,
                target_height
            );

            let resized = resize_image_fast(image, width, height)?;
            let (x, y) = centered(width, height);
            image::imageops::overlay(&mut canvas, &resized, x, y);
        }
        ScaleMode::Stretch => {
            let resized = resize_image_fast(image, target_width, target_height)?;
            image::imageops::overlay(&mut canvas, &resized, 0, 0);
        }
        ScaleMode::Tile => {
            let tile = image.to_rgba8();
            for ty in 0..target_height.div_ceil(img_height.max(1)) {
                for tx in 0..target_width.div_ceil(img_width.max(1)) {
                    image::imageops::overlay(
                        &mut canvas,
                        &tile,
                        (tx * img_width) as i64,
                        (ty * img_height) as i64,
                    );
                }
            }
        }
    }

    Ok(canvas)
}

/// Lanczos3 resize through fast_image_resize
fn resize_image_fast(image: &DynamicImage, target_width: u32, target_height: u32) -> Result<RgbaImage> {
    use fast_image_resize as fr;

    let src_image = image.to_rgba8();
    let (src_width, src_height) = src_image.dimensions();

    let src = fr::images::Image::from_vec_u8(src_width, src_height, src_image.into_raw(), fr::PixelType::U8x4)
        .context("Failed to create source image")?;
    let mut dst = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

    fr::Resizer::new()
        .resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3)),
        )
        .context("Failed to resize image")?;

    ImageBuffer::from_raw(target_width, target_height, dst.into_vec())
        .context("Failed to create output image buffer")
}

/// RGBA to the surface's BGRA byte order
pub fn rgba_to_bgra(rgba: &RgbaImage) -> Vec<u8> {
    let mut bgra = Vec::with_capacity(rgba.len());
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        bgra.extend_from_slice(&[b, g, r, a]);
    }
    bgra
}
