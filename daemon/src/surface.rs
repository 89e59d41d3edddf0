//! Screen surfaces
//!
//! Every screen owns one ARGB8888 pixel buffer (BGRA byte order in memory)
//! backed by a memory-mapped temp file, plus the chrome state that decides
//! which part of the buffer is available to content. Drawing marks the
//! buffer damaged; the compositor copies damaged buffers to the screen.

use anyhow::Result;
use common::ScreenInfo;

/// Memory-mapped ARGB8888 pixel buffer
pub struct SurfaceBuffer {
    mmap: memmap2::MmapMut,
    _file: std::fs::File,
    width: u32,
    height: u32,
    damaged: bool,
}

impl SurfaceBuffer {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("Cannot create a {}x{} surface buffer", width, height);
        }

        let stride = width as u64 * 4; // 4 bytes per pixel (ARGB8888)
        let size = stride * height as u64;

        let file = tempfile::tempfile()?;
        file.set_len(size)?;

        let mmap = unsafe { memmap2::MmapMut::map_mut(&file)? };

        Ok(Self {
            mmap,
            _file: file,
            width,
            height,
            damaged: true,
        })
    }

    pub fn fill_color(&mut self, r: u8, g: u8, b: u8, a: u8) {
        let color = [b, g, r, a];
        for chunk in self.mmap.chunks_exact_mut(4) {
            chunk.copy_from_slice(&color);
        }
        self.damaged = true;
    }

    /// Fill a rectangle, clipped to the buffer
    pub fn fill_rect(&mut self, rect: Rect, (r, g, b): (u8, u8, u8)) {
        let color = [b, g, r, 255];
        self.damaged = true;
        let x_end = (rect.x + rect.width).min(self.width);
        let y_end = (rect.y + rect.height).min(self.height);
        for y in rect.y.min(y_end)..y_end {
            let row = (y * self.width) as usize * 4;
            for x in rect.x.min(x_end)..x_end {
                let offset = row + x as usize * 4;
                self.mmap[offset..offset + 4].copy_from_slice(&color);
            }
        }
    }

    /// Copy a BGRA image to `(x, y)`, drawing only inside `clip`
    pub fn blit_clipped(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
        x: u32,
        y: u32,
        clip: Rect,
    ) -> Result<()> {
        if data.len() != width as usize * height as usize * 4 {
            anyhow::bail!(
                "Blit data size mismatch: {}x{} needs {} bytes, got {}",
                width,
                height,
                width as usize * height as usize * 4,
                data.len()
            );
        }

        let x0 = x.max(clip.x);
        let y0 = y.max(clip.y);
        let x1 = (x + width).min(clip.x + clip.width).min(self.width);
        let y1 = (y + height).min(clip.y + clip.height).min(self.height);
        if x0 >= x1 || y0 >= y1 {
            return Ok(());
        }

        self.damaged = true;
        let row_bytes = (x1 - x0) as usize * 4;
        for dy in y0..y1 {
            let src = ((dy - y) * width + (x0 - x)) as usize * 4;
            let dst = (dy * self.width + x0) as usize * 4;
            self.mmap[dst..dst + row_bytes].copy_from_slice(&data[src..src + row_bytes]);
        }
        Ok(())
    }

    /// BGRA bytes of one pixel
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y * self.width + x) as usize * 4;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.mmap[offset..offset + 4]);
        Some(px)
    }

    /// Whole buffer, row-major BGRA
    pub fn pixels(&self) -> &[u8] {
        &self.mmap
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Axis-aligned rectangle in surface pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Windowed-mode decoration
#[derive(Debug, Clone, Copy)]
pub struct ChromeStyle {
    pub title_bar_height: u32,
    pub margin: u32,
    pub border: (u8, u8, u8),
    pub title_bar: (u8, u8, u8),
    pub background: (u8, u8, u8),
}

impl Default for ChromeStyle {
    fn default() -> Self {
        Self {
            title_bar_height: 32,
            margin: 5,
            border: (0x34, 0x98, 0xdb),
            title_bar: (0x2c, 0x3e, 0x50),
            background: (0, 0, 0),
        }
    }
}

/// One screen's display surface
pub struct ScreenSurface {
    info: ScreenInfo,
    chrome: ChromeStyle,
    fullscreen: bool,
    buffer: Option<SurfaceBuffer>,
}

impl ScreenSurface {
    pub fn new(info: ScreenInfo, chrome: ChromeStyle) -> Self {
        Self {
            info,
            chrome,
            fullscreen: false,
            buffer: None,
        }
    }

    pub fn info(&self) -> &ScreenInfo {
        &self.info
    }

    pub fn is_open(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    /// Allocate the buffer if needed and draw the chrome
    pub fn open(&mut self) -> Result<()> {
        if self.buffer.is_none() {
            self.buffer = Some(SurfaceBuffer::new(self.info.width, self.info.height)?);
            log::debug!(
                "Opened surface for {} ({}x{})",
                self.info.name,
                self.info.width,
                self.info.height
            );
            self.redraw_chrome();
        }
        Ok(())
    }

    /// Release the buffer; the surface can be reopened later
    pub fn close(&mut self) {
        if self.buffer.take().is_some() {
            log::debug!("Closed surface for {}", self.info.name);
        }
    }

    /// Switch between windowed and borderless fullscreen.
    ///
    /// Returns whether the mode changed. Content must be redrawn afterwards.
    pub fn set_fullscreen(&mut self, fullscreen: bool) -> bool {
        if self.fullscreen == fullscreen {
            return false;
        }
        self.fullscreen = fullscreen;
        self.redraw_chrome();
        true
    }

    /// Part of the buffer available to content
    pub fn content_rect(&self) -> Rect {
        if self.fullscreen {
            return Rect {
                x: 0,
                y: 0,
                width: self.info.width,
                height: self.info.height,
            };
        }

        let margin = self.chrome.margin;
        let top = margin + self.chrome.title_bar_height;
        Rect {
            x: margin,
            y: top,
            width: self.info.width.saturating_sub(margin * 2),
            height: self.info.height.saturating_sub(top + margin),
        }
    }

    /// Paint the content area with the background colour
    pub fn clear_content(&mut self) {
        let rect = self.content_rect();
        let background = self.chrome.background;
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.fill_rect(rect, background);
        }
    }

    /// Blit BGRA pixels at a position relative to the content area
    pub fn blit_content(&mut self, data: &[u8], width: u32, height: u32, x: u32, y: u32) -> Result<()> {
        let rect = self.content_rect();
        match self.buffer.as_mut() {
            Some(buffer) => buffer.blit_clipped(data, width, height, rect.x + x, rect.y + y, rect),
            None => Ok(()),
        }
    }

    pub fn buffer(&self) -> Option<&SurfaceBuffer> {
        self.buffer.as_ref()
    }

    /// Pixels changed since the last [`mark_presented`](Self::mark_presented)
    pub fn is_damaged(&self) -> bool {
        self.buffer.as_ref().is_some_and(|b| b.damaged)
    }

    /// Force the next present, e.g. onto a freshly created screen surface
    pub fn mark_damaged(&mut self) {
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.damaged = true;
        }
    }

    pub fn mark_presented(&mut self) {
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.damaged = false;
        }
    }

    fn redraw_chrome(&mut self) {
        let chrome = self.chrome;
        let (width, height) = (self.info.width, self.info.height);
        let fullscreen = self.fullscreen;
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };

        if fullscreen {
            let (r, g, b) = chrome.background;
            buffer.fill_color(r, g, b, 255);
            return;
        }

        let (r, g, b) = chrome.border;
        buffer.fill_color(r, g, b, 255);
        buffer.fill_rect(
            Rect {
                x: chrome.margin,
                y: chrome.margin,
                width: width.saturating_sub(chrome.margin * 2),
                height: chrome.title_bar_height,
            },
            chrome.title_bar,
        );
        self.clear_content();
    }
}

/// Parse a hex color string (e.g., "#FF5733" or "FF5733") to RGBA
pub fn parse_hex_color(color: &str) -> Option<(u8, u8, u8, u8)> {
    let color = color.trim_start_matches('#');

    if color.len() != 6 && color.len() != 8 {
        return None;
    }

    let r = u8::from_str_radix(&color[0..2], 16).ok()?;
    let g = u8::from_str_radix(&color[2..4], 16).ok()?;
    let b = u8::from_str_radix(&color[4..6], 16).ok()?;
    let a = if color.len() == 8 {
        u8::from_str_radix(&color[6..8], 16).ok()?
    } else {
        255
    };

    Some((r, g, b, a))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screen(width: u32, height: u32) -> ScreenInfo {
        ScreenInfo {
            name: "test".to_string(),
            x: 0,
            y: 0,
            width,
            height,
            primary: true,
        }
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#FF5733"), Some((255, 87, 51, 255)));
        assert_eq!(parse_hex_color("FF5733"), Some((255, 87, 51, 255)));
        assert_eq!(parse_hex_color("#FF573380"), Some((255, 87, 51, 128)));
        assert_eq!(parse_hex_color("invalid"), None);
    }

    #[test]
    fn test_fill_color_is_bgra() {
        let mut buffer = SurfaceBuffer::new(2, 2).unwrap();
        buffer.fill_color(255, 0, 0, 255);
        assert_eq!(buffer.pixel(1, 1), Some([0, 0, 255, 255]));
        assert_eq!(buffer.pixel(2, 0), None);
    }

    #[test]
    fn test_zero_sized_buffer_rejected() {
        assert!(SurfaceBuffer::new(0, 10).is_err());
    }

    #[test]
    fn test_blit_clips() {
        let mut buffer = SurfaceBuffer::new(4, 4).unwrap();
        let white = vec![255u8; 3 * 3 * 4];
        let all = Rect {
            x: 0,
            y: 0,
            width: 4,
            height: 4,
        };
        buffer.blit_clipped(&white, 3, 3, 2, 2, all).unwrap();

        assert_eq!(buffer.pixel(3, 3), Some([255, 255, 255, 255]));
        assert_eq!(buffer.pixel(1, 1), Some([0, 0, 0, 0]));
        assert!(buffer.blit_clipped(&white, 2, 2, 0, 0, all).is_err());
    }

    #[test]
    fn test_content_rect_follows_fullscreen() {
        let mut surface = ScreenSurface::new(screen(800, 600), ChromeStyle::default());
        surface.open().unwrap();

        let windowed = surface.content_rect();
        assert_eq!(windowed, Rect { x: 5, y: 37, width: 790, height: 558 });
        assert_eq!(surface.buffer().unwrap().pixel(0, 0), Some([0xdb, 0x98, 0x34, 255]));

        assert!(surface.set_fullscreen(true));
        assert!(!surface.set_fullscreen(true));
        assert_eq!(surface.content_rect(), Rect { x: 0, y: 0, width: 800, height: 600 });
        assert_eq!(surface.buffer().unwrap().pixel(0, 0), Some([0, 0, 0, 255]));

        surface.set_fullscreen(false);
        assert_eq!(surface.content_rect(), windowed);
    }

    #[test]
    fn test_blit_content_keeps_chrome() {
        let mut surface = ScreenSurface::new(screen(100, 100), ChromeStyle::default());
        surface.open().unwrap();
        let rect = surface.content_rect();

        let white = vec![255u8; 200 * 200 * 4];
        surface.blit_content(&white, 200, 200, 0, 0).unwrap();

        let buffer = surface.buffer().unwrap();
        assert_eq!(buffer.pixel(rect.x, rect.y), Some([255, 255, 255, 255]));
        assert_eq!(buffer.pixel(0, 0), Some([0xdb, 0x98, 0x34, 255]));
        assert_eq!(buffer.pixel(99, 99), Some([0xdb, 0x98, 0x34, 255]));
    }

    #[test]
    fn test_drawing_marks_damage() {
        let mut surface = ScreenSurface::new(screen(40, 40), ChromeStyle::default());
        assert!(!surface.is_damaged());

        surface.open().unwrap();
        assert!(surface.is_damaged());
        surface.mark_presented();
        assert!(!surface.is_damaged());

        // Fully clipped blits change nothing
        surface.blit_content(&[255u8; 4], 1, 1, 500, 500).unwrap();
        assert!(!surface.is_damaged());

        surface.blit_content(&[255u8; 4], 1, 1, 0, 0).unwrap();
        assert!(surface.is_damaged());
        surface.mark_presented();

        surface.set_fullscreen(true);
        assert!(surface.is_damaged());
        assert_eq!(surface.buffer().unwrap().pixels().len(), 40 * 40 * 4);
    }

    #[test]
    fn test_close_releases_buffer() {
        let mut surface = ScreenSurface::new(screen(10, 10), ChromeStyle::default());
        surface.open().unwrap();
        assert!(surface.is_open());
        surface.close();
        surface.close();
        assert!(!surface.is_open());
        assert!(surface.blit_content(&[0; 4], 1, 1, 0, 0).is_ok());
    }
}
