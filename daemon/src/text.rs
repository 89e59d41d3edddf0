//! Text cards rendered through SVG
//!
//! Message content, the loading placeholder and the video diagnostic view
//! are all [`Card`]s: a background, an optional heading and lines of text.
//! Cards become SVG documents which resvg rasterizes into BGRA pixels.

use anyhow::{Context, Result};
use resvg::{tiny_skia, usvg};
use std::sync::Arc;

const FONT_FAMILY: &str = "DejaVu Sans, Liberation Sans, Arial, sans-serif";

#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub title: Option<String>,
    pub lines: Vec<String>,
    pub background: (u8, u8, u8),
    pub foreground: (u8, u8, u8),
    pub accent: (u8, u8, u8),
    pub font_size: u32,
    /// Left-aligned body text (diagnostics) instead of centered
    pub left_aligned: bool,
}

impl Card {
    /// Large centered message on a green background
    pub fn message(text: &str, width: u32) -> Self {
        let font_size = 24;
        Self {
            title: None,
            lines: wrap_text(text, max_chars(width, font_size)),
            background: (0x27, 0xae, 0x60),
            foreground: (0xff, 0xff, 0xff),
            accent: (0xff, 0xff, 0xff),
            font_size,
            left_aligned: false,
        }
    }

    /// Placeholder while a video backend starts
    pub fn loading(file_name: &str) -> Self {
        Self {
            title: Some("Loading video…".to_string()),
            lines: vec![file_name.to_string()],
            background: (0x1e, 0x1e, 0x1e),
            foreground: (0xbd, 0xc3, 0xc7),
            accent: (0x34, 0x98, 0xdb),
            font_size: 18,
            left_aligned: false,
        }
    }

    /// Left-aligned report on a dark background
    pub fn report(title: &str, lines: Vec<String>) -> Self {
        Self {
            title: Some(title.to_string()),
            lines,
            background: (0x2c, 0x3e, 0x50),
            foreground: (0xec, 0xf0, 0xf1),
            accent: (0xe7, 0x4c, 0x3c),
            font_size: 16,
            left_aligned: true,
        }
    }
}

/// Characters that fit on one line at `font_size`, roughly
pub fn max_chars(width: u32, font_size: u32) -> usize {
    let glyph = (font_size as f32 * 0.55).max(1.0);
    ((width as f32 * 0.9) / glyph).max(8.0) as usize
}

/// Greedy word wrap; words longer than a line are split
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > max_chars {
                if !line.is_empty() {
                    lines.push(std::mem::take(&mut line));
                }
                let rest = word.split_off(max_chars);
                lines.push(word.into_iter().collect());
                word = rest;
            }
            let word: String = word.into_iter().collect();
            let needed = if line.is_empty() { 0 } else { 1 } + word.chars().count();
            if !line.is_empty() && line.chars().count() + needed > max_chars {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&word);
        }
        lines.push(line);
    }

    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn hex((r, g, b): (u8, u8, u8)) -> String {
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

/// SVG document for `card` at the given size
pub fn card_svg(card: &Card, width: u32, height: u32) -> String {
    let line_height = card.font_size * 3 / 2;
    let title_size = card.font_size * 3 / 2;
    let title_height = if card.title.is_some() { title_size * 2 } else { 0 };
    let block = title_height + line_height * card.lines.len() as u32;

    let (anchor, x) = if card.left_aligned {
        ("start", (width / 20).max(8))
    } else {
        ("middle", width / 2)
    };
    let mut y = if card.left_aligned {
        (height / 12).max(title_size)
    } else {
        height.saturating_sub(block) / 2 + card.font_size
    };

    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">
<rect width="{w}" height="{h}" fill="{bg}"/>
"#,
        w = width,
        h = height,
        bg = hex(card.background)
    );

    if let Some(title) = &card.title {
        svg.push_str(&format!(
            r#"<text x="{x}" y="{y}" text-anchor="{anchor}" font-family="{font}" font-size="{size}" font-weight="bold" fill="{fill}">{text}</text>
"#,
            x = x,
            y = y + title_size / 2,
            anchor = anchor,
            font = FONT_FAMILY,
            size = title_size,
            fill = hex(card.accent),
            text = escape_xml(title)
        ));
        y += title_height;
    }

    let weight = if card.left_aligned { "normal" } else { "bold" };
    for line in &card.lines {
        svg.push_str(&format!(
            r#"<text x="{x}" y="{y}" text-anchor="{anchor}" font-family="{font}" font-size="{size}" font-weight="{weight}" fill="{fill}" xml:space="preserve">{text}</text>
"#,
            x = x,
            y = y,
            anchor = anchor,
            font = FONT_FAMILY,
            size = card.font_size,
            weight = weight,
            fill = hex(card.foreground),
            text = escape_xml(line)
        ));
        y += line_height;
    }

    svg.push_str("</svg>\n");
    svg
}

/// Rasterizes cards; holds the system font database
pub struct TextRenderer {
    options: usvg::Options<'static>,
}

impl TextRenderer {
    pub fn new() -> Self {
        let mut fontdb = usvg::fontdb::Database::new();
        fontdb.load_system_fonts();
        log::debug!("Loaded {} font faces", fontdb.len());

        let mut options = usvg::Options::default();
        options.fontdb = Arc::new(fontdb);
        Self { options }
    }

    /// BGRA pixels of `card` at `width`x`height`
    pub fn render(&self, card: &Card, width: u32, height: u32) -> Result<Vec<u8>> {
        let svg = card_svg(card, width, height);
        let tree = usvg::Tree::from_str(&svg, &self.options).context("Failed to parse card SVG")?;

        let mut pixmap = tiny_skia::Pixmap::new(width, height)
            .with_context(|| format!("Invalid card size {}x{}", width, height))?;
        resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

        // Opaque background, so premultiplied RGBA equals straight RGBA
        let mut bgra = pixmap.take();
        for pixel in bgra.chunks_exact_mut(4) {
            pixel.swap(0, 2);
        }
        Ok(bgra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_text() {
        assert_eq!(
            wrap_text("the quick brown fox jumps", 10),
            vec!["the quick", "brown fox", "jumps"]
        );
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap_text("one\n\ntwo", 20), vec!["one", "", "two"]);
        assert_eq!(wrap_text("", 20), vec![""]);
    }

    #[test]
    fn test_card_svg_escapes_text() {
        let card = Card::message("a < b & c", 800);
        let svg = card_svg(&card, 800, 600);

        assert!(svg.contains("a &lt; b &amp; c"));
        assert!(svg.contains("#27ae60"));
        assert!(svg.contains(r#"text-anchor="middle""#));
    }

    #[test]
    fn test_report_is_left_aligned() {
        let card = Card::report("Cannot play clip.mp4", vec!["Size: 1.0 KB".to_string()]);
        let svg = card_svg(&card, 800, 600);

        assert!(svg.contains(r#"text-anchor="start""#));
        assert!(svg.contains("Cannot play clip.mp4"));
    }

    #[test]
    fn test_render_fills_background() {
        let renderer = TextRenderer::new();
        let pixels = renderer.render(&Card::message("hi", 100), 100, 50).unwrap();

        assert_eq!(pixels.len(), 100 * 50 * 4);
        // Top-left corner is plain background, in BGRA order
        assert_eq!(&pixels[0..4], &[0x60, 0xae, 0x27, 0xff]);
    }
}
