//! Caption layout: wrapping script text to the background frame and
//! expressing it as an ffmpeg `drawtext` filter.

use std::path::Path;

/// Average glyph width relative to the font size for typical sans fonts
const GLYPH_WIDTH_RATIO: f64 = 0.55;

/// Horizontal padding kept free on each side of the frame
const SIDE_MARGIN_RATIO: f64 = 0.05;

/// Text overlay covering the whole background clip
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionOverlay {
    /// Wrapped caption text
    pub text: String,
    pub font_size: u32,
    pub color: String,
    pub font_file: Option<std::path::PathBuf>,
    /// Frame width in pixels, equal to the background's
    pub width: u32,
    /// Frame height in pixels, equal to the background's
    pub height: u32,
    /// Seconds, equal to the background's
    pub duration: f64,
}

impl CaptionOverlay {
    /// `drawtext` filter that reads the caption from `text_file`
    pub fn drawtext_filter(&self, text_file: &Path) -> String {
        let mut params = vec![
            format!("textfile='{}'", escape_filter_value(&text_file.to_string_lossy())),
            // Caption text is literal, never a %{...} template
            "expansion=none".to_string(),
            format!("fontsize={}", self.font_size),
            format!("fontcolor={}", self.color),
            "x=(w-text_w)/2".to_string(),
            "y=(h-text_h)/2".to_string(),
            format!("line_spacing={}", self.font_size / 5),
        ];

        if let Some(font_file) = &self.font_file {
            params.push(format!("fontfile='{}'", escape_filter_value(&font_file.to_string_lossy())));
        }

        format!("drawtext={}", params.join(":"))
    }
}

/// Maximum characters per line for a frame width and font size
pub fn max_line_chars(frame_width: u32, font_size: u32) -> usize {
    let usable = frame_width as f64 * (1.0 - 2.0 * SIDE_MARGIN_RATIO);
    let glyph = (font_size.max(1) as f64) * GLYPH_WIDTH_RATIO;
    ((usable / glyph).floor() as usize).max(1)
}

/// Word-wrap `text` so each line fits in `max_chars`.
///
/// Paragraph breaks are kept. A single word longer than a line is left whole.
pub fn wrap_caption(text: &str, max_chars: usize) -> String {
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut current = String::new();

        for word in paragraph.split_whitespace() {
            let needed = if current.is_empty() {
                word.chars().count()
            } else {
                current.chars().count() + 1 + word.chars().count()
            };

            if needed > max_chars && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }

            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }

        lines.push(current);
    }

    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}

/// Escape a value for use inside a single-quoted filtergraph option.
///
/// The graph parser strips the quotes and the option parser then unescapes
/// backslashes, so a quote has to leave the quoted run as `\\\'`.
fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\'', r"'\\\''")
        .replace(':', "\\:")
}
