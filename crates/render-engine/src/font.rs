//! Font loading and text rasterization.
//!
//! TrueType fonts are rasterized with `rusttype`. The name `"default"`
//! selects a built-in 5x7 bitmap face scaled to the requested size, so
//! projects render without shipping a font file.
//!
//! The built-in glyphs are the common 5x7 dot-matrix ASCII shapes used by
//! character LCD controllers and terminal ROM fonts. They were hand-encoded
//! here as row bitmaps, one byte per row, and carry no licensed font data.

use std::path::Path;

use cutline_common::error::{CutlineError, CutlineResult};
use cutline_project_model::TextAlign;
use image::{Pixel, Rgba, RgbaImage};
use rusttype::{point, Font, Scale};

/// Font name that selects the built-in face.
pub const DEFAULT_FONT: &str = "default";

/// A loaded font at a fixed pixel size.
pub enum FontFace {
    TrueType {
        font: Font<'static>,
        scale: Scale,
    },
    Builtin {
        /// Size of one bitmap dot in pixels.
        dot: u32,
    },
}

impl std::fmt::Debug for FontFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FontFace::TrueType { scale, .. } => {
                f.debug_struct("TrueType").field("scale", &scale.y).finish()
            }
            FontFace::Builtin { dot } => f.debug_struct("Builtin").field("dot", dot).finish(),
        }
    }
}

impl FontFace {
    /// Load `name` at `size` pixels. A readable file always wins; only when
    /// no such file exists does `"default"` fall back to the built-in face.
    pub fn load(name: &str, size: u32) -> CutlineResult<Self> {
        let path = Path::new(name);
        if path.is_file() {
            let bytes = std::fs::read(path)?;
            let font = Font::try_from_vec(bytes).ok_or_else(|| {
                CutlineError::config(format!("font '{name}' is not a valid TrueType font"))
            })?;
            return Ok(FontFace::TrueType {
                font,
                scale: Scale::uniform(size as f32),
            });
        }

        if name == DEFAULT_FONT {
            return Ok(Self::builtin(size));
        }

        Err(CutlineError::config(format!("font '{name}' not found")))
    }

    pub fn builtin(size: u32) -> Self {
        FontFace::Builtin {
            dot: (size / GLYPH_CELL_HEIGHT).max(1),
        }
    }

    fn line_height(&self) -> u32 {
        match self {
            FontFace::TrueType { font, scale } => {
                let v = font.v_metrics(*scale);
                (v.ascent - v.descent + v.line_gap).ceil().max(1.0) as u32
            }
            FontFace::Builtin { dot } => GLYPH_CELL_HEIGHT * dot,
        }
    }

    fn line_width(&self, line: &str) -> u32 {
        match self {
            FontFace::TrueType { font, scale } => font
                .layout(line, *scale, point(0.0, 0.0))
                .map(|g| g.position().x + g.unpositioned().h_metrics().advance_width)
                .fold(0.0f32, f32::max)
                .ceil() as u32,
            FontFace::Builtin { dot } => line.chars().count() as u32 * GLYPH_CELL_WIDTH * dot,
        }
    }

    /// Size of the text block, one line per `\n`.
    pub fn measure(&self, text: &str) -> (u32, u32) {
        let width = text.lines().map(|l| self.line_width(l)).max().unwrap_or(0);
        let lines = text.lines().count().max(1) as u32;
        (width, lines * self.line_height())
    }

    /// Draw the text block with its top-left corner at `(x, y)`.
    pub fn draw(
        &self,
        layer: &mut RgbaImage,
        x: i64,
        y: i64,
        text: &str,
        align: TextAlign,
        color: Rgba<u8>,
    ) {
        let (block_width, _) = self.measure(text);
        let line_height = self.line_height() as i64;

        for (row, line) in text.lines().enumerate() {
            let slack = block_width.saturating_sub(self.line_width(line)) as i64;
            let offset = match align {
                TextAlign::Left => 0,
                TextAlign::Center => slack / 2,
                TextAlign::Right => slack,
            };
            let line_x = x + offset;
            let line_y = y + row as i64 * line_height;

            match self {
                FontFace::TrueType { font, scale } => {
                    let ascent = font.v_metrics(*scale).ascent;
                    let origin = point(line_x as f32, line_y as f32 + ascent);
                    for glyph in font.layout(line, *scale, origin) {
                        let Some(bb) = glyph.pixel_bounding_box() else {
                            continue;
                        };
                        glyph.draw(|gx, gy, coverage| {
                            blend(
                                layer,
                                i64::from(bb.min.x) + i64::from(gx),
                                i64::from(bb.min.y) + i64::from(gy),
                                color,
                                coverage,
                            );
                        });
                    }
                }
                FontFace::Builtin { dot } => {
                    draw_bitmap_line(layer, line_x, line_y, line, *dot, color);
                }
            }
        }
    }
}

/// Alpha-blend `color` at `coverage` onto one pixel, ignoring out-of-bounds
/// coordinates.
pub(crate) fn blend(layer: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>, coverage: f32) {
    if x < 0 || y < 0 || x >= i64::from(layer.width()) || y >= i64::from(layer.height()) {
        return;
    }
    let alpha = (f32::from(color.0[3]) * coverage.clamp(0.0, 1.0)).round() as u8;
    if alpha == 0 {
        return;
    }
    let [r, g, b, _] = color.0;
    layer
        .get_pixel_mut(x as u32, y as u32)
        .blend(&Rgba([r, g, b, alpha]));
}

const GLYPH_CELL_WIDTH: u32 = 6;
const GLYPH_CELL_HEIGHT: u32 = 8;

fn draw_bitmap_line(layer: &mut RgbaImage, x: i64, y: i64, line: &str, dot: u32, color: Rgba<u8>) {
    let dot = i64::from(dot);
    for (col, ch) in line.chars().enumerate() {
        let rows = glyph_rows(ch);
        let cell_x = x + col as i64 * i64::from(GLYPH_CELL_WIDTH) * dot;
        for (row, bits) in rows.iter().enumerate() {
            for bit in 0..5 {
                if bits & (0x10 >> bit) == 0 {
                    continue;
                }
                let px = cell_x + bit as i64 * dot;
                let py = y + row as i64 * dot;
                for dy in 0..dot {
                    for dx in 0..dot {
                        blend(layer, px + dx, py + dy, color, 1.0);
                    }
                }
            }
        }
    }
}

fn glyph_rows(ch: char) -> &'static [u8; 7] {
    let code = ch as u32;
    if (0x20..=0x7e).contains(&code) {
        &BUILTIN_GLYPHS[(code - 0x20) as usize]
    } else {
        &BUILTIN_GLYPHS[('?' as u32 - 0x20) as usize]
    }
}

/// Printable ASCII, 5 dots wide and 7 rows high. Bit 4 is the leftmost dot.
#[rustfmt::skip]
static BUILTIN_GLYPHS: [[u8; 7]; 95] = [
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], // ' '
    [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04], // !
    [0x0A, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00], // "
    [0x0A, 0x0A, 0x1F, 0x0A, 0x1F, 0x0A, 0x0A], // #
    [0x04, 0x0F, 0x14, 0x0E, 0x05, 0x1E, 0x04], // $
    [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03], // %
    [0x0C, 0x12, 0x14, 0x08, 0x15, 0x12, 0x0D], // &
    [0x04, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00], // '
    [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02], // (
    [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08], // )
    [0x00, 0x04, 0x15, 0x0E, 0x15, 0x04, 0x00], // *
    [0x00, 0x04, 0x04, 0x1F, 0x04, 0x04, 0x00], // +
    [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08], // ,
    [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00], // -
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C], // .
    [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00], // /
    [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E], // 0
    [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E], // 1
    [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F], // 2
    [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E], // 3
    [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02], // 4
    [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E], // 5
    [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E], // 6
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08], // 7
    [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E], // 8
    [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C], // 9
    [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00], // :
    [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x04, 0x08], // ;
    [0x02, 0x04, 0x08, 0x10, 0x08, 0x04, 0x02], // <
    [0x00, 0x00, 0x1F, 0x00, 0x1F, 0x00, 0x00], // =
    [0x08, 0x04, 0x02, 0x01, 0x02, 0x04, 0x08], // >
    [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04], // ?
    [0x0E, 0x11, 0x01, 0x0D, 0x15, 0x15, 0x0E], // @
    [0x0E, 0x11, 0x11, 0x11, 0x1F, 0x11, 0x11], // A
    [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E], // B
    [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E], // C
    [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C], // D
    [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F], // E
    [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10], // F
    [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F], // G
    [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11], // H
    [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E], // I
    [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C], // J
    [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11], // K
    [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F], // L
    [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11], // M
    [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11], // N
    [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E], // O
    [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10], // P
    [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D], // Q
    [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11], // R
    [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E], // S
    [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04], // T
    [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E], // U
    [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04], // V
    [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A], // W
    [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11], // X
    [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04], // Y
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F], // Z
    [0x0E, 0x08, 0x08, 0x08, 0x08, 0x08, 0x0E], // [
    [0x00, 0x10, 0x08, 0x04, 0x02, 0x01, 0x00], // backslash
    [0x0E, 0x02, 0x02, 0x02, 0x02, 0x02, 0x0E], // ]
    [0x04, 0x0A, 0x11, 0x00, 0x00, 0x00, 0x00], // ^
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F], // _
    [0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00], // `
    [0x00, 0x00, 0x0E, 0x01, 0x0F, 0x11, 0x0F], // a
    [0x10, 0x10, 0x16, 0x19, 0x11, 0x11, 0x1E], // b
    [0x00, 0x00, 0x0E, 0x10, 0x10, 0x11, 0x0E], // c
    [0x01, 0x01, 0x0D, 0x13, 0x11, 0x11, 0x0F], // d
    [0x00, 0x00, 0x0E, 0x11, 0x1F, 0x10, 0x0E], // e
    [0x06, 0x09, 0x08, 0x1C, 0x08, 0x08, 0x08], // f
    [0x00, 0x0F, 0x11, 0x11, 0x0F, 0x01, 0x0E], // g
    [0x10, 0x10, 0x16, 0x19, 0x11, 0x11, 0x11], // h
    [0x04, 0x00, 0x0C, 0x04, 0x04, 0x04, 0x0E], // i
    [0x02, 0x00, 0x06, 0x02, 0x02, 0x12, 0x0C], // j
    [0x10, 0x10, 0x12, 0x14, 0x18, 0x14, 0x12], // k
    [0x0C, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E], // l
    [0x00, 0x00, 0x1A, 0x15, 0x15, 0x11, 0x11], // m
    [0x00, 0x00, 0x16, 0x19, 0x11, 0x11, 0x11], // n
    [0x00, 0x00, 0x0E, 0x11, 0x11, 0x11, 0x0E], // o
    [0x00, 0x00, 0x1E, 0x11, 0x1E, 0x10, 0x10], // p
    [0x00, 0x00, 0x0D, 0x13, 0x0F, 0x01, 0x01], // q
    [0x00, 0x00, 0x16, 0x19, 0x10, 0x10, 0x10], // r
    [0x00, 0x00, 0x0E, 0x10, 0x0E, 0x01, 0x1E], // s
    [0x08, 0x08, 0x1C, 0x08, 0x08, 0x09, 0x06], // t
    [0x00, 0x00, 0x11, 0x11, 0x11, 0x13, 0x0D], // u
    [0x00, 0x00, 0x11, 0x11, 0x11, 0x0A, 0x04], // v
    [0x00, 0x00, 0x11, 0x11, 0x15, 0x15, 0x0A], // w
    [0x00, 0x00, 0x11, 0x0A, 0x04, 0x0A, 0x11], // x
    [0x00, 0x00, 0x11, 0x11, 0x0F, 0x01, 0x0E], // y
    [0x00, 0x00, 0x1F, 0x02, 0x04, 0x08, 0x1F], // z
    [0x02, 0x04, 0x04, 0x08, 0x04, 0x04, 0x02], // {
    [0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04], // |
    [0x08, 0x04, 0x04, 0x02, 0x04, 0x04, 0x08], // }
    [0x00, 0x00, 0x08, 0x15, 0x02, 0x00, 0x00], // ~
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_font_falls_back_to_builtin() {
        let face = FontFace::load(DEFAULT_FONT, 16).unwrap();
        assert!(matches!(face, FontFace::Builtin { dot: 2 }));
    }

    #[test]
    fn test_builtin_glyphs_fit_five_dot_rows() {
        assert!(BUILTIN_GLYPHS.iter().flatten().all(|row| *row < 0x20));
        assert!(glyph_rows(' ').iter().all(|row| *row == 0));
        assert!((b'!'..=b'~').all(|c| glyph_rows(c as char).iter().any(|row| *row != 0)));
        assert_eq!(glyph_rows('é'), glyph_rows('?'));
    }

    #[test]
    fn test_missing_font_is_config_error() {
        let err = FontFace::load("/nonexistent/font.ttf", 16).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("/nonexistent/font.ttf"));
    }

    #[test]
    fn test_invalid_font_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ttf");
        std::fs::write(&path, b"not a font").unwrap();
        let err = FontFace::load(path.to_str().unwrap(), 16).unwrap_err();
        assert!(err.to_string().contains("not a valid TrueType font"));
    }

    #[test]
    fn test_builtin_measure_multiline() {
        let face = FontFace::builtin(8);
        assert_eq!(face.measure("abc"), (18, 8));
        assert_eq!(face.measure("abc\nde"), (18, 16));
        assert_eq!(face.measure(""), (0, 8));
    }

    #[test]
    fn test_builtin_draws_glyph_dots() {
        let face = FontFace::builtin(8);
        let mut layer = RgbaImage::new(12, 8);
        face.draw(&mut layer, 0, 0, "I", TextAlign::Left, Rgba([255, 0, 0, 255]));

        // Top bar of 'I' spans dots 1..=3.
        assert_eq!(layer.get_pixel(0, 0).0[3], 0);
        assert_eq!(layer.get_pixel(1, 0).0, [255, 0, 0, 255]);
        assert_eq!(layer.get_pixel(3, 0).0, [255, 0, 0, 255]);
        // Stem.
        assert_eq!(layer.get_pixel(2, 3).0, [255, 0, 0, 255]);
        assert_eq!(layer.get_pixel(1, 3).0[3], 0);
    }

    #[test]
    fn test_right_alignment_shifts_short_lines() {
        let face = FontFace::builtin(8);
        let mut layer = RgbaImage::new(24, 16);
        face.draw(&mut layer, 0, 0, "III\nI", TextAlign::Right, Rgba([0, 0, 0, 255]));

        // Second line starts two cells in.
        assert_eq!(layer.get_pixel(2, 8 + 3).0[3], 0);
        assert_eq!(layer.get_pixel(12 + 2, 8 + 3).0[3], 255);
    }

    #[test]
    fn test_blend_clips_out_of_bounds() {
        let mut layer = RgbaImage::new(2, 2);
        blend(&mut layer, -1, 0, Rgba([1, 2, 3, 255]), 1.0);
        blend(&mut layer, 2, 2, Rgba([1, 2, 3, 255]), 1.0);
        blend(&mut layer, 1, 1, Rgba([1, 2, 3, 255]), 1.0);
        assert_eq!(layer.get_pixel(1, 1).0, [1, 2, 3, 255]);
        assert_eq!(layer.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }
}
