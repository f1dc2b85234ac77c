//! Preparation of overlay resources before rendering starts.
//!
//! Fonts are loaded once per `(font, size)` pair and images once per
//! `(source, rotation, opacity)` triple. Colors are parsed up front so a bad
//! color string fails the render before any frame is decoded.

use std::collections::HashMap;
use std::sync::Arc;

use cutline_common::error::{CutlineError, CutlineResult};
use cutline_project_model::{ImageObject, OverlayKind, ShapeObject, TextObject};
use image::imageops;
use image::{Rgba, RgbaImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use tracing::debug;

use crate::font::FontFace;
use crate::sheet::Sheet;

/// Parse a color string.
///
/// Accepts `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa` and a handful of names.
pub fn parse_color(raw: &str) -> Result<Rgba<u8>, String> {
    let trimmed = raw.trim();
    if let Some(hex) = trimmed.strip_prefix('#') {
        return parse_hex(hex).ok_or_else(|| format!("invalid hex color '{raw}'"));
    }

    let named = match trimmed.to_ascii_lowercase().as_str() {
        "black" => [0, 0, 0, 255],
        "white" => [255, 255, 255, 255],
        "red" => [255, 0, 0, 255],
        "green" => [0, 128, 0, 255],
        "blue" => [0, 0, 255, 255],
        "yellow" => [255, 255, 0, 255],
        "cyan" => [0, 255, 255, 255],
        "magenta" => [255, 0, 255, 255],
        "gray" | "grey" => [128, 128, 128, 255],
        "transparent" | "none" => [0, 0, 0, 0],
        _ => return Err(format!("unknown color '{raw}'")),
    };
    Ok(Rgba(named))
}

fn parse_hex(hex: &str) -> Option<Rgba<u8>> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();

    match hex.len() {
        3 => Some(Rgba([nibble(0)?, nibble(1)?, nibble(2)?, 255])),
        4 => Some(Rgba([nibble(0)?, nibble(1)?, nibble(2)?, nibble(3)?])),
        6 => Some(Rgba([byte(0)?, byte(2)?, byte(4)?, 255])),
        8 => Some(Rgba([byte(0)?, byte(2)?, byte(4)?, byte(6)?])),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stroke {
    pub width: u32,
    pub color: Rgba<u8>,
}

/// Draw-ready resources for one overlay object.
#[derive(Debug, Clone)]
pub enum PreparedObject {
    Text {
        face: Arc<FontFace>,
        fill: Rgba<u8>,
        stroke: Option<Stroke>,
    },
    Shape {
        fill: Rgba<u8>,
        stroke: Option<Stroke>,
    },
    Image(Arc<RgbaImage>),
}

/// Prepared resources for every object in a [`Sheet`], index-aligned with
/// [`Sheet::objects`].
#[derive(Debug, Clone, Default)]
pub struct OverlayAssets {
    prepared: Vec<PreparedObject>,
}

type ImageKey = (String, u64, u64);

#[derive(Default)]
struct AssetCache {
    fonts: HashMap<(String, u32), Arc<FontFace>>,
    images: HashMap<ImageKey, Arc<RgbaImage>>,
}

impl OverlayAssets {
    pub fn prepare(sheet: &Sheet) -> CutlineResult<Self> {
        let mut cache = AssetCache::default();
        let prepared = sheet
            .objects()
            .iter()
            .enumerate()
            .map(|(i, object)| {
                cache
                    .prepare(&object.kind)
                    .map_err(|e| {
                        CutlineError::config(format!("overlay #{i} ({}): {e}", object.kind.name()))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            objects = prepared.len(),
            fonts = cache.fonts.len(),
            images = cache.images.len(),
            "Prepared overlay assets"
        );
        Ok(Self { prepared })
    }

    pub fn get(&self, index: usize) -> Option<&PreparedObject> {
        self.prepared.get(index)
    }

    pub fn len(&self) -> usize {
        self.prepared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prepared.is_empty()
    }
}

impl AssetCache {
    fn prepare(&mut self, kind: &OverlayKind) -> Result<PreparedObject, String> {
        match kind {
            OverlayKind::Text(text) => self.prepare_text(text),
            OverlayKind::Rectangle(shape) | OverlayKind::Ellipse(shape) => prepare_shape(shape),
            OverlayKind::Image(image) => self.prepare_image(image).map(PreparedObject::Image),
        }
    }

    fn prepare_text(&mut self, text: &TextObject) -> Result<PreparedObject, String> {
        let key = (text.font.clone(), text.size);
        let face = match self.fonts.get(&key) {
            Some(face) => Arc::clone(face),
            None => {
                let face = Arc::new(FontFace::load(&text.font, text.size).map_err(describe)?);
                self.fonts.insert(key, Arc::clone(&face));
                face
            }
        };
        Ok(PreparedObject::Text {
            face,
            fill: parse_color(&text.fill)?,
            stroke: stroke(text.stroke_width, &text.stroke_color)?,
        })
    }

    fn prepare_image(&mut self, image: &ImageObject) -> Result<Arc<RgbaImage>, String> {
        let key = (
            image.source.clone(),
            image.rotation.to_bits(),
            image.opacity.to_bits(),
        );
        if let Some(prepared) = self.images.get(&key) {
            return Ok(Arc::clone(prepared));
        }

        let loaded = image::open(&image.source)
            .map_err(|e| format!("cannot load image '{}': {e}", image.source))?
            .to_rgba8();
        let mut prepared = rotate_expanded(&loaded, image.rotation);
        apply_opacity(&mut prepared, image.opacity);

        let prepared = Arc::new(prepared);
        self.images.insert(key, Arc::clone(&prepared));
        Ok(prepared)
    }
}

fn describe(error: CutlineError) -> String {
    match error {
        CutlineError::Config { message } => message,
        other => other.to_string(),
    }
}

fn prepare_shape(shape: &ShapeObject) -> Result<PreparedObject, String> {
    Ok(PreparedObject::Shape {
        fill: parse_color(&shape.fill)?,
        stroke: stroke(shape.stroke_width, &shape.stroke_color)?,
    })
}

fn stroke(width: u32, color: &str) -> Result<Option<Stroke>, String> {
    if width == 0 {
        return Ok(None);
    }
    Ok(Some(Stroke {
        width,
        color: parse_color(color)?,
    }))
}

/// Rotate counter-clockwise by `degrees`, growing the canvas so no corner is
/// clipped.
pub fn rotate_expanded(image: &RgbaImage, degrees: f64) -> RgbaImage {
    let normalized = degrees.rem_euclid(360.0);
    if normalized.abs() < 1e-9 || (360.0 - normalized).abs() < 1e-9 {
        return image.clone();
    }
    if (normalized - 90.0).abs() < 1e-9 {
        return imageops::rotate270(image);
    }
    if (normalized - 180.0).abs() < 1e-9 {
        return imageops::rotate180(image);
    }
    if (normalized - 270.0).abs() < 1e-9 {
        return imageops::rotate90(image);
    }

    let (w, h) = (f64::from(image.width()), f64::from(image.height()));
    let radians = normalized.to_radians();
    let (sin, cos) = (radians.sin().abs(), radians.cos().abs());
    let out_w = (w * cos + h * sin).ceil().max(1.0) as u32;
    let out_h = (w * sin + h * cos).ceil().max(1.0) as u32;

    let mut canvas = RgbaImage::new(out_w, out_h);
    let offset_x = (i64::from(out_w) - i64::from(image.width())) / 2;
    let offset_y = (i64::from(out_h) - i64::from(image.height())) / 2;
    imageops::replace(&mut canvas, image, offset_x, offset_y);

    // imageproc rotates clockwise.
    rotate_about_center(
        &canvas,
        -(radians as f32),
        Interpolation::Bilinear,
        Rgba([0, 0, 0, 0]),
    )
}

/// Scale every pixel's alpha by `opacity`.
pub fn apply_opacity(image: &mut RgbaImage, opacity: f64) {
    if opacity >= 1.0 {
        return;
    }
    for pixel in image.pixels_mut() {
        pixel.0[3] = (f64::from(pixel.0[3]) * opacity).round().clamp(0.0, 255.0) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutline_project_model::{Chunk, OverlayTemplate, Timeline};

    #[test]
    fn test_parse_color_forms() {
        assert_eq!(parse_color("#000"), Ok(Rgba([0, 0, 0, 255])));
        assert_eq!(parse_color("#f0a8"), Ok(Rgba([255, 0, 170, 136])));
        assert_eq!(parse_color("#c4c4c4"), Ok(Rgba([196, 196, 196, 255])));
        assert_eq!(parse_color("#11223344"), Ok(Rgba([17, 34, 51, 68])));
        assert_eq!(parse_color("White"), Ok(Rgba([255, 255, 255, 255])));
        assert_eq!(parse_color("transparent"), Ok(Rgba([0, 0, 0, 0])));
        assert!(parse_color("#12").is_err());
        assert!(parse_color("#gggggg").is_err());
        assert!(parse_color("chartreuse").is_err());
    }

    #[test]
    fn test_rotate_right_angles_swap_dimensions() {
        let mut image = RgbaImage::new(4, 2);
        image.put_pixel(3, 0, Rgba([255, 0, 0, 255]));

        let rotated = rotate_expanded(&image, 90.0);
        assert_eq!(rotated.dimensions(), (2, 4));
        // Counter-clockwise: the top-right corner moves to the top-left.
        assert_eq!(rotated.get_pixel(0, 0).0, [255, 0, 0, 255]);

        assert_eq!(rotate_expanded(&image, 180.0).dimensions(), (4, 2));
        assert_eq!(rotate_expanded(&image, -90.0).dimensions(), (2, 4));
        assert_eq!(rotate_expanded(&image, 360.0), image);
    }

    #[test]
    fn test_rotate_arbitrary_angle_expands_canvas() {
        let image = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 255, 255]));
        let rotated = rotate_expanded(&image, 45.0);
        assert_eq!(rotated.dimensions(), (15, 15));
        assert_eq!(rotated.get_pixel(7, 7).0[3], 255);
        assert_eq!(rotated.get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn test_apply_opacity_scales_alpha() {
        let mut image = RgbaImage::from_pixel(1, 1, Rgba([10, 20, 30, 200]));
        apply_opacity(&mut image, 0.5);
        assert_eq!(image.get_pixel(0, 0).0, [10, 20, 30, 100]);
    }

    #[test]
    fn test_prepare_memoizes_fonts_and_images() {
        let dir = tempfile::tempdir().unwrap();
        let logo = dir.path().join("logo.png");
        RgbaImage::from_pixel(3, 2, Rgba([0, 255, 0, 255]))
            .save(&logo)
            .unwrap();

        let json = format!(
            r#"[{{"type":"text","content":"a","dur":1}},
                {{"type":"text","content":"b","dur":1}},
                {{"type":"image","dur":1,"src":"{0}","opacity":0.5}},
                {{"type":"image","dur":1,"src":"{0}","opacity":0.5}},
                {{"type":"rectangle","dur":1,"width":1,"height":1,"stroke":2,"strokecolor":"red"}}]"#,
            logo.display()
        );
        let templates: Vec<OverlayTemplate> = serde_json::from_str(&json).unwrap();
        let timeline = Timeline::new(vec![Chunk::kept(0, 10, 1.0)]).unwrap();
        let sheet = Sheet::build(&templates, &timeline, 32, 32).unwrap();

        let assets = OverlayAssets::prepare(&sheet).unwrap();
        assert_eq!(assets.len(), 5);

        let (Some(PreparedObject::Text { face: a, .. }), Some(PreparedObject::Text { face: b, .. })) =
            (assets.get(0), assets.get(1))
        else {
            panic!("expected text");
        };
        assert!(Arc::ptr_eq(a, b));

        let (Some(PreparedObject::Image(a)), Some(PreparedObject::Image(b))) =
            (assets.get(2), assets.get(3))
        else {
            panic!("expected images");
        };
        assert!(Arc::ptr_eq(a, b));
        assert_eq!(a.get_pixel(0, 0).0, [0, 255, 0, 128]);

        let Some(PreparedObject::Shape { stroke, .. }) = assets.get(4) else {
            panic!("expected shape");
        };
        assert_eq!(
            *stroke,
            Some(Stroke {
                width: 2,
                color: Rgba([255, 0, 0, 255])
            })
        );
    }

    #[test]
    fn test_prepare_reports_bad_color_and_missing_image() {
        let timeline = Timeline::new(vec![Chunk::kept(0, 10, 1.0)]).unwrap();

        let bad_color: Vec<OverlayTemplate> =
            serde_json::from_str(r##"[{"type":"ellipse","dur":1,"width":2,"height":2,"fill":"#xyz"}]"##)
                .unwrap();
        let sheet = Sheet::build(&bad_color, &timeline, 8, 8).unwrap();
        let err = OverlayAssets::prepare(&sheet).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("overlay #0 (ellipse)"));

        let missing: Vec<OverlayTemplate> =
            serde_json::from_str(r#"[{"type":"image","dur":1,"src":"/nonexistent/logo.png"}]"#)
                .unwrap();
        let sheet = Sheet::build(&missing, &timeline, 8, 8).unwrap();
        let err = OverlayAssets::prepare(&sheet).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/logo.png"));
    }
}
