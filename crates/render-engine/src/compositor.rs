//! Frame compositor: draws the overlay objects active on a frame.
//!
//! Each object is rendered onto its own transparent, frame-sized layer and
//! alpha-blended over the frame in registration order, so later objects
//! occlude earlier ones where they are opaque.

use cutline_common::error::{CutlineError, CutlineResult};
use cutline_project_model::{Anchor, OverlayKind, OverlayObject, ShapeObject, TextObject};
use image::{imageops, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_ellipse_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;

use crate::assets::{OverlayAssets, PreparedObject, Stroke};
use crate::font::FontFace;
use crate::frame::{PixelFormat, VideoFrame};
use crate::sheet::Sheet;

/// An object's placement as two corners. Bottom- and right-anchored boxes
/// may have `x2 < x1` or `y2 < y1`; use [`BoundingBox::normalized`] to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl BoundingBox {
    /// Place a `width x height` box so that `anchor` sits at `(x, y)`.
    /// Halving truncates toward zero.
    pub fn from_anchor(x: i64, y: i64, width: i64, height: i64, anchor: Anchor) -> Self {
        if anchor == Anchor::Center {
            return Self {
                x1: x - width / 2,
                y1: y - height / 2,
                x2: x + width / 2,
                y2: y + height / 2,
            };
        }

        let (x1, x2) = match anchor {
            Anchor::TopRight | Anchor::BottomRight => (x - width, x),
            _ => (x, x + width),
        };
        let (y1, y2) = match anchor {
            Anchor::TopLeft | Anchor::TopRight => (y, y + height),
            _ => (y, y - height),
        };
        Self { x1, y1, x2, y2 }
    }

    /// `(left, top, right, bottom)` with `left <= right` and `top <= bottom`.
    pub fn normalized(&self) -> (i64, i64, i64, i64) {
        (
            self.x1.min(self.x2),
            self.y1.min(self.y2),
            self.x1.max(self.x2),
            self.y1.max(self.y2),
        )
    }
}

/// Draws sheet objects onto frames.
pub struct Compositor<'a> {
    sheet: &'a Sheet,
    assets: &'a OverlayAssets,
}

impl<'a> Compositor<'a> {
    pub fn new(sheet: &'a Sheet, assets: &'a OverlayAssets) -> Self {
        Self { sheet, assets }
    }

    pub fn has_overlays(&self, index: u64) -> bool {
        self.sheet.contains_frame(index)
    }

    /// Draw every object registered at `index` and convert to `target`.
    pub fn composite(
        &self,
        frame: &VideoFrame,
        index: u64,
        target: &PixelFormat,
    ) -> CutlineResult<VideoFrame> {
        let mut canvas = frame.to_rgba_image()?;
        let (width, height) = canvas.dimensions();

        for &object_index in self.sheet.at(index) {
            let object = &self.sheet.objects()[object_index];
            let prepared = self.assets.get(object_index).ok_or_else(|| {
                CutlineError::render(format!("overlay #{object_index} was not prepared"))
            })?;

            let mut layer = RgbaImage::new(width, height);
            render_object(&mut layer, object, prepared);
            imageops::overlay(&mut canvas, &layer, 0, 0);
        }

        VideoFrame::from_rgba_image(&canvas, target.clone(), frame.presentation_time, frame.key_frame)
    }
}

fn render_object(layer: &mut RgbaImage, object: &OverlayObject, prepared: &PreparedObject) {
    match (&object.kind, prepared) {
        (OverlayKind::Text(text), PreparedObject::Text { face, fill, stroke }) => {
            draw_text(layer, object, text, face, *fill, *stroke);
        }
        (OverlayKind::Rectangle(shape), PreparedObject::Shape { fill, stroke }) => {
            let bbox = shape_box(object, shape);
            draw_rectangle(layer, bbox, *fill, *stroke);
        }
        (OverlayKind::Ellipse(shape), PreparedObject::Shape { fill, stroke }) => {
            let bbox = shape_box(object, shape);
            draw_ellipse(layer, bbox, *fill, *stroke);
        }
        (OverlayKind::Image(_), PreparedObject::Image(image)) => {
            let bbox = BoundingBox::from_anchor(
                object.x,
                object.y,
                i64::from(image.width()),
                i64::from(image.height()),
                object.anchor,
            );
            let (left, top, _, _) = bbox.normalized();
            imageops::replace(layer, &**image, left, top);
        }
        (kind, _) => {
            tracing::warn!(kind = kind.name(), "Prepared asset does not match overlay kind");
        }
    }
}

fn shape_box(object: &OverlayObject, shape: &ShapeObject) -> BoundingBox {
    BoundingBox::from_anchor(object.x, object.y, shape.width, shape.height, object.anchor)
}

fn draw_text(
    layer: &mut RgbaImage,
    object: &OverlayObject,
    text: &TextObject,
    face: &FontFace,
    fill: Rgba<u8>,
    stroke: Option<Stroke>,
) {
    let (w, h) = face.measure(&text.content);
    // Text is always centered on (x, y), whatever its declared anchor.
    let bbox = BoundingBox::from_anchor(object.x, object.y, i64::from(w), i64::from(h), Anchor::Center);
    let (left, top, _, _) = bbox.normalized();

    if let Some(stroke) = stroke {
        let r = i64::from(stroke.width);
        for dy in -r..=r {
            for dx in -r..=r {
                if (dx != 0 || dy != 0) && dx * dx + dy * dy <= r * r {
                    face.draw(layer, left + dx, top + dy, &text.content, text.align, stroke.color);
                }
            }
        }
    }
    face.draw(layer, left, top, &text.content, text.align, fill);
}

/// Clip an inclusive box to the layer; `None` when nothing is visible.
fn clip(layer: &RgbaImage, left: i64, top: i64, right: i64, bottom: i64) -> Option<Rect> {
    let l = left.max(0);
    let t = top.max(0);
    let r = right.min(i64::from(layer.width()) - 1);
    let b = bottom.min(i64::from(layer.height()) - 1);
    if l > r || t > b {
        return None;
    }
    Some(Rect::at(l as i32, t as i32).of_size((r - l + 1) as u32, (b - t + 1) as u32))
}

fn draw_rectangle(layer: &mut RgbaImage, bbox: BoundingBox, fill: Rgba<u8>, stroke: Option<Stroke>) {
    let (left, top, right, bottom) = bbox.normalized();
    let inset = match stroke {
        Some(stroke) => {
            if let Some(rect) = clip(layer, left, top, right, bottom) {
                draw_filled_rect_mut(layer, rect, stroke.color);
            }
            i64::from(stroke.width)
        }
        None => 0,
    };

    if let Some(rect) = clip(layer, left + inset, top + inset, right - inset, bottom - inset) {
        draw_filled_rect_mut(layer, rect, fill);
    }
}

fn to_i32(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn draw_ellipse(layer: &mut RgbaImage, bbox: BoundingBox, fill: Rgba<u8>, stroke: Option<Stroke>) {
    let (left, top, right, bottom) = bbox.normalized();
    let center = (to_i32((left + right) / 2), to_i32((top + bottom) / 2));
    let rx = (right - left) / 2;
    let ry = (bottom - top) / 2;

    let inset = match stroke {
        Some(stroke) => {
            draw_filled_ellipse_mut(layer, center, to_i32(rx), to_i32(ry), stroke.color);
            i64::from(stroke.width)
        }
        None => 0,
    };

    let (inner_rx, inner_ry) = (rx - inset, ry - inset);
    if inner_rx >= 0 && inner_ry >= 0 {
        draw_filled_ellipse_mut(layer, center, to_i32(inner_rx), to_i32(inner_ry), fill);
    }
}
