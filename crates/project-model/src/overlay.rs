//! Overlay annotations: declared templates and their resolved form.
//!
//! Templates are what a project file declares. Numeric fields hold a
//! [`RawValue`], which may be a literal (`12`, `"12"`, `0.5`) or the name of
//! a canvas variable (`"centerX"`, `"end"`). Resolution into
//! [`OverlayObject`] happens once, before rendering, in the render engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A declared field value before resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Int(v) => write!(f, "{v}"),
            RawValue::Float(v) => write!(f, "{v}"),
            RawValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Int(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

/// Which point of an object's bounding box sits at its declared `(x, y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Anchor {
    #[default]
    TopLeft,
    Center,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Anchor {
    pub fn as_str(self) -> &'static str {
        match self {
            Anchor::TopLeft => "tl",
            Anchor::Center => "ce",
            Anchor::TopRight => "tr",
            Anchor::BottomLeft => "bl",
            Anchor::BottomRight => "br",
        }
    }
}

impl FromStr for Anchor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "tl" | "top-left" => Ok(Anchor::TopLeft),
            "ce" | "center" | "centre" => Ok(Anchor::Center),
            "tr" | "top-right" => Ok(Anchor::TopRight),
            "bl" | "bottom-left" => Ok(Anchor::BottomLeft),
            "br" | "bottom-right" => Ok(Anchor::BottomRight),
            other => Err(format!(
                "unknown anchor '{other}' (expected tl, ce, tr, bl or br)"
            )),
        }
    }
}

/// Horizontal alignment of multi-line text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

impl FromStr for TextAlign {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(TextAlign::Left),
            "center" | "centre" => Ok(TextAlign::Center),
            "right" => Ok(TextAlign::Right),
            other => Err(format!(
                "unknown alignment '{other}' (expected left, center or right)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// An overlay object as declared in a project file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayTemplate {
    #[serde(flatten)]
    pub timing: TemplateCommon,

    #[serde(flatten)]
    pub kind: TemplateKind,
}

/// Fields shared by every overlay variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateCommon {
    /// First frame the object is visible on.
    #[serde(default = "zero")]
    pub start: RawValue,

    /// Number of frames the object stays visible.
    #[serde(rename = "dur", alias = "duration")]
    pub duration: RawValue,

    #[serde(default = "zero")]
    pub x: RawValue,

    #[serde(default = "zero")]
    pub y: RawValue,

    #[serde(default = "default_anchor")]
    pub anchor: String,
}

/// Variant-specific template fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TemplateKind {
    Text(TextTemplate),
    Rectangle(ShapeTemplate),
    Ellipse(ShapeTemplate),
    Image(ImageTemplate),
}

impl TemplateKind {
    pub fn name(&self) -> &'static str {
        match self {
            TemplateKind::Text(_) => "text",
            TemplateKind::Rectangle(_) => "rectangle",
            TemplateKind::Ellipse(_) => "ellipse",
            TemplateKind::Image(_) => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextTemplate {
    pub content: String,

    /// Path to a TrueType font, or `"default"` for the built-in font.
    #[serde(default = "default_font")]
    pub font: String,

    #[serde(default = "default_text_size")]
    pub size: RawValue,

    #[serde(default = "default_text_fill")]
    pub fill: String,

    #[serde(default = "zero", rename = "stroke", alias = "stroke_width")]
    pub stroke_width: RawValue,

    #[serde(default = "default_stroke_color", rename = "strokecolor", alias = "stroke_color")]
    pub stroke_color: String,

    #[serde(default = "default_align")]
    pub align: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeTemplate {
    pub width: RawValue,
    pub height: RawValue,

    #[serde(default = "default_shape_fill")]
    pub fill: String,

    #[serde(default = "zero", rename = "stroke", alias = "stroke_width")]
    pub stroke_width: RawValue,

    #[serde(default = "default_stroke_color", rename = "strokecolor", alias = "stroke_color")]
    pub stroke_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTemplate {
    /// Path to the image file.
    #[serde(rename = "src", alias = "source")]
    pub source: String,

    /// Counter-clockwise rotation in degrees; the canvas grows to fit.
    #[serde(default = "zero", rename = "rotate", alias = "rotation")]
    pub rotation: RawValue,

    #[serde(default = "one")]
    pub opacity: RawValue,
}

fn zero() -> RawValue {
    RawValue::Int(0)
}

fn one() -> RawValue {
    RawValue::Int(1)
}

fn default_anchor() -> String {
    "tl".to_string()
}

fn default_font() -> String {
    "default".to_string()
}

fn default_text_size() -> RawValue {
    RawValue::Int(30)
}

fn default_text_fill() -> String {
    "#000".to_string()
}

fn default_shape_fill() -> String {
    "#c4c4c4".to_string()
}

fn default_stroke_color() -> String {
    "#000".to_string()
}

fn default_align() -> String {
    "left".to_string()
}

// ---------------------------------------------------------------------------
// Resolved objects
// ---------------------------------------------------------------------------

/// A fully resolved overlay object. Immutable after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayObject {
    pub start: u64,
    pub duration: u64,
    pub x: i64,
    pub y: i64,
    pub anchor: Anchor,
    pub kind: OverlayKind,
}

impl OverlayObject {
    /// Frames `[start, start + duration)` during which the object is drawn.
    pub fn frames(&self) -> std::ops::Range<u64> {
        self.start..self.start.saturating_add(self.duration)
    }

    pub fn is_active(&self, frame: u64) -> bool {
        self.frames().contains(&frame)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OverlayKind {
    Text(TextObject),
    Rectangle(ShapeObject),
    Ellipse(ShapeObject),
    Image(ImageObject),
}

impl OverlayKind {
    pub fn name(&self) -> &'static str {
        match self {
            OverlayKind::Text(_) => "text",
            OverlayKind::Rectangle(_) => "rectangle",
            OverlayKind::Ellipse(_) => "ellipse",
            OverlayKind::Image(_) => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextObject {
    pub content: String,
    pub font: String,
    pub size: u32,
    pub fill: String,
    pub stroke_width: u32,
    pub stroke_color: String,
    pub align: TextAlign,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeObject {
    pub width: i64,
    pub height: i64,
    pub fill: String,
    pub stroke_width: u32,
    pub stroke_color: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageObject {
    pub source: String,
    pub rotation: f64,
    pub opacity: f64,
}
