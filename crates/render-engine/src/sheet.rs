//! Overlay resolution and the per-frame object index.
//!
//! Resolution runs in two phases. Each declared field is first classified as
//! either a canvas variable reference or a literal, then coerced to the type
//! the field needs. Any failure aborts the render before a single frame is
//! decoded, with an error naming the object, the field, and the raw value.

use std::collections::BTreeMap;

use cutline_common::error::{CutlineError, CutlineResult};
use cutline_project_model::{
    Anchor, ImageObject, ImageTemplate, OverlayKind, OverlayObject, OverlayTemplate, RawValue,
    ShapeObject, ShapeTemplate, TemplateKind, TextAlign, TextObject, TextTemplate, Timeline,
};
use tracing::debug;

/// Canvas used when the source has no readable video stream.
pub const DEFAULT_CANVAS: (u32, u32) = (1280, 720);

/// Names a field value may reference instead of a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variable {
    Width,
    Height,
    CenterX,
    CenterY,
    Start,
    End,
}

impl Variable {
    pub const ALL: [Variable; 6] = [
        Variable::Width,
        Variable::Height,
        Variable::CenterX,
        Variable::CenterY,
        Variable::Start,
        Variable::End,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Variable::Width => "width",
            Variable::Height => "height",
            Variable::CenterX => "centerX",
            Variable::CenterY => "centerY",
            Variable::Start => "start",
            Variable::End => "end",
        }
    }

    /// Exact, case-sensitive lookup.
    pub fn lookup(name: &str) -> Option<Variable> {
        Self::ALL.into_iter().find(|v| v.name() == name)
    }
}

/// Values of the canvas variables for one render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableTable {
    width: i64,
    height: i64,
    end: i64,
}

impl VariableTable {
    pub fn new(canvas_width: u32, canvas_height: u32, timeline: &Timeline) -> Self {
        Self {
            width: i64::from(canvas_width),
            height: i64::from(canvas_height),
            end: timeline.kept_end() as i64,
        }
    }

    pub fn value(&self, variable: Variable) -> i64 {
        match variable {
            Variable::Width => self.width,
            Variable::Height => self.height,
            Variable::CenterX => self.width / 2,
            Variable::CenterY => self.height / 2,
            Variable::Start => 0,
            Variable::End => self.end,
        }
    }
}

/// First phase: what a raw field value refers to.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Declared<'a> {
    Variable(Variable),
    Literal(&'a RawValue),
}

fn declare(raw: &RawValue) -> Declared<'_> {
    match raw {
        RawValue::Text(name) => match Variable::lookup(name) {
            Some(var) => Declared::Variable(var),
            None => Declared::Literal(raw),
        },
        _ => Declared::Literal(raw),
    }
}

/// Second phase: typed coercion of one object's fields.
struct FieldResolver<'a> {
    vars: &'a VariableTable,
    object: usize,
    kind: &'static str,
}

impl FieldResolver<'_> {
    fn error(&self, field: &str, raw: &RawValue, reason: impl std::fmt::Display) -> CutlineError {
        CutlineError::config(format!(
            "overlay #{} ({}): field '{field}' = '{raw}': {reason}",
            self.object, self.kind
        ))
    }

    fn int(&self, field: &str, raw: &RawValue) -> CutlineResult<i64> {
        match declare(raw) {
            Declared::Variable(var) => Ok(self.vars.value(var)),
            Declared::Literal(RawValue::Int(v)) => Ok(*v),
            Declared::Literal(RawValue::Float(v)) => {
                if v.is_finite() && v.fract() == 0.0 {
                    Ok(*v as i64)
                } else {
                    Err(self.error(field, raw, "expected an integer"))
                }
            }
            Declared::Literal(RawValue::Text(text)) => text
                .trim()
                .parse::<i64>()
                .map_err(|_| self.error(field, raw, unparsable(text, "an integer"))),
        }
    }

    fn float(&self, field: &str, raw: &RawValue) -> CutlineResult<f64> {
        let value = match declare(raw) {
            Declared::Variable(var) => self.vars.value(var) as f64,
            Declared::Literal(RawValue::Int(v)) => *v as f64,
            Declared::Literal(RawValue::Float(v)) => *v,
            Declared::Literal(RawValue::Text(text)) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| self.error(field, raw, unparsable(text, "a number")))?,
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(self.error(field, raw, "expected a finite number"))
        }
    }

    fn at_least(&self, field: &str, raw: &RawValue, min: i64) -> CutlineResult<u64> {
        let value = self.int(field, raw)?;
        if value < min {
            return Err(self.error(field, raw, format!("must be at least {min}")));
        }
        Ok(value as u64)
    }

    fn small(&self, field: &str, raw: &RawValue, min: i64) -> CutlineResult<u32> {
        let value = self.at_least(field, raw, min)?;
        u32::try_from(value).map_err(|_| self.error(field, raw, "value is too large"))
    }

    fn parsed<T>(&self, field: &str, text: &str) -> CutlineResult<T>
    where
        T: std::str::FromStr<Err = String>,
    {
        text.parse::<T>()
            .map_err(|reason| self.error(field, &RawValue::Text(text.to_string()), reason))
    }
}

fn unparsable(text: &str, expected: &str) -> String {
    let looks_like_name = text
        .trim()
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_');
    if looks_like_name {
        let known: Vec<&str> = Variable::ALL.iter().map(|v| v.name()).collect();
        format!("unknown variable (expected {expected} or one of {})", known.join(", "))
    } else {
        format!("expected {expected}")
    }
}

/// Resolve one template into an immutable object.
pub fn resolve_template(
    object: usize,
    template: &OverlayTemplate,
    vars: &VariableTable,
) -> CutlineResult<OverlayObject> {
    let fields = FieldResolver {
        vars,
        object,
        kind: template.kind.name(),
    };
    let timing = &template.timing;

    let start = fields.at_least("start", &timing.start, 0)?;
    let duration = fields.at_least("dur", &timing.duration, 1)?;
    let x = fields.int("x", &timing.x)?;
    let y = fields.int("y", &timing.y)?;
    let anchor: Anchor = fields.parsed("anchor", &timing.anchor)?;

    let kind = match &template.kind {
        TemplateKind::Text(text) => OverlayKind::Text(resolve_text(&fields, text)?),
        TemplateKind::Rectangle(shape) => OverlayKind::Rectangle(resolve_shape(&fields, shape)?),
        TemplateKind::Ellipse(shape) => OverlayKind::Ellipse(resolve_shape(&fields, shape)?),
        TemplateKind::Image(image) => OverlayKind::Image(resolve_image(&fields, image)?),
    };

    Ok(OverlayObject {
        start,
        duration,
        x,
        y,
        anchor,
        kind,
    })
}

fn resolve_text(fields: &FieldResolver<'_>, text: &TextTemplate) -> CutlineResult<TextObject> {
    Ok(TextObject {
        content: text.content.clone(),
        font: text.font.clone(),
        size: fields.small("size", &text.size, 1)?,
        fill: text.fill.clone(),
        stroke_width: fields.small("stroke", &text.stroke_width, 0)?,
        stroke_color: text.stroke_color.clone(),
        align: fields.parsed::<TextAlign>("align", &text.align)?,
    })
}

fn resolve_shape(fields: &FieldResolver<'_>, shape: &ShapeTemplate) -> CutlineResult<ShapeObject> {
    Ok(ShapeObject {
        width: fields.int("width", &shape.width)?,
        height: fields.int("height", &shape.height)?,
        fill: shape.fill.clone(),
        stroke_width: fields.small("stroke", &shape.stroke_width, 0)?,
        stroke_color: shape.stroke_color.clone(),
    })
}

fn resolve_image(fields: &FieldResolver<'_>, image: &ImageTemplate) -> CutlineResult<ImageObject> {
    let opacity = fields.float("opacity", &image.opacity)?;
    if !(0.0..=1.0).contains(&opacity) {
        return Err(fields.error("opacity", &image.opacity, "must be between 0 and 1"));
    }
    Ok(ImageObject {
        source: image.source.clone(),
        rotation: fields.float("rotate", &image.rotation)?,
        opacity,
    })
}

/// Resolved overlay objects indexed by the input frames they cover.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    objects: Vec<OverlayObject>,
    by_frame: BTreeMap<u64, Vec<usize>>,
}

impl Sheet {
    /// Resolve every template and index it by frame.
    ///
    /// Each frame's list keeps declaration order, which is also draw order.
    pub fn build(
        templates: &[OverlayTemplate],
        timeline: &Timeline,
        canvas_width: u32,
        canvas_height: u32,
    ) -> CutlineResult<Self> {
        let vars = VariableTable::new(canvas_width, canvas_height, timeline);
        let objects = templates
            .iter()
            .enumerate()
            .map(|(i, template)| resolve_template(i, template, &vars))
            .collect::<CutlineResult<Vec<_>>>()?;

        // Frames past the timeline are never decoded, so coverage stops there.
        let last_frame = timeline.total_input_frames();
        let mut by_frame: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
        for (i, object) in objects.iter().enumerate() {
            let frames = object.frames();
            if frames.end > last_frame {
                debug!(
                    object = i,
                    start = frames.start,
                    end = frames.end,
                    last_frame,
                    "Overlay extends past the timeline, clamping"
                );
            }
            for frame in frames.start..frames.end.min(last_frame) {
                by_frame.entry(frame).or_default().push(i);
            }
        }

        debug!(
            objects = objects.len(),
            frames = by_frame.len(),
            canvas_width,
            canvas_height,
            "Built overlay sheet"
        );

        Ok(Self { objects, by_frame })
    }

    pub fn objects(&self) -> &[OverlayObject] {
        &self.objects
    }

    /// Indices into [`Sheet::objects`] active on `frame`, in draw order.
    pub fn at(&self, frame: u64) -> &[usize] {
        self.by_frame.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_frame(&self, frame: u64) -> bool {
        self.by_frame.contains_key(&frame)
    }

    pub fn by_frame(&self) -> &BTreeMap<u64, Vec<usize>> {
        &self.by_frame
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutline_project_model::Chunk;

    fn timeline() -> Timeline {
        Timeline::new(vec![
            Chunk::kept(0, 100, 1.0),
            Chunk::deleted(100, 150),
            Chunk::kept(150, 200, 2.0),
            Chunk::deleted(200, 300),
        ])
        .unwrap()
    }

    fn templates(json: &str) -> Vec<OverlayTemplate> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_variable_table_values() {
        let vars = VariableTable::new(1921, 1080, &timeline());
        assert_eq!(vars.value(Variable::Width), 1921);
        assert_eq!(vars.value(Variable::CenterX), 960);
        assert_eq!(vars.value(Variable::CenterY), 540);
        assert_eq!(vars.value(Variable::Start), 0);
        assert_eq!(vars.value(Variable::End), 200);
    }

    #[test]
    fn test_variable_lookup_is_exact() {
        assert_eq!(Variable::lookup("centerX"), Some(Variable::CenterX));
        assert_eq!(Variable::lookup("centerx"), None);
        assert_eq!(Variable::lookup("END"), None);
    }

    #[test]
    fn test_rectangle_resolves_variables_and_literals() {
        let sheet = Sheet::build(
            &templates(
                r#"[{"type":"rectangle","start":"10","dur":5,"x":"centerX","y":"centerY",
                     "width":20,"height":10.0,"anchor":"ce"}]"#,
            ),
            &timeline(),
            200,
            100,
        )
        .unwrap();

        let object = &sheet.objects()[0];
        assert_eq!((object.start, object.duration), (10, 5));
        assert_eq!((object.x, object.y), (100, 50));
        assert_eq!(object.anchor, Anchor::Center);
        let OverlayKind::Rectangle(shape) = &object.kind else {
            panic!("expected rectangle");
        };
        assert_eq!((shape.width, shape.height), (20, 10));

        assert!(!sheet.contains_frame(9));
        assert_eq!(sheet.at(10), &[0]);
        assert_eq!(sheet.at(14), &[0]);
        assert!(sheet.at(15).is_empty());
    }

    #[test]
    fn test_end_duration_covers_kept_range() {
        let sheet = Sheet::build(
            &templates(r#"[{"type":"text","content":"hi","dur":"end"}]"#),
            &timeline(),
            640,
            480,
        )
        .unwrap();
        assert_eq!(sheet.objects()[0].duration, 200);
        assert_eq!(sheet.by_frame().len(), 200);
        assert_eq!(sheet.by_frame().keys().next_back(), Some(&199));
    }

    #[test]
    fn test_draw_order_follows_declaration() {
        let sheet = Sheet::build(
            &templates(
                r#"[{"type":"ellipse","start":0,"dur":10,"width":4,"height":4},
                    {"type":"text","start":5,"dur":10,"content":"a"},
                    {"type":"rectangle","start":0,"dur":6,"width":4,"height":4}]"#,
            ),
            &timeline(),
            64,
            64,
        )
        .unwrap();
        assert_eq!(sheet.at(0), &[0, 2]);
        assert_eq!(sheet.at(5), &[0, 1, 2]);
        assert_eq!(sheet.at(12), &[1]);
    }

    #[test]
    fn test_unknown_variable_names_field_and_value() {
        let err = Sheet::build(
            &templates(r#"[{"type":"text","content":"a","dur":1,"x":"middle"}]"#),
            &timeline(),
            64,
            64,
        )
        .unwrap_err();
        assert!(err.is_config());
        let message = err.to_string();
        assert!(message.contains("overlay #0 (text)"), "{message}");
        assert!(message.contains("'x'"), "{message}");
        assert!(message.contains("middle"), "{message}");
        assert!(message.contains("unknown variable"), "{message}");
    }

    #[test]
    fn test_fractional_integer_field_is_rejected() {
        let err = Sheet::build(
            &templates(r#"[{"type":"rectangle","dur":1,"width":2.5,"height":1}]"#),
            &timeline(),
            64,
            64,
        )
        .unwrap_err();
        assert!(err.to_string().contains("'width' = '2.5'"));
    }

    #[test]
    fn test_invalid_timing_and_enums_are_rejected() {
        let cases = [
            (r#"[{"type":"text","content":"a","dur":0}]"#, "'dur'"),
            (r#"[{"type":"text","content":"a","dur":1,"start":-4}]"#, "'start'"),
            (r#"[{"type":"text","content":"a","dur":1,"anchor":"mid"}]"#, "'anchor'"),
            (r#"[{"type":"text","content":"a","dur":1,"align":"justify"}]"#, "'align'"),
            (r#"[{"type":"text","content":"a","dur":1,"size":0}]"#, "'size'"),
            (r#"[{"type":"image","dur":1,"src":"a.png","opacity":1.5}]"#, "'opacity'"),
        ];
        for (json, field) in cases {
            let err = Sheet::build(&templates(json), &timeline(), 64, 64).unwrap_err();
            assert!(err.to_string().contains(field), "{json}: {err}");
        }
    }

    #[test]
    fn test_image_fields_accept_numeric_strings() {
        let sheet = Sheet::build(
            &templates(r#"[{"type":"image","dur":1,"src":"a.png","rotate":"45.5","opacity":"0.25"}]"#),
            &timeline(),
            64,
            64,
        )
        .unwrap();
        let OverlayKind::Image(image) = &sheet.objects()[0].kind else {
            panic!("expected image");
        };
        assert!((image.rotation - 45.5).abs() < 1e-9);
        assert!((image.opacity - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_padded_variable_name_is_rejected() {
        let err = Sheet::build(
            &templates(r#"[{"type":"text","content":"a","dur":1,"x":" centerX "}]"#),
            &timeline(),
            64,
            64,
        )
        .unwrap_err();
        assert!(err.is_config());
        let message = err.to_string();
        assert!(message.contains("field 'x'"), "{message}");
        assert!(message.contains(" centerX "), "{message}");
    }

    #[test]
    fn test_huge_duration_is_clamped_to_timeline() {
        let sheet = Sheet::build(
            &templates(r#"[{"type":"rectangle","start":250,"dur":1e12,"width":2,"height":2}]"#),
            &timeline(),
            64,
            64,
        )
        .unwrap();
        assert_eq!(sheet.objects()[0].duration, 1_000_000_000_000);
        assert_eq!(sheet.by_frame().len(), 50);
        assert_eq!(sheet.by_frame().keys().next_back(), Some(&299));
        assert!(sheet.at(300).is_empty());
    }

    #[test]
    fn test_empty_pool_builds_empty_sheet() {
        let sheet = Sheet::build(&[], &timeline(), 64, 64).unwrap();
        assert!(sheet.is_empty());
        assert!(sheet.at(0).is_empty());
    }
}
