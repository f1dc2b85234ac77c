//! Project file and export configuration types.
//!
//! A project ties together the source video, the edit timeline, the overlay
//! pool, and export settings. It is stored as a single JSON file; relative
//! paths inside it are resolved against the file's directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::overlay::{OverlayTemplate, TemplateKind};
use crate::timeline::{Speed, Timeline};

/// Top-level project file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Schema version.
    pub version: String,

    /// Human-readable project name.
    pub name: String,

    /// Creation timestamp (ISO 8601).
    pub created_at: String,

    /// Last modified timestamp (ISO 8601).
    pub modified_at: String,

    /// Source video (relative to the project file).
    pub input: String,

    /// Zero-based video stream index inside the input.
    #[serde(default)]
    pub track: usize,

    /// Editing decisions over input frames.
    pub timeline: Timeline,

    /// Overlay pool, in draw order.
    #[serde(default)]
    pub overlays: Vec<OverlayTemplate>,

    /// Export configuration.
    #[serde(default)]
    pub export: ExportConfig,
}

/// Export configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Output file (relative to the project file).
    pub output: String,

    /// Target frame rate; the source stream's rate when unset.
    pub fps: Option<f64>,

    /// Geometric scale applied after retiming (1.0 = unchanged).
    pub scale: f64,

    /// Encoder passed to `-c:v`.
    pub video_codec: String,

    /// Constant rate factor, when the codec supports it.
    pub crf: Option<u32>,

    /// Encoder preset, when the codec supports it.
    pub preset: Option<String>,

    /// Extra arguments appended before the output path.
    pub extra_args: Vec<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output: "output.mp4".to_string(),
            fps: None,
            scale: 1.0,
            video_codec: "libx264".to_string(),
            crf: Some(18),
            preset: Some("medium".to_string()),
            extra_args: vec![],
        }
    }
}

impl ExportConfig {
    /// Encoder arguments for the codec settings, placed after the input.
    pub fn codec_args(&self) -> Vec<String> {
        let mut args = vec!["-c:v".to_string(), self.video_codec.clone()];
        if let Some(crf) = self.crf {
            args.push("-crf".to_string());
            args.push(crf.to_string());
        }
        if let Some(preset) = &self.preset {
            args.push("-preset".to_string());
            args.push(preset.clone());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Whether a separate scaling pass is needed.
    pub fn needs_scaling(&self) -> bool {
        (self.scale - 1.0).abs() > f64::EPSILON
    }
}

/// A project loaded from disk.
#[derive(Debug, Clone)]
pub struct LoadedProject {
    /// Path of the project file.
    pub path: PathBuf,

    /// Directory that relative paths resolve against.
    pub root: PathBuf,

    /// Project contents.
    pub project: Project,
}

impl Project {
    /// Create a project that plays `total_frames` of `input` unchanged.
    pub fn new(
        name: impl Into<String>,
        input: impl Into<String>,
        total_frames: u64,
    ) -> Result<Self, ProjectError> {
        let now = chrono::Utc::now().to_rfc3339();
        let timeline = Timeline::uniform(total_frames.max(1), Speed::Rate(1.0)).map_err(|e| {
            ProjectError::ValidationError {
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            version: "1.0".to_string(),
            name: name.into(),
            created_at: now.clone(),
            modified_at: now,
            input: input.into(),
            track: 0,
            timeline,
            overlays: vec![],
            export: ExportConfig::default(),
        })
    }
}

impl LoadedProject {
    /// Load a project file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let path = path.as_ref().to_path_buf();

        let json = std::fs::read_to_string(&path).map_err(|e| ProjectError::IoError {
            path: path.clone(),
            source: e,
        })?;

        let project: Project =
            serde_json::from_str(&json).map_err(|e| ProjectError::ParseError {
                path: path.clone(),
                source: e,
            })?;

        Ok(Self {
            root: project_root(&path),
            path,
            project,
        })
    }

    /// Save the project back to its file, updating the modification time.
    pub fn save(&mut self) -> Result<(), ProjectError> {
        self.project.modified_at = chrono::Utc::now().to_rfc3339();

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ProjectError::IoError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let json =
            serde_json::to_string_pretty(&self.project).map_err(|e| ProjectError::ParseError {
                path: self.path.clone(),
                source: e,
            })?;
        std::fs::write(&self.path, json).map_err(|e| ProjectError::IoError {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Create and save a new project file.
    pub fn create(
        path: impl AsRef<Path>,
        name: impl Into<String>,
        input: impl Into<String>,
        total_frames: u64,
    ) -> Result<Self, ProjectError> {
        let path = path.as_ref().to_path_buf();
        let mut loaded = Self {
            root: project_root(&path),
            path,
            project: Project::new(name, input, total_frames)?,
        };
        loaded.save()?;
        Ok(loaded)
    }

    /// Resolve a path declared in the project file.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn input_path(&self) -> PathBuf {
        self.resolve(&self.project.input)
    }

    pub fn output_path(&self) -> PathBuf {
        self.resolve(&self.project.export.output)
    }

    /// Overlay templates with file references rewritten relative to the
    /// project root. Font sentinels such as `"default"` are left alone.
    pub fn resolved_overlays(&self) -> Vec<OverlayTemplate> {
        self.project
            .overlays
            .iter()
            .cloned()
            .map(|mut template| {
                match &mut template.kind {
                    TemplateKind::Image(image) => {
                        image.source = self.resolve(&image.source).display().to_string();
                    }
                    TemplateKind::Text(text) if text.font != "default" => {
                        text.font = self.resolve(&text.font).display().to_string();
                    }
                    _ => {}
                }
                template
            })
            .collect()
    }

    /// Validate that all referenced files exist.
    pub fn validate_sources(&self) -> Vec<String> {
        let mut errors = vec![];

        if !self.input_path().exists() {
            errors.push(format!("Input source missing: {}", self.project.input));
        }

        for (index, template) in self.project.overlays.iter().enumerate() {
            match &template.kind {
                TemplateKind::Image(image) if !self.resolve(&image.source).exists() => {
                    errors.push(format!(
                        "Overlay #{index} image missing: {}",
                        image.source
                    ));
                }
                TemplateKind::Text(text)
                    if text.font != "default" && !self.resolve(&text.font).exists() =>
                {
                    errors.push(format!("Overlay #{index} font missing: {}", text.font));
                }
                _ => {}
            }
        }

        errors
    }
}

fn project_root(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Errors that can occur when working with projects.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid project: {message}")]
    ValidationError { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::Chunk;

    #[test]
    fn test_project_creation() {
        let project = Project::new("Talk", "talk.mp4", 300).unwrap();
        assert_eq!(project.name, "Talk");
        assert_eq!(project.timeline.chunks(), &[Chunk::kept(0, 300, 1.0)]);
        assert!(!project.export.needs_scaling());
    }

    #[test]
    fn test_codec_args() {
        let mut export = ExportConfig::default();
        assert_eq!(
            export.codec_args(),
            vec!["-c:v", "libx264", "-crf", "18", "-preset", "medium"]
        );

        export.video_codec = "mpeg4".to_string();
        export.crf = None;
        export.preset = None;
        export.extra_args = vec!["-qscale:v".to_string(), "1".to_string()];
        assert_eq!(export.codec_args(), vec!["-c:v", "mpeg4", "-qscale:v", "1"]);
    }

    #[test]
    fn test_loaded_project_create_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edits").join("project.json");

        let created = LoadedProject::create(&path, "Roundtrip", "clip.mkv", 120).unwrap();
        assert_eq!(created.root, dir.path().join("edits"));

        let loaded = LoadedProject::load(&path).unwrap();
        assert_eq!(loaded.project.name, "Roundtrip");
        assert_eq!(loaded.input_path(), dir.path().join("edits").join("clip.mkv"));
        assert_eq!(loaded.project.timeline.total_input_frames(), 120);
    }

    #[test]
    fn test_load_rejects_malformed_timeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        std::fs::write(
            &path,
            r#"{"version":"1.0","name":"x","created_at":"","modified_at":"","input":"a.mp4",
                "timeline":{"chunks":[[0,10,1.0],[20,30,1.0]]}}"#,
        )
        .unwrap();

        let err = LoadedProject::load(&path).unwrap_err();
        assert!(matches!(err, ProjectError::ParseError { .. }));
        assert!(err.to_string().contains("expected 10"));
    }

    #[test]
    fn test_validate_sources_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        std::fs::write(
            &path,
            r#"{"version":"1.0","name":"x","created_at":"","modified_at":"","input":"missing.mp4",
                "timeline":{"chunks":[[0,10,1.0]]},
                "overlays":[
                    {"type":"image","dur":5,"src":"logo.png"},
                    {"type":"text","dur":5,"content":"hi"},
                    {"type":"text","dur":5,"content":"hi","font":"fonts/Inter.ttf"}
                ]}"#,
        )
        .unwrap();

        let loaded = LoadedProject::load(&path).unwrap();
        let errors = loaded.validate_sources();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("Input source missing"));
        assert!(errors[1].contains("logo.png"));
        assert!(errors[2].contains("Inter.ttf"));
    }

    #[test]
    fn test_resolved_overlays_rewrite_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut loaded =
            LoadedProject::create(dir.path().join("p.json"), "x", "in.mp4", 10).unwrap();
        loaded.project.overlays = serde_json::from_str(
            r#"[{"type":"image","dur":1,"src":"logo.png"},{"type":"text","dur":1,"content":"a"}]"#,
        )
        .unwrap();

        let overlays = loaded.resolved_overlays();
        let TemplateKind::Image(image) = &overlays[0].kind else {
            panic!("expected image");
        };
        assert_eq!(image.source, dir.path().join("logo.png").display().to_string());
        let TemplateKind::Text(text) = &overlays[1].kind else {
            panic!("expected text");
        };
        assert_eq!(text.font, "default");
    }
}
