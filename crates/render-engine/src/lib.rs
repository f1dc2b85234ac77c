//! Cutline Render Engine
//!
//! Streams a source video through a retiming timeline, burns scheduled
//! overlays into the frames that survive, and pipes the result to an
//! encoder.
//!
//! # Pipeline Architecture
//!
//! ```text
//! input.mp4 ── ffprobe ── canvas, packets
//!     │                         │
//!     ▼                         ▼
//! ffmpeg decode ──► FrameScheduler ◄── Timeline (keep / speed / delete)
//!  (rawvideo)          │      ▲
//!                      │      └── seek past long deletions
//!                      ▼
//!                 Compositor ◄── Sheet ◄── overlay templates
//!                      │
//!                      ▼
//!              ffmpeg encode (stdin)
//!                      │
//!                      ▼
//!           optional scale pass ──► output.mp4 + output.render.json
//! ```

pub mod assets;
pub mod compositor;
pub mod export;
pub mod font;
pub mod frame;
pub mod probe;
pub mod progress;
pub mod scale;
pub mod scheduler;
pub mod sheet;
pub mod sink;
pub mod source;

pub use compositor::{BoundingBox, Compositor};
pub use export::*;
pub use frame::{PixelFormat, VideoFrame};
pub use progress::{CallbackProgress, NoProgress, ProgressEvent, ProgressReporter};
pub use scheduler::{FrameAction, FrameScheduler, RenderState, ScheduleSummary};
pub use sheet::Sheet;
pub use sink::{EncoderSettings, EncoderSink, FfmpegEncoderSink};
pub use source::{FfmpegFrameSource, FrameSource, SourceSettings};
