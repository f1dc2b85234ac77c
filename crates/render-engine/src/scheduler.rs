//! Frame retiming scheduler.
//!
//! For every decoded frame the scheduler decides how many times to emit it
//! (zero or more), and whether to skip the rest of a deleted span by seeking.
//! Variable speed is handled with a pair of counters: each input frame adds
//! `1 / speed` to an input-equivalent accumulator, and a frame is emitted
//! while that accumulator is ahead of the number of frames already written.
//! Output length therefore tracks the exact fractional total without drift.

use std::borrow::Cow;
use std::collections::VecDeque;

use cutline_common::error::{CutlineError, CutlineResult};
use cutline_project_model::{Chunk, Speed, Timeline};
use tracing::{debug, info};

use crate::compositor::Compositor;
use crate::frame::{PixelFormat, VideoFrame};
use crate::progress::ProgressReporter;
use crate::sink::EncoderSink;
use crate::source::FrameSource;

/// Assumed maximum keyframe distance when none is configured.
pub const DEFAULT_KEYFRAME_INTERVAL_SECS: f64 = 5.0;

/// No seek is issued before this input frame.
const INITIAL_SEEK_GUARD: u64 = 10;

/// Progress is reported on every third input frame.
const PROGRESS_STRIDE: u64 = 3;

/// What to do with one decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    /// Every playable chunk is exhausted.
    Stop,
    /// Emit the frame `emit` times, then optionally seek to `seek_to`.
    Process { emit: u64, seek_to: Option<u64> },
}

/// Per-pass retiming state, advanced once per decoded frame.
#[derive(Debug, Clone)]
pub struct RenderState {
    pending: VecDeque<Chunk>,
    current: Option<Chunk>,
    input_equivalent: f64,
    output_equivalent: u64,
    next_seek_allowed: u64,
    frames_saved: u64,
    seek_origin: Option<u64>,
    seeks: u64,
    seek_cost: u64,
}

impl RenderState {
    /// `seek_cost` is `floor(fps * keyframe_interval_secs)`: deleted spans
    /// shorter than this are decoded through.
    pub fn new(timeline: &Timeline, fps: f64, keyframe_interval_secs: f64) -> Self {
        let mut pending: VecDeque<Chunk> = timeline.playback_chunks().into();
        let current = pending.pop_front();
        Self {
            pending,
            current,
            input_equivalent: 0.0,
            output_equivalent: 0,
            next_seek_allowed: INITIAL_SEEK_GUARD,
            frames_saved: 0,
            seek_origin: None,
            seeks: 0,
            seek_cost: (fps * keyframe_interval_secs).floor().max(0.0) as u64,
        }
    }

    pub fn seek_cost(&self) -> u64 {
        self.seek_cost
    }

    /// Frames written so far.
    pub fn frames_emitted(&self) -> u64 {
        self.output_equivalent
    }

    /// Input frames skipped by seeking instead of decoding.
    pub fn frames_saved(&self) -> u64 {
        self.frames_saved
    }

    pub fn seeks(&self) -> u64 {
        self.seeks
    }

    /// Decide what to do with the decoded frame at input `index`.
    pub fn advance(&mut self, index: u64) -> FrameAction {
        if let Some(origin) = self.seek_origin.take() {
            let skipped = index.saturating_sub(origin);
            self.frames_saved += skipped;
            debug!(from = origin, landed = index, skipped, "Seek completed");
        }

        let chunk = loop {
            match self.current {
                Some(chunk) if index >= chunk.end => self.current = self.pending.pop_front(),
                Some(chunk) => break chunk,
                None => return FrameAction::Stop,
            }
        };

        let mut seek_to = None;
        match chunk.speed {
            Speed::Delete => {
                let remaining = chunk.end.saturating_sub(index);
                if remaining > self.seek_cost && index > self.next_seek_allowed {
                    seek_to = Some(chunk.end);
                    self.next_seek_allowed = index + self.seek_cost / 2;
                    self.seek_origin = Some(index);
                    self.seeks += 1;
                    debug!(from = index, to = chunk.end, remaining, "Seeking past deleted span");
                }
            }
            speed => self.input_equivalent += speed.output_weight(),
        }

        let mut emit = 0;
        while self.input_equivalent > self.output_equivalent as f64 {
            self.output_equivalent += 1;
            emit += 1;
        }

        FrameAction::Process { emit, seek_to }
    }
}

/// Counters for a finished pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub frames_read: u64,
    pub frames_emitted: u64,
    pub frames_saved_by_seeking: u64,
    pub seeks: u64,
}

enum PassFailure {
    /// The sink rejected a write; its diagnostics explain why.
    Sink(std::io::Error),
    Fatal(CutlineError),
}

impl From<CutlineError> for PassFailure {
    fn from(err: CutlineError) -> Self {
        PassFailure::Fatal(err)
    }
}

/// Drives one streaming pass: source → retime → composite → sink.
pub struct FrameScheduler<'a> {
    fps: f64,
    keyframe_interval_secs: f64,
    target_format: PixelFormat,
    compositor: Compositor<'a>,
}

impl<'a> FrameScheduler<'a> {
    pub fn new(fps: f64, target_format: PixelFormat, compositor: Compositor<'a>) -> Self {
        Self {
            fps,
            keyframe_interval_secs: DEFAULT_KEYFRAME_INTERVAL_SECS,
            target_format,
            compositor,
        }
    }

    pub fn with_keyframe_interval(mut self, secs: f64) -> Self {
        self.keyframe_interval_secs = secs;
        self
    }

    /// Stream every frame of `source` through the timeline into `sink`.
    ///
    /// On a sink failure the pass stops at once, the sink is closed and
    /// waited on, and its diagnostics are returned in the error.
    pub fn run(
        &self,
        timeline: &Timeline,
        source: &mut dyn FrameSource,
        sink: &mut dyn EncoderSink,
        progress: &mut dyn ProgressReporter,
    ) -> CutlineResult<ScheduleSummary> {
        let mut state = RenderState::new(timeline, self.fps, self.keyframe_interval_secs);
        info!(
            target_format = %self.target_format,
            fps = self.fps,
            seek_cost = state.seek_cost(),
            chunks = timeline.chunks().len(),
            "Starting render pass"
        );

        progress.start(timeline.kept_end(), "Creating new video");
        let result = self.stream(&mut state, source, sink, progress);
        if result.is_ok() {
            progress.tick(timeline.kept_end());
        }
        progress.end();

        match result {
            Ok(frames_read) => {
                sink.finish()?;
                let summary = ScheduleSummary {
                    frames_read,
                    frames_emitted: state.frames_emitted(),
                    frames_saved_by_seeking: state.frames_saved(),
                    seeks: state.seeks(),
                };
                info!(
                    frames_read = summary.frames_read,
                    frames_emitted = summary.frames_emitted,
                    frames_saved = summary.frames_saved_by_seeking,
                    seeks = summary.seeks,
                    "Render pass finished"
                );
                Ok(summary)
            }
            Err(PassFailure::Sink(err)) => {
                let diagnostics = sink.abort();
                Err(CutlineError::encode(
                    format!("failed writing frame to encoder: {err}"),
                    diagnostics,
                ))
            }
            Err(PassFailure::Fatal(err)) => {
                let diagnostics = sink.abort();
                if !diagnostics.is_empty() {
                    debug!(diagnostics = %diagnostics, "Encoder output after aborted pass");
                }
                Err(err)
            }
        }
    }

    fn stream(
        &self,
        state: &mut RenderState,
        source: &mut dyn FrameSource,
        sink: &mut dyn EncoderSink,
        progress: &mut dyn ProgressReporter,
    ) -> Result<u64, PassFailure> {
        let mut frames_read = 0u64;
        let mut last_tick = 0u64;

        while let Some(frame) = source.next_frame()? {
            frames_read += 1;
            let index = (frame.presentation_time * self.fps).max(0.0).floor() as u64;
            if frame.key_frame {
                debug!(index, pts = frame.presentation_time, "Keyframe");
            }

            let (emit, seek_to) = match state.advance(index) {
                FrameAction::Stop => {
                    debug!(index, "Timeline exhausted");
                    break;
                }
                FrameAction::Process { emit, seek_to } => (emit, seek_to),
            };

            if emit > 0 {
                let output = self.prepare(&frame, index)?;
                for _ in 0..emit {
                    sink.write_frame(output.as_bytes()).map_err(PassFailure::Sink)?;
                }
            }

            if let Some(target) = seek_to {
                source.seek(target)?;
            }

            if index % PROGRESS_STRIDE == 0 && index >= last_tick {
                last_tick = index;
                progress.tick(index);
            }
        }

        Ok(frames_read)
    }

    /// Composite at most once per input frame; repeated emissions reuse the
    /// same bytes.
    fn prepare<'f>(&self, frame: &'f VideoFrame, index: u64) -> CutlineResult<Cow<'f, VideoFrame>> {
        if self.compositor.has_overlays(index) {
            return self
                .compositor
                .composite(frame, index, &self.target_format)
                .map(Cow::Owned);
        }
        if frame.format != self.target_format {
            return frame.reformat(&self.target_format).map(Cow::Owned);
        }
        Ok(Cow::Borrowed(frame))
    }
}
