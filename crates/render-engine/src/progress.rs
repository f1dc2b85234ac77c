//! Render progress reporting.

/// Receives progress for one render pass.
///
/// `tick` values are input frame indices and never decrease within a pass.
pub trait ProgressReporter {
    fn start(&mut self, total: u64, title: &str);
    fn tick(&mut self, current: u64);
    fn end(&mut self);
}

/// Discards all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn start(&mut self, _total: u64, _title: &str) {}
    fn tick(&mut self, _current: u64) {}
    fn end(&mut self) {}
}

/// A progress event forwarded to a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started { total: u64, title: String },
    Advanced { current: u64, total: u64 },
    Finished,
}

/// Forwards progress to a closure, e.g. to feed a UI channel.
pub struct CallbackProgress<F: FnMut(ProgressEvent)> {
    callback: F,
    total: u64,
}

impl<F: FnMut(ProgressEvent)> CallbackProgress<F> {
    pub fn new(callback: F) -> Self {
        Self { callback, total: 0 }
    }
}

impl<F: FnMut(ProgressEvent)> ProgressReporter for CallbackProgress<F> {
    fn start(&mut self, total: u64, title: &str) {
        self.total = total;
        (self.callback)(ProgressEvent::Started {
            total,
            title: title.to_string(),
        });
    }

    fn tick(&mut self, current: u64) {
        (self.callback)(ProgressEvent::Advanced {
            current: current.min(self.total),
            total: self.total,
        });
    }

    fn end(&mut self) {
        (self.callback)(ProgressEvent::Finished);
    }
}
