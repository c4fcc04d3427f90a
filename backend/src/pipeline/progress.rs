//! Progress reporting out of the (blocking) conversion pipeline.

#[cfg(test)]
use std::sync::Mutex;

/// Percentages at which the pipeline reports each step. The per-page band
/// sits above everything the whole-document strategy reports, so falling
/// back never makes the bar jump backwards.
pub mod band {
    pub const VALIDATED: u8 = 5;
    pub const PAGES_COUNTED: u8 = 8;
    pub const WHOLE_DOCUMENT: u8 = 10;
    pub const FORCED_RETRY: u8 = 25;
    pub const PER_PAGE_START: u8 = 30;
    pub const PER_PAGE_END: u8 = 90;
    pub const MERGING: u8 = 92;
    pub const VERIFYING: u8 = 95;
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub message: String,
    pub pages_total: Option<u32>,
    pub pages_processed: Option<u32>,
}

/// Receives progress updates, typically forwarding them to the job store.
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Sink that keeps every update, for inspection.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingProgress {
    updates: Mutex<Vec<ProgressUpdate>>,
}

#[cfg(test)]
impl RecordingProgress {
    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates
            .lock()
            .map(|updates| updates.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
impl ProgressSink for RecordingProgress {
    fn report(&self, update: ProgressUpdate) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.push(update);
        }
    }
}

/// Wraps a sink and guarantees the percentages it forwards never decrease.
pub struct Progress<'a> {
    sink: &'a dyn ProgressSink,
    last: u8,
}

impl<'a> Progress<'a> {
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        Progress { sink, last: 0 }
    }

    pub fn step(&mut self, percent: u8, message: impl Into<String>) {
        self.pages(percent, message, None, None);
    }

    pub fn pages(
        &mut self,
        percent: u8,
        message: impl Into<String>,
        pages_total: Option<u32>,
        pages_processed: Option<u32>,
    ) {
        self.last = self.last.max(percent.min(100));
        self.sink.report(ProgressUpdate {
            percent: self.last,
            message: message.into(),
            pages_total,
            pages_processed,
        });
    }
}

/// Position of `done` out of `total` inside `[start, end]`.
pub fn within_band(start: u8, end: u8, done: u32, total: u32) -> u8 {
    if total == 0 || end <= start {
        return start;
    }
    let span = u32::from(end - start);
    let offset = span * done.min(total) / total;
    start + offset as u8
}
