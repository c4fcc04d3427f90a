//! Turns one uploaded document into one searchable PDF.
//!
//! ## Workflow
//!
//! 1. **Validate**: the input must be non-empty and start with a PDF or
//!    supported image signature. Failing here is final; no engine is called.
//! 2. **Count pages**: best effort, used for progress and the job record.
//! 3. **Strategies**: each strategy in `strategies` is tried in order until
//!    one succeeds. Whole-document OCR comes first, per-page OCR second.
//! 4. **Verify**: whatever a strategy claims, the output must exist and be
//!    non-empty.
//!
//! The pipeline is blocking and is meant to run on a blocking thread. It
//! reports progress through a `ProgressSink` and never goes backwards, even
//! when a later strategy takes over from a failed one.

pub mod engine;
pub mod input;
pub mod merge;
pub mod progress;
pub mod strategy;
pub mod system;

#[cfg(test)]
pub mod testing;

use crate::error::PipelineError;
use crate::pipeline::engine::Toolchain;
use crate::pipeline::input::InputKind;
use crate::pipeline::progress::{band, Progress, ProgressSink};
use crate::pipeline::strategy::{Attempt, Outcome, PerPage, Strategy, WholeDocument};
use log::{info, warn};
use common::requests::OcrOptions;
use std::path::{Path, PathBuf};

/// What a successful run produced.
#[derive(Debug, PartialEq, Eq)]
pub struct Conversion {
    pub strategy: &'static str,
    pub pages_total: Option<u32>,
    pub pages_processed: Option<u32>,
    pub skipped_pages: Vec<u32>,
}

impl Conversion {
    /// Completion message shown to the client.
    pub fn summary(&self) -> String {
        if self.skipped_pages.is_empty() {
            return "OCR processing completed".to_string();
        }
        let skipped: Vec<String> = self.skipped_pages.iter().map(u32::to_string).collect();
        format!(
            "OCR processing completed; pages left out because OCR failed: {}",
            skipped.join(", ")
        )
    }
}

pub struct Pipeline {
    tools: Toolchain,
    scratch_dir: PathBuf,
    strategies: Vec<Box<dyn Strategy>>,
}

impl Pipeline {
    pub fn new(tools: Toolchain, scratch_dir: impl Into<PathBuf>) -> Self {
        Pipeline {
            tools,
            scratch_dir: scratch_dir.into(),
            strategies: vec![Box::new(WholeDocument), Box::new(PerPage)],
        }
    }

    fn count_pages(&self, input: &Path, kind: InputKind, label: &str) -> Option<u32> {
        if kind.is_image() {
            return Some(1);
        }
        match self.tools.inspector.page_count(input) {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("[{}] Could not count pages: {}", label, e);
                None
            }
        }
    }

    /// Converts `input` into `output`. `label` only tags log lines.
    pub fn run(
        &self,
        input: &Path,
        output: &Path,
        options: &OcrOptions,
        sink: &dyn ProgressSink,
        label: &str,
    ) -> Result<Conversion, PipelineError> {
        let mut progress = Progress::new(sink);

        let kind = input::inspect(input)?;
        progress.step(band::VALIDATED, "Input validated");

        let pages_total = self.count_pages(input, kind, label);
        progress.pages(
            band::PAGES_COUNTED,
            match pages_total {
                Some(n) => format!("Document has {} page(s)", n),
                None => "Page count unknown".to_string(),
            },
            pages_total,
            None,
        );

        let attempt = Attempt {
            tools: &self.tools,
            input,
            kind,
            output,
            options,
            pages_total,
            scratch_dir: &self.scratch_dir,
            label,
        };

        let mut failures = Vec::new();
        let mut rejection = None;
        let mut converted = None;
        for strategy in &self.strategies {
            match strategy.run(&attempt, &mut progress) {
                Outcome::Succeeded(done) => {
                    info!("[{}] {} strategy succeeded", label, strategy.name());
                    converted = Some((strategy.name(), done));
                    break;
                }
                Outcome::Failed(reason) => {
                    warn!("[{}] {} strategy failed: {}", label, strategy.name(), reason);
                    failures.push(format!("{}: {}", strategy.name(), reason));
                }
                Outcome::Rejected(err) => {
                    warn!("[{}] {} strategy rejected the input: {}", label, strategy.name(), err);
                    failures.push(format!("{}: {}", strategy.name(), err));
                    if rejection.is_none() {
                        rejection = Some(err);
                    }
                }
                Outcome::Aborted(err) => return Err(err),
            }
        }

        let Some((strategy, done)) = converted else {
            return Err(match rejection {
                Some(err) => PipelineError::Rejected(err),
                None => PipelineError::StrategiesExhausted(failures.join("; ")),
            });
        };

        progress.step(band::VERIFYING, "Verifying output");
        match std::fs::metadata(output) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            _ => return Err(PipelineError::NoOutput),
        }

        Ok(Conversion {
            strategy,
            pages_total,
            pages_processed: done.pages_processed,
            skipped_pages: done.skipped_pages,
        })
    }
}
