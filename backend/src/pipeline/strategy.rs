//! The ways the pipeline knows how to OCR a document, tried in order.

use crate::error::{EngineError, PipelineError};
use crate::pipeline::engine::Toolchain;
use crate::pipeline::input::InputKind;
use crate::pipeline::progress::{band, within_band, Progress};
use log::{info, warn};
use common::requests::OcrOptions;
use std::path::{Path, PathBuf};

/// Everything a strategy needs to know about the conversion at hand.
pub struct Attempt<'a> {
    pub tools: &'a Toolchain,
    pub input: &'a Path,
    pub kind: InputKind,
    pub output: &'a Path,
    pub options: &'a OcrOptions,
    pub pages_total: Option<u32>,
    pub scratch_dir: &'a Path,
    pub label: &'a str,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Converted {
    pub pages_processed: Option<u32>,
    /// 1-based page numbers that could not be recognized and were left out.
    pub skipped_pages: Vec<u32>,
}

/// Result of one strategy.
#[derive(Debug)]
pub enum Outcome {
    Succeeded(Converted),
    /// The strategy could not produce output; the next one may.
    Failed(String),
    /// The engine judged the input unusable. Later strategies still run;
    /// if none succeeds this is what the caller is told.
    Rejected(EngineError),
    /// Nothing later in the list can do better.
    Aborted(PipelineError),
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, attempt: &Attempt<'_>, progress: &mut Progress<'_>) -> Outcome;
}

/// OCR the whole input in one engine call, retrying once with forced
/// re-OCR when the document already carries a text layer.
pub struct WholeDocument;

impl Strategy for WholeDocument {
    fn name(&self) -> &'static str {
        "whole-document"
    }

    fn run(&self, attempt: &Attempt<'_>, progress: &mut Progress<'_>) -> Outcome {
        progress.step(band::WHOLE_DOCUMENT, "Running OCR on the whole document");

        let ocr = |options: &OcrOptions| {
            attempt
                .tools
                .ocr
                .ocr_document(attempt.input, attempt.kind, attempt.output, options)
        };

        let result = match ocr(attempt.options) {
            Err(EngineError::PriorOcrFound) if !attempt.options.force_ocr => {
                info!(
                    "[{}] Prior OCR found, retrying with force_ocr=true",
                    attempt.label
                );
                progress.step(band::FORCED_RETRY, "Document already has text, re-running OCR");
                let forced = OcrOptions {
                    force_ocr: true,
                    ..attempt.options.clone()
                };
                ocr(&forced)
            }
            other => other,
        };

        match result {
            Ok(()) => Outcome::Succeeded(Converted {
                pages_processed: attempt.pages_total,
                skipped_pages: Vec::new(),
            }),
            Err(e) if e.is_input_problem() => Outcome::Rejected(e),
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }
}

/// Rasterize and OCR one page at a time, skipping pages that fail, then
/// merge whatever was recognized.
pub struct PerPage;

const NO_PAGES_RECOVERED: &str = "OCR failed on every page; nothing to merge";

impl PerPage {
    fn page_count(&self, attempt: &Attempt<'_>) -> Result<u32, String> {
        if attempt.kind.is_image() {
            return Ok(1);
        }
        match attempt.pages_total {
            Some(count) => Ok(count),
            None => attempt
                .tools
                .inspector
                .page_count(attempt.input)
                .map_err(|e| format!("could not count pages: {}", e)),
        }
    }

    fn ocr_page(&self, attempt: &Attempt<'_>, page: u32, work: &Path) -> Result<PathBuf, EngineError> {
        let image = match attempt.kind {
            InputKind::Image(_) => attempt.input.to_path_buf(),
            InputKind::Pdf => attempt.tools.rasterizer.rasterize(attempt.input, page, work)?,
        };
        let page_pdf = work.join(format!("page-{:05}.pdf", page));
        attempt
            .tools
            .ocr
            .ocr_image(&image, &page_pdf, attempt.options)?;

        if attempt.kind == InputKind::Pdf {
            // Rendered pages are large; drop each one as soon as it is read.
            let _ = std::fs::remove_file(&image);
        }

        match std::fs::metadata(&page_pdf) {
            Ok(meta) if meta.len() > 0 => Ok(page_pdf),
            _ => Err(EngineError::Tool {
                tool: "tesseract".to_string(),
                detail: format!("no output for page {}", page),
            }),
        }
    }
}

impl Strategy for PerPage {
    fn name(&self) -> &'static str {
        "per-page"
    }

    fn run(&self, attempt: &Attempt<'_>, progress: &mut Progress<'_>) -> Outcome {
        let total = match self.page_count(attempt) {
            Ok(0) => return Outcome::Failed("document has no pages".to_string()),
            Ok(total) => total,
            Err(e) => return Outcome::Failed(e),
        };

        let work = match tempfile::Builder::new()
            .prefix("pages-")
            .tempdir_in(attempt.scratch_dir)
        {
            Ok(dir) => dir,
            Err(e) => return Outcome::Aborted(PipelineError::Io(e)),
        };

        let mut recognized = Vec::new();
        let mut skipped = Vec::new();
        for page in 1..=total {
            progress.pages(
                within_band(band::PER_PAGE_START, band::PER_PAGE_END, page - 1, total),
                format!("Processing page {} of {}", page, total),
                Some(total),
                Some(recognized.len() as u32),
            );

            match self.ocr_page(attempt, page, work.path()) {
                Ok(page_pdf) => recognized.push(page_pdf),
                Err(e) => {
                    warn!("[{}] Skipping page {}: {}", attempt.label, page, e);
                    skipped.push(page);
                }
            }

            progress.pages(
                within_band(band::PER_PAGE_START, band::PER_PAGE_END, page, total),
                format!("Finished page {} of {}", page, total),
                Some(total),
                Some(recognized.len() as u32),
            );
        }

        if recognized.is_empty() {
            return Outcome::Failed(NO_PAGES_RECOVERED.to_string());
        }

        progress.step(
            band::MERGING,
            format!("Merging {} recognized pages", recognized.len()),
        );
        if let Err(e) = attempt.tools.merger.merge(&recognized, attempt.output) {
            return Outcome::Failed(format!("merging pages failed: {}", e));
        }

        Outcome::Succeeded(Converted {
            pages_processed: Some(recognized.len() as u32),
            skipped_pages: skipped,
        })
    }
}
