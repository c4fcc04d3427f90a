//! Seams to the external OCR and PDF tooling.
//!
//! The pipeline only orchestrates; recognition, rasterization, page counting
//! and merging are done by whatever implements these traits. Production uses
//! the command-line tools wired up in `Toolchain::system`.

use crate::config::ToolsConfig;
use crate::error::EngineError;
use crate::pipeline::input::InputKind;
use crate::pipeline::merge::Lopdf;
use crate::pipeline::system::{OcrMyPdf, Poppler};
use common::requests::OcrOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub trait OcrEngine: Send + Sync {
    /// OCRs a whole document (PDF or image) into a searchable PDF at `output`.
    fn ocr_document(
        &self,
        input: &Path,
        kind: InputKind,
        output: &Path,
        options: &OcrOptions,
    ) -> Result<(), EngineError>;

    /// OCRs a single page image into a one-page searchable PDF at `output`.
    fn ocr_image(&self, image: &Path, output: &Path, options: &OcrOptions)
        -> Result<(), EngineError>;
}

pub trait Rasterizer: Send + Sync {
    /// Renders 1-based `page` of `pdf` to an image inside `out_dir`.
    fn rasterize(&self, pdf: &Path, page: u32, out_dir: &Path) -> Result<PathBuf, EngineError>;
}

pub trait PageInspector: Send + Sync {
    fn page_count(&self, pdf: &Path) -> Result<u32, EngineError>;
}

pub trait Merger: Send + Sync {
    /// Concatenates `pages` (in order) into one PDF at `output`.
    fn merge(&self, pages: &[PathBuf], output: &Path) -> Result<(), EngineError>;
}

#[derive(Clone)]
pub struct Toolchain {
    pub ocr: Arc<dyn OcrEngine>,
    pub rasterizer: Arc<dyn Rasterizer>,
    pub inspector: Arc<dyn PageInspector>,
    pub merger: Arc<dyn Merger>,
}

impl Toolchain {
    pub fn system(tools: &ToolsConfig) -> Self {
        let lopdf = Arc::new(Lopdf::new(&tools.pdfinfo));
        Toolchain {
            ocr: Arc::new(OcrMyPdf::new(&tools.ocrmypdf, &tools.tesseract, tools.raster_dpi)),
            rasterizer: Arc::new(Poppler::new(&tools.pdftoppm, tools.raster_dpi)),
            inspector: lopdf.clone(),
            merger: lopdf,
        }
    }
}
