//! Scripted stand-ins for the OCR and PDF tools.
//!
//! Outputs are plain files that start with a PDF signature and carry the
//! text of whatever went in, so tests can check page order in a merge by
//! reading the result back.

use crate::error::EngineError;
use crate::pipeline::engine::{Merger, OcrEngine, PageInspector, Rasterizer, Toolchain};
use crate::pipeline::input::InputKind;
use common::requests::OcrOptions;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PDF_BYTES: &[u8] = b"%PDF-1.7\n% scanned input\n";
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR page 1";

#[derive(Default)]
pub struct FakeTools {
    pages: u32,
    document_errors: Mutex<VecDeque<EngineError>>,
    failing_pages: Vec<u32>,
    empty_output: bool,
    panics: bool,
    delay: Duration,
    calls: Mutex<Vec<String>>,
}

impl FakeTools {
    pub fn with_pages(pages: u32) -> Self {
        FakeTools {
            pages,
            ..Default::default()
        }
    }

    /// The next whole-document call fails with `err`. Can be stacked.
    pub fn failing_document(self, err: EngineError) -> Self {
        self.document_errors.lock().unwrap().push_back(err);
        self
    }

    pub fn failing_page(mut self, page: u32) -> Self {
        self.failing_pages.push(page);
        self
    }

    pub fn with_empty_output(mut self) -> Self {
        self.empty_output = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    /// Every whole-document call sleeps this long first.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn toolchain(tools: &Arc<FakeTools>) -> Toolchain {
        Toolchain {
            ocr: tools.clone(),
            rasterizer: tools.clone(),
            inspector: tools.clone(),
            merger: tools.clone(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl OcrEngine for FakeTools {
    fn ocr_document(
        &self,
        input: &Path,
        _kind: InputKind,
        output: &Path,
        options: &OcrOptions,
    ) -> Result<(), EngineError> {
        self.record(format!("document force_ocr={}", options.force_ocr));
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.panics {
            panic!("simulated engine crash");
        }
        if let Some(err) = self.document_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        if self.empty_output {
            std::fs::write(output, b"")?;
        } else {
            let mut body = b"%PDF-1.7\n% ocr of ".to_vec();
            body.extend(input.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default().bytes());
            std::fs::write(output, body)?;
        }
        Ok(())
    }

    fn ocr_image(&self, image: &Path, output: &Path, _options: &OcrOptions) -> Result<(), EngineError> {
        let name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.record(format!("image {}", name));
        let mut body = b"%PDF-1.7\n".to_vec();
        body.extend(std::fs::read(image)?);
        body.push(b'\n');
        std::fs::write(output, body)?;
        Ok(())
    }
}

impl Rasterizer for FakeTools {
    fn rasterize(&self, _pdf: &Path, page: u32, out_dir: &Path) -> Result<PathBuf, EngineError> {
        self.record(format!("rasterize {}", page));
        if self.failing_pages.contains(&page) {
            return Err(EngineError::Tool {
                tool: "pdftoppm".into(),
                detail: format!("cannot render page {}", page),
            });
        }
        let image = out_dir.join(format!("render-{}.png", page));
        std::fs::write(&image, format!("page {}", page))?;
        Ok(image)
    }
}

impl PageInspector for FakeTools {
    fn page_count(&self, _pdf: &Path) -> Result<u32, EngineError> {
        self.record("page_count".to_string());
        Ok(self.pages)
    }
}

impl Merger for FakeTools {
    fn merge(&self, pages: &[PathBuf], output: &Path) -> Result<(), EngineError> {
        self.record(format!("merge {}", pages.len()));
        let mut body = Vec::new();
        for page in pages {
            body.extend(std::fs::read(page)?);
        }
        std::fs::write(output, body)?;
        Ok(())
    }
}
