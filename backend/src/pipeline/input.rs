//! Recognizes what was uploaded, both by name (at the gateway) and by content
//! signature (before any OCR engine is invoked).

use crate::error::PipelineError;
use image::ImageFormat;
use mime_guess::mime::{self, Mime};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const PDF_SIGNATURE: &[u8] = b"%PDF-";
const SNIFF_LEN: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    Pdf,
    Image(ImageFormat),
}

impl InputKind {
    pub fn is_image(self) -> bool {
        matches!(self, InputKind::Image(_))
    }
}

/// Classifies the first bytes of a document.
pub fn sniff(head: &[u8]) -> Option<InputKind> {
    if head.starts_with(PDF_SIGNATURE) {
        return Some(InputKind::Pdf);
    }
    match image::guess_format(head) {
        Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Tiff)) => {
            Some(InputKind::Image(format))
        }
        _ => None,
    }
}

/// Rejects empty files and files without a known signature.
pub fn inspect(path: &Path) -> Result<InputKind, PipelineError> {
    let read_err = |source| PipelineError::ReadInput {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(read_err)?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.by_ref()
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .map_err(read_err)?;

    if head.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    sniff(&head).ok_or(PipelineError::UnrecognizedFormat)
}

fn is_supported_mime(m: &Mime) -> bool {
    *m == mime::APPLICATION_PDF
        || *m == mime::IMAGE_PNG
        || *m == mime::IMAGE_JPEG
        || (m.type_() == mime::IMAGE && m.subtype().as_str() == "tiff")
}

/// Gateway-side check on the client's filename and declared media type.
///
/// A recognizable extension decides. Without one, a specific declared media
/// type decides. Anything else is let through to the signature check.
pub fn accepts_upload(filename: &str, declared: Option<&Mime>) -> bool {
    if let Some(guessed) = mime_guess::from_path(filename).first() {
        return is_supported_mime(&guessed);
    }
    match declared {
        Some(m) if *m != mime::APPLICATION_OCTET_STREAM => is_supported_mime(m),
        _ => true,
    }
}
