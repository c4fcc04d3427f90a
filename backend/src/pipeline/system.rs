//! Command-line OCR tooling: `ocrmypdf` for whole documents, `tesseract` for
//! single page images and poppler's `pdftoppm` for rasterizing pages.

use crate::error::EngineError;
use crate::pipeline::engine::{OcrEngine, Rasterizer};
use crate::pipeline::input::InputKind;
use log::debug;
use common::requests::OcrOptions;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Runs a tool to completion, turning a failed spawn into `ToolMissing`.
pub(crate) fn run_tool(tool: &str, command: &mut Command) -> Result<Output, EngineError> {
    debug!("Running {:?}", command);
    command.output().map_err(|source| EngineError::ToolMissing {
        tool: tool.to_string(),
        source,
    })
}

/// Last few lines of a tool's stderr, enough for a log line or job message.
fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(3);
    let tail = lines[start..].join(" | ");
    if tail.is_empty() {
        format!("exit status {}", output.status)
    } else {
        tail
    }
}

pub struct OcrMyPdf {
    ocrmypdf: String,
    tesseract: String,
    image_dpi: u32,
}

impl OcrMyPdf {
    pub fn new(ocrmypdf: &str, tesseract: &str, image_dpi: u32) -> Self {
        OcrMyPdf {
            ocrmypdf: ocrmypdf.to_string(),
            tesseract: tesseract.to_string(),
            image_dpi,
        }
    }
}

pub(crate) fn ocrmypdf_args(
    input: &Path,
    kind: InputKind,
    output: &Path,
    options: &OcrOptions,
    image_dpi: u32,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--quiet".into(), "-l".into(), options.language_arg().into()];

    let flags = [
        (options.deskew, "--deskew"),
        (options.rotate_pages, "--rotate-pages"),
        (options.remove_background, "--remove-background"),
        (options.clean, "--clean"),
        (options.force_ocr, "--force-ocr"),
    ];
    args.extend(flags.iter().filter(|(on, _)| *on).map(|(_, flag)| OsString::from(*flag)));

    args.push("--optimize".into());
    args.push(options.optimize.to_string().into());
    args.push("--output-type".into());
    args.push(options.output_type.as_str().into());

    if let Some(title) = &options.title {
        args.push("--title".into());
        args.push(title.into());
    }
    if let Some(pages) = &options.pages {
        args.push("--pages".into());
        args.push(pages.into());
    }
    if kind.is_image() {
        args.push("--image-dpi".into());
        args.push(image_dpi.to_string().into());
    }

    args.push(input.as_os_str().to_owned());
    args.push(output.as_os_str().to_owned());
    args
}

/// Maps an `ocrmypdf` exit code (and its stderr) to an engine error.
pub(crate) fn classify_ocrmypdf_failure(code: Option<i32>, stderr: &str) -> EngineError {
    let lower = stderr.to_lowercase();
    match code {
        Some(6) => EngineError::PriorOcrFound,
        Some(2) if lower.contains("dpi") || lower.contains("resolution") => EngineError::Dpi,
        Some(2) if lower.contains("image format") => EngineError::UnsupportedImage,
        Some(2) => EngineError::InputFile(stderr.to_string()),
        Some(5) => EngineError::OutputAccess,
        Some(8) => EngineError::Encrypted,
        _ => EngineError::Tool {
            tool: "ocrmypdf".to_string(),
            detail: stderr.to_string(),
        },
    }
}

impl OcrEngine for OcrMyPdf {
    fn ocr_document(
        &self,
        input: &Path,
        kind: InputKind,
        output: &Path,
        options: &OcrOptions,
    ) -> Result<(), EngineError> {
        let out = run_tool(
            &self.ocrmypdf,
            Command::new(&self.ocrmypdf).args(ocrmypdf_args(input, kind, output, options, self.image_dpi)),
        )?;
        if out.status.success() {
            Ok(())
        } else {
            Err(classify_ocrmypdf_failure(out.status.code(), &stderr_tail(&out)))
        }
    }

    fn ocr_image(
        &self,
        image: &Path,
        output: &Path,
        options: &OcrOptions,
    ) -> Result<(), EngineError> {
        // tesseract appends ".pdf" to the output base itself.
        let base = output.with_extension("");
        let out = run_tool(
            &self.tesseract,
            Command::new(&self.tesseract)
                .arg(image)
                .arg(&base)
                .args(["-l", options.language_arg().as_str()])
                .args(["--dpi", self.image_dpi.to_string().as_str()])
                .arg("pdf"),
        )?;
        if !out.status.success() {
            return Err(EngineError::Tool {
                tool: "tesseract".to_string(),
                detail: stderr_tail(&out),
            });
        }

        let produced = base.with_extension("pdf");
        if produced != output {
            std::fs::rename(&produced, output)?;
        }
        Ok(())
    }
}

pub struct Poppler {
    pdftoppm: String,
    dpi: u32,
}

impl Poppler {
    pub fn new(pdftoppm: &str, dpi: u32) -> Self {
        Poppler {
            pdftoppm: pdftoppm.to_string(),
            dpi,
        }
    }
}

impl Rasterizer for Poppler {
    fn rasterize(&self, pdf: &Path, page: u32, out_dir: &Path) -> Result<PathBuf, EngineError> {
        let prefix = out_dir.join(format!("page-{:05}", page));
        let page_arg = page.to_string();
        let out = run_tool(
            &self.pdftoppm,
            Command::new(&self.pdftoppm)
                .args(["-png", "-singlefile", "-r", self.dpi.to_string().as_str()])
                .args(["-f", page_arg.as_str(), "-l", page_arg.as_str()])
                .arg(pdf)
                .arg(&prefix),
        )?;
        if !out.status.success() {
            return Err(EngineError::Tool {
                tool: "pdftoppm".to_string(),
                detail: stderr_tail(&out),
            });
        }

        let image = prefix.with_extension("png");
        if image.is_file() {
            Ok(image)
        } else {
            Err(EngineError::Tool {
                tool: "pdftoppm".to_string(),
                detail: format!("page {} was not rendered", page),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::requests::OutputType;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn default_options_produce_minimal_command() {
        let args = ocrmypdf_args(
            Path::new("/in.pdf"),
            InputKind::Pdf,
            Path::new("/out.pdf"),
            &OcrOptions::default(),
            300,
        );
        assert_eq!(
            strings(&args),
            vec![
                "--quiet", "-l", "eng", "--optimize", "1", "--output-type", "pdfa", "/in.pdf",
                "/out.pdf"
            ]
        );
    }

    #[test]
    fn every_option_reaches_the_command() {
        let options = OcrOptions {
            languages: vec!["eng".into(), "deu".into()],
            deskew: true,
            rotate_pages: true,
            remove_background: true,
            clean: true,
            force_ocr: true,
            optimize: 3,
            output_type: OutputType::Pdf,
            title: Some("Quarterly report".into()),
            pages: Some("1-2".into()),
        };
        let args = strings(&ocrmypdf_args(
            Path::new("/in.png"),
            InputKind::Image(image::ImageFormat::Png),
            Path::new("/out.pdf"),
            &options,
            200,
        ));
        for expected in [
            "eng+deu",
            "--deskew",
            "--rotate-pages",
            "--remove-background",
            "--clean",
            "--force-ocr",
            "3",
            "pdf",
            "Quarterly report",
            "1-2",
            "--image-dpi",
            "200",
        ] {
            assert!(args.iter().any(|a| a == expected), "missing {}", expected);
        }
        assert_eq!(args.last().map(String::as_str), Some("/out.pdf"));
    }

    #[test]
    fn exit_codes_are_classified() {
        assert!(matches!(
            classify_ocrmypdf_failure(Some(6), "page already has text"),
            EngineError::PriorOcrFound
        ));
        assert!(matches!(
            classify_ocrmypdf_failure(Some(2), "Input file is not a valid PDF"),
            EngineError::InputFile(_)
        ));
        assert!(matches!(
            classify_ocrmypdf_failure(Some(2), "Image DPI not set"),
            EngineError::Dpi
        ));
        assert!(matches!(
            classify_ocrmypdf_failure(Some(5), ""),
            EngineError::OutputAccess
        ));
        assert!(matches!(
            classify_ocrmypdf_failure(Some(8), ""),
            EngineError::Encrypted
        ));
        assert!(matches!(
            classify_ocrmypdf_failure(None, "killed"),
            EngineError::Tool { .. }
        ));
    }

    #[test]
    fn missing_binary_is_reported() {
        let result = run_tool(
            "definitely-not-installed-ocr-tool",
            &mut Command::new("definitely-not-installed-ocr-tool"),
        );
        assert!(matches!(result, Err(EngineError::ToolMissing { .. })));
    }
}
