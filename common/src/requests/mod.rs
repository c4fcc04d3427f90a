use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Output flavour produced by the whole-document OCR engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    Pdf,
    #[default]
    Pdfa,
}

impl OutputType {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputType::Pdf => "pdf",
            OutputType::Pdfa => "pdfa",
        }
    }
}

/// OCR settings sent alongside the uploaded file.
///
/// Every field is optional on the wire; `from_form` fills the gaps the same
/// way the upload form does (`eng`, optimize level 1, PDF/A output).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrOptions {
    pub languages: Vec<String>,
    pub deskew: bool,
    pub rotate_pages: bool,
    pub remove_background: bool,
    pub clean: bool,
    pub force_ocr: bool,
    pub optimize: u8,
    pub output_type: OutputType,
    pub title: Option<String>,
    pub pages: Option<String>,
}

impl Default for OcrOptions {
    fn default() -> Self {
        OcrOptions {
            languages: vec!["eng".to_string()],
            deskew: false,
            rotate_pages: false,
            remove_background: false,
            clean: false,
            force_ocr: false,
            optimize: 1,
            output_type: OutputType::Pdfa,
            title: None,
            pages: None,
        }
    }
}

impl OcrOptions {
    /// Builds options from the text fields of a multipart form.
    ///
    /// Booleans are only set by the literal string `true`. An unparsable
    /// `optimize` falls back to 1 and an unknown `output_type` is ignored.
    pub fn from_form(fields: &HashMap<String, String>, default_languages: &[String]) -> Self {
        let field = |name: &str| fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());
        let flag = |name: &str| field(name) == Some("true");

        let languages: Vec<String> = field("languages")
            .map(|langs| {
                langs
                    .split('+')
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .filter(|langs: &Vec<String>| !langs.is_empty())
            .unwrap_or_else(|| default_languages.to_vec());

        let output_type = match field("output_type") {
            Some("pdf") => OutputType::Pdf,
            _ => OutputType::Pdfa,
        };

        OcrOptions {
            languages,
            deskew: flag("deskew"),
            rotate_pages: flag("rotate_pages"),
            remove_background: flag("remove_background"),
            clean: flag("clean"),
            force_ocr: flag("force_ocr"),
            optimize: field("optimize").and_then(|v| v.parse().ok()).unwrap_or(1),
            output_type,
            title: field("title").map(str::to_string),
            pages: field("pages").map(str::to_string),
        }
    }

    /// Languages joined the way OCR engines expect them (`eng+deu`).
    pub fn language_arg(&self) -> String {
        if self.languages.is_empty() {
            "eng".to_string()
        } else {
            self.languages.join("+")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_form_uses_defaults() {
        let opts = OcrOptions::from_form(&HashMap::new(), &["eng".to_string()]);
        assert_eq!(opts, OcrOptions::default());
    }

    #[test]
    fn languages_split_on_plus() {
        let opts = OcrOptions::from_form(&form(&[("languages", "eng+deu+ fra")]), &[]);
        assert_eq!(opts.languages, vec!["eng", "deu", "fra"]);
        assert_eq!(opts.language_arg(), "eng+deu+fra");
    }

    #[test]
    fn flags_require_literal_true() {
        let opts = OcrOptions::from_form(
            &form(&[("deskew", "true"), ("clean", "on"), ("force_ocr", "true")]),
            &["eng".to_string()],
        );
        assert!(opts.deskew);
        assert!(!opts.clean);
        assert!(opts.force_ocr);
        assert!(!opts.rotate_pages);
    }

    #[test]
    fn bad_optimize_and_output_type_fall_back() {
        let opts = OcrOptions::from_form(
            &form(&[("optimize", "max"), ("output_type", "tiff")]),
            &["eng".to_string()],
        );
        assert_eq!(opts.optimize, 1);
        assert_eq!(opts.output_type, OutputType::Pdfa);

        let opts = OcrOptions::from_form(
            &form(&[("optimize", "3"), ("output_type", "pdf")]),
            &["eng".to_string()],
        );
        assert_eq!(opts.optimize, 3);
        assert_eq!(opts.output_type, OutputType::Pdf);
    }

    #[test]
    fn blank_title_and_pages_are_dropped() {
        let opts = OcrOptions::from_form(
            &form(&[("title", "   "), ("pages", "1-3")]),
            &["eng".to_string()],
        );
        assert_eq!(opts.title, None);
        assert_eq!(opts.pages.as_deref(), Some("1-3"));
    }
}
