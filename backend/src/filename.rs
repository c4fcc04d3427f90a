//! Upload names are client input. They only ever end up in the
//! `Content-Disposition` of a download, and only in sanitized form.

use common::jobs::JobId;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]").unwrap());

/// Reduces a client-supplied name to `[A-Za-z0-9_.-]`.
///
/// Path separators become word breaks, runs of whitespace become a single
/// `_`, non-ASCII characters are dropped and leading or trailing dots and
/// underscores are trimmed. May return an empty string.
pub fn sanitize(name: &str) -> String {
    let ascii: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    RE_UNSAFE
        .replace_all(&joined, "")
        .trim_matches(|c: char| c == '.' || c == '_')
        .to_string()
}

/// Sanitized upload name, or a generated one when nothing usable is left.
pub fn sanitize_or_generate(name: &str) -> String {
    let clean = sanitize(name);
    if clean.is_empty() {
        format!("upload_{}.pdf", JobId::new().simple())
    } else {
        clean
    }
}

/// Name offered for the OCR'd result: the upload's base name plus `_OCR.pdf`.
pub fn download_name(original: &str) -> String {
    let clean = sanitize_or_generate(original);
    let base = match clean.rfind('.') {
        Some(dot) if dot > 0 => &clean[..dot],
        _ => clean.as_str(),
    };
    format!("{}_OCR.pdf", base)
}
