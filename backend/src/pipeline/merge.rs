//! PDF structure work done in-process with `lopdf`: counting pages and
//! stitching per-page OCR results back into one document.

use crate::error::EngineError;
use crate::pipeline::engine::{Merger, PageInspector};
use crate::pipeline::system::run_tool;
use log::warn;
use lopdf::{dictionary, Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

pub struct Lopdf {
    pdfinfo: String,
}

impl Lopdf {
    pub fn new(pdfinfo: &str) -> Self {
        Lopdf {
            pdfinfo: pdfinfo.to_string(),
        }
    }

    /// Page count via poppler's `pdfinfo`, for files lopdf can't parse.
    fn pdfinfo_page_count(&self, pdf: &Path) -> Result<u32, EngineError> {
        let out = run_tool(&self.pdfinfo, Command::new(&self.pdfinfo).arg(pdf))?;
        if !out.status.success() {
            return Err(EngineError::Tool {
                tool: "pdfinfo".to_string(),
                detail: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        parse_pdfinfo_pages(&String::from_utf8_lossy(&out.stdout)).ok_or_else(|| {
            EngineError::Tool {
                tool: "pdfinfo".to_string(),
                detail: "no page count in output".to_string(),
            }
        })
    }
}

fn parse_pdfinfo_pages(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|count| count.trim().parse().ok())
}

impl PageInspector for Lopdf {
    fn page_count(&self, pdf: &Path) -> Result<u32, EngineError> {
        match Document::load(pdf) {
            Ok(doc) => Ok(doc.get_pages().len() as u32),
            Err(e) => {
                warn!(
                    "lopdf failed to parse {}: {}. Falling back to pdfinfo.",
                    pdf.display(),
                    e
                );
                self.pdfinfo_page_count(pdf)
            }
        }
    }
}

impl Merger for Lopdf {
    fn merge(&self, pages: &[PathBuf], output: &Path) -> Result<(), EngineError> {
        let documents = pages
            .iter()
            .map(Document::load)
            .collect::<Result<Vec<_>, _>>()?;
        let mut merged = merge_documents(documents)?;
        merged.save(output)?;
        Ok(())
    }
}

/// Concatenates the pages of `documents`, keeping document order and each
/// document's own page order.
pub fn merge_documents(documents: Vec<Document>) -> Result<Document, EngineError> {
    let mut next_id = 1;
    let mut page_ids: Vec<ObjectId> = Vec::new();
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for mut doc in documents {
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;
        page_ids.extend(doc.get_pages().into_values());
        objects.extend(doc.objects);
    }

    if page_ids.is_empty() {
        return Err(EngineError::Tool {
            tool: "merge".to_string(),
            detail: "no pages to merge".to_string(),
        });
    }

    let mut merged = Document::with_version("1.5");
    let pages_id: ObjectId = (next_id, 0);
    let catalog_id: ObjectId = (next_id + 1, 0);

    // The old page trees and catalogs are replaced by a single new one.
    for (id, object) in objects {
        match object.type_name().unwrap_or(b"") {
            b"Catalog" | b"Pages" | b"Outlines" | b"Outline" => {}
            _ => {
                merged.objects.insert(id, object);
            }
        }
    }

    for id in &page_ids {
        if let Ok(page) = merged.get_object_mut(*id).and_then(Object::as_dict_mut) {
            page.set("Parent", pages_id);
        }
    }

    let kids: Vec<Object> = page_ids.iter().map(|id| Object::Reference(*id)).collect();
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );
    merged.objects.insert(
        catalog_id,
        Object::Dictionary(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        }),
    );
    merged.trailer.set("Root", catalog_id);
    merged.max_id = catalog_id.0;
    merged.compress();
    Ok(merged)
}
