use crate::error::{PipelineError, ServiceError};
use crate::job_controller::state::JobsState;
use crate::pipeline::input::accepts_upload;
use actix_multipart::{Field, Multipart};
use futures_util::StreamExt;
use log::{debug, info};
use common::requests::OcrOptions;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use tempfile::TempPath;

const MB: usize = 1024 * 1024;
/// Text fields (options) are tiny; anything bigger is not a form we sent.
const MAX_TEXT_FIELD: usize = 64 * 1024;

/// A received upload, owned by whoever takes `file` next.
pub(crate) struct Upload {
    /// The name the client gave the file, unsanitized.
    pub filename: String,
    pub file: TempPath,
    pub options: OcrOptions,
}

/// Reads the create-job form: the `file` part is streamed to disk under
/// the upload cap, every other part is an OCR option.
pub(crate) async fn receive_upload(
    mut payload: Multipart,
    state: &JobsState,
) -> Result<Upload, ServiceError> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut received: Option<(String, TempPath, u64)> = None;

    while let Some(item) = payload.next().await {
        let mut field = item?;
        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_name().map(|n| n.to_string()));

        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename().map(|f| f.to_string()))
                    .unwrap_or_default();

                if filename.trim().is_empty() {
                    return Err(ServiceError::EmptyFile);
                }
                if !accepts_upload(&filename, field.content_type()) {
                    return Err(ServiceError::UnsupportedMediaType);
                }

                let (file, size) =
                    stream_to_disk(&mut field, &state.uploads_dir, state.max_upload_bytes).await?;
                received = Some((filename, file, size));
            }
            Some(other) => {
                let value = read_text(&mut field).await?;
                fields.insert(other.to_string(), value);
            }
            None => {
                while let Some(chunk) = field.next().await {
                    chunk?;
                }
            }
        }
    }

    let (filename, file, size) = received.ok_or(ServiceError::MissingFile)?;
    if size == 0 {
        return Err(ServiceError::InvalidInput(PipelineError::EmptyInput.to_string()));
    }

    let options = OcrOptions::from_form(&fields, &state.default_languages);
    info!("Received {} ({} bytes), options: {:?}", filename, size, options);
    Ok(Upload {
        filename,
        file,
        options,
    })
}

/// Writes the part into a fresh temp file, removing it again if the part
/// grows past `limit`.
async fn stream_to_disk(
    field: &mut Field,
    dir: &Path,
    limit: usize,
) -> Result<(TempPath, u64), ServiceError> {
    let mut file = tempfile::Builder::new()
        .prefix("upload-")
        .tempfile_in(dir)?;
    let mut size: u64 = 0;

    while let Some(chunk) = field.next().await {
        let chunk = chunk?;
        size += chunk.len() as u64;
        if size > limit as u64 {
            debug!("Upload exceeded {} bytes, discarding", limit);
            return Err(ServiceError::PayloadTooLarge(limit.div_ceil(MB)));
        }
        file.write_all(&chunk)?;
    }
    file.flush()?;
    Ok((file.into_temp_path(), size))
}

async fn read_text(field: &mut Field) -> Result<String, ServiceError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        bytes.extend_from_slice(&chunk?);
        if bytes.len() > MAX_TEXT_FIELD {
            return Err(ServiceError::Multipart("form field too large".to_string()));
        }
    }
    String::from_utf8(bytes)
        .map_err(|_| ServiceError::Multipart("form field is not valid UTF-8".to_string()))
}
