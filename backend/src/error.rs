use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::error;
use common::jobs::{ErrorResponse, JobId};
use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by the external OCR/PDF collaborators.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("page already has text; prior OCR found")]
    PriorOcrFound,

    #[error("Invalid input file: {0}")]
    InputFile(String),

    #[error("Unsupported image format. Please use PDF, JPG, PNG, or TIFF files.")]
    UnsupportedImage,

    #[error("Image resolution too low for OCR. Please use higher quality images.")]
    Dpi,

    #[error("Unable to create output file. Please try again.")]
    OutputAccess,

    #[error("Input PDF is encrypted")]
    Encrypted,

    #[error("Failed to run {tool}: {source}. Make sure it is installed.")]
    ToolMissing {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed: {detail}")]
    Tool { tool: String, detail: String },

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the engine blamed the input itself (resolution, format,
    /// unreadable file) rather than its own run.
    pub fn is_input_problem(&self) -> bool {
        matches!(
            self,
            EngineError::InputFile(_) | EngineError::UnsupportedImage | EngineError::Dpi
        )
    }
}

/// Terminal outcomes of the conversion pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid input file: the uploaded file is empty")]
    EmptyInput,

    #[error("Invalid input file: not a PDF or supported image")]
    UnrecognizedFormat,

    #[error("OCR processing failed - no output generated")]
    NoOutput,

    #[error("Processing failed: {0}")]
    StrategiesExhausted(String),

    /// Every strategy failed after the engine had rejected the input.
    #[error("{0}")]
    Rejected(EngineError),

    #[error("Failed to read '{path}': {source}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether the failure is the client's (bad upload) rather than ours.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            PipelineError::EmptyInput
                | PipelineError::UnrecognizedFormat
                | PipelineError::Rejected(_)
        )
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Job {0} already finished")]
    Terminal(JobId),
}

/// Errors answered by the HTTP gateway.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("No file uploaded")]
    MissingFile,

    #[error("No file selected")]
    EmptyFile,

    #[error("Unsupported file type. Please use PDF, JPG, PNG, or TIFF files.")]
    UnsupportedMediaType,

    #[error("File too large (limit is {0} MB)")]
    PayloadTooLarge(usize),

    #[error("Job not found")]
    JobNotFound,

    #[error("Job not completed (status: {0})")]
    NotCompleted(String),

    #[error("Result file is no longer available")]
    ResultMissing,

    #[error("Server is busy, try again later")]
    Busy,

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Malformed upload: {0}")]
    Multipart(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Conversion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<actix_multipart::MultipartError> for ServiceError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        ServiceError::Multipart(err.to_string())
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ServiceError::JobNotFound,
            StoreError::Terminal(id) => {
                ServiceError::Internal(format!("job {} already finished", id))
            }
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::MissingFile
            | ServiceError::EmptyFile
            | ServiceError::UnsupportedMediaType
            | ServiceError::NotCompleted(_)
            | ServiceError::Multipart(_)
            | ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::JobNotFound | ServiceError::ResultMissing => StatusCode::NOT_FOUND,
            ServiceError::Busy | ServiceError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Conversion(_) | ServiceError::Io(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
            match self {
                ServiceError::Conversion(msg) => msg.clone(),
                _ => "Processing failed: internal error".to_string(),
            }
        } else {
            self.to_string()
        };
        HttpResponse::build(status).json(ErrorResponse { error: message })
    }
}
