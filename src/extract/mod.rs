//! Content extraction
//!
//! Turns a fetched or rendered response into the payload a result carries:
//! - [`classify`] maps a content type to a [`SourceType`]
//! - [`plan`] picks an [`ExtractionPlan`] for a source type and return format
//! - [`Extractor`] pulls article content, links, images and metadata out of HTML
//! - [`pdf_text`] extracts plain text from a PDF body

mod classify;
mod html;
mod pdf;
mod plan;

pub use classify::{bytes_extension, classify, SourceType};
pub use html::{Extracted, Extractor};
pub use pdf::pdf_text;
pub use plan::{plan, ExtractionPlan};

use crate::ErrorCode;
use thiserror::Error;

/// Errors raised while turning a body into a payload
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("{source_type} content cannot be returned as {format}; use return_format=bytes")]
    UnsupportedFormat {
        source_type: SourceType,
        format: &'static str,
    },

    #[error("PDF parse failed: {0}")]
    PdfParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            Self::PdfParse(_) => ErrorCode::PdfParseFailed,
            Self::Io(_) => ErrorCode::InternalError,
        }
    }
}
