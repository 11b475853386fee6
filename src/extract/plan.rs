use super::SourceType;
use crate::params::ReturnFormat;

/// What to do with a body once its source type and requested format are known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionPlan {
    /// Article extraction, links and metadata
    Html,
    /// Text layer of a PDF
    PdfText,
    /// Body returned as text without extraction
    Passthrough,
    /// Raw bytes go to the object store
    StoreBytes,
    /// Success with no payload
    Empty,
    /// UNSUPPORTED_FORMAT
    Unsupported,
}

/// Picks the extraction plan for a source type and return format
///
/// Every pair is listed so a new source type or format fails to compile
/// until it is handled here.
pub fn plan(source: SourceType, format: ReturnFormat) -> ExtractionPlan {
    use ReturnFormat::{Bytes, Commonmark, Empty, Markdown, Raw, Text, Xml};
    use SourceType::{Binary, Html, Pdf, Unknown};

    match (source, format) {
        (Html | Pdf | Binary | Unknown, Bytes) => ExtractionPlan::StoreBytes,
        (Html | Pdf | Binary | Unknown, Empty) => ExtractionPlan::Empty,
        (Html, Markdown | Commonmark | Text | Raw | Xml) => ExtractionPlan::Html,
        (Pdf, Markdown | Commonmark | Text | Raw | Xml) => ExtractionPlan::PdfText,
        (Unknown, Markdown | Commonmark | Text | Raw | Xml) => ExtractionPlan::Passthrough,
        (Binary, Markdown | Commonmark | Text | Raw | Xml) => ExtractionPlan::Unsupported,
    }
}
