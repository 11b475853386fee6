use serde::{Deserialize, Serialize};
use std::fmt;

/// Content types treated as opaque bytes
const BINARY_TYPES: &[&str] = &[
    "image/",
    "video/",
    "audio/",
    "application/octet-stream",
    "application/zip",
];

/// Broad kind of a response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Html,
    Pdf,
    Binary,
    Unknown,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Pdf => "pdf",
            Self::Binary => "binary",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "html" => Some(Self::Html),
            "pdf" => Some(Self::Pdf),
            "binary" => Some(Self::Binary),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a response by its Content-Type header
///
/// A missing content type is treated as HTML.
pub fn classify(content_type: &str) -> SourceType {
    let content_type = content_type.trim().to_lowercase();

    if content_type.contains("application/pdf") {
        return SourceType::Pdf;
    }

    if BINARY_TYPES.iter().any(|t| content_type.contains(t)) {
        return SourceType::Binary;
    }

    if content_type.is_empty()
        || content_type.contains("text/html")
        || content_type.contains("xhtml")
        || content_type.contains("xml")
    {
        return SourceType::Html;
    }

    SourceType::Unknown
}

/// File extension used for a stored byte payload
pub fn bytes_extension(content_type: &str) -> &'static str {
    let content_type = content_type.to_lowercase();
    if content_type.contains("pdf") {
        "pdf"
    } else if content_type.contains("png") {
        "png"
    } else if content_type.contains("jpeg") || content_type.contains("jpg") {
        "jpg"
    } else if content_type.contains("gif") {
        "gif"
    } else if content_type.contains("webp") {
        "webp"
    } else if content_type.contains("zip") {
        "zip"
    } else {
        "bin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("application/pdf"), SourceType::Pdf);
        assert_eq!(classify("image/png"), SourceType::Binary);
        assert_eq!(classify("application/octet-stream"), SourceType::Binary);
        assert_eq!(classify("text/html; charset=utf-8"), SourceType::Html);
        assert_eq!(classify("application/xhtml+xml"), SourceType::Html);
        assert_eq!(classify(""), SourceType::Html);
        assert_eq!(classify("application/json"), SourceType::Unknown);
        assert_eq!(classify("text/plain"), SourceType::Unknown);
    }

    #[test]
    fn test_classify_is_case_insensitive() {
        assert_eq!(classify("Application/PDF"), SourceType::Pdf);
        assert_eq!(classify("TEXT/HTML"), SourceType::Html);
    }

    #[test]
    fn test_bytes_extension() {
        assert_eq!(bytes_extension("application/pdf"), "pdf");
        assert_eq!(bytes_extension("image/jpeg"), "jpg");
        assert_eq!(bytes_extension("image/webp"), "webp");
        assert_eq!(bytes_extension("application/zip"), "zip");
        assert_eq!(bytes_extension("audio/mpeg"), "bin");
    }
}
