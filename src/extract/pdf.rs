use super::ExtractError;
use std::path::{Path, PathBuf};

/// Extracts the text layer of the PDF stored at `path`
///
/// Parsing runs on the blocking pool; a parser panic surfaces as a join
/// error and is reported the same way as a parse failure.
///
/// # Arguments
///
/// * `path` - Path to a file holding the complete PDF body
///
/// # Returns
///
/// * `Ok(String)` - Extracted text with blank-line runs collapsed
/// * `Err(ExtractError::PdfParse)` - The document could not be parsed
pub async fn pdf_text(path: &Path) -> Result<String, ExtractError> {
    let path: PathBuf = path.to_path_buf();

    let joined = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path)).await;

    match joined {
        Ok(Ok(text)) => Ok(clean_text(&text)),
        Ok(Err(e)) => Err(ExtractError::PdfParse(e.to_string())),
        Err(e) if e.is_panic() => Err(ExtractError::PdfParse("PDF parser panicked".to_string())),
        Err(e) => Err(ExtractError::PdfParse(e.to_string())),
    }
}

/// Trims lines and collapses consecutive blank lines
fn clean_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;

    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_clean_text() {
        let text = "  Title  \n\n\n\nBody line\n   \nEnd";
        assert_eq!(clean_text(text), "Title\n\nBody line\n\nEnd");
    }

    #[tokio::test]
    async fn test_garbage_is_parse_failure() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"this is not a pdf at all").unwrap();
        file.flush().unwrap();

        let err = pdf_text(file.path()).await.unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::PdfParseFailed);
    }
}
