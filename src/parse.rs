//! Bytes-to-text conversion for downloaded documents.
//!
//! The sync engine only needs plain text; this module maps the formats the
//! knowledge base actually holds (plain text, CSV, markdown, PDF, DOCX) to
//! UTF-8 strings. Unknown content types fall back to a lossy UTF-8 decode
//! with a warning rather than failing the file.

use std::io::Read;
use tracing::warn;

use crate::error::{KbError, Result};

const MIME_PDF: &str = "application/pdf";
const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const TEXT_MIMES: &[&str] = &["text/plain", "text/csv", "text/markdown"];
const TEXT_EXTENSIONS: &[&str] = &[".txt", ".md", ".csv"];

/// Zip-bomb protection for OOXML payloads.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Convert raw file bytes into plain text based on content type, falling
/// back to the filename extension when the type is generic.
pub fn parse_content(data: &[u8], content_type: &str, filename: &str) -> Result<String> {
    if TEXT_MIMES.contains(&content_type)
        || TEXT_EXTENSIONS.iter().any(|ext| filename.ends_with(ext))
    {
        return Ok(String::from_utf8_lossy(data).into_owned());
    }

    if content_type == MIME_PDF || filename.ends_with(".pdf") {
        return extract_pdf(data);
    }

    if content_type == MIME_DOCX || filename.ends_with(".docx") {
        return extract_docx(data);
    }

    warn!(
        content_type,
        filename, "unknown content type, attempting UTF-8 decode"
    );
    Ok(String::from_utf8_lossy(data).into_owned())
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| KbError::Parse(format!("PDF extraction failed: {}", e)))
}

/// Extract paragraph text from a DOCX archive: read `word/document.xml` and
/// collect `w:t` runs, joining paragraphs with blank lines.
fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| KbError::Parse(format!("DOCX open failed: {}", e)))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| KbError::Parse("word/document.xml not found".into()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| KbError::Parse(format!("DOCX read failed: {}", e)))?;
    }
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(KbError::Parse("word/document.xml exceeds size limit".into()));
    }

    docx_paragraphs(&doc_xml)
}

fn docx_paragraphs(xml: &[u8]) -> Result<String> {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    // Keep text verbatim; run boundaries inside a paragraph carry
    // significant leading/trailing spaces.
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) =
                        reader.read_event_into(&mut buf)
                    {
                        current.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !current.trim().is_empty() {
                    paragraphs.push(std::mem::take(&mut current));
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(KbError::Parse(format!("DOCX XML error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    if !current.trim().is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_decodes() {
        let out = parse_content(b"hello world", "text/plain", "a.txt").unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn extension_wins_over_generic_type() {
        let out = parse_content(b"# heading", "application/octet-stream", "notes.md").unwrap();
        assert_eq!(out, "# heading");
    }

    #[test]
    fn invalid_pdf_is_parse_error() {
        let err = parse_content(b"not a pdf", "application/pdf", "a.pdf").unwrap_err();
        assert!(matches!(err, KbError::Parse(_)));
    }

    #[test]
    fn invalid_docx_is_parse_error() {
        let err = parse_content(b"not a zip", super::MIME_DOCX, "a.docx").unwrap_err();
        assert!(matches!(err, KbError::Parse(_)));
    }

    #[test]
    fn unknown_type_falls_back_to_utf8() {
        let out = parse_content(b"raw bytes", "application/x-custom", "mystery.bin").unwrap();
        assert_eq!(out, "raw bytes");
    }

    #[test]
    fn docx_paragraph_runs_joined() {
        let xml = br#"<?xml version="1.0"?>
<w:document xmlns:w="ns"><w:body>
<w:p><w:r><w:t>First</w:t></w:r><w:r><w:t> paragraph</w:t></w:r></w:p>
<w:p><w:r><w:t>Second</w:t></w:r></w:p>
</w:body></w:document>"#;
        let out = docx_paragraphs(xml).unwrap();
        assert_eq!(out, "First paragraph\n\nSecond");
    }
}
