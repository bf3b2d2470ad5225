//! Plain-text extraction for uploaded documents

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::{Cursor, Read};
use tracing::{debug, info};

use super::{DocumentUpload, FileType};
use crate::{RagError, Result};

const DOCX_BODY: &str = "word/document.xml";

/// Turns an uploaded document into plain text
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, upload: &DocumentUpload) -> Result<String>;
}

/// Extracts `txt`, `pdf` and `docx` uploads
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExtractor;

#[async_trait]
impl TextExtractor for DefaultExtractor {
    async fn extract(&self, upload: &DocumentUpload) -> Result<String> {
        let file_type = upload.file_type()?;
        debug!(
            "Extracting {} text from {} ({} bytes)",
            file_type,
            upload.file_name(),
            upload.bytes().len()
        );

        let text = match file_type {
            FileType::Txt => String::from_utf8_lossy(upload.bytes()).into_owned(),
            FileType::Pdf => {
                let bytes = upload.bytes().to_vec();
                tokio::task::spawn_blocking(move || extract_pdf(&bytes))
                    .await
                    .map_err(|e| RagError::Extraction(format!("PDF extraction task failed: {}", e)))??
            }
            FileType::Docx => {
                let bytes = upload.bytes().to_vec();
                tokio::task::spawn_blocking(move || extract_docx(&bytes))
                    .await
                    .map_err(|e| RagError::Extraction(format!("DOCX extraction task failed: {}", e)))??
            }
        };

        info!(
            "Extracted {} characters from {}",
            text.chars().count(),
            upload.file_name()
        );
        Ok(text)
    }
}

#[inline]
pub fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| RagError::Extraction(format!("Failed to extract text from PDF: {}", e)))
}

/// Text of `word/document.xml` in document order
///
/// Each non-empty paragraph becomes one block; each table row becomes one
/// block of its non-empty cells joined by ` | `. Blocks are separated by a
/// blank line.
#[inline]
pub fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| RagError::Extraction(format!("Not a valid DOCX archive: {}", e)))?;
    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY)
        .map_err(|e| RagError::Extraction(format!("DOCX is missing {}: {}", DOCX_BODY, e)))?
        .read_to_string(&mut xml)?;

    docx_xml_to_text(&xml)
}

#[derive(Default)]
struct DocxText {
    blocks: Vec<String>,
    current: String,
    cells: Vec<String>,
    table_depth: usize,
    in_text_run: bool,
}

impl DocxText {
    fn end_paragraph(&mut self) {
        if self.table_depth > 0 {
            // Paragraphs inside a cell stay in that cell
            if !self.current.is_empty() && !self.current.ends_with(' ') {
                self.current.push(' ');
            }
            return;
        }
        let paragraph = self.current.trim();
        if !paragraph.is_empty() {
            self.blocks.push(paragraph.to_string());
        }
        self.current.clear();
    }

    fn end_cell(&mut self) {
        let cell = self.current.trim();
        if !cell.is_empty() {
            self.cells.push(cell.to_string());
        }
        self.current.clear();
    }

    fn end_row(&mut self) {
        if !self.cells.is_empty() {
            self.blocks.push(self.cells.join(" | "));
        }
        self.cells.clear();
    }

    fn finish(mut self) -> String {
        self.end_paragraph();
        self.blocks.join("\n\n")
    }
}

fn docx_xml_to_text(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut state = DocxText::default();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| RagError::Extraction(format!("Malformed DOCX XML: {}", e)))?;
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"t" => state.in_text_run = true,
                b"tbl" => state.table_depth += 1,
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => state.current.push('\t'),
                b"br" | b"cr" => state.current.push('\n'),
                b"p" => state.end_paragraph(),
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => state.in_text_run = false,
                b"p" => state.end_paragraph(),
                b"tc" => state.end_cell(),
                b"tr" => state.end_row(),
                b"tbl" => state.table_depth = state.table_depth.saturating_sub(1),
                _ => {}
            },
            Event::Text(text) if state.in_text_run => {
                let text = text
                    .unescape()
                    .map_err(|e| RagError::Extraction(format!("Malformed DOCX text: {}", e)))?;
                state.current.push_str(&text);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(state.finish())
}
