//! File-type aware text extraction.
//!
//! Turns a file on disk into an [`Extraction`]: an ordered list of text
//! units plus a parallel list of provenance labels. Plain text is one unit,
//! PDFs yield one unit per page, and DOCX files one unit per paragraph.
//!
//! Extraction is pure with respect to pipeline state; it only reads the
//! file it is given.

use std::io::Read;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DOCX_BODY_ENTRY: &str = "word/document.xml";

/// Formats the extractor understands, detected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Pdf,
    Docx,
}

impl DocumentFormat {
    /// Detects the format from the extension, case-insensitively.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "txt" | "md" => Ok(Self::PlainText),
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            _ => Err(PipelineError::UnsupportedFormat(if ext.is_empty() {
                path.display().to_string()
            } else {
                format!(".{}", ext)
            })),
        }
    }
}

/// Returns true if `path` has an extension the extractor supports.
pub fn is_supported(path: &Path) -> bool {
    DocumentFormat::from_path(path).is_ok()
}

/// Extracted text units and their provenance labels.
///
/// For PDF and DOCX, `labels[i]` describes `units[i]`. Plain text is a single
/// unit whose labels count the paragraphs inside it; the chunker reconciles
/// label count with chunk count afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub units: Vec<String>,
    pub labels: Vec<String>,
}

impl Extraction {
    /// True when nothing but whitespace was extracted.
    pub fn is_empty(&self) -> bool {
        self.units.iter().all(|u| u.trim().is_empty())
    }

    /// Plain text: one unit, one `paragraph_{n}` label per non-blank
    /// `\n\n`-delimited block.
    pub fn from_plain_text(text: &str) -> Self {
        if text.trim().is_empty() {
            return Self::default();
        }
        let paragraphs = text.split("\n\n").filter(|p| !p.trim().is_empty()).count();
        Self {
            units: vec![text.to_string()],
            labels: (1..=paragraphs).map(|n| format!("paragraph_{}", n)).collect(),
        }
    }

    /// One unit per page; blank pages contribute neither a unit nor a label.
    /// Page numbers stay those of the original document.
    pub fn from_pages<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Self::default();
        for (i, page) in pages.into_iter().enumerate() {
            let text = page.as_ref().trim();
            if text.is_empty() {
                continue;
            }
            out.units.push(text.to_string());
            out.labels.push(format!("page_{}", i + 1));
        }
        out
    }

    /// One unit per non-empty paragraph, numbered over the kept paragraphs.
    pub fn from_paragraphs<I, S>(paragraphs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Self::default();
        for para in paragraphs {
            let text = para.as_ref().trim();
            if text.is_empty() {
                continue;
            }
            out.units.push(text.to_string());
            out.labels.push(format!("paragraph_{}", out.units.len()));
        }
        out
    }

    /// Units joined into one body of text for chunking.
    pub fn joined_text(&self) -> String {
        self.units.join("\n\n")
    }
}

/// Extracts text units and labels from the file at `path`.
///
/// Fails with [`PipelineError::UnsupportedFormat`] for unknown extensions and
/// [`PipelineError::FileNotFound`] if the path does not exist. A file with no
/// extractable text yields an empty [`Extraction`], not an error.
pub fn extract_file(path: &Path) -> Result<Extraction> {
    let format = DocumentFormat::from_path(path)?;
    if !path.exists() {
        return Err(PipelineError::FileNotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    extract_bytes(&bytes, format)
}

/// Extracts from in-memory content of a known format.
pub fn extract_bytes(bytes: &[u8], format: DocumentFormat) -> Result<Extraction> {
    let extraction = match format {
        DocumentFormat::PlainText => Extraction::from_plain_text(&String::from_utf8_lossy(bytes)),
        DocumentFormat::Pdf => Extraction::from_pages(extract_pdf_pages(bytes)?),
        DocumentFormat::Docx => Extraction::from_paragraphs(extract_docx_paragraphs(bytes)?),
    };
    if extraction.is_empty() {
        return Ok(Extraction::default());
    }
    Ok(extraction)
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>> {
    pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| PipelineError::Extraction(format!("PDF: {}", e)))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| PipelineError::Extraction(format!("DOCX: {}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| PipelineError::Extraction(format!("DOCX: {}", e)))?;
    if out.len() as u64 >= max_bytes {
        return Err(PipelineError::Extraction(format!(
            "DOCX: ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx_paragraphs(bytes: &[u8]) -> Result<Vec<String>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| PipelineError::Extraction(format!("DOCX: {}", e)))?;
    let xml = read_zip_entry_bounded(&mut archive, DOCX_BODY_ENTRY, MAX_XML_ENTRY_BYTES)?;
    paragraphs_from_document_xml(&xml)
}

/// Collects the `<w:t>` text of each `<w:p>` element, one string per paragraph.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<Vec<String>> {
    use quick_xml::events::Event;

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(PipelineError::Extraction(format!("DOCX: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}
