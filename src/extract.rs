//! Content reader: raw document files to plain UTF-8 text.
//!
//! Dispatches on the file extension. `.txt` and `.md` are read as UTF-8;
//! `.pptx` and `.docx` are unpacked with `zip` and their text runs collected
//! with `quick-xml`; `.pdf` goes through `pdf-extract`.
//!
//! Slide decks are rendered one block per slide, each headed by a
//! `--- Slide N ---` line so that the chapter splitter in
//! [`crate::decompose`] treats every slide as its own section.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported file extension: '{0}'")]
    UnsupportedExtension(String),

    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("file is not valid UTF-8: {0}")]
    Encoding(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("no text content found")]
    Empty,
}

/// Read a document from disk and return its plain text.
pub fn read_document(path: &Path) -> Result<String, ExtractError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "md" => {
            let bytes = std::fs::read(path)?;
            String::from_utf8(bytes).map_err(|e| ExtractError::Encoding(e.to_string()))
        }
        "pdf" => extract_pdf(&std::fs::read(path)?),
        "pptx" => extract_pptx(&std::fs::read(path)?),
        "docx" => extract_docx(&std::fs::read(path)?),
        other => Err(ExtractError::UnsupportedExtension(other.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slide_names: Vec<(u32, String)> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .filter_map(|n| {
            n.trim_start_matches("ppt/slides/slide")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .ok()
                .map(|num| (num, n.to_string()))
        })
        .collect();
    slide_names.sort();

    let mut blocks = Vec::with_capacity(slide_names.len());
    for (num, name) in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let paragraphs = collect_text_runs(&xml, b"p")?;
        if paragraphs.is_empty() {
            continue;
        }
        blocks.push(format!("--- Slide {} ---\n{}", num, paragraphs.join("\n")));
    }
    Ok(blocks.join("\n\n"))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    Ok(collect_text_runs(&xml, b"p")?.join("\n"))
}

/// Collect `<t>` text runs, one output line per `paragraph` element.
/// Empty paragraphs are skipped.
fn collect_text_runs(xml: &[u8], paragraph: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut lines = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == paragraph {
                    let line = current.trim();
                    if !line.is_empty() {
                        lines.push(line.to_string());
                    }
                    current.clear();
                }
            }
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let tail = current.trim();
    if !tail.is_empty() {
        lines.push(tail.to_string());
    }
    Ok(lines)
}
