//! DOCX archive surgery.
//!
//! docx-rs is writer-only, so merging converted page fragments and rewriting
//! the section geometry of a finished document both work directly on the
//! ZIP archive and its `word/document.xml` part.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ConvertError;

const DOCUMENT_XML: &str = "word/document.xml";

/// Paragraph inserted between fragments so each source page starts on its
/// own page in the merged document.
const PAGE_BREAK: &str = "<w:p><w:r><w:br w:type=\"page\"/></w:r></w:p>";

/// Merge per-page DOCX fragments into `output`.
///
/// The first fragment's archive is used as the base; the body content of every
/// later fragment (minus its trailing `w:sectPr`) is spliced in before the
/// base document's section properties, separated by page breaks.
pub fn merge(fragments: &[PathBuf], output: &Path) -> Result<(), ConvertError> {
    let first = fragments.first().ok_or(ConvertError::NoFragments)?;
    let mut entries = read_entries(first)?;
    let base_xml = take_document_xml(&mut entries, first)?;

    let insert_at = splice_index(&base_xml)?;
    let mut combined = String::with_capacity(base_xml.len());
    combined.push_str(&base_xml[..insert_at]);
    for fragment in &fragments[1..] {
        let xml = document_xml(fragment)?;
        combined.push_str(PAGE_BREAK);
        combined.push_str(body_content(&xml)?);
    }
    combined.push_str(&base_xml[insert_at..]);

    entries.push((DOCUMENT_XML.to_string(), combined.into_bytes()));
    write_archive(output, &entries)
}

/// Rewrite every section of `path` to the given page size with uniform
/// margins. Values are millimeters; the document stores twips.
pub fn set_page_geometry(
    path: &Path,
    width_mm: f64,
    height_mm: f64,
    margin_mm: f64,
) -> Result<(), ConvertError> {
    let pg_sz = format!(
        "<w:pgSz w:w=\"{}\" w:h=\"{}\"/>",
        mm_to_twips(width_mm),
        mm_to_twips(height_mm)
    );
    let m = mm_to_twips(margin_mm);
    let pg_mar = format!(
        "<w:pgMar w:top=\"{m}\" w:right=\"{m}\" w:bottom=\"{m}\" w:left=\"{m}\" w:header=\"0\" w:footer=\"0\" w:gutter=\"0\"/>"
    );

    let mut entries = read_entries(path)?;
    let xml = take_document_xml(&mut entries, path)?;
    let rewritten = rewrite_sections(&xml, &pg_sz, &pg_mar)?;
    entries.push((DOCUMENT_XML.to_string(), rewritten.into_bytes()));
    write_archive(path, &entries)
}

fn mm_to_twips(mm: f64) -> i64 {
    // 1 mm = 1440/25.4 twentieths of a point
    (mm * 1440.0 / 25.4).round() as i64
}

/// Read `word/document.xml` out of a DOCX archive.
pub(crate) fn document_xml(path: &Path) -> Result<String, ConvertError> {
    let file = fs::File::open(path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ConvertError::zip(path, e))?;
    let mut entry = archive
        .by_name(DOCUMENT_XML)
        .map_err(|e| ConvertError::zip(path, e))?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(xml)
}

fn read_entries(path: &Path) -> Result<Vec<(String, Vec<u8>)>, ConvertError> {
    let file = fs::File::open(path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ConvertError::zip(path, e))?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| ConvertError::zip(path, e))?;
        if entry.is_dir() {
            continue;
        }
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        entries.push((entry.name().to_string(), data));
    }
    Ok(entries)
}

/// Remove the document part from `entries` and return it as a string, so the
/// caller can push a rewritten version back.
fn take_document_xml(
    entries: &mut Vec<(String, Vec<u8>)>,
    path: &Path,
) -> Result<String, ConvertError> {
    let idx = entries
        .iter()
        .position(|(name, _)| name == DOCUMENT_XML)
        .ok_or_else(|| {
            ConvertError::DocxStructure(format!("{} has no {}", path.display(), DOCUMENT_XML))
        })?;
    let (_, data) = entries.swap_remove(idx);
    String::from_utf8(data)
        .map_err(|_| ConvertError::DocxStructure(format!("{} is not UTF-8", DOCUMENT_XML)))
}

/// Repack the archive atomically: write a sibling temp file, then rename.
fn write_archive(path: &Path, entries: &[(String, Vec<u8>)]) -> Result<(), ConvertError> {
    let tmp = path.with_extension("docx.tmp");
    let file = fs::File::create(&tmp)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, data) in entries {
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| ConvertError::zip(path, e))?;
        writer.write_all(data)?;
    }
    writer.finish().map_err(|e| ConvertError::zip(path, e))?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn body_bounds(xml: &str) -> Result<(usize, usize), ConvertError> {
    let open = xml
        .find("<w:body")
        .ok_or_else(|| ConvertError::DocxStructure("missing <w:body>".into()))?;
    let open_end = xml[open..]
        .find('>')
        .map(|off| open + off + 1)
        .ok_or_else(|| ConvertError::DocxStructure("unterminated <w:body> tag".into()))?;
    let close = xml
        .rfind("</w:body>")
        .ok_or_else(|| ConvertError::DocxStructure("missing </w:body>".into()))?;
    Ok((open_end, close))
}

/// Index just before the trailing `w:sectPr`, or before `</w:body>` when the
/// document has none.
fn splice_index(xml: &str) -> Result<usize, ConvertError> {
    let (open_end, close) = body_bounds(xml)?;
    Ok(match xml[open_end..close].rfind("<w:sectPr") {
        Some(i) => open_end + i,
        None => close,
    })
}

/// Body content of a fragment with its trailing section properties stripped.
fn body_content(xml: &str) -> Result<&str, ConvertError> {
    let (open_end, _) = body_bounds(xml)?;
    let end = splice_index(xml)?;
    Ok(&xml[open_end..end])
}

/// Replace `w:pgSz`/`w:pgMar` inside every `w:sectPr` block, inserting them
/// when a block has neither.
fn rewrite_sections(xml: &str, pg_sz: &str, pg_mar: &str) -> Result<String, ConvertError> {
    let mut out = String::with_capacity(xml.len() + 128);
    let mut rest = xml;
    while let Some(start) = rest.find("<w:sectPr") {
        let tag_end = rest[start..]
            .find('>')
            .map(|off| start + off + 1)
            .ok_or_else(|| ConvertError::DocxStructure("unterminated <w:sectPr> tag".into()))?;
        if rest[..tag_end].ends_with("/>") {
            out.push_str(&rest[..start]);
            out.push_str("<w:sectPr>");
            out.push_str(pg_sz);
            out.push_str(pg_mar);
            out.push_str("</w:sectPr>");
            rest = &rest[tag_end..];
            continue;
        }
        let close = rest[tag_end..]
            .find("</w:sectPr>")
            .map(|off| tag_end + off)
            .ok_or_else(|| ConvertError::DocxStructure("unterminated <w:sectPr> element".into()))?;
        let block = rewrite_block(&rest[tag_end..close], pg_sz, pg_mar);
        out.push_str(&rest[..tag_end]);
        out.push_str(&block);
        rest = &rest[close..];
    }
    out.push_str(rest);
    Ok(out)
}

fn rewrite_block(block: &str, pg_sz: &str, pg_mar: &str) -> String {
    let stripped = remove_element(&remove_element(block, "<w:pgSz"), "<w:pgMar");
    format!("{pg_sz}{pg_mar}{stripped}")
}

// pgSz and pgMar carry attributes only, so the next "/>" terminates them.
fn remove_element(block: &str, open: &str) -> String {
    match block.find(open) {
        Some(start) => match block[start..].find("/>") {
            Some(end) => format!("{}{}", &block[..start], &block[start + end + 2..]),
            None => block.to_string(),
        },
        None => block.to_string(),
    }
}
