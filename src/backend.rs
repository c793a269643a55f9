//! Conversion driver: PDF inspection, per-page and one-pass DOCX conversion,
//! output path resolution and page geometry normalization.

use std::fs;
use std::path::{Path, PathBuf};

use docx_rs::{BreakType, Docx, Paragraph, Run};
use lazy_static::lazy_static;
use lopdf::{Document, Object, ObjectId};
use regex::Regex;
use tracing::{info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::docx;
use crate::error::ConvertError;

const MM_PER_POINT: f64 = 25.4 / 72.0;

/// Fixed margin applied on all sides of the normalized output.
const PAGE_MARGIN_MM: f64 = 5.0;

lazy_static! {
    static ref CONTROL_CHARS: Regex = Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").unwrap();
    static ref PARAGRAPH_BREAK: Regex = Regex::new(r"(?:\n\s*){2,}").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Convert `pdf` into a DOCX in `dest_dir`, returning the written path.
///
/// Multi-page documents are converted page by page through temporary
/// fragments, reporting `(pages_done, total)` after each page; a single-page
/// document is converted in one pass. The finished document's page geometry
/// is normalized to the source media box.
pub fn convert_to_docx(
    pdf: &Path,
    dest_dir: &Path,
    mut progress: impl FnMut(usize, usize),
) -> Result<PathBuf, ConvertError> {
    let stem = pdf.file_stem().and_then(|s| s.to_str()).unwrap_or("document");
    let output = unique_output_path(dest_dir, &format!("{stem}.docx"));

    let doc = Document::load(pdf)?;
    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return Err(ConvertError::EmptyPdf);
    }
    let total = page_numbers.len();
    info!(source = %pdf.display(), pages = total, "starting conversion");

    if total == 1 {
        convert_page(&doc, page_numbers[0], &output)?;
        progress(1, 1);
    } else {
        let tmp = tempfile::tempdir()?;
        let mut fragments = Vec::with_capacity(total);
        for (i, page) in page_numbers.iter().enumerate() {
            let fragment = tmp.path().join(format!("page_{}.docx", i + 1));
            convert_page(&doc, *page, &fragment)?;
            fragments.push(fragment);
            progress(i + 1, total);
        }
        docx::merge(&fragments, &output)?;
    }

    normalize_geometry(&doc, &output)?;
    info!(output = %output.display(), "conversion finished");
    Ok(output)
}

/// One-pass conversion of the whole document into `output`, pages separated
/// by page breaks.
pub fn convert(pdf: &Path, output: &Path) -> Result<(), ConvertError> {
    let doc = Document::load(pdf)?;
    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return Err(ConvertError::EmptyPdf);
    }
    let pages: Vec<Vec<String>> = page_numbers
        .iter()
        .map(|n| page_paragraphs(&doc, *n))
        .collect();
    write_docx(&pages, output)
}

/// Convert one page of an already-loaded document into a standalone DOCX.
pub fn convert_page(doc: &Document, page: u32, output: &Path) -> Result<(), ConvertError> {
    write_docx(&[page_paragraphs(doc, page)], output)
}

/// Resize every section of `docx_path` to the media box of the first page of
/// `pdf`, converted to millimeters, with fixed margins.
pub fn normalize_page_geometry(pdf: &Path, docx_path: &Path) -> Result<(), ConvertError> {
    let doc = Document::load(pdf)?;
    normalize_geometry(&doc, docx_path)
}

fn normalize_geometry(doc: &Document, docx_path: &Path) -> Result<(), ConvertError> {
    let (width_pt, height_pt) = first_page_size_points(doc)?;
    docx::set_page_geometry(
        docx_path,
        width_pt * MM_PER_POINT,
        height_pt * MM_PER_POINT,
        PAGE_MARGIN_MM,
    )
}

/// First absent path in `dir` for `filename`, probing `name.ext`,
/// `name (1).ext`, `name (2).ext`, … Not concurrency-safe; there is only
/// ever one conversion in flight.
pub fn unique_output_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }
    // a dot at position 0 is a hidden-file name, not an extension separator
    let (base, ext) = match filename.rfind('.') {
        Some(i) if i > 0 => filename.split_at(i),
        _ => (filename, ""),
    };
    let mut counter = 1;
    loop {
        let candidate = dir.join(format!("{base} ({counter}){ext}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Width/height in points of the first page's media box.
pub fn first_page_size_points(doc: &Document) -> Result<(f64, f64), ConvertError> {
    let pages = doc.get_pages();
    let first = pages.values().next().ok_or(ConvertError::EmptyPdf)?;
    let [x0, y0, x1, y1] = media_box(doc, *first)?;
    Ok(((x1 - x0).abs(), (y1 - y0).abs()))
}

/// Media box of a page, following `Parent` links for inherited values.
fn media_box(doc: &Document, page_id: ObjectId) -> Result<[f64; 4], ConvertError> {
    let mut id = page_id;
    // page trees are shallow; the bound also guards against parent cycles
    for _ in 0..32 {
        let dict = doc.get_object(id)?.as_dict()?;
        if let Ok(obj) = dict.get(b"MediaBox") {
            let arr = match resolve(doc, obj)? {
                Object::Array(arr) if arr.len() == 4 => arr,
                _ => return Err(ConvertError::InvalidMediaBox),
            };
            let mut rect = [0.0; 4];
            for (slot, obj) in rect.iter_mut().zip(arr) {
                *slot = number(resolve(doc, obj)?).ok_or(ConvertError::InvalidMediaBox)?;
            }
            return Ok(rect);
        }
        match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => id = *parent,
            _ => break,
        }
    }
    Err(ConvertError::MissingMediaBox)
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Result<&'a Object, lopdf::Error> {
    match obj {
        Object::Reference(id) => doc.get_object(*id),
        other => Ok(other),
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// Extracted, cleaned paragraphs for one page. Pages whose text cannot be
/// decoded come out empty rather than failing the whole conversion.
fn page_paragraphs(doc: &Document, page: u32) -> Vec<String> {
    match doc.extract_text(&[page]) {
        Ok(text) => clean_page_text(&text),
        Err(e) => {
            warn!(page, error = %e, "text extraction failed, emitting empty page");
            Vec::new()
        }
    }
}

/// NFC-normalize, strip control characters, split on blank-line runs and
/// collapse whitespace inside each paragraph.
fn clean_page_text(text: &str) -> Vec<String> {
    let normalized: String = text.nfc().collect();
    let stripped = CONTROL_CHARS.replace_all(&normalized, " ");
    PARAGRAPH_BREAK
        .split(&stripped)
        .map(|p| WHITESPACE.replace_all(p.trim(), " ").into_owned())
        .filter(|p| !p.is_empty())
        .collect()
}

fn write_docx(pages: &[Vec<String>], output: &Path) -> Result<(), ConvertError> {
    let mut docx = Docx::new();
    for (i, paragraphs) in pages.iter().enumerate() {
        if i > 0 {
            docx = docx
                .add_paragraph(Paragraph::new().add_run(Run::new().add_break(BreakType::Page)));
        }
        if paragraphs.is_empty() {
            // keep the page present in the output
            docx = docx.add_paragraph(Paragraph::new());
        }
        for paragraph in paragraphs {
            docx = docx
                .add_paragraph(Paragraph::new().add_run(Run::new().add_text(paragraph.as_str())));
        }
    }
    let file = fs::File::create(output)?;
    docx.build()
        .pack(file)
        .map_err(|e| ConvertError::DocxBuild(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::Dictionary;
    use pretty_assertions::assert_eq;

    /// Write a PDF with `num_pages` pages. The media box goes on each page,
    /// or only on the pages root when `inherited_media_box` is set.
    fn create_test_pdf(
        path: &Path,
        num_pages: u32,
        media_box: [i64; 4],
        inherited_media_box: bool,
    ) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let catalog_id = doc.new_object_id();

        let mut page_ids = Vec::new();
        for page_num in 0..num_pages {
            let page_id = doc.new_object_id();
            let content_id = doc.new_object_id();
            let content = format!("BT /F1 12 Tf 50 700 Td (Page-{}) Tj ET", page_num + 1);
            doc.objects.insert(
                content_id,
                Object::Stream(lopdf::Stream::new(Dictionary::new(), content.into_bytes())),
            );

            let mut page_dict = Dictionary::new();
            page_dict.set("Type", Object::Name(b"Page".to_vec()));
            page_dict.set("Parent", Object::Reference(pages_id));
            page_dict.set("Contents", Object::Reference(content_id));
            if !inherited_media_box {
                page_dict.set(
                    "MediaBox",
                    Object::Array(media_box.iter().map(|v| Object::Integer(*v)).collect()),
                );
            }
            doc.objects.insert(page_id, Object::Dictionary(page_dict));
            page_ids.push(Object::Reference(page_id));
        }

        let mut pages_dict = Dictionary::new();
        pages_dict.set("Type", Object::Name(b"Pages".to_vec()));
        pages_dict.set("Count", Object::Integer(num_pages as i64));
        pages_dict.set("Kids", Object::Array(page_ids));
        if inherited_media_box {
            pages_dict.set(
                "MediaBox",
                Object::Array(media_box.iter().map(|v| Object::Integer(*v)).collect()),
            );
        }
        doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

        let mut catalog_dict = Dictionary::new();
        catalog_dict.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog_dict.set("Pages", Object::Reference(pages_id));
        doc.objects.insert(catalog_id, Object::Dictionary(catalog_dict));
        doc.trailer.set("Root", Object::Reference(catalog_id));

        doc.save(path).unwrap();
    }

    const LETTER: [i64; 4] = [0, 0, 612, 792];

    #[test]
    fn unique_path_returns_base_name_when_free() {
        let dir = tempfile::tempdir().unwrap();
        let path = unique_output_path(dir.path(), "report.docx");
        assert_eq!(path, dir.path().join("report.docx"));
    }

    #[test]
    fn unique_path_skips_existing_candidates() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("report.docx"), b"x").unwrap();
        fs::write(dir.path().join("report (1).docx"), b"x").unwrap();
        fs::write(dir.path().join("report (2).docx"), b"x").unwrap();
        let path = unique_output_path(dir.path(), "report.docx");
        assert_eq!(path, dir.path().join("report (3).docx"));
    }

    #[test]
    fn unique_path_handles_names_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes"), b"x").unwrap();
        let path = unique_output_path(dir.path(), "notes");
        assert_eq!(path, dir.path().join("notes (1)"));
    }

    #[test]
    fn unique_path_keeps_hidden_file_names_whole() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".config"), b"x").unwrap();
        let path = unique_output_path(dir.path(), ".config");
        assert_eq!(path, dir.path().join(".config (1)"));
    }

    #[test]
    fn media_box_read_from_page_dictionary() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("letter.pdf");
        create_test_pdf(&pdf, 1, LETTER, false);
        let doc = Document::load(&pdf).unwrap();
        assert_eq!(first_page_size_points(&doc).unwrap(), (612.0, 792.0));
    }

    #[test]
    fn media_box_inherited_from_pages_root() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("inherited.pdf");
        create_test_pdf(&pdf, 2, [0, 0, 595, 842], true);
        let doc = Document::load(&pdf).unwrap();
        assert_eq!(first_page_size_points(&doc).unwrap(), (595.0, 842.0));
    }

    #[test]
    fn zero_page_pdf_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("empty.pdf");
        create_test_pdf(&pdf, 0, LETTER, false);
        let result = convert_to_docx(&pdf, dir.path(), |_, _| {});
        assert!(matches!(result, Err(ConvertError::EmptyPdf)));
    }

    #[test]
    fn clean_page_text_splits_paragraphs_and_collapses_whitespace() {
        let text = "First  line\nstill first\n\n\nSecond\t paragraph\n\n";
        assert_eq!(
            clean_page_text(text),
            vec!["First line still first".to_string(), "Second paragraph".to_string()]
        );
    }

    #[test]
    fn clean_page_text_strips_control_characters() {
        assert_eq!(clean_page_text("a\u{0007}b\u{000C}c"), vec!["a b c".to_string()]);
    }

    #[test]
    fn convert_multi_page_reports_progress_and_normalizes_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("three.pdf");
        create_test_pdf(&pdf, 3, LETTER, false);

        let mut seen = Vec::new();
        let output =
            convert_to_docx(&pdf, dir.path(), |done, total| seen.push((done, total))).unwrap();

        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(output, dir.path().join("three.docx"));
        assert!(output.exists());

        let xml = docx::document_xml(&output).unwrap();
        assert_eq!(xml.matches("<w:sectPr").count(), 1);
        // 612 x 792 pt => 12240 x 15840 twips
        assert!(xml.contains("w:w=\"12240\""));
        assert!(xml.contains("w:h=\"15840\""));

        // each page's extracted text survives conversion and merge, in order
        let first = xml.find("Page-1").expect("first page text");
        let second = xml.find("Page-2").expect("second page text");
        let third = xml.find("Page-3").expect("third page text");
        assert!(first < second && second < third);
    }

    #[test]
    fn convert_single_page_runs_in_one_pass() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("one.pdf");
        create_test_pdf(&pdf, 1, LETTER, false);

        let mut seen = Vec::new();
        let output =
            convert_to_docx(&pdf, dir.path(), |done, total| seen.push((done, total))).unwrap();

        assert_eq!(seen, vec![(1, 1)]);
        assert!(docx::document_xml(&output).is_ok());
    }

    #[test]
    fn convert_avoids_output_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("doc.pdf");
        create_test_pdf(&pdf, 1, LETTER, false);

        let first = convert_to_docx(&pdf, dir.path(), |_, _| {}).unwrap();
        let second = convert_to_docx(&pdf, dir.path(), |_, _| {}).unwrap();

        assert_eq!(first, dir.path().join("doc.docx"));
        assert_eq!(second, dir.path().join("doc (1).docx"));
    }

    #[test]
    fn normalize_page_geometry_rejects_empty_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let empty_pdf = dir.path().join("empty.pdf");
        create_test_pdf(&empty_pdf, 0, LETTER, false);

        // a real docx to run the normalizer against
        let one_pdf = dir.path().join("one.pdf");
        let docx_path = dir.path().join("out.docx");
        create_test_pdf(&one_pdf, 1, LETTER, false);
        convert(&one_pdf, &docx_path).unwrap();

        let result = normalize_page_geometry(&empty_pdf, &docx_path);
        assert!(matches!(result, Err(ConvertError::EmptyPdf)));
    }
}
