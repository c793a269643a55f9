use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Failed to read PDF: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("PDF has no pages")]
    EmptyPdf,

    #[error("First page has no media box")]
    MissingMediaBox,

    #[error("Malformed media box on first page")]
    InvalidMediaBox,

    #[error("Failed to build DOCX: {0}")]
    DocxBuild(String),

    #[error("Malformed DOCX: {0}")]
    DocxStructure(String),

    #[error("No DOCX fragments to merge")]
    NoFragments,

    #[error("Archive error in {path}: {source}")]
    Zip {
        path: PathBuf,
        source: zip::result::ZipError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    pub(crate) fn zip(path: &std::path::Path, source: zip::result::ZipError) -> Self {
        ConvertError::Zip {
            path: path.to_path_buf(),
            source,
        }
    }
}
