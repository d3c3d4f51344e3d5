use thiserror::Error;

mod analyzer;
mod document;
mod types;

#[cfg(feature = "pdf")]
mod backend;

pub use analyzer::{AnalysisState, PdfAnalyzer};
pub use document::{OutlineEntry, PageRef, PdfDocument, PdfOpener, RawDestination};
pub use types::{Annotation, Destination, KnownReference, OutlineNode, PdfInfo, TextRun};

#[cfg(feature = "pdf")]
pub use backend::{LopdfDocument, LopdfOpener};

#[derive(Error, Debug)]
pub enum PdfError {
    #[error("failed to open PDF: {0}")]
    OpenError(String),
    #[error("failed to extract text: {0}")]
    ExtractionError(String),
    #[error("page {0} out of range")]
    PageOutOfRange(usize),
    #[error("unresolvable page reference: {0:?}")]
    UnresolvedPage(PageRef),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
