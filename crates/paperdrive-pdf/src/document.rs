//! Collaborator traits for opening and reading PDF documents.
//!
//! The analyzer never touches a PDF library directly; it drives a
//! [`PdfDocument`] handle obtained from a [`PdfOpener`]. The `pdf` feature
//! provides a `lopdf` implementation, tests provide in-memory fakes.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{Annotation, PdfError, TextRun};

/// A page reference as stored in a destination array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageRef {
    /// Indirect reference to a page object.
    Object(u32, u16),
    /// Direct 0-based page index (used by remote go-to actions and some producers).
    Index(usize),
}

/// A named destination before page resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDestination {
    pub page: PageRef,
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub z: Option<f32>,
}

/// An outline item as stored in the document.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlineEntry {
    pub title: String,
    pub children: Vec<OutlineEntry>,
}

/// An opened PDF document.
#[async_trait]
pub trait PdfDocument: Send + Sync {
    fn page_count(&self) -> usize;

    /// The outline tree, or `None` when the document declares no outline.
    async fn outline(&self) -> Result<Option<Vec<OutlineEntry>>, PdfError>;

    /// Ordered text runs of a page. `page_number` is 1-based.
    async fn text_content(&self, page_number: usize) -> Result<Vec<TextRun>, PdfError>;

    /// Annotations of a page in storage order. `page_number` is 1-based.
    async fn annotations(&self, page_number: usize) -> Result<Vec<Annotation>, PdfError>;

    /// All named destinations keyed by name.
    async fn destinations(&self) -> Result<BTreeMap<String, RawDestination>, PdfError>;

    /// Resolve a page reference to a 0-based page index.
    async fn page_index(&self, page: PageRef) -> Result<usize, PdfError>;
}

/// Opens a document from a path or URL.
#[async_trait]
pub trait PdfOpener: Send + Sync {
    async fn open(&self, location: &str) -> Result<Box<dyn PdfDocument>, PdfError>;
}
