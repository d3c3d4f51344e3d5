//! `lopdf` implementation of the document collaborator.
//!
//! The whole document is read when it is opened: outline, named
//! destinations, and per-page text runs and annotations. Text runs are
//! positioned by interpreting the text operators of each page content stream
//! (text matrix, text line matrix and CTM); glyphs are decoded without font
//! encodings, which is enough for positional anchoring.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::document::{OutlineEntry, PageRef, PdfDocument, PdfOpener, RawDestination};
use crate::{Annotation, PdfError, TextRun};

/// Nesting limit for outline and name-tree recursion.
const MAX_DEPTH: usize = 64;

/// Reference chains longer than this are treated as broken.
const MAX_INDIRECTION: usize = 16;

/// A PDF loaded with `lopdf`.
#[derive(Debug, Clone)]
pub struct LopdfDocument {
    outline: Option<Vec<OutlineEntry>>,
    destinations: BTreeMap<String, RawDestination>,
    /// Per page, in page order. Extraction errors are kept per page.
    text: Vec<Result<Vec<TextRun>, String>>,
    annotations: Vec<Vec<Annotation>>,
    page_numbers: HashMap<(u32, u16), usize>,
}

impl LopdfDocument {
    /// Load a document from disk.
    pub fn load(path: &Path) -> Result<Self, PdfError> {
        let doc = Document::load(path)
            .map_err(|e| PdfError::OpenError(format!("{}: {e}", path.display())))?;
        Ok(Self::from_document(&doc))
    }

    /// [`load`](Self::load) on the blocking thread pool.
    pub async fn load_async(path: PathBuf) -> Result<Self, PdfError> {
        let display = path.display().to_string();
        tokio::task::spawn_blocking(move || Self::load(&path))
            .await
            .map_err(|e| PdfError::OpenError(format!("{display}: {e}")))?
    }

    /// [`from_bytes`](Self::from_bytes) on the blocking thread pool.
    pub async fn from_bytes_async(bytes: Vec<u8>) -> Result<Self, PdfError> {
        tokio::task::spawn_blocking(move || Self::from_bytes(&bytes))
            .await
            .map_err(|e| PdfError::OpenError(e.to_string()))?
    }

    /// Load a document from an in-memory buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PdfError> {
        if bytes.len() < 4 || &bytes[0..4] != b"%PDF" {
            return Err(PdfError::OpenError("not a PDF document".into()));
        }
        let doc = Document::load_mem(bytes).map_err(|e| PdfError::OpenError(e.to_string()))?;
        Ok(Self::from_document(&doc))
    }

    fn from_document(doc: &Document) -> Self {
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let reader = Reader { doc };

        let text = pages
            .iter()
            .enumerate()
            .map(|(i, id)| reader.text_runs(*id).map_err(|e| format!("page {}: {e}", i + 1)))
            .collect();
        let annotations = pages.iter().map(|id| reader.annotations(*id)).collect();
        let page_numbers = pages
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();

        Self {
            outline: reader.outline(),
            destinations: reader.destinations(),
            text,
            annotations,
            page_numbers,
        }
    }
}

#[async_trait]
impl PdfDocument for LopdfDocument {
    fn page_count(&self) -> usize {
        self.text.len()
    }

    async fn outline(&self) -> Result<Option<Vec<OutlineEntry>>, PdfError> {
        Ok(self.outline.clone())
    }

    async fn text_content(&self, page_number: usize) -> Result<Vec<TextRun>, PdfError> {
        let page = page_number
            .checked_sub(1)
            .and_then(|i| self.text.get(i))
            .ok_or(PdfError::PageOutOfRange(page_number))?;
        page.clone().map_err(PdfError::ExtractionError)
    }

    async fn annotations(&self, page_number: usize) -> Result<Vec<Annotation>, PdfError> {
        page_number
            .checked_sub(1)
            .and_then(|i| self.annotations.get(i))
            .cloned()
            .ok_or(PdfError::PageOutOfRange(page_number))
    }

    async fn destinations(&self) -> Result<BTreeMap<String, RawDestination>, PdfError> {
        Ok(self.destinations.clone())
    }

    async fn page_index(&self, page: PageRef) -> Result<usize, PdfError> {
        match page {
            PageRef::Object(num, generation) => self
                .page_numbers
                .get(&(num, generation))
                .copied()
                .ok_or(PdfError::UnresolvedPage(page)),
            PageRef::Index(i) if i < self.text.len() => Ok(i),
            PageRef::Index(_) => Err(PdfError::UnresolvedPage(page)),
        }
    }
}

/// Opens local files (plain paths or `file://` URLs).
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfOpener;

#[async_trait]
impl PdfOpener for LopdfOpener {
    async fn open(&self, location: &str) -> Result<Box<dyn PdfDocument>, PdfError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            return Err(PdfError::OpenError(format!(
                "{location}: remote documents need a downloading opener"
            )));
        }
        let path = location.strip_prefix("file://").unwrap_or(location);
        let doc = LopdfDocument::load_async(PathBuf::from(path)).await?;
        Ok(Box::new(doc))
    }
}

struct Reader<'a> {
    doc: &'a Document,
}

impl<'a> Reader<'a> {
    fn resolve(&self, obj: &'a Object) -> Option<&'a Object> {
        let mut current = obj;
        for _ in 0..MAX_INDIRECTION {
            match current {
                Object::Reference(id) => current = self.doc.get_object(*id).ok()?,
                _ => return Some(current),
            }
        }
        None
    }

    fn lookup(&self, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
        dict.get(key).ok().and_then(|obj| self.resolve(obj))
    }

    fn lookup_dict(&self, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
        self.lookup(dict, key).and_then(as_dict)
    }

    fn catalog(&self) -> Option<&'a Dictionary> {
        self.lookup_dict(&self.doc.trailer, b"Root")
    }

    fn outline(&self) -> Option<Vec<OutlineEntry>> {
        let outlines = self.lookup_dict(self.catalog()?, b"Outlines")?;
        let first = outlines.get(b"First").ok()?;
        Some(self.outline_siblings(first, &mut HashSet::new(), 0))
    }

    fn outline_siblings(
        &self,
        first: &'a Object,
        visited: &mut HashSet<ObjectId>,
        depth: usize,
    ) -> Vec<OutlineEntry> {
        let mut entries = Vec::new();
        let mut next = Some(first);
        while let Some(obj) = next {
            if let Object::Reference(id) = obj {
                if !visited.insert(*id) {
                    break;
                }
            }
            let Some(item) = self.resolve(obj).and_then(as_dict) else {
                break;
            };
            let title = self.lookup(item, b"Title").map(decode_text).unwrap_or_default();
            let children = match item.get(b"First") {
                Ok(child) if depth < MAX_DEPTH => self.outline_siblings(child, visited, depth + 1),
                _ => Vec::new(),
            };
            entries.push(OutlineEntry { title, children });
            next = item.get(b"Next").ok();
        }
        entries
    }

    fn destinations(&self) -> BTreeMap<String, RawDestination> {
        let mut out = BTreeMap::new();
        let Some(catalog) = self.catalog() else {
            return out;
        };

        // PDF 1.1 style dictionary
        if let Some(dests) = self.lookup_dict(catalog, b"Dests") {
            for (name, value) in dests.iter() {
                if let Some(dest) = self.destination(value) {
                    out.insert(String::from_utf8_lossy(name).into_owned(), dest);
                }
            }
        }

        // PDF 1.2+ name tree
        if let Some(tree) = self
            .lookup_dict(catalog, b"Names")
            .and_then(|names| self.lookup_dict(names, b"Dests"))
        {
            self.walk_name_tree(tree, &mut out, &mut HashSet::new(), 0);
        }
        out
    }

    fn walk_name_tree(
        &self,
        node: &'a Dictionary,
        out: &mut BTreeMap<String, RawDestination>,
        visited: &mut HashSet<ObjectId>,
        depth: usize,
    ) {
        if let Some(Object::Array(names)) = self.lookup(node, b"Names") {
            for pair in names.chunks(2) {
                let [key, value] = pair else { continue };
                let Some(name) = self.resolve(key).map(decode_text) else {
                    continue;
                };
                if let Some(dest) = self.destination(value) {
                    out.insert(name, dest);
                }
            }
        }

        if depth >= MAX_DEPTH {
            return;
        }
        if let Some(Object::Array(kids)) = self.lookup(node, b"Kids") {
            for kid in kids {
                if let Object::Reference(id) = kid {
                    if !visited.insert(*id) {
                        continue;
                    }
                }
                if let Some(child) = self.resolve(kid).and_then(as_dict) {
                    self.walk_name_tree(child, out, visited, depth + 1);
                }
            }
        }
    }

    /// Parse an explicit destination: `[page /Kind args...]` or `<< /D [...] >>`.
    fn destination(&self, value: &'a Object) -> Option<RawDestination> {
        let array = match self.resolve(value)? {
            Object::Array(array) => array,
            Object::Dictionary(dict) => match self.lookup(dict, b"D")? {
                Object::Array(array) => array,
                _ => return None,
            },
            _ => return None,
        };

        let page = match array.first()? {
            Object::Reference((num, generation)) => PageRef::Object(*num, *generation),
            Object::Integer(i) => PageRef::Index(usize::try_from(*i).ok()?),
            _ => return None,
        };
        let arg = |i: usize| array.get(i).and_then(number);
        let kind = match array.get(1) {
            Some(Object::Name(kind)) => kind.as_slice(),
            _ => b"XYZ".as_slice(),
        };

        let (x, y, z) = match kind {
            b"FitH" | b"FitBH" => (None, arg(2), None),
            b"FitV" | b"FitBV" => (arg(2), None, None),
            b"FitR" => (arg(2), arg(5), None),
            b"Fit" | b"FitB" => (None, None, None),
            _ => (arg(2), arg(3), arg(4)),
        };
        Some(RawDestination { page, x, y, z })
    }

    fn text_runs(&self, page_id: ObjectId) -> Result<Vec<TextRun>, lopdf::Error> {
        let data = self.doc.get_page_content(page_id)?;
        let content = Content::decode(&data)?;
        Ok(TextCursor::default().runs(&content.operations))
    }

    fn annotations(&self, page_id: ObjectId) -> Vec<Annotation> {
        let Ok(page) = self.doc.get_dictionary(page_id) else {
            return Vec::new();
        };
        let Some(Object::Array(annots)) = self.lookup(page, b"Annots") else {
            return Vec::new();
        };

        annots
            .iter()
            .filter_map(|annot| self.resolve(annot).and_then(as_dict))
            .filter_map(|annot| {
                let rect = match self.lookup(annot, b"Rect") {
                    Some(Object::Array(r)) if r.len() == 4 => [
                        number(&r[0])?,
                        number(&r[1])?,
                        number(&r[2])?,
                        number(&r[3])?,
                    ],
                    _ => return None,
                };
                let subtype = match self.lookup(annot, b"Subtype") {
                    Some(Object::Name(name)) => String::from_utf8_lossy(name).into_owned(),
                    _ => "Unknown".to_string(),
                };
                let contents = self
                    .lookup(annot, b"Contents")
                    .map(decode_text)
                    .filter(|s| !s.is_empty());
                Some(Annotation {
                    subtype,
                    rect,
                    contents,
                })
            })
            .collect()
    }
}

type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// `m × n` for PDF affine matrices `[a b c d e f]`.
fn multiply(m: &Matrix, n: &Matrix) -> Matrix {
    [
        m[0] * n[0] + m[1] * n[2],
        m[0] * n[1] + m[1] * n[3],
        m[2] * n[0] + m[3] * n[2],
        m[2] * n[1] + m[3] * n[3],
        m[4] * n[0] + m[5] * n[2] + n[4],
        m[4] * n[1] + m[5] * n[3] + n[5],
    ]
}

fn translation(tx: f32, ty: f32) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

/// Graphics and text state needed to position text runs.
struct TextCursor {
    ctm: Matrix,
    saved: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    leading: f32,
    font_size: f32,
}

impl Default for TextCursor {
    fn default() -> Self {
        Self {
            ctm: IDENTITY,
            saved: Vec::new(),
            tm: IDENTITY,
            tlm: IDENTITY,
            leading: 0.0,
            font_size: 0.0,
        }
    }
}

impl TextCursor {
    fn runs(mut self, operations: &[Operation]) -> Vec<TextRun> {
        let mut runs = Vec::new();
        for op in operations {
            let args = &op.operands;
            let num = |i: usize| args.get(i).and_then(number).unwrap_or(0.0);
            match op.operator.as_str() {
                "q" => self.saved.push(self.ctm),
                "Q" => {
                    if let Some(ctm) = self.saved.pop() {
                        self.ctm = ctm;
                    }
                }
                "cm" => {
                    let m = [num(0), num(1), num(2), num(3), num(4), num(5)];
                    self.ctm = multiply(&m, &self.ctm);
                }
                "BT" => {
                    self.tm = IDENTITY;
                    self.tlm = IDENTITY;
                }
                "Tm" => {
                    self.tlm = [num(0), num(1), num(2), num(3), num(4), num(5)];
                    self.tm = self.tlm;
                }
                "Td" => self.next_line(num(0), num(1)),
                "TD" => {
                    self.leading = -num(1);
                    self.next_line(num(0), num(1));
                }
                "TL" => self.leading = num(0),
                "Tf" => self.font_size = num(1),
                "T*" => self.next_line(0.0, -self.leading),
                "Tj" => runs.extend(self.show(args.first())),
                "TJ" => runs.extend(self.show(args.first())),
                "'" => {
                    self.next_line(0.0, -self.leading);
                    runs.extend(self.show(args.first()));
                }
                "\"" => {
                    self.next_line(0.0, -self.leading);
                    runs.extend(self.show(args.get(2)));
                }
                _ => {}
            }
        }
        runs
    }

    fn next_line(&mut self, tx: f32, ty: f32) {
        self.tlm = multiply(&translation(tx, ty), &self.tlm);
        self.tm = self.tlm;
    }

    fn show(&self, operand: Option<&Object>) -> Option<TextRun> {
        let text = match operand? {
            Object::String(bytes, _) => decode_bytes(bytes),
            Object::Array(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        Object::String(bytes, _) => text.push_str(&decode_bytes(bytes)),
                        // Large negative kerning is an inter-word gap.
                        other if number(other).is_some_and(|n| n < -250.0) => text.push(' '),
                        _ => {}
                    }
                }
                text
            }
            _ => return None,
        };
        if text.is_empty() {
            return None;
        }

        let trm = multiply(&self.tm, &self.ctm);
        Some(TextRun {
            text,
            x: trm[4],
            y: trm[5],
            height: self.font_size * trm[2].hypot(trm[3]),
        })
    }
}

fn as_dict(obj: &Object) -> Option<&Dictionary> {
    match obj {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn decode_text(obj: &Object) -> String {
    match obj {
        Object::String(bytes, _) => decode_bytes(bytes),
        Object::Name(name) => String::from_utf8_lossy(name).into_owned(),
        _ => String::new(),
    }
}

/// Decode a PDF text string: UTF-16BE with BOM, otherwise single-byte.
fn decode_bytes(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes
        .iter()
        .filter(|b| !b.is_ascii_control() || b.is_ascii_whitespace())
        .map(|&b| b as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use lopdf::StringFormat;

    use super::*;

    fn op(operator: &str, operands: Vec<Object>) -> Operation {
        Operation::new(operator, operands)
    }

    fn int(v: i64) -> Object {
        Object::Integer(v)
    }

    fn text(s: &str) -> Object {
        Object::String(s.as_bytes().to_vec(), StringFormat::Literal)
    }

    #[test]
    fn text_runs_follow_text_matrix() {
        let ops = vec![
            op("BT", vec![]),
            op("Tf", vec![Object::Name(b"F1".to_vec()), int(10)]),
            op("Td", vec![int(72), int(700)]),
            op("Tj", vec![text("Abstract")]),
            op("TL", vec![int(12)]),
            op("T*", vec![]),
            op("Tj", vec![text("We propose")]),
            op("ET", vec![]),
        ];
        let runs = TextCursor::default().runs(&ops);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].text, "Abstract");
        assert_eq!((runs[0].x, runs[0].y), (72.0, 700.0));
        assert_eq!(runs[1].y, 688.0);
        assert_eq!(runs[1].height, 10.0);
    }

    #[test]
    fn ctm_offsets_text_position() {
        let ops = vec![
            op("q", vec![]),
            op("cm", vec![int(1), int(0), int(0), int(1), int(0), int(100)]),
            op("BT", vec![]),
            op("Td", vec![int(10), int(20)]),
            op("Tj", vec![text("shifted")]),
            op("ET", vec![]),
            op("Q", vec![]),
            op("BT", vec![]),
            op("Td", vec![int(10), int(20)]),
            op("Tj", vec![text("plain")]),
            op("ET", vec![]),
        ];
        let runs = TextCursor::default().runs(&ops);
        assert_eq!(runs[0].y, 120.0);
        assert_eq!(runs[1].y, 20.0);
    }

    #[test]
    fn tj_array_joins_parts_with_word_gaps() {
        let ops = vec![
            op("BT", vec![]),
            op(
                "TJ",
                vec![Object::Array(vec![text("Atten"), int(-20), text("tion"), int(-400), text("is")])],
            ),
            op("ET", vec![]),
        ];
        let runs = TextCursor::default().runs(&ops);
        assert_eq!(runs[0].text, "Attention is");
    }

    #[test]
    fn decodes_utf16_strings() {
        let bytes = [0xFE, 0xFF, 0x00, 0x49, 0x00, 0x6E, 0x00, 0x74, 0x00, 0x72, 0x00, 0x6F];
        assert_eq!(decode_bytes(&bytes), "Intro");
        assert_eq!(decode_bytes(b"Related Work"), "Related Work");
    }

    #[test]
    fn rejects_non_pdf_bytes() {
        assert!(matches!(
            LopdfDocument::from_bytes(b"<html>"),
            Err(PdfError::OpenError(_))
        ));
    }

    fn minimal_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content = Content {
            operations: vec![
                op("BT", vec![]),
                op("Td", vec![int(72), int(700)]),
                op("Tj", vec![text("Introduction")]),
                op("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(lopdf::Stream::new(
            Dictionary::new(),
            content.encode().unwrap(),
        ));
        let mut page = Dictionary::new();
        page.set("Type", "Page");
        page.set("Parent", pages_id);
        page.set("Contents", content_id);
        page.set("MediaBox", vec![int(0), int(0), int(612), int(792)]);
        let page_id = doc.add_object(page);
        let mut pages = Dictionary::new();
        pages.set("Type", "Pages");
        pages.set("Kids", vec![Object::Reference(page_id)]);
        pages.set("Count", 1);
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let mut catalog = Dictionary::new();
        catalog.set("Type", "Catalog");
        catalog.set("Pages", pages_id);
        let catalog_id = doc.add_object(catalog);
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[tokio::test]
    async fn opens_files_on_a_current_thread_runtime() {
        let path = std::env::temp_dir().join(format!("paperdrive-{}.pdf", std::process::id()));
        std::fs::write(&path, minimal_pdf()).unwrap();
        let opened = LopdfOpener
            .open(&format!("file://{}", path.display()))
            .await;
        let _ = std::fs::remove_file(&path);
        let doc = opened.unwrap();
        assert_eq!(doc.page_count(), 1);
        let runs = doc.text_content(1).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].text, "Introduction");
        assert_eq!(runs[0].y, 700.0);
    }

    #[tokio::test]
    async fn missing_files_are_open_errors() {
        let err = LopdfOpener.open("/definitely/not/here.pdf").await.err().unwrap();
        assert!(matches!(err, PdfError::OpenError(_)));
    }

    #[tokio::test]
    async fn blocking_parse_rejects_non_pdf_bytes() {
        assert!(matches!(
            LopdfDocument::from_bytes_async(b"<html>".to_vec()).await,
            Err(PdfError::OpenError(_))
        ));
    }
}
