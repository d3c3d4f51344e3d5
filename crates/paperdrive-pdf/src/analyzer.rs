//! Structural analysis of a PDF: outline, anchored destinations, annotations.
//!
//! Analysis of one document moves through
//! `Unopened -> Opened -> TextExtracted -> DestinationsResolved -> Done`,
//! or `Unopened -> Failed` when the document cannot be opened or read. A
//! failed analysis yields no structure at all, never a partial one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;

use crate::document::{OutlineEntry, PdfDocument, PdfOpener, RawDestination};
use crate::{Annotation, Destination, KnownReference, OutlineNode, PdfError, PdfInfo, TextRun};

/// Progress of a single document analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    Unopened,
    Opened,
    /// Text runs of every page are materialized; carries the page count.
    TextExtracted(usize),
    DestinationsResolved,
    Done,
    Failed,
}

impl fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisState::Unopened => write!(f, "unopened"),
            AnalysisState::Opened => write!(f, "opened"),
            AnalysisState::TextExtracted(pages) => write!(f, "text extracted ({pages} pages)"),
            AnalysisState::DestinationsResolved => write!(f, "destinations resolved"),
            AnalysisState::Done => write!(f, "done"),
            AnalysisState::Failed => write!(f, "failed"),
        }
    }
}

/// Extracts navigable structure from PDFs opened through a [`PdfOpener`].
#[derive(Clone)]
pub struct PdfAnalyzer {
    opener: Arc<dyn PdfOpener>,
}

impl PdfAnalyzer {
    pub fn new(opener: Arc<dyn PdfOpener>) -> Self {
        Self { opener }
    }

    /// Analyze the document at `pdf_url`. Returns `None` if it cannot be
    /// opened or read.
    pub async fn analyze(&self, pdf_url: &str, known_references: &[KnownReference]) -> Option<PdfInfo> {
        self.analyze_with_progress(pdf_url, known_references, |_| {})
            .await
    }

    /// Like [`analyze`](Self::analyze), reporting every state transition.
    pub async fn analyze_with_progress<F>(
        &self,
        pdf_url: &str,
        known_references: &[KnownReference],
        progress: F,
    ) -> Option<PdfInfo>
    where
        F: Fn(AnalysisState) + Send + Sync,
    {
        let report = |state: AnalysisState| {
            log::debug!("{pdf_url}: {state}");
            progress(state);
        };

        report(AnalysisState::Unopened);
        if pdf_url.trim().is_empty() {
            report(AnalysisState::Failed);
            return None;
        }

        let doc = match self.opener.open(pdf_url).await {
            Ok(doc) => doc,
            Err(e) => {
                log::warn!("{pdf_url}: {e}");
                report(AnalysisState::Failed);
                return None;
            }
        };
        report(AnalysisState::Opened);

        match run_analysis(doc.as_ref(), &report).await {
            Ok(info) => {
                log::debug!(
                    "{pdf_url}: {} destinations, {} known references",
                    info.destinations.len(),
                    known_references.len()
                );
                report(AnalysisState::Done);
                Some(info)
            }
            Err(e) => {
                log::warn!("{pdf_url}: {e}");
                report(AnalysisState::Failed);
                None
            }
        }
    }
}

async fn run_analysis(
    doc: &dyn PdfDocument,
    report: &(dyn Fn(AnalysisState) + Send + Sync),
) -> Result<PdfInfo, PdfError> {
    let outline = doc.outline().await?.map(map_outline);

    // Destination resolution reads arbitrary pages, so every page is
    // materialized before any destination is looked at.
    let page_count = doc.page_count();
    let mut all_text: Vec<Vec<TextRun>> = Vec::with_capacity(page_count);
    let mut annotations: Vec<Vec<Annotation>> = Vec::with_capacity(page_count);
    for page_number in 1..=page_count {
        all_text.push(doc.text_content(page_number).await?);
        let mut page_annotations = doc.annotations(page_number).await?;
        sort_reading_order(&mut page_annotations);
        annotations.push(page_annotations);
    }
    report(AnalysisState::TextExtracted(page_count));

    let raw = doc.destinations().await?;
    let destinations = resolve_destinations(doc, raw, &all_text).await;
    report(AnalysisState::DestinationsResolved);

    Ok(PdfInfo {
        outline,
        destinations,
        annotations,
    })
}

fn map_outline(entries: Vec<OutlineEntry>) -> Vec<OutlineNode> {
    entries
        .into_iter()
        .map(|entry| OutlineNode {
            name: entry.title,
            items: map_outline(entry.children),
        })
        .collect()
}

async fn resolve_destinations(
    doc: &dyn PdfDocument,
    raw: BTreeMap<String, RawDestination>,
    all_text: &[Vec<TextRun>],
) -> BTreeMap<String, Destination> {
    let pending = raw.into_iter().map(|(name, dest)| async move {
        match doc.page_index(dest.page).await {
            Ok(page) => Some((name, anchor_destination(page, &dest, all_text))),
            Err(e) => {
                log::debug!("skipping destination {name}: {e}");
                None
            }
        }
    });

    join_all(pending).await.into_iter().flatten().collect()
}

fn anchor_destination(page: usize, dest: &RawDestination, all_text: &[Vec<TextRun>]) -> Destination {
    let runs = all_text.get(page).map(Vec::as_slice).unwrap_or_default();
    let text_start = anchor_index(runs, dest.y);
    Destination {
        page,
        x: dest.x,
        y: dest.y,
        z: dest.z,
        text_start,
        text: runs.get(text_start).cloned(),
    }
}

/// Index of the first run whose baseline is at or below `y`, or `runs.len()`
/// when no run qualifies. A destination without a vertical coordinate never
/// anchors.
pub(crate) fn anchor_index(runs: &[TextRun], y: Option<f32>) -> usize {
    y.and_then(|y| runs.iter().position(|run| run.y <= y))
        .unwrap_or(runs.len())
}

fn sort_reading_order(annotations: &mut [Annotation]) {
    annotations.sort_by(|a, b| {
        b.top()
            .total_cmp(&a.top())
            .then_with(|| a.left().total_cmp(&b.left()))
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::PageRef;

    fn run(text: &str, y: f32) -> TextRun {
        TextRun {
            text: text.into(),
            x: 72.0,
            y,
            height: 10.0,
        }
    }

    #[derive(Clone, Default)]
    struct FakeDocument {
        outline: Option<Vec<OutlineEntry>>,
        pages: Vec<Vec<TextRun>>,
        annotations: Vec<Vec<Annotation>>,
        destinations: BTreeMap<String, RawDestination>,
        page_objects: HashMap<(u32, u16), usize>,
        broken_page: Option<usize>,
    }

    #[async_trait]
    impl PdfDocument for FakeDocument {
        fn page_count(&self) -> usize {
            self.pages.len()
        }

        async fn outline(&self) -> Result<Option<Vec<OutlineEntry>>, PdfError> {
            Ok(self.outline.clone())
        }

        async fn text_content(&self, page_number: usize) -> Result<Vec<TextRun>, PdfError> {
            if self.broken_page == Some(page_number) {
                return Err(PdfError::ExtractionError("bad content stream".into()));
            }
            self.pages
                .get(page_number - 1)
                .cloned()
                .ok_or(PdfError::PageOutOfRange(page_number))
        }

        async fn annotations(&self, page_number: usize) -> Result<Vec<Annotation>, PdfError> {
            Ok(self.annotations.get(page_number - 1).cloned().unwrap_or_default())
        }

        async fn destinations(&self) -> Result<BTreeMap<String, RawDestination>, PdfError> {
            Ok(self.destinations.clone())
        }

        async fn page_index(&self, page: PageRef) -> Result<usize, PdfError> {
            match page {
                PageRef::Index(i) => Ok(i),
                PageRef::Object(num, generation) => self
                    .page_objects
                    .get(&(num, generation))
                    .copied()
                    .ok_or(PdfError::UnresolvedPage(page)),
            }
        }
    }

    struct FakeOpener(Option<FakeDocument>);

    #[async_trait]
    impl PdfOpener for FakeOpener {
        async fn open(&self, location: &str) -> Result<Box<dyn PdfDocument>, PdfError> {
            match &self.0 {
                Some(doc) => Ok(Box::new(doc.clone())),
                None => Err(PdfError::OpenError(format!("cannot read {location}"))),
            }
        }
    }

    fn analyzer(doc: Option<FakeDocument>) -> PdfAnalyzer {
        PdfAnalyzer::new(Arc::new(FakeOpener(doc)))
    }

    fn xyz(page: PageRef, y: f32) -> RawDestination {
        RawDestination {
            page,
            x: Some(72.0),
            y: Some(y),
            z: None,
        }
    }

    #[test]
    fn anchor_picks_first_run_at_or_below() {
        let runs = vec![run("Title", 700.0), run("Intro", 480.0), run("Body", 300.0)];
        assert_eq!(anchor_index(&runs, Some(500.0)), 1);
        assert_eq!(anchor_index(&runs, Some(480.0)), 1);
        assert_eq!(anchor_index(&runs, Some(800.0)), 0);
        assert_eq!(anchor_index(&runs, Some(100.0)), 3);
        assert_eq!(anchor_index(&runs, None), 3);
        assert_eq!(anchor_index(&[], Some(100.0)), 0);
    }

    #[tokio::test]
    async fn destination_resolves_to_run_below_target() {
        let mut doc = FakeDocument {
            pages: vec![vec![run("Cover", 700.0)], vec![run("[1] Vaswani et al.", 480.0)]],
            ..Default::default()
        };
        doc.page_objects.insert((12, 0), 1);
        doc.destinations
            .insert("cite.vaswani".into(), xyz(PageRef::Object(12, 0), 500.0));

        let info = analyzer(Some(doc)).analyze("paper.pdf", &[]).await.unwrap();
        let dest = &info.destinations["cite.vaswani"];
        assert_eq!(dest.page, 1);
        assert_eq!(dest.text_start, 0);
        assert_eq!(dest.text.as_ref().unwrap().text, "[1] Vaswani et al.");
        assert_eq!(dest.y, Some(500.0));
    }

    #[tokio::test]
    async fn destination_without_anchor_keeps_position() {
        let doc = FakeDocument {
            pages: vec![vec![run("Heading", 700.0), run("Footer", 400.0)]],
            destinations: BTreeMap::from([("fig.1".to_string(), xyz(PageRef::Index(0), 50.0))]),
            ..Default::default()
        };

        let info = analyzer(Some(doc)).analyze("paper.pdf", &[]).await.unwrap();
        let dest = &info.destinations["fig.1"];
        assert_eq!(dest.page, 0);
        assert_eq!(dest.x, Some(72.0));
        assert_eq!(dest.y, Some(50.0));
        assert_eq!(dest.text_start, 2);
        assert!(dest.text.is_none());
    }

    #[tokio::test]
    async fn destination_without_y_is_not_anchored() {
        let doc = FakeDocument {
            pages: vec![vec![run("Heading", 700.0)]],
            destinations: BTreeMap::from([(
                "sec.1".to_string(),
                RawDestination {
                    page: PageRef::Index(0),
                    x: None,
                    y: None,
                    z: None,
                },
            )]),
            ..Default::default()
        };

        let info = analyzer(Some(doc)).analyze("paper.pdf", &[]).await.unwrap();
        let dest = &info.destinations["sec.1"];
        assert_eq!(dest.page, 0);
        assert_eq!(dest.text_start, 1);
        assert!(dest.text.is_none());
    }

    #[tokio::test]
    async fn unresolvable_destination_is_skipped() {
        let doc = FakeDocument {
            pages: vec![vec![run("Body", 500.0)]],
            destinations: BTreeMap::from([
                ("good".to_string(), xyz(PageRef::Index(0), 600.0)),
                ("dangling".to_string(), xyz(PageRef::Object(99, 0), 600.0)),
            ]),
            ..Default::default()
        };

        let info = analyzer(Some(doc)).analyze("paper.pdf", &[]).await.unwrap();
        assert!(info.destinations.contains_key("good"));
        assert!(!info.destinations.contains_key("dangling"));
    }

    #[tokio::test]
    async fn missing_outline_stays_absent() {
        let doc = FakeDocument {
            pages: vec![vec![]],
            ..Default::default()
        };
        let info = analyzer(Some(doc)).analyze("paper.pdf", &[]).await.unwrap();
        assert!(info.outline.is_none());
    }

    #[tokio::test]
    async fn outline_leaf_has_empty_items() {
        let doc = FakeDocument {
            pages: vec![vec![]],
            outline: Some(vec![
                OutlineEntry {
                    title: "Introduction".into(),
                    children: vec![],
                },
                OutlineEntry {
                    title: "Method".into(),
                    children: vec![OutlineEntry {
                        title: "Attention".into(),
                        children: vec![],
                    }],
                },
            ]),
            ..Default::default()
        };

        let info = analyzer(Some(doc)).analyze("paper.pdf", &[]).await.unwrap();
        let outline = info.outline.unwrap();
        assert_eq!(outline.len(), 2);
        assert_eq!(outline[0].name, "Introduction");
        assert!(outline[0].items.is_empty());
        assert_eq!(outline[1].items[0].name, "Attention");
    }

    #[tokio::test]
    async fn empty_outline_is_not_absent() {
        let doc = FakeDocument {
            pages: vec![vec![]],
            outline: Some(vec![]),
            ..Default::default()
        };
        let info = analyzer(Some(doc)).analyze("paper.pdf", &[]).await.unwrap();
        assert_eq!(info.outline, Some(vec![]));
    }

    #[tokio::test]
    async fn unopenable_document_yields_nothing() {
        let states = Mutex::new(Vec::new());
        let info = analyzer(None)
            .analyze_with_progress("missing.pdf", &[], |s| states.lock().unwrap().push(s))
            .await;
        assert!(info.is_none());
        assert_eq!(
            *states.lock().unwrap(),
            vec![AnalysisState::Unopened, AnalysisState::Failed]
        );
    }

    #[tokio::test]
    async fn extraction_failure_discards_partial_structure() {
        let doc = FakeDocument {
            pages: vec![vec![run("a", 1.0)], vec![run("b", 1.0)]],
            outline: Some(vec![]),
            broken_page: Some(2),
            ..Default::default()
        };
        assert!(analyzer(Some(doc)).analyze("paper.pdf", &[]).await.is_none());
    }

    #[tokio::test]
    async fn progress_follows_state_machine() {
        let doc = FakeDocument {
            pages: vec![vec![], vec![], vec![]],
            ..Default::default()
        };
        let states = Mutex::new(Vec::new());
        analyzer(Some(doc))
            .analyze_with_progress("paper.pdf", &[], |s| states.lock().unwrap().push(s))
            .await
            .unwrap();
        assert_eq!(
            *states.lock().unwrap(),
            vec![
                AnalysisState::Unopened,
                AnalysisState::Opened,
                AnalysisState::TextExtracted(3),
                AnalysisState::DestinationsResolved,
                AnalysisState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn annotations_are_per_page_in_reading_order() {
        let note = |top: f32, left: f32| Annotation {
            subtype: "Link".into(),
            rect: [left, top - 10.0, left + 20.0, top],
            contents: None,
        };
        let doc = FakeDocument {
            pages: vec![vec![], vec![]],
            annotations: vec![vec![note(300.0, 50.0), note(700.0, 300.0), note(700.0, 100.0)]],
            ..Default::default()
        };

        let info = analyzer(Some(doc)).analyze("paper.pdf", &[]).await.unwrap();
        assert_eq!(info.annotations.len(), 2);
        let lefts: Vec<f32> = info.annotations[0].iter().map(Annotation::left).collect();
        assert_eq!(lefts, vec![100.0, 300.0, 50.0]);
        assert!(info.annotations[1].is_empty());
    }
}
