//! Per-paper cache of expensive derived data.
//!
//! Citations, references, the abstract, PDF structure and raw source records
//! live here, keyed by paper id, apart from the lightweight listing record
//! so that listing papers never loads citation graphs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use paperdrive_pdf::PdfInfo;

use crate::CoreError;
use crate::paper::{Paper, PaperSummary};
use crate::sources::SourceRecord;

/// The cached part of a paper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaperCache {
    pub citations: Vec<PaperSummary>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub pdf_info: Option<PdfInfo>,
    pub references: Vec<PaperSummary>,
    pub sources: BTreeMap<String, SourceRecord>,
}

impl PaperCache {
    pub fn from_paper(paper: &Paper) -> Self {
        Self {
            citations: paper.citations.clone(),
            abstract_text: paper.abstract_text.clone(),
            pdf_info: paper.pdf_info.clone(),
            references: paper.references.clone(),
            sources: paper.sources.clone(),
        }
    }

    /// Restore the cached fields onto `paper`.
    pub fn apply_to(self, paper: &mut Paper) {
        paper.citations = self.citations;
        paper.abstract_text = self.abstract_text;
        paper.pdf_info = self.pdf_info;
        paper.references = self.references;
        paper.sources = self.sources;
        paper.cache_loaded = true;
    }
}

/// Keyed cache persistence. Last write wins; the store never merges.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn save(&self, id: &str, payload: &PaperCache) -> Result<(), CoreError>;

    /// `Ok(None)` when nothing is cached for `id`.
    async fn load(&self, id: &str) -> Result<Option<PaperCache>, CoreError>;
}

/// In-memory [`CacheStore`]. Payloads are kept as JSON so what comes back
/// out is exactly what a persistent store would return.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Value>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cache hits since creation.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of cache misses since creation.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn save(&self, id: &str, payload: &PaperCache) -> Result<(), CoreError> {
        let value = serde_json::to_value(payload)?;
        self.entries.insert(id.to_string(), value);
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<PaperCache>, CoreError> {
        let Some(value) = self.entries.get(id).map(|e| e.value().clone()) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(serde_json::from_value(value)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cached_paper() -> Paper {
        Paper {
            id: "doe2020attention".into(),
            abstract_text: "We study attention.".into(),
            citations: vec![PaperSummary {
                title: "Follow-up".into(),
                pdf_url: Some("https://arxiv.org/pdf/2101.00002.pdf".into()),
                ..PaperSummary::default()
            }],
            pdf_info: Some(PdfInfo::default()),
            ..Paper::default()
        }
    }

    #[tokio::test]
    async fn miss_on_empty() {
        let cache = MemoryCache::new();
        assert!(cache.load("nothing").await.unwrap().is_none());
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 0);
    }

    #[tokio::test]
    async fn save_then_load_restores_fields() {
        let cache = MemoryCache::new();
        let paper = cached_paper();
        cache.save(&paper.id, &PaperCache::from_paper(&paper)).await.unwrap();

        let mut restored = Paper {
            id: paper.id.clone(),
            ..Paper::default()
        };
        cache.load(&paper.id).await.unwrap().unwrap().apply_to(&mut restored);
        assert!(restored.cache_loaded);
        assert_eq!(restored.abstract_text, paper.abstract_text);
        assert_eq!(restored.citations, paper.citations);
        assert_eq!(restored.pdf_info, paper.pdf_info);
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let cache = MemoryCache::new();
        let mut payload = PaperCache::from_paper(&cached_paper());
        cache.save("p", &payload).await.unwrap();
        payload.abstract_text = "second".into();
        payload.citations.clear();
        cache.save("p", &payload).await.unwrap();

        let loaded = cache.load("p").await.unwrap().unwrap();
        assert_eq!(loaded.abstract_text, "second");
        assert!(loaded.citations.is_empty());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn payload_uses_stored_field_names() {
        let json = serde_json::to_value(PaperCache::from_paper(&cached_paper())).unwrap();
        assert_eq!(json["abstract"], "We study attention.");
        assert!(json.get("pdfInfo").is_some());
        assert_eq!(json["citations"][0]["pdfUrl"], "https://arxiv.org/pdf/2101.00002.pdf");
    }
}
