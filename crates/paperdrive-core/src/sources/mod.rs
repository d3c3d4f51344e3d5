//! External bibliographic sources.
//!
//! Each source has an adapter that searches or looks up records, and a
//! record type that knows how to contribute its fields to a [`Paper`]. The
//! fusion core only sees [`SourceRecord::contribute_to`], so a new source is
//! a new variant here plus an adapter, nothing else.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paper::Paper;
use crate::transport::Transport;

pub mod arxiv;
pub mod semantic_scholar;

pub use arxiv::{ArxivAdapter, ArxivRecord};
pub use semantic_scholar::{SemanticScholarAdapter, SemanticScholarRecord};

pub const ARXIV: &str = "arxiv";
pub const SEMANTIC_SCHOLAR: &str = "semanticscholar";

/// Failure of a single source request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Server returned 429 Too Many Requests.
    #[error("rate limited (429){}", fmt_retry_after(.retry_after))]
    RateLimited { retry_after: Option<Duration> },
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected response: {0}")]
    Parse(String),
}

fn fmt_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {:.1}s", d.as_secs_f64()),
        None => String::new(),
    }
}

impl SourceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::Status { status: 404, .. })
    }
}

/// Contributes a source's fields to a paper under the fusion rules:
/// scalars only fill empty fields, author lists only replace an empty list,
/// tags are unioned.
pub trait Contribute {
    fn contribute_to(&self, paper: &mut Paper);
}

/// A normalized record from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source")]
pub enum SourceRecord {
    #[serde(rename = "arxiv")]
    Arxiv(ArxivRecord),
    #[serde(rename = "semanticscholar")]
    SemanticScholar(SemanticScholarRecord),
}

impl SourceRecord {
    pub fn source_name(&self) -> &'static str {
        match self {
            SourceRecord::Arxiv(_) => ARXIV,
            SourceRecord::SemanticScholar(_) => SEMANTIC_SCHOLAR,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            SourceRecord::Arxiv(r) => &r.title,
            SourceRecord::SemanticScholar(r) => &r.title,
        }
    }

    pub fn authors(&self) -> Vec<String> {
        match self {
            SourceRecord::Arxiv(r) => r.authors.clone(),
            SourceRecord::SemanticScholar(r) => r.author_names(),
        }
    }
}

impl Contribute for SourceRecord {
    fn contribute_to(&self, paper: &mut Paper) {
        match self {
            SourceRecord::Arxiv(r) => r.contribute_to(paper),
            SourceRecord::SemanticScholar(r) => r.contribute_to(paper),
        }
    }
}

/// Fill `field` from `value` when `field` is empty.
pub(crate) fn fill(field: &mut String, value: &str) {
    if field.is_empty() && !value.is_empty() {
        *field = value.to_string();
    }
}

/// One external source.
///
/// Adapters hold no mutable state shared with other adapters; the library
/// runs them concurrently.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<SourceRecord>, SourceError>;

    /// Best single match for a paper. A URL that identifies a record is
    /// resolved directly; otherwise the top title hit is accepted only if
    /// its title matches. `Ok(None)` when nothing matches.
    async fn fetch_best(
        &self,
        url: Option<&str>,
        title: Option<&str>,
    ) -> Result<Option<SourceRecord>, SourceError>;
}

/// Build the adapter registered under `name`.
pub fn adapter_for(name: &str, transport: Arc<dyn Transport>) -> Option<Arc<dyn SourceAdapter>> {
    match name {
        ARXIV => Some(Arc::new(ArxivAdapter::new(transport))),
        SEMANTIC_SCHOLAR => Some(Arc::new(SemanticScholarAdapter::new(transport))),
        _ => None,
    }
}

/// Adapters for every known name in `names`, in order. Unknown names are
/// logged and skipped.
pub fn adapters_for(names: &[String], transport: Arc<dyn Transport>) -> Vec<Arc<dyn SourceAdapter>> {
    names
        .iter()
        .filter_map(|name| {
            let adapter = adapter_for(name, transport.clone());
            if adapter.is_none() {
                log::warn!("unknown source '{name}' ignored");
            }
            adapter
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display_includes_retry() {
        let e = SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(e.to_string(), "rate limited (429), retry after 3.0s");
        let e = SourceError::RateLimited { retry_after: None };
        assert_eq!(e.to_string(), "rate limited (429)");
    }

    #[test]
    fn only_404_counts_as_not_found() {
        let e = SourceError::Status {
            status: 404,
            url: "u".into(),
        };
        assert!(e.is_not_found());
        assert!(!SourceError::Timeout.is_not_found());
    }

    #[test]
    fn record_serializes_with_source_tag() {
        let record = SourceRecord::Arxiv(ArxivRecord {
            id: "1706.03762v5".into(),
            title: "Attention Is All You Need".into(),
            ..ArxivRecord::default()
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["source"], "arxiv");
        let back: SourceRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.source_name(), ARXIV);
    }

    #[test]
    fn fill_only_writes_empty_fields() {
        let mut title = String::new();
        fill(&mut title, "First");
        fill(&mut title, "Second");
        assert_eq!(title, "First");
        fill(&mut title, "");
        assert_eq!(title, "First");
    }
}
