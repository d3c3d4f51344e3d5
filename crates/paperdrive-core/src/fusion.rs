//! Record fusion: merge source records into a canonical [`Paper`].

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::identity::{IdentityIndex, NoIdentityIndex, ensure_identity};
use crate::paper::Paper;
use crate::sources::{Contribute, SourceRecord};

/// Merges source records into papers in a fixed source priority order.
///
/// Scalars are first-non-empty-wins, so local values always beat remote
/// ones and earlier sources beat later ones. Citations and references are
/// re-derived from the stored source records on every fuse; a paper with no
/// citing source ends up with none.
#[derive(Clone)]
pub struct Fusion {
    priority: Vec<String>,
    identity: Arc<dyn IdentityIndex>,
}

impl Fusion {
    pub fn new(priority: Vec<String>) -> Self {
        Self {
            priority,
            identity: Arc::new(NoIdentityIndex),
        }
    }

    pub fn with_identity_index(mut self, index: Arc<dyn IdentityIndex>) -> Self {
        self.identity = index;
        self
    }

    pub fn priority(&self) -> &[String] {
        &self.priority
    }

    /// Fuse `sources` into a copy of `existing`.
    ///
    /// Records in `sources` replace stored records of the same source name.
    /// Fusing again with no new sources returns the same paper.
    pub fn fuse(&self, existing: &Paper, sources: &BTreeMap<String, SourceRecord>) -> Paper {
        let mut paper = existing.clone();
        for (name, record) in sources {
            paper.sources.insert(name.clone(), record.clone());
        }

        paper.citations.clear();
        paper.references.clear();

        let stored = std::mem::take(&mut paper.sources);
        for record in self.ordered(&stored) {
            record.contribute_to(&mut paper);
        }
        paper.sources = stored;

        paper.refresh();
        ensure_identity(&mut paper, self.identity.as_ref());
        paper
    }

    /// Records in priority order; sources missing from the priority list
    /// follow in name order.
    fn ordered<'a>(&self, sources: &'a BTreeMap<String, SourceRecord>) -> Vec<&'a SourceRecord> {
        let ranked = self.priority.iter().filter_map(|name| sources.get(name));
        let rest = sources
            .iter()
            .filter(|(name, _)| !self.priority.contains(name))
            .map(|(_, record)| record);
        ranked.chain(rest).collect()
    }
}
