//! The library engine: fetching, searching and persisting papers.
//!
//! ```text
//! fetch(paper)
//!   ├─ single-flight on the paper's identity key
//!   ├─ fetch_paper: every fetch adapter concurrently → Fusion
//!   ├─ PdfAnalyzer on the resolved document (prior pdf_info kept on failure)
//!   └─ save_cache + persist
//! ```
//!
//! Source and destination fan-out is joined on the caller's task. The only
//! spawned task is the shared body of `fetch`, which runs to completion even
//! when every caller stops waiting for it.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared, join_all};
use serde_json::Value;

use paperdrive_pdf::{PdfAnalyzer, PdfOpener};

use crate::cache::{CacheStore, PaperCache};
use crate::collection::{Collection, CollectionIndex};
use crate::config::Config;
use crate::fusion::Fusion;
use crate::identity::{IdentityIndex, claim_identity, ensure_identity};
use crate::matching::normalize_title;
use crate::paper::{Paper, PaperListing, now_millis};
use crate::pdf_opener::RemotePdfOpener;
use crate::sources::{self, SourceAdapter, SourceError};
use crate::store::KeyValueStore;
use crate::transport::{ReqwestTransport, Transport};
use crate::{CoreError, tags};

const PAPERS: &str = "papers";

/// A fetch error shared by every caller that joined the same fetch.
pub type SharedError = Arc<CoreError>;

/// One source that failed during a fetch or search.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFailure {
    pub source: String,
    pub error: SourceError,
}

/// Result of fetching a paper. Source failures make it partial, never
/// failed.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub paper: Paper,
    pub failures: Vec<SourceFailure>,
}

impl FetchOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub papers: Vec<Paper>,
    pub failures: Vec<SourceFailure>,
}

/// Ids owned by library papers, with the normalized title of each owner.
#[derive(Default)]
struct IdentityRegistry {
    owners: DashMap<String, String>,
}

impl IdentityRegistry {
    fn claim(&self, id: &str, title: &str) {
        self.owners.insert(id.to_string(), normalize_title(title));
    }

    fn release(&self, id: &str) {
        self.owners.remove(id);
    }
}

impl IdentityIndex for IdentityRegistry {
    fn owner_of(&self, id: &str) -> Option<String> {
        self.owners.get(id).map(|e| e.value().clone())
    }
}

type InFlight = Shared<BoxFuture<'static, Result<FetchOutcome, SharedError>>>;

/// Handle to a paper library. Clones share the same state.
#[derive(Clone)]
pub struct Library {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    store: Arc<dyn KeyValueStore>,
    cache: Arc<dyn CacheStore>,
    fetch_adapters: Vec<Arc<dyn SourceAdapter>>,
    search_adapters: Vec<Arc<dyn SourceAdapter>>,
    analyzer: PdfAnalyzer,
    fusion: Fusion,
    identities: Arc<IdentityRegistry>,
    collections: CollectionIndex,
    in_flight: DashMap<String, InFlight>,
}

/// Adapters named in `names`, in that order.
fn select(names: &[String], adapters: &[Arc<dyn SourceAdapter>]) -> Vec<Arc<dyn SourceAdapter>> {
    names
        .iter()
        .filter_map(|name| {
            let found = adapters.iter().find(|a| a.name() == name).cloned();
            if found.is_none() {
                log::warn!("source '{name}' is configured but has no adapter");
            }
            found
        })
        .collect()
}

/// Key under which concurrent fetches of the same paper are joined.
fn flight_key(paper: &Paper) -> String {
    if !paper.id.is_empty() {
        format!("id:{}", paper.id)
    } else if !paper.pdf_url.is_empty() {
        format!("url:{}", paper.pdf_url)
    } else {
        format!("title:{}", normalize_title(&paper.title))
    }
}

impl Library {
    /// Open a library over `store`, loading the ids already in use.
    ///
    /// `adapters` is the pool of available sources; `config` decides which
    /// of them fetch and search use, and in which priority.
    pub async fn open(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        cache: Arc<dyn CacheStore>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        pdf_opener: Arc<dyn PdfOpener>,
    ) -> Result<Self, CoreError> {
        let identities = Arc::new(IdentityRegistry::default());
        let fusion = Fusion::new(config.fetch_sources.clone()).with_identity_index(identities.clone());

        let library = Self {
            inner: Arc::new(Inner {
                fetch_adapters: select(&config.fetch_sources, &adapters),
                search_adapters: select(&config.search_sources, &adapters),
                analyzer: PdfAnalyzer::new(pdf_opener),
                collections: CollectionIndex::new(store.clone()),
                in_flight: DashMap::new(),
                config,
                store,
                cache,
                fusion,
                identities,
            }),
        };

        for (id, listing) in library.listings().await? {
            library.inner.identities.claim(&id, &listing.title);
        }
        log::debug!("library opened with {} papers", library.inner.identities.owners.len());
        Ok(library)
    }

    /// Open a library that talks to the real sources over HTTP.
    pub async fn connect(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        cache: Arc<dyn CacheStore>,
    ) -> Result<Self, CoreError> {
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(&config)?);
        let mut seen = HashSet::new();
        let names: Vec<String> = config
            .fetch_sources
            .iter()
            .chain(&config.search_sources)
            .filter(|name| seen.insert(name.as_str()))
            .cloned()
            .collect();
        let adapters = sources::adapters_for(&names, transport.clone());
        let opener = Arc::new(RemotePdfOpener::new(transport));
        Self::open(config, store, cache, adapters, opener).await
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn fusion(&self) -> &Fusion {
        &self.inner.fusion
    }

    pub fn collections(&self) -> &CollectionIndex {
        &self.inner.collections
    }

    /// Query every fetch adapter concurrently and fuse the answers.
    ///
    /// Stored source records are replaced by the fresh ones. A source that
    /// fails keeps its previous record and is reported in `failures`.
    pub async fn fetch_paper(&self, paper: &Paper) -> FetchOutcome {
        let url = Some(paper.pdf_url.as_str()).filter(|u| !u.is_empty());
        let title = Some(paper.title.as_str()).filter(|t| !t.trim().is_empty());

        let results = join_all(self.inner.fetch_adapters.iter().map(|adapter| async move {
            (adapter.name(), adapter.fetch_best(url, title).await)
        }))
        .await;

        let mut records = BTreeMap::new();
        let mut failures = Vec::new();
        let mut answered = false;
        for (name, result) in results {
            match result {
                Ok(Some(record)) => {
                    records.insert(name.to_string(), record);
                    answered = true;
                }
                Ok(None) => {
                    log::debug!("{name}: no match for '{}'", paper.title);
                    answered = true;
                }
                Err(error) => {
                    log::warn!("{name}: fetch failed: {error}");
                    if let Some(previous) = paper.sources.get(name) {
                        records.insert(name.to_string(), previous.clone());
                    }
                    failures.push(SourceFailure {
                        source: name.to_string(),
                        error,
                    });
                }
            }
        }

        let mut base = paper.clone();
        base.sources.clear();
        let mut fused = self.inner.fusion.fuse(&base, &records);
        if answered {
            fused.date_fetched = Some(now_millis());
        }
        fused.is_fetching = false;
        FetchOutcome {
            paper: fused,
            failures,
        }
    }

    /// Fetch, analyze, cache and persist `paper`.
    ///
    /// Concurrent calls for the same paper join one operation and all get
    /// its outcome. The operation runs in its own task: a caller that stops
    /// waiting leaves it running, and its result is still cached and
    /// persisted.
    pub async fn fetch(&self, paper: &Paper) -> Result<FetchOutcome, SharedError> {
        let key = flight_key(paper);
        let flight = self
            .inner
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| self.start_fetch(key, paper.clone()))
            .clone();
        flight.await
    }

    fn start_fetch(&self, key: String, paper: Paper) -> InFlight {
        let library = self.clone();
        let task = tokio::spawn(async move {
            let outcome = library.run_fetch(paper).await.map_err(Arc::new);
            library.inner.in_flight.remove(&key);
            outcome
        });
        async move {
            task.await
                .unwrap_or_else(|e| Err(Arc::new(CoreError::Task(e.to_string()))))
        }
        .boxed()
        .shared()
    }

    /// Whether a fetch for `paper` is in flight.
    pub fn is_fetching(&self, paper: &Paper) -> bool {
        self.inner.in_flight.contains_key(&flight_key(paper))
    }

    async fn run_fetch(&self, paper: Paper) -> Result<FetchOutcome, CoreError> {
        let mut outcome = self.fetch_paper(&paper).await;
        let paper = &mut outcome.paper;

        let location = paper
            .local_path
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| paper.pdf_url.clone());
        if !location.is_empty() {
            match self.inner.analyzer.analyze(&location, &paper.known_references()).await {
                Some(info) => paper.pdf_info = Some(info),
                None => log::info!("{location}: no PDF structure, keeping previous"),
            }
        }

        self.save_cache(paper).await?;
        self.persist(paper).await?;
        Ok(outcome)
    }

    /// Search every search adapter concurrently. Each hit becomes an
    /// ephemeral paper fused from that one record.
    pub async fn search(&self, query: &str, limit: usize) -> SearchOutcome {
        let results = join_all(self.inner.search_adapters.iter().map(|adapter| async move {
            (adapter.name(), adapter.search(query, 0, limit).await)
        }))
        .await;

        let mut outcome = SearchOutcome::default();
        for (name, result) in results {
            match result {
                Ok(records) => {
                    log::debug!("{name}: {} results for '{query}'", records.len());
                    outcome.papers.extend(records.into_iter().map(|record| {
                        let sources = BTreeMap::from([(name.to_string(), record)]);
                        self.inner.fusion.fuse(&Paper::default(), &sources)
                    }));
                }
                Err(error) => {
                    log::warn!("{name}: search failed: {error}");
                    outcome.failures.push(SourceFailure {
                        source: name.to_string(),
                        error,
                    });
                }
            }
        }
        outcome
    }

    /// Write the listing record of a library paper. Papers outside the
    /// library are never written.
    pub async fn persist(&self, paper: &mut Paper) -> Result<(), CoreError> {
        if !paper.in_library {
            return Ok(());
        }
        paper.refresh();
        let id = self.assign_identity(paper);

        let now = now_millis();
        let mut listing = paper.listing();
        listing.date_added = paper.date_added.or(Some(now));
        listing.date_modified = Some(now);
        self.inner
            .store
            .set(&format!("{PAPERS}.{id}"), serde_json::to_value(&listing)?)
            .await?;

        paper.date_added = listing.date_added;
        paper.date_modified = listing.date_modified;
        self.inner.identities.claim(&id, &paper.title);
        Ok(())
    }

    /// Identity for `paper`. A paper that was never persisted re-checks an
    /// id it was given elsewhere, since ephemeral papers never claim theirs.
    fn assign_identity(&self, paper: &mut Paper) -> String {
        let index = self.inner.identities.as_ref();
        if paper.date_added.is_none() {
            claim_identity(paper, index)
        } else {
            ensure_identity(paper, index)
        }
    }

    /// Save the paper's cached fields, assigning its identity first.
    pub async fn save_cache(&self, paper: &mut Paper) -> Result<String, CoreError> {
        let id = self.assign_identity(paper);
        self.inner.cache.save(&id, &PaperCache::from_paper(paper)).await?;
        Ok(id)
    }

    /// Restore cached fields. `Ok(false)` when nothing is cached.
    pub async fn load_cache(&self, paper: &mut Paper) -> Result<bool, CoreError> {
        if paper.id.is_empty() {
            return Ok(false);
        }
        match self.inner.cache.load(&paper.id).await? {
            Some(payload) => {
                payload.apply_to(paper);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Keep `paper` in the library. Auto-filled papers are fetched first.
    pub async fn add_to_library(&self, paper: &Paper) -> Result<FetchOutcome, SharedError> {
        let mut paper = paper.clone();
        paper.in_library = true;
        paper.removed = false;
        if paper.auto_fill {
            return self.fetch(&paper).await;
        }

        self.save_cache(&mut paper).await?;
        self.persist(&mut paper).await?;
        Ok(FetchOutcome {
            paper,
            failures: Vec::new(),
        })
    }

    /// Drop `paper` from the library. Collections that list it keep the id.
    pub async fn remove(&self, paper: &mut Paper) -> Result<(), CoreError> {
        if paper.id.is_empty() {
            return Ok(());
        }
        paper.removed = true;
        paper.in_library = false;
        self.inner.store.delete(&format!("{PAPERS}.{}", paper.id)).await?;
        self.inner.identities.release(&paper.id);
        log::info!("removed '{}'", paper.id);
        Ok(())
    }

    pub async fn toggle_star(&self, paper: &mut Paper) -> Result<bool, CoreError> {
        paper.starred = !paper.starred;
        self.persist(paper).await?;
        Ok(paper.starred)
    }

    pub async fn set_read(&self, paper: &mut Paper, read: bool) -> Result<(), CoreError> {
        paper.read = read;
        self.persist(paper).await
    }

    async fn listings(&self) -> Result<Vec<(String, PaperListing)>, CoreError> {
        let Some(Value::Object(entries)) = self.inner.store.get(PAPERS).await? else {
            return Ok(Vec::new());
        };
        let mut listings = Vec::with_capacity(entries.len());
        for (id, value) in entries {
            listings.push((id, serde_json::from_value(value)?));
        }
        listings.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(listings)
    }

    fn from_listing(&self, id: &str, listing: PaperListing) -> Paper {
        let mut paper = Paper::from_listing(id, listing);
        paper.is_fetching = self.is_fetching(&paper);
        paper
    }

    /// Every library paper, in id order, without cached fields.
    pub async fn local_papers(&self) -> Result<Vec<Paper>, CoreError> {
        Ok(self
            .listings()
            .await?
            .into_iter()
            .map(|(id, listing)| self.from_listing(&id, listing))
            .collect())
    }

    pub async fn get_paper(&self, id: &str) -> Result<Option<Paper>, CoreError> {
        let Some(value) = self.inner.store.get(&format!("{PAPERS}.{id}")).await? else {
            return Ok(None);
        };
        let listing: PaperListing = serde_json::from_value(value)?;
        Ok(Some(self.from_listing(id, listing)))
    }

    /// Tags used anywhere in the library followed by `default_tags`,
    /// without duplicates.
    pub async fn all_tags(&self, default_tags: &[String]) -> Result<Vec<String>, CoreError> {
        let mut all = Vec::new();
        for paper in self.local_papers().await? {
            tags::union(&mut all, paper.tags);
        }
        tags::union(&mut all, tags::normalize_tags(default_tags));
        Ok(all)
    }

    pub async fn all_authors(&self) -> Result<Vec<String>, CoreError> {
        let mut seen = HashSet::new();
        let mut all = Vec::new();
        for paper in self.local_papers().await? {
            for author in paper.authors {
                if seen.insert(author.clone()) {
                    all.push(author);
                }
            }
        }
        Ok(all)
    }

    /// Add `paper` to a collection, persisting it first so it has an id.
    pub async fn add_to_collection(
        &self,
        paper: &mut Paper,
        collection_key: &str,
    ) -> Result<Collection, CoreError> {
        self.persist(paper).await?;
        let id = self.assign_identity(paper);
        self.inner.collections.add_paper(collection_key, &id).await
    }
}
