use thiserror::Error;

pub mod cache;
pub mod collection;
pub mod config;
pub mod fusion;
pub mod identity;
pub mod library;
pub mod matching;
pub mod paper;
pub mod pdf_opener;
pub mod rate_limit;
pub mod sources;
pub mod store;
pub mod tags;
pub mod transport;

// Re-export for convenience
pub use paperdrive_pdf::{Destination, KnownReference, OutlineNode, PdfAnalyzer, PdfInfo};

pub use cache::{CacheStore, MemoryCache, PaperCache};
pub use collection::{Collection, CollectionIndex};
pub use config::Config;
pub use fusion::Fusion;
pub use identity::{IdentityIndex, claim_identity, ensure_identity};
pub use library::{FetchOutcome, Library, SearchOutcome, SharedError, SourceFailure};
pub use paper::{Paper, PaperListing, PaperSummary};
pub use pdf_opener::RemotePdfOpener;
pub use sources::{SourceAdapter, SourceError, SourceRecord};
pub use store::{KeyValueStore, MemoryStore};
pub use transport::{ReqwestTransport, Transport};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("PDF error: {0}")]
    Pdf(#[from] paperdrive_pdf::PdfError),
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("store error: {0}")]
    Store(String),
    #[error("invalid stored record: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error("fetch task failed: {0}")]
    Task(String),
}
