//! The canonical paper record and its projections.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use paperdrive_pdf::{KnownReference, PdfInfo};

use crate::sources::SourceRecord;
use crate::tags;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Last whitespace-separated token of an author name.
pub fn surname(author: &str) -> &str {
    author.split_whitespace().last().unwrap_or("")
}

/// A cited or citing paper, kept shallow to bound the citation graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaperSummary {
    pub title: String,
    pub authors: Vec<String>,
    pub venue: String,
    pub year: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
}

/// A locally owned bibliographic record.
///
/// Empty strings mean "unknown". `venue_and_year`, `author_short` and
/// `author_full` are recomputed by [`refresh`](Paper::refresh) and never
/// edited directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Paper {
    pub id: String,
    pub arxiv_id: String,
    pub title: String,
    pub pdf_url: String,
    pub local_path: Option<String>,
    pub in_library: bool,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub authors: Vec<String>,
    pub keywords: Vec<String>,
    pub tags: Vec<String>,
    pub custom_tags: Vec<String>,
    pub zoom_percentage: u32,
    pub year: String,
    pub venue: String,
    pub venue_and_year: String,
    pub author_short: String,
    pub author_full: String,
    pub removed: bool,
    pub num_citations: u64,
    pub citations: Vec<PaperSummary>,
    pub references: Vec<PaperSummary>,
    pub starred: bool,
    pub auto_fill: bool,
    pub thumbnail: Option<String>,
    /// Last record fetched from each source, keyed by source name.
    pub sources: BTreeMap<String, SourceRecord>,
    pub date_added: Option<i64>,
    pub date_modified: Option<i64>,
    pub date_fetched: Option<i64>,
    pub date_synced: Option<i64>,
    pub is_fetching: bool,
    pub pdf_info: Option<PdfInfo>,
    pub read: bool,
    pub cache_loaded: bool,
}

impl Default for Paper {
    fn default() -> Self {
        Self {
            id: String::new(),
            arxiv_id: String::new(),
            title: String::new(),
            pdf_url: String::new(),
            local_path: None,
            in_library: false,
            abstract_text: String::new(),
            authors: Vec::new(),
            keywords: Vec::new(),
            tags: Vec::new(),
            custom_tags: Vec::new(),
            zoom_percentage: 100,
            year: String::new(),
            venue: String::new(),
            venue_and_year: String::new(),
            author_short: String::new(),
            author_full: String::new(),
            removed: false,
            num_citations: 0,
            citations: Vec::new(),
            references: Vec::new(),
            starred: false,
            auto_fill: true,
            thumbnail: None,
            sources: BTreeMap::new(),
            date_added: None,
            date_modified: None,
            date_fetched: None,
            date_synced: None,
            is_fetching: false,
            pdf_info: None,
            read: false,
            cache_loaded: false,
        }
    }
}

/// The lightweight record stored under `papers.<id>` and used for listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaperListing {
    pub id: String,
    pub title: String,
    pub year: String,
    pub venue: String,
    pub pdf_url: String,
    pub local_path: Option<String>,
    pub in_library: bool,
    pub authors: Vec<String>,
    pub tags: Vec<String>,
    pub zoom_percentage: u32,
    pub num_citations: u64,
    pub starred: bool,
    pub thumbnail: Option<String>,
    pub date_added: Option<i64>,
    pub date_modified: Option<i64>,
    pub date_fetched: Option<i64>,
    pub date_synced: Option<i64>,
    pub read: bool,
}

impl Paper {
    pub fn with_title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Recompute derived fields and normalize stored ones.
    ///
    /// Derived fields depend only on stored fields, so refreshing twice is
    /// the same as refreshing once.
    pub fn refresh(&mut self) {
        if let Some(rest) = self.pdf_url.strip_prefix("http:") {
            self.pdf_url = format!("https:{rest}");
        }
        self.tags = tags::normalize_tags(&self.tags);
        self.venue_and_year = format!("{} {}", self.venue, self.year).trim().to_string();
        self.author_short = match self.authors.as_slice() {
            [first, _, _, ..] => format!("{} et al.", surname(first)),
            authors => authors.join(", "),
        };
        self.author_full = self.authors.join(", ");
    }

    /// Add tags with set semantics. New tags are normalized on the way in.
    pub fn append_tags<I, S>(&mut self, new: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized = new.into_iter().filter_map(|t| tags::normalize_tag(t.as_ref()));
        tags::union(&mut self.tags, normalized);
    }

    /// Values of all `tag_type:value` tags, `None` when the paper has none.
    pub fn tags_by_type(&self, tag_type: &str) -> Option<Vec<String>> {
        tags::values_of_type(&self.tags, tag_type)
    }

    pub fn listing(&self) -> PaperListing {
        PaperListing {
            id: self.id.clone(),
            title: self.title.clone(),
            year: self.year.clone(),
            venue: self.venue.clone(),
            pdf_url: self.pdf_url.clone(),
            local_path: self.local_path.clone(),
            in_library: self.in_library,
            authors: self.authors.clone(),
            tags: self.tags.clone(),
            zoom_percentage: self.zoom_percentage,
            num_citations: self.num_citations,
            starred: self.starred,
            thumbnail: self.thumbnail.clone(),
            date_added: self.date_added,
            date_modified: self.date_modified,
            date_fetched: self.date_fetched,
            date_synced: self.date_synced,
            read: self.read,
        }
    }

    /// Rebuild a library paper from its stored listing. The storage key wins
    /// over any id inside the record.
    pub fn from_listing(id: &str, listing: PaperListing) -> Self {
        let mut paper = Self {
            id: id.to_string(),
            title: listing.title,
            year: listing.year,
            venue: listing.venue,
            pdf_url: listing.pdf_url,
            local_path: listing.local_path,
            in_library: true,
            authors: listing.authors,
            tags: listing.tags,
            zoom_percentage: listing.zoom_percentage,
            num_citations: listing.num_citations,
            starred: listing.starred,
            thumbnail: listing.thumbnail,
            date_added: listing.date_added,
            date_modified: listing.date_modified,
            date_fetched: listing.date_fetched,
            date_synced: listing.date_synced,
            read: listing.read,
            ..Self::default()
        };
        paper.refresh();
        paper
    }

    /// References in the form the PDF analyzer takes.
    pub fn known_references(&self) -> Vec<KnownReference> {
        self.references
            .iter()
            .map(|r| KnownReference {
                title: r.title.clone(),
                authors: r.authors.clone(),
            })
            .collect()
    }

    /// Fill `{field}` placeholders (camelCase field names) from this paper.
    ///
    /// Lists are joined with `", "`; unknown placeholders are left as is.
    pub fn format(&self, template: &str) -> String {
        let fields = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => return template.to_string(),
        };

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                out.push_str(&rest[open..]);
                return out;
            };
            let key = &after[..close];
            match fields.get(key) {
                Some(value) => out.push_str(&display_value(value)),
                None => out.push_str(&rest[open..open + close + 2]),
            }
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        out
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
