//! arXiv source: Atom feed search and id/title lookup.
//!
//! API docs: https://info.arxiv.org/help/api/user-manual.html

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use quick_xml::Reader;
use quick_xml::encoding::Decoder;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{ARXIV, Contribute, SourceAdapter, SourceError, SourceRecord, fill};
use crate::matching::{normalize_title, titles_match};
use crate::paper::Paper;
use crate::tags;
use crate::transport::Transport;

const DEFAULT_BASE_URL: &str = "https://export.arxiv.org/api/query";

static ARXIV_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"arxiv\.org/(?:abs|pdf)/((?:\d{4}\.\d{4,5})|(?:[a-z][a-z.-]*/\d{7}))(v\d+)?")
        .unwrap()
});

static VERSION_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"v\d+$").unwrap());

/// One Atom `<entry>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArxivRecord {
    /// arXiv id with version, e.g. `1706.03762v5`.
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub authors: Vec<String>,
    pub published: String,
    pub updated: String,
    pub pdf_url: String,
    pub categories: Vec<String>,
    pub primary_category: String,
    pub doi: String,
}

impl ArxivRecord {
    /// The id without its version suffix.
    pub fn canonical_id(&self) -> &str {
        match VERSION_SUFFIX.find(&self.id) {
            Some(m) => &self.id[..m.start()],
            None => &self.id,
        }
    }
}

impl Contribute for ArxivRecord {
    fn contribute_to(&self, paper: &mut Paper) {
        fill(&mut paper.pdf_url, &self.pdf_url);
        fill(&mut paper.title, &self.title);
        fill(&mut paper.abstract_text, &self.abstract_text);
        fill(&mut paper.year, self.updated.get(..4).unwrap_or(""));
        fill(&mut paper.arxiv_id, self.canonical_id());
        if paper.authors.is_empty() {
            paper.authors = self.authors.clone();
        }
        paper.append_tags(self.categories.iter().map(|c| tags::typed("category", c)));
    }
}

/// `https://arxiv.org/pdf/<id>.pdf`
pub fn pdf_url_from_id(id: &str) -> String {
    format!("https://arxiv.org/pdf/{id}.pdf")
}

/// The arXiv id (without version) in an abs or pdf URL.
pub fn extract_arxiv_id(url: &str) -> Option<String> {
    ARXIV_URL
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn attribute(e: &BytesStart<'_>, key: &[u8], decoder: Decoder) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.decode_and_unescape_value(decoder).ok())
        .map(|v| v.into_owned())
}

/// Parse an Atom feed into records.
///
/// Error entries (arXiv reports query errors as an entry whose id points at
/// `/api/errors`) are dropped.
pub fn parse_atom(xml: &str) -> Result<Vec<ArxivRecord>, SourceError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut entry: Option<ArxivRecord> = None;
    let mut in_author = false;
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| SourceError::Parse(format!("XML parse error: {e}")))?;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "entry" => entry = Some(ArxivRecord::default()),
                    "author" => in_author = true,
                    _ => {}
                }
                if let Some(record) = entry.as_mut() {
                    entry_attributes(record, &name, &e, reader.decoder());
                }
                text.clear();
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if let Some(record) = entry.as_mut() {
                    entry_attributes(record, &name, &e, reader.decoder());
                }
            }
            Event::Text(e) => {
                let chunk = e
                    .unescape()
                    .map_err(|e| SourceError::Parse(format!("XML text error: {e}")))?;
                text.push_str(&chunk);
            }
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e)),
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if let Some(record) = entry.as_mut() {
                    let value = collapse_whitespace(&text);
                    match name.as_str() {
                        "id" => {
                            record.url = value.clone();
                            record.id = value
                                .rsplit_once("/abs/")
                                .map(|(_, id)| id.to_string())
                                .unwrap_or(value);
                        }
                        "title" => record.title = value,
                        "summary" => record.abstract_text = value,
                        "published" => record.published = value,
                        "updated" => record.updated = value,
                        "doi" => record.doi = value,
                        "name" if in_author => record.authors.push(value),
                        "author" => in_author = false,
                        _ => {}
                    }
                }
                if name == "entry" {
                    if let Some(record) = entry.take() {
                        if record.url.contains("/api/errors") {
                            log::debug!("arxiv: dropping error entry: {}", record.abstract_text);
                        } else {
                            records.push(record);
                        }
                    }
                }
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(records)
}

fn entry_attributes(record: &mut ArxivRecord, name: &str, e: &BytesStart<'_>, decoder: Decoder) {
    match name {
        "link" => {
            let is_pdf = attribute(e, b"title", decoder).as_deref() == Some("pdf")
                || attribute(e, b"type", decoder).as_deref() == Some("application/pdf");
            if let Some(href) = attribute(e, b"href", decoder).filter(|_| is_pdf) {
                record.pdf_url = href;
            }
        }
        "primary_category" => {
            if let Some(term) = attribute(e, b"term", decoder) {
                record.primary_category = term;
            }
        }
        "category" => {
            if let Some(term) = attribute(e, b"term", decoder) {
                if !record.categories.contains(&term) {
                    record.categories.push(term);
                }
            }
        }
        _ => {}
    }
}

/// arXiv query builder: queries without a field prefix search all fields.
fn search_query(query: &str) -> String {
    let query = query.trim();
    if query.contains(':') {
        query.to_string()
    } else {
        format!("all:{query}")
    }
}

pub struct ArxivAdapter {
    transport: Arc<dyn Transport>,
    base_url: String,
}

impl ArxivAdapter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn query(&self, params: &[(&str, String)]) -> Result<Vec<ArxivRecord>, SourceError> {
        let qs = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("{}?{}", self.base_url, qs);
        let body = self.transport.get_text(ARXIV, &url).await?;
        parse_atom(&body)
    }
}

#[async_trait]
impl SourceAdapter for ArxivAdapter {
    fn name(&self) -> &'static str {
        ARXIV
    }

    async fn search(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let records = self
            .query(&[
                ("search_query", search_query(query)),
                ("start", offset.to_string()),
                ("max_results", limit.to_string()),
            ])
            .await?;
        Ok(records.into_iter().map(SourceRecord::Arxiv).collect())
    }

    async fn fetch_best(
        &self,
        url: Option<&str>,
        title: Option<&str>,
    ) -> Result<Option<SourceRecord>, SourceError> {
        if let Some(id) = url.and_then(extract_arxiv_id) {
            let records = self.query(&[("id_list", id)]).await?;
            return Ok(records.into_iter().next().map(SourceRecord::Arxiv));
        }

        let Some(title) = title.map(normalize_title).filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let records = self
            .query(&[
                ("search_query", format!("ti:\"{title}\"")),
                ("max_results", "1".to_string()),
            ])
            .await?;
        Ok(records
            .into_iter()
            .next()
            .filter(|r| titles_match(&r.title, &title))
            .map(SourceRecord::Arxiv))
    }
}
