//! Semantic Scholar Graph API source.
//!
//! Resolves papers by arXiv id or DOI when the URL carries one, otherwise by
//! title search. The detail record brings citations and references along.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::arxiv::{extract_arxiv_id, pdf_url_from_id};
use super::{Contribute, SEMANTIC_SCHOLAR, SourceAdapter, SourceError, SourceRecord, fill};
use crate::matching::{normalize_title, titles_match};
use crate::paper::{Paper, PaperSummary};
use crate::tags;
use crate::transport::Transport;

const DEFAULT_BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";

const SEARCH_FIELDS: &str =
    "paperId,url,title,abstract,externalIds,authors,year,venue,citationCount,s2FieldsOfStudy";

const DETAIL_FIELDS: &str = "paperId,url,title,abstract,externalIds,authors,year,venue,\
citationCount,s2FieldsOfStudy,\
citations.title,citations.authors,citations.venue,citations.year,citations.externalIds,\
references.title,references.authors,references.venue,references.year,references.externalIds";

static DOI_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"doi\.org/(10\.\d{4,9}/\S+)").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct S2Author {
    pub name: String,
    pub author_id: Option<String>,
}

/// A citing or cited paper as Semantic Scholar lists it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct S2PaperRef {
    pub title: String,
    pub authors: Vec<String>,
    pub venue: String,
    pub year: String,
    pub arxiv_id: String,
}

impl S2PaperRef {
    pub fn to_summary(&self) -> PaperSummary {
        PaperSummary {
            title: self.title.clone(),
            authors: self.authors.clone(),
            venue: self.venue.clone(),
            year: self.year.clone(),
            pdf_url: (!self.arxiv_id.is_empty()).then(|| pdf_url_from_id(&self.arxiv_id)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct S2Topic {
    pub topic: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SemanticScholarRecord {
    pub paper_id: String,
    pub url: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub arxiv_id: String,
    pub doi: String,
    pub authors: Vec<S2Author>,
    pub year: String,
    pub venue: String,
    pub num_citations: u64,
    pub citations: Vec<S2PaperRef>,
    pub references: Vec<S2PaperRef>,
    pub topics: Vec<S2Topic>,
}

impl SemanticScholarRecord {
    pub fn author_names(&self) -> Vec<String> {
        self.authors.iter().map(|a| a.name.clone()).collect()
    }
}

impl Contribute for SemanticScholarRecord {
    fn contribute_to(&self, paper: &mut Paper) {
        fill(&mut paper.title, &self.title);
        fill(&mut paper.arxiv_id, &self.arxiv_id);
        fill(&mut paper.abstract_text, &self.abstract_text);
        if paper.authors.is_empty() {
            paper.authors = self.author_names();
        }
        if paper.num_citations == 0 {
            paper.num_citations = self.num_citations;
        }
        paper.citations = self.citations.iter().map(S2PaperRef::to_summary).collect();
        paper.references = self.references.iter().map(S2PaperRef::to_summary).collect();
        fill(&mut paper.year, &self.year);
        fill(&mut paper.venue, &self.venue);
        paper.append_tags(self.topics.iter().map(|t| tags::typed("topic", &t.topic)));
    }
}

// Graph API wire format. Every field may be missing or null.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WirePaper {
    paper_id: Option<String>,
    url: Option<String>,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    external_ids: Option<HashMap<String, Value>>,
    authors: Option<Vec<WireAuthor>>,
    year: Option<u32>,
    venue: Option<String>,
    citation_count: Option<u64>,
    s2_fields_of_study: Option<Vec<WireField>>,
    citations: Option<Vec<WirePaper>>,
    references: Option<Vec<WirePaper>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireAuthor {
    author_id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireField {
    category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireSearch {
    data: Vec<WirePaper>,
}

impl WirePaper {
    fn external_id(&self, key: &str) -> String {
        self.external_ids
            .as_ref()
            .and_then(|ids| ids.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    fn author_names(&self) -> Vec<String> {
        self.authors
            .iter()
            .flatten()
            .filter_map(|a| a.name.clone())
            .collect()
    }

    fn year(&self) -> String {
        self.year.map(|y| y.to_string()).unwrap_or_default()
    }

    fn to_ref(&self) -> S2PaperRef {
        S2PaperRef {
            title: self.title.clone().unwrap_or_default(),
            authors: self.author_names(),
            venue: self.venue.clone().unwrap_or_default(),
            year: self.year(),
            arxiv_id: self.external_id("ArXiv"),
        }
    }

    fn into_record(self) -> SemanticScholarRecord {
        let mut topics: Vec<S2Topic> = Vec::new();
        for category in self.s2_fields_of_study.iter().flatten().filter_map(|f| f.category.clone()) {
            if !topics.iter().any(|t| t.topic == category) {
                topics.push(S2Topic { topic: category });
            }
        }

        SemanticScholarRecord {
            arxiv_id: self.external_id("ArXiv"),
            doi: self.external_id("DOI"),
            year: self.year(),
            citations: self.citations.iter().flatten().map(WirePaper::to_ref).collect(),
            references: self.references.iter().flatten().map(WirePaper::to_ref).collect(),
            authors: self
                .authors
                .unwrap_or_default()
                .into_iter()
                .filter_map(|a| {
                    Some(S2Author {
                        name: a.name?,
                        author_id: a.author_id,
                    })
                })
                .collect(),
            paper_id: self.paper_id.unwrap_or_default(),
            url: self.url.unwrap_or_default(),
            title: self.title.unwrap_or_default(),
            abstract_text: self.abstract_text.unwrap_or_default(),
            venue: self.venue.unwrap_or_default(),
            num_citations: self.citation_count.unwrap_or(0),
            topics,
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, SourceError> {
    serde_json::from_value(value).map_err(|e| SourceError::Parse(e.to_string()))
}

pub struct SemanticScholarAdapter {
    transport: Arc<dyn Transport>,
    base_url: String,
}

impl SemanticScholarAdapter {
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

    /// Detail record for a Graph API paper id (`arXiv:…`, `DOI:…` or a
    /// Semantic Scholar id). `Ok(None)` on 404.
    async fn paper(&self, paper_id: &str) -> Result<Option<SemanticScholarRecord>, SourceError> {
        let url = format!(
            "{}/paper/{}?fields={}",
            self.base_url,
            urlencoding::encode(paper_id),
            DETAIL_FIELDS
        );
        match self.transport.get_json(SEMANTIC_SCHOLAR, &url).await {
            Ok(value) => Ok(Some(parse::<WirePaper>(value)?.into_record())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn search_records(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<SemanticScholarRecord>, SourceError> {
        let url = format!(
            "{}/paper/search?query={}&offset={}&limit={}&fields={}",
            self.base_url,
            urlencoding::encode(query),
            offset,
            limit,
            SEARCH_FIELDS
        );
        let value = self.transport.get_json(SEMANTIC_SCHOLAR, &url).await?;
        let search: WireSearch = parse(value)?;
        Ok(search.data.into_iter().map(WirePaper::into_record).collect())
    }
}

#[async_trait]
impl SourceAdapter for SemanticScholarAdapter {
    fn name(&self) -> &'static str {
        SEMANTIC_SCHOLAR
    }

    async fn search(
        &self,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let records = self.search_records(query, offset, limit).await?;
        Ok(records.into_iter().map(SourceRecord::SemanticScholar).collect())
    }

    async fn fetch_best(
        &self,
        url: Option<&str>,
        title: Option<&str>,
    ) -> Result<Option<SourceRecord>, SourceError> {
        if let Some(url) = url {
            let direct = extract_arxiv_id(url).map(|id| format!("arXiv:{id}")).or_else(|| {
                DOI_URL
                    .captures(url)
                    .and_then(|caps| caps.get(1))
                    .map(|m| format!("DOI:{}", m.as_str()))
            });
            if let Some(paper_id) = direct {
                return Ok(self.paper(&paper_id).await?.map(SourceRecord::SemanticScholar));
            }
        }

        let Some(title) = title.map(normalize_title).filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let Some(hit) = self
            .search_records(&title, 0, 1)
            .await?
            .into_iter()
            .next()
            .filter(|r| titles_match(&r.title, &title))
        else {
            return Ok(None);
        };

        // The search hit lacks citations and references.
        let detail = match hit.paper_id.as_str() {
            "" => None,
            id => self.paper(id).await?,
        };
        Ok(Some(SourceRecord::SemanticScholar(detail.unwrap_or(hit))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::FakeTransport;

    const DETAIL: &str = r#"{
        "paperId": "204e3073870fae3d05bcbc2f6a8e263d9b72e776",
        "url": "https://www.semanticscholar.org/paper/204e3073",
        "title": "Attention is All you Need",
        "abstract": null,
        "externalIds": {"ArXiv": "1706.03762", "DOI": "10.5555/3295222", "CorpusId": 13756489},
        "authors": [{"authorId": "40348417", "name": "Ashish Vaswani"}, {"authorId": null, "name": "Noam Shazeer"}],
        "year": 2017,
        "venue": "Neural Information Processing Systems",
        "citationCount": 100000,
        "s2FieldsOfStudy": [
            {"category": "Computer Science", "source": "external"},
            {"category": "Computer Science", "source": "s2-fos-model"}
        ],
        "citations": [
            {"title": "BERT", "authors": [{"name": "Jacob Devlin"}], "venue": "NAACL", "year": 2019,
             "externalIds": {"ArXiv": "1810.04805"}}
        ],
        "references": [
            {"title": "Adam", "authors": [], "venue": null, "year": null, "externalIds": null}
        ]
    }"#;

    const SEARCH: &str = r#"{"total": 1, "offset": 0, "data": [
        {"paperId": "204e3073870fae3d05bcbc2f6a8e263d9b72e776", "title": "Attention is All you Need", "year": 2017}
    ]}"#;

    #[test]
    fn wire_record_is_normalized() {
        let wire: WirePaper = serde_json::from_str(DETAIL).unwrap();
        let record = wire.into_record();
        assert_eq!(record.arxiv_id, "1706.03762");
        assert_eq!(record.doi, "10.5555/3295222");
        assert_eq!(record.year, "2017");
        assert_eq!(record.abstract_text, "");
        assert_eq!(record.author_names(), vec!["Ashish Vaswani", "Noam Shazeer"]);
        assert_eq!(record.topics, vec![S2Topic { topic: "Computer Science".into() }]);
        assert_eq!(record.citations[0].arxiv_id, "1810.04805");
        assert_eq!(record.references[0].year, "");
    }

    #[test]
    fn contribution_replaces_citations_and_fills_scalars() {
        let record = serde_json::from_str::<WirePaper>(DETAIL).unwrap().into_record();
        let mut paper = Paper {
            venue: "NeurIPS".into(),
            num_citations: 7,
            citations: vec![PaperSummary::default(); 3],
            ..Paper::default()
        };
        record.contribute_to(&mut paper);
        assert_eq!(paper.venue, "NeurIPS");
        assert_eq!(paper.num_citations, 7);
        assert_eq!(paper.title, "Attention is All you Need");
        assert_eq!(paper.citations.len(), 1);
        assert_eq!(
            paper.citations[0].pdf_url.as_deref(),
            Some("https://arxiv.org/pdf/1810.04805.pdf")
        );
        assert_eq!(paper.references[0].pdf_url, None);
        assert_eq!(paper.tags_by_type("topic").unwrap(), vec!["Computer Science"]);
    }

    #[tokio::test]
    async fn fetch_best_by_arxiv_url_goes_direct() {
        let transport = Arc::new(FakeTransport::default().route("/paper/arXiv%3A1706.03762", DETAIL));
        let adapter = SemanticScholarAdapter::new(transport.clone());
        let record = adapter
            .fetch_best(Some("https://arxiv.org/abs/1706.03762"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.source_name(), SEMANTIC_SCHOLAR);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn direct_lookup_404_is_no_match() {
        let transport = Arc::new(FakeTransport::default());
        let adapter = SemanticScholarAdapter::new(transport);
        let record = adapter
            .fetch_best(Some("https://doi.org/10.1000/missing"), Some("ignored"))
            .await
            .unwrap();
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn fetch_best_by_title_searches_then_loads_detail() {
        let transport = Arc::new(
            FakeTransport::default()
                .route("/paper/search", SEARCH)
                .route("/paper/204e3073870fae3d05bcbc2f6a8e263d9b72e776", DETAIL),
        );
        let adapter = SemanticScholarAdapter::new(transport.clone());
        let record = adapter
            .fetch_best(None, Some("Attention Is All You Need"))
            .await
            .unwrap()
            .unwrap();
        match record {
            SourceRecord::SemanticScholar(r) => assert_eq!(r.citations.len(), 1),
            other => panic!("unexpected record {other:?}"),
        }
        let requests = transport.requests();
        assert!(requests[0].contains("limit=1"));
        assert_eq!(requests.len(), 2);
    }

    #[tokio::test]
    async fn title_mismatch_is_no_match() {
        let transport = Arc::new(FakeTransport::default().route("/paper/search", SEARCH));
        let adapter = SemanticScholarAdapter::new(transport);
        let record = adapter.fetch_best(None, Some("Unrelated Work")).await.unwrap();
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn server_errors_propagate() {
        let transport = Arc::new(FakeTransport::default().fail(
            "/paper/search",
            SourceError::Status {
                status: 500,
                url: "s2".into(),
            },
        ));
        let adapter = SemanticScholarAdapter::new(transport);
        assert!(adapter.search("attention", 0, 10).await.is_err());
    }
}
