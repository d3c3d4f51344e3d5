//! HTTP access shared by all source adapters.
//!
//! Adapters talk to a [`Transport`] rather than to `reqwest` directly so
//! tests can serve canned responses.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::Config;
use crate::rate_limit::{self, RateLimiters};
use crate::sources::{SEMANTIC_SCHOLAR, SourceError};

#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` on behalf of `source` and return the body as text.
    async fn get_text(&self, source: &str, url: &str) -> Result<String, SourceError>;

    /// GET `url` and return the raw body.
    async fn get_bytes(&self, source: &str, url: &str) -> Result<Vec<u8>, SourceError>;

    async fn get_json(&self, source: &str, url: &str) -> Result<Value, SourceError> {
        let text = self.get_text(source, url).await?;
        serde_json::from_str(&text).map_err(|e| SourceError::Parse(e.to_string()))
    }
}

/// Production transport: one pooled client, per-source rate limits and
/// 429 retry.
pub struct ReqwestTransport {
    client: reqwest::Client,
    rate_limiters: RateLimiters,
    max_retries: u32,
    s2_api_key: Option<String>,
}

impl ReqwestTransport {
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(5))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SourceError::Request(e.to_string()))?;
        Ok(Self {
            client,
            rate_limiters: RateLimiters::new(config.s2_api_key.is_some()),
            max_retries: config.max_retries,
            s2_api_key: config.s2_api_key.clone(),
        })
    }

    async fn send_once(&self, source: &str, url: &str) -> Result<reqwest::Response, SourceError> {
        let mut req = self.client.get(url);
        if let Some(key) = self.s2_api_key.as_deref().filter(|_| source == SEMANTIC_SCHOLAR) {
            req = req.header("x-api-key", key);
        }

        let resp = req.send().await.map_err(map_reqwest)?;
        rate_limit::check_rate_limit_response(&resp)?;
        if !resp.status().is_success() {
            return Err(SourceError::Status {
                status: resp.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp)
    }

    async fn send(&self, source: &str, url: &str) -> Result<reqwest::Response, SourceError> {
        log::debug!("{source}: GET {url}");
        rate_limit::with_retry(source, &self.rate_limiters, self.max_retries, || {
            self.send_once(source, url)
        })
        .await
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get_text(&self, source: &str, url: &str) -> Result<String, SourceError> {
        let resp = self.send(source, url).await?;
        resp.text().await.map_err(map_reqwest)
    }

    async fn get_bytes(&self, source: &str, url: &str) -> Result<Vec<u8>, SourceError> {
        let resp = self.send(source, url).await?;
        let bytes = resp.bytes().await.map_err(map_reqwest)?;
        Ok(bytes.to_vec())
    }
}

fn map_reqwest(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout
    } else {
        SourceError::Request(e.to_string())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned-response transport for adapter tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeTransport {
        /// Responses keyed by URL substring; first match wins.
        routes: Vec<(String, Result<String, SourceError>)>,
        pub requested: Mutex<Vec<String>>,
        pub bytes: HashMap<String, Vec<u8>>,
    }

    impl FakeTransport {
        pub fn route(mut self, fragment: &str, body: &str) -> Self {
            self.routes.push((fragment.to_string(), Ok(body.to_string())));
            self
        }

        pub fn fail(mut self, fragment: &str, error: SourceError) -> Self {
            self.routes.push((fragment.to_string(), Err(error)));
            self
        }

        pub fn requests(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn get_text(&self, _source: &str, url: &str) -> Result<String, SourceError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.routes
                .iter()
                .find(|(fragment, _)| url.contains(fragment.as_str()))
                .map(|(_, response)| response.clone())
                .unwrap_or_else(|| {
                    Err(SourceError::Status {
                        status: 404,
                        url: url.to_string(),
                    })
                })
        }

        async fn get_bytes(&self, _source: &str, url: &str) -> Result<Vec<u8>, SourceError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.bytes.get(url).cloned().ok_or(SourceError::Status {
                status: 404,
                url: url.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn get_json_parses_or_reports() {
        let transport = FakeTransport::default()
            .route("good", r#"{"a": 1}"#)
            .route("bad", "not json");
        let value = transport.get_json("x", "http://good").await.unwrap();
        assert_eq!(value["a"], 1);
        assert!(matches!(
            transport.get_json("x", "http://bad").await,
            Err(SourceError::Parse(_))
        ));
        assert!(
            transport
                .get_json("x", "http://missing")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }
}
