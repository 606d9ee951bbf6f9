use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::search::{KeywordSearch, ScoredCandidate, SearchRequest, SemanticSearch};

/// HTTP client for a knowledge service exposing
/// `POST {base}/search/semantic` and `POST {base}/search/keyword`.
#[derive(Debug, Clone)]
pub struct HttpKnowledgeClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ScoredCandidate>,
}

impl HttpKnowledgeClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn post(&self, mode: &str, request: &SearchRequest) -> Result<Vec<ScoredCandidate>> {
        let url = format!("{}/search/{mode}", self.base_url);
        let mut builder = self.client.post(url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header("authorization", format!("Bearer {key}"));
        }

        let resp = builder.send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("knowledge {mode} search failed ({status}): {body}"));
        }

        let body: SearchResponse = resp.json().await?;
        let mut results: Vec<ScoredCandidate> = body
            .results
            .into_iter()
            .filter(|c| c.score >= request.min_score)
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(request.top_k);
        Ok(results)
    }
}

#[async_trait]
impl SemanticSearch for HttpKnowledgeClient {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<ScoredCandidate>> {
        self.post("semantic", request).await
    }
}

#[async_trait]
impl KeywordSearch for HttpKnowledgeClient {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<ScoredCandidate>> {
        self.post("keyword", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::KnowledgeCategory;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(category: KnowledgeCategory, top_k: usize, min_score: f64) -> SearchRequest {
        SearchRequest {
            query: "weekend plans".into(),
            contact_id: "tg:1".into(),
            category,
            top_k,
            min_score,
        }
    }

    #[tokio::test]
    async fn semantic_search_enforces_min_score_and_top_k() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search/semantic"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({"category": "topics"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"id": "a", "text": "hiking", "score": 0.9},
                    {"id": "b", "text": "cooking", "score": 0.2},
                    {"id": "c", "text": "cycling", "score": 0.7},
                    {"id": "d", "text": "movies", "score": 0.6}
                ]
            })))
            .mount(&server)
            .await;

        let client = HttpKnowledgeClient::new(server.uri(), Some("secret".into()));
        let results = SemanticSearch::search(&client, &request(KnowledgeCategory::Topics, 2, 0.5))
            .await
            .unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn keyword_search_hits_keyword_route() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search/keyword"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{"id": "p1", "text": "Alice", "score": 1.0}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpKnowledgeClient::new(server.uri(), None);
        let results = KeywordSearch::search(&client, &request(KnowledgeCategory::People, 5, 0.0))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "Alice");
    }

    #[tokio::test]
    async fn non_ok_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search/semantic"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = HttpKnowledgeClient::new(server.uri(), None);
        let err = SemanticSearch::search(&client, &request(KnowledgeCategory::Events, 5, 0.0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
