//! Knowledge-search collaborators consumed by hybrid retrieval.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeCategory {
    People,
    Topics,
    Events,
}

impl KnowledgeCategory {
    pub const ALL: [KnowledgeCategory; 3] = [Self::People, Self::Topics, Self::Events];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::People => "people",
            Self::Topics => "topics",
            Self::Events => "events",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub id: String,
    pub text: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub contact_id: String,
    pub category: KnowledgeCategory,
    pub top_k: usize,
    pub min_score: f64,
}

/// Embedding/vector search.
#[async_trait]
pub trait SemanticSearch: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<ScoredCandidate>>;
}

/// Keyword or graph-walk search.
#[async_trait]
pub trait KeywordSearch: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<ScoredCandidate>>;
}
