//! Hybrid knowledge retrieval: semantic first, keyword when semantic comes up short.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use replyhive_memory::{KeywordSearch, KnowledgeCategory, ScoredCandidate, SearchRequest, SemanticSearch};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryLimits<T> {
    pub people: T,
    pub topics: T,
    pub events: T,
}

impl<T: Copy> CategoryLimits<T> {
    pub fn uniform(value: T) -> Self {
        Self {
            people: value,
            topics: value,
            events: value,
        }
    }

    pub fn get(&self, category: KnowledgeCategory) -> T {
        match category {
            KnowledgeCategory::People => self.people,
            KnowledgeCategory::Topics => self.topics,
            KnowledgeCategory::Events => self.events,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Whether the semantic path is attempted at all.
    pub enabled: bool,
    pub top_k: CategoryLimits<usize>,
    pub min_score: CategoryLimits<f64>,
    /// Semantic results at or above this total are used without a keyword call.
    pub fallback_threshold: usize,
    #[serde(default)]
    pub merge_on_fallback: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: CategoryLimits {
                people: 5,
                topics: 5,
                events: 3,
            },
            min_score: CategoryLimits::uniform(0.3),
            fallback_threshold: 3,
            merge_on_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeContext {
    pub people: Vec<ScoredCandidate>,
    pub topics: Vec<ScoredCandidate>,
    pub events: Vec<ScoredCandidate>,
}

impl KnowledgeContext {
    pub fn total(&self) -> usize {
        self.people.len() + self.topics.len() + self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn get(&self, category: KnowledgeCategory) -> &[ScoredCandidate] {
        match category {
            KnowledgeCategory::People => &self.people,
            KnowledgeCategory::Topics => &self.topics,
            KnowledgeCategory::Events => &self.events,
        }
    }

    fn get_mut(&mut self, category: KnowledgeCategory) -> &mut Vec<ScoredCandidate> {
        match category {
            KnowledgeCategory::People => &mut self.people,
            KnowledgeCategory::Topics => &mut self.topics,
            KnowledgeCategory::Events => &mut self.events,
        }
    }

    /// Markdown sections for non-empty categories.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for category in KnowledgeCategory::ALL {
            let items = self.get(category);
            if items.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            let title = match category {
                KnowledgeCategory::People => "People",
                KnowledgeCategory::Topics => "Topics",
                KnowledgeCategory::Events => "Events",
            };
            out.push_str(&format!("### {title}\n"));
            for item in items {
                out.push_str(&format!("- {}\n", item.text));
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMethod {
    Semantic,
    Keyword,
    Error,
}

impl RetrievalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalStats {
    pub semantic_count: Option<usize>,
    pub keyword_count: Option<usize>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    pub context: KnowledgeContext,
    pub method: RetrievalMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<RetrievalStats>,
}

pub struct HybridRetriever {
    semantic: Option<Arc<dyn SemanticSearch>>,
    keyword: Arc<dyn KeywordSearch>,
}

impl HybridRetriever {
    pub fn new(semantic: Option<Arc<dyn SemanticSearch>>, keyword: Arc<dyn KeywordSearch>) -> Self {
        Self { semantic, keyword }
    }

    /// Never fails: any provider error yields `RetrievalMethod::Error` with empty context.
    pub async fn retrieve_context(
        &self,
        query: &str,
        contact_id: &str,
        config: &RetrievalConfig,
    ) -> RetrievalOutcome {
        let started = Instant::now();
        let mut stats = RetrievalStats::default();

        let mut semantic_hits = None;
        match (&self.semantic, config.enabled) {
            (Some(semantic), true) => {
                let semantic = semantic.as_ref();
                let found = gather(query, contact_id, config, true, |req| async move {
                    semantic.search(&req).await
                })
                .await;
                match found {
                    Ok(ctx) => {
                        let total = ctx.total();
                        stats.semantic_count = Some(total);
                        if total >= config.fallback_threshold {
                            stats.latency_ms = started.elapsed().as_millis() as u64;
                            tracing::debug!(contact_id, total, "semantic retrieval satisfied threshold");
                            return RetrievalOutcome {
                                context: ctx,
                                method: RetrievalMethod::Semantic,
                                stats: Some(stats),
                            };
                        }
                        tracing::info!(
                            contact_id,
                            total,
                            threshold = config.fallback_threshold,
                            "semantic retrieval below threshold; falling back to keyword"
                        );
                        semantic_hits = Some(ctx);
                    }
                    Err(e) => return error_outcome(contact_id, "semantic", e, stats, started),
                }
            }
            (None, true) => {
                tracing::debug!(contact_id, "no semantic provider; using keyword search");
            }
            (_, false) => {}
        }

        let keyword = self.keyword.as_ref();
        let found = gather(query, contact_id, config, false, |req| async move {
            keyword.search(&req).await
        })
        .await;
        match found {
            Ok(mut ctx) => {
                stats.keyword_count = Some(ctx.total());
                if config.merge_on_fallback {
                    if let Some(hits) = semantic_hits {
                        merge_into(&mut ctx, hits, config);
                    }
                }
                stats.latency_ms = started.elapsed().as_millis() as u64;
                RetrievalOutcome {
                    context: ctx,
                    method: RetrievalMethod::Keyword,
                    stats: Some(stats),
                }
            }
            Err(e) => error_outcome(contact_id, "keyword", e, stats, started),
        }
    }
}

fn error_outcome(
    contact_id: &str,
    path: &str,
    err: anyhow::Error,
    mut stats: RetrievalStats,
    started: Instant,
) -> RetrievalOutcome {
    tracing::warn!(contact_id, path, error = %err, "knowledge retrieval failed; continuing without context");
    stats.error = Some(format!("{path}: {err:#}"));
    stats.latency_ms = started.elapsed().as_millis() as u64;
    RetrievalOutcome {
        context: KnowledgeContext::default(),
        method: RetrievalMethod::Error,
        stats: Some(stats),
    }
}

/// Query all three categories concurrently; the first error wins.
async fn gather<F, Fut>(
    query: &str,
    contact_id: &str,
    config: &RetrievalConfig,
    enforce_min_score: bool,
    search: F,
) -> Result<KnowledgeContext>
where
    F: Fn(SearchRequest) -> Fut,
    Fut: Future<Output = Result<Vec<ScoredCandidate>>>,
{
    let request = |category: KnowledgeCategory| SearchRequest {
        query: query.to_string(),
        contact_id: contact_id.to_string(),
        category,
        top_k: config.top_k.get(category),
        min_score: config.min_score.get(category),
    };
    let (people, topics, events) = futures::try_join!(
        search(request(KnowledgeCategory::People)),
        search(request(KnowledgeCategory::Topics)),
        search(request(KnowledgeCategory::Events)),
    )?;

    let mut ctx = KnowledgeContext {
        people,
        topics,
        events,
    };
    for category in KnowledgeCategory::ALL {
        let items = ctx.get_mut(category);
        if enforce_min_score {
            let floor = config.min_score.get(category);
            items.retain(|c| c.score >= floor);
        }
        items.truncate(config.top_k.get(category));
    }
    Ok(ctx)
}

fn merge_into(ctx: &mut KnowledgeContext, extra: KnowledgeContext, config: &RetrievalConfig) {
    let KnowledgeContext {
        people,
        topics,
        events,
    } = extra;
    for (category, items) in [
        (KnowledgeCategory::People, people),
        (KnowledgeCategory::Topics, topics),
        (KnowledgeCategory::Events, events),
    ] {
        let target = ctx.get_mut(category);
        let mut best: HashMap<String, ScoredCandidate> = HashMap::new();
        for item in target.drain(..).chain(items) {
            match best.get(&item.id) {
                Some(existing) if existing.score >= item.score => {}
                _ => {
                    best.insert(item.id.clone(), item);
                }
            }
        }
        let mut merged: Vec<_> = best.into_values().collect();
        merged.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        merged.truncate(config.top_k.get(category));
        *target = merged;
    }
}
