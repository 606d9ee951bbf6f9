use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use super::KNOWLEDGE_GRAPH;
use crate::retrieval::{CategoryLimits, HybridRetriever, RetrievalConfig, RetrievalMethod};
use crate::skill::{
    ConfigField, Permission, Skill, SkillExecutionContext, SkillManifest, SkillOutput,
};

/// People, topics and events related to the incoming message, via hybrid retrieval.
pub struct KnowledgeGraphSkill {
    manifest: SkillManifest,
    retriever: Arc<HybridRetriever>,
}

impl KnowledgeGraphSkill {
    pub fn new(retriever: Arc<HybridRetriever>) -> Self {
        let defaults = RetrievalConfig::default();
        Self {
            manifest: SkillManifest {
                id: KNOWLEDGE_GRAPH.to_string(),
                name: "Knowledge Graph".to_string(),
                version: "1.0.0".to_string(),
                description: "Relevant people, topics and events from long-term memory".to_string(),
                config_fields: vec![
                    ConfigField::boolean("semanticEnabled", "Semantic search", defaults.enabled),
                    ConfigField::integer("topKPeople", "People limit", defaults.top_k.people as u64),
                    ConfigField::integer("topKTopics", "Topic limit", defaults.top_k.topics as u64),
                    ConfigField::integer("topKEvents", "Event limit", defaults.top_k.events as u64),
                    ConfigField::number("minScorePeople", "People min score", defaults.min_score.people),
                    ConfigField::number("minScoreTopics", "Topic min score", defaults.min_score.topics),
                    ConfigField::number("minScoreEvents", "Event min score", defaults.min_score.events),
                    ConfigField::integer(
                        "fallbackThreshold",
                        "Fallback threshold",
                        defaults.fallback_threshold as u64,
                    )
                    .describe("Semantic hits below this total trigger keyword search"),
                    ConfigField::boolean("mergeOnFallback", "Merge on fallback", defaults.merge_on_fallback),
                ],
                permissions: vec![Permission::AutomemRead, Permission::Network],
            },
            retriever,
        }
    }

    fn retrieval_config(ctx: &SkillExecutionContext) -> RetrievalConfig {
        let d = RetrievalConfig::default();
        let top_k = |key: &str, fallback: usize| ctx.config_u64(key).map(|v| v as usize).unwrap_or(fallback);
        let min_score = |key: &str, fallback: f64| ctx.config_f64(key).unwrap_or(fallback);
        RetrievalConfig {
            enabled: ctx.config_bool("semanticEnabled").unwrap_or(d.enabled),
            top_k: CategoryLimits {
                people: top_k("topKPeople", d.top_k.people),
                topics: top_k("topKTopics", d.top_k.topics),
                events: top_k("topKEvents", d.top_k.events),
            },
            min_score: CategoryLimits {
                people: min_score("minScorePeople", d.min_score.people),
                topics: min_score("minScoreTopics", d.min_score.topics),
                events: min_score("minScoreEvents", d.min_score.events),
            },
            fallback_threshold: top_k("fallbackThreshold", d.fallback_threshold),
            merge_on_fallback: ctx.config_bool("mergeOnFallback").unwrap_or(d.merge_on_fallback),
        }
    }
}

#[async_trait]
impl Skill for KnowledgeGraphSkill {
    fn manifest(&self) -> &SkillManifest {
        &self.manifest
    }

    async fn execute(&self, ctx: &SkillExecutionContext) -> Result<SkillOutput> {
        let config = Self::retrieval_config(ctx);
        let outcome = self
            .retriever
            .retrieve_context(&ctx.message_content, &ctx.contact_id, &config)
            .await;

        let mut output = if outcome.context.is_empty() {
            SkillOutput::empty()
        } else {
            SkillOutput::context(
                format!("## What You Know\n{}", outcome.context.render().trim_end()),
                outcome.context.total(),
            )
        };
        output = output
            .with_data("method", json!(outcome.method.as_str()))
            .with_data("people", json!(outcome.context.people.len()))
            .with_data("topics", json!(outcome.context.topics.len()))
            .with_data("events", json!(outcome.context.events.len()));
        if let Some(stats) = &outcome.stats {
            output = output.with_data("stats", serde_json::to_value(stats)?);
        }
        if outcome.method == RetrievalMethod::Error {
            tracing::debug!(contact_id = %ctx.contact_id, "knowledge skill returning empty context");
        }
        Ok(output)
    }
}
