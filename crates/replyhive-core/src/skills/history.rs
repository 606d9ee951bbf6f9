use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use replyhive_memory::{Clock, ConversationLog};
use replyhive_schema::HistoryEntry;
use serde_json::json;

use super::{estimate_tokens, CONVERSATION_HISTORY};
use crate::skill::{
    ConfigField, Permission, Skill, SkillExecutionContext, SkillHealth, SkillManifest, SkillOutput,
};

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "this", "that", "with", "what", "when", "will", "your",
    "from", "they", "just", "been", "were", "about",
];

/// Recent messages with this contact, bounded by count, age and token budget.
pub struct ConversationHistorySkill {
    manifest: SkillManifest,
    log: ConversationLog,
    clock: Arc<dyn Clock>,
}

impl ConversationHistorySkill {
    pub fn new(log: ConversationLog, clock: Arc<dyn Clock>) -> Self {
        Self {
            manifest: SkillManifest {
                id: CONVERSATION_HISTORY.to_string(),
                name: "Conversation History".to_string(),
                version: "1.0.0".to_string(),
                description: "Recent messages exchanged with this contact".to_string(),
                config_fields: vec![
                    ConfigField::integer("maxMessages", "Max messages", 20),
                    ConfigField::integer("tokenBudget", "Token budget", 2000)
                        .describe("Upper bound on the rendered history size"),
                    ConfigField::integer("maxAgeHours", "Max age (hours)", 72),
                    ConfigField::boolean("chunkingEnabled", "Relevance chunking", false)
                        .describe("Prefer messages sharing keywords with the incoming one"),
                ],
                permissions: vec![Permission::RedisRead],
            },
            log,
            clock,
        }
    }
}

#[async_trait]
impl Skill for ConversationHistorySkill {
    fn manifest(&self) -> &SkillManifest {
        &self.manifest
    }

    async fn execute(&self, ctx: &SkillExecutionContext) -> Result<SkillOutput> {
        let max_messages = ctx.config_u64("maxMessages").unwrap_or(20) as usize;
        let budget = ctx.config_u64("tokenBudget").unwrap_or(2000) as usize;
        let max_age_hours = ctx.config_u64("maxAgeHours").unwrap_or(72);
        let chunking = ctx.config_bool("chunkingEnabled").unwrap_or(false);

        // An age past chrono's range keeps everything.
        let cutoff = i64::try_from(max_age_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .and_then(|age| self.clock.now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let entries: Vec<HistoryEntry> = self
            .log
            .recent(&ctx.contact_id, max_messages)
            .await?
            .into_iter()
            .filter(|e| e.at >= cutoff)
            .collect();
        let available = entries.len();

        let selected = if chunking {
            select_relevant(entries, &ctx.message_content, budget)
        } else {
            select_recent(entries, budget)
        };
        if selected.is_empty() {
            return Ok(SkillOutput::empty().with_data("messages", json!(0)));
        }

        let lines: Vec<String> = selected.iter().map(render_line).collect();
        let tokens: usize = lines.iter().map(|l| estimate_tokens(l)).sum();
        let text = format!("## Recent Conversation\n{}", lines.join("\n"));

        Ok(SkillOutput::context(text, selected.len())
            .with_data("messages", json!(selected.len()))
            .with_data("tokens", json!(tokens))
            .with_data("truncated", json!(selected.len() < available)))
    }

    async fn health_check(&self) -> SkillHealth {
        match self.log.recent("__health", 1).await {
            Ok(_) => SkillHealth::Healthy,
            Err(_) => SkillHealth::Unhealthy,
        }
    }
}

fn render_line(entry: &HistoryEntry) -> String {
    format!("{}: {}", entry.speaker, entry.text)
}

/// Newest entries that fit the budget, returned oldest first.
fn select_recent(entries: Vec<HistoryEntry>, budget: usize) -> Vec<HistoryEntry> {
    let mut used = 0;
    let mut kept = Vec::new();
    for entry in entries.into_iter().rev() {
        let cost = estimate_tokens(&render_line(&entry));
        if used + cost > budget {
            break;
        }
        used += cost;
        kept.push(entry);
    }
    kept.reverse();
    kept
}

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Entries ranked by keyword overlap with `query` (recency breaks ties),
/// packed into the budget, returned in chronological order.
fn select_relevant(entries: Vec<HistoryEntry>, query: &str, budget: usize) -> Vec<HistoryEntry> {
    let wanted = keywords(query);
    let mut ranked: Vec<(usize, usize, HistoryEntry)> = entries
        .into_iter()
        .enumerate()
        .map(|(pos, e)| {
            let overlap = keywords(&e.text).intersection(&wanted).count();
            (overlap, pos, e)
        })
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

    let mut used = 0;
    let mut kept = Vec::new();
    for (_, pos, entry) in ranked {
        let cost = estimate_tokens(&render_line(&entry));
        if used + cost > budget {
            continue;
        }
        used += cost;
        kept.push((pos, entry));
    }
    kept.sort_by_key(|(pos, _)| *pos);
    kept.into_iter().map(|(_, e)| e).collect()
}
