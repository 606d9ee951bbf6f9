use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use replyhive_memory::{get_json, set_json, StoreResult, TtlStore};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::STYLE_PROFILE;
use crate::skill::{
    ConfigField, Permission, Skill, SkillExecutionContext, SkillHealth, SkillManifest, SkillOutput,
};

pub const STYLE_PREFIX: &str = "style:";

pub fn style_key(contact_id: &str) -> String {
    format!("{STYLE_PREFIX}{contact_id}")
}

/// How the owner usually writes to one contact. Maintained outside the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleProfile {
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub formality: Option<String>,
    #[serde(default)]
    pub emoji_usage: Option<String>,
    #[serde(default)]
    pub avg_message_length: Option<u32>,
    #[serde(default)]
    pub common_phrases: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl StyleProfile {
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        if let Some(tone) = &self.tone {
            lines.push(format!("- Tone: {tone}"));
        }
        if let Some(formality) = &self.formality {
            lines.push(format!("- Formality: {formality}"));
        }
        if let Some(emoji) = &self.emoji_usage {
            lines.push(format!("- Emoji: {emoji}"));
        }
        if let Some(len) = self.avg_message_length {
            lines.push(format!("- Typical length: ~{len} characters"));
        }
        if !self.common_phrases.is_empty() {
            lines.push(format!("- Common phrases: {}", self.common_phrases.join(", ")));
        }
        if let Some(notes) = &self.notes {
            lines.push(format!("- Notes: {notes}"));
        }
        if lines.is_empty() {
            return String::new();
        }
        format!("## Communication Style\n{}", lines.join("\n"))
    }
}

pub async fn save_style_profile(
    store: &dyn TtlStore,
    contact_id: &str,
    profile: &StyleProfile,
) -> StoreResult<()> {
    set_json(store, &style_key(contact_id), profile, None).await
}

struct CacheEntry {
    fetched_at: Instant,
    profile: Option<StyleProfile>,
}

pub struct StyleProfileSkill {
    manifest: SkillManifest,
    store: Arc<dyn TtlStore>,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl StyleProfileSkill {
    pub fn new(store: Arc<dyn TtlStore>) -> Self {
        Self {
            manifest: SkillManifest {
                id: STYLE_PROFILE.to_string(),
                name: "Style Profile".to_string(),
                version: "1.0.0".to_string(),
                description: "How the owner usually writes to this contact".to_string(),
                config_fields: vec![ConfigField::integer("cacheTtlMinutes", "Cache TTL (minutes)", 60)],
                permissions: vec![Permission::RedisRead],
            },
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn load(&self, contact_id: &str, ttl: Duration) -> Result<(Option<StyleProfile>, bool)> {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(contact_id) {
                if entry.fetched_at.elapsed() < ttl {
                    return Ok((entry.profile.clone(), true));
                }
            }
        }

        let profile: Option<StyleProfile> =
            get_json(self.store.as_ref(), &style_key(contact_id)).await?;
        if !ttl.is_zero() {
            let mut cache = self.cache.lock().await;
            cache.retain(|_, entry| entry.fetched_at.elapsed() < ttl);
            cache.insert(
                contact_id.to_string(),
                CacheEntry {
                    fetched_at: Instant::now(),
                    profile: profile.clone(),
                },
            );
        }
        Ok((profile, false))
    }
}

#[async_trait]
impl Skill for StyleProfileSkill {
    fn manifest(&self) -> &SkillManifest {
        &self.manifest
    }

    async fn execute(&self, ctx: &SkillExecutionContext) -> Result<SkillOutput> {
        let minutes = ctx.config_u64("cacheTtlMinutes").unwrap_or(60);
        let ttl = Duration::from_secs(minutes.saturating_mul(60));
        let (profile, cached) = self.load(&ctx.contact_id, ttl).await?;

        let Some(profile) = profile else {
            return Ok(SkillOutput::empty().cached(cached));
        };
        let text = profile.render();
        if text.is_empty() {
            return Ok(SkillOutput::empty().cached(cached));
        }
        Ok(SkillOutput::context(text, 1)
            .with_data("profile", serde_json::to_value(&profile)?)
            .cached(cached))
    }

    async fn health_check(&self) -> SkillHealth {
        match self.store.get(&style_key("__health")).await {
            Ok(_) => SkillHealth::Healthy,
            Err(_) => SkillHealth::Unhealthy,
        }
    }
}
