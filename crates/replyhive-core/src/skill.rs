use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SkillError;

/// Validated per-skill configuration values keyed by manifest field.
pub type SkillConfig = serde_json::Map<String, Value>;

// ───────────────────────────── Manifest ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "redis:read")]
    RedisRead,
    #[serde(rename = "redis:write")]
    RedisWrite,
    #[serde(rename = "automem:read")]
    AutomemRead,
    #[serde(rename = "automem:write")]
    AutomemWrite,
    #[serde(rename = "network")]
    Network,
}

impl Permission {
    pub const ALL: [Permission; 5] = [
        Self::RedisRead,
        Self::RedisWrite,
        Self::AutomemRead,
        Self::AutomemWrite,
        Self::Network,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RedisRead => "redis:read",
            Self::RedisWrite => "redis:write",
            Self::AutomemRead => "automem:read",
            Self::AutomemWrite => "automem:write",
            Self::Network => "network",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Permission {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown permission: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFieldType {
    String,
    Number,
    Boolean,
    Select,
}

/// One configurable value a skill exposes to settings surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    pub key: String,
    #[serde(rename = "type")]
    pub field_type: ConfigFieldType,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

impl ConfigField {
    fn new(key: &str, field_type: ConfigFieldType, label: &str, default: Value) -> Self {
        Self {
            key: key.to_string(),
            field_type,
            label: label.to_string(),
            description: None,
            default,
            options: Vec::new(),
            required: false,
        }
    }

    pub fn string(key: &str, label: &str, default: Option<&str>) -> Self {
        let default = default.map(Value::from).unwrap_or(Value::Null);
        Self::new(key, ConfigFieldType::String, label, default)
    }

    pub fn number(key: &str, label: &str, default: f64) -> Self {
        Self::new(key, ConfigFieldType::Number, label, Value::from(default))
    }

    pub fn integer(key: &str, label: &str, default: u64) -> Self {
        Self::new(key, ConfigFieldType::Number, label, Value::from(default))
    }

    pub fn boolean(key: &str, label: &str, default: bool) -> Self {
        Self::new(key, ConfigFieldType::Boolean, label, Value::from(default))
    }

    pub fn select(key: &str, label: &str, options: &[&str], default: &str) -> Self {
        let mut field = Self::new(key, ConfigFieldType::Select, label, Value::from(default));
        field.options = options.iter().map(|o| o.to_string()).collect();
        field
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn accepts(&self, value: &Value) -> bool {
        match self.field_type {
            ConfigFieldType::String => value.is_string(),
            ConfigFieldType::Number => value.is_number(),
            ConfigFieldType::Boolean => value.is_boolean(),
            ConfigFieldType::Select => value
                .as_str()
                .is_some_and(|v| self.options.iter().any(|o| o == v)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub config_fields: Vec<ConfigField>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Check `raw` against the manifest's fields.
///
/// Absent or ill-typed values take the field default; keys the manifest does
/// not declare are dropped. Only a required field with no value and no
/// default is an error.
pub fn resolve_skill_config(manifest: &SkillManifest, raw: &SkillConfig) -> Result<SkillConfig, SkillError> {
    let mut resolved = SkillConfig::new();
    for field in &manifest.config_fields {
        let value = match raw.get(&field.key) {
            Some(v) if field.accepts(v) => Some(v.clone()),
            Some(v) => {
                tracing::warn!(
                    skill_id = %manifest.id,
                    field = %field.key,
                    value = %v,
                    "invalid skill config value; using default"
                );
                None
            }
            None => None,
        };
        match value {
            Some(v) => {
                resolved.insert(field.key.clone(), v);
            }
            None if !field.default.is_null() => {
                resolved.insert(field.key.clone(), field.default.clone());
            }
            None if field.required => {
                return Err(SkillError::MissingConfig {
                    skill: manifest.id.clone(),
                    field: field.key.clone(),
                });
            }
            None => {}
        }
    }
    for key in raw.keys() {
        if !manifest.config_fields.iter().any(|f| &f.key == key) {
            tracing::debug!(skill_id = %manifest.id, key = %key, "ignoring undeclared skill config key");
        }
    }
    Ok(resolved)
}

// ───────────────────────────── Execution types ─────────────────────────────

/// Per-invocation input shared read-only by every skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillExecutionContext {
    pub contact_id: String,
    pub message_content: String,
    pub relationship_type: String,
    #[serde(default)]
    pub config: SkillConfig,
}

impl SkillExecutionContext {
    pub fn new(
        contact_id: impl Into<String>,
        message_content: impl Into<String>,
        relationship_type: impl Into<String>,
    ) -> Self {
        Self {
            contact_id: contact_id.into(),
            message_content: message_content.into(),
            relationship_type: relationship_type.into(),
            config: SkillConfig::new(),
        }
    }

    pub fn with_config(&self, config: SkillConfig) -> Self {
        Self {
            config,
            ..self.clone()
        }
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        let v = self.config.get(key)?;
        v.as_u64().or_else(|| {
            v.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        })
    }

    pub fn config_f64(&self, key: &str) -> Option<f64> {
        self.config.get(key)?.as_f64()
    }

    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key)?.as_bool()
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key)?.as_str()
    }
}

/// What a skill hands back; the executor wraps it with timing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkillOutput {
    pub context: Option<String>,
    pub data: serde_json::Map<String, Value>,
    pub item_count: usize,
    pub cached: bool,
}

impl SkillOutput {
    pub fn context(text: impl Into<String>, item_count: usize) -> Self {
        Self {
            context: Some(text.into()),
            item_count,
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkillFailure {
    Error { message: String },
    Timeout { after_ms: u64 },
    Panicked { message: String },
}

impl std::fmt::Display for SkillFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error { message } => write!(f, "error: {message}"),
            Self::Timeout { after_ms } => write!(f, "timed out after {after_ms}ms"),
            Self::Panicked { message } => write!(f, "panicked: {message}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub latency_ms: u64,
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub item_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<SkillFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillExecutionResult {
    pub skill_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
    pub metadata: SkillMetadata,
}

impl SkillExecutionResult {
    pub fn from_output(skill_id: &str, output: SkillOutput, latency: Duration) -> Self {
        Self {
            skill_id: skill_id.to_string(),
            context: output.context,
            data: output.data,
            metadata: SkillMetadata {
                latency_ms: latency.as_millis() as u64,
                cached: output.cached,
                item_count: output.item_count,
                failure: None,
            },
        }
    }

    /// Empty-but-valid result tagged with why the skill produced nothing.
    pub fn failed(skill_id: &str, failure: SkillFailure, latency: Duration) -> Self {
        Self {
            skill_id: skill_id.to_string(),
            context: None,
            data: serde_json::Map::new(),
            metadata: SkillMetadata {
                latency_ms: latency.as_millis() as u64,
                cached: false,
                item_count: 0,
                failure: Some(failure),
            },
        }
    }

    pub fn is_failure(&self) -> bool {
        self.metadata.failure.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

// ───────────────────────────── Skill trait ─────────────────────────────

#[async_trait]
pub trait Skill: Send + Sync {
    fn manifest(&self) -> &SkillManifest;

    async fn execute(&self, ctx: &SkillExecutionContext) -> Result<SkillOutput>;

    async fn health_check(&self) -> SkillHealth {
        SkillHealth::Healthy
    }
}

// ───────────────────────────── Registry ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillState {
    Registered,
    Activated,
    Deactivated,
}

struct SkillEntry {
    skill: Arc<dyn Skill>,
    state: SkillState,
    enabled: bool,
    config: SkillConfig,
    timeout: Option<Duration>,
}

/// An activated, enabled skill ready to be run.
#[derive(Clone)]
pub struct RunnableSkill {
    pub skill: Arc<dyn Skill>,
    pub config: SkillConfig,
    pub timeout: Duration,
}

impl RunnableSkill {
    pub fn id(&self) -> &str {
        &self.skill.manifest().id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkillHealthReport {
    pub skill_id: String,
    pub state: SkillState,
    pub enabled: bool,
    pub health: Option<SkillHealth>,
}

/// Explicit, ordered set of skills known to a pipeline instance.
pub struct SkillRegistry {
    entries: Vec<SkillEntry>,
    granted: HashSet<Permission>,
    default_timeout: Duration,
}

impl SkillRegistry {
    pub fn new(granted: impl IntoIterator<Item = Permission>, default_timeout: Duration) -> Self {
        Self {
            entries: Vec::new(),
            granted: granted.into_iter().collect(),
            default_timeout,
        }
    }

    pub fn granted(&self) -> &HashSet<Permission> {
        &self.granted
    }

    pub fn register(&mut self, skill: Arc<dyn Skill>) -> Result<(), SkillError> {
        let id = skill.manifest().id.clone();
        if self.entry(&id).is_some() {
            return Err(SkillError::AlreadyRegistered(id));
        }
        tracing::debug!(skill_id = %id, "skill registered");
        self.entries.push(SkillEntry {
            skill,
            state: SkillState::Registered,
            enabled: true,
            config: SkillConfig::new(),
            timeout: None,
        });
        Ok(())
    }

    /// Check permissions and config, then mark the skill runnable.
    ///
    /// A refused skill keeps its previous state.
    pub fn activate(&mut self, skill_id: &str, raw_config: &SkillConfig) -> Result<(), SkillError> {
        let granted = self.granted.clone();
        let entry = self.entry_mut(skill_id)?;
        let manifest = entry.skill.manifest();

        if let Some(missing) = manifest
            .permissions
            .iter()
            .find(|p| !granted.contains(p))
        {
            tracing::warn!(skill_id, permission = %missing, "skill activation refused");
            return Err(SkillError::PermissionDenied {
                skill: skill_id.to_string(),
                permission: *missing,
            });
        }

        let config = resolve_skill_config(manifest, raw_config)?;
        entry.config = config;
        entry.state = SkillState::Activated;
        tracing::info!(skill_id, "skill activated");
        Ok(())
    }

    pub fn deactivate(&mut self, skill_id: &str) -> Result<(), SkillError> {
        let entry = self.entry_mut(skill_id)?;
        entry.state = SkillState::Deactivated;
        tracing::info!(skill_id, "skill deactivated");
        Ok(())
    }

    pub fn set_enabled(&mut self, skill_id: &str, enabled: bool) -> Result<(), SkillError> {
        self.entry_mut(skill_id)?.enabled = enabled;
        Ok(())
    }

    pub fn set_timeout(&mut self, skill_id: &str, timeout: Duration) -> Result<(), SkillError> {
        self.entry_mut(skill_id)?.timeout = Some(timeout);
        Ok(())
    }

    pub fn state(&self, skill_id: &str) -> Option<SkillState> {
        self.entry(skill_id).map(|e| e.state)
    }

    pub fn is_enabled(&self, skill_id: &str) -> bool {
        self.entry(skill_id).is_some_and(|e| e.enabled)
    }

    pub fn config(&self, skill_id: &str) -> Option<&SkillConfig> {
        self.entry(skill_id).map(|e| &e.config)
    }

    pub fn manifests(&self) -> Vec<&SkillManifest> {
        self.entries.iter().map(|e| e.skill.manifest()).collect()
    }

    /// Activated and enabled skills, in registration order.
    pub fn runnable(&self) -> Vec<RunnableSkill> {
        self.entries
            .iter()
            .filter(|e| e.state == SkillState::Activated && e.enabled)
            .map(|e| RunnableSkill {
                skill: Arc::clone(&e.skill),
                config: e.config.clone(),
                timeout: e.timeout.unwrap_or(self.default_timeout),
            })
            .collect()
    }

    /// Run one skill in place under its timeout. Unlike the executor, failures
    /// come back as errors and a panic is not contained.
    pub async fn execute(
        &self,
        skill_id: &str,
        ctx: &SkillExecutionContext,
    ) -> Result<SkillOutput, SkillError> {
        let entry = self
            .entry(skill_id)
            .ok_or_else(|| SkillError::UnknownSkill(skill_id.to_string()))?;
        if entry.state != SkillState::Activated {
            return Err(SkillError::NotActivated(skill_id.to_string()));
        }
        let limit = entry.timeout.unwrap_or(self.default_timeout);
        let ctx = ctx.with_config(entry.config.clone());
        match tokio::time::timeout(limit, entry.skill.execute(&ctx)).await {
            Ok(result) => result.map_err(|e| SkillError::Failed {
                skill: skill_id.to_string(),
                reason: format!("{e:#}"),
            }),
            Err(_) => Err(SkillError::TimedOut {
                skill: skill_id.to_string(),
                after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    pub async fn health_report(&self) -> Vec<SkillHealthReport> {
        let mut report = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let health = if entry.state == SkillState::Activated {
                Some(entry.skill.health_check().await)
            } else {
                None
            };
            report.push(SkillHealthReport {
                skill_id: entry.skill.manifest().id.clone(),
                state: entry.state,
                enabled: entry.enabled,
                health,
            });
        }
        report
    }

    fn entry(&self, skill_id: &str) -> Option<&SkillEntry> {
        self.entries.iter().find(|e| e.skill.manifest().id == skill_id)
    }

    fn entry_mut(&mut self, skill_id: &str) -> Result<&mut SkillEntry, SkillError> {
        self.entries
            .iter_mut()
            .find(|e| e.skill.manifest().id == skill_id)
            .ok_or_else(|| SkillError::UnknownSkill(skill_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo {
        manifest: SkillManifest,
    }

    impl Echo {
        fn new(id: &str, permissions: Vec<Permission>) -> Self {
            Self {
                manifest: SkillManifest {
                    id: id.into(),
                    name: id.into(),
                    version: "1.0.0".into(),
                    description: "echoes config".into(),
                    config_fields: vec![
                        ConfigField::integer("limit", "Limit", 5),
                        ConfigField::select("tone", "Tone", &["warm", "dry"], "warm"),
                        ConfigField::boolean("verbose", "Verbose", false),
                    ],
                    permissions,
                },
            }
        }
    }

    #[async_trait]
    impl Skill for Echo {
        fn manifest(&self) -> &SkillManifest {
            &self.manifest
        }

        async fn execute(&self, ctx: &SkillExecutionContext) -> Result<SkillOutput> {
            let tone = ctx.config_str("tone").unwrap_or("none");
            Ok(SkillOutput::context(format!("{tone}:{}", ctx.message_content), 1))
        }
    }

    fn config(v: Value) -> SkillConfig {
        v.as_object().cloned().unwrap()
    }

    fn registry(granted: &[Permission]) -> SkillRegistry {
        SkillRegistry::new(granted.iter().copied(), Duration::from_secs(2))
    }

    #[test]
    fn permission_serde_names() {
        assert_eq!(
            serde_json::to_value(Permission::AutomemWrite).unwrap(),
            json!("automem:write")
        );
        let p: Permission = "redis:read".parse().unwrap();
        assert_eq!(p, Permission::RedisRead);
        assert!("disk:write".parse::<Permission>().is_err());
    }

    #[test]
    fn resolve_config_falls_back_to_defaults() {
        let manifest = Echo::new("echo", vec![]).manifest;
        let resolved = resolve_skill_config(
            &manifest,
            &config(json!({"limit": "ten", "tone": "loud", "verbose": true, "extra": 1})),
        )
        .unwrap();
        assert_eq!(resolved["limit"], json!(5));
        assert_eq!(resolved["tone"], json!("warm"));
        assert_eq!(resolved["verbose"], json!(true));
        assert!(!resolved.contains_key("extra"));
    }

    #[test]
    fn required_field_without_default_errors() {
        let mut manifest = Echo::new("echo", vec![]).manifest;
        manifest
            .config_fields
            .push(ConfigField::string("endpoint", "Endpoint", None).required());
        let err = resolve_skill_config(&manifest, &SkillConfig::new()).unwrap_err();
        assert!(matches!(err, SkillError::MissingConfig { field, .. } if field == "endpoint"));

        manifest
            .config_fields
            .push(ConfigField::string("label", "Label", None));
        let resolved =
            resolve_skill_config(&manifest, &config(json!({"endpoint": "http://x"}))).unwrap();
        assert!(!resolved.contains_key("label"));
    }

    #[test]
    fn manifest_serializes_field_type() {
        let field = ConfigField::select("tone", "Tone", &["a", "b"], "a").describe("voice");
        let v = serde_json::to_value(&field).unwrap();
        assert_eq!(v["type"], "select");
        assert_eq!(v["options"], json!(["a", "b"]));
        assert_eq!(v["description"], "voice");
    }

    #[test]
    fn activation_refuses_ungranted_permission() {
        let mut reg = registry(&[Permission::RedisRead]);
        reg.register(Arc::new(Echo::new("writer", vec![Permission::AutomemWrite])))
            .unwrap();
        let err = reg.activate("writer", &SkillConfig::new()).unwrap_err();
        assert!(matches!(
            err,
            SkillError::PermissionDenied {
                permission: Permission::AutomemWrite,
                ..
            }
        ));
        assert_eq!(reg.state("writer"), Some(SkillState::Registered));
        assert!(reg.runnable().is_empty());
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut reg = registry(&[]);
        reg.register(Arc::new(Echo::new("a", vec![]))).unwrap();
        let err = reg.register(Arc::new(Echo::new("a", vec![]))).unwrap_err();
        assert!(matches!(err, SkillError::AlreadyRegistered(id) if id == "a"));
    }

    #[test]
    fn runnable_respects_state_enabled_and_order() {
        let mut reg = registry(&[]);
        for id in ["a", "b", "c"] {
            reg.register(Arc::new(Echo::new(id, vec![]))).unwrap();
            reg.activate(id, &SkillConfig::new()).unwrap();
        }
        reg.set_enabled("b", false).unwrap();
        reg.set_timeout("c", Duration::from_millis(50)).unwrap();
        let runnable = reg.runnable();
        let ids: Vec<_> = runnable.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(runnable[0].timeout, Duration::from_secs(2));
        assert_eq!(runnable[1].timeout, Duration::from_millis(50));

        reg.deactivate("a").unwrap();
        assert_eq!(reg.runnable().len(), 1);
    }

    #[tokio::test]
    async fn execute_requires_activation() {
        let mut reg = registry(&[]);
        reg.register(Arc::new(Echo::new("echo", vec![]))).unwrap();
        let ctx = SkillExecutionContext::new("c1", "hello", "friend");

        let err = reg.execute("echo", &ctx).await.unwrap_err();
        assert!(matches!(err, SkillError::NotActivated(_)));

        reg.activate("echo", &config(json!({"tone": "dry"}))).unwrap();
        let out = reg.execute("echo", &ctx).await.unwrap();
        assert_eq!(out.context.as_deref(), Some("dry:hello"));

        let err = reg.execute("missing", &ctx).await.unwrap_err();
        assert!(matches!(err, SkillError::UnknownSkill(_)));
    }

    struct Stall {
        manifest: SkillManifest,
    }

    #[async_trait]
    impl Skill for Stall {
        fn manifest(&self) -> &SkillManifest {
            &self.manifest
        }

        async fn execute(&self, _ctx: &SkillExecutionContext) -> Result<SkillOutput> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(SkillOutput::empty())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn direct_execute_honours_skill_timeout() {
        let mut reg = registry(&[]);
        let manifest = Echo::new("stall", vec![]).manifest;
        reg.register(Arc::new(Stall { manifest })).unwrap();
        reg.activate("stall", &SkillConfig::new()).unwrap();
        reg.set_timeout("stall", Duration::from_millis(250)).unwrap();

        let ctx = SkillExecutionContext::new("c1", "hello", "friend");
        let err = reg.execute("stall", &ctx).await.unwrap_err();
        assert!(matches!(
            err,
            SkillError::TimedOut { ref skill, after_ms: 250 } if skill == "stall"
        ));
    }

    #[tokio::test]
    async fn health_report_only_probes_activated() {
        let mut reg = registry(&[]);
        reg.register(Arc::new(Echo::new("a", vec![]))).unwrap();
        reg.register(Arc::new(Echo::new("b", vec![]))).unwrap();
        reg.activate("a", &SkillConfig::new()).unwrap();
        let report = reg.health_report().await;
        assert_eq!(report[0].health, Some(SkillHealth::Healthy));
        assert_eq!(report[1].health, None);
        assert_eq!(report[1].state, SkillState::Registered);
    }

    #[test]
    fn context_config_getters() {
        let ctx = SkillExecutionContext::new("c", "m", "friend")
            .with_config(config(json!({"n": 3.0, "f": 0.5, "b": true, "s": "x"})));
        assert_eq!(ctx.config_u64("n"), Some(3));
        assert_eq!(ctx.config_f64("f"), Some(0.5));
        assert_eq!(ctx.config_bool("b"), Some(true));
        assert_eq!(ctx.config_str("s"), Some("x"));
        assert_eq!(ctx.config_u64("missing"), None);
    }
}
