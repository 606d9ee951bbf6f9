use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use replyhive_provider::ProviderConfig;
use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierConfig;
use crate::gate::GateConfig;
use crate::skill::{Permission, SkillConfig};
use crate::skills::BUILTIN_SKILL_IDS;

fn default_owner_name() -> String {
    "me".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerConfig {
    #[serde(default = "default_owner_name")]
    pub name: String,
    /// Directory holding SOUL.md, STYLE.md and BOUNDARIES.md.
    #[serde(default)]
    pub prompts_dir: Option<PathBuf>,
}

impl Default for OwnerConfig {
    fn default() -> Self {
        Self {
            name: default_owner_name(),
            prompts_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file; in-memory when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_semantic() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Knowledge service base URL; the knowledge-graph skill is not registered when absent.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_semantic")]
    pub semantic: bool,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            semantic: default_semantic(),
        }
    }
}

fn default_history_max_entries() -> usize {
    200
}

fn default_history_ttl_hours() -> Option<u64> {
    Some(24 * 7)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_history_ttl_hours")]
    pub ttl_hours: Option<u64>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_history_max_entries(),
            ttl_hours: default_history_ttl_hours(),
        }
    }
}

impl HistoryConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_hours.map(|h| Duration::from_secs(h * 60 * 60))
    }
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillEntryConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub config: SkillConfig,
}

impl Default for SkillEntryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: None,
            config: SkillConfig::new(),
        }
    }
}

fn default_granted_permissions() -> Vec<Permission> {
    vec![
        Permission::RedisRead,
        Permission::AutomemRead,
        Permission::Network,
    ]
}

fn default_skill_timeout_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsConfig {
    #[serde(default = "default_granted_permissions")]
    pub granted_permissions: Vec<Permission>,
    #[serde(default = "default_skill_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default)]
    pub entries: HashMap<String, SkillEntryConfig>,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            granted_permissions: default_granted_permissions(),
            default_timeout_ms: default_skill_timeout_ms(),
            entries: HashMap::new(),
        }
    }
}

impl SkillsConfig {
    pub fn entry(&self, skill_id: &str) -> SkillEntryConfig {
        self.entries.get(skill_id).cloned().unwrap_or_default()
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyhiveConfig {
    #[serde(default)]
    pub owner: OwnerConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

/// Read `path`, substitute `${VAR}` placeholders in secrets and endpoints, validate.
pub fn load_config(path: &Path) -> Result<ReplyhiveConfig> {
    let mut config: ReplyhiveConfig = read_yaml_file(path)?;
    resolve_config_env(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &ReplyhiveConfig) -> Result<()> {
    for (skill_id, entry) in &config.skills.entries {
        if !BUILTIN_SKILL_IDS.contains(&skill_id.as_str()) {
            return Err(anyhow!("unknown skill id in skills.entries: {skill_id}"));
        }
        if entry.timeout_ms == Some(0) {
            return Err(anyhow!("skills.entries.{skill_id}.timeout_ms must be greater than 0"));
        }
    }

    if config.skills.default_timeout_ms == 0 {
        return Err(anyhow!("skills.default_timeout_ms must be greater than 0"));
    }

    let temperature = config.classifier.temperature;
    if !(0.0..=2.0).contains(&temperature) {
        return Err(anyhow!(
            "classifier.temperature must be within [0, 2], got {temperature}"
        ));
    }

    if let Some(hours) = &config.gate.sleep_hours {
        hours
            .validate()
            .map_err(|e| anyhow!("gate.sleep_hours: {e}"))?;
    }

    if config.gate.pause_all_attempts == 0 {
        return Err(anyhow!("gate.pause_all_attempts must be at least 1"));
    }

    if config.history.max_entries == 0 {
        return Err(anyhow!("history.max_entries must be greater than 0"));
    }

    Ok(())
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

fn resolve_config_env(config: &mut ReplyhiveConfig) {
    config.provider.api_base = resolve_env_var(&config.provider.api_base);
    if let Some(key) = &mut config.provider.api_key {
        *key = resolve_env_var(key);
    }
    if let Some(url) = &mut config.knowledge.base_url {
        *url = resolve_env_var(url);
    }
    if let Some(key) = &mut config.knowledge.api_key {
        *key = resolve_env_var(key);
    }
    // An unset `${VAR}` resolves to an empty key; treat that as no key.
    if config.provider.api_key.as_deref() == Some("") {
        config.provider.api_key = None;
    }
    if config.knowledge.api_key.as_deref() == Some("") {
        config.knowledge.api_key = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{DeferredCountPolicy, SleepHoursConfig};
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
owner:
  name: Robin
gate:
  deferred_policy: accumulate
  sleep_hours:
    enabled: true
    start_hour: 23
    end_hour: 7
    tz_offset_minutes: 60
classifier:
  model: small-model
provider:
  api_base: http://localhost:11434/v1
  api_key: ${REPLYHIVE_TEST_KEY_THAT_IS_UNSET}
store:
  path: state/replyhive.db
skills:
  default_timeout_ms: 1500
  entries:
    conversation-history:
      config:
        maxMessages: 10
    knowledge-graph:
      enabled: false
      timeout_ms: 800
"#;

    fn write_sample(contents: &str) -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("replyhive.yaml");
        fs::write(&path, contents).unwrap();
        (tmp, path)
    }

    #[test]
    fn load_config_parses_sections_and_defaults() {
        let (_tmp, path) = write_sample(SAMPLE);
        let config = load_config(&path).unwrap();

        assert_eq!(config.owner.name, "Robin");
        assert_eq!(config.gate.deferred_policy, DeferredCountPolicy::Accumulate);
        assert_eq!(config.gate.pause_all_attempts, 3);
        assert_eq!(
            config.gate.sleep_hours,
            Some(SleepHoursConfig {
                enabled: true,
                start_hour: 23,
                start_minute: 0,
                end_hour: 7,
                end_minute: 0,
                tz_offset_minutes: 60,
            })
        );
        assert_eq!(config.classifier.model, "small-model");
        assert_eq!(config.classifier.temperature, 0.0);
        assert_eq!(config.provider.api_key, None);
        assert_eq!(config.skills.default_timeout(), Duration::from_millis(1500));
        assert!(!config.skills.entry("knowledge-graph").enabled);
        assert!(config.skills.entry("persona").enabled);
        assert_eq!(
            config.skills.entry("conversation-history").config["maxMessages"],
            serde_json::json!(10)
        );
        assert_eq!(config.history.max_entries, 200);
    }

    #[test]
    fn empty_file_yields_defaults() {
        let (_tmp, path) = write_sample("{}");
        let config = load_config(&path).unwrap();
        assert!(config.store.path.is_none());
        assert_eq!(
            config.skills.granted_permissions,
            default_granted_permissions()
        );
    }

    #[test]
    fn validate_rejects_unknown_skill() {
        let mut config = ReplyhiveConfig::default();
        config
            .skills
            .entries
            .insert("weather".into(), SkillEntryConfig::default());
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("unknown skill id"));
    }

    #[test]
    fn validate_rejects_zero_timeouts() {
        let mut config = ReplyhiveConfig::default();
        config.skills.default_timeout_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = ReplyhiveConfig::default();
        config.skills.entries.insert(
            "persona".into(),
            SkillEntryConfig {
                timeout_ms: Some(0),
                ..SkillEntryConfig::default()
            },
        );
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_temperature() {
        let mut config = ReplyhiveConfig::default();
        config.classifier.temperature = 2.5;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn validate_rejects_bad_sleep_hours() {
        let (_tmp, path) = write_sample(
            "gate:\n  sleep_hours:\n    enabled: true\n    start_hour: 25\n    end_hour: 6\n",
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("sleep_hours"));
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/replyhive.yaml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn env_placeholders_in_secrets() {
        let path = std::env::var("PATH").unwrap();
        assert_eq!(resolve_env_var("Bearer ${PATH}"), format!("Bearer {path}"));
        assert_eq!(resolve_env_var("sk-literal"), "sk-literal");
        assert_eq!(resolve_env_var("a${REPLYHIVE_UNSET_FOR_TEST}b"), "ab");
        assert_eq!(resolve_env_var("key=${OPEN"), "key=${OPEN");
    }
}
