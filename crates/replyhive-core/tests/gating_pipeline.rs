use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use replyhive_core::skills::{save_style_profile, Persona, StyleProfile};
use replyhive_core::{
    ClassificationRouter, ClassifierConfig, GateConfig, GateError, GatingEngine, HybridRetriever,
    Permission, Pipeline, PipelineDeps, PipelineOutcome, ReplyhiveConfig, RetrievalConfig,
    RetrievalMethod, Skill, SkillExecutionContext, SkillExecutor, SkillFailure, SkillManifest,
    SkillOutput, SkillRegistry, SleepHoursConfig,
};
use replyhive_memory::{
    Clock, KeywordSearch, KnowledgeCategory, ManualClock, MemoryTtlStore, ScoredCandidate, SearchRequest,
    SemanticSearch, SqliteTtlStore, StoreError, StoreResult, TtlStore,
};
use replyhive_provider::{LlmProvider, LlmRequest, LlmResponse};
use replyhive_schema::{Classification, GateReason, InboundMessage};

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 14, h, m, 0).unwrap()
}

fn gate_at(start: DateTime<Utc>, config: GateConfig) -> (GatingEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start));
    let store = Arc::new(MemoryTtlStore::with_clock(clock.clone()));
    (GatingEngine::new(store, clock.clone(), config), clock)
}

// ───────────────────────────── Gating ─────────────────────────────

#[tokio::test]
async fn timed_global_pause_denies_every_contact_until_expiry() {
    let (gate, clock) = gate_at(at(9, 0), GateConfig::default());
    gate.set_global_pause(3600).await.unwrap();

    for minute in [0, 15, 59] {
        clock.set(at(9, minute));
        for contact in ["alice", "bob"] {
            let permit = gate.check_permit(contact).await.unwrap();
            assert_eq!(permit.reason, Some(GateReason::Global), "{contact} at 09:{minute}");
        }
    }

    clock.set(at(10, 0));
    assert!(gate.check_permit("alice").await.unwrap().allowed);
    clock.set(at(11, 30));
    assert!(gate.check_permit("bob").await.unwrap().allowed);
}

#[tokio::test]
async fn indefinite_pause_holds_until_cleared() {
    let (gate, clock) = gate_at(at(9, 0), GateConfig::default());
    gate.set_global_pause(0).await.unwrap();

    clock.advance(chrono::Duration::days(400));
    assert_eq!(
        gate.check_permit("alice").await.unwrap().reason,
        Some(GateReason::Global)
    );

    gate.clear_global_pause().await.unwrap();
    assert!(!gate.status().await.unwrap().enabled);
}

#[tokio::test]
async fn clearing_global_pause_holds_all_five_contacts_for_a_year() {
    let (gate, clock) = gate_at(at(9, 0), GateConfig::default());
    let contacts = ["c1", "c2", "c3", "c4", "c5"];
    for c in contacts {
        gate.remember_contact(c).await.unwrap();
    }
    gate.set_global_pause(0).await.unwrap();

    assert_eq!(gate.clear_global_pause().await.unwrap(), 5);

    let pauses = gate.contact_pauses().await.unwrap();
    assert_eq!(pauses.len(), 5);
    let year = clock.now() + chrono::Duration::days(365);
    for p in &pauses {
        assert!((p.expires_at - year).num_seconds().abs() < 5);
    }
    assert!(!gate.status().await.unwrap().enabled);

    for c in contacts {
        assert_eq!(
            gate.check_permit(c).await.unwrap().reason,
            Some(GateReason::Contact)
        );
    }
    gate.clear_contact_pause("c3").await.unwrap();
    assert!(gate.check_permit("c3").await.unwrap().allowed);
}

/// Memory store whose prefix scans can be switched off.
struct ScanFails {
    inner: MemoryTtlStore,
    broken: AtomicBool,
}

#[async_trait]
impl TtlStore for ScanFails {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.inner.set(key, value, ttl).await
    }
    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key).await
    }
    async fn scan(&self, prefix: &str) -> StoreResult<Vec<String>> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("scan refused"));
        }
        self.inner.scan(prefix).await
    }
    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.inner.incr(key).await
    }
}

#[tokio::test]
async fn enumeration_failure_leaves_global_pause_in_place() {
    let clock = Arc::new(ManualClock::new(at(9, 0)));
    let store = Arc::new(ScanFails {
        inner: MemoryTtlStore::with_clock(clock.clone()),
        broken: AtomicBool::new(false),
    });
    let config = GateConfig {
        pause_all_backoff_ms: 0,
        ..GateConfig::default()
    };
    let gate = GatingEngine::new(store.clone(), clock, config);
    gate.remember_contact("c1").await.unwrap();
    gate.set_global_pause(0).await.unwrap();

    store.broken.store(true, Ordering::SeqCst);
    let err = gate.clear_global_pause().await.unwrap_err();
    assert!(matches!(err, GateError::ContactEnumeration(_)));
    assert!(store.inner.get("gate:global").await.unwrap().is_some());
    assert_eq!(
        gate.check_permit("c1").await.unwrap().reason,
        Some(GateReason::Global)
    );
}

#[tokio::test]
async fn overnight_sleep_window() {
    let config = GateConfig {
        sleep_hours: Some(SleepHoursConfig {
            enabled: true,
            start_hour: 22,
            start_minute: 0,
            end_hour: 6,
            end_minute: 0,
            tz_offset_minutes: 0,
        }),
        ..GateConfig::default()
    };
    let (gate, clock) = gate_at(at(23, 30), config);
    assert_eq!(
        gate.check_permit("alice").await.unwrap().reason,
        Some(GateReason::Sleep)
    );
    clock.set(at(2, 0));
    assert_eq!(
        gate.check_permit("alice").await.unwrap().reason,
        Some(GateReason::Sleep)
    );
    clock.set(at(10, 0));
    assert!(gate.check_permit("alice").await.unwrap().allowed);
}

#[tokio::test]
async fn gate_state_survives_sqlite_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replyhive.db");
    let clock = Arc::new(ManualClock::new(at(9, 0)));
    {
        let store = Arc::new(SqliteTtlStore::open_with_clock(&path, clock.clone()).unwrap());
        let gate = GatingEngine::new(store, clock.clone(), GateConfig::default());
        gate.set_contact_pause("bob", 600, Some("travelling".into()))
            .await
            .unwrap();
        gate.set_global_pause(0).await.unwrap();
        gate.check_permit("bob").await.unwrap();
    }
    let store = Arc::new(SqliteTtlStore::open_with_clock(&path, clock.clone()).unwrap());
    let gate = GatingEngine::new(store, clock, GateConfig::default());
    let status = gate.status().await.unwrap();
    assert!(status.enabled);
    assert_eq!(status.deferred_count, 1);
    let pause = gate.contact_pause("bob").await.unwrap().unwrap();
    assert_eq!(pause.reason.as_deref(), Some("travelling"));
}

#[tokio::test]
async fn maximal_pause_duration_persists_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replyhive.db");
    let clock = Arc::new(ManualClock::new(at(9, 0)));
    {
        let store = Arc::new(SqliteTtlStore::open_with_clock(&path, clock.clone()).unwrap());
        let gate = GatingEngine::new(store, clock.clone(), GateConfig::default());
        gate.set_global_pause(u64::MAX).await.unwrap();
        assert_eq!(
            gate.check_permit("alice").await.unwrap().reason,
            Some(GateReason::Global)
        );
    }

    clock.advance(chrono::Duration::days(365 * 50));
    let store = Arc::new(SqliteTtlStore::open_with_clock(&path, clock.clone()).unwrap());
    assert_eq!(store.purge_expired().await.unwrap(), 0);
    let gate = GatingEngine::new(store, clock, GateConfig::default());
    assert!(gate.status().await.unwrap().enabled);
    assert!(!gate.check_permit("alice").await.unwrap().allowed);
}

// ───────────────────────────── Retrieval ─────────────────────────────

struct Canned {
    hits: HashMap<KnowledgeCategory, usize>,
    calls: AtomicUsize,
}

impl Canned {
    fn new(hits: &[(KnowledgeCategory, usize)]) -> Arc<Self> {
        Arc::new(Self {
            hits: hits.iter().copied().collect(),
            calls: AtomicUsize::new(0),
        })
    }

    fn answer(&self, req: &SearchRequest) -> Vec<ScoredCandidate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = self.hits.get(&req.category).copied().unwrap_or(0);
        (0..n)
            .map(|i| ScoredCandidate {
                id: format!("{}-{i}", req.category.as_str()),
                text: format!("{} fact {i}", req.category.as_str()),
                score: 0.9,
            })
            .collect()
    }
}

#[async_trait]
impl SemanticSearch for Canned {
    async fn search(&self, req: &SearchRequest) -> Result<Vec<ScoredCandidate>> {
        Ok(self.answer(req))
    }
}

#[async_trait]
impl KeywordSearch for Canned {
    async fn search(&self, req: &SearchRequest) -> Result<Vec<ScoredCandidate>> {
        Ok(self.answer(req))
    }
}

#[tokio::test]
async fn four_semantic_hits_satisfy_threshold_of_three() {
    use KnowledgeCategory::*;
    let semantic = Canned::new(&[(People, 2), (Topics, 1), (Events, 1)]);
    let keyword = Canned::new(&[(Topics, 3)]);
    let retriever = HybridRetriever::new(Some(semantic), keyword.clone());

    let outcome = retriever
        .retrieve_context("dinner friday", "alice", &RetrievalConfig::default())
        .await;
    assert_eq!(outcome.method, RetrievalMethod::Semantic);
    assert_eq!(outcome.context.total(), 4);
    assert_eq!(keyword.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn one_semantic_hit_falls_back_to_keyword() {
    use KnowledgeCategory::*;
    let semantic = Canned::new(&[(People, 1)]);
    let keyword = Canned::new(&[(Topics, 2)]);
    let retriever = HybridRetriever::new(Some(semantic), keyword.clone());

    let outcome = retriever
        .retrieve_context("dinner friday", "alice", &RetrievalConfig::default())
        .await;
    assert_eq!(outcome.method, RetrievalMethod::Keyword);
    assert!(keyword.calls.load(Ordering::SeqCst) > 0);
    assert_eq!(outcome.context.topics.len(), 2);
}

// ───────────────────────────── Skills ─────────────────────────────

struct Timed {
    manifest: SkillManifest,
    delay: Duration,
}

fn timed(id: &str, delay_ms: u64, permissions: Vec<Permission>) -> Arc<Timed> {
    Arc::new(Timed {
        manifest: SkillManifest {
            id: id.into(),
            name: id.into(),
            version: "1.0.0".into(),
            description: String::new(),
            config_fields: vec![],
            permissions,
        },
        delay: Duration::from_millis(delay_ms),
    })
}

#[async_trait]
impl Skill for Timed {
    fn manifest(&self) -> &SkillManifest {
        &self.manifest
    }

    async fn execute(&self, _ctx: &SkillExecutionContext) -> Result<SkillOutput> {
        tokio::time::sleep(self.delay).await;
        Ok(SkillOutput::context(format!("from {}", self.manifest.id), 1))
    }
}

#[tokio::test]
async fn ungranted_permission_excludes_skill_without_failing_executor() {
    let mut registry = SkillRegistry::new([Permission::RedisRead], Duration::from_secs(1));
    registry
        .register(timed("writer", 0, vec![Permission::AutomemWrite]))
        .unwrap();
    registry
        .register(timed("reader", 0, vec![Permission::RedisRead]))
        .unwrap();
    assert!(registry.activate("writer", &Default::default()).is_err());
    registry.activate("reader", &Default::default()).unwrap();

    let executor = SkillExecutor::new(registry);
    let results = executor
        .execute_enabled(&SkillExecutionContext::new("c1", "hi", "friend"))
        .await;
    assert!(!results.contains_key("writer"));
    assert_eq!(results["reader"].context.as_deref(), Some("from reader"));
}

#[tokio::test(start_paused = true)]
async fn slow_skill_times_out_while_others_finish_concurrently() {
    let mut registry = SkillRegistry::new(Vec::<Permission>::new(), Duration::from_millis(400));
    for skill in [timed("A", 200, vec![]), timed("B", 5_000, vec![]), timed("C", 300, vec![])] {
        let id = skill.manifest.id.clone();
        registry.register(skill).unwrap();
        registry.activate(&id, &Default::default()).unwrap();
    }
    let executor = SkillExecutor::new(registry);

    let started = tokio::time::Instant::now();
    let results = executor
        .execute_enabled(&SkillExecutionContext::new("c1", "hi", "friend"))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(results["A"].context.as_deref(), Some("from A"));
    assert_eq!(results["C"].context.as_deref(), Some("from C"));
    assert_eq!(results["B"].skill_id, "B");
    assert!(results["B"].context.is_none());
    assert_eq!(results["B"].metadata.item_count, 0);
    assert_eq!(
        results["B"].metadata.failure,
        Some(SkillFailure::Timeout { after_ms: 400 })
    );
    // A + C alone would be 500ms; the timeout bounds the wait.
    assert!(elapsed < Duration::from_millis(500));
}

// ───────────────────────────── Classification & pipeline ─────────────────────────────

struct Broken;

#[async_trait]
impl LlmProvider for Broken {
    async fn chat(&self, _request: LlmRequest) -> Result<LlmResponse> {
        Err(anyhow!("connection reset"))
    }
}

#[tokio::test]
async fn classifier_failure_means_substantive() {
    let router = ClassificationRouter::new(Arc::new(Broken), ClassifierConfig::default());
    assert_eq!(router.classify("see you at 8?").await, Classification::Substantive);
}

struct StoreDown;

#[async_trait]
impl TtlStore for StoreDown {
    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        Err(StoreError::unavailable("down"))
    }
    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> StoreResult<()> {
        Err(StoreError::unavailable("down"))
    }
    async fn delete(&self, _key: &str) -> StoreResult<()> {
        Err(StoreError::unavailable("down"))
    }
    async fn scan(&self, _prefix: &str) -> StoreResult<Vec<String>> {
        Err(StoreError::unavailable("down"))
    }
    async fn incr(&self, _key: &str) -> StoreResult<i64> {
        Err(StoreError::unavailable("down"))
    }
}

#[tokio::test]
async fn store_outage_fails_closed() {
    let pipeline = Pipeline::from_config(
        &ReplyhiveConfig::default(),
        PipelineDeps {
            store: Arc::new(StoreDown),
            clock: Arc::new(ManualClock::new(at(12, 0))),
            provider: Arc::new(Broken),
            semantic: None,
            keyword: None,
            persona: Persona::named("Robin"),
        },
    )
    .unwrap();
    let outcome = pipeline
        .process(&InboundMessage::new("sms", "alice", "are we still on?"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        PipelineOutcome::Denied {
            reason: GateReason::StoreUnavailable
        }
    ));
}

/// Always answers "substantive" to the classifier.
struct AlwaysSubstantive;

#[async_trait]
impl LlmProvider for AlwaysSubstantive {
    async fn chat(&self, _request: LlmRequest) -> Result<LlmResponse> {
        Ok(LlmResponse {
            text: "substantive".into(),
            input_tokens: None,
            output_tokens: None,
            stop_reason: None,
        })
    }
}

#[tokio::test]
async fn end_to_end_substantive_message_gathers_builtin_context() {
    let clock = Arc::new(ManualClock::new(at(12, 0)));
    let store: Arc<dyn TtlStore> = Arc::new(MemoryTtlStore::with_clock(clock.clone()));
    save_style_profile(
        store.as_ref(),
        "alice",
        &StyleProfile {
            tone: Some("teasing".into()),
            ..StyleProfile::default()
        },
    )
    .await
    .unwrap();

    let semantic = Canned::new(&[(KnowledgeCategory::People, 3)]);
    let keyword = Canned::new(&[]);
    let pipeline = Pipeline::from_config(
        &ReplyhiveConfig::default(),
        PipelineDeps {
            store,
            clock,
            provider: Arc::new(AlwaysSubstantive),
            semantic: Some(semantic),
            keyword: Some(keyword),
            persona: Persona::named("Robin"),
        },
    )
    .unwrap();

    pipeline
        .process(&InboundMessage::new("sms", "alice", "did you book the cabin?"))
        .await
        .unwrap();
    let outcome = pipeline
        .process(&InboundMessage::new("sms", "alice", "also, bring the map").with_relationship("sister"))
        .await
        .unwrap();

    let PipelineOutcome::Assembled { bundle } = outcome else {
        panic!("expected assembled context");
    };
    assert_eq!(bundle.results.len(), 4);
    let persona_at = bundle.context.find("## Persona").unwrap();
    let style_at = bundle.context.find("## Communication Style").unwrap();
    let history_at = bundle.context.find("## Recent Conversation").unwrap();
    let knowledge_at = bundle.context.find("## What You Know").unwrap();
    assert!(persona_at < style_at && style_at < history_at && history_at < knowledge_at);
    assert!(bundle.context.contains("The sender is your sister."));
    assert!(bundle.context.contains("did you book the cabin?"));
    assert_eq!(
        bundle.results["knowledge-graph"].data["method"],
        serde_json::json!("semantic")
    );
}
