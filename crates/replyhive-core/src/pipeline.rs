//! Per-message state machine:
//! `Received → Gated → {Denied | Classified → {PhaticReply | SkillsExecuting → Assembled}}`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use replyhive_memory::{Clock, ConversationLog, KeywordSearch, SemanticSearch, TtlStore};
use replyhive_provider::LlmProvider;
use replyhive_schema::{Classification, GateReason, HistoryEntry, InboundMessage, Permit};
use serde::Serialize;

use crate::classifier::{ClassificationRouter, SimpleResponse};
use crate::config::ReplyhiveConfig;
use crate::error::PipelineError;
use crate::executor::SkillExecutor;
use crate::gate::GatingEngine;
use crate::retrieval::HybridRetriever;
use crate::skill::{Skill, SkillExecutionContext, SkillExecutionResult, SkillRegistry};
use crate::skills::{
    ConversationHistorySkill, KnowledgeGraphSkill, Persona, PersonaSkill, StyleProfileSkill,
};

/// Skill context assembled for a substantive message.
#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    pub contact_id: String,
    pub classification: Classification,
    pub results: HashMap<String, SkillExecutionResult>,
    /// Non-empty skill contexts joined in registration order.
    pub context: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Denied { reason: GateReason },
    PhaticReply { reply: SimpleResponse },
    Assembled { bundle: ContextBundle },
}

impl PipelineOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Denied { .. } => "denied",
            Self::PhaticReply { .. } => "phatic_reply",
            Self::Assembled { .. } => "assembled",
        }
    }
}

/// External collaborators needed to build a pipeline from configuration.
pub struct PipelineDeps {
    pub store: Arc<dyn TtlStore>,
    pub clock: Arc<dyn Clock>,
    pub provider: Arc<dyn LlmProvider>,
    pub semantic: Option<Arc<dyn SemanticSearch>>,
    /// Without a keyword provider the knowledge-graph skill is not registered.
    pub keyword: Option<Arc<dyn KeywordSearch>>,
    pub persona: Persona,
}

pub struct Pipeline {
    gate: Arc<GatingEngine>,
    router: ClassificationRouter,
    executor: SkillExecutor,
    history: Option<ConversationLog>,
    owner_name: String,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(
        gate: Arc<GatingEngine>,
        router: ClassificationRouter,
        executor: SkillExecutor,
        history: Option<ConversationLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gate,
            router,
            executor,
            history,
            owner_name: "me".to_string(),
            clock,
        }
    }

    pub fn with_owner_name(mut self, name: impl Into<String>) -> Self {
        self.owner_name = name.into();
        self
    }

    /// Wire the gate, router and built-in skills from configuration.
    ///
    /// A skill that fails activation is logged and left out; it never aborts startup.
    pub fn from_config(config: &ReplyhiveConfig, deps: PipelineDeps) -> Result<Self> {
        let gate = Arc::new(GatingEngine::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.clock),
            config.gate.clone(),
        ));
        let log = ConversationLog::new(
            Arc::clone(&deps.store),
            config.history.max_entries,
            config.history.ttl(),
        );
        let router = ClassificationRouter::new(deps.provider, config.classifier.clone());

        let mut skills: Vec<Arc<dyn Skill>> = vec![
            Arc::new(PersonaSkill::new(deps.persona)),
            Arc::new(StyleProfileSkill::new(Arc::clone(&deps.store))),
            Arc::new(ConversationHistorySkill::new(log.clone(), Arc::clone(&deps.clock))),
        ];
        if let Some(keyword) = deps.keyword {
            let retriever = Arc::new(HybridRetriever::new(deps.semantic, keyword));
            skills.push(Arc::new(KnowledgeGraphSkill::new(retriever)));
        }

        let mut registry = SkillRegistry::new(
            config.skills.granted_permissions.iter().copied(),
            config.skills.default_timeout(),
        );
        for skill in skills {
            let id = skill.manifest().id.clone();
            registry.register(skill)?;
            let entry = config.skills.entry(&id);
            registry.set_enabled(&id, entry.enabled)?;
            if let Some(ms) = entry.timeout_ms {
                registry.set_timeout(&id, std::time::Duration::from_millis(ms))?;
            }
            if let Err(e) = registry.activate(&id, &entry.config) {
                tracing::warn!(skill_id = %id, error = %e, "skill left inactive");
            }
        }

        Ok(Self::new(gate, router, SkillExecutor::new(registry), Some(log), deps.clock)
            .with_owner_name(config.owner.name.clone()))
    }

    pub fn gate(&self) -> &Arc<GatingEngine> {
        &self.gate
    }

    pub fn router(&self) -> &ClassificationRouter {
        &self.router
    }

    pub fn executor(&self) -> &SkillExecutor {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut SkillExecutor {
        &mut self.executor
    }

    /// Run one inbound message to a terminal state.
    ///
    /// Gate store failures deny the message; only a failed phatic reply is an error.
    pub async fn process(&self, msg: &InboundMessage) -> Result<PipelineOutcome, PipelineError> {
        let contact_id = msg.contact_id.as_str();
        tracing::debug!(contact_id, trace_id = %msg.trace_id, "message received");

        if let Err(e) = self.gate.remember_contact(contact_id).await {
            tracing::warn!(contact_id, error = %e, "failed to record contact");
        }

        let permit = match self.gate.check_permit(contact_id).await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::error!(contact_id, error = %e, "gate check failed; denying");
                Permit::deny(GateReason::StoreUnavailable)
            }
        };
        if !permit.allowed {
            let reason = permit.reason.unwrap_or(GateReason::StoreUnavailable);
            tracing::info!(contact_id, %reason, "message denied");
            self.record(msg, None).await;
            return Ok(PipelineOutcome::Denied { reason });
        }

        let classification = self.router.classify(&msg.text).await;
        tracing::info!(contact_id, %classification, "message classified");

        let outcome = match classification {
            Classification::Phatic => {
                let reply = match self.router.get_simple_response(&msg.text, None).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        tracing::error!(contact_id, error = %e, "simple response failed");
                        self.record(msg, None).await;
                        return Err(PipelineError::SimpleResponse(e));
                    }
                };
                tracing::info!(contact_id, tokens = reply.tokens_used, "phatic reply generated");
                self.record(msg, Some(&reply.response)).await;
                PipelineOutcome::PhaticReply { reply }
            }
            Classification::Substantive => {
                let ctx = SkillExecutionContext::new(contact_id, &msg.text, msg.relationship());
                let results = self.executor.execute_enabled(&ctx).await;
                let context = self.assemble(&results);
                let failed = results.values().filter(|r| r.is_failure()).count();
                tracing::info!(
                    contact_id,
                    skills = results.len(),
                    failed,
                    context_chars = context.len(),
                    "context assembled"
                );
                self.record(msg, None).await;
                PipelineOutcome::Assembled {
                    bundle: ContextBundle {
                        contact_id: contact_id.to_string(),
                        classification,
                        results,
                        context,
                    },
                }
            }
        };
        Ok(outcome)
    }

    fn assemble(&self, results: &HashMap<String, SkillExecutionResult>) -> String {
        self.executor
            .registry()
            .manifests()
            .into_iter()
            .filter_map(|m| results.get(&m.id))
            .filter_map(|r| r.context.as_deref())
            .filter(|c| !c.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Best-effort history append of the inbound message and any reply.
    async fn record(&self, msg: &InboundMessage, reply: Option<&str>) {
        let Some(log) = &self.history else {
            return;
        };
        let speaker = msg
            .sender_name
            .clone()
            .unwrap_or_else(|| msg.contact_id.clone());
        let inbound = HistoryEntry {
            speaker,
            text: msg.text.clone(),
            at: msg.at,
        };
        if let Err(e) = log.append(&msg.contact_id, inbound).await {
            tracing::warn!(contact_id = %msg.contact_id, error = %e, "history append failed");
            return;
        }
        if let Some(reply) = reply {
            let outbound = HistoryEntry {
                speaker: self.owner_name.clone(),
                text: reply.to_string(),
                at: self.clock.now(),
            };
            if let Err(e) = log.append(&msg.contact_id, outbound).await {
                tracing::warn!(contact_id = %msg.contact_id, error = %e, "history append failed");
            }
        }
    }
}
