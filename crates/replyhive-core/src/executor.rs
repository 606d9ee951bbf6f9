use std::collections::HashMap;

use futures::future::join_all;
use tokio::time::{timeout, Instant};

use crate::skill::{
    RunnableSkill, SkillExecutionContext, SkillExecutionResult, SkillFailure, SkillRegistry,
};

/// Runs every enabled, activated skill concurrently against one context.
///
/// Each skill runs on its own task with its own timeout. Errors, timeouts and
/// panics become empty results tagged with the failure; nothing propagates.
pub struct SkillExecutor {
    registry: SkillRegistry,
}

impl SkillExecutor {
    pub fn new(registry: SkillRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SkillRegistry {
        &mut self.registry
    }

    pub async fn execute_enabled(
        &self,
        ctx: &SkillExecutionContext,
    ) -> HashMap<String, SkillExecutionResult> {
        let runnable = self.registry.runnable();
        let runs = runnable.into_iter().map(|r| run_isolated(r, ctx.clone()));
        join_all(runs)
            .await
            .into_iter()
            .map(|result| (result.skill_id.clone(), result))
            .collect()
    }
}

async fn run_isolated(runnable: RunnableSkill, base: SkillExecutionContext) -> SkillExecutionResult {
    let skill_id = runnable.id().to_string();
    let limit = runnable.timeout;
    let ctx = base.with_config(runnable.config);
    let skill = runnable.skill;
    let started = Instant::now();

    let mut handle = tokio::spawn(async move { skill.execute(&ctx).await });

    let failure = match timeout(limit, &mut handle).await {
        Ok(Ok(Ok(output))) => {
            let result = SkillExecutionResult::from_output(&skill_id, output, started.elapsed());
            tracing::debug!(
                skill_id = %skill_id,
                latency_ms = result.metadata.latency_ms,
                items = result.metadata.item_count,
                "skill completed"
            );
            return result;
        }
        Ok(Ok(Err(e))) => SkillFailure::Error {
            message: format!("{e:#}"),
        },
        Ok(Err(join_err)) => SkillFailure::Panicked {
            message: join_err.to_string(),
        },
        Err(_) => {
            handle.abort();
            SkillFailure::Timeout {
                after_ms: limit.as_millis() as u64,
            }
        }
    };

    let failed = SkillExecutionResult::failed(&skill_id, failure, started.elapsed());
    tracing::warn!(
        skill_id = %skill_id,
        latency_ms = failed.metadata.latency_ms,
        failure = ?failed.metadata.failure,
        "skill failed; continuing with empty result"
    );
    failed
}
