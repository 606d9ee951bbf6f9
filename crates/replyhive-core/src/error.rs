use replyhive_memory::StoreError;

use crate::skill::Permission;

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("could not enumerate known contacts: {0}")]
    ContactEnumeration(#[source] StoreError),

    #[error("paused {paused} of {total} contacts; global pause left in place (failed: {})", failed.join(", "))]
    PauseAllIncomplete {
        paused: usize,
        total: usize,
        failed: Vec<String>,
    },

    #[error("invalid sleep hours: {0}")]
    InvalidSleepHours(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("skill already registered: {0}")]
    AlreadyRegistered(String),

    #[error("unknown skill: {0}")]
    UnknownSkill(String),

    #[error("skill {skill} requires ungranted permission {permission}")]
    PermissionDenied {
        skill: String,
        permission: Permission,
    },

    #[error("skill {skill} is missing required config field {field}")]
    MissingConfig { skill: String, field: String },

    #[error("skill {0} is not activated")]
    NotActivated(String),

    #[error("skill {skill} failed: {reason}")]
    Failed { skill: String, reason: String },

    #[error("skill {skill} timed out after {after_ms}ms")]
    TimedOut { skill: String, after_ms: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("simple response generation failed: {0}")]
    SimpleResponse(#[source] anyhow::Error),
}
