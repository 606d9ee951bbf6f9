use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub trace_id: Uuid,
    pub channel_type: String,
    /// Normalized contact identifier (channel-specific normalization happens upstream)
    pub contact_id: String,
    pub text: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Relationship of the contact to the account owner (e.g. "friend", "family", "work")
    #[serde(default)]
    pub relationship_type: Option<String>,
}

impl InboundMessage {
    pub fn new(
        channel_type: impl Into<String>,
        contact_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            channel_type: channel_type.into(),
            contact_id: contact_id.into(),
            text: text.into(),
            at: Utc::now(),
            sender_name: None,
            relationship_type: None,
        }
    }

    pub fn with_relationship(mut self, relationship: impl Into<String>) -> Self {
        self.relationship_type = Some(relationship.into());
        self
    }

    pub fn relationship(&self) -> &str {
        self.relationship_type.as_deref().unwrap_or("unknown")
    }
}

/// Whether a message needs deep contextual retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Phatic,
    Substantive,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phatic => "phatic",
            Self::Substantive => "substantive",
        }
    }

    /// Exact label match; anything else is `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "phatic" => Some(Self::Phatic),
            "substantive" => Some(Self::Substantive),
            _ => None,
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an automated reply was withheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    Global,
    Contact,
    Sleep,
    /// The gate state could not be read; replies are withheld (fail-closed).
    StoreUnavailable,
}

impl GateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Contact => "contact",
            Self::Sleep => "sleep",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

impl std::fmt::Display for GateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permit {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<GateReason>,
}

impl Permit {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: GateReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Expiry of the global pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum PauseUntil {
    Timestamp(DateTime<Utc>),
    Indefinite,
}

impl PauseUntil {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Timestamp(until) => now < *until,
            Self::Indefinite => true,
        }
    }
}

/// Snapshot of the global kill switch for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStatus {
    /// `true` while the global pause is engaged
    pub enabled: bool,
    pub until: Option<PauseUntil>,
    pub deferred_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPause {
    pub contact_id: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ContactPause {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// One line of stored conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub speaker: String,
    pub text: String,
    pub at: DateTime<Utc>,
}
