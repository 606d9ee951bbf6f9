//! Built-in context providers.

pub mod history;
pub mod knowledge;
pub mod persona;
pub mod style;

pub use history::ConversationHistorySkill;
pub use knowledge::KnowledgeGraphSkill;
pub use persona::{load_persona, Persona, PersonaSkill};
pub use style::{save_style_profile, StyleProfile, StyleProfileSkill};

pub const CONVERSATION_HISTORY: &str = "conversation-history";
pub const KNOWLEDGE_GRAPH: &str = "knowledge-graph";
pub const STYLE_PROFILE: &str = "style-profile";
pub const PERSONA: &str = "persona";

pub const BUILTIN_SKILL_IDS: [&str; 4] = [CONVERSATION_HISTORY, KNOWLEDGE_GRAPH, STYLE_PROFILE, PERSONA];

/// Approximate token count from text (chars / 4).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
