pub mod clock;
pub mod history;
pub mod http_search;
pub mod memory_store;
pub mod migrations;
pub mod search;
pub mod sqlite_store;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use history::ConversationLog;
pub use http_search::HttpKnowledgeClient;
pub use memory_store::MemoryTtlStore;
pub use search::{KeywordSearch, KnowledgeCategory, ScoredCandidate, SearchRequest, SemanticSearch};
pub use sqlite_store::SqliteTtlStore;
pub use store::{get_json, set_json, StoreError, StoreResult, TtlStore};
