pub mod history;
pub mod relay;
pub mod request;

pub use history::{ChatSession, HistoryStore, JsonFileStore, MemoryStore};
pub use relay::{StreamEvent, StreamOutcome};
pub use request::{ChatRequest, ChatResponse, ChatStats, ErrorBody, ModelId, ValidationError};

pub use devmate_provider::{Message, Role};
