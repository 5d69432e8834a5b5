use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use devmate_provider::{Message, Role};
use serde::{Deserialize, Serialize};

use crate::request::ModelId;

/// Default cap; oldest sessions are evicted beyond it.
pub const MAX_SESSIONS: usize = 50;

const TITLE_CHARS: usize = 50;
const ID_SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    /// Unix milliseconds.
    pub created_at: i64,
    pub messages: Vec<Message>,
    pub model: ModelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl ChatSession {
    /// A new, empty session titled after its first prompt.
    pub fn new(id: String, first_prompt: &str, model: ModelId, system: Option<String>) -> Self {
        Self {
            id,
            title: title_from(first_prompt),
            created_at: Utc::now().timestamp_millis(),
            messages: Vec::new(),
            model,
            system,
        }
    }

    /// Appends one completed exchange.
    pub fn record_exchange(&mut self, prompt: &str, reply: &str) {
        self.messages.push(Message::user(prompt));
        self.messages.push(Message::assistant(reply));
    }

    pub fn turns(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }
}

fn title_from(prompt: &str) -> String {
    let line = prompt.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return "untitled".to_string();
    }
    match line.char_indices().nth(TITLE_CHARS) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}

/// `chat_<unix-ms>_<9 base36 chars>`
pub fn generate_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();
    format!("chat_{}_{suffix}", Utc::now().timestamp_millis())
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("history file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Local key-value persistence of chat sessions, keyed by id.
///
/// Reads that fail yield an empty history and writes that fail are logged,
/// so a broken store never blocks chatting.
pub trait HistoryStore: Send + Sync {
    /// All sessions, oldest first.
    fn load(&self) -> Vec<ChatSession>;

    /// Inserts or replaces by id, then evicts the oldest beyond the store's cap.
    fn save(&self, session: &ChatSession);

    fn delete(&self, id: &str);

    fn clear(&self);

    fn get(&self, id: &str) -> Option<ChatSession> {
        self.load().into_iter().find(|s| s.id == id)
    }

    fn generate_id(&self) -> String {
        generate_id()
    }
}

fn upsert(sessions: &mut Vec<ChatSession>, session: &ChatSession, capacity: usize) {
    match sessions.iter_mut().find(|s| s.id == session.id) {
        Some(existing) => *existing = session.clone(),
        None => sessions.push(session.clone()),
    }
    if sessions.len() > capacity {
        let excess = sessions.len() - capacity;
        sessions.drain(..excess);
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    sessions: Mutex<Vec<ChatSession>>,
    capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
            capacity: MAX_SESSIONS,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, Vec<ChatSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl HistoryStore for MemoryStore {
    fn load(&self) -> Vec<ChatSession> {
        self.sessions().clone()
    }

    fn save(&self, session: &ChatSession) {
        upsert(&mut self.sessions(), session, self.capacity);
    }

    fn delete(&self, id: &str) {
        self.sessions().retain(|s| s.id != id);
    }

    fn clear(&self) {
        self.sessions().clear();
    }
}

/// All sessions in one JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    capacity: usize,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            capacity: MAX_SESSIONS,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn try_load(&self) -> Result<Vec<ChatSession>, HistoryError> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if json.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&json)?)
    }

    /// Writes through a sibling temp file and a rename, so readers never see
    /// a half-written history.
    pub fn try_write(&self, sessions: &[ChatSession]) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(sessions)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn read_or_empty(&self) -> Vec<ChatSession> {
        self.try_load().unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to load chat history");
            Vec::new()
        })
    }

    fn write_or_log(&self, sessions: &[ChatSession]) {
        if let Err(e) = self.try_write(sessions) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to save chat history");
        }
    }
}

impl HistoryStore for JsonFileStore {
    fn load(&self) -> Vec<ChatSession> {
        self.read_or_empty()
    }

    fn save(&self, session: &ChatSession) {
        let mut sessions = self.read_or_empty();
        upsert(&mut sessions, session, self.capacity);
        self.write_or_log(&sessions);
        tracing::debug!(id = %session.id, total = sessions.len(), "Saved chat session");
    }

    fn delete(&self, id: &str) {
        let mut sessions = self.read_or_empty();
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        if sessions.len() != before {
            self.write_or_log(&sessions);
        }
    }

    fn clear(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to clear chat history")
            }
        }
    }
}
