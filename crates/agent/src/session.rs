use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use remit_core::errors::ApplicationError;
use remit_core::flows::{SessionState, Slots, Stage};
use remit_core::memory::Memory;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the stored state and memory, creating both on first contact.
    async fn get_or_create(&self, session_id: &str)
        -> Result<(SessionState, Memory), ApplicationError>;

    async fn save(
        &self,
        session_id: &str,
        state: &SessionState,
        memory: &Memory,
    ) -> Result<(), ApplicationError>;

    /// Replaces the task state with a fresh one. Memory is kept.
    async fn reset(&self, session_id: &str) -> Result<(), ApplicationError>;
}

#[derive(Clone, Debug, Default)]
struct SessionRecord {
    state: SessionState,
    memory: Memory,
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        match self.sessions.read() {
            Ok(sessions) => sessions.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the stored state, if the session exists.
    pub fn peek(&self, session_id: &str) -> Option<(SessionState, Memory)> {
        let sessions = match self.sessions.read() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.get(session_id).map(|record| (record.state.clone(), record.memory.clone()))
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SessionRecord>> {
        match self.sessions.write() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(
        &self,
        session_id: &str,
    ) -> Result<(SessionState, Memory), ApplicationError> {
        let mut sessions = self.write();
        let record = sessions.entry(session_id.to_owned()).or_default();
        Ok((record.state.clone(), record.memory.clone()))
    }

    async fn save(
        &self,
        session_id: &str,
        state: &SessionState,
        memory: &Memory,
    ) -> Result<(), ApplicationError> {
        self.write().insert(
            session_id.to_owned(),
            SessionRecord { state: state.clone(), memory: memory.clone() },
        );
        Ok(())
    }

    async fn reset(&self, session_id: &str) -> Result<(), ApplicationError> {
        let mut sessions = self.write();
        let record = sessions.entry(session_id.to_owned()).or_default();
        record.state = SessionState::default();
        Ok(())
    }
}

/// A task that reached a terminal stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedTask {
    pub scenario: String,
    pub stage: Stage,
    pub slots: Slots,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl CompletedTask {
    pub fn from_state(state: &SessionState, transaction_id: Option<String>) -> Self {
        Self {
            scenario: state.scenario.clone(),
            stage: state.stage,
            slots: state.slots.clone(),
            transaction_id,
            completed_at: Utc::now(),
        }
    }
}

/// Bounded per-session history of finished tasks.
#[derive(Debug)]
pub struct CompletedStore {
    max_per_session: usize,
    entries: Mutex<HashMap<String, VecDeque<CompletedTask>>>,
}

impl CompletedStore {
    pub fn new(max_per_session: usize) -> Self {
        Self { max_per_session: max_per_session.max(1), entries: Mutex::new(HashMap::new()) }
    }

    pub fn add(&self, session_id: &str, task: CompletedTask) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let history = entries.entry(session_id.to_owned()).or_default();
        history.push_front(task);
        history.truncate(self.max_per_session);
    }

    /// Newest first.
    pub fn list_for_session(&self, session_id: &str) -> Vec<CompletedTask> {
        let entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .get(session_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for CompletedStore {
    fn default() -> Self {
        Self::new(20)
    }
}
