//! Session State
//!
//! Per-client state: the conversation thread, the active table or
//! database connection, and the caches the tools maintain. Sessions are
//! independent; the HTTP layer holds a per-session async mutex so at
//! most one turn is in flight per session.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::agent::thread::ConversationThread;
use crate::table::DataTable;
use crate::types::{AgentMode, ColumnInfo, ConnectCredentials, TabularResult};

pub struct SessionContext {
    pub id: String,
    pub mode: AgentMode,
    pub thread: ConversationThread,
    /// The active in-memory table (code mode).
    pub table: Option<DataTable>,
    /// Cached credentials for the remote gateway (SQL mode).
    pub credentials: Option<ConnectCredentials>,
    /// Table names known from the last connect/refresh.
    pub known_tables: Vec<String>,
    /// Column metadata fetched so far, keyed by table name.
    pub schema_cache: HashMap<String, Vec<ColumnInfo>>,
    /// Tables the conversation has touched; their schemas are included
    /// in the system prompt first.
    pub important_tables: HashSet<String>,
    /// Full result of the most recent successful query. Charts read it.
    pub last_result: Option<TabularResult>,
    /// Chart artifact produced during the current invocation, if any.
    pub pending_chart: Option<String>,
    /// Table produced during the current invocation, handed back to the
    /// caller alongside the answer text.
    pub pending_table: Option<TabularResult>,
    pub created_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(mode: AgentMode) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mode,
            thread: ConversationThread::new(),
            table: None,
            credentials: None,
            known_tables: Vec::new(),
            schema_cache: HashMap::new(),
            important_tables: HashSet::new(),
            last_result: None,
            pending_chart: None,
            pending_table: None,
            created_at: Utc::now(),
        }
    }

    /// Drop the conversation and derived caches, keeping the data source
    /// (table or connection) in place.
    pub fn reset_conversation(&mut self) {
        self.thread = ConversationThread::new();
        self.last_result = None;
        self.pending_chart = None;
        self.pending_table = None;
    }
}

/// In-memory store mapping session ids to their state. Each entry gets
/// its own async mutex so independent sessions never block each other.
#[derive(Default)]
pub struct SessionStore {
    inner: std::sync::Mutex<HashMap<String, Arc<Mutex<SessionContext>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Mutex<SessionContext>>> {
        self.inner.lock().ok()?.get(id).cloned()
    }

    /// Insert a fresh session under the given id, replacing any previous
    /// state wholesale.
    pub fn replace(&self, id: &str, session: SessionContext) -> Arc<Mutex<SessionContext>> {
        let entry = Arc::new(Mutex::new(session));
        if let Ok(mut map) = self.inner.lock() {
            map.insert(id.to_string(), Arc::clone(&entry));
        }
        entry
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Mutex<SessionContext>>> {
        self.inner.lock().ok()?.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_swaps_state_wholesale() {
        let store = SessionStore::new();
        let mut first = SessionContext::new(AgentMode::Code);
        first.known_tables.push("orders".into());
        store.replace("sid", first);

        store.replace("sid", SessionContext::new(AgentMode::Sql));
        let entry = store.get("sid").unwrap();
        let session = entry.try_lock().unwrap();
        assert_eq!(session.mode, AgentMode::Sql);
        assert!(session.known_tables.is_empty());
    }

    #[test]
    fn reset_keeps_data_source() {
        let mut session = SessionContext::new(AgentMode::Code);
        session.table = Some(crate::table::DataTable::new(
            "t",
            vec!["a".into()],
            vec![],
        ));
        session.thread.push_user("hello");
        session.last_result = Some(TabularResult {
            headers: vec!["a".into()],
            rows: vec![],
        });

        session.reset_conversation();
        assert!(session.thread.is_empty());
        assert!(session.last_result.is_none());
        assert!(session.table.is_some());
    }
}
