//! The storage seam the resilient store wraps.
//!
//! One logical table, `orchestration_state`: every row is a full state
//! snapshot; checkpoint rows additionally carry a name. `MemoryBackend`
//! is the reference implementation and the test double; it can be taken
//! offline to exercise the degradation paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use sw_domain::error::{Error, Result};

use crate::state::{self, ConversationState};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
struct StateRow {
    id: String,
    state_data: String,
    is_checkpoint: bool,
    checkpoint_name: Option<String>,
    created_at: DateTime<Utc>,
}

/// Checkpoint metadata returned by `list_checkpoints`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointInfo {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Raw state storage operations the core consumes.
#[async_trait::async_trait]
pub trait StateBackend: Send + Sync {
    /// Persist a snapshot; returns the new state id.
    async fn save_state(&self, session_id: &str, state: &ConversationState) -> Result<String>;

    /// Load a specific snapshot, or the latest when `state_id` is `None`.
    async fn load_state(
        &self,
        session_id: &str,
        state_id: Option<&str>,
    ) -> Result<Option<ConversationState>>;

    /// Persist a named checkpoint snapshot; returns the checkpoint id.
    /// Implementations cap checkpoints per session, evicting the oldest.
    async fn save_checkpoint(
        &self,
        session_id: &str,
        name: &str,
        state: &ConversationState,
    ) -> Result<String>;

    /// Load the state at a checkpoint (the latest one when `name` is
    /// `None`). Does not modify stored rows.
    async fn rollback(
        &self,
        session_id: &str,
        name: Option<&str>,
    ) -> Result<Option<ConversationState>>;

    async fn list_checkpoints(&self, session_id: &str) -> Result<Vec<CheckpointInfo>>;

    /// Evict whole sessions whose newest row is older than `cutoff`.
    /// Returns the number of sessions removed.
    async fn clean_expired(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    async fn ping(&self) -> bool;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reference backend: rows per session, append-ordered.
///
/// `set_online(false)` makes every operation fail with a `db_error` and
/// `ping` report false, modelling a storage outage.
pub struct MemoryBackend {
    rows: Mutex<HashMap<String, Vec<StateRow>>>,
    online: AtomicBool,
    max_checkpoints: usize,
}

impl MemoryBackend {
    pub fn new(max_checkpoints: usize) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            max_checkpoints: max_checkpoints.max(1),
        }
    }

    /// Simulate a storage outage (or recovery).
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Db("storage backend offline".into()))
        }
    }

    fn insert_row(
        &self,
        session_id: &str,
        state: &ConversationState,
        checkpoint_name: Option<&str>,
    ) -> Result<String> {
        let blob = state::serialize_state(state)
            .map_err(|e| Error::StatePersistence(format!("serializing state: {e}")))?;

        let row = StateRow {
            id: Uuid::new_v4().to_string(),
            state_data: blob,
            is_checkpoint: checkpoint_name.is_some(),
            checkpoint_name: checkpoint_name.map(String::from),
            created_at: Utc::now(),
        };
        let id = row.id.clone();

        let mut rows = self.rows.lock();
        let session_rows = rows.entry(session_id.to_owned()).or_default();
        session_rows.push(row);

        if checkpoint_name.is_some() {
            // Cap named checkpoints, oldest (by created_at order) first.
            let checkpoint_count = session_rows.iter().filter(|r| r.is_checkpoint).count();
            if checkpoint_count > self.max_checkpoints {
                let excess = checkpoint_count - self.max_checkpoints;
                let mut removed = 0;
                session_rows.retain(|r| {
                    if r.is_checkpoint && removed < excess {
                        removed += 1;
                        false
                    } else {
                        true
                    }
                });
            }
        }

        Ok(id)
    }
}

#[async_trait::async_trait]
impl StateBackend for MemoryBackend {
    async fn save_state(&self, session_id: &str, state: &ConversationState) -> Result<String> {
        self.check_online()?;
        self.insert_row(session_id, state, None)
    }

    async fn load_state(
        &self,
        session_id: &str,
        state_id: Option<&str>,
    ) -> Result<Option<ConversationState>> {
        self.check_online()?;
        let rows = self.rows.lock();
        let Some(session_rows) = rows.get(session_id) else {
            return Ok(None);
        };
        let row = match state_id {
            Some(id) => session_rows.iter().find(|r| r.id == id),
            None => session_rows.last(),
        };
        row.map(|r| {
            state::deserialize_state(&r.state_data)
                .map_err(|e| Error::StatePersistence(format!("deserializing state: {e}")))
        })
        .transpose()
    }

    async fn save_checkpoint(
        &self,
        session_id: &str,
        name: &str,
        state: &ConversationState,
    ) -> Result<String> {
        self.check_online()?;
        self.insert_row(session_id, state, Some(name))
    }

    async fn rollback(
        &self,
        session_id: &str,
        name: Option<&str>,
    ) -> Result<Option<ConversationState>> {
        self.check_online()?;
        let rows = self.rows.lock();
        let Some(session_rows) = rows.get(session_id) else {
            return Ok(None);
        };
        let row = session_rows.iter().rev().find(|r| {
            r.is_checkpoint
                && match name {
                    Some(n) => r.checkpoint_name.as_deref() == Some(n),
                    None => true,
                }
        });
        row.map(|r| {
            state::deserialize_state(&r.state_data)
                .map_err(|e| Error::StatePersistence(format!("deserializing checkpoint: {e}")))
        })
        .transpose()
    }

    async fn list_checkpoints(&self, session_id: &str) -> Result<Vec<CheckpointInfo>> {
        self.check_online()?;
        let rows = self.rows.lock();
        Ok(rows
            .get(session_id)
            .map(|session_rows| {
                session_rows
                    .iter()
                    .filter(|r| r.is_checkpoint)
                    .map(|r| CheckpointInfo {
                        id: r.id.clone(),
                        name: r.checkpoint_name.clone().unwrap_or_default(),
                        created_at: r.created_at,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn clean_expired(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.check_online()?;
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|_, session_rows| {
            session_rows
                .last()
                .map(|r| r.created_at >= cutoff)
                .unwrap_or(false)
        });
        Ok(before - rows.len())
    }

    async fn ping(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_domain::message::Message;

    fn state_with(session_id: &str, note: &str) -> ConversationState {
        let mut state = ConversationState::new(session_id);
        state.push_message(Message::user(note));
        state
    }

    #[tokio::test]
    async fn read_after_write_returns_written_state() {
        let backend = MemoryBackend::new(5);
        let state = state_with("s1", "hello");
        backend.save_state("s1", &state).await.unwrap();

        let loaded = backend.load_state("s1", None).await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn load_by_state_id() {
        let backend = MemoryBackend::new(5);
        let first = state_with("s1", "one");
        let id1 = backend.save_state("s1", &first).await.unwrap();
        backend
            .save_state("s1", &state_with("s1", "two"))
            .await
            .unwrap();

        let loaded = backend.load_state("s1", Some(&id1)).await.unwrap().unwrap();
        assert_eq!(loaded, first);
    }

    #[tokio::test]
    async fn rollback_returns_checkpointed_state() {
        let backend = MemoryBackend::new(5);
        let at_checkpoint = state_with("s1", "checkpointed");
        backend
            .save_checkpoint("s1", "interaction_1", &at_checkpoint)
            .await
            .unwrap();
        backend
            .save_state("s1", &state_with("s1", "later"))
            .await
            .unwrap();

        let rolled = backend
            .rollback("s1", Some("interaction_1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rolled, at_checkpoint);

        // Unnamed rollback takes the most recent checkpoint.
        let rolled = backend.rollback("s1", None).await.unwrap().unwrap();
        assert_eq!(rolled, at_checkpoint);
    }

    #[tokio::test]
    async fn checkpoints_are_capped_oldest_first() {
        let backend = MemoryBackend::new(2);
        for i in 0..4 {
            backend
                .save_checkpoint("s1", &format!("cp_{i}"), &state_with("s1", "x"))
                .await
                .unwrap();
        }
        let checkpoints = backend.list_checkpoints("s1").await.unwrap();
        let names: Vec<&str> = checkpoints.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["cp_2", "cp_3"]);
    }

    #[tokio::test]
    async fn clean_expired_evicts_whole_sessions() {
        let backend = MemoryBackend::new(5);
        backend
            .save_state("old", &state_with("old", "x"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let cutoff = Utc::now();
        backend
            .save_state("fresh", &state_with("fresh", "y"))
            .await
            .unwrap();

        let removed = backend.clean_expired(cutoff).await.unwrap();
        assert_eq!(removed, 1);
        assert!(backend.load_state("old", None).await.unwrap().is_none());
        assert!(backend.load_state("fresh", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn offline_backend_fails_with_db_error() {
        let backend = MemoryBackend::new(5);
        backend.set_online(false);
        assert!(!backend.ping().await);

        let err = backend
            .save_state("s1", &state_with("s1", "x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), sw_domain::ErrorKind::DbError);

        backend.set_online(true);
        assert!(backend.ping().await);
        assert!(backend.save_state("s1", &state_with("s1", "x")).await.is_ok());
    }

    #[tokio::test]
    async fn missing_session_loads_none() {
        let backend = MemoryBackend::new(5);
        assert!(backend.load_state("ghost", None).await.unwrap().is_none());
        assert!(backend.rollback("ghost", None).await.unwrap().is_none());
        assert!(backend.list_checkpoints("ghost").await.unwrap().is_empty());
    }
}
