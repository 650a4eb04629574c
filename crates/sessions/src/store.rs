//! The resilient session store.
//!
//! Wraps a [`StateBackend`] with the retry/backoff discipline and the
//! degradation contracts: persistence failures mark the state dirty
//! instead of raising, recovery failures produce a fresh state, and
//! checkpoint failures queue the name for a later drain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

use sw_domain::error::Result;
use sw_domain::retry::{with_retry, RetryPolicy};
use sw_domain::trace::TraceEvent;

use crate::backend::{CheckpointInfo, StateBackend};
use crate::state::{CheckpointRef, ConversationState};

pub struct SessionStore {
    backend: Arc<dyn StateBackend>,
    policy: RetryPolicy,
    max_checkpoints: usize,
    /// States whose in-memory copy advanced past the persisted copy. A
    /// dirty copy is authoritative for recovery until a persist succeeds.
    dirty: Mutex<HashMap<String, ConversationState>>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn StateBackend>, max_checkpoints: usize) -> Self {
        Self {
            backend,
            policy: RetryPolicy::default(),
            max_checkpoints: max_checkpoints.max(1),
            dirty: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the retry policy (tests shrink the delays).
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    // ── resilient persistence ──────────────────────────────────────

    /// Persist a state, draining any queued checkpoints first.
    ///
    /// Never raises: on terminal failure the returned state carries
    /// `persistence_flags.dirty = true` and the caller continues with the
    /// in-memory copy.
    pub async fn resilient_persist(
        &self,
        mut state: ConversationState,
        deadline: Option<Instant>,
    ) -> ConversationState {
        self.drain_pending(&mut state, deadline).await;

        state.persistence_flags.dirty = false;
        state.updated_at = Utc::now();

        let backend = self.backend.clone();
        let session_id = state.session_id.clone();
        let snapshot = state.clone();
        let saved = with_retry("save_state", &self.policy, deadline, move || {
            let backend = backend.clone();
            let session_id = session_id.clone();
            let snapshot = snapshot.clone();
            async move { backend.save_state(&session_id, &snapshot).await }
        })
        .await;

        match saved {
            Ok(state_id) => {
                self.dirty.lock().remove(&state.session_id);
                TraceEvent::StatePersisted {
                    session_id: state.session_id.clone(),
                    state_id,
                    dirty: false,
                }
                .emit();
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %state.session_id,
                    error = %e,
                    "persistence failed; carrying dirty state forward"
                );
                state.persistence_flags.dirty = true;
                self.dirty
                    .lock()
                    .insert(state.session_id.clone(), state.clone());
            }
        }
        state
    }

    /// Load the latest state for a session. A missing row means the
    /// session is new; a terminal storage failure also yields a fresh
    /// state rather than an error.
    pub async fn resilient_recover(
        &self,
        session_id: &str,
        deadline: Option<Instant>,
    ) -> ConversationState {
        // A dirty in-memory copy is newer than anything persisted.
        if let Some(state) = self.dirty.lock().get(session_id).cloned() {
            TraceEvent::StateRecovered {
                session_id: session_id.to_owned(),
                fresh: false,
            }
            .emit();
            return state;
        }

        let backend = self.backend.clone();
        let sid = session_id.to_owned();
        let loaded = with_retry("load_state", &self.policy, deadline, move || {
            let backend = backend.clone();
            let sid = sid.clone();
            async move { backend.load_state(&sid, None).await }
        })
        .await;

        let (state, fresh) = match loaded {
            Ok(Some(state)) => (state, false),
            Ok(None) => (ConversationState::new(session_id), true),
            Err(e) => {
                tracing::warn!(
                    session_id,
                    error = %e,
                    "state recovery failed; starting a fresh conversation"
                );
                (ConversationState::new(session_id), true)
            }
        };

        TraceEvent::StateRecovered {
            session_id: session_id.to_owned(),
            fresh,
        }
        .emit();
        state
    }

    /// Create a named checkpoint. On terminal failure the name joins the
    /// pending queue, drained FIFO by the next successful persistence.
    pub async fn resilient_checkpoint(
        &self,
        name: &str,
        state: &mut ConversationState,
        deadline: Option<Instant>,
    ) {
        let backend = self.backend.clone();
        let session_id = state.session_id.clone();
        let snapshot = state.clone();
        let checkpoint_name = name.to_owned();
        let saved = with_retry("save_checkpoint", &self.policy, deadline, move || {
            let backend = backend.clone();
            let session_id = session_id.clone();
            let snapshot = snapshot.clone();
            let checkpoint_name = checkpoint_name.clone();
            async move {
                backend
                    .save_checkpoint(&session_id, &checkpoint_name, &snapshot)
                    .await
            }
        })
        .await;

        match saved {
            Ok(snapshot_id) => {
                self.record_checkpoint(state, name, snapshot_id);
                TraceEvent::CheckpointCreated {
                    session_id: state.session_id.clone(),
                    name: name.to_owned(),
                }
                .emit();
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %state.session_id,
                    checkpoint = name,
                    error = %e,
                    "checkpoint failed; queueing for a later drain"
                );
                state
                    .persistence_flags
                    .pending_checkpoints
                    .push(name.to_owned());
            }
        }
    }

    /// Attempt every queued checkpoint in FIFO order, stopping at the
    /// first failure so order is preserved. Drain writes are single
    /// attempts; the retry budget belongs to the save that follows.
    async fn drain_pending(&self, state: &mut ConversationState, _deadline: Option<Instant>) {
        if state.persistence_flags.pending_checkpoints.is_empty() {
            return;
        }

        let pending = std::mem::take(&mut state.persistence_flags.pending_checkpoints);
        let mut drained = 0usize;
        for (idx, name) in pending.iter().enumerate() {
            let result = self
                .backend
                .save_checkpoint(&state.session_id, name, state)
                .await;
            match result {
                Ok(snapshot_id) => {
                    self.record_checkpoint(state, name, snapshot_id);
                    drained += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %state.session_id,
                        checkpoint = %name,
                        error = %e,
                        "checkpoint drain stopped"
                    );
                    state.persistence_flags.pending_checkpoints = pending[idx..].to_vec();
                    break;
                }
            }
        }

        if drained > 0 {
            TraceEvent::CheckpointsDrained {
                session_id: state.session_id.clone(),
                count: drained,
            }
            .emit();
        }
    }

    /// Mirror the backend's checkpoint cap in the state's reference list.
    fn record_checkpoint(&self, state: &mut ConversationState, name: &str, snapshot_id: String) {
        state.checkpoints.push(CheckpointRef {
            name: name.to_owned(),
            snapshot_id,
        });
        while state.checkpoints.len() > self.max_checkpoints {
            state.checkpoints.remove(0);
        }
    }

    // ── passthrough operations ─────────────────────────────────────

    pub async fn rollback(
        &self,
        session_id: &str,
        name: Option<&str>,
    ) -> Result<Option<ConversationState>> {
        self.backend.rollback(session_id, name).await
    }

    pub async fn list_checkpoints(&self, session_id: &str) -> Result<Vec<CheckpointInfo>> {
        self.backend.list_checkpoints(session_id).await
    }

    /// Evict sessions idle for longer than `expiration_days`.
    pub async fn clean_expired(&self, expiration_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(expiration_days as i64);
        let removed = self.backend.clean_expired(cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, "expired sessions evicted");
        }
        Ok(removed)
    }

    pub async fn ping(&self) -> bool {
        self.backend.ping().await
    }
}
