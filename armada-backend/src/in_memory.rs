//! In-memory implementation of the execution backend.
//!
//! Results, blobs and the submission queue live in one map guarded by a lock.
//! Useful for testing and as a reference implementation of the dispatch rules:
//! an invocation is handed to a worker only once every result it depends on has
//! completed, following delegation.

use crate::backend::{BackendError, ExecutionBackend, Submission, WorkerBackend};
use armada_core::{HandleState, Invocation, ResultId};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// In-memory backend that schedules invocations and stores blobs in process.
///
/// Clones share the same state, so a client session and a worker can hold the
/// same backend.
///
/// # Example
///
/// ```rust,ignore
/// use armada_backend::{InMemoryBackend, WorkerBackend};
///
/// let backend = InMemoryBackend::new();
/// let id = backend.submit(invocation).await?;
/// let ready = backend.claim_ready("worker-1", 1).await?;
/// backend.complete(&ready[0].result_id, output).await?;
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<RwLock<State>>,
}

#[derive(Default)]
struct State {
    results: HashMap<ResultId, ResultRecord>,
    queue: VecDeque<Submission>,
    running: HashMap<ResultId, String>,
    peak_running: usize,
    fetches: HashMap<ResultId, usize>,
    uploads: usize,
    submissions: usize,
}

struct ResultRecord {
    state: HandleState,
    value: Option<Bytes>,
}

enum Readiness {
    Ready,
    Waiting,
    Failed(String),
}

impl InMemoryBackend {
    /// Create a new in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, BackendError> {
        self.state
            .read()
            .map_err(|e| BackendError::Backend(format!("Lock error: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, BackendError> {
        self.state
            .write()
            .map_err(|e| BackendError::Backend(format!("Lock error: {}", e)))
    }

    /// Number of `fetch_blob` calls made for `id`.
    pub fn fetch_count(&self, id: &ResultId) -> usize {
        self.read()
            .map(|state| state.fetches.get(id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of blobs uploaded so far.
    pub fn upload_count(&self) -> usize {
        self.read().map(|state| state.uploads).unwrap_or(0)
    }

    /// Number of invocations submitted so far.
    pub fn submission_count(&self) -> usize {
        self.read().map(|state| state.submissions).unwrap_or(0)
    }

    /// Highest number of invocations that were claimed and not yet reported at once.
    pub fn peak_running(&self) -> usize {
        self.read().map(|state| state.peak_running).unwrap_or(0)
    }
}

impl State {
    fn record_mut(&mut self, id: &ResultId) -> Result<&mut ResultRecord, BackendError> {
        self.results
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound(id.clone()))
    }

    fn transition(
        &mut self,
        id: &ResultId,
        next: HandleState,
        value: Option<Bytes>,
    ) -> Result<(), BackendError> {
        let record = self.record_mut(id)?;
        if !record.state.can_transition_to(&next) {
            return Err(BackendError::InvalidTransition {
                id: id.clone(),
                from: record.state.clone(),
                to: next,
            });
        }
        record.state = next;
        record.value = value;
        self.running.remove(id);
        Ok(())
    }

    /// Follow delegation from `id` until a terminal or pending record.
    fn readiness(&self, id: &ResultId) -> Readiness {
        let mut visited = HashSet::new();
        let mut current = id.clone();
        loop {
            if !visited.insert(current.clone()) {
                return Readiness::Failed(format!(
                    "dependency '{id}' is part of a delegation cycle"
                ));
            }
            let Some(record) = self.results.get(&current) else {
                return Readiness::Failed(format!("dependency '{current}' does not exist"));
            };
            match &record.state {
                HandleState::Pending => return Readiness::Waiting,
                HandleState::Completed => return Readiness::Ready,
                HandleState::Failed(error) => {
                    return Readiness::Failed(format!("dependency '{id}' failed: {error}"));
                }
                HandleState::Delegated(child) => current = child.clone(),
            }
        }
    }

    fn invocation_readiness(&self, invocation: &Invocation) -> Readiness {
        let mut waiting = false;
        for dependency in invocation.dependencies() {
            match self.readiness(dependency) {
                Readiness::Ready => {}
                Readiness::Waiting => waiting = true,
                failed @ Readiness::Failed(_) => return failed,
            }
        }
        if waiting {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }
}

#[async_trait]
impl ExecutionBackend for InMemoryBackend {
    async fn submit(&self, invocation: Invocation) -> Result<ResultId, BackendError> {
        let mut state = self.write()?;
        if let Some(missing) = invocation
            .dependencies()
            .find(|dependency| !state.results.contains_key(*dependency))
        {
            return Err(BackendError::NotFound(missing.clone()));
        }

        let result_id = ResultId::new(format!("result-{}", Uuid::new_v4()));
        state.results.insert(
            result_id.clone(),
            ResultRecord {
                state: HandleState::Pending,
                value: None,
            },
        );
        state.submissions += 1;
        tracing::debug!(
            result_id = %result_id,
            task = %invocation.task_name,
            delegate = invocation.delegate,
            "Invocation submitted"
        );
        state.queue.push_back(Submission {
            result_id: result_id.clone(),
            invocation,
            submitted_at: Utc::now(),
        });
        Ok(result_id)
    }

    async fn get_status(&self, id: &ResultId) -> Result<HandleState, BackendError> {
        let state = self.read()?;
        state
            .results
            .get(id)
            .map(|record| record.state.clone())
            .ok_or_else(|| BackendError::NotFound(id.clone()))
    }

    async fn fetch_blob(&self, id: &ResultId) -> Result<Bytes, BackendError> {
        let mut state = self.write()?;
        *state.fetches.entry(id.clone()).or_default() += 1;
        let record = state
            .results
            .get(id)
            .ok_or_else(|| BackendError::NotFound(id.clone()))?;
        record
            .value
            .clone()
            .ok_or_else(|| BackendError::NotReady(id.clone()))
    }

    async fn upload_blob(&self, data: Bytes) -> Result<ResultId, BackendError> {
        let mut state = self.write()?;
        let id = ResultId::new(format!("blob-{}", Uuid::new_v4()));
        state.results.insert(
            id.clone(),
            ResultRecord {
                state: HandleState::Completed,
                value: Some(data),
            },
        );
        state.uploads += 1;
        Ok(id)
    }

    async fn exists(&self, id: &ResultId) -> Result<bool, BackendError> {
        let state = self.read()?;
        Ok(state
            .results
            .get(id)
            .is_some_and(|record| record.value.is_some()))
    }
}

#[async_trait]
impl WorkerBackend for InMemoryBackend {
    async fn claim_ready(
        &self,
        worker_id: &str,
        limit: usize,
    ) -> Result<Vec<Submission>, BackendError> {
        let mut state = self.write()?;
        let mut claimed = Vec::new();
        let mut remaining = VecDeque::with_capacity(state.queue.len());

        while let Some(submission) = state.queue.pop_front() {
            if claimed.len() >= limit {
                remaining.push_back(submission);
                continue;
            }
            match state.invocation_readiness(&submission.invocation) {
                Readiness::Ready => claimed.push(submission),
                Readiness::Waiting => remaining.push_back(submission),
                Readiness::Failed(error) => {
                    tracing::debug!(
                        result_id = %submission.result_id,
                        error = %error,
                        "Failing invocation with a failed dependency"
                    );
                    state.transition(&submission.result_id, HandleState::Failed(error), None)?;
                }
            }
        }
        state.queue = remaining;

        for submission in &claimed {
            state
                .running
                .insert(submission.result_id.clone(), worker_id.to_string());
        }
        state.peak_running = state.peak_running.max(state.running.len());
        Ok(claimed)
    }

    async fn complete(&self, id: &ResultId, value: Bytes) -> Result<(), BackendError> {
        self.write()?
            .transition(id, HandleState::Completed, Some(value))
    }

    async fn delegate(&self, id: &ResultId, child: &ResultId) -> Result<(), BackendError> {
        let mut state = self.write()?;
        if !state.results.contains_key(child) {
            return Err(BackendError::NotFound(child.clone()));
        }
        state.transition(id, HandleState::Delegated(child.clone()), None)
    }

    async fn fail(&self, id: &ResultId, error: String) -> Result<(), BackendError> {
        self.write()?
            .transition(id, HandleState::Failed(error), None)
    }
}
