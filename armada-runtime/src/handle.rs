//! Handles on future results and the delegation-following resolver.

use crate::session::Session;
use armada_backend::ExecutionBackend;
use armada_core::codec::{Codec, sealed};
use armada_core::{ArmadaError, HandleState, Result, ResultId, SessionToken};
use bytes::Bytes;
use futures::future::try_join_all;
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Terminal outcome of a result after following delegation.
#[derive(Debug, Clone)]
pub(crate) enum Resolution {
    Completed { terminal: ResultId, value: Bytes },
    Failed { terminal: ResultId, error: String },
}

impl Resolution {
    fn terminal(&self) -> &ResultId {
        match self {
            Resolution::Completed { terminal, .. } | Resolution::Failed { terminal, .. } => {
                terminal
            }
        }
    }
}

/// Follow `id` through delegation until a terminal state is reached.
///
/// Pending results are polled every `poll_interval`. Revisiting any result on
/// the chain is reported as [`ArmadaError::Cycle`].
pub(crate) async fn follow_chain(
    backend: &dyn ExecutionBackend,
    id: &ResultId,
    poll_interval: Duration,
) -> Result<(ResultId, HandleState)> {
    let mut visited = HashSet::from([id.clone()]);
    let mut current = id.clone();
    loop {
        match backend.get_status(&current).await? {
            HandleState::Pending => tokio::time::sleep(poll_interval).await,
            HandleState::Delegated(child) => {
                if !visited.insert(child.clone()) {
                    return Err(ArmadaError::Cycle {
                        start: id.clone(),
                        revisited: child,
                    });
                }
                tracing::trace!(from = %current, to = %child, "Following delegation");
                current = child;
            }
            terminal => return Ok((current, terminal)),
        }
    }
}

/// Resolve `id` to its terminal value or error.
pub(crate) async fn resolve(
    backend: &dyn ExecutionBackend,
    id: &ResultId,
    poll_interval: Duration,
) -> Result<Resolution> {
    match follow_chain(backend, id, poll_interval).await? {
        (terminal, HandleState::Failed(error)) => Ok(Resolution::Failed { terminal, error }),
        (terminal, _) => {
            let value = backend
                .fetch_blob(&terminal)
                .await
                .map_err(|e| ArmadaError::retrieval(&terminal, e))?;
            Ok(Resolution::Completed { terminal, value })
        }
    }
}

/// A reference to the future result of an invocation (or to an uploaded object).
///
/// [`wait`](Self::wait) resolves the handle once; afterwards
/// [`get`](Self::get) decodes the cached value without touching the backend.
pub struct ResultHandle<C> {
    id: ResultId,
    session: Session<C>,
    resolution: OnceCell<Resolution>,
}

impl<C: Codec> ResultHandle<C> {
    pub(crate) fn new(id: ResultId, session: Session<C>) -> Self {
        Self {
            id,
            session,
            resolution: OnceCell::new(),
        }
    }

    /// A handle whose value is already known locally.
    pub(crate) fn resolved(id: ResultId, session: Session<C>, value: Bytes) -> Self {
        let handle = Self::new(id.clone(), session);
        let _ = handle.resolution.set(Resolution::Completed {
            terminal: id,
            value,
        });
        handle
    }

    pub fn result_id(&self) -> &ResultId {
        &self.id
    }

    pub fn session_token(&self) -> &SessionToken {
        self.session.token()
    }

    /// Whether [`wait`](Self::wait) has completed.
    pub fn is_resolved(&self) -> bool {
        self.resolution.get().is_some()
    }

    /// The result that finally produced the value, once resolved.
    pub fn terminal_id(&self) -> Option<&ResultId> {
        self.resolution.get().map(Resolution::terminal)
    }

    /// The backend's current state for this result, without following delegation.
    pub async fn state(&self) -> Result<HandleState> {
        Ok(self.session.backend().get_status(&self.id).await?)
    }

    /// Block until the result is terminal, following delegation.
    ///
    /// Uses the session's wait timeout if one is configured. A failed task is a
    /// successful wait; its error surfaces from [`get`](Self::get).
    pub async fn wait(&self) -> Result<&Self> {
        match self.session.config().wait_timeout() {
            Some(timeout) => self.wait_timeout(timeout).await,
            None => self.wait_unbounded().await,
        }
    }

    /// [`wait`](Self::wait) with an explicit bound.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<&Self> {
        tokio::time::timeout(timeout, self.wait_unbounded())
            .await
            .map_err(|_| ArmadaError::Timeout(timeout))?
    }

    async fn wait_unbounded(&self) -> Result<&Self> {
        if self.is_resolved() {
            return Ok(self);
        }
        let backend = self.session.backend();
        let resolution =
            resolve(backend.as_ref(), &self.id, self.session.config().poll_interval()).await?;
        if let Resolution::Failed { terminal, error } = &resolution {
            tracing::debug!(result_id = %self.id, terminal = %terminal, error = %error, "Result failed remotely");
        }
        let _ = self.resolution.set(resolution);
        Ok(self)
    }

    /// Decode the resolved value.
    ///
    /// # Errors
    ///
    /// - [`ArmadaError::NotReady`] before a successful [`wait`](Self::wait).
    /// - [`ArmadaError::Remote`] with the task's error text if it failed.
    pub fn get<T>(&self) -> Result<T>
    where
        C: sealed::DecodeValue<T>,
    {
        match self.resolution.get() {
            None => Err(ArmadaError::NotReady(self.id.clone())),
            Some(Resolution::Failed { error, .. }) => Err(ArmadaError::Remote(error.clone())),
            Some(Resolution::Completed { value, .. }) => self
                .session
                .codec()
                .decode(value.clone())
                .map_err(ArmadaError::Codec),
        }
    }

    /// The raw encoded value, once resolved and completed.
    pub fn get_bytes(&self) -> Result<Bytes> {
        match self.resolution.get() {
            None => Err(ArmadaError::NotReady(self.id.clone())),
            Some(Resolution::Failed { error, .. }) => Err(ArmadaError::Remote(error.clone())),
            Some(Resolution::Completed { value, .. }) => Ok(value.clone()),
        }
    }
}

impl<C> Clone for ResultHandle<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            session: self.session.clone(),
            resolution: self.resolution.clone(),
        }
    }
}

impl<C> fmt::Debug for ResultHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultHandle")
            .field("id", &self.id)
            .field("resolved", &self.resolution.get().is_some())
            .finish()
    }
}

/// An ordered group of handles, usually produced by `map_invoke`.
pub struct ResultHandleCollection<C> {
    handles: Vec<ResultHandle<C>>,
}

impl<C: Codec> ResultHandleCollection<C> {
    pub fn new(handles: Vec<ResultHandle<C>>) -> Self {
        Self { handles }
    }

    /// Wait for every member; the first error aborts the wait.
    pub async fn wait(&self) -> Result<&Self> {
        try_join_all(self.handles.iter().map(|h| h.wait())).await?;
        Ok(self)
    }

    pub async fn wait_timeout(&self, timeout: Duration) -> Result<&Self> {
        tokio::time::timeout(timeout, try_join_all(self.handles.iter().map(|h| h.wait())))
            .await
            .map_err(|_| ArmadaError::Timeout(timeout))??;
        Ok(self)
    }

    /// Decoded values in order. Fails on the first unresolved or failed member.
    pub fn get<T>(&self) -> Result<Vec<T>>
    where
        C: sealed::DecodeValue<T>,
    {
        self.handles.iter().map(|h| h.get()).collect()
    }

    pub fn ids(&self) -> Vec<ResultId> {
        self.handles.iter().map(|h| h.result_id().clone()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResultHandle<C>> {
        self.handles.iter()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<C> Clone for ResultHandleCollection<C> {
    fn clone(&self) -> Self {
        Self {
            handles: self.handles.clone(),
        }
    }
}

impl<C> fmt::Debug for ResultHandleCollection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.handles).finish()
    }
}

impl<C> FromIterator<ResultHandle<C>> for ResultHandleCollection<C> {
    fn from_iter<I: IntoIterator<Item = ResultHandle<C>>>(iter: I) -> Self {
        Self {
            handles: iter.into_iter().collect(),
        }
    }
}

impl<C> IntoIterator for ResultHandleCollection<C> {
    type Item = ResultHandle<C>;
    type IntoIter = std::vec::IntoIter<ResultHandle<C>>;

    fn into_iter(self) -> Self::IntoIter {
        self.handles.into_iter()
    }
}

impl<'a, C> IntoIterator for &'a ResultHandleCollection<C> {
    type Item = &'a ResultHandle<C>;
    type IntoIter = std::slice::Iter<'a, ResultHandle<C>>;

    fn into_iter(self) -> Self::IntoIter {
        self.handles.iter()
    }
}
