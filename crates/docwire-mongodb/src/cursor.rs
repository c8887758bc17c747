//! Lazily fetched, batch-oriented result cursor
//!
//! A [`Cursor`] starts from the first batch of an already-issued command and
//! fetches follow-up batches strictly on demand from a [`BatchTransport`].
//!
//! ```rust,ignore
//! let mut cursor = MongoTransport::new(client).find::<Document>(ns, doc! {}, CursorOptions::default()).await?;
//! while cursor.advance().await? {
//!     for doc in cursor.take_current() {
//!         handle(doc);
//!     }
//! }
//! cursor.dispose().await;
//! ```
//!
//! `advance` is the only operation that touches the network. Dropping a cursor
//! whose server-side cursor is still open schedules a bounded kill on the
//! current tokio runtime; `dispose` does the same inline.

use crate::batch::{CursorBatch, CursorHandle, Namespace};
use crate::config::CursorOptions;
use crate::transport::BatchTransport;
use bson::Document;
use docwire_common::{DocwireError, Result};
use futures::stream::{self, Stream};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Initial batch loaded, nothing consumed yet
    Fresh,
    /// Consumption has started or a follow-up batch was installed
    Draining,
    /// No more items will be produced
    Exhausted,
    /// Terminal; resources released
    Disposed,
}

pub struct Cursor<T: Send + 'static> {
    transport: Arc<dyn BatchTransport<T>>,
    handle: CursorHandle,
    options: CursorOptions,
    batch: std::vec::IntoIter<T>,
    state: CursorState,
    /// Documents received so far, after limit truncation
    received: u64,
    post_batch_resume_token: Option<Document>,
    was_first_batch_empty: bool,
}

impl<T: Send + 'static> Cursor<T> {
    /// Bind a cursor to the first batch of a command result
    pub fn new(
        transport: Arc<dyn BatchTransport<T>>,
        namespace: Namespace,
        first_batch: CursorBatch<T>,
        options: CursorOptions,
    ) -> Self {
        let was_first_batch_empty = first_batch.documents.is_empty();
        let mut cursor = Self {
            transport,
            handle: CursorHandle::new(first_batch.cursor_id, namespace),
            options,
            batch: Vec::new().into_iter(),
            state: CursorState::Fresh,
            received: 0,
            post_batch_resume_token: None,
            was_first_batch_empty,
        };
        cursor.install(first_batch);
        cursor
    }

    /// Server cursor id; 0 once the server has nothing left or the cursor was disposed
    pub fn id(&self) -> i64 {
        self.handle.id()
    }

    pub fn namespace(&self) -> &Namespace {
        self.handle.namespace()
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, CursorState::Exhausted | CursorState::Disposed)
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Resume token reported with the most recent batch
    pub fn post_batch_resume_token(&self) -> Option<&Document> {
        self.post_batch_resume_token.as_ref()
    }

    pub fn was_first_batch_empty(&self) -> bool {
        self.was_first_batch_empty
    }

    /// Unread remainder of the current batch. Never touches the network.
    pub fn current(&self) -> &[T] {
        self.batch.as_slice()
    }

    /// Consume and return everything left in the current batch
    pub fn take_current(&mut self) -> Vec<T> {
        self.mark_draining();
        std::mem::replace(&mut self.batch, Vec::new().into_iter()).collect()
    }

    /// Make sure `current()` has something to read, fetching if necessary.
    ///
    /// Returns false once the result set is finished or the cursor was disposed.
    pub async fn advance(&mut self) -> Result<bool> {
        self.advance_with(&CancellationToken::new()).await
    }

    /// [`advance`](Self::advance) that gives up when `cancel` fires.
    ///
    /// A cancelled fetch installs nothing, leaves the cursor exhausted and
    /// returns [`DocwireError::Cancelled`]. The server cursor stays registered
    /// so `dispose` can still kill it.
    pub async fn advance_with(&mut self, cancel: &CancellationToken) -> Result<bool> {
        if self.is_exhausted() {
            return Ok(false);
        }
        if !self.batch.as_slice().is_empty() {
            return Ok(true);
        }

        // Empty intermediate batches are not the end: keep fetching until
        // something arrives or the server says it is done.
        loop {
            if !self.can_fetch() {
                self.state = CursorState::Exhausted;
                return Ok(false);
            }
            if cancel.is_cancelled() {
                return Err(self.cancelled());
            }

            let batch_size = self.options.next_batch_size(self.received);
            tracing::debug!(
                cursor_id = self.handle.id(),
                namespace = %self.handle.namespace(),
                batch_size = ?batch_size,
                "Fetching next batch"
            );

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.transport.get_more(&self.handle, batch_size) => Some(result),
            };
            let Some(fetched) = fetched else {
                return Err(self.cancelled());
            };

            match fetched {
                Ok(batch) => {
                    self.install(batch);
                    self.state = CursorState::Draining;
                    if !self.batch.as_slice().is_empty() {
                        return Ok(true);
                    }
                }
                Err(err) => {
                    tracing::debug!(
                        cursor_id = self.handle.id(),
                        namespace = %self.handle.namespace(),
                        error = %err,
                        "Batch fetch failed"
                    );
                    self.state = CursorState::Exhausted;
                    return Err(err);
                }
            }
        }
    }

    /// Next document, fetching more batches as needed
    pub async fn next_document(&mut self) -> Result<Option<T>> {
        loop {
            if let Some(doc) = self.batch.next() {
                self.mark_draining();
                return Ok(Some(doc));
            }
            if !self.advance().await? {
                return Ok(None);
            }
        }
    }

    /// Drain every remaining document, then dispose
    pub async fn to_list(mut self) -> Result<Vec<T>> {
        let mut results = Vec::new();
        let drained = loop {
            match self.advance().await {
                Ok(true) => results.extend(self.take_current()),
                Ok(false) => break Ok(results),
                Err(err) => break Err(err),
            }
        };
        self.dispose().await;
        drained
    }

    /// Adapt into a stream of documents. The cursor is dropped when the stream is.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> + Send {
        stream::try_unfold(self, |mut cursor| async move {
            let next = cursor.next_document().await?;
            Ok::<_, DocwireError>(next.map(|doc| (doc, cursor)))
        })
    }

    /// Release the cursor. Idempotent.
    ///
    /// If the server still holds the cursor a kill is sent, bounded by
    /// `kill_timeout`; its failure is logged and never returned.
    pub async fn dispose(&mut self) {
        if self.state == CursorState::Disposed {
            return;
        }
        self.state = CursorState::Disposed;
        self.batch = Vec::new().into_iter();

        if self.handle.is_open() {
            kill_with_timeout(self.transport.as_ref(), &self.handle, &self.options).await;
            // Cleared after the kill so Drop retries an interrupted dispose
            self.handle.set_id(0);
        }
    }

    fn install(&mut self, batch: CursorBatch<T>) {
        let mut documents = batch.documents;
        if let Some(limit) = self.options.limit.filter(|n| *n > 0) {
            let remaining = u64::from(limit).saturating_sub(self.received);
            if documents.len() as u64 > remaining {
                documents.truncate(remaining as usize);
            }
        }

        self.received += documents.len() as u64;
        self.handle.set_id(batch.cursor_id);
        self.post_batch_resume_token = batch.post_batch_resume_token;
        self.batch = documents.into_iter();
    }

    fn can_fetch(&self) -> bool {
        let under_limit = self
            .options
            .limit
            .filter(|n| *n > 0)
            .map(|limit| self.received < u64::from(limit))
            .unwrap_or(true);
        self.handle.is_open() && under_limit
    }

    fn mark_draining(&mut self) {
        if self.state == CursorState::Fresh {
            self.state = CursorState::Draining;
        }
    }

    fn cancelled(&mut self) -> DocwireError {
        self.state = CursorState::Exhausted;
        DocwireError::Cancelled(format!(
            "advance on cursor {} in {} was cancelled",
            self.handle.id(),
            self.handle.namespace()
        ))
    }
}

async fn kill_with_timeout<T: Send>(
    transport: &dyn BatchTransport<T>,
    handle: &CursorHandle,
    options: &CursorOptions,
) {
    match tokio::time::timeout(options.kill_timeout, transport.kill_cursor(handle)).await {
        Ok(Ok(())) => {
            tracing::debug!(cursor_id = handle.id(), namespace = %handle.namespace(), "Killed cursor");
        }
        Ok(Err(err)) => {
            tracing::debug!(
                cursor_id = handle.id(),
                namespace = %handle.namespace(),
                error = %err,
                "Ignoring kill cursor failure"
            );
        }
        Err(_) => {
            tracing::debug!(
                cursor_id = handle.id(),
                namespace = %handle.namespace(),
                timeout = ?options.kill_timeout,
                "Kill cursor timed out"
            );
        }
    }
}

impl<T: Send + 'static> Drop for Cursor<T> {
    fn drop(&mut self) {
        if !self.handle.is_open() {
            return;
        }

        let transport = self.transport.clone();
        let handle = self.handle.clone();
        let options = self.options.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    kill_with_timeout(transport.as_ref(), &handle, &options).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    cursor_id = handle.id(),
                    namespace = %handle.namespace(),
                    "Cursor dropped outside a tokio runtime; server cursor left to time out"
                );
            }
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("id", &self.handle.id())
            .field("namespace", &self.handle.namespace().to_string())
            .field("state", &self.state)
            .field("buffered", &self.batch.len())
            .field("received", &self.received)
            .finish()
    }
}
