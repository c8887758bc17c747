//! Batch transports: where a cursor gets its follow-up batches from

use crate::batch::{CursorBatch, CursorHandle, Namespace};
use crate::config::CursorOptions;
use crate::cursor::Cursor;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use docwire_common::{DocwireError, Result};
use mongodb::{Client, ClientSession};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Network side of a cursor.
///
/// Implementations own retry and backoff; a cursor calls each method at most
/// once per `advance`/`dispose` and surfaces whatever error comes back.
#[async_trait]
pub trait BatchTransport<T: Send>: Send + Sync {
    /// Fetch the next batch for `handle`. `batch_size` of `None` lets the server choose.
    async fn get_more(&self, handle: &CursorHandle, batch_size: Option<u32>)
        -> Result<CursorBatch<T>>;

    /// Release the server-side cursor
    async fn kill_cursor(&self, handle: &CursorHandle) -> Result<()>;
}

/// Opens cursors through the MongoDB driver.
///
/// Each cursor gets its own explicit session, so a slow `getMore` on one cursor
/// never holds up another cursor's fetches or kills.
#[derive(Debug, Clone)]
pub struct MongoTransport {
    client: Client,
}

impl MongoTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Run a `find` in a fresh session and open a cursor seeded with its first batch
    pub async fn find<T>(
        &self,
        namespace: Namespace,
        filter: Document,
        options: CursorOptions,
    ) -> Result<Cursor<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let session = Arc::new(CursorSession::start(self.client.clone()).await?);
        let command = find_command(&namespace, filter, &options);

        let reply = session.run(namespace.database(), command).await?;
        let decoded = CursorBatch::<T>::from_reply(&reply)?;
        let namespace = decoded.namespace.unwrap_or(namespace);

        tracing::debug!(
            namespace = %namespace,
            cursor_id = decoded.batch.cursor_id,
            first_batch = decoded.batch.documents.len(),
            "Opened cursor"
        );

        let transport: Arc<dyn BatchTransport<T>> = session;
        Ok(Cursor::new(transport, namespace, decoded.batch, options))
    }
}

/// The session a single server cursor lives in.
///
/// The server only accepts a getMore from the session that created the cursor.
/// The owning cursor's `&mut self` already serializes its calls, so the lock is
/// only contended by a kill spawned after the cursor is dropped.
pub struct CursorSession {
    client: Client,
    session: Mutex<ClientSession>,
}

impl CursorSession {
    async fn start(client: Client) -> Result<Self> {
        let session = client.start_session().await?;
        Ok(Self {
            client,
            session: Mutex::new(session),
        })
    }

    async fn run(&self, database: &str, command: Document) -> Result<Document> {
        let mut session = self.session.lock().await;
        let reply = self
            .client
            .database(database)
            .run_command(command)
            .session(&mut *session)
            .await?;
        Ok(reply)
    }
}

#[async_trait]
impl<T> BatchTransport<T> for CursorSession
where
    T: DeserializeOwned + Send + 'static,
{
    async fn get_more(
        &self,
        handle: &CursorHandle,
        batch_size: Option<u32>,
    ) -> Result<CursorBatch<T>> {
        let command = get_more_command(handle, batch_size);
        let reply = self.run(handle.namespace().database(), command).await?;
        Ok(CursorBatch::from_reply(&reply)?.batch)
    }

    async fn kill_cursor(&self, handle: &CursorHandle) -> Result<()> {
        let namespace = handle.namespace();
        let command = doc! {
            "killCursors": namespace.collection(),
            "cursors": [handle.id()],
        };
        let reply = self.run(namespace.database(), command).await?;
        check_kill_reply(&reply, handle.id())
    }
}

/// `find` command for the first batch; zero sizes leave the server default
pub(crate) fn find_command(
    namespace: &Namespace,
    filter: Document,
    options: &CursorOptions,
) -> Document {
    let mut command = doc! {
        "find": namespace.collection(),
        "filter": filter,
    };
    if let Some(batch_size) = options.next_batch_size(0) {
        command.insert("batchSize", i64::from(batch_size));
    }
    if let Some(limit) = options.limit.filter(|n| *n > 0) {
        command.insert("limit", i64::from(limit));
    }
    command
}

pub(crate) fn get_more_command(handle: &CursorHandle, batch_size: Option<u32>) -> Document {
    let mut command = doc! {
        "getMore": handle.id(),
        "collection": handle.namespace().collection(),
    };
    if let Some(batch_size) = batch_size {
        command.insert("batchSize", i64::from(batch_size));
    }
    command
}

/// A killCursors reply must list our id under `cursorsKilled`
fn check_kill_reply(reply: &Document, cursor_id: i64) -> Result<()> {
    let ids = |key: &str| -> Vec<i64> {
        reply
            .get_array(key)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Bson::Int64(id) => Some(*id),
                        Bson::Int32(id) => Some(i64::from(*id)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    if ids("cursorsNotFound").contains(&cursor_id) {
        return Err(DocwireError::Transport(format!(
            "Cursor {} not found on server",
            cursor_id
        )));
    }
    if !ids("cursorsKilled").contains(&cursor_id) {
        return Err(DocwireError::Transport(format!(
            "Kill cursors command did not kill cursor {}",
            cursor_id
        )));
    }
    Ok(())
}
