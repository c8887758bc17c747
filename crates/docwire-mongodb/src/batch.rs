//! Cursor batches and the command replies they are decoded from

use bson::{Bson, Document};
use docwire_common::{DocwireError, Result};
use serde::de::DeserializeOwned;
use std::fmt;

/// `database.collection` a cursor reads from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Parse a full namespace such as `"shop.orders"`.
    ///
    /// Splits at the first `.`; the collection part may itself contain dots.
    pub fn parse(full_name: &str) -> Result<Self> {
        match full_name.split_once('.') {
            Some((database, collection)) if !database.is_empty() && !collection.is_empty() => {
                Ok(Self::new(database, collection))
            }
            _ => Err(DocwireError::Deserialization(format!(
                "Invalid namespace '{}': expected '<database>.<collection>'",
                full_name
            ))),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Identifies a server-side cursor. An id of 0 means the server holds nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorHandle {
    id: i64,
    namespace: Namespace,
}

impl CursorHandle {
    pub fn new(id: i64, namespace: Namespace) -> Self {
        Self { id, namespace }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// True while the server still holds a cursor for this handle
    pub fn is_open(&self) -> bool {
        self.id != 0
    }

    pub(crate) fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

/// One server round-trip worth of documents
#[derive(Debug, Clone, PartialEq)]
pub struct CursorBatch<T> {
    pub cursor_id: i64,
    pub documents: Vec<T>,
    pub post_batch_resume_token: Option<Document>,
}

impl<T> CursorBatch<T> {
    pub fn new(cursor_id: i64, documents: Vec<T>) -> Self {
        Self {
            cursor_id,
            documents,
            post_batch_resume_token: None,
        }
    }

    /// Final batch of a result set
    pub fn last(documents: Vec<T>) -> Self {
        Self::new(0, documents)
    }

    pub fn with_resume_token(mut self, token: Document) -> Self {
        self.post_batch_resume_token = Some(token);
        self
    }

    /// True if the server reported more results after this batch
    pub fn has_more(&self) -> bool {
        self.cursor_id != 0
    }
}

/// A decoded `{cursor: {...}}` command reply
#[derive(Debug, Clone, PartialEq)]
pub struct CursorReply<T> {
    /// `ns` reported by the server, when present
    pub namespace: Option<Namespace>,
    pub batch: CursorBatch<T>,
}

impl<T: DeserializeOwned> CursorBatch<T> {
    /// Decode the `cursor` sub-document of a find/aggregate/getMore reply.
    ///
    /// Accepts either `firstBatch` or `nextBatch`, and an `id` stored as int32 or int64.
    pub fn from_reply(reply: &Document) -> Result<CursorReply<T>> {
        let cursor = reply.get_document("cursor")?;

        let cursor_id = match cursor.get("id") {
            Some(Bson::Int64(id)) => *id,
            Some(Bson::Int32(id)) => i64::from(*id),
            Some(other) => {
                return Err(DocwireError::Deserialization(format!(
                    "Cursor id must be an integer, got {:?}",
                    other.element_type()
                )))
            }
            None => {
                return Err(DocwireError::Deserialization(
                    "Cursor reply is missing 'id'".to_string(),
                ))
            }
        };

        let raw_batch = match (cursor.get("firstBatch"), cursor.get("nextBatch")) {
            (Some(Bson::Array(items)), _) | (None, Some(Bson::Array(items))) => items,
            _ => {
                return Err(DocwireError::Deserialization(
                    "Cursor reply has no 'firstBatch' or 'nextBatch' array".to_string(),
                ))
            }
        };

        let documents = raw_batch
            .iter()
            .map(|item| match item {
                Bson::Document(doc) => Ok(bson::from_document::<T>(doc.clone())?),
                other => Err(DocwireError::Deserialization(format!(
                    "Batch element must be a document, got {:?}",
                    other.element_type()
                ))),
            })
            .collect::<Result<Vec<T>>>()?;

        let namespace = match cursor.get_str("ns") {
            Ok(ns) => Some(Namespace::parse(ns)?),
            Err(_) => None,
        };

        let post_batch_resume_token = cursor.get_document("postBatchResumeToken").ok().cloned();

        Ok(CursorReply {
            namespace,
            batch: CursorBatch {
                cursor_id,
                documents,
                post_batch_resume_token,
            },
        })
    }
}
