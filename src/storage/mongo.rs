//! MongoDB document backend.
//!
//! Documents are `{_id, rev, val}` with the payload as a raw binary field.
//! Writes are full-record upserts keyed by `_id`; together with the
//! revision guard on the dirty-queue advance this makes writeback safe to
//! repeat.

use async_trait::async_trait;
use bson::spec::BinarySubtype;
use bson::{doc, Binary, Bson, Document};
use mongodb::options::UpdateOptions;
use mongodb::Client;

use super::traits::{DocStore, StorageError};
use crate::keymap::DocAddress;
use crate::record::Record;
use crate::resilience::retry::{retry, RetryConfig};

pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    /// Connect to the document store.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let client = retry("mongo_connect", &RetryConfig::startup(), || async {
            Client::with_uri_str(url).await
        })
        .await
        .map_err(|e: mongodb::error::Error| StorageError::Document(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn collection(&self, addr: &DocAddress) -> mongodb::Collection<Document> {
        self.client.database(&addr.database).collection::<Document>(&addr.collection)
    }
}

/// Tolerant field extraction: the driver may hand back `rev` as either
/// integer width, and legacy documents may carry the payload as a string.
fn decode_document(doc: &Document) -> Record {
    let rev = match doc.get("rev") {
        Some(Bson::Int64(v)) => *v,
        Some(Bson::Int32(v)) => i64::from(*v),
        _ => 0,
    };
    let val = match doc.get("val") {
        Some(Bson::Binary(b)) => b.bytes.clone(),
        Some(Bson::String(s)) => s.clone().into_bytes(),
        _ => Vec::new(),
    };
    Record { rev, val }
}

#[async_trait]
impl DocStore for MongoStore {
    async fn find_one(&self, addr: &DocAddress) -> Result<Option<Record>, StorageError> {
        let doc = self
            .collection(addr)
            .find_one(doc! { "_id": addr.id.as_str() }, None)
            .await
            .map_err(|e| StorageError::Document(e.to_string()))?;
        Ok(doc.as_ref().map(decode_document))
    }

    async fn upsert(&self, addr: &DocAddress, record: &Record) -> Result<(), StorageError> {
        let val = Binary { subtype: BinarySubtype::Generic, bytes: record.val.clone() };
        self.collection(addr)
            .update_one(
                doc! { "_id": addr.id.as_str() },
                doc! { "$set": { "rev": record.rev, "val": val } },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await
            .map_err(|e| StorageError::Document(e.to_string()))?;
        Ok(())
    }
}
