//! Packed record and mailbox data structures.
//!
//! The [`Record`] is the unit stored under every cache key and mirrored into
//! the document store: a revision counter plus an opaque payload. Records are
//! exchanged with the cache as msgpack byte strings so that server-side
//! mutator programs can unpack, modify and repack them with `cmsgpack`.
//!
//! Encoding is **named** (msgpack maps keyed by field name): the mutator
//! programs address fields as `d.rev` / `d.val`, so positional encoding would
//! not round-trip. Payload bytes are accepted back as either msgpack `bin` or
//! `str` (the scripting runtime repacks Lua strings as `str`).

use serde::{Deserialize, Serialize};

use crate::storage::traits::StorageError;

/// A cached record: revision counter plus opaque payload.
///
/// `rev == 0` is the negative-result placeholder ("known not to exist"): the
/// record is materialised in the cache so repeated lookups don't re-hit the
/// document store, but readers surface it as not-found. Any write bumps `rev`
/// by exactly one.
///
/// The scripting runtime does revision arithmetic in doubles, so `rev` is
/// exact only up to 2^52. No record plausibly accumulates that many writes.
///
/// # Example
///
/// ```
/// use mirror_cache::Record;
///
/// let rec = Record { rev: 3, val: b"hello".to_vec() };
/// let packed = rec.pack().unwrap();
/// assert_eq!(Record::unpack(&packed).unwrap(), rec);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Revision, incremented on every effective write. 0 = never written.
    pub rev: i64,
    /// Opaque payload. For mailbox keys this is a packed [`Mailbox`].
    #[serde(with = "serde_bytes")]
    pub val: Vec<u8>,
}

impl Record {
    /// The negative-result placeholder written when a document is missing.
    pub fn tombstone() -> Self {
        Self { rev: 0, val: Vec::new() }
    }

    /// Serialize to the packed wire form.
    pub fn pack(&self) -> Result<Vec<u8>, StorageError> {
        rmp_serde::to_vec_named(self).map_err(|e| StorageError::Codec(e.to_string()))
    }

    /// Deserialize from the packed wire form.
    pub fn unpack(buf: &[u8]) -> Result<Self, StorageError> {
        rmp_serde::from_slice(buf).map_err(|e| StorageError::Codec(e.to_string()))
    }
}

/// A single mailbox item. Ids are assigned from the mailbox sequence at push
/// time and are strictly increasing, so the queue stays sorted by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mail {
    /// Auto-generated id identifying this item.
    pub id: i64,
    /// Item payload.
    #[serde(with = "serde_bytes")]
    pub val: Vec<u8>,
}

/// The mailbox sub-record nested inside a record's `val`.
///
/// `seq` never decreases, even when items are dropped or the queue is
/// cleaned; it is the id generator. `que` is ordered by id ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    /// Monotonic id generator.
    pub seq: i64,
    /// Items ordered by id.
    pub que: Vec<Mail>,
}

impl Mailbox {
    /// Serialize to the packed wire form.
    pub fn pack(&self) -> Result<Vec<u8>, StorageError> {
        rmp_serde::to_vec_named(self).map_err(|e| StorageError::Codec(e.to_string()))
    }

    /// Deserialize, treating an empty buffer as an empty mailbox.
    ///
    /// A freshly created record carries an empty payload; the mutator
    /// programs apply the same default.
    pub fn unpack_or_default(buf: &[u8]) -> Result<Self, StorageError> {
        if buf.is_empty() {
            return Ok(Self::default());
        }
        rmp_serde::from_slice(buf).map_err(|e| StorageError::Codec(e.to_string()))
    }
}
