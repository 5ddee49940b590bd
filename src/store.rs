//! The external collaborators the core algorithms operate on.
//!
//! - [`ContentStore`]: blobs addressed by digest
//! - [`ContentWriter`]: adding blobs, for importing and test fixtures
//! - [`ImageIndex`]: unique image names mapped to target descriptors
//! - [`SnapshotUsage`]: on-disk size of materialized layer stacks
//!
//! Both [`crate::memory::MemoryStore`] and [`crate::repository::Repository`]
//! implement all of them.

use std::{collections::BTreeMap, time::SystemTime};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{descriptor::Descriptor, digest::Digest, error::Result};

/// A named image: the unique key of the image index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub name: String,
    pub target: Descriptor,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ImageRecord {
    pub fn new(name: impl Into<String>, target: Descriptor) -> Self {
        let now = SystemTime::now();
        ImageRecord {
            name: name.into(),
            target,
            created_at: now,
            updated_at: now,
            labels: BTreeMap::new(),
        }
    }
}

/// One predicate of an image index query.
///
/// A query is a list of filters that is satisfied when *any* of them matches;
/// the empty query matches every record.
#[derive(Clone, Debug)]
pub enum Filter {
    /// `name == value`
    Name(String),
    /// `name ~= regex`
    NameMatches(Regex),
    /// `target.digest == value`
    Digest(Digest),
    /// `target.digest ~= regex`
    DigestMatches(Regex),
    /// `labels.key` is present and, if given, equal to the value.
    Label { key: String, value: Option<String> },
}

impl Filter {
    pub fn matches(&self, record: &ImageRecord) -> bool {
        match self {
            Filter::Name(name) => record.name == *name,
            Filter::NameMatches(re) => re.is_match(&record.name),
            Filter::Digest(digest) => record.target.digest == *digest,
            Filter::DigestMatches(re) => re.is_match(record.target.digest.as_str()),
            Filter::Label { key, value } => match (record.labels.get(key), value) {
                (Some(_), None) => true,
                (Some(actual), Some(wanted)) => actual == wanted,
                (None, _) => false,
            },
        }
    }
}

/// Does `record` satisfy the disjunction `filters`?
pub fn matches_any(filters: &[Filter], record: &ImageRecord) -> bool {
    filters.is_empty() || filters.iter().any(|f| f.matches(record))
}

/// Maps a digest to blob bytes and size.
pub trait ContentStore {
    /// Size of the stored blob, or [`crate::Error::NotFound`].
    fn info(&self, digest: &Digest) -> Result<i64>;

    /// Entire content of the blob.
    fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>>;

    /// Remove the blob. Deleting content still referenced by an image is the
    /// caller's responsibility.
    fn delete(&self, digest: &Digest) -> Result<()>;
}

/// Stores new blobs, returning a descriptor for the written content.
pub trait ContentWriter {
    fn write_blob(&self, media_type: &str, data: &[u8]) -> Result<Descriptor>;
}

/// Maps unique names to image records.
pub trait ImageIndex {
    /// Records matching any of `filters` (all records for an empty slice),
    /// ordered by name.
    fn list(&self, filters: &[Filter]) -> Result<Vec<ImageRecord>>;

    /// The record called `name`, or [`crate::Error::NotFound`].
    fn get(&self, name: &str) -> Result<ImageRecord>;

    /// Store a new record; fails with [`crate::Error::AlreadyExists`] if the
    /// name is taken.
    fn create(&self, record: ImageRecord) -> Result<ImageRecord>;

    /// Remove the record called `name`, or fail with [`crate::Error::NotFound`].
    fn delete(&self, name: &str) -> Result<()>;
}

/// Reports how much disk space a snapshot uses.
pub trait SnapshotUsage {
    /// On-disk size of the snapshot named `key` (a chain ID for image layers).
    fn usage(&self, key: &str) -> Result<i64>;
}
