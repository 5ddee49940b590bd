//! Removing every image and the content it references.
//!
//! Pruning runs in three phases:
//!
//! 1. **mark**: walk each image's manifest graph for one platform and collect
//!    the digests (and sizes) it reaches;
//! 2. **sweep**: delete every marked blob from the content store;
//! 3. **untag**: delete every listed image name from the index.
//!
//! Failures do not stop the prune. A walk that fails leaves whatever it had
//! marked so far in the set, a blob or name that cannot be deleted is
//! skipped, and all errors are handed back together with the report of what
//! was done (see [`PruneError`]). Only cancellation stops early.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    cancel::Cancellation,
    digest::Digest,
    error::{Error, MultipleErrors},
    platform::PlatformMatcher,
    store::{ContentStore, ImageIndex},
    walk::walk,
};

/// One entry of a [`PruneReport`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum DeleteItem {
    /// A blob removed from the content store.
    Deleted(Digest),
    /// An image name removed from the index.
    Untagged(String),
}

/// What a prune removed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PruneReport {
    pub space_reclaimed: i64,
    #[serde(rename = "ImagesDeleted")]
    pub deleted: Vec<DeleteItem>,
}

impl PruneReport {
    pub fn is_empty(&self) -> bool {
        self.space_reclaimed == 0 && self.deleted.is_empty()
    }
}

/// A prune that did only part of its work.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct PruneError {
    /// Everything that was removed before and despite the failures.
    pub report: PruneReport,
    /// A single error, or [`Error::Multiple`] when there were several.
    pub error: Error,
}

/// Options for [`prune`].
#[derive(Clone, Debug)]
pub struct PruneOptions {
    /// Accepted for compatibility; every image is pruned regardless.
    pub filters: Vec<String>,
    /// Selects the manifest of multi-platform images during marking.
    pub platform: PlatformMatcher,
}

impl Default for PruneOptions {
    fn default() -> Self {
        PruneOptions {
            filters: vec![],
            platform: PlatformMatcher::default_strict(),
        }
    }
}

/// Delete every image and the content it references.
pub fn prune<S>(
    store: &S,
    opts: &PruneOptions,
    cancel: &Cancellation,
) -> std::result::Result<PruneReport, PruneError>
where
    S: ContentStore + ImageIndex + ?Sized,
{
    let mut report = PruneReport::default();
    let mut errors = vec![];

    if !opts.filters.is_empty() {
        warn!("prune filters are not supported, ignoring {:?}", opts.filters);
    }

    let images = match store.list(&[]) {
        Ok(images) => images,
        Err(error) => return Err(PruneError { report, error }),
    };

    // Last size wins for a digest reached from several images.
    let mut marked: BTreeMap<Digest, i64> = BTreeMap::new();
    for image in &images {
        for item in walk(store, &image.target, &opts.platform, cancel) {
            match item {
                Ok((digest, size)) => {
                    debug!("marking {digest} ({size} bytes) from {}", image.name);
                    marked.insert(digest, size);
                }
                Err(Error::Cancelled) => return Err(cancelled(report)),
                Err(e) => {
                    warn!("failed to walk {}: {e}", image.name);
                    errors.push(e);
                }
            }
        }
    }

    for (digest, size) in marked {
        if cancel.is_cancelled() {
            return Err(cancelled(report));
        }
        debug!("deleting {digest}");
        if let Err(e) = ContentStore::delete(store, &digest) {
            warn!("failed to delete {digest}: {e}");
            errors.push(e);
        }
        report.space_reclaimed = match report.space_reclaimed.checked_add(size) {
            Some(total) => total,
            None => {
                warn!("reclaimed space overflows at {digest} ({size} bytes)");
                errors.push(Error::CorruptMetadata(format!(
                    "reclaimed space overflows at {digest} ({size} bytes)"
                )));
                i64::MAX
            }
        };
        report.deleted.push(DeleteItem::Deleted(digest));
    }

    for image in images {
        if cancel.is_cancelled() {
            return Err(cancelled(report));
        }
        match ImageIndex::delete(store, &image.name) {
            Ok(()) => report.deleted.push(DeleteItem::Untagged(image.name)),
            Err(e) => {
                warn!("failed to untag {}: {e}", image.name);
                errors.push(e);
            }
        }
    }

    info!(
        "pruned {} entries, reclaimed {} bytes",
        report.deleted.len(),
        report.space_reclaimed
    );
    match MultipleErrors::from_errors(errors) {
        Some(error) => Err(PruneError { report, error }),
        None => Ok(report),
    }
}

fn cancelled(report: PruneReport) -> PruneError {
    PruneError {
        report,
        error: Error::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::MemoryStore,
        store::ImageRecord,
        test::{manifest_with_layer_sizes, TestImage},
    };

    fn opts() -> PruneOptions {
        PruneOptions {
            filters: vec![],
            platform: PlatformMatcher::All,
        }
    }

    #[test]
    fn test_prune_everything() {
        let store = MemoryStore::new();
        let img = TestImage::new(&store, "linux/amd64", &["aa", "bbb"]);
        store.create(ImageRecord::new("one", img.manifest.clone())).unwrap();
        store.create(ImageRecord::new("two", img.manifest.clone())).unwrap();

        let report = prune(&store, &opts(), &Cancellation::new()).unwrap();
        assert_eq!(store.blob_count(), 0);
        assert_eq!(store.image_count(), 0);
        assert_eq!(
            report.space_reclaimed,
            img.manifest.size + img.config.size + 5
        );
        let untagged: Vec<_> = report
            .deleted
            .iter()
            .filter_map(|d| match d {
                DeleteItem::Untagged(name) => Some(name.as_str()),
                DeleteItem::Deleted(_) => None,
            })
            .collect();
        assert_eq!(untagged, ["one", "two"]);
        assert_eq!(report.deleted.len(), 4 + 2);

        let again = prune(&store, &opts(), &Cancellation::new()).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_single_error_is_not_wrapped() {
        let store = MemoryStore::new();
        let img = TestImage::new(&store, "linux/amd64", &["a"]);
        store.create(ImageRecord::new("one", img.manifest.clone())).unwrap();
        store.remove_blob(&img.layers[0].digest);

        let err = prune(&store, &opts(), &Cancellation::new()).unwrap_err();
        assert!(err.error.is_not_found(), "{err}");
        // The missing layer is still reported as reclaimed.
        assert_eq!(err.report.deleted.len(), 3 + 1);
        assert_eq!(store.blob_count(), 0);
    }

    #[test]
    fn test_cancelled() {
        let store = MemoryStore::new();
        let img = TestImage::new(&store, "linux/amd64", &["a"]);
        store.create(ImageRecord::new("one", img.manifest.clone())).unwrap();

        let cancel = Cancellation::new();
        cancel.cancel();
        let err = prune(&store, &opts(), &cancel).unwrap_err();
        assert!(err.error.is_cancelled());
        assert!(err.report.is_empty());
        assert_eq!(store.image_count(), 1);
    }

    #[test]
    fn test_reclaimed_space_overflow() {
        let store = MemoryStore::new();
        let target = manifest_with_layer_sizes(&store, &[i64::MAX, i64::MAX]);
        store.create(ImageRecord::new("huge", target)).unwrap();

        let err = prune(&store, &opts(), &Cancellation::new()).unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err}");
        assert_eq!(err.report.space_reclaimed, i64::MAX);
        // manifest, config, two layers, one name
        assert_eq!(err.report.deleted.len(), 5);
        assert_eq!(store.blob_count(), 0);
        assert_eq!(store.image_count(), 0);
    }
}
