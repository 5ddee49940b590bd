//! Traversal of an image's manifest graph.
//!
//! Starting from an image target the walk visits, in depth-first pre-order:
//!
//! ```text
//! index ─┬─ manifest (first child matching the platform, at most one)
//!        │    ├─ config
//!        │    └─ layer, layer, ...
//!        └─ (other platforms are never visited)
//! ```
//!
//! Dispatch is on [`DescriptorKind`]: each kind has a function producing the
//! next frontier from the node's content. Blobs are leaves and are never read.

use std::collections::HashSet;

use log::trace;
use oci_spec::image::{ImageIndex, ImageManifest};

use crate::{
    cancel::Cancellation,
    descriptor::{Descriptor, DescriptorKind},
    digest::Digest,
    error::{Error, Result},
    platform::PlatformMatcher,
    store::ContentStore,
};

/// Lazily yields `(digest, size)` for every node reachable from a root.
///
/// Each digest is yielded once. The first error ends the walk: a negative
/// size is [`Error::CorruptMetadata`], a raised [`Cancellation`] is
/// [`Error::Cancelled`], and store errors are passed through.
pub struct Walk<'a, S: ContentStore + ?Sized> {
    store: &'a S,
    platform: &'a PlatformMatcher,
    cancel: &'a Cancellation,
    frontier: Vec<Descriptor>,
    expand: Option<Descriptor>,
    seen: HashSet<Digest>,
    finished: bool,
}

/// Begin a walk from `root`.
pub fn walk<'a, S: ContentStore + ?Sized>(
    store: &'a S,
    root: &Descriptor,
    platform: &'a PlatformMatcher,
    cancel: &'a Cancellation,
) -> Walk<'a, S> {
    Walk {
        store,
        platform,
        cancel,
        frontier: vec![root.clone()],
        expand: None,
        seen: HashSet::new(),
        finished: false,
    }
}

impl<S: ContentStore + ?Sized> Walk<'_, S> {
    fn step(&mut self) -> Result<Option<(Digest, i64)>> {
        // Children of the previously yielded node are only fetched now, so a
        // node is always reported before its content is read.
        if let Some(parent) = self.expand.take() {
            let children = children(self.store, &parent, self.platform)?;
            self.frontier.extend(children.into_iter().rev());
        }

        while let Some(desc) = self.frontier.pop() {
            if !self.seen.insert(desc.digest.clone()) {
                continue;
            }
            self.cancel.check()?;
            if desc.size < 0 {
                return Err(Error::CorruptMetadata(format!(
                    "invalid size {} in {} ({})",
                    desc.size, desc.digest, desc.media_type
                )));
            }
            trace!("visiting {} ({})", desc.digest, desc.media_type);
            let item = (desc.digest.clone(), desc.size);
            if desc.kind().is_manifest_like() {
                self.expand = Some(desc);
            }
            return Ok(Some(item));
        }
        Ok(None)
    }
}

impl<S: ContentStore + ?Sized> Iterator for Walk<'_, S> {
    type Item = Result<(Digest, i64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.step() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// The descriptors a node leads to, after platform selection.
pub fn children<S: ContentStore + ?Sized>(
    store: &S,
    desc: &Descriptor,
    platform: &PlatformMatcher,
) -> Result<Vec<Descriptor>> {
    match desc.kind() {
        DescriptorKind::Index => index_children(&store.read_blob(&desc.digest)?, desc, platform),
        DescriptorKind::Manifest => manifest_children(&store.read_blob(&desc.digest)?, desc),
        DescriptorKind::Config | DescriptorKind::Layer => Ok(vec![]),
    }
}

/// The first platform-compatible manifest of an index, if any.
///
/// Children without a declared platform are compatible with every matcher.
fn index_children(
    data: &[u8],
    desc: &Descriptor,
    platform: &PlatformMatcher,
) -> Result<Vec<Descriptor>> {
    let index = ImageIndex::from_reader(data)
        .map_err(|e| Error::CorruptMetadata(format!("parsing index {}: {e}", desc.digest)))?;
    for child in index.manifests() {
        let child = Descriptor::try_from(child)?;
        let compatible = child
            .platform
            .as_ref()
            .is_none_or(|p| platform.matches(p));
        if compatible && child.kind().is_manifest_like() {
            return Ok(vec![child]);
        }
    }
    Ok(vec![])
}

/// The config and every layer of a manifest.
fn manifest_children(data: &[u8], desc: &Descriptor) -> Result<Vec<Descriptor>> {
    let manifest = ImageManifest::from_reader(data)
        .map_err(|e| Error::CorruptMetadata(format!("parsing manifest {}: {e}", desc.digest)))?;
    let mut children = Vec::with_capacity(manifest.layers().len() + 1);
    children.push(Descriptor::try_from(manifest.config())?);
    for layer in manifest.layers() {
        children.push(Descriptor::try_from(layer)?);
    }
    Ok(children)
}
