//! Per-image helpers built on the manifest graph.
//!
//! These answer questions about one image target: how much content it
//! references, what its config says, which layers make up its root
//! filesystem, and which platforms it can run on.

use log::debug;
use oci_spec::image::{ImageConfiguration, ImageIndex, ImageManifest};

use crate::{
    cancel::Cancellation,
    descriptor::{Descriptor, DescriptorKind},
    digest::Digest,
    error::{Error, Result},
    platform::{Platform, PlatformMatcher},
    store::ContentStore,
    walk::{children, walk},
};

/// Total size of the content reachable from `target` for one platform.
pub fn content_size<S: ContentStore + ?Sized>(
    store: &S,
    target: &Descriptor,
    platform: &PlatformMatcher,
    cancel: &Cancellation,
) -> Result<i64> {
    let mut total: i64 = 0;
    for item in walk(store, target, platform, cancel) {
        let (digest, size) = item?;
        total = total.checked_add(size).ok_or_else(|| {
            Error::CorruptMetadata(format!(
                "content size of {} overflows at {digest}",
                target.digest
            ))
        })?;
    }
    Ok(total)
}

/// The manifest `target` resolves to for `platform`, descending through
/// indexes.
pub fn manifest<S: ContentStore + ?Sized>(
    store: &S,
    target: &Descriptor,
    platform: &PlatformMatcher,
    cancel: &Cancellation,
) -> Result<(Descriptor, ImageManifest)> {
    let mut current = target.clone();
    loop {
        cancel.check()?;
        match current.kind() {
            DescriptorKind::Manifest => {
                let data = store.read_blob(&current.digest)?;
                let manifest = ImageManifest::from_reader(&data[..]).map_err(|e| {
                    Error::CorruptMetadata(format!("parsing manifest {}: {e}", current.digest))
                })?;
                return Ok((current, manifest));
            }
            DescriptorKind::Index => {
                let Some(next) = children(store, &current, platform)?.into_iter().next() else {
                    return Err(Error::NotFound(format!(
                        "no manifest for platform {platform} in {}",
                        current.digest
                    )));
                };
                debug!("{} selects {} for {platform}", current.digest, next.digest);
                current = next;
            }
            DescriptorKind::Config | DescriptorKind::Layer => {
                return Err(Error::CorruptMetadata(format!(
                    "{} is not a manifest ({})",
                    current.digest, current.media_type
                )));
            }
        }
    }
}

/// Parsed image config for `platform`.
pub fn config<S: ContentStore + ?Sized>(
    store: &S,
    target: &Descriptor,
    platform: &PlatformMatcher,
    cancel: &Cancellation,
) -> Result<ImageConfiguration> {
    let (_, manifest) = manifest(store, target, platform, cancel)?;
    cancel.check()?;
    read_config(store, &Descriptor::try_from(manifest.config())?)
}

fn read_config<S: ContentStore + ?Sized>(
    store: &S,
    desc: &Descriptor,
) -> Result<ImageConfiguration> {
    let data = store.read_blob(&desc.digest)?;
    ImageConfiguration::from_reader(&data[..])
        .map_err(|e| Error::CorruptMetadata(format!("parsing config {}: {e}", desc.digest)))
}

/// The ordered DiffIDs of a config's root filesystem, bottom layer first.
pub fn diff_ids(config: &ImageConfiguration) -> Result<Vec<Digest>> {
    config
        .rootfs()
        .diff_ids()
        .iter()
        .map(|id| {
            Digest::parse(id).map_err(|e| Error::CorruptMetadata(format!("diff id {id:?}: {e}")))
        })
        .collect()
}

/// Platforms `target` provides.
///
/// For an index these are the platforms declared on its manifests (reading a
/// manifest's config when the index does not say); for a single manifest it
/// is the platform recorded in the config.
pub fn platforms<S: ContentStore + ?Sized>(
    store: &S,
    target: &Descriptor,
    cancel: &Cancellation,
) -> Result<Vec<Platform>> {
    cancel.check()?;
    let mut found = vec![];
    match target.kind() {
        DescriptorKind::Index => {
            let data = store.read_blob(&target.digest)?;
            let index = ImageIndex::from_reader(&data[..]).map_err(|e| {
                Error::CorruptMetadata(format!("parsing index {}: {e}", target.digest))
            })?;
            for child in index.manifests() {
                let child = Descriptor::try_from(child)?;
                let provided = match (&child.platform, child.kind()) {
                    (Some(p), _) => vec![p.clone()],
                    (None, kind) if kind.is_manifest_like() => platforms(store, &child, cancel)?,
                    (None, _) => vec![],
                };
                for p in provided {
                    if !found.contains(&p) {
                        found.push(p);
                    }
                }
            }
        }
        DescriptorKind::Manifest => {
            let config = config(store, target, &PlatformMatcher::All, cancel)?;
            found.push(Platform::new(
                &config.os().to_string(),
                &config.architecture().to_string(),
                config.variant().as_deref(),
            ));
        }
        DescriptorKind::Config | DescriptorKind::Layer => {}
    }
    Ok(found)
}
