//! Disk usage accounting for images that share layers.
//!
//! On-disk size is tracked per materialized layer stack, so accounting works
//! on chain IDs rather than on blob sizes. For an image whose layers have the
//! chain IDs `c0..cn`:
//!
//! - the *virtual size* is `size(c0) + ... + size(cn)`;
//! - the *shared size* is the same sum restricted to chain IDs that at least
//!   one other image of the same listing also uses.
//!
//! A layer shared by several images is charged in full to each of them. The
//! snapshot size oracle is asked about each chain ID at most once per call;
//! the [`SizeCache`] doing this lives only as long as that call.

use std::{
    collections::{BTreeMap, HashMap},
    time::{SystemTime, UNIX_EPOCH},
};

use log::{debug, trace};
use serde::Serialize;

use crate::{
    cancel::Cancellation,
    digest::{chain_ids, Digest},
    error::{Error, Result},
    image::{config, content_size, diff_ids},
    platform::PlatformMatcher,
    resolve::Resolver,
    store::{ContentStore, ImageIndex, ImageRecord, SnapshotUsage},
};

/// Memoized snapshot sizes, keyed by chain ID.
pub struct SizeCache<'a, O: SnapshotUsage + ?Sized> {
    oracle: &'a O,
    sizes: HashMap<Digest, i64>,
}

impl<'a, O: SnapshotUsage + ?Sized> SizeCache<'a, O> {
    pub fn new(oracle: &'a O) -> Self {
        SizeCache {
            oracle,
            sizes: HashMap::new(),
        }
    }

    /// On-disk size of the layer stack `chain_id`.
    pub fn size(&mut self, chain_id: &Digest) -> Result<i64> {
        if let Some(size) = self.sizes.get(chain_id) {
            return Ok(*size);
        }
        let size = measure(self.oracle, chain_id.as_str())?;
        trace!("snapshot {chain_id} uses {size} bytes");
        self.sizes.insert(chain_id.clone(), size);
        Ok(size)
    }

    /// Sum of the sizes of every layer stack in `chain`.
    pub fn virtual_size(&mut self, chain: &[Digest]) -> Result<i64> {
        let mut total: i64 = 0;
        for id in chain {
            total = add_size(total, self.size(id)?, id.as_str())?;
        }
        Ok(total)
    }

    /// Sum of the sizes of the layer stacks in `chain` that appear in more
    /// than one chain according to `refcounts`.
    pub fn shared_size(
        &mut self,
        chain: &[Digest],
        refcounts: &HashMap<Digest, usize>,
    ) -> Result<i64> {
        let mut total: i64 = 0;
        for id in chain {
            if refcounts.get(id).copied().unwrap_or(0) > 1 {
                total = add_size(total, self.size(id)?, id.as_str())?;
            }
        }
        Ok(total)
    }
}

/// `total + size`, failing for `key` when the sum does not fit.
fn add_size(total: i64, size: i64, key: &str) -> Result<i64> {
    total
        .checked_add(size)
        .ok_or_else(|| Error::SizeComputationFailed {
            key: key.to_string(),
            source: Box::new(Error::CorruptMetadata(format!(
                "size {size} added to {total} overflows"
            ))),
        })
}

fn measure<O: SnapshotUsage + ?Sized>(oracle: &O, key: &str) -> Result<i64> {
    oracle
        .usage(key)
        .map_err(|source| Error::SizeComputationFailed {
            key: key.to_string(),
            source: Box::new(source),
        })
}

/// Sizes computed for one image of a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageUsage {
    pub virtual_size: i64,
    /// Only computed on request.
    pub shared_size: Option<i64>,
}

/// Virtual (and optionally shared) size for each chain of a batch.
///
/// `chains[i]` is the chain ID sequence of the i-th image; results are in
/// the same order. Any oracle failure fails the whole batch.
pub fn account<O: SnapshotUsage + ?Sized>(
    oracle: &O,
    chains: &[Vec<Digest>],
    shared: bool,
) -> Result<Vec<ImageUsage>> {
    let mut cache = SizeCache::new(oracle);

    let mut refcounts: HashMap<Digest, usize> = HashMap::new();
    if shared {
        for chain in chains {
            for id in chain {
                *refcounts.entry(id.clone()).or_default() += 1;
            }
        }
    }

    let mut usage = Vec::with_capacity(chains.len());
    for chain in chains {
        let virtual_size = cache.virtual_size(chain)?;
        let shared_size = match shared {
            true => Some(cache.shared_size(chain, &refcounts)?),
            false => None,
        };
        usage.push(ImageUsage {
            virtual_size,
            shared_size,
        });
    }
    debug!(
        "accounted {} images over {} distinct layer stacks",
        chains.len(),
        cache.sizes.len()
    );
    Ok(usage)
}

/// Size of a container's read-write layer, and that size plus the virtual
/// size of its image, as `(rw_size, root_fs_size)`.
pub fn container_layer_size<O: SnapshotUsage + ?Sized>(
    oracle: &O,
    rw_key: &str,
    diff_ids: &[Digest],
) -> Result<(i64, i64)> {
    let rw_size = measure(oracle, rw_key)?;
    let virtual_size = SizeCache::new(oracle).virtual_size(&chain_ids(diff_ids))?;
    Ok((rw_size, add_size(virtual_size, rw_size, rw_key)?))
}

/// Restricts which images [`list_images`] reports.
///
/// All conditions must hold for an image to be listed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListFilters {
    /// Created strictly before each of these images.
    pub before: Vec<String>,
    /// Created strictly after each of these images.
    pub since: Vec<String>,
    /// Carries each label, with the given value if one is given.
    pub labels: Vec<(String, Option<String>)>,
}

impl ListFilters {
    /// Parse `key=value` arguments: `before=REF`, `since=REF`,
    /// `label=KEY` or `label=KEY=VALUE`.
    pub fn parse<T: AsRef<str>>(args: &[T]) -> Result<Self> {
        let mut filters = ListFilters::default();
        for arg in args {
            let arg = arg.as_ref();
            let Some((key, value)) = arg.split_once('=') else {
                return Err(Error::InvalidParameter(format!(
                    "bad filter {arg:?}: expected key=value"
                )));
            };
            match key {
                "before" => filters.before.push(value.to_string()),
                "since" => filters.since.push(value.to_string()),
                "label" => filters.labels.push(match value.split_once('=') {
                    Some((k, v)) => (k.to_string(), Some(v.to_string())),
                    None => (value.to_string(), None),
                }),
                other => {
                    return Err(Error::InvalidParameter(format!(
                        "unsupported filter {other:?}"
                    )))
                }
            }
        }
        Ok(filters)
    }
}

/// Options for [`list_images`].
#[derive(Clone, Debug)]
pub struct ListOptions {
    pub filters: ListFilters,
    /// Also compute [`ImageSummary::shared_size`].
    pub shared_size: bool,
    /// Selects the manifest of multi-platform images.
    pub platform: PlatformMatcher,
}

impl Default for ListOptions {
    fn default() -> Self {
        ListOptions {
            filters: ListFilters::default(),
            shared_size: false,
            platform: PlatformMatcher::default_strict(),
        }
    }
}

/// One row of an image listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageSummary {
    #[serde(rename = "Id")]
    pub id: Digest,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    /// Seconds since the Unix epoch.
    pub created: i64,
    pub labels: BTreeMap<String, String>,
    /// Size of the image's content in the content store.
    pub size: i64,
    pub virtual_size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_size: Option<i64>,
}

fn unix_seconds(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_secs()).unwrap_or(i64::MAX),
    }
}

/// Summaries of the images passing `opts.filters`, with their sizes.
///
/// Shared sizes only consider the images that pass the filters.
pub fn list_images<S, O>(
    resolver: &Resolver<'_, S>,
    oracle: &O,
    opts: &ListOptions,
    cancel: &Cancellation,
) -> Result<Vec<ImageSummary>>
where
    S: ImageIndex + ContentStore + ?Sized,
    O: SnapshotUsage + ?Sized,
{
    let store = resolver.store();
    let before = created_times(resolver, &opts.filters.before)?;
    let since = created_times(resolver, &opts.filters.since)?;

    let mut chains = vec![];
    let mut summaries = vec![];
    for record in store.list(&[])? {
        cancel.check()?;
        if !before.iter().all(|t| record.created_at < *t)
            || !since.iter().all(|t| record.created_at > *t)
            || !has_labels(&record, &opts.filters.labels)
        {
            continue;
        }

        let config = config(store, &record.target, &opts.platform, cancel)?;
        chains.push(chain_ids(&diff_ids(&config)?));
        let size = content_size(store, &record.target, &opts.platform, cancel)?;
        summaries.push(ImageSummary {
            id: record.target.digest.clone(),
            repo_tags: vec![record.name.clone()],
            repo_digests: vec![format!("{}@{}", record.name, record.target.digest)],
            created: unix_seconds(record.created_at),
            labels: record.labels.clone(),
            size,
            virtual_size: 0,
            shared_size: None,
        });
    }

    let usage = account(oracle, &chains, opts.shared_size)?;
    for (summary, usage) in summaries.iter_mut().zip(usage) {
        summary.virtual_size = usage.virtual_size;
        summary.shared_size = usage.shared_size;
    }
    debug!("listed {} images", summaries.len());
    Ok(summaries)
}

fn created_times<S: ImageIndex + ContentStore + ?Sized>(
    resolver: &Resolver<'_, S>,
    references: &[String],
) -> Result<Vec<SystemTime>> {
    references
        .iter()
        .map(|r| Ok(resolver.resolve_image(r, None)?.created_at))
        .collect()
}

fn has_labels(record: &ImageRecord, wanted: &[(String, Option<String>)]) -> bool {
    wanted
        .iter()
        .all(|(key, value)| match (record.labels.get(key), value) {
            (Some(actual), Some(value)) => actual == value,
            (Some(_), None) => true,
            (None, _) => false,
        })
}
