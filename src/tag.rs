//! Adding and removing image names.
//!
//! Content that lost its last name may be kept alive by a placeholder record
//! called `moby-dangling@<digest>`. Tagging the content again makes the
//! placeholder redundant, so it is removed.

use log::{info, warn};

use crate::{
    digest::Digest,
    error::{Error, Result},
    prune::DeleteItem,
    reference::{Named, Reference},
    resolve::Resolver,
    store::{ContentStore, ImageIndex, ImageRecord},
};

const DANGLING_PREFIX: &str = "moby-dangling@";

/// Name of the placeholder record for untagged content.
pub fn dangling_name(digest: &Digest) -> String {
    format!("{DANGLING_PREFIX}{digest}")
}

pub fn is_dangling(name: &str) -> bool {
    name.starts_with(DANGLING_PREFIX)
}

/// Give the image `source` refers to the additional name `new_tag`.
///
/// An existing image called `new_tag` is replaced, unless it already has the
/// same target, in which case nothing changes. Returns the normalized new
/// name.
pub fn tag_image<S>(resolver: &Resolver<'_, S>, source: &str, new_tag: &str) -> Result<Named>
where
    S: ImageIndex + ContentStore + ?Sized,
{
    let store = resolver.store();
    let image = resolver.resolve_image(source, None)?;
    let name = resolver.normalize(new_tag)?;
    if name.digest().is_some() {
        return Err(Error::InvalidParameter(format!(
            "cannot tag with a digest reference: {new_tag}"
        )));
    }

    let record = ImageRecord::new(name.to_string(), image.target.clone());
    match store.create(record.clone()) {
        Ok(_) => {}
        Err(Error::AlreadyExists(_)) => {
            let replaced = store.get(&record.name)?;
            if replaced.target.digest == record.target.digest {
                return Ok(name);
            }
            ImageIndex::delete(store, &replaced.name)?;
            store.create(record)?;
        }
        Err(e) => return Err(e),
    }
    info!("tagged {} as {name}", image.target.digest);

    let dangling = dangling_name(&image.target.digest);
    match store.get(&dangling) {
        Ok(_) => {
            if let Err(e) = ImageIndex::delete(store, &dangling) {
                warn!("failed to remove {dangling}: {e}");
            }
        }
        Err(Error::NotFound(_)) => {}
        Err(e) => warn!("failed to look up {dangling}: {e}"),
    }
    Ok(name)
}

/// Remove the name `reference` (the default tag applies) from the index.
pub fn untag<S>(resolver: &Resolver<'_, S>, reference: &str) -> Result<DeleteItem>
where
    S: ImageIndex + ContentStore + ?Sized,
{
    let Reference::Named(parsed) = Reference::parse(reference)? else {
        return Err(Error::InvalidParameter(format!(
            "{reference} is a digest, not a name"
        )));
    };
    let name = parsed.clone().with_default_tag(resolver.default_tag());
    ImageIndex::delete(resolver.store(), &name.to_string())?;
    info!("untagged {name}");
    Ok(DeleteItem::Untagged(parsed.familiar()))
}
