//! Turning user-supplied references into exactly one image.
//!
//! A reference is tried, in order, as:
//!
//! 1. a content digest (`sha256:...`, a bare 64 character hex string, or a
//!    name with `@digest`): any image with that target will do;
//! 2. a short ID (`^[a-f0-9]{4,64}$` as typed): either the literal name or a
//!    digest prefix, see [`Resolver::resolve_image`];
//! 3. a name, looked up exactly after normalization.
//!
//! A requested platform must then be provided by the image, but it does not
//! change which image is returned.

use std::collections::HashSet;

use log::{debug, trace};
use regex::Regex;

use crate::{
    cancel::Cancellation,
    descriptor::Descriptor,
    error::{Error, Result},
    image::platforms,
    platform::{Platform, PlatformMatcher},
    reference::{is_short_id, Named, Reference, DEFAULT_TAG},
    store::{ContentStore, Filter, ImageIndex, ImageRecord},
};

/// Resolves references against an image index and its content.
#[derive(Debug)]
pub struct Resolver<'a, S: ?Sized> {
    store: &'a S,
    default_tag: String,
    cancel: Cancellation,
}

impl<'a, S: ImageIndex + ContentStore + ?Sized> Resolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Resolver {
            store,
            default_tag: DEFAULT_TAG.to_string(),
            cancel: Cancellation::new(),
        }
    }

    /// Stop the platform check's traversal once `cancel` is raised.
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Use `tag` for names given without a tag or digest.
    pub fn with_default_tag(mut self, tag: impl Into<String>) -> Self {
        self.default_tag = tag.into();
        self
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    pub fn default_tag(&self) -> &str {
        &self.default_tag
    }

    /// Parse `reference` as a name and apply the default tag.
    pub fn normalize(&self, reference: &str) -> Result<Named> {
        match Reference::parse(reference)? {
            Reference::Named(named) => Ok(named.with_default_tag(&self.default_tag)),
            Reference::Digested(d) => Err(Error::InvalidParameter(format!(
                "{d} is a digest, not a name"
            ))),
        }
    }

    /// The target descriptor of the image `reference` refers to.
    pub fn resolve(&self, reference: &str, platform: Option<&Platform>) -> Result<Descriptor> {
        Ok(self.resolve_image(reference, platform)?.target)
    }

    /// The image record `reference` refers to.
    ///
    /// When the reference looks like a short ID, both the literal name and
    /// every image whose digest starts with it are candidates. An image with
    /// exactly the normalized name always wins. Otherwise the candidates must
    /// all share one target digest; if they don't, the reference is
    /// [`Error::Ambiguous`].
    pub fn resolve_image(
        &self,
        reference: &str,
        platform: Option<&Platform>,
    ) -> Result<ImageRecord> {
        let record = match Reference::parse(reference)? {
            Reference::Digested(digest) => {
                self.first_with_digest(reference, Filter::Digest(digest))?
            }
            Reference::Named(named) => match named.digest() {
                Some(digest) => {
                    self.first_with_digest(reference, Filter::Digest(digest.clone()))?
                }
                None => {
                    let canon = named.with_default_tag(&self.default_tag).to_string();
                    if is_short_id(reference) {
                        self.resolve_short_id(reference, &canon)?
                    } else {
                        self.store.get(&canon).map_err(|e| match e {
                            Error::NotFound(_) => not_found(reference),
                            other => other,
                        })?
                    }
                }
            },
        };
        debug!("{reference} resolved to {} ({})", record.name, record.target.digest);

        if let Some(wanted) = platform {
            self.check_platform(reference, &record, wanted)?;
        }
        Ok(record)
    }

    fn first_with_digest(&self, reference: &str, filter: Filter) -> Result<ImageRecord> {
        self.store
            .list(&[filter])?
            .into_iter()
            .next()
            .ok_or_else(|| not_found(reference))
    }

    fn resolve_short_id(&self, id: &str, canon: &str) -> Result<ImageRecord> {
        let pattern = format!(
            "^sha256:{}[0-9a-fA-F]{{{}}}$",
            regex::escape(id),
            64 - id.len()
        );
        let prefix = Regex::new(&pattern)
            .map_err(|e| Error::InvalidParameter(format!("short id {id:?}: {e}")))?;
        let filters = [Filter::Name(canon.to_string()), Filter::DigestMatches(prefix)];

        let mut candidates = self.store.list(&filters)?;
        trace!("short id {id} has {} candidates", candidates.len());
        if candidates.len() > 1 {
            if let Some(pos) = candidates.iter().position(|r| r.name == canon) {
                return Ok(candidates.swap_remove(pos));
            }
            let digests: HashSet<_> = candidates.iter().map(|r| &r.target.digest).collect();
            if digests.len() > 1 {
                return Err(Error::Ambiguous(format!(
                    "{id:?} matches {} images with different content",
                    digests.len()
                )));
            }
        }
        candidates.into_iter().next().ok_or_else(|| not_found(id))
    }

    fn check_platform(
        &self,
        reference: &str,
        record: &ImageRecord,
        wanted: &Platform,
    ) -> Result<()> {
        let matcher = PlatformMatcher::only_strict(wanted.clone());
        if platforms(self.store, &record.target, &self.cancel)?
            .iter()
            .any(|p| matcher.matches(p))
        {
            return Ok(());
        }
        Err(Error::NotFound(format!(
            "{reference}: platform {wanted} not supported by image"
        )))
    }
}

fn not_found(reference: &str) -> Error {
    Error::NotFound(format!("no such image: {reference}"))
}
