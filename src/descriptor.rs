//! Content descriptors and the kinds of node they point at.

use serde::{Deserialize, Serialize};

use crate::{
    digest::Digest,
    error::{Error, Result},
    platform::Platform,
};

pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const MEDIA_TYPE_OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";

/// What a descriptor points at, as far as graph traversal is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorKind {
    /// A manifest list / image index: children are per-platform manifests.
    Index,
    /// An image manifest: children are the config and the layers.
    Manifest,
    /// An image config blob.
    Config,
    /// Any other blob, including layers; never has children.
    Layer,
}

impl DescriptorKind {
    pub fn from_media_type(media_type: &str) -> Self {
        match media_type {
            MEDIA_TYPE_OCI_INDEX | MEDIA_TYPE_DOCKER_MANIFEST_LIST => DescriptorKind::Index,
            MEDIA_TYPE_OCI_MANIFEST | MEDIA_TYPE_DOCKER_MANIFEST => DescriptorKind::Manifest,
            MEDIA_TYPE_OCI_CONFIG | MEDIA_TYPE_DOCKER_CONFIG => DescriptorKind::Config,
            _ => DescriptorKind::Layer,
        }
    }

    /// Index or manifest.
    pub fn is_manifest_like(self) -> bool {
        matches!(self, DescriptorKind::Index | DescriptorKind::Manifest)
    }
}

/// Identifies one node of a manifest graph: digest, media type and size.
///
/// The size is signed because it is carried through from untrusted metadata;
/// traversal rejects negative values as corrupt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: Digest, size: i64) -> Self {
        Descriptor {
            media_type: media_type.into(),
            digest,
            size,
            platform: None,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn kind(&self) -> DescriptorKind {
        DescriptorKind::from_media_type(&self.media_type)
    }
}

impl TryFrom<&oci_spec::image::Descriptor> for Descriptor {
    type Error = Error;

    fn try_from(d: &oci_spec::image::Descriptor) -> Result<Self> {
        let digest = Digest::parse(&d.digest().to_string())
            .map_err(|e| Error::CorruptMetadata(format!("descriptor digest: {e}")))?;
        let size = i64::try_from(d.size()).map_err(|_| {
            Error::CorruptMetadata(format!("invalid size {} in {digest}", d.size()))
        })?;
        Ok(Descriptor {
            media_type: d.media_type().to_string(),
            digest,
            size,
            platform: d.platform().as_ref().map(Platform::from),
        })
    }
}
