//! Fixtures for unit tests: small single-platform images and indexes.

use serde_json::json;

use crate::{
    descriptor::{
        Descriptor, MEDIA_TYPE_OCI_CONFIG, MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_LAYER_GZIP,
        MEDIA_TYPE_OCI_MANIFEST,
    },
    digest::Digest,
    platform::Platform,
    store::ContentWriter,
};

/// The descriptors of an image written by [`TestImage::new`].
#[derive(Clone, Debug)]
pub(crate) struct TestImage {
    pub manifest: Descriptor,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    pub diff_ids: Vec<Digest>,
    pub platform: Platform,
}

fn json_descriptor(d: &Descriptor) -> serde_json::Value {
    json!({ "mediaType": d.media_type, "digest": d.digest.as_str(), "size": d.size })
}

impl TestImage {
    /// Write config, layers and manifest for an image of `platform`
    /// (`os/arch`). Layers are stored uncompressed, so each layer digest is
    /// also its DiffID.
    pub fn new(store: &impl ContentWriter, platform: &str, layers: &[&str]) -> Self {
        let platform = Platform::parse(platform).unwrap();
        let layers: Vec<Descriptor> = layers
            .iter()
            .map(|l| store.write_blob(MEDIA_TYPE_OCI_LAYER_GZIP, l.as_bytes()).unwrap())
            .collect();
        let diff_ids: Vec<Digest> = layers.iter().map(|l| l.digest.clone()).collect();

        let config = json!({
            "architecture": platform.architecture,
            "os": platform.os,
            "config": { "Cmd": ["/bin/sh"], "Env": ["PATH=/usr/bin"] },
            "rootfs": {
                "type": "layers",
                "diff_ids": diff_ids.iter().map(Digest::as_str).collect::<Vec<_>>(),
            },
        });
        let config = store
            .write_blob(MEDIA_TYPE_OCI_CONFIG, config.to_string().as_bytes())
            .unwrap();

        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_MANIFEST,
            "config": json_descriptor(&config),
            "layers": layers.iter().map(json_descriptor).collect::<Vec<_>>(),
        });
        let manifest = store
            .write_blob(MEDIA_TYPE_OCI_MANIFEST, manifest.to_string().as_bytes())
            .unwrap();

        TestImage {
            manifest,
            config,
            layers,
            diff_ids,
            platform,
        }
    }

    /// Every digest the image consists of: manifest, config, layers.
    pub fn digests(&self) -> Vec<Digest> {
        [&self.manifest, &self.config]
            .into_iter()
            .chain(&self.layers)
            .map(|d| d.digest.clone())
            .collect()
    }

    /// Write an index listing the manifests of `images` with their platforms.
    pub fn index(store: &impl ContentWriter, images: &[&TestImage]) -> Descriptor {
        let manifests: Vec<_> = images
            .iter()
            .map(|img| {
                let mut d = json_descriptor(&img.manifest);
                d["platform"] = json!({
                    "os": img.platform.os,
                    "architecture": img.platform.architecture,
                });
                d
            })
            .collect();
        let index = json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_INDEX,
            "manifests": manifests,
        });
        store
            .write_blob(MEDIA_TYPE_OCI_INDEX, index.to_string().as_bytes())
            .unwrap()
    }
}

/// Write a manifest whose layers declare `sizes` instead of their real
/// lengths. The layer blobs themselves are stored.
pub(crate) fn manifest_with_layer_sizes(store: &impl ContentWriter, sizes: &[i64]) -> Descriptor {
    let config = store
        .write_blob(MEDIA_TYPE_OCI_CONFIG, br#"{"architecture":"amd64","os":"linux"}"#)
        .unwrap();
    let layers: Vec<_> = sizes
        .iter()
        .enumerate()
        .map(|(i, size)| {
            let mut layer = store
                .write_blob(MEDIA_TYPE_OCI_LAYER_GZIP, format!("layer {i}").as_bytes())
                .unwrap();
            layer.size = *size;
            json_descriptor(&layer)
        })
        .collect();
    let manifest = json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_OCI_MANIFEST,
        "config": json_descriptor(&config),
        "layers": layers,
    });
    store
        .write_blob(MEDIA_TYPE_OCI_MANIFEST, manifest.to_string().as_bytes())
        .unwrap()
}
