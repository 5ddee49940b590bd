//! Image fixtures shared by the integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};

use imagestore::{
    descriptor::{
        MEDIA_TYPE_OCI_CONFIG, MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_LAYER_GZIP,
        MEDIA_TYPE_OCI_MANIFEST,
    },
    digest::{chain_ids, Digest},
    store::ContentWriter,
    Descriptor,
};

pub struct Image {
    pub platform: (String, String),
    pub manifest: Descriptor,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl Image {
    pub fn diff_ids(&self) -> Vec<Digest> {
        self.layers.iter().map(|l| l.digest.clone()).collect()
    }

    pub fn chain_ids(&self) -> Vec<Digest> {
        chain_ids(&self.diff_ids())
    }

    /// Sum of manifest, config and layer sizes.
    pub fn content_size(&self) -> i64 {
        self.manifest.size + self.config.size + self.layers.iter().map(|l| l.size).sum::<i64>()
    }
}

fn descriptor_json(d: &Descriptor) -> Value {
    json!({ "mediaType": d.media_type, "digest": d.digest.as_str(), "size": d.size })
}

/// Write an image for `os/arch` with uncompressed `layers`. `cmd` only
/// serves to tell apart images that have the same layers.
pub fn image(
    store: &impl ContentWriter,
    os: &str,
    arch: &str,
    layers: &[&str],
    cmd: &str,
) -> Image {
    let layers: Vec<Descriptor> = layers
        .iter()
        .map(|l| store.write_blob(MEDIA_TYPE_OCI_LAYER_GZIP, l.as_bytes()).unwrap())
        .collect();
    let config = json!({
        "architecture": arch,
        "os": os,
        "config": { "Cmd": [cmd] },
        "rootfs": {
            "type": "layers",
            "diff_ids": layers.iter().map(|l| l.digest.as_str()).collect::<Vec<_>>(),
        },
    });
    let config = store
        .write_blob(MEDIA_TYPE_OCI_CONFIG, config.to_string().as_bytes())
        .unwrap();
    let manifest = json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_OCI_MANIFEST,
        "config": descriptor_json(&config),
        "layers": layers.iter().map(descriptor_json).collect::<Vec<_>>(),
    });
    let manifest = store
        .write_blob(MEDIA_TYPE_OCI_MANIFEST, manifest.to_string().as_bytes())
        .unwrap();
    Image {
        platform: (os.to_string(), arch.to_string()),
        manifest,
        config,
        layers,
    }
}

/// Write an index over `images`, declaring each one's platform.
pub fn index(store: &impl ContentWriter, images: &[&Image]) -> Descriptor {
    let manifests: Vec<Value> = images
        .iter()
        .map(|img| {
            let mut d = descriptor_json(&img.manifest);
            d["platform"] = json!({ "os": img.platform.0, "architecture": img.platform.1 });
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

/// A manifest descriptor whose digest starts with `prefix`; the content is
/// never stored.
pub fn fake_manifest(prefix: &str, fill: char) -> Descriptor {
    let hex = format!("{prefix}{}", fill.to_string().repeat(64 - prefix.len()));
    Descriptor::new(MEDIA_TYPE_OCI_MANIFEST, Digest::from_sha256_hex(&hex).unwrap(), 100)
}
