mod common;

use similar_asserts::assert_eq;

use imagestore::{
    cancel::Cancellation,
    digest::Digest,
    memory::MemoryStore,
    resolve::Resolver,
    store::{ImageIndex, ImageRecord},
    usage::{container_layer_size, list_images, ListFilters, ListOptions},
    Error,
};

use common::image;

/// Images a and b share both layers; c has a layer of its own.
fn shared_layers() -> MemoryStore {
    let store = MemoryStore::new();
    let a = image(&store, "linux", "amd64", &["x", "y"], "a");
    let b = image(&store, "linux", "amd64", &["x", "y"], "b");
    let c = image(&store, "linux", "amd64", &["z"], "c");
    assert_ne!(a.manifest, b.manifest);
    assert_eq!(a.chain_ids(), b.chain_ids());

    let [x, y] = [a.chain_ids()[0].clone(), a.chain_ids()[1].clone()];
    store.set_usage(x.as_str(), 10);
    store.set_usage(y.as_str(), 20);
    store.set_usage(c.chain_ids()[0].as_str(), 5);

    for (name, img) in [("a", &a), ("b", &b), ("c", &c)] {
        let name = format!("docker.io/library/{name}:latest");
        store.create(ImageRecord::new(name, img.manifest.clone())).unwrap();
    }
    store
}

#[test]
fn test_virtual_and_shared_size() {
    let store = shared_layers();
    let opts = ListOptions {
        shared_size: true,
        ..Default::default()
    };
    let images = list_images(&Resolver::new(&store), &store, &opts, &Cancellation::new()).unwrap();

    let sizes: Vec<_> = images
        .iter()
        .map(|i| (i.repo_tags[0].as_str(), i.virtual_size, i.shared_size))
        .collect();
    assert_eq!(
        sizes,
        vec![
            ("docker.io/library/a:latest", 30, Some(30)),
            ("docker.io/library/b:latest", 30, Some(30)),
            ("docker.io/library/c:latest", 5, Some(0)),
        ]
    );
    // x, y and z, each asked about once.
    assert_eq!(store.total_usage_calls(), 3);
}

#[test]
fn test_shared_size_is_optional() {
    let store = shared_layers();
    let images = list_images(
        &Resolver::new(&store),
        &store,
        &ListOptions::default(),
        &Cancellation::new(),
    )
    .unwrap();
    assert!(images.iter().all(|i| i.shared_size.is_none()));
    assert_eq!(store.total_usage_calls(), 3);
}

#[test]
fn test_shared_size_only_counts_listed_images() {
    let store = shared_layers();
    let mut record = store.get("docker.io/library/c:latest").unwrap();
    ImageIndex::delete(&store, &record.name).unwrap();
    record.labels.insert("keep".into(), "yes".into());
    store.create(record.clone()).unwrap();
    let mut b = store.get("docker.io/library/b:latest").unwrap();
    ImageIndex::delete(&store, &b.name).unwrap();
    b.labels.insert("keep".into(), "no".into());
    store.create(b).unwrap();

    let opts = ListOptions {
        filters: ListFilters::parse(&["label=keep"]).unwrap(),
        shared_size: true,
        ..Default::default()
    };
    let images = list_images(&Resolver::new(&store), &store, &opts, &Cancellation::new()).unwrap();
    let sizes: Vec<_> = images
        .iter()
        .map(|i| (i.repo_tags[0].as_str(), i.virtual_size, i.shared_size))
        .collect();
    assert_eq!(
        sizes,
        vec![
            ("docker.io/library/b:latest", 30, Some(0)),
            ("docker.io/library/c:latest", 5, Some(0)),
        ]
    );
}

#[test]
fn test_oracle_failure() {
    let store = shared_layers();
    // A single-layer chain ID is the layer's DiffID.
    let z = Digest::from_content(b"z");
    store.fail_usage(z.as_str());

    let err = list_images(
        &Resolver::new(&store),
        &store,
        &ListOptions::default(),
        &Cancellation::new(),
    )
    .unwrap_err();
    match err {
        Error::SizeComputationFailed { key, .. } => assert_eq!(key.as_str(), z.as_str()),
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_container_layer_size() {
    let store = MemoryStore::new();
    let img = image(&store, "linux", "amd64", &["x", "y"], "a");
    for (id, size) in img.chain_ids().iter().zip([10, 20]) {
        store.set_usage(id.as_str(), size);
    }
    store.set_usage("container-rw", 7);

    assert_eq!(
        container_layer_size(&store, "container-rw", &img.diff_ids()).unwrap(),
        (7, 37)
    );
    assert!(container_layer_size(&store, "missing-rw", &img.diff_ids()).is_err());
}

#[test]
fn test_cancelled_listing() {
    let store = shared_layers();
    let cancel = Cancellation::new();
    cancel.cancel();
    let err = list_images(&Resolver::new(&store), &store, &ListOptions::default(), &cancel)
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(store.total_usage_calls(), 0);
}
