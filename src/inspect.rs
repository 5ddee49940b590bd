//! Detailed information about one image.

use serde::Serialize;

use crate::{
    cancel::Cancellation,
    digest::Digest,
    error::Result,
    image::{config, content_size, diff_ids},
    platform::{Platform, PlatformMatcher},
    resolve::Resolver,
    store::{ContentStore, Filter, ImageIndex},
    tag::is_dangling,
};

/// Runtime defaults recorded in the image config.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunConfig {
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
    pub user: String,
    pub exposed_ports: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageInspect {
    #[serde(rename = "Id")]
    pub id: Digest,
    /// Every name with this target, dangling placeholders excluded.
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
    pub os: String,
    pub architecture: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub config: RunConfig,
    #[serde(rename = "RootFS")]
    pub root_fs: Vec<Digest>,
    pub size: i64,
}

/// Resolve `reference` and gather what its config and the index say about
/// it. Without a platform, the host platform selects from multi-platform
/// images.
pub fn inspect<S>(
    resolver: &Resolver<'_, S>,
    reference: &str,
    platform: Option<&Platform>,
    cancel: &Cancellation,
) -> Result<ImageInspect>
where
    S: ImageIndex + ContentStore + ?Sized,
{
    let store = resolver.store();
    let record = resolver.resolve_image(reference, platform)?;
    let matcher = match platform {
        Some(p) => PlatformMatcher::only_strict(p.clone()),
        None => PlatformMatcher::default_strict(),
    };

    let image_config = config(store, &record.target, &matcher, cancel)?;
    let run = image_config.config().as_ref().map(|c| RunConfig {
        entrypoint: c.entrypoint().clone().unwrap_or_default(),
        cmd: c.cmd().clone().unwrap_or_default(),
        env: c.env().clone().unwrap_or_default(),
        working_dir: c.working_dir().clone().unwrap_or_default(),
        user: c.user().clone().unwrap_or_default(),
        exposed_ports: c.exposed_ports().clone().unwrap_or_default(),
    });

    let digest = record.target.digest.clone();
    let mut repo_tags = vec![];
    let mut repo_digests = vec![];
    for named in store.list(&[Filter::Digest(digest.clone())])? {
        if is_dangling(&named.name) {
            continue;
        }
        repo_digests.push(format!("{}@{digest}", named.name));
        repo_tags.push(named.name);
    }

    Ok(ImageInspect {
        id: digest,
        repo_tags,
        repo_digests,
        os: image_config.os().to_string(),
        architecture: image_config.architecture().to_string(),
        variant: image_config.variant().clone(),
        config: run.unwrap_or_default(),
        root_fs: diff_ids(&image_config)?,
        size: content_size(store, &record.target, &matcher, cancel)?,
    })
}
