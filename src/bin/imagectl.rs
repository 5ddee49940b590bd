use std::{io::Read, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use rustix::fs::CWD;

use imagestore::{
    cancel::Cancellation,
    config::StoreConfig,
    digest::Digest,
    inspect::inspect,
    platform::{Platform, PlatformMatcher},
    prune::{prune, PruneOptions},
    repository::Repository,
    resolve::Resolver,
    store::{ContentWriter, ImageIndex, ImageRecord},
    tag::{tag_image, untag},
    usage::{list_images, ListFilters, ListOptions},
    Descriptor,
};

/// imagectl
#[derive(Debug, Parser)]
#[clap(name = "imagectl", version)]
pub struct App {
    #[clap(long, group = "repopath")]
    repo: Option<PathBuf>,
    #[clap(long, group = "repopath")]
    user: bool,
    #[clap(long, group = "repopath")]
    system: bool,

    /// configuration file to use instead of the default search path
    #[clap(long)]
    config: Option<PathBuf>,
    /// platform (os/arch[/variant]) to select from multi-platform images
    #[clap(long)]
    platform: Option<String>,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Lists images with their sizes, as JSON
    Images {
        /// also compute the size shared with other listed images
        #[clap(long)]
        shared_size: bool,
        /// before=REF, since=REF, label=KEY[=VALUE]
        #[clap(long)]
        filter: Vec<String>,
    },
    /// Shows details about an image, as JSON
    Inspect { reference: String },
    /// Prints the target digest a reference resolves to
    Resolve { reference: String },
    /// Gives an image an additional name
    Tag { source: String, target: String },
    /// Removes an image name
    Untag { reference: String },
    /// Deletes every image and its content
    Prune {
        /// accepted, but not applied
        #[clap(long)]
        filter: Vec<String>,
    },
    /// Stores stdin as a blob and prints its digest and size
    WriteBlob { media_type: String },
    /// Creates an image record pointing at a stored blob
    Create {
        name: String,
        digest: String,
        media_type: String,
        size: i64,
    },
}

fn open_repo(args: &App, config: &StoreConfig) -> Result<Repository> {
    let repo = if let Some(path) = &args.repo {
        Repository::open_path(CWD, path)
    } else if args.system {
        Repository::open_system()
    } else if args.user {
        Repository::open_user()
    } else if let Some(root) = &config.root {
        Repository::open_path(CWD, root)
    } else if rustix::process::getuid().is_root() {
        Repository::open_system()
    } else {
        Repository::open_user()
    };
    Ok(repo?)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let args = App::parse();
    let config = StoreConfig::load(args.config.as_deref()).context("Loading configuration")?;
    let platform = match &args.platform {
        Some(p) => Some(Platform::parse(p)?),
        None => config.platform()?,
    };
    let matcher = match &platform {
        Some(p) => PlatformMatcher::only_strict(p.clone()),
        None => PlatformMatcher::default_strict(),
    };

    let repo = open_repo(&args, &config).context("Opening repository")?;
    let cancel = Cancellation::new();
    let mut resolver = Resolver::new(&repo).with_cancellation(cancel.clone());
    if let Some(tag) = &config.default_tag {
        resolver = resolver.with_default_tag(tag);
    }

    match args.cmd {
        Command::Images {
            shared_size,
            ref filter,
        } => {
            let opts = ListOptions {
                filters: ListFilters::parse(filter)?,
                shared_size,
                platform: matcher,
            };
            print_json(&list_images(&resolver, &repo, &opts, &cancel)?)?;
        }
        Command::Inspect { ref reference } => {
            print_json(&inspect(&resolver, reference, platform.as_ref(), &cancel)?)?;
        }
        Command::Resolve { ref reference } => {
            let target = resolver.resolve(reference, platform.as_ref())?;
            println!("{}", target.digest);
        }
        Command::Tag {
            ref source,
            ref target,
        } => {
            let name = tag_image(&resolver, source, target)?;
            println!("{}", name.familiar());
        }
        Command::Untag { ref reference } => {
            print_json(&untag(&resolver, reference)?)?;
        }
        Command::Prune { ref filter } => {
            let opts = PruneOptions {
                filters: filter.clone(),
                platform: matcher,
            };
            match prune(&repo, &opts, &cancel) {
                Ok(report) => print_json(&report)?,
                Err(e) => {
                    print_json(&e.report)?;
                    return Err(e.error).context("Pruning did not complete");
                }
            }
        }
        Command::WriteBlob { ref media_type } => {
            let mut data = vec![];
            std::io::stdin()
                .read_to_end(&mut data)
                .context("Reading blob from stdin")?;
            let desc = repo.write_blob(media_type, &data)?;
            println!("{} {}", desc.digest, desc.size);
        }
        Command::Create {
            ref name,
            ref digest,
            ref media_type,
            size,
        } => {
            let name = resolver.normalize(name)?;
            let target = Descriptor::new(media_type.as_str(), Digest::parse(digest)?, size);
            let record = repo.create(ImageRecord::new(name.to_string(), target))?;
            println!("{}", record.name);
        }
    }
    Ok(())
}
