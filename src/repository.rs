//! An image store kept in a directory.
//!
//! # Repository Layout
//!
//! ```text
//! repository/
//! ├── blobs/                      # Content store
//! │   └── sha256/
//! │       ├── 4e/                 # First byte of the digest (hex)
//! │       │   └── 67eaccd9fd...   # Remaining digest characters
//! │       └── ...
//! ├── images/                     # Image index, one JSON record per name
//! │   ├── docker.io%2Flibrary%2Fubuntu:latest
//! │   └── moby-dangling@sha256:...
//! └── snapshots/                  # Materialized layer stacks
//!     ├── sha256:<chain id>/      # usage = sum of regular file sizes
//!     └── <container key>/
//! ```
//!
//! Image names are stored with `%` and `/` percent-encoded (and a leading
//! `.`), so every name is a single directory entry. Files are written under
//! a temporary name and moved into place; creating an image record links it
//! into place, which fails if the name is already taken.
//!
//! All access is relative to the repository's directory file descriptor.
//! Opening a repository takes a shared `flock()` on it for as long as the
//! [`Repository`] lives.

use std::{
    ffi::CStr,
    fs::File,
    io::{Read, Write},
    os::fd::{AsFd, OwnedFd},
    path::{Path, PathBuf},
};

use log::{debug, trace};
use rustix::{
    fs::{
        flock, linkat, mkdirat, openat, renameat, statat, unlinkat, AtFlags, Dir, FileType,
        FlockOperation, Mode, OFlags, CWD,
    },
    io::{Errno, Result as ErrnoResult},
};

use crate::{
    descriptor::Descriptor,
    digest::Digest,
    error::{Error, Result},
    store::{
        matches_any, ContentStore, ContentWriter, Filter, ImageIndex, ImageRecord, SnapshotUsage,
    },
};

const BLOBS: &str = "blobs";
const IMAGES: &str = "images";
const SNAPSHOTS: &str = "snapshots";

/// Default location of the system repository.
pub const SYSTEM_REPOSITORY: &str = "/var/lib/imagestore";
/// Location of the user repository, relative to `$HOME`.
pub const USER_REPOSITORY: &str = ".var/lib/imagestore";

trait ErrnoFilter<T> {
    fn filter_errno(self, ignored: Errno) -> ErrnoResult<Option<T>>;
}

impl<T> ErrnoFilter<T> for ErrnoResult<T> {
    fn filter_errno(self, ignored: Errno) -> ErrnoResult<Option<T>> {
        match self {
            Ok(result) => Ok(Some(result)),
            Err(err) if err == ignored => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Call openat() on the named subdirectory of "dirfd", possibly creating it first.
///
/// We assume that the directory will probably exist (ie: we try the open first), and on ENOENT, we
/// mkdirat() and retry.
fn ensure_dir_and_openat(dirfd: impl AsFd, name: impl AsRef<Path>) -> ErrnoResult<OwnedFd> {
    let name = name.as_ref();
    let flags = OFlags::RDONLY | OFlags::CLOEXEC | OFlags::DIRECTORY;
    match openat(&dirfd, name, flags, Mode::empty()) {
        Ok(fd) => Ok(fd),
        Err(Errno::NOENT) => match mkdirat(&dirfd, name, 0o755.into()) {
            Ok(()) | Err(Errno::EXIST) => openat(dirfd, name, flags, Mode::empty()),
            Err(other) => Err(other),
        },
        Err(other) => Err(other),
    }
}

fn encode_name(name: &str) -> String {
    let encoded = name.replace('%', "%25").replace('/', "%2F");
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{rest}"),
        None => encoded,
    }
}

/// Single-pass percent decoding, so that `%252F` becomes `%2F` (not `/`).
fn decode_name(encoded: &str) -> String {
    let mut result = String::with_capacity(encoded.len());
    let mut chars = encoded.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            match hex.as_str() {
                "2F" => result.push('/'),
                "25" => result.push('%'),
                "2E" => result.push('.'),
                _ => {
                    result.push('%');
                    result.push_str(&hex);
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn tmpname(name: &str) -> String {
    format!(".tmp-{}-{name}", std::process::id())
}

fn entry_name(name: &CStr) -> Result<&str> {
    name.to_str()
        .map_err(|_| Error::CorruptMetadata(format!("non-UTF-8 entry {name:?}")))
}

/// Blobs, image records and snapshots stored in one directory.
#[derive(Debug)]
pub struct Repository {
    repository: OwnedFd,
}

impl Drop for Repository {
    fn drop(&mut self) {
        // Closing the fd drops the lock as well.
        let _ = flock(&self.repository, FlockOperation::Unlock);
    }
}

impl Repository {
    /// Open (creating the directory if needed) a repository at `path`.
    pub fn open_path(dirfd: impl AsFd, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let repository = ensure_dir_and_openat(dirfd, path).map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::Error::from(e).kind(),
                format!("cannot open repository at {}: {e}", path.display()),
            ))
        })?;
        flock(&repository, FlockOperation::LockShared)?;
        debug!("opened repository at {}", path.display());
        Ok(Self { repository })
    }

    /// Open the default user-owned repository.
    pub fn open_user() -> Result<Self> {
        let home = std::env::var("HOME").map_err(|_| {
            Error::InvalidParameter("$HOME must be set when in user mode".to_string())
        })?;
        let path = PathBuf::from(home).join(USER_REPOSITORY);
        std::fs::create_dir_all(&path)?;
        Self::open_path(CWD, path)
    }

    /// Open the default system-global repository.
    pub fn open_system() -> Result<Self> {
        Self::open_path(CWD, SYSTEM_REPOSITORY)
    }

    fn subdir(&self, name: &str) -> ErrnoResult<OwnedFd> {
        ensure_dir_and_openat(&self.repository, name)
    }

    fn blob_dir(&self, digest: &Digest, create: bool) -> ErrnoResult<Option<(OwnedFd, String)>> {
        let encoded = digest.encoded();
        let (first, rest) = encoded.split_at(2);
        let parent = format!("{BLOBS}/{}/{first}", digest.algorithm());
        let fd = if create {
            let blobs = self.subdir(BLOBS)?;
            let alg = ensure_dir_and_openat(&blobs, digest.algorithm())?;
            Some(ensure_dir_and_openat(&alg, first)?)
        } else {
            openat(
                &self.repository,
                parent.as_str(),
                OFlags::RDONLY | OFlags::CLOEXEC | OFlags::DIRECTORY,
                Mode::empty(),
            )
            .filter_errno(Errno::NOENT)?
        };
        Ok(fd.map(|fd| (fd, rest.to_string())))
    }

    fn not_found(digest: &Digest) -> Error {
        Error::NotFound(format!("content {digest}"))
    }

    /// Write `data` to `dirfd/name` via a temporary file.
    fn write_file(dirfd: &OwnedFd, name: &str, data: &[u8]) -> Result<String> {
        let tmp = tmpname(name);
        let fd = openat(
            dirfd,
            tmp.as_str(),
            OFlags::WRONLY | OFlags::CREATE | OFlags::TRUNC | OFlags::CLOEXEC,
            0o644.into(),
        )?;
        let mut file = File::from(fd);
        file.write_all(data)?;
        Ok(tmp)
    }

    fn read_record(images: &OwnedFd, encoded: &str) -> Result<Option<ImageRecord>> {
        let Some(fd) = openat(
            images,
            encoded,
            OFlags::RDONLY | OFlags::CLOEXEC,
            Mode::empty(),
        )
        .filter_errno(Errno::NOENT)?
        else {
            return Ok(None);
        };
        let record: ImageRecord = serde_json::from_reader(File::from(fd)).map_err(|e| {
            Error::CorruptMetadata(format!("image record {}: {e}", decode_name(encoded)))
        })?;
        Ok(Some(record))
    }

    fn dir_usage(dirfd: &OwnedFd) -> Result<i64> {
        let mut total = 0;
        for item in Dir::read_from(dirfd)? {
            let entry = item?;
            let name = entry.file_name();
            if name == c"." || name == c".." {
                continue;
            }
            let stat = statat(dirfd, name, AtFlags::SYMLINK_NOFOLLOW)?;
            match FileType::from_raw_mode(stat.st_mode) {
                FileType::RegularFile => total += i64::from(stat.st_size),
                FileType::Directory => {
                    let child = openat(
                        dirfd,
                        name,
                        OFlags::RDONLY | OFlags::CLOEXEC | OFlags::DIRECTORY | OFlags::NOFOLLOW,
                        Mode::empty(),
                    )?;
                    total += Self::dir_usage(&child)?;
                }
                _ => {}
            }
        }
        Ok(total)
    }
}

impl ContentStore for Repository {
    fn info(&self, digest: &Digest) -> Result<i64> {
        let Some((dir, name)) = self.blob_dir(digest, false)? else {
            return Err(Self::not_found(digest));
        };
        match statat(&dir, name.as_str(), AtFlags::empty()).filter_errno(Errno::NOENT)? {
            Some(stat) => Ok(i64::from(stat.st_size)),
            None => Err(Self::not_found(digest)),
        }
    }

    fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        let Some((dir, name)) = self.blob_dir(digest, false)? else {
            return Err(Self::not_found(digest));
        };
        let Some(fd) = openat(&dir, name.as_str(), OFlags::RDONLY | OFlags::CLOEXEC, Mode::empty())
            .filter_errno(Errno::NOENT)?
        else {
            return Err(Self::not_found(digest));
        };
        let mut data = vec![];
        File::from(fd).read_to_end(&mut data)?;
        Ok(data)
    }

    fn delete(&self, digest: &Digest) -> Result<()> {
        let Some((dir, name)) = self.blob_dir(digest, false)? else {
            return Err(Self::not_found(digest));
        };
        match unlinkat(&dir, name.as_str(), AtFlags::empty()).filter_errno(Errno::NOENT)? {
            Some(()) => {
                trace!("removed blob {digest}");
                Ok(())
            }
            None => Err(Self::not_found(digest)),
        }
    }
}

impl ContentWriter for Repository {
    fn write_blob(&self, media_type: &str, data: &[u8]) -> Result<Descriptor> {
        let digest = Digest::from_content(data);
        let size = i64::try_from(data.len())
            .map_err(|_| Error::InvalidParameter(format!("blob of {} bytes", data.len())))?;
        let Some((dir, name)) = self.blob_dir(&digest, true)? else {
            return Err(Self::not_found(&digest));
        };

        // the usual case for shared layers is that the blob already exists
        if statat(&dir, name.as_str(), AtFlags::empty())
            .filter_errno(Errno::NOENT)?
            .is_none()
        {
            let tmp = Self::write_file(&dir, &name, data)?;
            renameat(&dir, tmp.as_str(), &dir, name.as_str())?;
            debug!("stored blob {digest} ({size} bytes)");
        }
        Ok(Descriptor::new(media_type, digest, size))
    }
}

impl ImageIndex for Repository {
    fn list(&self, filters: &[Filter]) -> Result<Vec<ImageRecord>> {
        let images = self.subdir(IMAGES)?;
        let mut records = vec![];
        for item in Dir::read_from(&images)? {
            let entry = item?;
            let encoded = entry_name(entry.file_name())?;
            // temporary files and . / ..
            if encoded.starts_with('.') {
                continue;
            }
            if let Some(record) = Self::read_record(&images, encoded)? {
                if matches_any(filters, &record) {
                    records.push(record);
                }
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    fn get(&self, name: &str) -> Result<ImageRecord> {
        let images = self.subdir(IMAGES)?;
        Self::read_record(&images, &encode_name(name))?
            .ok_or_else(|| Error::NotFound(format!("image {name:?}")))
    }

    fn create(&self, record: ImageRecord) -> Result<ImageRecord> {
        let images = self.subdir(IMAGES)?;
        let encoded = encode_name(&record.name);
        let tmp = Self::write_file(&images, &encoded, &serde_json::to_vec_pretty(&record)?)?;
        let linked = linkat(&images, tmp.as_str(), &images, encoded.as_str(), AtFlags::empty());
        unlinkat(&images, tmp.as_str(), AtFlags::empty())?;
        match linked {
            Ok(()) => {
                debug!("created image {}", record.name);
                Ok(record)
            }
            Err(Errno::EXIST) => Err(Error::AlreadyExists(format!("image {:?}", record.name))),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, name: &str) -> Result<()> {
        let images = self.subdir(IMAGES)?;
        match unlinkat(&images, encode_name(name).as_str(), AtFlags::empty())
            .filter_errno(Errno::NOENT)?
        {
            Some(()) => {
                debug!("deleted image {name}");
                Ok(())
            }
            None => Err(Error::NotFound(format!("image {name:?}"))),
        }
    }
}

impl SnapshotUsage for Repository {
    fn usage(&self, key: &str) -> Result<i64> {
        if key.is_empty() || key.contains('/') || key.starts_with('.') {
            return Err(Error::InvalidParameter(format!("invalid snapshot key {key:?}")));
        }
        let snapshots = self.subdir(SNAPSHOTS)?;
        let Some(dir) = openat(
            &snapshots,
            key,
            OFlags::RDONLY | OFlags::CLOEXEC | OFlags::DIRECTORY,
            Mode::empty(),
        )
        .filter_errno(Errno::NOENT)?
        else {
            return Err(Error::NotFound(format!("snapshot {key}")));
        };
        Self::dir_usage(&dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::MEDIA_TYPE_OCI_LAYER_GZIP;
    use tempfile::TempDir;

    fn open() -> (TempDir, Repository) {
        let tmp = tempfile::Builder::new()
            .prefix("imagestore-test-")
            .tempdir()
            .unwrap();
        let repo = Repository::open_path(CWD, tmp.path().join("repo")).unwrap();
        (tmp, repo)
    }

    #[test]
    fn test_name_encoding() {
        for name in [
            "docker.io/library/ubuntu:latest",
            "moby-dangling@sha256:abcd",
            "100%/sure",
            "%2F",
            ".hidden",
        ] {
            let encoded = encode_name(name);
            assert!(!encoded.contains('/'), "{encoded}");
            assert!(!encoded.starts_with('.'), "{encoded}");
            assert_eq!(decode_name(&encoded), name);
        }
    }

    #[test]
    fn test_blobs() {
        let (tmp, repo) = open();
        let desc = repo.write_blob(MEDIA_TYPE_OCI_LAYER_GZIP, b"layer data").unwrap();
        let hex = desc.digest.encoded();
        assert!(tmp
            .path()
            .join(format!("repo/blobs/sha256/{}/{}", &hex[..2], &hex[2..]))
            .is_file());

        // writing again is a no-op
        assert_eq!(repo.write_blob(MEDIA_TYPE_OCI_LAYER_GZIP, b"layer data").unwrap(), desc);
        assert_eq!(repo.info(&desc.digest).unwrap(), 10);
        assert_eq!(repo.read_blob(&desc.digest).unwrap(), b"layer data");

        ContentStore::delete(&repo, &desc.digest).unwrap();
        assert!(repo.read_blob(&desc.digest).unwrap_err().is_not_found());
        assert!(ContentStore::delete(&repo, &desc.digest).unwrap_err().is_not_found());
    }

    #[test]
    fn test_images() {
        let (_tmp, repo) = open();
        let desc = repo.write_blob(MEDIA_TYPE_OCI_LAYER_GZIP, b"x").unwrap();
        let mut record = ImageRecord::new("docker.io/library/b:latest", desc.clone());
        record.labels.insert("k".into(), "v".into());
        repo.create(record.clone()).unwrap();
        repo.create(ImageRecord::new("docker.io/library/a:latest", desc.clone())).unwrap();

        assert!(repo.create(record.clone()).unwrap_err().is_already_exists());
        assert_eq!(repo.get(&record.name).unwrap(), record);

        let names: Vec<_> = repo.list(&[]).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["docker.io/library/a:latest", "docker.io/library/b:latest"]);
        let labelled = repo
            .list(&[Filter::Label { key: "k".into(), value: None }])
            .unwrap();
        assert_eq!(labelled, [record.clone()]);

        ImageIndex::delete(&repo, &record.name).unwrap();
        assert!(repo.get(&record.name).unwrap_err().is_not_found());
        assert!(ImageIndex::delete(&repo, &record.name).unwrap_err().is_not_found());
    }

    #[test]
    fn test_snapshot_usage() {
        let (tmp, repo) = open();
        let snap = tmp.path().join("repo/snapshots/sha256:1234");
        std::fs::create_dir_all(snap.join("usr/bin")).unwrap();
        std::fs::write(snap.join("usr/bin/tool"), vec![0u8; 100]).unwrap();
        std::fs::write(snap.join("etc"), vec![0u8; 20]).unwrap();

        assert_eq!(repo.usage("sha256:1234").unwrap(), 120);
        assert!(repo.usage("sha256:5678").unwrap_err().is_not_found());
        assert!(repo.usage("../etc").unwrap_err().is_invalid_parameter());
    }
}
