use std::fmt;
use std::pin::Pin;

use futures_util::TryStreamExt;
use log::debug;
use opendrive_core::File;
use time::OffsetDateTime;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::dircache::{normalize_path, split_path};
use crate::encoding::replace_reserved_chars;
use crate::error::{FsError, Result};
use crate::fs::OpenDriveFs;
use crate::upload::ChunkedUpload;

/// Byte stream of a file being downloaded.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashType {
    Md5,
    Sha1,
    Sha256,
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HashType::Md5 => "md5",
            HashType::Sha1 => "sha1",
            HashType::Sha256 => "sha256",
        })
    }
}

/// Describes the source of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub remote: String,
    pub size: u64,
    pub mod_time: OffsetDateTime,
}

impl ObjectInfo {
    pub fn new(remote: impl Into<String>, size: u64, mod_time: OffsetDateTime) -> Self {
        Self {
            remote: remote.into(),
            size,
            mod_time,
        }
    }
}

/// A remote file. `id` is empty until the file exists on the service.
#[derive(Debug, Clone)]
pub struct Object {
    fs: OpenDriveFs,
    remote: String,
    id: String,
    size: u64,
    mod_time: OffsetDateTime,
    md5: String,
}

impl Object {
    pub(crate) fn placeholder(fs: OpenDriveFs, remote: &str) -> Self {
        Self {
            fs,
            remote: normalize_path(remote),
            id: String::new(),
            size: 0,
            mod_time: OffsetDateTime::UNIX_EPOCH,
            md5: String::new(),
        }
    }

    pub(crate) fn from_file(fs: OpenDriveFs, remote: String, file: &File) -> Self {
        Self {
            fs,
            remote,
            id: file.file_id.clone(),
            size: file.size,
            mod_time: unix_time(file.date_modified),
            md5: file.file_hash.clone().unwrap_or_default(),
        }
    }

    pub(crate) fn with_copy_result(
        fs: OpenDriveFs,
        remote: &str,
        id: String,
        size: u64,
        source: &Object,
    ) -> Self {
        Self {
            fs,
            remote: normalize_path(remote),
            id,
            size,
            mod_time: source.mod_time,
            md5: source.md5.clone(),
        }
    }

    pub fn fs(&self) -> &OpenDriveFs {
        &self.fs
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mod_time(&self) -> OffsetDateTime {
        self.mod_time
    }

    pub fn storable(&self) -> bool {
        true
    }

    /// Lowercase hex digest, or an empty string when the service never
    /// reported one.
    pub fn hash(&self, hash_type: HashType) -> Result<String> {
        if hash_type != HashType::Md5 {
            return Err(FsError::HashUnsupported);
        }
        Ok(self.md5.clone())
    }

    /// Refreshes every field from the service.
    pub(crate) async fn read_metadata(&mut self) -> Result<()> {
        let inner = self.fs.inner();
        let absolute = inner.absolute(&self.remote);
        let (leaf, dir_id) = match inner.dir_cache.find_path(inner, &absolute, false).await {
            Ok(found) => found,
            Err(FsError::DirectoryNotFound(_)) => {
                return Err(FsError::ObjectNotFound(self.remote.clone()));
            }
            Err(err) => return Err(err),
        };
        let file = inner
            .file_by_name(&dir_id, &leaf)
            .await?
            .ok_or_else(|| FsError::ObjectNotFound(self.remote.clone()))?;

        self.id = file.file_id;
        self.size = file.size;
        self.mod_time = unix_time(file.date_modified);
        self.md5 = file.file_hash.unwrap_or_default();
        Ok(())
    }

    pub async fn set_mod_time(&mut self, mod_time: OffsetDateTime) -> Result<()> {
        let inner = self.fs.inner();
        let file_id = self.require_id()?;
        let unix_secs = mod_time.unix_timestamp();
        inner
            .pacer
            .call(move || {
                inner
                    .client
                    .set_file_modification_time(&inner.session, file_id, unix_secs)
            })
            .await?;
        self.mod_time = mod_time;
        Ok(())
    }

    pub async fn open(&self) -> Result<ObjectReader> {
        let inner = self.fs.inner();
        let file_id = self.require_id()?;
        debug!("opening {:?} ({file_id})", self.remote);
        let response = inner
            .pacer
            .call(move || inner.client.download_file(&inner.session, file_id))
            .await?;
        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(stream)))
    }

    /// Replaces the content with `info.size` bytes read from `reader`.
    ///
    /// On failure the object is left without an ID so a later attempt starts
    /// from a fresh lookup.
    pub async fn update<R>(&mut self, reader: &mut R, info: &ObjectInfo) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let fs = self.fs.clone();
        let inner = fs.inner();
        if self.id.is_empty() {
            self.id = fs.create_file_entry(&self.remote).await?;
        }
        let (_, leaf) = split_path(&self.remote);
        let file_name = replace_reserved_chars(leaf);

        let upload = ChunkedUpload::new(inner, &self.id, &file_name, info.size);
        match upload.run(reader, info.mod_time.unix_timestamp()).await {
            Ok(uploaded) => {
                self.id = uploaded.file_id;
                self.size = uploaded.size;
                self.md5 = uploaded.md5;
                self.mod_time = info.mod_time;
                Ok(())
            }
            Err(err) => {
                self.id.clear();
                Err(err)
            }
        }
    }

    pub async fn remove(&self) -> Result<()> {
        let inner = self.fs.inner();
        let file_id = self.require_id()?;
        inner
            .pacer
            .call(move || inner.client.delete_file(&inner.session, file_id))
            .await?;
        debug!("removed {:?} ({file_id})", self.remote);
        Ok(())
    }

    fn require_id(&self) -> Result<&str> {
        if self.id.is_empty() {
            return Err(FsError::ObjectNotFound(self.remote.clone()));
        }
        Ok(&self.id)
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.remote)
    }
}

pub(crate) fn unix_time(secs: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(secs).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
