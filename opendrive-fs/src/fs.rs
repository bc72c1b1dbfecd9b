use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use opendrive_core::{File, FolderList, OpenDriveClient, ROOT_FOLDER_ID, Session};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::config::RemoteConfig;
use crate::dircache::{DirCache, DirCacher, join_path, normalize_path, split_path};
use crate::encoding::{replace_reserved_chars, restore_reserved_chars};
use crate::error::{FsError, Result};
use crate::list::{DirEntry, Lister};
use crate::object::{HashType, Object, ObjectInfo};
use crate::pacer::Pacer;

/// Shared state behind every handle to one configured remote.
pub(crate) struct FsInner {
    pub(crate) name: String,
    pub(crate) root: String,
    pub(crate) client: OpenDriveClient,
    pub(crate) session: Session,
    pub(crate) pacer: Pacer,
    pub(crate) dir_cache: DirCache,
    pub(crate) chunk_size: usize,
}

impl FsInner {
    /// Path of `remote` from the top of the account.
    pub(crate) fn absolute(&self, remote: &str) -> String {
        join_path(&self.root, &normalize_path(remote))
    }

    pub(crate) async fn list_folder(&self, folder_id: &str) -> Result<FolderList> {
        self.pacer
            .call(move || self.client.list_folder(&self.session, folder_id))
            .await
    }

    /// Looks up the file called `leaf` (unescaped) directly inside `folder_id`.
    pub(crate) async fn file_by_name(&self, folder_id: &str, leaf: &str) -> Result<Option<File>> {
        let name = replace_reserved_chars(leaf);
        let name = name.as_str();
        let listing = self
            .pacer
            .call(move || self.client.item_by_name(&self.session, folder_id, name))
            .await?;
        Ok(listing.files.into_iter().next())
    }
}

#[async_trait]
impl DirCacher for FsInner {
    async fn find_leaf(&self, parent_id: &str, leaf: &str) -> Result<Option<String>> {
        if leaf.is_empty() && parent_id == self.dir_cache.root_id() {
            return Ok(Some(parent_id.to_string()));
        }
        let listing = self.list_folder(parent_id).await?;
        Ok(listing
            .folders
            .into_iter()
            .find(|folder| restore_reserved_chars(&folder.name) == leaf)
            .map(|folder| folder.folder_id))
    }

    async fn create_dir(&self, parent_id: &str, leaf: &str) -> Result<String> {
        let name = replace_reserved_chars(leaf);
        let name = name.as_str();
        let created = self
            .pacer
            .call(move || self.client.create_folder(&self.session, parent_id, name))
            .await?;
        Ok(created.folder_id)
    }
}

/// A path-addressed view of one OpenDrive account, rooted at a folder.
///
/// Clones share the session, pacer and directory cache.
#[derive(Clone)]
pub struct OpenDriveFs {
    inner: Arc<FsInner>,
}

impl fmt::Debug for OpenDriveFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenDriveFs")
            .field("name", &self.inner.name)
            .field("root", &self.inner.root)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for OpenDriveFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.inner.name, self.inner.root)
    }
}

impl OpenDriveFs {
    /// Logs in and checks the configured root.
    ///
    /// Returns [`FsError::IsFile`] when the root names an existing file; the
    /// caller can reopen the remote at `parent_root` and address `leaf`.
    pub async fn new(config: RemoteConfig) -> Result<Self> {
        let client = OpenDriveClient::with_base_url(&config.endpoint)?;
        let pacer = Pacer::new(config.pacer.clone());
        let session = {
            let client = &client;
            let username = config.username.as_str();
            let password = config.password.as_str();
            pacer
                .call(move || client.login(username, password))
                .await?
        };
        debug!("session {} for {}", session.id(), config.username);
        Self::assemble(config, client, pacer, session).await
    }

    /// Builds the adapter around an already established session.
    pub async fn with_session(config: RemoteConfig, session: Session) -> Result<Self> {
        let client = OpenDriveClient::with_base_url(&config.endpoint)?;
        let pacer = Pacer::new(config.pacer.clone());
        Self::assemble(config, client, pacer, session).await
    }

    async fn assemble(
        config: RemoteConfig,
        client: OpenDriveClient,
        pacer: Pacer,
        session: Session,
    ) -> Result<Self> {
        let fs = Self {
            inner: Arc::new(FsInner {
                name: config.name,
                root: normalize_path(&config.root),
                client,
                session,
                pacer,
                dir_cache: DirCache::new(ROOT_FOLDER_ID),
                chunk_size: config.chunk_size,
            }),
        };
        fs.check_root().await?;
        Ok(fs)
    }

    async fn check_root(&self) -> Result<()> {
        let inner = self.inner();
        if inner.root.is_empty() {
            return Ok(());
        }
        match inner.dir_cache.find_dir(inner, &inner.root, false).await {
            Ok(_) => return Ok(()),
            Err(FsError::DirectoryNotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let (parent_root, leaf) = split_path(&inner.root);
        let parent_id = match inner.dir_cache.find_dir(inner, parent_root, false).await {
            Ok(id) => id,
            Err(FsError::DirectoryNotFound(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        match inner.file_by_name(&parent_id, leaf).await? {
            Some(_) => Err(FsError::IsFile {
                parent_root: parent_root.to_string(),
                leaf: leaf.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn inner(&self) -> &FsInner {
        &self.inner
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn root(&self) -> &str {
        &self.inner.root
    }

    pub fn hashes(&self) -> &'static [HashType] {
        &[HashType::Md5]
    }

    /// Modification times are stored with whole-second resolution.
    pub fn precision(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// Cancelling this token aborts every call in flight on this remote.
    pub fn cancel_token(&self) -> &CancellationToken {
        self.inner.pacer.cancel_token()
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub async fn mkdir(&self, dir: &str) -> Result<()> {
        let inner = self.inner();
        let absolute = inner.absolute(dir);
        let id = inner.dir_cache.find_dir(inner, &absolute, true).await?;
        debug!("mkdir {absolute:?} -> {id}");
        Ok(())
    }

    /// Removes an empty directory.
    pub async fn rmdir(&self, dir: &str) -> Result<()> {
        self.remove_dir(dir, true).await
    }

    /// Removes a directory and everything below it.
    pub async fn purge(&self, dir: &str) -> Result<()> {
        self.remove_dir(dir, false).await
    }

    async fn remove_dir(&self, dir: &str, only_if_empty: bool) -> Result<()> {
        let inner = self.inner();
        let absolute = inner.absolute(dir);
        if absolute.is_empty() {
            return Err(FsError::CantPurgeRoot);
        }
        let dir_id = inner.dir_cache.find_dir(inner, &absolute, false).await?;
        if only_if_empty {
            let listing = inner.list_folder(&dir_id).await?;
            if !listing.is_empty() {
                return Err(FsError::Conflict(format!("directory not empty: {absolute}")));
            }
        }

        let folder_id = dir_id.as_str();
        inner
            .pacer
            .call(move || inner.client.remove_folder(&inner.session, folder_id))
            .await?;
        inner.dir_cache.flush(&absolute);
        info!("removed folder {absolute:?}");
        Ok(())
    }

    /// Walks `dir` breadth first. `max_depth` of `Some(1)` lists only the
    /// immediate children; `None` walks the whole subtree. `Some(0)` is
    /// rejected with [`FsError::ZeroDepth`].
    pub async fn list(&self, dir: &str, max_depth: Option<usize>) -> Result<Lister> {
        if max_depth == Some(0) {
            return Err(FsError::ZeroDepth);
        }
        let inner = self.inner();
        let dir = normalize_path(dir);
        let dir_id = inner
            .dir_cache
            .find_dir(inner, &inner.absolute(&dir), false)
            .await?;
        Ok(Lister::new(self.clone(), dir_id, dir, max_depth))
    }

    pub async fn list_dir(&self, dir: &str) -> Result<Vec<DirEntry>> {
        self.list(dir, Some(1)).await?.collect().await
    }

    pub async fn new_object(&self, remote: &str) -> Result<Object> {
        let mut object = Object::placeholder(self.clone(), remote);
        object.read_metadata().await?;
        Ok(object)
    }

    /// Uploads `info.size` bytes from `reader` to `info.remote`, replacing any
    /// file already there.
    pub async fn put<R>(&self, reader: &mut R, info: &ObjectInfo) -> Result<Object>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut object = match self.new_object(&info.remote).await {
            Ok(existing) => existing,
            Err(FsError::ObjectNotFound(_)) => Object::placeholder(self.clone(), &info.remote),
            Err(err) => return Err(err),
        };
        object.update(reader, info).await?;
        Ok(object)
    }

    /// Copies `src` to `remote` on the service side.
    ///
    /// The service keeps the source's file name on copy, so a copy that also
    /// renames is streamed through this process instead.
    pub async fn copy(&self, src: &Object, remote: &str) -> Result<Object> {
        let src_path = src.fs().inner().absolute(src.remote());
        let dst_path = self.inner().absolute(remote);
        if src_path.to_lowercase() == dst_path.to_lowercase() {
            return Err(FsError::Conflict(format!(
                "can't copy {src_path:?} -> {dst_path:?}: same name when lowercase"
            )));
        }

        let mut src = src.clone();
        if src.id().is_empty() {
            src.read_metadata().await?;
        }

        let inner = self.inner();
        let (leaf, dir_id) = inner.dir_cache.find_path(inner, &dst_path, true).await?;
        let (_, src_leaf) = split_path(&src_path);
        if leaf != src_leaf {
            debug!("copy {src_path:?} -> {dst_path:?} renames, streaming");
            let mut reader = src.open().await?;
            let info = ObjectInfo::new(remote, src.size(), src.mod_time());
            return self.put(&mut reader, &info).await;
        }

        let src_id = src.id();
        let folder_id = dir_id.as_str();
        let copied = inner
            .pacer
            .call(move || {
                inner
                    .client
                    .move_copy_file(&inner.session, src_id, folder_id, false, true)
            })
            .await?;
        debug!("copied {src_path:?} -> {dst_path:?} as {}", copied.file_id);
        Ok(Object::with_copy_result(
            self.clone(),
            remote,
            copied.file_id,
            copied.size,
            &src,
        ))
    }

    /// Returns the ID of the file entry at `remote`, creating the entry (and
    /// any missing folders) when there is none yet.
    pub(crate) async fn create_file_entry(&self, remote: &str) -> Result<String> {
        let inner = self.inner();
        let absolute = inner.absolute(remote);
        let (leaf, dir_id) = inner.dir_cache.find_path(inner, &absolute, true).await?;
        if let Some(existing) = inner.file_by_name(&dir_id, &leaf).await? {
            return Ok(existing.file_id);
        }

        let name = replace_reserved_chars(&leaf);
        let name = name.as_str();
        let folder_id = dir_id.as_str();
        let created = inner
            .pacer
            .call(move || inner.client.create_file(&inner.session, folder_id, name))
            .await?;
        debug!("created file entry {absolute:?} ({})", created.file_id);
        Ok(created.file_id)
    }
}
