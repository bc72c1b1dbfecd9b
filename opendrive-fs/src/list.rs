use std::collections::VecDeque;

use log::debug;
use time::OffsetDateTime;

use crate::dircache::{join_path, normalize_path};
use crate::encoding::restore_reserved_chars;
use crate::error::Result;
use crate::fs::OpenDriveFs;
use crate::object::{Object, unix_time};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub remote: String,
    pub id: String,
    pub mod_time: OffsetDateTime,
    /// Number of folders directly inside, as reported by the service.
    pub child_folders: i64,
}

#[derive(Debug, Clone)]
pub enum DirEntry {
    Dir(Directory),
    Object(Object),
}

impl DirEntry {
    pub fn remote(&self) -> &str {
        match self {
            DirEntry::Dir(dir) => &dir.remote,
            DirEntry::Object(object) => object.remote(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, DirEntry::Dir(_))
    }
}

#[derive(Debug)]
struct ListDirJob {
    dir_id: String,
    path: String,
    /// Levels below this folder that may still be listed; `None` is unbounded.
    depth: Option<usize>,
}

/// Lazily walks a folder tree, one folder listing at a time.
///
/// Entries of a folder are returned before any of its subfolders are
/// fetched. [`Lister::prune`] stops the walk from descending into a folder
/// that has not been listed yet.
#[derive(Debug)]
pub struct Lister {
    fs: OpenDriveFs,
    jobs: VecDeque<ListDirJob>,
    ready: VecDeque<DirEntry>,
}

impl Lister {
    pub(crate) fn new(
        fs: OpenDriveFs,
        dir_id: String,
        path: String,
        max_depth: Option<usize>,
    ) -> Self {
        let mut jobs = VecDeque::new();
        jobs.push_back(ListDirJob {
            dir_id,
            path,
            depth: max_depth.map(|depth| depth.saturating_sub(1)),
        });
        Self {
            fs,
            jobs,
            ready: VecDeque::new(),
        }
    }

    pub async fn next(&mut self) -> Result<Option<DirEntry>> {
        loop {
            if let Some(entry) = self.ready.pop_front() {
                return Ok(Some(entry));
            }
            let Some(job) = self.jobs.pop_front() else {
                return Ok(None);
            };
            self.run(job).await?;
        }
    }

    /// Skips everything below `dir`.
    pub fn prune(&mut self, dir: &str) {
        let dir = normalize_path(dir);
        let prefix = format!("{dir}/");
        self.jobs
            .retain(|job| job.path != dir && !job.path.starts_with(&prefix));
        self.ready
            .retain(|entry| !entry.remote().starts_with(&prefix));
    }

    pub async fn collect(mut self) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn run(&mut self, job: ListDirJob) -> Result<()> {
        let inner = self.fs.inner();
        let listing = inner.list_folder(&job.dir_id).await?;
        debug!(
            "listed {:?}: {} folders, {} files",
            job.path,
            listing.folders.len(),
            listing.files.len()
        );

        for folder in listing.folders {
            let remote = join_path(&job.path, &restore_reserved_chars(&folder.name));
            inner
                .dir_cache
                .put(&inner.absolute(&remote), folder.folder_id.clone());
            if job.depth != Some(0) {
                self.jobs.push_back(ListDirJob {
                    dir_id: folder.folder_id.clone(),
                    path: remote.clone(),
                    depth: job.depth.map(|depth| depth - 1),
                });
            }
            self.ready.push_back(DirEntry::Dir(Directory {
                remote,
                id: folder.folder_id,
                mod_time: unix_time(folder.date_modified),
                child_folders: folder.child_folders,
            }));
        }

        for file in listing.files {
            let remote = join_path(&job.path, &restore_reserved_chars(&file.name));
            self.ready
                .push_back(DirEntry::Object(Object::from_file(self.fs.clone(), remote, &file)));
        }
        Ok(())
    }
}
