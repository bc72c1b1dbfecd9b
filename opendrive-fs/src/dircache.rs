use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use log::{debug, info};

use crate::error::{FsError, Result};

/// The two remote lookups path resolution is built from.
#[async_trait]
pub trait DirCacher: Send + Sync {
    /// Returns the ID of the folder called `leaf` directly inside `parent_id`.
    async fn find_leaf(&self, parent_id: &str, leaf: &str) -> Result<Option<String>>;

    /// Creates folder `leaf` inside `parent_id` and returns its new ID.
    async fn create_dir(&self, parent_id: &str, leaf: &str) -> Result<String>;
}

/// Memoizes path -> folder ID resolutions.
///
/// Keys are normalized paths from the top of the store ("" is the store
/// root). Each path segment is resolved under its own async lock, so two
/// callers racing on the same missing folder create it once.
#[derive(Debug)]
pub struct DirCache {
    root_id: String,
    cache: Mutex<HashMap<String, String>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DirCache {
    pub fn new(root_id: impl Into<String>) -> Self {
        let root_id = root_id.into();
        let mut cache = HashMap::new();
        cache.insert(String::new(), root_id.clone());
        Self {
            root_id,
            cache: Mutex::new(cache),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.entries().get(&normalize_path(path)).cloned()
    }

    pub fn put(&self, path: &str, id: impl Into<String>) {
        self.entries().insert(normalize_path(path), id.into());
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Forgets `path` and everything below it.
    pub fn flush(&self, path: &str) {
        let path = normalize_path(path);
        let mut cache = self.entries();
        if path.is_empty() {
            cache.retain(|key, _| key.is_empty());
        } else {
            let prefix = format!("{path}/");
            cache.retain(|key, _| key != &path && !key.starts_with(&prefix));
        }
        debug!("flushed dir cache below {path:?}, {} entries left", cache.len());
    }

    /// Resolves `path` to a folder ID, walking down from the root and
    /// creating missing folders when `create` is set.
    pub async fn find_dir<C>(&self, cacher: &C, path: &str, create: bool) -> Result<String>
    where
        C: DirCacher + ?Sized,
    {
        let path = normalize_path(path);
        if let Some(id) = self.get(&path) {
            return Ok(id);
        }

        let mut parent_id = self.root_id.clone();
        let mut prefix = String::with_capacity(path.len());
        for segment in path.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);

            if let Some(id) = self.get(&prefix) {
                parent_id = id;
                continue;
            }

            let lock = self.lock_for(&prefix);
            let resolved = {
                let _guard = lock.lock().await;
                self.resolve_segment(cacher, &parent_id, &prefix, segment, create)
                    .await
            };
            self.release_lock(&prefix, lock);
            parent_id = resolved?;
        }
        Ok(parent_id)
    }

    /// Splits `path` into its leaf name and the ID of the folder holding it.
    pub async fn find_path<C>(&self, cacher: &C, path: &str, create: bool) -> Result<(String, String)>
    where
        C: DirCacher + ?Sized,
    {
        let path = normalize_path(path);
        let (dir, leaf) = split_path(&path);
        let dir_id = self.find_dir(cacher, dir, create).await?;
        Ok((leaf.to_string(), dir_id))
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Looks up or creates one path segment. Callers hold the segment's lock.
    async fn resolve_segment<C>(
        &self,
        cacher: &C,
        parent_id: &str,
        prefix: &str,
        segment: &str,
        create: bool,
    ) -> Result<String>
    where
        C: DirCacher + ?Sized,
    {
        if let Some(id) = self.get(prefix) {
            return Ok(id);
        }
        let id = match cacher.find_leaf(parent_id, segment).await? {
            Some(id) => id,
            None if create => {
                let id = cacher.create_dir(parent_id, segment).await?;
                info!("created folder {prefix:?} ({id})");
                id
            }
            None => return Err(FsError::DirectoryNotFound(prefix.to_string())),
        };
        self.put(prefix, id.clone());
        Ok(id)
    }

    fn segment_locks(&self) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_for(&self, path: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.segment_locks()
            .entry(path.to_string())
            .or_default()
            .clone()
    }

    /// Drops the map's lock for `path` once no other caller holds a handle to it.
    fn release_lock(&self, path: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.segment_locks();
        // One handle in the map plus `lock` itself. `lock` must go while the
        // map is held so a concurrent release sees the updated count.
        let last = Arc::strong_count(&lock) == 2;
        drop(lock);
        if last {
            locks.remove(path);
        }
    }
}

/// Drops empty segments and surrounding slashes: `"/a//b/"` -> `"a/b"`.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// `"a/b/c"` -> `("a/b", "c")`, `"c"` -> `("", "c")`.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Joins two relative paths, ignoring empty sides.
pub fn join_path(base: &str, rest: &str) -> String {
    match (base.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{rest}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeTree {
        folders: Mutex<HashMap<(String, String), String>>,
        finds: AtomicUsize,
        creates: AtomicUsize,
        fail_creates: bool,
    }

    #[async_trait]
    impl DirCacher for FakeTree {
        async fn find_leaf(&self, parent_id: &str, leaf: &str) -> Result<Option<String>> {
            self.finds.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            let folders = self.folders.lock().unwrap();
            Ok(folders
                .get(&(parent_id.to_string(), leaf.to_string()))
                .cloned())
        }

        async fn create_dir(&self, parent_id: &str, leaf: &str) -> Result<String> {
            tokio::task::yield_now().await;
            if self.fail_creates {
                return Err(FsError::Protocol("create refused".into()));
            }
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            let id = format!("id-{n}");
            self.folders
                .lock()
                .unwrap()
                .insert((parent_id.to_string(), leaf.to_string()), id.clone());
            Ok(id)
        }
    }

    #[test]
    fn split_path_separates_leaf() {
        assert_eq!(split_path("a/b/c"), ("a/b", "c"));
        assert_eq!(split_path("c"), ("", "c"));
        assert_eq!(split_path(""), ("", ""));
    }

    #[test]
    fn normalize_path_trims_slashes() {
        assert_eq!(normalize_path("/a//b/"), "a/b");
        assert_eq!(normalize_path("/"), "");
        assert_eq!(join_path("", "x"), "x");
        assert_eq!(join_path("root", ""), "root");
        assert_eq!(join_path("root", "x/y"), "root/x/y");
    }

    #[tokio::test]
    async fn creates_missing_chain_once() {
        let tree = FakeTree::default();
        let cache = DirCache::new("0");

        let id = cache.find_dir(&tree, "a/b/c", true).await.unwrap();
        assert_eq!(tree.creates.load(Ordering::SeqCst), 3);
        assert_eq!(cache.get("a/b/c"), Some(id.clone()));
        assert!(cache.get("a").is_some());
        assert!(cache.get("a/b").is_some());

        let finds_before = tree.finds.load(Ordering::SeqCst);
        let again = cache.find_dir(&tree, "a/b/c", true).await.unwrap();
        assert_eq!(again, id);
        assert_eq!(tree.creates.load(Ordering::SeqCst), 3);
        assert_eq!(tree.finds.load(Ordering::SeqCst), finds_before);
    }

    #[tokio::test]
    async fn root_resolves_without_lookup() {
        let tree = FakeTree::default();
        let cache = DirCache::new("0");

        assert_eq!(cache.find_dir(&tree, "", false).await.unwrap(), "0");
        assert_eq!(cache.find_dir(&tree, "/", false).await.unwrap(), "0");
        assert_eq!(tree.finds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_dir_without_create_fails() {
        let tree = FakeTree::default();
        let cache = DirCache::new("0");

        let err = cache
            .find_dir(&tree, "nope/deeper", false)
            .await
            .expect_err("expected missing dir");
        assert!(matches!(err, FsError::DirectoryNotFound(path) if path == "nope"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn failed_create_leaves_no_entry() {
        let tree = FakeTree {
            fail_creates: true,
            ..FakeTree::default()
        };
        let cache = DirCache::new("0");

        assert!(cache.find_dir(&tree, "x", true).await.is_err());
        assert!(cache.get("x").is_none());
        assert!(cache.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn segment_locks_are_dropped_after_resolution() {
        let tree = FakeTree::default();
        let cache = DirCache::new("0");

        for n in 0..20 {
            cache.find_dir(&tree, &format!("dir{n}/sub"), true).await.unwrap();
        }
        assert!(cache.find_dir(&tree, "gone/deeper", false).await.is_err());

        assert_eq!(cache.len(), 41);
        assert!(cache.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn flush_forces_fresh_lookup() {
        let tree = FakeTree::default();
        let cache = DirCache::new("0");
        cache.find_dir(&tree, "a/b", true).await.unwrap();

        cache.flush("a");
        assert!(cache.get("a").is_none());
        assert!(cache.get("a/b").is_none());
        assert_eq!(cache.get(""), Some("0".to_string()));

        let finds_before = tree.finds.load(Ordering::SeqCst);
        cache.find_dir(&tree, "a/b", false).await.unwrap();
        assert_eq!(tree.finds.load(Ordering::SeqCst), finds_before + 2);
        assert_eq!(tree.creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn flush_keeps_siblings_with_shared_prefix() {
        let cache = DirCache::new("0");
        cache.put("ab", "1");
        cache.put("a", "2");
        cache.put("a/x", "3");

        cache.flush("a");
        assert_eq!(cache.get("ab"), Some("1".to_string()));
        assert!(cache.get("a/x").is_none());

        cache.flush("");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn find_path_returns_leaf_and_parent() {
        let tree = FakeTree::default();
        let cache = DirCache::new("0");

        let (leaf, parent) = cache.find_path(&tree, "docs/report.pdf", true).await.unwrap();
        assert_eq!(leaf, "report.pdf");
        assert_eq!(cache.get("docs"), Some(parent));

        let (leaf, parent) = cache.find_path(&tree, "top.txt", false).await.unwrap();
        assert_eq!(leaf, "top.txt");
        assert_eq!(parent, "0");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolution_creates_each_folder_once() {
        let tree = Arc::new(FakeTree::default());
        let cache = Arc::new(DirCache::new("0"));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tree = Arc::clone(&tree);
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.find_dir(tree.as_ref(), "p/q/r", true).await
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap());
        }

        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(tree.creates.load(Ordering::SeqCst), 3);
        assert!(cache.locks.lock().unwrap().is_empty());
    }
}
