// Remote stats reader
//
// Mirrors artifacts from an object store into a local staging directory and
// then scans that directory with the local reader.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, info, warn};

use crate::error::{Error, Result};

use super::local::{LocalPythonStatsReader, PARTIAL_SUFFIX};
use super::step_stats::{is_valid_node_id, ArtifactName, StepProfileStats};
use super::PythonStatsReader;

/// A listed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full key, `/` separated
    pub key: String,
    /// Size in bytes
    pub size: u64,
}

/// The two object-store operations the remote reader needs
pub trait ObjectStore {
    /// List every object whose key starts with `prefix`
    fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Download one object to `dest`, overwriting it
    fn get_object(&self, key: &str, dest: &Path) -> Result<()>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for Box<S> {
    fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        (**self).list_objects(prefix)
    }

    fn get_object(&self, key: &str, dest: &Path) -> Result<()> {
        (**self).get_object(key, dest)
    }
}

/// Parsed `s3://bucket/prefix` location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Uri {
    pub bucket: String,
    pub prefix: String,
}

impl S3Uri {
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("s3://")
            .ok_or_else(|| Error::InvalidS3Uri(format!("{} does not start with s3://", uri)))?;

        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix.trim_end_matches('/')),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return Err(Error::InvalidS3Uri(format!("{} has no bucket", uri)));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        })
    }
}

impl FromStr for S3Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for S3Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix.is_empty() {
            write!(f, "s3://{}", self.bucket)
        } else {
            write!(f, "s3://{}/{}", self.bucket, self.prefix)
        }
    }
}

/// Object store backed by a local directory, e.g. a mounted bucket
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn collect(&self, dir: &Path, objects: &mut Vec<ObjectInfo>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.collect(&path, objects)?;
                continue;
            }

            let relative = path
                .strip_prefix(&self.root)
                .map_err(|e| Error::ObjectStore(e.to_string()))?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            objects.push(ObjectInfo {
                key,
                size: fs::metadata(&path)?.len(),
            });
        }
        Ok(())
    }
}

impl ObjectStore for LocalObjectStore {
    fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        self.collect(&self.root, &mut objects)?;
        objects.retain(|object| object.key.starts_with(prefix));
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn get_object(&self, key: &str, dest: &Path) -> Result<()> {
        let source = self.root.join(key);
        fs::copy(&source, dest).map_err(|e| {
            Error::ObjectStore(format!("failed to fetch {}: {}", source.display(), e))
        })?;
        Ok(())
    }
}

/// Downloads artifacts under a prefix into a staging directory before scanning it
pub struct RemotePythonStatsReader<S: ObjectStore> {
    store: S,
    prefix: String,
    local_reader: LocalPythonStatsReader,
}

impl<S: ObjectStore> RemotePythonStatsReader<S> {
    pub fn new(staging_dir: impl Into<PathBuf>, prefix: impl Into<String>, store: S) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_end_matches('/').to_string(),
            local_reader: LocalPythonStatsReader::new(staging_dir),
        }
    }

    /// Mirror the prefix of an `s3://bucket/prefix` URI; `store` must be bound to that bucket
    pub fn from_s3_uri(staging_dir: impl Into<PathBuf>, uri: &S3Uri, store: S) -> Self {
        Self::new(staging_dir, uri.prefix.clone(), store)
    }

    pub fn with_default_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.local_reader = self.local_reader.with_default_node_id(node_id);
        self
    }

    pub fn staging_dir(&self) -> &Path {
        self.local_reader.profile_dir()
    }

    /// Download every artifact not already staged. Returns the number fetched.
    pub fn sync(&self) -> Result<usize> {
        let list_prefix = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        let objects = self.store.list_objects(&list_prefix)?;

        let mut fetched = 0;
        for object in &objects {
            let Some(relative) = self.staged_relative_path(&object.key) else {
                debug!("Ignoring object {} that is not a stats artifact", object.key);
                continue;
            };
            let dest = self.staging_dir().join(relative);

            if let Ok(metadata) = fs::metadata(&dest) {
                if metadata.len() == object.size {
                    continue;
                }
            }

            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let partial = partial_path(&dest);
            if let Err(e) = self.store.get_object(&object.key, &partial) {
                let _ = fs::remove_file(&partial);
                return Err(e);
            }
            fs::rename(&partial, &dest)?;
            debug!("Fetched {} to {}", object.key, dest.display());
            fetched += 1;
        }

        info!(
            "Fetched {} of {} objects under {:?} into {}",
            fetched,
            objects.len(),
            self.prefix,
            self.staging_dir().display()
        );
        Ok(fetched)
    }

    /// Map `<prefix>/<node_id>/<artifact>` (or `<prefix>/<artifact>`) to its staging path
    fn staged_relative_path(&self, key: &str) -> Option<PathBuf> {
        let relative = key
            .strip_prefix(self.prefix.as_str())
            .unwrap_or(key)
            .trim_start_matches('/');
        let parts: Vec<&str> = relative.split('/').collect();

        let (node_id, file_name) = match parts.as_slice() {
            [file_name] => (None, *file_name),
            [node_id, file_name] => (Some(*node_id), *file_name),
            _ => return None,
        };
        if let Some(node_id) = node_id {
            if !is_valid_node_id(node_id) {
                warn!("Skipping remote object {}: invalid node directory {:?}", key, node_id);
                return None;
            }
        }
        if let Err(e) = ArtifactName::decode(file_name) {
            if file_name.ends_with(".json") {
                warn!("Skipping remote object {}: {}", key, e);
            }
            return None;
        }

        Some(match node_id {
            Some(node_id) => Path::new(node_id).join(file_name),
            None => PathBuf::from(file_name),
        })
    }
}

impl<S: ObjectStore> PythonStatsReader for RemotePythonStatsReader<S> {
    fn load_python_profile_stats(&self) -> Result<Vec<StepProfileStats>> {
        self.sync()?;
        self.local_reader.scan()
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_parse_s3_uri() {
        let uri = S3Uri::parse("s3://my-bucket/jobs/run-1/python_stats/").unwrap();
        assert_eq!(uri.bucket, "my-bucket");
        assert_eq!(uri.prefix, "jobs/run-1/python_stats");
        assert_eq!(uri.to_string(), "s3://my-bucket/jobs/run-1/python_stats");

        let uri: S3Uri = "s3://bucket".parse().unwrap();
        assert_eq!(uri.prefix, "");

        assert!(S3Uri::parse("gs://bucket/x").is_err());
        assert!(S3Uri::parse("s3:///x").is_err());
    }

    /// Counts downloads on top of a local store
    struct CountingStore {
        inner: LocalObjectStore,
        fetches: RefCell<Vec<String>>,
    }

    impl ObjectStore for CountingStore {
        fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
            self.inner.list_objects(prefix)
        }

        fn get_object(&self, key: &str, dest: &Path) -> Result<()> {
            self.fetches.borrow_mut().push(key.to_string());
            self.inner.get_object(key, dest)
        }
    }

    #[test]
    fn test_sync_is_idempotent_by_name_and_size() {
        let bucket = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let node_dir = bucket.path().join("run/stats/worker_0");
        fs::create_dir_all(&node_dir).unwrap();
        fs::write(node_dir.join("pyinstrument_0_1_2.json"), "{}").unwrap();
        fs::write(node_dir.join("notes.txt"), "ignored").unwrap();
        fs::write(bucket.path().join("run/other.json"), "{}").unwrap();

        let store = CountingStore {
            inner: LocalObjectStore::new(bucket.path()),
            fetches: RefCell::new(Vec::new()),
        };
        let reader = RemotePythonStatsReader::new(staging.path(), "run/stats", store);

        assert_eq!(reader.sync().unwrap(), 1);
        assert_eq!(reader.sync().unwrap(), 0);
        assert_eq!(reader.store.fetches.borrow().len(), 1);

        let stats = reader.load_python_profile_stats().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].stats_path(), staging.path().join("worker_0/pyinstrument_0_1_2.json"));
    }

    struct FailingStore;

    impl ObjectStore for FailingStore {
        fn list_objects(&self, _prefix: &str) -> Result<Vec<ObjectInfo>> {
            Ok(vec![ObjectInfo { key: "p/worker_0/cprofile_0_1_2.pstats.json".to_string(), size: 3 }])
        }

        fn get_object(&self, _key: &str, _dest: &Path) -> Result<()> {
            Err(Error::ObjectStore("access denied".to_string()))
        }
    }

    #[test]
    fn test_fetch_failure_propagates() {
        let staging = tempfile::tempdir().unwrap();
        let reader = RemotePythonStatsReader::new(staging.path(), "p", FailingStore);

        let err = reader.load_python_profile_stats().unwrap_err();
        assert!(matches!(err, Error::ObjectStore(_)));
        assert!(!staging.path().join("worker_0/cprofile_0_1_2.pstats.json.part").exists());
    }

    /// Lists fixed keys and serves every one with the same payload
    struct FixedKeysStore {
        keys: Vec<&'static str>,
    }

    impl ObjectStore for FixedKeysStore {
        fn list_objects(&self, _prefix: &str) -> Result<Vec<ObjectInfo>> {
            Ok(self.keys.iter().map(|key| ObjectInfo { key: key.to_string(), size: 2 }).collect())
        }

        fn get_object(&self, _key: &str, dest: &Path) -> Result<()> {
            fs::write(dest, "{}")?;
            Ok(())
        }
    }

    #[test]
    fn test_keys_with_relative_node_dirs_stay_out_of_staging_parent() {
        let outer = tempfile::tempdir().unwrap();
        let staging = outer.path().join("staging");
        let store = FixedKeysStore {
            keys: vec![
                "p/../cprofile_0_1_2.pstats.json",
                "p/./cprofile_1_2_3.pstats.json",
                "p//cprofile_2_3_4.pstats.json",
            ],
        };
        let reader = RemotePythonStatsReader::new(staging.clone(), "p", store);

        assert_eq!(reader.sync().unwrap(), 0);
        assert!(!outer.path().join("cprofile_0_1_2.pstats.json").exists());
        assert!(!staging.join("cprofile_1_2_3.pstats.json").exists());
        assert!(reader.load_python_profile_stats().unwrap().is_empty());
    }

    #[test]
    fn test_valid_node_keys_are_staged() {
        let staging = tempfile::tempdir().unwrap();
        let store = FixedKeysStore {
            keys: vec!["p/algo-1/pyinstrument_0_1_2.json", "p/pyinstrument_1_2_3.json"],
        };
        let reader = RemotePythonStatsReader::new(staging.path(), "p", store).with_default_node_id("algo-1");

        assert_eq!(reader.sync().unwrap(), 2);
        let nodes: Vec<String> = reader
            .load_python_profile_stats()
            .unwrap()
            .iter()
            .map(|s| s.node_id().to_string())
            .collect();
        assert_eq!(nodes, vec!["algo-1", "algo-1"]);
    }
}
