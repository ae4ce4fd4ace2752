//! Durable key-value storage behind the assignment store.
//!
//! [`Storage`] is the narrow interface the engine needs from client-side storage: string values
//! under string keys. [`MemoryStorage`] keeps everything in process and is the default.
//! [`FileStorage`] keeps one file per key in a directory, so assignments survive restarts.
use std::{
    collections::HashMap,
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use crate::{Error, Result};

/// A string key-value table.
///
/// Implementations must be safe to share between threads. Errors are reported to the
/// [`AssignmentStore`](crate::AssignmentStore), which logs them and degrades instead of failing the
/// caller.
pub trait Storage: Send + Sync {
    /// Read the value stored under `key`. Returns `Ok(None)` if nothing is stored.
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing the previous value as a single write.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove_item(&self, key: &str) -> Result<()>;
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        (**self).remove_item(key)
    }
}

/// `MemoryStorage` provides a thread-safe (`Sync`) in-process table that allows concurrent access
/// for readers and writers.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        MemoryStorage::default()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Unavailable("memory storage lock poisoned".to_owned())
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let items = self.items.read().map_err(poisoned)?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        // Constructing new value before requesting the lock to minimize lock span.
        let value = value.to_owned();

        let mut items = self.items.write().map_err(poisoned)?;
        items.insert(key.to_owned(), value);
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let mut items = self.items.write().map_err(poisoned)?;
        items.remove(key);
        Ok(())
    }
}

/// Suffix of temporary files, unique within the process.
static NEXT_TMP_ID: AtomicU64 = AtomicU64::new(0);

/// Stores every key as a JSON file in `dir`.
///
/// Writes go to a temporary file that is renamed over the target, so readers never observe a
/// partially written record.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Use `dir` as the storage directory, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileStorage { dir })
    }

    /// Storage directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_name(key)))
    }
}

/// Keys are caller-chosen namespaces. Anything outside `[A-Za-z0-9_-]` is hex-escaped so a key can't
/// point outside the storage directory.
fn encode_file_name(key: &str) -> String {
    let mut name = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            name.push(char::from(b));
        } else {
            name.push_str(&format!("%{:02X}", b));
        }
    }
    name
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp_path = path.with_extension(format!(
            "tmp.{}.{}",
            std::process::id(),
            NEXT_TMP_ID.fetch_add(1, Ordering::Relaxed)
        ));

        let mut file = File::create(&tmp_path)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &path).map_err(|err| {
            let _ = fs::remove_file(&tmp_path);
            Error::from(err)
        })
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{encode_file_name, FileStorage, MemoryStorage, Storage};

    #[test]
    fn can_set_items_from_another_thread() {
        let storage = Arc::new(MemoryStorage::new());

        assert_eq!(storage.get_item("key").unwrap(), None);

        {
            let storage = storage.clone();
            let _ = std::thread::spawn(move || {
                storage.set_item("key", "value").unwrap();
            })
            .join();
        }

        assert_eq!(storage.get_item("key").unwrap().as_deref(), Some("value"));
    }

    #[test]
    fn memory_storage_remove() {
        let storage = MemoryStorage::new();
        storage.set_item("key", "value").unwrap();
        storage.remove_item("key").unwrap();
        storage.remove_item("missing").unwrap();
        assert_eq!(storage.get_item("key").unwrap(), None);
    }

    #[test]
    fn file_storage_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(tmp.path().join("nested")).unwrap();

        assert_eq!(storage.get_item("__global_abtest__").unwrap(), None);

        storage.set_item("__global_abtest__", "{\"a\":1}").unwrap();
        storage.set_item("__global_abtest__", "{\"a\":2}").unwrap();
        assert_eq!(
            storage.get_item("__global_abtest__").unwrap().as_deref(),
            Some("{\"a\":2}")
        );

        // No temporary files left behind.
        let files: Vec<_> = std::fs::read_dir(storage.dir()).unwrap().collect();
        assert_eq!(files.len(), 1);

        storage.remove_item("__global_abtest__").unwrap();
        storage.remove_item("__global_abtest__").unwrap();
        assert_eq!(storage.get_item("__global_abtest__").unwrap(), None);
    }

    #[test]
    fn concurrent_writers_share_a_directory() {
        let tmp = tempfile::tempdir().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let storage = FileStorage::new(tmp.path()).unwrap();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        storage.set_item("ns", &format!("writer-{}", i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let storage = FileStorage::new(tmp.path()).unwrap();
        let value = storage.get_item("ns").unwrap().unwrap();
        assert!(value.starts_with("writer-"));

        let files: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn file_storage_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();

        FileStorage::new(tmp.path())
            .unwrap()
            .set_item("ns", "stored")
            .unwrap();

        let reopened = FileStorage::new(tmp.path()).unwrap();
        assert_eq!(reopened.get_item("ns").unwrap().as_deref(), Some("stored"));
    }

    #[test]
    fn file_names_are_escaped() {
        assert_eq!(encode_file_name("__global_abtest__"), "__global_abtest__");
        assert_eq!(encode_file_name("../etc/passwd"), "%2E%2E%2Fetc%2Fpasswd");
        assert_eq!(encode_file_name("a b"), "a%20b");
    }
}
