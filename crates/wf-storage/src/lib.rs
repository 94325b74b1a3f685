use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::RwLock;

#[cfg(feature = "rocksdb")]
pub use rocks::RocksDbStore;

/// String key-value persistence, shaped after browser `localStorage`.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
pub struct NoopStore;

impl KeyValueStore for NoopStore {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn with_entry(key: &str, value: &str) -> Self {
        let store = Self::default();
        if let Ok(mut guard) = store.values.write() {
            guard.insert(key.to_owned(), value.to_owned());
        }
        store
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let guard = self
            .values
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self
            .values
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut guard = self
            .values
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        guard.remove(key);
        Ok(())
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for std::rc::Rc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }
}

#[cfg(feature = "rocksdb")]
mod rocks {
    use super::KeyValueStore;
    use anyhow::{Context, Result};
    use rocksdb::{DB, Options};
    use std::sync::Arc;

    /// Durable store for native hosts, standing in for the browser's
    /// `localStorage` across process restarts.
    pub struct RocksDbStore {
        db: Arc<DB>,
    }

    impl RocksDbStore {
        pub fn open_default(path: &str) -> Result<Self> {
            let mut options = Options::default();
            options.create_if_missing(true);
            let db = DB::open(&options, path).with_context(|| format!("open rocksdb at {path}"))?;
            Ok(Self { db: Arc::new(db) })
        }

        fn key_for(key: &str) -> String {
            format!("kv:{key}")
        }
    }

    impl KeyValueStore for RocksDbStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            let value = self.db.get(Self::key_for(key).as_bytes())?;
            match value {
                Some(raw) => Ok(Some(String::from_utf8(raw).context("stored value is not utf-8")?)),
                None => Ok(None),
            }
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.db.put(Self::key_for(key).as_bytes(), value.as_bytes())?;
            Ok(())
        }

        fn delete(&self, key: &str) -> Result<()> {
            self.db.delete(Self::key_for(key).as_bytes())?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "PREVIOUSLY_CONNECTED_PROVIDER_RDNS";

    fn exercise(store: &dyn KeyValueStore) -> Result<()> {
        assert_eq!(store.get(KEY)?, None);
        store.set(KEY, "io.metamask")?;
        assert_eq!(store.get(KEY)?.as_deref(), Some("io.metamask"));
        store.set(KEY, "com.rabby")?;
        assert_eq!(store.get(KEY)?.as_deref(), Some("com.rabby"));
        store.delete(KEY)?;
        assert_eq!(store.get(KEY)?, None);
        store.delete(KEY)?;
        Ok(())
    }

    #[test]
    fn in_memory_store_set_get_delete() -> Result<()> {
        exercise(&InMemoryStore::default())
    }

    #[test]
    fn noop_store_never_remembers() -> Result<()> {
        let store = NoopStore;
        store.set(KEY, "io.metamask")?;
        assert_eq!(store.get(KEY)?, None);
        Ok(())
    }

    #[test]
    fn seeded_store_returns_entry() -> Result<()> {
        let store = InMemoryStore::with_entry(KEY, "io.metamask");
        assert_eq!(store.get(KEY)?.as_deref(), Some("io.metamask"));
        Ok(())
    }

    #[cfg(feature = "rocksdb")]
    #[test]
    fn rocksdb_store_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("wayfind");
        let path = path.to_str().expect("temp path should be utf-8");

        {
            let store = RocksDbStore::open_default(path)?;
            exercise(&store)?;
            store.set(KEY, "io.metamask")?;
        }

        let reopened = RocksDbStore::open_default(path)?;
        assert_eq!(reopened.get(KEY)?.as_deref(), Some("io.metamask"));
        Ok(())
    }
}
