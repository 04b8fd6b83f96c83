// Shared handle over the embedded ordered store; all namespaces live in one redb table.
use std::path::{Path, PathBuf};

use redb::backends::InMemoryBackend;
use redb::{Database, ReadOnlyTable, ReadableTable, Table, TableDefinition};

use crate::core::cursor::Cursor;
use crate::core::error::{Error, ErrorKind, storage_error};

pub const DB_FILE_NAME: &str = "csvd.redb";

const DATA: TableDefinition<&'static [u8], &'static [u8]> = TableDefinition::new("csvd");

pub(crate) type KvTable<'txn> = Table<'txn, &'static [u8], &'static [u8]>;
pub(crate) type KvReadTable = ReadOnlyTable<&'static [u8], &'static [u8]>;

/// Process-wide store handle. Opened once, shared by reference (or `Arc`),
/// closed once after every in-flight operation has finished.
pub struct Store {
    db: Database,
    path: Option<PathBuf>,
}

impl Store {
    /// Opens `<dir>/csvd.redb`, creating the directory and file when missing.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message(format!("failed to create data directory {}", dir.display()))
                .with_source(err)
        })?;
        let path = dir.join(DB_FILE_NAME);
        tracing::info!(path = %path.display(), "opening store");
        let db = Database::create(&path).map_err(storage_error("failed to open store"))?;
        let store = Self {
            db,
            path: Some(path),
        };
        store.ensure_table()?;
        Ok(store)
    }

    /// Volatile store for tests and dry runs.
    pub fn in_memory() -> Result<Self, Error> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(storage_error("failed to create in-memory store"))?;
        let store = Self { db, path: None };
        store.ensure_table()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Releases the underlying database. Consuming `self` makes a second close impossible.
    pub fn close(self) -> Result<(), Error> {
        match &self.path {
            Some(path) => tracing::info!(path = %path.display(), "closing store"),
            None => tracing::info!("closing in-memory store"),
        }
        drop(self.db);
        Ok(())
    }

    /// Runs `f` inside one write transaction, committing on success and aborting on error.
    pub(crate) fn update<T>(
        &self,
        f: impl FnOnce(&mut KvTable<'_>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let txn = self
            .db
            .begin_write()
            .map_err(storage_error("failed to begin write transaction"))?;
        let result = {
            let mut table = txn
                .open_table(DATA)
                .map_err(storage_error("failed to open data table"))?;
            f(&mut table)
        };
        match result {
            Ok(value) => {
                txn.commit()
                    .map_err(storage_error("failed to commit transaction"))?;
                Ok(value)
            }
            Err(err) => {
                txn.abort()
                    .map_err(storage_error("failed to abort transaction"))?;
                Err(err)
            }
        }
    }

    /// Opens a snapshot of the data table. The snapshot lives as long as the returned table.
    pub(crate) fn snapshot(&self) -> Result<KvReadTable, Error> {
        let txn = self
            .db
            .begin_read()
            .map_err(storage_error("failed to begin read transaction"))?;
        txn.open_table(DATA)
            .map_err(storage_error("failed to open data table"))
    }

    pub(crate) fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let table = self.snapshot()?;
        let value = table
            .get(key)
            .map_err(storage_error("failed to read key"))?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    /// Forward cursor over every key starting with `prefix`, on its own snapshot.
    pub(crate) fn scan_prefix(&self, prefix: Vec<u8>) -> Result<Cursor, Error> {
        let table = self.snapshot()?;
        Cursor::open(&table, prefix)
    }

    fn ensure_table(&self) -> Result<(), Error> {
        self.update(|_| Ok(()))
    }
}

/// Collects the keys under `prefix` inside a write transaction so they can be removed.
pub(crate) fn keys_with_prefix(table: &KvTable<'_>, prefix: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
    let mut keys = Vec::new();
    let range = table
        .range::<&[u8]>(prefix..)
        .map_err(storage_error("failed to scan keys"))?;
    for entry in range {
        let (key, _) = entry.map_err(storage_error("failed to scan keys"))?;
        let key = key.value();
        if !key.starts_with(prefix) {
            break;
        }
        keys.push(key.to_vec());
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::{DB_FILE_NAME, Store, keys_with_prefix};
    use crate::core::error::{Error, ErrorKind};

    #[test]
    fn open_creates_directory_and_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("nested").join("data");
        let store = Store::open(&dir).expect("open");
        assert!(dir.join(DB_FILE_NAME).exists());
        assert_eq!(store.path(), Some(dir.join(DB_FILE_NAME).as_path()));
        store.close().expect("close");
    }

    #[test]
    fn reopen_sees_committed_data() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = Store::open(temp.path()).expect("open");
        store
            .update(|table| {
                table
                    .insert(b"k".as_slice(), b"v".as_slice())
                    .map_err(super::storage_error("insert"))?;
                Ok(())
            })
            .expect("update");
        store.close().expect("close");

        let store = Store::open(temp.path()).expect("reopen");
        assert_eq!(store.get(b"k").expect("get"), Some(b"v".to_vec()));
    }

    #[test]
    fn failed_update_is_rolled_back() {
        let store = Store::in_memory().expect("store");
        let result: Result<(), Error> = store.update(|table| {
            table
                .insert(b"k".as_slice(), b"v".as_slice())
                .map_err(super::storage_error("insert"))?;
            Err(Error::new(ErrorKind::InvalidInput).with_message("boom"))
        });
        assert_eq!(result.expect_err("error").kind(), ErrorKind::InvalidInput);
        assert_eq!(store.get(b"k").expect("get"), None);
    }

    #[test]
    fn keys_with_prefix_stops_at_prefix_end() {
        let store = Store::in_memory().expect("store");
        let keys = store
            .update(|table| {
                let keys: [&[u8]; 4] = [b"a:1", b"a:2", b"ab:1", b"b:1"];
                for key in keys {
                    table
                        .insert(key, b"".as_slice())
                        .map_err(super::storage_error("insert"))?;
                }
                keys_with_prefix(table, b"a:")
            })
            .expect("update");
        assert_eq!(keys, vec![b"a:1".to_vec(), b"a:2".to_vec()]);
    }
}
