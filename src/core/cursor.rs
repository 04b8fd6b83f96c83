// Forward prefix cursor that owns its read snapshot until closed or dropped.
use redb::Range;

use crate::core::error::{Error, storage_error};
use crate::core::store::KvReadTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

enum State {
    Positioned(Range<'static, &'static [u8], &'static [u8]>),
    Exhausted,
}

/// Single-pass reader over one key prefix.
///
/// The range iterator keeps the read transaction alive; it is released as soon
/// as the cursor is exhausted, hits an error, is closed, or is dropped. A
/// finished cursor cannot be restarted; open a new one instead.
pub struct Cursor {
    prefix: Vec<u8>,
    state: State,
}

impl Cursor {
    pub(crate) fn open(table: &KvReadTable, prefix: Vec<u8>) -> Result<Self, Error> {
        let range = table
            .range::<&[u8]>(prefix.as_slice()..)
            .map_err(storage_error("failed to open cursor"))?;
        Ok(Self {
            prefix,
            state: State::Positioned(range),
        })
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, State::Exhausted)
    }

    /// Advances to the next entry under the prefix, or returns `None` once past it.
    pub fn next_entry(&mut self) -> Result<Option<Entry>, Error> {
        let State::Positioned(range) = &mut self.state else {
            return Ok(None);
        };
        let item = match range.next() {
            Some(item) => item,
            None => {
                self.state = State::Exhausted;
                return Ok(None);
            }
        };
        let (key, value) = match item {
            Ok(pair) => pair,
            Err(err) => {
                self.state = State::Exhausted;
                return Err(storage_error("failed to advance cursor")(err));
            }
        };
        if !key.value().starts_with(&self.prefix) {
            self.state = State::Exhausted;
            return Ok(None);
        }
        Ok(Some(Entry {
            key: key.value().to_vec(),
            value: value.value().to_vec(),
        }))
    }

    /// Releases the snapshot now rather than at end of scope.
    pub fn close(mut self) {
        self.state = State::Exhausted;
    }
}

impl Iterator for Cursor {
    type Item = Result<Entry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

#[cfg(test)]
mod tests {
    use crate::core::error::storage_error;
    use crate::core::store::Store;

    fn seed(store: &Store, keys: &[&str]) {
        store
            .update(|table| {
                for key in keys {
                    table
                        .insert(key.as_bytes(), key.as_bytes())
                        .map_err(storage_error("insert"))?;
                }
                Ok(())
            })
            .expect("seed");
    }

    #[test]
    fn yields_only_prefixed_keys_in_order() {
        let store = Store::in_memory().expect("store");
        seed(&store, &["row:t:b", "row:t:a", "row:u:a", "row:s:z"]);

        let cursor = store.scan_prefix(b"row:t:".to_vec()).expect("cursor");
        let keys: Vec<Vec<u8>> = cursor
            .map(|entry| entry.expect("entry").key)
            .collect();
        assert_eq!(keys, vec![b"row:t:a".to_vec(), b"row:t:b".to_vec()]);
    }

    #[test]
    fn exhausted_cursor_stays_exhausted() {
        let store = Store::in_memory().expect("store");
        seed(&store, &["row:t:a"]);

        let mut cursor = store.scan_prefix(b"row:t:".to_vec()).expect("cursor");
        assert!(cursor.next_entry().expect("first").is_some());
        assert!(cursor.next_entry().expect("second").is_none());
        assert!(cursor.is_exhausted());
        assert!(cursor.next_entry().expect("third").is_none());
        cursor.close();
    }

    #[test]
    fn cursor_reads_a_stable_snapshot() {
        let store = Store::in_memory().expect("store");
        seed(&store, &["row:t:a"]);

        let mut cursor = store.scan_prefix(b"row:t:".to_vec()).expect("cursor");
        seed(&store, &["row:t:b"]);

        assert!(cursor.next_entry().expect("first").is_some());
        assert!(cursor.next_entry().expect("second").is_none());
    }

    #[test]
    fn empty_prefix_range_is_exhausted_immediately() {
        let store = Store::in_memory().expect("store");
        let mut cursor = store.scan_prefix(b"row:none:".to_vec()).expect("cursor");
        assert!(cursor.next_entry().expect("next").is_none());
    }
}
