// Row store: raw row lines keyed by `row:<table>:<primary key>`.
use crate::core::cursor::{Cursor, Entry};
use crate::core::error::{Error, ErrorKind, storage_error};
use crate::core::keys;
use crate::core::store::{Store, keys_with_prefix};

pub const FIELD_DELIMITER: u8 = b',';

/// Bytes before the first `,`, or the whole line when it has none.
pub fn primary_key(line: &[u8]) -> Result<&[u8], Error> {
    let end = line
        .iter()
        .position(|b| *b == FIELD_DELIMITER)
        .unwrap_or(line.len());
    if end == 0 {
        return Err(Error::new(ErrorKind::InvalidInput).with_message("could not find primary key"));
    }
    Ok(&line[..end])
}

/// Counts of what a table delete removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub rows: usize,
    pub tags: usize,
    pub definition: bool,
}

/// Cursor over one table's rows, in ascending primary-key byte order.
pub struct RowCursor {
    inner: Cursor,
}

impl RowCursor {
    /// Next stored row line, or `None` once the table's range is exhausted.
    pub fn next_row(&mut self) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.inner.next_entry()?.map(|Entry { value, .. }| value))
    }

    pub fn close(self) {
        self.inner.close();
    }
}

impl Iterator for RowCursor {
    type Item = Result<Vec<u8>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

impl Store {
    /// Stores `line` under its primary key, replacing any previous row with that key.
    pub fn write_row(&self, table: &str, line: &[u8]) -> Result<(), Error> {
        keys::validate_name("table", table)?;
        let pkey = primary_key(line).map_err(|err| err.with_table(table))?;
        let key = keys::row_key(table, pkey);
        self.update(|kv| {
            kv.insert(key.as_slice(), line)
                .map_err(storage_error("failed to write row"))?;
            Ok(())
        })
    }

    /// Opens a cursor on a snapshot of `table`'s rows. Rows written after this
    /// call are not visible through it.
    pub fn scan_rows(&self, table: &str) -> Result<RowCursor, Error> {
        keys::validate_name("table", table)?;
        let inner = self.scan_prefix(keys::row_prefix(table))?;
        Ok(RowCursor { inner })
    }

    /// Removes one row and reports whether it existed. Absent keys are not an error.
    pub fn delete_row(&self, table: &str, primary_key: &[u8]) -> Result<bool, Error> {
        keys::validate_name("table", table)?;
        let key = keys::row_key(table, primary_key);
        let removed = self.update(|kv| {
            let old = kv
                .remove(key.as_slice())
                .map_err(storage_error("failed to delete row"))?;
            Ok(old.is_some())
        })?;
        tracing::debug!(
            table,
            key = %String::from_utf8_lossy(primary_key),
            removed,
            "deleted row"
        );
        Ok(removed)
    }

    /// Removes every row, the definition, and all tag memberships of `table`
    /// in one write transaction.
    pub fn delete_table(&self, table: &str) -> Result<DeleteSummary, Error> {
        keys::validate_name("table", table)?;
        let row_prefix = keys::row_prefix(table);
        let def_key = keys::tabledef_key(table);
        let summary = self.update(|kv| {
            let mut summary = DeleteSummary::default();
            for key in keys_with_prefix(kv, &row_prefix)? {
                kv.remove(key.as_slice())
                    .map_err(storage_error("failed to delete row"))?;
                summary.rows += 1;
            }
            for key in keys_with_prefix(kv, &keys::tag_namespace_prefix())? {
                if keys::decode_tag_key(&key)?.table != table {
                    continue;
                }
                kv.remove(key.as_slice())
                    .map_err(storage_error("failed to delete tag membership"))?;
                summary.tags += 1;
            }
            summary.definition = kv
                .remove(def_key.as_slice())
                .map_err(storage_error("failed to delete table definition"))?
                .is_some();
            Ok(summary)
        })?;
        tracing::debug!(
            table,
            rows = summary.rows,
            tags = summary.tags,
            definition = summary.definition,
            "deleted table"
        );
        Ok(summary)
    }
}
