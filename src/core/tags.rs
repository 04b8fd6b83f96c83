// Tag index: denormalized `tag:<tag>:<table>` membership records whose value is the table name.
use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::error::{Error, ErrorKind, storage_error};
use crate::core::keys;
use crate::core::store::Store;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TagInfo {
    pub name: String,
    pub num_tables: usize,
}

impl Store {
    /// Adds `table` to `tag`. Tagging an existing pair again changes nothing.
    pub fn tag_table(&self, table: &str, tag: &str) -> Result<(), Error> {
        keys::validate_name("table", table)?;
        keys::validate_name("tag", tag)?;
        let key = keys::tag_key(tag, table);
        self.update(|kv| {
            kv.insert(key.as_slice(), table.as_bytes())
                .map_err(storage_error("failed to write tag membership"))?;
            Ok(())
        })?;
        tracing::debug!(table, tag, "tagged table");
        Ok(())
    }

    /// Removes `table` from `tag`; absent memberships are not an error.
    pub fn untag_table(&self, table: &str, tag: &str) -> Result<(), Error> {
        keys::validate_name("table", table)?;
        keys::validate_name("tag", tag)?;
        let key = keys::tag_key(tag, table);
        let removed = self.update(|kv| {
            let old = kv
                .remove(key.as_slice())
                .map_err(storage_error("failed to delete tag membership"))?;
            Ok(old.is_some())
        })?;
        tracing::debug!(table, tag, removed, "untagged table");
        Ok(())
    }

    /// Table names recorded under `tag`, read from the membership values.
    pub fn tagged_tables(&self, tag: &str) -> Result<Vec<String>, Error> {
        keys::validate_name("tag", tag)?;
        let mut tables = Vec::new();
        for entry in self.scan_prefix(keys::tag_prefix(tag))? {
            let entry = entry?;
            let table = String::from_utf8(entry.value).map_err(|err| {
                Error::new(ErrorKind::MalformedKey)
                    .with_message("tag membership value is not utf-8")
                    .with_key(String::from_utf8_lossy(&entry.key))
                    .with_source(err)
            })?;
            tables.push(table);
        }
        Ok(tables)
    }

    /// Every tag with the number of memberships it has, ordered by tag name.
    pub fn tag_info(&self) -> Result<Vec<TagInfo>, Error> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for entry in self.scan_prefix(keys::tag_namespace_prefix())? {
            let entry = entry?;
            let decoded = keys::decode_tag_key(&entry.key)?;
            *counts.entry(decoded.tag.to_string()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(name, num_tables)| TagInfo { name, num_tables })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::TagInfo;
    use crate::core::error::ErrorKind;
    use crate::core::store::Store;
    use crate::core::tabledef::TableDef;

    #[test]
    fn tag_then_list_by_tag() {
        let store = Store::in_memory().expect("store");
        store
            .write_table_def(&TableDef::new("test", vec!["email".into(), "name".into()]))
            .expect("def");
        store.tag_table("test", "vip").expect("tag");

        let list = store.list_table_defs_by_tag("vip").expect("list");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "test");
        assert_eq!(
            store.tag_info().expect("info"),
            vec![TagInfo {
                name: "vip".to_string(),
                num_tables: 1
            }]
        );
    }

    #[test]
    fn tag_and_untag_are_idempotent() {
        let store = Store::in_memory().expect("store");
        store.tag_table("test", "vip").expect("tag");
        store.tag_table("test", "vip").expect("tag again");
        assert_eq!(store.tagged_tables("vip").expect("tables"), vec!["test"]);

        store.untag_table("test", "vip").expect("untag");
        assert!(store.tagged_tables("vip").expect("tables").is_empty());
        store.untag_table("test", "vip").expect("untag again");
        assert!(store.tag_info().expect("info").is_empty());
    }

    #[test]
    fn tag_info_counts_per_tag() {
        let store = Store::in_memory().expect("store");
        store.tag_table("a", "vip").expect("tag");
        store.tag_table("b", "vip").expect("tag");
        store.tag_table("a", "archive").expect("tag");

        assert_eq!(
            store.tag_info().expect("info"),
            vec![
                TagInfo {
                    name: "archive".to_string(),
                    num_tables: 1
                },
                TagInfo {
                    name: "vip".to_string(),
                    num_tables: 2
                },
            ]
        );
    }

    #[test]
    fn tag_scans_do_not_match_longer_tag_names() {
        let store = Store::in_memory().expect("store");
        store.tag_table("a", "vip").expect("tag");
        store.tag_table("b", "vips").expect("tag");
        assert_eq!(store.tagged_tables("vip").expect("tables"), vec!["a"]);
    }

    #[test]
    fn names_with_delimiter_are_rejected() {
        let store = Store::in_memory().expect("store");
        let err = store.tag_table("test", "a:b").expect_err("bad tag");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = store.tag_table("a:b", "vip").expect_err("bad table");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
