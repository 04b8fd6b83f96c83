// Key codec: maps table definitions, rows, and tag memberships onto one sorted key space.
use crate::core::error::{Error, ErrorKind};

pub const DELIMITER: u8 = b':';

const TABLEDEF_NS: &[u8] = b"tabledef";
const ROW_NS: &[u8] = b"row";
const TAG_NS: &[u8] = b"tag";

/// `tabledef:<table>`
pub fn tabledef_key(table: &str) -> Vec<u8> {
    join(&[TABLEDEF_NS, table.as_bytes()])
}

/// Prefix shared by every table definition key.
pub fn tabledef_prefix() -> Vec<u8> {
    tabledef_key("")
}

/// `row:<table>:<primary key>`
pub fn row_key(table: &str, primary_key: &[u8]) -> Vec<u8> {
    join(&[ROW_NS, table.as_bytes(), primary_key])
}

/// `row:<table>:`; the trailing delimiter keeps `row:a:` from matching `row:ab:...`.
pub fn row_prefix(table: &str) -> Vec<u8> {
    row_key(table, b"")
}

/// `tag:<tag>:<table>`
pub fn tag_key(tag: &str, table: &str) -> Vec<u8> {
    join(&[TAG_NS, tag.as_bytes(), table.as_bytes()])
}

pub fn tag_prefix(tag: &str) -> Vec<u8> {
    tag_key(tag, "")
}

/// Prefix of the whole tag namespace.
pub fn tag_namespace_prefix() -> Vec<u8> {
    let mut key = TAG_NS.to_vec();
    key.push(DELIMITER);
    key
}

#[derive(Debug, PartialEq, Eq)]
pub struct TagKey<'a> {
    pub tag: &'a str,
    pub table: &'a str,
}

/// Splits `tag:<tag>:<table>` back into its parts.
pub fn decode_tag_key(key: &[u8]) -> Result<TagKey<'_>, Error> {
    let text = std::str::from_utf8(key).map_err(|err| {
        Error::new(ErrorKind::MalformedKey)
            .with_message("tag key is not utf-8")
            .with_key(String::from_utf8_lossy(key))
            .with_source(err)
    })?;
    let mut parts = text.splitn(3, DELIMITER as char);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(ns), Some(tag), Some(table)) if ns.as_bytes() == TAG_NS => Ok(TagKey { tag, table }),
        _ => Err(Error::new(ErrorKind::MalformedKey)
            .with_message("tag key needs a namespace, tag name, and table name")
            .with_key(text)),
    }
}

/// Table and tag names are embedded in keys and must not contain the delimiter.
pub fn validate_name(kind: &str, name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::new(ErrorKind::InvalidInput)
            .with_message(format!("{kind} name must not be empty")));
    }
    if name.as_bytes().contains(&DELIMITER) {
        return Err(Error::new(ErrorKind::InvalidInput)
            .with_message(format!("{kind} name must not contain ':'"))
            .with_key(name));
    }
    Ok(())
}

fn join(parts: &[&[u8]]) -> Vec<u8> {
    let len = parts.iter().map(|part| part.len() + 1).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(DELIMITER);
        }
        key.extend_from_slice(part);
    }
    key
}
