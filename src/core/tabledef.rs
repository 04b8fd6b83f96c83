// Table definition registry: per-table metadata stored as JSON under `tabledef:<name>`.
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, storage_error};
use crate::core::keys;
use crate::core::store::Store;

/// Columns may not contain this; table listings join columns with it.
pub const COLUMN_SEPARATOR: char = '|';

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Columns")]
    pub columns: Vec<String>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Builds a definition from a comma-separated header line.
    pub fn from_header(name: &str, header: &[u8]) -> Result<Self, Error> {
        keys::validate_name("table", name)?;
        if header.is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput)
                .with_message("no columns in header row")
                .with_table(name));
        }
        let header = std::str::from_utf8(header).map_err(|err| {
            Error::new(ErrorKind::InvalidInput)
                .with_message("header row is not utf-8")
                .with_table(name)
                .with_source(err)
        })?;
        let columns: Vec<String> = header.split(',').map(str::to_string).collect();
        let def = Self::new(name, columns);
        def.validate()?;
        Ok(def)
    }

    pub fn validate(&self) -> Result<(), Error> {
        keys::validate_name("table", &self.name)?;
        if let Some(column) = self
            .columns
            .iter()
            .find(|column| column.contains(COLUMN_SEPARATOR))
        {
            return Err(Error::new(ErrorKind::InvalidInput)
                .with_message("column name cannot contain |")
                .with_table(&self.name)
                .with_key(column));
        }
        Ok(())
    }

    /// Header line as it was posted.
    pub fn header_line(&self) -> String {
        self.columns.join(",")
    }

    /// Column list in the `|`-joined form used by table listings.
    pub fn joined_columns(&self) -> String {
        self.columns.join(&COLUMN_SEPARATOR.to_string())
    }

    fn decode(name: &str, bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes).map_err(|err| {
            Error::new(ErrorKind::Storage)
                .with_message("failed to decode table definition")
                .with_table(name)
                .with_source(err)
        })
    }
}

/// Whether ingest creates a definition or appends to an existing one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TableState {
    Undefined,
    Defined(TableDef),
}

impl Store {
    /// Upserts `def` under its key.
    pub fn write_table_def(&self, def: &TableDef) -> Result<(), Error> {
        def.validate()?;
        let key = keys::tabledef_key(&def.name);
        let value = serde_json::to_vec(def).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode table definition")
                .with_table(&def.name)
                .with_source(err)
        })?;
        self.update(|table| {
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(storage_error("failed to write table definition"))?;
            Ok(())
        })?;
        tracing::debug!(table = %def.name, columns = def.columns.len(), "wrote table definition");
        Ok(())
    }

    pub fn read_table_def(&self, name: &str) -> Result<TableDef, Error> {
        match self.table_state(name)? {
            TableState::Defined(def) => Ok(def),
            TableState::Undefined => Err(Error::new(ErrorKind::NotFound)
                .with_message("table definition not found")
                .with_table(name)),
        }
    }

    pub fn table_state(&self, name: &str) -> Result<TableState, Error> {
        keys::validate_name("table", name)?;
        match self.get(&keys::tabledef_key(name))? {
            Some(bytes) => Ok(TableState::Defined(TableDef::decode(name, &bytes)?)),
            None => Ok(TableState::Undefined),
        }
    }

    /// All definitions, ordered by table name.
    pub fn list_table_defs(&self) -> Result<Vec<TableDef>, Error> {
        let mut defs = Vec::new();
        let prefix = keys::tabledef_prefix();
        for entry in self.scan_prefix(prefix.clone())? {
            let entry = entry?;
            let name = String::from_utf8_lossy(&entry.key[prefix.len()..]).into_owned();
            defs.push(TableDef::decode(&name, &entry.value)?);
        }
        Ok(defs)
    }

    /// Definitions of every table tagged `tag`, in table-name order.
    ///
    /// Memberships whose table has no definition (tagged before it was ever
    /// created) are skipped.
    pub fn list_table_defs_by_tag(&self, tag: &str) -> Result<Vec<TableDef>, Error> {
        keys::validate_name("tag", tag)?;
        let mut defs = Vec::new();
        for table in self.tagged_tables(tag)? {
            match self.table_state(&table)? {
                TableState::Defined(def) => defs.push(def),
                TableState::Undefined => {
                    tracing::warn!(tag, table = %table, "skipping tag membership without table definition");
                }
            }
        }
        Ok(defs)
    }
}
