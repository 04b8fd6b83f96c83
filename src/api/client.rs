//! Purpose: Implement the table-level operations the HTTP server and CLI share.
//! Exports: `LocalClient`, `IngestOutcome`, `DeleteOutcome`, `TableScan`.
//! Role: Translate line-oriented request bodies into storage-core calls.
//! Invariants: The first body line is always a header; it defines a table only
//! while the table is undefined.
//! Invariants: Every row write is its own transaction; a failed batch is not rolled back.
use std::io::Write;
use std::sync::Arc;

use bstr::ByteSlice;

use crate::core::error::{Error, ErrorKind};
use crate::core::rows::{DeleteSummary, RowCursor, primary_key};
use crate::core::store::Store;
use crate::core::tabledef::{TableDef, TableState};
use crate::core::tags::TagInfo;

pub type ApiResult<T> = Result<T, Error>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub created: bool,
    pub rows_written: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Table(DeleteSummary),
    Rows { deleted: u64 },
}

/// A table's definition plus an open cursor over its rows.
pub struct TableScan {
    pub def: TableDef,
    pub rows: RowCursor,
}

#[derive(Clone)]
pub struct LocalClient {
    store: Arc<Store>,
}

impl LocalClient {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Creates the table from the header line when it is undefined, then writes
    /// every following line as a row.
    pub fn ingest(&self, table: &str, body: &[u8]) -> ApiResult<IngestOutcome> {
        let mut lines = body.lines();
        let Some(header) = lines.next() else {
            return Err(Error::new(ErrorKind::InvalidInput)
                .with_message("could not read header row")
                .with_table(table));
        };

        let mut outcome = IngestOutcome::default();
        match self.store.table_state(table)? {
            TableState::Defined(_) => {}
            TableState::Undefined => {
                let def = TableDef::from_header(table, header)?;
                self.store.write_table_def(&def)?;
                outcome.created = true;
                tracing::info!(table, columns = def.columns.len(), "created table");
            }
        }

        for line in lines {
            self.store.write_row(table, line).map_err(|err| {
                let written = outcome.rows_written;
                err.with_hint(format!("{written} rows were written before this failure"))
            })?;
            outcome.rows_written += 1;
        }
        Ok(outcome)
    }

    pub fn read_table(&self, table: &str) -> ApiResult<TableScan> {
        let def = self.store.read_table_def(table)?;
        let rows = self.store.scan_rows(table)?;
        Ok(TableScan { def, rows })
    }

    /// Writes the header line followed by every row, newline-terminated.
    pub fn write_csv(&self, table: &str, out: &mut impl Write) -> ApiResult<u64> {
        let TableScan { def, mut rows } = self.read_table(table)?;
        writeln!(out, "{}", def.header_line()).map_err(write_error)?;
        let mut count = 0u64;
        while let Some(row) = rows.next_row()? {
            out.write_all(&row).map_err(write_error)?;
            out.write_all(b"\n").map_err(write_error)?;
            count += 1;
        }
        rows.close();
        Ok(count)
    }

    /// An empty body deletes the whole table. Otherwise the first line is a
    /// header and each following line names a row by its primary key.
    pub fn delete(&self, table: &str, body: &[u8]) -> ApiResult<DeleteOutcome> {
        let mut lines = body.lines();
        if lines.next().is_none() {
            let summary = self.store.delete_table(table)?;
            tracing::info!(table, rows = summary.rows, "deleted table");
            return Ok(DeleteOutcome::Table(summary));
        }

        let mut deleted = 0u64;
        for line in lines {
            let pkey = primary_key(line).map_err(|err| err.with_table(table))?;
            if self.store.delete_row(table, pkey)? {
                deleted += 1;
            }
        }
        Ok(DeleteOutcome::Rows { deleted })
    }

    pub fn list_tables(&self, tag: Option<&str>) -> ApiResult<Vec<TableDef>> {
        match tag {
            Some(tag) => self.store.list_table_defs_by_tag(tag),
            None => self.store.list_table_defs(),
        }
    }

    pub fn tag(&self, table: &str, tag: &str) -> ApiResult<()> {
        self.store.tag_table(table, tag)
    }

    pub fn untag(&self, table: &str, tag: &str) -> ApiResult<()> {
        self.store.untag_table(table, tag)
    }

    pub fn tag_info(&self) -> ApiResult<Vec<TagInfo>> {
        self.store.tag_info()
    }
}

fn write_error(err: std::io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write output")
        .with_source(err)
}

#[cfg(test)]
mod tests {
    use super::{DeleteOutcome, LocalClient};
    use crate::core::error::ErrorKind;
    use crate::core::store::Store;
    use std::sync::Arc;

    const BODY: &str = "email,name\ntim@example.com,Tim\njim@example.com,Jimbo";

    fn client() -> LocalClient {
        LocalClient::new(Arc::new(Store::in_memory().expect("store")))
    }

    fn dump(client: &LocalClient, table: &str) -> String {
        let mut out = Vec::new();
        client.write_csv(table, &mut out).expect("dump");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn ingest_read_delete_scenario() {
        let client = client();
        let outcome = client.ingest("test", BODY.as_bytes()).expect("ingest");
        assert!(outcome.created);
        assert_eq!(outcome.rows_written, 2);
        assert_eq!(
            dump(&client, "test"),
            "email,name\njim@example.com,Jimbo\ntim@example.com,Tim\n"
        );

        let outcome = client
            .delete("test", b"email\ntim@example.com")
            .expect("delete");
        assert_eq!(outcome, DeleteOutcome::Rows { deleted: 1 });
        assert_eq!(dump(&client, "test"), "email,name\njim@example.com,Jimbo\n");
    }

    #[test]
    fn delete_counts_only_rows_that_existed() {
        let client = client();
        client.ingest("t", b"id,v\n1,a\n2,b").expect("ingest");

        let outcome = client
            .delete("t", b"id\nnope\nalso_nope")
            .expect("delete absent");
        assert_eq!(outcome, DeleteOutcome::Rows { deleted: 0 });

        let outcome = client.delete("t", b"id\n1\nnope\n1").expect("delete");
        assert_eq!(outcome, DeleteOutcome::Rows { deleted: 1 });
        assert_eq!(dump(&client, "t"), "id,v\n2,b\n");
    }

    #[test]
    fn second_ingest_keeps_existing_columns() {
        let client = client();
        client.ingest("test", BODY.as_bytes()).expect("ingest");
        let outcome = client
            .ingest("test", b"other,cols,here\namy@example.com,Amy")
            .expect("append");
        assert!(!outcome.created);
        assert_eq!(outcome.rows_written, 1);

        let def = client.store().read_table_def("test").expect("def");
        assert_eq!(def.columns, vec!["email", "name"]);
    }

    #[test]
    fn header_with_pipe_creates_nothing() {
        let client = client();
        let err = client
            .ingest("test", b"email,na|me\ntim@example.com,Tim")
            .expect_err("pipe");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(
            client.store().read_table_def("test").expect_err("no def").kind(),
            ErrorKind::NotFound
        );
        assert!(client.store().scan_rows("test").expect("scan").next().is_none());
    }

    #[test]
    fn empty_body_is_rejected() {
        let client = client();
        let err = client.ingest("test", b"").expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn crlf_lines_are_trimmed() {
        let client = client();
        client
            .ingest("test", b"id,v\r\n1,a\r\n2,b\r\n")
            .expect("ingest");
        assert_eq!(dump(&client, "test"), "id,v\n1,a\n2,b\n");
    }

    #[test]
    fn failed_row_reports_progress() {
        let client = client();
        let err = client
            .ingest("test", b"id,v\n1,a\n,orphan\n3,c")
            .expect_err("bad row");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.hint(), Some("1 rows were written before this failure"));
        assert_eq!(dump(&client, "test"), "id,v\n1,a\n");
    }

    #[test]
    fn empty_delete_body_drops_table() {
        let client = client();
        client.ingest("test", BODY.as_bytes()).expect("ingest");
        client.tag("test", "vip").expect("tag");

        match client.delete("test", b"").expect("delete") {
            DeleteOutcome::Table(summary) => {
                assert_eq!(summary.rows, 2);
                assert_eq!(summary.tags, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(
            client.read_table("test").err().map(|err| err.kind()),
            Some(ErrorKind::NotFound)
        );
        assert!(client.tag_info().expect("tags").is_empty());
    }

    #[test]
    fn list_tables_filters_by_tag() {
        let client = client();
        client.ingest("a", b"x,y").expect("ingest");
        client.ingest("b", b"z").expect("ingest");
        client.tag("b", "vip").expect("tag");

        assert_eq!(client.list_tables(None).expect("all").len(), 2);
        let tagged = client.list_tables(Some("vip")).expect("tagged");
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].name, "b");

        client.untag("b", "vip").expect("untag");
        assert!(client.list_tables(Some("vip")).expect("tagged").is_empty());
    }
}
