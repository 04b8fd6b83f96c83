//! Purpose: Execute parsed CLI subcommands against a data directory.
//! Exports: `dispatch_command`.
//! Role: Thin layer between clap types and `LocalClient`/`serve`.
//! Invariants: Offline commands open the store for the duration of one command and close it.
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use csvd::api::{DeleteOutcome, Error, ErrorKind, LocalClient, Store, listing};

use crate::serve;
use crate::{Command, ServeArgs};

pub(super) fn dispatch_command(command: Command, data_dir: PathBuf) -> Result<(), Error> {
    match command {
        Command::Serve(args) => {
            let config = serve_config_from_args(args, data_dir)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))
        }
        Command::Tables { tag } => with_client(&data_dir, |client| {
            let defs = client.list_tables(tag.as_deref())?;
            emit_stdout(listing::tables_csv(&defs).as_bytes())
        }),
        Command::Tags => with_client(&data_dir, |client| {
            let infos = client.tag_info()?;
            emit_stdout(listing::tags_csv(&infos).as_bytes())
        }),
        Command::Dump { table } => with_client(&data_dir, |client| {
            let stdout = io::stdout();
            let mut out = io::BufWriter::new(stdout.lock());
            client.write_csv(&table, &mut out)?;
            out.flush().map_err(stdout_error)
        }),
        Command::Load { table, file } => {
            let body = read_input(file.as_deref())?;
            with_client(&data_dir, |client| {
                let outcome = client.ingest(&table, &body)?;
                emit_stdout(
                    format!(
                        "table,created,rows_written\n{table},{},{}\n",
                        outcome.created, outcome.rows_written
                    )
                    .as_bytes(),
                )
            })
        }
        Command::Tag { table, tag } => with_client(&data_dir, |client| client.tag(&table, &tag)),
        Command::Untag { table, tag } => {
            with_client(&data_dir, |client| client.untag(&table, &tag))
        }
        Command::Drop { table } => with_client(&data_dir, |client| {
            match client.delete(&table, b"")? {
                DeleteOutcome::Table(summary) => emit_stdout(
                    format!(
                        "table,rows_deleted,tags_deleted\n{table},{},{}\n",
                        summary.rows, summary.tags
                    )
                    .as_bytes(),
                ),
                DeleteOutcome::Rows { .. } => Err(Error::new(ErrorKind::Internal)
                    .with_message("empty delete body did not drop the table")
                    .with_table(&table)),
            }
        }),
    }
}

fn serve_config_from_args(args: ServeArgs, data_dir: PathBuf) -> Result<serve::ServeConfig, Error> {
    let bind: SocketAddr = args.bind.parse().map_err(|_| {
        Error::new(ErrorKind::InvalidInput)
            .with_message("invalid bind address")
            .with_hint("Use a host:port value like 127.0.0.1:3737.")
    })?;
    Ok(serve::ServeConfig {
        bind,
        data_dir,
        allow_non_loopback: args.allow_non_loopback,
        max_body_bytes: args.max_body_bytes,
        max_concurrent_scans: args.max_concurrent_scans,
    })
}

/// Opens the store, runs `f`, and closes the store even when `f` fails.
fn with_client<T>(
    data_dir: &Path,
    f: impl FnOnce(&LocalClient) -> Result<T, Error>,
) -> Result<T, Error> {
    let store = Arc::new(Store::open(data_dir)?);
    let client = LocalClient::new(store.clone());
    let result = f(&client);
    drop(client);
    let closed = match Arc::try_unwrap(store) {
        Ok(store) => store.close(),
        Err(_) => Err(Error::new(ErrorKind::Internal).with_message("store still shared at exit")),
    };
    let value = result?;
    closed?;
    Ok(value)
}

fn read_input(file: Option<&Path>) -> Result<Vec<u8>, Error> {
    match file {
        Some(path) => std::fs::read(path).map_err(|err| {
            let kind = if err.kind() == io::ErrorKind::NotFound {
                ErrorKind::NotFound
            } else {
                ErrorKind::Io
            };
            Error::new(kind)
                .with_message(format!("failed to read {}", path.display()))
                .with_source(err)
        }),
        None => {
            let mut body = Vec::new();
            io::stdin().read_to_end(&mut body).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read stdin")
                    .with_source(err)
            })?;
            Ok(body)
        }
    }
}

fn emit_stdout(bytes: &[u8]) -> Result<(), Error> {
    let mut out = io::stdout().lock();
    out.write_all(bytes).map_err(stdout_error)?;
    out.flush().map_err(stdout_error)
}

fn stdout_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write stdout")
        .with_source(err)
}
