//! Purpose: `csvd` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, emits CSV on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All storage access goes through `api::LocalClient` over one `Store`.
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};

use csvd::api::{Error, ErrorKind, to_exit_code};

mod command_dispatch;
mod data_paths;
mod serve;

use data_paths::default_data_dir;

pub(crate) const DEFAULT_BIND: &str = "127.0.0.1:3737";
pub(crate) const DEFAULT_MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;
pub(crate) const DEFAULT_MAX_CONCURRENT_SCANS: usize = 64;

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(exit_code);
            }
            _ => {
                return Err(Error::new(ErrorKind::InvalidInput)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `csvd --help` for usage."));
            }
        },
    };

    let data_dir = cli.dir.unwrap_or_else(default_data_dir);
    command_dispatch::dispatch_command(cli.command, data_dir)
        .map_err(add_storage_hint)
        .map_err(add_internal_hint)?;
    Ok(0)
}

#[derive(Parser)]
#[command(
    name = "csvd",
    version,
    about = "CSV tables over HTTP, stored in an embedded ordered key-value store",
    long_about = None,
    after_help = r#"EXAMPLES
  $ csvd serve
  $ curl --data-binary $'email,name\ntim@example.com,Tim' localhost:3737/tables/people
  $ curl localhost:3737/tables/people
  $ curl -X POST localhost:3737/tables/people/tags/vip
  $ curl localhost:3737/tags

  Offline commands open the data directory directly; stop the server first.
  $ csvd tables --tag vip
  $ csvd dump people"#,
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    #[arg(
        long,
        short = 'd',
        global = true,
        help = "Data directory (default: ~/.csvd/data)",
        value_hint = ValueHint::DirPath
    )]
    dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    #[command(about = "Serve tables over HTTP")]
    Serve(ServeArgs),
    #[command(about = "List tables as CSV (name,columns)")]
    Tables {
        #[arg(long, help = "Only tables carrying this tag")]
        tag: Option<String>,
    },
    #[command(about = "List tags with table counts as CSV (name,n_tables)")]
    Tags,
    #[command(about = "Print a table as CSV: header, then rows in primary-key order")]
    Dump { table: String },
    #[command(about = "Load CSV (header + rows) into a table from a file or stdin")]
    Load {
        table: String,
        #[arg(help = "CSV file to read (default: stdin)", value_hint = ValueHint::FilePath)]
        file: Option<PathBuf>,
    },
    #[command(about = "Tag a table")]
    Tag { table: String, tag: String },
    #[command(about = "Remove a tag from a table")]
    Untag { table: String, tag: String },
    #[command(about = "Delete a table with its rows and tag memberships")]
    Drop { table: String },
}

#[derive(clap::Args)]
pub(crate) struct ServeArgs {
    #[arg(long, default_value = DEFAULT_BIND, help = "Bind address")]
    pub bind: String,
    #[arg(long, help = "Allow non-loopback binds")]
    pub allow_non_loopback: bool,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_BODY_BYTES,
        help = "Max request body size in bytes"
    )]
    pub max_body_bytes: u64,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_CONCURRENT_SCANS,
        help = "Max concurrent streaming table reads"
    )]
    pub max_concurrent_scans: usize,
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches("error: ").to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn add_storage_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Storage => err.with_hint(
            "Storage failure. If a csvd server is running on this data directory, stop it or use the HTTP API.",
        ),
        ErrorKind::Io => err.with_hint("I/O error. Check the path, permissions, and disk space."),
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint("Unexpected internal failure. Retry with RUST_LOG=debug and share the output.")
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::InvalidInput => "invalid input".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Storage => "storage failure".to_string(),
        ErrorKind::MalformedKey => "malformed key".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(table) = err.table() {
        inner.insert("table".to_string(), json!(table));
    }
    if let Some(key) = err.key() {
        inner.insert("key".to_string(), json!(key));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(table) = err.table() {
        lines.push(format!("table: {table}"));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{error_json, error_text};
    use csvd::api::{Error, ErrorKind};

    #[test]
    fn error_json_carries_kind_and_context() {
        let err = Error::new(ErrorKind::NotFound)
            .with_message("table definition not found")
            .with_table("people");
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "NotFound");
        assert_eq!(value["error"]["message"], "table definition not found");
        assert_eq!(value["error"]["table"], "people");
        assert!(value["error"].get("causes").is_none());
    }

    #[test]
    fn error_text_lists_causes() {
        let err = Error::new(ErrorKind::Io)
            .with_message("failed to read input")
            .with_source(std::io::Error::other("disk on fire"));
        let text = error_text(&err);
        assert!(text.starts_with("error: failed to read input"));
        assert!(text.contains("caused by: disk on fire"));
    }
}
