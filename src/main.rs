//! Purpose: `paramstash` CLI entry point.
//! Role: Binary crate root; parses args, builds the client, runs one command.
//! Invariants: Values go to stdout; diagnostics go to stderr as `<timestamp> <op>: <message>`.
//! Invariants: Facade failures are reported once, by the client's error channel.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::ffi::OsString;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod serve;

use paramstash::api::{
    ClientConfig, DEFAULT_KEY_ID, DEFAULT_MAX_VALUE_BYTES, Error, ErrorKind, HttpStore,
    ParamClient, Verbosity, format_line, timestamp_now, to_exit_code,
};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }

    /// Outcome for an error the client's channel has already reported.
    fn reported(err: &Error) -> Self {
        Self::with_code(to_exit_code(err.kind()))
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse_from(std::env::args_os().collect::<Vec<OsString>>()) {
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
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                return Err(Error::new(ErrorKind::InvalidCall)
                    .with_message(message)
                    .with_hint("Run `paramstash --help` for usage."));
            }
        },
    };

    if !matches!(cli.command, Command::Serve { .. }) {
        init_tracing();
    }
    command_dispatch::dispatch_command(cli.command, cli.remote)
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

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "paramstash",
    version,
    about = "Read, write, and cache parameters in a size-limited remote store",
    long_about = None,
    before_help = r#"Values larger than the store's per-entry limit are split into parts
stored as <name>/<basename>_aa, _ab, ... and reassembled on read."#,
    after_help = r#"EXAMPLES
  $ paramstash serve &                                   # local in-memory store
  $ paramstash put /app/token secret123
  $ paramstash get /app/token
  $ paramstash put /app/cert -f cert.pem                 # chunked when oversized
  $ paramstash get --large /app/cert
  $ paramstash list --prefix /app/

ENVIRONMENT
  PARAMSTASH_ENDPOINT, PARAMSTASH_TOKEN, PARAMSTASH_KEY_ID, PARAMSTASH_CHUNK_SIZE"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(flatten)]
    remote: RemoteArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Debug)]
struct RemoteArgs {
    #[arg(
        long,
        global = true,
        env = "PARAMSTASH_ENDPOINT",
        default_value = "http://127.0.0.1:9800",
        help = "Parameter store endpoint (http or https, no path)"
    )]
    endpoint: String,
    #[arg(
        long,
        global = true,
        env = "PARAMSTASH_TOKEN",
        hide_env_values = true,
        help = "Bearer token (dev-only; prefer --token-file)",
        help_heading = "Remote auth/TLS"
    )]
    token: Option<String>,
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        conflicts_with = "token",
        help = "Read bearer token from file",
        value_hint = ValueHint::FilePath,
        help_heading = "Remote auth/TLS"
    )]
    token_file: Option<PathBuf>,
    #[arg(
        long = "tls-ca",
        global = true,
        value_name = "PATH",
        help = "Trust this PEM CA/certificate for remote TLS",
        value_hint = ValueHint::FilePath,
        help_heading = "Remote auth/TLS"
    )]
    tls_ca: Option<PathBuf>,
    #[arg(
        long = "tls-skip-verify",
        global = true,
        help = "Disable remote TLS certificate verification (unsafe; dev-only)",
        help_heading = "Remote auth/TLS"
    )]
    tls_skip_verify: bool,
    #[arg(
        long,
        global = true,
        env = "PARAMSTASH_KEY_ID",
        default_value = DEFAULT_KEY_ID,
        help = "Encryption key id sent with every write"
    )]
    key_id: String,
    #[arg(
        long,
        global = true,
        env = "PARAMSTASH_CHUNK_SIZE",
        help = "Part size for large writes (default and maximum: the store's per-entry limit)"
    )]
    chunk_size: Option<usize>,
    #[arg(
        short,
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Suppress diagnostic lines on stderr"
    )]
    quiet: bool,
    #[arg(short, long, global = true, help = "Also print notices (e.g. skipped writes)")]
    verbose: bool,
}

impl RemoteArgs {
    fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    fn store(&self, discover_limits: bool) -> Result<HttpStore, Error> {
        let mut store = HttpStore::new(self.endpoint.clone())?;
        if let Some(token) = self.resolve_token()? {
            store = store.with_token(token);
        }
        if let Some(path) = &self.tls_ca {
            store = store.with_tls_ca_file(path)?;
        }
        if self.tls_skip_verify {
            store = store.with_tls_skip_verify();
        }
        if discover_limits {
            store = store.discover_limits()?;
        }
        Ok(store)
    }

    fn resolve_token(&self) -> Result<Option<String>, Error> {
        if let Some(token) = &self.token {
            return Ok(Some(token.clone()));
        }
        let Some(path) = &self.token_file else {
            return Ok(None);
        };
        let token = std::fs::read_to_string(path).map_err(|err| {
            Error::new(ErrorKind::FileUnreadable)
                .with_message(format!("failed to read token file {}", path.display()))
                .with_source(err)
        })?;
        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(Error::new(ErrorKind::InvalidCall)
                .with_message(format!("token file {} is empty", path.display())));
        }
        Ok(Some(token))
    }

    /// Writes learn the store's limit so `--chunk-size` can be checked against it.
    /// Reads find parts by name alone and skip the lookup.
    fn client(&self, writes: bool) -> Result<ParamClient<HttpStore>, Error> {
        let mut config = ClientConfig::new()
            .with_verbosity(self.verbosity())
            .with_key_id(self.key_id.clone());
        if let Some(chunk_size) = self.chunk_size.filter(|_| writes) {
            config = config.with_chunk_size(chunk_size);
        }
        ParamClient::with_config(self.store(writes)?, config)
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Print parameter values",
        after_help = r#"EXAMPLES
  $ paramstash get /app/token
  $ paramstash get --json /app/token /app/db/url
  $ paramstash get --large /app/cert
  $ paramstash get --cache /app/a /app/b /app/a      # second /app/a is served locally"#
    )]
    Get {
        #[arg(required = true, help = "Parameter names")]
        names: Vec<String>,
        #[arg(long, help = "Reuse values fetched earlier in this invocation")]
        cache: bool,
        #[arg(long, help = "Reassemble a value stored as chunk parts")]
        large: bool,
        #[arg(long = "no-decrypt", help = "Ask the store for the raw stored value")]
        no_decrypt: bool,
        #[arg(long, help = "Emit JSON")]
        json: bool,
    },
    #[command(
        about = "Write a parameter (overwrites)",
        after_help = r#"EXAMPLES
  $ paramstash put /app/token secret123
  $ paramstash put /app/cert -f cert.pem
  $ echo -n secret | paramstash put /app/token
  $ paramstash put --if-absent /app/token secret123

NOTES
  - Values above the store limit are split into at most 9 parts
  - Without a value or --file, the value is read from stdin"#
    )]
    Put {
        #[arg(help = "Parameter name")]
        name: String,
        #[arg(help = "Inline value")]
        value: Option<String>,
        #[arg(
            short = 'f',
            long = "file",
            help = "Read the value from a file",
            conflicts_with = "value",
            value_hint = ValueHint::FilePath
        )]
        file: Option<PathBuf>,
        #[arg(long = "if-absent", help = "Do nothing when the parameter already exists")]
        if_absent: bool,
    },
    #[command(about = "Delete parameters")]
    Delete {
        #[arg(required = true, help = "Parameter names")]
        names: Vec<String>,
        #[arg(long, help = "Delete every chunk part of a large value")]
        large: bool,
    },
    #[command(about = "List parameter names")]
    List {
        #[arg(long, help = "Only names starting with this prefix")]
        prefix: Option<String>,
        #[arg(long, help = "Emit JSON")]
        json: bool,
    },
    #[command(about = "Print whether a parameter exists (true/false)")]
    Exists {
        #[arg(help = "Parameter name")]
        name: String,
    },
    #[command(about = "List the chunk parts stored for a large value")]
    Parts {
        #[arg(help = "Parameter name")]
        name: String,
        #[arg(long, help = "Emit JSON")]
        json: bool,
    },
    #[command(
        about = "Run a parameter value as a shell command",
        long_about = r#"Fetch a parameter and run its value with `<shell> -c`.

The value is executed with your privileges. This is refused unless --allow-eval is given."#
    )]
    Eval {
        #[arg(help = "Parameter name")]
        name: String,
        #[arg(long = "allow-eval", help = "Confirm that the fetched value may be executed")]
        allow_eval: bool,
        #[arg(
            long,
            default_value = "/bin/sh",
            help = "Shell used to run the value",
            value_hint = ValueHint::ExecutablePath
        )]
        shell: PathBuf,
        #[arg(long, help = "Reassemble a value stored as chunk parts")]
        large: bool,
    },
    #[command(
        about = "Serve an in-memory parameter store over HTTP (loopback default)",
        after_help = r#"EXAMPLES
  $ paramstash serve
  $ paramstash serve --bind 127.0.0.1:9801 --max-value-bytes 1024

NOTES
  - State is in memory only and is lost on exit
  - Non-loopback binds require --allow-non-loopback"#
    )]
    Serve {
        #[arg(long, default_value = "127.0.0.1:9800", help = "Bind address")]
        bind: String,
        #[arg(
            long = "max-value-bytes",
            default_value_t = DEFAULT_MAX_VALUE_BYTES,
            help = "Per-entry size limit enforced by the store"
        )]
        max_value_bytes: usize,
        #[arg(long = "require-token", help = "Require this bearer token on every request")]
        require_token: Option<String>,
        #[arg(long = "allow-non-loopback", help = "Allow binding to non-loopback addresses")]
        allow_non_loopback: bool,
    },
    #[command(about = "Generate shell completion scripts")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    #[command(about = "Print version info")]
    Version,
}

fn read_stdin_value() -> Result<String, Error> {
    if io::stdin().is_terminal() {
        return Err(Error::new(ErrorKind::InvalidCall)
            .with_message("put requires a value, --file, or piped stdin")
            .with_hint("Use `paramstash put <name> <value>` or `paramstash put <name> -f <file>`."));
    }
    let mut value = String::new();
    io::stdin().read_to_string(&mut value).map_err(|err| {
        Error::new(ErrorKind::FileUnreadable)
            .with_message("failed to read value from stdin")
            .with_source(err)
    })?;
    Ok(value)
}

fn emit_json(value: serde_json::Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    };
    println!(
        "{}",
        json.unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
    );
}

fn emit_error(err: &Error) {
    let timestamp = timestamp_now();
    eprintln!("{}", format_line(&timestamp, "paramstash", &err.to_string()));
    if let Some(hint) = err.hint() {
        eprintln!("{}", format_line(&timestamp, "paramstash", hint));
    }
}

fn emit_version() {
    emit_json(json!({
        "name": "paramstash",
        "version": env!("CARGO_PKG_VERSION"),
    }));
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, clap_error_summary};
    use clap::{CommandFactory, Parser};
    use paramstash::api::Verbosity;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "paramstash",
            "get",
            "/app/token",
            "--endpoint",
            "http://127.0.0.1:9900",
            "--quiet",
        ])
        .expect("parse");
        assert_eq!(cli.remote.endpoint, "http://127.0.0.1:9900");
        assert_eq!(cli.remote.verbosity(), Verbosity::Quiet);
        assert!(matches!(cli.command, Command::Get { ref names, .. } if names == &["/app/token"]));
    }

    #[test]
    fn put_value_conflicts_with_file() {
        let err = Cli::try_parse_from(["paramstash", "put", "/a", "v", "-f", "x"])
            .err()
            .expect("conflict");
        assert!(clap_error_summary(&err).contains("cannot be used with"));
    }
}
