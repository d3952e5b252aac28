//! Purpose: Hold top-level CLI command dispatch for `paramstash`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Client failures are already on stderr; dispatch only maps them to exit codes.
//! Invariants: Multi-name commands keep going after a failure and exit with the first failing code.

use super::*;
use paramstash::api::{DeleteOptions, EvalPolicy, GetOptions, PutOptions, PutOutcome};

pub(super) fn dispatch_command(command: Command, remote: RemoteArgs) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "paramstash", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version();
            Ok(RunOutcome::ok())
        }
        Command::Serve {
            bind,
            max_value_bytes,
            require_token,
            allow_non_loopback,
        } => {
            let bind = bind.parse().map_err(|_| {
                Error::new(ErrorKind::InvalidCall)
                    .with_message(format!("invalid bind address '{bind}'"))
                    .with_hint("Use host:port, for example 127.0.0.1:9800.")
            })?;
            let config = serve::ServeConfig {
                bind,
                token: require_token,
                max_value_bytes,
                allow_non_loopback,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        Command::Get {
            names,
            cache,
            large,
            no_decrypt,
            json,
        } => {
            let mut client = remote.client(false)?;
            let options = GetOptions {
                use_cache: cache,
                cache_only: false,
                large,
                decrypt: !no_decrypt,
            };
            let mut outcome = RunOutcome::ok();
            let mut fetched = Vec::new();
            for name in &names {
                match client.get(name, options) {
                    Ok(value) => {
                        if json {
                            fetched.push(json!({ "name": name, "value": value }));
                        } else {
                            println!("{value}");
                        }
                    }
                    Err(err) => {
                        if outcome.exit_code == 0 {
                            outcome = RunOutcome::reported(&err);
                        }
                    }
                }
            }
            if json {
                emit_json(json!({ "params": fetched }));
            }
            Ok(outcome)
        }
        Command::Put {
            name,
            value,
            file,
            if_absent,
        } => {
            let mut client = remote.client(true)?;
            let options = PutOptions {
                only_if_absent: if_absent,
                save_to_cache: false,
            };
            let result = match (value, file) {
                (Some(value), _) => client.put(&name, &value, options),
                (None, Some(path)) => client.put_from_file(&name, &path, options),
                (None, None) => {
                    let value = read_stdin_value()?;
                    client.put(&name, &value, options)
                }
            };
            match result {
                Ok(PutOutcome::Chunked { parts }) => {
                    client
                        .channel()
                        .notice("put", &format!("{name} stored as {parts} parts"));
                    Ok(RunOutcome::ok())
                }
                Ok(PutOutcome::Stored | PutOutcome::SkippedExisting) => Ok(RunOutcome::ok()),
                Err(err) => Ok(RunOutcome::reported(&err)),
            }
        }
        Command::Delete { names, large } => {
            let mut client = remote.client(false)?;
            let mut outcome = RunOutcome::ok();
            for name in &names {
                if let Err(err) = client.delete(name, DeleteOptions { large }) {
                    if outcome.exit_code == 0 {
                        outcome = RunOutcome::reported(&err);
                    }
                }
            }
            Ok(outcome)
        }
        Command::List { prefix, json } => {
            let mut client = remote.client(false)?;
            let result = match prefix.as_deref() {
                Some(prefix) => client.list_prefix(prefix),
                None => client.list(),
            };
            let names = match result {
                Ok(names) => names,
                Err(err) => return Ok(RunOutcome::reported(&err)),
            };
            if json {
                emit_json(json!({ "names": names }));
            } else {
                for name in names {
                    println!("{name}");
                }
            }
            Ok(RunOutcome::ok())
        }
        Command::Exists { name } => {
            let mut client = remote.client(false)?;
            match client.exists(&name) {
                Ok(exists) => {
                    println!("{exists}");
                    Ok(RunOutcome::ok())
                }
                Err(err) => Ok(RunOutcome::reported(&err)),
            }
        }
        Command::Parts { name, json } => {
            // Part naming depends on the chunk size only through capacity, so no limit lookup.
            let mut client = remote.client(false)?;
            let parts = match client.parts(&name) {
                Ok(parts) => parts,
                Err(err) => return Ok(RunOutcome::reported(&err)),
            };
            if json {
                emit_json(json!({ "name": name, "parts": parts }));
            } else {
                for part in parts {
                    println!("{part}");
                }
            }
            Ok(RunOutcome::ok())
        }
        Command::Eval {
            name,
            allow_eval,
            shell,
            large,
        } => {
            let policy = if allow_eval {
                EvalPolicy::allow(shell)
            } else {
                EvalPolicy::deny()
            };
            let mut client = remote.client(false)?.with_eval(policy);
            let options = GetOptions {
                large,
                ..GetOptions::default()
            };
            match client.eval(&name, options) {
                Ok(status) => Ok(RunOutcome::with_code(status.code().unwrap_or(1))),
                Err(err) => Ok(RunOutcome::reported(&err)),
            }
        }
    }
}
