//! Purpose: Define the parameter facade composing cache, chunk codec, and store.
//! Exports: `ParamClient`, option structs, `PutOutcome`, `EvalPolicy`.
//! Role: Public operation surface used by the CLI and library callers.
//! Invariants: Every operation resets the error channel, then reports its outcome.
//! Invariants: Failed remote calls never modify the cache.
//! Invariants: `eval` stays disabled unless the caller installs `EvalPolicy::allow`.
#![allow(clippy::result_large_err)]

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use tracing::debug;

use super::config::ClientConfig;
use crate::core::cache::LocalCache;
use crate::core::chunk::ChunkCodec;
use crate::core::error::{ApiResult, Error, ErrorKind};
use crate::core::report::ErrorChannel;
use crate::core::store::{CODE_NOT_FOUND, ParamStore, remote_error};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GetOptions {
    /// Serve from the cache when possible and populate it after a remote read.
    pub use_cache: bool,
    /// Answer from the cache alone; a miss is `NotCached`.
    pub cache_only: bool,
    /// Reassemble the value from chunk parts.
    pub large: bool,
    pub decrypt: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            use_cache: false,
            cache_only: false,
            large: false,
            decrypt: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PutOptions {
    pub only_if_absent: bool,
    pub save_to_cache: bool,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeleteOptions {
    pub large: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PutOutcome {
    Stored,
    Chunked { parts: usize },
    SkippedExisting,
}

/// Opt-in gate for executing fetched values as shell commands.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EvalPolicy {
    shell: Option<PathBuf>,
}

impl EvalPolicy {
    pub fn deny() -> Self {
        Self { shell: None }
    }

    pub fn allow(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: Some(shell.into()),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.shell.is_some()
    }
}

pub struct ParamClient<S> {
    store: S,
    cache: LocalCache,
    codec: ChunkCodec,
    config: ClientConfig,
    channel: ErrorChannel,
    eval: EvalPolicy,
}

impl<S: ParamStore> ParamClient<S> {
    pub fn new(store: S) -> ApiResult<Self> {
        Self::with_config(store, ClientConfig::default())
    }

    pub fn with_config(store: S, config: ClientConfig) -> ApiResult<Self> {
        let codec = config.codec(store.max_value_bytes())?;
        Ok(Self {
            store,
            cache: LocalCache::new(),
            codec,
            channel: ErrorChannel::new(config.verbosity),
            config,
            eval: EvalPolicy::deny(),
        })
    }

    pub fn with_channel(mut self, channel: ErrorChannel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_eval(mut self, policy: EvalPolicy) -> Self {
        self.eval = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn codec(&self) -> &ChunkCodec {
        &self.codec
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut LocalCache {
        &mut self.cache
    }

    pub fn channel(&self) -> &ErrorChannel {
        &self.channel
    }

    pub fn get(&mut self, name: &str, options: GetOptions) -> ApiResult<String> {
        self.run("get", |client| client.get_inner(name, options))
    }

    pub fn put(&mut self, name: &str, value: &str, options: PutOptions) -> ApiResult<PutOutcome> {
        self.run("put", |client| client.put_inner(name, value, options))
    }

    pub fn put_from_file(
        &mut self,
        name: &str,
        path: impl AsRef<Path>,
        options: PutOptions,
    ) -> ApiResult<PutOutcome> {
        let path = path.as_ref();
        self.run("put", |client| {
            let value = std::fs::read_to_string(path).map_err(|err| {
                Error::new(ErrorKind::FileUnreadable)
                    .with_message(format!("cannot read {}", path.display()))
                    .with_name(name)
                    .with_source(err)
            })?;
            client.put_inner(name, &value, options)
        })
    }

    pub fn delete(&mut self, name: &str, options: DeleteOptions) -> ApiResult<()> {
        self.run("delete", |client| {
            ensure_name(name)?;
            if options.large {
                let deleted = client.codec.delete(&client.store, name)?;
                if deleted == 0 {
                    return Err(remote_error(CODE_NOT_FOUND, "no parts found for large parameter")
                        .with_name(name));
                }
                debug!(name, parts = deleted, "deleted large parameter");
            } else {
                client.store.delete_value(name)?;
            }
            client.cache.delete(name);
            Ok(())
        })
    }

    pub fn exists(&mut self, name: &str) -> ApiResult<bool> {
        self.run("exists", |client| {
            ensure_name(name)?;
            client.store.exists(name)
        })
    }

    /// All catalog names, sorted.
    pub fn list(&mut self) -> ApiResult<Vec<String>> {
        self.run("list", |client| {
            let mut names = client.store.list_names()?;
            names.sort();
            Ok(names)
        })
    }

    pub fn list_prefix(&mut self, prefix: &str) -> ApiResult<Vec<String>> {
        self.run("list", |client| {
            let mut names: Vec<String> = client
                .store
                .list_names()?
                .into_iter()
                .filter(|name| name.starts_with(prefix))
                .collect();
            names.sort();
            Ok(names)
        })
    }

    /// Chunk part names currently stored for `name`, in order, up to the first gap.
    pub fn parts(&mut self, name: &str) -> ApiResult<Vec<String>> {
        self.run("parts", |client| {
            ensure_name(name)?;
            client.codec.parts(&client.store, name)
        })
    }

    /// Fetches `name` and runs it through the configured shell.
    pub fn eval(&mut self, name: &str, options: GetOptions) -> ApiResult<ExitStatus> {
        self.run("eval", |client| {
            let Some(shell) = client.eval.shell.clone() else {
                return Err(Error::new(ErrorKind::Permission)
                    .with_message("evaluating parameters is disabled")
                    .with_hint("Opt in explicitly (CLI: --allow-eval).")
                    .with_name(name));
            };
            let script = client.get_inner(name, options)?;
            debug!(name, shell = %shell.display(), "evaluating parameter");
            Command::new(&shell)
                .arg("-c")
                .arg(&script)
                .status()
                .map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message(format!("failed to run {}", shell.display()))
                        .with_name(name)
                        .with_source(err)
                })
        })
    }

    fn run<T>(
        &mut self,
        caller: &str,
        op: impl FnOnce(&mut Self) -> ApiResult<T>,
    ) -> ApiResult<T> {
        self.channel.reset();
        let mut result = op(self);
        self.channel.observe(caller, &mut result);
        result
    }

    fn get_inner(&mut self, name: &str, options: GetOptions) -> ApiResult<String> {
        ensure_name(name)?;
        if options.cache_only {
            return self.cache.get(name).map(str::to_string).ok_or_else(|| {
                Error::new(ErrorKind::NotCached)
                    .with_message("parameter is not cached")
                    .with_name(name)
            });
        }
        // Only decrypted values are cached, so undecrypted reads bypass it.
        let cacheable = options.use_cache && options.decrypt;
        if cacheable {
            if let Some(value) = self.cache.get(name) {
                debug!(name, "cache hit");
                return Ok(value.to_string());
            }
        }
        let value = if options.large {
            let value = self.codec.get(&self.store, name, options.decrypt)?;
            if value.is_empty() {
                return Err(remote_error(CODE_NOT_FOUND, "no parts found for large parameter")
                    .with_name(name));
            }
            value
        } else {
            self.store.get_value(name, options.decrypt)?
        };
        if cacheable {
            self.cache.put(name, value.clone());
        }
        Ok(value)
    }

    fn put_inner(&mut self, name: &str, value: &str, options: PutOptions) -> ApiResult<PutOutcome> {
        ensure_name(name)?;
        if options.only_if_absent && self.exists_any(name)? {
            self.channel
                .notice("put", &format!("{name} already exists; leaving it unchanged"));
            return Ok(PutOutcome::SkippedExisting);
        }
        let key_id = self.config.key_id.as_str();
        // A name holds either a plain entry or chunk parts, never both.
        let outcome = if value.len() > self.codec.chunk_size() {
            let parts = self.codec.put(&self.store, name, value, key_id)?;
            if self.store.exists(name)? {
                debug!(name, "removing plain entry replaced by parts");
                self.store.delete_value(name)?;
            }
            PutOutcome::Chunked { parts }
        } else {
            self.store.put_value(name, value, key_id)?;
            if let Ok(Some(_)) = self.codec.part_name(name, 0) {
                let removed = self.codec.delete(&self.store, name)?;
                if removed > 0 {
                    debug!(name, parts = removed, "removed parts replaced by plain entry");
                }
            }
            PutOutcome::Stored
        };
        if options.save_to_cache {
            self.cache.put(name, value);
        } else {
            self.cache.delete(name);
        }
        Ok(outcome)
    }

    fn exists_any(&self, name: &str) -> ApiResult<bool> {
        if self.store.exists(name)? {
            return Ok(true);
        }
        match self.codec.part_name(name, 0) {
            Ok(Some(first)) => self.store.exists(&first),
            _ => Ok(false),
        }
    }
}

fn ensure_name(name: &str) -> ApiResult<()> {
    if name.is_empty() {
        return Err(Error::new(ErrorKind::InvalidCall).with_message("parameter name is empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{DeleteOptions, EvalPolicy, GetOptions, ParamClient, PutOptions, PutOutcome};
    use crate::api::ClientConfig;
    use crate::core::error::ErrorKind;
    use crate::core::report::{ErrorChannel, Verbosity};
    use crate::core::store::{MemoryStore, ParamStore};
    use std::sync::{Arc, Mutex};

    fn client() -> ParamClient<MemoryStore> {
        ParamClient::with_config(
            MemoryStore::new(),
            ClientConfig::new().with_verbosity(Verbosity::Quiet),
        )
        .expect("client")
    }

    fn cached() -> GetOptions {
        GetOptions {
            use_cache: true,
            ..GetOptions::default()
        }
    }

    fn cache_only() -> GetOptions {
        GetOptions {
            cache_only: true,
            ..GetOptions::default()
        }
    }

    #[test]
    fn put_then_get_without_cache_then_cache_only_misses() {
        let mut client = client();
        client
            .put("/app/token", "secret123", PutOptions::default())
            .expect("put");
        assert_eq!(
            client.get("/app/token", GetOptions::default()).expect("get"),
            "secret123"
        );

        let err = client.get("/app/token", cache_only()).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::NotCached);
        assert_eq!(client.channel().last_kind(), Some(ErrorKind::NotCached));
    }

    #[test]
    fn put_with_save_serves_cache_only_reads_without_remote_calls() {
        let mut client = client();
        client
            .put(
                "/app/token",
                "secret123",
                PutOptions {
                    save_to_cache: true,
                    ..PutOptions::default()
                },
            )
            .expect("put");
        let calls = client.store().calls();
        assert_eq!(client.get("/app/token", cache_only()).expect("get"), "secret123");
        assert_eq!(client.store().calls(), calls);
        assert!(!client.channel().failed());
    }

    #[test]
    fn read_through_cache_avoids_second_remote_read() {
        let mut client = client();
        client
            .store()
            .put_value("/db/url", "postgres://x", "k")
            .expect("seed");
        assert_eq!(client.get("/db/url", cached()).expect("first"), "postgres://x");
        let calls = client.store().calls();
        assert_eq!(client.get("/db/url", cached()).expect("second"), "postgres://x");
        assert_eq!(client.store().calls(), calls);
    }

    #[test]
    fn failed_remote_read_leaves_cache_untouched() {
        let mut client = client();
        let err = client.get("/missing", cached()).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::RemoteOperationFailed);
        assert_eq!(client.channel().last_code(), Some("ParameterNotFound"));
        assert!(client.cache().is_empty());
    }

    #[test]
    fn undecrypted_reads_are_not_cached() {
        let mut client = client();
        client.store().put_value("/k", "v", "k").expect("seed");
        let options = GetOptions {
            decrypt: false,
            ..cached()
        };
        client.get("/k", options).expect("get");
        assert!(!client.cache().exists("/k"));
    }

    #[test]
    fn only_if_absent_skips_existing_names() {
        let mut client = client();
        let options = PutOptions {
            only_if_absent: true,
            ..PutOptions::default()
        };
        assert_eq!(client.put("/a", "one", options).expect("put"), PutOutcome::Stored);
        assert_eq!(
            client.put("/a", "two", options).expect("put"),
            PutOutcome::SkippedExisting
        );
        assert_eq!(client.get("/a", GetOptions::default()).expect("get"), "one");
    }

    #[test]
    fn only_if_absent_emits_notice_when_verbose() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let mut client = ParamClient::new(MemoryStore::new())
            .expect("client")
            .with_channel(ErrorChannel::new(Verbosity::Verbose).with_buffer(buffer.clone()));
        let options = PutOptions {
            only_if_absent: true,
            ..PutOptions::default()
        };
        client.put("/a", "one", options).expect("put");
        client.put("/a", "two", options).expect("put");
        let lines = buffer.lock().unwrap().clone();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(" put: /a already exists; leaving it unchanged"));
    }

    #[test]
    fn oversized_put_is_chunked_and_read_back_as_large() {
        let mut client = ParamClient::with_config(
            MemoryStore::with_max_value_bytes(8),
            ClientConfig::new().with_verbosity(Verbosity::Quiet),
        )
        .expect("client");
        let value = "0123456789abcdefXYZ";
        assert_eq!(
            client.put("/app/cert", value, PutOptions::default()).expect("put"),
            PutOutcome::Chunked { parts: 3 }
        );
        assert!(!client.store().exists("/app/cert").expect("exists"));
        let options = GetOptions {
            large: true,
            ..GetOptions::default()
        };
        assert_eq!(client.get("/app/cert", options).expect("get"), value);
        assert_eq!(
            client.parts("/app/cert").expect("parts"),
            vec!["/app/cert/cert_aa", "/app/cert/cert_ab", "/app/cert/cert_ac"]
        );

        let skip = PutOptions {
            only_if_absent: true,
            ..PutOptions::default()
        };
        assert_eq!(
            client.put("/app/cert", "other", skip).expect("put"),
            PutOutcome::SkippedExisting
        );

        client
            .delete("/app/cert", DeleteOptions { large: true })
            .expect("delete");
        assert!(client.list().expect("list").is_empty());
        let err = client
            .delete("/app/cert", DeleteOptions { large: true })
            .expect_err("err");
        assert_eq!(err.code(), Some("ParameterNotFound"));
    }

    #[test]
    fn plain_rewrite_removes_old_parts() {
        let mut client = ParamClient::with_config(
            MemoryStore::with_max_value_bytes(8),
            ClientConfig::new().with_verbosity(Verbosity::Quiet),
        )
        .expect("client");
        client
            .put("/app/cert", "0123456789abcdefXYZ", PutOptions::default())
            .expect("chunked put");
        assert_eq!(
            client.put("/app/cert", "short", PutOptions::default()).expect("put"),
            PutOutcome::Stored
        );

        assert_eq!(client.list().expect("list"), vec!["/app/cert"]);
        assert!(client.parts("/app/cert").expect("parts").is_empty());
        let large = GetOptions {
            large: true,
            ..GetOptions::default()
        };
        assert!(client.get("/app/cert", large).is_err());
        assert_eq!(client.get("/app/cert", GetOptions::default()).expect("get"), "short");
    }

    #[test]
    fn chunked_rewrite_removes_old_plain_entry() {
        let mut client = ParamClient::with_config(
            MemoryStore::with_max_value_bytes(8),
            ClientConfig::new().with_verbosity(Verbosity::Quiet),
        )
        .expect("client");
        client
            .put("/app/cert", "short", PutOptions::default())
            .expect("plain put");
        assert_eq!(
            client
                .put("/app/cert", "0123456789abcdefXYZ", PutOptions::default())
                .expect("put"),
            PutOutcome::Chunked { parts: 3 }
        );

        assert!(!client.store().exists("/app/cert").expect("exists"));
        assert!(client.get("/app/cert", GetOptions::default()).is_err());
        let large = GetOptions {
            large: true,
            ..GetOptions::default()
        };
        assert_eq!(
            client.get("/app/cert", large).expect("get"),
            "0123456789abcdefXYZ"
        );
    }

    #[test]
    fn chunk_size_above_store_limit_is_rejected() {
        let err = ParamClient::with_config(
            MemoryStore::with_max_value_bytes(8),
            ClientConfig::new().with_chunk_size(9),
        )
        .err()
        .expect("rejected");
        assert_eq!(err.kind(), ErrorKind::InvalidCall);

        let client = ParamClient::with_config(
            MemoryStore::with_max_value_bytes(8),
            ClientConfig::new().with_chunk_size(4),
        )
        .expect("smaller chunk size");
        assert_eq!(client.codec().chunk_size(), 4);
    }

    #[test]
    fn capacity_overflow_is_reported() {
        let mut client = ParamClient::with_config(
            MemoryStore::with_max_value_bytes(2),
            ClientConfig::new().with_verbosity(Verbosity::Quiet),
        )
        .expect("client");
        let err = client
            .put("/p", &"x".repeat(19), PutOptions::default())
            .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
        assert_eq!(client.channel().last_kind(), Some(ErrorKind::CapacityExceeded));
        assert!(client.list().expect("list").is_empty());
        assert!(!client.channel().failed());
    }

    #[test]
    fn delete_invalidates_cache_only_after_remote_success() {
        let mut client = client();
        client.cache_mut().put("/ghost", "cached");
        assert!(client.delete("/ghost", DeleteOptions::default()).is_err());
        assert!(client.cache().exists("/ghost"));

        let save = PutOptions {
            save_to_cache: true,
            ..PutOptions::default()
        };
        client.put("/real", "v", save).expect("put");
        client.delete("/real", DeleteOptions::default()).expect("delete");
        assert!(!client.cache().exists("/real"));
    }

    #[test]
    fn plain_put_invalidates_stale_cache_entry() {
        let mut client = client();
        let save = PutOptions {
            save_to_cache: true,
            ..PutOptions::default()
        };
        client.put("/a", "old", save).expect("put");
        client.put("/a", "new", PutOptions::default()).expect("put");
        assert!(!client.cache().exists("/a"));
        assert_eq!(client.get("/a", cached()).expect("get"), "new");
    }

    #[test]
    fn put_from_file_reads_whole_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("value.txt");
        std::fs::write(&path, "line one\nline two\n").expect("write");

        let mut client = client();
        client
            .put_from_file("/app/file", &path, PutOptions::default())
            .expect("put");
        assert_eq!(
            client.get("/app/file", GetOptions::default()).expect("get"),
            "line one\nline two\n"
        );

        let err = client
            .put_from_file("/app/file", temp.path().join("missing"), PutOptions::default())
            .expect_err("err");
        assert_eq!(err.kind(), ErrorKind::FileUnreadable);
    }

    #[test]
    fn list_and_prefix_are_sorted() {
        let mut client = client();
        for name in ["/b/2", "/a/1", "/b/1"] {
            client.put(name, "v", PutOptions::default()).expect("put");
        }
        assert_eq!(client.list().expect("list"), vec!["/a/1", "/b/1", "/b/2"]);
        assert_eq!(client.list_prefix("/b/").expect("list"), vec!["/b/1", "/b/2"]);
        assert!(client.exists("/a/1").expect("exists"));
        assert!(!client.exists("/a/2").expect("exists"));
    }

    #[test]
    fn empty_name_is_invalid_call() {
        let mut client = client();
        let err = client.get("", GetOptions::default()).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::InvalidCall);
    }

    #[test]
    fn eval_is_denied_by_default() {
        let mut client = client();
        client.put("/cmd", "true", PutOptions::default()).expect("put");
        let err = client.eval("/cmd", GetOptions::default()).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Permission);
    }

    #[cfg(unix)]
    #[test]
    fn eval_runs_value_when_allowed() {
        let mut client = client().with_eval(EvalPolicy::allow("/bin/sh"));
        client.put("/cmd/ok", "exit 0", PutOptions::default()).expect("put");
        client.put("/cmd/fail", "exit 3", PutOptions::default()).expect("put");
        assert!(client.eval("/cmd/ok", GetOptions::default()).expect("eval").success());
        let status = client.eval("/cmd/fail", GetOptions::default()).expect("eval");
        assert_eq!(status.code(), Some(3));
    }
}
