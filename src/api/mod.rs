//! Purpose: Define the public Rust API boundary for paramstash.
//! Exports: The parameter facade, its options, configuration, and store adapters.
//! Role: Public, additive-only surface used by the CLI, dev server, and tests.
//! Invariants: Callers reach storage only through `ParamStore` implementations.

mod client;
mod config;
mod remote;

pub use crate::core::cache::{CacheEntry, LocalCache, derive_key};
pub use crate::core::chunk::{ChunkCodec, DEFAULT_CHUNK_SIZE, DEFAULT_SUFFIXES};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{ApiResult, Error, ErrorKind};
pub use crate::core::report::{ErrorChannel, Verbosity, format_line, timestamp_now};
pub use crate::core::store::{
    CODE_ACCESS_DENIED, CODE_INTERNAL, CODE_INVALID_REQUEST, CODE_NOT_FOUND, CODE_TOO_LARGE,
    DEFAULT_MAX_VALUE_BYTES, MemoryStore, ParamStore, remote_error,
};
pub use client::{DeleteOptions, EvalPolicy, GetOptions, ParamClient, PutOptions, PutOutcome};
pub use config::{ClientConfig, DEFAULT_KEY_ID};
pub use remote::HttpStore;
