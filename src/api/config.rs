//! Purpose: Structured client configuration shared by every facade operation.
//! Exports: `ClientConfig`, `DEFAULT_KEY_ID`.
//! Role: Replace ad-hoc option flags with named fields set once per client.
//! Invariants: Configuration is read-only after the client is built.

use crate::core::chunk::{ChunkCodec, DEFAULT_SUFFIXES};
use crate::core::error::{ApiResult, Error, ErrorKind};
use crate::core::report::Verbosity;

pub const DEFAULT_KEY_ID: &str = "alias/paramstash";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientConfig {
    pub verbosity: Verbosity,
    /// Encryption key identifier passed with every write.
    pub key_id: String,
    /// Chunk size for large values; `None` uses the store's per-entry ceiling.
    pub chunk_size: Option<usize>,
    pub part_suffixes: String,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            verbosity: Verbosity::Normal,
            key_id: DEFAULT_KEY_ID.to_string(),
            chunk_size: None,
            part_suffixes: DEFAULT_SUFFIXES.to_string(),
        }
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = key_id.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn with_part_suffixes(mut self, suffixes: impl Into<String>) -> Self {
        self.part_suffixes = suffixes.into();
        self
    }

    pub(crate) fn codec(&self, store_max_value_bytes: usize) -> ApiResult<ChunkCodec> {
        let chunk_size = self.chunk_size.unwrap_or(store_max_value_bytes);
        if chunk_size > store_max_value_bytes {
            return Err(Error::new(ErrorKind::InvalidCall)
                .with_message(format!(
                    "chunk size {chunk_size} exceeds the store limit of {store_max_value_bytes} bytes"
                ))
                .with_hint("Use a chunk size no larger than the store's per-entry limit."));
        }
        ChunkCodec::with_suffixes(chunk_size, &self.part_suffixes)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
