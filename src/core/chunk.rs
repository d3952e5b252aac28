// Chunked transport for values above the store's per-entry size ceiling.
//
// Parts live under the parent name as `<parent>/<basename>_a<letter>`, one
// letter per part from a fixed alphabet. No part count is stored: readers
// probe letters in order and stop at the first missing part.
use tracing::debug;

use crate::core::error::{ApiResult, Error, ErrorKind};
use crate::core::store::{DEFAULT_MAX_VALUE_BYTES, ParamStore};

pub const DEFAULT_CHUNK_SIZE: usize = DEFAULT_MAX_VALUE_BYTES;
pub const DEFAULT_SUFFIXES: &str = "abcdefghi";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChunkCodec {
    chunk_size: usize,
    suffixes: Vec<char>,
}

impl ChunkCodec {
    pub fn new(chunk_size: usize) -> ApiResult<Self> {
        Self::with_suffixes(chunk_size, DEFAULT_SUFFIXES)
    }

    pub fn with_suffixes(chunk_size: usize, suffixes: &str) -> ApiResult<Self> {
        if chunk_size == 0 {
            return Err(Error::new(ErrorKind::InvalidCall)
                .with_message("chunk size must be greater than zero"));
        }
        let suffixes: Vec<char> = suffixes.chars().collect();
        if suffixes.is_empty() || !suffixes.iter().all(|c| c.is_ascii_lowercase()) {
            return Err(Error::new(ErrorKind::InvalidCall)
                .with_message("part suffixes must be one or more lowercase ascii letters"));
        }
        let mut seen = suffixes.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != suffixes.len() {
            return Err(
                Error::new(ErrorKind::InvalidCall).with_message("part suffixes must be unique")
            );
        }
        Ok(Self {
            chunk_size,
            suffixes,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn max_parts(&self) -> usize {
        self.suffixes.len()
    }

    /// Largest value (in bytes) that fits in `max_parts` full chunks.
    pub fn capacity(&self) -> usize {
        self.chunk_size.saturating_mul(self.suffixes.len())
    }

    pub fn part_name(&self, parent: &str, index: usize) -> ApiResult<Option<String>> {
        let (parent, base) = split_parent(parent)?;
        Ok(self
            .suffixes
            .get(index)
            .map(|letter| format!("{parent}/{base}_a{letter}")))
    }

    fn part_names(&self, parent: &str) -> ApiResult<Vec<String>> {
        let (parent, base) = split_parent(parent)?;
        Ok(self
            .suffixes
            .iter()
            .map(|letter| format!("{parent}/{base}_a{letter}"))
            .collect())
    }

    /// Splits on byte boundaries of at most `chunk_size`, backing off so no
    /// chunk ends inside a UTF-8 sequence.
    pub fn split<'a>(&self, value: &'a str) -> ApiResult<Vec<&'a str>> {
        let mut chunks = Vec::new();
        let mut rest = value;
        while !rest.is_empty() {
            let mut end = rest.len().min(self.chunk_size);
            while !rest.is_char_boundary(end) {
                end -= 1;
            }
            if end == 0 {
                return Err(Error::new(ErrorKind::InvalidCall).with_message(format!(
                    "chunk size {} is smaller than a single character",
                    self.chunk_size
                )));
            }
            let (head, tail) = rest.split_at(end);
            chunks.push(head);
            rest = tail;
            if chunks.len() > self.suffixes.len() {
                return Err(self.capacity_error(value.len()));
            }
        }
        Ok(chunks)
    }

    /// Writes `value` as parts in index order and returns the part count.
    /// Parts beyond the new count left by an older, longer value are removed.
    pub fn put<S: ParamStore + ?Sized>(
        &self,
        store: &S,
        parent: &str,
        value: &str,
        key_id: &str,
    ) -> ApiResult<usize> {
        if value.is_empty() {
            return Err(Error::new(ErrorKind::InvalidCall)
                .with_message("large value is empty")
                .with_name(parent));
        }
        let names = self.part_names(parent)?;
        let chunks = self
            .split(value)
            .map_err(|err| err.with_name(parent.to_string()))?;
        for (index, (name, chunk)) in names.iter().zip(&chunks).enumerate() {
            debug!(part = %name, bytes = chunk.len(), "storing chunk");
            store
                .put_value(name, chunk, key_id)
                .map_err(|err| err.with_part(index))?;
        }
        for (index, name) in names.iter().enumerate().skip(chunks.len()) {
            if !store.exists(name).map_err(|err| err.with_part(index))? {
                break;
            }
            debug!(part = %name, "removing stale chunk");
            store.delete_value(name).map_err(|err| err.with_part(index))?;
        }
        Ok(chunks.len())
    }

    pub fn get<S: ParamStore + ?Sized>(
        &self,
        store: &S,
        parent: &str,
        decrypt: bool,
    ) -> ApiResult<String> {
        let mut value = String::new();
        for (index, name) in self.part_names(parent)?.iter().enumerate() {
            if !store.exists(name).map_err(|err| err.with_part(index))? {
                break;
            }
            let chunk = store
                .get_value(name, decrypt)
                .map_err(|err| err.with_part(index))?;
            value.push_str(&chunk);
        }
        Ok(value)
    }

    /// Deletes parts in order until the first gap and returns how many went.
    pub fn delete<S: ParamStore + ?Sized>(&self, store: &S, parent: &str) -> ApiResult<usize> {
        let mut deleted = 0;
        for (index, name) in self.part_names(parent)?.iter().enumerate() {
            if !store.exists(name).map_err(|err| err.with_part(index))? {
                break;
            }
            store.delete_value(name).map_err(|err| err.with_part(index))?;
            deleted += 1;
        }
        Ok(deleted)
    }

    pub fn parts<S: ParamStore + ?Sized>(&self, store: &S, parent: &str) -> ApiResult<Vec<String>> {
        let mut found = Vec::new();
        for (index, name) in self.part_names(parent)?.into_iter().enumerate() {
            if !store.exists(&name).map_err(|err| err.with_part(index))? {
                break;
            }
            found.push(name);
        }
        Ok(found)
    }

    fn capacity_error(&self, len: usize) -> Error {
        Error::new(ErrorKind::CapacityExceeded)
            .with_message(format!(
                "value of {len} bytes needs more than {} parts of {} bytes",
                self.suffixes.len(),
                self.chunk_size
            ))
            .with_hint(format!(
                "Large values are limited to {} bytes. Parts end on character boundaries, so multi-byte characters can use up capacity early.",
                self.capacity()
            ))
    }
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            suffixes: DEFAULT_SUFFIXES.chars().collect(),
        }
    }
}

fn split_parent(parent: &str) -> ApiResult<(&str, &str)> {
    let trimmed = parent.trim_end_matches('/');
    let base = trimmed.rsplit('/').next().unwrap_or_default();
    if base.is_empty() {
        return Err(Error::new(ErrorKind::InvalidCall)
            .with_message("large parameter name needs a non-empty last segment")
            .with_name(parent));
    }
    Ok((trimmed, base))
}
