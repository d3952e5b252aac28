// Remote parameter store contract plus an in-memory implementation.
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::error::{ApiResult, Error, ErrorKind};

pub const DEFAULT_MAX_VALUE_BYTES: usize = 4096;

pub const CODE_NOT_FOUND: &str = "ParameterNotFound";
pub const CODE_TOO_LARGE: &str = "ValueTooLarge";
pub const CODE_INVALID_REQUEST: &str = "InvalidRequest";
pub const CODE_ACCESS_DENIED: &str = "AccessDenied";
pub const CODE_INTERNAL: &str = "Internal";

/// Minimal operations the cache and chunk codec need from a backing store.
///
/// Writes always overwrite. `delete_value` fails for unknown names, so callers
/// that tolerate absence should check `exists` first. Failures surface as
/// `RemoteOperationFailed` with a code and any transport diagnostics.
pub trait ParamStore {
    fn get_value(&self, name: &str, decrypt: bool) -> ApiResult<String>;
    fn put_value(&self, name: &str, value: &str, key_id: &str) -> ApiResult<()>;
    fn delete_value(&self, name: &str) -> ApiResult<()>;
    fn exists(&self, name: &str) -> ApiResult<bool>;
    fn list_names(&self) -> ApiResult<Vec<String>>;

    fn max_value_bytes(&self) -> usize {
        DEFAULT_MAX_VALUE_BYTES
    }
}

impl<S: ParamStore + ?Sized> ParamStore for &S {
    fn get_value(&self, name: &str, decrypt: bool) -> ApiResult<String> {
        (**self).get_value(name, decrypt)
    }

    fn put_value(&self, name: &str, value: &str, key_id: &str) -> ApiResult<()> {
        (**self).put_value(name, value, key_id)
    }

    fn delete_value(&self, name: &str) -> ApiResult<()> {
        (**self).delete_value(name)
    }

    fn exists(&self, name: &str) -> ApiResult<bool> {
        (**self).exists(name)
    }

    fn list_names(&self) -> ApiResult<Vec<String>> {
        (**self).list_names()
    }

    fn max_value_bytes(&self) -> usize {
        (**self).max_value_bytes()
    }
}

impl<S: ParamStore + ?Sized> ParamStore for std::sync::Arc<S> {
    fn get_value(&self, name: &str, decrypt: bool) -> ApiResult<String> {
        (**self).get_value(name, decrypt)
    }

    fn put_value(&self, name: &str, value: &str, key_id: &str) -> ApiResult<()> {
        (**self).put_value(name, value, key_id)
    }

    fn delete_value(&self, name: &str) -> ApiResult<()> {
        (**self).delete_value(name)
    }

    fn exists(&self, name: &str) -> ApiResult<bool> {
        (**self).exists(name)
    }

    fn list_names(&self) -> ApiResult<Vec<String>> {
        (**self).list_names()
    }

    fn max_value_bytes(&self) -> usize {
        (**self).max_value_bytes()
    }
}

pub fn remote_error(code: &str, message: impl Into<String>) -> Error {
    Error::new(ErrorKind::RemoteOperationFailed)
        .with_code(code)
        .with_message(message)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredParam {
    pub value: String,
    pub key_id: String,
}

/// Mutex-guarded catalog with the same size ceiling and error codes as a
/// real store. Values are held as plaintext; `decrypt` is accepted for parity.
#[derive(Debug)]
pub struct MemoryStore {
    params: Mutex<BTreeMap<String, StoredParam>>,
    max_value_bytes: usize,
    calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_max_value_bytes(DEFAULT_MAX_VALUE_BYTES)
    }

    pub fn with_max_value_bytes(max_value_bytes: usize) -> Self {
        Self {
            params: Mutex::new(BTreeMap::new()),
            max_value_bytes,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of store operations served so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stored(&self, name: &str) -> Option<StoredParam> {
        self.lock().ok()?.get(name).cloned()
    }

    fn lock(&self) -> ApiResult<std::sync::MutexGuard<'_, BTreeMap<String, StoredParam>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.params
            .lock()
            .map_err(|_| remote_error(CODE_INTERNAL, "parameter catalog lock poisoned"))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamStore for MemoryStore {
    fn get_value(&self, name: &str, _decrypt: bool) -> ApiResult<String> {
        let params = self.lock()?;
        params
            .get(name)
            .map(|param| param.value.clone())
            .ok_or_else(|| remote_error(CODE_NOT_FOUND, "parameter not found").with_name(name))
    }

    fn put_value(&self, name: &str, value: &str, key_id: &str) -> ApiResult<()> {
        let mut params = self.lock()?;
        if name.is_empty() {
            return Err(remote_error(CODE_INVALID_REQUEST, "parameter name is empty"));
        }
        if value.len() > self.max_value_bytes {
            return Err(remote_error(
                CODE_TOO_LARGE,
                format!(
                    "value is {} bytes; the limit is {} bytes",
                    value.len(),
                    self.max_value_bytes
                ),
            )
            .with_name(name));
        }
        params.insert(
            name.to_string(),
            StoredParam {
                value: value.to_string(),
                key_id: key_id.to_string(),
            },
        );
        Ok(())
    }

    fn delete_value(&self, name: &str) -> ApiResult<()> {
        let mut params = self.lock()?;
        match params.remove(name) {
            Some(_) => Ok(()),
            None => Err(remote_error(CODE_NOT_FOUND, "parameter not found").with_name(name)),
        }
    }

    fn exists(&self, name: &str) -> ApiResult<bool> {
        Ok(self.lock()?.contains_key(name))
    }

    fn list_names(&self) -> ApiResult<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    fn max_value_bytes(&self) -> usize {
        self.max_value_bytes
    }
}
