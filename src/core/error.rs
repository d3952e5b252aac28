// Error value shared by the cache, the chunk codec, stores, and the facade.
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    InvalidCall,
    RemoteOperationFailed,
    NotCached,
    FileUnreadable,
    CapacityExceeded,
    Permission,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    name: Option<String>,
    part: Option<usize>,
    code: Option<String>,
    diagnostics: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            name: None,
            part: None,
            code: None,
            diagnostics: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Parameter name the failure refers to, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Zero-based chunk index for failures inside a chunked transfer.
    pub fn part(&self) -> Option<usize> {
        self.part
    }

    /// Machine-checkable code reported by the remote store.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Raw (possibly multi-line) diagnostic text captured from the transport.
    pub fn diagnostics(&self) -> Option<&str> {
        self.diagnostics.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_part(mut self, part: usize) -> Self {
        self.part = Some(part);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: impl Into<String>) -> Self {
        self.diagnostics = Some(diagnostics.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub(crate) fn take_diagnostics(&mut self) -> Option<String> {
        self.diagnostics.take()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(code) = &self.code {
            write!(f, " (code: {code})")?;
        }
        if let Some(name) = &self.name {
            write!(f, " (name: {name})")?;
        }
        if let Some(part) = self.part {
            write!(f, " (part: {part})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub type ApiResult<T> = Result<T, Error>;

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::InvalidCall => 2,
        ErrorKind::RemoteOperationFailed => 3,
        ErrorKind::NotCached => 4,
        ErrorKind::FileUnreadable => 5,
        ErrorKind::CapacityExceeded => 6,
        ErrorKind::Permission => 7,
        ErrorKind::Io => 8,
    }
}
