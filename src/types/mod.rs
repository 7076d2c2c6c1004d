#![forbid(unsafe_code)]

//! Shared identifiers, access enums and the crate-wide error type.

use std::fmt;

/// Page number of a cached entry: `addr / page_size`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);

impl PageId {
    /// Returns the page containing `addr`.
    pub fn containing(addr: u64, page_size: usize) -> Self {
        PageId(addr / page_size as u64)
    }

    /// Returns the base file address of this page.
    pub fn addr(self, page_size: usize) -> u64 {
        self.0 * page_size as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address-space class of an access.
///
/// The two classes carry separate byte quotas and separate end-of-allocation
/// marks in the file driver.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum MemClass {
    /// File metadata (object headers, index nodes, heaps).
    Metadata,
    /// Raw dataset bytes.
    RawData,
}

impl MemClass {
    /// Returns a short lowercase name used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            MemClass::Metadata => "metadata",
            MemClass::RawData => "raw",
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            MemClass::Metadata => 0,
            MemClass::RawData => 1,
        }
    }
}

/// Direction of an access.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AccessMode {
    /// Copy bytes out of the buffer.
    Read,
    /// Copy bytes into the buffer.
    Write,
}

/// Breadth of a flush request.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum FlushScope {
    /// Write back eligible dirty entries.
    #[default]
    Local,
    /// Write back eligible dirty entries, then ask the driver to sync.
    Global,
}

/// Errors reported by the page buffer and its file driver.
#[derive(thiserror::Error, Debug)]
pub enum PageBufError {
    /// Underlying driver read or write failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration rejected at creation time.
    #[error("config: {0}")]
    Config(&'static str),
    /// Configuration text could not be parsed.
    #[error("config parse: {0}")]
    ConfigParse(#[from] toml::de::Error),
    /// Configuration could not be rendered as TOML.
    #[error("config serialize: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
    /// Caller supplied an access the buffer cannot honor.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Internal list or accounting state is corrupt, or a forbidden transition was requested.
    #[error("invariant violation: {0}")]
    Invariant(&'static str),
    /// Addressed page is not resident.
    #[error("not found")]
    NotFound,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PageBufError>;
