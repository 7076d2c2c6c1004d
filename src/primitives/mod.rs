//! Low-level primitives for building the page buffer.
//!
//! Includes the file-driver interface with its implementations, and the
//! page cache itself.

/// File-driver abstractions and implementations.
///
/// Interfaces for positioned reads and writes and end-of-allocation tracking.
pub mod io;

/// Page cache with replacement policy and tick-synchronized write delays.
pub mod pager;
