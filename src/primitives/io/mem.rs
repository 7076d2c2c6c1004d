use std::io;

use super::FileDriver;
use crate::types::{MemClass, Result};

/// Driver call that [`MemDriver`] should fail on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FailOn {
    /// Fail every read.
    Read,
    /// Fail every write.
    Write,
    /// Fail reads and writes touching this address range.
    Range {
        /// First failing byte.
        start: u64,
        /// One past the last failing byte.
        end: u64,
    },
}

/// Growable in-memory driver.
///
/// Unwritten bytes read back as zeros. Every write is logged so callers can
/// observe exactly which addresses reached the "disk".
#[derive(Debug, Default)]
pub struct MemDriver {
    bytes: Vec<u8>,
    eoa: [u64; 2],
    writes: Vec<(u64, usize)>,
    reads: u64,
    syncs: u64,
    fail: Option<FailOn>,
}

impl MemDriver {
    /// Creates a driver with unbounded end of allocation for both classes.
    pub fn new() -> Self {
        Self::with_eoa(u64::MAX)
    }

    /// Creates a driver whose end of allocation is `eoa` for both classes.
    pub fn with_eoa(eoa: u64) -> Self {
        Self {
            eoa: [eoa, eoa],
            ..Self::default()
        }
    }

    /// Makes subsequent driver calls matching `fail` return an I/O error.
    pub fn inject_failure(&mut self, fail: FailOn) {
        self.fail = Some(fail);
    }

    /// Clears an injected failure.
    pub fn clear_failure(&mut self) {
        self.fail = None;
    }

    /// Returns `(addr, len)` for every completed write, oldest first.
    pub fn write_log(&self) -> &[(u64, usize)] {
        &self.writes
    }

    /// Returns true if some logged write started at `addr`.
    pub fn was_written(&self, addr: u64) -> bool {
        self.writes.iter().any(|&(at, _)| at == addr)
    }

    /// Forgets the write log.
    pub fn clear_write_log(&mut self) {
        self.writes.clear();
    }

    /// Number of completed reads.
    pub fn read_count(&self) -> u64 {
        self.reads
    }

    /// Number of sync requests.
    pub fn sync_count(&self) -> u64 {
        self.syncs
    }

    /// Returns a copy of the stored bytes in `[addr, addr + len)`.
    pub fn snapshot(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.copy_out(addr, &mut out);
        out
    }

    fn copy_out(&self, addr: u64, dst: &mut [u8]) {
        dst.fill(0);
        let start = addr as usize;
        if start >= self.bytes.len() {
            return;
        }
        let end = (start + dst.len()).min(self.bytes.len());
        dst[..end - start].copy_from_slice(&self.bytes[start..end]);
    }

    fn check(&self, read: bool, addr: u64, len: usize) -> Result<()> {
        let failed = match self.fail {
            Some(FailOn::Read) => read,
            Some(FailOn::Write) => !read,
            Some(FailOn::Range { start, end }) => addr < end && addr + len as u64 > start,
            None => false,
        };
        if failed {
            return Err(io::Error::other("injected driver failure").into());
        }
        Ok(())
    }
}

impl FileDriver for MemDriver {
    fn read(&mut self, addr: u64, dst: &mut [u8]) -> Result<()> {
        self.check(true, addr, dst.len())?;
        self.copy_out(addr, dst);
        self.reads += 1;
        Ok(())
    }

    fn write(&mut self, addr: u64, src: &[u8]) -> Result<()> {
        self.check(false, addr, src.len())?;
        let start = addr as usize;
        let end = start + src.len();
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        self.bytes[start..end].copy_from_slice(src);
        self.writes.push((addr, src.len()));
        Ok(())
    }

    fn get_eoa(&self, class: MemClass) -> u64 {
        self.eoa[class.slot()]
    }

    fn set_eoa(&mut self, class: MemClass, addr: u64) -> Result<()> {
        self.eoa[class.slot()] = addr;
        Ok(())
    }

    fn sync_all(&mut self) -> Result<()> {
        self.syncs += 1;
        Ok(())
    }
}
