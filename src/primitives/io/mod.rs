#![forbid(unsafe_code)]

use std::{fs::File, io, path::Path};

use crate::types::{MemClass, PageBufError, Result};

mod mem;

pub use mem::{FailOn, MemDriver};

#[cfg(test)]
macro_rules! io_test_log {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

#[cfg(not(test))]
macro_rules! io_test_log {
    ($($arg:tt)*) => {
        if false {
            let _ = format_args!($($arg)*);
        }
    };
}

/// Block-addressable file driver consumed by the page buffer.
///
/// The buffer calls into the driver only on a miss, a bypass, or a flush.
/// Calls block until complete; failures surface unchanged to the caller of
/// the buffer operation that triggered them.
pub trait FileDriver {
    /// Reads `dst.len()` bytes starting at `addr`.
    fn read(&mut self, addr: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes `src` starting at `addr`.
    fn write(&mut self, addr: u64, src: &[u8]) -> Result<()>;
    /// Returns the end of allocated space for the given address class.
    fn get_eoa(&self, class: MemClass) -> u64;
    /// Moves the end of allocated space for the given address class.
    fn set_eoa(&mut self, class: MemClass, addr: u64) -> Result<()>;
    /// Synchronizes written data to stable storage.
    fn sync_all(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: FileDriver + ?Sized> FileDriver for Box<D> {
    fn read(&mut self, addr: u64, dst: &mut [u8]) -> Result<()> {
        (**self).read(addr, dst)
    }

    fn write(&mut self, addr: u64, src: &[u8]) -> Result<()> {
        (**self).write(addr, src)
    }

    fn get_eoa(&self, class: MemClass) -> u64 {
        (**self).get_eoa(class)
    }

    fn set_eoa(&mut self, class: MemClass, addr: u64) -> Result<()> {
        (**self).set_eoa(class, addr)
    }

    fn sync_all(&mut self) -> Result<()> {
        (**self).sync_all()
    }
}

#[cfg(unix)]
/// Unix-specific positioned I/O using POSIX APIs.
pub mod stdio_unix {
    use std::{
        fs::{File, OpenOptions},
        io::{self, ErrorKind},
        os::unix::fs::FileExt,
        path::Path,
    };

    /// Opens a file in read-write mode with creation support (Unix).
    pub fn open_rw(path: impl AsRef<Path>) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
    }

    /// Reads up to `dst.len()` bytes at `off`, returning how many were read before EOF.
    pub fn read_full(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<usize> {
        io_test_log!("[io.read_full] start off={} len={}", off, dst.len());
        let mut total = 0;
        while !dst.is_empty() {
            let read = file.read_at(dst, off)?;
            if read == 0 {
                io_test_log!("[io.read_full] eof off={} remaining={}", off, dst.len());
                break;
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
            total += read;
        }
        Ok(total)
    }

    /// Writes all bytes at offset using Unix pwrite semantics.
    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        io_test_log!("[io.write_all] start off={} len={}", off, src.len());
        while !src.is_empty() {
            let written = file.write_at(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "write_at wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

#[cfg(windows)]
/// Windows-specific positioned I/O using Windows APIs.
pub mod stdio_win {
    use std::{
        fs::{File, OpenOptions},
        io::{self, ErrorKind},
        os::windows::fs::FileExt,
        path::Path,
    };

    /// Opens a file in read-write mode with creation support (Windows).
    pub fn open_rw(path: impl AsRef<Path>) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
    }

    /// Reads up to `dst.len()` bytes at `off`, returning how many were read before EOF.
    pub fn read_full(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while !dst.is_empty() {
            let read = file.seek_read(dst, off)?;
            if read == 0 {
                break;
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
            total += read;
        }
        Ok(total)
    }

    /// Writes all bytes at offset using Windows seek_write semantics.
    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.seek_write(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "seek_write wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

/// File driver over a local `std::fs::File`.
///
/// Bytes past the physical end of file read back as zeros. End-of-allocation
/// marks are tracked in memory per address class and start at the file length.
pub struct StdFileDriver {
    file: File,
    eoa: [u64; 2],
}

impl StdFileDriver {
    /// Wraps an already opened file.
    pub fn new(file: File) -> Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            eoa: [len, len],
        })
    }

    /// Opens or creates a file for read-write access.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        #[cfg(unix)]
        {
            return Self::new(stdio_unix::open_rw(path)?);
        }
        #[cfg(windows)]
        {
            return Self::new(stdio_win::open_rw(path)?);
        }
        #[allow(unreachable_code)]
        Err(PageBufError::Invalid(
            "StdFileDriver unsupported on this platform",
        ))
    }

    /// Returns the current physical length of the file.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Returns true if the file holds no bytes.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    #[cfg(unix)]
    fn read_full(&self, off: u64, dst: &mut [u8]) -> io::Result<usize> {
        stdio_unix::read_full(&self.file, off, dst)
    }

    #[cfg(windows)]
    fn read_full(&self, off: u64, dst: &mut [u8]) -> io::Result<usize> {
        stdio_win::read_full(&self.file, off, dst)
    }

    #[cfg(unix)]
    fn write_all(&self, off: u64, src: &[u8]) -> io::Result<()> {
        stdio_unix::write_all(&self.file, off, src)
    }

    #[cfg(windows)]
    fn write_all(&self, off: u64, src: &[u8]) -> io::Result<()> {
        stdio_win::write_all(&self.file, off, src)
    }

    #[cfg(not(any(unix, windows)))]
    fn read_full(&self, _off: u64, _dst: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "StdFileDriver unsupported on this platform",
        ))
    }

    #[cfg(not(any(unix, windows)))]
    fn write_all(&self, _off: u64, _src: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "StdFileDriver unsupported on this platform",
        ))
    }
}

impl FileDriver for StdFileDriver {
    fn read(&mut self, addr: u64, dst: &mut [u8]) -> Result<()> {
        let read = self.read_full(addr, dst)?;
        dst[read..].fill(0);
        Ok(())
    }

    fn write(&mut self, addr: u64, src: &[u8]) -> Result<()> {
        addr.checked_add(src.len() as u64)
            .ok_or(PageBufError::Invalid("write offset overflow"))?;
        self.write_all(addr, src)?;
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
        io_test_log!("[io.sync_all] start");
        let result = self.file.sync_all().map_err(PageBufError::from);
        if let Err(err) = &result {
            io_test_log!("[io.sync_all] error: {}", err);
        }
        result
    }
}
