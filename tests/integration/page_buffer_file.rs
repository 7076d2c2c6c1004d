#![forbid(unsafe_code)]

use std::fs;
use std::sync::Once;

use pagebuf::primitives::io::{FileDriver, StdFileDriver};
use pagebuf::primitives::pager::{PageBufOptions, PageBuffer};
use pagebuf::{FlushScope, MemClass, Result};
use tempfile::tempdir;
use tracing_subscriber::EnvFilter;

const PAGE: usize = 1024;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pagebuf=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn class_of(page: u64) -> MemClass {
    if page % 2 == 0 {
        MemClass::Metadata
    } else {
        MemClass::RawData
    }
}

fn open(path: &std::path::Path, options: PageBufOptions) -> Result<PageBuffer<StdFileDriver>> {
    let mut buf = PageBuffer::create(StdFileDriver::open(path)?, options)?;
    let eoa = 16 * PAGE as u64;
    if buf.driver().get_eoa(MemClass::Metadata) < eoa {
        buf.set_eoa(MemClass::Metadata, eoa)?;
        buf.set_eoa(MemClass::RawData, eoa)?;
    }
    Ok(buf)
}

#[test]
fn pages_survive_close_and_reopen() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("pages.bin");
    let opts = PageBufOptions::default().page_size(PAGE).max_pages(4);

    let mut buf = open(&path, opts.clone())?;
    for page in 0..8u64 {
        buf.write(page * PAGE as u64, class_of(page), &vec![page as u8 + 1; PAGE])?;
    }
    let driver = buf.close()?;
    assert_eq!(driver.len()?, 8 * PAGE as u64);
    drop(driver);

    let mut buf = PageBuffer::create(StdFileDriver::open(&path)?, opts)?;
    assert_eq!(buf.driver().get_eoa(MemClass::RawData), 8 * PAGE as u64);
    for page in (0..8u64).rev() {
        let mut back = vec![0u8; PAGE];
        buf.read(page * PAGE as u64, class_of(page), &mut back)?;
        assert!(back.iter().all(|&b| b == page as u8 + 1), "page {page}");
    }
    assert_eq!(buf.occupancy().curr_pages(), 4);
    buf.validate()
}

#[test]
fn flush_stops_at_end_of_allocation() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("clip.bin");
    let mut buf = PageBuffer::create(
        StdFileDriver::open(&path)?,
        PageBufOptions::default().page_size(PAGE).max_pages(4),
    )?;
    buf.set_eoa(MemClass::Metadata, PAGE as u64 + 476)?;
    buf.write(PAGE as u64, MemClass::Metadata, &vec![7u8; PAGE])?;
    buf.flush(FlushScope::Global)?;
    assert_eq!(fs::metadata(&path)?.len(), PAGE as u64 + 476);
    Ok(())
}

#[test]
fn delayed_metadata_stays_off_disk_until_released() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let path = dir.path().join("swmr.bin");
    let opts = PageBufOptions::default()
        .page_size(PAGE)
        .max_pages(8)
        .write_mode(2);
    let mut buf = open(&path, opts)?;
    buf.driver_mut().write(0, &vec![1u8; PAGE])?;
    buf.driver_mut().sync_all()?;

    let mut header = [0u8; 16];
    buf.read(0, MemClass::Metadata, &mut header)?;
    buf.write(0, MemClass::Metadata, &[9u8; 16])?;
    buf.end_tick()?;
    buf.flush(FlushScope::Global)?;
    assert_eq!(fs::read(&path)?[..16], [1u8; 16]);

    buf.end_tick()?;
    buf.flush(FlushScope::Global)?;
    assert_eq!(fs::read(&path)?[..16], [9u8; 16]);
    buf.validate()
}

#[test]
fn options_load_from_toml_file() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let config = dir.path().join("pagebuf.toml");
    fs::write(
        &config,
        "page_size = 1024\nmax_size = 8192\nmin_md_bytes = 2048\nwrite_mode = true\nmax_lag = 4\n",
    )?;
    let opts = PageBufOptions::from_toml_str(&fs::read_to_string(&config)?)?;
    assert_eq!(opts.max_pages_count(), 8);
    assert_eq!(opts.min_md_pages(), 2);
    assert!(!opts.prefetch_on_miss);

    let mut buf = open(&dir.path().join("data.bin"), opts.clone())?;
    buf.write(0, MemClass::Metadata, &[1, 2, 3])?;
    assert_eq!(buf.options(), &opts);
    let rendered = opts.to_toml_string()?;
    assert!(rendered.contains("max_lag = 4"));
    Ok(())
}
