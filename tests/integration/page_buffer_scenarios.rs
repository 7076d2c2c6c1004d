#![forbid(unsafe_code)]

use std::sync::Once;

use pagebuf::primitives::io::{FailOn, FileDriver, MemDriver};
use pagebuf::primitives::pager::{PageBufOptions, PageBuffer, StatClass};
use pagebuf::{FlushScope, MemClass, PageBufError, Result};
use tracing_subscriber::EnvFilter;

const PAGE: usize = 4096;

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

fn addr(page: u64) -> u64 {
    page * PAGE as u64
}

fn three_page_buffer() -> Result<PageBuffer<MemDriver>> {
    PageBuffer::create(
        MemDriver::new(),
        PageBufOptions::default().page_size(PAGE).max_pages(3),
    )
}

#[test]
fn full_buffer_of_dirty_pages_needs_flush_before_eviction() -> Result<()> {
    init_tracing();
    let mut buf = three_page_buffer()?;
    for page in 0..3u64 {
        buf.write(addr(page), MemClass::RawData, &vec![page as u8 + 1; PAGE])?;
    }
    let occ = buf.occupancy();
    assert_eq!(occ.curr_pages(), 3);
    assert_eq!(occ.index.dirty_index_len, 3);
    assert_eq!(buf.stats().misses[StatClass::RawData], 3);

    assert!(matches!(buf.evict(addr(0)), Err(PageBufError::Invariant(_))));
    assert!(buf.entry_info(addr(0)).is_some());
    assert!(buf.driver().write_log().is_empty());

    buf.flush(FlushScope::Local)?;
    buf.evict(addr(0))?;
    buf.write(addr(3), MemClass::RawData, &vec![4u8; PAGE])?;

    let occ = buf.occupancy();
    assert_eq!(occ.curr_pages(), 3);
    assert_eq!(occ.index.dirty_index_len, 1);
    assert!(buf.entry_info(addr(0)).is_none());
    assert_eq!(buf.stats().evictions.total(), 1);
    buf.validate()
}

#[test]
fn over_budget_insertion_writes_back_lru_victim() -> Result<()> {
    init_tracing();
    let mut buf = three_page_buffer()?;
    for page in 0..4u64 {
        buf.write(addr(page), MemClass::RawData, &vec![page as u8 + 1; PAGE])?;
    }
    assert_eq!(buf.occupancy().curr_pages(), 3);
    assert!(buf.entry_info(addr(0)).is_none());
    assert!(buf.entry_info(addr(3)).unwrap().is_dirty);
    assert_eq!(buf.driver().write_log(), &[(addr(0), PAGE)]);
    assert_eq!(buf.occupancy().index.dirty_index_len, 3);
    assert_eq!(buf.driver().snapshot(addr(0), PAGE), vec![1u8; PAGE]);

    let mut back = vec![0u8; PAGE];
    buf.read(addr(0), MemClass::RawData, &mut back)?;
    assert_eq!(back, vec![1u8; PAGE]);
    assert_eq!(buf.occupancy().curr_pages(), 3);
    buf.validate()
}

#[test]
fn loaded_metadata_write_waits_out_its_delay() -> Result<()> {
    init_tracing();
    let opts = PageBufOptions::default()
        .page_size(PAGE)
        .max_pages(16)
        .write_mode(2);
    let mut buf = PageBuffer::create(MemDriver::new(), opts)?;
    buf.driver_mut().write(addr(0), &vec![0xAA; PAGE])?;
    buf.driver_mut().clear_write_log();

    let mut header = [0u8; 64];
    buf.read(addr(0), MemClass::Metadata, &mut header)?;
    assert!(buf.entry_info(addr(0)).unwrap().loaded);
    buf.write(addr(0) + 8, MemClass::Metadata, &[1, 2, 3, 4])?;
    let info = buf.entry_info(addr(0)).unwrap();
    assert_eq!(info.delay_write_until, 2);
    assert!(info.on_dwl);

    let summary = buf.end_tick()?;
    assert_eq!(summary.modified.len(), 1);
    assert_eq!(summary.released, 0);
    assert_eq!(buf.cur_tick(), 1);

    buf.flush(FlushScope::Local)?;
    assert!(!buf.driver().was_written(addr(0)));
    assert_eq!(buf.occupancy().index.dirty_index_size, PAGE);

    let summary = buf.end_tick()?;
    assert_eq!(summary.released, 1);
    assert!(summary.modified.is_empty());
    let info = buf.entry_info(addr(0)).unwrap();
    assert!(info.on_lru && !info.on_dwl && info.is_dirty);
    assert_eq!(info.delay_write_until, 0);

    buf.flush(FlushScope::Local)?;
    assert!(buf.driver().was_written(addr(0)));
    assert_eq!(buf.occupancy().index.dirty_index_size, 0);
    assert_eq!(buf.driver().snapshot(addr(0) + 8, 4), vec![1, 2, 3, 4]);
    buf.validate()
}

#[test]
fn absent_page_lookup_is_side_effect_free_then_full_write_materializes() -> Result<()> {
    init_tracing();
    let mut buf = three_page_buffer()?;
    let before = buf.occupancy();
    assert!(buf.entry_info(addr(7)).is_none());
    assert_eq!(buf.occupancy(), before);
    assert_eq!(buf.stats().failed_ht_searches, 0);

    buf.write(addr(7), MemClass::Metadata, &vec![3u8; PAGE])?;
    let occ = buf.occupancy();
    assert_eq!(occ.index.index_len, 1);
    assert_eq!(occ.index.md_pages, 1);
    let info = buf.entry_info(addr(7)).unwrap();
    assert!(!info.loaded);
    assert!(info.is_dirty);
    assert_eq!(buf.driver().read_count(), 0);
    assert_eq!(buf.stats().failed_ht_searches, 1);
    buf.validate()
}

#[test]
fn written_bytes_read_back_across_evictions() -> Result<()> {
    init_tracing();
    let mut buf = three_page_buffer()?;
    for page in 0..10u64 {
        let stamp: Vec<u8> = (0..100).map(|i| (page as u8).wrapping_mul(31) ^ i).collect();
        buf.write(addr(page) + 1000, MemClass::RawData, &stamp)?;
    }
    for page in 0..10u64 {
        let stamp: Vec<u8> = (0..100).map(|i| (page as u8).wrapping_mul(31) ^ i).collect();
        let mut back = vec![0u8; 100];
        buf.read(addr(page) + 1000, MemClass::RawData, &mut back)?;
        assert_eq!(back, stamp, "page {page}");
    }
    let stats = buf.stats();
    assert!(stats.evictions.total() >= 7);
    assert!(stats.max_index_len <= 4);
    buf.validate()
}

#[test]
fn end_tick_with_nothing_modified_only_advances_tick() -> Result<()> {
    init_tracing();
    let opts = PageBufOptions::default().page_size(PAGE).max_pages(8).write_mode(3);
    let mut buf = PageBuffer::create(MemDriver::new(), opts)?;
    buf.write(addr(1), MemClass::RawData, &[9u8; 16])?;
    buf.end_tick()?;
    let before = buf.occupancy();
    let stats_before = buf.stats();

    let summary = buf.end_tick()?;
    assert_eq!(summary.tick, 1);
    assert!(summary.modified.is_empty());
    assert_eq!(summary.released, 0);
    assert_eq!(summary.evicted_mpmdes, 0);
    assert_eq!(buf.cur_tick(), 2);
    assert_eq!(buf.occupancy(), before);
    assert_eq!(buf.stats().flushes, stats_before.flushes);
    assert_eq!(buf.stats().evictions, stats_before.evictions);
    Ok(())
}

#[test]
fn delayed_writes_release_in_tick_order() -> Result<()> {
    init_tracing();
    let opts = PageBufOptions::default().page_size(PAGE).max_pages(8).write_mode(3);
    let mut buf = PageBuffer::create(MemDriver::new(), opts)?;
    let mut scratch = [0u8; 1];
    for page in 0..3u64 {
        buf.read(addr(page), MemClass::Metadata, &mut scratch)?;
    }
    // dirty page 2 at tick 0, page 0 at tick 1, page 1 at tick 2
    for (tick, page) in [(0u64, 2u64), (1, 0), (2, 1)] {
        assert_eq!(buf.cur_tick(), tick);
        buf.write(addr(page), MemClass::Metadata, &[1])?;
        assert_eq!(buf.entry_info(addr(page)).unwrap().delay_write_until, tick + 3);
        buf.end_tick()?;
    }
    // the boundary into tick 3 already released page 2
    assert_eq!(buf.cur_tick(), 3);
    assert_eq!(buf.occupancy().dwl_len, 2);
    assert_eq!(buf.occupancy().max_delay, 5);
    assert!(buf.entry_info(addr(2)).unwrap().on_lru);

    let mut released = Vec::new();
    for round in 0..3 {
        if round > 0 {
            buf.end_tick()?;
        }
        buf.flush(FlushScope::Local)?;
        released.push(buf.driver().write_log().iter().map(|&(at, _)| at).collect::<Vec<_>>());
        buf.driver_mut().clear_write_log();
    }
    assert_eq!(released, vec![vec![addr(2)], vec![addr(0)], vec![addr(1)]]);
    assert_eq!(buf.stats().delayed_writes, 3);
    assert_eq!(buf.stats().total_delay, 9);
    buf.validate()
}

#[test]
fn modified_this_tick_pages_are_not_evicted() -> Result<()> {
    init_tracing();
    let opts = PageBufOptions::default().page_size(PAGE).max_pages(2).write_mode(1);
    let mut buf = PageBuffer::create(MemDriver::new(), opts)?;
    for page in 0..3u64 {
        buf.write(addr(page), MemClass::RawData, &vec![1u8; PAGE])?;
    }
    assert_eq!(buf.occupancy().curr_pages(), 3);
    assert!(buf.stats().lru_tl_skips > 0);
    assert!(matches!(buf.evict(addr(0)), Err(PageBufError::Invariant(_))));

    buf.end_tick()?;
    buf.write(addr(3), MemClass::RawData, &vec![2u8; PAGE])?;
    assert_eq!(buf.occupancy().curr_pages(), 2);
    buf.validate()
}

#[test]
fn failed_load_leaves_no_entry_behind() -> Result<()> {
    init_tracing();
    let mut buf = three_page_buffer()?;
    buf.driver_mut().inject_failure(FailOn::Range {
        start: addr(1),
        end: addr(2),
    });
    let mut scratch = [0u8; 8];
    let err = buf.read(addr(1), MemClass::RawData, &mut scratch).unwrap_err();
    assert!(matches!(err, PageBufError::Io(_)));
    assert_eq!(buf.occupancy().index.index_len, 0);
    buf.read(addr(0), MemClass::RawData, &mut scratch)?;
    buf.validate()
}

#[test]
fn stats_summary_and_reset() -> Result<()> {
    init_tracing();
    let mut buf = three_page_buffer()?;
    let mut scratch = [0u8; 4];
    buf.read(0, MemClass::Metadata, &mut scratch)?;
    buf.read(0, MemClass::Metadata, &mut scratch)?;
    buf.read(0, MemClass::Metadata, &mut scratch)?;
    let stats = buf.stats();
    assert_eq!(stats.hits[StatClass::Metadata], 2);
    assert_eq!(stats.misses[StatClass::Metadata], 1);
    assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    assert!(stats.to_string().starts_with("hits=2 misses=1"));

    buf.reset_stats();
    assert_eq!(buf.stats().hits.total(), 0);
    assert_eq!(buf.occupancy().index.index_len, 1);
    Ok(())
}

#[test]
fn end_of_allocation_bounds_loads() -> Result<()> {
    init_tracing();
    let mut buf = three_page_buffer()?;
    buf.driver_mut().write(0, &vec![5u8; PAGE])?;
    buf.set_eoa(MemClass::RawData, 100)?;
    assert_eq!(buf.driver().get_eoa(MemClass::RawData), 100);

    let mut tail = [0xFFu8; 8];
    buf.read(96, MemClass::RawData, &mut tail)?;
    assert_eq!(tail, [5, 5, 5, 5, 0, 0, 0, 0]);

    let err = buf.read(addr(1), MemClass::RawData, &mut tail).unwrap_err();
    assert!(matches!(err, PageBufError::Invalid(_)));
    Ok(())
}
