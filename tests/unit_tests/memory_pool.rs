use fenris_hetero::memory_pool::{MemoryPool, MemoryPoolConfig};
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};

fn pool(ways: usize, way_capacity: usize) -> MemoryPool<f64> {
    MemoryPool::new(MemoryPoolConfig { ways, way_capacity }).unwrap()
}

#[test]
fn chunks_release_their_block_when_dropped() {
    let pool = pool(2, 8);
    {
        let mut chunk = pool.allocate(3, 5);
        assert_eq!(chunk.way(), 1);
        assert_eq!(chunk.len(), 5);
        chunk.copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(chunk[4], 5.0);
        assert_eq!(pool.available(1), 3);
        assert_eq!(pool.available(0), 8);
    }
    assert_eq!(pool.available(1), 8);
}

#[test]
fn exhausted_ways_do_not_affect_other_ways() {
    let pool = pool(2, 4);
    let _full = pool.allocate(0, 4);
    assert!(pool.try_allocate(2, 1).is_none());
    assert!(pool.try_allocate(1, 4).is_some());
}

#[test]
#[should_panic(expected = "cannot allocate 1 elements in way 0")]
fn allocating_from_an_exhausted_way_panics() {
    let pool = pool(2, 4);
    let _full = pool.allocate(0, 4);
    pool.allocate(2, 1);
}

#[test]
fn empty_allocations_always_succeed() {
    let pool = pool(1, 0);
    let chunk = pool.allocate(0, 0);
    assert!(chunk.is_empty());
}

#[test]
fn zero_ways_are_rejected() {
    let err = MemoryPool::<f64>::new(MemoryPoolConfig {
        ways: 0,
        way_capacity: 4,
    })
    .unwrap_err();
    assert!(err.to_string().contains("ways must be positive"));
}

#[test]
fn chunks_are_released_when_a_work_item_panics() {
    let pool = pool(2, 8);
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut chunk = pool.allocate(1, 6);
        chunk.fill(1.0);
        assert_eq!(pool.available(1), 2);
        panic!("work-item failed");
    }));
    assert!(result.is_err());
    assert_eq!(pool.available(1), pool.way_capacity());
}

#[test]
fn chunks_are_released_on_early_returns() {
    fn fallible(pool: &MemoryPool<f64>, fail: bool) -> eyre::Result<f64> {
        let chunk = pool.allocate(0, 4);
        if fail {
            eyre::bail!("no result");
        }
        Ok(chunk.iter().sum())
    }

    let pool = pool(1, 4);
    assert!(fallible(&pool, true).is_err());
    assert_eq!(pool.available(0), 4);
    assert!(fallible(&pool, false).is_ok());
    assert_eq!(pool.available(0), 4);
}

#[test]
fn concurrent_work_items_get_disjoint_blocks() {
    let pool = pool(4, 1024);
    let chunks: Vec<_> = (0..256usize)
        .into_par_iter()
        .map(|index| {
            let mut chunk = pool.allocate(index, 8);
            chunk.fill(index as f64);
            chunk
        })
        .collect();

    let mut ranges: Vec<_> = chunks
        .iter()
        .map(|chunk| chunk.start()..chunk.start() + chunk.len())
        .collect();
    ranges.sort_by_key(|range| range.start);
    for pair in ranges.windows(2) {
        assert!(pair[0].end <= pair[1].start, "blocks {:?} and {:?} overlap", pair[0], pair[1]);
    }
    for (index, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.way(), index % 4);
        assert!(chunk.iter().all(|&value| value == index as f64));
    }

    drop(chunks);
    for way in 0..pool.ways() {
        assert_eq!(pool.available(way), pool.way_capacity());
    }
}
