//! Chunk cache tests
//!
//! Completion tracking per (peer, sign), ordered reads, and eviction of the
//! oldest sign once the memory ceiling is crossed.

use cellcloud::talk::Dialect;
use cellcloud::talk::dialect::{ChunkDialect, ChunkDialectFactory, ReadOrder};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn tagged(tag: &str, sign: &str, index: u32, num: u32, data: Vec<u8>) -> ChunkDialect {
    let total = u64::from(num) * data.len() as u64;
    let mut chunk = ChunkDialect::new(sign, total, index, num, data);
    chunk.meta_mut().set_owner_tag(tag);
    chunk
}

#[test]
fn test_completion_on_last_fragment() {
    let factory = ChunkDialectFactory::default();

    for index in 0..3 {
        assert!(!factory.check_completed("peer", "f"));
        factory.write(&tagged("peer", "f", index, 3, vec![index as u8; 10]));
    }
    assert!(factory.check_completed("peer", "f"));
    assert_eq!(factory.memory_size(), 30);
    assert_eq!(factory.cache_size("peer"), 30);

    let mut out = [0u8; 16];
    assert_eq!(factory.read("peer", "f", 1, &mut out), Some(10));
    assert_eq!(&out[..10], &[1u8; 10]);
    assert_eq!(factory.read("peer", "f", 3, &mut out), None);

    assert_eq!(factory.clear("peer", "f"), 30);
    assert_eq!(factory.memory_size(), 0);
    assert!(!factory.check_completed("peer", "f"));
    assert!(factory.peers().is_empty());
}

#[test]
fn test_completion_isolated_by_tag_and_sign() {
    let factory = ChunkDialectFactory::default();

    factory.write(&tagged("a", "f", 0, 2, vec![1; 4]));
    factory.write(&tagged("b", "f", 1, 2, vec![2; 4]));
    factory.write(&tagged("a", "g", 1, 2, vec![3; 4]));

    assert!(!factory.check_completed("a", "f"));
    assert!(!factory.check_completed("b", "f"));
    assert!(!factory.check_completed("a", "g"));

    factory.write(&tagged("a", "f", 1, 2, vec![1; 4]));
    assert!(factory.check_completed("a", "f"));
    assert!(!factory.check_completed("b", "f"));

    let mut peers = factory.peers();
    peers.sort();
    assert_eq!(peers, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_declared_order_reads_by_index() {
    let factory = ChunkDialectFactory::new(u64::MAX, ReadOrder::Declared);

    factory.write(&tagged("p", "f", 1, 2, b"second".to_vec()));
    factory.write(&tagged("p", "f", 0, 2, b"first!".to_vec()));

    let mut out = [0u8; 6];
    assert_eq!(factory.read("p", "f", 0, &mut out), Some(6));
    assert_eq!(&out, b"first!");

    factory.write(&tagged("p", "f", 1, 2, b"SECOND".to_vec()));
    assert_eq!(factory.fragment_count("p", "f"), 2);
    assert_eq!(factory.memory_size(), 12);
    assert_eq!(factory.read_fragment("p", "f", 1).unwrap().data(), b"SECOND");
}

#[test]
fn test_arrival_order_reads_by_arrival() {
    let factory = ChunkDialectFactory::default();

    factory.write(&tagged("p", "f", 1, 2, b"bb".to_vec()));
    factory.write(&tagged("p", "f", 0, 2, b"aa".to_vec()));

    let mut out = [0u8; 2];
    factory.read("p", "f", 0, &mut out);
    assert_eq!(&out, b"bb");
}

#[test]
fn test_untagged_chunk_is_not_cached() {
    let factory = ChunkDialectFactory::default();
    factory.write(&ChunkDialect::new("f", 1, 0, 1, vec![0]));
    assert_eq!(factory.memory_size(), 0);
    assert!(factory.peers().is_empty());
}

#[test]
fn test_eviction_removes_oldest_sign() {
    let factory = ChunkDialectFactory::new(1000, ReadOrder::Arrival);

    factory.write(&tagged("p", "old", 0, 2, vec![1; 600]));
    thread::sleep(Duration::from_millis(5));
    factory.write(&tagged("q", "new", 0, 2, vec![2; 600]));

    assert!(factory.wait_for_eviction(Duration::from_secs(10)));
    assert!(!factory.is_evicting());

    assert_eq!(factory.memory_size(), 600);
    assert_eq!(factory.fragment_count("p", "old"), 0);
    assert_eq!(factory.fragment_count("q", "new"), 1);
    assert_eq!(factory.peers(), vec!["q".to_string()]);
}

#[test]
fn test_concurrent_writers_account_every_byte() {
    let factory = Arc::new(ChunkDialectFactory::default());

    let writers: Vec<_> = (0..8)
        .map(|w| {
            let factory = factory.clone();
            thread::spawn(move || {
                let tag = format!("peer-{}", w % 2);
                let sign = format!("sign-{w}");
                for index in 0..25 {
                    factory.write(&tagged(&tag, &sign, index, 25, vec![w as u8; 100]));
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(factory.memory_size(), 8 * 25 * 100);
    for w in 0..8 {
        let tag = format!("peer-{}", w % 2);
        assert!(factory.check_completed(&tag, &format!("sign-{w}")));
    }
    assert_eq!(factory.signs("peer-0").len(), 4);
}

#[test]
fn test_one_sign_evicted_per_breach() {
    let factory = ChunkDialectFactory::new(1000, ReadOrder::Arrival);

    factory.write(&tagged("p", "a", 0, 2, vec![1; 100]));
    thread::sleep(Duration::from_millis(2));
    factory.write(&tagged("q", "b", 0, 2, vec![2; 800]));
    thread::sleep(Duration::from_millis(2));
    assert!(!factory.is_evicting());
    assert_eq!(factory.memory_size(), 900);

    // 1200 resident: only the oldest sign goes, memory stays above the ceiling
    factory.write(&tagged("p", "c", 0, 2, vec![3; 300]));
    assert!(factory.wait_for_eviction(Duration::from_secs(10)));
    assert_eq!(factory.memory_size(), 1100);
    assert_eq!(factory.fragment_count("p", "a"), 0);
    assert_eq!(factory.fragment_count("q", "b"), 1);
    assert_eq!(factory.fragment_count("p", "c"), 1);

    // The next write re-triggers and takes the next-oldest
    thread::sleep(Duration::from_millis(2));
    factory.write(&tagged("q", "d", 0, 2, vec![4; 10]));
    assert!(factory.wait_for_eviction(Duration::from_secs(10)));
    assert_eq!(factory.memory_size(), 310);
    assert_eq!(factory.fragment_count("q", "b"), 0);
    assert_eq!(factory.fragment_count("p", "c"), 1);
    assert_eq!(factory.fragment_count("q", "d"), 1);
}

#[test]
fn test_clear_racing_write_keeps_counters_consistent() {
    let factory = Arc::new(ChunkDialectFactory::new(u64::MAX / 2, ReadOrder::Arrival));

    let writer = {
        let factory = factory.clone();
        thread::spawn(move || {
            for index in 0..20_000 {
                factory.write(&tagged("p", "s", index, 20_000, vec![5; 10]));
                assert!(factory.memory_size() <= 20_000 * 10);
            }
        })
    };
    let clearer = {
        let factory = factory.clone();
        thread::spawn(move || {
            let mut freed = 0u64;
            for _ in 0..20_000 {
                freed += factory.clear("p", "s");
                assert!(factory.memory_size() <= 20_000 * 10);
            }
            freed
        })
    };

    writer.join().unwrap();
    let freed = clearer.join().unwrap();
    let remaining = factory.clear("p", "s");

    assert_eq!(freed + remaining, 20_000 * 10);
    assert_eq!(factory.memory_size(), 0);
    assert_eq!(factory.cache_size("p"), 0);
    assert!(!factory.is_evicting());
}
