//! End-to-end scenarios (spec §8), exercised through the public crate
//! API rather than any single module's internals.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use env_logger::Env;
use timechain::{
    ConcurrentTimechain, HeaderContext, Hash, Locator, PrioritySharedMutex, RawHeader, Work,
};
use timechain::keyframe::KeyframeSidecar;

/// Mirrors `main.rs`'s own bootstrap; `try_init` since every test in this
/// file calls it and the facade can only be installed once per process.
fn init_logging() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .is_test(true)
        .try_init();
}

#[derive(Clone)]
struct TestHeader {
    previous_hash: Hash,
    timestamp: u32,
}

impl RawHeader for TestHeader {
    fn previous_hash(&self) -> Hash {
        self.previous_hash
    }
    fn timestamp(&self) -> u32 {
        self.timestamp
    }
}

fn h(byte: u8) -> Hash {
    Hash::repeat_byte(byte)
}

fn ctx(prev: Hash, hash: Hash, height: i32, total_work: u64) -> HeaderContext<TestHeader> {
    HeaderContext::new(
        TestHeader {
            previous_hash: prev,
            timestamp: 0,
        },
        hash,
        Work::from(1u64),
        Work::from(total_work),
        height,
    )
}

#[test]
fn s1_linear_growth() {
    init_logging();
    let tc: ConcurrentTimechain<TestHeader> = ConcurrentTimechain::new();

    let r0 = tc.add_header(ctx(Hash::zero(), h(0xAA), 0, 1)).unwrap();
    let r1 = tc.add_header(ctx(h(0xAA), h(0xBB), 1, 3)).unwrap();
    let r2 = tc.add_header(ctx(h(0xBB), h(0xCC), 2, 6)).unwrap();

    assert!(r0.moved_from_chain.is_empty());
    assert!(r1.moved_from_chain.is_empty());
    assert!(r2.moved_from_chain.is_empty());
    assert_eq!(tc.chain_len(), 3);
    assert_eq!(tc.tip_hash(), Some(h(0xCC)));
    assert_eq!(tc.forest_len(), 0);
}

#[test]
fn s2_rejected_fork() {
    init_logging();
    let tc: ConcurrentTimechain<TestHeader> = ConcurrentTimechain::new();
    tc.add_header(ctx(Hash::zero(), h(0xAA), 0, 1)).unwrap();
    tc.add_header(ctx(h(0xAA), h(0xBB), 1, 3)).unwrap();
    tc.add_header(ctx(h(0xBB), h(0xCC), 2, 6)).unwrap();

    let handle = tc.add_sidecar(0u32);
    let r_dd = tc.add_header(ctx(h(0xBB), h(0xDD), 2, 5)).unwrap();

    assert_eq!(tc.tip_hash(), Some(h(0xCC)));
    assert!(r_dd.moved_from_chain.is_empty());
    assert_eq!(tc.forest_len(), 1);

    // The sidecar learned of 0xDD attached to height 1 (0xBB), with no
    // reorg signalled.
    assert_eq!(tc.get(handle, Locator::ByHash(h(0xDD))), Some(0));
}

#[test]
fn s3_accepted_reorg() {
    init_logging();
    let tc: ConcurrentTimechain<TestHeader> = ConcurrentTimechain::new();
    tc.add_header(ctx(Hash::zero(), h(0xAA), 0, 1)).unwrap();
    tc.add_header(ctx(h(0xAA), h(0xBB), 1, 3)).unwrap();
    tc.add_header(ctx(h(0xBB), h(0xCC), 2, 6)).unwrap();
    tc.add_header(ctx(h(0xBB), h(0xDD), 2, 5)).unwrap();

    let r_ee = tc.add_header(ctx(h(0xDD), h(0xEE), 3, 8)).unwrap();

    assert_eq!(tc.chain_len(), 4);
    assert_eq!(tc.tip_hash(), Some(h(0xEE)));
    assert_eq!(r_ee.moved_from_chain, vec![h(0xCC)]);
    assert!(tc
        .find_stable(timechain::Key {
            height: 2,
            hash: h(0xDD),
        })
        .is_valid());

    let displaced = tc.find_stable(timechain::Key {
        height: 2,
        hash: h(0xCC),
    });
    assert!(!displaced.is_valid(), "0xCC moved off the chain at height 2");
}

#[test]
fn s4_keyframe_split() {
    init_logging();
    let mut sc: KeyframeSidecar<i32> = KeyframeSidecar::new(0);
    for height in 0..5 {
        sc.add_sync(&timechain::sidecar::AddSync {
            parent: if height == 0 {
                Locator::ByHeight(-1)
            } else {
                Locator::ByHeight(height - 1)
            },
            hash: h(height as u8 + 1),
            moved_from_chain: vec![],
        });
    }
    assert_eq!(sc.length(), 5);
    assert_eq!(sc.get(Locator::ByHeight(0)), Some(&0));

    sc.set(Locator::ByHeight(2), 5);
    assert_eq!(sc.get(Locator::ByHeight(0)), Some(&0));
    assert_eq!(sc.get(Locator::ByHeight(1)), Some(&0));
    assert_eq!(sc.get(Locator::ByHeight(2)), Some(&5));
    assert_eq!(sc.get(Locator::ByHeight(3)), Some(&0));
    assert_eq!(sc.get(Locator::ByHeight(4)), Some(&0));
}

#[test]
fn s5_keyframe_merge() {
    init_logging();
    let mut sc: KeyframeSidecar<i32> = KeyframeSidecar::new(0);
    for height in 0..5 {
        sc.add_sync(&timechain::sidecar::AddSync {
            parent: if height == 0 {
                Locator::ByHeight(-1)
            } else {
                Locator::ByHeight(height - 1)
            },
            hash: h(height as u8 + 1),
            moved_from_chain: vec![],
        });
    }
    sc.set(Locator::ByHeight(2), 5);
    sc.set(Locator::ByHeight(2), 0);

    for height in 0..5 {
        assert_eq!(sc.get(Locator::ByHeight(height)), Some(&0));
    }
}

#[test]
fn s6_reader_exclusion() {
    init_logging();
    let latch = Arc::new(PrioritySharedMutex::new(0u32));
    let writer_holds = Arc::new(AtomicU32::new(0));
    let readers_acquired = Arc::new(AtomicU32::new(0));

    let w_latch = latch.clone();
    let w_flag = writer_holds.clone();
    let writer = thread::spawn(move || {
        let mut guard = w_latch.write();
        w_flag.store(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(150));
        *guard = 1;
    });

    while writer_holds.load(Ordering::SeqCst) == 0 {
        thread::yield_now();
    }

    let mut readers = Vec::new();
    for _ in 0..3 {
        let r_latch = latch.clone();
        let r_acquired = readers_acquired.clone();
        readers.push(thread::spawn(move || {
            let guard = r_latch.read();
            assert_eq!(*guard, 1, "reader must not observe pre-write state");
            r_acquired.fetch_add(1, Ordering::SeqCst);
        }));
    }

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(readers_acquired.load(Ordering::SeqCst), 3);
}
