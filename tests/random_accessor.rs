use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rusty_tiles::tiles::region;
use rusty_tiles::{CACHE_SIZE, RandomAccessor, Rect, TILE_WIDTH, Tile, TileStore, TiledDataManager};

/// Store wrapper counting fetches and remembering every tile it handed out.
struct CountingStore {
    inner: TiledDataManager,
    tile_fetches: AtomicUsize,
    old_fetches: AtomicUsize,
    /// Keyed by tile address.
    handed_out: Mutex<HashMap<usize, Arc<Tile>>>,
}

impl CountingStore {
    fn new(pixel_size: usize) -> Self {
        Self {
            inner: TiledDataManager::new(pixel_size, &vec![0; pixel_size]).unwrap(),
            tile_fetches: AtomicUsize::new(0),
            old_fetches: AtomicUsize::new(0),
            handed_out: Mutex::new(HashMap::new()),
        }
    }

    fn remember(&self, tile: &Arc<Tile>) {
        self.handed_out
            .lock()
            .unwrap()
            .insert(Arc::as_ptr(tile) as usize, Arc::clone(tile));
    }

    fn tile_fetches(&self) -> usize {
        self.tile_fetches.load(Ordering::SeqCst)
    }

    fn outstanding_locks(&self) -> usize {
        self.handed_out
            .lock()
            .unwrap()
            .values()
            .map(|tile| tile.lock_count())
            .sum()
    }
}

impl TileStore for CountingStore {
    fn pixel_size(&self) -> usize {
        self.inner.pixel_size()
    }

    fn get_tile(&self, col: i32, row: i32, writable: bool) -> Arc<Tile> {
        self.tile_fetches.fetch_add(1, Ordering::SeqCst);
        let tile = self.inner.get_tile(col, row, writable);
        self.remember(&tile);
        tile
    }

    fn get_old_tile(&self, col: i32, row: i32) -> Arc<Tile> {
        self.old_fetches.fetch_add(1, Ordering::SeqCst);
        let tile = self.inner.get_old_tile(col, row);
        self.remember(&tile);
        tile
    }

    fn has_current_memento(&self) -> bool {
        self.inner.has_current_memento()
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Collects `count` completion messages, failing instead of hanging when
/// the threads lock each other up.
fn wait_for<T>(done: &mpsc::Receiver<T>, count: usize) -> Vec<T> {
    (0..count)
        .map(|_| {
            done.recv_timeout(Duration::from_secs(5))
                .expect("accessor threads did not finish")
        })
        .collect()
}

#[test]
fn moves_inside_one_tile_fetch_once() {
    init_logger();
    let store = CountingStore::new(4);
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x7111E);
    let mut acc = RandomAccessor::new(&store, 64, 128, 0, 0, true);
    for _ in 0..1000 {
        let x = rng.random_range(64..128);
        let y = rng.random_range(128..192);
        acc.move_to(x, y);
        acc.raw_data()[0] = 1;
    }
    assert_eq!(store.tile_fetches(), 1);
    assert_eq!(store.old_fetches.load(Ordering::SeqCst), 1);
    assert_eq!(acc.cached_tiles(), 1);
}

#[test]
fn scanline_fetches_each_tile_once() {
    let store = CountingStore::new(1);
    let mut acc = RandomAccessor::new(&store, -100, 0, 0, 0, false);
    for y in 0..3 {
        for x in -100..100 {
            acc.move_to(x, y);
        }
    }
    // Columns -2..=1 fit in the cache, so later rows hit it.
    assert_eq!(store.tile_fetches(), 4);
}

#[test]
fn cache_is_bounded_and_evicted_tiles_unlocked() {
    let store = CountingStore::new(2);
    let mut acc = RandomAccessor::new(&store, 0, 0, 0, 0, true);
    let visits = 10;
    for col in 0..visits {
        acc.move_to(col * TILE_WIDTH as i32 + 5, 7);
        assert!(acc.cached_tiles() <= CACHE_SIZE);
    }
    assert_eq!(acc.cached_tiles(), CACHE_SIZE);

    for col in 0..visits {
        let tile = store.inner.get_tile(col, 0, false);
        let expected = if col >= visits - CACHE_SIZE as i32 { 1 } else { 0 };
        assert_eq!(tile.lock_count(), expected, "tile column {col}");
    }

    drop(acc);
    assert_eq!(store.outstanding_locks(), 0);
}

#[test]
fn evicts_least_recently_used() {
    let store = CountingStore::new(1);
    let mut acc = RandomAccessor::new(&store, 0, 0, 0, 0, false);
    for col in 1..4 {
        acc.move_to(col * 64, 0);
    }
    // Touch column 0 again so column 1 becomes the oldest.
    acc.move_to(0, 0);
    acc.move_to(4 * 64, 0);
    assert_eq!(store.tile_fetches(), 5);
    assert_eq!(store.inner.get_tile(1, 0, false).lock_count(), 0);
    assert_eq!(store.inner.get_tile(0, 0, false).lock_count(), 1);

    acc.move_to(0, 0);
    assert_eq!(store.tile_fetches(), 5);
    acc.move_to(64, 0);
    assert_eq!(store.tile_fetches(), 6);
}

#[test]
fn offset_matches_tile_geometry() {
    let pixel_size = 3;
    let dm = TiledDataManager::new(pixel_size, &[0; 3]).unwrap();
    for &(col, row) in &[(0, 0), (2, -1), (-3, 4)] {
        let origin = region::tile_rect(col, row);
        let mut acc = RandomAccessor::new(&dm, origin.x, origin.y, 0, 0, false);
        let base = acc.raw_data_const().as_ptr() as usize;
        for j in 0..64 {
            for i in 0..64 {
                acc.move_to(origin.x + i, origin.y + j);
                let ptr = acc.raw_data_const().as_ptr() as usize;
                assert_eq!(ptr - base, (i + j * TILE_WIDTH as i32) as usize * pixel_size);
            }
        }
    }
}

#[test]
fn negative_coordinates_map_to_contiguous_tiles() {
    for x in -64..0 {
        assert_eq!(region::x_to_col(x), -1);
        assert_eq!(region::y_to_row(x), -1);
    }

    let dm = TiledDataManager::new(1, &[0]).unwrap();
    let mut acc = RandomAccessor::new(&dm, -200, 0, 0, 0, true);
    let mut rects: Vec<Rect> = Vec::new();
    for x in -200..200 {
        let run = acc.num_contiguous_columns(x);
        acc.move_to(x, 0);
        assert_eq!(acc.raw_data().len(), 64 * 64 - (64 - run as usize));
        let rect = region::tile_rect(region::x_to_col(x), 0);
        assert!(rect.contains(x, 0));
        if rects.last() != Some(&rect) {
            if let Some(prev) = rects.last() {
                assert_eq!(prev.right() + 1, rect.x);
            }
            rects.push(rect);
        }
    }
    assert_eq!(rects.first().unwrap().x, -256);
    assert_eq!(rects.len(), 8);
}

#[test]
fn writes_do_not_reach_old_data_inside_transaction() {
    let dm = TiledDataManager::new(4, &[0; 4]).unwrap();
    dm.fill_rect(Rect::new(0, 0, 128, 64), &[10, 20, 30, 40]).unwrap();
    dm.begin_transaction().unwrap();
    {
        let mut acc = RandomAccessor::new(&dm, 0, 0, 0, 0, true);
        for &(x, y) in &[(0, 0), (63, 63), (64, 0), (100, 10)] {
            acc.move_to(x, y);
            acc.raw_data()[..4].copy_from_slice(&[1, 2, 3, 4]);
            assert_eq!(&acc.raw_data_const()[..4], &[1, 2, 3, 4]);
            assert_eq!(&acc.old_raw_data()[..4], &[10, 20, 30, 40]);
        }
    }
    dm.commit_transaction().unwrap();
    assert_eq!(dm.pixel(100, 10), vec![1, 2, 3, 4]);
    dm.undo().unwrap();
    assert_eq!(dm.pixel(100, 10), vec![10, 20, 30, 40]);
}

#[test]
fn random_accessors_leave_no_locks_behind() {
    init_logger();
    let store = CountingStore::new(4);
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x10CC5);
    for round in 0..1000 {
        let transaction = round % 3 == 0;
        if transaction {
            store.inner.begin_transaction().unwrap();
        }
        {
            let writable = rng.random_bool(0.5);
            let offset = (rng.random_range(-50..50), rng.random_range(-50..50));
            let mut acc = RandomAccessor::new(
                &store,
                rng.random_range(-300..300),
                rng.random_range(-300..300),
                offset.0,
                offset.1,
                writable,
            );
            for _ in 0..rng.random_range(1..40) {
                let x = rng.random_range(-300..300);
                let y = rng.random_range(-300..300);
                acc.move_to(x, y);
                assert_eq!((acc.x(), acc.y()), (x, y));
                if writable {
                    acc.raw_data()[0] = round as u8;
                }
                let _ = acc.raw_data_const()[0];
            }
            assert!(acc.cached_tiles() <= CACHE_SIZE);
        }
        if transaction {
            store.inner.commit_transaction().unwrap();
        }
        assert_eq!(store.outstanding_locks(), 0, "round {round}");
    }
}

#[test]
fn works_through_a_trait_object() {
    let dm = TiledDataManager::new(1, &[5]).unwrap();
    let store: &dyn TileStore = &dm;
    let mut acc = RandomAccessor::new(store, 1, 1, 0, 0, true);
    assert_eq!(acc.raw_data_const()[0], 5);
    acc.raw_data_imm(2, 2)[0] = 6;
    drop(acc);
    assert_eq!(dm.pixel(2, 2), vec![6]);
}

#[test]
fn concurrent_disjoint_writers() {
    let dm = TiledDataManager::new(4, &[0; 4]).unwrap();
    let barrier = Barrier::new(2);
    std::thread::scope(|s| {
        for id in 0..2i32 {
            let dm = &dm;
            let barrier = &barrier;
            s.spawn(move || {
                // Thread 0 owns rows 0..=1, thread 1 rows 2..=3.
                let y0 = id * 128;
                let mut acc = RandomAccessor::new(dm, 0, y0, 0, 0, true);
                for y in y0..y0 + 128 {
                    for x in 0..128 {
                        acc.raw_data_imm(x, y)[..4].copy_from_slice(&[id as u8 + 1; 4]);
                    }
                }
                barrier.wait();
                // Both accessors are alive: every tile has exactly one holder.
                for row in 0..4 {
                    for col in 0..2 {
                        assert_eq!(dm.get_tile(col, row, false).lock_count(), 1);
                    }
                }
                barrier.wait();
            });
        }
    });

    for (x, y, expected) in [(0, 0, 1u8), (127, 127, 1), (0, 128, 2), (127, 255, 2)] {
        assert_eq!(dm.pixel(x, y), vec![expected; 4]);
    }
    for row in 0..4 {
        for col in 0..2 {
            assert_eq!(dm.get_tile(col, row, false).lock_count(), 0);
        }
    }
}

#[test]
fn accessor_alive_across_begin_transaction() {
    init_logger();
    let dm = Arc::new(TiledDataManager::new(1, &[0]).unwrap());
    let (done_tx, done) = mpsc::channel();
    let (ready_tx, ready) = mpsc::channel();
    let (go_tx, go) = mpsc::channel();

    let early = {
        let dm = Arc::clone(&dm);
        let done_tx = done_tx.clone();
        thread::spawn(move || {
            let mut acc = RandomAccessor::new(&*dm, 0, 0, 0, 0, true);
            acc.raw_data()[0] = 1;
            ready_tx.send(()).unwrap();
            go.recv().unwrap();
            // Needs the store while still holding tile (0, 0) for write.
            acc.raw_data_imm(100, 0)[0] = 2;
            drop(acc);
            done_tx.send("early").unwrap();
        })
    };
    ready.recv().unwrap();
    dm.begin_transaction().unwrap();

    let late = {
        let dm = Arc::clone(&dm);
        let done_tx = done_tx.clone();
        thread::spawn(move || {
            let mut acc = RandomAccessor::new(&*dm, 5, 5, 0, 0, true);
            acc.raw_data()[0] = 3;
            drop(acc);
            done_tx.send("late").unwrap();
        })
    };
    // Let the late writer start waiting on tile (0, 0).
    thread::sleep(Duration::from_millis(50));
    go_tx.send(()).unwrap();
    drop(done_tx);

    let mut finished = wait_for(&done, 2);
    finished.sort();
    assert_eq!(finished, ["early", "late"]);
    early.join().unwrap();
    late.join().unwrap();

    assert_eq!(dm.commit_transaction(), Ok(2));
    assert_eq!(dm.pixel(0, 0), vec![1]);
    assert_eq!(dm.pixel(100, 0), vec![2]);
    assert_eq!(dm.pixel(5, 5), vec![3]);

    dm.undo().unwrap();
    assert_eq!(dm.pixel(0, 0), vec![1]);
    assert_eq!(dm.pixel(5, 5), vec![0]);
    assert_eq!(dm.pixel(100, 0), vec![0]);
}

#[test]
fn writers_racing_for_first_record_keep_old_bytes() {
    for round in 0..50 {
        let dm = Arc::new(TiledDataManager::new(1, &[0]).unwrap());
        dm.fill_rect(Rect::new(0, 0, 64, 64), &[7]).unwrap();
        dm.begin_transaction().unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let (done_tx, done) = mpsc::channel();
        let handles: Vec<_> = (0..2u8)
            .map(|id| {
                let dm = Arc::clone(&dm);
                let barrier = Arc::clone(&barrier);
                let done_tx = done_tx.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let at = 10 * id as i32;
                    let mut acc = RandomAccessor::new(&*dm, at, at, 0, 0, true);
                    acc.raw_data()[0] = id + 1;
                    assert_eq!(acc.old_raw_data()[0], 7);
                    drop(acc);
                    done_tx.send(id).unwrap();
                })
            })
            .collect();
        drop(done_tx);
        assert_eq!(wait_for(&done, 2).len(), 2, "round {round}");
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(dm.commit_transaction(), Ok(1));
        assert_eq!(dm.pixel(0, 0), vec![1]);
        assert_eq!(dm.pixel(10, 10), vec![2]);
        dm.undo().unwrap();
        assert_eq!(dm.pixel(0, 0), vec![7], "round {round}");
        assert_eq!(dm.pixel(10, 10), vec![7], "round {round}");
    }
}

#[test]
fn clear_waits_for_writer_without_blocking_it() {
    let dm = Arc::new(TiledDataManager::new(1, &[0]).unwrap());
    let (done_tx, done) = mpsc::channel();
    let (ready_tx, ready) = mpsc::channel();
    let (go_tx, go) = mpsc::channel();

    let writer = {
        let dm = Arc::clone(&dm);
        let done_tx = done_tx.clone();
        thread::spawn(move || {
            let mut acc = RandomAccessor::new(&*dm, 0, 0, 0, 0, true);
            acc.raw_data()[0] = 1;
            ready_tx.send(()).unwrap();
            go.recv().unwrap();
            acc.raw_data_imm(100, 0)[0] = 2;
            drop(acc);
            done_tx.send("writer").unwrap();
        })
    };
    ready.recv().unwrap();
    dm.begin_transaction().unwrap();

    let clearer = {
        let dm = Arc::clone(&dm);
        let done_tx = done_tx.clone();
        thread::spawn(move || {
            dm.clear();
            done_tx.send("clear").unwrap();
        })
    };
    thread::sleep(Duration::from_millis(50));
    go_tx.send(()).unwrap();
    drop(done_tx);

    assert_eq!(wait_for(&done, 2).len(), 2);
    writer.join().unwrap();
    clearer.join().unwrap();
    assert_eq!(dm.tile_count(), 0);

    dm.rollback_transaction().unwrap();
    assert_eq!(dm.pixel(0, 0), vec![1]);
    assert_eq!(dm.pixel(100, 0), vec![0]);
}

#[test]
fn writer_is_not_starved_by_readers() {
    let dm = TiledDataManager::new(1, &[0]).unwrap();
    let done = AtomicBool::new(false);
    let reads = AtomicUsize::new(0);
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let acc = RandomAccessor::new(&dm, 10, 10, 0, 0, false);
                    let _ = acc.raw_data_const()[0];
                    reads.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
        s.spawn(|| {
            for i in 0..100u8 {
                let mut acc = RandomAccessor::new(&dm, 10, 10, 0, 0, true);
                acc.raw_data()[0] = i;
            }
            done.store(true, Ordering::Release);
        });
    });
    assert_eq!(dm.pixel(10, 10), vec![99]);
}
