use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};

use crate::tiles::region::{self, Rect};

pub const TILE_WIDTH: usize = 64;
pub const TILE_HEIGHT: usize = 64;

/// Byte length of a tile buffer for the given pixel size.
#[inline]
pub const fn tile_bytes(pixel_size: usize) -> usize {
    TILE_WIDTH * TILE_HEIGHT * pixel_size
}

/// Shared pixel storage of one tile.
///
/// Cloning shares the allocation; the first mutable access through
/// [`TileData::make_mut`] while shared copies it (copy-on-write).
#[derive(Clone)]
pub struct TileData {
    bytes: Arc<Box<[u8]>>,
}

impl TileData {
    /// Buffer with every pixel set to `pixel`.
    pub fn filled(pixel: &[u8]) -> Self {
        debug_assert!(!pixel.is_empty());
        let mut bytes = Vec::with_capacity(tile_bytes(pixel.len()));
        for _ in 0..TILE_WIDTH * TILE_HEIGHT {
            bytes.extend_from_slice(pixel);
        }
        Self {
            bytes: Arc::new(bytes.into_boxed_slice()),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// True while another tile, memento or default buffer holds the same bytes.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.bytes) > 1
    }

    /// True if both refer to the same allocation.
    pub fn shares_with(&self, other: &TileData) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    fn make_mut(&mut self) -> &mut [u8] {
        &mut **Arc::make_mut(&mut self.bytes)
    }
}

/// Fixed-size block of pixels: the unit of allocation, locking and versioning.
pub struct Tile {
    col: i32,
    row: i32,
    pixel_size: usize,
    data: Arc<RwLock<TileData>>,
    lock_count: AtomicUsize,
}

impl Tile {
    pub fn new(col: i32, row: i32, pixel_size: usize, data: TileData) -> Self {
        assert_eq!(
            data.len(),
            tile_bytes(pixel_size),
            "tile buffer does not match pixel size {pixel_size}"
        );
        Self {
            col,
            row,
            pixel_size,
            data: Arc::new(RwLock::new(data)),
            lock_count: AtomicUsize::new(0),
        }
    }

    pub fn col(&self) -> i32 {
        self.col
    }

    pub fn row(&self) -> i32 {
        self.row
    }

    pub fn pixel_size(&self) -> usize {
        self.pixel_size
    }

    /// Pixel rect covered by this tile.
    pub fn rect(&self) -> Rect {
        region::tile_rect(self.col, self.row)
    }

    /// Number of guards currently held on this tile.
    pub fn lock_count(&self) -> usize {
        self.lock_count.load(Ordering::Acquire)
    }

    pub fn lock_for_read(self: &Arc<Self>) -> TileReadGuard {
        let guard = self.data.read_arc();
        self.lock_count.fetch_add(1, Ordering::AcqRel);
        TileReadGuard {
            guard,
            tile: Arc::clone(self),
        }
    }

    /// Exclusive access. A buffer still shared with a snapshot is copied first.
    pub fn lock_for_write(self: &Arc<Self>) -> TileWriteGuard {
        let mut guard = self.data.write_arc();
        if guard.is_shared() {
            log::trace!("copy-on-write of tile ({}, {})", self.col, self.row);
        }
        guard.make_mut();
        self.lock_count.fetch_add(1, Ordering::AcqRel);
        TileWriteGuard {
            guard,
            tile: Arc::clone(self),
        }
    }

    /// New tile at the same cell sharing this tile's current bytes.
    ///
    /// Blocks while a writer holds the tile, so never call it with the
    /// store's memento or grid lock held.
    pub fn snapshot(&self) -> Tile {
        let data = self.data.read().clone();
        Tile::new(self.col, self.row, self.pixel_size, data)
    }

    /// Copy of the current bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.read().as_slice().to_vec()
    }

    /// True if both tiles currently share one allocation.
    pub fn shares_data_with(&self, other: &Tile) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let ours = self.data.read().clone();
        let theirs = other.data.read().clone();
        ours.shares_with(&theirs)
    }

    fn unlocked(&self) {
        let previous = self.lock_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "tile ({}, {}) unlocked twice", self.col, self.row);
    }
}

impl std::fmt::Debug for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("col", &self.col)
            .field("row", &self.row)
            .field("pixel_size", &self.pixel_size)
            .field("lock_count", &self.lock_count())
            .finish()
    }
}

/// Shared lock on a tile. Dropping it unlocks.
pub struct TileReadGuard {
    guard: ArcRwLockReadGuard<RawRwLock, TileData>,
    tile: Arc<Tile>,
}

impl TileReadGuard {
    pub fn tile(&self) -> &Arc<Tile> {
        &self.tile
    }

    pub fn data(&self) -> &[u8] {
        self.guard.as_slice()
    }
}

impl Drop for TileReadGuard {
    fn drop(&mut self) {
        self.tile.unlocked();
    }
}

/// Exclusive lock on a tile holding a private copy of its bytes.
pub struct TileWriteGuard {
    guard: ArcRwLockWriteGuard<RawRwLock, TileData>,
    tile: Arc<Tile>,
}

impl TileWriteGuard {
    pub fn tile(&self) -> &Arc<Tile> {
        &self.tile
    }

    pub fn data(&self) -> &[u8] {
        self.guard.as_slice()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        // Already unique since lock_for_write; nobody can clone it while we hold the lock.
        self.guard.make_mut()
    }
}

impl Drop for TileWriteGuard {
    fn drop(&mut self) {
        self.tile.unlocked();
    }
}

/// Either kind of lock, chosen by the accessor's mode.
pub enum TileGuard {
    Read(TileReadGuard),
    Write(TileWriteGuard),
}

impl TileGuard {
    pub fn lock(tile: &Arc<Tile>, writable: bool) -> Self {
        if writable {
            TileGuard::Write(tile.lock_for_write())
        } else {
            TileGuard::Read(tile.lock_for_read())
        }
    }

    pub fn tile(&self) -> &Arc<Tile> {
        match self {
            TileGuard::Read(guard) => guard.tile(),
            TileGuard::Write(guard) => guard.tile(),
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            TileGuard::Read(guard) => guard.data(),
            TileGuard::Write(guard) => guard.data(),
        }
    }

    /// `None` for a read lock.
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            TileGuard::Read(_) => None,
            TileGuard::Write(guard) => Some(guard.data_mut()),
        }
    }

    pub fn unlock(self) {
        drop(self);
    }
}
