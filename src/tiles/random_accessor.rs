//! Cached random access to the pixels of a [`TileStore`].
//!
//! A [`RandomAccessor`] keeps the last few tiles it visited locked in a small
//! MRU cache, so consecutive accesses that stay inside one tile cost a
//! bounds test and an offset multiply, and accesses that wander between a
//! handful of neighbouring tiles never go back to the store.

use std::sync::Arc;

use smallvec::SmallVec;
use wide::{CmpLt, i32x4};

use crate::tiles::store::TileStore;
use crate::tiles::tile::{TILE_HEIGHT, TILE_WIDTH, TileGuard, TileReadGuard, tile_bytes};

/// Number of tiles an accessor keeps locked.
pub const CACHE_SIZE: usize = 4;

struct TileInfo {
    /// `x1, y1, -x2, -y2` of the covered rect, both corners inclusive.
    area: i32x4,
    tile: TileGuard,
    /// `None` when the store handed out the current tile as the old one;
    /// `tile` then serves both views under a single lock.
    old_tile: Option<TileReadGuard>,
}

impl TileInfo {
    /// `pos` is `x, y, -x, -y`.
    #[inline(always)]
    fn contains(&self, pos: i32x4) -> bool {
        // x - x1, y - y1, x2 - x, y2 - y: inside iff no lane is negative.
        let d = pos - self.area;
        d.cmp_lt(i32x4::new([0; 4])).move_mask() == 0
    }

    #[inline(always)]
    fn offset(&self, x: i32, y: i32, pixel_size: usize) -> usize {
        let [x1, y1, _, _] = self.area.to_array();
        debug_assert!(x >= x1 && y >= y1);
        ((x - x1) as usize + (y - y1) as usize * TILE_WIDTH) * pixel_size
    }

    fn data(&self) -> &[u8] {
        self.tile.data()
    }

    fn old_data(&self) -> &[u8] {
        match &self.old_tile {
            Some(old) => old.data(),
            None => self.tile.data(),
        }
    }

    fn unlock(self) {
        let TileInfo { tile, old_tile, .. } = self;
        tile.unlock();
        drop(old_tile);
    }
}

/// Stateful cursor over a store's pixels.
///
/// Single-owner: share the store, not the accessor, between threads.
/// The mode is fixed at construction; current tiles are locked for write
/// in writable mode and for read otherwise, old tiles are always read-locked.
pub struct RandomAccessor<'a, S: TileStore + ?Sized> {
    store: &'a S,
    /// Most recently used first, never empty.
    tiles_cache: SmallVec<[TileInfo; CACHE_SIZE]>,
    pixel_size: usize,
    writable: bool,
    last_x: i32,
    last_y: i32,
    offset_x: i32,
    offset_y: i32,
    /// Byte offset of the current pixel in the front tile.
    offset: usize,
}

impl<'a, S: TileStore + ?Sized> RandomAccessor<'a, S> {
    /// Accessor positioned at `(x, y)`. Every coordinate passed to it is
    /// translated by `-(offset_x, offset_y)` before reaching the store,
    /// wrapping at the edges of the `i32` plane.
    pub fn new(store: &'a S, x: i32, y: i32, offset_x: i32, offset_y: i32, writable: bool) -> Self {
        let pixel_size = store.pixel_size();
        let (sx, sy) = (x.wrapping_sub(offset_x), y.wrapping_sub(offset_y));
        let first = Self::fetch_tile_data(
            store,
            writable,
            pixel_size,
            store.x_to_col(sx),
            store.y_to_row(sy),
        );
        let mut tiles_cache = SmallVec::new();
        tiles_cache.push(first);

        let mut accessor = Self {
            store,
            tiles_cache,
            pixel_size,
            writable,
            last_x: x,
            last_y: y,
            offset_x,
            offset_y,
            offset: 0,
        };
        accessor.move_to(x, y);
        accessor
    }

    /// Lock order is fixed for every accessor: current tile, then old tile.
    fn fetch_tile_data(store: &S, writable: bool, pixel_size: usize, col: i32, row: i32) -> TileInfo {
        let tile = store.get_tile(col, row, writable);
        debug_assert_eq!(tile.pixel_size(), pixel_size, "store returned a foreign tile");
        let tile = TileGuard::lock(&tile, writable);
        debug_assert_eq!(tile.data().len(), tile_bytes(pixel_size));

        let old = store.get_old_tile(col, row);
        let old_tile = if Arc::ptr_eq(&old, tile.tile()) {
            None
        } else {
            Some(old.lock_for_read())
        };

        let x1 = col * TILE_WIDTH as i32;
        let y1 = row * TILE_HEIGHT as i32;
        TileInfo {
            area: i32x4::new([
                x1,
                y1,
                -(x1 + TILE_WIDTH as i32 - 1),
                -(y1 + TILE_HEIGHT as i32 - 1),
            ]),
            tile,
            old_tile,
        }
    }

    /// Point the accessor at `(x, y)` (untranslated coordinates).
    pub fn move_to(&mut self, x: i32, y: i32) {
        self.last_x = x;
        self.last_y = y;

        let x = x.wrapping_sub(self.offset_x);
        let y = y.wrapping_sub(self.offset_y);
        let pos = i32x4::new([x, y, x.wrapping_neg(), y.wrapping_neg()]);

        // Still in the current tile.
        if self.tiles_cache[0].contains(pos) {
            self.offset = self.tiles_cache[0].offset(x, y, self.pixel_size);
            return;
        }

        // One of the other cached tiles: promote it, no store round-trip.
        if let Some(i) = self.tiles_cache[1..].iter().position(|info| info.contains(pos)) {
            self.tiles_cache[..=i + 1].rotate_right(1);
            self.offset = self.tiles_cache[0].offset(x, y, self.pixel_size);
            return;
        }

        if self.tiles_cache.len() == CACHE_SIZE {
            if let Some(evicted) = self.tiles_cache.pop() {
                evicted.unlock();
            }
        }

        let col = self.store.x_to_col(x);
        let row = self.store.y_to_row(y);
        let info = Self::fetch_tile_data(self.store, self.writable, self.pixel_size, col, row);
        debug_assert!(info.contains(pos), "store grid disagrees with tile geometry");
        self.tiles_cache.insert(0, info);
        self.offset = self.tiles_cache[0].offset(x, y, self.pixel_size);
    }

    /// Writable bytes of the current tile from the current pixel to the end
    /// of the tile.
    ///
    /// # Panics
    /// On a read-only accessor.
    pub fn raw_data(&mut self) -> &mut [u8] {
        let offset = self.offset;
        let Some(data) = self.tiles_cache[0].tile.data_mut() else {
            panic!("raw_data() called on a read-only accessor");
        };
        &mut data[offset..]
    }

    pub fn raw_data_imm(&mut self, x: i32, y: i32) -> &mut [u8] {
        self.move_to(x, y);
        self.raw_data()
    }

    pub fn raw_data_const(&self) -> &[u8] {
        &self.tiles_cache[0].data()[self.offset..]
    }

    /// Pre-transaction bytes at the current pixel. Outside a transaction
    /// this is the current data.
    pub fn old_raw_data(&self) -> &[u8] {
        if cfg!(debug_assertions) && !self.store.has_current_memento() {
            log::warn!("accessing old_raw_data() when no transaction is in progress");
        }
        &self.tiles_cache[0].old_data()[self.offset..]
    }

    pub fn num_contiguous_columns(&self, x: i32) -> i32 {
        self.store.num_contiguous_columns(x.wrapping_sub(self.offset_x), 0, 0)
    }

    pub fn num_contiguous_rows(&self, y: i32) -> i32 {
        self.store.num_contiguous_rows(y.wrapping_sub(self.offset_y), 0, 0)
    }

    pub fn row_stride(&self, x: i32, y: i32) -> usize {
        self.store.row_stride(x.wrapping_sub(self.offset_x), y.wrapping_sub(self.offset_y))
    }

    /// Last x passed to [`RandomAccessor::move_to`], untranslated.
    pub fn x(&self) -> i32 {
        self.last_x
    }

    pub fn y(&self) -> i32 {
        self.last_y
    }

    pub fn pixel_size(&self) -> usize {
        self.pixel_size
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Number of tiles currently held locked.
    pub fn cached_tiles(&self) -> usize {
        self.tiles_cache.len()
    }
}

impl<S: TileStore + ?Sized> Drop for RandomAccessor<'_, S> {
    fn drop(&mut self) {
        for info in self.tiles_cache.drain(..) {
            info.unlock();
        }
    }
}
