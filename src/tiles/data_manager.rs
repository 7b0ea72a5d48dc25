use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::error::TileError;
use crate::settings::StoreSettings;
use crate::tiles::memento::{Memento, MementoManager};
use crate::tiles::random_accessor::RandomAccessor;
use crate::tiles::region::{self, Rect};
use crate::tiles::store::TileStore;
use crate::tiles::tile::{Tile, TileData};
use crate::utils::profiler::ScopeTimer;

/// Sparse grid of tiles with transaction-based undo/redo.
///
/// Cells are created lazily and start out sharing one default-filled
/// buffer, so an untouched image costs a map entry per visited tile.
/// Lock order is mementos, then grid. Neither is held while waiting on a
/// tile lock: accessors keep tiles locked while they call back into the
/// store, so snapshots of live tiles are taken with both released.
pub struct TiledDataManager {
    pixel_size: usize,
    default_data: RwLock<TileData>,
    tiles: RwLock<HashMap<(i32, i32), Arc<Tile>>>,
    mementos: Mutex<MementoManager>,
}

impl TiledDataManager {
    pub fn new(pixel_size: usize, default_pixel: &[u8]) -> Result<Self, TileError> {
        Self::with_settings(StoreSettings::new(pixel_size).with_default_pixel(default_pixel))
    }

    pub fn with_settings(settings: StoreSettings) -> Result<Self, TileError> {
        settings.validate()?;
        log::debug!(
            "new tiled data manager, {} bytes per pixel",
            settings.pixel_size
        );
        Ok(Self {
            pixel_size: settings.pixel_size,
            default_data: RwLock::new(TileData::filled(&settings.default_pixel)),
            tiles: RwLock::new(HashMap::new()),
            mementos: Mutex::new(MementoManager::new()),
        })
    }

    pub fn default_pixel(&self) -> Vec<u8> {
        self.default_data.read().as_slice()[..self.pixel_size].to_vec()
    }

    /// Affects cells created from now on; existing tiles keep their bytes.
    pub fn set_default_pixel(&self, pixel: &[u8]) -> Result<(), TileError> {
        self.check_pixel(pixel)?;
        *self.default_data.write() = TileData::filled(pixel);
        Ok(())
    }

    /// Number of allocated cells.
    pub fn tile_count(&self) -> usize {
        self.tiles.read().len()
    }

    /// Union of the rects of all allocated cells, `None` when empty.
    pub fn extent(&self) -> Option<Rect> {
        let tiles = self.tiles.read();
        let rect = tiles
            .keys()
            .fold(Rect::default(), |acc, &(col, row)| {
                acc.united(&region::tile_rect(col, row))
            });
        (!rect.is_empty()).then_some(rect)
    }

    fn check_pixel(&self, pixel: &[u8]) -> Result<(), TileError> {
        if pixel.len() != self.pixel_size {
            return Err(TileError::PixelSizeMismatch {
                expected: self.pixel_size,
                got: pixel.len(),
            });
        }
        Ok(())
    }

    fn default_tile(&self, col: i32, row: i32) -> Tile {
        Tile::new(col, row, self.pixel_size, self.default_data.read().clone())
    }

    /// Existing tile, or a new default one inserted into the grid. The flag
    /// is true if the cell was created by this call.
    fn get_or_create(&self, col: i32, row: i32) -> (Arc<Tile>, bool) {
        if let Some(tile) = self.tiles.read().get(&(col, row)) {
            return (Arc::clone(tile), false);
        }
        let mut tiles = self.tiles.write();
        // Someone may have won the race between the two locks.
        if let Some(tile) = tiles.get(&(col, row)) {
            return (Arc::clone(tile), false);
        }
        log::trace!("creating tile ({col}, {row})");
        let tile = Arc::new(self.default_tile(col, row));
        tiles.insert((col, row), Arc::clone(&tile));
        (tile, true)
    }

    // ── Transactions ────────────────────────────────────────────────────

    /// Start recording. Open the transaction before creating the writable
    /// accessors whose changes it should capture.
    pub fn begin_transaction(&self) -> Result<(), TileError> {
        self.mementos.lock().begin()?;
        log::debug!("transaction started");
        Ok(())
    }

    /// Close the open transaction and push it onto the undo stack, returning
    /// the number of recorded cells.
    ///
    /// Waits for writers still holding recorded tiles.
    pub fn commit_transaction(&self) -> Result<usize, TileError> {
        let mut memento = self.mementos.lock().take_current()?;
        {
            let tiles = self.tiles.read();
            for (cell, item) in memento.items_mut() {
                item.new = tiles.get(cell).cloned();
            }
        }
        // Freeze the committed state; later writes copy away from it.
        for (_, item) in memento.items_mut() {
            item.new = item.new.take().map(|tile| Arc::new(tile.snapshot()));
        }
        let count = memento.len();
        self.mementos.lock().push_committed(memento);
        log::debug!("transaction committed, {count} tiles");
        Ok(count)
    }

    /// Discard the open transaction, restoring every recorded cell.
    pub fn rollback_transaction(&self) -> Result<(), TileError> {
        let mut mementos = self.mementos.lock();
        let memento = mementos.take_current()?;
        self.restore(&memento, false);
        log::debug!("transaction rolled back, {} tiles", memento.len());
        Ok(())
    }

    pub fn has_transaction(&self) -> bool {
        self.mementos.lock().is_recording()
    }

    pub fn can_undo(&self) -> bool {
        self.mementos.lock().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.mementos.lock().can_redo()
    }

    /// Revert the latest committed transaction, returning the cells that changed.
    pub fn undo(&self) -> Result<Vec<(i32, i32)>, TileError> {
        let _timer = ScopeTimer::new("undo");
        let mut mementos = self.mementos.lock();
        let memento = mementos.pop_undo()?;
        self.restore(&memento, false);
        let affected = memento.cells().collect();
        mementos.push_redo(memento);
        Ok(affected)
    }

    /// Re-apply the latest undone transaction, returning the cells that changed.
    pub fn redo(&self) -> Result<Vec<(i32, i32)>, TileError> {
        let _timer = ScopeTimer::new("redo");
        let mut mementos = self.mementos.lock();
        let memento = mementos.pop_redo()?;
        self.restore(&memento, true);
        let affected = memento.cells().collect();
        mementos.push_undo(memento);
        Ok(affected)
    }

    /// Put the old (or new) side of a memento back into the grid. Tiles go
    /// in as fresh snapshots so the memento's own tiles are never written.
    ///
    /// Memento tiles are only ever read-locked, so snapshotting them under
    /// the grid lock cannot wait on a writer.
    fn restore(&self, memento: &Memento, forward: bool) {
        let mut tiles = self.tiles.write();
        for (&cell, item) in memento.items() {
            let source = if forward { &item.new } else { &item.old };
            match source {
                Some(tile) => {
                    tiles.insert(cell, Arc::new(tile.snapshot()));
                }
                None => {
                    tiles.remove(&cell);
                }
            }
        }
    }

    // ── Bulk operations ─────────────────────────────────────────────────

    /// Drop every tile. Recorded when a transaction is open.
    pub fn clear(&self) {
        let unrecorded: Vec<Arc<Tile>> = {
            let mementos = self.mementos.lock();
            match mementos.current() {
                Some(memento) => self
                    .tiles
                    .read()
                    .iter()
                    .filter(|&(&(col, row), _)| !memento.contains(col, row))
                    .map(|(_, tile)| Arc::clone(tile))
                    .collect(),
                None => Vec::new(),
            }
        };
        let snapshots: Vec<Arc<Tile>> = unrecorded
            .iter()
            .map(|tile| Arc::new(tile.snapshot()))
            .collect();

        let mut mementos = self.mementos.lock();
        if let Some(memento) = mementos.current_mut() {
            for snapshot in snapshots {
                memento.record(snapshot.col(), snapshot.row(), Some(snapshot));
            }
        }
        self.tiles.write().clear();
        log::debug!("cleared, {} tiles recorded", unrecorded.len());
    }

    /// Set every pixel of `rect` to `pixel`, one tile per rayon task.
    pub fn fill_rect(&self, rect: Rect, pixel: &[u8]) -> Result<(), TileError> {
        self.check_pixel(pixel)?;
        let _timer = ScopeTimer::new("fill_rect");
        let pixel_size = self.pixel_size;
        let stride = region::row_stride(pixel_size);
        region::tiles_in_rect(&rect)
            .into_par_iter()
            .for_each(|(col, row)| {
                let _timer = ScopeTimer::with_level("fill_rect tile", log::Level::Trace);
                let area = rect.intersect(&region::tile_rect(col, row));
                let mut tile = self.get_tile(col, row, true).lock_for_write();
                let data = tile.data_mut();
                for y in area.y..=area.bottom() {
                    let start = region::offset_in_tile(area.x, y, pixel_size);
                    let end = start + area.width as usize * pixel_size;
                    debug_assert!(end - start <= stride);
                    for px in data[start..end].chunks_exact_mut(pixel_size) {
                        px.copy_from_slice(pixel);
                    }
                }
            });
        Ok(())
    }

    /// Pixels of `rect`, row-major and tightly packed.
    pub fn read_bytes(&self, rect: Rect) -> Vec<u8> {
        let pixel_size = self.pixel_size;
        let mut out = vec![0u8; rect.area() * pixel_size];
        if rect.is_empty() {
            return out;
        }
        let mut accessor = RandomAccessor::new(self, rect.x, rect.y, 0, 0, false);
        let dst_stride = rect.width as usize * pixel_size;
        for y in rect.y..=rect.bottom() {
            let mut x = rect.x;
            while x <= rect.right() {
                let run = accessor.num_contiguous_columns(x).min(rect.right() - x + 1) as usize;
                accessor.move_to(x, y);
                let dst = (y - rect.y) as usize * dst_stride + (x - rect.x) as usize * pixel_size;
                let len = run * pixel_size;
                out[dst..dst + len].copy_from_slice(&accessor.raw_data_const()[..len]);
                x += run as i32;
            }
        }
        out
    }

    /// Inverse of [`TiledDataManager::read_bytes`].
    pub fn write_bytes(&self, rect: Rect, bytes: &[u8]) -> Result<(), TileError> {
        let pixel_size = self.pixel_size;
        let expected = rect.area() * pixel_size;
        if bytes.len() != expected {
            return Err(TileError::BufferSizeMismatch {
                rect,
                expected,
                got: bytes.len(),
            });
        }
        if rect.is_empty() {
            return Ok(());
        }
        let mut accessor = RandomAccessor::new(self, rect.x, rect.y, 0, 0, true);
        let src_stride = rect.width as usize * pixel_size;
        for y in rect.y..=rect.bottom() {
            let mut x = rect.x;
            while x <= rect.right() {
                let run = accessor.num_contiguous_columns(x).min(rect.right() - x + 1) as usize;
                let src = (y - rect.y) as usize * src_stride + (x - rect.x) as usize * pixel_size;
                let len = run * pixel_size;
                accessor.raw_data_imm(x, y)[..len].copy_from_slice(&bytes[src..src + len]);
                x += run as i32;
            }
        }
        Ok(())
    }

    pub fn pixel(&self, x: i32, y: i32) -> Vec<u8> {
        let accessor = RandomAccessor::new(self, x, y, 0, 0, false);
        accessor.raw_data_const()[..self.pixel_size].to_vec()
    }

    pub fn set_pixel(&self, x: i32, y: i32, pixel: &[u8]) -> Result<(), TileError> {
        self.check_pixel(pixel)?;
        let mut accessor = RandomAccessor::new(self, x, y, 0, 0, true);
        accessor.raw_data()[..self.pixel_size].copy_from_slice(pixel);
        Ok(())
    }
}

impl TileStore for TiledDataManager {
    fn pixel_size(&self) -> usize {
        self.pixel_size
    }

    fn get_tile(&self, col: i32, row: i32, writable: bool) -> Arc<Tile> {
        if !writable {
            return self.get_or_create(col, row).0;
        }
        let tile = {
            let mut mementos = self.mementos.lock();
            let (tile, created) = self.get_or_create(col, row);
            match mementos.current_mut() {
                None => return tile,
                Some(memento) if created => {
                    memento.record(col, row, None);
                    return tile;
                }
                Some(memento) if memento.contains(col, row) => return tile,
                Some(_) => tile,
            }
        };

        // Another accessor may hold the tile for write and be about to call
        // back into the store, so the snapshot waits with no store lock held.
        // Whoever records first wins; nobody writes the tile before its own
        // get_tile has returned, so the first record holds pre-write bytes.
        let old = Arc::new(tile.snapshot());
        if let Some(memento) = self.mementos.lock().current_mut() {
            memento.record(col, row, Some(old));
        }
        tile
    }

    fn get_old_tile(&self, col: i32, row: i32) -> Arc<Tile> {
        {
            let mementos = self.mementos.lock();
            if let Some(old) = mementos.current().and_then(|m| m.old_tile(col, row)) {
                return old.unwrap_or_else(|| Arc::new(self.default_tile(col, row)));
            }
        }
        self.get_or_create(col, row).0
    }

    fn has_current_memento(&self) -> bool {
        self.has_transaction()
    }
}

impl std::fmt::Debug for TiledDataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiledDataManager")
            .field("pixel_size", &self.pixel_size)
            .field("tiles", &self.tile_count())
            .finish()
    }
}
