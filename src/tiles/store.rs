use std::sync::Arc;

use crate::tiles::region;
use crate::tiles::tile::Tile;

/// What a [`RandomAccessor`](crate::tiles::random_accessor::RandomAccessor)
/// needs from the storage behind it.
///
/// Geometry methods have defaults built on [`region`]; stores only override
/// them if they use a different grid.
pub trait TileStore {
    /// Bytes per pixel of every tile in the store.
    fn pixel_size(&self) -> usize;

    /// Current tile of a cell, created with default contents if absent.
    /// `writable` announces the caller's intent to mutate it.
    fn get_tile(&self, col: i32, row: i32, writable: bool) -> Arc<Tile>;

    /// Pre-transaction tile of a cell. May be the very object returned by
    /// [`TileStore::get_tile`] when no transaction touched the cell.
    fn get_old_tile(&self, col: i32, row: i32) -> Arc<Tile>;

    /// True while a transaction is recording.
    fn has_current_memento(&self) -> bool;

    fn x_to_col(&self, x: i32) -> i32 {
        region::x_to_col(x)
    }

    fn y_to_row(&self, y: i32) -> i32 {
        region::y_to_row(y)
    }

    fn num_contiguous_columns(&self, x: i32, _min_y: i32, _max_y: i32) -> i32 {
        region::num_contiguous_columns(x)
    }

    fn num_contiguous_rows(&self, y: i32, _min_x: i32, _max_x: i32) -> i32 {
        region::num_contiguous_rows(y)
    }

    fn row_stride(&self, _x: i32, _y: i32) -> usize {
        region::row_stride(self.pixel_size())
    }
}
