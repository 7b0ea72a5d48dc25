//! Pure tile-geometry helpers.
//!
//! Every mapping here is total over `i32`: negative coordinates floor toward
//! negative infinity, so column `-1` covers `[-TILE_WIDTH, -1]` and there is
//! no seam at zero.

use crate::tiles::tile::{TILE_HEIGHT, TILE_WIDTH};

const TILE_WIDTH_I32: i32 = TILE_WIDTH as i32;
const TILE_HEIGHT_I32: i32 = TILE_HEIGHT as i32;

/// Grid column holding pixel column `x`.
#[inline]
pub fn x_to_col(x: i32) -> i32 {
    x.div_euclid(TILE_WIDTH_I32)
}

/// Grid row holding pixel row `y`.
#[inline]
pub fn y_to_row(y: i32) -> i32 {
    y.div_euclid(TILE_HEIGHT_I32)
}

/// Number of pixels from `x` up to and including the right edge of its tile.
#[inline]
pub fn num_contiguous_columns(x: i32) -> i32 {
    TILE_WIDTH_I32 - x.rem_euclid(TILE_WIDTH_I32)
}

/// Number of pixels from `y` down to and including the bottom edge of its tile.
#[inline]
pub fn num_contiguous_rows(y: i32) -> i32 {
    TILE_HEIGHT_I32 - y.rem_euclid(TILE_HEIGHT_I32)
}

/// Byte distance between two vertically adjacent pixels of one tile.
#[inline]
pub fn row_stride(pixel_size: usize) -> usize {
    TILE_WIDTH * pixel_size
}

/// Byte offset of pixel `(x, y)` inside the buffer of the tile containing it.
#[inline]
pub fn offset_in_tile(x: i32, y: i32, pixel_size: usize) -> usize {
    let local_x = x.rem_euclid(TILE_WIDTH_I32) as usize;
    let local_y = y.rem_euclid(TILE_HEIGHT_I32) as usize;
    (local_x + local_y * TILE_WIDTH) * pixel_size
}

/// Axis-aligned pixel rectangle. `width`/`height` of zero means empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rect covering the inclusive corners `(x1, y1)`..=`(x2, y2)`.
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self::new(x1, y1, x2 - x1 + 1, y2 - y1 + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Inclusive right edge.
    pub fn right(&self) -> i32 {
        self.x + self.width - 1
    }

    /// Inclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.y + self.height - 1
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        !self.is_empty() && x >= self.x && y >= self.y && x <= self.right() && y <= self.bottom()
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        if self.is_empty() || other.is_empty() {
            return Rect::default();
        }
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        if x2 < x1 || y2 < y1 {
            return Rect::default();
        }
        Rect::from_corners(x1, y1, x2, y2)
    }

    /// Smallest rect containing both. An empty side is ignored.
    pub fn united(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect::from_corners(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    pub fn area(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.width as usize * self.height as usize
        }
    }
}

/// Pixel rect covered by grid cell `(col, row)`.
pub fn tile_rect(col: i32, row: i32) -> Rect {
    Rect::new(
        col * TILE_WIDTH_I32,
        row * TILE_HEIGHT_I32,
        TILE_WIDTH_I32,
        TILE_HEIGHT_I32,
    )
}

/// Every grid cell touched by `rect`, row-major.
pub fn tiles_in_rect(rect: &Rect) -> Vec<(i32, i32)> {
    if rect.is_empty() {
        return Vec::new();
    }
    let (col1, row1) = (x_to_col(rect.x), y_to_row(rect.y));
    let (col2, row2) = (x_to_col(rect.right()), y_to_row(rect.bottom()));
    let mut cells = Vec::with_capacity(((col2 - col1 + 1) * (row2 - row1 + 1)) as usize);
    for row in row1..=row2 {
        for col in col1..=col2 {
            cells.push((col, row));
        }
    }
    cells
}
