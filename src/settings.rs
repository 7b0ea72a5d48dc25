use crate::error::TileError;

/// Largest pixel a store accepts, in bytes.
pub const MAX_PIXEL_SIZE: usize = 64;

/// Construction parameters of a [`TiledDataManager`](crate::tiles::data_manager::TiledDataManager).
///
/// Tile dimensions are fixed at compile time; only the pixel layout is chosen here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreSettings {
    pub pixel_size: usize,
    /// Contents of never-written pixels. Must be `pixel_size` bytes.
    pub default_pixel: Vec<u8>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        // Transparent 8-bit RGBA.
        Self {
            pixel_size: 4,
            default_pixel: vec![0; 4],
        }
    }
}

impl StoreSettings {
    pub fn new(pixel_size: usize) -> Self {
        Self {
            pixel_size,
            default_pixel: vec![0; pixel_size],
        }
    }

    pub fn with_default_pixel(mut self, pixel: &[u8]) -> Self {
        self.default_pixel = pixel.to_vec();
        self
    }

    pub fn validate(&self) -> Result<(), TileError> {
        if self.pixel_size == 0 || self.pixel_size > MAX_PIXEL_SIZE {
            return Err(TileError::InvalidPixelSize {
                got: self.pixel_size,
                max: MAX_PIXEL_SIZE,
            });
        }
        if self.default_pixel.len() != self.pixel_size {
            return Err(TileError::PixelSizeMismatch {
                expected: self.pixel_size,
                got: self.default_pixel.len(),
            });
        }
        Ok(())
    }
}
