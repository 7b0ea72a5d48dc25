use crate::tiles::region::Rect;

/// Recoverable failures of the tile store.
///
/// Contract violations (mutating through a read-only accessor, corrupt tile
/// sizes) are assertions, not variants here.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TileError {
    #[error("pixel size must be between 1 and {max} bytes, got {got}")]
    InvalidPixelSize { got: usize, max: usize },
    #[error("expected {expected} bytes, got {got}")]
    PixelSizeMismatch { expected: usize, got: usize },
    #[error("buffer of {got} bytes does not cover {rect:?} ({expected} bytes)")]
    BufferSizeMismatch {
        rect: Rect,
        expected: usize,
        got: usize,
    },
    #[error("a transaction is already recording")]
    TransactionAlreadyOpen,
    #[error("no transaction is recording")]
    NoTransaction,
    #[error("history can't change while a transaction is recording")]
    TransactionOpen,
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("nothing to redo")]
    NothingToRedo,
}
