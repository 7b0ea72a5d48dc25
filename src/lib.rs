pub mod error;
pub mod settings;
pub mod tiles;
pub mod utils;

pub use error::TileError;
pub use settings::StoreSettings;
pub use tiles::data_manager::TiledDataManager;
pub use tiles::random_accessor::{CACHE_SIZE, RandomAccessor};
pub use tiles::region::Rect;
pub use tiles::store::TileStore;
pub use tiles::tile::{TILE_HEIGHT, TILE_WIDTH, Tile, TileData};
