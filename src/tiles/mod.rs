//! Tiled pixel storage: tiles, the store contract, the concrete data
//! manager with undo history, and the cached random accessor.

pub mod data_manager;
pub mod memento;
pub mod random_accessor;
pub mod region;
pub mod store;
pub mod tile;
