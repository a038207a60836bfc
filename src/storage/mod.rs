// Persistence module
// JSON snapshots of the pad list in the app storage directory

pub mod saved_pads;

pub use saved_pads::{default_storage_dir, SavedPad};
