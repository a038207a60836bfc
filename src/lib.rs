// Soundboard core
// Module declarations

pub mod audio;
pub mod board;
pub mod error;
pub mod events;
pub mod storage;

pub use audio::AudioOutput;
pub use board::{format_timestamp, Color, PadId, PadInfo, PadState, Soundboard};
pub use error::{Error, Result};
pub use events::BoardEvent;
pub use storage::default_storage_dir;
