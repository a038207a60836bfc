// Board module
// Pad state machine, registry, and progress reporting

pub mod pad;
pub mod progress;
pub mod soundboard;

pub use pad::{Color, PadId, PadInfo, PadState};
pub use progress::format_timestamp;
pub use soundboard::Soundboard;
