// Audio pipeline module
// Symphonia decoding, rubato resampling, cpal output

pub mod decoder;
pub mod engine;
pub mod output;
pub mod resampler;
pub mod transcode;

pub use decoder::{AudioDecoder, SampleStream, StreamFormat};
pub use engine::{PlaybackEngine, PlaybackSession};
pub use output::AudioOutput;
