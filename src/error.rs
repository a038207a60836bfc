// Error types for the soundboard core
// Uses thiserror so callers can distinguish "install the tool" from "file is corrupt"

use std::path::PathBuf;
use thiserror::Error;

use crate::board::PadId;

#[derive(Error, Debug)]
pub enum Error {
    /// Audio file does not exist on disk
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// Extension is not one of the accepted audio formats
    #[error("unsupported audio format: {0} (supported: .mp3, .wav, .m4a, .ogg)")]
    UnsupportedFormat(String),

    /// Malformed or undecodable audio data
    #[error("failed to decode audio: {0}")]
    Decode(String),

    /// External transcoder is not installed / not on PATH
    #[error("{0} not found on PATH; install it to enable .m4a support")]
    MissingExternalTool(String),

    /// External transcoder ran but did not produce a usable file
    #[error("external transcoder failed: {0}")]
    ExternalToolFailure(String),

    /// Audio output device errors
    #[error("audio output error: {0}")]
    Output(String),

    /// Playback engine errors
    #[error("playback error: {0}")]
    Playback(String),

    /// Operation referenced a pad that is not on the board
    #[error("unknown pad: {0}")]
    PadNotFound(PadId),

    /// Corrupt or unreadable saved-pads payload
    #[error("failed to read saved pads: {0}")]
    PersistenceRead(String),

    /// Saved-pads snapshot could not be written
    #[error("failed to write saved pads: {0}")]
    PersistenceWrite(String),

    /// Other file I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
