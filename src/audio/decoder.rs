// Audio decoder using Symphonia
// Dispatches by file extension and yields a seekable interleaved f32 stream

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::{AudioBufferRef, AudioPlanes, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::sample::Sample;
use symphonia::core::units::Time;
use tempfile::TempPath;
use tracing::{debug, warn};

use crate::audio::transcode;
use crate::error::{Error, Result};

/// Sample rate substituted when a file reports none.
pub const FALLBACK_SAMPLE_RATE: u32 = 44100;

/// Format descriptor of a decoded stream.
///
/// `total_frames` counts frames (one sample per channel); the total number of
/// individual samples is `total_frames * channels`.
#[derive(Debug, Clone, Copy)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub total_frames: u64,
}

impl StreamFormat {
    /// Sample rate with the zero-rate fallback applied.
    pub fn effective_sample_rate(&self) -> u32 {
        if self.sample_rate == 0 {
            warn!("file reports a sample rate of 0, assuming {}", FALLBACK_SAMPLE_RATE);
            FALLBACK_SAMPLE_RATE
        } else {
            self.sample_rate
        }
    }

    /// Total playing time: `total_frames / sample_rate` seconds.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_frames as f64 / self.effective_sample_rate() as f64)
    }
}

enum ReaderKind {
    Wav,
    Mp3,
}

pub struct AudioDecoder;

impl AudioDecoder {
    /// Open an audio file and prepare a seekable sample stream.
    ///
    /// Dispatch is by extension: `.mp3` uses the MP3 reader, `.wav` the WAV
    /// reader, `.m4a` goes through the external transcoder, and anything else
    /// (including `.ogg`) falls back to the WAV reader best-effort.
    pub fn open(path: &Path) -> Result<SampleStream> {
        if !path.is_file() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "m4a" => {
                // The temp WAV lives as long as the stream and is removed
                // when it closes.
                let temp = transcode::transcode_to_wav(path)?;
                let file = File::open(&temp)?;
                SampleStream::new(file, ReaderKind::Wav, Some(temp))
            }
            "mp3" => {
                let file = File::open(path)?;
                SampleStream::new(file, ReaderKind::Mp3, None)
            }
            _ => {
                let file = File::open(path)?;
                SampleStream::new(file, ReaderKind::Wav, None)
            }
        }
    }
}

struct StreamInner {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    // Keeps a transcoded temp file alive until close
    _temp: Option<TempPath>,
}

/// A decoded, seekable audio stream yielding interleaved f32 samples.
pub struct SampleStream {
    inner: Option<StreamInner>,
    format: StreamFormat,
    /// Index of the next frame `next_chunk` will return
    pos_frames: u64,
    /// Decoded samples not yet handed out (left over from a seek)
    pending: Vec<f32>,
}

impl SampleStream {
    fn new(file: File, kind: ReaderKind, temp: Option<TempPath>) -> Result<Self> {
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let opts = FormatOptions::default();

        let reader: Box<dyn FormatReader> = match kind {
            ReaderKind::Wav => Box::new(
                symphonia::default::formats::WavReader::try_new(mss, &opts)
                    .map_err(|e| Error::Decode(format!("failed to read WAV container: {}", e)))?,
            ),
            ReaderKind::Mp3 => Box::new(
                symphonia::default::formats::MpaReader::try_new(mss, &opts)
                    .map_err(|e| Error::Decode(format!("failed to read MP3 stream: {}", e)))?,
            ),
        };

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode("no audio track found".to_string()))?;

        let track_id = track.id;
        let format = StreamFormat {
            sample_rate: track.codec_params.sample_rate.unwrap_or(0),
            channels: track.codec_params.channels.map(|c| c.count() as u16).unwrap_or(1),
            total_frames: track.codec_params.n_frames.unwrap_or(0),
        };

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("failed to create decoder: {}", e)))?;

        debug!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            total_frames = format.total_frames,
            "opened audio stream"
        );

        Ok(Self {
            inner: Some(StreamInner { reader, decoder, track_id, _temp: temp }),
            format,
            pos_frames: 0,
            pending: Vec::new(),
        })
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Total length in frames (0 when the container does not report it).
    pub fn total_frames(&self) -> u64 {
        self.format.total_frames
    }

    /// Index of the next frame to be returned by `next_chunk`.
    pub fn position_frames(&self) -> u64 {
        self.pos_frames
    }

    /// Decode the next chunk of interleaved f32 samples.
    ///
    /// Returns `Ok(None)` at end of stream or after `close`.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        if !self.pending.is_empty() {
            let chunk = std::mem::take(&mut self.pending);
            self.pos_frames += (chunk.len() / self.format.channels.max(1) as usize) as u64;
            return Ok(Some(chunk));
        }
        match self.read_packet()? {
            Some(chunk) => {
                self.pos_frames += (chunk.len() / self.format.channels.max(1) as usize) as u64;
                Ok(Some(chunk))
            }
            None => Ok(None),
        }
    }

    /// Seek so the next chunk starts exactly at `frame`.
    ///
    /// The container seek lands on a packet boundary at or before the target;
    /// the remainder is decoded and skipped to hit the exact frame.
    pub fn seek(&mut self, frame: u64) -> Result<()> {
        let rate = self.format.effective_sample_rate();
        let channels = self.format.channels.max(1) as usize;

        let seeked = {
            let inner = self
                .inner
                .as_mut()
                .ok_or_else(|| Error::Playback("seek on a closed stream".to_string()))?;
            let seconds = frame as f64 / rate as f64;
            let time = Time::new(seconds as u64, seconds.fract());
            let seeked = inner
                .reader
                .seek(
                    SeekMode::Accurate,
                    SeekTo::Time { time, track_id: Some(inner.track_id) },
                )
                .map_err(|e| Error::Decode(format!("seek failed: {}", e)))?;
            // Decoder state is stale after a container seek
            inner.decoder.reset();
            seeked
        };

        self.pending.clear();
        self.pos_frames = seeked.actual_ts;

        // Decode-and-skip up to the requested frame
        let mut to_skip = frame.saturating_sub(seeked.actual_ts);
        while to_skip > 0 {
            match self.read_packet()? {
                Some(chunk) => {
                    let frames = (chunk.len() / channels) as u64;
                    if frames <= to_skip {
                        to_skip -= frames;
                        self.pos_frames += frames;
                    } else {
                        self.pending = chunk[(to_skip as usize * channels)..].to_vec();
                        self.pos_frames += to_skip;
                        to_skip = 0;
                    }
                }
                None => break,
            }
        }

        Ok(())
    }

    /// Close the stream and release the underlying file handle.
    ///
    /// Idempotent; also removes the transcode temp file if one was in use.
    pub fn close(&mut self) {
        self.inner = None;
        self.pending.clear();
    }

    /// Decode the next packet for our track, without position bookkeeping.
    fn read_packet(&mut self) -> Result<Option<Vec<f32>>> {
        let inner = match self.inner.as_mut() {
            Some(inner) => inner,
            None => return Ok(None),
        };

        loop {
            let packet = match inner.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None); // End of stream
                }
                Err(SymphoniaError::ResetRequired) => {
                    inner.decoder.reset();
                    continue;
                }
                Err(e) => return Err(Error::Decode(format!("failed to read packet: {}", e))),
            };

            // Skip packets from other tracks
            if packet.track_id() != inner.track_id {
                continue;
            }

            match inner.decoder.decode(&packet) {
                Ok(decoded) => return Ok(Some(audio_buf_to_f32(&decoded))),
                Err(SymphoniaError::DecodeError(e)) => {
                    // Malformed packet; keep going
                    warn!("decode error (skipping packet): {}", e);
                    continue;
                }
                Err(e) => return Err(Error::Decode(format!("decode failed: {}", e))),
            }
        }
    }
}

/// Convert any AudioBufferRef to interleaved f32 samples
fn audio_buf_to_f32(buf: &AudioBufferRef) -> Vec<f32> {
    match buf {
        AudioBufferRef::F32(b) => interleave_f32(b.planes(), b.frames()),
        AudioBufferRef::F64(b) => interleave_convert(b.planes(), b.frames(), |s: f64| s as f32),
        AudioBufferRef::S8(b) => {
            let scale = 1.0 / 128.0;
            interleave_convert(b.planes(), b.frames(), |s: i8| s as f32 * scale)
        }
        AudioBufferRef::S16(b) => {
            let scale = 1.0 / 32768.0;
            interleave_convert(b.planes(), b.frames(), |s: i16| s as f32 * scale)
        }
        AudioBufferRef::S24(b) => {
            let scale = 1.0 / 8388608.0;
            interleave_convert(b.planes(), b.frames(), |s| s.inner() as f32 * scale)
        }
        AudioBufferRef::S32(b) => {
            let scale = 1.0 / 2147483648.0;
            interleave_convert(b.planes(), b.frames(), |s: i32| s as f32 * scale)
        }
        AudioBufferRef::U8(b) => {
            interleave_convert(b.planes(), b.frames(), |s: u8| (s as f32 - 128.0) / 128.0)
        }
        AudioBufferRef::U16(b) => {
            interleave_convert(b.planes(), b.frames(), |s: u16| (s as f32 - 32768.0) / 32768.0)
        }
        AudioBufferRef::U24(b) => interleave_convert(b.planes(), b.frames(), |s| {
            (s.inner() as f32 - 8388608.0) / 8388608.0
        }),
        AudioBufferRef::U32(b) => interleave_convert(b.planes(), b.frames(), |s: u32| {
            (s as f64 - 2147483648.0) as f32 / 2147483648.0
        }),
    }
}

fn interleave_f32(planes: AudioPlanes<f32>, frames: usize) -> Vec<f32> {
    let num_channels = planes.planes().len();
    if num_channels == 0 || frames == 0 {
        return vec![];
    }

    let mut interleaved = Vec::with_capacity(frames * num_channels);
    for frame in 0..frames {
        for ch in 0..num_channels {
            interleaved.push(planes.planes()[ch][frame]);
        }
    }
    interleaved
}

fn interleave_convert<T: Sample + Copy, F: Fn(T) -> f32>(
    planes: AudioPlanes<T>,
    frames: usize,
    convert: F,
) -> Vec<f32> {
    let num_channels = planes.planes().len();
    if num_channels == 0 || frames == 0 {
        return vec![];
    }

    let mut interleaved = Vec::with_capacity(frames * num_channels);
    for frame in 0..frames {
        for ch in 0..num_channels {
            interleaved.push(convert(planes.planes()[ch][frame]));
        }
    }
    interleaved
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Write a mono 16-bit WAV whose sample at frame i is (i % 16384) / 32768.
    pub(crate) fn write_ramp_wav(dir: &Path, name: &str, seconds: f64, sample_rate: u32) -> PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        let frames = (seconds * sample_rate as f64) as u64;
        for i in 0..frames {
            writer.write_sample((i % 16384) as i16).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn open_reports_wav_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ramp_wav(dir.path(), "clip.wav", 3.0, 44100);

        let stream = AudioDecoder::open(&path).unwrap();
        let format = stream.format();
        assert_eq!(format.sample_rate, 44100);
        assert_eq!(format.channels, 1);
        assert_eq!(format.total_frames, 132_300);
        assert!((format.duration().as_secs_f64() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn close_is_idempotent_and_releases_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ramp_wav(dir.path(), "clip.wav", 0.5, 44100);

        let mut stream = AudioDecoder::open(&path).unwrap();
        stream.close();
        stream.close();
        assert!(stream.next_chunk().unwrap().is_none());

        // The path must be reopenable once the stream is closed
        let again = AudioDecoder::open(&path).unwrap();
        assert_eq!(again.format().sample_rate, 44100);
    }

    #[test]
    fn seek_lands_on_the_exact_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ramp_wav(dir.path(), "clip.wav", 1.0, 44100);

        let mut stream = AudioDecoder::open(&path).unwrap();
        stream.seek(1000).unwrap();
        assert_eq!(stream.position_frames(), 1000);

        let chunk = stream.next_chunk().unwrap().expect("samples after seek");
        let expected = 1000.0 / 32768.0;
        assert!(
            (chunk[0] - expected).abs() < 1e-6,
            "expected first sample {} got {}",
            expected,
            chunk[0]
        );
    }

    #[test]
    fn unknown_extension_falls_back_to_wav() {
        let dir = tempfile::tempdir().unwrap();
        let wav = write_ramp_wav(dir.path(), "clip.wav", 0.2, 44100);
        let ogg = dir.path().join("clip.ogg");
        std::fs::copy(&wav, &ogg).unwrap();

        let stream = AudioDecoder::open(&ogg).unwrap();
        assert_eq!(stream.format().sample_rate, 44100);
    }

    #[test]
    fn missing_file_is_distinct_from_corrupt_data() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("nope.wav");
        assert!(matches!(AudioDecoder::open(&missing), Err(Error::FileNotFound(_))));

        let garbage = dir.path().join("bad.wav");
        std::fs::write(&garbage, b"definitely not audio").unwrap();
        assert!(matches!(AudioDecoder::open(&garbage), Err(Error::Decode(_))));
    }

    #[test]
    fn streams_every_frame_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ramp_wav(dir.path(), "clip.wav", 0.25, 8000);

        let mut stream = AudioDecoder::open(&path).unwrap();
        let total = stream.total_frames();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next_chunk().unwrap() {
            collected.extend(chunk);
        }
        assert_eq!(collected.len() as u64, total);
        assert!((collected[100] - 100.0 / 32768.0).abs() < 1e-6);
    }
}
