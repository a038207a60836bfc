// Sample rate conversion using rubato
// Streams fixed-size chunks from the file's native rate to the output rate

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{Error, Result};

/// Frames fed to rubato per processing call.
const CHUNK_FRAMES: usize = 1024;

/// Streaming resampler for interleaved stereo audio.
///
/// Accumulates input until a full chunk is available, so `push` may return
/// empty output early on; `flush` drains the remainder at end of stream.
/// When input and output rates match it passes samples through untouched.
pub struct StreamResampler {
    inner: Option<FastFixedIn<f32>>,
    channels: usize,
    /// Planar accumulation buffers, one per channel
    pending: Vec<Vec<f32>>,
}

impl StreamResampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: u16) -> Result<Self> {
        let channels = channels.max(1) as usize;
        let inner = if input_rate == output_rate {
            None
        } else {
            Some(
                FastFixedIn::<f32>::new(
                    output_rate as f64 / input_rate as f64,
                    1.0,
                    PolynomialDegree::Septic,
                    CHUNK_FRAMES,
                    channels,
                )
                .map_err(|e| Error::Playback(format!("failed to create resampler: {}", e)))?,
            )
        };

        Ok(Self {
            inner,
            channels,
            pending: vec![Vec::new(); channels],
        })
    }

    /// Feed interleaved input, returning whatever full chunks resampled to.
    pub fn push(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        let resampler = match self.inner.as_mut() {
            Some(resampler) => resampler,
            None => return Ok(interleaved.to_vec()),
        };

        for (i, sample) in interleaved.iter().enumerate() {
            self.pending[i % self.channels].push(*sample);
        }

        let mut output = Vec::new();
        while self.pending[0].len() >= CHUNK_FRAMES {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|ch| ch.drain(..CHUNK_FRAMES).collect())
                .collect();
            let resampled = resampler
                .process(&chunk, None)
                .map_err(|e| Error::Playback(format!("resampling failed: {}", e)))?;
            interleave_into(&resampled, &mut output);
        }
        Ok(output)
    }

    /// Drain buffered input and the filter tail at end of stream.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let resampler = match self.inner.as_mut() {
            Some(r) => r,
            None => return Ok(Vec::new()),
        };

        let mut output = Vec::new();
        if !self.pending[0].is_empty() {
            let chunk: Vec<Vec<f32>> = self.pending.iter_mut().map(std::mem::take).collect();
            let resampled = resampler
                .process_partial(Some(chunk.as_slice()), None)
                .map_err(|e| Error::Playback(format!("resampling failed: {}", e)))?;
            interleave_into(&resampled, &mut output);
        }
        let tail = resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(|e| Error::Playback(format!("resampling failed: {}", e)))?;
        interleave_into(&tail, &mut output);
        Ok(output)
    }
}

/// Convert planar samples to interleaved format.
///
/// Input:  [[L, L, L, ...], [R, R, R, ...]]
/// Output: [L, R, L, R, L, R, ...]
fn interleave_into(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    if planar.is_empty() {
        return;
    }
    let num_channels = planar.len();
    let num_frames = planar[0].len();
    out.reserve(num_frames * num_channels);
    for frame_idx in 0..num_frames {
        for ch in planar.iter() {
            out.push(ch[frame_idx]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_is_a_passthrough() {
        let mut rs = StreamResampler::new(44100, 44100, 2).unwrap();
        let input = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        assert_eq!(rs.push(&input).unwrap(), input);
        assert!(rs.flush().unwrap().is_empty());
    }

    #[test]
    fn downsamples_to_roughly_the_rate_ratio() {
        let input_rate = 48000;
        let mut rs = StreamResampler::new(input_rate, 44100, 2).unwrap();

        // 1 second of stereo sine at 440 Hz
        let mut produced = 0usize;
        let mut input = Vec::with_capacity(input_rate as usize * 2);
        for i in 0..input_rate as usize {
            let t = i as f32 / input_rate as f32;
            let s = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
            input.push(s);
            input.push(s);
        }
        produced += rs.push(&input).unwrap().len();
        produced += rs.flush().unwrap().len();

        let produced_frames = produced / 2;
        assert!(
            (produced_frames as i64 - 44100).abs() < 256,
            "expected ~44100 frames, got {}",
            produced_frames
        );
    }

    #[test]
    fn short_input_is_held_until_flush() {
        let mut rs = StreamResampler::new(22050, 44100, 1).unwrap();
        // Fewer than CHUNK_FRAMES samples: push returns nothing yet
        assert!(rs.push(&[0.5; 100]).unwrap().is_empty());
        let flushed = rs.flush().unwrap();
        assert!(!flushed.is_empty());
    }

    #[test]
    fn interleave_reorders_planar_channels() {
        let planar = vec![vec![1.0, 3.0, 5.0], vec![2.0, 4.0, 6.0]];
        let mut out = Vec::new();
        interleave_into(&planar, &mut out);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
