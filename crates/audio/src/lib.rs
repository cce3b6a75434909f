//! Rolling audio buffer for time-range slicing.
//!
//! Retains the last W seconds of PCM audio in frame-sized chunks indexed
//! by absolute frame number. Timing is derived purely from the number of
//! bytes written, so slices line up with the byte-counter clock used for
//! transcription timestamps. Frame numbering never resets, which keeps
//! time monotonic across `reset` calls.

use std::collections::VecDeque;

use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("unsupported sample width {0}: must be 1 or 2 bytes")]
    UnsupportedSampleWidth(u32),
    #[error("invalid buffer geometry: {0}")]
    InvalidGeometry(&'static str),
}

pub type Result<T> = std::result::Result<T, AudioError>;

struct Ring {
    frames: VecDeque<Vec<u8>>,
    pending: Vec<u8>,
    total_frames: u64,
}

/// Rolling buffer of PCM frames with absolute frame numbering.
///
/// Writers append with `put_bytes`/`put_frame`; readers slice a time range
/// with `get_frames`. The ring discards the oldest frame once more than
/// `total_seconds` of audio is stored, but the absolute frame counter keeps
/// increasing so requested times map to stable positions.
pub struct AudioBuffer {
    sample_rate: u32,
    sample_width: u32,
    frame_size: usize,
    frame_bytes: usize,
    frame_duration: f64,
    max_frames: usize,
    ring: Mutex<Ring>,
}

impl AudioBuffer {
    /// Create a buffer retaining `total_seconds` of audio.
    ///
    /// `frame_size` is in samples; `sample_width` is bytes per sample and
    /// must be 1 or 2.
    pub fn new(
        sample_rate: u32,
        frame_size: usize,
        sample_width: u32,
        total_seconds: f64,
    ) -> Result<Self> {
        if !matches!(sample_width, 1 | 2) {
            return Err(AudioError::UnsupportedSampleWidth(sample_width));
        }
        if sample_rate == 0 {
            return Err(AudioError::InvalidGeometry("sample_rate must be non-zero"));
        }
        if frame_size == 0 {
            return Err(AudioError::InvalidGeometry("frame_size must be non-zero"));
        }
        if total_seconds <= 0.0 {
            return Err(AudioError::InvalidGeometry("total_seconds must be positive"));
        }

        Ok(Self {
            sample_rate,
            sample_width,
            frame_size,
            frame_bytes: frame_size * sample_width as usize,
            frame_duration: frame_size as f64 / sample_rate as f64,
            max_frames: (total_seconds * sample_rate as f64 / frame_size as f64) as usize,
            ring: Mutex::new(Ring {
                frames: VecDeque::new(),
                pending: Vec::new(),
                total_frames: 0,
            }),
        })
    }

    /// Append an arbitrary run of bytes.
    ///
    /// Bytes accumulate in a tail buffer until a full frame is available,
    /// then whole frames move into the ring.
    pub async fn put_bytes(&self, data: &[u8]) {
        let mut ring = self.ring.lock().await;

        // Aligned writes with an empty tail skip the accumulator entirely.
        if ring.pending.is_empty() && data.len() == self.frame_bytes {
            Self::push_frame(&mut ring, self.max_frames, data.to_vec());
            return;
        }

        ring.pending.extend_from_slice(data);
        while ring.pending.len() >= self.frame_bytes {
            let frame: Vec<u8> = ring.pending.drain(..self.frame_bytes).collect();
            Self::push_frame(&mut ring, self.max_frames, frame);
        }
    }

    /// Fast path for a frame that is already exactly `frame_size` samples.
    pub async fn put_frame(&self, data: &[u8]) {
        let mut ring = self.ring.lock().await;
        Self::push_frame(&mut ring, self.max_frames, data.to_vec());
    }

    fn push_frame(ring: &mut Ring, max_frames: usize, frame: Vec<u8>) {
        ring.frames.push_back(frame);
        ring.total_frames += 1;
        while ring.frames.len() > max_frames {
            ring.frames.pop_front();
        }
    }

    /// Return the concatenated bytes between `start_time` and `end_time`.
    ///
    /// The requested range is clamped to the retained window; a range that
    /// lies entirely outside it yields empty bytes. A positive `fade_out`
    /// applies a linear envelope over the final `fade_out` seconds to avoid
    /// discontinuity artefacts at the slice edge; the fade is skipped when
    /// it exceeds the slice length.
    pub async fn get_frames(&self, start_time: f64, end_time: f64, fade_out: f64) -> Vec<u8> {
        let ring = self.ring.lock().await;

        let start_index = self.frame_at(start_time);
        let end_index = self.frame_at(end_time);

        let window_end = ring.total_frames;
        let window_start = window_end - ring.frames.len() as u64;

        if end_index <= window_start || start_index >= window_end {
            return Vec::new();
        }

        let clamped_start = (start_index.max(window_start) - window_start) as usize;
        let clamped_end = (end_index.min(window_end) - window_start) as usize;

        let mut data = Vec::with_capacity((clamped_end - clamped_start) * self.frame_bytes);
        for frame in ring.frames.iter().skip(clamped_start).take(clamped_end - clamped_start) {
            data.extend_from_slice(frame);
        }

        if fade_out > 0.0 {
            self.fade_out(&mut data, fade_out);
        }
        data
    }

    fn frame_at(&self, time: f64) -> u64 {
        if time <= 0.0 {
            return 0;
        }
        // Convert through a rounded sample count so exact frame boundaries
        // are not lost to floating-point truncation.
        ((time * self.sample_rate as f64).round() as u64) / self.frame_size as u64
    }

    fn fade_out(&self, data: &mut [u8], fade_out: f64) {
        let fade_samples = (self.sample_rate as f64 * fade_out) as usize;
        let total_samples = data.len() / self.sample_width as usize;
        if fade_samples == 0 || fade_samples > total_samples {
            return;
        }

        let start = total_samples - fade_samples;
        for i in 0..fade_samples {
            let gain = if fade_samples == 1 {
                1.0
            } else {
                1.0 - i as f32 / (fade_samples - 1) as f32
            };
            let sample = start + i;
            match self.sample_width {
                1 => {
                    let v = data[sample] as i8;
                    data[sample] = (v as f32 * gain) as i8 as u8;
                }
                _ => {
                    let lo = sample * 2;
                    let v = i16::from_le_bytes([data[lo], data[lo + 1]]);
                    let faded = ((v as f32 * gain) as i16).to_le_bytes();
                    data[lo] = faded[0];
                    data[lo + 1] = faded[1];
                }
            }
        }
    }

    /// Drop all retained frames. The absolute frame counter is preserved so
    /// time does not rewind for later writes.
    pub async fn reset(&self) {
        let mut ring = self.ring.lock().await;
        ring.frames.clear();
        ring.pending.clear();
    }

    /// Total frames ever written, including discarded ones.
    pub async fn total_frames(&self) -> u64 {
        self.ring.lock().await.total_frames
    }

    /// Total audio time ever written, in seconds.
    pub async fn total_time(&self) -> f64 {
        self.ring.lock().await.total_frames as f64 * self.frame_duration
    }

    /// Number of frames currently retained.
    pub async fn retained_frames(&self) -> usize {
        self.ring.lock().await.frames.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_width(&self) -> u32 {
        self.sample_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> AudioBuffer {
        // 16 kHz, 10 ms frames, 16-bit, 10 s window.
        AudioBuffer::new(16000, 160, 2, 10.0).unwrap()
    }

    async fn put_seconds(buf: &AudioBuffer, seconds: f64) {
        let bytes = (seconds * 16000.0) as usize * 2;
        buf.put_bytes(&vec![0x11u8; bytes]).await;
    }

    #[test]
    fn test_rejects_unsupported_sample_width() {
        assert!(matches!(
            AudioBuffer::new(16000, 160, 4, 10.0),
            Err(AudioError::UnsupportedSampleWidth(4))
        ));
    }

    #[tokio::test]
    async fn test_put_bytes_reframes() {
        let buf = buffer();
        // 1.5 frames worth of bytes: one frame lands, half stays pending.
        buf.put_bytes(&vec![0u8; 480]).await;
        assert_eq!(buf.retained_frames().await, 1);
        buf.put_bytes(&vec![0u8; 160]).await;
        assert_eq!(buf.retained_frames().await, 2);
    }

    #[tokio::test]
    async fn test_ring_discards_oldest_but_keeps_numbering() {
        let buf = buffer();
        put_seconds(&buf, 12.0).await;

        assert_eq!(buf.total_frames().await, 1200);
        assert_eq!(buf.retained_frames().await, 1000);
        assert!((buf.total_time().await - 12.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_slice_entirely_outside_window_is_empty() {
        let buf = buffer();
        put_seconds(&buf, 12.0).await;

        // Window now covers [2.0, 12.0].
        assert!(buf.get_frames(0.5, 1.5, 0.0).await.is_empty());
        assert!(buf.get_frames(12.5, 14.0, 0.0).await.is_empty());
    }

    #[tokio::test]
    async fn test_slice_inside_window() {
        let buf = buffer();
        put_seconds(&buf, 12.0).await;

        let data = buf.get_frames(5.0, 7.0, 0.0).await;
        assert_eq!(data.len(), 2 * 16000 * 2);
    }

    #[tokio::test]
    async fn test_slice_clamped_to_window() {
        let buf = buffer();
        put_seconds(&buf, 12.0).await;

        // Request starts before the window; only [2.0, 3.0] is available.
        let data = buf.get_frames(1.0, 3.0, 0.0).await;
        assert_eq!(data.len(), 16000 * 2);
    }

    #[tokio::test]
    async fn test_fade_out_zeroes_tail() {
        let buf = buffer();
        let samples: Vec<u8> = std::iter::repeat(1000i16.to_le_bytes())
            .take(16000)
            .flatten()
            .collect();
        buf.put_bytes(&samples).await;

        let data = buf.get_frames(0.0, 1.0, 0.01).await;
        let last = i16::from_le_bytes([data[data.len() - 2], data[data.len() - 1]]);
        let first = i16::from_le_bytes([data[0], data[1]]);
        assert_eq!(first, 1000);
        assert_eq!(last, 0);
    }

    #[tokio::test]
    async fn test_fade_longer_than_slice_is_skipped() {
        let buf = buffer();
        put_seconds(&buf, 0.05).await;

        let data = buf.get_frames(0.0, 0.05, 1.0).await;
        assert_eq!(data.len(), 800 * 2);
        assert!(data.iter().all(|&b| b == 0x11));
    }

    #[tokio::test]
    async fn test_reset_preserves_total_frames() {
        let buf = buffer();
        put_seconds(&buf, 2.0).await;
        buf.reset().await;

        assert_eq!(buf.retained_frames().await, 0);
        assert_eq!(buf.total_frames().await, 200);
        assert!(buf.get_frames(0.0, 2.0, 0.0).await.is_empty());
    }
}
