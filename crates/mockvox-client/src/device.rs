//! Capture and output device abstractions.
//!
//! Devices carry 16 kHz mono samples. The pipeline opens each device once on
//! connect and closes it once on disconnect.

use std::collections::VecDeque;
use std::io::BufWriter;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use mockvox_core::pcm::SAMPLE_RATE;
use mockvox_media::resample_linear;

/// Samples per capture frame (20 ms at 16 kHz).
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize) / 50;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device unavailable: {0}")]
    Unavailable(String),

    #[error("device not open")]
    NotOpen,

    #[error("device I/O failed: {0}")]
    Io(String),
}

impl From<hound::Error> for DeviceError {
    fn from(e: hound::Error) -> Self {
        DeviceError::Io(e.to_string())
    }
}

#[async_trait]
pub trait CaptureDevice: Send {
    async fn open(&mut self) -> Result<(), DeviceError>;

    /// Next captured frame; `None` once the source is exhausted.
    async fn read_frame(&mut self) -> Result<Option<Vec<i16>>, DeviceError>;

    async fn close(&mut self) -> Result<(), DeviceError>;
}

#[async_trait]
pub trait OutputDevice: Send {
    async fn open(&mut self) -> Result<(), DeviceError>;

    /// Queue one chunk for playback.
    async fn play(&mut self, chunk: &[i16]) -> Result<(), DeviceError>;

    /// Drop anything queued but not yet heard.
    async fn interrupt(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DeviceError>;
}

/// Open/close counters shared with tests.
#[derive(Debug, Clone, Default)]
pub struct DeviceStats {
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl DeviceStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn opened(&self) {
        self.opens.fetch_add(1, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Capture device replaying prepared frames.
pub struct MemoryCapture {
    frames: VecDeque<Vec<i16>>,
    frame_delay: Duration,
    unavailable: bool,
    open: bool,
    stats: DeviceStats,
}

impl MemoryCapture {
    pub fn new(frames: Vec<Vec<i16>>) -> Self {
        Self {
            frames: frames.into(),
            frame_delay: Duration::ZERO,
            unavailable: false,
            open: false,
            stats: DeviceStats::default(),
        }
    }

    /// Split `samples` into capture-sized frames.
    pub fn from_samples(samples: &[i16]) -> Self {
        Self::new(samples.chunks(FRAME_SAMPLES).map(<[i16]>::to_vec).collect())
    }

    /// Pace frames like a live microphone.
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    /// A device whose `open` fails.
    pub fn unavailable() -> Self {
        let mut device = Self::new(Vec::new());
        device.unavailable = true;
        device
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats.clone()
    }
}

#[async_trait]
impl CaptureDevice for MemoryCapture {
    async fn open(&mut self) -> Result<(), DeviceError> {
        if self.unavailable {
            return Err(DeviceError::Unavailable("no capture device".into()));
        }
        self.open = true;
        self.stats.opened();
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Option<Vec<i16>>, DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }
        if !self.frame_delay.is_zero() {
            tokio::time::sleep(self.frame_delay).await;
        }
        Ok(self.frames.pop_front())
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        self.open = false;
        self.stats.closed();
        Ok(())
    }
}

/// Output device recording every chunk it is given.
pub struct MemoryOutput {
    played: Arc<Mutex<Vec<Vec<i16>>>>,
    chunk_delay: Duration,
    open: bool,
    stats: DeviceStats,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self {
            played: Arc::new(Mutex::new(Vec::new())),
            chunk_delay: Duration::ZERO,
            open: false,
            stats: DeviceStats::default(),
        }
    }

    /// Take `delay` per chunk, as a real device would.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Shared view of the chunks played so far.
    pub fn played(&self) -> Arc<Mutex<Vec<Vec<i16>>>> {
        self.played.clone()
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats.clone()
    }
}

impl Default for MemoryOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutputDevice for MemoryOutput {
    async fn open(&mut self) -> Result<(), DeviceError> {
        self.open = true;
        self.stats.opened();
        Ok(())
    }

    async fn play(&mut self, chunk: &[i16]) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }
        if let Ok(mut played) = self.played.lock() {
            played.push(chunk.to_vec());
        }
        if !self.chunk_delay.is_zero() {
            tokio::time::sleep(self.chunk_delay).await;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        self.open = false;
        self.stats.closed();
        Ok(())
    }
}

/// Streams a WAV file as capture frames, down-mixed to mono and resampled to
/// 16 kHz.
pub struct WavFileCapture {
    path: PathBuf,
    samples: Option<VecDeque<i16>>,
}

impl WavFileCapture {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            samples: None,
        }
    }
}

#[async_trait]
impl CaptureDevice for WavFileCapture {
    async fn open(&mut self) -> Result<(), DeviceError> {
        let mut reader = hound::WavReader::open(&self.path)
            .map_err(|e| DeviceError::Unavailable(format!("{}: {e}", self.path.display())))?;
        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(DeviceError::Unavailable(format!(
                "{}: expected 16-bit PCM",
                self.path.display()
            )));
        }

        let channels = spec.channels.max(1) as usize;
        let interleaved = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
        let mono: Vec<i16> = interleaved.chunks(channels).map(|frame| frame[0]).collect();
        let samples = resample_linear(&mono, spec.sample_rate, SAMPLE_RATE);

        debug!(
            path = %self.path.display(),
            source_rate = spec.sample_rate,
            channels,
            samples = samples.len(),
            "Opened WAV capture"
        );
        self.samples = Some(samples.into());
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Option<Vec<i16>>, DeviceError> {
        let samples = self.samples.as_mut().ok_or(DeviceError::NotOpen)?;
        if samples.is_empty() {
            return Ok(None);
        }
        let take = FRAME_SAMPLES.min(samples.len());
        Ok(Some(samples.drain(..take).collect()))
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        self.samples = None;
        Ok(())
    }
}

/// Appends played chunks to a 16 kHz mono WAV file.
pub struct WavFileOutput {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
}

impl WavFileOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }
}

#[async_trait]
impl OutputDevice for WavFileOutput {
    async fn open(&mut self) -> Result<(), DeviceError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&self.path, spec)
            .map_err(|e| DeviceError::Unavailable(format!("{}: {e}", self.path.display())))?;
        self.writer = Some(writer);
        Ok(())
    }

    async fn play(&mut self, chunk: &[i16]) -> Result<(), DeviceError> {
        let writer = self.writer.as_mut().ok_or(DeviceError::NotOpen)?;
        for &sample in chunk {
            writer.write_sample(sample)?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}
