//! Sliding window, IIR low-pass filter, window statistics, and int8
//! quantization (§4.4) — the pipeline stage between raw sensor samples and
//! the inference engine's input tensor.
#![cfg_attr(not(any(feature = "std", test)), no_std)]

/// Largest supported window capacity; the backing array is always this
/// size so the type stays allocation-free regardless of the
/// runtime-configured `W`.
pub const MAX_WINDOW: usize = 256;

/// One streamed sensor reading: voltage, current, a monotonic millisecond
/// timestamp, and a quality score in `[0, 100]`. Consumed once by
/// [`Preprocessor::add_sample`]; not retained past window insertion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub voltage: f32,
    pub current: f32,
    pub timestamp: u64,
    pub quality: u8,
}

/// Window mean, standard deviation, minimum, and maximum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f32,
    pub std_dev: f32,
    pub min: f32,
    pub max: f32,
}

/// Errors raised by preprocessor operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PreprocessError {
    /// `normalize` or `window_stats` was called before the window filled.
    NotReady,
    /// `W == 0`, `W > 256`, or `alpha` was outside `[0.0, 1.0]`.
    InvalidConfig,
    /// An output buffer was smaller than the configured window capacity.
    BufferTooSmall,
}

impl core::fmt::Display for PreprocessError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            PreprocessError::NotReady => "window has not filled yet",
            PreprocessError::InvalidConfig => "invalid window size or filter coefficient",
            PreprocessError::BufferTooSmall => "output buffer smaller than window capacity",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PreprocessError {}

/// Floor applied to the window standard deviation before normalizing, so a
/// perfectly flat window never divides by zero.
const STD_DEV_EPSILON: f32 = 1e-6;

/// The scale factor [`Preprocessor::normalize`] applies after standardizing,
/// chosen to match the inference engine's int8 quantization.
const NORMALIZE_SCALE: f32 = 64.0;

/// The sliding window over filtered voltage samples, plus the IIR filter
/// state that feeds it.
pub struct Preprocessor {
    window: [f32; MAX_WINDOW],
    capacity: usize,
    write_idx: usize,
    inserted: u32,
    prev_filtered: Option<f32>,
    alpha: f32,
}

impl Preprocessor {
    /// Builds a preprocessor with window capacity `capacity` and IIR
    /// coefficient `alpha`. Rejects `capacity == 0`, `capacity > 256`, and
    /// `alpha` outside `[0.0, 1.0]`.
    pub fn new(capacity: usize, alpha: f32) -> Result<Self, PreprocessError> {
        if capacity == 0 || capacity > MAX_WINDOW || !(0.0..=1.0).contains(&alpha) {
            return Err(PreprocessError::InvalidConfig);
        }
        Ok(Preprocessor {
            window: [0.0; MAX_WINDOW],
            capacity,
            write_idx: 0,
            inserted: 0,
            prev_filtered: None,
            alpha,
        })
    }

    /// The configured window capacity `W`.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `filtered = alpha * voltage + (1 - alpha) * prev_filtered` to
    /// the window, overwriting the oldest entry once full. The first sample
    /// after construction or [`Self::reset`] initializes `prev_filtered`
    /// directly from its own voltage.
    pub fn add_sample(&mut self, sample: &SensorSample) {
        let filtered = match self.prev_filtered {
            Some(prev) => self.alpha * sample.voltage + (1.0 - self.alpha) * prev,
            None => sample.voltage,
        };
        self.prev_filtered = Some(filtered);
        self.window[self.write_idx] = filtered;
        self.write_idx = (self.write_idx + 1) % self.capacity;
        self.inserted = self.inserted.saturating_add(1);
    }

    /// `true` once `W` samples have been inserted since the last reset;
    /// remains `true` thereafter.
    pub fn is_ready(&self) -> bool {
        self.inserted as usize >= self.capacity
    }

    /// Writes the window's contents into `out`, oldest sample first.
    fn copy_ordered(&self, out: &mut [f32]) {
        let (tail, head) = self.window[..self.capacity].split_at(self.write_idx);
        out[..head.len()].copy_from_slice(head);
        out[head.len()..self.capacity].copy_from_slice(tail);
    }

    /// Computes window mean, standard deviation, minimum, and maximum.
    pub fn window_stats(&self) -> Result<WindowStats, PreprocessError> {
        if !self.is_ready() {
            return Err(PreprocessError::NotReady);
        }
        let values = &self.window[..self.capacity];
        let sum: f32 = values.iter().sum();
        let mean = sum / self.capacity as f32;
        let variance: f32 = values.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / self.capacity as f32;
        let std_dev = libm::sqrtf(variance);
        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        Ok(WindowStats { mean, std_dev, min, max })
    }

    /// Emits the standardized, scaled, and quantized window into `out`,
    /// oldest sample first. `out` must be at least [`Self::capacity`] long.
    /// Returns the number of samples written (always `W`).
    pub fn normalize(&self, out: &mut [i8]) -> Result<usize, PreprocessError> {
        if !self.is_ready() {
            return Err(PreprocessError::NotReady);
        }
        if out.len() < self.capacity {
            return Err(PreprocessError::BufferTooSmall);
        }
        let stats = self.window_stats()?;
        let denom = if stats.std_dev > STD_DEV_EPSILON { stats.std_dev } else { STD_DEV_EPSILON };

        let mut ordered = [0.0f32; MAX_WINDOW];
        self.copy_ordered(&mut ordered[..self.capacity]);

        for (dst, &x) in out.iter_mut().zip(ordered[..self.capacity].iter()) {
            let scaled = libm::roundf((x - stats.mean) / denom * NORMALIZE_SCALE);
            *dst = scaled.clamp(-128.0, 127.0) as i8;
        }
        Ok(self.capacity)
    }

    /// Multiplies `buf` in place by the Hamming window
    /// `0.54 - 0.46 * cos(2*pi*i/(N-1))`, `N = buf.len()`.
    pub fn apply_window(&self, buf: &mut [f32]) {
        let n = buf.len();
        if n <= 1 {
            return;
        }
        let denom = (n - 1) as f32;
        for (i, x) in buf.iter_mut().enumerate() {
            let coeff = 0.54 - 0.46 * libm::cosf(2.0 * core::f32::consts::PI * i as f32 / denom);
            *x *= coeff;
        }
    }

    /// Clears the window and filter state. Configuration (`capacity`,
    /// `alpha`) is stable across resets.
    pub fn reset(&mut self) {
        self.window = [0.0; MAX_WINDOW];
        self.write_idx = 0;
        self.inserted = 0;
        self.prev_filtered = None;
    }
}
