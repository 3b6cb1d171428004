/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Reflectance array estimator: truncation, smoothing, weighted centroid.
//!
//! Raw voltages pass through three stages every cycle:
//!
//! ```text
//! raw ──► truncate ──► smooth (exponential | history fold) ──► centroid
//!          clip to [min, max], rescale to [0, range]
//! ```
//!
//! Sensors are indexed left to right, 1..=N, by physical position. The
//! multiplexer channel wiring is independent of that order and is supplied as
//! a position → channel table.
//!
//! # Invariants
//!
//! - Reading length is fixed at `N` by the type.
//! - `weighted_centroid` returns 0.0 when the total weight is exactly zero.
//! - Loss and saturation are full-array predicates: every sensor must agree.
//! - Given the same raw sequence and α, smoothing is deterministic.

use heapless::Deque;

use crate::config::{
    check_alpha, check_capacity, check_thresholds, ConfigError, SmoothingMode, TrackerConfig,
};

/// Deepest raw history [`SmoothingMode::History`] can fold.
pub const MAX_MEMORY_LENGTH: usize = 16;

/// Full-scale count of the 16-bit ADC.
const ADC_FULL_SCALE: f32 = 65535.0;

/// ADC reference voltage.
const ADC_REFERENCE_VOLTS: f32 = 5.0;

/// One voltage per sensor, left to right.
pub type SensorReading<const N: usize> = [f32; N];

/// Convert a 16-bit ADC count to volts against the 5 V reference.
pub fn adc_to_volts(raw: u16) -> f32 {
    raw as f32 / ADC_FULL_SCALE * ADC_REFERENCE_VOLTS
}

// ─── Peripheral seam ─────────────────────────────────────────────────────────

/// Analog front end behind a multiplexer.
///
/// `select` routes a channel to the converter; `read` samples it. Reads have
/// bounded latency and no failure mode: any value is valid truncation input.
pub trait SensorSource {
    /// Route multiplexer `channel` to the converter.
    fn select(&mut self, channel: u8);
    /// Sample the currently selected channel, in volts.
    fn read(&mut self) -> f32;
}

// ─── Truncation ──────────────────────────────────────────────────────────────

/// Clamp-then-rescale mapping into the detection range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Truncation {
    min: f32,
    max: f32,
    range: f32,
}

impl Truncation {
    /// Build a truncation window. Rejects `max <= min` and non-positive ranges.
    pub fn new(
        threshold_min: f32,
        threshold_max: f32,
        output_range: f32,
    ) -> Result<Self, ConfigError> {
        check_thresholds(threshold_min, threshold_max)?;
        if !(output_range > 0.0) {
            return Err(ConfigError::NonPositiveOutputRange(output_range));
        }
        Ok(Self { min: threshold_min, max: threshold_max, range: output_range })
    }

    /// Clip `v` to `[min, max]` and rescale to `[0, range]`.
    ///
    /// Anything not above the floor, NaN included, maps to 0.
    pub fn apply(&self, v: f32) -> f32 {
        let clipped = if v > self.min { v.min(self.max) } else { self.min };
        (clipped - self.min) / (self.max - self.min) * self.range
    }

    /// Upper end of the rescaled range.
    pub fn output_range(&self) -> f32 {
        self.range
    }
}

// ─── Centroid and classification ─────────────────────────────────────────────

/// Voltage-weighted centroid of the 1-indexed sensor positions.
///
/// Returns 0.0 when the voltages sum to exactly zero.
pub fn weighted_centroid(voltages: &[f32]) -> f32 {
    let mut total_weight = 0.0;
    let mut weighted_sum = 0.0;
    for (i, &v) in voltages.iter().enumerate() {
        total_weight += v;
        weighted_sum += (i + 1) as f32 * v;
    }
    if total_weight == 0.0 {
        0.0
    } else {
        weighted_sum / total_weight
    }
}

/// What the array currently sees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LineStatus {
    /// The line is partially under the array; the centroid is usable.
    Visible,
    /// Every sensor is at or below the loss floor.
    Lost,
    /// Every sensor is at or above the saturation ceiling.
    Saturated,
}

impl LineStatus {
    /// `true` for the two states that trigger recovery.
    pub fn needs_recovery(self) -> bool {
        !matches!(self, LineStatus::Visible)
    }
}

/// Classify smoothed voltages on the `[0, range]` scale.
///
/// `margin` is a fraction of `range`: Lost when every value is at most
/// `margin·range`, Saturated when every value is at least `range − margin·range`.
pub fn classify(smoothed: &[f32], range: f32, margin: f32) -> LineStatus {
    let band = margin * range;
    if smoothed.iter().all(|&v| v <= band) {
        LineStatus::Lost
    } else if smoothed.iter().all(|&v| v >= range - band) {
        LineStatus::Saturated
    } else {
        LineStatus::Visible
    }
}

/// Current-cycle truncated voltages of the two outermost sensors.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EdgeSample {
    /// Leftmost sensor (position 1).
    pub left: f32,
    /// Rightmost sensor (position N).
    pub right: f32,
}

// ─── Sensor Array ────────────────────────────────────────────────────────────

/// Smoothing memory, exclusively owned by the array.
#[derive(Clone, Debug)]
enum Smoother<const N: usize> {
    Exponential { smoothed: [f32; N] },
    History { frames: Deque<[f32; N], MAX_MEMORY_LENGTH>, depth: usize },
}

impl<const N: usize> Smoother<N> {
    fn new(mode: SmoothingMode, depth: usize) -> Self {
        match mode {
            SmoothingMode::Exponential => Smoother::Exponential { smoothed: [0.0; N] },
            SmoothingMode::History => {
                let mut frames = Deque::new();
                for _ in 0..depth {
                    // depth <= MAX_MEMORY_LENGTH, checked by the caller.
                    let _ = frames.push_back([0.0; N]);
                }
                Smoother::History { frames, depth }
            }
        }
    }

    fn push(&mut self, truncated: [f32; N], alpha: f32) -> [f32; N] {
        match self {
            Smoother::Exponential { smoothed } => {
                for (s, &t) in smoothed.iter_mut().zip(truncated.iter()) {
                    *s = alpha * *s + (1.0 - alpha) * t;
                }
                *smoothed
            }
            Smoother::History { frames, depth } => {
                if frames.len() >= *depth {
                    frames.pop_back();
                }
                let _ = frames.push_front(truncated);
                // Newest first; each older frame is folded in with weight (1 − α).
                let mut iter = frames.iter();
                let mut out = iter.next().copied().unwrap_or([0.0; N]);
                for older in iter {
                    for (s, &o) in out.iter_mut().zip(older.iter()) {
                        *s = alpha * *s + (1.0 - alpha) * o;
                    }
                }
                out
            }
        }
    }

    fn reset(&mut self) {
        match self {
            Smoother::Exponential { smoothed } => *smoothed = [0.0; N],
            Smoother::History { frames, .. } => {
                for frame in frames.iter_mut() {
                    *frame = [0.0; N];
                }
            }
        }
    }
}

/// Reads the array every cycle and produces the smoothed voltages, the line
/// position and the loss/saturation status.
pub struct SensorArray<S: SensorSource, const N: usize> {
    source: S,
    /// `channels[i]` is the multiplexer channel of physical position `i + 1`.
    channels: [u8; N],
    truncation: Truncation,
    alpha: f32,
    edge_margin: f32,
    smoother: Smoother<N>,
    smoothed: [f32; N],
    truncated: [f32; N],
}

impl<S: SensorSource, const N: usize> SensorArray<S, N> {
    /// Construct from a source, the position → channel table and the config.
    pub fn new(source: S, channels: [u8; N], config: &TrackerConfig) -> Result<Self, ConfigError> {
        let truncation =
            Truncation::new(config.threshold_min, config.threshold_max, config.output_range)?;
        check_alpha(config.alpha)?;
        check_capacity(config.memory_length, MAX_MEMORY_LENGTH)?;
        if !(config.edge_margin >= 0.0 && config.edge_margin < 0.5) {
            return Err(ConfigError::EdgeMarginOutOfRange(config.edge_margin));
        }
        Ok(Self {
            source,
            channels,
            truncation,
            alpha: config.alpha,
            edge_margin: config.edge_margin,
            smoother: Smoother::new(config.smoothing, config.memory_length),
            smoothed: [0.0; N],
            truncated: [0.0; N],
        })
    }

    /// Sample every sensor once, in physical order.
    pub fn read_raw(&mut self) -> SensorReading<N> {
        let mut raw = [0.0; N];
        for (v, &channel) in raw.iter_mut().zip(self.channels.iter()) {
            self.source.select(channel);
            *v = self.source.read();
        }
        raw
    }

    /// Read the array and fold the sample into the smoothing memory.
    pub fn update(&mut self) -> &SensorReading<N> {
        let raw = self.read_raw();
        self.ingest(raw)
    }

    /// Fold an already sampled raw reading into the smoothing memory.
    pub fn ingest(&mut self, raw: SensorReading<N>) -> &SensorReading<N> {
        for (t, &r) in self.truncated.iter_mut().zip(raw.iter()) {
            *t = self.truncation.apply(r);
        }
        self.smoothed = self.smoother.push(self.truncated, self.alpha);
        &self.smoothed
    }

    /// Smoothed voltages from the last update.
    pub fn smoothed(&self) -> &SensorReading<N> {
        &self.smoothed
    }

    /// Truncated (unsmoothed) voltages from the last update.
    pub fn truncated(&self) -> &SensorReading<N> {
        &self.truncated
    }

    /// Weighted centroid of the smoothed voltages.
    pub fn position(&self) -> f32 {
        weighted_centroid(&self.smoothed)
    }

    /// Full-array loss/saturation status of the smoothed voltages.
    pub fn status(&self) -> LineStatus {
        classify(&self.smoothed, self.truncation.output_range(), self.edge_margin)
    }

    /// Outermost sensors of the last update, truncated but not smoothed.
    pub fn edges(&self) -> EdgeSample {
        match (self.truncated.first(), self.truncated.last()) {
            (Some(&left), Some(&right)) => EdgeSample { left, right },
            _ => EdgeSample::default(),
        }
    }

    /// Truncation window in use.
    pub fn truncation(&self) -> &Truncation {
        &self.truncation
    }

    /// Clear all smoothing memory.
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.smoothed = [0.0; N];
        self.truncated = [0.0; N];
    }

    /// Shared access to the underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Exclusive access to the underlying source.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Source that returns `values[channel]`.
    struct FixedSource {
        values: [f32; 8],
        selected: u8,
        selects: usize,
    }

    impl SensorSource for FixedSource {
        fn select(&mut self, channel: u8) {
            self.selected = channel;
            self.selects += 1;
        }
        fn read(&mut self) -> f32 {
            self.values[self.selected as usize]
        }
    }

    fn config(smoothing: SmoothingMode) -> TrackerConfig {
        TrackerConfig {
            threshold_min: 0.0,
            threshold_max: 5.0,
            smoothing,
            ..TrackerConfig::centered::<7>()
        }
    }

    #[test]
    fn test_adc_to_volts_endpoints() {
        assert_eq!(adc_to_volts(0), 0.0);
        assert!((adc_to_volts(u16::MAX) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_truncate_endpoints_and_clamp() {
        let t = Truncation::new(0.5, 4.5, 5.0).unwrap();
        assert_eq!(t.apply(0.5), 0.0);
        assert!((t.apply(4.5) - 5.0).abs() < 1e-6);
        assert_eq!(t.apply(0.1), 0.0, "below floor clamps to floor");
        assert!((t.apply(9.0) - 5.0).abs() < 1e-6, "above ceiling clamps to ceiling");
        assert!((t.apply(2.5) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_truncate_nan_maps_to_floor() {
        let t = Truncation::new(0.5, 4.5, 5.0).unwrap();
        assert_eq!(t.apply(f32::NAN), 0.0);
        assert_eq!(t.apply(f32::NEG_INFINITY), 0.0);
        assert!((t.apply(f32::INFINITY) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_truncate_monotonic() {
        let t = Truncation::new(-1.0, 3.0, 10.0).unwrap();
        let mut prev = f32::NEG_INFINITY;
        let mut v = -3.0_f32;
        while v < 5.0 {
            let out = t.apply(v);
            assert!(out >= prev, "truncate not monotonic at v={}", v);
            prev = out;
            v += 0.01;
        }
    }

    #[test]
    fn test_truncation_rejects_bad_window() {
        assert!(matches!(
            Truncation::new(1.0, 1.0, 5.0),
            Err(ConfigError::InvalidThresholds { .. })
        ));
        assert!(matches!(
            Truncation::new(0.0, 1.0, 0.0),
            Err(ConfigError::NonPositiveOutputRange(_))
        ));
    }

    #[test]
    fn test_centroid_single_sensor() {
        let v = [0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0];
        assert!((weighted_centroid(&v) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_centroid_zero_weight_is_zero() {
        assert_eq!(weighted_centroid(&[0.0; 7]), 0.0);
        assert_eq!(weighted_centroid(&[]), 0.0);
    }

    #[test]
    fn test_centroid_between_two_sensors() {
        let v = [0.0, 2.0, 2.0, 0.0, 0.0];
        assert!((weighted_centroid(&v) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_centroid_scale_invariant() {
        let v = [0.3_f32, 1.2, 4.0, 2.2, 0.0, 0.7, 0.1];
        let base = weighted_centroid(&v);
        for k in [0.01_f32, 0.5, 3.0, 250.0] {
            let scaled: [f32; 7] = core::array::from_fn(|i| v[i] * k);
            let c = weighted_centroid(&scaled);
            assert!((c - base).abs() < 1e-4, "k={} base={} got={}", k, base, c);
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&[0.0; 5], 5.0, 0.05), LineStatus::Lost);
        assert_eq!(classify(&[0.2, 0.1, 0.0, 0.25, 0.0], 5.0, 0.05), LineStatus::Lost);
        assert_eq!(classify(&[5.0; 5], 5.0, 0.05), LineStatus::Saturated);
        assert_eq!(classify(&[4.9, 5.0, 4.8, 5.0, 4.76], 5.0, 0.05), LineStatus::Saturated);
        assert_eq!(classify(&[0.0, 0.0, 5.0, 0.0, 0.0], 5.0, 0.05), LineStatus::Visible);
        // one bright sensor at the edge is enough to stay visible
        assert_eq!(classify(&[0.0, 0.0, 0.0, 0.0, 1.0], 5.0, 0.05), LineStatus::Visible);
        assert!(LineStatus::Lost.needs_recovery());
        assert!(LineStatus::Saturated.needs_recovery());
        assert!(!LineStatus::Visible.needs_recovery());
    }

    #[test]
    fn test_read_follows_channel_table() {
        // position 1 is wired to channel 7, position 2 to channel 6, ...
        let source = FixedSource {
            values: [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0],
            selected: 0,
            selects: 0,
        };
        let mut array: SensorArray<_, 5> =
            SensorArray::new(source, [7, 6, 5, 4, 3], &config(SmoothingMode::Exponential)).unwrap();
        let raw = array.read_raw();
        assert_eq!(raw, [7.0, 6.0, 5.0, 4.0, 3.0]);
        assert_eq!(array.source().selects, 5);
    }

    #[test]
    fn test_exponential_smoothing_step() {
        let source = FixedSource { values: [0.0; 8], selected: 0, selects: 0 };
        let cfg = config(SmoothingMode::Exponential);
        let mut array: SensorArray<_, 7> =
            SensorArray::new(source, [0, 1, 2, 3, 4, 5, 6], &cfg).unwrap();
        let s = *array.ingest([0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0]);
        // 0.9·0 + 0.1·5
        assert!((s[3] - 0.5).abs() < 1e-6, "got {}", s[3]);
        let s = *array.ingest([0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0]);
        // 0.9·0.5 + 0.1·5
        assert!((s[3] - 0.95).abs() < 1e-6, "got {}", s[3]);
        assert!((array.position() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_smoothing_recovers_after_nan_frame() {
        for mode in [SmoothingMode::Exponential, SmoothingMode::History] {
            let source = FixedSource { values: [0.0; 8], selected: 0, selects: 0 };
            let mut array: SensorArray<_, 5> =
                SensorArray::new(source, [0, 1, 2, 3, 4], &config(mode)).unwrap();
            let s = *array.ingest([f32::NAN, 0.0, 0.0, 0.0, 0.0]);
            assert!(s.iter().all(|v| !v.is_nan()), "mode {:?}: {:?}", mode, s);

            for _ in 0..200 {
                array.ingest([0.0, 0.0, 4.5, 0.0, 0.0]);
            }
            assert!(array.smoothed().iter().all(|v| !v.is_nan()), "mode {:?}", mode);
            assert!((array.position() - 3.0).abs() < 1e-6, "mode {:?}", mode);
            assert_eq!(array.status(), LineStatus::Visible);
        }
    }

    #[test]
    fn test_history_fold_weights_newest_first() {
        let source = FixedSource { values: [0.0; 8], selected: 0, selects: 0 };
        let cfg = TrackerConfig { memory_length: 3, ..config(SmoothingMode::History) };
        let mut array: SensorArray<_, 5> = SensorArray::new(source, [0, 1, 2, 3, 4], &cfg).unwrap();

        array.ingest([1.0, 0.0, 0.0, 0.0, 0.0]);
        array.ingest([2.0, 0.0, 0.0, 0.0, 0.0]);
        let s = *array.ingest([3.0, 0.0, 0.0, 0.0, 0.0]);
        // frames newest→oldest: 3, 2, 1
        // s = 3; s = 0.9·3 + 0.1·2 = 2.9; s = 0.9·2.9 + 0.1·1 = 2.71
        assert!((s[0] - 2.71).abs() < 1e-5, "got {}", s[0]);

        // the oldest frame (1.0) is evicted on the next push
        let s = *array.ingest([0.0, 0.0, 0.0, 0.0, 0.0]);
        // frames: 0, 3, 2 → s = 0; 0.9·0 + 0.1·3 = 0.3; 0.9·0.3 + 0.1·2 = 0.47
        assert!((s[0] - 0.47).abs() < 1e-5, "got {}", s[0]);
    }

    #[test]
    fn test_smoothing_is_deterministic() {
        let inputs = [
            [0.0, 1.0, 4.0, 1.0, 0.0],
            [0.0, 2.0, 3.5, 0.5, 0.0],
            [0.5, 3.0, 2.0, 0.0, 0.0],
            [1.0, 4.0, 1.0, 0.0, 0.0],
        ];
        for mode in [SmoothingMode::Exponential, SmoothingMode::History] {
            let make = || {
                let source = FixedSource { values: [0.0; 8], selected: 0, selects: 0 };
                SensorArray::<_, 5>::new(source, [0, 1, 2, 3, 4], &config(mode)).unwrap()
            };
            let mut a = make();
            let mut b = make();
            for raw in inputs {
                assert_eq!(a.ingest(raw), b.ingest(raw), "mode {:?}", mode);
            }
        }
    }

    #[test]
    fn test_all_below_floor_is_lost() {
        let source = FixedSource { values: [0.1; 8], selected: 0, selects: 0 };
        let cfg = TrackerConfig {
            threshold_min: 0.5,
            threshold_max: 4.5,
            ..TrackerConfig::centered::<7>()
        };
        let mut array: SensorArray<_, 7> =
            SensorArray::new(source, [0, 1, 2, 3, 4, 5, 6], &cfg).unwrap();
        let s = *array.update();
        assert_eq!(s, [0.0; 7]);
        assert_eq!(array.position(), 0.0);
        assert_eq!(array.status(), LineStatus::Lost);
    }

    #[test]
    fn test_edges_are_unsmoothed() {
        let source = FixedSource { values: [0.0; 8], selected: 0, selects: 0 };
        let mut array: SensorArray<_, 5> =
            SensorArray::new(source, [0, 1, 2, 3, 4], &config(SmoothingMode::Exponential)).unwrap();
        array.ingest([5.0, 0.0, 0.0, 0.0, 2.0]);
        let e = array.edges();
        assert!((e.left - 5.0).abs() < 1e-6);
        assert!((e.right - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_reset_clears_smoothing_memory() {
        let source = FixedSource { values: [0.0; 8], selected: 0, selects: 0 };
        let mut array: SensorArray<_, 5> =
            SensorArray::new(source, [0, 1, 2, 3, 4], &config(SmoothingMode::History)).unwrap();
        array.ingest([5.0; 5]);
        array.reset();
        assert_eq!(array.smoothed(), &[0.0; 5]);
        let s = *array.ingest([0.0; 5]);
        assert_eq!(s, [0.0; 5], "no residue from before the reset");
    }
}
