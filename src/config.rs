//! Fixed configuration for the line tracker.
//!
//! Every tunable the control loop uses lives in [`TrackerConfig`]. The set is
//! supplied once at construction; each component validates the slice it reads
//! and fails fast with a [`ConfigError`] rather than producing a division by
//! zero or a silently broken filter later in the loop.
//!
//! # Defaults
//!
//! The defaults are the values the reference robot was tuned with:
//!
//! | Parameter | Default | Notes |
//! |-----------|---------|-------|
//! | `kp`, `kd`, `ki` | −25.0, −0.5, 0.0 | negative gains: positive error steers left |
//! | `dt` | 0.01 s | 10 ms control period |
//! | `threshold_min`, `threshold_max` | 0.5 V, 4.5 V | truncation window |
//! | `alpha` | 0.9 | smoothing weight |
//! | `memory_length` | 5 | history fold depth |
//! | `base_speed` | 60.0 | percent of full duty |
//! | `tight_turn_speed`, `proportion` | 60.0, 4.0 | recovery pivot |

use thiserror::Error;

use crate::rolling::MAX_ROLLING_CAPACITY;
use crate::sensors::MAX_MEMORY_LENGTH;

/// Configuration errors, detected at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ConfigError {
    /// The control period must be strictly positive.
    #[error("control period dt must be positive, got {0}")]
    NonPositiveDt(f32),
    /// `threshold_max` must exceed `threshold_min` or truncation divides by zero.
    #[error("threshold_max ({max}) must be greater than threshold_min ({min})")]
    InvalidThresholds {
        /// Lower truncation threshold.
        min: f32,
        /// Upper truncation threshold.
        max: f32,
    },
    /// The smoothing factor must lie strictly inside (0, 1).
    #[error("smoothing factor alpha must be in (0, 1), got {0}")]
    AlphaOutOfRange(f32),
    /// Buffers and histories need room for at least one sample.
    #[error("capacity must be at least 1")]
    ZeroCapacity,
    /// Requested capacity exceeds the statically reserved storage.
    #[error("capacity {requested} exceeds the maximum of {max}")]
    CapacityTooLarge {
        /// Capacity asked for.
        requested: usize,
        /// Largest capacity the storage supports.
        max: usize,
    },
    /// The tight-turn inner wheel divisor must be positive.
    #[error("tight-turn proportion must be positive, got {0}")]
    NonPositiveProportion(f32),
    /// Truncated voltages are rescaled to `[0, output_range]`; the range must be positive.
    #[error("output range must be positive, got {0}")]
    NonPositiveOutputRange(f32),
    /// The loss/saturation margin is a fraction of the output range in [0, 0.5).
    #[error("edge margin must be in [0, 0.5), got {0}")]
    EdgeMarginOutOfRange(f32),
}

/// How each sensor's truncated voltage is smoothed across cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SmoothingMode {
    /// `smoothed = α·prev + (1−α)·truncate(raw)`, one state value per sensor.
    Exponential,
    /// Keep the last `memory_length` raw frames and fold them newest to oldest
    /// with the same exponential weight, every cycle.
    History,
}

/// Which history signal decides the recovery turn direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DirectionPolicy {
    /// Favor the side whose outermost sensor saturated most recently.
    LastSeen,
    /// Favor the side whose outermost sensor has the higher rolling average.
    RollingAverage,
    /// Follow the sign of the recent average steering error.
    ErrorSign,
}

/// The complete parameter set of the tracker.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackerConfig {
    /// Proportional gain.
    pub kp: f32,
    /// Derivative gain.
    pub kd: f32,
    /// Integral gain. Zero turns the controller into a PD controller.
    pub ki: f32,
    /// Optional symmetric clamp on the integral accumulator. `None` disables it.
    pub integral_limit: Option<f32>,
    /// Control period in seconds.
    pub dt: f32,
    /// Target line position (1-indexed sensor coordinate).
    pub setpoint: f32,
    /// Raw voltages below this read as "no line".
    pub threshold_min: f32,
    /// Raw voltages above this read as "line fully under the sensor".
    pub threshold_max: f32,
    /// Upper end of the truncated scale.
    pub output_range: f32,
    /// Fraction of `output_range` used by the full-array loss/saturation predicates.
    pub edge_margin: f32,
    /// Smoothing weight on the retained (older) value.
    pub alpha: f32,
    /// Depth of the raw history used by [`SmoothingMode::History`].
    pub memory_length: usize,
    /// Smoothing strategy.
    pub smoothing: SmoothingMode,
    /// Maximum forward speed in percent; the governor attenuates it.
    pub base_speed: f32,
    /// Governor weight on `|error|`.
    pub ks: f32,
    /// Governor weight on `|derivative|`.
    pub ksd: f32,
    /// Outer wheel speed of a recovery pivot, in percent.
    pub tight_turn_speed: f32,
    /// Inner wheel divisor of a recovery pivot.
    pub proportion: f32,
    /// Capacity of each direction-memory rolling buffer.
    pub direction_memory_length: usize,
    /// Recovery direction strategy.
    pub direction_policy: DirectionPolicy,
    /// Remote pulses longer than this (µs) toggle the robot on/off.
    pub pulse_threshold_us: u32,
}

impl TrackerConfig {
    /// Default configuration with the setpoint centred on an `N`-sensor array.
    pub fn centered<const N: usize>() -> Self {
        Self {
            setpoint: (N as f32 + 1.0) / 2.0,
            ..Self::default()
        }
    }

    /// Check every parameter. Component constructors call the relevant
    /// subset of these checks themselves.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_dt(self.dt)?;
        check_thresholds(self.threshold_min, self.threshold_max)?;
        check_alpha(self.alpha)?;
        if !(self.output_range > 0.0) {
            return Err(ConfigError::NonPositiveOutputRange(self.output_range));
        }
        if !(self.edge_margin >= 0.0 && self.edge_margin < 0.5) {
            return Err(ConfigError::EdgeMarginOutOfRange(self.edge_margin));
        }
        check_capacity(self.memory_length, MAX_MEMORY_LENGTH)?;
        check_capacity(self.direction_memory_length, MAX_ROLLING_CAPACITY)?;
        if !(self.proportion > 0.0) {
            return Err(ConfigError::NonPositiveProportion(self.proportion));
        }
        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            kp: -25.0,
            kd: -0.5,
            ki: 0.0,
            integral_limit: None,
            dt: 0.01,
            setpoint: 4.0,
            threshold_min: 0.5,
            threshold_max: 4.5,
            output_range: 5.0,
            edge_margin: 0.05,
            alpha: 0.9,
            memory_length: 5,
            smoothing: SmoothingMode::History,
            base_speed: 60.0,
            ks: 0.5,
            ksd: 0.005,
            tight_turn_speed: 60.0,
            proportion: 4.0,
            direction_memory_length: 20,
            direction_policy: DirectionPolicy::RollingAverage,
            pulse_threshold_us: 1500,
        }
    }
}

pub(crate) fn check_dt(dt: f32) -> Result<(), ConfigError> {
    // `!(x > 0)` also rejects NaN.
    if !(dt > 0.0) {
        return Err(ConfigError::NonPositiveDt(dt));
    }
    Ok(())
}

pub(crate) fn check_thresholds(min: f32, max: f32) -> Result<(), ConfigError> {
    if !(max > min) {
        return Err(ConfigError::InvalidThresholds { min, max });
    }
    Ok(())
}

pub(crate) fn check_alpha(alpha: f32) -> Result<(), ConfigError> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(ConfigError::AlphaOutOfRange(alpha));
    }
    Ok(())
}

pub(crate) fn check_capacity(requested: usize, max: usize) -> Result<(), ConfigError> {
    if requested == 0 {
        return Err(ConfigError::ZeroCapacity);
    }
    if requested > max {
        return Err(ConfigError::CapacityTooLarge { requested, max });
    }
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────────────
