/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Discrete PD / PID steering controller.
//!
//! ```text
//! error      = setpoint − measured
//! derivative = (error − prev_error) / dt
//! integral  += error · dt                 (only when ki ≠ 0)
//! output     = kp·error + kd·derivative + ki·integral
//! ```
//!
//! `prev_error` is updated on every call. While the line is lost the loop
//! calls [`FeedbackController::neutral`], which feeds `measured = setpoint`
//! so the first real update after recovery sees `prev_error = 0` instead of a
//! stale error from before the loss.

use crate::config::{check_dt, ConfigError, TrackerConfig};

/// One controller step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControlOutput {
    /// Steering correction.
    pub output: f32,
    /// `setpoint − measured`.
    pub error: f32,
    /// Finite-difference error rate.
    pub derivative: f32,
}

/// Gains, setpoint and per-step memory of the steering controller.
#[derive(Clone, Debug)]
pub struct FeedbackController {
    kp: f32,
    kd: f32,
    ki: f32,
    dt: f32,
    setpoint: f32,
    integral_limit: Option<f32>,
    prev_error: f32,
    integral: f32,
}

impl FeedbackController {
    /// PD controller. Fails if `dt` is not strictly positive.
    pub fn pd(kp: f32, kd: f32, dt: f32, setpoint: f32) -> Result<Self, ConfigError> {
        Self::pid(kp, kd, 0.0, dt, setpoint)
    }

    /// PID controller with an unbounded integral. Fails if `dt` is not strictly positive.
    pub fn pid(kp: f32, kd: f32, ki: f32, dt: f32, setpoint: f32) -> Result<Self, ConfigError> {
        check_dt(dt)?;
        Ok(Self {
            kp,
            kd,
            ki,
            dt,
            setpoint,
            integral_limit: None,
            prev_error: 0.0,
            integral: 0.0,
        })
    }

    /// Build from the tracker configuration.
    pub fn from_config(config: &TrackerConfig) -> Result<Self, ConfigError> {
        let mut c = Self::pid(config.kp, config.kd, config.ki, config.dt, config.setpoint)?;
        c.integral_limit = config.integral_limit;
        Ok(c)
    }

    /// Clamp the integral accumulator to `[-limit, limit]`.
    pub fn with_integral_limit(mut self, limit: f32) -> Self {
        self.integral_limit = Some(if limit < 0.0 { -limit } else { limit });
        self
    }

    /// Advance one step with the measured line position.
    pub fn update(&mut self, measured: f32) -> ControlOutput {
        let error = self.setpoint - measured;
        let derivative = (error - self.prev_error) / self.dt;
        self.prev_error = error;

        if self.ki != 0.0 {
            self.integral += error * self.dt;
            if let Some(limit) = self.integral_limit {
                self.integral = self.integral.clamp(-limit, limit);
            }
        }

        ControlOutput {
            output: self.kp * error + self.kd * derivative + self.ki * self.integral,
            error,
            derivative,
        }
    }

    /// Step with `measured = setpoint`; used on cycles where the position is unusable.
    pub fn neutral(&mut self) -> ControlOutput {
        self.update(self.setpoint)
    }

    /// Forget the previous error and the integral.
    pub fn reset(&mut self) {
        self.prev_error = 0.0;
        self.integral = 0.0;
    }

    /// Error of the last step.
    pub fn prev_error(&self) -> f32 {
        self.prev_error
    }

    /// Accumulated integral.
    pub fn integral(&self) -> f32 {
        self.integral
    }

    /// Target line position.
    pub fn setpoint(&self) -> f32 {
        self.setpoint
    }

    /// Control period in seconds.
    pub fn dt(&self) -> f32 {
        self.dt
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
