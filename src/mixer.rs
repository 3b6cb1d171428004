/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Steering mixer and H-bridge duty mapping.
//!
//! Two ways to produce a [`MotorCommand`]:
//!
//! - **Tracking**: differential arc around a governed base speed.
//!   `left = base + correction`, `right = base − correction`, where
//!   `base = max_speed / (1 + ks·|error| + ksd·|derivative|)`.
//! - **Tight turn**: pivot for recovery. The wheel on the turning side
//!   reverses at the full turn speed, the other drives forward at
//!   `turn / proportion`.
//!
//! [`Motors`] turns a command into per-channel duty. Each wheel has a forward
//! and a reverse channel and at most one of them is ever nonzero.

use crate::config::{ConfigError, TrackerConfig};
use crate::controller::ControlOutput;
use crate::direction::TurnDirection;

/// Wheel speeds are clamped to `[-SPEED_LIMIT, SPEED_LIMIT]` percent.
pub const SPEED_LIMIT: f32 = 100.0;

/// 16-bit duty count at full speed.
const DUTY_FULL_SCALE: f32 = 65535.0;

fn abs(x: f32) -> f32 {
    if x < 0.0 {
        -x
    } else {
        x
    }
}

fn clamp_speed(x: f32) -> f32 {
    x.clamp(-SPEED_LIMIT, SPEED_LIMIT)
}

// ─── Commands ────────────────────────────────────────────────────────────────

/// Signed wheel speeds in percent; the sign is the rotation direction.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotorCommand {
    /// Left wheel, −100..=100.
    pub left: f32,
    /// Right wheel, −100..=100.
    pub right: f32,
}

impl MotorCommand {
    /// Both wheels idle.
    pub const STOP: MotorCommand = MotorCommand { left: 0.0, right: 0.0 };

    /// Build a command, clamping each wheel to the valid range.
    pub fn new(left: f32, right: f32) -> Self {
        Self { left: clamp_speed(left), right: clamp_speed(right) }
    }
}

/// Speed governor: slow down in proportion to tracking error and its rate.
pub fn governed_speed(max_speed: f32, error: f32, derivative: f32, ks: f32, ksd: f32) -> f32 {
    max_speed / (1.0 + ks * abs(error) + ksd * abs(derivative))
}

/// Differential tracking command.
pub fn tracking(base_speed: f32, correction: f32) -> MotorCommand {
    MotorCommand::new(base_speed + correction, base_speed - correction)
}

/// Pivot command. `turn >= 0` pivots right, `turn < 0` pivots left.
pub fn tight_turn(turn: f32, proportion: f32) -> MotorCommand {
    if turn >= 0.0 {
        MotorCommand::new(turn / proportion, -turn)
    } else {
        MotorCommand::new(turn, -turn / proportion)
    }
}

/// Tracking and pivot parameters bound together.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mixer {
    max_speed: f32,
    ks: f32,
    ksd: f32,
    tight_turn_speed: f32,
    proportion: f32,
}

impl Mixer {
    /// Build from the tracker configuration. Rejects a non-positive proportion.
    pub fn from_config(config: &TrackerConfig) -> Result<Self, ConfigError> {
        if !(config.proportion > 0.0) {
            return Err(ConfigError::NonPositiveProportion(config.proportion));
        }
        Ok(Self {
            max_speed: config.base_speed,
            ks: config.ks,
            ksd: config.ksd,
            tight_turn_speed: config.tight_turn_speed,
            proportion: config.proportion,
        })
    }

    /// Governed tracking command for one controller step.
    pub fn track(&self, control: &ControlOutput) -> MotorCommand {
        let base =
            governed_speed(self.max_speed, control.error, control.derivative, self.ks, self.ksd);
        tracking(base, control.output)
    }

    /// Recovery pivot toward `direction`.
    pub fn pivot(&self, direction: TurnDirection) -> MotorCommand {
        tight_turn(direction.sign() * abs(self.tight_turn_speed), self.proportion)
    }
}

// ─── Duty mapping ────────────────────────────────────────────────────────────

/// One PWM channel of the dual H-bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotorChannel {
    /// Left wheel, forward rotation.
    LeftForward,
    /// Left wheel, reverse rotation.
    LeftReverse,
    /// Right wheel, forward rotation.
    RightForward,
    /// Right wheel, reverse rotation.
    RightReverse,
}

impl MotorChannel {
    /// All four channels.
    pub const ALL: [MotorChannel; 4] = [
        MotorChannel::LeftForward,
        MotorChannel::LeftReverse,
        MotorChannel::RightForward,
        MotorChannel::RightReverse,
    ];
}

/// Duty pair for one wheel. At most one field is nonzero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WheelDuty {
    /// Forward channel duty, 0..=65535.
    pub forward: u16,
    /// Reverse channel duty, 0..=65535.
    pub reverse: u16,
}

impl WheelDuty {
    /// Map a signed speed in percent to a forward/reverse duty pair.
    pub fn from_speed(speed: f32) -> Self {
        let speed = clamp_speed(speed);
        if speed > 0.0 {
            Self { forward: (speed / SPEED_LIMIT * DUTY_FULL_SCALE) as u16, reverse: 0 }
        } else {
            Self { forward: 0, reverse: (-speed / SPEED_LIMIT * DUTY_FULL_SCALE) as u16 }
        }
    }
}

/// PWM and enable-line peripheral seam. Writes always succeed.
pub trait MotorDriver {
    /// Write a 16-bit duty to one channel.
    fn set_duty(&mut self, channel: MotorChannel, duty: u16);
    /// Energize the bridge enable lines.
    fn enable(&mut self);
    /// De-energize the bridge enable lines.
    fn disable(&mut self);
}

/// Owns the motor driver and applies commands to it.
pub struct Motors<D: MotorDriver> {
    driver: D,
    enabled: bool,
    last: MotorCommand,
}

impl<D: MotorDriver> Motors<D> {
    /// Wrap a driver. The bridge starts disabled with all duties zeroed.
    pub fn new(mut driver: D) -> Self {
        for channel in MotorChannel::ALL {
            driver.set_duty(channel, 0);
        }
        driver.disable();
        Self { driver, enabled: false, last: MotorCommand::STOP }
    }

    /// Write `command` to the four channels. The zeroed channel of each
    /// wheel is written first so the bridge never sees both sides driven.
    pub fn apply(&mut self, command: MotorCommand) {
        let left = WheelDuty::from_speed(command.left);
        let right = WheelDuty::from_speed(command.right);
        let driver = &mut self.driver;
        write_wheel(driver, MotorChannel::LeftForward, MotorChannel::LeftReverse, left);
        write_wheel(driver, MotorChannel::RightForward, MotorChannel::RightReverse, right);
        self.last = command;
    }

    /// Energize the bridge.
    pub fn start(&mut self) {
        self.driver.enable();
        self.enabled = true;
    }

    /// Zero every duty and de-energize the bridge.
    pub fn stop(&mut self) {
        for channel in MotorChannel::ALL {
            self.driver.set_duty(channel, 0);
        }
        self.driver.disable();
        self.enabled = false;
        self.last = MotorCommand::STOP;
    }

    /// Stop then re-enable, to kill residual pivot momentum.
    pub fn restart_pulse(&mut self) {
        self.stop();
        self.start();
    }

    /// Whether the enable lines are energized.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Last command written.
    pub fn last_command(&self) -> MotorCommand {
        self.last
    }

    /// Shared access to the driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Exclusive access to the driver.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

fn write_wheel<D: MotorDriver>(
    driver: &mut D,
    forward: MotorChannel,
    reverse: MotorChannel,
    duty: WheelDuty,
) {
    if duty.forward > 0 {
        driver.set_duty(reverse, 0);
        driver.set_duty(forward, duty.forward);
    } else {
        driver.set_duty(forward, 0);
        driver.set_duty(reverse, duty.reverse);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
