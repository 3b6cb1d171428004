/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Fixed-period control loop.
//!
//! # State machine
//!
//! ```text
//!            on                 line lost / saturated
//! Stopped ───────► Tracking ─────────────────────────► Recovering
//!    ▲                ▲                                    │
//!    │ off (any)      └────── line visible again ──────────┘
//!    └──────────────────────   (stop/restart pulse first)
//! ```
//!
//! Every cycle ends by sleeping `max(0, period − elapsed)`. A cycle that runs
//! past the period is logged and continues without sleeping.
//!
//! # Invariants
//!
//! - On a recovery cycle the controller still steps, with `measured = setpoint`.
//! - Leaving `Recovering` always issues a motor stop/restart pulse before the
//!   first tracking command.
//! - Every exit path of [`LineTracker::run`] leaves the motors stopped and
//!   disabled, including unwinding panics.

use core::ops::{Deref, DerefMut};

use log::{debug, info, trace, warn};

use crate::config::{ConfigError, TrackerConfig};
use crate::controller::{ControlOutput, FeedbackController};
use crate::direction::{DirectionHint, DirectionMemory, TurnDirection};
use crate::mixer::{Mixer, MotorCommand, MotorDriver, Motors};
use crate::remote::{PulseSource, PulseToggle};
use crate::sensors::{LineStatus, SensorArray, SensorSource};

/// Monotonic time and sleeping.
pub trait Clock {
    /// Microseconds since an arbitrary fixed origin.
    fn now_us(&self) -> u64;
    /// Suspend the calling task for `us` microseconds.
    fn sleep_us(&mut self, us: u64);
}

/// Sleep needed to hold a constant period. Zero when the cycle overran.
pub fn period_sleep_us(period_us: u64, elapsed_us: u64) -> u64 {
    period_us.saturating_sub(elapsed_us)
}

/// Operating state of the robot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RobotState {
    /// Motors disabled; sensors not read.
    Stopped,
    /// Following the line with the feedback controller.
    Tracking,
    /// The last cycle found no usable line and pivoted.
    Recovering,
}

/// What one cycle observed and commanded.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CycleReport {
    /// State after the cycle.
    pub state: RobotState,
    /// Array status, `None` while stopped.
    pub status: Option<LineStatus>,
    /// Weighted centroid of the smoothed voltages (0.0 while stopped).
    pub position: f32,
    /// Controller step; the neutral step on recovery cycles.
    pub control: Option<ControlOutput>,
    /// Pivot direction on recovery cycles.
    pub turn: Option<TurnDirection>,
    /// Whether a stop/restart pulse preceded this cycle's command.
    pub restarted: bool,
    /// Command written to the motors.
    pub command: MotorCommand,
}

impl CycleReport {
    fn stopped() -> Self {
        Self {
            state: RobotState::Stopped,
            status: None,
            position: 0.0,
            control: None,
            turn: None,
            restarted: false,
            command: MotorCommand::STOP,
        }
    }
}

/// The control loop orchestrator. Owns every piece of per-cycle state.
pub struct LineTracker<S: SensorSource, D: MotorDriver, const N: usize> {
    sensors: SensorArray<S, N>,
    controller: FeedbackController,
    direction: DirectionMemory,
    mixer: Mixer,
    motors: Motors<D>,
    toggle: PulseToggle,
    state: RobotState,
    period_us: u64,
    cycles: u64,
}

impl<S: SensorSource, D: MotorDriver, const N: usize> LineTracker<S, D, N> {
    /// Assemble the loop. The robot starts [`RobotState::Stopped`].
    ///
    /// - `source`: analog front end.
    /// - `channels`: multiplexer channel of each physical position, left to right.
    /// - `driver`: H-bridge PWM and enable lines.
    pub fn new(
        source: S,
        channels: [u8; N],
        driver: D,
        config: &TrackerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let tracker = Self {
            sensors: SensorArray::new(source, channels, config)?,
            controller: FeedbackController::from_config(config)?,
            direction: DirectionMemory::from_config(config)?,
            mixer: Mixer::from_config(config)?,
            motors: Motors::new(driver),
            toggle: PulseToggle::new(config.pulse_threshold_us),
            state: RobotState::Stopped,
            period_us: (config.dt * 1_000_000.0 + 0.5) as u64,
            cycles: 0,
        };
        info!(
            "line tracker ready: {} sensors, period {} us, policy {:?}",
            N,
            tracker.period_us,
            config.direction_policy
        );
        Ok(tracker)
    }

    // ── Transitions ───────────────────────────────────────────────────────

    /// `Stopped → Tracking`: enable the motors and start from fresh memory.
    pub fn turn_on(&mut self) {
        if self.state != RobotState::Stopped {
            return;
        }
        self.direction.reset();
        self.controller.reset();
        self.motors.start();
        self.state = RobotState::Tracking;
        info!("robot on");
    }

    /// Any state `→ Stopped`: zero and disable the motors.
    pub fn turn_off(&mut self) {
        self.motors.stop();
        self.direction.reset();
        if self.state != RobotState::Stopped {
            info!("robot off after {} cycles", self.cycles);
        }
        self.state = RobotState::Stopped;
    }

    /// Flip between on and off.
    pub fn toggle(&mut self) {
        if self.state == RobotState::Stopped {
            self.turn_on();
        } else {
            self.turn_off();
        }
    }

    // ── Cycle ─────────────────────────────────────────────────────────────

    /// Run the sensing → control → actuation sequence once, without sleeping.
    pub fn step(&mut self) -> CycleReport {
        if self.state == RobotState::Stopped {
            return CycleReport::stopped();
        }
        self.cycles += 1;

        self.sensors.update();
        let status = self.sensors.status();
        let position = self.sensors.position();
        let edges = self.sensors.edges();

        if status.needs_recovery() {
            if self.state != RobotState::Recovering {
                info!("line {:?} at cycle {}, recovering", status, self.cycles);
            }
            let control = self.controller.neutral();
            self.direction.observe_recovery(edges);
            let turn = self.direction.preferred();
            let command = self.mixer.pivot(turn);
            self.motors.apply(command);
            self.state = RobotState::Recovering;
            debug!("recovery pivot {:?}: {:?}", turn, command);
            return CycleReport {
                state: self.state,
                status: Some(status),
                position,
                control: Some(control),
                turn: Some(turn),
                restarted: false,
                command,
            };
        }

        let restarted = self.state == RobotState::Recovering;
        if restarted {
            self.motors.restart_pulse();
            info!("line reacquired at position {:.2}", position);
        }
        let control = self.controller.update(position);
        self.direction.observe_tracking(edges, control.error);
        let command = self.mixer.track(&control);
        self.motors.apply(command);
        self.state = RobotState::Tracking;
        trace!(
            "pos {:.3} err {:.3} d {:.1} out {:.2} → L {:.1} R {:.1}",
            position,
            control.error,
            control.derivative,
            control.output,
            command.left,
            command.right
        );

        CycleReport {
            state: self.state,
            status: Some(status),
            position,
            control: Some(control),
            turn: None,
            restarted,
            command,
        }
    }

    /// Poll the remote, step, then sleep out the rest of the period.
    pub fn run_cycle<C, P>(&mut self, clock: &mut C, remote: &mut P) -> CycleReport
    where
        C: Clock + ?Sized,
        P: PulseSource + ?Sized,
    {
        let start = clock.now_us();
        if self.toggle.poll(remote) {
            self.toggle();
        }
        let report = self.step();
        let elapsed = clock.now_us().saturating_sub(start);
        let sleep = period_sleep_us(self.period_us, elapsed);
        if sleep > 0 {
            clock.sleep_us(sleep);
        } else if elapsed > self.period_us {
            warn!("cycle overran: {} us of {} us", elapsed, self.period_us);
        }
        report
    }

    /// Cycle until `interrupted` returns `true`. The motors are stopped on
    /// return and while unwinding.
    pub fn run<C, P, F>(&mut self, clock: &mut C, remote: &mut P, mut interrupted: F)
    where
        C: Clock + ?Sized,
        P: PulseSource + ?Sized,
        F: FnMut() -> bool,
    {
        let mut guard = self.guard();
        while !interrupted() {
            guard.run_cycle(clock, remote);
        }
    }

    /// Borrow the tracker behind a guard that stops the motors when dropped.
    pub fn guard(&mut self) -> MotorGuard<'_, S, D, N> {
        MotorGuard { tracker: self }
    }

    /// Unconditional motor-stop cleanup.
    pub fn shutdown(&mut self) {
        self.turn_off();
        info!("motors stopped");
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    /// Current state.
    pub fn state(&self) -> RobotState {
        self.state
    }

    /// Cycles stepped while not stopped.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Control period in microseconds.
    pub fn period_us(&self) -> u64 {
        self.period_us
    }

    /// The sensor estimator.
    pub fn sensors(&self) -> &SensorArray<S, N> {
        &self.sensors
    }

    /// Exclusive access to the sensor estimator.
    pub fn sensors_mut(&mut self) -> &mut SensorArray<S, N> {
        &mut self.sensors
    }

    /// The feedback controller.
    pub fn controller(&self) -> &FeedbackController {
        &self.controller
    }

    /// The recovery direction memory.
    pub fn direction(&self) -> &DirectionMemory {
        &self.direction
    }

    /// Exclusive access to the direction memory, e.g. to switch policy.
    pub fn direction_mut(&mut self) -> &mut DirectionMemory {
        &mut self.direction
    }

    /// The motor wrapper.
    pub fn motors(&self) -> &Motors<D> {
        &self.motors
    }
}

/// Stops the motors when dropped. Dereferences to the tracker.
pub struct MotorGuard<'a, S: SensorSource, D: MotorDriver, const N: usize> {
    tracker: &'a mut LineTracker<S, D, N>,
}

impl<S: SensorSource, D: MotorDriver, const N: usize> Deref for MotorGuard<'_, S, D, N> {
    type Target = LineTracker<S, D, N>;

    fn deref(&self) -> &Self::Target {
        self.tracker
    }
}

impl<S: SensorSource, D: MotorDriver, const N: usize> DerefMut for MotorGuard<'_, S, D, N> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.tracker
    }
}

impl<S: SensorSource, D: MotorDriver, const N: usize> Drop for MotorGuard<'_, S, D, N> {
    fn drop(&mut self) {
        self.tracker.shutdown();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::MotorChannel;

    struct Frames {
        frame: [f32; 5],
        selected: usize,
    }

    impl SensorSource for Frames {
        fn select(&mut self, channel: u8) {
            self.selected = channel as usize;
        }
        fn read(&mut self) -> f32 {
            self.frame[self.selected]
        }
    }

    #[derive(Default)]
    struct Bridge {
        enabled: bool,
        enables: usize,
        disables: usize,
        duty: [u16; 4],
    }

    impl MotorDriver for Bridge {
        fn set_duty(&mut self, channel: MotorChannel, duty: u16) {
            self.duty[channel as usize] = duty;
        }
        fn enable(&mut self) {
            self.enabled = true;
            self.enables += 1;
        }
        fn disable(&mut self) {
            self.enabled = false;
            self.disables += 1;
        }
    }

    fn tracker(frame: [f32; 5]) -> LineTracker<Frames, Bridge, 5> {
        let cfg = TrackerConfig {
            smoothing: crate::config::SmoothingMode::Exponential,
            alpha: 0.5,
            ..TrackerConfig::centered::<5>()
        };
        let source = Frames { frame, selected: 0 };
        LineTracker::new(source, [0, 1, 2, 3, 4], Bridge::default(), &cfg).unwrap()
    }

    #[test]
    fn test_period_sleep() {
        assert_eq!(period_sleep_us(10_000, 2_500), 7_500);
        assert_eq!(period_sleep_us(10_000, 10_000), 0);
        assert_eq!(period_sleep_us(10_000, 14_000), 0);
    }

    #[test]
    fn test_period_from_dt() {
        let t = tracker([0.0; 5]);
        assert_eq!(t.period_us(), 10_000);
    }

    #[test]
    fn test_stopped_does_nothing() {
        let mut t = tracker([0.0, 0.0, 4.5, 0.0, 0.0]);
        let r = t.step();
        assert_eq!(r, CycleReport::stopped());
        assert_eq!(t.cycles(), 0);
        assert!(!t.motors().is_enabled());
    }

    #[test]
    fn test_turn_on_off_transitions() {
        let mut t = tracker([0.0, 0.0, 4.5, 0.0, 0.0]);
        t.turn_on();
        assert_eq!(t.state(), RobotState::Tracking);
        assert!(t.motors().driver().enabled);
        t.turn_on();
        assert_eq!(t.motors().driver().enables, 1, "turn_on is idempotent");

        t.toggle();
        assert_eq!(t.state(), RobotState::Stopped);
        assert!(!t.motors().driver().enabled);
        assert_eq!(t.motors().driver().duty, [0; 4]);
    }

    #[test]
    fn test_centered_line_drives_straight() {
        let mut t = tracker([0.0, 0.0, 4.5, 0.0, 0.0]);
        t.turn_on();
        let r = t.step();
        assert_eq!(r.state, RobotState::Tracking);
        assert_eq!(r.status, Some(LineStatus::Visible));
        assert!((r.position - 3.0).abs() < 1e-6);
        assert!((r.command.left - r.command.right).abs() < 1e-4);
        assert!(r.command.left > 0.0);
    }

    #[test]
    fn test_lost_line_pivots_and_neutralizes_controller() {
        let mut t = tracker([0.0; 5]);
        t.turn_on();
        let r = t.step();
        assert_eq!(r.state, RobotState::Recovering);
        assert_eq!(r.status, Some(LineStatus::Lost));
        assert_eq!(r.turn, Some(TurnDirection::Right));
        assert_eq!(r.command, MotorCommand { left: 15.0, right: -60.0 });
        assert_eq!(t.controller().prev_error(), 0.0);
    }

    #[test]
    fn test_reacquire_issues_restart_pulse() {
        let mut t = tracker([0.0; 5]);
        t.turn_on();
        t.step();
        let disables_before = t.motors().driver().disables;

        t.sensors_mut().source_mut().frame = [0.0, 0.0, 4.5, 0.0, 0.0];
        let r = t.step();
        assert_eq!(r.state, RobotState::Tracking);
        assert!(r.restarted);
        assert_eq!(t.motors().driver().disables, disables_before + 1);
        assert!(t.motors().driver().enabled);

        let r = t.step();
        assert!(!r.restarted, "pulse only on the first cycle after recovery");
    }

    #[test]
    fn test_guard_stops_motors_on_drop() {
        let mut t = tracker([0.0, 0.0, 4.5, 0.0, 0.0]);
        t.turn_on();
        {
            let mut g = t.guard();
            g.step();
            assert!(g.motors().driver().duty.iter().any(|&d| d > 0));
        }
        assert_eq!(t.state(), RobotState::Stopped);
        assert!(!t.motors().driver().enabled);
        assert_eq!(t.motors().driver().duty, [0; 4]);
    }
}
