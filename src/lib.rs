//! # linetrack-core
//!
//! Closed-loop steering for line-following robots with a linear array of
//! reflectance sensors.
//!
//! ---
//!
//! ## The loop
//!
//! Every control period (nominally 10 ms) the robot estimates where the line
//! sits under the array, computes a steering correction, and maps it onto the
//! two wheels. When the array cannot see the line, or sees it under every
//! sensor at once, the position is meaningless. The robot then pivots toward
//! the side its recent history favors until the line comes back.
//!
//! ```text
//! raw reads ─► SensorArray ─► status? ──Visible──► FeedbackController ─► Mixer::track ─┐
//!              truncate,                                                               ├─► Motors
//!              smooth,        Lost/Saturated ──► DirectionMemory ──► Mixer::pivot ─────┘
//!              centroid                                                   │
//!                                                               period-aligned sleep
//! ```
//!
//! ## Module overview
//!
//! | Module | Key types | What it does |
//! |--------|-----------|--------------|
//! | [`config`] | [`TrackerConfig`], [`ConfigError`] | Named parameters, validated at construction |
//! | [`rolling`] | [`RollingBuffer`] | O(1) fixed-capacity rolling mean |
//! | [`sensors`] | [`SensorArray`], [`SensorSource`] | Truncation, smoothing, weighted centroid, loss detection |
//! | [`controller`] | [`FeedbackController`] | PD / PID steering correction |
//! | [`direction`] | [`DirectionMemory`], [`DirectionHint`] | Which way to pivot when the line is lost |
//! | [`mixer`] | [`Mixer`], [`Motors`], [`MotorDriver`] | Governed differential drive, pivots, H-bridge duty |
//! | [`remote`] | [`PulseToggle`], [`PulseSource`] | Receiver pulse → on/off toggle |
//! | [`tracker`] | [`LineTracker`], [`Clock`] | The fixed-period state machine |
//! | `runtime` | `SharedPulse`, `StdClock` | Host threads and clock (requires `std`) |
//!
//! ## Peripherals
//!
//! The crate never touches hardware. Implement [`SensorSource`] (multiplexer
//! select + ADC read), [`MotorDriver`] (PWM duty + enable lines) and [`Clock`]
//! for your board and hand them to [`LineTracker::new`].
//!
//! ## `no_std`
//!
//! This crate is `#![no_std]` by default with no heap required; fixed-capacity
//! storage comes from `heapless`. Enable the `std` feature for the host runtime
//! (background pulse listener, wall clock). Enable the `serde` feature to
//! serialise configuration and per-cycle [`CycleReport`]s.
//!
//! ## License
//!
//! Business Source License 1.1.

#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "std")]
extern crate std;

pub mod config;
pub mod controller;
pub mod direction;
pub mod mixer;
pub mod remote;
pub mod rolling;
pub mod sensors;
pub mod tracker;

/// Host runtime: pulse listener thread, shared pulse cell, wall clock.
///
/// Enabled by `features = ["std"]`.
#[cfg(feature = "std")]
pub mod runtime;

pub use config::{ConfigError, DirectionPolicy, SmoothingMode, TrackerConfig};
pub use controller::{ControlOutput, FeedbackController};
pub use direction::{DirectionHint, DirectionMemory, TurnDirection};
pub use mixer::{Mixer, MotorChannel, MotorCommand, MotorDriver, Motors};
pub use remote::{PulseSource, PulseToggle};
pub use rolling::RollingBuffer;
pub use sensors::{LineStatus, SensorArray, SensorSource};
pub use tracker::{Clock, CycleReport, LineTracker, RobotState};
