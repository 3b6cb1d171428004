//! # Simulated line follower
//!
//! A five-sensor robot follows a drifting, curving line that has a gap in the
//! middle. A background listener delivers one long receiver pulse to switch
//! the robot on; the loop then runs at the configured 10 ms period until the
//! track ends. The robot pivots through the gap using its direction memory.
//!
//! ```text
//! cargo run --example line_follow --features std -- debug
//! ```
//!
//! The optional argument is the log level (`error` … `trace`, default `info`).

use std::str::FromStr;
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use linetrack_core::runtime::{
    spawn_pulse_listener, InterruptFlag, PulseReader, SharedPulse, StdClock,
};
use linetrack_core::sensors::adc_to_volts;
use linetrack_core::{
    LineTracker, MotorChannel, MotorCommand, MotorDriver, RobotState, SensorSource, TrackerConfig,
};
use log::{info, LevelFilter, Metadata, Record, SetLoggerError};

// ── Logger ───────────────────────────────────────────────────────────────────

struct ConsoleLogger {
    origin: Instant,
}

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let t = self.origin.elapsed();
            eprintln!(
                "{:<5} [{:>4}.{:03}s] {} - {}",
                record.level(),
                t.as_secs(),
                t.subsec_millis(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

static LOGGER: OnceLock<ConsoleLogger> = OnceLock::new();

fn init_logger(level: LevelFilter) -> Result<(), SetLoggerError> {
    let logger = LOGGER.get_or_init(|| ConsoleLogger { origin: Instant::now() });
    log::set_logger(logger).map(|()| log::set_max_level(level))
}

// ── Track ────────────────────────────────────────────────────────────────────

const SENSORS: usize = 5;
/// Multiplexer channel of each position, left to right.
const CHANNELS: [u8; SENSORS] = [5, 4, 2, 3, 1];
const TRACK_CYCLES: u32 = 600;
const GAP: core::ops::Range<u32> = 260..290;

/// Robot pose relative to the line, plus the analog front end it implies.
struct Track {
    /// Line position under the array, in sensor units (1 = leftmost).
    line: f32,
    cycle: u32,
    selected: u8,
}

impl Track {
    fn new() -> Self {
        Self { line: 3.0, cycle: 0, selected: 0 }
    }

    /// Reflectance of the sensor at `position`, as a 16-bit ADC count.
    fn sample(&self, position: f32) -> u16 {
        let floor = 0.15;
        if GAP.contains(&self.cycle) {
            return (floor / 5.0 * 65535.0) as u16;
        }
        let coverage = (1.0 - (position - self.line).abs() / 1.3).max(0.0);
        let volts = floor + coverage * 4.6;
        (volts.min(5.0) / 5.0 * 65535.0) as u16
    }

    /// Advance one period: the track curves, the wheels steer back.
    fn advance(&mut self, command: MotorCommand, dt: f32) {
        let t = self.cycle as f32 * dt;
        let curvature = 1.6 * (t * 0.9).sin();
        // Left faster than right yaws right, sliding the line left under the array.
        let yaw = (command.left - command.right) / 100.0 * 3.0;
        self.line += (curvature - yaw) * dt;
        self.line = self.line.clamp(-1.0, SENSORS as f32 + 2.0);
        self.cycle += 1;
    }
}

impl SensorSource for Track {
    fn select(&mut self, channel: u8) {
        self.selected = channel;
    }

    fn read(&mut self) -> f32 {
        let position = CHANNELS
            .iter()
            .position(|&c| c == self.selected)
            .map_or(0.0, |i| (i + 1) as f32);
        adc_to_volts(self.sample(position))
    }
}

// ── Peripherals ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct ConsoleBridge {
    duty: [u16; 4],
    enabled: bool,
}

impl MotorDriver for ConsoleBridge {
    fn set_duty(&mut self, channel: MotorChannel, duty: u16) {
        self.duty[channel as usize] = duty;
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }
}

/// Receiver that produces a single "on" pulse shortly after start.
struct OneShotRemote {
    sent: bool,
}

impl PulseReader for OneShotRemote {
    fn wait_pulse(&mut self) -> Option<u32> {
        if self.sent {
            return None;
        }
        thread::sleep(Duration::from_millis(30));
        self.sent = true;
        Some(1900)
    }
}

fn main() {
    let level = std::env::args()
        .nth(1)
        .and_then(|arg| LevelFilter::from_str(&arg).ok())
        .unwrap_or(LevelFilter::Info);
    if let Err(e) = init_logger(level) {
        eprintln!("logger already installed: {e}");
    }

    let config = TrackerConfig::centered::<SENSORS>();
    let built = LineTracker::new(Track::new(), CHANNELS, ConsoleBridge::default(), &config);
    let mut tracker = match built {
        Ok(t) => t,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let pulses = SharedPulse::new();
    let listener = spawn_pulse_listener(OneShotRemote { sent: false }, pulses.clone());
    let stop = InterruptFlag::new();
    let mut clock = StdClock::new();
    let mut remote = pulses.clone();

    let mut recoveries = 0u32;
    let mut max_error = 0.0f32;
    {
        let mut running = tracker.guard();
        while !stop.is_set() {
            let report = running.run_cycle(&mut clock, &mut remote);
            if report.state == RobotState::Stopped {
                continue;
            }
            if report.restarted {
                recoveries += 1;
            }
            if let Some(control) = report.control {
                max_error = max_error.max(control.error.abs());
            }
            let track = running.sensors_mut().source_mut();
            track.advance(report.command, config.dt);
            if track.cycle >= TRACK_CYCLES {
                stop.set();
            }
        }
    }

    if listener.join().is_err() {
        eprintln!("pulse listener panicked");
    }
    info!(
        "track finished: {} cycles, {} recoveries, worst error {:.2}, motors enabled: {}",
        tracker.cycles(),
        recoveries,
        max_error,
        tracker.motors().driver().enabled
    );
}
