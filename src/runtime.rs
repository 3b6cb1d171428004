//! Host runtime: the background pulse listener and a wall clock.
//!
//! Requires the `std` feature.
//!
//! The only data shared between the two tasks is the latest pulse length. It
//! sits in a [`SharedPulse`] cell: the listener thread blocks on the receiver
//! and publishes under the lock; the control loop makes one `try_lock` per
//! cycle and moves on if the listener holds it.
//!
//! ```rust,ignore
//! use linetrack_core::runtime::{spawn_pulse_listener, InterruptFlag, SharedPulse, StdClock};
//!
//! let cell = SharedPulse::new();
//! let _listener = spawn_pulse_listener(receiver, cell.clone());
//! let stop = InterruptFlag::new();
//! tracker.run(&mut StdClock::new(), &mut cell.clone(), || stop.is_set());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::remote::PulseSource;
use crate::tracker::Clock;

/// Blocking pulse-width measurement.
pub trait PulseReader {
    /// Block until the next pulse and return its length in microseconds.
    /// `None` means the receiver is gone and the listener should exit.
    fn wait_pulse(&mut self) -> Option<u32>;
}

/// Single-slot cell holding the most recent unread pulse.
#[derive(Clone, Debug, Default)]
pub struct SharedPulse {
    slot: Arc<Mutex<Option<u32>>>,
}

impl SharedPulse {
    /// Empty cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer side: overwrite the slot with a new pulse. Blocks on the lock.
    pub fn publish(&self, pulse_us: u32) {
        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(pulse_us);
    }

    /// Consumer side: take the pending pulse without ever blocking.
    pub fn try_take(&self) -> Option<u32> {
        match self.slot.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(TryLockError::WouldBlock) => {
                warn!("pulse cell busy, skipping this cycle");
                None
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().take(),
        }
    }
}

impl PulseSource for SharedPulse {
    fn poll(&mut self) -> Option<u32> {
        self.try_take()
    }
}

/// Spawn the background task that publishes every measured pulse into `cell`.
pub fn spawn_pulse_listener<R>(mut reader: R, cell: SharedPulse) -> JoinHandle<()>
where
    R: PulseReader + Send + 'static,
{
    thread::spawn(move || {
        info!("pulse listener started");
        while let Some(pulse) = reader.wait_pulse() {
            cell.publish(pulse);
        }
        warn!("pulse receiver closed, listener exiting");
    })
}

/// Wall clock backed by [`Instant`] and [`thread::sleep`].
#[derive(Clone, Copy, Debug)]
pub struct StdClock {
    origin: Instant,
}

impl StdClock {
    /// Clock whose origin is now.
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn sleep_us(&mut self, us: u64) {
        thread::sleep(Duration::from_micros(us));
    }
}

/// Operator stop request, settable from a signal handler or another thread.
#[derive(Clone, Debug, Default)]
pub struct InterruptFlag {
    flag: Arc<AtomicBool>,
}

impl InterruptFlag {
    /// Unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the loop to stop.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::{String, ToString};
    use std::sync::{mpsc, OnceLock};
    use std::vec::Vec;

    use log::{Level, LevelFilter, Metadata, Record};

    /// Records every message so tests can assert on levels.
    struct Capture(Mutex<Vec<(Level, String)>>);

    impl log::Log for Capture {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            if let Ok(mut lines) = self.0.lock() {
                lines.push((record.level(), record.args().to_string()));
            }
        }

        fn flush(&self) {}
    }

    static CAPTURE: OnceLock<Capture> = OnceLock::new();

    fn capture() -> &'static Capture {
        let c = CAPTURE.get_or_init(|| Capture(Mutex::new(Vec::new())));
        if log::set_logger(c).is_ok() {
            log::set_max_level(LevelFilter::Trace);
        }
        c
    }

    struct ChannelReader(mpsc::Receiver<u32>);

    impl PulseReader for ChannelReader {
        fn wait_pulse(&mut self) -> Option<u32> {
            self.0.recv().ok()
        }
    }

    #[test]
    fn test_take_drains_cell() {
        let cell = SharedPulse::new();
        assert_eq!(cell.try_take(), None);
        cell.publish(1800);
        cell.publish(1900);
        assert_eq!(cell.try_take(), Some(1900), "latest pulse wins");
        assert_eq!(cell.try_take(), None);
    }

    #[test]
    fn test_try_take_never_blocks_on_held_lock() {
        let cell = SharedPulse::new();
        cell.publish(2000);
        let held = cell.slot.lock().unwrap();
        assert_eq!(cell.try_take(), None);
        drop(held);
        assert_eq!(cell.try_take(), Some(2000));
    }

    #[test]
    fn test_contention_is_logged_as_warning() {
        let log = capture();
        let cell = SharedPulse::new();
        let held = cell.slot.lock().unwrap();
        assert_eq!(cell.try_take(), None);
        drop(held);

        let lines = log.0.lock().unwrap();
        let busy: Vec<_> =
            lines.iter().filter(|(_, msg)| msg.contains("pulse cell busy")).collect();
        assert!(!busy.is_empty());
        assert!(busy.iter().all(|(level, _)| *level == Level::Warn));
    }

    #[test]
    fn test_listener_publishes_until_closed() {
        let (tx, rx) = mpsc::channel();
        let cell = SharedPulse::new();
        let handle = spawn_pulse_listener(ChannelReader(rx), cell.clone());
        tx.send(1200).unwrap();
        tx.send(1700).unwrap();
        drop(tx);
        handle.join().unwrap();
        assert_eq!(cell.try_take(), Some(1700));
    }

    #[test]
    fn test_interrupt_flag_shared_across_clones() {
        let flag = InterruptFlag::new();
        let other = flag.clone();
        assert!(!flag.is_set());
        other.set();
        assert!(flag.is_set());
    }

    #[test]
    fn test_std_clock_is_monotonic() {
        let mut clock = StdClock::new();
        let samples: Vec<u64> = (0..3)
            .map(|_| {
                clock.sleep_us(200);
                clock.now_us()
            })
            .collect();
        assert!(samples.windows(2).all(|w| w[1] >= w[0]));
        assert!(samples[2] >= 600);
    }
}
