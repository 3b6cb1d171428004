//! Remote on/off toggle from a pulse-width receiver.
//!
//! A background task measures receiver pulses and publishes them; the control
//! loop polls once per cycle without blocking (see [`PulseSource`]). A pulse
//! longer than the configured threshold toggles the robot. Only the rising
//! crossing counts, so a held switch toggles once instead of every cycle.

/// Non-blocking view of the most recent receiver pulse.
pub trait PulseSource {
    /// Take the pulse published since the last poll, in microseconds.
    /// Returns `None` when nothing new arrived or the cell is busy.
    fn poll(&mut self) -> Option<u32>;
}

/// A source that never produces a pulse, for robots without a receiver.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRemote;

impl PulseSource for NoRemote {
    fn poll(&mut self) -> Option<u32> {
        None
    }
}

/// Edge detector over pulse lengths.
#[derive(Clone, Copy, Debug)]
pub struct PulseToggle {
    threshold_us: u32,
    above: bool,
}

impl PulseToggle {
    /// Toggle when a pulse exceeds `threshold_us`.
    pub fn new(threshold_us: u32) -> Self {
        Self { threshold_us, above: false }
    }

    /// Feed one pulse; returns `true` on a rising crossing of the threshold.
    pub fn feed(&mut self, pulse_us: u32) -> bool {
        let above = pulse_us > self.threshold_us;
        let toggled = above && !self.above;
        self.above = above;
        toggled
    }

    /// Poll `source` and feed whatever arrived.
    pub fn poll<P: PulseSource + ?Sized>(&mut self, source: &mut P) -> bool {
        match source.poll() {
            Some(pulse) => self.feed(pulse),
            None => false,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
