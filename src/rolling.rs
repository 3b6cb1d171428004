/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Fixed-capacity rolling average.
//!
//! [`RollingBuffer`] keeps the last `capacity` appended scalars in ring order
//! and a running sum, so both [`append`](RollingBuffer::append) and
//! [`average`](RollingBuffer::average) are O(1).
//!
//! # Invariants
//!
//! - `sum` equals the sum of the currently valid slots. An overwrite subtracts
//!   the evicted value before adding the new one.
//! - `count` saturates at `capacity`; `average()` is `sum / count`, or 0.0 when
//!   nothing has been appended.
//! - Storage is statically bounded by [`MAX_ROLLING_CAPACITY`]; no heap.

use heapless::Vec as HVec;

use crate::config::{check_capacity, ConfigError};

/// Largest capacity a [`RollingBuffer`] can be constructed with.
pub const MAX_ROLLING_CAPACITY: usize = 64;

/// Circular accumulator producing the mean of the most recent values.
#[derive(Clone, Debug)]
pub struct RollingBuffer {
    /// Slot storage, pre-filled with zeros up to `capacity`.
    slots: HVec<f32, MAX_ROLLING_CAPACITY>,
    /// Next slot to overwrite.
    index: usize,
    /// Number of valid slots, saturating at `capacity`.
    count: usize,
    /// Running sum of the valid slots.
    sum: f32,
}

impl RollingBuffer {
    /// Construct an empty buffer holding at most `capacity` values.
    ///
    /// Fails with [`ConfigError::ZeroCapacity`] or
    /// [`ConfigError::CapacityTooLarge`] outside `1..=MAX_ROLLING_CAPACITY`.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        check_capacity(capacity, MAX_ROLLING_CAPACITY)?;
        let mut slots = HVec::new();
        // Cannot overflow: capacity was checked against the storage bound.
        slots.resize(capacity, 0.0).map_err(|_| ConfigError::CapacityTooLarge {
            requested: capacity,
            max: MAX_ROLLING_CAPACITY,
        })?;
        Ok(Self { slots, index: 0, count: 0, sum: 0.0 })
    }

    /// Append a value, evicting the oldest one once the buffer is full.
    pub fn append(&mut self, value: f32) {
        let evicted = self.slots[self.index];
        self.sum -= evicted;
        self.slots[self.index] = value;
        self.sum += value;
        self.index = (self.index + 1) % self.slots.len();
        if self.count < self.slots.len() {
            self.count += 1;
        }
    }

    /// Mean of the valid slots, or 0.0 when empty.
    pub fn average(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f32
    }

    /// Running sum of the valid slots.
    pub fn sum(&self) -> f32 {
        self.sum
    }

    /// Number of valid slots.
    pub fn len(&self) -> usize {
        self.count
    }

    /// `true` before the first append (or after [`reset`](Self::reset)).
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Return to the freshly constructed state without reallocating.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = 0.0;
        }
        self.index = 0;
        self.count = 0;
        self.sum = 0.0;
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
