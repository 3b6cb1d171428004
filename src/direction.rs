/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Edge-hysteresis direction memory for lost-line recovery.
//!
//! When the centroid is unusable the robot still has to pick a side to pivot
//! toward. A single sample is too noisy for that, so the choice comes from
//! recent history. Three interchangeable strategies implement
//! [`DirectionHint`]:
//!
//! | Strategy | Signal | Favors |
//! |----------|--------|--------|
//! | [`LastSeen`] | cycles since each outermost sensor saturated | the smaller count |
//! | [`EdgeAverage`] | rolling average of each outermost sensor | the higher average |
//! | [`ErrorSign`] | rolling average of ±1 per error sign | the sign of the average |
//!
//! [`DirectionMemory`] feeds all three every cycle and answers the query with
//! the one selected by [`DirectionPolicy`], so the policy can change at
//! runtime without losing history.
//!
//! Ties keep the previously decided direction. The initial direction is
//! [`TurnDirection::Right`].

use crate::config::{ConfigError, DirectionPolicy, TrackerConfig};
use crate::rolling::RollingBuffer;
use crate::sensors::EdgeSample;

/// Recovery pivot direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TurnDirection {
    /// Toward sensor position 1.
    Left,
    /// Toward sensor position N.
    Right,
}

impl TurnDirection {
    /// −1.0 for left, +1.0 for right.
    pub fn sign(self) -> f32 {
        match self {
            TurnDirection::Left => -1.0,
            TurnDirection::Right => 1.0,
        }
    }

    /// Direction of a signed quantity; `None` for zero.
    fn from_sign(x: f32) -> Option<Self> {
        if x > 0.0 {
            Some(TurnDirection::Right)
        } else if x < 0.0 {
            Some(TurnDirection::Left)
        } else {
            None
        }
    }
}

/// A "which way to turn on loss" capability.
pub trait DirectionHint {
    /// Record a normal-tracking cycle.
    ///
    /// - `edges`: truncated outermost voltages this cycle.
    /// - `error`: controller error, `setpoint − position`.
    fn observe_tracking(&mut self, edges: EdgeSample, error: f32);

    /// Record a recovery cycle (no usable position).
    fn observe_recovery(&mut self, edges: EdgeSample);

    /// Direction to pivot toward right now.
    fn preferred(&mut self) -> TurnDirection;

    /// Forget all history.
    fn reset(&mut self);
}

/// Age of one side after a cycle: reset when seen, otherwise one older.
fn age_after(age: u32, seen: bool) -> u32 {
    if seen {
        0
    } else {
        age.saturating_add(1)
    }
}

// ─── LastSeen ────────────────────────────────────────────────────────────────

/// Counts cycles since each outermost sensor last reached the saturation level.
#[derive(Clone, Debug)]
pub struct LastSeen {
    seen_level: f32,
    left_age: u32,
    right_age: u32,
    last: TurnDirection,
}

impl LastSeen {
    /// A side counts as seen when its truncated voltage reaches `seen_level`.
    pub fn new(seen_level: f32) -> Self {
        Self {
            seen_level,
            left_age: u32::MAX,
            right_age: u32::MAX,
            last: TurnDirection::Right,
        }
    }

    fn observe(&mut self, edges: EdgeSample) {
        self.left_age = age_after(self.left_age, edges.left >= self.seen_level);
        self.right_age = age_after(self.right_age, edges.right >= self.seen_level);
    }

    /// Cycles since the left / right edge was last seen.
    pub fn ages(&self) -> (u32, u32) {
        (self.left_age, self.right_age)
    }
}

impl DirectionHint for LastSeen {
    fn observe_tracking(&mut self, edges: EdgeSample, _error: f32) {
        self.observe(edges);
    }

    fn observe_recovery(&mut self, edges: EdgeSample) {
        self.observe(edges);
    }

    fn preferred(&mut self) -> TurnDirection {
        if self.left_age < self.right_age {
            self.last = TurnDirection::Left;
        } else if self.right_age < self.left_age {
            self.last = TurnDirection::Right;
        }
        self.last
    }

    fn reset(&mut self) {
        *self = Self::new(self.seen_level);
    }
}

// ─── EdgeAverage ─────────────────────────────────────────────────────────────

/// Rolling average of each outermost sensor over normal-tracking cycles.
#[derive(Clone, Debug)]
pub struct EdgeAverage {
    left: RollingBuffer,
    right: RollingBuffer,
    last: TurnDirection,
}

impl EdgeAverage {
    /// Two buffers of `capacity` samples each.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            left: RollingBuffer::new(capacity)?,
            right: RollingBuffer::new(capacity)?,
            last: TurnDirection::Right,
        })
    }

    /// Current left / right averages.
    pub fn averages(&self) -> (f32, f32) {
        (self.left.average(), self.right.average())
    }
}

impl DirectionHint for EdgeAverage {
    fn observe_tracking(&mut self, edges: EdgeSample, _error: f32) {
        self.left.append(edges.left.max(0.0));
        self.right.append(edges.right.max(0.0));
    }

    fn observe_recovery(&mut self, _edges: EdgeSample) {}

    fn preferred(&mut self) -> TurnDirection {
        let (left, right) = self.averages();
        if let Some(d) = TurnDirection::from_sign(right - left) {
            self.last = d;
        }
        self.last
    }

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
        self.last = TurnDirection::Right;
    }
}

// ─── ErrorSign ───────────────────────────────────────────────────────────────

/// Rolling average of +1 (line right of setpoint), −1 (left), 0 (recovering).
#[derive(Clone, Debug)]
pub struct ErrorSign {
    signs: RollingBuffer,
    last: TurnDirection,
}

impl ErrorSign {
    /// One buffer of `capacity` samples.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        Ok(Self { signs: RollingBuffer::new(capacity)?, last: TurnDirection::Right })
    }

    /// Average of the recorded signs.
    pub fn average(&self) -> f32 {
        self.signs.average()
    }
}

impl DirectionHint for ErrorSign {
    fn observe_tracking(&mut self, _edges: EdgeSample, error: f32) {
        // error = setpoint − position: negative means the line sits to the right.
        let sign = TurnDirection::from_sign(-error).map_or(0.0, TurnDirection::sign);
        self.signs.append(sign);
    }

    fn observe_recovery(&mut self, _edges: EdgeSample) {
        self.signs.append(0.0);
    }

    fn preferred(&mut self) -> TurnDirection {
        if let Some(d) = TurnDirection::from_sign(self.signs.average()) {
            self.last = d;
        }
        self.last
    }

    fn reset(&mut self) {
        self.signs.reset();
        self.last = TurnDirection::Right;
    }
}

// ─── DirectionMemory ─────────────────────────────────────────────────────────

/// All three strategies, fed together, queried through the selected policy.
#[derive(Clone, Debug)]
pub struct DirectionMemory {
    policy: DirectionPolicy,
    last_seen: LastSeen,
    edges: EdgeAverage,
    error_sign: ErrorSign,
}

impl DirectionMemory {
    /// Build from the tracker configuration.
    ///
    /// `LastSeen` treats a side as seen at full truncated scale, i.e. when the
    /// raw voltage reaches `threshold_max`.
    pub fn from_config(config: &TrackerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            policy: config.direction_policy,
            last_seen: LastSeen::new(config.output_range),
            edges: EdgeAverage::new(config.direction_memory_length)?,
            error_sign: ErrorSign::new(config.direction_memory_length)?,
        })
    }

    /// Policy answering [`preferred`](DirectionHint::preferred).
    pub fn policy(&self) -> DirectionPolicy {
        self.policy
    }

    /// Switch policy; history is kept.
    pub fn set_policy(&mut self, policy: DirectionPolicy) {
        self.policy = policy;
    }

    /// The last-seen strategy.
    pub fn last_seen(&self) -> &LastSeen {
        &self.last_seen
    }

    /// The rolling edge-average strategy.
    pub fn edge_average(&self) -> &EdgeAverage {
        &self.edges
    }

    /// The error-sign strategy.
    pub fn error_sign(&self) -> &ErrorSign {
        &self.error_sign
    }

    fn selected(&mut self) -> &mut dyn DirectionHint {
        match self.policy {
            DirectionPolicy::LastSeen => &mut self.last_seen,
            DirectionPolicy::RollingAverage => &mut self.edges,
            DirectionPolicy::ErrorSign => &mut self.error_sign,
        }
    }
}

impl DirectionHint for DirectionMemory {
    fn observe_tracking(&mut self, edges: EdgeSample, error: f32) {
        self.last_seen.observe_tracking(edges, error);
        self.edges.observe_tracking(edges, error);
        self.error_sign.observe_tracking(edges, error);
    }

    fn observe_recovery(&mut self, edges: EdgeSample) {
        self.last_seen.observe_recovery(edges);
        self.edges.observe_recovery(edges);
        self.error_sign.observe_recovery(edges);
    }

    fn preferred(&mut self) -> TurnDirection {
        self.selected().preferred()
    }

    fn reset(&mut self) {
        self.last_seen.reset();
        self.edges.reset();
        self.error_sign.reset();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
