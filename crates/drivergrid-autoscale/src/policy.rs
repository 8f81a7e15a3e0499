//! Scaling policies.
//!
//! Every policy is a function of `(total, load) -> target`. Only
//! `MovingAverage` keeps state between calls, and the pool's control loop is
//! the only caller, so `scale` takes `&mut self` without any locking.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::debug;

use drivergrid_core::PoolConfig;

/// Errors raised when a policy is constructed with unusable parameters.
#[derive(Debug, Error, PartialEq)]
pub enum ScalingError {
    #[error("invalid bounds: min {min} exceeds max {max}")]
    InvalidBounds { min: usize, max: usize },

    #[error("moving average window must be at least 1")]
    InvalidWindow,

    #[error("decay factor must be in (0, 1), got {0}")]
    InvalidDecay(f64),
}

/// Maps the current instance count and a demand signal to a target count.
///
/// `load` is positive when demand exceeds supply, negative when instances sit
/// idle, and zero at steady state.
pub trait ScalingPolicy: Send {
    fn scale(&mut self, total: usize, load: i64) -> usize;
}

impl<P: ScalingPolicy + ?Sized> ScalingPolicy for Box<P> {
    fn scale(&mut self, total: usize, load: i64) -> usize {
        (**self).scale(total, load)
    }
}

/// A step the control loop takes to move from the current count to a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Create this many instances.
    Grow(usize),
    /// Retire this many idle instances.
    Shrink(usize),
    /// Already at target.
    NoChange,
}

impl ScaleDecision {
    pub fn between(current: usize, target: usize) -> Self {
        if target > current {
            ScaleDecision::Grow(target - current)
        } else if target < current {
            ScaleDecision::Shrink(current - target)
        } else {
            ScaleDecision::NoChange
        }
    }
}

/// Clamps the inner policy's target into `[min, max]`.
#[derive(Debug)]
pub struct MinMax<P> {
    min: usize,
    max: usize,
    inner: P,
}

impl<P: ScalingPolicy> MinMax<P> {
    pub fn new(min: usize, max: usize, inner: P) -> Result<Self, ScalingError> {
        if min > max {
            return Err(ScalingError::InvalidBounds { min, max });
        }
        Ok(Self { min, max, inner })
    }

    pub fn bounds(&self) -> (usize, usize) {
        (self.min, self.max)
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut P {
        &mut self.inner
    }
}

impl<P: ScalingPolicy> ScalingPolicy for MinMax<P> {
    fn scale(&mut self, total: usize, load: i64) -> usize {
        let target = self.inner.scale(total, load);
        let clamped = target.clamp(self.min, self.max);
        if clamped != target {
            debug!(target, clamped, min = self.min, max = self.max, "clamped scaling target");
        }
        clamped
    }
}

/// Replaces `load` with the mean of the last `window` observed loads.
#[derive(Debug)]
pub struct MovingAverage<P> {
    window: usize,
    samples: VecDeque<i64>,
    sum: i64,
    inner: P,
}

impl<P: ScalingPolicy> MovingAverage<P> {
    pub fn new(window: usize, inner: P) -> Result<Self, ScalingError> {
        if window == 0 {
            return Err(ScalingError::InvalidWindow);
        }
        Ok(Self {
            window,
            samples: VecDeque::with_capacity(window),
            sum: 0,
            inner,
        })
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut P {
        &mut self.inner
    }

    /// Mean of the samples currently buffered, truncated toward zero.
    fn record(&mut self, load: i64) -> i64 {
        if self.samples.len() == self.window
            && let Some(oldest) = self.samples.pop_front()
        {
            self.sum -= oldest;
        }
        self.samples.push_back(load);
        self.sum += load;
        self.sum / self.samples.len() as i64
    }
}

impl<P: ScalingPolicy> ScalingPolicy for MovingAverage<P> {
    fn scale(&mut self, total: usize, load: i64) -> usize {
        let averaged = self.record(load);
        self.inner.scale(total, averaged)
    }
}

/// Additive-increase / multiplicative-decrease terminal policy.
#[derive(Debug, Clone)]
pub struct Aimd {
    increment: usize,
    decay: f64,
}

impl Aimd {
    pub fn new(increment: usize, decay: f64) -> Result<Self, ScalingError> {
        if !(decay > 0.0 && decay < 1.0) {
            return Err(ScalingError::InvalidDecay(decay));
        }
        Ok(Self { increment, decay })
    }
}

impl ScalingPolicy for Aimd {
    fn scale(&mut self, total: usize, load: i64) -> usize {
        match load {
            l if l > 0 => total.saturating_add(self.increment),
            l if l < 0 => (total as f64 * self.decay).floor() as usize,
            _ => total,
        }
    }
}

/// `MinMax(min, max, MovingAverage(window, Aimd(increment, decay)))` from a
/// pool config.
pub fn default_policy(config: &PoolConfig) -> Result<Box<dyn ScalingPolicy>, ScalingError> {
    let aimd = Aimd::new(config.scaling.increment, config.scaling.decay)?;
    let smoothed = MovingAverage::new(config.scaling.window, aimd)?;
    let bounded = MinMax::new(config.min_instances, config.max_instances, smoothed)?;
    Ok(Box::new(bounded))
}
