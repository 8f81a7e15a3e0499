//! drivergrid-autoscale: composable scaling policies.
//!
//! A policy maps the current instance count and a demand signal to a
//! target instance count. Policies compose by wrapping: decorators hold an
//! inner policy and adjust either its input or its output.
//!
//! # Default Composition
//!
//! ```text
//! MinMax(min, max)              clamp target into [min, max]
//!   └── MovingAverage(window)   load := mean(last `window` loads)
//!         └── Aimd(inc, decay)  load > 0: total + inc
//!                               load < 0: floor(total * decay)
//!                               load = 0: total
//! ```
//!
//! `ScaleDecision` turns a target into the grow/shrink step the pool's
//! control loop performs.

pub mod policy;

pub use policy::{
    Aimd, MinMax, MovingAverage, ScaleDecision, ScalingError, ScalingPolicy, default_policy,
};
