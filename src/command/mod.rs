//! Command actuation for the vehicle
//!
//! This module handles:
//! - Issuing discrete actions (take off, land, flip, ...)
//! - Holding axis moves for their duration and resetting them to neutral
//! - Superseding a pending reset when a newer move hits the same axis

mod scheduler;

pub use scheduler::{timer_channel_sink, ActuationScheduler, AxisExpiry};
