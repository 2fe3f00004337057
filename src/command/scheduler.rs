//! Actuation scheduler - turns decoded commands into timed vehicle actuation

use crate::vehicle::{FlyingState, Vehicle};
use pilot_shared::{Axis, Command, CommandKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

/// Expiry notice posted by an axis timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisExpiry {
    pub axis: Axis,
    /// Identifies the timer that fired
    pub generation: u64,
}

/// Receiver for timer expiries; must only enqueue
pub type TimerSink = Arc<dyn Fn(AxisExpiry) + Send + Sync>;

/// Build a timer sink that forwards into an unbounded channel
pub fn timer_channel_sink<E>(tx: mpsc::UnboundedSender<E>) -> TimerSink
where
    E: From<AxisExpiry> + Send + 'static,
{
    Arc::new(move |expiry| {
        let _ = tx.send(E::from(expiry));
    })
}

/// Live reset timer for one axis
#[derive(Debug)]
struct ActuationTimer {
    expires_at: Instant,
    generation: u64,
    handle: JoinHandle<()>,
}

/// Applies commands to the vehicle and returns moved axes to neutral
///
/// At most one timer is live per axis. Every axis holding a non-neutral value
/// has a live timer, and only the live timer's expiry resets it.
pub struct ActuationScheduler<V: Vehicle> {
    vehicle: V,
    timers: HashMap<Axis, ActuationTimer>,
    sink: TimerSink,
    next_generation: u64,
}

impl<V: Vehicle> ActuationScheduler<V> {
    pub fn new(vehicle: V, sink: TimerSink) -> Self {
        Self {
            vehicle,
            timers: HashMap::new(),
            sink,
            next_generation: 0,
        }
    }

    /// Axes currently held away from neutral, with their reset deadlines
    pub fn live_timers(&self) -> Vec<(Axis, Instant)> {
        Axis::ALL
            .iter()
            .filter_map(|axis| self.timers.get(axis).map(|t| (*axis, t.expires_at)))
            .collect()
    }

    /// Apply a recognized command
    pub fn apply(&mut self, command: &Command) {
        match command.kind {
            CommandKind::TakeOff => {
                info!("[ACTUATION] Take off");
                self.vehicle.take_off();
            }
            CommandKind::Land => {
                info!("[ACTUATION] Land");
                self.vehicle.land();
            }
            CommandKind::Emergency => {
                info!("[ACTUATION] Emergency");
                self.vehicle.emergency();
            }
            CommandKind::Flip => {
                info!("[ACTUATION] Flip");
                self.vehicle.flip();
            }
            CommandKind::Picture => {
                info!("[ACTUATION] Take picture");
                self.vehicle.take_picture();
            }
            CommandKind::AxisMove { axis, magnitude } => {
                self.move_axis(axis, magnitude, command.duration);
            }
        }
    }

    fn move_axis(&mut self, axis: Axis, magnitude: i8, duration: Duration) {
        // The old timer must be gone before the new value is set
        if let Some(previous) = self.timers.remove(&axis) {
            previous.handle.abort();
            debug!(
                "[ACTUATION] {} timer #{} superseded",
                axis, previous.generation
            );
        }

        info!("[ACTUATION] {} = {} for {:?}", axis, magnitude, duration);
        self.vehicle.set_axis(axis, magnitude);
        if axis.is_horizontal() {
            self.vehicle.set_flag(1);
        }

        self.arm(axis, duration);
    }

    fn arm(&mut self, axis: Axis, duration: Duration) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let expires_at = Instant::now() + duration;
        let sink = self.sink.clone();
        let handle = tokio::spawn(async move {
            sleep_until(expires_at).await;
            sink(AxisExpiry { axis, generation });
        });

        self.timers.insert(
            axis,
            ActuationTimer {
                expires_at,
                generation,
                handle,
            },
        );
    }

    /// Handle a timer expiry; returns false for a superseded timer
    ///
    /// The axis always returns to neutral. For Pitch and Roll the movement
    /// flag drops to 0 only when no horizontal axis still has a live timer,
    /// so the flag is never cleared under a moving horizontal axis.
    pub fn on_expired(&mut self, expiry: AxisExpiry) -> bool {
        let live = self
            .timers
            .get(&expiry.axis)
            .is_some_and(|t| t.generation == expiry.generation);
        if !live {
            debug!(
                "[ACTUATION] Ignoring stale {} timer #{}",
                expiry.axis, expiry.generation
            );
            return false;
        }

        self.timers.remove(&expiry.axis);
        info!("[ACTUATION] {} back to neutral", expiry.axis);
        self.vehicle.set_axis(expiry.axis, 0);

        // Keep the flag while the other horizontal axis is still moving
        if expiry.axis.is_horizontal() && !self.horizontal_live() {
            self.vehicle.set_flag(0);
        }
        true
    }

    fn horizontal_live(&self) -> bool {
        self.timers.keys().any(|axis| axis.is_horizontal())
    }

    /// Take off when landed, land when airborne, otherwise do nothing
    pub fn toggle_take_off_land(&mut self) {
        match self.vehicle.flying_state() {
            FlyingState::Landed => {
                info!("[ACTUATION] Landed, taking off");
                self.vehicle.take_off();
            }
            FlyingState::Flying | FlyingState::Hovering => {
                info!("[ACTUATION] Airborne, landing");
                self.vehicle.land();
            }
            other => {
                debug!("[ACTUATION] Toggle ignored while {}", other);
            }
        }
    }

    /// Cancel every timer and return all axes and the flag to neutral
    pub fn shutdown(&mut self) {
        for (axis, timer) in self.timers.drain() {
            timer.handle.abort();
            debug!("[ACTUATION] {} timer #{} cancelled", axis, timer.generation);
        }
        for axis in Axis::ALL {
            self.vehicle.set_axis(axis, 0);
        }
        self.vehicle.set_flag(0);
        info!("[ACTUATION] All axes neutral");
    }
}

impl<V: Vehicle> Drop for ActuationScheduler<V> {
    fn drop(&mut self) {
        for timer in self.timers.values() {
            timer.handle.abort();
        }
    }
}
