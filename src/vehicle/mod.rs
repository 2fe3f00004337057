//! Vehicle Actuator Interface
//!
//! The flight-control SDK seen from the relay: four piloting axes, the
//! horizontal-movement flag, discrete actions, the flying state and a link
//! state callback.

mod simulated;

pub use simulated::{SimulatedVehicle, VehicleCall};

use pilot_shared::Axis;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Flight phase reported by the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlyingState {
    Landed,
    TakingOff,
    Hovering,
    Flying,
    Emergency,
}

impl fmt::Display for FlyingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlyingState::Landed => write!(f, "landed"),
            FlyingState::TakingOff => write!(f, "taking off"),
            FlyingState::Hovering => write!(f, "hovering"),
            FlyingState::Flying => write!(f, "flying"),
            FlyingState::Emergency => write!(f, "emergency"),
        }
    }
}

/// State of the controller's link to the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleLinkState {
    Running,
    Stopped,
    Starting,
    Stopping,
}

/// Receiver for link state callbacks; must only enqueue
pub type VehicleLinkSink = Arc<dyn Fn(VehicleLinkState) + Send + Sync>;

/// Build a link sink that forwards into an unbounded channel
pub fn link_channel_sink<E>(tx: mpsc::UnboundedSender<E>) -> VehicleLinkSink
where
    E: From<VehicleLinkState> + Send + 'static,
{
    Arc::new(move |state| {
        let _ = tx.send(E::from(state));
    })
}

/// Actuator calls exposed by the flight-control SDK
///
/// Axis values are signed percentages in [-100, 100]. Calls are made from
/// the owner loop only.
pub trait Vehicle: Send {
    fn set_pitch(&mut self, value: i8);
    fn set_roll(&mut self, value: i8);
    fn set_yaw(&mut self, value: i8);
    fn set_gaz(&mut self, value: i8);

    /// 1 marks deliberate horizontal movement, 0 lets the vehicle hold position
    fn set_flag(&mut self, flag: u8);

    fn take_off(&mut self);
    fn land(&mut self);
    fn emergency(&mut self);
    fn flip(&mut self);
    fn take_picture(&mut self);

    fn flying_state(&self) -> FlyingState;

    /// Register the link state callback, replacing any previous one
    fn set_link_listener(&mut self, sink: VehicleLinkSink);

    fn set_axis(&mut self, axis: Axis, value: i8) {
        match axis {
            Axis::Pitch => self.set_pitch(value),
            Axis::Roll => self.set_roll(value),
            Axis::Yaw => self.set_yaw(value),
            Axis::Gaz => self.set_gaz(value),
        }
    }
}
