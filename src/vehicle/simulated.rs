//! In-memory vehicle that records every actuator call

use super::{FlyingState, Vehicle, VehicleLinkSink, VehicleLinkState};
use parking_lot::Mutex;
use pilot_shared::Axis;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// Oldest calls are dropped beyond this many
const CALL_LOG_CAPACITY: usize = 1024;

/// One actuator call as seen by the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleCall {
    Pitch(i8),
    Roll(i8),
    Yaw(i8),
    Gaz(i8),
    Flag(u8),
    TakeOff,
    Land,
    Emergency,
    Flip,
    TakePicture,
}

struct SimState {
    pitch: i8,
    roll: i8,
    yaw: i8,
    gaz: i8,
    flag: u8,
    flying_state: FlyingState,
    pictures: usize,
    calls: VecDeque<VehicleCall>,
    link: Option<VehicleLinkSink>,
}

impl SimState {
    fn record(&mut self, call: VehicleCall) {
        debug!("[VEHICLE] {:?}", call);
        if self.calls.len() == CALL_LOG_CAPACITY {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }

    fn settle(&mut self) {
        let moving = self.pitch != 0 || self.roll != 0 || self.yaw != 0 || self.gaz != 0;
        self.flying_state = match (self.flying_state, moving) {
            (FlyingState::Hovering, true) => FlyingState::Flying,
            (FlyingState::Flying, false) => FlyingState::Hovering,
            (state, _) => state,
        };
    }
}

/// Shared-state simulated vehicle; clones observe the same vehicle
#[derive(Clone)]
pub struct SimulatedVehicle {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedVehicle {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedVehicle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                pitch: 0,
                roll: 0,
                yaw: 0,
                gaz: 0,
                flag: 0,
                flying_state: FlyingState::Landed,
                pictures: 0,
                calls: VecDeque::new(),
                link: None,
            })),
        }
    }

    /// Bring the link up, reporting Starting then Running
    pub fn start(&self) {
        info!("[VEHICLE] Link starting");
        self.notify(VehicleLinkState::Starting);
        self.notify(VehicleLinkState::Running);
    }

    /// Take the link down, reporting Stopping then Stopped
    pub fn stop(&self) {
        info!("[VEHICLE] Link stopping");
        self.notify(VehicleLinkState::Stopping);
        self.notify(VehicleLinkState::Stopped);
    }

    fn notify(&self, link_state: VehicleLinkState) {
        // Callback runs outside the lock
        let sink = self.state.lock().link.clone();
        if let Some(sink) = sink {
            sink(link_state);
        }
    }

    pub fn axis(&self, axis: Axis) -> i8 {
        let state = self.state.lock();
        match axis {
            Axis::Pitch => state.pitch,
            Axis::Roll => state.roll,
            Axis::Yaw => state.yaw,
            Axis::Gaz => state.gaz,
        }
    }

    pub fn flag(&self) -> u8 {
        self.state.lock().flag
    }

    /// True when every axis and the flag are at neutral
    pub fn is_neutral(&self) -> bool {
        let state = self.state.lock();
        state.pitch == 0 && state.roll == 0 && state.yaw == 0 && state.gaz == 0 && state.flag == 0
    }

    pub fn pictures_taken(&self) -> usize {
        self.state.lock().pictures
    }

    /// Force a flight phase, e.g. to model a take-off in progress
    pub fn set_flying_state(&self, flying_state: FlyingState) {
        self.state.lock().flying_state = flying_state;
    }

    /// Most recent actuator calls, oldest first
    pub fn calls(&self) -> Vec<VehicleCall> {
        self.state.lock().calls.iter().copied().collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }
}

impl Vehicle for SimulatedVehicle {
    fn set_pitch(&mut self, value: i8) {
        let mut state = self.state.lock();
        state.pitch = value;
        state.record(VehicleCall::Pitch(value));
        state.settle();
    }

    fn set_roll(&mut self, value: i8) {
        let mut state = self.state.lock();
        state.roll = value;
        state.record(VehicleCall::Roll(value));
        state.settle();
    }

    fn set_yaw(&mut self, value: i8) {
        let mut state = self.state.lock();
        state.yaw = value;
        state.record(VehicleCall::Yaw(value));
        state.settle();
    }

    fn set_gaz(&mut self, value: i8) {
        let mut state = self.state.lock();
        state.gaz = value;
        state.record(VehicleCall::Gaz(value));
        state.settle();
    }

    fn set_flag(&mut self, flag: u8) {
        let mut state = self.state.lock();
        state.flag = flag;
        state.record(VehicleCall::Flag(flag));
    }

    fn take_off(&mut self) {
        let mut state = self.state.lock();
        state.record(VehicleCall::TakeOff);
        if state.flying_state == FlyingState::Landed {
            state.flying_state = FlyingState::Hovering;
            state.settle();
        }
    }

    fn land(&mut self) {
        let mut state = self.state.lock();
        state.record(VehicleCall::Land);
        if matches!(state.flying_state, FlyingState::Hovering | FlyingState::Flying) {
            state.flying_state = FlyingState::Landed;
        }
    }

    fn emergency(&mut self) {
        let mut state = self.state.lock();
        state.record(VehicleCall::Emergency);
        state.flying_state = FlyingState::Emergency;
    }

    fn flip(&mut self) {
        self.state.lock().record(VehicleCall::Flip);
    }

    fn take_picture(&mut self) {
        let mut state = self.state.lock();
        state.record(VehicleCall::TakePicture);
        state.pictures += 1;
    }

    fn flying_state(&self) -> FlyingState {
        self.state.lock().flying_state
    }

    fn set_link_listener(&mut self, sink: VehicleLinkSink) {
        self.state.lock().link = Some(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::link_channel_sink;
    use tokio::sync::mpsc;

    #[test]
    fn test_records_calls_and_axis_values() {
        let mut vehicle = SimulatedVehicle::new();
        let observer = vehicle.clone();

        vehicle.set_axis(Axis::Pitch, 50);
        vehicle.set_flag(1);
        vehicle.set_axis(Axis::Yaw, -50);

        assert_eq!(observer.axis(Axis::Pitch), 50);
        assert_eq!(observer.axis(Axis::Yaw), -50);
        assert_eq!(observer.flag(), 1);
        assert!(!observer.is_neutral());
        assert_eq!(
            observer.calls(),
            vec![VehicleCall::Pitch(50), VehicleCall::Flag(1), VehicleCall::Yaw(-50)]
        );
    }

    #[test]
    fn test_flying_state_follows_actions() {
        let mut vehicle = SimulatedVehicle::new();
        assert_eq!(vehicle.flying_state(), FlyingState::Landed);

        vehicle.take_off();
        assert_eq!(vehicle.flying_state(), FlyingState::Hovering);

        vehicle.set_gaz(50);
        assert_eq!(vehicle.flying_state(), FlyingState::Flying);
        vehicle.set_gaz(0);
        assert_eq!(vehicle.flying_state(), FlyingState::Hovering);

        vehicle.land();
        assert_eq!(vehicle.flying_state(), FlyingState::Landed);

        vehicle.emergency();
        assert_eq!(vehicle.flying_state(), FlyingState::Emergency);
    }

    #[test]
    fn test_picture_counter() {
        let mut vehicle = SimulatedVehicle::new();
        vehicle.take_picture();
        vehicle.take_picture();
        assert_eq!(vehicle.pictures_taken(), 2);
    }

    #[test]
    fn test_link_state_reported_to_listener() {
        let mut vehicle = SimulatedVehicle::new();
        // Nobody listening yet
        vehicle.start();

        let (tx, mut rx) = mpsc::unbounded_channel::<VehicleLinkState>();
        vehicle.set_link_listener(link_channel_sink(tx));
        vehicle.start();
        vehicle.stop();

        assert_eq!(rx.try_recv().unwrap(), VehicleLinkState::Starting);
        assert_eq!(rx.try_recv().unwrap(), VehicleLinkState::Running);
        assert_eq!(rx.try_recv().unwrap(), VehicleLinkState::Stopping);
        assert_eq!(rx.try_recv().unwrap(), VehicleLinkState::Stopped);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_call_log_keeps_most_recent() {
        let mut vehicle = SimulatedVehicle::new();
        for _ in 0..CALL_LOG_CAPACITY {
            vehicle.flip();
        }
        vehicle.take_picture();

        let calls = vehicle.calls();
        assert_eq!(calls.len(), CALL_LOG_CAPACITY);
        assert_eq!(calls.last(), Some(&VehicleCall::TakePicture));
        assert_eq!(calls[0], VehicleCall::Flip);
    }
}
