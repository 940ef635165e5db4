//! Simulated transport for tests.
//!
//! `SimTransport` implements [`DacTransport`] entirely in memory; a
//! cloneable [`SimControl`] handle scripts the device set (devices
//! appearing and disappearing, link health, readiness, connect failures,
//! write status codes) and inspects everything the lifecycle did (writes,
//! connect/stop/disconnect counts, sync registration). Deterministic, no
//! sockets, no timing dependencies.

use std::sync::{Arc, Mutex};

use crate::transport::{DacHandle, DacPoint, DacTransport, SyncFn};
use crate::types::{DacId, DacStatus, LinkState};
use crate::{Error, Result};

/// One recorded `write` call: the converted points and the rate used.
#[derive(Debug, Clone)]
pub struct SimWrite {
    /// Points as handed to the transport.
    pub points: Vec<DacPoint>,
    /// Points-per-second rate of the write.
    pub pps: u32,
}

#[derive(Default)]
struct SimDevice {
    id: DacId,
    link: LinkState,
    ready: bool,
    fail_connect: bool,
    write_status: i32,
    writes: Vec<SimWrite>,
    status: DacStatus,
    sync_fn: Option<SyncFn>,
    connect_count: u32,
    stop_count: u32,
    disconnect_count: u32,
    wait_calls: u32,
    stop_seen_before_disconnect: bool,
}

#[derive(Default)]
struct SimState {
    started: bool,
    start_count: u32,
    devices: Vec<SimDevice>,
}

impl SimState {
    fn device(&mut self, id: DacId) -> Option<&mut SimDevice> {
        self.devices.iter_mut().find(|d| d.id == id)
    }
}

/// In-memory transport implementation.
pub struct SimTransport {
    state: Arc<Mutex<SimState>>,
}

impl SimTransport {
    /// Creates a transport with no devices and its control handle.
    pub fn new() -> (Self, SimControl) {
        let state = Arc::new(Mutex::new(SimState::default()));
        let control = SimControl {
            state: Arc::clone(&state),
        };
        (Self { state }, control)
    }
}

impl DacTransport for SimTransport {
    fn start(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.start_count += 1;
        state.started = true;
        Ok(())
    }

    fn dac_count(&mut self) -> usize {
        self.state.lock().unwrap().devices.len()
    }

    fn open_at(&mut self, index: usize) -> Option<Box<dyn DacHandle>> {
        let state = self.state.lock().unwrap();
        let id = state.devices.get(index)?.id;
        Some(Box::new(SimHandle {
            state: Arc::clone(&self.state),
            id,
        }))
    }
}

struct SimHandle {
    state: Arc<Mutex<SimState>>,
    id: DacId,
}

impl DacHandle for SimHandle {
    fn id(&self) -> DacId {
        self.id
    }

    fn connect(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(device) = state.device(self.id) else {
            return Err(Error::connect_failed("device vanished"));
        };
        if device.fail_connect {
            return Err(Error::connect_failed("simulated connect failure"));
        }
        device.connect_count += 1;
        device.link = LinkState::Ready;
        Ok(())
    }

    fn link(&self) -> LinkState {
        let mut state = self.state.lock().unwrap();
        state
            .device(self.id)
            .map(|d| d.link)
            .unwrap_or(LinkState::Disconnected)
    }

    fn is_ready(&mut self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.device(self.id).is_some_and(|d| d.ready)
    }

    fn wait_until_ready(&mut self) {
        // The simulated device becomes ready as soon as it is waited on.
        let mut state = self.state.lock().unwrap();
        if let Some(device) = state.device(self.id) {
            device.wait_calls += 1;
            device.ready = true;
        }
    }

    fn write(&mut self, points: &[DacPoint], pps: u32) -> i32 {
        let mut state = self.state.lock().unwrap();
        let Some(device) = state.device(self.id) else {
            return -1;
        };
        device.status.point_rate = pps;
        device.status.buffer_fullness = points.len().min(u16::MAX as usize) as u16;
        device.writes.push(SimWrite {
            points: points.to_vec(),
            pps,
        });
        device.write_status
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        if let Some(device) = state.device(self.id) {
            device.stop_count += 1;
        }
    }

    fn disconnect(&mut self) {
        let mut state = self.state.lock().unwrap();
        if let Some(device) = state.device(self.id) {
            device.disconnect_count += 1;
            device.stop_seen_before_disconnect = device.stop_count > 0;
            device.link = LinkState::Disconnected;
        }
    }

    fn status(&self) -> DacStatus {
        let mut state = self.state.lock().unwrap();
        state
            .device(self.id)
            .map(|d| d.status)
            .unwrap_or_default()
    }

    fn set_sync_fn(&mut self, f: SyncFn) {
        let mut state = self.state.lock().unwrap();
        if let Some(device) = state.device(self.id) {
            device.sync_fn = Some(f);
        }
    }
}

/// Test-side handle for scripting and inspecting the simulated transport.
#[derive(Clone)]
pub struct SimControl {
    state: Arc<Mutex<SimState>>,
}

impl SimControl {
    /// Adds a visible device with the given id.
    pub fn add_device(&self, id: DacId) {
        let mut state = self.state.lock().unwrap();
        state.devices.push(SimDevice {
            id,
            ready: true,
            ..Default::default()
        });
    }

    /// Removes a device from the visible set.
    pub fn remove_device(&self, id: DacId) {
        let mut state = self.state.lock().unwrap();
        state.devices.retain(|d| d.id != id);
    }

    /// Sets a device's link health.
    pub fn set_link(&self, id: DacId, link: LinkState) {
        if let Some(d) = self.state.lock().unwrap().device(id) {
            d.link = link;
        }
    }

    /// Sets whether a device reports ready for writes.
    pub fn set_ready(&self, id: DacId, ready: bool) {
        if let Some(d) = self.state.lock().unwrap().device(id) {
            d.ready = ready;
        }
    }

    /// Makes subsequent connect calls on a device fail.
    pub fn set_fail_connect(&self, id: DacId, fail: bool) {
        if let Some(d) = self.state.lock().unwrap().device(id) {
            d.fail_connect = fail;
        }
    }

    /// Sets the status code returned by subsequent writes.
    pub fn set_write_status(&self, id: DacId, status: i32) {
        if let Some(d) = self.state.lock().unwrap().device(id) {
            d.write_status = status;
        }
    }

    /// All writes recorded for a device, in order.
    pub fn writes(&self, id: DacId) -> Vec<SimWrite> {
        self.state
            .lock()
            .unwrap()
            .device(id)
            .map(|d| d.writes.clone())
            .unwrap_or_default()
    }

    /// Number of writes recorded for a device.
    pub fn write_count(&self, id: DacId) -> usize {
        self.state
            .lock()
            .unwrap()
            .device(id)
            .map(|d| d.writes.len())
            .unwrap_or(0)
    }

    /// Number of successful connects on a device.
    pub fn connect_count(&self, id: DacId) -> u32 {
        self.state
            .lock()
            .unwrap()
            .device(id)
            .map(|d| d.connect_count)
            .unwrap_or(0)
    }

    /// Number of disconnects on a device.
    pub fn disconnect_count(&self, id: DacId) -> u32 {
        self.state
            .lock()
            .unwrap()
            .device(id)
            .map(|d| d.disconnect_count)
            .unwrap_or(0)
    }

    /// Whether the last disconnect was preceded by a stop call.
    pub fn stopped_before_disconnect(&self, id: DacId) -> bool {
        self.state
            .lock()
            .unwrap()
            .device(id)
            .is_some_and(|d| d.stop_seen_before_disconnect)
    }

    /// Number of `wait_until_ready` calls on a device.
    pub fn wait_calls(&self, id: DacId) -> u32 {
        self.state
            .lock()
            .unwrap()
            .device(id)
            .map(|d| d.wait_calls)
            .unwrap_or(0)
    }

    /// Whether a sync callback is registered on a device.
    pub fn sync_registered(&self, id: DacId) -> bool {
        self.state
            .lock()
            .unwrap()
            .device(id)
            .is_some_and(|d| d.sync_fn.is_some())
    }

    /// Invokes a device's registered sync callback, if any.
    pub fn fire_sync(&self, id: DacId) {
        // Take the callback out so it runs without the sim lock held.
        let taken = self
            .state
            .lock()
            .unwrap()
            .device(id)
            .and_then(|d| d.sync_fn.take());
        if let Some(mut f) = taken {
            f();
            if let Some(d) = self.state.lock().unwrap().device(id) {
                d.sync_fn = Some(f);
            }
        }
    }

    /// A device's current link health.
    pub fn link(&self, id: DacId) -> LinkState {
        self.state
            .lock()
            .unwrap()
            .device(id)
            .map(|d| d.link)
            .unwrap_or(LinkState::Disconnected)
    }

    /// Whether the transport has been started.
    pub fn started(&self) -> bool {
        self.state.lock().unwrap().started
    }

    /// How many times `start()` has been called.
    pub fn start_count(&self) -> u32 {
        self.state.lock().unwrap().start_count
    }
}
