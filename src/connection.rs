//! The DAC connection instance: state machine, point handoff, lifecycle.
//!
//! A [`DacConnection`] owns one device handle, one point buffer, and one
//! background streaming loop. All mutable state lives behind a single
//! mutex; producer calls and worker cycles acquire it non-blocking and
//! skip their action when it is contended, so frame production is never
//! blocked indefinitely. The one intentionally blocking call is the
//! transport's `wait_until_ready` inside the send path, and only when
//! wait-before-send is configured.
//!
//! # Lifecycle
//!
//! ```ignore
//! let registry = DeviceRegistry::new(Box::new(my_transport));
//! let conn = DacConnection::new(registry);
//!
//! // Connect to the lowest-id DAC and start the streaming loop.
//! conn.setup(true, 0);
//! conn.set_auto_connect(true);
//!
//! // Producer side: hand frames over; the loop drains them.
//! conn.set_points(&frame);
//! ```
//!
//! Frames may be silently dropped under backpressure or disconnect;
//! delivery is not guaranteed by design.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::buffer::PointBuffer;
use crate::registry::DeviceRegistry;
use crate::transport::{to_dac_points, DacHandle, SyncFn};
use crate::types::{
    ConnEvent, ConnectionState, DacAddress, DacId, DacStatus, FramePoint, StreamConfig,
    DEFAULT_PPS,
};
use crate::worker::{StreamWorker, STOP_GRACE};

/// All mutable instance state, guarded by the single per-instance lock.
struct Inner {
    state: ConnectionState,
    handle: Option<Box<dyn DacHandle>>,
    buffer: PointBuffer,
    config: StreamConfig,
    address: Option<DacAddress>,
    discovery_window: Duration,
    registry: DeviceRegistry,
}

impl Inner {
    /// Health of the current handle. `false` with no handle.
    fn probe_health(&self) -> bool {
        match &self.handle {
            Some(handle) => handle.link().is_healthy(),
            None => false,
        }
    }

    /// One drain/send attempt. No-op unless connected with pending points.
    ///
    /// The buffer is cleared after every attempt: a not-ready device drops
    /// the pending frame (it is never queued for a later cycle), and a
    /// failed write is logged and dropped the same way.
    fn send(&mut self) {
        if !self.state.is_found() || self.buffer.is_empty() {
            return;
        }
        let Some(handle) = self.handle.as_mut() else {
            return;
        };

        if self.config.wait_before_send {
            handle.wait_until_ready();
        } else if !handle.is_ready() {
            self.buffer.clear();
            return;
        }

        let points = to_dac_points(self.buffer.points());
        let status = handle.write(&points, self.config.pps);
        if status != 0 {
            debug!("laser-stream: write returned status {status}");
        }
        self.buffer.clear();
    }

    /// Discovery + connect by ordinal. Mirrors the state machine's
    /// `NotFound -> Found` transition; failure leaves the state unchanged.
    fn connect_ordinal(&mut self, ordinal: usize) {
        if let Err(err) = self.registry.ensure_started() {
            warn!("laser-stream: transport start failed: {err}");
            return;
        }
        let Some(mut handle) = self.registry.resolve_ordinal(ordinal) else {
            warn!("laser-stream: no DAC at ordinal {ordinal}");
            self.state = self.state.apply(ConnEvent::ConnectFailed);
            return;
        };
        let id = handle.id();
        info!("laser-stream: connecting to DAC {id}...");
        match handle.connect() {
            Ok(()) => {
                info!("laser-stream: connected to DAC {id}");
                self.handle = Some(handle);
                self.state = self.state.apply(ConnEvent::Connected);
            }
            Err(err) => {
                warn!("laser-stream: connect to DAC {id} failed: {err}");
                self.state = self.state.apply(ConnEvent::ConnectFailed);
            }
        }
    }

    /// Discovery + connect by stable id. With `connect_now == false` the
    /// instance parks in `FoundDisconnected` holding the unconnected
    /// handle; `resetup` (or the lazy reconnect path) connects it later.
    fn connect_by_id(&mut self, id: DacId, connect_now: bool) {
        if let Err(err) = self.registry.ensure_started() {
            warn!("laser-stream: transport start failed: {err}");
            return;
        }
        if self.registry.dac_count() == 0 {
            warn!("laser-stream: no DACs found");
            return;
        }
        let Some(mut handle) = self.registry.resolve_id(id) else {
            return;
        };

        if connect_now {
            info!("laser-stream: connecting to DAC {id}...");
            match handle.connect() {
                Ok(()) => {
                    info!("laser-stream: connected to DAC {id}");
                    self.handle = Some(handle);
                    self.state = self.state.apply(ConnEvent::Connected);
                }
                Err(err) => {
                    warn!("laser-stream: connect to DAC {id} failed: {err}");
                    self.state = self.state.apply(ConnEvent::ConnectFailed);
                }
            }
        } else {
            self.handle = Some(handle);
            self.state = self.state.apply(ConnEvent::FoundUnconnected);
        }
    }

    /// Drops the handle, issuing stop + disconnect (in that order) first
    /// when the instance was connected. The handle is never touched after
    /// disconnect.
    fn teardown_handle(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            if self.state.is_found() {
                handle.stop();
                handle.disconnect();
            }
        }
        self.handle = None;
        self.state = self.state.apply(ConnEvent::TornDown);
    }
}

/// One cycle of the background streaming loop.
///
/// A contended lock skips the whole cycle. The lazy reconnect path
/// (`FoundDisconnected` with auto-connect) re-runs the original setup:
/// the discovery-window wait happens without the lock so producers are
/// not stalled, and the flag is re-checked afterwards so a stop request
/// during the wait is honored.
fn worker_cycle(inner: &Arc<Mutex<Inner>>, flag: &AtomicBool) {
    let resetup = {
        let Ok(mut guard) = inner.try_lock() else {
            return;
        };
        match guard.state {
            ConnectionState::Found => {
                guard.send();
                None
            }
            ConnectionState::NotFound => {
                if guard.config.auto_connect {
                    if let Some(DacAddress::Ordinal(ordinal)) = guard.address {
                        guard.connect_ordinal(ordinal);
                    }
                }
                None
            }
            ConnectionState::FoundDisconnected => {
                if guard.config.auto_connect {
                    guard.buffer.clear();
                    guard.address.map(|address| (address, guard.discovery_window))
                } else {
                    None
                }
            }
        }
    };

    if let Some((address, window)) = resetup {
        thread::sleep(window);
        if !flag.load(Ordering::Relaxed) {
            return;
        }
        let mut guard = inner.lock().unwrap();
        if guard.state != ConnectionState::FoundDisconnected {
            return;
        }
        match address {
            DacAddress::Ordinal(ordinal) => guard.connect_ordinal(ordinal),
            DacAddress::Id(id) => guard.connect_by_id(id, true),
        }
    }
}

/// A streaming connection to one DAC device.
///
/// Construct with a [`DeviceRegistry`], then initialize via [`setup`]
/// (ordinal addressing) or [`setup_by_dac_id`] (stable-id addressing).
/// Re-setup after a disconnect reuses whichever addressing mode the
/// instance was configured with.
///
/// Dropping the connection tears it down ([`kill`]).
///
/// [`setup`]: DacConnection::setup
/// [`setup_by_dac_id`]: DacConnection::setup_by_dac_id
/// [`kill`]: DacConnection::kill
pub struct DacConnection {
    inner: Arc<Mutex<Inner>>,
    worker: StreamWorker,
}

impl DacConnection {
    /// Creates an unconnected instance over the given registry.
    pub fn new(registry: DeviceRegistry) -> Self {
        let discovery_window = registry.discovery_window();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ConnectionState::NotFound,
                handle: None,
                buffer: PointBuffer::new(),
                config: StreamConfig::default(),
                address: None,
                discovery_window,
                registry,
            })),
            worker: StreamWorker::new(),
        }
    }

    /// Initializes by ordinal: connects to the device at `ordinal` in the
    /// ascending-id device list and optionally starts the streaming loop.
    ///
    /// Applies the default PPS and wait-before-send settings, waits the
    /// discovery window so broadcasts from all devices arrive, then
    /// attempts the connect. On failure (no devices, ordinal out of range,
    /// connect error) a warning is logged and the state stays `NotFound`;
    /// with auto-connect enabled the loop keeps retrying.
    ///
    /// The loop is started regardless of connect success, so auto-connect
    /// can pick the device up when it appears.
    pub fn setup(&self, start_loop: bool, ordinal: usize) {
        let window = {
            let mut guard = self.inner.lock().unwrap();
            guard.address = Some(DacAddress::Ordinal(ordinal));
            guard.config.pps = DEFAULT_PPS;
            guard.config.wait_before_send = false;
            guard.discovery_window
        };
        self.run_setup(DacAddress::Ordinal(ordinal), window, true);
        if start_loop {
            self.start();
        }
    }

    /// Initializes by stable hardware id.
    ///
    /// With `connect_now == false` the instance parks in
    /// `FoundDisconnected` holding an unconnected handle; call
    /// [`resetup`](Self::resetup) to connect it later. The loop is only
    /// started when `start_loop` is set, `connect_now` is set, and the
    /// connect succeeded.
    ///
    /// `discovery_window` replaces the registry default for this instance,
    /// including for later re-setups.
    pub fn setup_by_dac_id(
        &self,
        id: DacId,
        start_loop: bool,
        connect_now: bool,
        discovery_window: Duration,
    ) {
        {
            let mut guard = self.inner.lock().unwrap();
            guard.address = Some(DacAddress::Id(id));
            guard.config.pps = DEFAULT_PPS;
            guard.config.wait_before_send = false;
            guard.discovery_window = discovery_window;
        }
        let connected = self.run_setup(DacAddress::Id(id), discovery_window, connect_now);
        if start_loop && connect_now && connected {
            self.start();
        }
    }

    /// Reconnects the existing handle after a manual device reconnect,
    /// without re-running discovery. No-op when no handle exists.
    pub fn resetup(&self, start_loop: bool) {
        let connected = {
            let mut guard = self.inner.lock().unwrap();
            let Some(handle) = guard.handle.as_mut() else {
                return;
            };
            let id = handle.id();
            match handle.connect() {
                Ok(()) => {
                    info!("laser-stream: connected to DAC {id}");
                    guard.state = guard.state.apply(ConnEvent::Connected);
                    true
                }
                Err(err) => {
                    warn!("laser-stream: reconnect to DAC {id} failed: {err}");
                    false
                }
            }
        };
        if connected && start_loop {
            self.start();
        }
    }

    /// Health probe. Returns whether the device link is currently healthy.
    ///
    /// On an unhealthy link: with `force_reconnect`, performs a full
    /// teardown and synchronously re-runs the original setup (same
    /// addressing mode, loop restarted); without it, demotes
    /// `Found -> FoundDisconnected` under the lock, deferring the demotion
    /// to a later cycle if the lock is contended. Returns `false` for the
    /// cycle in which the unhealthy link was detected, even if a forced
    /// reconnect just succeeded.
    pub fn check_connection(&self, force_reconnect: bool) -> bool {
        let (healthy, address, window) = {
            let guard = self.inner.lock().unwrap();
            (guard.probe_health(), guard.address, guard.discovery_window)
        };
        if healthy {
            return true;
        }

        if force_reconnect {
            self.kill();
            if let Some(address) = address {
                let connected = self.run_setup(address, window, true);
                match address {
                    DacAddress::Ordinal(_) => self.start(),
                    DacAddress::Id(_) => {
                        if connected {
                            self.start();
                        }
                    }
                }
            }
        } else if let Ok(mut guard) = self.inner.try_lock() {
            if guard.state.is_found() {
                guard.state = guard.state.apply(ConnEvent::ProbeFailed);
            }
        }
        false
    }

    /// Starts the background streaming loop. No-op if already running.
    pub fn start(&self) {
        let inner = Arc::clone(&self.inner);
        self.worker.start(move |flag| worker_cycle(&inner, flag));
    }

    /// Stops the streaming loop cooperatively, waiting up to the ~200 ms
    /// grace period for it to wind down.
    pub fn stop(&self) {
        self.worker.stop(STOP_GRACE);
    }

    /// Whether the streaming loop is currently running.
    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Full teardown: stop the loop, clear the buffer, then stop and
    /// disconnect the handle (in that order) if connected. The instance
    /// returns to `NotFound` and can be set up again.
    pub fn kill(&self) {
        self.stop();
        let mut guard = self.inner.lock().unwrap();
        guard.buffer.clear();
        guard.teardown_handle();
    }

    /// Appends points to the pending buffer, in call order.
    ///
    /// Skipped (points dropped) when the instance lock is contended.
    pub fn add_points(&self, points: &[FramePoint]) {
        if let Ok(mut guard) = self.inner.try_lock() {
            guard.buffer.append(points);
        }
    }

    /// Replaces the pending buffer wholesale. Only takes effect while
    /// connected; skipped when the instance lock is contended.
    pub fn set_points(&self, points: &[FramePoint]) {
        if let Ok(mut guard) = self.inner.try_lock() {
            if guard.state.is_found() {
                guard.buffer.replace(points);
            }
        }
    }

    /// Discards all pending points. Skipped when the lock is contended.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.try_lock() {
            guard.buffer.clear();
        }
    }

    /// One drain/send attempt (the same path the streaming loop drives).
    /// Skipped when the lock is contended.
    pub fn send(&self) {
        if let Ok(mut guard) = self.inner.try_lock() {
            guard.send();
        }
    }

    /// Sets the output rate in points per second. Skipped when the lock is
    /// contended.
    pub fn set_pps(&self, pps: u32) {
        if let Ok(mut guard) = self.inner.try_lock() {
            guard.config.pps = pps;
        }
    }

    /// The configured output rate.
    pub fn pps(&self) -> u32 {
        self.inner.lock().unwrap().config.pps
    }

    /// Sets whether `send` blocks until the device is ready instead of
    /// dropping the pending frame. Skipped when the lock is contended.
    pub fn set_wait_before_send(&self, wait: bool) {
        if let Ok(mut guard) = self.inner.try_lock() {
            guard.config.wait_before_send = wait;
        }
    }

    /// Whether `send` blocks until the device is ready.
    pub fn wait_before_send(&self) -> bool {
        self.inner.lock().unwrap().config.wait_before_send
    }

    /// Enables or disables automatic (re)connection by the streaming loop.
    pub fn set_auto_connect(&self, auto_connect: bool) {
        self.inner.lock().unwrap().config.auto_connect = auto_connect;
    }

    /// Whether the streaming loop may (re)connect on its own.
    pub fn is_auto_connect(&self) -> bool {
        self.inner.lock().unwrap().config.auto_connect
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().unwrap().state
    }

    /// Human-readable connection state.
    pub fn state_name(&self) -> &'static str {
        self.state().display_name()
    }

    /// Whether the instance is connected and streaming-eligible.
    pub fn state_is_found(&self) -> bool {
        self.state().is_found()
    }

    /// Last status snapshot from the device, when a handle exists.
    pub fn dac_status(&self) -> Option<DacStatus> {
        self.inner
            .lock()
            .unwrap()
            .handle
            .as_ref()
            .map(|handle| handle.status())
    }

    /// Registers a callback invoked by the transport at its own sync
    /// cadence. Silently skipped unless the device is currently reachable
    /// (the non-forcing health check passes).
    pub fn set_sync_fn<F>(&self, f: F)
    where
        F: FnMut() + Send + 'static,
    {
        let has_handle = self.inner.lock().unwrap().handle.is_some();
        if has_handle && self.check_connection(false) {
            let mut guard = self.inner.lock().unwrap();
            if let Some(handle) = guard.handle.as_mut() {
                handle.set_sync_fn(Box::new(f) as SyncFn);
            }
        }
    }

    /// Runs a setup attempt: one-time transport start, discovery-window
    /// wait (without the lock), then discovery + connect under the lock.
    /// Returns whether the instance ended up connected.
    fn run_setup(&self, address: DacAddress, window: Duration, connect_now: bool) -> bool {
        {
            let mut guard = self.inner.lock().unwrap();
            if let Err(err) = guard.registry.ensure_started() {
                warn!("laser-stream: transport start failed: {err}");
                return false;
            }
        }
        thread::sleep(window);
        let mut guard = self.inner.lock().unwrap();
        match address {
            DacAddress::Ordinal(ordinal) => guard.connect_ordinal(ordinal),
            DacAddress::Id(id) => guard.connect_by_id(id, connect_now),
        }
        guard.state.is_found()
    }
}

impl Drop for DacConnection {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimControl, SimTransport};
    use crate::types::LinkState;

    fn pt(x: i16) -> FramePoint {
        FramePoint::new(x, 0, 65535, 0, 0, 65535)
    }

    fn conn_with(ids: &[DacId]) -> (DacConnection, SimControl) {
        let (transport, control) = SimTransport::new();
        for &id in ids {
            control.add_device(id);
        }
        let registry =
            DeviceRegistry::new(Box::new(transport)).with_discovery_window(Duration::ZERO);
        (DacConnection::new(registry), control)
    }

    #[test]
    fn test_setup_connects_lowest_id_for_ordinal_zero() {
        let (conn, control) = conn_with(&[5, 2, 9]);
        conn.setup(false, 0);

        assert_eq!(conn.state(), ConnectionState::Found);
        assert_eq!(control.connect_count(2), 1);
        assert_eq!(control.connect_count(5), 0);
        assert!(!conn.is_running());
    }

    #[test]
    fn test_setup_out_of_range_stays_not_found() {
        let (conn, _control) = conn_with(&[5, 2, 9]);
        conn.setup(false, 3);

        assert_eq!(conn.state(), ConnectionState::NotFound);
        assert!(conn.dac_status().is_none());
    }

    #[test]
    fn test_setup_connect_failure_stays_not_found() {
        let (conn, control) = conn_with(&[7]);
        control.set_fail_connect(7, true);
        conn.setup(false, 0);

        assert_eq!(conn.state(), ConnectionState::NotFound);
        assert!(conn.dac_status().is_none());
    }

    #[test]
    fn test_setup_applies_default_config() {
        let (conn, _control) = conn_with(&[7]);
        conn.set_pps(12_000);
        conn.set_wait_before_send(true);
        conn.setup(false, 0);

        assert_eq!(conn.pps(), DEFAULT_PPS);
        assert!(!conn.wait_before_send());
    }

    #[test]
    fn test_setup_by_dac_id_connects_matching_device() {
        let (conn, control) = conn_with(&[5, 2, 9]);
        conn.setup_by_dac_id(9, false, true, Duration::ZERO);

        assert_eq!(conn.state(), ConnectionState::Found);
        assert_eq!(control.connect_count(9), 1);
    }

    #[test]
    fn test_setup_by_dac_id_unknown_id_is_silent_not_found() {
        let (conn, _control) = conn_with(&[5, 2, 9]);
        conn.setup_by_dac_id(42, false, true, Duration::ZERO);

        assert_eq!(conn.state(), ConnectionState::NotFound);
    }

    #[test]
    fn test_setup_by_dac_id_deferred_connect_parks_disconnected() {
        let (conn, control) = conn_with(&[9]);
        conn.setup_by_dac_id(9, true, false, Duration::ZERO);

        assert_eq!(conn.state(), ConnectionState::FoundDisconnected);
        assert_eq!(control.connect_count(9), 0);
        assert!(!conn.is_running());

        conn.resetup(false);
        assert_eq!(conn.state(), ConnectionState::Found);
        assert_eq!(control.connect_count(9), 1);
    }

    #[test]
    fn test_add_points_concatenates_between_drains() {
        let (conn, control) = conn_with(&[7]);
        conn.setup(false, 0);

        conn.add_points(&[pt(1), pt(2)]);
        conn.add_points(&[pt(3)]);
        conn.send();

        let writes = control.writes(7);
        assert_eq!(writes.len(), 1);
        let xs: Vec<i16> = writes[0].points.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![1, 2, 3]);
    }

    #[test]
    fn test_set_points_replaces_pending_buffer() {
        let (conn, control) = conn_with(&[7]);
        conn.setup(false, 0);

        conn.add_points(&[pt(1), pt(2)]);
        conn.set_points(&[pt(9)]);
        conn.send();

        let writes = control.writes(7);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].points.len(), 1);
        assert_eq!(writes[0].points[0].x, 9);
    }

    #[test]
    fn test_set_points_is_ignored_while_not_found() {
        let (conn, control) = conn_with(&[7]);
        conn.set_points(&[pt(1)]);
        conn.setup(false, 0);
        conn.send();

        assert_eq!(control.write_count(7), 0);
    }

    #[test]
    fn test_send_drains_and_second_send_is_noop() {
        let (conn, control) = conn_with(&[7]);
        conn.setup(false, 0);

        conn.add_points(&[pt(1)]);
        conn.send();
        conn.send();

        assert_eq!(control.write_count(7), 1);
    }

    #[test]
    fn test_send_uses_configured_pps() {
        let (conn, control) = conn_with(&[7]);
        conn.setup(false, 0);
        conn.set_pps(12_345);

        conn.add_points(&[pt(1)]);
        conn.send();

        assert_eq!(control.writes(7)[0].pps, 12_345);
    }

    #[test]
    fn test_send_not_ready_drops_buffer_without_write() {
        let (conn, control) = conn_with(&[7]);
        conn.setup(false, 0);
        control.set_ready(7, false);

        conn.add_points(&[pt(1), pt(2)]);
        conn.send();
        assert_eq!(control.write_count(7), 0);

        // The frame was dropped, not queued: nothing left once ready.
        control.set_ready(7, true);
        conn.send();
        assert_eq!(control.write_count(7), 0);
    }

    #[test]
    fn test_wait_before_send_blocks_until_ready_then_writes() {
        let (conn, control) = conn_with(&[7]);
        conn.setup(false, 0);
        conn.set_wait_before_send(true);
        control.set_ready(7, false);

        conn.add_points(&[pt(1)]);
        conn.send();

        assert_eq!(control.wait_calls(7), 1);
        assert_eq!(control.write_count(7), 1);
    }

    #[test]
    fn test_write_failure_is_nonfatal_and_drains() {
        let (conn, control) = conn_with(&[7]);
        conn.setup(false, 0);
        control.set_write_status(7, -5);

        conn.add_points(&[pt(1)]);
        conn.send();

        assert_eq!(conn.state(), ConnectionState::Found);
        assert_eq!(control.write_count(7), 1);

        // Buffer was cleared despite the bad status.
        conn.send();
        assert_eq!(control.write_count(7), 1);
    }

    #[test]
    fn test_check_connection_true_while_healthy() {
        let (conn, _control) = conn_with(&[7]);
        conn.setup(false, 0);
        assert!(conn.check_connection(false));
        assert_eq!(conn.state(), ConnectionState::Found);
    }

    #[test]
    fn test_check_connection_false_with_no_handle() {
        let (conn, _control) = conn_with(&[]);
        assert!(!conn.check_connection(false));
        assert_eq!(conn.state(), ConnectionState::NotFound);
    }

    #[test]
    fn test_check_connection_demotes_without_force() {
        let (conn, control) = conn_with(&[7]);
        conn.setup(false, 0);
        control.set_link(7, LinkState::Shutdown);

        assert!(!conn.check_connection(false));
        assert_eq!(conn.state(), ConnectionState::FoundDisconnected);
    }

    #[test]
    fn test_forced_reconnect_tears_down_and_reconnects() {
        let (conn, control) = conn_with(&[7]);
        conn.setup(false, 0);
        conn.add_points(&[pt(1), pt(2)]);
        control.set_link(7, LinkState::Broken);

        assert!(!conn.check_connection(true));

        // Full teardown happened: stop + disconnect on the old session,
        // then a fresh connect; the buffer is empty and the loop restarted.
        assert_eq!(conn.state(), ConnectionState::Found);
        assert!(control.stopped_before_disconnect(7));
        assert_eq!(control.disconnect_count(7), 1);
        assert_eq!(control.connect_count(7), 2);
        assert!(conn.is_running());

        conn.send();
        assert_eq!(control.write_count(7), 0);

        conn.kill();
    }

    #[test]
    fn test_forced_reconnect_by_id_uses_stable_id() {
        let (conn, control) = conn_with(&[5, 9]);
        conn.setup_by_dac_id(9, false, true, Duration::ZERO);
        control.set_link(9, LinkState::Shutdown);

        assert!(!conn.check_connection(true));

        assert_eq!(conn.state(), ConnectionState::Found);
        assert_eq!(control.connect_count(9), 2);
        assert_eq!(control.connect_count(5), 0);

        conn.kill();
    }

    #[test]
    fn test_kill_clears_buffer_and_disconnects_in_order() {
        let (conn, control) = conn_with(&[7]);
        conn.setup(true, 0);
        conn.stop();
        conn.add_points(&[pt(1), pt(2)]);

        conn.kill();

        assert_eq!(conn.state(), ConnectionState::NotFound);
        assert!(conn.dac_status().is_none());
        assert!(!conn.is_running());
        assert!(control.stopped_before_disconnect(7));
        assert_eq!(control.disconnect_count(7), 1);

        // Nothing pending survives the teardown.
        conn.setup(false, 0);
        conn.send();
        assert_eq!(control.write_count(7), 0);
    }

    #[test]
    fn test_kill_without_connection_skips_handle_teardown() {
        let (conn, control) = conn_with(&[7]);
        conn.setup_by_dac_id(7, false, false, Duration::ZERO);

        conn.kill();

        assert_eq!(conn.state(), ConnectionState::NotFound);
        assert_eq!(control.disconnect_count(7), 0);
    }

    #[test]
    fn test_sync_fn_registered_only_while_reachable() {
        let (conn, control) = conn_with(&[7]);

        // No handle yet: silently skipped.
        conn.set_sync_fn(|| {});
        assert!(!control.sync_registered(7));

        conn.setup(false, 0);
        control.set_link(7, LinkState::Shutdown);
        conn.set_sync_fn(|| {});
        assert!(!control.sync_registered(7));

        // Reconnect and register for real.
        assert!(!conn.check_connection(true));
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        conn.set_sync_fn(move || flag.store(true, Ordering::Relaxed));
        assert!(control.sync_registered(7));

        control.fire_sync(7);
        assert!(fired.load(Ordering::Relaxed));

        conn.kill();
    }

    #[test]
    fn test_state_name_tracks_state() {
        let (conn, control) = conn_with(&[7]);
        assert_eq!(conn.state_name(), "Not Found");

        conn.setup(false, 0);
        assert_eq!(conn.state_name(), "Found");
        assert!(conn.state_is_found());

        control.set_link(7, LinkState::Shutdown);
        conn.check_connection(false);
        assert_eq!(conn.state_name(), "Disconnected");
    }

    #[test]
    fn test_dac_status_reflects_last_write() {
        let (conn, _control) = conn_with(&[7]);
        conn.setup(false, 0);
        conn.set_pps(20_000);

        conn.add_points(&[pt(1), pt(2), pt(3)]);
        conn.send();

        let status = conn.dac_status().expect("status while connected");
        assert_eq!(status.point_rate, 20_000);
        assert_eq!(status.buffer_fullness, 3);
    }

    #[test]
    fn test_drop_tears_down_connection() {
        let (conn, control) = conn_with(&[7]);
        conn.setup(true, 0);
        drop(conn);

        assert!(control.stopped_before_disconnect(7));
        assert_eq!(control.disconnect_count(7), 1);
    }
}
