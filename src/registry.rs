//! DAC device discovery and deterministic addressing.
//!
//! A `DeviceRegistry` wraps a [`DacTransport`] and owns its one-time
//! startup. Enumeration is deterministic: device ids are always presented
//! sorted ascending, so ordinal addressing resolves the same way on every
//! host for a fixed device set.

use std::thread;
use std::time::Duration;

use log::warn;

use crate::transport::{DacHandle, DacTransport};
use crate::types::DacId;
use crate::Result;

/// Default wait after driver startup for broadcast announcements to arrive.
pub const DISCOVERY_WINDOW: Duration = Duration::from_secs(1);

/// Discovery service for DAC devices.
///
/// Constructed explicitly with the transport it drives; there is no global
/// driver state visible to callers. The registry starts the transport
/// lazily, once, on first use.
pub struct DeviceRegistry {
    transport: Box<dyn DacTransport>,
    discovery_window: Duration,
    started: bool,
}

impl DeviceRegistry {
    /// Creates a registry over the given transport.
    pub fn new(transport: Box<dyn DacTransport>) -> Self {
        Self {
            transport,
            discovery_window: DISCOVERY_WINDOW,
            started: false,
        }
    }

    /// Overrides the discovery window (builder pattern).
    ///
    /// Mostly useful for tests against the simulated transport, where no
    /// broadcast settling time is needed.
    pub fn with_discovery_window(mut self, window: Duration) -> Self {
        self.discovery_window = window;
        self
    }

    /// The configured discovery window.
    pub fn discovery_window(&self) -> Duration {
        self.discovery_window
    }

    /// Starts the transport if it has not been started yet.
    pub(crate) fn ensure_started(&mut self) -> Result<()> {
        if !self.started {
            self.transport.start()?;
            self.started = true;
        }
        Ok(())
    }

    /// Waits the discovery window so broadcasts from all devices arrive.
    pub(crate) fn settle(&self) {
        thread::sleep(self.discovery_window);
    }

    /// Lists the ids of all currently visible devices, sorted ascending
    /// with duplicates removed.
    ///
    /// Starts the transport if needed and waits the discovery window, so
    /// the first call after process start sees every device that
    /// announces itself. Safe to call repeatedly.
    pub fn list_devices(&mut self) -> Result<Vec<DacId>> {
        self.ensure_started()?;
        self.settle();

        let mut ids = self.scan_ids();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// Resolves a handle by ordinal: position `index` in the current
    /// device list sorted ascending by id.
    ///
    /// Re-enumerates without waiting; returns `None` when `index` is out
    /// of range or no devices are visible.
    pub fn resolve_ordinal(&mut self, index: usize) -> Option<Box<dyn DacHandle>> {
        if let Err(err) = self.ensure_started() {
            warn!("laser-stream: transport start failed: {err}");
            return None;
        }

        let count = self.transport.dac_count();
        if count == 0 || index >= count {
            return None;
        }

        // Order the driver's slots by device id, then pick the index.
        let mut slots: Vec<(DacId, usize)> = Vec::with_capacity(count);
        for slot in 0..count {
            if let Some(handle) = self.transport.open_at(slot) {
                slots.push((handle.id(), slot));
            }
        }
        slots.sort_unstable_by_key(|&(id, _)| id);

        let &(_, slot) = slots.get(index)?;
        self.transport.open_at(slot)
    }

    /// Resolves a handle by stable hardware id. `None` if no visible
    /// device carries that id.
    pub fn resolve_id(&mut self, id: DacId) -> Option<Box<dyn DacHandle>> {
        if let Err(err) = self.ensure_started() {
            warn!("laser-stream: transport start failed: {err}");
            return None;
        }

        let count = self.transport.dac_count();
        for slot in 0..count {
            if let Some(handle) = self.transport.open_at(slot) {
                if handle.id() == id {
                    return Some(handle);
                }
            }
        }
        None
    }

    /// Number of devices currently visible.
    pub(crate) fn dac_count(&mut self) -> usize {
        self.transport.dac_count()
    }

    fn scan_ids(&mut self) -> Vec<DacId> {
        let count = self.transport.dac_count();
        (0..count)
            .filter_map(|slot| self.transport.open_at(slot))
            .map(|handle| handle.id())
            .collect()
    }
}
