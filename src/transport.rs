//! Transport abstraction over the DAC driver library.
//!
//! The wire-level protocol (broadcast discovery, packet encoding, socket
//! I/O) lives behind these traits. The connection lifecycle in this crate
//! only ever talks to a [`DacTransport`] and the [`DacHandle`]s it hands
//! out, so the state machine and streaming loop can be exercised against
//! the simulated transport in tests and against a real driver in
//! production.
//!
//! # Point layout contract
//!
//! [`DacPoint`] is the transport's native point record. Frame sources
//! supply [`FramePoint`]s with the identical field order and widths
//! (x/y as `i16`, r/g/b/i/u1/u2 as `u16`, 16 bytes total, C layout).
//! Conversion is an explicit field-by-field copy rather than a
//! reinterpret cast, and the compile-time assertions below fail the build
//! if either record ever drifts from the contract.

use crate::types::{DacId, DacStatus, FramePoint, LinkState};
use crate::Result;

/// Callback invoked by the transport at its protocol-defined sync cadence.
pub type SyncFn = Box<dyn FnMut() + Send + 'static>;

/// The transport's native point record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct DacPoint {
    /// X coordinate, signed 16-bit.
    pub x: i16,
    /// Y coordinate, signed 16-bit.
    pub y: i16,
    /// Red channel.
    pub r: u16,
    /// Green channel.
    pub g: u16,
    /// Blue channel.
    pub b: u16,
    /// Intensity.
    pub i: u16,
    /// User channel 1.
    pub u1: u16,
    /// User channel 2.
    pub u2: u16,
}

impl From<FramePoint> for DacPoint {
    fn from(p: FramePoint) -> Self {
        Self {
            x: p.x,
            y: p.y,
            r: p.r,
            g: p.g,
            b: p.b,
            i: p.i,
            u1: p.u1,
            u2: p.u2,
        }
    }
}

// Layout contract: both records are 16 bytes, field-for-field compatible.
const _: () = assert!(std::mem::size_of::<DacPoint>() == 16);
const _: () = assert!(std::mem::size_of::<FramePoint>() == std::mem::size_of::<DacPoint>());
const _: () = assert!(std::mem::align_of::<FramePoint>() == std::mem::align_of::<DacPoint>());

/// Converts a frame buffer to the transport's native representation.
pub fn to_dac_points(points: &[FramePoint]) -> Vec<DacPoint> {
    points.iter().copied().map(DacPoint::from).collect()
}

/// Driver-library interface: one-time startup plus device enumeration.
///
/// Implementations wrap a concrete DAC driver (Ether Dream network
/// discovery, a USB controller, or the simulated transport). `start()`
/// must be idempotent; the registry calls it lazily before the first
/// enumeration and again on every re-setup.
pub trait DacTransport: Send {
    /// Process-wide driver startup. Idempotent.
    fn start(&mut self) -> Result<()>;

    /// Number of devices currently visible to the driver.
    fn dac_count(&mut self) -> usize;

    /// Opens a handle to the device at `index` in the driver's own
    /// (unsorted) enumeration order. `None` when out of range.
    fn open_at(&mut self, index: usize) -> Option<Box<dyn DacHandle>>;
}

/// An open (not necessarily connected) handle to a single DAC device.
///
/// Exclusively owned by one connection instance. After `disconnect()` the
/// handle must not be used again; the owner drops it.
pub trait DacHandle: Send {
    /// The device's stable hardware id.
    fn id(&self) -> DacId;

    /// Establishes the streaming session.
    fn connect(&mut self) -> Result<()>;

    /// Current link health. This is the probe consulted by
    /// `check_connection`; it must not perform I/O.
    fn link(&self) -> LinkState;

    /// Whether the device can accept a write right now.
    fn is_ready(&mut self) -> bool;

    /// Blocks until the device is ready, bounded by the transport's own
    /// timeout behavior. The only intentionally blocking call in the
    /// streaming path.
    fn wait_until_ready(&mut self);

    /// Writes one buffer of points at the given rate. Returns the driver
    /// status code; non-zero is non-fatal.
    fn write(&mut self, points: &[DacPoint], pps: u32) -> i32;

    /// Stops playback on the device.
    fn stop(&mut self);

    /// Closes the streaming session. The handle is dead afterwards.
    fn disconnect(&mut self);

    /// Last status snapshot reported by the device.
    fn status(&self) -> DacStatus;

    /// Registers the sync callback with the driver.
    fn set_sync_fn(&mut self, f: SyncFn);
}
