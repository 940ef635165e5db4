//! Connection lifecycle and real-time point streaming for laser DACs.
//!
//! This crate manages a connection to a laser-projector DAC (digital-to-
//! analog converter) over a discovery/streaming transport and continuously
//! streams point-buffer frames to it in real time:
//!
//! - **Discovery & addressing** - [`DeviceRegistry`] enumerates visible
//!   devices with deterministic ordering (ids sorted ascending), so devices
//!   can be addressed either by ordinal position or by stable hardware id.
//! - **Connection state machine** - [`DacConnection`] owns the device
//!   handle and moves between `NotFound`, `Found`, and `FoundDisconnected`,
//!   reconnecting automatically when auto-connect is enabled.
//! - **Point handoff** - producers hand frames over with
//!   [`add_points`](DacConnection::add_points) /
//!   [`set_points`](DacConnection::set_points); a background loop drains
//!   the shared buffer to the device at the configured rate.
//! - **Failure policy** - disconnects demote the state rather than raising
//!   errors; recovery retries forever while enabled. Frames may be dropped
//!   under backpressure or disconnect; delivery is not guaranteed.
//!
//! # Getting Started
//!
//! The wire-level protocol lives behind the [`DacTransport`] /
//! [`DacHandle`] traits; wire a driver implementation into a registry and
//! hand it to a connection:
//!
//! ```ignore
//! use laser_stream::{DacConnection, DeviceRegistry, FramePoint};
//!
//! let mut registry = DeviceRegistry::new(Box::new(my_driver));
//! println!("visible DACs: {:?}", registry.list_devices()?);
//!
//! let conn = DacConnection::new(registry);
//! conn.setup(true, 0);          // connect to the lowest-id DAC, start loop
//! conn.set_auto_connect(true);  // reconnect on its own from now on
//!
//! loop {
//!     let frame: Vec<FramePoint> = render_next_frame();
//!     conn.set_points(&frame);  // latest frame wins; loop drains it
//! }
//! ```
//!
//! # Concurrency model
//!
//! One background streaming loop per instance, polling at ~1 ms. All
//! mutable state sits behind a single per-instance lock with non-blocking
//! acquisition: a producer call or worker cycle that cannot take the lock
//! skips its action instead of waiting. The only intentionally blocking
//! point is the transport's `wait_until_ready` inside the send path, and
//! only when wait-before-send is configured.
//!
//! # Point layout
//!
//! Frame sources supply [`FramePoint`] records; the transport consumes
//! [`DacPoint`](transport::DacPoint). The two are field-for-field
//! compatible by contract (see [`transport`]), and conversion is explicit -
//! the build fails if either record drifts from the documented layout.

pub mod buffer;
pub mod connection;
mod error;
pub mod registry;
pub mod transport;
pub mod types;
mod worker;

#[cfg(any(test, feature = "testutils"))]
pub mod sim;

// Crate-level error types
pub use error::{Error, Result};

// Connection lifecycle
pub use connection::DacConnection;

// Discovery
pub use registry::{DeviceRegistry, DISCOVERY_WINDOW};

// Point handoff
pub use buffer::PointBuffer;

// Transport seam
pub use transport::{to_dac_points, DacHandle, DacPoint, DacTransport, SyncFn};

// Core types
pub use types::{
    ConnEvent, ConnectionState, DacAddress, DacId, DacStatus, FramePoint, LinkState, StreamConfig,
    DEFAULT_PPS,
};
