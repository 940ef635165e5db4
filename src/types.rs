//! Core types for the DAC connection lifecycle.
//!
//! Provides the device identifier and addressing types, the connection
//! state machine data (state + event + pure transition function), stream
//! configuration, and the point record supplied by frame sources.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, hardware-assigned device identifier.
///
/// Persists across rescans; typically derived from the device's MAC or
/// serial number by the transport library.
pub type DacId = u64;

/// Default output rate applied by the setup operations.
pub const DEFAULT_PPS: u32 = 30_000;

/// How a connection instance addresses its device.
///
/// Ordinal addressing indexes into the *current* device list sorted
/// ascending by [`DacId`] and is therefore fragile to devices appearing or
/// disappearing between scans. Stable-id addressing always targets the same
/// physical device regardless of scan order. Re-setup after a disconnect
/// uses whichever mode the instance was originally configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DacAddress {
    /// Position in a registry snapshot sorted ascending by id.
    Ordinal(usize),
    /// Persistent hardware identifier.
    Id(DacId),
}

/// Connection state for a single DAC device instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConnectionState {
    /// No device handle; discovery has not succeeded yet.
    #[default]
    NotFound,
    /// Connected and streaming-eligible.
    Found,
    /// A handle exists but the device is not currently connected.
    FoundDisconnected,
}

/// Events driving the connection state machine.
///
/// The machine itself is the pure function [`ConnectionState::apply`]; all
/// I/O (discovery, connect calls, health probes) happens outside it and is
/// reported in as one of these events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnEvent {
    /// A connect call on a handle succeeded.
    Connected,
    /// A discovery or connect attempt failed.
    ConnectFailed,
    /// The health probe reported the link as down.
    ProbeFailed,
    /// A handle was obtained without connecting (deferred connect).
    FoundUnconnected,
    /// The handle was destroyed during teardown.
    TornDown,
}

impl ConnectionState {
    /// Returns the display name for this state.
    pub fn display_name(&self) -> &'static str {
        match self {
            ConnectionState::NotFound => "Not Found",
            ConnectionState::Found => "Found",
            ConnectionState::FoundDisconnected => "Disconnected",
        }
    }

    /// Returns true if the instance is connected and streaming-eligible.
    pub fn is_found(&self) -> bool {
        matches!(self, ConnectionState::Found)
    }

    /// Returns true if a device handle may exist in this state.
    pub fn has_handle(&self) -> bool {
        matches!(
            self,
            ConnectionState::Found | ConnectionState::FoundDisconnected
        )
    }

    /// Applies an event, returning the next state.
    ///
    /// Failures never advance the machine: a failed connect leaves the
    /// state where it was, so callers retry (or not) by policy rather than
    /// by exception.
    pub fn apply(self, event: ConnEvent) -> Self {
        match (self, event) {
            (_, ConnEvent::Connected) => ConnectionState::Found,
            (_, ConnEvent::FoundUnconnected) => ConnectionState::FoundDisconnected,
            (_, ConnEvent::TornDown) => ConnectionState::NotFound,
            (ConnectionState::Found, ConnEvent::ProbeFailed) => {
                ConnectionState::FoundDisconnected
            }
            (state, ConnEvent::ProbeFailed) => state,
            (state, ConnEvent::ConnectFailed) => state,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Health of a transport link as reported by a device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LinkState {
    /// No TCP/USB session established.
    #[default]
    Disconnected,
    /// Session established, idle.
    Ready,
    /// Session established, playback running.
    Running,
    /// Device closed the session.
    Shutdown,
    /// Protocol error left the session unusable.
    Broken,
}

impl LinkState {
    /// Returns true unless the link is shutdown, broken, or disconnected.
    pub fn is_healthy(&self) -> bool {
        matches!(self, LinkState::Ready | LinkState::Running)
    }
}

/// Configuration for a streaming connection instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StreamConfig {
    /// Points per second output rate.
    pub pps: u32,
    /// Block in `send()` until the device is ready instead of dropping the
    /// pending frame when it is not.
    pub wait_before_send: bool,
    /// Let the streaming loop (re)connect on its own while running.
    pub auto_connect: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            pps: DEFAULT_PPS,
            wait_before_send: false,
            auto_connect: false,
        }
    }
}

impl StreamConfig {
    /// Create a new configuration with the given PPS.
    pub fn new(pps: u32) -> Self {
        Self {
            pps,
            ..Default::default()
        }
    }
}

/// Low-level device status snapshot, reported verbatim by the handle.
///
/// Field meanings follow the Ether Dream status record; other transports
/// map their own status into the closest equivalents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DacStatus {
    /// Protocol revision spoken by the device.
    pub protocol: u8,
    /// Light engine state (0 ready, 1 warmup, 2 cooldown, 3 e-stop).
    pub light_engine_state: u8,
    /// Playback state (0 idle, 1 prepared, 2 playing).
    pub playback_state: u8,
    /// Active data source.
    pub source: u8,
    /// Light engine flag bits.
    pub light_engine_flags: u16,
    /// Playback flag bits.
    pub playback_flags: u16,
    /// Source flag bits.
    pub source_flags: u16,
    /// Points currently queued in the device buffer.
    pub buffer_fullness: u16,
    /// Current playback rate in points per second.
    pub point_rate: u32,
    /// Points played since playback began.
    pub point_count: u32,
}

/// A point record as supplied by the frame source.
///
/// The layout is the ILDA-style record used by frame generators: signed
/// 16-bit coordinates, unsigned 16-bit color channels, two user channels.
/// It is field-for-field convertible to the transport's native
/// [`DacPoint`](crate::transport::DacPoint); see `transport` for the layout
/// contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(C)]
pub struct FramePoint {
    /// X coordinate, -32768 (left) to 32767 (right).
    pub x: i16,
    /// Y coordinate, -32768 (bottom) to 32767 (top).
    pub y: i16,
    /// Red channel (0-65535).
    pub r: u16,
    /// Green channel (0-65535).
    pub g: u16,
    /// Blue channel (0-65535).
    pub b: u16,
    /// Intensity (0-65535).
    pub i: u16,
    /// User channel 1.
    pub u1: u16,
    /// User channel 2.
    pub u2: u16,
}

impl FramePoint {
    /// Creates a new point with full user channels zeroed.
    pub fn new(x: i16, y: i16, r: u16, g: u16, b: u16, i: u16) -> Self {
        Self {
            x,
            y,
            r,
            g,
            b,
            i,
            u1: 0,
            u2: 0,
        }
    }

    /// Creates a blanked point (laser off) at the given position.
    pub fn blanked(x: i16, y: i16) -> Self {
        Self {
            x,
            y,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_event_reaches_found_from_every_state() {
        for state in [
            ConnectionState::NotFound,
            ConnectionState::Found,
            ConnectionState::FoundDisconnected,
        ] {
            assert_eq!(state.apply(ConnEvent::Connected), ConnectionState::Found);
        }
    }

    #[test]
    fn test_connect_failure_leaves_state_unchanged() {
        for state in [
            ConnectionState::NotFound,
            ConnectionState::Found,
            ConnectionState::FoundDisconnected,
        ] {
            assert_eq!(state.apply(ConnEvent::ConnectFailed), state);
        }
    }

    #[test]
    fn test_probe_failure_only_demotes_found() {
        assert_eq!(
            ConnectionState::Found.apply(ConnEvent::ProbeFailed),
            ConnectionState::FoundDisconnected
        );
        assert_eq!(
            ConnectionState::NotFound.apply(ConnEvent::ProbeFailed),
            ConnectionState::NotFound
        );
        assert_eq!(
            ConnectionState::FoundDisconnected.apply(ConnEvent::ProbeFailed),
            ConnectionState::FoundDisconnected
        );
    }

    #[test]
    fn test_teardown_always_returns_to_not_found() {
        for state in [
            ConnectionState::NotFound,
            ConnectionState::Found,
            ConnectionState::FoundDisconnected,
        ] {
            assert_eq!(state.apply(ConnEvent::TornDown), ConnectionState::NotFound);
        }
    }

    #[test]
    fn test_deferred_connect_parks_in_found_disconnected() {
        assert_eq!(
            ConnectionState::NotFound.apply(ConnEvent::FoundUnconnected),
            ConnectionState::FoundDisconnected
        );
    }

    #[test]
    fn test_state_display_names() {
        assert_eq!(ConnectionState::NotFound.to_string(), "Not Found");
        assert_eq!(ConnectionState::Found.to_string(), "Found");
        assert_eq!(ConnectionState::FoundDisconnected.to_string(), "Disconnected");
    }

    #[test]
    fn test_handle_presence_matches_state() {
        assert!(!ConnectionState::NotFound.has_handle());
        assert!(ConnectionState::Found.has_handle());
        assert!(ConnectionState::FoundDisconnected.has_handle());
    }

    #[test]
    fn test_link_health_classification() {
        assert!(LinkState::Ready.is_healthy());
        assert!(LinkState::Running.is_healthy());
        assert!(!LinkState::Shutdown.is_healthy());
        assert!(!LinkState::Broken.is_healthy());
        assert!(!LinkState::Disconnected.is_healthy());
    }

    #[test]
    fn test_stream_config_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.pps, DEFAULT_PPS);
        assert!(!config.wait_before_send);
        assert!(!config.auto_connect);
    }

    #[test]
    fn test_frame_point_blanked_zeroes_all_channels() {
        let point = FramePoint::blanked(-100, 200);
        assert_eq!(point.x, -100);
        assert_eq!(point.y, 200);
        assert_eq!(point.r, 0);
        assert_eq!(point.g, 0);
        assert_eq!(point.b, 0);
        assert_eq!(point.i, 0);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_stream_config_serde_roundtrip() {
        let config = StreamConfig {
            pps: 45_000,
            wait_before_send: true,
            auto_connect: true,
        };

        let json = serde_json::to_string(&config).expect("serialize to JSON");
        let restored: StreamConfig = serde_json::from_str(&json).expect("deserialize from JSON");

        assert_eq!(restored, config);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_connection_state_serde_roundtrip() {
        for state in [
            ConnectionState::NotFound,
            ConnectionState::Found,
            ConnectionState::FoundDisconnected,
        ] {
            let json = serde_json::to_string(&state).expect("serialize");
            let restored: ConnectionState = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(restored, state);
        }
    }
}
