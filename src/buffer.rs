//! The shared point buffer between frame producers and the streaming loop.
//!
//! A `PointBuffer` is an ordered sequence of [`FramePoint`]s owned by a
//! connection instance and guarded by that instance's single lock.
//! Producers append ([`append`](PointBuffer::append)) or replace wholesale
//! ([`replace`](PointBuffer::replace)); only the streaming loop's send path
//! drains it, and it is cleared after every drain attempt regardless of
//! whether the write succeeded, so memory stays bounded and stale frames
//! are never replayed.

use crate::types::FramePoint;

/// Ordered, wholesale-replaceable point sequence.
#[derive(Debug, Default)]
pub struct PointBuffer {
    points: Vec<FramePoint>,
}

impl PointBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends points in order. Empty input is a no-op.
    pub fn append(&mut self, points: &[FramePoint]) {
        if !points.is_empty() {
            self.points.extend_from_slice(points);
        }
    }

    /// Replaces the entire contents.
    pub fn replace(&mut self, points: &[FramePoint]) {
        self.points.clear();
        self.points.extend_from_slice(points);
    }

    /// Discards all points.
    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Current contents, in producer call order.
    pub fn points(&self) -> &[FramePoint] {
        &self.points
    }

    /// Drains the buffer, leaving it empty.
    pub fn take(&mut self) -> Vec<FramePoint> {
        std::mem::take(&mut self.points)
    }

    /// Returns true when no points are pending.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of pending points.
    pub fn len(&self) -> usize {
        self.points.len()
    }
}
