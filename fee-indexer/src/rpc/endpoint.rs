//! Endpoint selection state for a failover client

/// Tracks which upstream a client should talk to next.
///
/// `sticky` pins the endpoint that last answered successfully; `next` is the
/// round-robin pointer used while nothing is pinned. Every mutation goes
/// through this type so callers can hold it behind a single lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSelector {
    len: usize,
    sticky: Option<usize>,
    next: usize,
    rotations: u64,
}

impl EndpointSelector {
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "endpoint selector needs at least one endpoint");
        Self {
            len,
            sticky: None,
            next: 0,
            rotations: 0,
        }
    }

    /// Endpoint the next attempt should use.
    pub fn current(&self) -> usize {
        self.sticky.unwrap_or(self.next)
    }

    pub fn sticky(&self) -> Option<usize> {
        self.sticky
    }

    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    pub fn record_success(&mut self, index: usize) {
        self.sticky = Some(index);
    }

    /// Unpins and advances past `index` if it is still the current endpoint.
    ///
    /// A failure reported for an endpoint that is no longer current came from a
    /// concurrent call that started before the last rotation and is ignored.
    /// Returns whether a rotation happened.
    pub fn record_failure(&mut self, index: usize) -> bool {
        if self.current() != index {
            return false;
        }
        self.sticky = None;
        self.next = (index + 1) % self.len;
        self.rotations += 1;
        true
    }
}
