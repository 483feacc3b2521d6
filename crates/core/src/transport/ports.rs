use std::collections::HashMap;
use std::net::SocketAddr;

use parking_lot::Mutex;
use tokio::net::UdpSocket;

use crate::error::{Result, StreamError};
use crate::protocol::AddressFamily;

pub const DEFAULT_PORT_RANGE_START: u16 = 40000;
pub const DEFAULT_PORT_RANGE_END: u16 = 60000;

/// Candidates that fail the bind check before a reservation gives up.
const MAX_PROBE_ATTEMPTS: usize = 32;

/// Inclusive range of UDP ports the reservoir hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_RANGE_START, DEFAULT_PORT_RANGE_END)
    }
}

#[derive(Debug)]
struct ReservoirState {
    /// Ports currently reserved, with the family they were validated on.
    in_use: HashMap<u16, AddressFamily>,
    /// Where the next scan starts, so freed ports are not reused at once.
    cursor: u16,
}

/// Process-wide pool of local UDP ports for RTP/RTCP.
///
/// Transcoders can only be told an RTP port; by convention they use
/// RTP + 1 for RTCP. Paired reservations therefore return an even port `n`
/// with `n + 1` also reserved, or fail; they never return two unrelated
/// ports.
///
/// A reservation is claimed under the lock, then validated outside it by
/// binding a UDP socket on the requested family. Concurrent callers never
/// receive the same port. Failures are reported to the caller, which owns
/// the all-or-nothing cleanup of its other reservations.
#[derive(Debug)]
pub struct PortReservoir {
    range: PortRange,
    state: Mutex<ReservoirState>,
}

impl PortReservoir {
    pub fn new() -> Self {
        Self::with_range(PortRange::default())
    }

    pub fn with_range(range: PortRange) -> Self {
        Self {
            range,
            state: Mutex::new(ReservoirState {
                in_use: HashMap::new(),
                cursor: range.start,
            }),
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Reserve one port, or a contiguous even/odd pair when `count == 2`.
    ///
    /// Returns the first (lowest) port of the reservation.
    pub async fn reserve(&self, family: AddressFamily, count: u8) -> Result<u16> {
        let failed = StreamError::PortReservationFailed { family, count };
        if count != 1 && count != 2 {
            return Err(failed);
        }

        for _ in 0..MAX_PROBE_ATTEMPTS {
            let Some(port) = self.claim(family, count) else {
                tracing::warn!(%family, count, range = ?self.range, "port range exhausted");
                return Err(failed);
            };

            if probe(family, port, count).await {
                tracing::trace!(%family, port, count, "reserved ports");
                return Ok(port);
            }

            tracing::debug!(%family, port, count, "port busy outside the reservoir, skipping");
            self.release(port, count);
        }

        tracing::warn!(%family, count, "no bindable port found");
        Err(failed)
    }

    /// Release a port reservation. Freeing an unreserved port is a no-op.
    pub fn free(&self, port: u16) {
        if self.state.lock().in_use.remove(&port).is_some() {
            tracing::trace!(port, "released port");
        } else {
            tracing::debug!(port, "release of a port that was not reserved");
        }
    }

    /// Number of ports in the range not currently reserved.
    pub fn available(&self) -> usize {
        self.range.len() - self.state.lock().in_use.len()
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        self.state.lock().in_use.contains_key(&port)
    }

    /// Mark the next free candidate in use and return its first port.
    fn claim(&self, family: AddressFamily, count: u8) -> Option<u16> {
        let mut state = self.state.lock();
        let span = self.range.len();
        let mut candidate = state.cursor;

        for _ in 0..span {
            if !self.range.contains(candidate) {
                candidate = self.range.start;
            }

            let free = |p: u16| !state.in_use.contains_key(&p);
            let fits = if count == 2 {
                candidate % 2 == 0
                    && candidate < self.range.end
                    && free(candidate)
                    && free(candidate + 1)
            } else {
                free(candidate)
            };

            if fits {
                for p in candidate..=candidate + (count as u16 - 1) {
                    state.in_use.insert(p, family);
                }
                state.cursor = candidate.wrapping_add(count as u16);
                return Some(candidate);
            }

            candidate = candidate.wrapping_add(1);
        }

        None
    }

    fn release(&self, port: u16, count: u8) {
        let mut state = self.state.lock();
        for p in port..=port + (count as u16 - 1) {
            state.in_use.remove(&p);
        }
    }
}

impl Default for PortReservoir {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that every port of a reservation can be bound right now.
async fn probe(family: AddressFamily, port: u16, count: u8) -> bool {
    let mut sockets = Vec::with_capacity(count as usize);
    for p in port..=port + (count as u16 - 1) {
        match UdpSocket::bind(SocketAddr::new(family.unspecified(), p)).await {
            Ok(socket) => sockets.push(socket),
            Err(_) => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn single_port_within_range() {
        let reservoir = PortReservoir::with_range(PortRange::new(41000, 41019));
        let port = reservoir.reserve(AddressFamily::Ipv4, 1).await.unwrap();
        assert!((41000..=41019).contains(&port));
        assert!(reservoir.is_reserved(port));
        assert_eq!(reservoir.available(), 19);
    }

    #[tokio::test]
    async fn pair_is_contiguous_and_even() {
        let reservoir = PortReservoir::with_range(PortRange::new(41101, 41140));
        for _ in 0..5 {
            let port = reservoir.reserve(AddressFamily::Ipv4, 2).await.unwrap();
            assert_eq!(port % 2, 0);
            assert!(reservoir.is_reserved(port));
            assert!(reservoir.is_reserved(port + 1));
        }
    }

    #[tokio::test]
    async fn pair_fails_without_contiguous_ports() {
        // 41200, 41201, 41202: after taking 41200 the only even candidate
        // left is 41202, whose partner is outside the range.
        let reservoir = PortReservoir::with_range(PortRange::new(41200, 41202));
        assert_eq!(reservoir.reserve(AddressFamily::Ipv4, 1).await.unwrap(), 41200);
        assert!(matches!(
            reservoir.reserve(AddressFamily::Ipv4, 2).await,
            Err(StreamError::PortReservationFailed { count: 2, .. })
        ));
        // Failure leaves no partial reservation behind.
        assert_eq!(reservoir.available(), 2);
    }

    #[tokio::test]
    async fn exhausted_range_fails() {
        let reservoir = PortReservoir::with_range(PortRange::new(41300, 41301));
        reservoir.reserve(AddressFamily::Ipv4, 1).await.unwrap();
        reservoir.reserve(AddressFamily::Ipv4, 1).await.unwrap();
        assert!(reservoir.reserve(AddressFamily::Ipv4, 1).await.is_err());
    }

    #[tokio::test]
    async fn invalid_count_rejected() {
        let reservoir = PortReservoir::with_range(PortRange::new(41400, 41409));
        assert!(reservoir.reserve(AddressFamily::Ipv4, 0).await.is_err());
        assert!(reservoir.reserve(AddressFamily::Ipv4, 3).await.is_err());
        assert_eq!(reservoir.available(), 10);
    }

    #[tokio::test]
    async fn free_returns_ports_to_pool() {
        let reservoir = PortReservoir::with_range(PortRange::new(41500, 41509));
        let before = reservoir.available();
        let single = reservoir.reserve(AddressFamily::Ipv4, 1).await.unwrap();
        let pair = reservoir.reserve(AddressFamily::Ipv4, 2).await.unwrap();
        assert_eq!(reservoir.available(), before - 3);

        reservoir.free(single);
        reservoir.free(pair);
        reservoir.free(pair + 1);
        // Double free is harmless.
        reservoir.free(single);
        assert_eq!(reservoir.available(), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reservations_are_unique() {
        let reservoir = Arc::new(PortReservoir::with_range(PortRange::new(41600, 41679)));
        let mut tasks = Vec::new();
        for i in 0..20 {
            let reservoir = reservoir.clone();
            tasks.push(tokio::spawn(async move {
                let count = if i % 2 == 0 { 1 } else { 2 };
                let port = reservoir.reserve(AddressFamily::Ipv4, count).await.unwrap();
                (port, count)
            }));
        }

        let mut seen = HashSet::new();
        for task in tasks {
            let (port, count) = task.await.unwrap();
            for p in port..port + count as u16 {
                assert!(seen.insert(p), "port {p} handed out twice");
            }
        }
        assert_eq!(reservoir.available(), 80 - seen.len());
    }
}
