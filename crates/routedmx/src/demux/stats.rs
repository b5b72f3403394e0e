// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reception counters.

use std::time::{Duration, Instant};

use crate::error::Error;

/// Demultiplexer statistics.
#[derive(Debug, Default, Clone)]
pub struct DemuxStats {
    /// Datagrams received.
    pub packets: u64,
    /// Datagram bytes received.
    pub bytes: u64,
    /// Arrival of the first datagram.
    pub first_packet: Option<Instant>,
    /// Arrival of the latest datagram.
    pub last_packet: Option<Instant>,
    /// Packets with an unparseable LCT header.
    pub malformed: u64,
    /// Packets declaring an implausible length or offset.
    pub oversize: u64,
    /// Packets for a TSI absent from the topology.
    pub unknown_channel: u64,
    /// Fragments for objects already dispatched.
    pub late: u64,
    /// Signaling payloads rejected.
    pub signaling_errors: u64,
    /// Receive or poll failures.
    pub transport_errors: u64,
    /// Other per-datagram failures.
    pub other_errors: u64,
    /// Payloads dropped on inactive channels.
    pub discarded: u64,
    /// Objects dispatched complete.
    pub objects_completed: u64,
    /// Objects dispatched with gaps.
    pub objects_partial: u64,
}

impl DemuxStats {
    pub(crate) fn record_packet(&mut self, len: usize, now: Instant) {
        self.packets += 1;
        self.bytes += len as u64;
        self.first_packet.get_or_insert(now);
        self.last_packet = Some(now);
    }

    pub(crate) fn record_error(&mut self, error: &Error) {
        match error {
            Error::MalformedHeader(_) => self.malformed += 1,
            Error::InvalidDeclaredSize { .. } => self.oversize += 1,
            Error::UnknownChannel { .. } => self.unknown_channel += 1,
            Error::StaleOrDuplicate { .. } => self.late += 1,
            Error::SignalingParse(_) | Error::Decompress(_) => self.signaling_errors += 1,
            Error::Transport(_) | Error::TransportSetup { .. } => self.transport_errors += 1,
            _ => self.other_errors += 1,
        }
    }

    /// Time between the first and the latest datagram.
    pub fn receive_duration(&self) -> Option<Duration> {
        Some(self.last_packet?.saturating_duration_since(self.first_packet?))
    }

    /// Mean bit rate over the receive duration.
    pub fn bitrate(&self) -> Option<f64> {
        let secs = self.receive_duration()?.as_secs_f64();
        (secs > 0.0).then(|| self.bytes as f64 * 8.0 / secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_accounting() {
        let mut stats = DemuxStats::default();
        let t0 = Instant::now();
        stats.record_packet(100, t0);
        stats.record_packet(50, t0 + Duration::from_secs(1));
        assert_eq!(stats.packets, 2);
        assert_eq!(stats.bytes, 150);
        assert_eq!(stats.receive_duration(), Some(Duration::from_secs(1)));
        assert_eq!(stats.bitrate(), Some(1200.0));
    }

    #[test]
    fn test_error_classes() {
        let mut stats = DemuxStats::default();
        stats.record_error(&Error::MalformedHeader("x".into()));
        stats.record_error(&Error::UnknownChannel { tsi: 1, toi: 2 });
        stats.record_error(&Error::StaleOrDuplicate { tsi: 1, toi: 2 });
        stats.record_error(&Error::SignalingParse("bad".into()));
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.unknown_channel, 1);
        assert_eq!(stats.late, 1);
        assert_eq!(stats.signaling_errors, 1);
    }
}
