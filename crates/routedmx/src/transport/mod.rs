// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datagram sources.
//!
//! The demultiplexer opens one socket per destination (LLS bootstrap,
//! service signaling, each extra ROUTE/FLUTE session) and only polls the
//! registered ones.

mod multicast;
mod sim;
mod udp;

pub use multicast::resolve_interface;
pub use sim::SimTransport;
pub use udp::UdpTransport;

use std::io;
use std::net::SocketAddrV4;
use std::time::Duration;

/// Opaque socket identifier handed out by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u32);

impl SocketId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// A set of datagram sockets that can be polled together.
///
/// `recv` returns `Ok(None)` when a socket has nothing pending and
/// `Err(UnexpectedEof)` once a finite source is exhausted.
pub trait Transport {
    /// Open a socket receiving `endpoint` (not registered yet).
    fn open(&mut self, endpoint: SocketAddrV4) -> io::Result<SocketId>;

    fn close(&mut self, socket: SocketId);

    /// Add or remove a socket from the polled set.
    fn set_registered(&mut self, socket: SocketId, registered: bool) -> io::Result<()>;

    /// Wait until registered sockets are readable; fills `ready`.
    fn poll(&mut self, timeout: Option<Duration>, ready: &mut Vec<SocketId>) -> io::Result<()>;

    fn recv(&mut self, socket: SocketId, buf: &mut [u8]) -> io::Result<Option<usize>>;
}
