// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory transport for replaying captures and tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddrV4;
use std::time::Duration;

use super::{SocketId, Transport};

struct SimSocket {
    endpoint: SocketAddrV4,
    registered: bool,
}

/// Datagrams are queued per destination in injection order and consumed
/// by whichever open socket on that destination reads first.
#[derive(Default)]
pub struct SimTransport {
    sockets: HashMap<SocketId, SimSocket>,
    queues: HashMap<SocketAddrV4, VecDeque<Vec<u8>>>,
    next_id: u32,
    finished: bool,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&mut self, endpoint: SocketAddrV4, datagram: impl Into<Vec<u8>>) {
        self.queues
            .entry(endpoint)
            .or_default()
            .push_back(datagram.into());
    }

    /// No more datagrams will be injected; once every queue is drained,
    /// `poll` and `recv` report `UnexpectedEof`.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn pending(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_open(&self, endpoint: SocketAddrV4) -> bool {
        self.sockets.values().any(|s| s.endpoint == endpoint)
    }

    pub fn is_registered(&self, endpoint: SocketAddrV4) -> bool {
        self.sockets
            .values()
            .any(|s| s.endpoint == endpoint && s.registered)
    }

    fn socket_endpoint(&self, socket: SocketId) -> Option<SocketAddrV4> {
        self.sockets.get(&socket).map(|s| s.endpoint)
    }
}

impl Transport for SimTransport {
    fn open(&mut self, endpoint: SocketAddrV4) -> io::Result<SocketId> {
        self.next_id += 1;
        let id = SocketId::new(self.next_id);
        self.sockets.insert(
            id,
            SimSocket {
                endpoint,
                registered: false,
            },
        );
        Ok(id)
    }

    fn close(&mut self, socket: SocketId) {
        self.sockets.remove(&socket);
    }

    fn set_registered(&mut self, socket: SocketId, registered: bool) -> io::Result<()> {
        match self.sockets.get_mut(&socket) {
            Some(s) => {
                s.registered = registered;
                Ok(())
            }
            None => Err(io::Error::new(io::ErrorKind::NotFound, "unknown socket")),
        }
    }

    fn poll(&mut self, _timeout: Option<Duration>, ready: &mut Vec<SocketId>) -> io::Result<()> {
        ready.clear();
        let mut ids: Vec<SocketId> = self
            .sockets
            .iter()
            .filter(|(_, s)| s.registered)
            .filter(|(_, s)| self.queues.get(&s.endpoint).is_some_and(|q| !q.is_empty()))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ready.extend(ids);
        if ready.is_empty() && self.finished {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "simulated stream finished",
            ));
        }
        Ok(())
    }

    fn recv(&mut self, socket: SocketId, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let Some(endpoint) = self.socket_endpoint(socket) else {
            return Ok(None);
        };
        match self.queues.get_mut(&endpoint).and_then(VecDeque::pop_front) {
            Some(datagram) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(Some(n))
            }
            None if self.finished && self.pending() == 0 => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "simulated stream finished",
            )),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ep(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(239, 0, 0, 1), port)
    }

    #[test]
    fn test_only_registered_sockets_are_ready() {
        let mut t = SimTransport::new();
        let a = t.open(ep(1000)).unwrap();
        let _b = t.open(ep(2000)).unwrap();
        t.inject(ep(1000), vec![1, 2, 3]);
        t.inject(ep(2000), vec![4]);

        let mut ready = Vec::new();
        t.poll(None, &mut ready).unwrap();
        assert!(ready.is_empty());

        t.set_registered(a, true).unwrap();
        t.poll(None, &mut ready).unwrap();
        assert_eq!(ready, vec![a]);

        let mut buf = [0u8; 16];
        assert_eq!(t.recv(a, &mut buf).unwrap(), Some(3));
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(t.recv(a, &mut buf).unwrap(), None);
        assert!(t.is_registered(ep(1000)));
        assert!(!t.is_registered(ep(2000)));
    }

    #[test]
    fn test_finish_reports_eof_after_drain() {
        let mut t = SimTransport::new();
        let a = t.open(ep(1000)).unwrap();
        t.set_registered(a, true).unwrap();
        t.inject(ep(1000), vec![9]);
        t.finish();

        let mut ready = Vec::new();
        t.poll(None, &mut ready).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(t.recv(a, &mut buf).unwrap(), Some(1));
        let err = t.poll(None, &mut ready).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
