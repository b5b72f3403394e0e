// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP multicast transport (socket2 setup, mio readiness).

use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};

use super::multicast::{join_group, resolve_interface};
use super::{SocketId, Transport};

struct Entry {
    socket: UdpSocket,
    endpoint: SocketAddrV4,
    registered: bool,
}

/// Live network transport.
///
/// Every socket binds `0.0.0.0:port` with `SO_REUSEADDR` so several
/// sessions sharing a port can coexist, then joins its destination group.
pub struct UdpTransport {
    poll: Poll,
    events: Events,
    sockets: HashMap<SocketId, Entry>,
    next_id: u32,
    interface: Ipv4Addr,
    recv_buffer_size: usize,
}

impl UdpTransport {
    pub fn new(interface: Option<&str>, recv_buffer_size: usize) -> io::Result<Self> {
        let interface = resolve_interface(interface)?;
        log::debug!("[UDP] transport ready (interface {})", interface);
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(64),
            sockets: HashMap::new(),
            next_id: 1,
            interface,
            recv_buffer_size,
        })
    }

    pub fn interface(&self) -> Ipv4Addr {
        self.interface
    }

    fn create_socket(&self, endpoint: SocketAddrV4) -> io::Result<std::net::UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if self.recv_buffer_size > 0 {
            if let Err(e) = socket.set_recv_buffer_size(self.recv_buffer_size) {
                log::warn!(
                    "[UDP] failed to set receive buffer to {} bytes: {}",
                    self.recv_buffer_size,
                    e
                );
            }
        }
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, endpoint.port());
        socket.bind(&SocketAddr::V4(bind_addr).into())?;
        join_group(&socket, *endpoint.ip(), self.interface)?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    }
}

impl Transport for UdpTransport {
    fn open(&mut self, endpoint: SocketAddrV4) -> io::Result<SocketId> {
        let std_socket = self.create_socket(endpoint)?;
        let id = SocketId::new(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.sockets.insert(
            id,
            Entry {
                socket: UdpSocket::from_std(std_socket),
                endpoint,
                registered: false,
            },
        );
        log::debug!("[UDP] opened socket {} for {}", id.raw(), endpoint);
        Ok(id)
    }

    fn close(&mut self, socket: SocketId) {
        if let Some(mut entry) = self.sockets.remove(&socket) {
            if entry.registered {
                let _ = self.poll.registry().deregister(&mut entry.socket);
            }
            log::debug!("[UDP] closed socket {} ({})", socket.raw(), entry.endpoint);
        }
    }

    fn set_registered(&mut self, socket: SocketId, registered: bool) -> io::Result<()> {
        let entry = self
            .sockets
            .get_mut(&socket)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown socket"))?;
        if entry.registered == registered {
            return Ok(());
        }
        let token = Token(socket.raw() as usize);
        if registered {
            self.poll
                .registry()
                .register(&mut entry.socket, token, Interest::READABLE)?;
        } else {
            self.poll.registry().deregister(&mut entry.socket)?;
        }
        entry.registered = registered;
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>, ready: &mut Vec<SocketId>) -> io::Result<()> {
        ready.clear();
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }
        for event in self.events.iter() {
            let id = SocketId::new(event.token().0 as u32);
            if event.is_readable() && !ready.contains(&id) {
                ready.push(id);
            }
        }
        Ok(())
    }

    fn recv(&mut self, socket: SocketId, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let Some(entry) = self.sockets.get(&socket) else {
            return Ok(None);
        };
        match entry.socket.recv_from(buf) {
            Ok((n, _)) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}
