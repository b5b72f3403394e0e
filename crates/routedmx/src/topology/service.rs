// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Services and their delivery sessions.

use std::net::SocketAddrV4;

use super::channel::Channel;
use super::Protocol;
use crate::object::ObjectHandle;
use crate::transport::SocketId;

/// Reception mode of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneMode {
    /// No socket registered.
    Off,
    /// Only service signaling (TSI 0) is processed.
    SlsOnly,
    /// Signaling and media.
    On,
}

/// Versions and digests of the last applied signaling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalingState {
    pub stsid_version: Option<u32>,
    pub manifest_version: Option<u32>,
    pub stsid_crc: Option<u32>,
    pub manifest_crc: Option<u32>,
    pub gateway_crc: Option<u32>,
}

/// A group of channels sharing one destination.
#[derive(Debug)]
pub struct Session {
    /// Destination, or `None` when sharing the service's bootstrap socket.
    pub(crate) endpoint: Option<SocketAddrV4>,
    pub(crate) socket: Option<SocketId>,
    pub(crate) registered: bool,
    pub(crate) channels: Vec<Channel>,
}

impl Session {
    pub fn new(endpoint: Option<SocketAddrV4>) -> Self {
        Self {
            endpoint,
            socket: None,
            registered: false,
            channels: Vec::new(),
        }
    }

    pub fn endpoint(&self) -> Option<SocketAddrV4> {
        self.endpoint
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Socket is open and polled.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn active_channels(&self) -> usize {
        self.channels.iter().filter(|c| c.active).count()
    }
}

/// A broadcast or multicast service.
#[derive(Debug)]
pub struct Service {
    pub(crate) id: u32,
    pub(crate) protocol: Protocol,
    pub(crate) endpoint: SocketAddrV4,
    pub(crate) socket: Option<SocketId>,
    pub(crate) registered: bool,
    pub(crate) tune: TuneMode,
    pub(crate) sessions: Vec<Session>,
    pub(crate) objects: Vec<ObjectHandle>,
    pub(crate) last_active: Option<ObjectHandle>,
    /// Last completed signaling TOI on TSI 0 (ROUTE).
    pub(crate) last_signaling_toi: Option<u32>,
    pub(crate) signaling: SignalingState,
    pub(crate) tag: Option<u64>,
    pub(crate) manifest_locator: Option<String>,
    /// Declared by configuration rather than by the SLT.
    pub(crate) declared: bool,
}

impl Service {
    pub(crate) fn new(id: u32, protocol: Protocol, endpoint: SocketAddrV4) -> Self {
        Self {
            id,
            protocol,
            endpoint,
            socket: None,
            registered: false,
            tune: TuneMode::Off,
            sessions: Vec::new(),
            objects: Vec::new(),
            last_active: None,
            last_signaling_toi: None,
            signaling: SignalingState::default(),
            tag: None,
            manifest_locator: None,
            declared: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Bootstrap (service signaling) destination.
    pub fn endpoint(&self) -> SocketAddrV4 {
        self.endpoint
    }

    pub fn tune_mode(&self) -> TuneMode {
        self.tune
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn signaling(&self) -> &SignalingState {
        &self.signaling
    }

    /// Caller-owned tag.
    pub fn tag(&self) -> Option<u64> {
        self.tag
    }

    /// Manifest URL announced by a gateway configuration.
    pub fn manifest_locator(&self) -> Option<&str> {
        self.manifest_locator.as_deref()
    }

    /// Objects currently tracked.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn channel(&self, tsi: u32) -> Option<&Channel> {
        self.sessions
            .iter()
            .flat_map(|s| s.channels.iter())
            .find(|c| c.tsi() == tsi)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.sessions.iter().flat_map(|s| s.channels.iter())
    }

    /// `(session index, channel index)` of a TSI.
    pub(crate) fn locate(&self, tsi: u32) -> Option<(usize, usize)> {
        self.sessions.iter().enumerate().find_map(|(si, s)| {
            s.channels
                .iter()
                .position(|c| c.tsi() == tsi)
                .map(|ci| (si, ci))
        })
    }

    pub(crate) fn channel_mut(&mut self, tsi: u32) -> Option<&mut Channel> {
        self.sessions
            .iter_mut()
            .flat_map(|s| s.channels.iter_mut())
            .find(|c| c.tsi() == tsi)
    }

    pub(crate) fn session_for_socket(&self, socket: SocketId) -> Option<usize> {
        self.sessions.iter().position(|s| s.socket == Some(socket))
    }

    /// Socket arrival matches the session holding the channel.
    ///
    /// `arrival` is `None` for the bootstrap socket.
    pub(crate) fn arrival_matches(&self, session: usize, arrival: Option<usize>) -> bool {
        match arrival {
            Some(a) => a == session,
            None => self.sessions[session].endpoint.is_none(),
        }
    }
}
