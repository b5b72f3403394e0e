// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The demultiplexer.
//!
//! ```text
//! Transport::poll ─► recv ─► handle_datagram
//!                               ├── LLS socket  ─► SLT ─► services
//!                               └── service / session socket
//!                                     ├── route::process_datagram
//!                                     └── flute::process_datagram
//!                                            └── gather ─► dispatch ─► listener
//! ```
//!
//! Processing is single-threaded: [`Demux::process`] drains the readable
//! sockets once and returns. Object bytes reach the listener through shared
//! [`ObjectBlob`](crate::object::ObjectBlob) handles that stay valid after
//! the callback.

mod admin;
mod bootstrap;
mod flute;
mod gather;
mod route;
mod signaling;
mod sockets;
mod stats;

pub use stats::DemuxStats;

use std::io;
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use crate::config::{ConfigError, DemuxConfig};
use crate::dispatch::{DemuxEvent, DemuxListener, DispatchPolicy};
use crate::error::{Error, Result};
use crate::lct::LctLimits;
use crate::object::ObjectArena;
use crate::signaling::LLS_ENDPOINT;
use crate::topology::{
    ChannelDecl, Protocol, Service, ServiceSelector, Session, TuneMode,
};
use crate::transport::{SocketId, Transport};

/// Largest UDP payload.
const RECV_BUFFER_SIZE: usize = 65536;
/// Consecutive receive failures taken as the end of the input.
const MAX_CONSECUTIVE_ERRORS: u32 = 8;

/// Outcome of one [`Demux::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// No datagram was ready.
    Idle,
    /// Number of datagrams handled.
    Processed(usize),
    /// The transport is exhausted; pending objects were flushed.
    EndOfStream,
}

/// Listener slot.
#[derive(Default)]
pub(crate) struct EventSink {
    listener: Option<Box<dyn DemuxListener>>,
}

impl EventSink {
    pub fn emit(&mut self, event: DemuxEvent<'_>) {
        if let Some(listener) = self.listener.as_mut() {
            listener.on_event(event);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.listener.is_some()
    }
}

/// State shared by every service.
pub(crate) struct Core<T> {
    pub config: DemuxConfig,
    pub limits: LctLimits,
    pub transport: T,
    pub arena: ObjectArena,
    pub events: EventSink,
    pub stats: DemuxStats,
    /// Selector applied to services discovered later.
    pub selector: ServiceSelector,
    pub tune_all_sls: bool,
}

pub(crate) fn protocol_tag(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Route => "[ROUTE]",
        Protocol::Flute => "[FLUTE]",
    }
}

/// ROUTE/FLUTE object demultiplexer over a [`Transport`].
pub struct Demux<T: Transport> {
    core: Core<T>,
    services: Vec<Service>,
    lls_socket: Option<SocketId>,
    lls_versions: [Option<u8>; 4],
    recv_buf: Vec<u8>,
    ready: Vec<SocketId>,
    consecutive_errors: u32,
}

impl<T: Transport> Demux<T> {
    /// Create a demultiplexer without listener.
    ///
    /// Opens the LLS bootstrap socket when `atsc3_lls` is set and every
    /// statically declared service.
    pub fn new(config: DemuxConfig, transport: T) -> Result<Self> {
        Self::build(config, transport, EventSink::default())
    }

    /// Create a demultiplexer delivering events to `listener`.
    pub fn with_listener<L>(config: DemuxConfig, transport: T, listener: L) -> Result<Self>
    where
        L: DemuxListener + 'static,
    {
        Self::build(
            config,
            transport,
            EventSink {
                listener: Some(Box::new(listener)),
            },
        )
    }

    fn build(config: DemuxConfig, transport: T, events: EventSink) -> Result<Self> {
        config.validate()?;
        let limits = config.limits();
        let selector = config.tune;
        let tune_all_sls = config.tune_all_sls;
        let declared = config.services.clone();

        let mut demux = Self {
            core: Core {
                config,
                limits,
                transport,
                arena: ObjectArena::new(),
                events,
                stats: DemuxStats::default(),
                selector,
                tune_all_sls,
            },
            services: Vec::new(),
            lls_socket: None,
            lls_versions: [None; 4],
            recv_buf: vec![0; RECV_BUFFER_SIZE],
            ready: Vec::new(),
            consecutive_errors: 0,
        };

        if demux.core.config.atsc3_lls {
            let socket = demux
                .core
                .transport
                .open(LLS_ENDPOINT)
                .map_err(|source| Error::TransportSetup {
                    endpoint: LLS_ENDPOINT,
                    source,
                })?;
            demux.core.transport.set_registered(socket, true)?;
            demux.lls_socket = Some(socket);
            log::info!("[SLT] listening for LLS tables on {}", LLS_ENDPOINT);
        }

        for svc in declared {
            demux.create_service(svc.id, svc.protocol, svc.endpoint(), true)?;
        }
        Ok(demux)
    }

    /// Replace the event listener.
    pub fn set_listener<L: DemuxListener + 'static>(&mut self, listener: L) {
        self.core.events.listener = Some(Box::new(listener));
    }

    pub fn clear_listener(&mut self) {
        self.core.events.listener = None;
    }

    /// Declare a service outside of the SLT.
    pub fn add_service(&mut self, id: u32, protocol: Protocol, endpoint: SocketAddrV4) -> Result<()> {
        if self.has_service(id) {
            return Err(Error::Config(ConfigError::Invalid(format!(
                "service {} already declared",
                id
            ))));
        }
        self.create_service(id, protocol, endpoint, true)
    }

    pub(crate) fn create_service(
        &mut self,
        id: u32,
        protocol: Protocol,
        endpoint: SocketAddrV4,
        declared: bool,
    ) -> Result<()> {
        log::info!(
            "{} Setting up service {} destination {}",
            protocol_tag(protocol),
            id,
            endpoint
        );
        let mut svc = Service::new(id, protocol, endpoint);
        svc.declared = declared;
        if protocol == Protocol::Flute {
            let mut bootstrap = Session::new(None);
            bootstrap
                .channels
                .push(crate::topology::Channel::new(ChannelDecl::new(0)));
            svc.sessions.push(bootstrap);
        }
        svc.tune = self.initial_tune_mode(id);

        if let Err(e) = sockets::sync_service_sockets(&mut self.core, &mut svc) {
            log::error!(
                "{} Failed to set up service {} on {}: {}",
                protocol_tag(protocol),
                id,
                endpoint,
                e
            );
            sockets::close_service_sockets(&mut self.core, &mut svc);
            return Err(e);
        }
        self.services.push(svc);
        self.core.events.emit(DemuxEvent::ServiceFound { service_id: id });
        Ok(())
    }

    fn initial_tune_mode(&mut self, id: u32) -> TuneMode {
        match self.core.selector {
            ServiceSelector::All => TuneMode::On,
            ServiceSelector::Id(selected) if selected == id => TuneMode::On,
            ServiceSelector::First => {
                self.core.selector = ServiceSelector::Id(id);
                TuneMode::On
            }
            _ if self.core.tune_all_sls => TuneMode::SlsOnly,
            _ => TuneMode::Off,
        }
    }

    /// Select the services to receive.
    ///
    /// Services not selected keep their signaling flowing when
    /// `tune_all_sls` is set and are silenced otherwise. The selector also
    /// applies to services discovered afterwards.
    pub fn tune(&mut self, selector: ServiceSelector, tune_all_sls: bool) -> Result<()> {
        self.core.selector = selector;
        self.core.tune_all_sls = tune_all_sls;
        if selector == ServiceSelector::First {
            if let Some(first) = self.services.first() {
                self.core.selector = ServiceSelector::Id(first.id);
            }
        }

        let mut result = Ok(());
        for (i, svc) in self.services.iter_mut().enumerate() {
            let mode = if selector.selects(svc.id, i == 0) {
                TuneMode::On
            } else if tune_all_sls {
                TuneMode::SlsOnly
            } else {
                TuneMode::Off
            };
            if mode != svc.tune {
                log::info!("[ROUTE] Service {} tune {:?} -> {:?}", svc.id, svc.tune, mode);
                svc.tune = mode;
            }
            if let Err(e) = sockets::sync_service_sockets(&mut self.core, svc) {
                log::error!("[ROUTE] Service {} socket update failed: {}", svc.id, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Activate or deactivate a representation announced by the gateway
    /// configuration.
    ///
    /// Activating a representation deactivates the other representations of
    /// its adaptation set. Sockets of sessions left without active channel
    /// are unregistered.
    pub fn mark_active_quality(
        &mut self,
        service_id: u32,
        period: Option<&str>,
        adaptation_set: Option<&str>,
        representation: &str,
        active: bool,
    ) -> Result<()> {
        let svc = self
            .services
            .iter_mut()
            .find(|s| s.id == service_id)
            .ok_or(Error::UnknownService(service_id))?;

        let matched: Vec<(Option<String>, Option<String>)> = svc
            .channels()
            .filter_map(|c| c.representation())
            .filter(|r| r.matches(period, adaptation_set, representation))
            .map(|r| (r.period.clone(), r.adaptation_set.clone()))
            .collect();
        if matched.is_empty() {
            return Err(Error::ObjectNotFound(format!(
                "representation {} in service {}",
                representation, service_id
            )));
        }

        let mut deactivated = Vec::new();
        for channel in svc.sessions.iter_mut().flat_map(|s| s.channels.iter_mut()) {
            let Some(rep) = channel.decl.representation.as_ref() else {
                continue;
            };
            let state = if rep.matches(period, adaptation_set, representation) {
                active
            } else if active
                && matched
                    .iter()
                    .any(|(p, a)| rep.same_set(p.as_deref(), a.as_deref()))
            {
                false
            } else {
                continue;
            };
            if channel.active != state {
                log::info!(
                    "[MABR] Service {} TSI {} ({}) {}",
                    service_id,
                    channel.tsi(),
                    rep.representation,
                    if state { "activated" } else { "deactivated" }
                );
                channel.set_active(state);
                if !state {
                    deactivated.push(channel.tsi());
                }
            }
        }

        gather::release_channels(&mut self.core, svc, &deactivated, true);
        sockets::sync_service_sockets(&mut self.core, svc)
    }

    /// Wait up to `timeout` for readable sockets and handle their datagrams.
    pub fn process(&mut self, timeout: Option<Duration>) -> Result<ProcessStatus> {
        let mut ready = std::mem::take(&mut self.ready);
        let result = match self.core.transport.poll(timeout, &mut ready) {
            Ok(()) => Ok(self.drain(&ready)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(self.end_of_stream()),
            Err(e) => {
                self.core.stats.transport_errors += 1;
                self.consecutive_errors += 1;
                if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    log::warn!("[UDP] repeated poll failures ({}), ending stream", e);
                    Ok(self.end_of_stream())
                } else {
                    Err(Error::Transport(e))
                }
            }
        };
        self.ready = ready;

        if result.as_ref().is_ok_and(|s| *s != ProcessStatus::EndOfStream) {
            self.flush_expired(Instant::now());
        }
        result
    }

    fn drain(&mut self, ready: &[SocketId]) -> ProcessStatus {
        let mut buf = std::mem::take(&mut self.recv_buf);
        let mut handled = 0;
        let mut eof = false;

        'sockets: for &socket in ready {
            loop {
                match self.core.transport.recv(socket, &mut buf) {
                    Ok(Some(len)) => {
                        self.consecutive_errors = 0;
                        handled += 1;
                        // Errors are counted and logged by handle_datagram.
                        let _ = self.handle_datagram(socket, &buf[..len]);
                    }
                    Ok(None) => break,
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        eof = true;
                        break 'sockets;
                    }
                    Err(e) => {
                        self.core.stats.transport_errors += 1;
                        self.consecutive_errors += 1;
                        log::warn!("[UDP] receive on socket {} failed: {}", socket.raw(), e);
                        if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                            eof = true;
                            break 'sockets;
                        }
                        break;
                    }
                }
            }
        }
        self.recv_buf = buf;

        if eof {
            self.end_of_stream()
        } else if handled == 0 {
            ProcessStatus::Idle
        } else {
            ProcessStatus::Processed(handled)
        }
    }

    fn end_of_stream(&mut self) -> ProcessStatus {
        log::info!("[ROUTE] end of stream, flushing pending objects");
        self.flush_all();
        ProcessStatus::EndOfStream
    }

    /// Handle one datagram received on `socket`.
    ///
    /// Errors are counted in [`DemuxStats`] and logged before being
    /// returned; none of them leaves the demultiplexer in a bad state.
    pub fn handle_datagram(&mut self, socket: SocketId, data: &[u8]) -> Result<()> {
        let now = Instant::now();
        self.core.stats.record_packet(data.len(), now);
        let result = self.route_datagram(socket, data, now);
        if let Err(e) = &result {
            self.core.stats.record_error(e);
            match e {
                Error::MalformedHeader(_) | Error::UnknownChannel { .. } | Error::StaleOrDuplicate { .. } => {
                    log::debug!("[LCT] packet dropped: {}", e)
                }
                Error::InvalidDeclaredSize { .. } => log::warn!("[LCT] packet dropped: {}", e),
                _ => log::error!("[ROUTE] {}", e),
            }
        }
        result
    }

    fn route_datagram(&mut self, socket: SocketId, data: &[u8], now: Instant) -> Result<()> {
        if self.lls_socket == Some(socket) {
            return self.process_lls(data);
        }

        let found = self.services.iter().enumerate().find_map(|(i, s)| {
            if s.socket == Some(socket) {
                Some((i, None))
            } else {
                s.session_for_socket(socket).map(|si| (i, Some(si)))
            }
        });
        let Some((index, arrival)) = found else {
            log::debug!("[UDP] datagram on unassigned socket {}", socket.raw());
            return Ok(());
        };

        let svc = &mut self.services[index];
        if svc.tune == TuneMode::Off {
            return Ok(());
        }
        match svc.protocol {
            Protocol::Route => route::process_datagram(&mut self.core, svc, arrival, data, now),
            Protocol::Flute => flute::process_datagram(&mut self.core, svc, arrival, data, now),
        }
    }

    /// Finalize every object still in reception.
    ///
    /// Objects with data are dispatched (with gaps if incomplete), empty
    /// ones are recycled.
    pub fn flush_all(&mut self) {
        let now = Instant::now();
        for svc in &mut self.services {
            gather::flush_service(&mut self.core, svc, now, None);
        }
    }

    fn flush_expired(&mut self, now: Instant) {
        let Some(timeout) = self.core.config.reorder_timeout() else {
            return;
        };
        for svc in &mut self.services {
            gather::flush_service(&mut self.core, svc, now, Some(timeout));
        }
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn service(&self, service_id: u32) -> Option<&Service> {
        self.services.iter().find(|s| s.id == service_id)
    }

    pub fn has_service(&self, service_id: u32) -> bool {
        self.service(service_id).is_some()
    }

    pub(crate) fn service_mut(&mut self, service_id: u32) -> Result<&mut Service> {
        self.services
            .iter_mut()
            .find(|s| s.id == service_id)
            .ok_or(Error::UnknownService(service_id))
    }

    /// Attach an opaque tag to a service.
    pub fn set_service_tag(&mut self, service_id: u32, tag: Option<u64>) -> Result<()> {
        self.service_mut(service_id)?.tag = tag;
        Ok(())
    }

    pub fn service_tag(&self, service_id: u32) -> Option<u64> {
        self.service(service_id).and_then(|s| s.tag)
    }

    pub fn set_dispatch_policy(&mut self, policy: DispatchPolicy) {
        self.core.config.dispatch = policy;
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        self.core.config.dispatch
    }

    /// Ignore in-order hints and/or change the reorder timeout (0 disables).
    pub fn set_reorder(&mut self, force_reorder: bool, timeout_ms: u64) {
        self.core.config.force_reorder = force_reorder;
        self.core.config.reorder_timeout_ms = timeout_ms;
    }

    /// Only process this TSI besides signaling (`None` processes all).
    pub fn set_debug_tsi(&mut self, tsi: Option<u32>) {
        self.core.config.debug_tsi = tsi;
    }

    pub fn config(&self) -> &DemuxConfig {
        &self.core.config
    }

    pub fn stats(&self) -> &DemuxStats {
        &self.core.stats
    }

    /// Objects held in the arena across all services.
    pub fn live_objects(&self) -> usize {
        self.core.arena.live_count()
    }

    /// Recycled object slots ready for reuse.
    pub fn reservoir_len(&self) -> usize {
        self.core.arena.reservoir_len()
    }

    pub fn transport(&self) -> &T {
        &self.core.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.core.transport
    }
}

impl<T: Transport> Drop for Demux<T> {
    fn drop(&mut self) {
        for svc in &mut self.services {
            sockets::close_service_sockets(&mut self.core, svc);
        }
        if let Some(socket) = self.lls_socket.take() {
            self.core.transport.close(socket);
        }
    }
}
