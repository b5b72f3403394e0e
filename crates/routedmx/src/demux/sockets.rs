// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket lifecycle of services and sessions.

use super::{protocol_tag, Core};
use crate::error::{Error, Result};
use crate::topology::{Service, TuneMode};
use crate::transport::Transport;

/// Open, register or unregister the sockets of a service to match its tune
/// mode and its active channels.
///
/// The bootstrap socket is polled whenever the service is not `Off`. A
/// session socket is polled only while the service is `On` and the session
/// has an active channel; it is opened the first time it is wanted.
pub(crate) fn sync_service_sockets<T: Transport>(core: &mut Core<T>, svc: &mut Service) -> Result<()> {
    let tag = protocol_tag(svc.protocol);
    let bootstrap_wanted = svc.tune != TuneMode::Off;

    let socket = match svc.socket {
        Some(socket) => socket,
        None => {
            let socket = core
                .transport
                .open(svc.endpoint)
                .map_err(|source| Error::TransportSetup {
                    endpoint: svc.endpoint,
                    source,
                })?;
            svc.socket = Some(socket);
            socket
        }
    };
    if svc.registered != bootstrap_wanted {
        core.transport.set_registered(socket, bootstrap_wanted)?;
        svc.registered = bootstrap_wanted;
        log::debug!(
            "{} Service {} bootstrap {} {}",
            tag,
            svc.id,
            svc.endpoint,
            if bootstrap_wanted { "registered" } else { "unregistered" }
        );
    }

    for session in &mut svc.sessions {
        let Some(endpoint) = session.endpoint else {
            session.registered = svc.registered;
            continue;
        };
        let wanted = svc.tune == TuneMode::On && session.active_channels() > 0;
        let socket = match session.socket {
            Some(socket) => socket,
            None if wanted => {
                let socket = core
                    .transport
                    .open(endpoint)
                    .map_err(|source| Error::TransportSetup { endpoint, source })?;
                log::info!("{} Service {} session {} opened", tag, svc.id, endpoint);
                session.socket = Some(socket);
                socket
            }
            None => continue,
        };
        if session.registered != wanted {
            core.transport.set_registered(socket, wanted)?;
            session.registered = wanted;
            log::info!(
                "{} Service {} session {} {}",
                tag,
                svc.id,
                endpoint,
                if wanted { "registered" } else { "unregistered" }
            );
        }
    }
    Ok(())
}

/// Close every socket held by a service.
pub(crate) fn close_service_sockets<T: Transport>(core: &mut Core<T>, svc: &mut Service) {
    for session in &mut svc.sessions {
        if let Some(socket) = session.socket.take() {
            core.transport.close(socket);
        }
        session.registered = false;
    }
    if let Some(socket) = svc.socket.take() {
        core.transport.close(socket);
    }
    svc.registered = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DemuxConfig;
    use crate::demux::{DemuxStats, EventSink};
    use crate::object::ObjectArena;
    use crate::topology::{Channel, ChannelDecl, Protocol, ServiceSelector, Session};
    use crate::transport::SimTransport;
    use std::net::SocketAddrV4;

    fn core() -> Core<SimTransport> {
        let config = DemuxConfig::atsc3();
        Core {
            limits: config.limits(),
            config,
            transport: SimTransport::new(),
            arena: ObjectArena::new(),
            events: EventSink::default(),
            stats: DemuxStats::default(),
            selector: ServiceSelector::All,
            tune_all_sls: false,
        }
    }

    #[test]
    fn test_session_follows_tune_and_activity() {
        let mut core = core();
        let bootstrap: SocketAddrV4 = "239.0.0.1:5000".parse().unwrap();
        let media: SocketAddrV4 = "239.0.0.2:5002".parse().unwrap();
        let mut svc = Service::new(1, Protocol::Route, bootstrap);
        let mut session = Session::new(Some(media));
        session.channels.push(Channel::new(ChannelDecl::new(3)));
        svc.sessions.push(session);

        svc.tune = TuneMode::SlsOnly;
        sync_service_sockets(&mut core, &mut svc).unwrap();
        assert!(core.transport.is_registered(bootstrap));
        assert!(!core.transport.is_open(media));

        svc.tune = TuneMode::On;
        sync_service_sockets(&mut core, &mut svc).unwrap();
        assert!(core.transport.is_registered(media));

        svc.sessions[0].channels[0].active = false;
        sync_service_sockets(&mut core, &mut svc).unwrap();
        assert!(core.transport.is_open(media));
        assert!(!core.transport.is_registered(media));

        close_service_sockets(&mut core, &mut svc);
        assert!(!core.transport.is_open(media));
        assert!(!core.transport.is_open(bootstrap));
    }
}
