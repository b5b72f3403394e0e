// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Applying service signaling to the live topology.

use super::{gather, sockets, Core};
use crate::dispatch::DemuxEvent;
use crate::error::Result;
use crate::signaling::{parse_gateway_config, parse_stsid};
use crate::topology::{reconcile, ChannelDecl, Service, SessionDecl, TopologyChanges, TuneMode};
use crate::transport::Transport;

/// Apply an S-TSID. An identical document is a no-op.
pub(crate) fn apply_stsid<T: Transport>(core: &mut Core<T>, svc: &mut Service, text: &str) -> Result<()> {
    let crc = crc32fast::hash(text.as_bytes());
    if svc.signaling.stsid_crc == Some(crc) {
        log::debug!("[STSID] Service {} S-TSID unchanged", svc.id);
        return Ok(());
    }

    let decls = parse_stsid(text, svc.endpoint, core.config.max_codepoints)?;
    let changes = reconcile(&mut svc.sessions, decls);
    svc.signaling.stsid_crc = Some(crc);
    log::info!(
        "[STSID] Service {} S-TSID applied: {} sessions, {} channels",
        svc.id,
        svc.sessions.len(),
        svc.channels().count()
    );
    apply_topology_changes(core, svc, changes, "[STSID]")
}

/// Apply a DVB-MABR gateway configuration. An identical document is a no-op.
pub(crate) fn apply_gateway_config<T: Transport>(
    core: &mut Core<T>,
    svc: &mut Service,
    text: &str,
) -> Result<()> {
    let crc = crc32fast::hash(text.as_bytes());
    if svc.signaling.gateway_crc == Some(crc) {
        log::debug!("[MABR] Service {} gateway configuration unchanged", svc.id);
        return Ok(());
    }

    let config = parse_gateway_config(text)?;
    // The bootstrap channel carrying this very configuration stays.
    let mut decls = vec![SessionDecl {
        endpoint: None,
        channels: vec![ChannelDecl::new(0)],
    }];
    decls.extend(config.session_decls(svc.endpoint));

    let changes = reconcile(&mut svc.sessions, decls);
    svc.manifest_locator = config.manifest_locator().map(str::to_string);
    svc.signaling.gateway_crc = Some(crc);
    log::info!(
        "[MABR] Service {} gateway configuration applied: {} sessions, manifest {}",
        svc.id,
        svc.sessions.len(),
        svc.manifest_locator.as_deref().unwrap_or("-")
    );
    apply_topology_changes(core, svc, changes, "[MABR]")
}

fn apply_topology_changes<T: Transport>(
    core: &mut Core<T>,
    svc: &mut Service,
    changes: TopologyChanges,
    tag: &str,
) -> Result<()> {
    for tsi in &changes.duplicates {
        log::warn!("{} Service {} TSI {} declared twice, keeping first", tag, svc.id, tsi);
    }
    if changes.is_empty() {
        return Ok(());
    }
    for mut session in changes.closed {
        if let Some(socket) = session.socket.take() {
            core.transport.close(socket);
        }
        if let Some(endpoint) = session.endpoint {
            log::info!("{} Service {} session {} closed", tag, svc.id, endpoint);
        }
    }
    gather::release_channels(core, svc, &changes.removed, false);

    if !changes.added.is_empty() {
        log::info!("{} Service {} channels added: {:?}", tag, svc.id, changes.added);
    }
    if !changes.removed.is_empty() {
        log::info!("{} Service {} channels removed: {:?}", tag, svc.id, changes.removed);
    }
    if !changes.moved.is_empty() {
        log::info!("{} Service {} channels moved: {:?}", tag, svc.id, changes.moved);
    }
    if !changes.updated.is_empty() {
        log::debug!("{} Service {} channels updated: {:?}", tag, svc.id, changes.updated);
    }
    sockets::sync_service_sockets(core, svc)
}

/// Hand a manifest to the listener unless the same content was delivered.
///
/// A service tuned for signaling only is switched off once it has a
/// manifest.
pub(crate) fn deliver_manifest<T: Transport>(
    core: &mut Core<T>,
    svc: &mut Service,
    filename: &str,
    mime: &str,
    data: &[u8],
) {
    let crc = crc32fast::hash(data);
    if svc.signaling.manifest_crc == Some(crc) {
        log::debug!("[ROUTE] Service {} manifest {} unchanged", svc.id, filename);
        return;
    }
    svc.signaling.manifest_crc = Some(crc);
    log::info!(
        "[ROUTE] Service {} manifest {} ({}, {} bytes)",
        svc.id,
        filename,
        mime,
        data.len()
    );
    core.events.emit(DemuxEvent::ManifestReady {
        service_id: svc.id,
        filename,
        mime,
        data,
    });

    if svc.tune == TuneMode::SlsOnly {
        log::info!("[ROUTE] Service {} has its manifest, tuning off", svc.id);
        svc.tune = TuneMode::Off;
        if let Err(e) = sockets::sync_service_sockets(core, svc) {
            log::error!("[ROUTE] Service {} socket update failed: {}", svc.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DemuxConfig;
    use crate::demux::{DemuxStats, EventSink};
    use crate::object::ObjectArena;
    use crate::topology::{Protocol, ServiceSelector};
    use crate::transport::SimTransport;
    use std::cell::RefCell;
    use std::net::SocketAddrV4;
    use std::rc::Rc;

    fn core(events: Rc<RefCell<Vec<String>>>) -> Core<SimTransport> {
        let config = DemuxConfig::atsc3();
        Core {
            limits: config.limits(),
            config,
            transport: SimTransport::new(),
            arena: ObjectArena::new(),
            events: EventSink {
                listener: Some(Box::new(move |ev: DemuxEvent<'_>| {
                    events.borrow_mut().push(ev.kind().to_string())
                })),
            },
            stats: DemuxStats::default(),
            selector: ServiceSelector::All,
            tune_all_sls: false,
        }
    }

    const STSID: &str = r#"<S-TSID>
  <RS dIpAddr="239.0.0.9" dPort="6000">
    <LS tsi="1">
      <SrcFlow>
        <EFDT><FDT-Instance fileTemplate="v-$TOI$.m4s">
          <File Content-Location="init.mp4" TOI="0"/>
        </FDT-Instance></EFDT>
      </SrcFlow>
    </LS>
  </RS>
</S-TSID>"#;

    #[test]
    fn test_stsid_idempotent() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut core = core(events);
        let bootstrap: SocketAddrV4 = "239.0.0.1:5000".parse().unwrap();
        let mut svc = Service::new(1, Protocol::Route, bootstrap);
        svc.tune = TuneMode::On;
        sockets::sync_service_sockets(&mut core, &mut svc).unwrap();

        apply_stsid(&mut core, &mut svc, STSID).unwrap();
        assert_eq!(svc.sessions.len(), 1);
        assert!(core.transport.is_registered("239.0.0.9:6000".parse().unwrap()));
        svc.sessions[0].channels[0].last_dispatched = Some(4);

        apply_stsid(&mut core, &mut svc, STSID).unwrap();
        assert_eq!(svc.sessions[0].channels[0].last_dispatched, Some(4));
    }

    #[test]
    fn test_malformed_stsid_keeps_topology() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut core = core(events);
        let mut svc = Service::new(1, Protocol::Route, "239.0.0.1:5000".parse().unwrap());
        apply_stsid(&mut core, &mut svc, STSID).unwrap();
        let crc = svc.signaling.stsid_crc;

        assert!(apply_stsid(&mut core, &mut svc, "<S-TSID><RS dPort=\"x\"/></S-TSID>").is_err());
        assert_eq!(svc.signaling.stsid_crc, crc);
        assert_eq!(svc.channels().count(), 1);
    }

    #[test]
    fn test_manifest_dedup_and_sls_only() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut core = core(events.clone());
        let mut svc = Service::new(1, Protocol::Route, "239.0.0.1:5000".parse().unwrap());
        svc.tune = TuneMode::SlsOnly;
        sockets::sync_service_sockets(&mut core, &mut svc).unwrap();

        deliver_manifest(&mut core, &mut svc, "m.mpd", "application/dash+xml", b"<MPD/>");
        deliver_manifest(&mut core, &mut svc, "m.mpd", "application/dash+xml", b"<MPD/>");
        assert_eq!(*events.borrow(), vec!["manifest".to_string()]);
        assert_eq!(svc.tune, TuneMode::Off);
        assert!(!svc.registered);
    }
}
