// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ATSC 3.0 low-level signaling: service discovery from the SLT.

use super::{gather, sockets, Demux};
use crate::dispatch::DemuxEvent;
use crate::error::Result;
use crate::signaling::lls::table_text;
use crate::signaling::{parse_slt, LlsHeader, LlsTableKind, SltService};
use crate::topology::{Protocol, Service};
use crate::transport::Transport;

impl<T: Transport> Demux<T> {
    /// Handle one LLS datagram.
    ///
    /// A table whose version was already seen is ignored. The SLT version is
    /// only recorded once the table was applied, so a corrupted occurrence is
    /// retried on the next one.
    pub(super) fn process_lls(&mut self, data: &[u8]) -> Result<()> {
        let header = LlsHeader::parse(data)?;
        let Some(kind) = header.kind() else {
            log::debug!("[SLT] LLS table id {} ignored", header.table_id);
            return Ok(());
        };
        let slot = &mut self.lls_versions[kind.index()];
        if *slot == Some(header.version) {
            return Ok(());
        }
        if kind != LlsTableKind::Slt {
            log::debug!("[SLT] {} version {}", kind.name(), header.version);
            *slot = Some(header.version);
            return Ok(());
        }

        let text = table_text(data, self.core.config.max_object_size)?;
        let services = parse_slt(&text)?;
        log::info!(
            "[SLT] version {} lists {} ROUTE services",
            header.version,
            services.len()
        );
        self.apply_slt(&services);
        self.lls_versions[kind.index()] = Some(header.version);
        Ok(())
    }

    /// Bring the service list in line with an SLT.
    ///
    /// Services configured statically are never removed. A service whose
    /// bootstrap destination changed is recreated.
    fn apply_slt(&mut self, listed: &[SltService]) {
        let mut kept = Vec::with_capacity(self.services.len());
        for mut svc in std::mem::take(&mut self.services) {
            let still_listed = listed
                .iter()
                .any(|l| l.service_id == svc.id && l.endpoint == svc.endpoint);
            if svc.declared || still_listed {
                kept.push(svc);
                continue;
            }
            log::info!("[SLT] service {} removed", svc.id);
            self.teardown(&mut svc);
            self.core
                .events
                .emit(DemuxEvent::ServiceRemoved { service_id: svc.id });
        }
        self.services = kept;

        for entry in listed {
            if self.has_service(entry.service_id) {
                continue;
            }
            if let Err(e) =
                self.create_service(entry.service_id, Protocol::Route, entry.endpoint, false)
            {
                log::error!("[SLT] service {}: {}", entry.service_id, e);
            }
        }

        self.core.events.emit(DemuxEvent::ServiceListRefreshed {
            services: self.services.len(),
        });
    }

    fn teardown(&mut self, svc: &mut Service) {
        for h in svc.objects.clone() {
            gather::release(&mut self.core, svc, h);
        }
        sockets::close_service_sockets(&mut self.core, svc);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::DemuxConfig;
    use crate::demux::Demux;
    use crate::dispatch::DemuxEvent;
    use crate::signaling::{compress, LLS_ENDPOINT};
    use crate::transport::SimTransport;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn slt_table(version: u8, services: &[(u32, &str, u16)]) -> Vec<u8> {
        let mut xml = String::from("<SLT bsid=\"1\">");
        for (id, ip, port) in services {
            xml.push_str(&format!(
                "<Service serviceId=\"{}\"><BroadcastSvcSignaling slsProtocol=\"1\" \
                 slsDestinationIpAddress=\"{}\" slsDestinationUdpPort=\"{}\"/></Service>",
                id, ip, port
            ));
        }
        xml.push_str("</SLT>");
        let mut table = vec![1, 0, 0, version];
        table.extend(compress::gzip(xml.as_bytes()));
        table
    }

    #[test]
    fn test_slt_versions_and_diff() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let mut demux = Demux::with_listener(
            DemuxConfig::atsc3(),
            SimTransport::new(),
            move |ev: DemuxEvent<'_>| {
                let line = match ev {
                    DemuxEvent::ServiceFound { service_id } => format!("+{}", service_id),
                    DemuxEvent::ServiceRemoved { service_id } => format!("-{}", service_id),
                    DemuxEvent::ServiceListRefreshed { services } => format!("={}", services),
                    other => other.kind().to_string(),
                };
                sink.borrow_mut().push(line);
            },
        )
        .unwrap();

        let first = slt_table(1, &[(1, "239.0.0.1", 5000), (2, "239.0.0.2", 5000)]);
        demux.process_lls(&first).unwrap();
        demux.process_lls(&first).unwrap();
        assert_eq!(*events.borrow(), vec!["+1", "+2", "=2"]);

        events.borrow_mut().clear();
        let second = slt_table(2, &[(2, "239.0.0.2", 5000), (3, "239.0.0.3", 5000)]);
        demux.process_lls(&second).unwrap();
        assert_eq!(*events.borrow(), vec!["-1", "+3", "=2"]);
        assert!(!demux.transport().is_open("239.0.0.1:5000".parse().unwrap()));
        assert!(demux.transport().is_registered(LLS_ENDPOINT));
    }

    #[test]
    fn test_corrupted_slt_not_recorded() {
        let mut demux = Demux::new(DemuxConfig::atsc3(), SimTransport::new()).unwrap();
        let mut bad = vec![1, 0, 0, 4];
        bad.extend_from_slice(b"not gzip");
        assert!(demux.process_lls(&bad).is_err());
        assert_eq!(demux.lls_versions[0], None);

        let good = slt_table(4, &[(9, "239.0.0.9", 5000)]);
        demux.process_lls(&good).unwrap();
        assert!(demux.has_service(9));
        assert_eq!(demux.lls_versions[0], Some(4));
    }
}
