// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service List Table.

use std::net::{Ipv4Addr, SocketAddrV4};

use super::xml;
use crate::error::{Error, Result};

/// `slsProtocol` value for ROUTE.
pub const SLS_PROTOCOL_ROUTE: u32 = 1;
/// `slsProtocol` value for MMTP (not supported).
pub const SLS_PROTOCOL_MMTP: u32 = 2;

/// A ROUTE service announced in the SLT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SltService {
    pub service_id: u32,
    pub endpoint: SocketAddrV4,
}

/// Parse an SLT, keeping ROUTE services with a usable destination.
pub fn parse_slt(text: &str) -> Result<Vec<SltService>> {
    let doc = xml::parse(text)?;
    let root = doc.root_element();
    if root.tag_name().name() != "SLT" {
        return Err(Error::signaling(format!(
            "expected SLT root, found {}",
            root.tag_name().name()
        )));
    }

    let mut services = Vec::new();
    for node in xml::children(root, "Service") {
        let service_id = xml::attr_u32(node, "serviceId").unwrap_or(0);
        let Some(sls) = xml::child(node, "BroadcastSvcSignaling") else {
            log::warn!("[SLT] service {} has no broadcast signaling, ignoring", service_id);
            continue;
        };

        let protocol = xml::attr_u32(sls, "slsProtocol").unwrap_or(0);
        let address = xml::attr(sls, "slsDestinationIpAddress")
            .and_then(|a| a.trim().parse::<Ipv4Addr>().ok());
        let port = xml::attr_u32(sls, "slsDestinationUdpPort")
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0);

        let (Some(address), Some(port)) = (address, port) else {
            log::warn!(
                "[SLT] no destination IP or port for service {}, ignoring",
                service_id
            );
            continue;
        };
        match protocol {
            SLS_PROTOCOL_ROUTE => {}
            SLS_PROTOCOL_MMTP => {
                log::warn!("[SLT] service {} uses MMTP, not supported", service_id);
                continue;
            }
            other => {
                log::warn!(
                    "[SLT] unknown signaling protocol {} for service {}, ignoring",
                    other,
                    service_id
                );
                continue;
            }
        }
        if services.iter().any(|s: &SltService| s.service_id == service_id) {
            log::warn!("[SLT] service {} listed twice, keeping first", service_id);
            continue;
        }

        services.push(SltService {
            service_id,
            endpoint: SocketAddrV4::new(address, port),
        });
    }

    Ok(services)
}
