// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service-based Transport Session Instance Description (A/331 §7.1.4).
//!
//! ```text
//! S-TSID
//!   └── RS (dIpAddr, dPort)           -> session
//!         └── LS (tsi)                -> channel
//!               └── SrcFlow
//!                     ├── EFDT        -> file template, static files
//!                     └── Payload*    -> code points
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};

use roxmltree::Node;

use super::fdt::{self, FileDefaults};
use super::xml;
use crate::error::{Error, Result};
use crate::topology::{ChannelDecl, CodePoint, SessionDecl, StaticFile, ToiTemplate};

/// Parse an S-TSID into session declarations.
///
/// Sessions addressed to `service_endpoint` are declared with no endpoint
/// (they share the service socket).
pub fn parse_stsid(
    text: &str,
    service_endpoint: SocketAddrV4,
    max_codepoints: usize,
) -> Result<Vec<SessionDecl>> {
    let doc = xml::parse(text)?;
    let root = doc.root_element();

    let mut sessions = Vec::new();
    let mut nb_channels = 0;

    for rs in xml::children(root, "RS") {
        let ip = match xml::attr_nocase(rs, "dIpAddr") {
            Some(a) => a
                .trim()
                .parse::<Ipv4Addr>()
                .map_err(|_| Error::signaling(format!("invalid RS dIpAddr {:?}", a)))?,
            None => *service_endpoint.ip(),
        };
        let port = match xml::attr_nocase(rs, "dPort") {
            Some(p) => p
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::signaling(format!("invalid RS dPort {:?}", p)))?,
            None => service_endpoint.port(),
        };
        let endpoint = SocketAddrV4::new(ip, port);
        let mut session = SessionDecl::new((endpoint != service_endpoint).then_some(endpoint));

        for ls in xml::children(rs, "LS") {
            let channel = parse_ls(ls, max_codepoints)?;
            nb_channels += 1;
            session.channels.push(channel);
        }
        sessions.push(session);
    }

    if nb_channels == 0 {
        return Err(Error::signaling("no supported LCT channel"));
    }
    Ok(sessions)
}

fn parse_ls(ls: Node<'_, '_>, max_codepoints: usize) -> Result<ChannelDecl> {
    let tsi = xml::attr_u32(ls, "tsi")
        .filter(|t| *t != 0)
        .ok_or_else(|| Error::signaling("LS without TSI"))?;
    let src_flow = xml::child(ls, "SrcFlow")
        .ok_or_else(|| Error::signaling(format!("LS {} without SrcFlow", tsi)))?;
    let efdt = xml::child(src_flow, "EFDT")
        .ok_or_else(|| Error::signaling(format!("LS {} without EFDT", tsi)))?;

    let mut decl = ChannelDecl::new(tsi);
    let mut template: Option<String> = None;

    for node in efdt.children().filter(|n| n.is_element()) {
        match node.tag_name().name() {
            "FileTemplate" => {
                template = xml::text(node).map(str::to_string);
            }
            "FDTParameters" => {
                let defaults = FileDefaults::from_node(node);
                for file in node.children().filter(|n| n.is_element()) {
                    if !file.tag_name().name().contains("File") {
                        continue;
                    }
                    if let Some(f) = fdt::parse_file(file, defaults) {
                        decl.static_files.push(f);
                    }
                }
            }
            "FDT-Instance" => {
                let instance = fdt::parse_instance(node)?;
                if instance.file_template.is_some() {
                    template = instance.file_template;
                }
                decl.static_files.extend(instance.files);
            }
            _ => {}
        }
    }

    if decl.static_files.is_empty() {
        log::warn!(
            "[STSID] TSI {} declares no init file, TOI {} is taken as ghost init",
            tsi,
            crate::topology::GHOST_INIT_TOI
        );
        decl.static_files.push(StaticFile::ghost_init());
    }
    match template {
        Some(t) => decl.template = Some(ToiTemplate::parse(&t)?),
        None => log::info!("[STSID] TSI {} has no TOI template, static content only", tsi),
    }

    for payload in xml::children(src_flow, "Payload") {
        if decl.codepoints.len() >= max_codepoints {
            log::error!(
                "[STSID] TSI {} declares more than {} payload formats, ignoring the rest",
                tsi,
                max_codepoints
            );
            break;
        }
        let cp = CodePoint {
            codepoint: xml::attr_u32(payload, "codePoint").unwrap_or(0) as u8,
            format_id: xml::attr_u32(payload, "formatId").unwrap_or(0) as u8,
            fragmented: xml::attr_u32(payload, "frag").unwrap_or(0) != 0,
            in_order: xml::attr_bool(payload, "order").unwrap_or(true),
            source_fec_payload_id: xml::attr_u32(payload, "srcFecPayloadId").unwrap_or(0) as u8,
        };
        if cp.source_fec_payload_id != 0 {
            log::warn!(
                "[STSID] TSI {} srcFecPayloadId {} is reserved, assuming 0",
                tsi,
                cp.source_fec_payload_id
            );
        }
        if cp.format_id != 1 {
            if cp.format_id != 0 && cp.format_id < 5 {
                log::warn!("[STSID] TSI {} payload formatId {} not supported", tsi, cp.format_id);
            } else {
                log::warn!(
                    "[STSID] TSI {} payload formatId {} reserved, assuming 1",
                    tsi,
                    cp.format_id
                );
            }
        }
        decl.codepoints.push(cp);
    }

    Ok(decl)
}
