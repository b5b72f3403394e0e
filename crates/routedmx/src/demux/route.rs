// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ROUTE datagram path.
//!
//! TSI 0 carries the service signaling bundle; its TOI encodes which
//! fragments the bundle holds and their version:
//!
//! ```text
//! bit 31      gzip-compressed bundle
//! bit 18      MPD present
//! bit 17      S-TSID present
//! bits 0..7   version
//! ```

use std::borrow::Cow;
use std::time::Instant;

use super::gather::{self, Fragment, Gathered};
use super::{signaling, Core};
use crate::error::{Error, Result};
use crate::lct::{parse_route, LctHeader};
use crate::object::{ObjectKind, ObjectStatus};
use crate::signaling::{
    classify, compress, parse_bundle, parse_envelope, SignalingKind, MIME_DASH,
};
use crate::topology::{CodePoint, Service, TuneMode};
use crate::transport::Transport;

const TOI_GZIP: u32 = 1 << 31;
const TOI_MPD: u32 = 1 << 18;
const TOI_STSID: u32 = 1 << 17;
const TOI_VERSION: u32 = 0xFF;

pub(crate) fn process_datagram<T: Transport>(
    core: &mut Core<T>,
    svc: &mut Service,
    arrival: Option<usize>,
    data: &[u8],
    now: Instant,
) -> Result<()> {
    let header = parse_route(data, &core.limits)?;
    if core.config.debug_tsi.is_some_and(|t| header.tsi != 0 && header.tsi != t) {
        return Ok(());
    }
    let payload = header.payload(data);
    let offset = header
        .fec_payload_id
        .byte_offset(0, None)
        .ok_or_else(|| Error::malformed("ROUTE packet without start offset"))?;
    if header.close_session {
        log::info!("[ROUTE] Service {} TSI {} session closed by sender", svc.id, header.tsi);
    }

    if header.tsi == 0 {
        return process_signaling(core, svc, &header, offset, payload, now);
    }
    if svc.tune == TuneMode::SlsOnly {
        return Ok(());
    }

    let (si, ci) = svc.locate(header.tsi).ok_or(Error::UnknownChannel {
        tsi: header.tsi,
        toi: header.toi,
    })?;
    let owner = svc.arrival_matches(si, arrival);
    let channel = &mut svc.sessions[si].channels[ci];
    if !channel.active || !owner {
        channel.observe_discarded(header.toi);
        core.stats.discarded += 1;
        return Ok(());
    }

    let in_order = match channel.codepoint(header.codepoint) {
        Some(cp) => cp.in_order,
        None if CodePoint::undeclared_is_dropped(header.codepoint) => {
            log::debug!(
                "[ROUTE] Service {} TSI {} codepoint {} not declared, packet dropped",
                svc.id,
                header.tsi,
                header.codepoint
            );
            return Ok(());
        }
        None => true,
    };
    let kind = if channel.static_file(header.toi).is_some() {
        ObjectKind::StaticFile
    } else {
        ObjectKind::Segment
    };
    if kind == ObjectKind::Segment && channel.skips_segment(header.toi) {
        channel.discarded_packets += 1;
        core.stats.discarded += 1;
        return Ok(());
    }

    let frag = Fragment {
        tsi: header.tsi,
        toi: header.toi,
        offset,
        payload,
        total_length: header.transfer_length.unwrap_or(0),
        close: header.close_object,
        in_order,
        kind,
        content_encoding: None,
    };
    if let Gathered::Completed(handle) = gather::gather(core, svc, frag, now)? {
        gather::dispatch_object(core, svc, handle);
    }
    Ok(())
}

fn process_signaling<T: Transport>(
    core: &mut Core<T>,
    svc: &mut Service,
    header: &LctHeader,
    offset: u64,
    payload: &[u8],
    now: Instant,
) -> Result<()> {
    let toi = header.toi;
    let version = toi & TOI_VERSION;
    let stsid_version = (toi & TOI_STSID != 0).then_some(version);
    let manifest_version = (toi & TOI_MPD != 0).then_some(version);

    let stsid_known = stsid_version.is_none() || svc.signaling.stsid_version == stsid_version;
    let manifest_known =
        manifest_version.is_none() || svc.signaling.manifest_version == manifest_version;
    if (stsid_version.is_some() || manifest_version.is_some()) && stsid_known && manifest_known {
        return Ok(());
    }

    let frag = Fragment {
        tsi: 0,
        toi,
        offset,
        payload,
        total_length: header.transfer_length.unwrap_or(0),
        close: header.close_object,
        in_order: true,
        kind: ObjectKind::Signaling,
        content_encoding: None,
    };
    let Gathered::Completed(handle) = gather::gather(core, svc, frag, now)? else {
        return Ok(());
    };

    let Some((status, raw)) = core
        .arena
        .get(handle)
        .map(|o| (o.status, o.blob.received(o.total_length)))
    else {
        return Ok(());
    };
    gather::release(core, svc, handle);

    if status == ObjectStatus::DoneWithGaps {
        log::warn!("[ROUTE] Service {} signaling TOI 0x{:08x} incomplete", svc.id, toi);
        svc.last_signaling_toi = None;
        return Ok(());
    }

    let result = process_bundle(
        core,
        svc,
        &raw,
        toi & TOI_GZIP != 0,
        stsid_version,
        manifest_version,
    );
    if result.is_err() {
        // Retry on the next carousel occurrence.
        svc.last_signaling_toi = None;
    }
    result
}

/// Apply when nothing was applied yet, or when the announced version differs.
fn needs_update(stored: Option<u32>, announced: Option<u32>) -> bool {
    stored.is_none() || announced.is_none() || announced != stored
}

fn process_bundle<T: Transport>(
    core: &mut Core<T>,
    svc: &mut Service,
    raw: &[u8],
    gzip: bool,
    mut stsid_version: Option<u32>,
    mut manifest_version: Option<u32>,
) -> Result<()> {
    let data: Cow<'_, [u8]> = if gzip {
        Cow::Owned(compress::gunzip(raw, core.config.max_object_size)?)
    } else {
        Cow::Borrowed(raw)
    };
    let text = std::str::from_utf8(&data)
        .map_err(|_| Error::signaling("signaling bundle is not UTF-8"))?;
    let parts = parse_bundle(text)?;

    for part in parts.iter().filter(|p| classify(&p.content_type) == SignalingKind::Envelope) {
        let versions = parse_envelope(part.body)?;
        if versions.stsid.is_some() {
            stsid_version = versions.stsid;
        }
        if versions.manifest.is_some() {
            manifest_version = versions.manifest;
        }
    }

    for part in parts.iter().filter(|p| classify(&p.content_type) == SignalingKind::Stsid) {
        if !needs_update(svc.signaling.stsid_version, stsid_version) {
            continue;
        }
        signaling::apply_stsid(core, svc, part.body)?;
        svc.signaling.stsid_version = Some(stsid_version.unwrap_or(0));
    }

    for part in &parts {
        match classify(&part.content_type) {
            SignalingKind::Envelope | SignalingKind::Stsid => {}
            SignalingKind::UserServiceDescription => {
                log::debug!("[ROUTE] Service {} user service description ignored", svc.id)
            }
            SignalingKind::Manifest => {
                if !needs_update(svc.signaling.manifest_version, manifest_version) {
                    continue;
                }
                let filename = if part.content_location.is_empty() {
                    "manifest.mpd"
                } else {
                    part.content_location.as_str()
                };
                let mime = if part.content_type.is_empty() {
                    MIME_DASH
                } else {
                    part.content_type.as_str()
                };
                signaling::deliver_manifest(core, svc, filename, mime, part.body.as_bytes());
                svc.signaling.manifest_version = Some(manifest_version.unwrap_or(0));
            }
            _ => log::warn!(
                "[ROUTE] Service {} unsupported signaling {:?} ({}) ignored",
                svc.id,
                part.content_type,
                part.content_location
            ),
        }
    }
    Ok(())
}
