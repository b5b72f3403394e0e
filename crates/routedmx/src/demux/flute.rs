// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FLUTE datagram path.
//!
//! TOI 0 of every channel carries FDT instances naming the other TOIs.
//! Objects completed before their FDT entry is known wait in the object
//! list and are dispatched when a later instance names them.

use std::time::Instant;

use super::gather::{self, Fragment, Gathered};
use super::Core;
use crate::error::{Error, Result};
use crate::lct::{parse_flute, validate_range, ContentEncoding};
use crate::object::{ObjectHandle, ObjectKind, ObjectStatus};
use crate::signaling::{compress, parse_fdt};
use crate::topology::{Service, TuneMode};
use crate::transport::Transport;

/// TOI of FDT instances.
const FDT_TOI: u32 = 0;
/// Files remembered per channel across FDT instances.
const MAX_FDT_FILES: usize = 4096;

pub(crate) fn process_datagram<T: Transport>(
    core: &mut Core<T>,
    svc: &mut Service,
    arrival: Option<usize>,
    data: &[u8],
    now: Instant,
) -> Result<()> {
    let header = parse_flute(data, &core.limits)?;
    if core.config.debug_tsi.is_some_and(|t| header.tsi != 0 && header.tsi != t) {
        return Ok(());
    }
    if svc.tune == TuneMode::SlsOnly && header.tsi != 0 {
        return Ok(());
    }
    let payload = header.payload(data);
    let limit = core.config.max_object_size;

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

    if let Some(fti) = header.fti {
        if fti.symbol_length > 0 {
            channel.symbol_length = Some(fti.symbol_length);
        }
        if fti.max_source_block_length > 0 {
            channel.max_source_block_length = Some(fti.max_source_block_length);
        }
    }
    if let Ok(len) = u16::try_from(payload.len()) {
        channel.observed_symbol_length = channel.observed_symbol_length.max(len);
    }

    let (layout_symbol, layout_sbl) = channel.symbol_layout(header.toi);
    let symbol_length = header
        .fti
        .map(|f| f.symbol_length)
        .filter(|s| *s > 0)
        .or(layout_symbol)
        .unwrap_or(payload.len() as u16);
    let max_sbl = header
        .fti
        .map(|f| f.max_source_block_length)
        .filter(|m| *m > 0)
        .or(layout_sbl);
    let offset = header
        .fec_payload_id
        .byte_offset(symbol_length, max_sbl)
        .ok_or_else(|| {
            Error::malformed(format!(
                "TSI {} TOI {} source block number without block length",
                header.tsi, header.toi
            ))
        })?;
    let size = payload.len() as u64;
    let tsi = header.tsi;

    if header.toi == FDT_TOI {
        validate_range(offset, size, header.transfer_length, limit)?;
        let instance = header.fdt_instance.map(|f| f.instance_id);
        if instance.is_some() && instance == channel.fdt_instance {
            return Ok(());
        }
        let restarted = channel.fdt_receiving != instance;
        channel.fdt_receiving = instance;
        if restarted {
            release_fdt_objects(core, svc, tsi);
        }

        let frag = Fragment {
            tsi,
            toi: FDT_TOI,
            offset,
            payload,
            total_length: header.transfer_length.unwrap_or(0),
            close: header.close_object,
            in_order: true,
            kind: ObjectKind::Signaling,
            content_encoding: header.content_encoding,
        };
        if let Gathered::Completed(handle) = gather::gather(core, svc, frag, now)? {
            apply_fdt_object(core, svc, tsi, handle, instance)?;
        }
        return Ok(());
    }

    let (toi, offset, total) = match channel.split_for_toi(header.toi) {
        Some(split) => {
            let part = split
                .part(header.toi)
                .copied()
                .ok_or(Error::UnknownChannel { tsi, toi: header.toi })?;
            validate_range(offset, size, Some(part.length), limit)?;
            let offset = part.offset.checked_add(offset).ok_or(Error::InvalidDeclaredSize {
                offset,
                size,
                limit: split.total_length,
            })?;
            (split.logical_toi(), offset, split.total_length)
        }
        None => {
            let total = header
                .transfer_length
                .or_else(|| channel.fdt_file(header.toi).and_then(|f| f.length))
                .unwrap_or(0);
            validate_range(offset, size, Some(total), limit)?;
            (header.toi, offset, total)
        }
    };
    let kind = if channel.representation().is_some() {
        ObjectKind::Segment
    } else {
        ObjectKind::StaticFile
    };
    if kind == ObjectKind::Segment && channel.skips_segment(header.toi) {
        channel.discarded_packets += 1;
        core.stats.discarded += 1;
        return Ok(());
    }

    let frag = Fragment {
        tsi,
        toi,
        offset,
        payload,
        total_length: total,
        close: header.close_object,
        in_order: true,
        kind,
        content_encoding: header.content_encoding,
    };
    if let Gathered::Completed(handle) = gather::gather(core, svc, frag, now)? {
        gather::dispatch_object(core, svc, handle);
    }
    Ok(())
}

fn release_fdt_objects<T: Transport>(core: &mut Core<T>, svc: &mut Service, tsi: u32) {
    let stale: Vec<ObjectHandle> = svc
        .objects
        .iter()
        .copied()
        .filter(|&h| {
            core.arena
                .get(h)
                .is_some_and(|o| o.tsi == tsi && o.toi == FDT_TOI && o.kind == ObjectKind::Signaling)
        })
        .collect();
    for h in stale {
        gather::release(core, svc, h);
    }
}

fn apply_fdt_object<T: Transport>(
    core: &mut Core<T>,
    svc: &mut Service,
    tsi: u32,
    handle: ObjectHandle,
    instance: Option<u32>,
) -> Result<()> {
    let Some((status, encoding, raw)) = core.arena.get(handle).map(|o| {
        (
            o.status,
            o.content_encoding.unwrap_or(ContentEncoding::Null),
            o.blob.received(o.total_length),
        )
    }) else {
        return Ok(());
    };
    gather::release(core, svc, handle);

    if status == ObjectStatus::DoneWithGaps {
        log::warn!("[FDT] Service {} TSI {} FDT instance incomplete", svc.id, tsi);
        if let Some(channel) = svc.channel_mut(tsi) {
            channel.fdt_receiving = None;
        }
        return Ok(());
    }

    let body = compress::decode(encoding, &raw, core.config.max_object_size)?;
    let text = std::str::from_utf8(&body).map_err(|_| Error::signaling("FDT is not UTF-8"))?;
    apply_fdt(core, svc, tsi, text, instance)
}

/// Merge an FDT instance into the channel and dispatch the objects it names.
pub(crate) fn apply_fdt<T: Transport>(
    core: &mut Core<T>,
    svc: &mut Service,
    tsi: u32,
    text: &str,
    instance: Option<u32>,
) -> Result<()> {
    let crc = crc32fast::hash(text.as_bytes());
    let service_id = svc.id;
    let Some(channel) = svc.channel_mut(tsi) else {
        return Ok(());
    };
    channel.fdt_receiving = None;
    if channel.fdt_crc == Some(crc) {
        channel.fdt_instance = instance;
        log::debug!("[FDT] Service {} TSI {} FDT unchanged", service_id, tsi);
        return Ok(());
    }

    let fdt = parse_fdt(text)?;
    let (nb_files, nb_splits) = (fdt.files.len(), fdt.splits.len());
    for file in fdt.files {
        let full = channel.fdt_files.len() >= MAX_FDT_FILES;
        match channel.fdt_files.iter_mut().find(|f| f.toi == file.toi) {
            Some(existing) => *existing = file,
            None if !full => channel.fdt_files.push(file),
            None => {
                log::warn!(
                    "[FDT] Service {} TSI {} file table full, {} ignored",
                    service_id,
                    tsi,
                    file.name
                );
            }
        }
    }
    for split in fdt.splits {
        match channel.split_objects.iter_mut().find(|s| s.name == split.name) {
            Some(existing) => *existing = split,
            None => channel.split_objects.push(split),
        }
    }
    channel.fdt_crc = Some(crc);
    channel.fdt_instance = instance;
    log::info!(
        "[FDT] Service {} TSI {} instance {:?}: {} files, {} split objects",
        service_id,
        tsi,
        instance,
        nb_files,
        nb_splits
    );

    let split_parts: Vec<u32> = channel
        .split_objects
        .iter()
        .filter(|s| s.parts.len() > 1)
        .flat_map(|s| s.parts.iter().map(|p| p.toi))
        .collect();
    let waiting: Vec<(ObjectHandle, u32)> = svc
        .objects
        .iter()
        .copied()
        .filter_map(|h| {
            core.arena
                .get(h)
                .filter(|o| o.tsi == tsi && o.awaiting_name)
                .map(|o| (h, o.toi))
        })
        .collect();
    for (h, toi) in waiting {
        gather::dispatch_object(core, svc, h);
        let still_waiting = core.arena.get(h).is_some_and(|o| o.awaiting_name);
        if still_waiting && split_parts.contains(&toi) {
            log::debug!(
                "[FDT] Service {} TSI {} TOI {} is a split part received on its own, dropped",
                service_id,
                tsi,
                toi
            );
            gather::release(core, svc, h);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DemuxConfig;
    use crate::demux::{DemuxStats, EventSink};
    use crate::dispatch::DemuxEvent;
    use crate::lct::LctPacketBuilder;
    use crate::object::ObjectArena;
    use crate::topology::{Channel, ChannelDecl, Protocol, ServiceSelector, Session};
    use crate::transport::SimTransport;
    use std::cell::RefCell;
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
                    let line = match &ev {
                        DemuxEvent::FileReady { info, .. } => {
                            format!("file {} {}", info.filename, String::from_utf8_lossy(&info.blob.to_vec()))
                        }
                        other => other.kind().to_string(),
                    };
                    events.borrow_mut().push(line);
                })),
            },
            stats: DemuxStats::default(),
            selector: ServiceSelector::All,
            tune_all_sls: false,
        }
    }

    fn service() -> Service {
        let mut svc = Service::new(1, Protocol::Flute, "239.1.1.1:3000".parse().unwrap());
        svc.tune = TuneMode::On;
        let mut session = Session::new(None);
        session.channels.push(Channel::new(ChannelDecl::new(0)));
        svc.sessions.push(session);
        svc
    }

    fn fdt(body: &str) -> String {
        format!("<FDT-Instance Expires=\"1\">{}</FDT-Instance>", body)
    }

    #[test]
    fn test_file_waits_for_fdt() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut core = core(events.clone());
        let mut svc = service();
        let now = Instant::now();

        let pkt = LctPacketBuilder::flute(0, 5)
            .fti(5, 5, 64)
            .close()
            .payload(b"hello")
            .build();
        process_datagram(&mut core, &mut svc, None, &pkt, now).unwrap();
        assert!(events.borrow().is_empty());

        let table = fdt(r#"<File TOI="5" Content-Location="hello.txt" Content-Length="5"/>"#);
        let pkt = LctPacketBuilder::flute(0, 0)
            .fdt_instance(1)
            .transfer_length(table.len() as u64)
            .payload(table.as_bytes())
            .build();
        process_datagram(&mut core, &mut svc, None, &pkt, now).unwrap();
        assert_eq!(*events.borrow(), vec!["file hello.txt hello".to_string()]);
        assert_eq!(svc.channel(0).unwrap().fdt_instance, Some(1));
    }

    #[test]
    fn test_split_object_stitched() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut core = core(events.clone());
        let mut svc = service();
        let now = Instant::now();

        let table = fdt(
            r#"<File TOI="7" Content-Location="big.bin#offset=0&amp;total=6" Content-Length="3"/>
               <File TOI="8" Content-Location="big.bin#offset=3&amp;total=6" Content-Length="3"/>"#,
        );
        apply_fdt(&mut core, &mut svc, 0, &table, Some(2)).unwrap();

        for (toi, body) in [(8u32, b"def"), (7u32, b"abc")] {
            let pkt = LctPacketBuilder::flute(0, toi)
                .fti(3, 3, 64)
                .payload(body)
                .build();
            process_datagram(&mut core, &mut svc, None, &pkt, now).unwrap();
        }
        assert_eq!(*events.borrow(), vec!["file big.bin abcdef".to_string()]);
    }

    #[test]
    fn test_fdt_file_table_capped() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut core = core(events);
        let mut svc = service();
        let files: String = (1..=MAX_FDT_FILES as u32 + 1)
            .map(|toi| format!(r#"<File TOI="{toi}" Content-Location="f{toi}.bin" Content-Length="1"/>"#))
            .collect();
        apply_fdt(&mut core, &mut svc, 0, &fdt(&files), Some(1)).unwrap();
        assert_eq!(svc.channel(0).unwrap().fdt_files().len(), MAX_FDT_FILES);

        // A full table still takes updates of known entries.
        let update = fdt(r#"<File TOI="1" Content-Location="renamed.bin" Content-Length="1"/>"#);
        apply_fdt(&mut core, &mut svc, 0, &update, Some(2)).unwrap();
        let channel = svc.channel(0).unwrap();
        assert_eq!(channel.fdt_files().len(), MAX_FDT_FILES);
        assert_eq!(channel.fdt_file(1).unwrap().name, "renamed.bin");
    }

    #[test]
    fn test_oversized_fdt_length_rejected() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut core = core(events.clone());
        let mut svc = service();
        let now = Instant::now();
        let huge = core.config.max_object_size + 1;
        apply_fdt(
            &mut core,
            &mut svc,
            0,
            &fdt(&format!(r#"<File TOI="4" Content-Location="a.bin" Content-Length="{}"/>"#, huge)),
            None,
        )
        .unwrap();

        let pkt = LctPacketBuilder::flute(0, 4).payload(b"abcd").build();
        let err = process_datagram(&mut core, &mut svc, None, &pkt, now).unwrap_err();
        assert!(matches!(err, Error::InvalidDeclaredSize { .. }));
        assert_eq!(core.arena.live_count(), 0);
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_block_offset_from_fti() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut core = core(events.clone());
        let mut svc = service();
        let now = Instant::now();
        apply_fdt(
            &mut core,
            &mut svc,
            0,
            &fdt(r#"<File TOI="3" Content-Location="a.bin" Content-Length="8"/>"#),
            None,
        )
        .unwrap();

        for (sbn, esi, body) in [(1u16, 0u16, b"efgh"), (0, 0, b"abcd")] {
            let pkt = LctPacketBuilder::flute(0, 3)
                .fti(8, 2, 2)
                .block(sbn, esi)
                .payload(body)
                .build();
            process_datagram(&mut core, &mut svc, None, &pkt, now).unwrap();
        }
        assert_eq!(*events.borrow(), vec!["file a.bin abcdefgh".to_string()]);
    }

    #[test]
    fn test_sls_only_drops_media() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut core = core(events);
        let mut svc = service();
        svc.tune = TuneMode::SlsOnly;
        let pkt = LctPacketBuilder::flute(4, 1).payload(b"x").build();
        assert!(process_datagram(&mut core, &mut svc, None, &pkt, Instant::now()).is_ok());
    }
}
