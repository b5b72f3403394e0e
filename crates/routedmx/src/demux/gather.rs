// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fragment gathering, object completion and dispatch.
//!
//! One [`gather`] call merges one fragment into its object:
//!
//! 1. stale check against the last dispatched TOI of the channel
//! 2. object lookup, allocation or version-bump reuse
//! 3. length declaration (a conflicting length restarts reception)
//! 4. takeover of older objects on the same TSI
//! 5. merge, then completion or partial notification

use std::time::{Duration, Instant};

use super::{protocol_tag, Core};
use crate::dispatch::{DemuxEvent, DispatchPolicy, ObjectInfo};
use crate::error::{Error, Result};
use crate::lct::{validate_range, ContentEncoding};
use crate::object::{ObjectHandle, ObjectKind, ObjectStatus};
use crate::signaling::{self, compress};
use crate::topology::{Protocol, Service};
use crate::transport::Transport;

/// Version bits of a ROUTE signaling TOI.
const SIGNALING_VERSION_MASK: u32 = 0xFFFF_FF00;

/// One payload, already mapped to its object.
#[derive(Debug)]
pub(crate) struct Fragment<'a> {
    pub tsi: u32,
    pub toi: u32,
    pub offset: u64,
    pub payload: &'a [u8],
    /// Declared object length, 0 if unknown.
    pub total_length: u64,
    pub close: bool,
    pub in_order: bool,
    pub kind: ObjectKind,
    pub content_encoding: Option<ContentEncoding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gathered {
    /// The object is still incomplete.
    Pending,
    /// The object was finalized by this fragment.
    Completed(ObjectHandle),
    /// Repeat of an already delivered object.
    Skipped,
}

pub(crate) fn gather<T: Transport>(
    core: &mut Core<T>,
    svc: &mut Service,
    mut frag: Fragment<'_>,
    now: Instant,
) -> Result<Gathered> {
    if core.config.force_reorder {
        frag.in_order = false;
    }
    let limit = core.config.max_object_size;
    validate_range(frag.offset, frag.payload.len() as u64, None, limit)?;
    validate_range(0, frag.total_length, None, limit)?;
    let tag = protocol_tag(svc.protocol);

    let last = match svc.channel(frag.tsi) {
        Some(ch) if frag.kind == ObjectKind::Segment => ch.last_dispatched,
        Some(_) => None,
        None => svc.last_signaling_toi,
    };
    if last == Some(frag.toi) {
        return repeated(core, svc, &frag);
    }

    let handle = match lookup(core, svc, &frag, now) {
        Some(h) => h,
        None => {
            let h = core.arena.allocate(now);
            if let Some(obj) = core.arena.get_mut(h) {
                obj.reset(frag.tsi, frag.toi, frag.total_length, now);
                obj.kind = frag.kind;
            }
            svc.objects.push(h);
            log::debug!(
                "{} Service {} new object TSI {} TOI {} ({} bytes{})",
                tag,
                svc.id,
                frag.tsi,
                frag.toi,
                frag.total_length,
                if frag.total_length == 0 { ", length unknown" } else { "" }
            );
            h
        }
    };

    let Some(obj) = core.arena.get_mut(handle) else {
        return Ok(Gathered::Skipped);
    };
    if obj.status.is_final() {
        if obj.kind == ObjectKind::StaticFile && frag.offset == 0 {
            log::debug!(
                "{} Service {} TSI {} TOI {} received again",
                tag,
                svc.id,
                frag.tsi,
                frag.toi
            );
            let (user_tag, announced, name) = (obj.user_tag, obj.announced, obj.name.take());
            obj.reset(frag.tsi, frag.toi, frag.total_length, now);
            obj.kind = frag.kind;
            obj.user_tag = user_tag;
            obj.announced = announced;
            obj.name = name;
        } else {
            return repeated(core, svc, &frag);
        }
    }

    if obj.declare_length(frag.total_length) {
        log::warn!(
            "{} Service {} TSI {} TOI {} length changed to {}, reception restarted",
            tag,
            svc.id,
            frag.tsi,
            frag.toi,
            frag.total_length
        );
    }
    obj.in_order = frag.in_order;
    if frag.content_encoding.is_some() {
        obj.content_encoding = frag.content_encoding;
    }

    if svc.last_active != Some(handle) {
        take_over(core, svc, handle, &frag, now);
        svc.last_active = Some(handle);
    }

    let Some(obj) = core.arena.get_mut(handle) else {
        return Ok(Gathered::Skipped);
    };
    let end = frag.offset.saturating_add(frag.payload.len() as u64);
    if obj.total_length > 0 && end > obj.total_length {
        return Err(Error::InvalidDeclaredSize {
            offset: frag.offset,
            size: frag.payload.len() as u64,
            limit: obj.total_length,
        });
    }

    let prefix_before = obj.blob.contiguous_prefix();
    let outcome = obj.merge(frag.offset, frag.payload, now);
    let prefix_after = obj.blob.contiguous_prefix();
    if !outcome.added_bytes() {
        log::debug!(
            "{} TSI {} TOI {} duplicate fragment at {} ({} bytes)",
            tag,
            frag.tsi,
            frag.toi,
            frag.offset,
            frag.payload.len()
        );
    }
    let partial = obj.kind != ObjectKind::Signaling
        && core
            .config
            .dispatch
            .notify_partial(prefix_after > prefix_before, outcome.added_bytes());

    let done = obj.is_complete()
        || (frag.close
            && obj.in_order
            && obj.total_length == 0
            && prefix_after > 0
            && prefix_after == obj.blob.high_water());

    if !done {
        if frag.close {
            obj.closed = true;
        }
        if partial {
            let exposed = match core.config.dispatch {
                DispatchPolicy::Eager => obj.blob.high_water(),
                _ => prefix_after,
            };
            push_partial(core, svc, handle, exposed);
        }
        return Ok(Gathered::Pending);
    }

    svc.last_active = None;
    match svc.channel_mut(frag.tsi) {
        Some(ch) => {
            if frag.kind == ObjectKind::Segment {
                ch.last_dispatched = Some(frag.toi);
            }
        }
        None => svc.last_signaling_toi = Some(frag.toi),
    }
    finalize(core, handle, now);
    Ok(Gathered::Completed(handle))
}

/// Fragment for an object already delivered.
fn repeated<T: Transport>(core: &mut Core<T>, svc: &Service, frag: &Fragment<'_>) -> Result<Gathered> {
    if frag.kind != ObjectKind::Segment {
        log::debug!(
            "{} Service {} TSI {} TOI {} already processed",
            protocol_tag(svc.protocol),
            svc.id,
            frag.tsi,
            frag.toi
        );
        return Ok(Gathered::Skipped);
    }
    core.events.emit(DemuxEvent::LateDataIgnored {
        service_id: svc.id,
        tsi: frag.tsi,
        toi: frag.toi,
        offset: frag.offset,
        size: frag.payload.len() as u64,
    });
    Err(Error::StaleOrDuplicate {
        tsi: frag.tsi,
        toi: frag.toi,
    })
}

fn lookup<T: Transport>(
    core: &mut Core<T>,
    svc: &Service,
    frag: &Fragment<'_>,
    now: Instant,
) -> Option<ObjectHandle> {
    let is = |h: &ObjectHandle| {
        core.arena
            .get(*h)
            .is_some_and(|o| o.tsi == frag.tsi && o.toi == frag.toi)
    };
    if let Some(h) = svc.last_active.filter(|h| is(h)) {
        return Some(h);
    }
    if let Some(h) = svc.objects.iter().copied().find(|h| is(h)) {
        return Some(h);
    }

    if svc.protocol == Protocol::Route && frag.tsi == 0 {
        let bumped = svc.objects.iter().copied().find(|h| {
            core.arena.get(*h).is_some_and(|o| {
                o.tsi == 0
                    && !o.status.is_final()
                    && o.toi & SIGNALING_VERSION_MASK == frag.toi & SIGNALING_VERSION_MASK
            })
        })?;
        if let Some(obj) = core.arena.get_mut(bumped) {
            log::debug!(
                "[ROUTE] Service {} signaling TOI 0x{:08x} replaced by 0x{:08x}",
                svc.id,
                obj.toi,
                frag.toi
            );
            obj.reset(frag.tsi, frag.toi, frag.total_length, now);
            obj.kind = frag.kind;
        }
        return Some(bumped);
    }
    None
}

/// A new object started: retire the objects it supersedes.
fn take_over<T: Transport>(
    core: &mut Core<T>,
    svc: &mut Service,
    handle: ObjectHandle,
    frag: &Fragment<'_>,
    now: Instant,
) {
    let tag = protocol_tag(svc.protocol);

    if let Some(prev) = svc.last_active {
        let closed = core
            .arena
            .get(prev)
            .is_some_and(|o| o.closed && !o.status.is_final());
        if closed {
            retire(core, svc, prev, now);
            return;
        }
    }

    let timeout = core.config.reorder_timeout();
    if !frag.in_order && timeout.is_none() {
        return;
    }
    let tsi_init = svc.channel(frag.tsi).is_some_and(|c| c.tsi_init);

    let candidates: Vec<ObjectHandle> = svc
        .objects
        .iter()
        .copied()
        .filter(|&h| h != handle)
        .filter(|&h| {
            core.arena.get(h).is_some_and(|o| {
                o.tsi == frag.tsi
                    && !o.status.is_final()
                    && o.kind != ObjectKind::Signaling
                    && !(o.kind == ObjectKind::StaticFile && !o.has_data())
            })
        })
        .collect();

    for h in candidates {
        let Some(obj) = core.arena.get(h) else {
            continue;
        };
        if frag.in_order {
            if tsi_init {
                log::warn!(
                    "{} Service {} TSI {} TOI {} interrupted by TOI {}",
                    tag,
                    svc.id,
                    obj.tsi,
                    obj.toi,
                    frag.toi
                );
            } else {
                log::debug!(
                    "{} Service {} TSI {} TOI {} incomplete at tune-in",
                    tag,
                    svc.id,
                    obj.tsi,
                    obj.toi
                );
            }
        } else {
            let elapsed = now.saturating_duration_since(obj.last_gather);
            match timeout {
                Some(t) if elapsed >= t => log::warn!(
                    "{} Service {} TSI {} TOI {} idle for {:?}, forcing out",
                    tag,
                    svc.id,
                    obj.tsi,
                    obj.toi,
                    elapsed
                ),
                _ => continue,
            }
        }
        retire(core, svc, h, now);
    }
}

/// Finish an object with its data, or drop it if it has none.
fn retire<T: Transport>(core: &mut Core<T>, svc: &mut Service, handle: ObjectHandle, now: Instant) {
    let finishable = core
        .arena
        .get(handle)
        .is_some_and(|o| o.kind != ObjectKind::Signaling && o.has_data());
    if finishable {
        finish_object(core, svc, handle, now);
    } else {
        release(core, svc, handle);
    }
}

fn finalize<T: Transport>(core: &mut Core<T>, handle: ObjectHandle, now: Instant) -> ObjectStatus {
    let Some(obj) = core.arena.get_mut(handle) else {
        return ObjectStatus::DoneWithGaps;
    };
    let status = obj.finalize(now);
    if obj.kind != ObjectKind::Signaling {
        match status {
            ObjectStatus::Done => core.stats.objects_completed += 1,
            _ => core.stats.objects_partial += 1,
        }
    }
    status
}

/// Close reception of an object and dispatch what was received.
pub(crate) fn finish_object<T: Transport>(
    core: &mut Core<T>,
    svc: &mut Service,
    handle: ObjectHandle,
    now: Instant,
) {
    if svc.last_active == Some(handle) {
        svc.last_active = None;
    }
    finalize(core, handle, now);
    dispatch_object(core, svc, handle);
}

/// Name and declared type of an object.
struct Resolved {
    name: String,
    content_type: Option<String>,
    encoding: ContentEncoding,
}

fn resolve(svc: &Service, tsi: u32, toi: u32, total: u64, kind: ObjectKind) -> Option<Resolved> {
    let channel = svc.channel(tsi);
    match svc.protocol {
        Protocol::Route => {
            let file = channel.and_then(|c| c.static_file(toi));
            if let (ObjectKind::StaticFile, Some(file)) = (kind, file) {
                return Some(Resolved {
                    name: file.name.clone(),
                    content_type: file.content_type.clone(),
                    encoding: file.encoding,
                });
            }
            let name = channel
                .and_then(|c| c.decl.template.as_ref())
                .map(|t| t.format(toi))
                .unwrap_or_else(|| format!("TSI{}/TOI{}", tsi, toi));
            Some(Resolved {
                name,
                content_type: None,
                encoding: ContentEncoding::Null,
            })
        }
        Protocol::Flute => {
            let channel = channel?;
            if let Some(split) = channel
                .split_objects
                .iter()
                .find(|s| s.logical_toi() == toi && (total == 0 || s.total_length == total))
            {
                return Some(Resolved {
                    name: split.name.clone(),
                    content_type: None,
                    encoding: ContentEncoding::Null,
                });
            }
            channel.fdt_file(toi).map(|f| Resolved {
                name: f.name.clone(),
                content_type: f.content_type.clone(),
                encoding: f.encoding,
            })
        }
    }
}

enum Delivery {
    Segment,
    File,
    Manifest(&'static str),
    Gateway,
}

/// Hand a finalized object to the listener.
pub(crate) fn dispatch_object<T: Transport>(core: &mut Core<T>, svc: &mut Service, handle: ObjectHandle) {
    let tag = protocol_tag(svc.protocol);
    let Some(obj) = core.arena.get_mut(handle) else {
        return;
    };
    if obj.dispatched || !obj.status.is_final() {
        return;
    }
    let (tsi, toi, total, kind) = (obj.tsi, obj.toi, obj.total_length, obj.kind);

    let Some(resolved) = resolve(svc, tsi, toi, total, kind) else {
        if !obj.awaiting_name {
            log::info!(
                "[FLUTE] Service {} TSI {} TOI {} complete, waiting for its FDT entry",
                svc.id,
                tsi,
                toi
            );
        }
        obj.awaiting_name = true;
        return;
    };
    obj.awaiting_name = false;

    let delivery = match (svc.protocol, kind) {
        (Protocol::Route, ObjectKind::StaticFile) => Delivery::File,
        (Protocol::Route, _) => Delivery::Segment,
        (Protocol::Flute, _) => {
            if let Some(mime) =
                signaling::manifest_type(resolved.content_type.as_deref(), &resolved.name)
            {
                Delivery::Manifest(mime)
            } else if signaling::is_gateway_config(
                resolved.content_type.as_deref(),
                &obj.blob.received(total),
            ) {
                Delivery::Gateway
            } else if kind == ObjectKind::Segment {
                Delivery::Segment
            } else {
                Delivery::File
            }
        }
    };

    let partial = obj.status == ObjectStatus::DoneWithGaps;
    let first_of_kind = match svc.channel_mut(tsi) {
        Some(ch) => !std::mem::replace(&mut ch.tsi_init, true),
        None => true,
    };
    if partial {
        if first_of_kind {
            log::debug!(
                "{} Service {} {} partial at tune-in ({} of {} bytes)",
                tag,
                svc.id,
                resolved.name,
                obj.blob.received_bytes(),
                total
            );
        } else {
            log::warn!(
                "{} Service {} {} delivered with gaps ({} of {} bytes)",
                tag,
                svc.id,
                resolved.name,
                obj.blob.received_bytes(),
                total
            );
        }
    }
    obj.blob.publish(total, false, partial);
    obj.dispatched = true;
    obj.name = Some(resolved.name.clone());

    match delivery {
        Delivery::Segment | Delivery::File => {
            let updated = match delivery {
                Delivery::File if !partial => {
                    let crc = obj.blob.with_data(|data, _| {
                        crc32fast::hash(&data[..data.len().min(total as usize)])
                    });
                    let previous = svc
                        .channel_mut(tsi)
                        .and_then(|ch| ch.delivered_crc.insert(toi, crc));
                    previous.is_some_and(|p| p != crc)
                }
                _ => false,
            };
            log::info!(
                "{} Service {} {} ready ({} bytes, TSI {} TOI {})",
                tag,
                svc.id,
                resolved.name,
                total,
                tsi,
                toi
            );
            obj.announced = true;
            let info = ObjectInfo {
                filename: &resolved.name,
                blob: obj.blob.clone(),
                tsi,
                toi,
                total_size: total,
                first_of_kind,
                updated,
                corrupted: partial,
                download_time: obj.download_time,
                user_tag: &mut obj.user_tag,
            };
            let service_id = svc.id;
            core.events.emit(match delivery {
                Delivery::File => DemuxEvent::FileReady { service_id, info },
                _ => DemuxEvent::SegmentReady { service_id, info },
            });
        }
        Delivery::Manifest(mime) => {
            if partial {
                log::warn!("[FLUTE] Service {} manifest {} incomplete, ignored", svc.id, resolved.name);
            } else {
                let body = obj.blob.with_data(|data, _| {
                    compress::decode(
                        resolved.encoding,
                        &data[..data.len().min(total as usize)],
                        core.config.max_object_size,
                    )
                });
                match body {
                    Ok(body) => {
                        super::signaling::deliver_manifest(core, svc, &resolved.name, mime, &body)
                    }
                    Err(e) => log::error!("[FLUTE] Service {} manifest {}: {}", svc.id, resolved.name, e),
                }
            }
        }
        Delivery::Gateway => {
            if partial {
                log::warn!("[MABR] Service {} gateway configuration incomplete, ignored", svc.id);
            } else {
                let body = obj.blob.with_data(|data, _| {
                    compress::decode(
                        resolved.encoding,
                        &data[..data.len().min(total as usize)],
                        core.config.max_object_size,
                    )
                });
                let applied = body.and_then(|body| {
                    let text = std::str::from_utf8(&body)
                        .map_err(|_| Error::signaling("gateway configuration is not UTF-8"))?;
                    super::signaling::apply_gateway_config(core, svc, text)
                });
                if let Err(e) = applied {
                    core.stats.record_error(&e);
                    log::error!("[MABR] Service {} gateway configuration: {}", svc.id, e);
                }
            }
        }
    }

    if !core.events.is_attached() {
        release(core, svc, handle);
    }
}

/// Notify the listener of the bytes available so far.
fn push_partial<T: Transport>(core: &mut Core<T>, svc: &mut Service, handle: ObjectHandle, exposed: u64) {
    let Some(obj) = core.arena.get_mut(handle) else {
        return;
    };
    let eager = core.config.dispatch == DispatchPolicy::Eager;
    if exposed == 0 || (!eager && exposed <= obj.notified_prefix) {
        return;
    }
    let Some(resolved) = resolve(svc, obj.tsi, obj.toi, obj.total_length, obj.kind) else {
        return;
    };
    let first_of_kind = svc.channel(obj.tsi).is_some_and(|c| !c.tsi_init);
    obj.blob.publish(exposed, true, false);
    obj.notified_prefix = exposed;
    obj.announced = true;
    obj.name = Some(resolved.name.clone());
    log::debug!(
        "{} Service {} {} {} bytes available",
        protocol_tag(svc.protocol),
        svc.id,
        resolved.name,
        exposed
    );
    let info = ObjectInfo {
        filename: &resolved.name,
        blob: obj.blob.clone(),
        tsi: obj.tsi,
        toi: obj.toi,
        total_size: obj.total_length,
        first_of_kind,
        updated: false,
        corrupted: false,
        download_time: Instant::now().saturating_duration_since(obj.started),
        user_tag: &mut obj.user_tag,
    };
    core.events.emit(DemuxEvent::SegmentFragment {
        service_id: svc.id,
        info,
    });
}

/// Recycle an object, telling the listener if it knew about it.
pub(crate) fn release<T: Transport>(core: &mut Core<T>, svc: &mut Service, handle: ObjectHandle) {
    if let Some(obj) = core.arena.get(handle) {
        if obj.announced {
            let filename = obj.display_name();
            core.events.emit(DemuxEvent::FileDeleted {
                service_id: svc.id,
                filename: &filename,
                user_tag: obj.user_tag,
            });
        }
    }
    svc.objects.retain(|&h| h != handle);
    if svc.last_active == Some(handle) {
        svc.last_active = None;
    }
    core.arena.release(handle);
}

/// Release the objects of some channels (all, or only those in reception).
pub(crate) fn release_channels<T: Transport>(
    core: &mut Core<T>,
    svc: &mut Service,
    tsis: &[u32],
    only_incomplete: bool,
) {
    if tsis.is_empty() {
        return;
    }
    let doomed: Vec<ObjectHandle> = svc
        .objects
        .iter()
        .copied()
        .filter(|&h| {
            core.arena.get(h).is_some_and(|o| {
                tsis.contains(&o.tsi) && (!only_incomplete || !o.status.is_final())
            })
        })
        .collect();
    for h in doomed {
        release(core, svc, h);
    }
}

/// Force out objects in reception: all of them, or those idle longer than
/// `timeout`.
pub(crate) fn flush_service<T: Transport>(
    core: &mut Core<T>,
    svc: &mut Service,
    now: Instant,
    timeout: Option<Duration>,
) {
    let pending: Vec<ObjectHandle> = svc
        .objects
        .iter()
        .copied()
        .filter(|&h| {
            core.arena.get(h).is_some_and(|o| {
                !o.status.is_final()
                    && match timeout {
                        None => true,
                        Some(t) => {
                            o.kind != ObjectKind::Signaling
                                && now.saturating_duration_since(o.last_gather) >= t
                        }
                    }
            })
        })
        .collect();
    for h in pending {
        if timeout.is_some() {
            if let Some(obj) = core.arena.get(h) {
                log::warn!(
                    "{} Service {} TSI {} TOI {} timed out",
                    protocol_tag(svc.protocol),
                    svc.id,
                    obj.tsi,
                    obj.toi
                );
            }
        }
        retire(core, svc, h, now);
    }
}
