// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Object administration by the application.
//!
//! Delivered objects stay in memory until the application removes them,
//! purges them or lets [`Demux::remove_first_object`] recycle the oldest.

use super::{gather, Core, Demux};
use crate::error::{Error, Result};
use crate::object::{LctObject, ObjectHandle, ObjectKind, ObjectStatus};
use crate::topology::Service;
use crate::transport::Transport;

/// Does `name` designate this object?
fn names_object(svc: &Service, obj: &LctObject, name: &str) -> bool {
    if obj.name.as_deref() == Some(name) {
        return true;
    }
    let Some(channel) = svc.channel(obj.tsi) else {
        return false;
    };
    channel
        .decl
        .template
        .as_ref()
        .is_some_and(|t| t.match_name(name) == Some(obj.toi))
        || channel.static_file(obj.toi).is_some_and(|f| f.name == name)
        || channel.fdt_file(obj.toi).is_some_and(|f| f.name == name)
        || channel
            .split_objects
            .iter()
            .any(|s| s.name == name && s.logical_toi() == obj.toi)
}

fn find_object<T>(core: &Core<T>, svc: &Service, name: &str) -> Option<ObjectHandle> {
    svc.objects.iter().copied().find(|&h| {
        core.arena
            .get(h)
            .is_some_and(|o| o.kind != ObjectKind::Signaling && names_object(svc, o, name))
    })
}

impl<T: Transport> Demux<T> {
    /// Keep an object out of [`remove_first_object`](Self::remove_first_object)
    /// and [`purge_objects`](Self::purge_objects).
    pub fn force_keep_object(&mut self, service_id: u32, name: &str) -> Result<()> {
        let index = self.service_index(service_id)?;
        let svc = &self.services[index];
        let handle = find_object(&self.core, svc, name)
            .ok_or_else(|| Error::ObjectNotFound(name.to_string()))?;
        if let Some(obj) = self.core.arena.get_mut(handle) {
            obj.force_keep = true;
        }
        Ok(())
    }

    /// Remove an object by name.
    ///
    /// Returns `Ok(false)` when the object is still being received. With
    /// `purge_previous`, older segments of the same channel go too.
    pub fn remove_object(&mut self, service_id: u32, name: &str, purge_previous: bool) -> Result<bool> {
        let index = self.service_index(service_id)?;
        let svc = &mut self.services[index];
        let handle = find_object(&self.core, svc, name)
            .ok_or_else(|| Error::ObjectNotFound(name.to_string()))?;
        let Some(obj) = self.core.arena.get(handle) else {
            return Ok(false);
        };
        if svc.last_active == Some(handle) || obj.status == ObjectStatus::Receiving {
            return Ok(false);
        }

        if purge_previous && obj.kind == ObjectKind::Segment {
            let (tsi, toi) = (obj.tsi, obj.toi);
            let older: Vec<ObjectHandle> = svc
                .objects
                .iter()
                .copied()
                .filter(|&h| h != handle && svc.last_active != Some(h))
                .filter(|&h| {
                    self.core.arena.get(h).is_some_and(|o| {
                        o.tsi == tsi
                            && o.toi < toi
                            && o.kind == ObjectKind::Segment
                            && o.status != ObjectStatus::Receiving
                    })
                })
                .collect();
            for h in older {
                gather::release(&mut self.core, svc, h);
            }
        }
        log::debug!("[ROUTE] Service {} object {} removed", service_id, name);
        gather::release(&mut self.core, svc, handle);
        Ok(true)
    }

    /// Recycle the oldest delivered object.
    ///
    /// Static files are skipped. Returns `false` when the oldest candidate
    /// is still in reception or pinned by
    /// [`force_keep_object`](Self::force_keep_object).
    pub fn remove_first_object(&mut self, service_id: u32) -> bool {
        let Ok(index) = self.service_index(service_id) else {
            return false;
        };
        let svc = &mut self.services[index];

        let mut victim = None;
        for &h in &svc.objects {
            if svc.last_active == Some(h) {
                continue;
            }
            let Some(obj) = self.core.arena.get(h) else {
                continue;
            };
            if !obj.status.is_final() || obj.force_keep {
                return false;
            }
            if obj.kind == ObjectKind::Segment {
                victim = Some(h);
                break;
            }
        }
        match victim {
            Some(h) => {
                gather::release(&mut self.core, svc, h);
                true
            }
            None => false,
        }
    }

    /// Recycle every delivered segment that is not pinned.
    ///
    /// Returns the number of objects released.
    pub fn purge_objects(&mut self, service_id: u32) -> Result<usize> {
        let index = self.service_index(service_id)?;
        let svc = &mut self.services[index];
        let doomed: Vec<ObjectHandle> = svc
            .objects
            .iter()
            .copied()
            .filter(|&h| svc.last_active != Some(h))
            .filter(|&h| {
                self.core.arena.get(h).is_some_and(|o| {
                    o.kind == ObjectKind::Segment && o.status.is_final() && !o.force_keep
                })
            })
            .collect();
        for &h in &doomed {
            gather::release(&mut self.core, svc, h);
        }
        if !doomed.is_empty() {
            log::debug!("[ROUTE] Service {} purged {} objects", service_id, doomed.len());
        }
        Ok(doomed.len())
    }

    fn service_index(&self, service_id: u32) -> Result<usize> {
        self.services
            .iter()
            .position(|s| s.id == service_id)
            .ok_or(Error::UnknownService(service_id))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::DemuxConfig;
    use crate::demux::Demux;
    use crate::dispatch::DemuxEvent;
    use crate::error::Error;
    use crate::lct::LctPacketBuilder;
    use crate::topology::{Channel, ChannelDecl, Protocol, Session, StaticFile, ToiTemplate};
    use crate::transport::SimTransport;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn demux(deleted: Rc<RefCell<Vec<String>>>) -> Demux<SimTransport> {
        let config = DemuxConfig::single_service(1, Protocol::Route, "239.0.0.1:5000".parse().unwrap());
        let mut demux = Demux::with_listener(config, SimTransport::new(), move |ev: DemuxEvent<'_>| {
            if let DemuxEvent::FileDeleted { filename, .. } = ev {
                deleted.borrow_mut().push(filename.to_string());
            }
        })
        .unwrap();
        let mut decl = ChannelDecl::new(4);
        decl.template = Some(ToiTemplate::parse("s-$TOI$.m4s").unwrap());
        decl.static_files.push(StaticFile::new(100, "init.mp4"));
        let mut session = Session::new(None);
        session.channels.push(Channel::new(decl));
        demux.services[0].sessions.push(session);
        demux
    }

    fn feed(demux: &mut Demux<SimTransport>, toi: u32, body: &[u8], close: bool) {
        let socket = demux.services[0].socket.unwrap();
        let mut builder = LctPacketBuilder::route(4, toi)
            .codepoint(1)
            .transfer_length(4)
            .payload(body);
        if close {
            builder = builder.close();
        }
        let _ = demux.handle_datagram(socket, &builder.build());
    }

    #[test]
    fn test_remove_first_skips_static_and_stops_on_pinned() {
        let deleted = Rc::new(RefCell::new(Vec::new()));
        let mut demux = demux(deleted.clone());
        feed(&mut demux, 100, b"init", true);
        feed(&mut demux, 1, b"aaaa", true);
        feed(&mut demux, 2, b"bbbb", true);

        assert!(demux.remove_first_object(1));
        assert_eq!(*deleted.borrow(), vec!["s-1.m4s"]);

        demux.force_keep_object(1, "s-2.m4s").unwrap();
        assert!(!demux.remove_first_object(1));
        assert_eq!(demux.purge_objects(1).unwrap(), 0);
        assert!(matches!(
            demux.force_keep_object(1, "s-9.m4s"),
            Err(Error::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_remove_object_busy_and_previous() {
        let deleted = Rc::new(RefCell::new(Vec::new()));
        let mut demux = demux(deleted.clone());
        feed(&mut demux, 1, b"aaaa", true);
        feed(&mut demux, 2, b"bbbb", true);
        feed(&mut demux, 3, b"cc", false);

        assert!(!demux.remove_object(1, "s-3.m4s", false).unwrap());
        assert!(demux.remove_object(1, "s-2.m4s", true).unwrap());
        assert_eq!(*deleted.borrow(), vec!["s-1.m4s", "s-2.m4s"]);
        assert_eq!(demux.service(1).unwrap().object_count(), 1);
    }

    #[test]
    fn test_purge_keeps_static_files() {
        let deleted = Rc::new(RefCell::new(Vec::new()));
        let mut demux = demux(deleted);
        feed(&mut demux, 100, b"init", true);
        feed(&mut demux, 1, b"aaaa", true);
        feed(&mut demux, 2, b"bbbb", true);
        assert_eq!(demux.purge_objects(1).unwrap(), 2);
        assert_eq!(demux.service(1).unwrap().object_count(), 1);
        assert!(matches!(demux.purge_objects(7), Err(Error::UnknownService(7))));
    }
}
