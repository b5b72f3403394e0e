// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Apply a new session/channel declaration to a live topology.
//!
//! Channels are matched by TSI and sessions by destination, so a refresh
//! carrying the same declaration changes nothing, and a channel moving to
//! another session keeps its reception state.

use std::net::SocketAddrV4;

use super::channel::{Channel, ChannelDecl};
use super::service::Session;

/// Declared session: a destination and its channels.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionDecl {
    /// `None` for the service's own destination.
    pub endpoint: Option<SocketAddrV4>,
    pub channels: Vec<ChannelDecl>,
}

impl SessionDecl {
    pub fn new(endpoint: Option<SocketAddrV4>) -> Self {
        Self {
            endpoint,
            channels: Vec::new(),
        }
    }
}

/// What a reconciliation did.
#[derive(Debug, Default)]
pub(crate) struct TopologyChanges {
    /// Sessions no longer declared; their sockets must be closed.
    pub closed: Vec<Session>,
    pub opened_sessions: usize,
    pub added: Vec<u32>,
    pub removed: Vec<u32>,
    pub updated: Vec<u32>,
    pub moved: Vec<u32>,
    /// TSIs declared more than once; only the first declaration is kept.
    pub duplicates: Vec<u32>,
}

impl TopologyChanges {
    pub fn is_empty(&self) -> bool {
        self.closed.is_empty()
            && self.opened_sessions == 0
            && self.added.is_empty()
            && self.removed.is_empty()
            && self.updated.is_empty()
            && self.moved.is_empty()
    }
}

/// Merge declarations sharing a destination.
fn normalize(desired: Vec<SessionDecl>) -> Vec<SessionDecl> {
    let mut out: Vec<SessionDecl> = Vec::with_capacity(desired.len());
    for decl in desired {
        match out.iter_mut().find(|d| d.endpoint == decl.endpoint) {
            Some(existing) => existing.channels.extend(decl.channels),
            None => out.push(decl),
        }
    }
    out
}

pub(crate) fn reconcile(sessions: &mut Vec<Session>, desired: Vec<SessionDecl>) -> TopologyChanges {
    let mut changes = TopologyChanges::default();

    let mut pool: Vec<(Option<SocketAddrV4>, Channel)> = Vec::new();
    let mut placed: Vec<u32> = Vec::new();
    let mut previous = std::mem::take(sessions);
    for session in &mut previous {
        let endpoint = session.endpoint;
        pool.extend(session.channels.drain(..).map(|c| (endpoint, c)));
    }

    for decl in normalize(desired) {
        let mut session = match previous.iter().position(|s| s.endpoint == decl.endpoint) {
            Some(i) => previous.swap_remove(i),
            None => {
                changes.opened_sessions += 1;
                Session::new(decl.endpoint)
            }
        };

        for cdecl in decl.channels {
            let tsi = cdecl.tsi;
            if placed.contains(&tsi) {
                changes.duplicates.push(tsi);
                continue;
            }
            placed.push(tsi);
            match pool.iter().position(|(_, c)| c.tsi() == tsi) {
                Some(pos) => {
                    let (from, mut channel) = pool.swap_remove(pos);
                    if from != decl.endpoint {
                        changes.moved.push(tsi);
                    }
                    if channel.decl != cdecl {
                        channel.redeclare(cdecl);
                        changes.updated.push(tsi);
                    }
                    session.channels.push(channel);
                }
                None => {
                    changes.added.push(tsi);
                    session.channels.push(Channel::new(cdecl));
                }
            }
        }
        sessions.push(session);
    }

    changes.removed = pool.into_iter().map(|(_, c)| c.tsi()).collect();
    changes.closed = previous;
    changes
}
