// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport objects under reassembly.
//!
//! Objects are identified by `(TSI, TOI)` within a service and live in an
//! [`ObjectArena`] slot. Their bytes sit in an [`ObjectBlob`] that can be
//! handed to listeners while reception continues.

mod arena;
mod blob;
mod fragments;

pub(crate) use arena::{ObjectArena, ObjectHandle};
pub use blob::ObjectBlob;
pub use fragments::{FragmentRange, MergeOutcome};

use std::time::{Duration, Instant};

use crate::lct::ContentEncoding;

/// Reception state of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ObjectStatus {
    /// Allocated, no byte received yet.
    Init,
    /// At least one fragment received.
    Receiving,
    /// All declared bytes received.
    Done,
    /// Closed or taken over while coverage was incomplete.
    DoneWithGaps,
}

impl ObjectStatus {
    pub fn is_final(self) -> bool {
        matches!(self, ObjectStatus::Done | ObjectStatus::DoneWithGaps)
    }
}

/// What an object carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObjectKind {
    /// Media segment named through a TOI template or the FDT.
    Segment,
    /// File declared in the channel signaling (init segments, ghost init).
    StaticFile,
    /// Signaling bundle, FDT instance or other service metadata.
    Signaling,
}

#[derive(Debug)]
pub(crate) struct LctObject {
    pub tsi: u32,
    pub toi: u32,
    /// Declared length, 0 while unknown.
    pub total_length: u64,
    pub blob: ObjectBlob,
    pub status: ObjectStatus,
    pub kind: ObjectKind,
    pub name: Option<String>,
    pub content_encoding: Option<ContentEncoding>,
    /// Final notification sent.
    pub dispatched: bool,
    /// Close flag received.
    pub closed: bool,
    /// Reception requires in-order delivery.
    pub in_order: bool,
    pub force_keep: bool,
    /// A listener was told about this object by name.
    pub announced: bool,
    /// Completed before a name was known (FLUTE, FDT pending).
    pub awaiting_name: bool,
    pub started: Instant,
    pub last_gather: Instant,
    pub download_time: Duration,
    pub nb_recv_frags: u32,
    /// Payload bytes received, duplicates included.
    pub recv_bytes: u64,
    /// Contiguous prefix already notified in progressive mode.
    pub notified_prefix: u64,
    pub user_tag: Option<u64>,
}

impl LctObject {
    pub fn new(now: Instant) -> Self {
        Self {
            tsi: 0,
            toi: 0,
            total_length: 0,
            blob: ObjectBlob::new(),
            status: ObjectStatus::Init,
            kind: ObjectKind::Segment,
            name: None,
            content_encoding: None,
            dispatched: false,
            closed: false,
            in_order: false,
            force_keep: false,
            announced: false,
            awaiting_name: false,
            started: now,
            last_gather: now,
            download_time: Duration::ZERO,
            nb_recv_frags: 0,
            recv_bytes: 0,
            notified_prefix: 0,
            user_tag: None,
        }
    }

    /// Prepare a slot for a new `(tsi, toi)`.
    ///
    /// A blob still referenced by a listener is detached, never reused.
    pub fn reset(&mut self, tsi: u32, toi: u32, total_length: u64, now: Instant) {
        let blob = if self.blob.is_shared() {
            ObjectBlob::new()
        } else {
            self.blob.clear();
            std::mem::take(&mut self.blob)
        };
        *self = LctObject::new(now);
        self.blob = blob;
        self.tsi = tsi;
        self.toi = toi;
        self.total_length = total_length;
        if total_length > 0 {
            self.blob.reserve(total_length);
        }
    }

    /// Apply a length declared by a later packet.
    ///
    /// Returns `true` when a conflicting length forced the received ranges
    /// to be dropped. A blob still held by a listener keeps its bytes.
    pub fn declare_length(&mut self, total: u64) -> bool {
        if total == 0 || total == self.total_length {
            return false;
        }
        if self.total_length == 0 && self.blob.high_water() <= total {
            self.total_length = total;
            self.blob.reserve(total);
            return false;
        }
        if self.blob.is_shared() {
            self.blob = ObjectBlob::new();
        } else {
            self.blob.clear();
        }
        self.total_length = total;
        self.blob.reserve(total);
        self.status = ObjectStatus::Init;
        self.nb_recv_frags = 0;
        self.notified_prefix = 0;
        self.closed = false;
        true
    }

    /// Copy a fragment into the object.
    pub fn merge(&mut self, offset: u64, payload: &[u8], now: Instant) -> MergeOutcome {
        self.last_gather = now;
        self.nb_recv_frags += 1;
        self.recv_bytes += payload.len() as u64;
        if self.status == ObjectStatus::Init {
            self.status = ObjectStatus::Receiving;
        }
        self.blob.write(offset, payload, self.total_length)
    }

    pub fn is_complete(&self) -> bool {
        self.blob.is_complete(self.total_length)
    }

    /// Any byte received.
    pub fn has_data(&self) -> bool {
        self.blob.nb_ranges() > 0
    }

    /// Close reception: `Done` if complete, `DoneWithGaps` otherwise.
    pub fn finalize(&mut self, now: Instant) -> ObjectStatus {
        if self.total_length == 0 {
            self.total_length = self.blob.high_water();
        }
        self.status = if self.is_complete() {
            ObjectStatus::Done
        } else {
            ObjectStatus::DoneWithGaps
        };
        self.download_time = now.saturating_duration_since(self.started);
        self.status
    }

    /// Name shown to listeners, if resolved.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("TSI{}/TOI{}", self.tsi, self.toi))
    }
}
