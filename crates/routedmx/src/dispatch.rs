// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Events delivered to the application.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::object::ObjectBlob;

/// When objects are handed to the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Only complete (or given-up) objects.
    #[default]
    EndOnly,
    /// Also each time the contiguous prefix from offset 0 grows.
    Progressive,
    /// Also on every fragment adding bytes, even out of order.
    Eager,
}

impl DispatchPolicy {
    /// Should a partial notification follow a merge?
    ///
    /// `prefix_grew`: the contiguous prefix starting at offset 0 got longer.
    /// `added`: the fragment carried at least one new byte.
    pub fn notify_partial(self, prefix_grew: bool, added: bool) -> bool {
        match self {
            DispatchPolicy::EndOnly => false,
            DispatchPolicy::Progressive => prefix_grew,
            DispatchPolicy::Eager => added,
        }
    }
}

/// An object handed to the listener.
#[derive(Debug)]
pub struct ObjectInfo<'a> {
    pub filename: &'a str,
    /// Shared buffer; stays valid after the callback returns.
    pub blob: ObjectBlob,
    pub tsi: u32,
    pub toi: u32,
    /// Declared length, 0 while unknown.
    pub total_size: u64,
    /// First object dispatched on this channel.
    pub first_of_kind: bool,
    /// Static file whose content differs from the previous delivery.
    pub updated: bool,
    /// Delivered with missing bytes.
    pub corrupted: bool,
    pub download_time: Duration,
    /// Caller-owned tag kept with the object, reported on deletion.
    pub user_tag: &'a mut Option<u64>,
}

/// Notifications emitted while processing.
#[derive(Debug)]
pub enum DemuxEvent<'a> {
    /// A service was created from signaling or configuration.
    ServiceFound { service_id: u32 },
    /// A service disappeared from the service list.
    ServiceRemoved { service_id: u32 },
    /// The service list was applied.
    ServiceListRefreshed { services: usize },
    /// A new manifest version is available.
    ManifestReady {
        service_id: u32,
        filename: &'a str,
        mime: &'a str,
        data: &'a [u8],
    },
    /// A static file (init segment, FDT-declared file) is complete.
    FileReady {
        service_id: u32,
        info: ObjectInfo<'a>,
    },
    /// A segment is complete or given up.
    SegmentReady {
        service_id: u32,
        info: ObjectInfo<'a>,
    },
    /// More bytes of a segment are available.
    SegmentFragment {
        service_id: u32,
        info: ObjectInfo<'a>,
    },
    /// A fragment arrived for an object already dispatched.
    LateDataIgnored {
        service_id: u32,
        tsi: u32,
        toi: u32,
        offset: u64,
        size: u64,
    },
    /// A delivered object was recycled.
    FileDeleted {
        service_id: u32,
        filename: &'a str,
        user_tag: Option<u64>,
    },
}

impl DemuxEvent<'_> {
    pub fn service_id(&self) -> Option<u32> {
        match self {
            DemuxEvent::ServiceFound { service_id }
            | DemuxEvent::ServiceRemoved { service_id }
            | DemuxEvent::ManifestReady { service_id, .. }
            | DemuxEvent::FileReady { service_id, .. }
            | DemuxEvent::SegmentReady { service_id, .. }
            | DemuxEvent::SegmentFragment { service_id, .. }
            | DemuxEvent::LateDataIgnored { service_id, .. }
            | DemuxEvent::FileDeleted { service_id, .. } => Some(*service_id),
            DemuxEvent::ServiceListRefreshed { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DemuxEvent::ServiceFound { .. } => "service-found",
            DemuxEvent::ServiceRemoved { .. } => "service-removed",
            DemuxEvent::ServiceListRefreshed { .. } => "service-list",
            DemuxEvent::ManifestReady { .. } => "manifest",
            DemuxEvent::FileReady { .. } => "file",
            DemuxEvent::SegmentReady { .. } => "segment",
            DemuxEvent::SegmentFragment { .. } => "fragment",
            DemuxEvent::LateDataIgnored { .. } => "late",
            DemuxEvent::FileDeleted { .. } => "deleted",
        }
    }
}

/// Receives demultiplexer events.
pub trait DemuxListener {
    fn on_event(&mut self, event: DemuxEvent<'_>);
}

impl<F> DemuxListener for F
where
    F: FnMut(DemuxEvent<'_>),
{
    fn on_event(&mut self, event: DemuxEvent<'_>) {
        self(event)
    }
}
