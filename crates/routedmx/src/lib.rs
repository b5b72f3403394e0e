// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # routedmx - ROUTE/FLUTE multicast object demultiplexer
//!
//! Receives ATSC 3.0 ROUTE and FLUTE (DVB-MABR, generic file delivery)
//! multicast sessions, reassembles the transported objects and hands them to
//! the application as they complete.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use routedmx::{Demux, DemuxConfig, DemuxEvent, Result, UdpTransport};
//!
//! fn main() -> Result<()> {
//!     let config = DemuxConfig::atsc3();
//!     let transport = UdpTransport::new(None, config.socket_buffer_size)?;
//!     let mut demux = Demux::with_listener(config, transport, |event: DemuxEvent<'_>| {
//!         if let DemuxEvent::SegmentReady { info, .. } = event {
//!             println!("{} ({} bytes)", info.filename, info.total_size);
//!         }
//!     })?;
//!
//!     loop {
//!         demux.process(Some(std::time::Duration::from_millis(100)))?;
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        Application (DemuxListener)                  |
//! +---------------------------------------------------------------------+
//! |  Dispatch     | end-only / progressive / eager, late data, deletion |
//! +---------------------------------------------------------------------+
//! |  Objects      | fragment lists, shared blobs, arena + reservoir     |
//! +---------------------------------------------------------------------+
//! |  Signaling    | LLS/SLT, S-TSID, MBMS envelope, FDT, MABR gateway   |
//! |  Topology     | Service -> Session -> Channel (TSI), reconciliation |
//! +---------------------------------------------------------------------+
//! |  LCT          | ROUTE and FLUTE header profiles, extensions         |
//! +---------------------------------------------------------------------+
//! |  Transport    | UDP multicast (socket2 + mio) | in-memory replay    |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Demux`] | The demultiplexer, driven by [`Demux::process`] |
//! | [`DemuxConfig`] | Bootstrap, dispatch policy, limits (TOML loadable) |
//! | [`DemuxListener`] | Receives [`DemuxEvent`]s, implemented for closures |
//! | [`ObjectBlob`] | Object bytes shared with the application |
//! | [`Transport`] | Socket boundary: [`UdpTransport`] or [`SimTransport`] |

mod config;
mod demux;
mod dispatch;
mod error;
pub mod lct;
mod object;
pub mod signaling;
mod topology;
mod transport;

pub use config::{
    ConfigError, DemuxConfig, ServiceConfig, DEFAULT_MAX_OBJECT_SIZE,
    DEFAULT_REORDER_TIMEOUT_MS, DEFAULT_SOCKET_BUFFER_SIZE,
};
pub use demux::{Demux, DemuxStats, ProcessStatus};
pub use dispatch::{DemuxEvent, DemuxListener, DispatchPolicy, ObjectInfo};
pub use error::{Error, Result};
pub use object::{FragmentRange, ObjectBlob, ObjectStatus};
pub use topology::{
    Channel, ChannelDecl, CodePoint, Protocol, RepresentationRef, Service, ServiceSelector,
    Session, SessionDecl, SignalingState, SplitObject, SplitPart, StaticFile, ToiTemplate,
    TuneMode, GHOST_INIT_NAME, GHOST_INIT_TOI,
};
pub use transport::{resolve_interface, SimTransport, SocketId, Transport, UdpTransport};
