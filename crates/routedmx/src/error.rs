// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Demultiplexer error type.

use std::io;
use std::net::SocketAddrV4;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors reported by the demultiplexer.
///
/// Per-datagram errors (malformed header, unknown channel, oversize
/// declarations) are counted and logged by [`crate::Demux::process`]; they
/// only surface to callers of [`crate::Demux::handle_datagram`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed LCT header: {0}")]
    MalformedHeader(String),

    #[error("invalid declared size: offset {offset} + {size} bytes exceeds {limit}")]
    InvalidDeclaredSize { offset: u64, size: u64, limit: u64 },

    #[error("unknown channel TSI {tsi} (TOI {toi})")]
    UnknownChannel { tsi: u32, toi: u32 },

    #[error("signaling parse error: {0}")]
    SignalingParse(String),

    #[error("stale or duplicate data on TSI {tsi} TOI {toi}")]
    StaleOrDuplicate { tsi: u32, toi: u32 },

    #[error("unknown service {0}")]
    UnknownService(u32),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("failed to open {endpoint}: {source}")]
    TransportSetup {
        endpoint: SocketAddrV4,
        #[source]
        source: io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedHeader(msg.into())
    }

    pub(crate) fn signaling(msg: impl Into<String>) -> Self {
        Error::SignalingParse(msg.into())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
