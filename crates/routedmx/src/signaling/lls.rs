// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ATSC 3.0 Low Level Signaling (A/331 §6.3).
//!
//! ```text
//! LLS_table_id(8) | LLS_group_id(8) | group_count_minus1(8) | LLS_table_version(8) | gzip(XML)
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};

use super::compress;
use crate::error::{Error, Result};

/// Well-known LLS destination.
pub const LLS_ENDPOINT: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(224, 0, 23, 60), 4937);

/// LLS table kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlsTableKind {
    Slt,
    Rrt,
    SystemTime,
    Aeat,
}

impl LlsTableKind {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(LlsTableKind::Slt),
            2 => Some(LlsTableKind::Rrt),
            3 => Some(LlsTableKind::SystemTime),
            4 => Some(LlsTableKind::Aeat),
            _ => None,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            LlsTableKind::Slt => 0,
            LlsTableKind::Rrt => 1,
            LlsTableKind::SystemTime => 2,
            LlsTableKind::Aeat => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LlsTableKind::Slt => "SLT",
            LlsTableKind::Rrt => "RRT",
            LlsTableKind::SystemTime => "SystemTime",
            LlsTableKind::Aeat => "AEAT",
        }
    }
}

/// Fixed LLS header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlsHeader {
    pub table_id: u8,
    pub group_id: u8,
    pub group_count: u16,
    pub version: u8,
}

impl LlsHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(Error::signaling(format!(
                "LLS table of {} bytes too short",
                buf.len()
            )));
        }
        Ok(Self {
            table_id: buf[0],
            group_id: buf[1],
            group_count: buf[2] as u16 + 1,
            version: buf[3],
        })
    }

    pub fn kind(&self) -> Option<LlsTableKind> {
        LlsTableKind::from_id(self.table_id)
    }
}

/// Inflate the XML body of an LLS table.
pub fn table_text(buf: &[u8], limit: u64) -> Result<String> {
    let raw = compress::gunzip(buf.get(4..).unwrap_or(&[]), limit)?;
    String::from_utf8(raw).map_err(|e| Error::signaling(format!("LLS table is not UTF-8: {}", e)))
}
