// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Layered Coding Transport (RFC 5651) packet headers.
//!
//! Two header profiles are decoded:
//!
//! - **ROUTE** (ATSC A/331): 32-bit TSI and TOI, a 32-bit start offset
//!   follows the header extensions.
//! - **FLUTE** (RFC 6726): 16- or 32-bit TSI/TOI, Compact No-Code FEC
//!   payload ID (source block number + encoding symbol ID).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   V   | C |PSI|S| O |H|Res|A|B|   HDR_LEN     | Codepoint (CP)|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Congestion Control Information (CCI, length = 32*(C+1) bits)  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Transport Session Identifier (TSI, length = 32*S+16*H bits)  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Transport Object Identifier (TOI, length = 32*O+16*H bits)  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                Header Extensions (if applicable)              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

mod builder;
mod header;

pub use builder::LctPacketBuilder;
pub use header::{parse_flute, parse_route};

use crate::error::{Error, Result};

/// FEC Object Transmission Information (RFC 5775, FEC encoding ID 0).
pub const EXT_FTI: u8 = 64;
/// 48-bit transfer object length (HEL must be 2).
pub const EXT_TOL48: u8 = 67;
/// FDT instance header (FLUTE).
pub const EXT_FDT: u8 = 192;
/// Content encoding of the FDT instance (FLUTE).
pub const EXT_CENC: u8 = 193;
/// 24-bit transfer object length.
pub const EXT_TOL24: u8 = 194;

/// Size limits applied while decoding.
#[derive(Debug, Clone, Copy)]
pub struct LctLimits {
    /// Largest object a header may declare.
    pub max_object_size: u64,
    /// Largest number of header extensions in one packet.
    pub max_header_extensions: usize,
}

impl Default for LctLimits {
    fn default() -> Self {
        Self {
            max_object_size: crate::config::DEFAULT_MAX_OBJECT_SIZE,
            max_header_extensions: 16,
        }
    }
}

/// Content encoding announced by `EXT_CENC` or an FDT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentEncoding {
    #[default]
    Null,
    Zlib,
    Deflate,
    Gzip,
    Unknown(u8),
}

impl ContentEncoding {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ContentEncoding::Null,
            1 => ContentEncoding::Zlib,
            2 => ContentEncoding::Deflate,
            3 => ContentEncoding::Gzip,
            other => ContentEncoding::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ContentEncoding::Null => 0,
            ContentEncoding::Zlib => 1,
            ContentEncoding::Deflate => 2,
            ContentEncoding::Gzip => 3,
            ContentEncoding::Unknown(c) => c,
        }
    }

    /// Parse the `Content-Encoding` FDT attribute.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "gzip" => ContentEncoding::Gzip,
            "deflate" => ContentEncoding::Deflate,
            "zlib" => ContentEncoding::Zlib,
            _ => ContentEncoding::Null,
        }
    }
}

/// FEC Object Transmission Information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FecObjectInfo {
    pub transfer_length: u64,
    pub symbol_length: u16,
    pub max_source_block_length: u32,
}

/// FDT instance header extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdtInstanceExt {
    pub version: u8,
    pub instance_id: u32,
}

/// FEC payload ID following the header extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecPayloadId {
    /// ROUTE: byte offset of the payload in the object.
    StartOffset(u32),
    /// FLUTE Compact No-Code: source block number and encoding symbol ID.
    Block { sbn: u16, esi: u16 },
}

impl FecPayloadId {
    /// Byte offset in the object, given the symbol layout for block IDs.
    ///
    /// Returns `None` when a block ID needs a layout that is not known.
    pub fn byte_offset(&self, symbol_length: u16, max_source_block_length: Option<u32>) -> Option<u64> {
        match *self {
            FecPayloadId::StartOffset(offset) => Some(offset as u64),
            FecPayloadId::Block { sbn, esi } => {
                let symbols = if sbn == 0 {
                    esi as u64
                } else {
                    sbn as u64 * max_source_block_length? as u64 + esi as u64
                };
                Some(symbols * symbol_length as u64)
            }
        }
    }
}

/// Decoded LCT packet header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LctHeader {
    pub codepoint: u8,
    pub congestion_control: u32,
    pub tsi: u32,
    pub toi: u32,
    /// Sender closes the session (A flag).
    pub close_session: bool,
    /// Last packet of the object (B flag).
    pub close_object: bool,
    /// Object length from `EXT_TOL24`/`EXT_TOL48` or `EXT_FTI`.
    pub transfer_length: Option<u64>,
    pub fdt_instance: Option<FdtInstanceExt>,
    pub content_encoding: Option<ContentEncoding>,
    pub fti: Option<FecObjectInfo>,
    pub fec_payload_id: FecPayloadId,
    /// Index of the first payload byte in the datagram.
    pub payload_offset: usize,
}

impl LctHeader {
    /// Payload slice of the datagram this header was decoded from.
    pub fn payload<'a>(&self, datagram: &'a [u8]) -> &'a [u8] {
        datagram.get(self.payload_offset..).unwrap_or(&[])
    }
}

/// Check that `size` bytes at `offset` fit the declared length and the limit.
pub fn validate_range(offset: u64, size: u64, declared: Option<u64>, limit: u64) -> Result<()> {
    let end = offset.saturating_add(size);
    if end > limit {
        return Err(Error::InvalidDeclaredSize {
            offset,
            size,
            limit,
        });
    }
    if let Some(total) = declared.filter(|t| *t > 0) {
        if end > total {
            return Err(Error::InvalidDeclaredSize {
                offset,
                size,
                limit: total,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_offset() {
        let id = FecPayloadId::Block { sbn: 2, esi: 3 };
        assert_eq!(id.byte_offset(1000, Some(10)), Some(23_000));
        assert_eq!(id.byte_offset(1000, None), None);

        let first = FecPayloadId::Block { sbn: 0, esi: 4 };
        assert_eq!(first.byte_offset(500, None), Some(2000));

        assert_eq!(FecPayloadId::StartOffset(77).byte_offset(0, None), Some(77));
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range(0, 100, Some(100), 1000).is_ok());
        assert!(validate_range(0, 100, None, 1000).is_ok());
        assert!(validate_range(50, 100, Some(100), 1000).is_err());
        assert!(validate_range(990, 20, None, 1000).is_err());
        // Zero declared length means unknown.
        assert!(validate_range(10, 10, Some(0), 1000).is_ok());
    }

    #[test]
    fn test_content_encoding_codes() {
        assert_eq!(ContentEncoding::from_code(3), ContentEncoding::Gzip);
        assert_eq!(ContentEncoding::from_code(9), ContentEncoding::Unknown(9));
        assert_eq!(ContentEncoding::from_name("GZIP"), ContentEncoding::Gzip);
        assert_eq!(ContentEncoding::Deflate.code(), 2);
    }
}
