// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LCT header decoding for the ROUTE and FLUTE profiles.

use super::{
    validate_range, ContentEncoding, FdtInstanceExt, FecObjectInfo, FecPayloadId, LctHeader,
    LctLimits, EXT_CENC, EXT_FDT, EXT_FTI, EXT_TOL24, EXT_TOL48,
};
use crate::error::{Error, Result};

const LCT_VERSION: u8 = 1;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Profile {
    Route,
    Flute,
}

/// Big-endian cursor over the header bytes.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| Error::malformed(format!("truncated at byte {}", self.pos)))?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Unsigned integer of `len` bytes (at most 4).
    fn uint(&mut self, len: usize) -> Result<u32> {
        let b = self.take(len)?;
        Ok(b.iter().fold(0u32, |acc, x| (acc << 8) | *x as u32))
    }
}

fn be_u24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
}

fn be_u48(b: &[u8]) -> u64 {
    b[..6].iter().fold(0u64, |acc, x| (acc << 8) | *x as u64)
}

/// Decode a ROUTE packet header (A/331 profile).
pub fn parse_route(buf: &[u8], limits: &LctLimits) -> Result<LctHeader> {
    parse(buf, limits, Profile::Route)
}

/// Decode a FLUTE packet header (Compact No-Code FEC).
pub fn parse_flute(buf: &[u8], limits: &LctLimits) -> Result<LctHeader> {
    parse(buf, limits, Profile::Flute)
}

fn parse(buf: &[u8], limits: &LctLimits, profile: Profile) -> Result<LctHeader> {
    let mut r = Reader::new(buf);

    let b0 = r.u8()?;
    let version = b0 >> 4;
    let c = (b0 >> 2) & 0x3;
    let psi = b0 & 0x3;
    if version != LCT_VERSION {
        return Err(Error::malformed(format!("LCT version {} not supported", version)));
    }
    if c != 0 {
        return Err(Error::malformed(format!(
            "congestion control field of {} bits not supported",
            32 * (c as u32 + 1)
        )));
    }

    let b1 = r.u8()?;
    let s = (b1 >> 7) & 0x1;
    let o = (b1 >> 5) & 0x3;
    let h = (b1 >> 4) & 0x1;
    let close_session = b1 & 0x2 != 0;
    let close_object = b1 & 0x1 != 0;

    let hdr_len = r.u8()? as usize * 4;
    let codepoint = r.u8()?;

    let (tsi_len, toi_len) = match profile {
        Profile::Route => {
            if psi == 0 {
                return Err(Error::malformed("PSI 0 (FEC repair) packets not supported"));
            }
            if psi != 0b10 {
                return Err(Error::malformed(format!("PSI {:#04b} not supported", psi)));
            }
            if s != 1 || o != 1 || h != 0 {
                return Err(Error::malformed(format!(
                    "ROUTE requires 32-bit TSI/TOI (S={} O={} H={})",
                    s, o, h
                )));
            }
            (4, 4)
        }
        Profile::Flute => {
            let tsi_len = 4 * s as usize + 2 * h as usize;
            let toi_len = 4 * o as usize + 2 * h as usize;
            if tsi_len == 0 || tsi_len > 4 || toi_len == 0 || toi_len > 4 {
                return Err(Error::malformed(format!(
                    "TSI/TOI widths {}/{} bits not supported",
                    tsi_len * 8,
                    toi_len * 8
                )));
            }
            (tsi_len, toi_len)
        }
    };

    let fixed = 8 + tsi_len + toi_len;
    if hdr_len < fixed {
        return Err(Error::malformed(format!(
            "header length {} shorter than fixed part {}",
            hdr_len, fixed
        )));
    }
    if buf.len() < hdr_len {
        return Err(Error::malformed(format!(
            "datagram of {} bytes shorter than header length {}",
            buf.len(),
            hdr_len
        )));
    }

    let congestion_control = r.u32()?;
    let tsi = r.uint(tsi_len)?;
    let toi = r.uint(toi_len)?;

    let mut header = LctHeader {
        codepoint,
        congestion_control,
        tsi,
        toi,
        close_session,
        close_object,
        transfer_length: None,
        fdt_instance: None,
        content_encoding: None,
        fti: None,
        fec_payload_id: FecPayloadId::StartOffset(0),
        payload_offset: 0,
    };

    parse_extensions(&buf[fixed..hdr_len], limits, &mut header)?;

    let mut r = Reader::new(&buf[hdr_len..]);
    header.fec_payload_id = match profile {
        Profile::Route => FecPayloadId::StartOffset(r.u32()?),
        Profile::Flute => {
            if codepoint != 0 {
                return Err(Error::malformed(format!(
                    "FEC encoding ID {} not supported",
                    codepoint
                )));
            }
            FecPayloadId::Block {
                sbn: r.u16()?,
                esi: r.u16()?,
            }
        }
    };
    header.payload_offset = hdr_len + r.pos;

    if let Some(total) = header.transfer_length {
        if total > limits.max_object_size {
            return Err(Error::InvalidDeclaredSize {
                offset: 0,
                size: total,
                limit: limits.max_object_size,
            });
        }
    }
    if let FecPayloadId::StartOffset(offset) = header.fec_payload_id {
        let size = (buf.len() - header.payload_offset) as u64;
        validate_range(
            offset as u64,
            size,
            header.transfer_length,
            limits.max_object_size,
        )?;
    }

    Ok(header)
}

fn parse_extensions(mut ext: &[u8], limits: &LctLimits, header: &mut LctHeader) -> Result<()> {
    let mut count = 0usize;

    while !ext.is_empty() {
        count += 1;
        if count > limits.max_header_extensions {
            return Err(Error::malformed(format!(
                "more than {} header extensions",
                limits.max_header_extensions
            )));
        }

        let het = ext[0];
        let (len, body) = if het < 128 {
            let hel = *ext
                .get(1)
                .ok_or_else(|| Error::malformed("truncated header extension"))?
                as usize;
            if hel == 0 {
                return Err(Error::malformed(format!("extension {} with HEL 0", het)));
            }
            let len = hel * 4;
            let body = ext
                .get(2..len)
                .ok_or_else(|| Error::malformed(format!("extension {} overruns header", het)))?;
            (len, body)
        } else {
            let body = ext
                .get(1..4)
                .ok_or_else(|| Error::malformed(format!("extension {} overruns header", het)))?;
            (4, body)
        };

        match het {
            EXT_TOL24 => {
                header.transfer_length = Some(be_u24(body) as u64);
            }
            EXT_TOL48 => {
                if len != 8 {
                    log::warn!("[LCT] EXT_TOL48 with HEL {} (expected 2), ignoring", len / 4);
                } else {
                    header.transfer_length = Some(be_u48(body));
                }
            }
            EXT_FDT => {
                let v = be_u24(body);
                header.fdt_instance = Some(FdtInstanceExt {
                    version: (v >> 20) as u8,
                    instance_id: v & 0x000F_FFFF,
                });
            }
            EXT_CENC => {
                header.content_encoding = Some(ContentEncoding::from_code(body[0]));
            }
            EXT_FTI => {
                if len != 16 {
                    log::warn!("[LCT] EXT_FTI with HEL {} (expected 4), ignoring", len / 4);
                } else {
                    let fti = FecObjectInfo {
                        transfer_length: be_u48(body),
                        symbol_length: u16::from_be_bytes([body[8], body[9]]),
                        max_source_block_length: u32::from_be_bytes([
                            body[10], body[11], body[12], body[13],
                        ]),
                    };
                    if header.transfer_length.is_none() {
                        header.transfer_length = Some(fti.transfer_length);
                    }
                    header.fti = Some(fti);
                }
            }
            other => {
                log::trace!("[LCT] skipping header extension {}", other);
            }
        }

        ext = &ext[len..];
    }

    Ok(())
}
