// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LCT packet encoder.
//!
//! Produces ROUTE or FLUTE datagrams; used by the simulation transport,
//! tests and benchmarks to feed the demultiplexer.

use super::{ContentEncoding, EXT_CENC, EXT_FDT, EXT_FTI, EXT_TOL24, EXT_TOL48};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fec {
    StartOffset(u32),
    Block(u16, u16),
}

/// Builder for a single LCT datagram.
///
/// ```
/// use routedmx::lct::{parse_route, LctLimits, LctPacketBuilder};
///
/// let pkt = LctPacketBuilder::route(5, 9)
///     .transfer_length(3)
///     .close()
///     .payload(b"abc")
///     .build();
/// let header = parse_route(&pkt, &LctLimits::default()).unwrap();
/// assert_eq!(header.toi, 9);
/// ```
#[derive(Debug, Clone)]
pub struct LctPacketBuilder {
    tsi: u32,
    toi: u32,
    codepoint: u8,
    close_object: bool,
    close_session: bool,
    short_ids: bool,
    transfer_length: Option<u64>,
    fdt_instance: Option<u32>,
    content_encoding: Option<ContentEncoding>,
    fti: Option<(u64, u16, u32)>,
    fec: Fec,
    payload: Vec<u8>,
}

impl LctPacketBuilder {
    fn new(tsi: u32, toi: u32, fec: Fec) -> Self {
        Self {
            tsi,
            toi,
            codepoint: 0,
            close_object: false,
            close_session: false,
            short_ids: false,
            transfer_length: None,
            fdt_instance: None,
            content_encoding: None,
            fti: None,
            fec,
            payload: Vec::new(),
        }
    }

    /// ROUTE packet (32-bit TSI/TOI, start offset payload ID).
    pub fn route(tsi: u32, toi: u32) -> Self {
        Self::new(tsi, toi, Fec::StartOffset(0))
    }

    /// FLUTE packet (Compact No-Code FEC payload ID).
    pub fn flute(tsi: u32, toi: u32) -> Self {
        Self::new(tsi, toi, Fec::Block(0, 0))
    }

    pub fn codepoint(mut self, codepoint: u8) -> Self {
        self.codepoint = codepoint;
        self
    }

    /// Set the B flag (last packet of the object).
    pub fn close(mut self) -> Self {
        self.close_object = true;
        self
    }

    /// Set the A flag (session closed).
    pub fn close_session(mut self) -> Self {
        self.close_session = true;
        self
    }

    /// Encode TSI and TOI on 16 bits (FLUTE only).
    pub fn short_ids(mut self) -> Self {
        self.short_ids = true;
        self
    }

    /// Add an `EXT_TOL24` (or `EXT_TOL48` above 24 bits) extension.
    pub fn transfer_length(mut self, length: u64) -> Self {
        self.transfer_length = Some(length);
        self
    }

    pub fn fdt_instance(mut self, instance_id: u32) -> Self {
        self.fdt_instance = Some(instance_id);
        self
    }

    pub fn content_encoding(mut self, encoding: ContentEncoding) -> Self {
        self.content_encoding = Some(encoding);
        self
    }

    /// Add an `EXT_FTI` extension.
    pub fn fti(mut self, transfer_length: u64, symbol_length: u16, max_source_block_length: u32) -> Self {
        self.fti = Some((transfer_length, symbol_length, max_source_block_length));
        self
    }

    pub fn start_offset(mut self, offset: u32) -> Self {
        self.fec = Fec::StartOffset(offset);
        self
    }

    /// Compact No-Code payload ID.
    pub fn block(mut self, sbn: u16, esi: u16) -> Self {
        self.fec = Fec::Block(sbn, esi);
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// Encode the datagram.
    pub fn build(&self) -> Vec<u8> {
        let mut ext = Vec::new();

        if let Some(len) = self.transfer_length {
            if len < (1 << 24) {
                ext.push(EXT_TOL24);
                ext.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
            } else {
                ext.extend_from_slice(&[EXT_TOL48, 2]);
                ext.extend_from_slice(&len.to_be_bytes()[2..]);
            }
        }
        if let Some(id) = self.fdt_instance {
            let v = (2u32 << 20) | (id & 0x000F_FFFF);
            ext.push(EXT_FDT);
            ext.extend_from_slice(&v.to_be_bytes()[1..]);
        }
        if let Some(enc) = self.content_encoding {
            ext.extend_from_slice(&[EXT_CENC, enc.code(), 0, 0]);
        }
        if let Some((total, symbol, max_sbl)) = self.fti {
            ext.extend_from_slice(&[EXT_FTI, 4]);
            ext.extend_from_slice(&total.to_be_bytes()[2..]);
            ext.extend_from_slice(&[0, 0]);
            ext.extend_from_slice(&symbol.to_be_bytes());
            ext.extend_from_slice(&max_sbl.to_be_bytes());
        }

        let (s, o, h, id_len) = if self.short_ids { (0u8, 0u8, 1u8, 4) } else { (1, 1, 0, 8) };
        let hdr_len = 8 + id_len + ext.len();
        let mut out = Vec::with_capacity(hdr_len + 4 + self.payload.len());

        // V=1, C=0, PSI=0b10
        out.push((1 << 4) | 0b10);
        out.push(
            (s << 7)
                | (o << 5)
                | (h << 4)
                | ((self.close_session as u8) << 1)
                | self.close_object as u8,
        );
        out.push((hdr_len / 4) as u8);
        out.push(self.codepoint);
        out.extend_from_slice(&0u32.to_be_bytes());
        if self.short_ids {
            out.extend_from_slice(&(self.tsi as u16).to_be_bytes());
            out.extend_from_slice(&(self.toi as u16).to_be_bytes());
        } else {
            out.extend_from_slice(&self.tsi.to_be_bytes());
            out.extend_from_slice(&self.toi.to_be_bytes());
        }
        out.extend_from_slice(&ext);

        match self.fec {
            Fec::StartOffset(offset) => out.extend_from_slice(&offset.to_be_bytes()),
            Fec::Block(sbn, esi) => {
                out.extend_from_slice(&sbn.to_be_bytes());
                out.extend_from_slice(&esi.to_be_bytes());
            }
        }
        out.extend_from_slice(&self.payload);
        out
    }
}
