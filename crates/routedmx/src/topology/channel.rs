// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LCT channels (one per TSI) and their declared content.

use std::collections::HashMap;

use super::template::ToiTemplate;
use crate::lct::ContentEncoding;

/// TOI of the placeholder init segment used when no file is declared.
pub const GHOST_INIT_TOI: u32 = 0xFFFF_FFFF;
/// Filename of the placeholder init segment.
pub const GHOST_INIT_NAME: &str = "ghost-init.mp4";

/// Payload format declared for a code point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodePoint {
    pub codepoint: u8,
    pub format_id: u8,
    /// Payloads are fragments of a larger object.
    pub fragmented: bool,
    /// Packets of an object arrive in order.
    pub in_order: bool,
    pub source_fec_payload_id: u8,
}

impl CodePoint {
    /// Code points 0, 2 and 9+ carry nothing usable when undeclared.
    pub(crate) fn undeclared_is_dropped(codepoint: u8) -> bool {
        codepoint == 0 || codepoint == 2 || codepoint >= 9
    }
}

/// A file announced by signaling (S-TSID or FDT).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFile {
    pub toi: u32,
    pub name: String,
    pub content_type: Option<String>,
    pub length: Option<u64>,
    pub md5: Option<String>,
    pub encoding: ContentEncoding,
    pub symbol_length: Option<u16>,
    pub max_source_block_length: Option<u32>,
}

impl StaticFile {
    pub fn new(toi: u32, name: impl Into<String>) -> Self {
        Self {
            toi,
            name: name.into(),
            content_type: None,
            length: None,
            md5: None,
            encoding: ContentEncoding::Null,
            symbol_length: None,
            max_source_block_length: None,
        }
    }

    pub fn ghost_init() -> Self {
        Self::new(GHOST_INIT_TOI, GHOST_INIT_NAME)
    }
}

/// One slice of a split object, carried on its own TOI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPart {
    pub toi: u32,
    pub offset: u64,
    pub length: u64,
}

/// A logical file sent as several TOIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitObject {
    pub name: String,
    pub total_length: u64,
    pub parts: Vec<SplitPart>,
}

impl SplitObject {
    /// TOI under which the reassembled object is tracked.
    pub fn logical_toi(&self) -> u32 {
        self.parts.iter().map(|p| p.toi).min().unwrap_or(0)
    }

    pub fn part(&self, toi: u32) -> Option<&SplitPart> {
        self.parts.iter().find(|p| p.toi == toi)
    }
}

/// Media representation carried by a channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RepresentationRef {
    pub period: Option<String>,
    pub adaptation_set: Option<String>,
    pub representation: String,
}

impl RepresentationRef {
    /// Same period and adaptation set (unspecified components match anything).
    pub fn same_set(&self, period: Option<&str>, adaptation_set: Option<&str>) -> bool {
        fn eq(a: &Option<String>, b: Option<&str>) -> bool {
            match (a.as_deref(), b) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        }
        eq(&self.period, period) && eq(&self.adaptation_set, adaptation_set)
    }

    pub fn matches(
        &self,
        period: Option<&str>,
        adaptation_set: Option<&str>,
        representation: &str,
    ) -> bool {
        self.representation == representation && self.same_set(period, adaptation_set)
    }
}

/// Declared content of a channel, as produced by signaling.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelDecl {
    pub tsi: u32,
    pub codepoints: Vec<CodePoint>,
    pub template: Option<ToiTemplate>,
    pub static_files: Vec<StaticFile>,
    pub representation: Option<RepresentationRef>,
}

impl ChannelDecl {
    pub fn new(tsi: u32) -> Self {
        Self {
            tsi,
            ..Default::default()
        }
    }
}

/// A channel: its declaration plus reception state.
#[derive(Debug)]
pub struct Channel {
    pub(crate) decl: ChannelDecl,
    pub(crate) active: bool,
    pub(crate) last_dispatched: Option<u32>,
    /// First object already dispatched.
    pub(crate) tsi_init: bool,
    /// Files named by the FDT (FLUTE).
    pub(crate) fdt_files: Vec<StaticFile>,
    pub(crate) split_objects: Vec<SplitObject>,
    pub(crate) fdt_instance: Option<u32>,
    /// FDT instance whose object is being received.
    pub(crate) fdt_receiving: Option<u32>,
    pub(crate) fdt_crc: Option<u32>,
    pub(crate) symbol_length: Option<u16>,
    pub(crate) max_source_block_length: Option<u32>,
    /// Largest payload seen, last-resort symbol length.
    pub(crate) observed_symbol_length: u16,
    pub(crate) observed_toi: Option<u32>,
    pub(crate) discarded_packets: u64,
    /// Segment TOI in flight when the channel was reactivated.
    pub(crate) skip_toi: Option<u32>,
    /// CRC of the last delivered content per static TOI.
    pub(crate) delivered_crc: HashMap<u32, u32>,
}

impl Channel {
    pub fn new(decl: ChannelDecl) -> Self {
        Self {
            decl,
            active: true,
            last_dispatched: None,
            tsi_init: false,
            fdt_files: Vec::new(),
            split_objects: Vec::new(),
            fdt_instance: None,
            fdt_receiving: None,
            fdt_crc: None,
            symbol_length: None,
            max_source_block_length: None,
            observed_symbol_length: 0,
            observed_toi: None,
            discarded_packets: 0,
            skip_toi: None,
            delivered_crc: HashMap::new(),
        }
    }

    pub fn tsi(&self) -> u32 {
        self.decl.tsi
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn declaration(&self) -> &ChannelDecl {
        &self.decl
    }

    pub fn representation(&self) -> Option<&RepresentationRef> {
        self.decl.representation.as_ref()
    }

    /// TOI of the last object dispatched on this channel.
    pub fn last_dispatched_toi(&self) -> Option<u32> {
        self.last_dispatched
    }

    /// Last TOI discarded because the channel was inactive or received on
    /// a session that no longer owns it.
    pub fn observed_toi(&self) -> Option<u32> {
        self.observed_toi
    }

    pub fn discarded_packets(&self) -> u64 {
        self.discarded_packets
    }

    /// Files named by the last applied FDT.
    pub fn fdt_files(&self) -> &[StaticFile] {
        &self.fdt_files
    }

    /// Record a datagram whose payload is not buffered.
    pub(crate) fn observe_discarded(&mut self, toi: u32) {
        self.observed_toi = Some(toi);
        self.discarded_packets += 1;
    }

    /// Switch reception on or off.
    ///
    /// On reactivation, the segment observed while inactive lost its head
    /// and is skipped until another segment TOI starts.
    pub(crate) fn set_active(&mut self, active: bool) {
        if active && !self.active {
            self.skip_toi = self.observed_toi;
        }
        self.active = active;
    }

    /// `toi` is the segment skipped since reactivation.
    pub(crate) fn skips_segment(&mut self, toi: u32) -> bool {
        match self.skip_toi {
            Some(t) if t == toi => true,
            Some(_) => {
                self.skip_toi = None;
                false
            }
            None => false,
        }
    }

    pub(crate) fn codepoint(&self, cp: u8) -> Option<&CodePoint> {
        self.decl.codepoints.iter().find(|c| c.codepoint == cp)
    }

    pub(crate) fn static_file(&self, toi: u32) -> Option<&StaticFile> {
        self.decl.static_files.iter().find(|f| f.toi == toi)
    }

    pub(crate) fn fdt_file(&self, toi: u32) -> Option<&StaticFile> {
        self.fdt_files.iter().find(|f| f.toi == toi)
    }

    pub(crate) fn split_for_toi(&self, toi: u32) -> Option<&SplitObject> {
        self.split_objects.iter().find(|s| s.part(toi).is_some())
    }

    /// Replace the declaration, keeping reception state.
    pub(crate) fn redeclare(&mut self, decl: ChannelDecl) {
        if self.decl.template != decl.template {
            self.last_dispatched = None;
        }
        self.delivered_crc
            .retain(|toi, _| decl.static_files.iter().any(|f| f.toi == *toi));
        self.decl = decl;
    }

    /// Symbol length for a TOI: FTI, then FDT entry, then largest payload seen.
    pub(crate) fn symbol_layout(&self, toi: u32) -> (Option<u16>, Option<u32>) {
        let entry = self.fdt_file(toi);
        let symbol = self
            .symbol_length
            .or_else(|| entry.and_then(|e| e.symbol_length))
            .or((self.observed_symbol_length > 0).then_some(self.observed_symbol_length));
        let max_sbl = self
            .max_source_block_length
            .or_else(|| entry.and_then(|e| e.max_source_block_length));
        (symbol, max_sbl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undeclared_codepoints() {
        for cp in [0u8, 2, 9, 200] {
            assert!(CodePoint::undeclared_is_dropped(cp));
        }
        for cp in [1u8, 3, 4, 8] {
            assert!(!CodePoint::undeclared_is_dropped(cp));
        }
    }

    #[test]
    fn test_representation_matching() {
        let rep = RepresentationRef {
            period: Some("p0".into()),
            adaptation_set: Some("0".into()),
            representation: "v720".into(),
        };
        assert!(rep.matches(Some("p0"), Some("0"), "v720"));
        assert!(rep.matches(None, None, "v720"));
        assert!(!rep.matches(Some("p1"), None, "v720"));
        assert!(rep.same_set(None, Some("0")));
        assert!(!rep.same_set(None, Some("1")));
    }

    #[test]
    fn test_reactivation_skips_segment_in_flight() {
        let mut channel = Channel::new(ChannelDecl::new(10));
        assert!(!channel.skips_segment(5));

        channel.set_active(false);
        channel.observe_discarded(5);
        assert_eq!(channel.observed_toi(), Some(5));
        assert_eq!(channel.discarded_packets(), 1);

        channel.set_active(true);
        assert!(channel.skips_segment(5));
        assert!(channel.skips_segment(5));
        assert!(!channel.skips_segment(6));
        assert!(!channel.skips_segment(5));
    }

    #[test]
    fn test_redeclare_keeps_state() {
        let mut decl = ChannelDecl::new(5);
        decl.template = Some(ToiTemplate::parse("a-$TOI$").unwrap());
        let mut ch = Channel::new(decl.clone());
        ch.last_dispatched = Some(9);
        ch.tsi_init = true;

        decl.codepoints.push(CodePoint {
            codepoint: 8,
            format_id: 1,
            fragmented: false,
            in_order: true,
            source_fec_payload_id: 1,
        });
        ch.redeclare(decl.clone());
        assert_eq!(ch.last_dispatched, Some(9));
        assert!(ch.tsi_init);

        decl.template = Some(ToiTemplate::parse("b-$TOI$").unwrap());
        ch.redeclare(decl);
        assert_eq!(ch.last_dispatched, None);
    }

    #[test]
    fn test_symbol_layout_fallbacks() {
        let mut ch = Channel::new(ChannelDecl::new(1));
        assert_eq!(ch.symbol_layout(3), (None, None));
        ch.observed_symbol_length = 1400;
        assert_eq!(ch.symbol_layout(3), (Some(1400), None));
        let mut entry = StaticFile::new(3, "a.bin");
        entry.symbol_length = Some(1024);
        entry.max_source_block_length = Some(32);
        ch.fdt_files.push(entry);
        assert_eq!(ch.symbol_layout(3), (Some(1024), Some(32)));
        ch.symbol_length = Some(512);
        assert_eq!(ch.symbol_layout(3), (Some(512), Some(32)));
    }
}
