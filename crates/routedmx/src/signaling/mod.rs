// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Signaling decoders: LLS/SLT, service bundles, S-TSID, FDT and DVB-MABR
//! gateway configuration.

pub mod compress;
pub mod envelope;
pub mod fdt;
pub mod gateway;
pub mod lls;
pub mod multipart;
pub mod slt;
pub mod stsid;
mod xml;

pub use envelope::{parse_envelope, EnvelopeVersions};
pub use fdt::{parse_fdt, FdtInstance};
pub use gateway::{parse_gateway_config, GatewayConfig};
pub use lls::{LlsHeader, LlsTableKind, LLS_ENDPOINT};
pub use multipart::{parse_bundle, BundlePart};
pub use slt::{parse_slt, SltService};
pub use stsid::parse_stsid;

pub const MIME_ENVELOPE: &str = "application/mbms-envelope+xml";
pub const MIME_USD: &str = "application/mbms-user-service-description+xml";
pub const MIME_STSID: &str = "application/s-tsid";
pub const MIME_ROUTE_STSID: &str = "application/route-s-tsid+xml";
pub const MIME_DASH: &str = "application/dash+xml";
pub const MIME_3GPP_MPD: &str = "video/vnd.3gpp.mpd";
pub const MIME_HLS_AUDIO: &str = "audio/mpegurl";
pub const MIME_HLS_VIDEO: &str = "video/mpegurl";
pub const MIME_FDT: &str = "application/fdt+xml";
pub const MIME_GATEWAY_CONFIG: &str = "application/xml+dvb-mabr-session-configuration";

/// Role of a signaling entity, from its media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingKind {
    Envelope,
    UserServiceDescription,
    Stsid,
    Manifest,
    Fdt,
    GatewayConfig,
    Other,
}

pub fn classify(content_type: &str) -> SignalingKind {
    match content_type.trim() {
        MIME_ENVELOPE => SignalingKind::Envelope,
        MIME_USD => SignalingKind::UserServiceDescription,
        MIME_STSID | MIME_ROUTE_STSID => SignalingKind::Stsid,
        MIME_DASH | MIME_3GPP_MPD | MIME_HLS_AUDIO | MIME_HLS_VIDEO => SignalingKind::Manifest,
        MIME_FDT => SignalingKind::Fdt,
        MIME_GATEWAY_CONFIG => SignalingKind::GatewayConfig,
        _ => SignalingKind::Other,
    }
}

/// Media type of a delivered file that is a manifest, by type or extension.
pub fn manifest_type(content_type: Option<&str>, name: &str) -> Option<&'static str> {
    if let Some(ct) = content_type {
        match ct.trim() {
            MIME_DASH => return Some(MIME_DASH),
            MIME_3GPP_MPD => return Some(MIME_3GPP_MPD),
            MIME_HLS_AUDIO => return Some(MIME_HLS_AUDIO),
            MIME_HLS_VIDEO => return Some(MIME_HLS_VIDEO),
            _ => {}
        }
    }
    let path = name.split(['?', '#']).next().unwrap_or(name).to_ascii_lowercase();
    if path.ends_with(".mpd") {
        Some(MIME_DASH)
    } else if path.ends_with(".m3u8") {
        Some(MIME_HLS_VIDEO)
    } else {
        None
    }
}

/// True when a delivered file is a gateway configuration.
pub fn is_gateway_config(content_type: Option<&str>, body: &[u8]) -> bool {
    if content_type.map(str::trim) == Some(MIME_GATEWAY_CONFIG) {
        return true;
    }
    content_type.is_none()
        && std::str::from_utf8(body)
            .ok()
            .and_then(xml_content_type)
            == Some(MIME_GATEWAY_CONFIG)
}

/// Media type implied by the root element of an untyped XML document.
pub(crate) fn xml_content_type(text: &str) -> Option<&'static str> {
    let doc = roxmltree::Document::parse(text).ok()?;
    match doc.root_element().tag_name().name() {
        "S-TSID" => Some(MIME_ROUTE_STSID),
        "MPD" => Some(MIME_DASH),
        "metadataEnvelope" => Some(MIME_ENVELOPE),
        "FDT-Instance" => Some(MIME_FDT),
        name if name.starts_with("MulticastGatewayConfiguration") => Some(MIME_GATEWAY_CONFIG),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(MIME_ROUTE_STSID), SignalingKind::Stsid);
        assert_eq!(classify("application/s-tsid"), SignalingKind::Stsid);
        assert_eq!(classify("video/vnd.3gpp.mpd"), SignalingKind::Manifest);
        assert_eq!(classify("audio/mpegurl"), SignalingKind::Manifest);
        assert_eq!(classify("text/plain"), SignalingKind::Other);
    }

    #[test]
    fn test_manifest_type() {
        assert_eq!(manifest_type(None, "live/manifest.mpd"), Some(MIME_DASH));
        assert_eq!(manifest_type(None, "index.M3U8?x=1"), Some(MIME_HLS_VIDEO));
        assert_eq!(manifest_type(Some("audio/mpegurl"), "x"), Some(MIME_HLS_AUDIO));
        assert_eq!(manifest_type(Some("video/mp4"), "seg.m4s"), None);
    }

    #[test]
    fn test_xml_sniffing() {
        assert_eq!(xml_content_type("<MPD/>"), Some(MIME_DASH));
        assert_eq!(xml_content_type("<html/>"), None);
        assert!(is_gateway_config(None, b"<MulticastGatewayConfiguration/>"));
        assert!(!is_gateway_config(Some("video/mp4"), b"<MulticastGatewayConfiguration/>"));
    }
}
