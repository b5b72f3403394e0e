// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MBMS metadata envelope: versions of the bundled signaling fragments.

use super::{xml, MIME_DASH, MIME_ROUTE_STSID, MIME_STSID};
use crate::error::Result;

/// Versions announced by the envelope items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopeVersions {
    pub stsid: Option<u32>,
    pub manifest: Option<u32>,
}

pub fn parse_envelope(text: &str) -> Result<EnvelopeVersions> {
    let doc = xml::parse(text)?;
    let mut versions = EnvelopeVersions::default();

    for item in xml::children(doc.root_element(), "item") {
        let Some(content_type) = xml::attr_nocase(item, "contentType") else {
            continue;
        };
        let version = xml::attr_nocase(item, "version")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(0);
        match content_type.trim() {
            MIME_STSID | MIME_ROUTE_STSID => versions.stsid = Some(version),
            MIME_DASH => versions.manifest = Some(version),
            other => log::trace!("[ROUTE] envelope item {} ignored", other),
        }
    }

    Ok(versions)
}
