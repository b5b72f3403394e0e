// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FLUTE File Delivery Table instances (RFC 6726 §3.4.2).
//!
//! A file sent in several TOIs is announced once per part, with a
//! `#offset=<bytes>&total=<bytes>` suffix on its `Content-Location`.

use roxmltree::Node;

use super::xml;
use crate::error::{Error, Result};
use crate::lct::ContentEncoding;
use crate::topology::{SplitObject, SplitPart, StaticFile};

/// Decoded FDT instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FdtInstance {
    /// NTP seconds after which the instance is stale.
    pub expires: Option<u64>,
    pub files: Vec<StaticFile>,
    pub splits: Vec<SplitObject>,
    /// `fileTemplate` attribute (ROUTE EFDT flavor).
    pub file_template: Option<String>,
}

/// FEC OTI attributes inherited by every file of the instance.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FileDefaults {
    pub symbol_length: Option<u16>,
    pub max_source_block_length: Option<u32>,
}

impl FileDefaults {
    pub(crate) fn from_node(node: Node<'_, '_>) -> Self {
        Self {
            symbol_length: xml::attr_u32(node, "FEC-OTI-Encoding-Symbol-Length")
                .and_then(|v| u16::try_from(v).ok()),
            max_source_block_length: xml::attr_u32(node, "FEC-OTI-Maximum-Source-Block-Length"),
        }
    }
}

/// Decode a `File` element; `None` when it lacks a location or a TOI.
pub(crate) fn parse_file(node: Node<'_, '_>, defaults: FileDefaults) -> Option<StaticFile> {
    let name = xml::attr(node, "Content-Location")?.trim();
    if name.is_empty() {
        return None;
    }
    let toi = xml::attr_u32(node, "TOI")?;
    let own = FileDefaults::from_node(node);

    Some(StaticFile {
        toi,
        name: name.to_string(),
        content_type: xml::attr(node, "Content-Type").map(|t| t.trim().to_string()),
        length: xml::attr_u64(node, "Transfer-Length").or_else(|| xml::attr_u64(node, "Content-Length")),
        md5: xml::attr(node, "Content-MD5").map(str::to_string),
        encoding: xml::attr(node, "Content-Encoding")
            .map(ContentEncoding::from_name)
            .unwrap_or_default(),
        symbol_length: own.symbol_length.or(defaults.symbol_length),
        max_source_block_length: own.max_source_block_length.or(defaults.max_source_block_length),
    })
}

/// `(name, offset, total)` of a split-part location.
fn split_location(location: &str) -> Option<(&str, u64, u64)> {
    let (name, fragment) = location.split_once('#')?;
    let mut offset = None;
    let mut total = None;
    for kv in fragment.split('&') {
        match kv.split_once('=') {
            Some(("offset", v)) => offset = v.parse().ok(),
            Some(("total", v)) => total = v.parse().ok(),
            _ => {}
        }
    }
    Some((name, offset?, total?))
}

pub fn parse_fdt(text: &str) -> Result<FdtInstance> {
    let doc = xml::parse(text)?;
    let root = doc.root_element();
    if root.tag_name().name() != "FDT-Instance" {
        return Err(Error::signaling(format!(
            "expected FDT-Instance root, found {}",
            root.tag_name().name()
        )));
    }
    parse_instance(root)
}

pub(crate) fn parse_instance(root: Node<'_, '_>) -> Result<FdtInstance> {
    let defaults = FileDefaults::from_node(root);
    let mut fdt = FdtInstance {
        expires: xml::attr_u64(root, "Expires"),
        file_template: root
            .attributes()
            .find(|a| a.name().contains("fileTemplate"))
            .map(|a| a.value().to_string()),
        ..Default::default()
    };

    for node in root.children().filter(|n| n.is_element()) {
        if !node.tag_name().name().contains("File") {
            continue;
        }
        let Some(mut file) = parse_file(node, defaults) else {
            log::warn!("[FDT] File entry without Content-Location or TOI, ignoring");
            continue;
        };

        if let Some((name, offset, total)) = split_location(&file.name) {
            let part = SplitPart {
                toi: file.toi,
                offset,
                length: file.length.unwrap_or(0),
            };
            let fits = offset < total
                && offset.checked_add(part.length).is_some_and(|end| end <= total);
            if part.length == 0 || !fits {
                log::warn!("[FDT] invalid split part {} (TOI {})", file.name, file.toi);
                continue;
            }
            match fdt.splits.iter_mut().find(|s| s.name == name) {
                Some(split) if split.total_length == total => {
                    if split.part(part.toi).is_none() {
                        split.parts.push(part);
                    }
                }
                Some(_) => {
                    log::warn!("[FDT] split object {} with inconsistent total", name);
                }
                None => fdt.splits.push(SplitObject {
                    name: name.to_string(),
                    total_length: total,
                    parts: vec![part],
                }),
            }
            continue;
        }

        if fdt.files.iter().any(|f| f.toi == file.toi) {
            log::warn!("[FDT] TOI {} declared twice, keeping first", file.toi);
            continue;
        }
        file.name = file.name.trim().to_string();
        fdt.files.push(file);
    }

    Ok(fdt)
}
