// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service signaling bundles (MIME multipart/related).

use crate::error::{Error, Result};

/// One entity of a signaling bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePart<'a> {
    /// Media type without parameters, empty when absent.
    pub content_type: String,
    pub content_location: String,
    pub body: &'a str,
}

/// Split a bundle into entities.
///
/// Accepts a multipart bundle, a single entity with MIME headers, or a bare
/// XML document (typed from its root element).
pub fn parse_bundle(text: &str) -> Result<Vec<BundlePart<'_>>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('<') {
        return Ok(vec![BundlePart {
            content_type: super::xml_content_type(trimmed).unwrap_or_default().to_string(),
            content_location: String::new(),
            body: trimmed.trim_end(),
        }]);
    }

    let (headers, body) = split_entity(trimmed)
        .ok_or_else(|| Error::signaling("entity headers not terminated"))?;
    let (content_type, boundary) = bundle_headers(headers);

    if !content_type.to_ascii_lowercase().starts_with("multipart/") {
        let (content_type, content_location) = entity_headers(headers);
        return Ok(vec![BundlePart {
            content_type,
            content_location,
            body: body.trim_end(),
        }]);
    }

    let boundary = boundary.ok_or_else(|| Error::signaling("multipart bundle without boundary"))?;
    let delimiter = format!("--{}", boundary);

    let mut parts = Vec::new();
    let mut rest = body;
    let mut closed = false;
    // Skip the preamble.
    match rest.find(&delimiter) {
        Some(pos) => rest = &rest[pos + delimiter.len()..],
        None => return Err(Error::signaling("multipart boundary not found")),
    }

    loop {
        if rest.starts_with("--") {
            closed = true;
            break;
        }
        let Some(end) = rest.find(&delimiter) else {
            break;
        };
        let segment = rest[..end].trim_start_matches([' ', '\t']);
        let segment = segment
            .strip_prefix("\r\n")
            .or_else(|| segment.strip_prefix('\n'))
            .unwrap_or(segment);
        let (headers, body) = split_entity(segment)
            .ok_or_else(|| Error::signaling("multipart entity headers not terminated"))?;
        let (content_type, content_location) = entity_headers(headers);
        let body = body
            .strip_suffix("\r\n")
            .or_else(|| body.strip_suffix('\n'))
            .unwrap_or(body);
        parts.push(BundlePart {
            content_type,
            content_location,
            body,
        });
        rest = &rest[end + delimiter.len()..];
    }

    if !closed {
        log::debug!("[ROUTE] multipart bundle without closing delimiter");
    }
    if parts.is_empty() {
        return Err(Error::signaling("multipart bundle has no entity"));
    }
    Ok(parts)
}

/// Split at the first blank line.
fn split_entity(text: &str) -> Option<(&str, &str)> {
    let crlf = text.find("\r\n\r\n").map(|p| (p, 4));
    let lf = text.find("\n\n").map(|p| (p, 2));
    let (pos, len) = match (crlf, lf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (a, b) => a.or(b)?,
    };
    Some((&text[..pos], &text[pos + len..]))
}

fn header_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = line.split_once(':')?;
    key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
}

/// Content type and boundary of the outer entity.
fn bundle_headers(headers: &str) -> (String, Option<String>) {
    let mut content_type = String::new();
    let mut boundary = None;
    for line in headers.lines() {
        let Some(value) = header_value(line, "Content-Type") else {
            continue;
        };
        let mut params = value.split(';');
        content_type = params.next().unwrap_or("").trim().to_string();
        for param in params {
            if let Some((key, val)) = param.split_once('=') {
                if key.trim().eq_ignore_ascii_case("boundary") {
                    boundary = Some(val.trim().trim_matches('"').to_string());
                }
            }
        }
    }
    (content_type, boundary)
}

fn entity_headers(headers: &str) -> (String, String) {
    let mut content_type = String::new();
    let mut content_location = String::new();
    for line in headers.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(value) = header_value(line, "Content-Type") {
            content_type = value.split(';').next().unwrap_or("").trim().to_string();
        } else if let Some(value) = header_value(line, "Content-Location") {
            content_location = value.to_string();
        } else {
            log::trace!("[ROUTE] ignoring entity header {:?}", line);
        }
    }
    (content_type, content_location)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUNDLE: &str = "Content-Type: multipart/related; type=\"application/mbms-envelope+xml\"; boundary=\"--frontier\"\r\n\r\n\
----frontier\r\n\
Content-Type: application/mbms-envelope+xml\r\n\
Content-Location: envelope.xml\r\n\
\r\n\
<metadataEnvelope><item contentType=\"application/route-s-tsid+xml\" version=\"3\"/></metadataEnvelope>\r\n\
----frontier\r\n\
Content-Type: application/dash+xml\r\n\
Content-Location: manifest.mpd\r\n\
\r\n\
<MPD/>\r\n\
----frontier--\r\n";

    #[test]
    fn test_multipart() {
        let parts = parse_bundle(BUNDLE).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].content_type, "application/mbms-envelope+xml");
        assert_eq!(parts[0].content_location, "envelope.xml");
        assert!(parts[0].body.starts_with("<metadataEnvelope>"));
        assert_eq!(parts[1].content_type, "application/dash+xml");
        assert_eq!(parts[1].content_location, "manifest.mpd");
        assert_eq!(parts[1].body, "<MPD/>");
    }

    #[test]
    fn test_single_entity() {
        let text = "Content-Type: application/route-s-tsid+xml\nContent-Location: stsid.xml\n\n<S-TSID/>\n";
        let parts = parse_bundle(text).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].content_type, "application/route-s-tsid+xml");
        assert_eq!(parts[0].body, "<S-TSID/>");
    }

    #[test]
    fn test_bare_xml() {
        let parts = parse_bundle("<?xml version=\"1.0\"?>\n<S-TSID><RS/></S-TSID>").unwrap();
        assert_eq!(parts[0].content_type, "application/route-s-tsid+xml");
    }

    #[test]
    fn test_malformed() {
        assert!(parse_bundle("Content-Type: multipart/related\r\n\r\nbody").is_err());
        assert!(parse_bundle("Content-Type: text/plain").is_err());
        assert!(parse_bundle(
            "Content-Type: multipart/related; boundary=\"x\"\r\n\r\nno delimiter here"
        )
        .is_err());
    }
}
