// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TOI-to-filename templates (`seg-$TOI$.m4s`, `seg-$TOI%05d$.m4s`).

use std::fmt;

use crate::error::{Error, Result};

const MARKER: &str = "$TOI";

/// Filename template with a single `$TOI$` substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToiTemplate {
    prefix: String,
    suffix: String,
    /// Zero-padding width from a `%0Nd` format, 0 for none.
    width: usize,
}

impl ToiTemplate {
    /// Parse a template string.
    pub fn parse(template: &str) -> Result<Self> {
        let start = template
            .find(MARKER)
            .ok_or_else(|| Error::signaling(format!("template {:?} has no $TOI", template)))?;
        let rest = &template[start + MARKER.len()..];
        let close = rest
            .find('$')
            .ok_or_else(|| Error::signaling(format!("template {:?} is not terminated", template)))?;

        let format = &rest[..close];
        let width = if format.is_empty() {
            0
        } else {
            let digits = format
                .strip_prefix('%')
                .and_then(|f| f.strip_suffix('d'))
                .ok_or_else(|| {
                    Error::signaling(format!("unsupported TOI format {:?}", format))
                })?;
            if digits.is_empty() {
                0
            } else {
                digits.parse::<usize>().map_err(|_| {
                    Error::signaling(format!("unsupported TOI format {:?}", format))
                })?
            }
        };

        Ok(Self {
            prefix: template[..start].to_string(),
            suffix: rest[close + 1..].to_string(),
            width,
        })
    }

    /// Filename of a TOI.
    pub fn format(&self, toi: u32) -> String {
        format!("{}{:0width$}{}", self.prefix, toi, self.suffix, width = self.width)
    }

    /// TOI encoded in `name`, if it follows this template.
    ///
    /// Leading path components of `name` are ignored when the template has
    /// none.
    pub fn match_name(&self, name: &str) -> Option<u32> {
        let name = if self.prefix.contains('/') {
            name
        } else {
            name.rsplit('/').next().unwrap_or(name)
        };
        let digits = name
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

impl fmt::Display for ToiTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.width > 0 {
            write!(f, "{}$TOI%0{}d${}", self.prefix, self.width, self.suffix)
        } else {
            write!(f, "{}$TOI${}", self.prefix, self.suffix)
        }
    }
}
