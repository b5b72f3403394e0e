// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Decompression of signaling payloads.

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::io::Read;

use crate::error::{Error, Result};
use crate::lct::ContentEncoding;

/// Inflate `data` according to `encoding`, refusing output above `limit` bytes.
pub fn decode(encoding: ContentEncoding, data: &[u8], limit: u64) -> Result<Vec<u8>> {
    match encoding {
        ContentEncoding::Null => Ok(data.to_vec()),
        ContentEncoding::Gzip => read_bounded(GzDecoder::new(data), limit),
        ContentEncoding::Zlib => read_bounded(ZlibDecoder::new(data), limit),
        ContentEncoding::Deflate => read_bounded(DeflateDecoder::new(data), limit),
        ContentEncoding::Unknown(code) => Err(Error::Decompress(format!(
            "unknown content encoding {}",
            code
        ))),
    }
}

/// Gunzip an LLS table or a compressed signaling bundle.
pub fn gunzip(data: &[u8], limit: u64) -> Result<Vec<u8>> {
    decode(ContentEncoding::Gzip, data, limit)
}

fn read_bounded<R: Read>(reader: R, limit: u64) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| Error::Decompress(e.to_string()))?;
    if out.len() as u64 > limit {
        return Err(Error::Decompress(format!(
            "inflated size exceeds {} bytes",
            limit
        )));
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) fn gzip(data: &[u8]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}
