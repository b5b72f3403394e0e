// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Object payload buffer shared with listeners.

use parking_lot::Mutex;
use std::sync::Arc;

use super::fragments::{FragmentList, FragmentRange, MergeOutcome};

#[derive(Debug, Default)]
struct BlobState {
    data: Vec<u8>,
    /// Bytes exposed to readers: total length once final, received prefix while in transfer.
    size: u64,
    frags: FragmentList,
    in_transfer: bool,
    corrupted: bool,
}

/// Handle on an object's bytes and received ranges.
///
/// Cloning is cheap; all clones observe the same buffer. The demultiplexer
/// writes into it while receiving, listeners read from it when notified.
#[derive(Debug, Clone, Default)]
pub struct ObjectBlob {
    inner: Arc<Mutex<BlobState>>,
}

impl ObjectBlob {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently exposed.
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// More data is expected.
    pub fn is_in_transfer(&self) -> bool {
        self.inner.lock().in_transfer
    }

    /// Object was delivered with gaps.
    pub fn is_corrupted(&self) -> bool {
        self.inner.lock().corrupted
    }

    /// Snapshot of received ranges.
    pub fn ranges(&self) -> Vec<FragmentRange> {
        self.inner.lock().frags.ranges().to_vec()
    }

    /// Distinct bytes received.
    pub fn received_bytes(&self) -> u64 {
        self.inner.lock().frags.nb_bytes()
    }

    /// Run `f` on the exposed bytes and the received ranges.
    ///
    /// Bytes outside the ranges are zero.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8], &[FragmentRange]) -> R) -> R {
        let state = self.inner.lock();
        let len = (state.size as usize).min(state.data.len());
        f(&state.data[..len], state.frags.ranges())
    }

    /// Copy of the exposed bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.with_data(|data, _| data.to_vec())
    }

    /// Copy of `[offset, offset + len)` if fully received.
    pub fn read_range(&self, offset: u64, len: u64) -> Option<Vec<u8>> {
        let state = self.inner.lock();
        if !state.frags.covers(offset, len) {
            return None;
        }
        let start = offset as usize;
        state
            .data
            .get(start..start + len as usize)
            .map(|bytes| bytes.to_vec())
    }

    /// Copy of the first `len` buffered bytes, exposed or not.
    pub(crate) fn received(&self, len: u64) -> Vec<u8> {
        let state = self.inner.lock();
        let len = usize::try_from(len).unwrap_or(usize::MAX).min(state.data.len());
        state.data[..len].to_vec()
    }

    /// Other handles on the buffer are alive.
    pub(crate) fn is_shared(&self) -> bool {
        Arc::strong_count(&self.inner) > 1
    }

    /// Copy `bytes` at `offset`, growing the buffer as needed.
    pub(crate) fn write(&self, offset: u64, bytes: &[u8], capacity_hint: u64) -> MergeOutcome {
        let mut state = self.inner.lock();
        let end = offset as usize + bytes.len();
        if state.data.len() < end {
            let target = (capacity_hint as usize).max(end);
            state.data.resize(target, 0);
        }
        let outcome = state.frags.merge(offset, bytes.len() as u64);
        if outcome.added_bytes() {
            state.data[offset as usize..end].copy_from_slice(bytes);
        }
        outcome
    }

    /// Reserve room for a declared length.
    pub(crate) fn reserve(&self, total: u64) {
        let mut state = self.inner.lock();
        if (state.data.len() as u64) < total {
            state.data.resize(total as usize, 0);
        }
    }

    pub(crate) fn contiguous_prefix(&self) -> u64 {
        self.inner.lock().frags.contiguous_prefix()
    }

    pub(crate) fn nb_ranges(&self) -> usize {
        self.inner.lock().frags.len()
    }

    pub(crate) fn high_water(&self) -> u64 {
        self.inner.lock().frags.high_water()
    }

    pub(crate) fn is_complete(&self, total: u64) -> bool {
        self.inner.lock().frags.is_complete(total)
    }

    /// Expose `size` bytes with the given transfer flags.
    pub(crate) fn publish(&self, size: u64, in_transfer: bool, corrupted: bool) {
        let mut state = self.inner.lock();
        state.size = size;
        state.in_transfer = in_transfer;
        state.corrupted = corrupted;
    }

    /// Drop all received ranges, keeping the allocation.
    pub(crate) fn clear(&self) {
        let mut state = self.inner.lock();
        state.frags.clear();
        state.size = 0;
        state.in_transfer = false;
        state.corrupted = false;
    }
}
