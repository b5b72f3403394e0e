// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Slot arena for objects, with a free-list reservoir.
//!
//! Handles carry a generation so a handle to a recycled slot is detected
//! instead of silently aliasing the new occupant.

use std::time::Instant;

use super::LctObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ObjectHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    live: bool,
    object: LctObject,
}

#[derive(Debug, Default)]
pub(crate) struct ObjectArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ObjectArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a slot from the reservoir, or grow the arena.
    pub fn allocate(&mut self, now: Instant) -> ObjectHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.live = true;
            return ObjectHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            live: true,
            object: LctObject::new(now),
        });
        ObjectHandle {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&LctObject> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.live && s.generation == handle.generation)
            .map(|s| &s.object)
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut LctObject> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.live && s.generation == handle.generation)
            .map(|s| &mut s.object)
    }

    /// Return a slot to the reservoir. Stale handles are ignored.
    pub fn release(&mut self, handle: ObjectHandle) -> bool {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.live && slot.generation == handle.generation => {
                slot.live = false;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(handle.index);
                true
            }
            _ => false,
        }
    }

    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn reservoir_len(&self) -> usize {
        self.free.len()
    }
}
