// SPDX-License-Identifier: MIT
//! # Per-Source Frame Reassembly
//!
//! One [`ReassemblyBuffer`] exists per sending camera. It maps
//! `frame index → (chunk index → payload)` and remembers the chunk count each
//! frame declared.
//!
//! ## Memory Bound
//!
//! At most `max_in_flight` frame indices are retained. Starting a new frame
//! beyond that limit evicts the oldest-started one, complete or not. This is the
//! only backpressure mechanism: under loss or duplication the buffer never grows.
//!
//! ## Ordering
//!
//! There is none. A lower frame index that completes after a higher one is still
//! returned as [`Outcome::Complete`], so a consumer that writes every completed
//! frame may briefly show an older image. Callers keep "last completed wins".

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::wire::ChunkHeader;

/// Result of pushing one chunk into the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The frame is still missing chunks.
    Pending,
    /// Every chunk index in `0..total` arrived; payloads concatenated in index order.
    Complete { frame_index: u32, bytes: Vec<u8> },
    /// The distinct chunk count reached the declared total but an index in
    /// `0..total` is absent. The frame was discarded without assembly.
    Incomplete { frame_index: u32, missing: u16 },
}

/// Counters for absorbed reassembly events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub chunks: u64,
    pub completed: u64,
    pub incomplete: u64,
    pub evicted: u64,
}

#[derive(Debug, Default)]
struct PendingFrame {
    chunks: BTreeMap<u16, Vec<u8>>,
    expected: u16,
}

/// Bounded chunk buffer for a single source.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    frames: HashMap<u32, PendingFrame>,
    /// Frame indices in the order they were first seen.
    started: VecDeque<u32>,
    max_in_flight: usize,
    stats: ReassemblyStats,
}

impl ReassemblyBuffer {
    /// Create a buffer that keeps at most `max_in_flight` frames (minimum 1).
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            frames: HashMap::with_capacity(max_in_flight + 1),
            started: VecDeque::with_capacity(max_in_flight + 1),
            max_in_flight,
            stats: ReassemblyStats::default(),
        }
    }

    /// Insert one chunk and report whether its frame became complete.
    ///
    /// A duplicate chunk index overwrites the earlier payload. The expected
    /// chunk count is taken from the most recent header for that frame.
    pub fn push(&mut self, header: ChunkHeader, payload: &[u8]) -> Outcome {
        self.stats.chunks += 1;
        let frame_index = header.frame_index;

        if !self.frames.contains_key(&frame_index) {
            self.started.push_back(frame_index);
            self.frames.insert(frame_index, PendingFrame::default());
            self.evict_overflow();
        }

        let Some(frame) = self.frames.get_mut(&frame_index) else {
            // The frame we just started was itself the oldest and got evicted.
            return Outcome::Pending;
        };
        frame.chunks.insert(header.chunk_index, payload.to_vec());
        frame.expected = header.total_chunks;

        if frame.chunks.len() != frame.expected as usize {
            return Outcome::Pending;
        }

        // Whatever happens next, this frame index leaves the buffer.
        let frame = self.remove(frame_index);
        let mut bytes = Vec::with_capacity(frame.chunks.values().map(Vec::len).sum());
        for idx in 0..frame.expected {
            match frame.chunks.get(&idx) {
                Some(slice) => bytes.extend_from_slice(slice),
                None => {
                    self.stats.incomplete += 1;
                    return Outcome::Incomplete {
                        frame_index,
                        missing: idx,
                    };
                }
            }
        }

        self.stats.completed += 1;
        Outcome::Complete { frame_index, bytes }
    }

    /// Number of frame indices currently retained.
    pub fn in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Whether a frame index is still buffered.
    pub fn contains(&self, frame_index: u32) -> bool {
        self.frames.contains_key(&frame_index)
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    fn remove(&mut self, frame_index: u32) -> PendingFrame {
        self.started.retain(|idx| *idx != frame_index);
        self.frames.remove(&frame_index).unwrap_or_default()
    }

    fn evict_overflow(&mut self) {
        while self.frames.len() > self.max_in_flight {
            let Some(oldest) = self.started.pop_front() else {
                break;
            };
            if self.frames.remove(&oldest).is_some() {
                self.stats.evicted += 1;
            }
        }
    }
}
