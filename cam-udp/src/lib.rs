// SPDX-License-Identifier: MIT
//! # cam-udp: Chunked JPEG Transport for Low-Power Cameras
//!
//! Cameras that cannot hold a TCP session open push each JPEG frame as a burst of
//! UDP datagrams. This crate holds the pure, I/O-free half of that transport:
//!
//! - [`wire`]: the 8-byte datagram header codec and the sender-side chunker
//! - [`reassembly`]: the per-source buffer that turns chunks back into frames
//!
//! ## Datagram Layout
//!
//! ```text
//! 0        4        6        8                       end
//! ├────────┼────────┼────────┼─────────────────────────┤
//! │ frame  │ chunk  │ total  │ JPEG payload slice      │
//! │ u32 LE │ u16 LE │ u16 LE │                         │
//! └────────┴────────┴────────┴─────────────────────────┘
//! ```
//!
//! There is no handshake, acknowledgment, or retransmission. A frame is complete
//! when every chunk index in `0..total` has arrived; lost chunks simply leave the
//! frame pending until it is evicted.
//!
//! ## Usage Example
//!
//! ```rust
//! use cam_udp::{chunk_frame, parse_datagram, reassembly::{Outcome, ReassemblyBuffer}};
//!
//! let jpeg = vec![0xFFu8; 4000];
//! let datagrams = chunk_frame(7, &jpeg, 1464);
//!
//! let mut buffer = ReassemblyBuffer::new(5);
//! let mut assembled = None;
//! for dgram in &datagrams {
//!     let chunk = parse_datagram(dgram).unwrap();
//!     if let Outcome::Complete { bytes, .. } = buffer.push(chunk.header, chunk.payload) {
//!         assembled = Some(bytes);
//!     }
//! }
//! assert_eq!(assembled.as_deref(), Some(&jpeg[..]));
//! ```

pub mod reassembly;
pub mod wire;

pub use reassembly::{Outcome, ReassemblyBuffer, ReassemblyStats};
pub use wire::{
    chunk_frame, parse_datagram, Chunk, ChunkHeader, DatagramError, HEADER_LEN, MAX_DATAGRAM_LEN,
};
