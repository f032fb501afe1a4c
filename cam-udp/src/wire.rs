// SPDX-License-Identifier: MIT
//! # Datagram Header Codec
//!
//! Parsing is zero-copy: a [`Chunk`] borrows its payload from the received
//! datagram. Encoding is only needed by senders and by tests.

use std::fmt;

/// Fixed header size preceding every payload slice.
pub const HEADER_LEN: usize = 8;

/// Largest datagram a camera is expected to send (Ethernet MTU minus IP/UDP headers).
pub const MAX_DATAGRAM_LEN: usize = 1472;

/// Decoded datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkHeader {
    /// Per-source frame counter.
    pub frame_index: u32,
    /// Position of this slice within the frame.
    pub chunk_index: u16,
    /// Number of chunks the sender split the frame into.
    pub total_chunks: u16,
}

impl ChunkHeader {
    /// Serialize the header into its 8-byte little-endian form.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.frame_index.to_le_bytes());
        out[4..6].copy_from_slice(&self.chunk_index.to_le_bytes());
        out[6..8].copy_from_slice(&self.total_chunks.to_le_bytes());
        out
    }
}

/// A parsed datagram: header plus the payload slice it carries.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    pub header: ChunkHeader,
    pub payload: &'a [u8],
}

/// Reasons a datagram is rejected before it reaches a reassembly buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramError {
    /// Fewer than [`HEADER_LEN`] bytes.
    TooShort { len: usize },
    /// Header declares a frame with zero chunks, which can never complete.
    ZeroChunks { frame_index: u32 },
}

impl fmt::Display for DatagramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatagramError::TooShort { len } => {
                write!(f, "datagram of {len} bytes is shorter than the {HEADER_LEN}-byte header")
            }
            DatagramError::ZeroChunks { frame_index } => {
                write!(f, "frame {frame_index} declares zero chunks")
            }
        }
    }
}

impl std::error::Error for DatagramError {}

/// Split a received datagram into header and payload.
///
/// Chunk indices outside `0..total_chunks` are accepted here on purpose: the
/// reassembly buffer is where incomplete frames are detected and dropped.
pub fn parse_datagram(datagram: &[u8]) -> Result<Chunk<'_>, DatagramError> {
    if datagram.len() < HEADER_LEN {
        return Err(DatagramError::TooShort {
            len: datagram.len(),
        });
    }

    let frame_index = u32::from_le_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]);
    let chunk_index = u16::from_le_bytes([datagram[4], datagram[5]]);
    let total_chunks = u16::from_le_bytes([datagram[6], datagram[7]]);

    if total_chunks == 0 {
        return Err(DatagramError::ZeroChunks { frame_index });
    }

    Ok(Chunk {
        header: ChunkHeader {
            frame_index,
            chunk_index,
            total_chunks,
        },
        payload: &datagram[HEADER_LEN..],
    })
}

/// Split an encoded frame into datagrams of at most `max_datagram_len` bytes.
///
/// An empty frame still yields one header-only datagram so the receiver sees a
/// complete (if undecodable) frame. Frames needing more than `u16::MAX` chunks
/// are truncated to that many chunks.
pub fn chunk_frame(frame_index: u32, encoded: &[u8], max_datagram_len: usize) -> Vec<Vec<u8>> {
    let payload_len = max_datagram_len.saturating_sub(HEADER_LEN).max(1);
    let slices: Vec<&[u8]> = if encoded.is_empty() {
        vec![&encoded[..0]]
    } else {
        encoded
            .chunks(payload_len)
            .take(u16::MAX as usize)
            .collect()
    };
    let total_chunks = slices.len() as u16;

    slices
        .into_iter()
        .enumerate()
        .map(|(i, slice)| {
            let header = ChunkHeader {
                frame_index,
                chunk_index: i as u16,
                total_chunks,
            };
            let mut dgram = Vec::with_capacity(HEADER_LEN + slice.len());
            dgram.extend_from_slice(&header.to_bytes());
            dgram.extend_from_slice(slice);
            dgram
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_little_endian_header() {
        let dgram = [0x01, 0x02, 0x00, 0x00, 0x03, 0x00, 0x05, 0x00, 0xAA, 0xBB];
        let chunk = parse_datagram(&dgram).unwrap();
        assert_eq!(chunk.header.frame_index, 0x0201);
        assert_eq!(chunk.header.chunk_index, 3);
        assert_eq!(chunk.header.total_chunks, 5);
        assert_eq!(chunk.payload, &[0xAA, 0xBB]);
    }

    #[test]
    fn rejects_short_datagrams() {
        assert_eq!(
            parse_datagram(&[0u8; 7]).unwrap_err(),
            DatagramError::TooShort { len: 7 }
        );
        // A bare header is valid and carries an empty payload.
        let header = ChunkHeader {
            frame_index: 1,
            chunk_index: 0,
            total_chunks: 1,
        };
        assert!(parse_datagram(&header.to_bytes()).unwrap().payload.is_empty());
    }

    #[test]
    fn rejects_zero_chunk_frames() {
        let header = ChunkHeader {
            frame_index: 9,
            chunk_index: 0,
            total_chunks: 0,
        };
        assert_eq!(
            parse_datagram(&header.to_bytes()).unwrap_err(),
            DatagramError::ZeroChunks { frame_index: 9 }
        );
    }

    #[test]
    fn chunker_respects_datagram_limit() {
        let data: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();
        let dgrams = chunk_frame(42, &data, 1000);
        assert_eq!(dgrams.len(), 4);
        assert!(dgrams.iter().all(|d| d.len() <= 1000));

        let rebuilt: Vec<u8> = dgrams
            .iter()
            .flat_map(|d| parse_datagram(d).unwrap().payload.to_vec())
            .collect();
        assert_eq!(rebuilt, data);

        let last = parse_datagram(&dgrams[3]).unwrap().header;
        assert_eq!(last.chunk_index, 3);
        assert_eq!(last.total_chunks, 4);
    }
}
