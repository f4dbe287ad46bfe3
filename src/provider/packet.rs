//! Packed multi-tile packet decoding
//!
//! One fetched payload carries the stored node's sample buffer plus the
//! buffers of whichever direct children are present. The wire layout is a
//! small header (magic word, uncompressed length) over a zlib stream; the
//! inflated body is a sequence of length-prefixed sub-buffers, first the
//! fetched node's own, then the children in child-digit order.

use std::io::Read;

use flate2::read::ZlibDecoder;
use thiserror::Error;

use crate::constants::packet::{COMPRESSED_MAGIC, HEADER_BYTES, MAX_TILES_PER_PACKET};
use crate::heightmap::ElementKind;

/// Decoded sample buffers out of one packet: the fetched node first, then
/// sub-buffer `i + 1` belongs to child digit `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct TilePacket {
    pub buffers: Vec<Vec<f64>>,
}

/// Malformed-payload failures.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("bad packet magic {found:#010x}")]
    BadMagic { found: u32 },

    #[error("packet truncated")]
    Truncated,

    #[error("packet inflation failed: {0}")]
    Inflate(String),

    #[error("inflated size {actual} does not match header {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("packet holds {count} sub-buffers, limit is {limit}")]
    TooManyTiles { count: usize, limit: usize },

    #[error("sub-buffer length {len} is not a whole number of {kind:?} elements")]
    RaggedBuffer { len: usize, kind: ElementKind },
}

/// Splits one raw network response into per-tile sample buffers.
pub trait PacketDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], kind: ElementKind) -> Result<TilePacket, DecodeError>;
}

/// Decoder for the reference packed wire format.
#[derive(Debug, Default)]
pub struct PackedTileDecoder;

impl PacketDecoder for PackedTileDecoder {
    fn decode(&self, bytes: &[u8], kind: ElementKind) -> Result<TilePacket, DecodeError> {
        let body = inflate_packet(bytes)?;

        let mut buffers = Vec::new();
        let mut offset = 0usize;
        while offset < body.len() {
            let len = read_u32(&body, offset)? as usize;
            offset += 4;
            let payload = body
                .get(offset..offset + len)
                .ok_or(DecodeError::Truncated)?;
            offset += len;
            buffers.push(samples_from_bytes(payload, kind)?);
        }
        if buffers.len() > MAX_TILES_PER_PACKET {
            return Err(DecodeError::TooManyTiles {
                count: buffers.len(),
                limit: MAX_TILES_PER_PACKET,
            });
        }
        if buffers.is_empty() {
            return Err(DecodeError::Truncated);
        }
        Ok(TilePacket { buffers })
    }
}

fn inflate_packet(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if bytes.len() < HEADER_BYTES {
        return Err(DecodeError::Truncated);
    }
    let magic = read_u32(bytes, 0)?;
    if magic != COMPRESSED_MAGIC {
        return Err(DecodeError::BadMagic { found: magic });
    }
    let expected = read_u32(bytes, 4)? as usize;

    let mut body = Vec::with_capacity(expected);
    ZlibDecoder::new(&bytes[HEADER_BYTES..])
        .read_to_end(&mut body)
        .map_err(|e| DecodeError::Inflate(e.to_string()))?;
    if body.len() != expected {
        return Err(DecodeError::SizeMismatch {
            expected,
            actual: body.len(),
        });
    }
    Ok(body)
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, DecodeError> {
    let word = bytes
        .get(offset..offset + 4)
        .ok_or(DecodeError::Truncated)?;
    Ok(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
}

/// Converts little-endian wire elements into f64 samples.
fn samples_from_bytes(bytes: &[u8], kind: ElementKind) -> Result<Vec<f64>, DecodeError> {
    let element_size = kind.bytes_per_element();
    if bytes.len() % element_size != 0 {
        return Err(DecodeError::RaggedBuffer {
            len: bytes.len(),
            kind,
        });
    }
    let samples = match kind {
        ElementKind::Uint8 => bytes.iter().map(|&b| f64::from(b)).collect(),
        ElementKind::Uint16 => bytemuck::pod_collect_to_vec::<u8, u16>(bytes)
            .into_iter()
            .map(f64::from)
            .collect(),
        ElementKind::Int16 => bytemuck::pod_collect_to_vec::<u8, i16>(bytes)
            .into_iter()
            .map(f64::from)
            .collect(),
        ElementKind::Float32 => bytemuck::pod_collect_to_vec::<u8, f32>(bytes)
            .into_iter()
            .map(f64::from)
            .collect(),
    };
    Ok(samples)
}
