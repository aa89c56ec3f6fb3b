// src/core/event/codec.rs

//! Binary encoding of one leaf box's events.
//!
//! Layout (little-endian):
//! `magic u32 | nd u8 | count u32 | count × record | crc32 u32`
//! where a record is `nd × f64 coords | f64 signal | f64 error | u8 has_provenance
//! | [u32 run_index | u32 detector_id]`. The checksum covers every byte before it.

use super::{Event, EventProvenance};
use crate::core::common::MdStoreError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

pub const BLOCK_MAGIC: u32 = 0x4D44_4556; // "MDEV"
// magic (4) + nd (1) + count (4)
pub const BLOCK_HEADER_SIZE: usize = 9;
pub const BLOCK_TRAILER_SIZE: usize = 4;
const PROVENANCE_SIZE: usize = 8;

const fn record_len(nd: usize, full: bool) -> usize {
    let base = nd * 8 + 8 + 8 + 1;
    if full {
        base + PROVENANCE_SIZE
    } else {
        base
    }
}

/// Exact size in bytes of `encode_block(events, nd)`.
pub fn encoded_len(events: &[Event], nd: usize) -> usize {
    BLOCK_HEADER_SIZE
        + events.iter().map(|e| record_len(nd, e.is_full())).sum::<usize>()
        + BLOCK_TRAILER_SIZE
}

/// Serializes `events` into a self-checking block.
///
/// # Errors
/// `InvalidInput` if an event's dimensionality differs from `nd` or the block would hold
/// more than `u32::MAX` events.
pub fn encode_block(events: &[Event], nd: usize) -> Result<Vec<u8>, MdStoreError> {
    let count = u32::try_from(events.len()).map_err(|_| {
        MdStoreError::invalid_input(format!("{} events do not fit in one block", events.len()))
    })?;
    let nd_byte = u8::try_from(nd)
        .map_err(|_| MdStoreError::invalid_input(format!("nd {nd} does not fit in a block")))?;

    let mut buffer = Vec::with_capacity(encoded_len(events, nd));
    buffer.write_u32::<LittleEndian>(BLOCK_MAGIC)?;
    buffer.write_u8(nd_byte)?;
    buffer.write_u32::<LittleEndian>(count)?;

    for event in events {
        if event.nd() != nd {
            return Err(MdStoreError::invalid_input(format!(
                "event has {} coordinates, block expects {}",
                event.nd(),
                nd
            )));
        }
        for &c in event.coords() {
            buffer.write_f64::<LittleEndian>(c)?;
        }
        buffer.write_f64::<LittleEndian>(event.signal)?;
        buffer.write_f64::<LittleEndian>(event.error)?;
        match event.provenance {
            Some(p) => {
                buffer.write_u8(1)?;
                buffer.write_u32::<LittleEndian>(p.run_index)?;
                buffer.write_u32::<LittleEndian>(p.detector_id)?;
            }
            None => buffer.write_u8(0)?,
        }
    }

    let crc = crc32fast::hash(&buffer);
    buffer.write_u32::<LittleEndian>(crc)?;
    Ok(buffer)
}

fn corrupt(context: &str, err: &std::io::Error) -> MdStoreError {
    MdStoreError::CorruptData(format!("event block truncated while reading {context}: {err}"))
}

/// Parses a block produced by [`encode_block`].
///
/// # Errors
/// `CorruptData` on a short buffer, bad magic, dimensionality mismatch, checksum mismatch or
/// trailing bytes.
pub fn decode_block(bytes: &[u8], nd: usize) -> Result<Vec<Event>, MdStoreError> {
    if bytes.len() < BLOCK_HEADER_SIZE + BLOCK_TRAILER_SIZE {
        return Err(MdStoreError::CorruptData(format!(
            "event block is {} bytes, shorter than the {} byte minimum",
            bytes.len(),
            BLOCK_HEADER_SIZE + BLOCK_TRAILER_SIZE
        )));
    }

    let payload_end = bytes.len() - BLOCK_TRAILER_SIZE;
    let (payload, trailer) = bytes.split_at(payload_end);
    let stored_crc = Cursor::new(trailer)
        .read_u32::<LittleEndian>()
        .map_err(|e| corrupt("checksum", &e))?;
    let actual_crc = crc32fast::hash(payload);
    if stored_crc != actual_crc {
        return Err(MdStoreError::CorruptData(format!(
            "event block checksum mismatch: stored {stored_crc:#010x}, computed {actual_crc:#010x}"
        )));
    }

    let mut cursor = Cursor::new(payload);
    let magic = cursor.read_u32::<LittleEndian>().map_err(|e| corrupt("magic", &e))?;
    if magic != BLOCK_MAGIC {
        return Err(MdStoreError::CorruptData(format!("bad event block magic {magic:#010x}")));
    }
    let block_nd = usize::from(cursor.read_u8().map_err(|e| corrupt("nd", &e))?);
    if block_nd != nd {
        return Err(MdStoreError::CorruptData(format!(
            "event block holds {block_nd}-d events, workspace is {nd}-d"
        )));
    }
    let count = cursor.read_u32::<LittleEndian>().map_err(|e| corrupt("count", &e))? as usize;

    // Lean records are the smallest possible; reject counts the payload cannot hold before
    // reserving memory for them.
    let remaining = payload.len() - BLOCK_HEADER_SIZE;
    if count > remaining / record_len(nd, false) {
        return Err(MdStoreError::CorruptData(format!(
            "event block claims {count} events but only has {remaining} payload bytes"
        )));
    }

    let mut events = Vec::with_capacity(count);
    let mut coords = vec![0.0; nd];
    for _ in 0..count {
        for slot in &mut coords {
            *slot = cursor.read_f64::<LittleEndian>().map_err(|e| corrupt("coordinate", &e))?;
        }
        let signal = cursor.read_f64::<LittleEndian>().map_err(|e| corrupt("signal", &e))?;
        let error = cursor.read_f64::<LittleEndian>().map_err(|e| corrupt("error", &e))?;
        let mut event = Event::new(&coords, signal, error)?;
        match cursor.read_u8().map_err(|e| corrupt("record flag", &e))? {
            0 => {}
            1 => {
                let run_index =
                    cursor.read_u32::<LittleEndian>().map_err(|e| corrupt("run index", &e))?;
                let detector_id =
                    cursor.read_u32::<LittleEndian>().map_err(|e| corrupt("detector id", &e))?;
                event.provenance = Some(EventProvenance { run_index, detector_id });
            }
            flag => {
                return Err(MdStoreError::CorruptData(format!("invalid record flag {flag}")));
            }
        }
        events.push(event);
    }

    if cursor.position() as usize != payload.len() {
        return Err(MdStoreError::CorruptData(format!(
            "event block has {} trailing bytes",
            payload.len() - cursor.position() as usize
        )));
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_events() -> Vec<Event> {
        vec![
            Event::new(&[0.25, 9.5], 1.0, 1.0).unwrap(),
            Event::with_provenance(&[3.0, 4.0], 2.5, 0.5, 7, 4096).unwrap(),
            Event::new(&[9.999, 0.0], -1.0, 2.0).unwrap(),
        ]
    }

    #[test]
    fn test_block_preserves_lean_and_full_events() {
        let events = sample_events();
        let bytes = encode_block(&events, 2).unwrap();
        assert_eq!(bytes.len(), encoded_len(&events, 2));

        let decoded = decode_block(&bytes, 2).unwrap();
        assert_eq!(decoded, events);
        assert_eq!(decoded[1].provenance.unwrap().detector_id, 4096);
    }

    #[test]
    fn test_empty_block() {
        let bytes = encode_block(&[], 3).unwrap();
        assert_eq!(bytes.len(), BLOCK_HEADER_SIZE + BLOCK_TRAILER_SIZE);
        assert!(decode_block(&bytes, 3).unwrap().is_empty());
    }

    #[test]
    fn test_encode_rejects_mismatched_dimensionality() {
        let events = sample_events();
        assert!(matches!(encode_block(&events, 3), Err(MdStoreError::InvalidInput { .. })));
    }

    #[test]
    fn test_flipped_byte_is_detected() {
        let mut bytes = encode_block(&sample_events(), 2).unwrap();
        bytes[20] ^= 0xFF;
        let err = decode_block(&bytes, 2).unwrap_err();
        assert!(matches!(err, MdStoreError::CorruptData(ref msg) if msg.contains("checksum")));
    }

    #[test]
    fn test_short_block_is_corrupt() {
        let bytes = encode_block(&sample_events(), 2).unwrap();
        assert!(matches!(decode_block(&bytes[..10], 2), Err(MdStoreError::CorruptData(_))));
        assert!(matches!(decode_block(&[], 2), Err(MdStoreError::CorruptData(_))));
    }

    #[test]
    fn test_wrong_dimensionality_is_corrupt() {
        let bytes = encode_block(&sample_events(), 2).unwrap();
        let err = decode_block(&bytes, 3).unwrap_err();
        assert!(matches!(err, MdStoreError::CorruptData(ref msg) if msg.contains("2-d")));
    }

    #[test]
    fn test_inflated_count_is_corrupt() {
        let mut bytes = encode_block(&sample_events(), 2).unwrap();
        // Overwrite the count and re-seal the checksum so only the count is wrong.
        bytes[5..9].copy_from_slice(&1_000_000u32.to_le_bytes());
        let payload_end = bytes.len() - BLOCK_TRAILER_SIZE;
        let crc = crc32fast::hash(&bytes[..payload_end]);
        bytes[payload_end..].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(decode_block(&bytes, 2), Err(MdStoreError::CorruptData(_))));
    }
}
