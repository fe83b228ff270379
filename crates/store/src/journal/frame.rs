use crc32c::crc32c;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Length prefix plus checksum
pub const FRAME_HEADER_LEN: usize = 8;

/// Anything larger is treated as a torn or garbage length prefix
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal frame encoding failed: {0}")]
    Encode(#[from] bincode::Error),

    #[error("journal frame is {len} bytes, limit is {MAX_FRAME_LEN}")]
    FrameTooLarge { len: usize },

    #[error("journal frame checksum mismatch (expected {expected:#010x}, found {found:#010x})")]
    Checksum { expected: u32, found: u32 },

    #[error("journal frame truncated")]
    Truncated,
}

/// Encode `body` as a complete frame
pub fn encode_frame<T: Serialize>(body: &T) -> Result<Vec<u8>, JournalError> {
    let payload = bincode::serialize(body)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(JournalError::FrameTooLarge { len: payload.len() });
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32c(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode a single frame from the start of `bytes`, returning the body and
/// the number of bytes consumed
pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<(T, usize), JournalError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(JournalError::Truncated);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let expected = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if len > MAX_FRAME_LEN {
        return Err(JournalError::FrameTooLarge { len });
    }
    let end = FRAME_HEADER_LEN + len;
    let payload = bytes.get(FRAME_HEADER_LEN..end).ok_or(JournalError::Truncated)?;

    let found = crc32c(payload);
    if found != expected {
        return Err(JournalError::Checksum { expected, found });
    }
    Ok((bincode::deserialize(payload)?, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_flipped_bit() {
        let mut frame = encode_frame(&("quotes".to_string(), 7u64)).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x01;

        match decode_frame::<(String, u64)>(&frame) {
            Err(JournalError::Checksum { .. }) => {}
            other => panic!("expected checksum error, got {other:?}"),
        }
    }

    #[test]
    fn short_input_is_truncated() {
        let frame = encode_frame(&42u32).unwrap();
        assert!(matches!(
            decode_frame::<u32>(&frame[..frame.len() - 1]),
            Err(JournalError::Truncated)
        ));
        assert!(matches!(decode_frame::<u32>(&frame[..3]), Err(JournalError::Truncated)));
    }

    #[test]
    fn reports_consumed_length() {
        let mut bytes = encode_frame(&1u8).unwrap();
        let first_len = bytes.len();
        bytes.extend(encode_frame(&2u8).unwrap());

        let (first, used) = decode_frame::<u8>(&bytes).unwrap();
        assert_eq!((first, used), (1, first_len));
        let (second, _) = decode_frame::<u8>(&bytes[used..]).unwrap();
        assert_eq!(second, 2);
    }
}
