//! Framed records for companion files
//!
//! Footer extensions and write checkpoints share one framing so a torn or
//! foreign file is detected before its payload is decoded:
//!
//! ```text
//! +--------+---------+--------+---------+--------+
//! | Magic  | Version | Length | Payload | CRC32C |
//! | 4B     | 1B      | 4B     | var     | 4B     |
//! +--------+---------+--------+---------+--------+
//! ```
//!
//! The payload is bincode; the CRC covers everything before it.

use hivestore_common::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Current record format version
pub const RECORD_VERSION: u8 = 1;

const HEADER_SIZE: usize = 9;
const TRAILER_SIZE: usize = 4;

/// Encode a value into a framed record
pub fn encode<T: Serialize>(magic: u32, value: &T) -> Result<Vec<u8>> {
    let payload = bincode::serialize(value).map_err(|e| Error::Serialization(e.to_string()))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::Serialization(format!("record too large: {} bytes", payload.len())))?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    buf.extend_from_slice(&magic.to_le_bytes());
    buf.push(RECORD_VERSION);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&payload);

    let crc = crc32c::crc32c(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Decode a framed record, verifying magic, version, length and checksum
pub fn decode<T: DeserializeOwned>(magic: u32, data: &[u8]) -> Result<T> {
    if data.len() < HEADER_SIZE + TRAILER_SIZE {
        return Err(Error::Deserialization(format!(
            "record too small: {} bytes",
            data.len()
        )));
    }

    let found = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if found != magic {
        return Err(Error::Deserialization(format!(
            "bad record magic: expected {magic:08x}, got {found:08x}"
        )));
    }
    if data[4] != RECORD_VERSION {
        return Err(Error::Deserialization(format!(
            "unsupported record version {}",
            data[4]
        )));
    }

    let len = u32::from_le_bytes([data[5], data[6], data[7], data[8]]) as usize;
    let end = HEADER_SIZE + len;
    if data.len() != end + TRAILER_SIZE {
        return Err(Error::Deserialization(format!(
            "record length mismatch: header says {len}, have {}",
            data.len().saturating_sub(HEADER_SIZE + TRAILER_SIZE)
        )));
    }

    let stored = u32::from_le_bytes([data[end], data[end + 1], data[end + 2], data[end + 3]]);
    let computed = crc32c::crc32c(&data[..end]);
    if stored != computed {
        return Err(Error::Deserialization(format!(
            "record checksum mismatch: computed={computed:08x}, stored={stored:08x}"
        )));
    }

    bincode::deserialize(&data[HEADER_SIZE..end]).map_err(|e| Error::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: u32 = 0x5445_5354;

    #[test]
    fn test_detects_corruption() {
        let mut bytes = encode(MAGIC, &vec![1u8, 2, 3]).unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xff;

        let err = decode::<Vec<u8>>(MAGIC, &bytes).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_detects_truncation_and_magic() {
        let bytes = encode(MAGIC, &String::from("payload")).unwrap();

        assert!(decode::<String>(MAGIC, &bytes[..bytes.len() - 1]).is_err());
        assert!(decode::<String>(MAGIC + 1, &bytes).is_err());
        assert_eq!(decode::<String>(MAGIC, &bytes).unwrap(), "payload");
    }
}
