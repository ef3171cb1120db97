use crate::error::CoreError;
use crate::object::ObjectKind;

const MAGIC: &[u8; 4] = b"MRO1";
const FORMAT_VERSION: u8 = 0x01;
const COMPRESS_THRESHOLD: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Compression {
    None = 0x00,
    Zstd = 0x01,
}

impl Compression {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::None),
            0x01 => Some(Self::Zstd),
            _ => None,
        }
    }
}

fn encode_uvarint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn decode_uvarint(data: &[u8], pos: &mut usize) -> Result<u64, CoreError> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        if *pos >= data.len() {
            return Err(CoreError::Deserialization(
                "unexpected end of uvarint".into(),
            ));
        }
        let byte = data[*pos];
        *pos += 1;
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 64 {
            return Err(CoreError::Deserialization("uvarint overflow".into()));
        }
    }
    Ok(result)
}

/// Frame an object payload for storage.
/// Format: [4B magic][1B version][1B kind][1B compression][uvarint payload_len][body][4B CRC32]
pub fn encode_object(kind: ObjectKind, payload: &[u8]) -> Result<Vec<u8>, CoreError> {
    let compression = if payload.len() > COMPRESS_THRESHOLD {
        Compression::Zstd
    } else {
        Compression::None
    };

    let body = match compression {
        Compression::None => payload.to_vec(),
        Compression::Zstd => {
            zstd::encode_all(payload, 3).map_err(|e| CoreError::Compression(e.to_string()))?
        }
    };

    let mut buf = Vec::with_capacity(MAGIC.len() + 3 + 10 + body.len() + 4);
    buf.extend_from_slice(MAGIC);
    buf.push(FORMAT_VERSION);
    buf.push(kind as u8);
    buf.push(compression as u8);
    encode_uvarint(payload.len() as u64, &mut buf);
    buf.extend_from_slice(&body);

    // CRC32 covers the uncompressed payload
    let crc = crc32fast::hash(payload);
    buf.extend_from_slice(&crc.to_le_bytes());

    Ok(buf)
}

/// Decode a framed object, returning its kind and uncompressed payload.
pub fn decode_object(data: &[u8]) -> Result<(ObjectKind, Vec<u8>), CoreError> {
    if data.len() < 12 {
        return Err(CoreError::Deserialization(
            "data too short for object frame".into(),
        ));
    }
    if &data[..4] != MAGIC {
        return Err(CoreError::InvalidMagic);
    }
    let version = data[4];
    if version != FORMAT_VERSION {
        return Err(CoreError::UnsupportedVersion(version));
    }
    let kind = ObjectKind::from_u8(data[5]).ok_or(CoreError::UnknownKind(data[5]))?;
    let compression = Compression::from_u8(data[6])
        .ok_or_else(|| CoreError::Deserialization(format!("unknown compression: {}", data[6])))?;

    let mut pos = 7;
    let payload_len = decode_uvarint(data, &mut pos)? as usize;
    if data.len() < pos + 4 {
        return Err(CoreError::Deserialization(
            "data too short for CRC32".into(),
        ));
    }
    let crc_offset = data.len() - 4;
    let expected_crc = u32::from_le_bytes([
        data[crc_offset],
        data[crc_offset + 1],
        data[crc_offset + 2],
        data[crc_offset + 3],
    ]);

    let body = &data[pos..crc_offset];
    let payload = match compression {
        Compression::None => body.to_vec(),
        Compression::Zstd => {
            zstd::decode_all(body).map_err(|e| CoreError::Decompression(e.to_string()))?
        }
    };
    if payload.len() != payload_len {
        return Err(CoreError::Deserialization(format!(
            "payload length mismatch: header says {payload_len}, got {}",
            payload.len()
        )));
    }

    let actual_crc = crc32fast::hash(&payload);
    if expected_crc != actual_crc {
        return Err(CoreError::Crc32Mismatch {
            expected: expected_crc,
            actual: actual_crc,
        });
    }

    Ok((kind, payload))
}
