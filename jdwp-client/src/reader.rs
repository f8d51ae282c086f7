// Helpers for reading JDWP wire types out of reply buffers

use crate::protocol::{JdwpError, JdwpResult};
use crate::types::{tags, Value, ValueData};
use bytes::Buf;

fn ensure(buf: &&[u8], needed: usize, what: &str) -> JdwpResult<()> {
    if buf.remaining() < needed {
        return Err(JdwpError::Protocol(format!(
            "Not enough data for {}: expected {}, got {}",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

/// Read a JDWP string (4-byte length prefix + UTF-8 bytes)
pub fn read_string(buf: &mut &[u8]) -> JdwpResult<String> {
    ensure(buf, 4, "string length")?;
    let len = buf.get_u32() as usize;
    ensure(buf, len, "string body")?;

    let bytes = &buf[..len];
    buf.advance(len);

    String::from_utf8(bytes.to_vec())
        .map_err(|e| JdwpError::Protocol(format!("Invalid UTF-8 in string: {}", e)))
}

pub fn read_u8(buf: &mut &[u8]) -> JdwpResult<u8> {
    ensure(buf, 1, "u8")?;
    Ok(buf.get_u8())
}

pub fn read_u16(buf: &mut &[u8]) -> JdwpResult<u16> {
    ensure(buf, 2, "u16")?;
    Ok(buf.get_u16())
}

pub fn read_i32(buf: &mut &[u8]) -> JdwpResult<i32> {
    ensure(buf, 4, "i32")?;
    Ok(buf.get_i32())
}

pub fn read_u32(buf: &mut &[u8]) -> JdwpResult<u32> {
    ensure(buf, 4, "u32")?;
    Ok(buf.get_u32())
}

pub fn read_u64(buf: &mut &[u8]) -> JdwpResult<u64> {
    ensure(buf, 8, "u64")?;
    Ok(buf.get_u64())
}

/// Read one tagged value: a type tag byte followed by the payload the tag
/// dictates. All reference tags carry an 8-byte object ID.
pub fn read_tagged_value(buf: &mut &[u8]) -> JdwpResult<Value> {
    let tag = read_u8(buf)?;
    let data = read_untagged_value(tag, buf)?;
    Ok(Value { tag, data })
}

/// Read a value payload for a known tag (used for untagged array regions).
pub fn read_untagged_value(tag: u8, buf: &mut &[u8]) -> JdwpResult<ValueData> {
    match tag {
        tags::BYTE => {
            ensure(buf, 1, "byte value")?;
            Ok(ValueData::Byte(buf.get_i8()))
        }
        tags::CHAR => Ok(ValueData::Char(read_u16(buf)?)),
        tags::DOUBLE => {
            ensure(buf, 8, "double value")?;
            Ok(ValueData::Double(buf.get_f64()))
        }
        tags::FLOAT => {
            ensure(buf, 4, "float value")?;
            Ok(ValueData::Float(buf.get_f32()))
        }
        tags::INT => Ok(ValueData::Int(read_i32(buf)?)),
        tags::LONG => {
            ensure(buf, 8, "long value")?;
            Ok(ValueData::Long(buf.get_i64()))
        }
        tags::SHORT => {
            ensure(buf, 2, "short value")?;
            Ok(ValueData::Short(buf.get_i16()))
        }
        tags::BOOLEAN => Ok(ValueData::Boolean(read_u8(buf)? != 0)),
        tags::VOID => Ok(ValueData::Void),
        _ if tags::is_reference(tag) => Ok(ValueData::Object(read_u64(buf)?)),
        _ => Err(JdwpError::Protocol(format!("Unknown value tag: {}", tag))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_string() {
        let data = [0u8, 0, 0, 5, b'L', b'M', b'a', b'i', b'n'];
        let mut buf = &data[..];
        assert_eq!(read_string(&mut buf).unwrap(), "LMain");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_read_string_truncated() {
        let data = [0u8, 0, 0, 9, b'x'];
        let mut buf = &data[..];
        assert!(read_string(&mut buf).is_err());
    }

    #[test]
    fn test_read_tagged_int() {
        let data = [b'I', 0, 0, 0, 42];
        let mut buf = &data[..];
        let value = read_tagged_value(&mut buf).unwrap();
        assert_eq!(value.tag, tags::INT);
        assert!(matches!(value.data, ValueData::Int(42)));
    }

    #[test]
    fn test_read_tagged_object() {
        let mut data = vec![b'L'];
        data.extend_from_slice(&0xCAFEu64.to_be_bytes());
        let mut buf = &data[..];
        let value = read_tagged_value(&mut buf).unwrap();
        assert!(matches!(value.data, ValueData::Object(0xCAFE)));
    }

    #[test]
    fn test_read_tagged_unknown() {
        let data = [0xFFu8, 0, 0, 0, 0];
        let mut buf = &data[..];
        assert!(read_tagged_value(&mut buf).is_err());
    }
}
