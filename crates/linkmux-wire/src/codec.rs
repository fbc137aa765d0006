use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};

/// Append a big-endian unsigned 32-bit integer.
pub fn put_u32(dst: &mut BytesMut, value: u32) {
    dst.put_u32(value);
}

/// Append a big-endian signed 32-bit integer.
pub fn put_i32(dst: &mut BytesMut, value: i32) {
    dst.put_i32(value);
}

/// Append a single byte.
pub fn put_u8(dst: &mut BytesMut, value: u8) {
    dst.put_u8(value);
}

/// Append a length-prefixed byte block (`[4B len][raw bytes]`).
pub fn put_block(dst: &mut BytesMut, data: &[u8]) {
    dst.put_u32(data.len() as u32);
    dst.put_slice(data);
}

/// Append a null-terminated UTF-8 string (`[bytes][0x00]`).
///
/// Rejects strings that contain an embedded NUL, which would corrupt
/// the framing of every field behind it.
pub fn put_cstr(dst: &mut BytesMut, value: &str) -> Result<()> {
    if let Some(offset) = value.bytes().position(|b| b == 0) {
        return Err(WireError::EmbeddedNul(offset));
    }
    dst.put_slice(value.as_bytes());
    dst.put_u8(0);
    Ok(())
}

/// Consume a big-endian unsigned 32-bit integer from the front of `src`.
pub fn get_u32(src: &mut Bytes) -> Result<u32> {
    ensure(src, 4)?;
    Ok(src.get_u32())
}

/// Consume a big-endian signed 32-bit integer from the front of `src`.
pub fn get_i32(src: &mut Bytes) -> Result<i32> {
    ensure(src, 4)?;
    Ok(src.get_i32())
}

/// Consume a single byte from the front of `src`.
pub fn get_u8(src: &mut Bytes) -> Result<u8> {
    ensure(src, 1)?;
    Ok(src.get_u8())
}

/// Consume a length-prefixed byte block from the front of `src`.
pub fn get_block(src: &mut Bytes) -> Result<Bytes> {
    let len = get_u32(src)? as usize;
    ensure(src, len)?;
    Ok(src.split_to(len))
}

/// Consume a null-terminated UTF-8 string from the front of `src`.
///
/// The terminator byte is consumed but not part of the returned string.
pub fn get_cstr(src: &mut Bytes) -> Result<String> {
    let nul = src
        .iter()
        .position(|&b| b == 0)
        .ok_or(WireError::MissingTerminator(src.len()))?;
    let raw = src.split_to(nul);
    src.advance(1);
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8)
}

fn ensure(src: &Bytes, needed: usize) -> Result<()> {
    if src.len() < needed {
        return Err(WireError::Truncated {
            needed,
            have: src.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_roundtrip() {
        let mut buf = BytesMut::new();
        put_u32(&mut buf, 0xDEAD_BEEF);
        let mut src = buf.freeze();
        assert_eq!(get_u32(&mut src).unwrap(), 0xDEAD_BEEF);
        assert!(src.is_empty());
    }

    #[test]
    fn u32_is_big_endian() {
        let mut buf = BytesMut::new();
        put_u32(&mut buf, 1);
        assert_eq!(buf.as_ref(), &[0, 0, 0, 1]);
    }

    #[test]
    fn i32_roundtrip_negative() {
        let mut buf = BytesMut::new();
        put_i32(&mut buf, -7);
        let mut src = buf.freeze();
        assert_eq!(get_i32(&mut src).unwrap(), -7);
    }

    #[test]
    fn block_roundtrip() {
        let mut buf = BytesMut::new();
        put_block(&mut buf, b"payload");
        put_u32(&mut buf, 99);
        let mut src = buf.freeze();
        assert_eq!(get_block(&mut src).unwrap().as_ref(), b"payload");
        assert_eq!(get_u32(&mut src).unwrap(), 99);
    }

    #[test]
    fn empty_block_roundtrip() {
        let mut buf = BytesMut::new();
        put_block(&mut buf, b"");
        let mut src = buf.freeze();
        assert!(get_block(&mut src).unwrap().is_empty());
        assert!(src.is_empty());
    }

    #[test]
    fn cstr_roundtrip_leaves_tail() {
        let mut buf = BytesMut::new();
        put_cstr(&mut buf, "pwd").unwrap();
        put_cstr(&mut buf, "/tmp").unwrap();
        let mut src = buf.freeze();
        assert_eq!(get_cstr(&mut src).unwrap(), "pwd");
        assert_eq!(get_cstr(&mut src).unwrap(), "/tmp");
        assert!(src.is_empty());
    }

    #[test]
    fn cstr_rejects_embedded_nul() {
        let mut buf = BytesMut::new();
        let err = put_cstr(&mut buf, "a\0b").unwrap_err();
        assert!(matches!(err, WireError::EmbeddedNul(1)));
    }

    #[test]
    fn cstr_missing_terminator() {
        let mut src = Bytes::from_static(b"no-terminator");
        let err = get_cstr(&mut src).unwrap_err();
        assert!(matches!(err, WireError::MissingTerminator(13)));
    }

    #[test]
    fn cstr_invalid_utf8() {
        let mut src = Bytes::from_static(&[0xFF, 0xFE, 0x00]);
        let err = get_cstr(&mut src).unwrap_err();
        assert!(matches!(err, WireError::InvalidUtf8));
    }

    #[test]
    fn truncated_integer() {
        let mut src = Bytes::from_static(&[0, 0, 1]);
        let err = get_u32(&mut src).unwrap_err();
        assert!(matches!(err, WireError::Truncated { needed: 4, have: 3 }));
    }

    #[test]
    fn truncated_block_body() {
        let mut buf = BytesMut::new();
        put_u32(&mut buf, 16);
        buf.put_slice(b"short");
        let mut src = buf.freeze();
        let err = get_block(&mut src).unwrap_err();
        assert!(matches!(err, WireError::Truncated { needed: 16, .. }));
    }
}
