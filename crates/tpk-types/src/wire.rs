//! Byte-level primitives shared by every tuplepack encoder.
//!
//! Readers operate on a `&mut &[u8]` cursor that is advanced past whatever
//! was consumed, so decoders compose without tracking offsets by hand.

use crate::error::TypeError;

/// Encode a u64 as a variable-length integer.
pub fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a variable-length integer and advance the cursor.
pub fn decode_varint(input: &mut &[u8]) -> Result<u64, TypeError> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in input.iter().enumerate() {
        if shift >= 64 {
            return Err(TypeError::VarintOverflow);
        }
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            *input = &input[i + 1..];
            return Ok(value);
        }
    }
    Err(TypeError::Truncated {
        needed: input.len() + 1,
        available: input.len(),
    })
}

/// Split `n` bytes off the front of the cursor.
pub fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], TypeError> {
    if input.len() < n {
        return Err(TypeError::Truncated {
            needed: n,
            available: input.len(),
        });
    }
    let (head, tail) = input.split_at(n);
    *input = tail;
    Ok(head)
}

/// Read a fixed-size array off the front of the cursor.
pub fn take_array<const N: usize>(input: &mut &[u8]) -> Result<[u8; N], TypeError> {
    let bytes = take(input, N)?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(bytes);
    Ok(arr)
}

/// Write a length-prefixed byte string.
pub fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Read a length-prefixed byte string.
pub fn take_bytes<'a>(input: &mut &'a [u8]) -> Result<&'a [u8], TypeError> {
    let len = decode_varint(input)?;
    let len = usize::try_from(len).map_err(|_| TypeError::Truncated {
        needed: usize::MAX,
        available: input.len(),
    })?;
    take(input, len)
}

/// Write a length-prefixed UTF-8 string.
pub fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_bytes(buf, s.as_bytes());
}

/// Read a length-prefixed UTF-8 string.
pub fn take_str(input: &mut &[u8]) -> Result<String, TypeError> {
    let bytes = take_bytes(input)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| TypeError::InvalidUtf8(e.to_string()))
}
