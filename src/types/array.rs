// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Fixed-length array decoding/encoding over a run of elementary values.
//!
//! Unbounded arrays (`count` driven by the controller rather than known up
//! front) aren't modeled here: a Read Tag reply for an unbounded array
//! simply fills the reply payload with as many elements as fit, which the
//! planner decodes by repeatedly calling [`decode_fixed`] with
//! `count = remaining_bytes / element_size`.

use super::super::error::Error;
use super::{TypeDescriptor, Value};

/// decodes `count` consecutive elements of `descriptor` from the front of
/// `buf`, returning the elements wrapped in [`Value::Array`] and the total
/// number of bytes consumed.
pub fn decode_fixed(descriptor: TypeDescriptor, count: usize, buf: &[u8]) -> Result<(Value, usize), Error> {
    let mut items = Vec::with_capacity(count);
    let mut offset = 0;
    for _ in 0..count {
        let (value, consumed) = Value::decode_elementary(descriptor, &buf[offset..])?;
        offset += consumed;
        items.push(value);
    }
    Ok((Value::Array(items), offset))
}

/// encodes each element of `items` in order; every element must already be
/// the expected elementary type, which the planner guarantees when it built
/// the write request from a tag's declared type.
pub fn encode(items: &[Value], buf: &mut Vec<u8>) -> Result<(), Error> {
    for item in items {
        item.encode(buf)?;
    }
    Ok(())
}

/// decodes `count` packed `BOOL`s starting at bit `bit_offset` of `buf`, the
/// raw bytes of the `DWORD`(s) backing a `BOOL[N]` array. `BOOL[N]` is
/// physically stored as `DWORD[ceil(N/32)]`, so a slice read at element
/// `start` spans whichever contiguous host words cover
/// `start..start+count`; `bit_offset` is `start` reduced to its position
/// within the first word of `buf`.
pub fn decode_bool_array(buf: &[u8], bit_offset: usize, count: usize) -> Result<Value, Error> {
    let mut items = Vec::with_capacity(count);
    for i in 0..count {
        let bit = bit_offset + i;
        let byte = bit / 8;
        if byte >= buf.len() {
            return Err(Error::DataValue(format!(
                "BOOL array reply has {} bytes, not enough for bit {}",
                buf.len(),
                bit
            )));
        }
        items.push(Value::Bool(buf[byte] & (1 << (bit % 8)) != 0));
    }
    Ok(Value::Array(items))
}

/// packs `items` (all `Value::Bool`) into whole backing `DWORD`s for a
/// `BOOL[N]` array write. callers enforce the write-whole-DWORD alignment
/// precondition (`items.len()` a multiple of 32) before calling this.
pub fn encode_bool_array(items: &[Value]) -> Result<Vec<u8>, Error> {
    let dwords = (items.len() + 31) / 32;
    let mut packed = vec![0u8; dwords * 4];
    for (i, item) in items.iter().enumerate() {
        let set = match item {
            Value::Bool(b) => *b,
            other => {
                return Err(Error::DataValue(format!(
                    "BOOL array element {} is not a BOOL: {:?}",
                    i, other
                )))
            }
        };
        if set {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant;

    #[test]
    fn decodes_fixed_array_of_dint() {
        let mut buf = Vec::new();
        for v in [1i32, 2, 3] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        let (value, consumed) =
            decode_fixed(TypeDescriptor::Elementary(constant::TYPE_DINT), 3, &buf).unwrap();
        assert_eq!(consumed, 12);
        assert_eq!(
            value,
            Value::Array(vec![Value::Dint(1), Value::Dint(2), Value::Dint(3)])
        );
    }

    #[test]
    fn encode_round_trips() {
        let items = vec![Value::Int(5), Value::Int(-5)];
        let mut buf = Vec::new();
        encode(&items, &mut buf).unwrap();
        let (decoded, _) = decode_fixed(TypeDescriptor::Elementary(constant::TYPE_INT), 2, &buf).unwrap();
        assert_eq!(decoded, Value::Array(items));
    }

    #[test]
    fn short_buffer_errors() {
        assert!(decode_fixed(TypeDescriptor::Elementary(constant::TYPE_DINT), 2, &[0, 0, 0, 0]).is_err());
    }

    #[test]
    fn bool_array_round_trips_whole_dword() {
        let items: Vec<Value> = (0..32).map(|i| Value::Bool(i % 3 == 0)).collect();
        let packed = encode_bool_array(&items).unwrap();
        assert_eq!(packed.len(), 4);
        let decoded = decode_bool_array(&packed, 0, 32).unwrap();
        assert_eq!(decoded, Value::Array(items));
    }

    #[test]
    fn bool_array_decode_spans_second_word_offset() {
        // bits 32..39 set in the second DWORD
        let mut buf = vec![0u8; 8];
        buf[4] = 0b0000_0001;
        let decoded = decode_bool_array(&buf, 32, 1).unwrap();
        assert_eq!(decoded, Value::Array(vec![Value::Bool(true)]));
    }

    #[test]
    fn bool_array_decode_short_buffer_errors() {
        assert!(decode_bool_array(&[0u8; 2], 0, 32).is_err());
    }
}
