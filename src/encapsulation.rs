// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! EtherNet/IP encapsulation header and Common Packet Format (CPF) framing.
//!
//! Every frame on the wire starts with a fixed 24-byte header, followed by a
//! command-specific payload. For `SendRRData`/`SendUnitData` that payload is
//! a CPF item list: an interface handle, a timeout, and a count-prefixed
//! sequence of typed items (null address, connected address, connected data,
//! unconnected data).

use super::constant;
use super::error::Error;
use byteorder::{ByteOrder, LittleEndian};

/// the 24-byte header present on every encapsulation message
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub command: u16,
    pub length: u16,
    pub session_handle: u32,
    pub status: u32,
    pub sender_context: [u8; 8],
    pub options: u32,
}

impl Header {
    pub fn new(command: u16, length: u16, session_handle: u32) -> Header {
        Header {
            command,
            length,
            session_handle,
            status: 0,
            sender_context: [0u8; 8],
            options: 0,
        }
    }

    pub fn encode(&self) -> [u8; constant::ENCAPSULATION_HEADER_SIZE] {
        let mut buf = [0u8; constant::ENCAPSULATION_HEADER_SIZE];
        LittleEndian::write_u16(&mut buf[0..2], self.command);
        LittleEndian::write_u16(&mut buf[2..4], self.length);
        LittleEndian::write_u32(&mut buf[4..8], self.session_handle);
        LittleEndian::write_u32(&mut buf[8..12], self.status);
        buf[12..20].copy_from_slice(&self.sender_context);
        LittleEndian::write_u32(&mut buf[20..24], self.options);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Header, Error> {
        if buf.len() < constant::ENCAPSULATION_HEADER_SIZE {
            return Err(Error::ProtocolFraming(format!(
                "header too short: {} bytes",
                buf.len()
            )));
        }
        let length = LittleEndian::read_u16(&buf[2..4]);
        if length as usize > u16::MAX as usize {
            return Err(Error::ProtocolFraming(format!(
                "invalid encapsulation length {}",
                length
            )));
        }
        let mut sender_context = [0u8; 8];
        sender_context.copy_from_slice(&buf[12..20]);
        Ok(Header {
            command: LittleEndian::read_u16(&buf[0..2]),
            length,
            session_handle: LittleEndian::read_u32(&buf[4..8]),
            status: LittleEndian::read_u32(&buf[8..12]),
            sender_context,
            options: LittleEndian::read_u32(&buf[20..24]),
        })
    }
}

/// one entry of a Common Packet Format item list
#[derive(Debug, Clone)]
pub struct CpfItem {
    pub type_id: u16,
    pub data: Vec<u8>,
}

impl CpfItem {
    pub fn null_address() -> CpfItem {
        CpfItem {
            type_id: constant::CPF_ITEM_NULL_ADDRESS,
            data: Vec::new(),
        }
    }

    pub fn connected_address(connection_id: u32) -> CpfItem {
        let mut data = vec![0u8; 4];
        LittleEndian::write_u32(&mut data, connection_id);
        CpfItem {
            type_id: constant::CPF_ITEM_CONNECTED_ADDRESS,
            data,
        }
    }

    pub fn unconnected_data(payload: Vec<u8>) -> CpfItem {
        CpfItem {
            type_id: constant::CPF_ITEM_UNCONNECTED_DATA,
            data: payload,
        }
    }

    /// connected data carries a 16-bit sequence number ahead of the CIP payload
    pub fn connected_data(sequence: u16, payload: &[u8]) -> CpfItem {
        let mut data = Vec::with_capacity(2 + payload.len());
        let mut seq = [0u8; 2];
        LittleEndian::write_u16(&mut seq, sequence);
        data.extend_from_slice(&seq);
        data.extend_from_slice(payload);
        CpfItem {
            type_id: constant::CPF_ITEM_CONNECTED_DATA,
            data,
        }
    }
}

/// encodes the CPF payload of a `SendRRData`/`SendUnitData` command:
/// interface handle (4 bytes, always 0) + timeout (2 bytes) + item list
pub fn encode_cpf(timeout: u16, items: &[CpfItem]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4];
    LittleEndian::write_u32(&mut tmp, 0); // interface handle
    buf.extend_from_slice(&tmp);
    let mut tmp2 = [0u8; 2];
    LittleEndian::write_u16(&mut tmp2, timeout);
    buf.extend_from_slice(&tmp2);

    LittleEndian::write_u16(&mut tmp2, items.len() as u16);
    buf.extend_from_slice(&tmp2);

    for item in items {
        LittleEndian::write_u16(&mut tmp2, item.type_id);
        buf.extend_from_slice(&tmp2);
        LittleEndian::write_u16(&mut tmp2, item.data.len() as u16);
        buf.extend_from_slice(&tmp2);
        buf.extend_from_slice(&item.data);
    }
    buf
}

/// decodes a CPF item list (skips the interface handle and timeout this crate
/// never sends with a non-zero value, so callers pass the full payload)
pub fn decode_cpf(buf: &[u8]) -> Result<Vec<CpfItem>, Error> {
    if buf.len() < 6 {
        return Err(Error::ProtocolFraming("CPF payload too short".into()));
    }
    let item_count = LittleEndian::read_u16(&buf[4..6]) as usize;
    let mut items = Vec::with_capacity(item_count);
    let mut offset = 6;
    for _ in 0..item_count {
        if offset + 4 > buf.len() {
            return Err(Error::ProtocolFraming("truncated CPF item header".into()));
        }
        let type_id = LittleEndian::read_u16(&buf[offset..offset + 2]);
        let len = LittleEndian::read_u16(&buf[offset + 2..offset + 4]) as usize;
        offset += 4;
        if offset + len > buf.len() {
            return Err(Error::ProtocolFraming("truncated CPF item data".into()));
        }
        items.push(CpfItem {
            type_id,
            data: buf[offset..offset + len].to_vec(),
        });
        offset += len;
    }
    Ok(items)
}

/// extracts the connected-data or unconnected-data payload out of a decoded
/// CPF item list, whichever is present (a reply never carries both)
pub fn cip_payload(items: &[CpfItem]) -> Result<&[u8], Error> {
    for item in items {
        match item.type_id {
            constant::CPF_ITEM_UNCONNECTED_DATA => return Ok(&item.data),
            constant::CPF_ITEM_CONNECTED_DATA => {
                if item.data.len() < 2 {
                    return Err(Error::ProtocolFraming(
                        "connected data item missing sequence number".into(),
                    ));
                }
                return Ok(&item.data[2..]);
            }
            _ => continue,
        }
    }
    Err(Error::ProtocolFraming(
        "no data item in CPF reply".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = Header::new(constant::CMD_REGISTER_SESSION, 4, 0xDEADBEEF);
        let buf = h.encode();
        let decoded = Header::decode(&buf).unwrap();
        assert_eq!(decoded.command, constant::CMD_REGISTER_SESSION);
        assert_eq!(decoded.length, 4);
        assert_eq!(decoded.session_handle, 0xDEADBEEF);
    }

    #[test]
    fn header_decode_rejects_short_buffer() {
        assert!(Header::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn cpf_round_trips_unconnected() {
        let items = vec![CpfItem::null_address(), CpfItem::unconnected_data(vec![1, 2, 3])];
        let encoded = encode_cpf(0, &items);
        let decoded = decode_cpf(&encoded).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].data, vec![1, 2, 3]);
        assert_eq!(cip_payload(&decoded).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn cpf_round_trips_connected() {
        let items = vec![
            CpfItem::connected_address(42),
            CpfItem::connected_data(7, &[9, 9]),
        ];
        let encoded = encode_cpf(0, &items);
        let decoded = decode_cpf(&encoded).unwrap();
        assert_eq!(cip_payload(&decoded).unwrap(), &[9, 9]);
    }
}
