// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Parses a downloaded Template Object definition (class 0x6C) into a
//! [`Template`]: the member layout of a user-defined structure, including
//! bit-aliased BOOL members and the `STRING`-alias heuristic.

use super::constant;
use super::error::Error;
use super::types::TypeDescriptor;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;

/// fixed portion of a Template Object's Attribute 1-4 reply, preceding the
/// member records and name blob.
#[derive(Debug, Clone, Copy)]
pub struct TemplateHeader {
    pub member_count: u16,
    /// size of the template's CRC/definition record, in 32-bit words
    pub object_definition_size: u32,
    /// size in bytes of one instance of the structure
    pub structure_size: u32,
}

impl TemplateHeader {
    pub fn decode(buf: &[u8]) -> Result<TemplateHeader, Error> {
        if buf.len() < 10 {
            return Err(Error::ProtocolFraming("template header too short".into()));
        }
        Ok(TemplateHeader {
            object_definition_size: LittleEndian::read_u32(&buf[0..4]),
            structure_size: LittleEndian::read_u32(&buf[4..8]),
            member_count: LittleEndian::read_u16(&buf[8..10]),
        })
    }
}

/// one member of a structure's layout
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub type_descriptor: TypeDescriptor,
    /// number of array elements; 1 for a scalar member
    pub array_length: u16,
    /// byte offset of this member within the structure instance
    pub offset: u32,
    /// bit position within `offset`'s DWORD, for a BOOL packed into a
    /// bitfield instead of given its own byte
    pub bit_number: Option<u8>,
}

impl Member {
    fn is_internal(&self) -> bool {
        self.name.starts_with("ZZZZZZZZZZ") || self.name.starts_with('_')
    }
}

/// the parsed layout of a user-defined structure (a "template" in CIP terms)
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// the template instance id this layout was downloaded for
    pub handle: u16,
    pub structure_size: u32,
    pub members: Vec<Member>,
    /// set when this template matches the `LEN:DINT` + `DATA:SINT[n]`
    /// shape Logix uses for its built-in `STRING` UDTs
    pub is_string_alias: bool,
}

/// template layouts keyed by template instance id, consulted whenever a
/// reply's type code or a structure member turns out to be a nested
/// structure.
pub type TemplateCache = HashMap<u16, Template>;

impl Template {
    /// parses a complete Template Object reply: header, `member_count`
    /// 8-byte member records, then a NUL-separated name blob (structure
    /// name first, then one name per member in declared order).
    ///
    /// members whose name marks them as compiler-internal padding are
    /// dropped; callers only ever see user-addressable members.
    pub fn parse(handle: u16, buf: &[u8]) -> Result<Template, Error> {
        let header = TemplateHeader::decode(buf)?;
        let records_start = 10;
        let record_size = 8;
        let records_end = records_start + record_size * header.member_count as usize;
        if buf.len() < records_end {
            return Err(Error::ProtocolFraming("truncated template member records".into()));
        }

        struct RawRecord {
            type_code: u16,
            info: u16,
            offset: u32,
        }
        let mut raw = Vec::with_capacity(header.member_count as usize);
        for i in 0..header.member_count as usize {
            let rec = &buf[records_start + i * record_size..records_start + (i + 1) * record_size];
            raw.push(RawRecord {
                type_code: LittleEndian::read_u16(&rec[0..2]),
                info: LittleEndian::read_u16(&rec[2..4]),
                offset: LittleEndian::read_u32(&rec[4..8]),
            });
        }

        let name_blob = &buf[records_end..];
        let names = split_nul_terminated(name_blob);
        // names[0] is the structure's own name; members follow in order
        let mut members = Vec::with_capacity(raw.len());
        for (i, rec) in raw.iter().enumerate() {
            let name = names.get(i + 1).cloned().unwrap_or_default();
            let descriptor = TypeDescriptor::from_wire(rec.type_code);
            let (array_length, bit_number) = if rec.type_code == constant::TYPE_BOOL {
                (1, Some(rec.info as u8))
            } else {
                (if rec.info == 0 { 1 } else { rec.info }, None)
            };
            let member = Member {
                name,
                type_descriptor: descriptor,
                array_length,
                offset: rec.offset,
                bit_number,
            };
            if !member.is_internal() {
                members.push(member);
            }
        }

        let is_string_alias = is_string_alias_shape(&members);

        Ok(Template {
            handle,
            structure_size: header.structure_size,
            members,
            is_string_alias,
        })
    }
}

fn split_nul_terminated(blob: &[u8]) -> Vec<String> {
    blob.split(|&b| b == 0)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Logix represents `STRING` as a two-member UDT: a `DINT` length prefix
/// named `LEN`, followed by a fixed `SINT` array named `DATA`. recognizing
/// this shape lets callers read/write it as [`crate::types::Value::Str`]
/// instead of a two-field structure.
fn is_string_alias_shape(members: &[Member]) -> bool {
    if members.len() != 2 {
        return false;
    }
    let len_ok = members[0].name.eq_ignore_ascii_case("LEN")
        && members[0].type_descriptor == TypeDescriptor::Elementary(constant::TYPE_DINT);
    let data_ok = members[1].name.eq_ignore_ascii_case("DATA")
        && members[1].type_descriptor == TypeDescriptor::Elementary(constant::TYPE_SINT)
        && members[1].array_length > 1;
    len_ok && data_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_reply(members: &[(&str, u16, u16, u32)], struct_name: &str, structure_size: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut tmp4 = [0u8; 4];
        LittleEndian::write_u32(&mut tmp4, 4); // object_definition_size, arbitrary
        buf.extend_from_slice(&tmp4);
        LittleEndian::write_u32(&mut tmp4, structure_size);
        buf.extend_from_slice(&tmp4);
        let mut tmp2 = [0u8; 2];
        LittleEndian::write_u16(&mut tmp2, members.len() as u16);
        buf.extend_from_slice(&tmp2);

        for &(_, type_code, info, offset) in members {
            LittleEndian::write_u16(&mut tmp2, type_code);
            buf.extend_from_slice(&tmp2);
            LittleEndian::write_u16(&mut tmp2, info);
            buf.extend_from_slice(&tmp2);
            LittleEndian::write_u32(&mut tmp4, offset);
            buf.extend_from_slice(&tmp4);
        }

        buf.extend_from_slice(struct_name.as_bytes());
        buf.push(0);
        for &(name, ..) in members {
            buf.extend_from_slice(name.as_bytes());
            buf.push(0);
        }
        buf
    }

    #[test]
    fn parses_plain_structure() {
        let buf = build_reply(
            &[("X", constant::TYPE_DINT, 1, 0), ("Y", constant::TYPE_REAL, 1, 4)],
            "MyUdt",
            8,
        );
        let tpl = Template::parse(10, &buf).unwrap();
        assert_eq!(tpl.handle, 10);
        assert_eq!(tpl.structure_size, 8);
        assert_eq!(tpl.members.len(), 2);
        assert_eq!(tpl.members[0].name, "X");
        assert_eq!(tpl.members[1].offset, 4);
        assert!(!tpl.is_string_alias);
    }

    #[test]
    fn drops_internal_padding_members() {
        let buf = build_reply(
            &[("X", constant::TYPE_DINT, 1, 0), ("ZZZZZZZZZZ0001", constant::TYPE_SINT, 1, 4)],
            "MyUdt",
            5,
        );
        let tpl = Template::parse(11, &buf).unwrap();
        assert_eq!(tpl.members.len(), 1);
        assert_eq!(tpl.members[0].name, "X");
    }

    #[test]
    fn bool_member_carries_bit_number() {
        let buf = build_reply(&[("Flag", constant::TYPE_BOOL, 3, 0)], "MyUdt", 4);
        let tpl = Template::parse(12, &buf).unwrap();
        assert_eq!(tpl.members[0].bit_number, Some(3));
    }

    #[test]
    fn recognizes_string_alias_shape() {
        let buf = build_reply(
            &[
                ("LEN", constant::TYPE_DINT, 1, 0),
                ("DATA", constant::TYPE_SINT, 82, 4),
            ],
            "STRING",
            88,
        );
        let tpl = Template::parse(0x0F, &buf).unwrap();
        assert!(tpl.is_string_alias);
    }

    #[test]
    fn truncated_buffer_errors() {
        assert!(Template::parse(1, &[0u8; 4]).is_err());
    }
}
