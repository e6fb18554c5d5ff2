// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Decoding and encoding of a structured (UDT) value against a [`Template`]
//! layout: member offsets, array members, and bit-aliased BOOL members
//! packed into a DWORD.

use super::super::error::Error;
use super::super::template::{Template, TemplateCache};
use super::array;
use super::Value;

/// a decoded structure instance: its template id plus each member's value,
/// in declared order.
#[derive(Debug, Clone, PartialEq)]
pub struct StructValue {
    pub template_id: u16,
    pub members: Vec<(String, Value)>,
}

impl StructValue {
    /// decodes one instance of `template` from the front of `buf`. a
    /// member's value is read at its declared byte offset rather than
    /// sequentially, since template layouts may include gaps for alignment
    /// or for bit-aliased BOOLs that share a DWORD with other flags.
    pub fn decode(template: &Template, buf: &[u8]) -> Result<StructValue, Error> {
        if buf.len() < template.structure_size as usize {
            return Err(Error::DataValue(format!(
                "structure {} needs {} bytes, have {}",
                template.handle,
                template.structure_size,
                buf.len()
            )));
        }
        let mut members = Vec::with_capacity(template.members.len());
        for member in &template.members {
            let offset = member.offset as usize;
            let value = if let Some(bit) = member.bit_number {
                let word = buf
                    .get(offset..offset + 4)
                    .ok_or_else(|| Error::DataValue(format!("member '{}' offset out of range", member.name)))?;
                let word = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                Value::Bool(word & (1 << bit) != 0)
            } else if member.array_length > 1 {
                let elem_size = super::super::constant::elementary_size(member.type_descriptor.to_wire());
                if elem_size == 0 {
                    return Err(Error::TypeLookup(format!(
                        "member '{}' is a nested-structure array, not yet supported",
                        member.name
                    )));
                }
                let slice = buf.get(offset..offset + elem_size * member.array_length as usize).ok_or_else(|| {
                    Error::DataValue(format!("member '{}' array out of range", member.name))
                })?;
                let (value, _) = array::decode_fixed(member.type_descriptor, member.array_length as usize, slice)?;
                value
            } else {
                let slice = buf
                    .get(offset..)
                    .ok_or_else(|| Error::DataValue(format!("member '{}' offset out of range", member.name)))?;
                let (value, _) = Value::decode_elementary(member.type_descriptor, slice)?;
                value
            };
            members.push((member.name.clone(), value));
        }
        Ok(StructValue {
            template_id: template.handle,
            members,
        })
    }

    /// encodes against an explicitly supplied template, writing each member
    /// at its declared offset. bit-aliased BOOLs are OR'd into their shared
    /// DWORD rather than overwriting it, so callers must encode every
    /// member of a bitfield's DWORD, not just the one that changed. a
    /// member whose value is itself a nested `Value::Struct` is resolved
    /// against `templates` and encoded recursively, since `Value::encode`
    /// has no template context of its own to do so.
    pub fn encode_with_template(
        &self,
        template: &Template,
        templates: &TemplateCache,
        buf: &mut Vec<u8>,
    ) -> Result<(), Error> {
        let mut instance = vec![0u8; template.structure_size as usize];
        for (member, (_, value)) in template.members.iter().zip(self.members.iter()) {
            let offset = member.offset as usize;
            if let Some(bit) = member.bit_number {
                if let Value::Bool(b) = value {
                    let slot = instance
                        .get_mut(offset..offset + 4)
                        .ok_or_else(|| Error::DataValue(format!("member '{}' offset out of range", member.name)))?;
                    let mut word = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
                    if *b {
                        word |= 1 << bit;
                    } else {
                        word &= !(1 << bit);
                    }
                    slot.copy_from_slice(&word.to_le_bytes());
                } else {
                    return Err(Error::DataValue(format!("member '{}' expects a BOOL", member.name)));
                }
            } else {
                let mut member_bytes = Vec::new();
                match value {
                    Value::Struct(nested) => {
                        let nested_template = templates.get(&nested.template_id).ok_or_else(|| {
                            Error::TypeLookup(format!("template {} not cached", nested.template_id))
                        })?;
                        nested.encode_with_template(nested_template, templates, &mut member_bytes)?;
                    }
                    other => other.encode(&mut member_bytes)?,
                }
                let end = offset + member_bytes.len();
                if end > instance.len() {
                    return Err(Error::DataValue(format!("member '{}' overflows structure", member.name)));
                }
                instance[offset..end].copy_from_slice(&member_bytes);
            }
        }
        buf.extend_from_slice(&instance);
        Ok(())
    }
}

/// interprets a decoded `STRING`-alias structure (`LEN` + `DATA` members) as
/// a plain [`Value::Str`], per [`Template::is_string_alias`].
pub fn as_string_alias(value: &StructValue) -> Option<Value> {
    let len = value.members.iter().find_map(|(name, v)| {
        if name.eq_ignore_ascii_case("LEN") {
            if let Value::Dint(n) = v {
                Some(*n as usize)
            } else {
                None
            }
        } else {
            None
        }
    })?;
    let data = value.members.iter().find_map(|(name, v)| {
        if name.eq_ignore_ascii_case("DATA") {
            if let Value::Array(items) = v {
                Some(items)
            } else {
                None
            }
        } else {
            None
        }
    })?;
    let bytes: Vec<u8> = data
        .iter()
        .take(len)
        .map(|v| match v {
            Value::Sint(b) => *b as u8,
            _ => 0,
        })
        .collect();
    Some(Value::Str(String::from_utf8_lossy(&bytes).into_owned()))
}

/// the inverse of [`as_string_alias`]: builds a `LEN:DINT` + `DATA:SINT[n]`
/// structure encoding `text` against `template`'s declared `DATA` capacity,
/// for writing a [`Value::Str`] to a tag whose declared type is a
/// `STRING`-alias UDT.
pub fn string_alias_struct(template: &Template, text: &str) -> Result<StructValue, Error> {
    let data_member = template
        .members
        .iter()
        .find(|m| m.name.eq_ignore_ascii_case("DATA"))
        .ok_or_else(|| Error::TypeLookup(format!("template {} is not a STRING alias", template.handle)))?;
    let capacity = data_member.array_length as usize;
    if text.len() > capacity {
        return Err(Error::DataValue(format!(
            "string of {} bytes does not fit the {}-byte STRING alias",
            text.len(),
            capacity
        )));
    }
    let mut data: Vec<Value> = text.bytes().map(|b| Value::Sint(b as i8)).collect();
    data.resize(capacity, Value::Sint(0));
    Ok(StructValue {
        template_id: template.handle,
        members: vec![
            ("LEN".to_string(), Value::Dint(text.len() as i32)),
            ("DATA".to_string(), Value::Array(data)),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant;
    use crate::template::Member;
    use crate::types::TypeDescriptor;

    fn simple_template() -> Template {
        Template {
            handle: 1,
            structure_size: 8,
            members: vec![
                Member {
                    name: "X".into(),
                    type_descriptor: TypeDescriptor::Elementary(constant::TYPE_DINT),
                    array_length: 1,
                    offset: 0,
                    bit_number: None,
                },
                Member {
                    name: "Flag".into(),
                    type_descriptor: TypeDescriptor::Elementary(constant::TYPE_BOOL),
                    array_length: 1,
                    offset: 4,
                    bit_number: Some(2),
                },
            ],
            is_string_alias: false,
        }
    }

    #[test]
    fn decodes_structure_with_bit_aliased_bool() {
        let mut buf = vec![0u8; 8];
        buf[0..4].copy_from_slice(&42i32.to_le_bytes());
        buf[4..8].copy_from_slice(&0b100u32.to_le_bytes());
        let tpl = simple_template();
        let decoded = StructValue::decode(&tpl, &buf).unwrap();
        assert_eq!(decoded.members[0], ("X".to_string(), Value::Dint(42)));
        assert_eq!(decoded.members[1], ("Flag".to_string(), Value::Bool(true)));
    }

    #[test]
    fn encode_with_template_round_trips() {
        let tpl = simple_template();
        let value = StructValue {
            template_id: 1,
            members: vec![
                ("X".to_string(), Value::Dint(7)),
                ("Flag".to_string(), Value::Bool(true)),
            ],
        };
        let mut buf = Vec::new();
        let templates = TemplateCache::new();
        value.encode_with_template(&tpl, &templates, &mut buf).unwrap();
        let decoded = StructValue::decode(&tpl, &buf).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn encode_with_template_resolves_nested_struct_member() {
        let inner_tpl = Template {
            handle: 2,
            structure_size: 4,
            members: vec![Member {
                name: "N".into(),
                type_descriptor: TypeDescriptor::Elementary(constant::TYPE_DINT),
                array_length: 1,
                offset: 0,
                bit_number: None,
            }],
            is_string_alias: false,
        };
        let outer_tpl = Template {
            handle: 3,
            structure_size: 4,
            members: vec![Member {
                name: "Inner".into(),
                type_descriptor: TypeDescriptor::Structure(2),
                array_length: 1,
                offset: 0,
                bit_number: None,
            }],
            is_string_alias: false,
        };
        let mut templates = TemplateCache::new();
        templates.insert(2, inner_tpl);

        let outer = StructValue {
            template_id: 3,
            members: vec![(
                "Inner".to_string(),
                Value::Struct(StructValue {
                    template_id: 2,
                    members: vec![("N".to_string(), Value::Dint(99))],
                }),
            )],
        };
        let mut buf = Vec::new();
        outer.encode_with_template(&outer_tpl, &templates, &mut buf).unwrap();
        assert_eq!(buf, 99i32.to_le_bytes().to_vec());
    }

    #[test]
    fn string_alias_struct_round_trips_through_decode() {
        let tpl = Template {
            handle: 0x0F,
            structure_size: 86,
            members: vec![
                Member {
                    name: "LEN".into(),
                    type_descriptor: TypeDescriptor::Elementary(constant::TYPE_DINT),
                    array_length: 1,
                    offset: 0,
                    bit_number: None,
                },
                Member {
                    name: "DATA".into(),
                    type_descriptor: TypeDescriptor::Elementary(constant::TYPE_SINT),
                    array_length: 82,
                    offset: 4,
                    bit_number: None,
                },
            ],
            is_string_alias: true,
        };
        let built = string_alias_struct(&tpl, "hi").unwrap();
        let mut buf = Vec::new();
        let templates = TemplateCache::new();
        built.encode_with_template(&tpl, &templates, &mut buf).unwrap();
        let decoded = StructValue::decode(&tpl, &buf).unwrap();
        assert_eq!(as_string_alias(&decoded), Some(Value::Str("hi".to_string())));
    }

    #[test]
    fn string_alias_struct_rejects_oversized_text() {
        let tpl = Template {
            handle: 0x0F,
            structure_size: 6,
            members: vec![
                Member {
                    name: "LEN".into(),
                    type_descriptor: TypeDescriptor::Elementary(constant::TYPE_DINT),
                    array_length: 1,
                    offset: 0,
                    bit_number: None,
                },
                Member {
                    name: "DATA".into(),
                    type_descriptor: TypeDescriptor::Elementary(constant::TYPE_SINT),
                    array_length: 2,
                    offset: 4,
                    bit_number: None,
                },
            ],
            is_string_alias: true,
        };
        assert!(string_alias_struct(&tpl, "too long").is_err());
    }

    #[test]
    fn string_alias_extracts_text() {
        let value = StructValue {
            template_id: 0x0F,
            members: vec![
                ("LEN".to_string(), Value::Dint(2)),
                (
                    "DATA".to_string(),
                    Value::Array(vec![Value::Sint(b'h' as i8), Value::Sint(b'i' as i8)]),
                ),
            ],
        };
        assert_eq!(as_string_alias(&value), Some(Value::Str("hi".to_string())));
    }
}
