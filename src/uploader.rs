// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Controller-scoped and program-scoped tag discovery (Symbol Object, class
//! 0x6B) and user-defined structure layout download (Template Object, class
//! 0x6C). Both are paged/fragmented reads that accumulate across several
//! requests before the caller sees a complete result.

use super::constant;
use super::error::Error;
use super::path;
use super::session::ConnectionContext;
use super::template::Template;
use super::types::TypeDescriptor;
use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

/// one entry from the Symbol Object's instance listing: enough to decide
/// how to read/write the tag without yet knowing its full structure layout.
#[derive(Debug, Clone, PartialEq)]
pub struct TagInfo {
    pub name: String,
    pub instance_id: u32,
    pub type_descriptor: TypeDescriptor,
    /// `true` when the controller reports this symbol as an array; element
    /// count isn't known from this listing alone and is read lazily.
    pub is_array: bool,
}

const ATTR_SYMBOL_NAME: u16 = 1;
const ATTR_SYMBOL_TYPE: u16 = 2;

/// type code bit indicating the symbol is an array, as reported by
/// Get_Instance_Attribute_List attribute 2
const SYMBOL_TYPE_ARRAY_BIT: u16 = 0x2000;

fn attribute_list_request(start_instance: u32) -> (Vec<u8>, Vec<u8>) {
    let req_path = path::encode_class_instance(constant::CLASS_SYMBOL_OBJECT, start_instance as u16, None);
    let mut data = Vec::new();
    data.extend_from_slice(&2u16.to_le_bytes()); // attribute count
    data.extend_from_slice(&ATTR_SYMBOL_NAME.to_le_bytes());
    data.extend_from_slice(&ATTR_SYMBOL_TYPE.to_le_bytes());
    (req_path, data)
}

/// walks the Symbol Object's instance list a page at a time, starting from
/// instance 0, until the controller reports no more instances.
pub fn enumerate_symbols(session: &mut ConnectionContext) -> Result<Vec<TagInfo>, Error> {
    let mut tags = Vec::new();
    let mut next_instance: u32 = 0;
    loop {
        let (req_path, data) = attribute_list_request(next_instance);
        let reply = session.send(constant::SVC_GET_INSTANCE_ATTRIBUTE_LIST, &req_path, &data)?;
        let mut offset = 0usize;
        let mut last_instance = next_instance;
        while offset < reply.data.len() {
            if offset + 6 > reply.data.len() {
                return Err(Error::ProtocolFraming("truncated symbol entry".into()));
            }
            let instance_id = LittleEndian::read_u32(&reply.data[offset..offset + 4]);
            let name_len = LittleEndian::read_u16(&reply.data[offset + 4..offset + 6]) as usize;
            offset += 6;
            if offset + name_len + 2 > reply.data.len() {
                return Err(Error::ProtocolFraming("truncated symbol name/type".into()));
            }
            let name = String::from_utf8_lossy(&reply.data[offset..offset + name_len]).into_owned();
            offset += name_len;
            let type_code = LittleEndian::read_u16(&reply.data[offset..offset + 2]);
            offset += 2;

            last_instance = instance_id;
            if !name.starts_with("__") {
                tags.push(TagInfo {
                    name,
                    instance_id,
                    type_descriptor: TypeDescriptor::from_wire(type_code & !SYMBOL_TYPE_ARRAY_BIT),
                    is_array: type_code & SYMBOL_TYPE_ARRAY_BIT != 0,
                });
            }
        }
        trace!(page_last_instance = last_instance, count = tags.len(), "symbol page");
        if !reply.partial {
            break;
        }
        next_instance = last_instance + 1;
    }
    Ok(tags)
}

/// lists the tags local to a named program (`Program:MainProgram`), via the
/// Program Name Object rather than the controller-wide Symbol Object.
pub fn enumerate_program_tags(session: &mut ConnectionContext, program: &str) -> Result<Vec<TagInfo>, Error> {
    let scoped = path::encode_tag(program)?;
    let mut tags = Vec::new();
    let mut next_instance: u32 = 0;
    loop {
        let (mut req_path, data) = attribute_list_request(next_instance);
        let mut full_path = scoped.clone();
        full_path.append(&mut req_path);
        let reply = session.send(constant::SVC_GET_INSTANCE_ATTRIBUTE_LIST, &full_path, &data)?;
        if reply.data.is_empty() {
            break;
        }
        let mut offset = 0usize;
        let mut last_instance = next_instance;
        while offset + 6 <= reply.data.len() {
            let instance_id = LittleEndian::read_u32(&reply.data[offset..offset + 4]);
            let name_len = LittleEndian::read_u16(&reply.data[offset + 4..offset + 6]) as usize;
            offset += 6;
            if offset + name_len + 2 > reply.data.len() {
                break;
            }
            let name = String::from_utf8_lossy(&reply.data[offset..offset + name_len]).into_owned();
            offset += name_len;
            let type_code = LittleEndian::read_u16(&reply.data[offset..offset + 2]);
            offset += 2;
            last_instance = instance_id;
            tags.push(TagInfo {
                name: format!("{}.{}", program, name),
                instance_id,
                type_descriptor: TypeDescriptor::from_wire(type_code & !SYMBOL_TYPE_ARRAY_BIT),
                is_array: type_code & SYMBOL_TYPE_ARRAY_BIT != 0,
            });
        }
        if !reply.partial {
            break;
        }
        next_instance = last_instance + 1;
    }
    Ok(tags)
}

/// downloads a complete structure layout for `template_id`, issuing as many
/// fragmented Read Template requests as the controller's payload budget
/// requires.
pub fn fetch_template(session: &mut ConnectionContext, template_id: u16) -> Result<Template, Error> {
    let req_path = path::encode_class_instance(constant::CLASS_TEMPLATE_OBJECT, template_id, None);
    let mut accumulated = Vec::new();
    let mut offset: u32 = 0;
    loop {
        let budget = session.payload_budget().min(u16::MAX as usize) as u16;
        let mut data = Vec::with_capacity(6);
        data.extend_from_slice(&offset.to_le_bytes());
        data.extend_from_slice(&budget.to_le_bytes());
        let reply = session.send(constant::SVC_READ_TEMPLATE, &req_path, &data)?;
        let fetched = reply.data.len();
        accumulated.extend_from_slice(&reply.data);
        if !reply.partial || fetched == 0 {
            break;
        }
        offset += fetched as u32;
    }
    Template::parse(template_id, &accumulated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_list_request_shape() {
        let (path_bytes, data) = attribute_list_request(5);
        assert!(path_bytes.contains(&constant::EPATH_CLASS_8_BIT));
        assert_eq!(&data[0..2], &2u16.to_le_bytes());
    }

    #[test]
    fn symbol_type_array_bit_is_masked_out() {
        let type_code = constant::TYPE_DINT | SYMBOL_TYPE_ARRAY_BIT;
        let descriptor = TypeDescriptor::from_wire(type_code & !SYMBOL_TYPE_ARRAY_BIT);
        assert_eq!(descriptor, TypeDescriptor::Elementary(constant::TYPE_DINT));
    }
}
