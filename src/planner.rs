// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Turns a batch of tag reads/writes into the smallest number of CIP
//! requests that fit the connection's negotiated payload budget: bin-packing
//! independent operations into a Multiple Service Packet, and paging a
//! single oversized operation across Read/Write Tag Fragmented calls.

use super::constant;
use super::error::Error;
use super::path;
use super::session::{self, CipReply, ConnectionContext};
use super::types::{array, structure, StructValue, TypeDescriptor, Value};
use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

/// template layouts keyed by template instance id, consulted whenever a
/// reply's type code turns out to be a structure
pub use super::template::TemplateCache;

/// the outcome of one planned operation, reported independently so a batch
/// partially fails without losing the results that did succeed.
#[derive(Debug)]
pub struct TagResult {
    pub tag: String,
    pub outcome: Result<Option<Value>, Error>,
}

/// decodes a Read Tag reply body (2-byte type code + data) into a `Value`,
/// honoring the element count a `{count}` tag reference requested. `start`
/// is the reference's bracket index (0 if none), needed to slice `BOOL`
/// arrays out of the `DWORD`-packed bits the controller actually returns.
fn decode_reply_value(data: &[u8], start: u32, count: u32, templates: &TemplateCache) -> Result<Value, Error> {
    if data.len() < 2 {
        return Err(Error::ProtocolFraming("read reply missing type code".into()));
    }
    let type_code = LittleEndian::read_u16(&data[0..2]);
    let descriptor = TypeDescriptor::from_wire(type_code);
    let body = &data[2..];
    match descriptor {
        TypeDescriptor::Elementary(code) if code == constant::TYPE_BOOL && (start > 0 || count > 1) => {
            array::decode_bool_array(body, (start % 32) as usize, count as usize)
        }
        TypeDescriptor::Elementary(_) if count > 1 => Ok(array::decode_fixed(descriptor, count as usize, body)?.0),
        TypeDescriptor::Elementary(_) => Ok(Value::decode_elementary(descriptor, body)?.0),
        TypeDescriptor::Structure(id) => {
            let template = templates
                .get(&id)
                .ok_or_else(|| Error::TypeLookup(format!("template {} not cached", id)))?;
            let decoded = StructValue::decode(template, body)?;
            if template.is_string_alias {
                Ok(structure::as_string_alias(&decoded).unwrap_or(Value::Struct(decoded)))
            } else {
                Ok(Value::Struct(decoded))
            }
        }
    }
}

/// reads one tag, fragmenting across Read Tag Fragmented calls when the
/// value doesn't fit in one reply. `instance_id` is retried once, in place
/// of the symbolic path, if the controller rejects the symbolic path with
/// a path-segment error (older firmware addresses controller-scoped tags
/// by instance id only).
pub fn read_tag(
    session: &mut ConnectionContext,
    tag: &str,
    instance_id: Option<u32>,
    templates: &TemplateCache,
) -> Result<Value, Error> {
    let (symbolic_path, start, count) = path::encode_tag_request(tag)?;
    let element_count = count.min(u16::MAX as u32) as u16;
    let mut accumulated = Vec::new();
    let mut offset: u32 = 0;
    let mut used_instance_fallback = false;
    let mut req_path = symbolic_path;

    loop {
        let service = if offset == 0 { constant::SVC_READ_TAG } else { constant::SVC_READ_TAG_FRAGMENTED };
        let mut data = element_count.to_le_bytes().to_vec();
        if offset > 0 {
            data.extend_from_slice(&offset.to_le_bytes());
        }
        let reply = match session.send(service, &req_path, &data) {
            Ok(r) => r,
            Err(Error::Cip { status, .. })
                if status == constant::STATUS_PATH_SEGMENT_ERROR && !used_instance_fallback && instance_id.is_some() =>
            {
                debug!(tag, "symbolic path rejected, retrying with instance id");
                used_instance_fallback = true;
                req_path = path::encode_class_instance(
                    constant::CLASS_SYMBOL_OBJECT,
                    instance_id.unwrap() as u16,
                    None,
                );
                continue;
            }
            Err(e) => return Err(e),
        };
        accumulated.extend_from_slice(&reply.data);
        if !reply.partial {
            break;
        }
        offset = (accumulated.len().saturating_sub(2)) as u32;
    }
    decode_reply_value(&accumulated, start, count, templates)
}

/// writes one tag, fragmenting across Write Tag Fragmented calls when the
/// encoded value doesn't fit the connection's budget in one request.
///
/// `type_descriptor`, when known (from the tag's symbol-table entry), lets a
/// `Value::Str` written to a `STRING`-alias UDT tag encode into the alias's
/// `LEN:DINT`+`DATA:SINT[n]` struct layout instead of the standalone `STRING`
/// wire shape.
pub fn write_tag(
    session: &mut ConnectionContext,
    tag: &str,
    instance_id: Option<u32>,
    value: &Value,
    templates: &TemplateCache,
    type_descriptor: Option<TypeDescriptor>,
) -> Result<(), Error> {
    let (symbolic_path, start, _count) = path::encode_tag_request(tag)?;
    let mut encoded = Vec::new();
    let (type_code, element_count): (u16, u32) = match value {
        Value::Array(items) if items.len() > 1 && matches!(items.first(), Some(Value::Bool(_))) => {
            let n = items.len() as u32;
            if start % 32 != 0 || n % 32 != 0 {
                return Err(Error::Request(format!(
                    "BOOL array write requires start and count to be multiples of 32 (start={}, count={})",
                    start, n
                )));
            }
            encoded = array::encode_bool_array(items)?;
            (constant::TYPE_DWORD, n / 32)
        }
        Value::Str(_) => {
            let alias_template = match type_descriptor {
                Some(TypeDescriptor::Structure(id)) => templates.get(&id).filter(|t| t.is_string_alias),
                _ => None,
            };
            if let (Value::Str(text), Some(template)) = (value, alias_template) {
                let alias = structure::string_alias_struct(template, text)?;
                alias.encode_with_template(template, templates, &mut encoded)?;
                (TypeDescriptor::Structure(template.handle).to_wire(), 1)
            } else {
                value.encode(&mut encoded)?;
                (constant::TYPE_STRING, 1)
            }
        }
        Value::Struct(s) => {
            let template = templates
                .get(&s.template_id)
                .ok_or_else(|| Error::TypeLookup(format!("template {} not cached", s.template_id)))?;
            s.encode_with_template(template, templates, &mut encoded)?;
            (TypeDescriptor::Structure(s.template_id).to_wire(), 1)
        }
        Value::Array(items) => {
            let elem_type = items
                .first()
                .and_then(|v| v.elementary_type())
                .ok_or_else(|| Error::DataValue("array must contain at least one elementary value".into()))?;
            for item in items {
                let t = item
                    .elementary_type()
                    .ok_or_else(|| Error::DataValue("array elements must be elementary".into()))?;
                if t != elem_type {
                    return Err(Error::DataValue("array elements must share one elementary type".into()));
                }
            }
            array::encode(items, &mut encoded)?;
            (elem_type, items.len() as u32)
        }
        other => {
            let code = other
                .elementary_type()
                .ok_or_else(|| Error::DataValue("value has no elementary type".into()))?;
            other.encode(&mut encoded)?;
            (code, 1)
        }
    };
    let element_count = element_count.min(u16::MAX as u32) as u16;

    let budget = session.payload_budget();
    let mut req_path = symbolic_path;
    let mut used_instance_fallback = false;
    let mut offset = 0usize;

    loop {
        let chunk_end = (offset + budget.saturating_sub(8)).min(encoded.len());
        let chunk = &encoded[offset..chunk_end];
        let is_last = chunk_end == encoded.len();
        let service = if offset == 0 && is_last {
            constant::SVC_WRITE_TAG
        } else {
            constant::SVC_WRITE_TAG_FRAGMENTED
        };
        let mut data = Vec::with_capacity(4 + chunk.len());
        data.extend_from_slice(&type_code.to_le_bytes());
        data.extend_from_slice(&element_count.to_le_bytes());
        if service == constant::SVC_WRITE_TAG_FRAGMENTED {
            data.extend_from_slice(&(offset as u32).to_le_bytes());
        }
        data.extend_from_slice(chunk);

        let result = session.send(service, &req_path, &data);
        match result {
            Ok(_) => {}
            Err(Error::Cip { status, .. })
                if status == constant::STATUS_PATH_SEGMENT_ERROR && !used_instance_fallback && instance_id.is_some() =>
            {
                used_instance_fallback = true;
                req_path = path::encode_class_instance(
                    constant::CLASS_SYMBOL_OBJECT,
                    instance_id.unwrap() as u16,
                    None,
                );
                continue;
            }
            Err(e) => return Err(e),
        }
        offset = chunk_end;
        if is_last {
            break;
        }
    }
    Ok(())
}

/// encodes a Multiple Service Packet request body from a list of
/// already-built (service, path, data) requests, per the Message Router's
/// class 0x02 "Multiple Service Packet" service.
pub fn encode_multiple_service_packet(requests: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(requests.len() as u16).to_le_bytes());
    let header_size = 2 + requests.len() * 2;
    let mut cursor = header_size;
    for req in requests {
        buf.extend_from_slice(&(cursor as u16).to_le_bytes());
        cursor += req.len();
    }
    for req in requests {
        buf.extend_from_slice(req);
    }
    buf
}

/// decodes a Multiple Service Packet reply into one [`CipReply`] (or error)
/// per embedded request, in request order.
pub fn decode_multiple_service_packet(data: &[u8]) -> Result<Vec<Result<CipReply, Error>>, Error> {
    if data.len() < 2 {
        return Err(Error::ProtocolFraming("multiple service reply too short".into()));
    }
    let count = LittleEndian::read_u16(&data[0..2]) as usize;
    let mut offsets = Vec::with_capacity(count);
    for i in 0..count {
        let start = 2 + i * 2;
        if start + 2 > data.len() {
            return Err(Error::ProtocolFraming("truncated multiple service offsets".into()));
        }
        offsets.push(LittleEndian::read_u16(&data[start..start + 2]) as usize);
    }
    let mut results = Vec::with_capacity(count);
    for i in 0..count {
        let start = offsets[i];
        let end = offsets.get(i + 1).copied().unwrap_or(data.len());
        if start > data.len() || end > data.len() || start > end {
            return Err(Error::ProtocolFraming("invalid multiple service offset".into()));
        }
        results.push(session::parse_reply(&data[start..end]));
    }
    Ok(results)
}

/// bin-packs independent tag reads into as few Multiple Service Packet
/// requests as fit the connection's payload budget, falling back to one
/// request per tag for any tag whose encoded request alone exceeds it.
pub fn read_many(
    session: &mut ConnectionContext,
    tags: &[(String, Option<u32>)],
    templates: &TemplateCache,
) -> Vec<TagResult> {
    let budget = session.payload_budget();
    let mut results = Vec::with_capacity(tags.len());
    // (tag, marker request, start, count); `start`/`count` are the parsed
    // `{count}`/bracket-index of the tag reference, needed to decode the
    // reply the same way a single-tag `read_tag` would.
    let mut batch: Vec<(&str, Vec<u8>, u32, u32)> = Vec::new();
    let mut batch_size = constant::MULTI_SERVICE_HEADER_OVERHEAD;

    let mut flush = |session: &mut ConnectionContext,
                     batch: &mut Vec<(&str, Vec<u8>, u32, u32)>,
                     results: &mut Vec<TagResult>| {
        if batch.is_empty() {
            return;
        }
        if batch.len() == 1 {
            let (tag, req, start, count) = batch.remove(0);
            let outcome = session.send(constant::SVC_READ_TAG, &req[2..], &req[0..2]).map(|r| Some(r.data));
            results.push(TagResult {
                tag: tag.to_string(),
                outcome: match outcome {
                    Ok(Some(data)) => decode_reply_value(&data, start, count, templates).map(Some),
                    Ok(None) => Ok(None),
                    Err(e) => Err(e),
                },
            });
            return;
        }
        let requests: Vec<Vec<u8>> = batch
            .iter()
            .map(|(_, req, ..)| session::build_request(constant::SVC_READ_TAG, &req[2..], &req[0..2]))
            .collect();
        let body = encode_multiple_service_packet(&requests);
        let mr_path = path::encode_class_instance(constant::CLASS_MESSAGE_ROUTER, 1, None);
        match session.send(constant::SVC_MULTIPLE_SERVICE_PACKET, &mr_path, &body) {
            Ok(reply) => match decode_multiple_service_packet(&reply.data) {
                Ok(sub_replies) => {
                    for ((tag, _, start, count), sub) in batch.iter().zip(sub_replies.into_iter()) {
                        let outcome = sub.and_then(|r| decode_reply_value(&r.data, *start, *count, templates));
                        results.push(TagResult {
                            tag: tag.to_string(),
                            outcome: outcome.map(Some),
                        });
                    }
                }
                Err(e) => {
                    for (tag, ..) in batch.iter() {
                        results.push(TagResult {
                            tag: tag.to_string(),
                            outcome: Err(Error::ProtocolFraming(e.to_string())),
                        });
                    }
                }
            },
            Err(e) => {
                for (tag, ..) in batch.iter() {
                    results.push(TagResult {
                        tag: tag.to_string(),
                        outcome: Err(Error::ProtocolFraming(e.to_string())),
                    });
                }
            }
        }
        batch.clear();
    };

    for (tag, instance_id) in tags {
        match path::encode_tag_request(tag) {
            Ok((req_path, start, count)) => {
                // marker request: 2-byte element count ahead of the path, consumed when flushed
                let element_count = count.min(u16::MAX as u32) as u16;
                let mut marker = element_count.to_le_bytes().to_vec();
                marker.extend_from_slice(&req_path);
                let cost = marker.len() + constant::MULTI_SERVICE_OFFSET_ENTRY;
                if batch_size + cost > budget && !batch.is_empty() {
                    flush(session, &mut batch, &mut results);
                    batch_size = constant::MULTI_SERVICE_HEADER_OVERHEAD;
                }
                batch_size += cost;
                batch.push((tag.as_str(), marker, start, count));
                let _ = instance_id; // instance-id fallback only applies to single-tag reads today
            }
            Err(e) => results.push(TagResult {
                tag: tag.clone(),
                outcome: Err(e),
            }),
        }
    }
    flush(session, &mut batch, &mut results);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_service_packet_round_trips() {
        let r1 = vec![constant::SVC_READ_TAG | constant::SVC_REPLY_MASK, 0, 0, 0];
        let r2 = vec![constant::SVC_READ_TAG | constant::SVC_REPLY_MASK, 0, 0, 0, 9];
        let body = encode_multiple_service_packet(&[r1, r2]);
        let decoded = decode_multiple_service_packet(&body).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].is_ok());
        assert_eq!(decoded[1].as_ref().unwrap().data, vec![9]);
    }

    #[test]
    fn decode_reply_value_parses_elementary() {
        let mut data = constant::TYPE_DINT.to_le_bytes().to_vec();
        data.extend_from_slice(&42i32.to_le_bytes());
        let templates = TemplateCache::new();
        let value = decode_reply_value(&data, 0, 1, &templates).unwrap();
        assert_eq!(value, Value::Dint(42));
    }

    #[test]
    fn decode_reply_value_missing_template_errors() {
        let data = (constant::TYPE_STRUCTURE_BIT | 5).to_le_bytes().to_vec();
        let templates = TemplateCache::new();
        assert!(decode_reply_value(&data, 0, 1, &templates).is_err());
    }

    #[test]
    fn decode_reply_value_parses_fixed_array() {
        let mut data = constant::TYPE_DINT.to_le_bytes().to_vec();
        for v in [1i32, 2, 3, 4, 5] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let templates = TemplateCache::new();
        let value = decode_reply_value(&data, 50, 5, &templates).unwrap();
        assert_eq!(
            value,
            Value::Array(vec![Value::Dint(1), Value::Dint(2), Value::Dint(3), Value::Dint(4), Value::Dint(5)])
        );
    }

    #[test]
    fn decode_reply_value_slices_bool_array_across_offset() {
        let mut data = constant::TYPE_BOOL.to_le_bytes().to_vec();
        data.extend_from_slice(&[0u8, 0, 0, 0, 0b0000_0001, 0, 0, 0]); // bit 32 set
        let templates = TemplateCache::new();
        let value = decode_reply_value(&data, 32, 1, &templates).unwrap();
        assert_eq!(value, Value::Array(vec![Value::Bool(true)]));
    }
}
