// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! EPATH construction: encoding a route string into port segments, and a tag
//! reference into ANSI extended symbolic + logical segments.
//!
//! Two distinct grammars live here:
//!
//! - a *route*, e.g. `1.2.3.4/bp/1/enet/5.6.7.8`, hops across backplanes and
//!   EtherNet/IP links to reach a target module. It only ever needs to be
//!   encoded, never decoded, so this module exposes a single entry point
//!   ([`encode_route`]) plus the underlying segment it builds on.
//! - a *tag reference*, e.g. `Program:MainProgram.Counters[3].Value`, is the
//!   symbolic address of a single CIP attribute. [`encode_tag`] turns it into
//!   the EPATH a Read/Write Tag service expects.

use super::constant;
use super::error::Error;

/// one hop of a route: either a backplane slot or a network-layer address.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteSegment {
    Backplane(u8),
    Enet(String),
}

/// parses a route string into its port segments.
///
/// grammar: `host(/bp/slot)*(/enet/host)*` in any order, separated by `/`,
/// where `host` is the first token and every subsequent `bp` or `enet`
/// keyword is followed by exactly one value token.
pub fn parse_route(route: &str) -> Result<Vec<RouteSegment>, Error> {
    let mut tokens = route.split('/').filter(|t| !t.is_empty());
    let host = tokens
        .next()
        .ok_or_else(|| Error::PathSyntax("empty route".into()))?;
    let mut segments = vec![RouteSegment::Enet(host.to_string())];

    loop {
        let keyword = match tokens.next() {
            Some(k) => k,
            None => break,
        };
        let value = tokens.next().ok_or_else(|| {
            Error::PathSyntax(format!("route keyword '{}' missing a value", keyword))
        })?;
        match keyword {
            "bp" | "backplane" => {
                let slot: u8 = value
                    .parse()
                    .map_err(|_| Error::PathSyntax(format!("invalid backplane slot '{}'", value)))?;
                segments.push(RouteSegment::Backplane(slot));
            }
            "enet" | "ethernet" => segments.push(RouteSegment::Enet(value.to_string())),
            other => return Err(Error::PathSyntax(format!("unknown route keyword '{}'", other))),
        }
    }
    Ok(segments)
}

/// encodes a route string into an EPATH port-segment sequence, used to route
/// a Forward Open/Unconnected Send through backplanes to the target module.
///
/// the first segment (the initial host) is consumed by the TCP connection
/// itself and does not appear in the encoded path; only subsequent hops do.
pub fn encode_route(route: &str) -> Result<Vec<u8>, Error> {
    let segments = parse_route(route)?;
    let mut buf = Vec::new();
    for segment in segments.into_iter().skip(1) {
        match segment {
            RouteSegment::Backplane(slot) => {
                buf.push(constant::EPATH_PORT_SEGMENT | constant::PORT_BACKPLANE);
                buf.push(slot);
            }
            RouteSegment::Enet(host) => {
                let port_byte = constant::EPATH_PORT_SEGMENT | constant::PORT_ENET | 0x10; // extended link address
                buf.push(port_byte);
                buf.push(host.len() as u8);
                buf.extend_from_slice(host.as_bytes());
                if host.len() % 2 != 0 {
                    buf.push(0);
                }
            }
        }
    }
    Ok(buf)
}

/// one component of a parsed tag reference
#[derive(Debug, Clone, PartialEq)]
pub enum TagSegment {
    /// a named member, e.g. `Counters` or `Program:MainProgram`
    Name(String),
    /// a bracketed array index, e.g. `[3]`; a multi-dimensional bracket like
    /// `[1,2]` produces one `Index` per dimension, in order
    Index(u32),
}

/// a fully parsed tag reference: `name(.member)*([i(,j(,k)?)?])?({count})?`.
///
/// `start` is the last bracket index parsed (0 if the reference has none),
/// the element/bit position array reads and writes are anchored at. `count`
/// is the `{count}` suffix (1 if omitted), the number of elements the
/// reference addresses.
#[derive(Debug, Clone, PartialEq)]
pub struct TagReference {
    pub segments: Vec<TagSegment>,
    pub start: u32,
    pub count: u32,
}

/// splits a tag reference like `Program:MainProgram.Counters[3].Value{5}`
/// into its dotted-member, bracket-index, and trailing-count components.
pub fn parse_tag(tag: &str) -> Result<TagReference, Error> {
    if tag.is_empty() {
        return Err(Error::PathSyntax("empty tag reference".into()));
    }
    let mut segments = Vec::new();
    let mut chars = tag.chars().peekable();
    let mut current = String::new();
    let mut start: u32 = 0;
    let mut count: u32 = 1;

    while let Some(&c) = chars.peek() {
        match c {
            '.' => {
                chars.next();
                if current.is_empty() {
                    return Err(Error::PathSyntax(format!("empty member name in '{}'", tag)));
                }
                segments.push(TagSegment::Name(std::mem::take(&mut current)));
            }
            '[' => {
                chars.next();
                if !current.is_empty() {
                    segments.push(TagSegment::Name(std::mem::take(&mut current)));
                }
                let mut index_str = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) => index_str.push(d),
                        None => {
                            return Err(Error::PathSyntax(format!(
                                "unterminated index in '{}'",
                                tag
                            )))
                        }
                    }
                }
                let mut dims = 0;
                for part in index_str.split(',') {
                    dims += 1;
                    if dims > 3 {
                        return Err(Error::PathSyntax(format!("'{}' has more than 3 index dimensions", tag)));
                    }
                    let index: u32 = part
                        .trim()
                        .parse()
                        .map_err(|_| Error::PathSyntax(format!("invalid array index '{}'", part)))?;
                    segments.push(TagSegment::Index(index));
                    start = index;
                }
            }
            '{' => {
                chars.next();
                if !current.is_empty() {
                    segments.push(TagSegment::Name(std::mem::take(&mut current)));
                }
                let mut count_str = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(d) => count_str.push(d),
                        None => {
                            return Err(Error::PathSyntax(format!("unterminated element count in '{}'", tag)))
                        }
                    }
                }
                count = count_str
                    .parse()
                    .map_err(|_| Error::PathSyntax(format!("invalid element count '{}'", count_str)))?;
                if chars.peek().is_some() {
                    return Err(Error::PathSyntax(format!(
                        "'{}' has trailing characters after element count",
                        tag
                    )));
                }
            }
            _ => {
                current.push(c);
                chars.next();
            }
        }
    }
    if !current.is_empty() {
        segments.push(TagSegment::Name(current));
    }
    if segments.is_empty() {
        return Err(Error::PathSyntax(format!("'{}' has no addressable segment", tag)));
    }
    Ok(TagReference { segments, start, count })
}

fn build_path(segments: &[TagSegment]) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    for segment in segments {
        match segment {
            TagSegment::Name(name) => push_symbolic(&mut buf, name),
            TagSegment::Index(index) => push_element(&mut buf, *index),
        }
    }
    if buf.len() > constant::EIP_MAX_PATH_BYTES {
        return Err(Error::PathTooLong {
            len: buf.len(),
            max: constant::EIP_MAX_PATH_BYTES,
        });
    }
    Ok(buf)
}

/// encodes an ANSI extended symbolic segment (type 0x91) for one name component
fn push_symbolic(buf: &mut Vec<u8>, name: &str) {
    buf.push(constant::EPATH_SYMBOLIC_SEGMENT);
    buf.push(name.len() as u8);
    buf.extend_from_slice(name.as_bytes());
    if name.len() % 2 != 0 {
        buf.push(0);
    }
}

/// encodes a logical element (array index) segment, choosing the narrowest
/// width that fits the value
fn push_element(buf: &mut Vec<u8>, index: u32) {
    if index <= u8::MAX as u32 {
        buf.push(constant::EPATH_ELEMENT_8_BIT);
        buf.push(index as u8);
    } else if index <= u16::MAX as u32 {
        buf.push(constant::EPATH_ELEMENT_16_BIT);
        buf.push(0); // pad
        buf.extend_from_slice(&(index as u16).to_le_bytes());
    } else {
        buf.push(constant::EPATH_ELEMENT_32_BIT);
        buf.push(0); // pad
        buf.extend_from_slice(&index.to_le_bytes());
    }
}

/// encodes a full tag reference into the EPATH a Read/Write Tag service
/// expects: one ANSI extended symbolic segment per dotted name, one logical
/// element segment per bracket index. the returned path's length (in words)
/// is checked by the caller against the connection's request size budget.
pub fn encode_tag(tag: &str) -> Result<Vec<u8>, Error> {
    build_path(&parse_tag(tag)?.segments)
}

/// encodes a tag reference's EPATH along with the `{start, count}` a
/// Read/Write Tag request needs: `start` is the last bracket index (0 if
/// none), `count` is the `{count}` suffix (1 if omitted).
pub fn encode_tag_request(tag: &str) -> Result<(Vec<u8>, u32, u32), Error> {
    let parsed = parse_tag(tag)?;
    let path = build_path(&parsed.segments)?;
    Ok((path, parsed.start, parsed.count))
}

/// encodes a class/instance(/attribute) logical path, used to address CIP
/// objects (Connection Manager, Symbol Object, Template Object, ...) rather
/// than user tags.
pub fn encode_class_instance(class: u16, instance: u16, attribute: Option<u16>) -> Vec<u8> {
    let mut buf = Vec::new();
    push_class(&mut buf, class);
    push_instance(&mut buf, instance);
    if let Some(attr) = attribute {
        push_attribute(&mut buf, attr);
    }
    buf
}

fn push_class(buf: &mut Vec<u8>, class: u16) {
    if class <= u8::MAX as u16 {
        buf.push(constant::EPATH_CLASS_8_BIT);
        buf.push(class as u8);
    } else {
        buf.push(constant::EPATH_CLASS_16_BIT);
        buf.push(0);
        buf.extend_from_slice(&class.to_le_bytes());
    }
}

fn push_instance(buf: &mut Vec<u8>, instance: u16) {
    if instance <= u8::MAX as u16 {
        buf.push(constant::EPATH_INSTANCE_8_BIT);
        buf.push(instance as u8);
    } else {
        buf.push(constant::EPATH_INSTANCE_16_BIT);
        buf.push(0);
        buf.extend_from_slice(&instance.to_le_bytes());
    }
}

fn push_attribute(buf: &mut Vec<u8>, attribute: u16) {
    // attribute segments in this crate never exceed a byte; every service
    // used here addresses attributes 1-32
    buf.push(constant::EPATH_ATTRIBUTE_8_BIT);
    buf.push(attribute as u8);
}

/// pads an odd-length path to an even word count and returns the word count,
/// as required ahead of an EPATH in a CIP request
pub fn word_count_with_pad(path: &mut Vec<u8>) -> u8 {
    if path.len() % 2 != 0 {
        path.push(0);
    }
    (path.len() / 2) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_host_route() {
        let segments = parse_route("10.0.0.1").unwrap();
        assert_eq!(segments, vec![RouteSegment::Enet("10.0.0.1".into())]);
    }

    #[test]
    fn parses_backplane_hop() {
        let segments = parse_route("10.0.0.1/bp/2").unwrap();
        assert_eq!(
            segments,
            vec![
                RouteSegment::Enet("10.0.0.1".into()),
                RouteSegment::Backplane(2)
            ]
        );
    }

    #[test]
    fn parses_multi_hop_route() {
        let segments = parse_route("1.2.3.4/bp/1/enet/5.6.7.8").unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1], RouteSegment::Backplane(1));
        assert_eq!(segments[2], RouteSegment::Enet("5.6.7.8".into()));
    }

    #[test]
    fn route_missing_value_errors() {
        assert!(parse_route("10.0.0.1/bp").is_err());
    }

    #[test]
    fn encode_route_skips_leading_host() {
        let encoded = encode_route("10.0.0.1/bp/3").unwrap();
        assert_eq!(encoded, vec![constant::EPATH_PORT_SEGMENT | constant::PORT_BACKPLANE, 3]);
    }

    #[test]
    fn parses_simple_tag() {
        let parsed = parse_tag("Counter1").unwrap();
        assert_eq!(parsed.segments, vec![TagSegment::Name("Counter1".into())]);
        assert_eq!(parsed.start, 0);
        assert_eq!(parsed.count, 1);
    }

    #[test]
    fn parses_tag_with_member_and_index() {
        let parsed = parse_tag("Program:MainProgram.Counters[3].Value").unwrap();
        assert_eq!(
            parsed.segments,
            vec![
                TagSegment::Name("Program:MainProgram".into()),
                TagSegment::Name("Counters".into()),
                TagSegment::Index(3),
                TagSegment::Name("Value".into()),
            ]
        );
        assert_eq!(parsed.start, 3);
    }

    #[test]
    fn parses_trailing_element_count() {
        let parsed = parse_tag("dint_array[50]{5}").unwrap();
        assert_eq!(
            parsed.segments,
            vec![TagSegment::Name("dint_array".into()), TagSegment::Index(50)]
        );
        assert_eq!(parsed.start, 50);
        assert_eq!(parsed.count, 5);
    }

    #[test]
    fn parses_multi_dimensional_index() {
        let parsed = parse_tag("grid[1,2,3]").unwrap();
        assert_eq!(
            parsed.segments,
            vec![
                TagSegment::Name("grid".into()),
                TagSegment::Index(1),
                TagSegment::Index(2),
                TagSegment::Index(3),
            ]
        );
        assert_eq!(parsed.start, 3);
    }

    #[test]
    fn too_many_index_dimensions_errors() {
        assert!(parse_tag("grid[1,2,3,4]").is_err());
    }

    #[test]
    fn unterminated_count_errors() {
        assert!(parse_tag("tag{5").is_err());
    }

    #[test]
    fn trailing_characters_after_count_errors() {
        assert!(parse_tag("tag{5}junk").is_err());
    }

    #[test]
    fn encode_tag_pads_odd_name_length() {
        let path = encode_tag("abc").unwrap();
        // 0x91, len(3), 'a','b','c', pad
        assert_eq!(path, vec![constant::EPATH_SYMBOLIC_SEGMENT, 3, b'a', b'b', b'c', 0]);
    }

    #[test]
    fn encode_tag_with_index_uses_8_bit_element() {
        let path = encode_tag("tag[5]").unwrap();
        assert_eq!(path.last().copied(), Some(5));
        assert!(path.contains(&constant::EPATH_ELEMENT_8_BIT));
    }

    #[test]
    fn tag_unterminated_index_errors() {
        assert!(parse_tag("tag[5").is_err());
    }

    #[test]
    fn class_instance_attribute_round_trip_shape() {
        let path = encode_class_instance(constant::CLASS_CONNECTION_MANAGER, 1, Some(1));
        assert_eq!(
            path,
            vec![
                constant::EPATH_CLASS_8_BIT,
                constant::CLASS_CONNECTION_MANAGER as u8,
                constant::EPATH_INSTANCE_8_BIT,
                1,
                constant::EPATH_ATTRIBUTE_8_BIT,
                1,
            ]
        );
    }

    #[test]
    fn word_count_pads_odd_length() {
        let mut path = vec![1u8, 2, 3];
        let words = word_count_with_pad(&mut path);
        assert_eq!(path.len(), 4);
        assert_eq!(words, 2);
    }
}
