// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

use std::error;
use std::fmt;
use std::io::{Error as IOError, ErrorKind};

// CIP general status codes (volume 1, appendix B) that carry a standard ODVA text
const GSTATUS_CONNECTION_FAILURE: u8 = 0x01;
const GSTATUS_RESOURCE_UNAVAILABLE: u8 = 0x02;
const GSTATUS_INVALID_PARAMETER_VALUE: u8 = 0x03;
const GSTATUS_PATH_SEGMENT_ERROR: u8 = 0x04;
const GSTATUS_PATH_DESTINATION_UNKNOWN: u8 = 0x05;
const GSTATUS_PARTIAL_TRANSFER: u8 = 0x06;
const GSTATUS_CONNECTION_LOST: u8 = 0x07;
const GSTATUS_SERVICE_NOT_SUPPORTED: u8 = 0x08;
const GSTATUS_INVALID_ATTRIBUTE_VALUE: u8 = 0x09;
const GSTATUS_ATTRIBUTE_LIST_ERROR: u8 = 0x0A;
const GSTATUS_ALREADY_IN_REQUESTED_MODE: u8 = 0x0B;
const GSTATUS_OBJECT_STATE_CONFLICT: u8 = 0x0C;
const GSTATUS_OBJECT_ALREADY_EXISTS: u8 = 0x0D;
const GSTATUS_ATTRIBUTE_NOT_SETTABLE: u8 = 0x0E;
const GSTATUS_PRIVILEGE_VIOLATION: u8 = 0x0F;
const GSTATUS_DEVICE_STATE_CONFLICT: u8 = 0x10;
const GSTATUS_REPLY_DATA_TOO_LARGE: u8 = 0x11;
const GSTATUS_FRAGMENTATION_OF_PRIMITIVE: u8 = 0x12;
const GSTATUS_NOT_ENOUGH_DATA: u8 = 0x13;
const GSTATUS_ATTRIBUTE_NOT_SUPPORTED: u8 = 0x14;
const GSTATUS_TOO_MUCH_DATA: u8 = 0x15;

/// Everything that can go wrong talking to a CIP device.
///
/// Fatal variants (`Connect`, `ProtocolFraming`) invalidate the whole
/// connection. `Cip`, `DataValue`, `TypeLookup` and `Request` are usually
/// captured per-tag in a `TagResult` rather than aborting a batch call.
#[derive(Debug)]
pub enum Error {
    /// a route string or tag reference didn't parse as a CIP path
    PathSyntax(String),
    /// an encoded EPATH exceeded the per-message path length limit
    PathTooLong { len: usize, max: usize },
    /// TCP connect, RegisterSession or Forward Open failed
    Connect(String),
    /// a malformed encapsulation header or CPF item list
    ProtocolFraming(String),
    /// a non-zero CIP general status in a service reply
    Cip {
        service: u8,
        status: u8,
        extended_status: Vec<u16>,
    },
    /// a value could not be encoded in, or decoded as, its target type
    DataValue(String),
    /// an unknown tag name, or a structure member with no matching template
    TypeLookup(String),
    /// a planner precondition was violated (value length, bit alignment, etc)
    Request(String),
    /// propagated I/O error
    IOError(ErrorKind),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::PathSyntax(s) => write!(f, "path syntax error: {}", s),
            Error::PathTooLong { len, max } => {
                write!(f, "encoded path too long: {} bytes, max {}", len, max)
            }
            Error::Connect(s) => write!(f, "connection error: {}", s),
            Error::ProtocolFraming(s) => write!(f, "protocol framing error: {}", s),
            Error::Cip {
                service,
                status,
                extended_status,
            } => write!(
                f,
                "CIP error on service 0x{:02X}: {} (status 0x{:02X}, extended {:?})",
                service,
                status_text(*status),
                status,
                extended_status
            ),
            Error::DataValue(s) => write!(f, "data value error: {}", s),
            Error::TypeLookup(s) => write!(f, "type lookup error: {}", s),
            Error::Request(s) => write!(f, "request error: {}", s),
            Error::IOError(kind) => write!(f, "IO error: {:?}", kind),
        }
    }
}

impl From<IOError> for Error {
    fn from(e: IOError) -> Self {
        Error::IOError(e.kind())
    }
}

// This is important for other errors to wrap this one.
impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        None
    }
}

/// maps a CIP general status byte to its standard ODVA text
pub fn status_text(status: u8) -> &'static str {
    match status {
        0x00 => "success",
        GSTATUS_CONNECTION_FAILURE => "connection failure",
        GSTATUS_RESOURCE_UNAVAILABLE => "resource unavailable",
        GSTATUS_INVALID_PARAMETER_VALUE => "invalid parameter value",
        GSTATUS_PATH_SEGMENT_ERROR => "path segment error",
        GSTATUS_PATH_DESTINATION_UNKNOWN => "path destination unknown",
        GSTATUS_PARTIAL_TRANSFER => "partial transfer (more data available)",
        GSTATUS_CONNECTION_LOST => "connection lost",
        GSTATUS_SERVICE_NOT_SUPPORTED => "service not supported",
        GSTATUS_INVALID_ATTRIBUTE_VALUE => "invalid attribute value",
        GSTATUS_ATTRIBUTE_LIST_ERROR => "attribute list error",
        GSTATUS_ALREADY_IN_REQUESTED_MODE => "already in requested mode/state",
        GSTATUS_OBJECT_STATE_CONFLICT => "object state conflict",
        GSTATUS_OBJECT_ALREADY_EXISTS => "object already exists",
        GSTATUS_ATTRIBUTE_NOT_SETTABLE => "attribute not settable",
        GSTATUS_PRIVILEGE_VIOLATION => "privilege violation",
        GSTATUS_DEVICE_STATE_CONFLICT => "device state conflict",
        GSTATUS_REPLY_DATA_TOO_LARGE => "reply data too large",
        GSTATUS_FRAGMENTATION_OF_PRIMITIVE => "fragmentation of a primitive value",
        GSTATUS_NOT_ENOUGH_DATA => "not enough data",
        GSTATUS_ATTRIBUTE_NOT_SUPPORTED => "attribute not supported",
        GSTATUS_TOO_MUCH_DATA => "too much data",
        _ => "unknown CIP status",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_known_and_unknown() {
        assert_eq!(status_text(0x04), "path segment error");
        assert_eq!(status_text(0xFE), "unknown CIP status");
    }

    #[test]
    fn cip_error_display() {
        let e = Error::Cip {
            service: 0x4C,
            status: 0x05,
            extended_status: vec![],
        };
        let msg = e.to_string();
        assert!(msg.contains("path destination unknown"));
        assert!(msg.contains("0x4C"));
    }
}
