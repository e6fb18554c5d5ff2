// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Wire-level constants from the ODVA CIP / EtherNet/IP specifications.

#![allow(dead_code)]

/// default EtherNet/IP TCP port
pub const EIP_PORT: u16 = 44818;

// Encapsulation commands (EIP-CIP-V1, chapter 2-3.2)
pub const CMD_NOP: u16 = 0x0000;
pub const CMD_LIST_IDENTITY: u16 = 0x0063;
pub const CMD_LIST_INTERFACES: u16 = 0x0064;
pub const CMD_REGISTER_SESSION: u16 = 0x0065;
pub const CMD_UNREGISTER_SESSION: u16 = 0x0066;
pub const CMD_SEND_RR_DATA: u16 = 0x006F;
pub const CMD_SEND_UNIT_DATA: u16 = 0x0070;

/// size in bytes of the encapsulation header, always present at the start of a frame
pub const ENCAPSULATION_HEADER_SIZE: usize = 24;

// CPF (Common Packet Format) item type ids
pub const CPF_ITEM_NULL_ADDRESS: u16 = 0x0000;
pub const CPF_ITEM_CONNECTED_ADDRESS: u16 = 0x00A1;
pub const CPF_ITEM_CONNECTED_DATA: u16 = 0x00B1;
pub const CPF_ITEM_UNCONNECTED_DATA: u16 = 0x00B2;
pub const CPF_ITEM_SEQUENCED_ADDRESS: u16 = 0x8002;

// CIP service codes
pub const SVC_GET_ATTRIBUTES_ALL: u8 = 0x01;
pub const SVC_GET_ATTRIBUTE_LIST: u8 = 0x03;
pub const SVC_GET_ATTRIBUTE_SINGLE: u8 = 0x0E;
pub const SVC_RESET: u8 = 0x05;
pub const SVC_MULTIPLE_SERVICE_PACKET: u8 = 0x0A;
pub const SVC_GET_INSTANCE_ATTRIBUTE_LIST: u8 = 0x55;
pub const SVC_READ_TAG: u8 = 0x4C;
pub const SVC_READ_TAG_FRAGMENTED: u8 = 0x52;
pub const SVC_WRITE_TAG: u8 = 0x4D;
pub const SVC_WRITE_TAG_FRAGMENTED: u8 = 0x53;
pub const SVC_READ_MODIFY_WRITE_TAG: u8 = 0x4E;
pub const SVC_READ_TEMPLATE: u8 = 0x4C;
pub const SVC_FORWARD_OPEN: u8 = 0x54;
pub const SVC_LARGE_FORWARD_OPEN: u8 = 0x5B;
pub const SVC_FORWARD_CLOSE: u8 = 0x4E;

/// reply service codes have the top bit set
pub const SVC_REPLY_MASK: u8 = 0x80;

// CIP general status codes (volume 1, appendix B)
pub const STATUS_SUCCESS: u8 = 0x00;
pub const STATUS_CONNECTION_FAILURE: u8 = 0x01;
pub const STATUS_RESOURCE_UNAVAILABLE: u8 = 0x02;
pub const STATUS_INVALID_PARAMETER_VALUE: u8 = 0x03;
pub const STATUS_PATH_SEGMENT_ERROR: u8 = 0x04;
pub const STATUS_PATH_DESTINATION_UNKNOWN: u8 = 0x05;
pub const STATUS_PARTIAL_TRANSFER: u8 = 0x06;
pub const STATUS_CONNECTION_LOST: u8 = 0x07;
pub const STATUS_SERVICE_NOT_SUPPORTED: u8 = 0x08;
pub const STATUS_INVALID_ATTRIBUTE_VALUE: u8 = 0x09;
pub const STATUS_ATTRIBUTE_LIST_ERROR: u8 = 0x0A;
pub const STATUS_ALREADY_IN_REQUESTED_MODE: u8 = 0x0B;
pub const STATUS_OBJECT_STATE_CONFLICT: u8 = 0x0C;
pub const STATUS_OBJECT_ALREADY_EXISTS: u8 = 0x0D;
pub const STATUS_ATTRIBUTE_NOT_SETTABLE: u8 = 0x0E;
pub const STATUS_PRIVILEGE_VIOLATION: u8 = 0x0F;
pub const STATUS_DEVICE_STATE_CONFLICT: u8 = 0x10;
pub const STATUS_REPLY_DATA_TOO_LARGE: u8 = 0x11;
pub const STATUS_FRAGMENTATION_OF_PRIMITIVE: u8 = 0x12;
pub const STATUS_NOT_ENOUGH_DATA: u8 = 0x13;
pub const STATUS_ATTRIBUTE_NOT_SUPPORTED: u8 = 0x14;
pub const STATUS_TOO_MUCH_DATA: u8 = 0x15;

// CIP class codes
pub const CLASS_IDENTITY: u16 = 0x01;
pub const CLASS_MESSAGE_ROUTER: u16 = 0x02;
pub const CLASS_CONNECTION_MANAGER: u16 = 0x06;
pub const CLASS_PROGRAM_NAME: u16 = 0x64;
pub const CLASS_SYMBOL_OBJECT: u16 = 0x6B;
pub const CLASS_TEMPLATE_OBJECT: u16 = 0x6C;

pub const INSTANCE_CONNECTION_MANAGER: u16 = 1;
pub const INSTANCE_IDENTITY: u16 = 1;
pub const INSTANCE_PROGRAM_NAME: u16 = 1;

// Elementary CIP data type codes (volume 1, appendix C)
pub const TYPE_BOOL: u16 = 0xC1;
pub const TYPE_SINT: u16 = 0xC2;
pub const TYPE_INT: u16 = 0xC3;
pub const TYPE_DINT: u16 = 0xC4;
pub const TYPE_LINT: u16 = 0xC5;
pub const TYPE_USINT: u16 = 0xC6;
pub const TYPE_UINT: u16 = 0xC7;
pub const TYPE_UDINT: u16 = 0xC8;
pub const TYPE_ULINT: u16 = 0xC9;
pub const TYPE_REAL: u16 = 0xCA;
pub const TYPE_LREAL: u16 = 0xCB;
pub const TYPE_DWORD: u16 = 0xD3;
pub const TYPE_STRING: u16 = 0xD0;
pub const TYPE_SHORT_STRING: u16 = 0xDA;
pub const TYPE_STRUCT: u16 = 0xA0;

/// mask applied to a symbol's reported type code; when set, the low 12 bits
/// are a template instance id rather than an elementary type code
pub const TYPE_STRUCTURE_BIT: u16 = 0x8000;
/// low 12 bits of a structure type code hold the template instance id
pub const TEMPLATE_ID_MASK: u16 = 0x0FFF;

/// byte size of a standard `STRING` member's fixed data buffer inside a template
pub const STRING_FIXED_CAPACITY: usize = 82;

/// ANSI extended symbolic segment type prefix
pub const EPATH_SYMBOLIC_SEGMENT: u8 = 0x91;
/// logical segment, class 8-bit
pub const EPATH_CLASS_8_BIT: u8 = 0x20;
/// logical segment, class 16-bit
pub const EPATH_CLASS_16_BIT: u8 = 0x21;
/// logical segment, instance 8-bit
pub const EPATH_INSTANCE_8_BIT: u8 = 0x24;
/// logical segment, instance 16-bit
pub const EPATH_INSTANCE_16_BIT: u8 = 0x25;
/// logical segment, attribute 8-bit
pub const EPATH_ATTRIBUTE_8_BIT: u8 = 0x30;
/// logical segment, member / array index 8-bit
pub const EPATH_ELEMENT_8_BIT: u8 = 0x28;
/// logical segment, member / array index 16-bit
pub const EPATH_ELEMENT_16_BIT: u8 = 0x29;
/// logical segment, member / array index 32-bit
pub const EPATH_ELEMENT_32_BIT: u8 = 0x2A;
/// port segment for routing through a backplane/network hop
pub const EPATH_PORT_SEGMENT: u8 = 0x00;
/// well-known port number for the backplane
pub const PORT_BACKPLANE: u8 = 1;
/// well-known port number for an EtherNet/IP link
pub const PORT_ENET: u8 = 2;

/// default negotiated connection size when the controller rejects Large Forward Open
pub const STANDARD_CONNECTION_SIZE: u16 = 500;
/// requested connection size for Large Forward Open
pub const LARGE_CONNECTION_SIZE: u32 = 4000;

/// fixed overhead subtracted from the negotiated connection size to obtain the
/// usable payload budget for a single CIP service request/reply
pub const CIP_REQUEST_OVERHEAD: usize = 4;
pub const MULTI_SERVICE_HEADER_OVERHEAD: usize = 2;
pub const MULTI_SERVICE_OFFSET_ENTRY: usize = 2;

/// minimum firmware major revision that supports instance-id addressing for
/// controller-scoped tags (an observed constraint, not a documented one)
pub const MIN_INSTANCE_ID_FIRMWARE: u8 = 21;

/// largest EPATH this crate will emit for a single tag reference; a path
/// near this size signals a typo before it reaches the wire
pub const EIP_MAX_PATH_BYTES: usize = 246;

/// size in bytes of an elementary CIP type, or 0 if `code` names a structure
pub fn elementary_size(code: u16) -> usize {
    match code {
        TYPE_BOOL | TYPE_SINT | TYPE_USINT => 1,
        TYPE_INT | TYPE_UINT => 2,
        TYPE_DINT | TYPE_UDINT | TYPE_REAL | TYPE_DWORD => 4,
        TYPE_LINT | TYPE_ULINT | TYPE_LREAL => 8,
        _ => 0,
    }
}
