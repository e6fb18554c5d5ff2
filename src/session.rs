// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Session lifecycle: RegisterSession, optional ListIdentity probing,
//! Forward Open (falling back from Large to standard), Forward Close, and
//! UnregisterSession. Also the generic CIP Message Router request/reply
//! envelope shared by every service this crate sends, connected or not.

use super::constant;
use super::encapsulation::{self, CpfItem, Header};
use super::error::Error;
use super::path;
use super::tcp::Transport;
use super::transport::{ConnectionSize, ForwardCloseRequest, ForwardOpenReply, ForwardOpenRequest};
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};

/// identity information returned by a ListIdentity broadcast/unicast, used
/// to detect a Micro800-family controller ahead of any tag I/O.
#[derive(Debug, Clone)]
pub struct IdentityInfo {
    pub vendor_id: u16,
    pub device_type: u16,
    pub product_code: u16,
    pub revision: (u8, u8),
    pub status: u16,
    pub serial_number: u32,
    pub product_name: String,
}

impl IdentityInfo {
    /// Micro800 controllers answer Get_Attribute_List on the Symbol Object
    /// inconsistently; callers use this to skip symbol enumeration and fall
    /// back to a user-supplied tag list.
    pub fn is_micro800(&self) -> bool {
        self.product_name.contains("Micro8")
    }
}

fn parse_identity_item(data: &[u8]) -> Result<IdentityInfo, Error> {
    if data.len() < 33 {
        return Err(Error::ProtocolFraming("identity item too short".into()));
    }
    // skip sockaddr (2 + 2 + 4 + 8 = 16 bytes) to reach the CIP identity fields
    let d = &data[16..];
    let name_len = d[19] as usize;
    let name_end = 20 + name_len;
    if d.len() < name_end + 1 {
        return Err(Error::ProtocolFraming("identity product name truncated".into()));
    }
    Ok(IdentityInfo {
        vendor_id: LittleEndian::read_u16(&d[0..2]),
        device_type: LittleEndian::read_u16(&d[2..4]),
        product_code: LittleEndian::read_u16(&d[4..6]),
        revision: (d[6], d[7]),
        status: LittleEndian::read_u16(&d[8..10]),
        serial_number: LittleEndian::read_u32(&d[10..14]),
        product_name: String::from_utf8_lossy(&d[20..name_end]).into_owned(),
    })
}

/// a decoded CIP Message Router reply
#[derive(Debug, Clone)]
pub struct CipReply {
    pub service: u8,
    pub status: u8,
    pub extended_status: Vec<u16>,
    pub data: Vec<u8>,
    /// set when `status` is "partial transfer": more data remains to be
    /// fetched with a follow-up fragmented request
    pub partial: bool,
}

/// encodes a CIP Message Router request: service, EPATH (word-counted and
/// padded), then the service's own request data.
pub fn build_request(service: u8, req_path: &[u8], data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + req_path.len() + data.len());
    buf.push(service);
    let mut path_bytes = req_path.to_vec();
    let words = path::word_count_with_pad(&mut path_bytes);
    buf.push(words);
    buf.extend_from_slice(&path_bytes);
    buf.extend_from_slice(data);
    buf
}

/// decodes a CIP Message Router reply. a non-success general status other
/// than "partial transfer" is surfaced as `Error::Cip` rather than returned
/// in the `CipReply`, since every caller needs to handle that branch anyway.
pub fn parse_reply(buf: &[u8]) -> Result<CipReply, Error> {
    if buf.len() < 4 {
        return Err(Error::ProtocolFraming("CIP reply too short".into()));
    }
    let service = buf[0] & !constant::SVC_REPLY_MASK;
    let status = buf[2];
    let ext_len = buf[3] as usize;
    let ext_start = 4;
    let ext_end = ext_start + ext_len * 2;
    if buf.len() < ext_end {
        return Err(Error::ProtocolFraming("truncated extended status".into()));
    }
    let extended_status = (0..ext_len)
        .map(|i| LittleEndian::read_u16(&buf[ext_start + i * 2..ext_start + i * 2 + 2]))
        .collect::<Vec<_>>();
    let data = buf[ext_end..].to_vec();

    if status != constant::STATUS_SUCCESS && status != constant::STATUS_PARTIAL_TRANSFER {
        return Err(Error::Cip {
            service,
            status,
            extended_status,
        });
    }
    Ok(CipReply {
        service,
        status,
        extended_status,
        data,
        partial: status == constant::STATUS_PARTIAL_TRANSFER,
    })
}

/// owns the TCP transport, the EtherNet/IP session handle, and (once
/// opened) the Class 3 connection ids needed to address `SendUnitData`
/// traffic. every CIP request this crate sends passes through one of
/// `send_unconnected`/`send_connected`.
pub struct ConnectionContext {
    transport: Transport,
    session_handle: u32,
    connected: Option<ConnectedState>,
    sequence: u16,
    connection_serial: u16,
}

struct ConnectedState {
    o_to_t_connection_id: u32,
    t_to_o_connection_id: u32,
    connection_path: Vec<u8>,
    payload_budget: usize,
}

impl ConnectionContext {
    /// sends RegisterSession and stores the session handle the target
    /// assigns for the lifetime of this connection.
    pub fn register(transport: Transport) -> Result<ConnectionContext, Error> {
        let mut payload = [0u8; 4];
        LittleEndian::write_u16(&mut payload[0..2], 1); // protocol version
        let (header, _body) = transport.send(constant::CMD_REGISTER_SESSION, 0, &payload)?;
        if header.status != 0 {
            return Err(Error::Connect(format!(
                "RegisterSession rejected with status 0x{:08X}",
                header.status
            )));
        }
        debug!(session = header.session_handle, "session registered");
        Ok(ConnectionContext {
            transport,
            session_handle: header.session_handle,
            connected: None,
            sequence: 1,
            connection_serial: (header.session_handle & 0xFFFF) as u16,
        })
    }

    pub fn session_handle(&self) -> u32 {
        self.session_handle
    }

    /// sends ListIdentity over the already-connected TCP socket and parses
    /// the single identity item a unicast query returns.
    pub fn list_identity(&self) -> Result<IdentityInfo, Error> {
        let (_header, body) = self.transport.send(constant::CMD_LIST_IDENTITY, 0, &[])?;
        if body.len() < 6 {
            return Err(Error::ProtocolFraming("ListIdentity reply too short".into()));
        }
        let items = encapsulation::decode_cpf(&{
            // ListIdentity's body is already an item count + items, without
            // the interface-handle/timeout prefix SendRRData carries
            let mut prefixed = vec![0u8; 6];
            prefixed[4..6].copy_from_slice(&body[0..2]);
            prefixed.extend_from_slice(&body[2..]);
            prefixed
        })?;
        let item = items
            .first()
            .ok_or_else(|| Error::ProtocolFraming("ListIdentity reply has no items".into()))?;
        parse_identity_item(&item.data)
    }

    /// opens a Class 3 connection, preferring Large Forward Open when
    /// `prefer_large` is set and falling back to a standard-size Forward
    /// Open if the target rejects it (older firmware only supports 500
    /// bytes per connection).
    pub fn open(&mut self, route: &str, prefer_large: bool) -> Result<(), Error> {
        let mut connection_path = path::encode_route(route)?;
        connection_path.extend_from_slice(&path::encode_class_instance(
            constant::CLASS_CONNECTION_MANAGER,
            constant::INSTANCE_CONNECTION_MANAGER,
            None,
        ));

        if prefer_large {
            match self.try_forward_open(ConnectionSize::Large(constant::LARGE_CONNECTION_SIZE), &connection_path) {
                Ok(()) => return Ok(()),
                Err(e) => warn!(error = %e, "Large Forward Open rejected, falling back to standard size"),
            }
        }
        self.try_forward_open(
            ConnectionSize::Standard(constant::STANDARD_CONNECTION_SIZE),
            &connection_path,
        )
    }

    fn try_forward_open(&mut self, size: ConnectionSize, connection_path: &[u8]) -> Result<(), Error> {
        let request = ForwardOpenRequest {
            priority_time_tick: 0x0A,
            timeout_ticks: 0x0E,
            connection_serial_number: self.connection_serial,
            vendor_id: 0x1337,
            originator_serial_number: self.session_handle,
            timeout_multiplier: 0x01,
            o_to_t_rpi: 8_000_000,
            t_to_o_rpi: 8_000_000,
            connection_size: size,
            connection_path: connection_path.to_vec(),
        };
        let payload = build_request(request.service(), &[], &request.encode());
        let reply = self.send_unconnected_raw(&payload)?;
        let open_reply = ForwardOpenReply::decode(&reply.data)?;
        let payload_budget = match size {
            ConnectionSize::Standard(n) => n as usize,
            ConnectionSize::Large(n) => n as usize,
        };
        self.connected = Some(ConnectedState {
            o_to_t_connection_id: open_reply.o_to_t_connection_id,
            t_to_o_connection_id: open_reply.t_to_o_connection_id,
            connection_path: connection_path.to_vec(),
            payload_budget,
        });
        debug!(
            o_to_t = open_reply.o_to_t_connection_id,
            t_to_o = open_reply.t_to_o_connection_id,
            "forward open established"
        );
        Ok(())
    }

    /// closes the active connection, if any. a missing connection is not
    /// an error: `close()` is safe to call after `open()` already failed.
    pub fn close(&mut self) -> Result<(), Error> {
        let state = match self.connected.take() {
            Some(s) => s,
            None => return Ok(()),
        };
        let request = ForwardCloseRequest {
            priority_time_tick: 0x0A,
            timeout_ticks: 0x0E,
            connection_serial_number: self.connection_serial,
            vendor_id: 0x1337,
            originator_serial_number: self.session_handle,
            connection_path: state.connection_path,
        };
        let payload = build_request(constant::SVC_FORWARD_CLOSE, &[], &request.encode());
        self.send_unconnected_raw(&payload)?;
        Ok(())
    }

    pub fn unregister(&self) -> Result<(), Error> {
        self.transport.send(constant::CMD_UNREGISTER_SESSION, self.session_handle, &[])?;
        Ok(())
    }

    /// the usable payload budget (bytes) for a single request/reply over
    /// the open connection, after overhead is subtracted.
    pub fn payload_budget(&self) -> usize {
        self.connected
            .as_ref()
            .map(|s| s.payload_budget.saturating_sub(constant::CIP_REQUEST_OVERHEAD))
            .unwrap_or(constant::STANDARD_CONNECTION_SIZE as usize - constant::CIP_REQUEST_OVERHEAD)
    }

    /// sends a Message Router request over the open connection (preferred
    /// once one exists) or unconnected otherwise.
    pub fn send(&mut self, service: u8, req_path: &[u8], data: &[u8]) -> Result<CipReply, Error> {
        let payload = build_request(service, req_path, data);
        if self.connected.is_some() {
            self.send_connected_raw(&payload)
        } else {
            self.send_unconnected_raw(&payload)
        }
    }

    fn send_unconnected_raw(&self, payload: &[u8]) -> Result<CipReply, Error> {
        let items = vec![CpfItem::null_address(), CpfItem::unconnected_data(payload.to_vec())];
        let cpf = encapsulation::encode_cpf(0, &items);
        let (header, body) = self.transport.send(constant::CMD_SEND_RR_DATA, self.session_handle, &cpf)?;
        check_header_status(&header)?;
        let reply_items = encapsulation::decode_cpf(&body)?;
        let cip_payload = encapsulation::cip_payload(&reply_items)?;
        parse_reply(cip_payload)
    }

    fn send_connected_raw(&mut self, payload: &[u8]) -> Result<CipReply, Error> {
        let seq = self.next_sequence();
        let connection_id = self.connected.as_ref().unwrap().o_to_t_connection_id;
        let items = vec![
            CpfItem::connected_address(connection_id),
            CpfItem::connected_data(seq, payload),
        ];
        let cpf = encapsulation::encode_cpf(0, &items);
        let (header, body) = self.transport.send(constant::CMD_SEND_UNIT_DATA, self.session_handle, &cpf)?;
        check_header_status(&header)?;
        let reply_items = encapsulation::decode_cpf(&body)?;
        let cip_payload = encapsulation::cip_payload(&reply_items)?;
        parse_reply(cip_payload)
    }

    fn next_sequence(&mut self) -> u16 {
        let seq = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        seq
    }
}

fn check_header_status(header: &Header) -> Result<(), Error> {
    if header.status != 0 {
        return Err(Error::ProtocolFraming(format!(
            "encapsulation status 0x{:08X}",
            header.status
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_pads_odd_path() {
        let req = build_request(constant::SVC_READ_TAG, &[1, 2, 3], &[9]);
        assert_eq!(req[0], constant::SVC_READ_TAG);
        assert_eq!(req[1], 2); // 4 bytes padded path -> 2 words
    }

    #[test]
    fn parse_reply_success_with_no_extended_status() {
        let buf = [constant::SVC_READ_TAG | constant::SVC_REPLY_MASK, 0, 0, 0, 1, 2, 3];
        let reply = parse_reply(&buf).unwrap();
        assert_eq!(reply.service, constant::SVC_READ_TAG);
        assert_eq!(reply.data, vec![1, 2, 3]);
        assert!(!reply.partial);
    }

    #[test]
    fn parse_reply_errors_on_failure_status() {
        let buf = [constant::SVC_READ_TAG | constant::SVC_REPLY_MASK, 0, constant::STATUS_PATH_SEGMENT_ERROR, 0];
        assert!(parse_reply(&buf).is_err());
    }

    #[test]
    fn parse_reply_partial_transfer_is_ok() {
        let buf = [constant::SVC_READ_TAG | constant::SVC_REPLY_MASK, 0, constant::STATUS_PARTIAL_TRANSFER, 0, 7];
        let reply = parse_reply(&buf).unwrap();
        assert!(reply.partial);
        assert_eq!(reply.data, vec![7]);
    }

    #[test]
    fn micro800_detected_from_product_name() {
        let identity = IdentityInfo {
            vendor_id: 1,
            device_type: 0x0E,
            product_code: 1,
            revision: (20, 11),
            status: 0,
            serial_number: 1,
            product_name: "1766-L32BWA Micro850".to_string(),
        };
        assert!(identity.is_micro800());
    }
}
