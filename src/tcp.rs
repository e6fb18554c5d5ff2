// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! TCP transport implementation: socket connect, and the byte-exact framing
//! of an encapsulation message (24-byte header, then exactly `length` more
//! bytes of payload).

use super::constant;
use super::encapsulation::Header;
use super::error::Error;
use std::io::{Read, Write};
use std::net::{IpAddr, TcpStream};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, trace};

/// default connection timeout
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// a set of options for the TCP connection
#[derive(Debug, Clone)]
pub struct Options {
    pub connection_timeout: Option<Duration>,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    address: String,
}

impl Options {
    pub fn new(address: IpAddr) -> Options {
        Options {
            connection_timeout: Some(TIMEOUT),
            read_timeout: TIMEOUT,
            write_timeout: TIMEOUT,
            address: format!("{}:{}", address, constant::EIP_PORT),
        }
    }
}

/// a connected TCP socket, framing raw encapsulation messages.
///
/// this is the only component that touches the network; everything above it
/// works in terms of `Header` + payload bytes.
pub struct Transport {
    stream: Mutex<TcpStream>,
}

impl Transport {
    pub fn connect(options: Options) -> Result<Transport, Error> {
        let tcp_client = match options.connection_timeout {
            Some(timeout) => match options.address.parse::<std::net::SocketAddr>() {
                Ok(socket_address) => TcpStream::connect_timeout(&socket_address, timeout)?,
                Err(e) => return Err(Error::Connect(e.to_string())),
            },
            None => TcpStream::connect(&options.address)?,
        };

        tcp_client.set_read_timeout(Some(options.read_timeout))?;
        tcp_client.set_write_timeout(Some(options.write_timeout))?;
        debug!(address = %options.address, "connected to EtherNet/IP target");
        Ok(Transport {
            stream: Mutex::new(tcp_client),
        })
    }

    /// sends one encapsulation message (header + payload) and returns the
    /// decoded reply header along with its raw payload bytes.
    pub fn send(
        &self,
        command: u16,
        session_handle: u32,
        payload: &[u8],
    ) -> Result<(Header, Vec<u8>), Error> {
        if payload.len() > u16::MAX as usize {
            return Err(Error::ProtocolFraming(format!(
                "outbound payload too large: {} bytes",
                payload.len()
            )));
        }
        let header = Header::new(command, payload.len() as u16, session_handle);
        let mut frame = Vec::with_capacity(constant::ENCAPSULATION_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&header.encode());
        frame.extend_from_slice(payload);

        let mut stream = match self.stream.lock() {
            Ok(s) => s,
            Err(_) => return Err(Error::Connect("transport mutex poisoned".into())),
        };

        trace!(command = format!("0x{:04X}", command), bytes = frame.len(), "send");
        stream.write_all(&frame)?;

        let mut header_buf = [0u8; constant::ENCAPSULATION_HEADER_SIZE];
        stream.read_exact(&mut header_buf)?;
        let reply_header = Header::decode(&header_buf)?;

        if reply_header.length as usize > 65535 {
            return Err(Error::ProtocolFraming(format!(
                "reply length {} implausible",
                reply_header.length
            )));
        }

        let mut body = vec![0u8; reply_header.length as usize];
        stream.read_exact(&mut body)?;
        trace!(bytes = body.len(), "recv");
        Ok((reply_header, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn options_defaults_to_eip_port() {
        let opts = Options::new(IpAddr::from(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(opts.address, format!("10.0.0.1:{}", constant::EIP_PORT));
    }

    #[test]
    fn connect_refused_surfaces_connect_error() {
        // nothing listens on this loopback port in CI
        let mut opts = Options::new(IpAddr::from(Ipv4Addr::new(127, 0, 0, 1)));
        opts.connection_timeout = Some(Duration::from_millis(200));
        opts.read_timeout = Duration::from_millis(200);
        opts.write_timeout = Duration::from_millis(200);
        let result = Transport::connect(opts);
        assert!(result.is_err());
    }
}
