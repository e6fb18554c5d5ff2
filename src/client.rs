// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

use super::constant;
use super::error::Error;
use super::path;
use super::planner::{self, TagResult, TemplateCache};
use super::session::{ConnectionContext, IdentityInfo};
use super::tcp;
use super::types::{TypeDescriptor, Value};
use super::uploader::{self, TagInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tracing::info;

/// configuration for [`Client::connect`].
///
/// `route` follows the `host(/bp/slot)*(/enet/host)*` grammar of
/// [`crate::path::parse_route`]; leave it at the default to address the
/// controller directly with no backplane hop.
#[derive(Debug, Clone)]
pub struct Options {
    pub address: IpAddr,
    pub route: String,
    pub connection_timeout: Duration,
    /// request a 4000-byte Large Forward Open before falling back to 500
    pub large_packets: bool,
    /// run ListIdentity during connect and cache the result in [`Client::info`]
    pub init_info: bool,
    /// enumerate every controller-scoped tag during connect
    pub init_tags: bool,
    /// enumerate tags local to each named program during connect
    pub init_program_tags: Vec<String>,
}

impl Options {
    pub fn new(address: IpAddr) -> Options {
        Options {
            address,
            route: address.to_string(),
            connection_timeout: tcp::TIMEOUT,
            large_packets: true,
            init_info: true,
            init_tags: false,
            init_program_tags: Vec::new(),
        }
    }
}

/// a connected EtherNet/IP session to a CIP device.
///
/// # Examples
///
/// ```no_run
/// use std::net::{IpAddr, Ipv4Addr};
/// use eip_rs::client::Options;
/// use eip_rs::client::Client;
///
/// let opts = Options::new(IpAddr::from(Ipv4Addr::new(192, 168, 1, 10)));
/// let mut client = Client::connect(opts).unwrap();
/// match client.read("Counter1") {
///     Ok(value) => println!("{:?}", value),
///     Err(e) => println!("error: {}", e),
/// }
/// client.close().unwrap();
/// ```
pub struct Client {
    session: ConnectionContext,
    info: Option<IdentityInfo>,
    tags: Vec<TagInfo>,
    program_tags: HashMap<String, Vec<TagInfo>>,
    templates: TemplateCache,
}

impl Client {
    /// connects the TCP transport, registers a session, optionally probes
    /// identity and enumerates tags, then opens a Class 3 connection for
    /// subsequent reads and writes.
    pub fn connect(options: Options) -> Result<Client, Error> {
        let mut tcp_opts = tcp::Options::new(options.address);
        tcp_opts.connection_timeout = Some(options.connection_timeout);
        let transport = tcp::Transport::connect(tcp_opts)?;
        let mut session = ConnectionContext::register(transport)?;

        let info = if options.init_info {
            Some(session.list_identity()?)
        } else {
            None
        };

        session.open(&options.route, options.large_packets)?;

        let tags = if options.init_tags {
            uploader::enumerate_symbols(&mut session)?
        } else {
            Vec::new()
        };

        let mut program_tags = HashMap::new();
        for program in &options.init_program_tags {
            let found = uploader::enumerate_program_tags(&mut session, program)?;
            program_tags.insert(program.clone(), found);
        }

        let mut templates = TemplateCache::new();
        let struct_ids: Vec<u16> = tags
            .iter()
            .chain(program_tags.values().flatten())
            .filter_map(|t| match t.type_descriptor {
                TypeDescriptor::Structure(id) => Some(id),
                TypeDescriptor::Elementary(_) => None,
            })
            .collect();
        for id in struct_ids {
            if !templates.contains_key(&id) {
                let template = uploader::fetch_template(&mut session, id)?;
                templates.insert(id, template);
            }
        }

        info!(address = %options.address, tags = tags.len(), "client connected");
        Ok(Client {
            session,
            info,
            tags,
            program_tags,
            templates,
        })
    }

    /// closes the Class 3 connection and unregisters the session. the
    /// underlying socket is dropped regardless of whether either step
    /// succeeds, so a failed close never leaks the TCP connection.
    pub fn close(mut self) -> Result<(), Error> {
        self.session.close()?;
        self.session.unregister()
    }

    pub fn info(&self) -> Option<&IdentityInfo> {
        self.info.as_ref()
    }

    pub fn tags(&self) -> &[TagInfo] {
        &self.tags
    }

    pub fn program_tags(&self, program: &str) -> Option<&[TagInfo]> {
        self.program_tags.get(program).map(Vec::as_slice)
    }

    fn instance_id_for(&self, tag: &str) -> Option<u32> {
        self.tags
            .iter()
            .chain(self.program_tags.values().flatten())
            .find(|t| t.name == tag)
            .map(|t| t.instance_id)
    }

    /// the tag's declared type, if it was resolved from an enumerated symbol
    /// table entry; lets `write` recognize a `STRING`-alias UDT tag and
    /// encode a `Value::Str` into its struct layout instead of the
    /// standalone `STRING` wire shape.
    fn type_descriptor_for(&self, tag: &str) -> Option<TypeDescriptor> {
        self.tags
            .iter()
            .chain(self.program_tags.values().flatten())
            .find(|t| t.name == tag)
            .map(|t| t.type_descriptor)
    }

    /// reads a single tag by its symbolic reference, e.g.
    /// `"Counters[2].Value"` or `"Program:MainProgram.Setpoint"`.
    pub fn read(&mut self, tag: &str) -> Result<Value, Error> {
        let instance_id = self.instance_id_for(tag);
        planner::read_tag(&mut self.session, tag, instance_id, &self.templates)
    }

    /// writes a single tag. the value's CIP type must match the tag's
    /// declared type; this crate does not coerce between elementary types.
    pub fn write(&mut self, tag: &str, value: Value) -> Result<(), Error> {
        let instance_id = self.instance_id_for(tag);
        let type_descriptor = self.type_descriptor_for(tag);
        planner::write_tag(
            &mut self.session,
            tag,
            instance_id,
            &value,
            &self.templates,
            type_descriptor,
        )
    }

    /// reads several independent tags, packed into as few requests as the
    /// connection's payload budget allows. failures are per-tag: one bad
    /// reference doesn't fail the whole batch.
    pub fn read_many(&mut self, tags: &[&str]) -> Vec<TagResult> {
        let pairs: Vec<(String, Option<u32>)> = tags
            .iter()
            .map(|t| (t.to_string(), self.instance_id_for(t)))
            .collect();
        planner::read_many(&mut self.session, &pairs, &self.templates)
    }

    /// re-enumerates the controller's tag list, replacing any list cached
    /// from `connect`'s `init_tags` option.
    pub fn refresh_tag_list(&mut self) -> Result<&[TagInfo], Error> {
        self.tags = uploader::enumerate_symbols(&mut self.session)?;
        Ok(&self.tags)
    }

    /// sends an arbitrary CIP service to a class/instance/attribute
    /// address, for objects this crate has no dedicated method for.
    pub fn generic_message(
        &mut self,
        service: u8,
        class: u16,
        instance: u16,
        attribute: Option<u16>,
        data: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let req_path = path::encode_class_instance(class, instance, attribute);
        let reply = self.session.send(service, &req_path, data)?;
        Ok(reply.data)
    }

    /// the identity object's revision, if `init_info` ran during connect.
    pub fn revision(&self) -> Option<(u8, u8)> {
        self.info.as_ref().map(|i| i.revision)
    }
}

/// `Get_Attributes_All` (service 0x01) convenience, reading the Identity
/// Object's attribute 1-7 block directly rather than through ListIdentity.
pub fn read_identity_object(client: &mut Client) -> Result<Vec<u8>, Error> {
    client.generic_message(
        constant::SVC_GET_ATTRIBUTES_ALL,
        constant::CLASS_IDENTITY,
        constant::INSTANCE_IDENTITY,
        None,
        &[],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn options_default_route_is_bare_address() {
        let addr = IpAddr::from(Ipv4Addr::new(10, 1, 2, 3));
        let opts = Options::new(addr);
        assert_eq!(opts.route, "10.1.2.3");
        assert!(opts.large_packets);
    }
}
