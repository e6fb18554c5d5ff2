use eip_rs::client::{Client, Options};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

#[test]
fn connect_to_nothing_listening_fails_fast() {
    let mut opts = Options::new(IpAddr::from(Ipv4Addr::new(127, 0, 0, 1)));
    opts.connection_timeout = Duration::from_millis(250);
    opts.init_info = false;

    let result = Client::connect(opts);
    assert!(result.is_err());
}
