// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! A client library for EtherNet/IP and CIP communication with
//! Allen-Bradley/Rockwell PLCs (ControlLogix, CompactLogix, Micro800).
//!
//! # Examples
//! ```no_run
//! use eip_rs::client::{Client, Options};
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! let addr = Ipv4Addr::new(192, 168, 1, 10);
//! let opts = Options::new(IpAddr::from(addr));
//! let mut cl = match Client::connect(opts) {
//!     Ok(cl) => cl,
//!     Err(e) => {
//!         println!("{}", e);
//!         return;
//!     }
//! };
//!
//! match cl.read("Counter1") {
//!     Ok(value) => println!("value: {:?}", value),
//!     Err(e) => println!("error: {}", e),
//! }
//! ```
pub mod client;
mod constant;
pub mod encapsulation;
pub mod error;
pub mod path;
pub mod planner;
pub mod session;
pub mod tcp;
pub mod template;
pub mod transport;
pub mod types;
pub mod uploader;
