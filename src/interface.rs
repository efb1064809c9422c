use std::io;
use std::net::IpAddr;

use get_if_addrs::get_if_addrs;
use log::warn;

use crate::address_family::Family;
use crate::config::QueryOptions;
use crate::net;

/// One address of one interface, with the index resolved.
#[derive(Debug, Clone)]
pub struct IfaceAddr {
    pub name: String,
    pub index: u32,
    pub addr: IpAddr,
}

/// A change reported by the external interface-event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceEvent {
    LinkUp { ifname: String },
    LinkDown { ifname: String },
    NewAddr { ifname: String, addr: IpAddr },
    DelAddr { ifname: String, addr: IpAddr },
}

impl InterfaceEvent {
    pub fn ifname(&self) -> &str {
        match self {
            InterfaceEvent::LinkUp { ifname }
            | InterfaceEvent::LinkDown { ifname }
            | InterfaceEvent::NewAddr { ifname, .. }
            | InterfaceEvent::DelAddr { ifname, .. } => ifname,
        }
    }
}

/// An empty prefix list matches everything.
pub fn matches_prefixes(name: &str, prefixes: &[String]) -> bool {
    prefixes.is_empty() || prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
}

/// Enumerates the interface addresses a query should fan out over.
/// Loopback interfaces are skipped; the rest are filtered by the query
/// options.
pub fn enumerate(opts: &QueryOptions) -> io::Result<Vec<IfaceAddr>> {
    let mut matching = Vec::new();
    for iface in get_if_addrs()? {
        if iface.is_loopback() {
            continue;
        }
        if !matches_prefixes(&iface.name, &opts.interface_prefixes) {
            continue;
        }
        if let Some(ref ifname) = opts.ifname {
            if *ifname != iface.name {
                continue;
            }
        }
        let addr = iface.ip();
        if let Some(family) = opts.family {
            if family != Family::of(&addr) {
                continue;
            }
        }
        let index = match net::if_nametoindex(&iface.name) {
            Ok(index) => index,
            Err(err) => {
                warn!("could not resolve index of {}: {}", iface.name, err);
                continue;
            }
        };
        if let Some(ifindex) = opts.ifindex {
            if ifindex != index {
                continue;
            }
        }
        matching.push(IfaceAddr {
            name: iface.name,
            index,
            addr,
        });
    }
    Ok(matching)
}
