// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::netlink::{RouteAttrs, RouteMsgRef};

/// One entry of the kernel routing table.
///
/// Entries are produced in kernel dump order and are immutable once built.
/// The address family is carried by the [`IpAddr`] variants; destination
/// and gateway always share the same family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    destination: IpAddr,
    prefix_len: u8,
    gateway: IpAddr,
    interface: String,
    source: Option<String>,
}

impl Route {
    /// The destination network prefix. Unspecified (all-zero) for default
    /// routes.
    #[inline]
    pub fn destination(&self) -> IpAddr {
        self.destination
    }

    /// The prefix length in bits (0-32 for IPv4, 0-128 for IPv6). Zero
    /// means no prefix constraint is known.
    #[inline]
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// The next-hop gateway. Unspecified (all-zero) for directly connected
    /// routes.
    #[inline]
    pub fn gateway(&self) -> IpAddr {
        self.gateway
    }

    /// The name of the outgoing interface, or an empty string if the index
    /// could not be resolved or the kernel sent none.
    #[inline]
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// The route's source address in textual form, when the kernel
    /// supplied one.
    #[inline]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

/// Interprets one routing message into a [`Route`], or `None` when the
/// message does not describe a reportable route.
///
/// `resolve` maps an interface index to its current name; resolution
/// failure degrades to an empty name rather than dropping the route.
///
/// Two filters apply. A message passes only if its family is IPv4 or its
/// routing table (header field, overridden by an `RTA_TABLE` attribute) is
/// the main table--IPv4 routes of any table are kept while other families
/// must be main-table. And a message carrying an explicit destination is
/// dropped outright unless its prefix length is exactly 16 or 24.
pub(crate) fn extract_route<F>(
    msg: &RouteMsgRef<'_>,
    attrs: &RouteAttrs<'_>,
    resolve: F,
) -> Option<Route>
where
    F: Fn(u32) -> Option<String>,
{
    let mut table = u32::from(msg.table());
    if let Some(data) = attrs.get(libc::RTA_TABLE) {
        if data.len() >= 4 {
            table = u32::from_ne_bytes(data[..4].try_into().unwrap());
        }
    }

    if msg.family() != libc::AF_INET as u8 && table != u32::from(libc::RT_TABLE_MAIN) {
        return None;
    }

    // Family stays unset until the destination fields decide it; an entry
    // whose family is never set is not a reportable route.
    let mut family: Option<u8> = None;
    let mut net = [0u8; 16];
    let mut prefix_len = 0u8;

    if let Some(dst) = attrs.get(libc::RTA_DST) {
        if msg.dst_len() != 24 && msg.dst_len() != 16 {
            return None;
        }
        family = Some(msg.family());
        copy_addr(&mut net, msg.family(), dst);
        prefix_len = msg.dst_len();
    } else if msg.dst_len() != 0 {
        prefix_len = msg.dst_len();
    } else {
        family = Some(msg.family());
    }

    let mut via = [0u8; 16];
    if let Some(gw) = attrs.get(libc::RTA_GATEWAY) {
        if let Some(fam) = family {
            copy_addr(&mut via, fam, gw);
        }
    }

    let interface = match attrs.get(libc::RTA_OIF) {
        Some(data) if data.len() >= 4 => {
            let index = u32::from_ne_bytes(data[..4].try_into().unwrap());
            resolve(index).unwrap_or_default()
        }
        _ => String::new(),
    };

    let source = attrs
        .get(libc::RTA_SRC)
        .and_then(|data| format_addr(msg.family(), data));

    let (destination, gateway) = match family? as libc::c_int {
        libc::AF_INET => (
            IpAddr::V4(Ipv4Addr::from(<[u8; 4]>::try_from(&net[..4]).unwrap())),
            IpAddr::V4(Ipv4Addr::from(<[u8; 4]>::try_from(&via[..4]).unwrap())),
        ),
        libc::AF_INET6 => (
            IpAddr::V6(Ipv6Addr::from(net)),
            IpAddr::V6(Ipv6Addr::from(via)),
        ),
        _ => return None,
    };

    Some(Route {
        destination,
        prefix_len,
        gateway,
        interface,
        source,
    })
}

/// Copies an address attribute into `dst` at the family's width. Families
/// other than IPv4/IPv6 and attributes shorter than the width copy
/// nothing, leaving the all-zero default.
fn copy_addr(dst: &mut [u8; 16], family: u8, data: &[u8]) {
    let width = match family as libc::c_int {
        libc::AF_INET => 4,
        libc::AF_INET6 => 16,
        _ => return,
    };

    if let Some(bytes) = data.get(..width) {
        dst[..width].copy_from_slice(bytes);
    }
}

/// Renders an address attribute as text at the given family's width.
fn format_addr(family: u8, data: &[u8]) -> Option<String> {
    match family as libc::c_int {
        libc::AF_INET => {
            let octets: [u8; 4] = data.get(..4)?.try_into().unwrap();
            Some(Ipv4Addr::from(octets).to_string())
        }
        libc::AF_INET6 => {
            let octets: [u8; 16] = data.get(..16)?.try_into().unwrap();
            Some(Ipv6Addr::from(octets).to_string())
        }
        _ => None,
    }
}

/// Resolves an interface index to its current name via `if_indextoname`.
pub(crate) fn ifname(index: u32) -> Option<String> {
    let mut buf = [0u8; libc::IF_NAMESIZE];

    let ret = unsafe { libc::if_indextoname(index, buf.as_mut_ptr() as *mut libc::c_char) };
    if ret.is_null() {
        return None;
    }

    let len = buf.iter().position(|c| *c == 0).unwrap_or(buf.len());
    Some(String::from_utf8_lossy(&buf[..len]).into_owned())
}
