// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! rtdump retrieves the host's routing table by speaking rtnetlink
//! directly to the Linux kernel--no `ip route` subprocess, no daemon.
//!
//! A dump is one synchronous exchange: a single `RTM_GETROUTE` request, a
//! single exact-sized receive of the kernel's multi-message reply, and one
//! bounds-checked parse pass over its length-prefixed framing.
//!
//! ## Examples
//!
//! To fetch the current routing table:
//!
//! ```no_run
//! # fn dump() -> Result<(), rtdump::DumpError> {
//! for route in rtdump::dump_routes()? {
//!     println!(
//!         "{}/{} via {} dev {}",
//!         route.destination(),
//!         route.prefix_len(),
//!         route.gateway(),
//!         route.interface(),
//!     );
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The result cap and the socket identity are adjustable when the defaults
//! don't fit (e.g. on hosts with very large tables, or in tests against a
//! synthetic netlink peer):
//!
//! ```no_run
//! # fn dump() -> Result<(), rtdump::DumpError> {
//! use rtdump::DumpOptions;
//!
//! let mut opts = DumpOptions::new();
//! opts.set_max_routes(500);
//! let routes = rtdump::dump_routes_with(&opts)?;
//! # Ok(())
//! # }
//! ```

mod error;
mod netlink;
mod route;

pub use error::DumpError;
pub use route::Route;

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use crate::netlink::{NetlinkReply, NetlinkSocket, RouteAttrs, RouteMsgRef};

/// The default cap on the number of routes a dump returns.
pub const DEFAULT_MAX_ROUTES: usize = 100;

/// Tunables for a single routing table dump.
#[derive(Clone, Debug)]
pub struct DumpOptions {
    max_routes: usize,
    bind_pid: Option<u32>,
    seq: Option<u32>,
}

impl DumpOptions {
    pub fn new() -> Self {
        Self {
            max_routes: DEFAULT_MAX_ROUTES,
            bind_pid: None,
            seq: None,
        }
    }

    /// Caps the number of routes returned; the dump stops early (without
    /// error) once the cap is reached. Defaults to [`DEFAULT_MAX_ROUTES`].
    #[inline]
    pub fn set_max_routes(&mut self, max_routes: usize) {
        self.max_routes = max_routes;
    }

    /// Overrides the local netlink address the socket binds with. Defaults
    /// to the process id.
    #[inline]
    pub fn set_bind_pid(&mut self, pid: u32) {
        self.bind_pid = Some(pid);
    }

    /// Overrides the request sequence number. Defaults to the current
    /// wall-clock time in seconds.
    #[inline]
    pub fn set_seq(&mut self, seq: u32) {
        self.seq = Some(seq);
    }
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Dumps the kernel routing table with default [`DumpOptions`].
pub fn dump_routes() -> Result<Vec<Route>, DumpError> {
    dump_routes_with(&DumpOptions::new())
}

/// Dumps the kernel routing table.
///
/// Opens a routing-netlink socket, requests a full route dump, receives
/// the reply and parses it into [`Route`] entries in kernel dump order.
/// The socket is closed before this returns, success or failure. The
/// receive blocks until the kernel replies; no timeout is imposed.
///
/// # Errors
///
/// Any transport failure aborts the dump, as does a kernel-signaled torn
/// dump ([`DumpError::DumpInterrupted`]); no partial results are ever
/// returned. Trailing malformed bytes in the reply are treated as padding
/// and silently ignored.
pub fn dump_routes_with(opts: &DumpOptions) -> Result<Vec<Route>, DumpError> {
    let pid = opts
        .bind_pid
        .unwrap_or_else(|| unsafe { libc::getpid() } as u32);
    let seq = opts.seq.unwrap_or_else(clock_seq);

    let sock = NetlinkSocket::open(pid)?;
    sock.request_dump(seq)?;
    let reply = sock.receive_reply()?;
    drop(sock);

    debug!("received {} byte route dump reply", reply.len());

    parse_reply(&reply, opts.max_routes, route::ifname)
}

fn clock_seq() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Walks a complete dump reply, extracting up to `max_routes` routes.
///
/// `resolve` maps interface indices to names; production passes
/// `if_indextoname`, tests inject a closure.
fn parse_reply<F>(reply: &[u8], max_routes: usize, resolve: F) -> Result<Vec<Route>, DumpError>
where
    F: Fn(u32) -> Option<String>,
{
    let mut routes = Vec::new();

    for msg in NetlinkReply::new(reply).messages() {
        if routes.len() >= max_routes {
            break;
        }

        if msg.dump_interrupted() {
            return Err(DumpError::DumpInterrupted);
        }

        if let Some(errno) = msg.error_code() {
            // Diagnostic only; an in-dump error message does not abort the
            // remaining walk
            warn!("kernel reported errno {} during route dump", errno);
            continue;
        }

        if msg.msg_type() != libc::RTM_NEWROUTE {
            continue;
        }

        let Some(rtm) = RouteMsgRef::parse(msg.payload()) else {
            continue;
        };

        let attrs = RouteAttrs::parse(rtm.attr_data(), libc::RTA_TABLE);
        if let Some(route) = route::extract_route(&rtm, &attrs, &resolve) {
            routes.push(route);
        }
    }

    Ok(routes)
}
