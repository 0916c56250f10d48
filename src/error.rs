// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::io;

use thiserror::Error;

/// An error encountered while dumping the kernel routing table.
///
/// All transport-level failures abort the dump; the netlink socket is
/// guaranteed closed by the time the error reaches the caller. Malformed
/// trailing data in a kernel reply is not an error--the parse simply stops
/// at the first message or attribute whose declared length cannot be
/// trusted.
#[derive(Debug, Error)]
pub enum DumpError {
    /// The netlink socket could not be created.
    #[error("failed to open netlink socket: {0}")]
    Socket(#[source] io::Error),
    /// The netlink socket could not be bound to its local address.
    #[error("failed to bind netlink socket: {0}")]
    Bind(#[source] io::Error),
    /// The route dump request could not be sent in full.
    #[error("failed to send route dump request: {0}")]
    Send(#[source] io::Error),
    /// Receiving the dump reply failed with a non-transient error.
    ///
    /// `EINTR` and `EAGAIN` are retried inside the transport and never
    /// surface here.
    #[error("failed to receive route dump reply: {0}")]
    Receive(#[source] io::Error),
    /// The netlink socket returned a zero-length read.
    #[error("no data on netlink socket")]
    NoData,
    /// The kernel signaled that the route dump was torn by a concurrent
    /// routing table change.
    ///
    /// No partial results are returned; callers may retry the whole dump.
    #[error("kernel route dump was interrupted")]
    DumpInterrupted,
}
