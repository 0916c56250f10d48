// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Routing-netlink transport and message framing.
//!
//! Everything here operates on native-endian, length-prefixed kernel
//! structures decoded field-by-field from byte slices; no struct is ever
//! cast out of a receive buffer.

use std::os::fd::RawFd;
use std::{io, mem, ptr};

use crate::error::DumpError;

// Not exported by libc
pub(crate) const NLM_F_DUMP_INTR: u16 = 0x10;

/// Size of `struct nlmsghdr`: u32 len, u16 type, u16 flags, u32 seq, u32 pid.
pub(crate) const NLMSG_HDR_LEN: usize = 16;

/// Size of `struct rtmsg`: eight u8 fields followed by u32 flags.
pub(crate) const RTMSG_LEN: usize = 12;

/// Size of `struct rtattr`: u16 len, u16 type.
const RTATTR_HDR_LEN: usize = 4;

const NLMSG_ALIGNTO: usize = 4;

#[allow(non_snake_case)]
const fn NLMSG_ALIGN(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

#[allow(non_snake_case)]
const fn RTA_ALIGN(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

// =============================================================================
//                                  Transport
// =============================================================================

/// A bound `NETLINK_ROUTE` socket.
///
/// The descriptor is closed on drop, so every exit path out of a dump
/// releases the socket.
pub(crate) struct NetlinkSocket {
    fd: RawFd,
}

impl NetlinkSocket {
    /// Opens a raw routing-netlink socket and binds it with `pid` as the
    /// local netlink address (no multicast groups).
    pub fn open(pid: u32) -> Result<Self, DumpError> {
        let fd = unsafe { libc::socket(libc::AF_NETLINK, libc::SOCK_RAW, libc::NETLINK_ROUTE) };
        if fd < 0 {
            return Err(DumpError::Socket(io::Error::last_os_error()));
        }

        let sock = Self { fd };

        let mut local = unsafe { mem::zeroed::<libc::sockaddr_nl>() };
        local.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        local.nl_pid = pid;
        local.nl_groups = 0;

        let ret = unsafe {
            libc::bind(
                sock.fd,
                ptr::addr_of!(local) as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(DumpError::Bind(io::Error::last_os_error()));
        }

        Ok(sock)
    }

    /// Sends a single `RTM_GETROUTE` dump request as one datagram.
    pub fn request_dump(&self, seq: u32) -> Result<(), DumpError> {
        let req = dump_request(seq);

        let ret = unsafe {
            libc::send(self.fd, req.as_ptr() as *const libc::c_void, req.len(), 0)
        };
        if ret < 0 {
            return Err(DumpError::Send(io::Error::last_os_error()));
        }
        if ret as usize != req.len() {
            return Err(DumpError::Send(io::Error::new(
                io::ErrorKind::WriteZero,
                "short send of netlink dump request",
            )));
        }

        Ok(())
    }

    /// Receives the kernel's dump reply into a buffer sized exactly to the
    /// pending datagram.
    ///
    /// The first phase peeks with `MSG_TRUNC` to learn the full datagram
    /// length without consuming it; the second phase reads the datagram
    /// into an allocation of exactly that length, so the reply can never be
    /// silently truncated.
    pub fn receive_reply(&self) -> Result<Vec<u8>, DumpError> {
        let pending = self.recv_retrying(ptr::null_mut(), 0, libc::MSG_PEEK | libc::MSG_TRUNC)?;

        let mut buf = vec![0u8; pending];
        let len = self.recv_retrying(buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)?;
        buf.truncate(len);

        Ok(buf)
    }

    /// `recv()` with transparent retry of the two transient POSIX receive
    /// errors. A zero-length read means the peer closed the socket.
    fn recv_retrying(
        &self,
        base: *mut libc::c_void,
        len: usize,
        flags: libc::c_int,
    ) -> Result<usize, DumpError> {
        loop {
            let ret = unsafe { libc::recv(self.fd, base, len, flags) };
            if ret > 0 {
                return Ok(ret as usize);
            }
            if ret == 0 {
                return Err(DumpError::NoData);
            }

            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) | Some(libc::EAGAIN) => continue,
                _ => return Err(DumpError::Receive(err)),
            }
        }
    }
}

impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Serializes the dump request: a netlink header followed by a minimal
/// `rtmsg` payload.
///
/// The seed family is fixed to `AF_INET`; the kernel returns routes of both
/// families for a `NLM_F_DUMP` request regardless.
pub(crate) fn dump_request(seq: u32) -> Vec<u8> {
    const REQ_LEN: usize = NLMSG_HDR_LEN + RTMSG_LEN;

    let mut buf = Vec::with_capacity(REQ_LEN);
    buf.extend((REQ_LEN as u32).to_ne_bytes());
    buf.extend(libc::RTM_GETROUTE.to_ne_bytes());
    buf.extend(((libc::NLM_F_REQUEST | libc::NLM_F_DUMP) as u16).to_ne_bytes());
    buf.extend(seq.to_ne_bytes());
    buf.extend(0u32.to_ne_bytes()); // nlmsg_pid

    buf.push(libc::AF_INET as u8); // rtm_family
    buf.extend([0u8; RTMSG_LEN - 1]);

    buf
}

// =============================================================================
//                               Message Walker
// =============================================================================

/// A received netlink dump reply, walkable as a sequence of messages.
pub(crate) struct NetlinkReply<'a> {
    data: &'a [u8],
}

impl<'a> NetlinkReply<'a> {
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    #[inline]
    pub fn messages(&self) -> NlmsgIter<'a> {
        NlmsgIter { data: self.data }
    }
}

/// Iterator over the length-prefixed messages of a reply buffer.
///
/// A message is yielded only if its declared length covers at least the
/// header and fits in the remaining buffer; the first violation ends the
/// iteration, dropping malformed trailing bytes the way the kernel's own
/// `NLMSG_OK` loop does.
pub(crate) struct NlmsgIter<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for NlmsgIter<'a> {
    type Item = NlmsgRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let hdr = self.data.get(..NLMSG_HDR_LEN)?;

        let nlmsg_len = u32::from_ne_bytes(hdr[0..4].try_into().unwrap()) as usize;
        let msg_type = u16::from_ne_bytes(hdr[4..6].try_into().unwrap());
        let flags = u16::from_ne_bytes(hdr[6..8].try_into().unwrap());

        if nlmsg_len < NLMSG_HDR_LEN || nlmsg_len > self.data.len() {
            return None;
        }

        let payload = &self.data[NLMSG_HDR_LEN..nlmsg_len];

        // Truncated padding after the final message is fine
        self.data = self.data.get(NLMSG_ALIGN(nlmsg_len)..).unwrap_or(&[]);

        Some(NlmsgRef {
            msg_type,
            flags,
            payload,
        })
    }
}

/// One netlink message: decoded header fields plus its payload slice.
pub(crate) struct NlmsgRef<'a> {
    msg_type: u16,
    flags: u16,
    payload: &'a [u8],
}

impl<'a> NlmsgRef<'a> {
    #[inline]
    pub fn msg_type(&self) -> u16 {
        self.msg_type
    }

    /// Whether the kernel marked this message with `NLM_F_DUMP_INTR`,
    /// meaning the dump was torn by a concurrent table change.
    #[inline]
    pub fn dump_interrupted(&self) -> bool {
        self.flags & NLM_F_DUMP_INTR != 0
    }

    /// For `NLMSG_ERROR` messages, the (positive) errno the kernel
    /// reported. `None` for any other message type or a truncated error
    /// payload.
    pub fn error_code(&self) -> Option<i32> {
        if self.msg_type != libc::NLMSG_ERROR as u16 {
            return None;
        }

        let errno_bytes = self.payload.get(..4)?;
        // Netlink carries errno values negated
        Some(i32::from_ne_bytes(errno_bytes.try_into().unwrap()).wrapping_neg())
    }

    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }
}

// =============================================================================
//                       Routing Message / Attribute Parser
// =============================================================================

/// The fixed `rtmsg` header at the front of an `RTM_NEWROUTE` payload.
///
/// Only the fields the route extractor consumes are retained.
pub(crate) struct RouteMsgRef<'a> {
    family: u8,
    dst_len: u8,
    table: u8,
    attr_data: &'a [u8],
}

impl<'a> RouteMsgRef<'a> {
    /// Decodes the header from a message payload. `None` if the payload
    /// cannot hold a full `rtmsg`.
    pub fn parse(payload: &'a [u8]) -> Option<Self> {
        if payload.len() < RTMSG_LEN {
            return None;
        }

        Some(Self {
            family: payload[0],
            dst_len: payload[1],
            table: payload[4],
            attr_data: &payload[RTMSG_LEN..],
        })
    }

    #[inline]
    pub fn family(&self) -> u8 {
        self.family
    }

    #[inline]
    pub fn dst_len(&self) -> u8 {
        self.dst_len
    }

    #[inline]
    pub fn table(&self) -> u8 {
        self.table
    }

    #[inline]
    pub fn attr_data(&self) -> &'a [u8] {
        self.attr_data
    }
}

/// A sparse table of route attributes indexed by `RTA_*` type.
///
/// Each slot borrows the attribute's value bytes straight out of the
/// message payload; nothing is copied.
pub(crate) struct RouteAttrs<'a> {
    slots: Vec<Option<&'a [u8]>>,
}

impl<'a> RouteAttrs<'a> {
    /// Walks the attribute stream following an `rtmsg` header, storing
    /// every well-formed attribute with a type of at most `max`.
    ///
    /// An attribute is accepted only while the remaining bytes cover its
    /// header and its declared length fits; the walk stops at the first
    /// malformed record. Types above `max` are skipped, and a duplicate
    /// type overwrites the earlier slot.
    pub fn parse(mut data: &'a [u8], max: u16) -> Self {
        let mut slots = vec![None; max as usize + 1];

        loop {
            let Some(hdr) = data.get(..RTATTR_HDR_LEN) else {
                break;
            };

            let rta_len = u16::from_ne_bytes(hdr[0..2].try_into().unwrap()) as usize;
            let rta_type = u16::from_ne_bytes(hdr[2..4].try_into().unwrap());

            if rta_len < RTATTR_HDR_LEN || rta_len > data.len() {
                break;
            }

            if rta_type <= max {
                slots[rta_type as usize] = Some(&data[RTATTR_HDR_LEN..rta_len]);
            }

            data = data.get(RTA_ALIGN(rta_len)..).unwrap_or(&[]);
        }

        Self { slots }
    }

    #[inline]
    pub fn get(&self, rta_type: u16) -> Option<&'a [u8]> {
        self.slots.get(rta_type as usize).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nlmsg(msg_type: u16, flags: u16, payload: &[u8]) -> Vec<u8> {
        let len = NLMSG_HDR_LEN + payload.len();
        let mut buf = Vec::new();
        buf.extend((len as u32).to_ne_bytes());
        buf.extend(msg_type.to_ne_bytes());
        buf.extend(flags.to_ne_bytes());
        buf.extend(7u32.to_ne_bytes()); // seq
        buf.extend(0u32.to_ne_bytes()); // pid
        buf.extend(payload);
        buf.resize(NLMSG_ALIGN(len), 0);
        buf
    }

    fn rtattr(rta_type: u16, value: &[u8]) -> Vec<u8> {
        let len = RTATTR_HDR_LEN + value.len();
        let mut buf = Vec::new();
        buf.extend((len as u16).to_ne_bytes());
        buf.extend(rta_type.to_ne_bytes());
        buf.extend(value);
        buf.resize(RTA_ALIGN(len), 0);
        buf
    }

    #[test]
    fn dump_request_layout() {
        let req = dump_request(1234);

        assert_eq!(req.len(), NLMSG_HDR_LEN + RTMSG_LEN);
        assert_eq!(
            u32::from_ne_bytes(req[0..4].try_into().unwrap()) as usize,
            req.len()
        );
        assert_eq!(
            u16::from_ne_bytes(req[4..6].try_into().unwrap()),
            libc::RTM_GETROUTE
        );
        assert_eq!(
            u16::from_ne_bytes(req[6..8].try_into().unwrap()),
            (libc::NLM_F_REQUEST | libc::NLM_F_DUMP) as u16
        );
        assert_eq!(u32::from_ne_bytes(req[8..12].try_into().unwrap()), 1234);
        assert_eq!(req[NLMSG_HDR_LEN], libc::AF_INET as u8);
    }

    #[test]
    fn walker_yields_each_message() {
        let mut buf = nlmsg(libc::RTM_NEWROUTE, 0, &[1, 2, 3, 4]);
        buf.extend(nlmsg(libc::RTM_NEWROUTE, 0, &[5, 6, 7, 8, 9, 10, 11, 12]));

        let msgs: Vec<_> = NetlinkReply::new(&buf).messages().collect();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].payload(), &[1, 2, 3, 4]);
        assert_eq!(msgs[1].payload(), &[5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn walker_stops_on_overlong_declared_length() {
        let mut buf = nlmsg(libc::RTM_NEWROUTE, 0, &[1, 2, 3, 4]);
        let mut bad = nlmsg(libc::RTM_NEWROUTE, 0, &[0u8; 8]);
        // Claim more bytes than the buffer holds
        bad[0..4].copy_from_slice(&1024u32.to_ne_bytes());
        buf.extend(bad);

        let msgs: Vec<_> = NetlinkReply::new(&buf).messages().collect();
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn walker_stops_on_undersized_declared_length() {
        let mut buf = nlmsg(libc::RTM_NEWROUTE, 0, &[1, 2, 3, 4]);
        let mut bad = nlmsg(libc::RTM_NEWROUTE, 0, &[0u8; 8]);
        bad[0..4].copy_from_slice(&8u32.to_ne_bytes());
        buf.extend(bad);

        let msgs: Vec<_> = NetlinkReply::new(&buf).messages().collect();
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn walker_drops_trailing_garbage() {
        let mut buf = nlmsg(libc::RTM_NEWROUTE, 0, &[1, 2, 3, 4]);
        buf.extend([0xff; 7]); // too short to be a header

        let msgs: Vec<_> = NetlinkReply::new(&buf).messages().collect();
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn walker_surfaces_dump_interrupted_flag() {
        let buf = nlmsg(libc::RTM_NEWROUTE, NLM_F_DUMP_INTR, &[0u8; 12]);

        let msg = NetlinkReply::new(&buf).messages().next().unwrap();
        assert!(msg.dump_interrupted());
    }

    #[test]
    fn error_message_carries_errno() {
        let buf = nlmsg(libc::NLMSG_ERROR as u16, 0, &(-libc::ENOBUFS).to_ne_bytes());

        let msg = NetlinkReply::new(&buf).messages().next().unwrap();
        assert_eq!(msg.error_code(), Some(libc::ENOBUFS));
    }

    #[test]
    fn error_code_tolerates_extreme_payload_value() {
        let buf = nlmsg(libc::NLMSG_ERROR as u16, 0, &i32::MIN.to_ne_bytes());

        let msg = NetlinkReply::new(&buf).messages().next().unwrap();
        assert_eq!(msg.error_code(), Some(i32::MIN));
    }

    #[test]
    fn error_code_absent_for_route_messages() {
        let buf = nlmsg(libc::RTM_NEWROUTE, 0, &[0u8; 12]);

        let msg = NetlinkReply::new(&buf).messages().next().unwrap();
        assert_eq!(msg.error_code(), None);
    }

    #[test]
    fn attrs_indexed_by_type() {
        let mut data = rtattr(libc::RTA_DST, &[10, 0, 0, 0]);
        data.extend(rtattr(libc::RTA_OIF, &2u32.to_ne_bytes()));

        let attrs = RouteAttrs::parse(&data, libc::RTA_TABLE);
        assert_eq!(attrs.get(libc::RTA_DST), Some(&[10, 0, 0, 0][..]));
        assert_eq!(attrs.get(libc::RTA_OIF), Some(&2u32.to_ne_bytes()[..]));
        assert_eq!(attrs.get(libc::RTA_GATEWAY), None);
    }

    #[test]
    fn attrs_skip_types_beyond_max() {
        let data = rtattr(libc::RTA_TABLE + 3, &[1, 2, 3, 4]);

        let attrs = RouteAttrs::parse(&data, libc::RTA_TABLE);
        assert_eq!(attrs.get(libc::RTA_TABLE + 3), None);
    }

    #[test]
    fn attrs_stop_at_malformed_record() {
        let mut data = rtattr(libc::RTA_DST, &[10, 0, 0, 0]);
        data.extend(3u16.to_ne_bytes()); // declared length below header size
        data.extend(libc::RTA_GATEWAY.to_ne_bytes());
        data.extend(rtattr(libc::RTA_OIF, &2u32.to_ne_bytes()));

        let attrs = RouteAttrs::parse(&data, libc::RTA_TABLE);
        assert_eq!(attrs.get(libc::RTA_DST), Some(&[10, 0, 0, 0][..]));
        // Everything after the malformed record is dropped
        assert_eq!(attrs.get(libc::RTA_GATEWAY), None);
        assert_eq!(attrs.get(libc::RTA_OIF), None);
    }

    #[test]
    fn attrs_stop_on_overlong_declared_length() {
        let mut data = rtattr(libc::RTA_GATEWAY, &[10, 0, 0, 1]);
        data.truncate(6); // value cut short of its declared length

        let attrs = RouteAttrs::parse(&data, libc::RTA_TABLE);
        assert_eq!(attrs.get(libc::RTA_GATEWAY), None);
    }

    #[test]
    fn attrs_duplicate_type_overwrites() {
        let mut data = rtattr(libc::RTA_OIF, &2u32.to_ne_bytes());
        data.extend(rtattr(libc::RTA_OIF, &5u32.to_ne_bytes()));

        let attrs = RouteAttrs::parse(&data, libc::RTA_TABLE);
        assert_eq!(attrs.get(libc::RTA_OIF), Some(&5u32.to_ne_bytes()[..]));
    }

    #[test]
    fn attrs_values_stay_within_payload() {
        let data = rtattr(libc::RTA_DST, &[192, 168, 7, 0]);

        let attrs = RouteAttrs::parse(&data, libc::RTA_TABLE);
        let value = attrs.get(libc::RTA_DST).unwrap();

        let payload_range = data.as_ptr_range();
        assert!(payload_range.contains(&value.as_ptr()));
        assert!(value.as_ptr_range().end <= payload_range.end);
    }

    #[test]
    fn route_msg_header_fields() {
        let mut payload = vec![0u8; RTMSG_LEN];
        payload[0] = libc::AF_INET6 as u8; // rtm_family
        payload[1] = 64; // rtm_dst_len
        payload[4] = libc::RT_TABLE_MAIN; // rtm_table
        payload.extend(rtattr(libc::RTA_OIF, &2u32.to_ne_bytes()));

        let msg = RouteMsgRef::parse(&payload).unwrap();
        assert_eq!(msg.family(), libc::AF_INET6 as u8);
        assert_eq!(msg.dst_len(), 64);
        assert_eq!(msg.table(), libc::RT_TABLE_MAIN);
        assert_eq!(msg.attr_data().len(), 8);
    }

    #[test]
    fn route_msg_rejects_short_payload() {
        assert!(RouteMsgRef::parse(&[0u8; RTMSG_LEN - 1]).is_none());
    }
}
