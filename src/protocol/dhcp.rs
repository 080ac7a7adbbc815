//! Minimal DHCP message helpers
//!
//! The relay treats DHCP bodies as opaque bytes. The probe only needs to
//! build a DISCOVER and to recognise the reply to it by transaction id, so
//! this module deliberately stops at the fixed BOOTP header.

use bytes::{BufMut, Bytes, BytesMut};

/// Fixed BOOTP header length, options excluded
pub const BOOTP_HEADER_LEN: usize = 236;

/// Minimum BOOTP message size accepted by older relays
pub const BOOTP_MIN_LEN: usize = 300;

/// Magic cookie that starts the options area
pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const OP_BOOTREQUEST: u8 = 1;
const OP_BOOTREPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;
const FLAG_BROADCAST: u16 = 0x8000;
const OPTION_MESSAGE_TYPE: u8 = 53;
const OPTION_END: u8 = 255;
const DHCPDISCOVER: u8 = 1;

/// Build a DHCPDISCOVER asking for a broadcast reply
pub fn build_discover(xid: u32, hwaddr: [u8; 6]) -> Bytes {
    let mut buf = BytesMut::with_capacity(BOOTP_MIN_LEN);
    buf.put_u8(OP_BOOTREQUEST);
    buf.put_u8(HTYPE_ETHERNET);
    buf.put_u8(hwaddr.len() as u8);
    buf.put_u8(0); // hops
    buf.put_u32(xid);
    buf.put_u16(0); // secs
    buf.put_u16(FLAG_BROADCAST);
    buf.put_bytes(0, 16); // ciaddr, yiaddr, siaddr, giaddr
    buf.put_slice(&hwaddr);
    buf.put_bytes(0, 16 - hwaddr.len());
    buf.put_bytes(0, 64 + 128); // sname, file
    debug_assert_eq!(buf.len(), BOOTP_HEADER_LEN);

    buf.put_slice(&MAGIC_COOKIE);
    buf.put_slice(&[OPTION_MESSAGE_TYPE, 1, DHCPDISCOVER]);
    buf.put_u8(OPTION_END);
    if buf.len() < BOOTP_MIN_LEN {
        let pad = BOOTP_MIN_LEN - buf.len();
        buf.put_bytes(0, pad);
    }
    buf.freeze()
}

/// Transaction id of a BOOTREPLY, `None` for anything else
pub fn reply_xid(payload: &[u8]) -> Option<u32> {
    if payload.len() < BOOTP_HEADER_LEN || payload[0] != OP_BOOTREPLY {
        return None;
    }
    Some(u32::from_be_bytes([
        payload[4], payload[5], payload[6], payload[7],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HWADDR: [u8; 6] = [0x02, 0x00, 0x5e, 0x10, 0x20, 0x30];

    #[test]
    fn test_build_discover_layout() {
        let msg = build_discover(0xdeadbeef, HWADDR);
        assert_eq!(msg.len(), BOOTP_MIN_LEN);
        assert_eq!(msg[0], OP_BOOTREQUEST);
        assert_eq!(msg[1], HTYPE_ETHERNET);
        assert_eq!(msg[2], 6);
        assert_eq!(&msg[4..8], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&msg[10..12], &[0x80, 0x00]);
        assert_eq!(&msg[28..34], &HWADDR);
        assert_eq!(&msg[236..240], &MAGIC_COOKIE);
        assert_eq!(&msg[240..244], &[53, 1, 1, 255]);
    }

    #[test]
    fn test_reply_xid_ignores_requests() {
        let msg = build_discover(7, HWADDR);
        assert_eq!(reply_xid(&msg), None);
    }

    #[test]
    fn test_reply_xid_reads_reply() {
        let mut msg = build_discover(0x01020304, HWADDR).to_vec();
        msg[0] = OP_BOOTREPLY;
        assert_eq!(reply_xid(&msg), Some(0x01020304));
    }

    #[test]
    fn test_reply_xid_rejects_short_payload() {
        assert_eq!(reply_xid(b"xyz"), None);
        assert_eq!(reply_xid(&[OP_BOOTREPLY; 100]), None);
    }
}
