//! Allocation-free packet classification for the admission hook
//!
//! This sits on the latency-sensitive admission path, so everything here is
//! bounded work over borrowed slices: fixed-offset header reads, no heap,
//! no loops over payload bytes.
//!
//! Classification only: the admit/deny decision lives in the hook, which
//! folds in the active policy. Anything this parser cannot make sense of is
//! [`PacketClass::Unknown`], and unknown traffic is admitted: availability
//! of legitimate traffic outranks the monitor's own uncertainty. Do not
//! tighten this without flagging the behavior change.

/// Sensitive destination ports watched for SYN scanning.
pub const SENSITIVE_PORTS: [u16; 5] = [22, 80, 443, 3389, 5432];

const ETH_HLEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const IPPROTO_TCP: u8 = 6;

const TCP_FLAG_SYN: u8 = 0x02;
const TCP_FLAG_ACK: u8 = 0x10;

/// What the parser concluded about one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    /// Nothing suspicious in the parts we look at
    Clean,
    /// RFC1918 source address; suspicious on a public-facing context
    PrivateSource { saddr: [u8; 4] },
    /// TCP SYN without ACK toward a sensitive port
    SynToSensitivePort { dport: u16 },
    /// Truncated, non-IPv4, or otherwise unparseable; admit on uncertainty
    Unknown,
}

#[inline]
fn be16(b: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*b.get(at)?, *b.get(at + 1)?]))
}

/// Is `addr` in 10/8, 172.16/12 or 192.168/16?
#[inline]
pub fn is_private_ipv4(addr: [u8; 4]) -> bool {
    addr[0] == 10
        || (addr[0] == 172 && (addr[1] & 0xF0) == 16)
        || (addr[0] == 192 && addr[1] == 168)
}

/// Classify one Ethernet frame in bounded time.
pub fn classify(frame: &[u8]) -> PacketClass {
    if frame.len() < ETH_HLEN {
        return PacketClass::Unknown;
    }
    match be16(frame, 12) {
        Some(ETHERTYPE_IPV4) => {}
        _ => return PacketClass::Unknown,
    }

    let ip = &frame[ETH_HLEN..];
    if ip.len() < 20 || (ip[0] >> 4) != 4 {
        return PacketClass::Unknown;
    }
    let ihl = ((ip[0] & 0x0F) as usize) * 4;
    if ihl < 20 || ip.len() < ihl {
        return PacketClass::Unknown;
    }

    let saddr = [ip[12], ip[13], ip[14], ip[15]];
    if is_private_ipv4(saddr) {
        return PacketClass::PrivateSource { saddr };
    }

    if ip[9] == IPPROTO_TCP {
        let tcp = &ip[ihl..];
        if tcp.len() < 20 {
            return PacketClass::Unknown;
        }
        let flags = tcp[13];
        let dport = match be16(tcp, 2) {
            Some(p) => p,
            None => return PacketClass::Unknown,
        };
        if flags & TCP_FLAG_SYN != 0
            && flags & TCP_FLAG_ACK == 0
            && SENSITIVE_PORTS.contains(&dport)
        {
            return PacketClass::SynToSensitivePort { dport };
        }
    }

    PacketClass::Clean
}
