use std::collections::BTreeSet;
use std::net::UdpSocket;

use crate::util::checksum::{crc32_hex, crc32_of_bytes};

/// Well-known probe destinations (discard port). Connecting an unbound UDP
/// socket makes the kernel pick the source address it would route from,
/// which is exactly the set of addresses worth advertising.
const PROBES_V4: &[&str] = &[
    "255.255.255.255:9", // broadcast
    "224.0.0.1:9",       // all systems
    "224.0.0.2:9",       // all routers
    "0.0.0.0:9",
];

const PROBES_V6: &[&str] = &[
    "[::]:9",
    "[::0]:9",
    "[::1]:9",
    "[ff01::1]:9", // interface-local all nodes
    "[ff02::1]:9", // link-local all nodes
    "[ff02::2]:9", // link-local all routers
];

/// Enumerate the host's usable source IPs. Individual probe failures are
/// ignored; the function itself never fails. Duplicates collapse through the
/// set, which also gives a stable sorted order for fingerprinting.
pub fn resolve_local_ips() -> BTreeSet<String> {
    let mut addrs = BTreeSet::new();

    for dest in PROBES_V4 {
        if let Some(ip) = probe("0.0.0.0:0", dest, true) {
            addrs.insert(ip);
        }
    }
    for dest in PROBES_V6 {
        if let Some(ip) = probe("[::]:0", dest, false) {
            addrs.insert(ip);
        }
    }

    addrs
}

fn probe(bind: &str, dest: &str, broadcast: bool) -> Option<String> {
    let sock = UdpSocket::bind(bind).ok()?;
    if broadcast {
        // Broadcast destinations are rejected outright on some kernels
        // without this; the probe is still never sent a packet.
        let _ = sock.set_broadcast(true);
    }
    sock.connect(dest).ok()?;
    let local = sock.local_addr().ok()?;
    let ip = local.ip();
    if ip.is_unspecified() {
        return None;
    }
    Some(ip.to_string())
}

/// CRC-32 over the sorted, semicolon-joined rendering of the address set.
/// Stable across invocations while the set is unchanged; used to notice
/// interface changes cheaply.
pub fn fingerprint(addrs: &BTreeSet<String>) -> String {
    let joined = addrs.iter().cloned().collect::<Vec<_>>().join(";");
    crc32_hex(crc32_of_bytes(joined.as_bytes()))
}
