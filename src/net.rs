//! Host network helpers.

use std::net::{IpAddr, UdpSocket};

/// Address used only to select the outbound interface; nothing is sent.
const ROUTE_TARGET_ADDR: &str = "8.8.8.8:80";

/// The host's preferred outbound IP address.
///
/// Connecting a UDP socket does not send packets, it only asks the kernel for
/// the route, which avoids reporting a loopback address.
pub fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(ROUTE_TARGET_ADDR).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// Hex and printable-ASCII rendering of `data`, 16 bytes per row.
pub fn hex_dump(data: &[u8]) -> Vec<String> {
    data.chunks(16)
        .enumerate()
        .map(|(row, chunk)| {
            let hex: String = chunk.iter().map(|b| format!("{:02x} ", b)).collect();
            let text: String = chunk
                .iter()
                .map(|&b| if (32..127).contains(&b) { b as char } else { '.' })
                .collect();
            format!("{:4}: {:<48} | {}", row * 16, hex, text)
        })
        .collect()
}
